#![allow(async_fn_in_trait)]

use std::fmt;

use crate::error::Result;
use crate::models::{
    ExecuteRequest, ExecuteResponse, ExecuteSqlRequest, ResultPageOption, ResultsResponse,
    StatusResponse,
};

/// Where results are read from: one execution, or the latest execution of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultTarget {
    Execution(String),
    Query(i64),
}

impl fmt::Display for ResultTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execution(id) => write!(f, "execution {id}"),
            Self::Query(id) => write!(f, "query {id}"),
        }
    }
}

/// Starts and stops executions.
pub trait Submitter {
    /// POST /api/v1/query/{query_id}/execute
    /// Submit a saved query for execution with the given parameters.
    async fn execute_query(
        &self,
        query_id: i64,
        request: &ExecuteRequest,
    ) -> Result<ExecuteResponse>;

    /// POST /api/v1/sql/execute
    /// Submit raw SQL for execution.
    async fn execute_sql(&self, request: &ExecuteSqlRequest) -> Result<ExecuteResponse>;

    /// POST /api/v1/execution/{execution_id}/cancel
    /// Request that a pending or executing execution be cancelled.
    async fn cancel_execution(&self, execution_id: &str) -> Result<()>;
}

/// Reads the lightweight status of an execution.
pub trait StatusPoller {
    /// GET /api/v1/execution/{execution_id}/status
    async fn execution_status(&self, execution_id: &str) -> Result<StatusResponse>;
}

/// Reads result data.
pub trait ResultFetcher {
    /// GET /api/v1/{execution|query}/{id}/results?offset=&limit=
    /// Fetch and validate exactly one page of results (or the current state
    /// when the execution has not completed).
    async fn results_page(
        &self,
        target: &ResultTarget,
        page: ResultPageOption,
    ) -> Result<ResultsResponse>;

    /// GET /api/v1/{execution|query}/{id}/results/csv
    /// The whole result as CSV text, read fully into memory.
    async fn results_csv(&self, target: &ResultTarget) -> Result<String>;
}
