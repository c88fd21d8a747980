use reqwest::Response;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api::{ResultFetcher, ResultTarget, StatusPoller, Submitter};
use crate::config::{ClientConfig, Endpoints};
use crate::error::Result;
use crate::models::*;
use crate::transport::{HttpTransport, PreparedRequest};
use crate::validation;

/// Low-level Dune API client that directly calls the REST endpoints.
///
/// Every call goes through [`HttpTransport`] and every decoded body is
/// validated before it is returned.
#[derive(Debug, Clone)]
pub struct DuneClient {
    endpoints: Endpoints,
    transport: HttpTransport,
}

impl DuneClient {
    /// Creates a new client from the given configuration.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            endpoints: Endpoints::new(&config.host),
            transport: HttpTransport::new(
                &config.api_key,
                config.retry_policy.clone(),
                config.timeout,
            )?,
        })
    }

    /// Creates a client configured from `DUNE_API_KEY` / `DUNE_API_HOST`.
    pub fn from_env_vars() -> Result<Self> {
        Self::new(&ClientConfig::from_env_vars()?)
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// GET /api/v1/execution/{execution_id}/results/csv
    pub async fn execution_results_csv(&self, execution_id: &str) -> Result<String> {
        self.results_csv(&ResultTarget::Execution(execution_id.to_string()))
            .await
    }

    /// GET /api/v1/query/{query_id}/results/csv
    /// CSV of the latest execution of a query.
    pub async fn query_results_csv(&self, query_id: i64) -> Result<String> {
        self.results_csv(&ResultTarget::Query(query_id)).await
    }

    fn results_url(&self, target: &ResultTarget) -> String {
        match target {
            ResultTarget::Execution(id) => self.endpoints.execution_results(id),
            ResultTarget::Query(id) => self.endpoints.query_results(*id),
        }
    }

    fn results_csv_url(&self, target: &ResultTarget) -> String {
        match target {
            ResultTarget::Execution(id) => self.endpoints.execution_results_csv(id),
            ResultTarget::Query(id) => self.endpoints.query_results_csv(*id),
        }
    }

    /// Sends the request and decodes the JSON body of the successful response.
    async fn call<T: DeserializeOwned>(&self, request: PreparedRequest) -> Result<T> {
        let resp = self.transport.send(&request).await?;
        decode(resp).await
    }
}

/// Reads the whole body, then parses it, so a truncated body surfaces as a
/// transport error and a malformed one as a decode error.
async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let text_body = resp.text().await?;
    Ok(serde_json::from_str(&text_body)?)
}

impl Submitter for DuneClient {
    async fn execute_query(
        &self,
        query_id: i64,
        request: &ExecuteRequest,
    ) -> Result<ExecuteResponse> {
        let request =
            PreparedRequest::post(self.endpoints.execute_query(query_id)).with_json(request)?;
        let resp: ExecuteResponse = self.call(request).await?;
        validation::validate_execute(&resp)?;
        Ok(resp)
    }

    async fn execute_sql(&self, request: &ExecuteSqlRequest) -> Result<ExecuteResponse> {
        let request = PreparedRequest::post(self.endpoints.execute_sql()).with_json(request)?;
        let resp: ExecuteResponse = self.call(request).await?;
        validation::validate_execute(&resp)?;
        Ok(resp)
    }

    async fn cancel_execution(&self, execution_id: &str) -> Result<()> {
        let request = PreparedRequest::post(self.endpoints.cancel_execution(execution_id));
        let resp: CancelResponse = self.call(request).await?;
        validation::validate_cancel(&resp)
    }
}

impl StatusPoller for DuneClient {
    async fn execution_status(&self, execution_id: &str) -> Result<StatusResponse> {
        let request = PreparedRequest::get(self.endpoints.execution_status(execution_id));
        let resp: StatusResponse = self.call(request).await?;
        validation::validate_status(&resp)?;
        Ok(resp)
    }
}

impl ResultFetcher for DuneClient {
    async fn results_page(
        &self,
        target: &ResultTarget,
        page: ResultPageOption,
    ) -> Result<ResultsResponse> {
        let query = ResultOptions { page: Some(page) }.to_query_pairs();
        let request = PreparedRequest::get(self.results_url(target)).with_query(query);
        let resp: ResultsResponse = self.call(request).await?;
        validation::validate_results(&resp)?;
        Ok(resp)
    }

    async fn results_csv(&self, target: &ResultTarget) -> Result<String> {
        let request = PreparedRequest::get(self.results_csv_url(target));
        let resp = self.transport.send(&request).await?;
        let text_body = resp.text().await?;
        debug!(%target, bytes = text_body.len(), "read csv results");
        Ok(text_body)
    }
}
