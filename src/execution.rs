//! Handle on a single remote execution.

use std::time::Duration;

use crate::api::{ResultFetcher, ResultTarget, StatusPoller, Submitter};
use crate::error::Result;
use crate::models::{ExecutionState, ResultOptions, ResultsResponse, StatusResponse};
use crate::service::ExecutionService;

/// One execution on the Dune API, identified by its execution id.
///
/// Besides the id the handle only remembers the last state it saw; the server
/// stays the source of truth and every call asks it again.
#[derive(Debug)]
pub struct Execution<'a, C> {
    service: &'a ExecutionService<C>,
    id: String,
    query_id: Option<i64>,
    last_state: Option<ExecutionState>,
}

impl<'a, C> Execution<'a, C> {
    pub(crate) fn new(
        service: &'a ExecutionService<C>,
        id: String,
        query_id: Option<i64>,
        state: Option<ExecutionState>,
    ) -> Self {
        Self {
            service,
            id,
            query_id,
            last_state: state,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The saved query this execution runs; `None` for raw SQL or when unknown.
    pub fn query_id(&self) -> Option<i64> {
        self.query_id
    }

    /// The most recent state observed from the server, if any.
    pub fn last_state(&self) -> Option<&ExecutionState> {
        self.last_state.as_ref()
    }

    fn target(&self) -> ResultTarget {
        ResultTarget::Execution(self.id.clone())
    }

    fn observe(&mut self, state: &str, query_id: Option<i64>) {
        if let Some(state) = ExecutionState::parse(state) {
            self.last_state = Some(state);
        }
        if self.query_id.is_none() {
            self.query_id = query_id;
        }
    }
}

impl<C: Submitter> Execution<'_, C> {
    /// Cancels the execution.
    pub async fn cancel(&self) -> Result<()> {
        self.service.client().cancel_execution(&self.id).await
    }
}

impl<C: StatusPoller> Execution<'_, C> {
    /// Current status, without any result rows.
    pub async fn status(&mut self) -> Result<StatusResponse> {
        let resp = self.service.client().execution_status(&self.id).await?;
        self.observe(&resp.state, resp.query_id);
        Ok(resp)
    }
}

impl<C: ResultFetcher> Execution<'_, C> {
    /// Current state, plus every result row once the execution has completed.
    pub async fn results(&mut self) -> Result<ResultsResponse> {
        self.results_with(ResultOptions::default()).await
    }

    /// Like [`results`](Self::results), but `options` may ask for a single page.
    pub async fn results_with(&mut self, options: ResultOptions) -> Result<ResultsResponse> {
        let resp = self.service.fetch_results(&self.target(), options).await?;
        self.observe(&resp.state, resp.query_id);
        Ok(resp)
    }

    /// The results as CSV text.
    pub async fn results_csv(&self) -> Result<String> {
        self.service.client().results_csv(&self.target()).await
    }

    /// Blocks until the execution is finished and returns its full result.
    ///
    /// `max_consecutive_errors` bounds how many failed polls in a row are
    /// tolerated; zero means no bound, which risks blocking forever if the API
    /// is unreachable. Keep `poll_interval` at a few seconds to stay clear of
    /// rate limits.
    pub async fn wait_get_results(
        &mut self,
        poll_interval: Duration,
        max_consecutive_errors: u32,
    ) -> Result<ResultsResponse> {
        let resp = self
            .service
            .wait_for_completion(&self.id, poll_interval, max_consecutive_errors)
            .await?;
        self.observe(&resp.state, resp.query_id);
        Ok(resp)
    }
}
