use std::time::Duration;

use tracing::{debug, info, warn};

use crate::api::{ResultFetcher, ResultTarget, Submitter};
use crate::client::DuneClient;
use crate::error::{DuneError, Result};
use crate::execution::Execution;
use crate::models::*;

/// Poll interval used by [`ExecutionService::run_query_get_rows`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Consecutive failed polls tolerated by [`ExecutionService::run_query_get_rows`].
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Higher-level service layer built on top of a low-level client.
/// Drives executions to completion and merges paginated results.
///
/// Every call owns its own accumulator and error counter; nothing is shared
/// between concurrent calls, even for the same execution.
#[derive(Debug, Clone)]
pub struct ExecutionService<C = DuneClient> {
    client: C,
}

impl<C> ExecutionService<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Returns a reference to the low-level client (if you need direct calls).
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Handle for an execution that was submitted elsewhere.
    pub fn execution(&self, execution_id: impl Into<String>) -> Execution<'_, C> {
        Execution::new(self, execution_id.into(), None, None)
    }
}

impl<C: ResultFetcher> ExecutionService<C> {
    /// Returns one page when `options` names a specific page, otherwise the
    /// merged result of every page.
    pub async fn fetch_results(
        &self,
        target: &ResultTarget,
        options: ResultOptions,
    ) -> Result<ResultsResponse> {
        match options.page {
            Some(page) if options.is_single_page() => {
                self.client.results_page(target, page).await
            }
            _ => self.fetch_all_results(target, LIMIT_ROWS).await,
        }
    }

    /// Fetches every page of a result, `page_size` rows at a time, and merges
    /// them in arrival order.
    ///
    /// Each next offset comes from the previous page's `next_offset`; the loop
    /// ends on the first page without one. A page that points back at its own
    /// offset is rejected, since following it would fetch the same page forever.
    /// A `page_size` of zero means the largest page the server allows.
    pub async fn fetch_all_results(
        &self,
        target: &ResultTarget,
        page_size: u32,
    ) -> Result<ResultsResponse> {
        let limit = match page_size {
            0 => LIMIT_ROWS,
            size => size.min(LIMIT_ROWS),
        };
        let mut page = ResultPageOption { offset: 0, limit };

        let mut merged = self.client.results_page(target, page).await?;
        let mut pages = 1;
        log_page(target, &merged);

        while let Some(next_offset) = merged.next_offset {
            if next_offset == page.offset {
                return Err(DuneError::validation(format!(
                    "results: next_offset {next_offset} repeats the current page"
                )));
            }
            page.offset = next_offset;

            let next = self.client.results_page(target, page).await?;
            log_page(target, &next);
            merged.merge_page(next);
            pages += 1;
        }

        debug!(
            %target,
            pages,
            rows = merged.rows().len(),
            finished = merged.is_execution_finished,
            "merged result pages"
        );
        Ok(merged)
    }

    /// Polls an execution until it reaches a terminal state and returns its
    /// full result.
    ///
    /// Failed fetches (after the transport's own retries) are tolerated up to
    /// `max_consecutive_errors` in a row; the next failure ends in
    /// [`DuneError::RetriesExhausted`]. Any successful fetch resets the count.
    /// Zero disables the limit, which can block forever if the API stays
    /// unreachable. Validation errors are never tolerated.
    pub async fn wait_for_completion(
        &self,
        execution_id: &str,
        poll_interval: Duration,
        max_consecutive_errors: u32,
    ) -> Result<ResultsResponse> {
        let target = ResultTarget::Execution(execution_id.to_string());
        let mut consecutive_errors = 0u32;

        loop {
            match self.fetch_all_results(&target, LIMIT_ROWS).await {
                Ok(resp) => {
                    consecutive_errors = 0;
                    if is_finished(&resp) {
                        info!(execution_id, state = %resp.state, "execution finished");
                        return Ok(resp);
                    }
                    debug!(execution_id, state = %resp.state, "execution still running");
                }
                Err(e @ DuneError::Validation(_)) => return Err(e),
                Err(e) => {
                    consecutive_errors += 1;
                    if max_consecutive_errors != 0 && consecutive_errors > max_consecutive_errors
                    {
                        return Err(DuneError::RetriesExhausted {
                            source: Box::new(e),
                        });
                    }
                    warn!(
                        execution_id,
                        consecutive_errors, "failed to retrieve results, retrying: {e}"
                    );
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

impl<C: Submitter> ExecutionService<C> {
    /// Submits a saved query and returns a handle to the new execution.
    pub async fn run_query(
        &self,
        query_id: i64,
        query_parameters: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Execution<'_, C>> {
        let request = ExecuteRequest {
            query_parameters,
            ..Default::default()
        };
        let resp = self.client.execute_query(query_id, &request).await?;
        info!(query_id, execution_id = %resp.execution_id, state = %resp.state, "submitted query");
        let state = ExecutionState::parse(&resp.state);
        Ok(Execution::new(self, resp.execution_id, Some(query_id), state))
    }

    /// Submits raw SQL and returns a handle to the new execution.
    pub async fn run_sql(
        &self,
        sql: &str,
        performance: Option<String>,
    ) -> Result<Execution<'_, C>> {
        let request = ExecuteSqlRequest {
            sql: sql.to_string(),
            performance,
        };
        let resp = self.client.execute_sql(&request).await?;
        info!(execution_id = %resp.execution_id, state = %resp.state, "submitted sql");
        let state = ExecutionState::parse(&resp.state);
        Ok(Execution::new(self, resp.execution_id, None, state))
    }
}

impl<C: Submitter + ResultFetcher> ExecutionService<C> {
    /// Submit a saved query, then poll until completion or failure.
    pub async fn execute_and_poll(
        &self,
        query_id: i64,
        query_parameters: Option<serde_json::Map<String, serde_json::Value>>,
        poll_interval: Duration,
        max_consecutive_errors: u32,
    ) -> Result<ResultsResponse> {
        let mut execution = self.run_query(query_id, query_parameters).await?;
        execution
            .wait_get_results(poll_interval, max_consecutive_errors)
            .await
    }

    /// Submit a saved query, wait for it with the default poll settings and
    /// return just the rows.
    pub async fn run_query_get_rows(
        &self,
        query_id: i64,
        query_parameters: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Vec<Row>> {
        let resp = self
            .execute_and_poll(
                query_id,
                query_parameters,
                DEFAULT_POLL_INTERVAL,
                DEFAULT_MAX_CONSECUTIVE_ERRORS,
            )
            .await?;
        Ok(resp.result.rows.unwrap_or_default())
    }
}

/// Terminal state, or the server saying the execution is done.
fn is_finished(resp: &ResultsResponse) -> bool {
    resp.is_execution_finished
        || resp
            .execution_state()
            .is_some_and(|state| state.is_terminal())
}

fn log_page(target: &ResultTarget, page: &ResultsResponse) {
    debug!(
        %target,
        state = %page.state,
        rows = page.rows().len(),
        row_count = page.result.metadata.row_count,
        next_offset = ?page.next_offset,
        finished = page.is_execution_finished,
        "results page"
    );
}
