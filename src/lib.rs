//! Async client for the Dune query execution API.
//!
//! Submit a saved query or raw SQL, poll the execution until it finishes,
//! then read its (possibly paginated) results:
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use duneapi_client::{DuneClient, ExecutionService};
//!
//! # async fn example() -> Result<(), duneapi_client::DuneError> {
//! let service = ExecutionService::new(DuneClient::from_env_vars()?);
//! let mut execution = service.run_query(1234, None).await?;
//! let results = execution
//!     .wait_get_results(Duration::from_secs(5), 10)
//!     .await?;
//! println!("{} rows", results.rows().len());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod execution;
pub mod models;
pub mod service;
pub mod transport;
pub mod validation;

pub use api::{ResultFetcher, ResultTarget, StatusPoller, Submitter};
pub use client::DuneClient;
pub use config::{ClientConfig, Endpoints};
pub use error::{ApiError, DuneError, RateLimit, Result};
pub use execution::Execution;
pub use models::{ExecutionState, ResultOptions, ResultsResponse, Row};
pub use service::ExecutionService;
pub use transport::RetryPolicy;
