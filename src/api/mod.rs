pub mod v1_executions;

pub use v1_executions::{ResultFetcher, ResultTarget, StatusPoller, Submitter};
