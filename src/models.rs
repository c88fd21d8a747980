use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// A single result row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Largest page the results endpoints will serve; also the default page size.
pub const LIMIT_ROWS: u32 = 32_000;

/// Prefix every server-side execution state carries.
pub const STATE_PREFIX: &str = "QUERY_STATE_";

/// Decodes an explicit `null` the same way as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Request body for `POST /api/v1/query/{query_id}/execute`
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct ExecuteRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_parameters: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<String>, // "medium" or "large"
}

/// Request body for `POST /api/v1/sql/execute`
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct ExecuteSqlRequest {
    pub sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<String>,
}

/// Response body for both execute endpoints
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct ExecuteResponse {
    #[serde(default)]
    pub execution_id: String,
    #[serde(default)]
    pub state: String,
}

/// Lifecycle state of an execution, decoded from the `QUERY_STATE_*` wire tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionState {
    Pending,
    Executing,
    Completed,
    Failed,
    Cancelled,
    Expired,
    /// Carries the state prefix but a tag this client does not know.
    Other(String),
}

impl ExecutionState {
    /// Parses a wire state. Returns `None` when the state prefix is missing.
    pub fn parse(raw: &str) -> Option<Self> {
        let tag = raw.strip_prefix(STATE_PREFIX)?;
        Some(match tag {
            "PENDING" => Self::Pending,
            "EXECUTING" => Self::Executing,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            "EXPIRED" => Self::Expired,
            other => Self::Other(other.to_string()),
        })
    }

    /// The server will not move the execution out of a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired
        )
    }

    /// Pending and executing states keep the poller going.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Pending | Self::Executing)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Pending => "PENDING",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
            Self::Other(tag) => tag,
        };
        write!(f, "{STATE_PREFIX}{tag}")
    }
}

/// Error details attached to a failed execution
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExecutionError {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Metadata about a result set. On paginated responses `row_count`,
/// `result_set_bytes` and `datapoint_count` describe the current page only,
/// the `total_*` fields describe the whole result.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct ResultMetadata {
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub column_names: Vec<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub column_types: Vec<String>,
    #[serde(default)]
    pub result_set_bytes: u64,
    #[serde(default)]
    pub row_count: u64,
    #[serde(default)]
    pub total_result_set_bytes: u64,
    #[serde(default)]
    pub total_row_count: u64,
    #[serde(default)]
    pub datapoint_count: u64,
}

/// Response body for `GET /api/v1/execution/{execution_id}/status`
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct StatusResponse {
    #[serde(default)]
    pub execution_id: String,
    /// `None` for raw SQL executions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<i64>,
    #[serde(default)]
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_ended_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_metadata: Option<ResultMetadata>,
}

impl StatusResponse {
    pub fn execution_state(&self) -> Option<ExecutionState> {
        ExecutionState::parse(&self.state)
    }
}

/// Rows plus their metadata
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct QueryResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: ResultMetadata,
    /// `None` when the server sent no `rows` field at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
}

/// Response body for the JSON results endpoints. Also used as the merged
/// result of a multi-page fetch.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct ResultsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    /// `None` for raw SQL executions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<i64>,
    #[serde(default)]
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_ended_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub result: QueryResult,
    /// Offset of the next page, if there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_uri: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_execution_finished: bool,
}

impl ResultsResponse {
    pub fn execution_state(&self) -> Option<ExecutionState> {
        ExecutionState::parse(&self.state)
    }

    /// Rows carried by this response, empty when there are none.
    pub fn rows(&self) -> &[Row] {
        self.result.rows.as_deref().unwrap_or_default()
    }

    /// Appends a later page to this (first) page.
    ///
    /// Rows are concatenated in arrival order and the per-page counters are
    /// summed. One-time fields such as `submitted_at` and the column names stay
    /// as the first page reported them; the state, cursor and finished flag
    /// always follow the latest page.
    pub fn merge_page(&mut self, page: ResultsResponse) {
        let ResultsResponse {
            state,
            result,
            next_offset,
            next_uri,
            is_execution_finished,
            ..
        } = page;

        if let Some(rows) = result.rows {
            self.result.rows.get_or_insert_with(Vec::new).extend(rows);
        }
        let metadata = &mut self.result.metadata;
        metadata.result_set_bytes += result.metadata.result_set_bytes;
        metadata.row_count += result.metadata.row_count;
        metadata.datapoint_count += result.metadata.datapoint_count;

        self.state = state;
        self.next_offset = next_offset;
        self.next_uri = next_uri;
        self.is_execution_finished = is_execution_finished;
    }
}

/// Response body for `POST /api/v1/execution/{execution_id}/cancel`
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct CancelResponse {
    #[serde(default)]
    pub success: bool,
}

/// Structured error body some failing responses carry
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: String,
}

/// Requests a specific window of rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultPageOption {
    pub offset: u64,
    pub limit: u32,
}

/// Options for a results fetch. Without an explicit page every page is
/// fetched and merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultOptions {
    pub page: Option<ResultPageOption>,
}

impl ResultOptions {
    pub fn page(offset: u64, limit: u32) -> Self {
        Self {
            page: Some(ResultPageOption { offset, limit }),
        }
    }

    /// True when the caller asked for one specific page rather than the whole result.
    pub fn is_single_page(&self) -> bool {
        matches!(self.page, Some(page) if page.offset > 0 || page.limit > 0)
    }

    /// Query-string pairs for the results endpoints. `limit` is always sent.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(2);
        let limit = match self.page {
            Some(page) => {
                if page.offset > 0 {
                    pairs.push(("offset", page.offset.to_string()));
                }
                if page.limit == 0 {
                    LIMIT_ROWS
                } else {
                    page.limit
                }
            }
            None => LIMIT_ROWS,
        };
        pairs.push(("limit", limit.to_string()));
        pairs
    }
}
