//! State-conditioned invariants for decoded API responses.
//!
//! Every response kind is reduced to a `Shape` and checked against that
//! kind's `Rules` table. Nothing here is retried: a failed check means the server
//! sent something this client cannot trust.

use crate::error::{DuneError, Result};
use crate::models::{
    CancelResponse, ExecuteResponse, ExecutionState, ResultsResponse, StatusResponse,
};

/// Length of an execution id (a ULID).
pub const EXECUTION_ID_LEN: usize = 26;
/// Every ULID minted this millennium starts with this prefix.
pub const EXECUTION_ID_PREFIX: &str = "01";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdRule {
    Required,
    IfPresent,
}

/// What a completed response must carry, and what a non-completed one must not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadRule {
    None,
    Metadata,
    Rows,
}

#[derive(Debug, Clone, Copy)]
struct Rules {
    kind: &'static str,
    execution_id: IdRule,
    timestamps: bool,
    payload: PayloadRule,
}

const EXECUTE_RULES: Rules = Rules {
    kind: "execute",
    execution_id: IdRule::Required,
    timestamps: false,
    payload: PayloadRule::None,
};

const STATUS_RULES: Rules = Rules {
    kind: "status",
    execution_id: IdRule::Required,
    timestamps: true,
    payload: PayloadRule::Metadata,
};

const RESULTS_RULES: Rules = Rules {
    kind: "results",
    execution_id: IdRule::IfPresent,
    timestamps: true,
    payload: PayloadRule::Rows,
};

/// The fields of a response that the rules look at.
#[derive(Debug, Default)]
struct Shape<'a> {
    execution_id: Option<&'a str>,
    state: &'a str,
    ended_at: bool,
    cancelled_at: bool,
    metadata_present: bool,
    rows_present: bool,
    reported_rows: u64,
    actual_rows: usize,
}

pub fn validate_execute(resp: &ExecuteResponse) -> Result<()> {
    check(
        &Shape {
            execution_id: non_empty(&resp.execution_id),
            state: &resp.state,
            ..Default::default()
        },
        &EXECUTE_RULES,
    )
}

pub fn validate_status(resp: &StatusResponse) -> Result<()> {
    check(
        &Shape {
            execution_id: non_empty(&resp.execution_id),
            state: &resp.state,
            ended_at: resp.execution_ended_at.is_some(),
            cancelled_at: resp.cancelled_at.is_some(),
            metadata_present: resp.result_metadata.is_some(),
            ..Default::default()
        },
        &STATUS_RULES,
    )
}

/// Validates a single results page. The row-count check compares the page's
/// own `row_count` with the rows on that page, never the total row count.
pub fn validate_results(resp: &ResultsResponse) -> Result<()> {
    check(
        &Shape {
            execution_id: resp.execution_id.as_deref(),
            state: &resp.state,
            ended_at: resp.execution_ended_at.is_some(),
            cancelled_at: resp.cancelled_at.is_some(),
            rows_present: resp.result.rows.is_some(),
            reported_rows: resp.result.metadata.row_count,
            actual_rows: resp.rows().len(),
            ..Default::default()
        },
        &RESULTS_RULES,
    )
}

pub fn validate_cancel(resp: &CancelResponse) -> Result<()> {
    if !resp.success {
        return Err(DuneError::validation("failed to cancel query execution"));
    }
    Ok(())
}

/// Checks that `id` looks like an execution id: a 26 character ULID.
pub fn validate_execution_id(id: &str) -> Result<()> {
    if id.len() != EXECUTION_ID_LEN
        || !id.starts_with(EXECUTION_ID_PREFIX)
        || !id.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(DuneError::validation(format!("bad execution id: {id:?}")));
    }
    Ok(())
}

fn non_empty(id: &str) -> Option<&str> {
    Some(id).filter(|id| !id.is_empty())
}

fn check(shape: &Shape<'_>, rules: &Rules) -> Result<()> {
    let kind = rules.kind;

    match (shape.execution_id, rules.execution_id) {
        (Some(id), _) => validate_execution_id(id)?,
        (None, IdRule::Required) => {
            return Err(DuneError::validation(format!(
                "{kind}: missing execution id"
            )))
        }
        (None, IdRule::IfPresent) => {}
    }

    let state = ExecutionState::parse(shape.state)
        .ok_or_else(|| DuneError::validation(format!("{kind}: bad state: {:?}", shape.state)))?;

    if rules.payload != PayloadRule::None {
        check_payload(shape, rules, &state)?;
    }
    if rules.timestamps {
        check_timestamps(shape, kind, &state)?;
    }
    Ok(())
}

fn check_payload(shape: &Shape<'_>, rules: &Rules, state: &ExecutionState) -> Result<()> {
    let kind = rules.kind;
    let completed = *state == ExecutionState::Completed;

    match rules.payload {
        PayloadRule::Metadata if completed && !shape.metadata_present => Err(
            DuneError::validation(format!("{kind}: missing result metadata")),
        ),
        PayloadRule::Metadata if !completed && shape.metadata_present => {
            Err(DuneError::validation(format!(
                "{kind}: cannot have result metadata in state {state}"
            )))
        }
        PayloadRule::Rows if completed && shape.reported_rows != shape.actual_rows as u64 => {
            Err(DuneError::validation(format!(
                "{kind}: row count mismatch: {} rows returned, metadata says {}",
                shape.actual_rows, shape.reported_rows
            )))
        }
        PayloadRule::Rows if !completed && shape.rows_present => Err(DuneError::validation(
            format!("{kind}: cannot have rows in state {state}"),
        )),
        _ => Ok(()),
    }
}

fn check_timestamps(shape: &Shape<'_>, kind: &str, state: &ExecutionState) -> Result<()> {
    match state {
        ExecutionState::Completed if !shape.ended_at => {
            return Err(DuneError::validation(format!(
                "{kind}: missing execution_ended_at"
            )))
        }
        s if s.is_running() && shape.ended_at => {
            return Err(DuneError::validation(format!(
                "{kind}: execution_ended_at present in state {state}"
            )))
        }
        _ => {}
    }

    let cancelled = *state == ExecutionState::Cancelled;
    if cancelled && !shape.cancelled_at {
        return Err(DuneError::validation(format!("{kind}: missing cancelled_at")));
    }
    if !cancelled && shape.cancelled_at {
        return Err(DuneError::validation(format!(
            "{kind}: cancelled_at present in state {state}"
        )));
    }
    Ok(())
}
