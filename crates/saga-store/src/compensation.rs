//! Compensation log entries.

use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::steps::CompensationStep;

/// Outcome of one undo attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationOutcome {
    Pending,
    Succeeded,
    /// The forward effect never materialized; success with a distinct
    /// outcome code rather than a silent one.
    NothingToUndo,
    Failed,
}

impl CompensationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationOutcome::Pending => "pending",
            CompensationOutcome::Succeeded => "succeeded",
            CompensationOutcome::NothingToUndo => "nothing_to_undo",
            CompensationOutcome::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CompensationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CompensationOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CompensationOutcome::Pending),
            "succeeded" => Ok(CompensationOutcome::Succeeded),
            "nothing_to_undo" => Ok(CompensationOutcome::NothingToUndo),
            "failed" => Ok(CompensationOutcome::Failed),
            other => Err(format!("unknown compensation outcome: {other}")),
        }
    }
}

/// One record per undo attempt.
///
/// Entries are created only after the saga entered `Compensating`, and
/// only for steps derived from its `completed_steps` (plus the final
/// order cancellation). The Compensation Executor is the only writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationLogEntry {
    pub entry_id: Uuid,
    pub saga_id: SagaId,
    pub step: CompensationStep,
    /// 1-based attempt counter per step.
    pub attempt: u32,
    pub outcome: CompensationOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CompensationLogEntry {
    /// Opens a pending entry for an attempt about to be made.
    pub fn begin(saga_id: SagaId, step: CompensationStep, attempt: u32) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            saga_id,
            step,
            attempt,
            outcome: CompensationOutcome::Pending,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}
