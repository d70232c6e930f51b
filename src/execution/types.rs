use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::strategy::types::StrategyType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Step-by-step lifecycle: Pending -> Running -> Completed | Failed.
    pub fn can_transition(&self, next: ExecutionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running) | (Self::Running, Self::Completed) | (Self::Running, Self::Failed)
        )
    }

    /// Whether an authoritative snapshot reporting `next` may be taken over.
    /// Snapshots may skip states (Pending -> Completed) but never go back.
    pub fn can_observe(&self, next: ExecutionStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Self::Pending => true,
            Self::Running => next.is_terminal(),
            Self::Completed | Self::Failed => false,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("execution cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
}

/// One triggered run of a strategy, tracked through its remote task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyExecution {
    pub id: String,
    pub strategy_id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    pub execution_type: StrategyType,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>, // completed only
    pub status: ExecutionStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>, // failed only
}

impl StrategyExecution {
    /// A freshly submitted execution: nothing has been observed yet.
    pub fn submitted(
        id: String,
        strategy_id: String,
        task_id: Option<String>,
        execution_type: StrategyType,
        parameters: Value,
    ) -> Self {
        Self {
            id,
            strategy_id,
            task_id,
            execution_type,
            profile_id: None,
            parameters: Some(parameters),
            result: None,
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    /// Resets a backend record to the unobserved Pending state.
    pub fn into_pending(mut self) -> Self {
        self.status = ExecutionStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
        self.result = None;
        self.error_message = None;
        self
    }

    /// Moves one lifecycle step, e.g. after the local side started a run.
    pub fn advance(&mut self, next: ExecutionStatus, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if !self.status.can_transition(next) {
            return Err(InvalidTransition { from: self.status, to: next });
        }
        match next {
            ExecutionStatus::Running => self.started_at = Some(at),
            ExecutionStatus::Completed | ExecutionStatus::Failed => self.completed_at = Some(at),
            ExecutionStatus::Pending => {}
        }
        self.status = next;
        Ok(())
    }

    /// Takes over an authoritative task snapshot. Returns whether anything changed.
    pub fn apply_snapshot(&mut self, snapshot: &TaskSnapshot) -> Result<bool, InvalidTransition> {
        if !self.status.can_observe(snapshot.status) {
            return Err(InvalidTransition {
                from: self.status,
                to: snapshot.status,
            });
        }
        let before = self.clone();

        self.status = snapshot.status;
        if snapshot.status != ExecutionStatus::Pending {
            self.started_at = snapshot.started_at.or(self.started_at);
        }
        match snapshot.status {
            ExecutionStatus::Completed => {
                self.completed_at = snapshot.completed_at.or(self.completed_at);
                self.result = snapshot.result.clone().or(self.result.take());
            }
            ExecutionStatus::Failed => {
                self.completed_at = snapshot.completed_at.or(self.completed_at);
                self.error_message = snapshot.error_message.clone().or(self.error_message.take());
            }
            ExecutionStatus::Pending | ExecutionStatus::Running => {}
        }
        Ok(*self != before)
    }
}

/// Authoritative status of a single remote task (`GET /tasks/status/{id}`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}
