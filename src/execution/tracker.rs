use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::{ApiError, ApiResult};
use crate::gateway::client::ApiRequest;
use crate::strategy::repository::StrategyRepository;
use super::types::{StrategyExecution, TaskSnapshot};

const EXECUTIONS_PATH: &str = "strategies/executions";

#[derive(Serialize)]
struct ExecuteBody<'a> {
    execution_params: &'a Value,
}

#[derive(Serialize)]
struct ExecutionFilter<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    strategy_id: Option<&'a str>,
}

// The backend answers either with the execution record or with a queue receipt
#[derive(Deserialize)]
#[serde(untagged)]
enum ExecuteResponse {
    Record(StrategyExecution),
    Queued {
        task_id: String,
        #[serde(default)]
        message: Option<String>,
    },
}

// A handle is the execution id, or the task id the execution was queued under.
// Exact id matches take precedence.
fn position(executions: &[StrategyExecution], handle: &str) -> Option<usize> {
    executions
        .iter()
        .position(|e| e.id == handle)
        .or_else(|| executions.iter().position(|e| e.task_id.as_deref() == Some(handle)))
}

/// Submits executions and reconciles their remote status. Status is only
/// ever taken from backend snapshots, never derived locally.
pub struct ExecutionTracker {
    repository: Arc<StrategyRepository>,
    executions: RwLock<Vec<StrategyExecution>>,
}

impl ExecutionTracker {
    pub fn new(repository: Arc<StrategyRepository>) -> Self {
        Self {
            repository,
            executions: RwLock::new(Vec::new()),
        }
    }

    pub async fn executions(&self) -> Vec<StrategyExecution> {
        self.executions.read().await.clone()
    }

    /// Looks an execution up by id or by the task id it was queued under.
    /// A queued execution's handle keeps resolving after a list fetch
    /// replaced it with the backend's own record.
    pub async fn execution(&self, handle: &str) -> Option<StrategyExecution> {
        let executions = self.executions.read().await;
        position(&executions, handle).map(|i| executions[i].clone())
    }

    /// Queues a run of a cached strategy. The result is always Pending: no
    /// status has been observed yet.
    #[instrument(skip(self, params))]
    pub async fn execute(&self, strategy_id: &str, params: Value) -> ApiResult<StrategyExecution> {
        let strategy = self
            .repository
            .strategy(strategy_id)
            .await
            .ok_or_else(|| ApiError::Consistency(format!("strategy {strategy_id} is not loaded")))?;

        let response: ExecuteResponse = self
            .repository
            .gateway()
            .post(
                &format!("strategies/{strategy_id}/execute"),
                &ExecuteBody { execution_params: &params },
            )
            .await
            .map_err(|e| e.or_fallback("Failed to start strategy"))?;

        let execution = match response {
            ExecuteResponse::Record(record) => record.into_pending(),
            ExecuteResponse::Queued { task_id, message } => {
                debug!(message = ?message, "Execution queued");
                StrategyExecution::submitted(
                    task_id.clone(),
                    strategy.id.clone(),
                    Some(task_id),
                    strategy.strategy_type,
                    params,
                )
            }
        };

        let mut executions = self.executions.write().await;
        executions.retain(|e| e.id != execution.id);
        executions.push(execution.clone());
        info!(execution_id = %execution.id, task_id = ?execution.task_id, "Strategy execution submitted");
        Ok(execution)
    }

    /// Replaces the execution cache with the backend's snapshot (last fetch wins).
    #[instrument(skip(self))]
    pub async fn list_executions(&self, strategy_id: Option<&str>) -> ApiResult<Vec<StrategyExecution>> {
        let request = ApiRequest::get(EXECUTIONS_PATH).with_query(&ExecutionFilter { strategy_id })?;
        let executions: Vec<StrategyExecution> = self
            .repository
            .gateway()
            .send(request)
            .await
            .map_err(|e| e.or_fallback("Failed to load strategy executions"))?;
        debug!(count = executions.len(), "Executions fetched");
        *self.executions.write().await = executions.clone();
        Ok(executions)
    }

    /// Fetches the status of the execution's task and applies it. Snapshots
    /// that would leave a terminal state or return to Pending are rejected.
    #[instrument(skip(self))]
    pub async fn poll_status(&self, execution_id: &str) -> ApiResult<StrategyExecution> {
        let execution = self
            .execution(execution_id)
            .await
            .ok_or_else(|| ApiError::Consistency(format!("execution {execution_id} is not loaded")))?;
        let task_id = execution
            .task_id
            .ok_or_else(|| ApiError::Consistency(format!("execution {execution_id} has no task")))?;

        let snapshot: TaskSnapshot = self
            .repository
            .gateway()
            .get(&format!("tasks/status/{task_id}"))
            .await
            .map_err(|e| e.or_fallback("Failed to load task status"))?;

        let mut executions = self.executions.write().await;
        let index = position(&executions, execution_id)
            .ok_or_else(|| ApiError::Consistency(format!("execution {execution_id} is not loaded")))?;
        let entry = &mut executions[index];
        match entry.apply_snapshot(&snapshot) {
            Ok(true) => info!(status = %entry.status, "Execution status changed"),
            Ok(false) => debug!(status = %entry.status, "Execution status unchanged"),
            Err(e) => {
                warn!(error = %e, "Ignoring out-of-order task snapshot");
                return Err(ApiError::Consistency(e.to_string()));
            }
        }
        Ok(entry.clone())
    }

    /// Polls until the execution reaches a terminal status or `max_polls`
    /// fetches were made. Returns the last observed state either way.
    #[instrument(skip(self, interval), fields(on_close = true))]
    pub async fn wait_for_completion(
        &self,
        execution_id: &str,
        interval: Duration,
        max_polls: usize,
    ) -> ApiResult<StrategyExecution> {
        let mut latest = self
            .execution(execution_id)
            .await
            .ok_or_else(|| ApiError::Consistency(format!("execution {execution_id} is not loaded")))?;
        for attempt in 0..max_polls {
            if latest.status.is_terminal() {
                break;
            }
            if attempt > 0 {
                tokio::time::sleep(interval).await;
            }
            latest = self.poll_status(execution_id).await?;
        }
        if !latest.status.is_terminal() {
            warn!(status = %latest.status, max_polls, "Execution still running after polling");
        }
        Ok(latest)
    }
}
