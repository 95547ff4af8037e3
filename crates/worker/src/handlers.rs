use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info};

use balancer_core::{SchedulerError, SchedulerResult};

/// Code a worker node can run on behalf of the dispatcher.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: serde_json::Value) -> SchedulerResult<serde_json::Value>;
}

#[async_trait]
impl<F> TaskHandler for F
where
    F: Fn(serde_json::Value) -> SchedulerResult<serde_json::Value> + Send + Sync,
{
    async fn handle(&self, payload: serde_json::Value) -> SchedulerResult<serde_json::Value> {
        self(payload)
    }
}

/// Named handlers known to a worker node.
#[derive(Clone, Default)]
pub struct TaskHandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn TaskHandler>>>>,
}

impl TaskHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `echo`, `sleep` and `shell` handlers.
    pub async fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("echo", Arc::new(EchoHandler)).await;
        registry.register("sleep", Arc::new(SleepHandler)).await;
        registry.register("shell", Arc::new(ShellHandler)).await;
        registry
    }

    pub async fn register(&self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let name = name.into();
        info!(handler = %name, "registered task handler");
        self.handlers.write().await.insert(name, handler);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run the handler registered as `name`.
    pub async fn dispatch(
        &self,
        name: &str,
        payload: serde_json::Value,
    ) -> SchedulerResult<serde_json::Value> {
        let handler = self
            .get(name)
            .await
            .ok_or_else(|| SchedulerError::TaskExecution(format!("no handler registered for {name}")))?;
        handler.handle(payload).await
    }
}

/// Returns its payload unchanged.
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn handle(&self, payload: serde_json::Value) -> SchedulerResult<serde_json::Value> {
        Ok(payload)
    }
}

/// Sleeps for `{"millis": n}` and reports how long it slept.
pub struct SleepHandler;

#[async_trait]
impl TaskHandler for SleepHandler {
    async fn handle(&self, payload: serde_json::Value) -> SchedulerResult<serde_json::Value> {
        let millis = payload
            .get("millis")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| SchedulerError::TaskExecution("sleep needs a millis field".to_string()))?;
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(serde_json::json!({ "slept_ms": millis }))
    }
}

/// Shell task parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellTaskParams {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
}

/// Runs a local process and returns its exit code and output.
///
/// A non-zero exit code is a task failure carrying the process's stderr.
pub struct ShellHandler;

#[async_trait]
impl TaskHandler for ShellHandler {
    async fn handle(&self, payload: serde_json::Value) -> SchedulerResult<serde_json::Value> {
        let params: ShellTaskParams = serde_json::from_value(payload)
            .map_err(|e| SchedulerError::TaskExecution(format!("invalid shell task parameters: {e}")))?;

        debug!(command = %params.command, args = ?params.args, "running shell task");

        let mut cmd = Command::new(&params.command);
        cmd.args(&params.args)
            .envs(&params.env_vars)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &params.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|e| {
            SchedulerError::TaskExecution(format!("failed to start {}: {e}", params.command))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();

        if !output.status.success() {
            return Err(SchedulerError::TaskExecution(format!(
                "{} exited with {}: {}",
                params.command, output.status, stderr
            )));
        }

        Ok(serde_json::json!({
            "exit_code": output.status.code(),
            "stdout": stdout,
            "stderr": stderr,
        }))
    }
}
