use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use balancer_core::{RemoteTask, SchedulerError, SchedulerResult};

use crate::handlers::TaskHandlerRegistry;
use crate::protocol::{read_frame, write_frame, RemoteOutcome};

/// TCP endpoint running dispatched tasks.
///
/// Every connection carries exactly one task: the request frame is read, the
/// named handler runs, and the outcome frame is written back before the
/// connection closes.
pub struct WorkerNode {
    listener: TcpListener,
    registry: TaskHandlerRegistry,
    max_frame_bytes: usize,
}

impl WorkerNode {
    pub async fn bind(
        address: &str,
        registry: TaskHandlerRegistry,
        max_frame_bytes: usize,
    ) -> SchedulerResult<Self> {
        let listener = TcpListener::bind(address).await.map_err(|e| {
            SchedulerError::Configuration(format!("cannot listen on {address}: {e}"))
        })?;

        Ok(Self {
            listener,
            registry,
            max_frame_bytes,
        })
    }

    pub fn local_addr(&self) -> SchedulerResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| SchedulerError::Internal(e.to_string()))
    }

    /// Accept connections until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> SchedulerResult<()> {
        let local = self.local_addr()?;
        let handlers = self.registry.names().await;
        info!(address = %local, handlers = ?handlers, "worker node listening");

        let registry = Arc::new(self.registry);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let registry = Arc::clone(&registry);
                        let max_frame_bytes = self.max_frame_bytes;
                        tokio::spawn(async move {
                            if let Err(e) = serve(stream, &registry, max_frame_bytes).await {
                                warn!(peer = %peer, error = %e, "connection failed");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "failed to accept connection"),
                },
                _ = shutdown.recv() => {
                    info!(address = %local, "worker node shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn serve(
    mut stream: TcpStream,
    registry: &TaskHandlerRegistry,
    max_frame_bytes: usize,
) -> SchedulerResult<()> {
    let task: RemoteTask = read_frame(&mut stream, max_frame_bytes).await?;
    debug!(task = %task.name, "received task");

    let result = registry.dispatch(&task.name, task.payload).await;
    if let Err(e) = &result {
        warn!(task = %task.name, error = %e, "task failed");
    }

    write_frame(&mut stream, &RemoteOutcome::from(result)).await
}
