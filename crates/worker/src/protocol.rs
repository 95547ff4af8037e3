//! Wire format between dispatcher and worker node.
//!
//! One request and one response per connection, each a JSON document
//! prefixed by its length as a big-endian `u32`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use balancer_core::{SchedulerError, SchedulerResult};

/// Default cap on a single frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Worker's answer to one `RemoteTask`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteOutcome {
    Completed { value: serde_json::Value },
    Failed { message: String },
}

impl RemoteOutcome {
    pub fn into_result(self) -> SchedulerResult<serde_json::Value> {
        match self {
            RemoteOutcome::Completed { value } => Ok(value),
            RemoteOutcome::Failed { message } => Err(SchedulerError::TaskExecution(message)),
        }
    }
}

impl From<SchedulerResult<serde_json::Value>> for RemoteOutcome {
    fn from(result: SchedulerResult<serde_json::Value>) -> Self {
        match result {
            Ok(value) => RemoteOutcome::Completed { value },
            Err(SchedulerError::TaskExecution(message)) => RemoteOutcome::Failed { message },
            Err(e) => RemoteOutcome::Failed {
                message: e.to_string(),
            },
        }
    }
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> SchedulerResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len())
        .map_err(|_| SchedulerError::Protocol(format!("frame of {} bytes is too large", body.len())))?;

    writer.write_all(&len.to_be_bytes()).await.map_err(io_error)?;
    writer.write_all(&body).await.map_err(io_error)?;
    writer.flush().await.map_err(io_error)
}

pub async fn read_frame<R, T>(reader: &mut R, max_frame_bytes: usize) -> SchedulerResult<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await.map_err(io_error)?;

    let len = u32::from_be_bytes(header) as usize;
    if len > max_frame_bytes {
        return Err(SchedulerError::Protocol(format!(
            "frame of {len} bytes exceeds the {max_frame_bytes} byte limit"
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(io_error)?;
    Ok(serde_json::from_slice(&body)?)
}

fn io_error(e: std::io::Error) -> SchedulerError {
    SchedulerError::Protocol(e.to_string())
}
