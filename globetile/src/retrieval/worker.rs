//! Transport that delegates tile production to a background task.
//!
//! Requests and responses are JSON envelopes correlated by the tile key:
//!
//! ```text
//! -> { "tileKey": "3.4.5", "x": 5, "y": 4, "z": 3 }
//! <- { "result": "success", "tileKey": "3.4.5", "data": [...] }
//! <- { "result": "fail", "tileKey": "3.4.5", "msg": "..." }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{RetrievalRequest, RetrievedData, Retriever};
use crate::error::RetrievalError;
use crate::tile::TileKey;

/// Outbound envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRequest {
    pub tile_key: String,
    pub x: u32,
    pub y: u32,
    pub z: usize,
}

impl WorkerRequest {
    pub fn for_tile(key: &TileKey) -> Self {
        Self {
            tile_key: key.to_string(),
            x: key.column,
            y: key.row,
            z: key.level,
        }
    }
}

/// Inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum WorkerResponse {
    Success {
        #[serde(rename = "tileKey")]
        tile_key: String,
        data: Vec<u8>,
    },
    Fail {
        #[serde(rename = "tileKey")]
        tile_key: String,
        msg: String,
    },
    Error {
        #[serde(rename = "tileKey")]
        tile_key: String,
        msg: String,
    },
    Timeout {
        #[serde(rename = "tileKey")]
        tile_key: String,
        #[serde(default)]
        msg: String,
    },
}

impl WorkerResponse {
    pub fn tile_key(&self) -> &str {
        match self {
            Self::Success { tile_key, .. }
            | Self::Fail { tile_key, .. }
            | Self::Error { tile_key, .. }
            | Self::Timeout { tile_key, .. } => tile_key,
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<WorkerResponse>>>>;

/// Sends [`WorkerRequest`]s over a channel and awaits the matching
/// [`WorkerResponse`].
#[derive(Clone)]
pub struct WorkerRetriever {
    outbound: mpsc::UnboundedSender<String>,
    pending: PendingMap,
    timeout: Duration,
    content_type: Option<String>,
}

impl WorkerRetriever {
    /// Connects to a worker through its request and response channels.
    /// Responses are routed on `runtime` until the response channel closes.
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        mut inbound: mpsc::UnboundedReceiver<String>,
        runtime: &Handle,
        timeout: Duration,
    ) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let routes = pending.clone();

        runtime.spawn(async move {
            while let Some(message) = inbound.recv().await {
                let response: WorkerResponse = match serde_json::from_str(&message) {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(error = %e, "Discarding unreadable worker message");
                        continue;
                    }
                };
                let waiter = routes.lock().remove(response.tile_key());
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(response);
                    }
                    None => debug!(tile = response.tile_key(), "No pending request for worker response"),
                }
            }
        });

        Self {
            outbound,
            pending,
            timeout,
            content_type: None,
        }
    }

    /// Labels every payload with `content_type`, since the envelope carries none.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    async fn exchange(&self, key: TileKey) -> Result<RetrievedData, RetrievalError> {
        let envelope = WorkerRequest::for_tile(&key);
        let message = serde_json::to_string(&envelope)
            .map_err(|e| RetrievalError::Transport(e.to_string()))?;

        let (sender, receiver) = oneshot::channel();
        self.pending.lock().insert(envelope.tile_key.clone(), sender);

        if self.outbound.send(message).is_err() {
            self.pending.lock().remove(&envelope.tile_key);
            return Err(RetrievalError::Transport("worker has stopped".to_string()));
        }

        let response = match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(RetrievalError::Transport("worker dropped the request".to_string()))
            }
            Err(_) => {
                self.pending.lock().remove(&envelope.tile_key);
                return Err(RetrievalError::Timeout(self.timeout));
            }
        };

        match response {
            WorkerResponse::Success { data, .. } => Ok(RetrievedData {
                content_type: self.content_type.clone(),
                bytes: Bytes::from(data),
            }),
            WorkerResponse::Fail { msg, .. } | WorkerResponse::Error { msg, .. } => {
                Err(RetrievalError::Failed(msg))
            }
            WorkerResponse::Timeout { .. } => Err(RetrievalError::Timeout(self.timeout)),
        }
    }
}

impl Retriever for WorkerRetriever {
    fn retrieve(
        &self,
        request: RetrievalRequest,
    ) -> impl Future<Output = Result<RetrievedData, RetrievalError>> + Send {
        let this = self.clone();
        async move { this.exchange(request.tile_key).await }
    }
}

/// Runs `handler` as a background worker on `runtime` and returns a
/// retriever connected to it.
pub fn spawn_worker<F>(runtime: &Handle, timeout: Duration, handler: F) -> WorkerRetriever
where
    F: Fn(WorkerRequest) -> WorkerResponse + Send + 'static,
{
    let (request_tx, mut request_rx) = mpsc::unbounded_channel::<String>();
    let (response_tx, response_rx) = mpsc::unbounded_channel::<String>();

    runtime.spawn(async move {
        while let Some(message) = request_rx.recv().await {
            let response = match serde_json::from_str::<WorkerRequest>(&message) {
                Ok(request) => handler(request),
                Err(e) => {
                    warn!(error = %e, "Worker received an unreadable request");
                    continue;
                }
            };
            let Ok(reply) = serde_json::to_string(&response) else {
                continue;
            };
            if response_tx.send(reply).is_err() {
                break;
            }
        }
    });

    WorkerRetriever::new(request_tx, response_rx, runtime, timeout)
}
