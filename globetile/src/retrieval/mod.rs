//! Asynchronous tile retrieval.
//!
//! Tiled layers and elevation coverages run on the frame thread and never
//! block on I/O. They hand requests to a [`RetrievalQueue`], which spawns
//! each one on a tokio runtime through a [`Retriever`] transport. Finished
//! retrievals come back over an unbounded channel and are drained by the
//! owner at the start of its next frame.
//!
//! # Queue semantics
//!
//! - A key already in flight is not requested again.
//! - Each submission carries a generation. Only the completion of a key's
//!   current generation is applied, so results of requests forgotten by
//!   [`RetrievalQueue::clear_in_flight`] never override a later resubmission.
//! - At most `queue_size` requests are in flight; further requests are
//!   dropped for this frame and re-issued by a later frame.
//! - A key on the [`AbsentResourceList`] is not requested.
//! - A success clears the key's backoff state and requests a redraw unless
//!   the request suppressed it. A failure marks the key absent and logs a
//!   warning.
//!
//! # Transports
//!
//! - [`HttpRetriever`]: async `reqwest` GET.
//! - [`WorkerRetriever`]: JSON envelopes exchanged with a background task.

mod absent;
mod http;
mod url;
mod worker;

pub use absent::{AbsentResourceList, DEFAULT_TRY_AGAIN_INTERVAL_MS};
pub use http::{HttpRetriever, DEFAULT_RETRIEVAL_TIMEOUT_SECS};
pub use url::{TemplateUrlBuilder, UrlBuilder};
pub use worker::{spawn_worker, WorkerRequest, WorkerResponse, WorkerRetriever};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::error::{ConfigurationError, RetrievalError};
use crate::render::RedrawHandle;
use crate::tile::TileKey;

/// A request for one tile's resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRequest {
    pub tile_key: TileKey,
    pub url: String,
    /// MIME types the consumer can decode. Empty accepts anything; an entry
    /// ending in `/*` accepts every subtype.
    pub accepted_content_types: Vec<String>,
}

impl RetrievalRequest {
    /// Checks a response's content type against the accepted types.
    pub fn accepts(&self, content_type: Option<&str>) -> bool {
        if self.accepted_content_types.is_empty() {
            return true;
        }
        let Some(content_type) = content_type else {
            return false;
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_ascii_lowercase();

        self.accepted_content_types.iter().any(|accepted| {
            match accepted.strip_suffix("/*") {
                Some(prefix) => essence
                    .split_once('/')
                    .is_some_and(|(kind, _)| kind == prefix),
                None => essence == accepted.to_ascii_lowercase(),
            }
        })
    }
}

/// A successfully retrieved payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedData {
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// A finished retrieval, as delivered to the owning layer.
#[derive(Debug, Clone)]
pub struct RetrievalCompletion {
    pub tile_key: TileKey,
    pub url: String,
    pub result: Result<RetrievedData, RetrievalError>,
    generation: u64,
}

/// A transport that fetches a tile resource.
pub trait Retriever: Send + Sync + 'static {
    fn retrieve(
        &self,
        request: RetrievalRequest,
    ) -> impl Future<Output = Result<RetrievedData, RetrievalError>> + Send;
}

/// What [`RetrievalQueue::submit`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    AlreadyInFlight,
    QueueFull,
    Absent,
}

/// Settings shared by every retrieval queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalQueueConfig {
    /// Maximum requests in flight.
    pub queue_size: usize,
    /// Failures tolerated before a resource stays absent.
    pub max_trys: u32,
    /// Milliseconds a failed resource is skipped after each failure.
    pub min_check_interval_ms: u64,
    /// Milliseconds after which a failed resource is retried regardless.
    pub try_again_interval_ms: u64,
}

impl Default for RetrievalQueueConfig {
    fn default() -> Self {
        Self {
            queue_size: 16,
            max_trys: 3,
            min_check_interval_ms: 5_000,
            try_again_interval_ms: DEFAULT_TRY_AGAIN_INTERVAL_MS,
        }
    }
}

/// Deduplicated, bounded retrieval on a tokio runtime.
pub struct RetrievalQueue<R: Retriever> {
    retriever: Arc<R>,
    runtime: Handle,
    queue_size: usize,
    /// Generation of the outstanding request per key.
    in_flight: HashMap<TileKey, u64>,
    next_generation: u64,
    absent: AbsentResourceList<TileKey>,
    sender: UnboundedSender<RetrievalCompletion>,
    receiver: UnboundedReceiver<RetrievalCompletion>,
}

impl<R: Retriever> RetrievalQueue<R> {
    pub fn new(
        retriever: Arc<R>,
        runtime: Handle,
        config: RetrievalQueueConfig,
    ) -> Result<Self, ConfigurationError> {
        Self::with_clock(retriever, runtime, config, SystemClock::shared())
    }

    pub fn with_clock(
        retriever: Arc<R>,
        runtime: Handle,
        config: RetrievalQueueConfig,
        clock: SharedClock,
    ) -> Result<Self, ConfigurationError> {
        if config.queue_size == 0 {
            return Err(ConfigurationError::InvalidQueueSize);
        }
        let mut absent =
            AbsentResourceList::with_clock(config.max_trys, config.min_check_interval_ms, clock);
        absent.set_try_again_interval(config.try_again_interval_ms);
        let (sender, receiver) = mpsc::unbounded_channel();

        Ok(Self {
            retriever,
            runtime,
            queue_size: config.queue_size,
            in_flight: HashMap::new(),
            next_generation: 0,
            absent,
            sender,
            receiver,
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, key: &TileKey) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn is_absent(&mut self, key: &TileKey) -> bool {
        self.absent.is_resource_absent(key)
    }

    /// Starts retrieving `request` unless it is in flight, absent or the
    /// queue is full. On success the completion task requests a redraw
    /// through `redraw`; pass `None` to suppress it.
    pub fn submit(&mut self, request: RetrievalRequest, redraw: Option<&RedrawHandle>) -> SubmitOutcome {
        let key = request.tile_key;
        if self.in_flight.contains_key(&key) {
            return SubmitOutcome::AlreadyInFlight;
        }
        if self.in_flight.len() >= self.queue_size {
            debug!(tile = %key, in_flight = self.in_flight.len(), "Retrieval queue full");
            return SubmitOutcome::QueueFull;
        }
        if self.absent.is_resource_absent(&key) {
            return SubmitOutcome::Absent;
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        self.in_flight.insert(key, generation);
        let retriever = self.retriever.clone();
        let sender = self.sender.clone();
        let redraw = redraw.cloned();

        self.runtime.spawn(async move {
            let url = request.url.clone();
            let result = match retriever.retrieve(request.clone()).await {
                Ok(data) if !request.accepts(data.content_type.as_deref()) => {
                    Err(RetrievalError::UnexpectedContentType {
                        content_type: data.content_type.unwrap_or_else(|| "<none>".to_string()),
                        url: url.clone(),
                    })
                }
                other => other,
            };
            if result.is_ok() {
                if let Some(redraw) = redraw {
                    redraw.request();
                }
            }
            // The receiver is gone only when the owner was dropped.
            let _ = sender.send(RetrievalCompletion {
                tile_key: key,
                url,
                result,
                generation,
            });
        });

        SubmitOutcome::Submitted
    }

    /// Collects finished retrievals. Failures are recorded in the absent
    /// list and logged; successes are returned for the owner to decode.
    pub fn drain(&mut self) -> Vec<(TileKey, RetrievedData)> {
        let mut succeeded = Vec::new();
        while let Ok(completion) = self.receiver.try_recv() {
            let key = completion.tile_key;
            if self.in_flight.get(&key) != Some(&completion.generation) {
                debug!(tile = %key, generation = completion.generation, "Discarding stale completion");
                continue;
            }
            self.in_flight.remove(&key);

            match completion.result {
                Ok(data) => {
                    info!(tile = %key, url = %completion.url, bytes = data.bytes.len(), "Retrieval succeeded");
                    self.absent.unmark_resource_absent(&key);
                    succeeded.push((key, data));
                }
                Err(e) => self.mark_absent(key, &e),
            }
        }
        succeeded
    }

    /// Records a failure detected after retrieval, such as a payload that
    /// would not decode.
    pub fn mark_absent(&mut self, key: TileKey, error: &RetrievalError) {
        warn!(tile = %key, error = %error, "Retrieval failed");
        self.absent.mark_resource_absent(key);
    }

    /// Forgets every in-flight request. The spawned tasks keep running, but
    /// their completions are discarded even if the key is resubmitted before
    /// they land.
    pub fn clear_in_flight(&mut self) {
        self.in_flight.clear();
    }
}

/// In-memory transport for tests.
#[cfg(test)]
pub(crate) mod mock {
    use std::collections::HashMap;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MockRetriever {
        responses: Mutex<HashMap<String, Result<RetrievedData, RetrievalError>>>,
        prefixes: Mutex<Vec<(String, Result<RetrievedData, RetrievalError>)>>,
        requested: Mutex<Vec<String>>,
    }

    impl MockRetriever {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn respond(&self, url: &str, result: Result<RetrievedData, RetrievalError>) {
            self.responses.lock().insert(url.to_string(), result);
        }

        pub fn respond_bytes(&self, url: &str, content_type: &str, bytes: Vec<u8>) {
            self.respond(
                url,
                Ok(RetrievedData {
                    content_type: Some(content_type.to_string()),
                    bytes: Bytes::from(bytes),
                }),
            );
        }

        /// Answers every URL starting with `prefix` that has no exact response.
        pub fn respond_prefix(&self, prefix: &str, content_type: &str, bytes: Vec<u8>) {
            let data = RetrievedData {
                content_type: Some(content_type.to_string()),
                bytes: Bytes::from(bytes),
            };
            self.prefixes.lock().push((prefix.to_string(), Ok(data)));
        }

        pub fn requested(&self) -> Vec<String> {
            self.requested.lock().clone()
        }
    }

    impl Retriever for MockRetriever {
        fn retrieve(
            &self,
            request: RetrievalRequest,
        ) -> impl Future<Output = Result<RetrievedData, RetrievalError>> + Send {
            self.requested.lock().push(request.url.clone());
            let exact = self.responses.lock().get(&request.url).cloned();
            let result = exact
                .or_else(|| {
                    self.prefixes
                        .lock()
                        .iter()
                        .find(|(prefix, _)| request.url.starts_with(prefix.as_str()))
                        .map(|(_, result)| result.clone())
                })
                .unwrap_or_else(|| {
                    Err(RetrievalError::Http {
                        status: 404,
                        url: request.url.clone(),
                    })
                });
            async move { result }
        }
    }
}
