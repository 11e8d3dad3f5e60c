//! Async chunk request pipeline
//!
//! Requests go to a worker task over a channel; each fetch runs as its own
//! task and reports back over a second channel that the owner drains. Nothing
//! here touches loader state, so every mutation stays with the single owner
//! that polls the results.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::chunk::ChunkId;
use super::source::{ChunkQuery, GraphSource};
use crate::core::{Error, Result};
use crate::graph::GraphPayload;

/// Cooperative cancellation flag shared with a running fetch
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Request to load one chunk
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub query: ChunkQuery,
    /// Tier weight at dispatch time
    pub weight: u32,
    /// 1 for the first try
    pub attempt: u32,
    pub cancel: CancelHandle,
}

/// How a request ended
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(GraphPayload),
    Failed(String),
    /// Cancelled before the result was committed
    Cancelled,
}

/// Result of a chunk load operation
#[derive(Debug)]
pub struct LoadResult {
    pub chunk: ChunkId,
    pub attempt: u32,
    pub outcome: LoadOutcome,
    pub elapsed: Duration,
}

/// Concurrent chunk loader over a [`GraphSource`]
pub struct ChunkLoader {
    /// Channel for sending load requests to the worker
    request_tx: mpsc::UnboundedSender<LoadRequest>,
    /// Channel for receiving load results
    result_rx: mpsc::UnboundedReceiver<LoadResult>,
}

impl ChunkLoader {
    /// Start the worker on `runtime`
    pub fn new<S: GraphSource>(source: Arc<S>, runtime: &Handle) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel::<LoadRequest>();
        let (result_tx, result_rx) = mpsc::unbounded_channel::<LoadResult>();

        runtime.spawn(Self::worker_loop(source, request_rx, result_tx));
        log::info!("Chunk loader started");

        Self { request_tx, result_rx }
    }

    /// Start the worker on the runtime of the calling context
    pub fn with_current_runtime<S: GraphSource>(source: Arc<S>) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| Error::config(format!("chunk loader needs a tokio runtime: {e}")))?;
        Ok(Self::new(source, &handle))
    }

    /// Worker loop: spawn a task per request and forward finished results
    async fn worker_loop<S: GraphSource>(
        source: Arc<S>,
        mut request_rx: mpsc::UnboundedReceiver<LoadRequest>,
        result_tx: mpsc::UnboundedSender<LoadResult>,
    ) {
        let mut active_tasks: JoinSet<LoadResult> = JoinSet::new();

        loop {
            tokio::select! {
                Some(request) = request_rx.recv() => {
                    let source = Arc::clone(&source);
                    active_tasks.spawn(Self::load_chunk_task(source, request));
                }

                Some(joined) = active_tasks.join_next(), if !active_tasks.is_empty() => {
                    match joined {
                        Ok(result) => {
                            if result_tx.send(result).is_err() {
                                log::debug!("Chunk loader owner dropped, stopping worker");
                                break;
                            }
                        }
                        Err(e) => log::error!("Chunk loader task failed to join: {}", e),
                    }
                }

                // Request channel closed and nothing left in flight
                else => break,
            }
        }
    }

    /// Fetch one chunk. The fetch runs in its own task so a panicking source
    /// still produces a result for the chunk.
    async fn load_chunk_task<S: GraphSource>(source: Arc<S>, request: LoadRequest) -> LoadResult {
        let start = Instant::now();
        let LoadRequest { query, attempt, cancel, .. } = request;

        let fetch = tokio::spawn(async move { source.fetch(query).await });
        let outcome = match fetch.await {
            _ if cancel.is_cancelled() => LoadOutcome::Cancelled,
            Ok(Ok(payload)) => LoadOutcome::Loaded(payload),
            Ok(Err(e)) => LoadOutcome::Failed(e.to_string()),
            Err(e) => {
                log::error!("Source panicked while fetching chunk {}: {}", query.chunk, e);
                LoadOutcome::Failed(format!("source task failed: {e}"))
            }
        };

        LoadResult {
            chunk: query.chunk,
            attempt,
            outcome,
            elapsed: start.elapsed(),
        }
    }

    /// Queue a request
    pub fn submit(&self, request: LoadRequest) -> Result<()> {
        self.request_tx
            .send(request)
            .map_err(|e| Error::Channel(format!("chunk loader worker is gone, dropped {}", e.0.query.chunk)))
    }

    /// Drain finished results without waiting
    pub fn poll_results(&mut self) -> Vec<LoadResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.result_rx.try_recv() {
            results.push(result);
        }
        results
    }

    /// Wait for the next result
    pub async fn recv(&mut self) -> Option<LoadResult> {
        self.result_rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;
    use crate::graph::{Node, NodeKind};
    use tokio::sync::Notify;

    struct GatedSource {
        gate: Notify,
    }

    impl GraphSource for GatedSource {
        async fn fetch(&self, query: ChunkQuery) -> Result<GraphPayload> {
            self.gate.notified().await;
            if query.chunk.0.x < 0 {
                return Err(Error::Source { chunk: query.chunk.to_string(), message: "unavailable".into() });
            }
            Ok(GraphPayload {
                nodes: vec![Node::new(query.chunk.to_string(), NodeKind::Concept, query.center)],
                edges: Vec::new(),
            })
        }
    }

    fn request(x: i32) -> LoadRequest {
        LoadRequest {
            query: ChunkQuery { chunk: ChunkId::new(x, 0, 0), center: Vec3::ZERO, radius: 1.0, max_nodes: 10 },
            weight: 1000,
            attempt: 1,
            cancel: CancelHandle::new(),
        }
    }

    #[tokio::test]
    async fn test_load_fail_and_cancel() {
        let source = Arc::new(GatedSource { gate: Notify::new() });
        let mut loader = ChunkLoader::with_current_runtime(Arc::clone(&source)).unwrap();

        let cancelled = request(2);
        let handle = cancelled.cancel.clone();
        loader.submit(request(1)).unwrap();
        loader.submit(request(-1)).unwrap();
        loader.submit(cancelled).unwrap();
        handle.cancel();

        let mut outcomes = Vec::new();
        while outcomes.len() < 3 {
            source.gate.notify_waiters();
            tokio::task::yield_now().await;
            outcomes.extend(loader.poll_results());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        for result in outcomes {
            match result.chunk.0.x {
                1 => assert!(matches!(result.outcome, LoadOutcome::Loaded(ref p) if p.nodes.len() == 1)),
                -1 => assert!(matches!(result.outcome, LoadOutcome::Failed(_))),
                _ => assert!(matches!(result.outcome, LoadOutcome::Cancelled)),
            }
        }
    }

    #[test]
    fn test_requires_runtime() {
        let source = Arc::new(GatedSource { gate: Notify::new() });
        let err = ChunkLoader::with_current_runtime(source).err().unwrap();
        assert!(err.is_fatal());
    }
}
