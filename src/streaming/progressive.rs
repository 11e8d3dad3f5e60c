//! Progressive loader: keeps a prioritized, budgeted set of chunks around the camera
//!
//! All loader state is owned here and mutated only from [`ProgressiveLoader::update`],
//! which drains completions in arrival order before planning new requests.
//! The render tick never waits on this type; it reads the last published
//! [`GraphSnapshot`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::runtime::Handle;

use super::cache::ChunkCache;
use super::chunk::{ChunkId, LoadedChunk};
use super::chunk_loader::{CancelHandle, ChunkLoader, LoadOutcome, LoadRequest, LoadResult};
use super::config::StreamingConfig;
use super::prefetch::{PrefetchPredictor, predict_point};
use super::priority::{ChunkCandidate, ChunkPriorityQueue, PriorityTier};
use super::source::{ChunkQuery, GraphSource};
use crate::core::types::{Result, Vec3};
use crate::core::{Camera, Error};
use crate::graph::{Edge, GraphPayload, GraphSnapshot, IngestReport, Ingestor, Node, NodeId};
use crate::spatial::SpatialHash;

/// Smoothing factor of the bandwidth moving average
const BANDWIDTH_ALPHA: f64 = 0.3;

/// Streaming statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadingStats {
    pub loaded_chunks: usize,
    /// Requests in flight that still count against the concurrency cap
    pub loading: usize,
    /// Cancelled requests whose task has not reported back yet
    pub cancelling: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub evicted: u64,
    pub abandoned: usize,
    pub cache_bytes: usize,
    pub cache_budget_bytes: usize,
    /// Candidates already resident / all candidates that were resident or requested
    pub hit_rate: f32,
    pub average_load_ms: f32,
    pub bandwidth_bytes_per_sec: f64,
    /// Fraction of immediate, high and medium chunks resident
    pub progress: f32,
    pub nodes: usize,
    pub edges: usize,
    pub generation: u64,
    pub ingest: IngestReport,
}

/// What one update did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderUpdate {
    pub completed: usize,
    pub dispatched: usize,
    pub cancelled: usize,
    pub evicted: usize,
    /// Whether a new snapshot was published
    pub published: bool,
}

#[derive(Debug)]
struct InFlight {
    tier: PriorityTier,
    cancel: CancelHandle,
    dispatched_at: Instant,
}

#[derive(Debug, Clone, Copy)]
struct RetryState {
    attempts: u32,
    not_before: Instant,
}

#[derive(Debug, Default)]
struct Counters {
    completed: u64,
    failed: u64,
    cancelled: u64,
    evicted: u64,
    hits: u64,
    misses: u64,
    total_load_time: Duration,
}

/// Chunk streaming orchestrator
pub struct ProgressiveLoader {
    config: StreamingConfig,
    loader: ChunkLoader,
    cache: ChunkCache,
    /// Resident chunks by center, for the collection query
    chunks: SpatialHash<ChunkId>,
    /// Node id -> chunk that owns it
    owners: HashMap<NodeId, ChunkId>,
    in_flight: HashMap<ChunkId, InFlight>,
    retries: HashMap<ChunkId, RetryState>,
    abandoned: HashSet<ChunkId>,
    queue: ChunkPriorityQueue,
    predictor: PrefetchPredictor,
    ingestor: Ingestor,
    ingest_report: IngestReport,
    /// Moving average of bytes per second over completed loads
    bandwidth: Option<f64>,
    low_bandwidth_streak: u32,
    counters: Counters,
    progress: f32,
    snapshot: Arc<GraphSnapshot>,
    generation: u64,
    /// Chunks in the last published snapshot, sorted
    collected: Vec<ChunkId>,
    dirty: bool,
}

impl ProgressiveLoader {
    /// Create a loader fetching from `source` on `runtime`
    pub fn new<S: GraphSource>(config: StreamingConfig, source: Arc<S>, runtime: &Handle) -> Result<Self> {
        config.validate()?;
        log::info!(
            "Progressive loader: chunk size {}, view distance {}, budget {} KiB, {} concurrent",
            config.chunk_size,
            config.view_distance,
            config.cache_budget_bytes / 1024,
            config.max_concurrent
        );
        Ok(Self {
            loader: ChunkLoader::new(source, runtime),
            cache: ChunkCache::new(config.cache_budget_bytes),
            chunks: SpatialHash::new(config.chunk_size),
            owners: HashMap::new(),
            in_flight: HashMap::new(),
            retries: HashMap::new(),
            abandoned: HashSet::new(),
            queue: ChunkPriorityQueue::new(),
            predictor: PrefetchPredictor::new(),
            ingestor: Ingestor::new(),
            ingest_report: IngestReport::default(),
            bandwidth: None,
            low_bandwidth_streak: 0,
            counters: Counters::default(),
            progress: 0.0,
            snapshot: Arc::new(GraphSnapshot::empty()),
            generation: 0,
            collected: Vec::new(),
            dirty: false,
            config,
        })
    }

    /// Create a loader on the runtime of the calling context
    pub fn with_current_runtime<S: GraphSource>(config: StreamingConfig, source: Arc<S>) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| Error::config(format!("progressive loader needs a tokio runtime: {e}")))?;
        Self::new(config, source, &handle)
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// One loader step.
    ///
    /// # Arguments
    /// * `camera` - Current camera
    /// * `velocity` - Camera velocity if the host knows it, otherwise estimated from history
    /// * `now` - Current time
    pub fn update(&mut self, camera: &Camera, velocity: Option<Vec3>, now: Instant) -> LoaderUpdate {
        let mut report = LoaderUpdate::default();

        for result in self.loader.poll_results() {
            self.apply(result, now);
            report.completed += 1;
        }

        let expired = self.cache.evict_expired(now, self.config.entry_ttl);
        if !expired.is_empty() {
            log::debug!("{} chunks expired", expired.len());
        }
        report.evicted += self.forget(expired);

        let position = camera.position;
        if !position.is_finite() {
            log::warn!("Skipping loader update for non-finite camera position {:?}", position);
            return report;
        }

        self.predictor.record(position, now);
        let predicted = if self.config.prediction_enabled {
            let velocity = velocity.unwrap_or_else(|| self.predictor.velocity());
            predict_point(position, velocity, self.config.min_prediction_speed, self.config.prediction_lookahead)
        } else {
            None
        };

        let frustum = camera.is_valid().then(|| camera.frustum());
        self.queue.update(position, frustum.as_ref(), predicted, &self.config);
        let candidates = self.queue.drain_sorted();

        let essential: Vec<&ChunkCandidate> = candidates.iter().filter(|c| c.tier.is_essential()).collect();
        self.progress = if essential.is_empty() {
            1.0
        } else {
            essential.iter().filter(|c| self.cache.contains(c.id)).count() as f32 / essential.len() as f32
        };

        report.dispatched = self.dispatch(&candidates, now);
        report.cancelled = self.check_bandwidth();
        report.published = self.refresh_snapshot(position);
        report
    }

    /// Request missing candidates in priority order until the concurrency cap is hit
    fn dispatch(&mut self, candidates: &[ChunkCandidate], now: Instant) -> usize {
        let mut active = self.active_count();
        let mut saturated = active >= self.config.max_concurrent;
        let mut dispatched = 0;

        for candidate in candidates {
            if self.cache.touch(candidate.id, now) {
                self.counters.hits += 1;
                continue;
            }
            if saturated || self.in_flight.contains_key(&candidate.id) || self.abandoned.contains(&candidate.id) {
                continue;
            }
            if self.retries.get(&candidate.id).is_some_and(|r| now < r.not_before) {
                continue;
            }

            if !self.request(candidate, now) {
                break;
            }
            self.counters.misses += 1;
            dispatched += 1;
            active += 1;
            saturated = active >= self.config.max_concurrent;
        }
        dispatched
    }

    fn request(&mut self, candidate: &ChunkCandidate, now: Instant) -> bool {
        let id = candidate.id;
        let attempt = self.retries.get(&id).map_or(1, |r| r.attempts + 1);
        let cancel = CancelHandle::new();
        let request = LoadRequest {
            query: ChunkQuery {
                chunk: id,
                center: id.center(self.config.chunk_size),
                radius: ChunkId::radius(self.config.chunk_size),
                max_nodes: self.config.max_nodes_per_chunk,
            },
            weight: candidate.weight(),
            attempt,
            cancel: cancel.clone(),
        };

        match self.loader.submit(request) {
            Ok(()) => {
                log::debug!(
                    "Requested chunk {} ({:?}, {:.0} away, attempt {})",
                    id,
                    candidate.tier,
                    candidate.distance,
                    attempt
                );
                self.in_flight.insert(id, InFlight { tier: candidate.tier, cancel, dispatched_at: now });
                true
            }
            Err(e) => {
                log::error!("{}", e);
                false
            }
        }
    }

    /// Apply one completion
    fn apply(&mut self, result: LoadResult, now: Instant) {
        let Some(flight) = self.in_flight.remove(&result.chunk) else {
            log::debug!("Dropping result for untracked chunk {}", result.chunk);
            return;
        };

        match result.outcome {
            _ if flight.cancel.is_cancelled() => {
                self.counters.cancelled += 1;
                log::debug!("Chunk {} cancelled after {:?}", result.chunk, now.saturating_duration_since(flight.dispatched_at));
            }
            LoadOutcome::Cancelled => self.counters.cancelled += 1,
            LoadOutcome::Failed(message) => self.record_failure(result.chunk, result.attempt, &message, now),
            LoadOutcome::Loaded(payload) => self.commit(result.chunk, payload, result.elapsed, now),
        }
    }

    fn record_failure(&mut self, chunk: ChunkId, attempt: u32, message: &str, now: Instant) {
        self.counters.failed += 1;
        let retry = self.config.retry;
        if attempt >= retry.max_attempts {
            log::warn!("Abandoning chunk {} after {} attempts: {}", chunk, attempt, message);
            self.retries.remove(&chunk);
            self.abandoned.insert(chunk);
        } else {
            let backoff = retry.backoff(attempt);
            log::warn!("Chunk {} failed (attempt {}): {}, retrying in {:?}", chunk, attempt, message, backoff);
            self.retries.insert(chunk, RetryState { attempts: attempt, not_before: now + backoff });
        }
    }

    /// Register a loaded chunk, keeping node ownership exclusive
    fn commit(&mut self, chunk: ChunkId, payload: GraphPayload, elapsed: Duration, now: Instant) {
        if let Some(previous) = self.cache.remove(chunk) {
            self.forget(vec![previous]);
        }

        let ingested = self.ingestor.ingest_fragment(payload);
        self.ingest_report.merge(&ingested.report);

        let size = self.config.chunk_size;
        let offered = ingested.nodes.len();
        let nodes: Vec<Node> = ingested
            .nodes
            .into_iter()
            .filter(|node| chunk.owns(node.position, size) && self.owners.get(&node.id).is_none_or(|o| *o == chunk))
            .collect();
        for node in &nodes {
            self.owners.insert(node.id.clone(), chunk);
        }
        // An edge travels with the chunk owning one of its ends; the snapshot
        // drops it while the other end is not loaded
        let edges: Vec<Edge> = ingested
            .edges
            .into_iter()
            .filter(|edge| {
                self.owners.get(&edge.source) == Some(&chunk) || self.owners.get(&edge.target) == Some(&chunk)
            })
            .collect();

        let loaded = LoadedChunk::new(chunk, size, nodes, edges, elapsed, now);
        log::debug!(
            "Loaded chunk {}: {} of {} nodes owned, {} edges, {} bytes in {:?}",
            chunk,
            loaded.nodes.len(),
            offered,
            loaded.edges.len(),
            loaded.size_bytes,
            elapsed
        );

        let secs = elapsed.as_secs_f64().max(1e-3);
        let sample = loaded.size_bytes as f64 / secs;
        self.bandwidth = Some(match self.bandwidth {
            Some(previous) => previous + BANDWIDTH_ALPHA * (sample - previous),
            None => sample,
        });

        self.counters.completed += 1;
        self.counters.total_load_time += elapsed;
        self.retries.remove(&chunk);
        self.chunks.insert(chunk, loaded.center);

        let evicted = self.cache.insert(loaded);
        self.forget(evicted);
        self.dirty = true;
    }

    /// Drop bookkeeping for chunks that left the cache
    fn forget(&mut self, evicted: Vec<LoadedChunk>) -> usize {
        let count = evicted.len();
        for chunk in evicted {
            self.chunks.remove(&chunk.id);
            for node in &chunk.nodes {
                if self.owners.get(&node.id) == Some(&chunk.id) {
                    self.owners.remove(&node.id);
                }
            }
            log::debug!("Evicted chunk {} ({} bytes)", chunk.id, chunk.size_bytes);
            self.counters.evicted += 1;
            self.dirty = true;
        }
        count
    }

    /// Cancel expendable requests once bandwidth has stayed low long enough
    fn check_bandwidth(&mut self) -> usize {
        let low = self.bandwidth.is_some_and(|bw| bw < self.config.low_bandwidth_threshold);
        if !low {
            self.low_bandwidth_streak = 0;
            return 0;
        }
        self.low_bandwidth_streak += 1;
        if self.low_bandwidth_streak < self.config.low_bandwidth_updates {
            return 0;
        }

        let mut cancelled = 0;
        for (id, flight) in &self.in_flight {
            if flight.tier.is_expendable() && !flight.cancel.is_cancelled() {
                flight.cancel.cancel();
                log::debug!("Cancelled low priority chunk {}", id);
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            log::info!(
                "Bandwidth {:.0} B/s below threshold, cancelled {} low priority loads",
                self.bandwidth.unwrap_or_default(),
                cancelled
            );
        }
        cancelled
    }

    /// Cancel a request. The id stays reserved until its task reports back.
    pub fn cancel(&mut self, chunk: ChunkId) -> bool {
        match self.in_flight.get(&chunk) {
            Some(flight) if !flight.cancel.is_cancelled() => {
                flight.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Rebuild the published snapshot if the resident set near the camera changed
    fn refresh_snapshot(&mut self, position: Vec3) -> bool {
        let mut ids = self.chunks.query_radius(position, self.config.view_distance);
        ids.sort();
        if !self.dirty && ids == self.collected {
            return false;
        }

        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut nodes = Vec::new();
        let mut edge_ids: HashSet<&str> = HashSet::new();
        let mut edges = Vec::new();
        for id in &ids {
            let Some(chunk) = self.cache.peek(*id) else {
                continue;
            };
            for node in &chunk.nodes {
                if seen.insert(node.id.clone()) {
                    nodes.push(node.clone());
                }
            }
            for edge in &chunk.edges {
                if edge_ids.insert(edge.id.as_str()) {
                    edges.push(edge.clone());
                }
            }
        }

        self.generation += 1;
        let snapshot = GraphSnapshot::new(nodes, edges, self.generation);
        log::debug!(
            "Published snapshot {}: {} chunks, {} nodes, {} edges",
            self.generation,
            ids.len(),
            snapshot.len(),
            snapshot.edges().len()
        );
        self.snapshot = Arc::new(snapshot);
        self.collected = ids;
        self.dirty = false;
        true
    }

    /// Evict least recently used chunks until the cache holds at most
    /// `budget × target_fraction` bytes
    pub fn cleanup(&mut self, target_fraction: f32) -> usize {
        let fraction = if target_fraction.is_finite() { target_fraction.clamp(0.0, 1.0) } else { 1.0 };
        let target = (self.config.cache_budget_bytes as f64 * fraction as f64) as usize;
        let evicted = self.cache.evict_to(target);
        let count = self.forget(evicted);
        if count > 0 {
            log::info!("Cache cleanup to {:.0}%: evicted {} chunks", fraction * 100.0, count);
        }
        count
    }

    /// Last published node/edge set
    pub fn snapshot(&self) -> Arc<GraphSnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn is_loaded(&self, chunk: ChunkId) -> bool {
        self.cache.contains(chunk)
    }

    /// Resident chunk, without touching its LRU position
    pub fn chunk(&self, chunk: ChunkId) -> Option<&LoadedChunk> {
        self.cache.peek(chunk)
    }

    pub fn is_in_flight(&self, chunk: ChunkId) -> bool {
        self.in_flight.contains_key(&chunk)
    }

    /// Chunk owning a node, if resident
    pub fn owner_of(&self, node: &NodeId) -> Option<ChunkId> {
        self.owners.get(node).copied()
    }

    /// In-flight requests that still count against the cap
    pub fn active_count(&self) -> usize {
        self.in_flight.values().filter(|f| !f.cancel.is_cancelled()).count()
    }

    pub fn cache_bytes(&self) -> usize {
        self.cache.size_bytes()
    }

    pub fn stats(&self) -> LoadingStats {
        let active = self.active_count();
        let lookups = self.counters.hits + self.counters.misses;
        LoadingStats {
            loaded_chunks: self.cache.len(),
            loading: active,
            cancelling: self.in_flight.len() - active,
            completed: self.counters.completed,
            failed: self.counters.failed,
            cancelled: self.counters.cancelled,
            evicted: self.counters.evicted,
            abandoned: self.abandoned.len(),
            cache_bytes: self.cache.size_bytes(),
            cache_budget_bytes: self.config.cache_budget_bytes,
            hit_rate: if lookups == 0 { 0.0 } else { self.counters.hits as f32 / lookups as f32 },
            average_load_ms: if self.counters.completed == 0 {
                0.0
            } else {
                self.counters.total_load_time.as_secs_f32() * 1000.0 / self.counters.completed as f32
            },
            bandwidth_bytes_per_sec: self.bandwidth.unwrap_or_default(),
            progress: self.progress,
            nodes: self.snapshot.len(),
            edges: self.snapshot.edges().len(),
            generation: self.generation,
            ingest: self.ingest_report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;
    use crate::streaming::source::MemorySource;
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    /// Source that blocks every fetch on a permit and records what was asked
    struct GatedSource {
        permits: Semaphore,
        calls: Mutex<Vec<ChunkId>>,
        fail: bool,
    }

    impl GatedSource {
        fn new(permits: usize, fail: bool) -> Arc<Self> {
            Arc::new(Self { permits: Semaphore::new(permits), calls: Mutex::new(Vec::new()), fail })
        }

        fn calls(&self) -> Vec<ChunkId> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl GraphSource for GatedSource {
        async fn fetch(&self, query: ChunkQuery) -> Result<GraphPayload> {
            self.calls.lock().unwrap().push(query.chunk);
            let permit = self.permits.acquire().await.map_err(|e| Error::Channel(e.to_string()))?;
            permit.forget();
            if self.fail {
                return Err(Error::Source { chunk: query.chunk.to_string(), message: "offline".into() });
            }
            Ok(GraphPayload {
                nodes: vec![Node::new(format!("n{}", query.chunk), NodeKind::Concept, query.center)],
                edges: Vec::new(),
            })
        }
    }

    /// The camera cell plus its six face neighbours, all immediate
    fn seven_chunk_config() -> StreamingConfig {
        StreamingConfig {
            immediate_radius: 101.0,
            high_radius: 101.0,
            medium_radius: 101.0,
            view_distance: 101.0,
            max_concurrent: 2,
            prediction_enabled: false,
            ..Default::default()
        }
    }

    /// Just the camera cell
    fn single_chunk_config() -> StreamingConfig {
        StreamingConfig {
            immediate_radius: 50.0,
            high_radius: 50.0,
            medium_radius: 50.0,
            view_distance: 50.0,
            prediction_enabled: false,
            ..Default::default()
        }
    }

    fn camera() -> Camera {
        Camera::look_at(Vec3::splat(50.0), Vec3::new(500.0, 50.0, 50.0), Vec3::Y)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_concurrency_cap_without_duplicates() {
        let source = GatedSource::new(0, false);
        let mut loader = ProgressiveLoader::with_current_runtime(seven_chunk_config(), Arc::clone(&source)).unwrap();
        let camera = camera();

        let first = loader.update(&camera, None, Instant::now());
        assert_eq!(first.dispatched, 2);
        settle().await;
        // Nothing completed, the cap holds
        assert_eq!(loader.update(&camera, None, Instant::now()).dispatched, 0);
        assert_eq!(source.calls().len(), 2);

        for _ in 0..50 {
            source.permits.add_permits(1);
            settle().await;
            loader.update(&camera, None, Instant::now());
            assert!(loader.active_count() <= 2);
            if loader.stats().loaded_chunks == 7 {
                break;
            }
        }

        let calls = source.calls();
        let unique: HashSet<ChunkId> = calls.iter().copied().collect();
        assert_eq!(calls.len(), 7);
        assert_eq!(unique.len(), 7);
        assert_eq!(loader.stats().loaded_chunks, 7);
        assert_eq!(loader.progress(), 1.0);
        // The last completion is published on the update that applied it
        assert_eq!(loader.snapshot().len(), 7);
    }

    #[tokio::test]
    async fn test_retry_backoff_then_abandon() {
        let source = GatedSource::new(100, true);
        let config = StreamingConfig {
            retry: crate::streaming::config::RetryPolicy { max_attempts: 2, base_backoff: Duration::from_secs(10) },
            ..single_chunk_config()
        };
        let mut loader = ProgressiveLoader::with_current_runtime(config, Arc::clone(&source)).unwrap();
        let camera = camera();
        let start = Instant::now();

        assert_eq!(loader.update(&camera, None, start).dispatched, 1);
        settle().await;
        // Failure applied, backing off
        let update = loader.update(&camera, None, start + Duration::from_secs(1));
        assert_eq!(update.completed, 1);
        assert_eq!(update.dispatched, 0);
        assert_eq!(loader.stats().failed, 1);

        assert_eq!(loader.update(&camera, None, start + Duration::from_secs(11)).dispatched, 1);
        settle().await;
        loader.update(&camera, None, start + Duration::from_secs(12));
        assert_eq!(loader.stats().abandoned, 1);
        assert_eq!(loader.update(&camera, None, start + Duration::from_secs(100)).dispatched, 0);
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_exclusive_ownership_and_cross_chunk_edges() {
        let payload = GraphPayload {
            nodes: vec![
                Node::new("a", NodeKind::Document, Vec3::new(90.0, 50.0, 50.0)),
                Node::new("b", NodeKind::Tag, Vec3::new(110.0, 50.0, 50.0)),
                Node::new("bad", NodeKind::Tag, Vec3::new(f32::NAN, 50.0, 50.0)),
            ],
            edges: vec![Edge::new("ab", "a", "b")],
        };
        let config = StreamingConfig { max_concurrent: 8, ..seven_chunk_config() };
        let mut loader = ProgressiveLoader::with_current_runtime(config, Arc::new(MemorySource::new(payload))).unwrap();
        let camera = camera();

        for _ in 0..20 {
            loader.update(&camera, None, Instant::now());
            if loader.progress() == 1.0 && loader.stats().loading == 0 {
                break;
            }
            settle().await;
        }
        loader.update(&camera, None, Instant::now());

        let snapshot = loader.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.edges().len(), 1);
        assert_eq!(loader.owner_of(&NodeId::from("a")), Some(ChunkId::new(0, 0, 0)));
        assert_eq!(loader.owner_of(&NodeId::from("b")), Some(ChunkId::new(1, 0, 0)));
        let chunk_nodes: usize = loader.cache.iter().map(|c| c.nodes.len()).sum();
        assert_eq!(chunk_nodes, 2);
    }

    #[tokio::test]
    async fn test_edges_between_distant_chunks() {
        let payload = GraphPayload {
            nodes: vec![
                Node::new("a", NodeKind::Document, Vec3::new(50.0, 50.0, 50.0)),
                Node::new("b", NodeKind::Concept, Vec3::new(350.0, 50.0, 50.0)),
                Node::new("c", NodeKind::Tag, Vec3::new(50.0, 250.0, 50.0)),
                Node::new("far", NodeKind::Tag, Vec3::new(1500.0, 50.0, 50.0)),
            ],
            edges: vec![Edge::new("ab", "a", "b"), Edge::new("bc", "b", "c"), Edge::new("a-far", "a", "far")],
        };
        let config = StreamingConfig {
            immediate_radius: 320.0,
            high_radius: 320.0,
            medium_radius: 320.0,
            view_distance: 320.0,
            max_concurrent: 8,
            prediction_enabled: false,
            ..Default::default()
        };
        let mut loader = ProgressiveLoader::with_current_runtime(config, Arc::new(MemorySource::new(payload))).unwrap();
        let camera = camera();

        for _ in 0..200 {
            loader.update(&camera, None, Instant::now());
            if loader.progress() == 1.0 && loader.stats().loading == 0 {
                break;
            }
            settle().await;
        }
        loader.update(&camera, None, Instant::now());

        let snapshot = loader.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(loader.owner_of(&NodeId::from("b")), Some(ChunkId::new(3, 0, 0)));

        // Exactly the edges whose two ends are loaded
        let mut edges: Vec<&str> = snapshot.edges().iter().map(|e| e.id.as_str()).collect();
        edges.sort();
        assert_eq!(edges, vec!["ab", "bc"]);
        for edge in snapshot.edges() {
            assert!(snapshot.index_of(&edge.source).is_some() && snapshot.index_of(&edge.target).is_some());
        }
    }

    #[tokio::test]
    async fn test_cleanup_evicts_and_unpublishes() {
        let source = GatedSource::new(100, false);
        let mut loader = ProgressiveLoader::with_current_runtime(single_chunk_config(), source).unwrap();
        let camera = camera();

        loader.update(&camera, None, Instant::now());
        settle().await;
        assert!(loader.update(&camera, None, Instant::now()).published);
        assert_eq!(loader.snapshot().len(), 1);
        let generation = loader.generation();

        assert_eq!(loader.cleanup(0.0), 1);
        assert_eq!(loader.cache_bytes(), 0);
        assert!(loader.owners.is_empty());

        // The next update publishes the empty set before reloading
        let update = loader.update(&camera, None, Instant::now());
        assert!(update.published);
        assert!(loader.generation() > generation);
        assert!(loader.snapshot().is_empty());
        assert_eq!(update.dispatched, 1);
    }

    #[tokio::test]
    async fn test_ttl_eviction_of_unvisited_chunks() {
        let source = GatedSource::new(100, false);
        let config = StreamingConfig { entry_ttl: Duration::from_secs(5), ..single_chunk_config() };
        let mut loader = ProgressiveLoader::with_current_runtime(config, source).unwrap();
        let start = Instant::now();

        loader.update(&camera(), None, start);
        settle().await;
        loader.update(&camera(), None, start);
        assert!(loader.is_loaded(ChunkId::new(0, 0, 0)));

        // Camera leaves, the chunk is no longer touched
        let away = Camera::look_at(Vec3::new(5050.0, 50.0, 50.0), Vec3::new(6000.0, 50.0, 50.0), Vec3::Y);
        loader.update(&away, None, start + Duration::from_secs(1));
        let update = loader.update(&away, None, start + Duration::from_secs(10));
        assert_eq!(update.evicted, 1);
        assert!(!loader.is_loaded(ChunkId::new(0, 0, 0)));
        assert_eq!(loader.stats().evicted, 1);
    }

    #[tokio::test]
    async fn test_low_bandwidth_cancels_expendable_requests() {
        let source = GatedSource::new(0, false);
        let mut loader = ProgressiveLoader::with_current_runtime(single_chunk_config(), source).unwrap();
        let now = Instant::now();
        for (x, tier) in [(1, PriorityTier::Low), (2, PriorityTier::High)] {
            loader.in_flight.insert(
                ChunkId::new(x, 0, 0),
                InFlight { tier, cancel: CancelHandle::new(), dispatched_at: now },
            );
        }
        loader.bandwidth = Some(1.0);

        assert_eq!(loader.check_bandwidth(), 0);
        assert_eq!(loader.check_bandwidth(), 0);
        assert_eq!(loader.check_bandwidth(), 1);
        assert_eq!(loader.active_count(), 1);
        assert!(loader.is_in_flight(ChunkId::new(1, 0, 0)), "cancelled id stays reserved");
        assert!(!loader.cancel(ChunkId::new(1, 0, 0)));

        loader.bandwidth = Some(1e9);
        assert_eq!(loader.check_bandwidth(), 0);
        assert_eq!(loader.low_bandwidth_streak, 0);
    }

    #[test]
    fn test_requires_runtime() {
        let result = ProgressiveLoader::with_current_runtime(StreamingConfig::default(), GatedSource::new(0, false));
        assert!(result.is_err());
    }
}
