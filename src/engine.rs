//! Per-tick orchestration
//!
//! `GraphCore` owns every component and runs the render-tick path
//! (cull, LOD, slots, frame writes) synchronously. Streaming runs at its own
//! cadence through [`GraphCore::update_streaming`]; the tick only adopts the
//! loader's latest published snapshot and never waits on it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::config::CoreConfig;
use crate::core::types::{Result, Vec3};
use crate::core::{Camera, FpsStats};
use crate::graph::{GraphPayload, GraphSnapshot, IngestReport, Ingestor, NodeId};
use crate::lod::{LodManager, LodUpdate};
use crate::perf::{HealthReport, Optimization, PerfEvent, PerfSignals, PerformanceMonitor};
use crate::render::{
    CullingStats, FrameInputs, FramePacket, FrustumCuller, InstanceData, InstancePools, PoolStats,
    ResourceRegistry, build_frame,
};
use crate::streaming::{GraphSource, LoaderUpdate, LoadingStats, ProgressiveLoader};

/// LOD section of the observability snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LodSnapshot {
    pub scale: f32,
    /// Tracked nodes per level
    pub distribution: Vec<usize>,
    pub last_update: LodUpdate,
}

/// Slot section of the observability snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SlotSnapshot {
    pub pools: Vec<PoolStats>,
    pub acquired: usize,
    pub released: usize,
    pub unchanged: usize,
    pub unrenderable: usize,
}

/// Serializable view of the whole core, for telemetry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoreSnapshot {
    pub frame: u64,
    pub generation: u64,
    pub nodes: usize,
    pub edges: usize,
    pub culling: CullingStats,
    pub culling_margin: f32,
    pub lod: LodSnapshot,
    pub slots: SlotSnapshot,
    pub loading: Option<LoadingStats>,
    pub fps: FpsStats,
    pub health: Option<HealthReport>,
    pub memory_bytes: usize,
}

/// The visibility, LOD and streaming core
pub struct GraphCore {
    config: CoreConfig,
    culler: FrustumCuller,
    lod: LodManager,
    pools: InstancePools,
    registry: ResourceRegistry,
    loader: Option<ProgressiveLoader>,
    monitor: PerformanceMonitor,
    events: broadcast::Receiver<PerfEvent>,
    ingestor: Ingestor,
    graph: Arc<GraphSnapshot>,
    generation: u64,
    /// Loader generation the current graph was adopted from
    adopted: u64,
    /// Layout positions re-applied whenever a new loader snapshot is adopted
    layout: HashMap<NodeId, Vec3>,
    /// Positions the current octree was built from, for nodes moved since
    anchors: HashMap<NodeId, Vec3>,
    frame: u64,
    last_culling: CullingStats,
    last_lod: LodUpdate,
    last_slots: SlotSnapshot,
}

impl GraphCore {
    /// Core over a host-supplied graph, see [`GraphCore::set_graph`]
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;
        let monitor = PerformanceMonitor::new(config.perf.clone())?;
        let events = monitor.subscribe();
        let core = Self {
            culler: FrustumCuller::new(config.culling.clone())?,
            lod: LodManager::new(config.lod.clone())?,
            pools: InstancePools::new(&config.instances)?,
            registry: ResourceRegistry::new(),
            loader: None,
            monitor,
            events,
            ingestor: Ingestor::new(),
            graph: Arc::new(GraphSnapshot::empty()),
            generation: 0,
            adopted: 0,
            layout: HashMap::new(),
            anchors: HashMap::new(),
            frame: 0,
            last_culling: CullingStats::default(),
            last_lod: LodUpdate::default(),
            last_slots: SlotSnapshot::default(),
            config,
        };
        log::info!(
            "Graph core ready: {} lod levels, {} slots per kind by default",
            core.lod.level_count(),
            core.config.instances.default_capacity
        );
        Ok(core)
    }

    /// Core streaming its graph from `source` on `runtime`
    pub fn with_source<S: GraphSource>(config: CoreConfig, source: Arc<S>, runtime: &Handle) -> Result<Self> {
        let mut core = Self::new(config)?;
        core.loader = Some(ProgressiveLoader::new(core.config.streaming.clone(), source, runtime)?);
        Ok(core)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Replace the whole graph with a validated payload
    pub fn set_graph(&mut self, payload: GraphPayload) -> IngestReport {
        let ingested = self.ingestor.ingest(payload);
        self.generation += 1;
        self.graph = Arc::new(GraphSnapshot::new(ingested.nodes, ingested.edges, self.generation));
        self.layout.clear();
        self.anchors.clear();
        log::info!(
            "Graph replaced: {} nodes, {} edges ({} rejected)",
            self.graph.len(),
            self.graph.edges().len(),
            ingested.report.rejected_nodes
        );
        ingested.report
    }

    /// Run one render tick.
    ///
    /// # Arguments
    /// * `camera` - Current camera, `None` renders nothing
    /// * `dt` - Time since the previous tick
    /// * `now` - Tick timestamp
    pub fn tick(&mut self, camera: Option<&Camera>, dt: Duration, now: Instant) -> FramePacket {
        self.drain_events(now);
        self.adopt_loader_snapshot();

        let graph = Arc::clone(&self.graph);
        let cull = self.culler.cull(&graph, camera, now);

        let eye = camera.map(|c| c.position).unwrap_or(Vec3::ZERO);
        self.last_lod = self.lod.update(&graph, &cull.visible_nodes, eye, dt.as_secs_f32());

        let sync = self.pools.sync(&graph, &cull.visible_nodes);
        let packet = build_frame(FrameInputs {
            frame: self.frame,
            graph: &graph,
            visible_nodes: &cull.visible_nodes,
            visible_edges: &cull.visible_edges,
            lod: &self.lod,
            pools: &self.pools,
            sync: &sync,
            registry: &self.registry,
        });

        self.last_slots = SlotSnapshot {
            pools: self.pools.stats(),
            acquired: sync.acquired.len(),
            released: sync.released.len(),
            unchanged: sync.unchanged,
            unrenderable: packet.unrenderable,
        };
        self.last_culling = cull.stats;
        self.frame += 1;

        self.monitor.record_frame(dt, now);
        let signals = self.perf_signals();
        if let Some(report) = self.monitor.sample(now, signals) {
            log::trace!("Health sample: {:.0} ({})", report.score, report.grade);
        }

        packet
    }

    /// Lower-cadence loader step; no-op without a source
    pub fn update_streaming(&mut self, camera: &Camera, velocity: Option<Vec3>, now: Instant) -> Option<LoaderUpdate> {
        let loader = self.loader.as_mut()?;
        Some(loader.update(camera, velocity, now))
    }

    /// Apply layout output.
    ///
    /// Positions always take effect. The generation (and so the octree) only
    /// changes once some node drifted further than the rebuild threshold from
    /// where it was when the octree was last built, however many small steps
    /// that took.
    pub fn apply_layout(&mut self, positions: &[(NodeId, Vec3)]) -> bool {
        let mut drift: f32 = 0.0;
        for (id, position) in positions {
            if !position.is_finite() {
                continue;
            }
            let Some(current) = self.graph.node(id).map(|n| n.position) else {
                continue;
            };
            let anchor = *self.anchors.entry(id.clone()).or_insert(current);
            drift = drift.max(position.distance(anchor));
            self.layout.insert(id.clone(), *position);
        }

        let graph = Arc::make_mut(&mut self.graph);
        graph.set_positions(positions);
        let rebuild = drift > self.config.culling.rebuild_move_threshold;
        if rebuild {
            self.generation += 1;
            graph.set_generation(self.generation);
            self.anchors.clear();
            log::debug!("Layout drifted nodes by up to {:.2}, generation {}", drift, self.generation);
        }
        rebuild
    }

    /// Take the loader's newest snapshot, renumbered into this core's generation sequence
    fn adopt_loader_snapshot(&mut self) {
        let Some(loader) = &self.loader else {
            return;
        };
        if loader.generation() == self.adopted {
            return;
        }
        self.adopted = loader.generation();

        let mut graph = (*loader.snapshot()).clone();
        self.layout.retain(|id, _| graph.index_of(id).is_some());
        if !self.layout.is_empty() {
            let positions: Vec<(NodeId, Vec3)> = self.layout.iter().map(|(id, p)| (id.clone(), *p)).collect();
            graph.set_positions(&positions);
        }
        self.generation += 1;
        graph.set_generation(self.generation);
        self.anchors.clear();
        log::debug!("Adopted loader snapshot {} as generation {}", self.adopted, self.generation);
        self.graph = Arc::new(graph);
    }

    /// Dispatch pending perf events to the components that react to them
    fn drain_events(&mut self, now: Instant) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.handle_event(event, now),
                Err(TryRecvError::Lagged(skipped)) => {
                    log::warn!("Perf event receiver lagged, {} events skipped", skipped);
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    fn handle_event(&mut self, event: PerfEvent, now: Instant) {
        match event {
            PerfEvent::Optimization(Optimization::ReduceQuality { lod_scale }) => {
                self.lod.rescale(lod_scale, now);
            }
            PerfEvent::Optimization(Optimization::CleanupCache { target_fraction }) => {
                self.cleanup_cache(target_fraction);
            }
            PerfEvent::Optimization(Optimization::IncreaseCulling { step }) => {
                self.culler.increase_culling(step);
                self.culler.invalidate();
            }
            PerfEvent::Alert { kind, message } => {
                log::debug!("Alert {:?} observed: {}", kind, message);
            }
        }
    }

    /// Host override of the LOD distance scale
    pub fn set_lod_scale(&mut self, scale: f32) -> f32 {
        let applied = self.lod.set_scale(scale);
        log::info!("Lod scale set to {:.3}", applied);
        applied
    }

    /// Toggle adaptive optimizations; alerts keep flowing either way
    pub fn set_adaptive(&mut self, enabled: bool) {
        self.monitor.set_adaptive(enabled);
    }

    /// Evict cached chunks down to `target_fraction` of the budget
    pub fn cleanup_cache(&mut self, target_fraction: f32) -> usize {
        self.loader.as_mut().map_or(0, |l| l.cleanup(target_fraction))
    }

    fn perf_signals(&self) -> PerfSignals {
        let loading = self.loader.as_ref().map(|l| l.stats());
        PerfSignals {
            total_nodes: self.last_culling.total_nodes,
            visible_nodes: self.last_culling.visible_nodes,
            cull_ratio: self.last_culling.cull_ratio,
            memory_bytes: self.memory_bytes(),
            loaded_chunks: loading.as_ref().map_or(0, |s| s.loaded_chunks),
            pending_loads: loading.as_ref().map_or(0, |s| s.loading),
            loading_progress: loading.as_ref().map_or(1.0, |s| s.progress),
        }
    }

    /// Resident graph bytes plus the instance buffers the pools address
    pub fn memory_bytes(&self) -> usize {
        let graph_bytes = match &self.loader {
            Some(loader) => loader.cache_bytes(),
            None => {
                self.graph.nodes().iter().map(|n| n.estimated_bytes()).sum::<usize>()
                    + self.graph.edges().iter().map(|e| e.estimated_bytes()).sum::<usize>()
            }
        };
        let slots: usize = self.pools.stats().iter().map(|p| p.capacity as usize).sum();
        graph_bytes + slots * std::mem::size_of::<InstanceData>()
    }

    pub fn graph(&self) -> Arc<GraphSnapshot> {
        Arc::clone(&self.graph)
    }

    pub fn lod(&self) -> &LodManager {
        &self.lod
    }

    pub fn culler(&self) -> &FrustumCuller {
        &self.culler
    }

    pub fn pools(&self) -> &InstancePools {
        &self.pools
    }

    pub fn loader(&self) -> Option<&ProgressiveLoader> {
        self.loader.as_ref()
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    /// Backend resource handles; call `init` before registering
    pub fn resources_mut(&mut self) -> &mut ResourceRegistry {
        &mut self.registry
    }

    /// Initialise the resource registry for the configured LOD levels
    pub fn init_resources(&mut self) {
        self.registry.init(self.lod.level_count() as u8);
    }

    /// Release backend handles; frames keep flowing without resources
    pub fn dispose_resources(&mut self) {
        self.registry.dispose();
    }

    pub fn culling_stats(&self) -> CullingStats {
        self.last_culling
    }

    pub fn loading_stats(&self) -> Option<LoadingStats> {
        self.loader.as_ref().map(|l| l.stats())
    }

    pub fn health(&self) -> Option<HealthReport> {
        self.monitor.last_report().cloned()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn snapshot(&self) -> CoreSnapshot {
        CoreSnapshot {
            frame: self.frame,
            generation: self.graph.generation(),
            nodes: self.graph.len(),
            edges: self.graph.edges().len(),
            culling: self.last_culling,
            culling_margin: self.culler.margin(),
            lod: LodSnapshot {
                scale: self.lod.scale(),
                distribution: self.lod.distribution(),
                last_update: self.last_lod,
            },
            slots: self.last_slots.clone(),
            loading: self.loading_stats(),
            fps: self.monitor.fps_stats(),
            health: self.health(),
            memory_bytes: self.memory_bytes(),
        }
    }
}
