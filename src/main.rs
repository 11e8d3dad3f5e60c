//! Vistagraph - headless demo
//!
//! Streams a synthetic graph around a camera flying a closed loop and logs
//! what the core would hand to a renderer. Pass `--debug` (or
//! `--debug-port <port>`) to inspect it live through the debug server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use vistagraph::core::types::{Result, Vec3};
use vistagraph::core::{Camera, logging};
use vistagraph::graph::{Color, Edge, GraphPayload, Node, NodeKind};
use vistagraph::streaming::{ChunkId, ChunkQuery, GraphSource};
use vistagraph::{CoreConfig, GraphCore};

/// Deterministic graph filling every cell of an unbounded grid
struct SyntheticSource {
    seed: u64,
    chunk_size: f32,
    nodes_per_chunk: usize,
    latency: Duration,
}

/// Small stateless hash, stable across runs
fn mix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

fn unit(x: u64) -> f32 {
    (x >> 40) as f32 / (1u64 << 24) as f32
}

impl SyntheticSource {
    fn cell_seed(&self, chunk: ChunkId) -> u64 {
        let c = chunk.0;
        mix(self.seed ^ mix((c.x as u64) ^ mix((c.y as u64) ^ mix(c.z as u64))))
    }

    fn node_id(chunk: ChunkId, i: usize) -> String {
        format!("n{}_{}", chunk, i)
    }

    fn cell(&self, chunk: ChunkId) -> GraphPayload {
        let bounds = chunk.bounds(self.chunk_size);
        let seed = self.cell_seed(chunk);
        let count = 1 + (mix(seed) % self.nodes_per_chunk as u64) as usize;

        let nodes = (0..count)
            .map(|i| {
                let r = mix(seed ^ i as u64);
                let offset = Vec3::new(unit(r), unit(mix(r)), unit(mix(mix(r))));
                let kind = NodeKind::ALL[(r % NodeKind::ALL.len() as u64) as usize];
                Node::new(Self::node_id(chunk, i), kind, bounds.min + offset * self.chunk_size)
                    .with_radius(0.5 + unit(mix(r ^ 7)) * 2.0)
                    .with_color(Color::rgb(unit(r ^ 1), unit(r ^ 2), unit(r ^ 3)))
            })
            .collect();

        // Chain inside the cell, plus one link into the +x neighbour
        let mut edges: Vec<Edge> = (1..count)
            .map(|i| Edge::new(format!("e{}_{}", chunk, i), Self::node_id(chunk, i - 1), Self::node_id(chunk, i)))
            .collect();
        let neighbour = ChunkId(chunk.0 + vistagraph::core::types::IVec3::X);
        edges.push(Edge::new(
            format!("x{}", chunk),
            Self::node_id(chunk, 0),
            Self::node_id(neighbour, 0),
        ));

        GraphPayload { nodes, edges }
    }
}

impl GraphSource for SyntheticSource {
    async fn fetch(&self, query: ChunkQuery) -> Result<GraphPayload> {
        tokio::time::sleep(self.latency).await;
        let mut payload = self.cell(query.chunk);
        payload.nodes.truncate(query.max_nodes);
        Ok(payload)
    }
}

/// Camera on a slow loop around the origin
fn camera_at(t: f32) -> Camera {
    let position = Vec3::new(t.cos() * 400.0, 60.0 + (t * 0.5).sin() * 40.0, t.sin() * 400.0);
    let ahead = Vec3::new((t + 0.3).cos() * 400.0, 50.0, (t + 0.3).sin() * 400.0);
    Camera::look_at(position, ahead, Vec3::Y)
}

#[tokio::main]
async fn main() {
    logging::init();
    log::info!("Vistagraph demo starting...");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let seconds = parse_value::<u64>(&args, "--seconds").unwrap_or(20);
    let debug_port = parse_value::<u16>(&args, "--debug-port")
        .or_else(|| args.iter().any(|a| a == "--debug").then_some(vistagraph_debug::DEFAULT_PORT));

    let config = match parse_value::<PathBuf>(&args, "--config") {
        Some(path) => match load_config(&path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("{}", e);
                std::process::exit(1);
            }
        },
        None => CoreConfig::default(),
    };

    let source = Arc::new(SyntheticSource {
        seed: 0x5EED,
        chunk_size: config.streaming.chunk_size,
        nodes_per_chunk: 40,
        latency: Duration::from_millis(30),
    });
    let core = match GraphCore::with_source(config, source, &tokio::runtime::Handle::current()) {
        Ok(core) => Arc::new(Mutex::new(core)),
        Err(e) => {
            log::error!("Failed to start core: {}", e);
            std::process::exit(1);
        }
    };

    let _server = debug_port.map(|port| {
        log::info!("Debug server starting on port {}", port);
        vistagraph_debug::DebugServer::start(core.clone(), port)
    });

    let started = Instant::now();
    let mut interval = tokio::time::interval(Duration::from_millis(16));
    let mut last = Instant::now();
    let mut last_report = Instant::now();
    let mut previous_position: Option<Vec3> = None;
    let mut tick: u64 = 0;

    while started.elapsed() < Duration::from_secs(seconds) {
        interval.tick().await;
        let now = Instant::now();
        let dt = now - last;
        last = now;

        let camera = camera_at(started.elapsed().as_secs_f32() * 0.2);
        let velocity = previous_position.map(|p| (camera.position - p) / dt.as_secs_f32().max(1e-3));
        previous_position = Some(camera.position);

        let mut core = core.lock().await;
        // Streaming at a lower cadence than rendering
        if tick % 6 == 0 {
            core.update_streaming(&camera, velocity, now);
        }
        let packet = core.tick(Some(&camera), dt, now);
        tick += 1;

        if now.duration_since(last_report) >= Duration::from_secs(2) {
            last_report = now;
            let snapshot = core.snapshot();
            log::info!(
                "Frame {}: {} writes, {}/{} nodes visible, lod {:?}, {} unrenderable",
                packet.frame,
                packet.write_count(),
                snapshot.culling.visible_nodes,
                snapshot.nodes,
                snapshot.lod.distribution,
                packet.unrenderable
            );
            if let Some(loading) = &snapshot.loading {
                log::info!(
                    "Streaming: {} chunks resident, {} loading, {:.0}% progress, {:.1} MB cached",
                    loading.loaded_chunks,
                    loading.loading,
                    loading.progress * 100.0,
                    loading.cache_bytes as f64 / (1024.0 * 1024.0)
                );
            }
            if let Some(health) = &snapshot.health {
                log::info!("Health: {:.0} ({}), {:.1} fps", health.score, health.grade, health.fps);
            }
        }
    }

    log::info!("Demo finished after {} ticks", tick);
}

fn load_config(path: &PathBuf) -> Result<CoreConfig> {
    let text = std::fs::read_to_string(path)?;
    CoreConfig::from_json(&text)
}

/// Parse `--flag <value>` from the command line
fn parse_value<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    for i in 0..args.len() {
        if args[i] == flag {
            if let Some(value) = args.get(i + 1) {
                return value.parse().ok();
            }
        }
    }
    None
}
