//! Debug protocol - JSON command/response definitions

use serde::{Deserialize, Serialize};

/// Commands sent from a debug client to the debug server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "params")]
pub enum DebugCommand {
    /// Full core snapshot (culling, lod, slots, loading, health)
    GetSnapshot,
    /// Statistics of the most recent cull
    GetCullingStats,
    /// Progressive loader statistics
    GetLoadingStats,
    /// Latest health report from the performance monitor
    GetHealth,
    /// Nodes per LOD level and the current distance scale
    GetLodDistribution,
    /// FPS statistics (1s/5s/15s averages with min/max)
    GetFpsStats,
    /// Set the LOD distance scale (clamped by the core)
    SetLodScale { scale: f32 },
    /// Enable or disable adaptive optimizations
    SetAdaptive { enabled: bool },
    /// Evict cached chunks down to a fraction of the cache budget
    CleanupCache { target_fraction: f32 },
    /// Get info for a specific chunk cell
    GetChunkInfo { x: i32, y: i32, z: i32 },
    /// Ping (health check)
    Ping,
}

/// Responses from debug server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum DebugResponse {
    #[serde(rename = "ok")]
    Ok { data: ResponseData },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Response data variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    None,
    Pong { message: String },
    /// Structured report produced by the application (snapshot, stats, health)
    Report { report: serde_json::Value },
    ParamsUpdated { description: String },
    LodDistribution {
        scale: f32,
        levels: Vec<usize>,
    },
    FpsStats {
        current_fps: f32,
        frame_count: u64,
        one_sec: FpsWindowInfo,
        five_sec: FpsWindowInfo,
        fifteen_sec: FpsWindowInfo,
    },
    ChunkInfo {
        x: i32,
        y: i32,
        z: i32,
        loaded: bool,
        loading: bool,
        node_count: u32,
        edge_count: u32,
        size_bytes: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FpsWindowInfo {
    pub avg: f32,
    pub min: f32,
    pub max: f32,
}

impl DebugResponse {
    pub fn ok(data: ResponseData) -> Self {
        Self::Ok { data }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error {
            message: msg.into(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(ResponseData::Pong {
            message: "pong".into(),
        })
    }

    pub fn none() -> Self {
        Self::ok(ResponseData::None)
    }

    /// Wrap any serializable report
    pub fn report<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(report) => Self::ok(ResponseData::Report { report }),
            Err(e) => Self::error(format!("Serialize error: {}", e)),
        }
    }

    pub fn updated(description: impl Into<String>) -> Self {
        Self::ok(ResponseData::ParamsUpdated {
            description: description.into(),
        })
    }
}
