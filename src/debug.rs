//! Debug server bridge: answers [`DebugCommand`]s from a [`GraphCore`]

use vistagraph_debug::{DebugCommand, DebugHandler, DebugResponse, FpsWindowInfo, ResponseData};

use crate::core::time::FpsWindow;
use crate::core::types::IVec3;
use crate::engine::GraphCore;
use crate::streaming::ChunkId;

fn window_info(window: FpsWindow) -> FpsWindowInfo {
    FpsWindowInfo { avg: window.avg, min: window.min, max: window.max }
}

impl DebugHandler for GraphCore {
    fn handle_command(&mut self, cmd: DebugCommand) -> DebugResponse {
        match cmd {
            DebugCommand::Ping => DebugResponse::pong(),
            DebugCommand::GetSnapshot => DebugResponse::report(&self.snapshot()),
            DebugCommand::GetCullingStats => DebugResponse::report(&self.culling_stats()),
            DebugCommand::GetLoadingStats => match self.loading_stats() {
                Some(stats) => DebugResponse::report(&stats),
                None => DebugResponse::error("No graph source attached"),
            },
            DebugCommand::GetHealth => match self.health() {
                Some(report) => DebugResponse::report(&report),
                None => DebugResponse::error("No health sample yet"),
            },
            DebugCommand::GetLodDistribution => DebugResponse::ok(ResponseData::LodDistribution {
                scale: self.lod().scale(),
                levels: self.lod().distribution(),
            }),
            DebugCommand::GetFpsStats => {
                let stats = self.monitor().fps_stats();
                DebugResponse::ok(ResponseData::FpsStats {
                    current_fps: stats.current_fps,
                    frame_count: stats.frame_count,
                    one_sec: window_info(stats.one_sec),
                    five_sec: window_info(stats.five_sec),
                    fifteen_sec: window_info(stats.fifteen_sec),
                })
            }
            DebugCommand::SetLodScale { scale } => {
                let applied = self.set_lod_scale(scale);
                DebugResponse::updated(format!("lod scale = {:.3}", applied))
            }
            DebugCommand::SetAdaptive { enabled } => {
                self.set_adaptive(enabled);
                DebugResponse::updated(format!("adaptive = {}", enabled))
            }
            DebugCommand::CleanupCache { target_fraction } => {
                if !(target_fraction >= 0.0 && target_fraction <= 1.0) {
                    return DebugResponse::error(format!("target_fraction {} outside [0, 1]", target_fraction));
                }
                let evicted = self.cleanup_cache(target_fraction);
                DebugResponse::updated(format!("evicted {} chunks", evicted))
            }
            DebugCommand::GetChunkInfo { x, y, z } => {
                let Some(loader) = self.loader() else {
                    return DebugResponse::error("No graph source attached");
                };
                let id = ChunkId(IVec3::new(x, y, z));
                let (node_count, edge_count, size_bytes) = loader
                    .chunk(id)
                    .map(|c| (c.nodes.len() as u32, c.edges.len() as u32, c.size_bytes as u64))
                    .unwrap_or((0, 0, 0));
                DebugResponse::ok(ResponseData::ChunkInfo {
                    x,
                    y,
                    z,
                    loaded: loader.is_loaded(id),
                    loading: loader.is_in_flight(id),
                    node_count,
                    edge_count,
                    size_bytes,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;

    #[test]
    fn test_commands_without_source() {
        let mut core = GraphCore::new(CoreConfig::default()).unwrap();
        assert_eq!(core.handle_command(DebugCommand::Ping), DebugResponse::pong());
        assert!(matches!(core.handle_command(DebugCommand::GetLoadingStats), DebugResponse::Error { .. }));
        assert!(matches!(
            core.handle_command(DebugCommand::GetChunkInfo { x: 0, y: 0, z: 0 }),
            DebugResponse::Error { .. }
        ));

        let DebugResponse::Ok { data: ResponseData::Report { report } } = core.handle_command(DebugCommand::GetSnapshot)
        else {
            panic!("snapshot should be a report");
        };
        assert_eq!(report["frame"], 0);
        assert!(report["loading"].is_null());
    }

    #[test]
    fn test_set_lod_scale_is_clamped() {
        let mut core = GraphCore::new(CoreConfig::default()).unwrap();
        core.handle_command(DebugCommand::SetLodScale { scale: 0.1 });
        let response = core.handle_command(DebugCommand::GetLodDistribution);
        let DebugResponse::Ok { data: ResponseData::LodDistribution { scale, levels } } = response else {
            panic!("unexpected response");
        };
        assert_eq!(scale, 0.25);
        assert_eq!(levels, vec![0; 4]);

        assert!(matches!(
            core.handle_command(DebugCommand::CleanupCache { target_fraction: 2.0 }),
            DebugResponse::Error { .. }
        ));
    }
}
