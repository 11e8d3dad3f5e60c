//! Per-frame slot writes handed to the rendering backend

use bytemuck::{Pod, Zeroable};

use super::instances::{InstancePools, SlotSync};
use super::registry::{ResourceHandles, ResourceRegistry};
use crate::core::types::{Mat4, Quat, Vec3};
use crate::graph::{GraphSnapshot, Node, NodeKind};
use crate::lod::LodManager;

/// Per-instance record for the backend's instance buffer (96 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    /// Column-major model matrix
    pub transform: [[f32; 4]; 4],
    /// Linear RGBA
    pub color: [f32; 4],
    pub opacity: f32,
    /// 1 = draw, 0 = slot is empty
    pub visible: u32,
    pub lod_level: u32,
    /// Cross-fade progress of the last LOD change
    pub lod_progress: f32,
}

impl InstanceData {
    /// Record for a visible node
    pub fn for_node(node: &Node, lod_level: u8, lod_progress: f32) -> Self {
        let transform = Mat4::from_scale_rotation_translation(Vec3::splat(node.radius), Quat::IDENTITY, node.position);
        Self {
            transform: transform.to_cols_array_2d(),
            color: node.color.0,
            opacity: node.confidence,
            visible: 1,
            lod_level: lod_level as u32,
            lod_progress,
        }
    }

    /// Record that hides a released slot
    pub fn hidden() -> Self {
        Self::zeroed()
    }
}

/// One write into a kind's instance buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotWrite {
    pub slot: u32,
    pub data: InstanceData,
    pub resources: Option<ResourceHandles>,
}

/// All writes for one node kind
#[derive(Debug, Clone, PartialEq)]
pub struct KindBatch {
    pub kind: NodeKind,
    pub writes: Vec<SlotWrite>,
}

/// Everything the backend needs for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FramePacket {
    pub frame: u64,
    /// One batch per node kind, in `NodeKind::ALL` order
    pub batches: Vec<KindBatch>,
    /// Indices of visible edges in the snapshot
    pub visible_edges: Vec<u32>,
    /// Visible nodes that got no slot this frame
    pub unrenderable: usize,
}

impl FramePacket {
    pub fn empty(frame: u64) -> Self {
        Self {
            frame,
            batches: NodeKind::ALL
                .iter()
                .map(|&kind| KindBatch { kind, writes: Vec::new() })
                .collect(),
            visible_edges: Vec::new(),
            unrenderable: 0,
        }
    }

    pub fn batch(&self, kind: NodeKind) -> &KindBatch {
        &self.batches[kind.index()]
    }

    /// Total writes across kinds
    pub fn write_count(&self) -> usize {
        self.batches.iter().map(|b| b.writes.len()).sum()
    }
}

/// Inputs for assembling a frame packet
pub struct FrameInputs<'a> {
    pub frame: u64,
    pub graph: &'a GraphSnapshot,
    pub visible_nodes: &'a [u32],
    pub visible_edges: &'a [u32],
    pub lod: &'a LodManager,
    pub pools: &'a InstancePools,
    pub sync: &'a SlotSync,
    pub registry: &'a ResourceRegistry,
}

/// Build the packet: hide-writes for released slots, then one write per occupied slot
pub fn build_frame(inputs: FrameInputs<'_>) -> FramePacket {
    let mut packet = FramePacket::empty(inputs.frame);

    for &(kind, slot) in &inputs.sync.released {
        // A released slot may already be reused this frame, the visible write below wins
        if inputs.pools.pool(kind).owner_of(slot).is_none() {
            packet.batches[kind.index()].writes.push(SlotWrite {
                slot,
                data: InstanceData::hidden(),
                resources: None,
            });
        }
    }

    let nodes = inputs.graph.nodes();
    for &i in inputs.visible_nodes {
        let node = &nodes[i as usize];
        let Some(slot) = inputs.pools.slot_of(node.kind, &node.id) else {
            packet.unrenderable += 1;
            continue;
        };
        let (level, progress) = inputs
            .lod
            .state(&node.id)
            .map(|s| (s.level, s.progress))
            .unwrap_or((0, 1.0));
        packet.batches[node.kind.index()].writes.push(SlotWrite {
            slot,
            data: InstanceData::for_node(node, level, progress),
            resources: inputs.registry.lookup(node.kind, level),
        });
    }

    packet.visible_edges = inputs.visible_edges.to_vec();
    packet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Color;
    use crate::lod::LodConfig;
    use crate::render::instances::InstanceConfig;

    #[test]
    fn test_instance_layout() {
        assert_eq!(std::mem::size_of::<InstanceData>(), 96);
        let hidden = InstanceData::hidden();
        assert_eq!(hidden.visible, 0);
        assert!(bytemuck::bytes_of(&hidden).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_node_transform() {
        let node = Node::new("n", NodeKind::Tag, Vec3::new(1.0, 2.0, 3.0))
            .with_radius(2.0)
            .with_color(Color::rgb(1.0, 0.0, 0.0))
            .with_confidence(0.5);
        let data = InstanceData::for_node(&node, 2, 0.25);
        let m = Mat4::from_cols_array_2d(&data.transform);
        assert_eq!(m.transform_point3(Vec3::ZERO), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(m.transform_vector3(Vec3::X), Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(data.opacity, 0.5);
        assert_eq!(data.lod_level, 2);
        assert_eq!(data.color, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_build_frame_hides_released_slots() {
        let graph = GraphSnapshot::new(
            vec![
                Node::new("a", NodeKind::Concept, Vec3::ZERO),
                Node::new("b", NodeKind::Concept, Vec3::X),
            ],
            Vec::new(),
            0,
        );
        let mut pools = InstancePools::new(&InstanceConfig::default()).unwrap();
        let mut lod = LodManager::new(LodConfig::default()).unwrap();
        let mut registry = ResourceRegistry::new();
        registry.init(4);
        registry.register(NodeKind::Concept, 0, ResourceHandles { geometry: 1, material: 2 });

        let sync = pools.sync(&graph, &[0, 1]);
        lod.update(&graph, &[0, 1], Vec3::ZERO, 0.0);
        let packet = build_frame(FrameInputs {
            frame: 1,
            graph: &graph,
            visible_nodes: &[0, 1],
            visible_edges: &[],
            lod: &lod,
            pools: &pools,
            sync: &sync,
            registry: &registry,
        });
        assert_eq!(packet.batch(NodeKind::Concept).writes.len(), 2);
        assert!(packet.batch(NodeKind::Concept).writes.iter().all(|w| w.resources.is_some()));

        let b_slot = pools.slot_of(NodeKind::Concept, &"b".into()).unwrap();
        let sync = pools.sync(&graph, &[0]);
        lod.update(&graph, &[0], Vec3::ZERO, 0.0);
        let packet = build_frame(FrameInputs {
            frame: 2,
            graph: &graph,
            visible_nodes: &[0],
            visible_edges: &[],
            lod: &lod,
            pools: &pools,
            sync: &sync,
            registry: &registry,
        });
        let writes = &packet.batch(NodeKind::Concept).writes;
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].slot, b_slot);
        assert_eq!(writes[0].data.visible, 0);
        assert_eq!(writes[1].data.visible, 1);
        assert_eq!(packet.write_count(), 2);
    }
}
