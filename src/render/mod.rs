//! Renderer-facing side of the core: culling, instance slots, frame writes

pub mod culling;
pub mod frame;
pub mod instances;
pub mod registry;

pub use culling::{CullResult, CullingConfig, CullingStats, FrustumCuller};
pub use frame::{FrameInputs, FramePacket, InstanceData, KindBatch, SlotWrite, build_frame};
pub use instances::{InstanceConfig, InstancePools, InstanceSlotPool, PoolExhausted, PoolStats, SlotSync};
pub use registry::{ResourceHandles, ResourceRegistry};
