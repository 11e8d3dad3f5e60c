//! Vistagraph - visibility, level-of-detail and streaming core for large 3D graphs
//!
//! The core decides each frame which nodes and edges are drawn, at which
//! detail, in which instance slots, while chunks of the graph stream in and
//! out around the camera. Drawing itself belongs to the host.

pub mod core;
pub mod math;
pub mod graph;
pub mod spatial;
pub mod lod;
pub mod render;
pub mod streaming;
pub mod perf;
pub mod config;
pub mod engine;
pub mod debug;

pub use config::CoreConfig;
pub use engine::{CoreSnapshot, GraphCore};
