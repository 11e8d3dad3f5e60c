//! Level-of-detail selection

pub mod config;
pub mod manager;

pub use config::LodConfig;
pub use manager::{LodManager, LodState, LodUpdate};
