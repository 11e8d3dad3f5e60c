//! Geometry primitives used by culling and streaming

pub mod aabb;
pub mod frustum;

pub use aabb::Aabb;
pub use frustum::{Frustum, Plane};
