//! Geometry and material handles supplied by the rendering backend
//!
//! The core never creates GPU resources. The backend registers opaque handles
//! per node kind and LOD level after `init`, and the frame builder looks them
//! up when it emits slot writes.

use std::collections::HashMap;

use serde::Serialize;

use crate::graph::NodeKind;

/// Opaque handles owned by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceHandles {
    pub geometry: u64,
    pub material: u64,
}

/// Lookup table from `(kind, level)` to resource handles
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: HashMap<(NodeKind, u8), ResourceHandles>,
    levels: u8,
    live: bool,
}

impl ResourceRegistry {
    /// An uninitialised registry; lookups return `None` until `init`
    pub fn new() -> Self {
        Self::default()
    }

    /// Start accepting registrations for `levels` LOD levels
    pub fn init(&mut self, levels: u8) {
        self.entries.clear();
        self.levels = levels;
        self.live = true;
        log::info!("Resource registry initialised for {} lod levels", levels);
    }

    /// Drop every handle; lookups return `None` afterwards
    pub fn dispose(&mut self) {
        log::info!("Resource registry disposed ({} entries)", self.entries.len());
        self.entries.clear();
        self.live = false;
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Register handles. Ignored before `init`, after `dispose`, or for an unknown level.
    pub fn register(&mut self, kind: NodeKind, level: u8, handles: ResourceHandles) -> bool {
        if !self.live || level >= self.levels {
            log::warn!(
                "Rejected resource registration for {} level {} (live: {}, levels: {})",
                kind.name(),
                level,
                self.live,
                self.levels
            );
            return false;
        }
        self.entries.insert((kind, level), handles);
        true
    }

    /// Handles for `(kind, level)`, falling back to the nearest coarser registered level
    pub fn lookup(&self, kind: NodeKind, level: u8) -> Option<ResourceHandles> {
        if !self.live {
            return None;
        }
        (level..self.levels).find_map(|l| self.entries.get(&(kind, l)).copied())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
