//! Fixed-capacity instance slot allocation
//!
//! Each node kind owns one pool sized at startup. A slot is an index into the
//! backend's instance buffer for that kind; the pool keeps the node id to slot
//! mapping a bijection onto the occupied slots and never grows.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::graph::{GraphSnapshot, NodeId, NodeKind};

/// Default slots per node kind
pub const DEFAULT_CAPACITY: u32 = 10_000;

/// Instance pool configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub default_capacity: u32,
    /// Per-kind capacities that differ from the default
    pub capacities: BTreeMap<NodeKind, u32>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            default_capacity: DEFAULT_CAPACITY,
            capacities: BTreeMap::new(),
        }
    }
}

impl InstanceConfig {
    pub fn capacity_for(&self, kind: NodeKind) -> u32 {
        self.capacities.get(&kind).copied().unwrap_or(self.default_capacity)
    }

    pub fn validate(&self) -> Result<()> {
        for kind in NodeKind::ALL {
            if self.capacity_for(kind) == 0 {
                return Err(Error::config(format!("instance capacity for {} must be > 0", kind.name())));
            }
        }
        Ok(())
    }
}

/// The pool has no free slot; the node is not renderable this frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?} instance pool exhausted ({capacity} slots)")]
pub struct PoolExhausted {
    pub kind: NodeKind,
    pub capacity: u32,
}

/// Occupancy of one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub kind: NodeKind,
    pub capacity: u32,
    pub occupied: u32,
    pub free: u32,
    pub exhaustion_count: u64,
}

/// Slot allocator for one node kind
#[derive(Debug)]
pub struct InstanceSlotPool {
    kind: NodeKind,
    capacity: u32,
    /// Node id -> slot
    slots: HashMap<NodeId, u32>,
    /// Slot -> owning node id
    owners: Vec<Option<NodeId>>,
    /// Stack of unused slot indices, top is handed out next
    free_slots: Vec<u32>,
    exhaustion_count: u64,
    /// Ids already warned about during the current exhaustion episode
    reported: HashSet<NodeId>,
}

impl InstanceSlotPool {
    /// Create a pool. Zero capacity is a configuration error.
    pub fn new(kind: NodeKind, capacity: u32) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::config(format!("instance capacity for {} must be > 0", kind.name())));
        }
        log::info!("Created {} instance pool: {} slots", kind.name(), capacity);
        Ok(Self {
            kind,
            capacity,
            slots: HashMap::new(),
            owners: vec![None; capacity as usize],
            // Reversed so slot 0 is handed out first
            free_slots: (0..capacity).rev().collect(),
            exhaustion_count: 0,
            reported: HashSet::new(),
        })
    }

    /// Slot for `id`, allocating one if it has none
    pub fn acquire(&mut self, id: &NodeId) -> std::result::Result<u32, PoolExhausted> {
        if let Some(&slot) = self.slots.get(id) {
            return Ok(slot);
        }
        let Some(slot) = self.free_slots.pop() else {
            self.exhaustion_count += 1;
            if self.reported.insert(id.clone()) {
                log::warn!(
                    "{} instance pool exhausted ({} slots), node {} not renderable",
                    self.kind.name(),
                    self.capacity,
                    id
                );
            }
            return Err(PoolExhausted { kind: self.kind, capacity: self.capacity });
        };
        self.slots.insert(id.clone(), slot);
        self.owners[slot as usize] = Some(id.clone());
        Ok(slot)
    }

    /// Return the slot owned by `id` to the free list
    pub fn release(&mut self, id: &NodeId) -> Option<u32> {
        let slot = self.slots.remove(id)?;
        self.owners[slot as usize] = None;
        self.free_slots.push(slot);
        Some(slot)
    }

    /// End the exhaustion episode once a slot is left over after serving
    /// requests. Slots freed and refilled within the same pass keep it open.
    pub fn settle(&mut self) {
        if !self.free_slots.is_empty() && !self.reported.is_empty() {
            log::debug!("{} instance pool recovered from exhaustion", self.kind.name());
            self.reported.clear();
        }
    }

    pub fn slot_of(&self, id: &NodeId) -> Option<u32> {
        self.slots.get(id).copied()
    }

    pub fn owner_of(&self, slot: u32) -> Option<&NodeId> {
        self.owners.get(slot as usize).and_then(|o| o.as_ref())
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn occupied(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn free(&self) -> u32 {
        self.free_slots.len() as u32
    }

    /// Iterate over `(node id, slot)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, u32)> {
        self.slots.iter().map(|(id, &slot)| (id, slot))
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            kind: self.kind,
            capacity: self.capacity,
            occupied: self.occupied(),
            free: self.free(),
            exhaustion_count: self.exhaustion_count,
        }
    }
}

/// A slot newly taken by a visible node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAcquired {
    pub kind: NodeKind,
    pub slot: u32,
    /// Index of the node in the snapshot
    pub node: u32,
}

/// What one synchronisation pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotSync {
    pub acquired: Vec<SlotAcquired>,
    pub released: Vec<(NodeKind, u32)>,
    pub unchanged: usize,
    /// Visible nodes left without a slot this frame
    pub exhausted: Vec<NodeId>,
}

/// One pool per node kind
#[derive(Debug)]
pub struct InstancePools {
    pools: Vec<InstanceSlotPool>,
}

impl InstancePools {
    pub fn new(config: &InstanceConfig) -> Result<Self> {
        config.validate()?;
        let pools = NodeKind::ALL
            .iter()
            .map(|&kind| InstanceSlotPool::new(kind, config.capacity_for(kind)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { pools })
    }

    pub fn pool(&self, kind: NodeKind) -> &InstanceSlotPool {
        &self.pools[kind.index()]
    }

    pub fn pool_mut(&mut self, kind: NodeKind) -> &mut InstanceSlotPool {
        &mut self.pools[kind.index()]
    }

    pub fn slot_of(&self, kind: NodeKind, id: &NodeId) -> Option<u32> {
        self.pool(kind).slot_of(id)
    }

    /// Align slot ownership with the visible set.
    ///
    /// Slots of nodes that left the visible set are released first so they
    /// can be reused in the same pass; nodes that stayed visible keep their
    /// slot untouched.
    pub fn sync(&mut self, graph: &GraphSnapshot, visible: &[u32]) -> SlotSync {
        let nodes = graph.nodes();
        let mut visible_by_kind: Vec<HashSet<&NodeId>> = vec![HashSet::new(); NodeKind::ALL.len()];
        for &i in visible {
            let node = &nodes[i as usize];
            visible_by_kind[node.kind.index()].insert(&node.id);
        }

        let mut sync = SlotSync::default();
        for pool in &mut self.pools {
            let keep = &visible_by_kind[pool.kind.index()];
            let leaving: Vec<NodeId> = pool
                .slots
                .keys()
                .filter(|id| !keep.contains(id))
                .cloned()
                .collect();
            for id in leaving {
                if let Some(slot) = pool.release(&id) {
                    sync.released.push((pool.kind, slot));
                }
            }
        }

        for &i in visible {
            let node = &nodes[i as usize];
            let pool = &mut self.pools[node.kind.index()];
            if pool.slot_of(&node.id).is_some() {
                sync.unchanged += 1;
                continue;
            }
            match pool.acquire(&node.id) {
                Ok(slot) => sync.acquired.push(SlotAcquired { kind: node.kind, slot, node: i }),
                Err(_) => sync.exhausted.push(node.id.clone()),
            }
        }
        for pool in &mut self.pools {
            pool.settle();
        }
        sync
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools.iter().map(|p| p.stats()).collect()
    }

    /// Total occupied slots across all kinds
    pub fn occupied(&self) -> u32 {
        self.pools.iter().map(|p| p.occupied()).sum()
    }
}
