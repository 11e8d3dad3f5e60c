//! Uniform grid over loaded chunks
//!
//! Independent of the per-frame octree: the octree is rebuilt from the node
//! snapshot, while this grid tracks which chunks are resident and where their
//! centers are, so the loader can answer "what is loaded near the camera".

use std::collections::HashMap;
use std::hash::Hash;

use crate::core::types::{IVec3, Vec3};

/// Spatial hash keyed by `K`, bucketing each entry by the grid cell of its position
#[derive(Debug, Clone)]
pub struct SpatialHash<K> {
    cell_size: f32,
    /// Cell -> entries whose registered position falls in it
    buckets: HashMap<IVec3, Vec<(K, Vec3)>>,
    /// Reverse index for O(1) removal
    index: HashMap<K, IVec3>,
}

impl<K: Clone + Eq + Hash> SpatialHash<K> {
    /// Create an empty hash. `cell_size` must be positive, validated by the caller's config.
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            buckets: HashMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Grid cell containing a position
    pub fn cell_of(&self, position: Vec3) -> IVec3 {
        (position / self.cell_size).floor().as_ivec3()
    }

    /// Insert or move an entry
    pub fn insert(&mut self, key: K, position: Vec3) {
        self.remove(&key);
        let cell = self.cell_of(position);
        self.buckets.entry(cell).or_default().push((key.clone(), position));
        self.index.insert(key, cell);
    }

    /// Remove an entry, returns whether it was present
    pub fn remove(&mut self, key: &K) -> bool {
        let Some(cell) = self.index.remove(key) else {
            return false;
        };
        if let Some(bucket) = self.buckets.get_mut(&cell) {
            bucket.retain(|(k, _)| k != key);
            if bucket.is_empty() {
                self.buckets.remove(&cell);
            }
        }
        true
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Registered position of an entry
    pub fn position(&self, key: &K) -> Option<Vec3> {
        let cell = self.index.get(key)?;
        self.buckets
            .get(cell)?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, p)| *p)
    }

    /// Entries whose registered position lies within `radius` of `center`
    pub fn query_radius(&self, center: Vec3, radius: f32) -> Vec<K> {
        let min = self.cell_of(center - Vec3::splat(radius));
        let max = self.cell_of(center + Vec3::splat(radius));
        let radius_sq = radius * radius;

        let mut results = Vec::new();
        // Iterate whichever is smaller: the covered cells or the occupied buckets
        let covered = max.as_i64vec3() - min.as_i64vec3() + glam::I64Vec3::ONE;
        let covered_cells = covered.x.saturating_mul(covered.y).saturating_mul(covered.z);
        if covered_cells > self.buckets.len() as i64 {
            for (cell, bucket) in &self.buckets {
                if cell.cmpge(min).all() && cell.cmple(max).all() {
                    collect_within(bucket, center, radius_sq, &mut results);
                }
            }
        } else {
            for x in min.x..=max.x {
                for y in min.y..=max.y {
                    for z in min.z..=max.z {
                        if let Some(bucket) = self.buckets.get(&IVec3::new(x, y, z)) {
                            collect_within(bucket, center, radius_sq, &mut results);
                        }
                    }
                }
            }
        }
        results
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.index.clear();
    }
}

fn collect_within<K: Clone>(bucket: &[(K, Vec3)], center: Vec3, radius_sq: f32, out: &mut Vec<K>) {
    out.extend(
        bucket
            .iter()
            .filter(|(_, p)| p.distance_squared(center) <= radius_sq)
            .map(|(k, _)| k.clone()),
    );
}
