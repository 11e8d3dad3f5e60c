//! Byte-budgeted LRU cache for loaded chunks
//!
//! Eviction follows strict least-recently-accessed order. A chunk that was
//! just inserted is never evicted by its own insertion, so a single chunk
//! larger than the whole budget still stays resident.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::budget::MemoryBudget;
use super::chunk::{ChunkId, LoadedChunk};

/// LRU cache for chunks
pub struct ChunkCache {
    chunks: HashMap<ChunkId, LoadedChunk>,
    /// Access order: oldest first, newest last
    access_order: Vec<ChunkId>,
    budget: MemoryBudget,
}

impl ChunkCache {
    /// Create a cache holding at most `budget_bytes` (plus the newest chunk)
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            chunks: HashMap::new(),
            access_order: Vec::new(),
            budget: MemoryBudget::new(budget_bytes),
        }
    }

    /// Get a chunk and mark it as recently used
    pub fn get(&mut self, id: ChunkId, now: Instant) -> Option<&LoadedChunk> {
        if self.touch(id, now) {
            self.chunks.get(&id)
        } else {
            None
        }
    }

    /// Look at a chunk without changing its recency
    pub fn peek(&self, id: ChunkId) -> Option<&LoadedChunk> {
        self.chunks.get(&id)
    }

    /// Mark a chunk as recently used, returns whether it is resident
    pub fn touch(&mut self, id: ChunkId, now: Instant) -> bool {
        let Some(chunk) = self.chunks.get_mut(&id) else {
            return false;
        };
        chunk.last_access = now;
        self.update_access_order(id);
        true
    }

    /// Insert a chunk, then evict least recently used chunks until within budget.
    ///
    /// # Returns
    /// Chunks removed to make room, plus the replaced chunk if `id` was resident
    pub fn insert(&mut self, chunk: LoadedChunk) -> Vec<LoadedChunk> {
        let id = chunk.id;
        let mut removed = Vec::new();
        if let Some(previous) = self.remove(id) {
            removed.push(previous);
        }

        self.budget.add(chunk.size_bytes);
        self.chunks.insert(id, chunk);
        self.access_order.push(id);

        while self.budget.is_over_budget() && self.access_order.len() > 1 {
            match self.evict_oldest() {
                Some(evicted) => removed.push(evicted),
                None => break,
            }
        }
        removed
    }

    pub fn remove(&mut self, id: ChunkId) -> Option<LoadedChunk> {
        let chunk = self.chunks.remove(&id)?;
        self.remove_from_access_order(id);
        self.budget.remove(chunk.size_bytes);
        Some(chunk)
    }

    pub fn contains(&self, id: ChunkId) -> bool {
        self.chunks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Resident bytes
    pub fn size_bytes(&self) -> usize {
        self.budget.used()
    }

    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoadedChunk> {
        self.chunks.values()
    }

    /// Chunk ids from least to most recently used
    pub fn lru_order(&self) -> &[ChunkId] {
        &self.access_order
    }

    /// Evict the least recently used chunk
    pub fn evict_oldest(&mut self) -> Option<LoadedChunk> {
        let oldest = *self.access_order.first()?;
        self.remove(oldest)
    }

    /// Evict in LRU order until at most `target_bytes` remain
    pub fn evict_to(&mut self, target_bytes: usize) -> Vec<LoadedChunk> {
        let mut evicted = Vec::new();
        while self.budget.used() > target_bytes {
            match self.evict_oldest() {
                Some(chunk) => evicted.push(chunk),
                None => break,
            }
        }
        evicted
    }

    /// Evict every chunk not accessed within `ttl`
    pub fn evict_expired(&mut self, now: Instant, ttl: Duration) -> Vec<LoadedChunk> {
        let expired: Vec<ChunkId> = self
            .access_order
            .iter()
            .copied()
            .filter(|id| {
                self.chunks
                    .get(id)
                    .is_some_and(|c| now.saturating_duration_since(c.last_access) > ttl)
            })
            .collect();
        expired.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn clear(&mut self) -> Vec<LoadedChunk> {
        self.access_order.clear();
        self.budget.remove(self.budget.used());
        self.chunks.drain().map(|(_, chunk)| chunk).collect()
    }

    /// Move a chunk to the end of the access order (most recently used)
    fn update_access_order(&mut self, id: ChunkId) {
        self.remove_from_access_order(id);
        self.access_order.push(id);
    }

    fn remove_from_access_order(&mut self, id: ChunkId) {
        if let Some(pos) = self.access_order.iter().position(|c| *c == id) {
            self.access_order.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, NodeKind};
    use crate::core::types::Vec3;
    use proptest::prelude::*;

    fn chunk(x: i32, nodes: usize, now: Instant) -> LoadedChunk {
        let nodes = (0..nodes)
            .map(|i| Node::new(format!("{x}-{i}"), NodeKind::Concept, Vec3::splat(x as f32)))
            .collect();
        LoadedChunk::new(ChunkId::new(x, 0, 0), 100.0, nodes, Vec::new(), Duration::ZERO, now)
    }

    #[test]
    fn test_lru_eviction_order() {
        let now = Instant::now();
        let size = chunk(0, 4, now).size_bytes;
        let mut cache = ChunkCache::new(size * 3);

        for x in 0..3 {
            assert!(cache.insert(chunk(x, 4, now)).is_empty());
        }
        // 0 becomes most recently used, so 1 is now the oldest
        assert!(cache.touch(ChunkId::new(0, 0, 0), now));
        let evicted = cache.insert(chunk(3, 4, now));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, ChunkId::new(1, 0, 0));
        assert_eq!(cache.size_bytes(), size * 3);
        assert_eq!(cache.lru_order(), &[ChunkId::new(2, 0, 0), ChunkId::new(0, 0, 0), ChunkId::new(3, 0, 0)]);
    }

    #[test]
    fn test_oversized_chunk_stays() {
        let now = Instant::now();
        let mut cache = ChunkCache::new(10);
        assert!(cache.insert(chunk(0, 1, now)).is_empty());
        let evicted = cache.insert(chunk(1, 1, now));
        assert_eq!(evicted.len(), 1);
        assert!(cache.contains(ChunkId::new(1, 0, 0)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_replace_keeps_accounting() {
        let now = Instant::now();
        let mut cache = ChunkCache::new(usize::MAX);
        cache.insert(chunk(0, 1, now));
        let replaced = cache.insert(chunk(0, 5, now));
        assert_eq!(replaced.len(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_bytes(), cache.peek(ChunkId::new(0, 0, 0)).unwrap().size_bytes);
    }

    #[test]
    fn test_ttl_and_target_eviction() {
        let start = Instant::now();
        let mut cache = ChunkCache::new(usize::MAX);
        cache.insert(chunk(0, 1, start));
        cache.insert(chunk(1, 1, start));
        cache.touch(ChunkId::new(1, 0, 0), start + Duration::from_secs(200));

        let expired = cache.evict_expired(start + Duration::from_secs(301), Duration::from_secs(300));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, ChunkId::new(0, 0, 0));

        let evicted = cache.evict_to(0);
        assert_eq!(evicted.len(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.size_bytes(), 0);
    }

    proptest! {
        #[test]
        fn prop_budget_respected_after_insert(
            sizes in prop::collection::vec(0usize..20, 1..40),
            budget_chunks in 1usize..6,
        ) {
            let now = Instant::now();
            let unit = chunk(0, 1, now).size_bytes;
            let budget = unit * budget_chunks;
            let mut cache = ChunkCache::new(budget);
            for (x, nodes) in sizes.iter().enumerate() {
                cache.insert(chunk(x as i32, *nodes, now));
                let newest = cache.peek(ChunkId::new(x as i32, 0, 0)).unwrap().size_bytes;
                prop_assert!(cache.size_bytes() <= budget || cache.len() == 1);
                prop_assert!(cache.size_bytes() >= newest);
                let accounted: usize = cache.iter().map(|c| c.size_bytes).sum();
                prop_assert_eq!(accounted, cache.size_bytes());
            }
        }
    }
}
