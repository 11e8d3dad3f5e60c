//! Progressive chunk streaming around the camera

pub mod budget;
pub mod cache;
pub mod chunk;
pub mod chunk_loader;
pub mod config;
pub mod prefetch;
pub mod priority;
pub mod progressive;
pub mod source;

pub use budget::MemoryBudget;
pub use cache::ChunkCache;
pub use chunk::{ChunkId, LoadedChunk};
pub use chunk_loader::{CancelHandle, ChunkLoader, LoadOutcome, LoadRequest, LoadResult};
pub use config::{RetryPolicy, StreamingConfig};
pub use prefetch::PrefetchPredictor;
pub use priority::{ChunkCandidate, ChunkPriorityQueue, PriorityTier};
pub use progressive::{LoaderUpdate, LoadingStats, ProgressiveLoader};
pub use source::{ChunkQuery, GraphSource, MemorySource};
