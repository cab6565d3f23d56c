//! Read-only mirror of upstream directory datasets.
//!
//! Whole datasets are fetched on a miss, split into size-bounded chunks in a
//! key/value backend with a TTL, and served from the reconstructed copy until
//! they expire.

mod backend;
mod chunked;
mod directory;
mod layer;
mod resources;

pub use backend::{CacheBackend, MemoryCache, SqliteCache};
pub use chunked::{ChunkMeta, ChunkedCache, ChunkedEntry};
pub use directory::{HttpDirectory, UpstreamDirectory};
pub use layer::{CacheSource, MirrorCache, MirrorResult};
pub use resources::{Customer, Employee, Item, MirrorResource, ResourceKind};
