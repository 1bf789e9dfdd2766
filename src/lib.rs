//! A cache of memory-mapped asset files, for large binary assets such as textures, models and audio.
//!
//! Reading a big asset into a heap buffer means the bytes live twice: once in the OS page cache and once in the
//! buffer.  This crate maps files instead, and hands out [View]s that borrow the mapped memory directly.  It is built
//! from a few pieces:
//!
//! - A [Platform] opens, maps and closes files.  [MmapPlatform] does this with real OS mappings, and is what
//!   [CacheManager::new] uses.
//! - A mapping table records every mapped file, its size against the memory budget, when it was last used, and how
//!   many views of it are held.
//! - When admitting a file would go over [CacheConfig::max_memory_bytes], an evictor closes mappings nobody holds,
//!   least recently used first.  A mapping with a live view is never evicted.
//! - An [AccessTracker] keeps a bounded recency list of keys for statistics.  It never decides what gets evicted.
//!
//! [CacheManager] puts these together behind `acquire`, `release`, `stats` and `close`.  A [View] releases its
//! reference when dropped, so there is nothing to pair up by hand.
//!
//! The cache is an optimization: when an acquire fails with an error where [CacheError::is_recoverable] holds, read
//! the file directly instead.
mod access_tracker;
mod cache_manager;
mod config;
mod error;
mod evictor;
mod mapping_table;
mod mmap_platform;
mod platform;

pub use access_tracker::*;
pub use cache_manager::*;
pub use config::*;
pub use error::*;
pub use mmap_platform::*;
pub use platform::*;
