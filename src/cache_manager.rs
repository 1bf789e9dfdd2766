//! The [CacheManager] maps asset files into memory through a [Platform] and hands out [View]s of them.
//!
//! The cache keeps every mapped file in one table, behind one lock:
//!
//! - On a hit, the existing mapping gets another reference.
//! - On a miss, the file is checked against the per-file limit, and if admitting it would go over the memory budget,
//!   unreferenced mappings are closed oldest-access first until it fits.  If they can't make enough room the acquire
//!   fails and nothing new is mapped.
//! - A mapping whose references have all been released stays mapped until eviction or [CacheManager::close] needs it
//!   gone, so hot files stay warm between uses.
//!
//! A [View] is the reference: dropping it releases.  Holders that need the older manual protocol can
//! [View::detach] and call [CacheManager::release] themselves.
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::evictor;
use crate::mapping_table::MappingTable;
use crate::*;

/// A point-in-time snapshot of the cache.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CacheStats {
    pub memory_used_bytes: u64,
    pub max_memory_bytes: u64,
    pub files_mapped: usize,
    pub access_tracker_size: usize,
    /// `hits / (hits + misses)`, or 0 before the first acquire.
    pub approximate_hit_ratio: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Shared<P: Platform> {
    config: CacheConfig,
    platform: P,
    table: RwLock<MappingTable<P::Handle>>,
}

impl<P: Platform> Shared<P> {
    fn release(&self, key: &Path, id: Option<u64>) -> Result<(), CacheError> {
        self.table.write().release(key, id)?;
        log::trace!("Released {:?}", key);
        Ok(())
    }
}

pub struct CacheManager<P: Platform = MmapPlatform> {
    shared: Arc<Shared<P>>,
}

impl<P: Platform> Clone for CacheManager<P> {
    fn clone(&self) -> Self {
        CacheManager {
            shared: self.shared.clone(),
        }
    }
}

impl CacheManager<MmapPlatform> {
    /// Build a cache over real files.
    pub fn new(config: CacheConfig) -> CacheManager<MmapPlatform> {
        let platform = MmapPlatform::with_preload(config.preload_enabled);
        CacheManager::with_platform(config, platform)
    }
}

impl<P: Platform> CacheManager<P> {
    pub fn with_platform(config: CacheConfig, platform: P) -> CacheManager<P> {
        CacheManager {
            shared: Arc::new(Shared {
                table: RwLock::new(MappingTable::new(config.access_tracker_capacity)),
                config,
                platform,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf, CacheError> {
        self.shared
            .config
            .resolve_key(path)
            .map_err(|source| CacheError::NotFound {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Get a view of a file, mapping it if it isn't already.
    ///
    /// A miss that needs eviction blocks every other caller until the eviction is done.
    pub fn acquire(&self, path: impl AsRef<Path>) -> Result<View<P>, CacheError> {
        let key = self.resolve(path.as_ref())?;
        let shared = &*self.shared;
        let mut table = shared.table.write();

        if let Some((id, region)) = table.acquire_existing(&key) {
            log::trace!("Hit for {:?}", key);
            return Ok(View::new(self.shared.clone(), key, id, region));
        }

        let file_size = shared
            .platform
            .file_size(&key)
            .map_err(|source| CacheError::NotFound {
                path: key.clone(),
                source,
            })?;
        let limit = shared.config.max_file_size_bytes;
        if file_size > limit {
            return Err(CacheError::SizeLimitExceeded {
                path: key,
                size: file_size,
                limit,
            });
        }

        let budget = shared.config.max_memory_bytes;
        let projected = table.memory_used().saturating_add(file_size);
        if projected > budget {
            let freed = evictor::evict(&mut *table, &shared.platform, projected - budget)?;
            log::debug!("Freed {} bytes to admit {:?}", freed, key);
        }

        let region = shared.platform.open_mapping(&key, file_size)?;
        let mapped_size = region.mapped_size();
        log::debug!(
            "Mapped {:?} ({} bytes, {} mapped)",
            key,
            file_size,
            mapped_size
        );
        let (id, region) = table.insert(key.clone(), region, file_size, mapped_size);
        Ok(View::new(self.shared.clone(), key, id, region))
    }

    /// Release a reference taken by a [View] that was [View::detach]ed.
    ///
    /// Paths that aren't mapped are ignored, since they may have been closed already.  Releasing a mapped path
    /// without an outstanding reference is an error.
    pub fn release(&self, path: impl AsRef<Path>) -> Result<(), CacheError> {
        let key = self.resolve(path.as_ref())?;
        self.shared.release(&key, None)
    }

    pub fn stats(&self) -> CacheStats {
        let table = self.shared.table.read();
        let hits = table.hits();
        let misses = table.misses();
        let lookups = hits + misses;
        CacheStats {
            memory_used_bytes: table.memory_used(),
            max_memory_bytes: self.shared.config.max_memory_bytes,
            files_mapped: table.len(),
            access_tracker_size: table.tracker_len(),
            approximate_hit_ratio: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            hits,
            misses,
            evictions: table.evictions(),
        }
    }

    /// Whether `path` currently has a live mapping.
    pub fn is_mapped(&self, path: impl AsRef<Path>) -> bool {
        self.ref_count(path).is_some()
    }

    /// Outstanding references to the mapping for `path`, if it is mapped.
    pub fn ref_count(&self, path: impl AsRef<Path>) -> Option<u64> {
        let key = self.resolve(path.as_ref()).ok()?;
        self.shared.table.read().get(&key).map(|m| m.ref_count)
    }

    /// Close every mapping, referenced or not, and reset all accounting.
    ///
    /// Views still held stay readable: their region is unmapped when the last of them drops, and dropping them
    /// afterwards releases nothing.  Closing carries on past individual failures and returns the first one; the
    /// table is empty either way, and the manager can be used again.
    pub fn close(&self) -> Result<(), CacheError> {
        let drained = self.shared.table.write().take_all();
        let count = drained.len();
        let mut first_error = None;

        for (key, mapping) in drained {
            if mapping.ref_count > 0 {
                log::warn!(
                    "Closing {:?} with {} outstanding references",
                    key,
                    mapping.ref_count
                );
            }
            match Arc::try_unwrap(mapping.handle) {
                Ok(region) => {
                    if let Err(e) = self.shared.platform.close_mapping(region) {
                        log::warn!("Failed to close {:?}: {}", key, e);
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
                Err(_) => log::debug!("{:?} is still borrowed, deferring unmap", key),
            }
        }

        log::debug!("Closed {} mappings", count);
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

/// A read-only view of a mapped file, holding one reference to its mapping.
///
/// Dropping the view releases the reference.  Use [View::release] to see the error if that fails.
pub struct View<P: Platform> {
    shared: Arc<Shared<P>>,
    key: PathBuf,
    id: u64,
    region: Arc<P::Handle>,
    armed: bool,
}

impl<P: Platform> View<P> {
    fn new(shared: Arc<Shared<P>>, key: PathBuf, id: u64, region: Arc<P::Handle>) -> View<P> {
        View {
            shared,
            key,
            id,
            region,
            armed: true,
        }
    }

    /// The key this view was cached under.
    pub fn path(&self) -> &Path {
        &self.key
    }

    pub fn bytes(&self) -> &[u8] {
        self.region.bytes()
    }

    pub fn release(mut self) -> Result<(), CacheError> {
        self.armed = false;
        self.shared.release(&self.key, Some(self.id))
    }

    /// Stop releasing on drop.  The reference is still held, and must be given back with [CacheManager::release].
    pub fn detach(mut self) -> DetachedView<P::Handle> {
        self.armed = false;
        DetachedView {
            key: self.key.clone(),
            region: self.region.clone(),
        }
    }
}

impl<P: Platform> Deref for View<P> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes()
    }
}

impl<P: Platform> AsRef<[u8]> for View<P> {
    fn as_ref(&self) -> &[u8] {
        self.bytes()
    }
}

impl<P: Platform> Drop for View<P> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.shared.release(&self.key, Some(self.id)) {
            log::warn!("Dropping view of {:?}: {}", self.key, e);
        }
    }
}

impl<P: Platform> fmt::Debug for View<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("path", &self.key)
            .field("id", &self.id)
            .field("len", &self.bytes().len())
            .finish()
    }
}

/// A view whose reference is released by hand, through [CacheManager::release].
///
/// The bytes stay readable for as long as this lives, even if the mapping is evicted or closed.
pub struct DetachedView<H> {
    key: PathBuf,
    region: Arc<H>,
}

impl<H: MappedRegion> DetachedView<H> {
    pub fn path(&self) -> &Path {
        &self.key
    }

    pub fn bytes(&self) -> &[u8] {
        self.region.bytes()
    }
}

impl<H: MappedRegion> Deref for DetachedView<H> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes()
    }
}
