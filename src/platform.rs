//! The [Platform] trait is responsible for turning a file on disk into a read-only region of mapped memory.
//!
//! The cache never touches OS handles itself: it only stats files, asks for mappings, and hands them back to be
//! closed.  [crate::MmapPlatform] is the implementation used by default.
use std::io::Error as IoError;
use std::path::Path;

use crate::MappingError;

/// Open file plus mapping, owned by exactly one entry of the cache.
///
/// Dropping a region must release its OS resources, since regions still borrowed by views at shutdown are dropped
/// rather than closed.
pub trait MappedRegion: Send + Sync + 'static {
    /// The mapped bytes.  This is exactly as long as the file was at mapping time.
    fn bytes(&self) -> &[u8];

    /// Bytes this region costs against the memory budget, which may be rounded up past the file length.
    fn mapped_size(&self) -> u64;
}

pub trait Platform: Send + Sync + 'static {
    type Handle: MappedRegion;

    /// Return the length of the file at `path`, failing for anything that isn't a readable regular file.
    fn file_size(&self, path: &Path) -> Result<u64, IoError>;

    /// Open the file for shared reading and map `size` bytes of it read-only.
    ///
    /// On failure, anything acquired along the way must already be released.
    fn open_mapping(&self, path: &Path, size: u64) -> Result<Self::Handle, MappingError>;

    /// Unmap and close.
    ///
    /// Not every handle passes through here.  A region still borrowed by a view when its mapping is evicted or the
    /// cache is closed is simply dropped once the last view goes, so [MappedRegion]'s drop must release it.
    fn close_mapping(&self, handle: Self::Handle) -> Result<(), MappingError>;
}
