use std::convert::TryFrom;
use std::fs::File;
use std::io::{Error as IoError, ErrorKind};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use crate::*;

/// Used where the page size can't be asked for.
const FALLBACK_PAGE_SIZE: u64 = 4096;

#[cfg(unix)]
fn system_page_size() -> u64 {
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ret < 1 {
        FALLBACK_PAGE_SIZE
    } else {
        ret as u64
    }
}

#[cfg(not(unix))]
fn system_page_size() -> u64 {
    FALLBACK_PAGE_SIZE
}

/// A [Platform] backed by real files and `memmap2`, which picks the unix or windows mapping calls at build time.
///
/// Mappings are charged in whole pages, since that is what the OS maps.
#[derive(Debug)]
pub struct MmapPlatform {
    preload: bool,
    page_size: u64,
}

/// The file and its read-only mapping.
///
/// Empty files have no mapping at all, since there is nothing to map.
#[derive(Debug)]
pub struct MmapHandle {
    path: PathBuf,
    map: Option<Mmap>,
    mapped_size: u64,
    // Kept open for as long as the mapping lives.
    _file: File,
}

impl Default for MmapPlatform {
    fn default() -> MmapPlatform {
        MmapPlatform::with_preload(false)
    }
}

impl MmapPlatform {
    pub fn new() -> MmapPlatform {
        Default::default()
    }

    /// Hint the OS to start reading mapped pages in as soon as the mapping exists.  Only has an effect on unix.
    pub fn with_preload(preload: bool) -> MmapPlatform {
        MmapPlatform {
            preload,
            page_size: system_page_size(),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Round `len` up to whole pages.
    pub fn pages_for(&self, len: u64) -> u64 {
        let pages = len / self.page_size + u64::from(len % self.page_size != 0);
        pages * self.page_size
    }

    #[cfg(unix)]
    fn preload(&self, path: &Path, map: &Mmap) {
        if !self.preload {
            return;
        }
        if let Err(e) = map.advise(memmap2::Advice::WillNeed) {
            log::warn!("Could not preload {:?}: {}", path, e);
        }
    }

    #[cfg(not(unix))]
    fn preload(&self, _path: &Path, _map: &Mmap) {}
}

impl Platform for MmapPlatform {
    type Handle = MmapHandle;

    fn file_size(&self, path: &Path) -> Result<u64, IoError> {
        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Err(IoError::new(ErrorKind::Other, "not a regular file"));
        }
        Ok(meta.len())
    }

    fn open_mapping(&self, path: &Path, size: u64) -> Result<MmapHandle, MappingError> {
        let open_err = |source| MappingError::Open {
            path: path.to_path_buf(),
            source,
        };
        let map_err = |source| MappingError::Map {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(open_err)?;

        // The file may have changed between the caller's stat and now.  Mapping past the end of a file that shrank
        // faults on access, so refuse instead.
        let len = file.metadata().map_err(open_err)?.len();
        if len != size {
            return Err(map_err(IoError::new(
                ErrorKind::Other,
                format!("file changed size from {} to {} bytes", size, len),
            )));
        }

        let map = if size == 0 {
            None
        } else {
            let len = usize::try_from(size)
                .map_err(|_| map_err(IoError::new(ErrorKind::Other, "file too large to map")))?;
            // Safety: the mapping is read-only, and the cache assumes files under it are not truncated while mapped.
            let map = unsafe { MmapOptions::new().len(len).map(&file) }.map_err(map_err)?;
            self.preload(path, &map);
            Some(map)
        };

        Ok(MmapHandle {
            path: path.to_path_buf(),
            map,
            mapped_size: self.pages_for(size),
            _file: file,
        })
    }

    fn close_mapping(&self, handle: MmapHandle) -> Result<(), MappingError> {
        // memmap2 unmaps on drop and doesn't report failures, so there is nothing left to check.
        log::trace!("Unmapping {:?}", handle.path);
        drop(handle);
        Ok(())
    }
}

impl MappedRegion for MmapHandle {
    fn bytes(&self) -> &[u8] {
        match self.map {
            Some(ref m) => &m[..],
            None => &[],
        }
    }

    fn mapped_size(&self) -> u64 {
        self.mapped_size
    }
}
