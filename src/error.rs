use std::io::Error as IoError;
use std::path::PathBuf;

/// Failure of the OS-level mapping primitive.
///
/// Whatever was partially acquired before the failure (an open file, say) has already been released by the time one
/// of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("could not open {path:?} for mapping")]
    Open {
        path: PathBuf,
        #[source]
        source: IoError,
    },
    #[error("could not map {path:?} into memory")]
    Map {
        path: PathBuf,
        #[source]
        source: IoError,
    },
    #[error("could not unmap {path:?}")]
    Unmap {
        path: PathBuf,
        #[source]
        source: IoError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("{path:?} is missing or unreadable")]
    NotFound {
        path: PathBuf,
        #[source]
        source: IoError,
    },
    #[error("{path:?} is {size} bytes, over the per-file limit of {limit}")]
    SizeLimitExceeded { path: PathBuf, size: u64, limit: u64 },
    /// Eviction could not free enough of the budget. `freed` bytes were still reclaimed.
    #[error("memory budget exhausted: needed {required} bytes, could only free {freed}")]
    ResourceExhausted { required: u64, freed: u64 },
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("{path:?} was released with no outstanding references")]
    InvalidRelease { path: PathBuf },
}

impl CacheError {
    /// Whether the caller should simply fall back to reading the file directly.
    ///
    /// Platform errors aren't included; log those before degrading.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CacheError::ResourceExhausted { .. } | CacheError::SizeLimitExceeded { .. }
        )
    }
}
