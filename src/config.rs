use std::io::{Error as IoError, ErrorKind};
use std::path::{Component, Path, PathBuf};

/// Configuration of a [crate::CacheManager].  Fixed once the manager is built.
#[derive(Clone, Debug, derive_builder::Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct CacheConfig {
    /// Soft ceiling on the total bytes mapped across all files.
    #[builder(default = "512 * 1024 * 1024")]
    pub max_memory_bytes: u64,
    /// Files larger than this are never mapped.
    #[builder(default = "64 * 1024 * 1024")]
    pub max_file_size_bytes: u64,
    /// Where the asset service materializes cached copies.  Relative keys are resolved against this directory.
    #[builder(setter(into), default = "PathBuf::from(\".\")")]
    pub cache_dir: PathBuf,
    /// Reserved; content is always mapped as-is.
    #[builder(default)]
    pub compression_enabled: bool,
    /// Ask the OS to fault mapped pages in ahead of first use.
    #[builder(default)]
    pub preload_enabled: bool,
    /// Maximum number of keys held by the access tracker.
    #[builder(default = "1024")]
    pub access_tracker_capacity: usize,
}

impl CacheConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.max_memory_bytes == Some(0) {
            return Err("max_memory_bytes must be greater than zero".into());
        }
        if self.max_file_size_bytes == Some(0) {
            return Err("max_file_size_bytes must be greater than zero".into());
        }
        if self.access_tracker_capacity == Some(0) {
            return Err("access_tracker_capacity must be greater than zero".into());
        }
        Ok(())
    }
}

fn conv_path(path: &Path) -> Result<relative_path::RelativePathBuf, IoError> {
    relative_path::RelativePathBuf::from_path(path)
        .map_err(|_| IoError::new(ErrorKind::Other, "Invalid path"))
}

/// Fold `.` and `..` out of a path without touching the filesystem.  `..` at the root stays at the root.
fn normalize_logical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            c => out.push(c),
        }
    }
    out
}

impl CacheConfig {
    /// Turn a caller-supplied path into the key the cache identifies a mapping by.
    ///
    /// Relative paths are resolved under `cache_dir`, and may not use `..` to climb out of it.  Either way, `.` and
    /// `..` are folded out logically, so every spelling of a file gets the same key.  Symlinks are not followed.
    pub fn resolve_key(&self, path: &Path) -> Result<PathBuf, IoError> {
        if path.is_absolute() {
            return Ok(normalize_logical(path));
        }

        // Go via `RelativePathBuf` so that `..` is handled the same way on every platform.
        let absolute = conv_path(path)?.to_logical_path(&self.cache_dir);
        if !absolute.starts_with(&self.cache_dir) {
            return Err(IoError::new(
                ErrorKind::Other,
                "path is outside the cache directory",
            ));
        }
        Ok(normalize_logical(&absolute))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = CacheConfigBuilder::default().build().expect("Should build");
        assert_eq!(cfg.max_memory_bytes, 512 * 1024 * 1024);
        assert_eq!(cfg.max_file_size_bytes, 64 * 1024 * 1024);
        assert_eq!(cfg.cache_dir, PathBuf::from("."));
        assert!(!cfg.compression_enabled);
        assert!(!cfg.preload_enabled);
        assert_eq!(cfg.access_tracker_capacity, 1024);
    }

    #[test]
    fn test_validation() {
        assert!(CacheConfigBuilder::default()
            .max_memory_bytes(0)
            .build()
            .is_err());
        assert!(CacheConfigBuilder::default()
            .max_file_size_bytes(0)
            .build()
            .is_err());
        assert!(CacheConfigBuilder::default()
            .access_tracker_capacity(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_resolve_key() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let mut root = tmp_dir.path().to_path_buf();
        root.push("assets");
        let cfg = CacheConfigBuilder::default()
            .cache_dir(root.clone())
            .build()
            .unwrap();

        assert_eq!(
            cfg.resolve_key(Path::new("textures/a.dds")).unwrap(),
            root.join("textures").join("a.dds")
        );
        // Climbing back into the root is fine.
        assert_eq!(
            cfg.resolve_key(Path::new("textures/../b.ogg")).unwrap(),
            root.join("b.ogg")
        );
        // Escaping it isn't.
        let err = cfg.resolve_key(Path::new("../outside")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);

        // Absolute paths may be anywhere, but are folded the same way.
        let outside = tmp_dir.path().join("outside");
        assert_eq!(cfg.resolve_key(&outside).unwrap(), outside);
        assert_eq!(
            cfg.resolve_key(&root.join("sub").join("..").join(".").join("a"))
                .unwrap(),
            root.join("a")
        );
        assert_eq!(
            cfg.resolve_key(&root.join("a")).unwrap(),
            cfg.resolve_key(Path::new("sub/../a")).unwrap()
        );
    }

    #[test]
    fn test_resolve_key_non_normalized_root() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let root = tmp_dir.path().join("x").join("..").join("assets");
        let cfg = CacheConfigBuilder::default()
            .cache_dir(root)
            .build()
            .unwrap();

        let expected = tmp_dir.path().join("assets").join("a");
        assert_eq!(cfg.resolve_key(Path::new("a")).unwrap(), expected);
        assert_eq!(cfg.resolve_key(&expected).unwrap(), expected);
    }

    #[test]
    fn test_normalize_logical() {
        assert_eq!(
            normalize_logical(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
        assert_eq!(normalize_logical(Path::new("/../a")), PathBuf::from("/a"));
    }
}
