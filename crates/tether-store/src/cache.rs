//! # AGPS Cache
//!
//! One cached almanac archive per device, stored as `<device>.agps` under a
//! cache directory.
//!
//! ## File Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  download (out of scope) ──► write() ──► <dir>/<device>.agps            │
//! │                                              │                          │
//! │                        device pull request   │ read() (≤ max_bytes)     │
//! │                                              ▼                          │
//! │                                      validated + sent                   │
//! │                                              │                          │
//! │                        delivery confirmed    │ remove()                 │
//! │                                              ▼                          │
//! │                                           (gone)                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;
use tracing::debug;

use tether_core::MAX_ARCHIVE_BYTES;

use crate::error::{StoreError, StoreResult};

const EXTENSION: &str = "agps";

/// Per-device AGPS archive files.
#[derive(Debug, Clone)]
pub struct AgpsCache {
    dir: PathBuf,
    max_bytes: u64,
}

impl AgpsCache {
    /// Creates a cache rooted at `dir` with the default 1 MiB read cap.
    /// The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        AgpsCache {
            dir: dir.into(),
            max_bytes: MAX_ARCHIVE_BYTES,
        }
    }

    /// Sets the read cap.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Path of a device's cache file.
    ///
    /// Bytes outside `[A-Za-z0-9-]` are written as `_XX` in uppercase hex,
    /// so distinct ids never share a file. A MAC address like
    /// `C3:1A:00:00:12:34` becomes `C3_3A1A_3A00_3A00_3A12_3A34.agps`.
    pub fn path_for(&self, device_id: &str) -> StoreResult<PathBuf> {
        if device_id.is_empty() {
            return Err(StoreError::InvalidDeviceId(device_id.to_string()));
        }
        let mut stem = String::with_capacity(device_id.len());
        for b in device_id.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' {
                stem.push(char::from(b));
            } else {
                stem.push_str(&format!("_{b:02X}"));
            }
        }
        Ok(self.dir.join(format!("{stem}.{EXTENSION}")))
    }

    /// Reads a device's archive.
    ///
    /// Returns `Ok(None)` if there is no file, and [`StoreError::TooLarge`]
    /// if the file is bigger than the cap. At most `max_bytes + 1` bytes are
    /// ever read, even if the file grows while being read.
    pub async fn read(&self, device_id: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.path_for(device_id)?;

        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cached archive");
                return Ok(None);
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        let mut buf = Vec::new();
        file.take(self.max_bytes + 1)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| StoreError::io(&path, e))?;

        let size = buf.len() as u64;
        if size > self.max_bytes {
            return Err(StoreError::TooLarge {
                path,
                size,
                limit: self.max_bytes,
            });
        }

        debug!(path = %path.display(), size, "Read cached archive");
        Ok(Some(buf))
    }

    /// Stores a device's archive, replacing any previous one atomically.
    pub async fn write(&self, device_id: &str, bytes: &[u8]) -> StoreResult<PathBuf> {
        let path = self.path_for(device_id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?;

        let temp = path.with_extension("tmp");
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|e| StoreError::io(&temp, e))?;
        tokio::fs::rename(&temp, &path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;

        debug!(path = %path.display(), size = bytes.len(), "Cached archive written");
        Ok(path)
    }

    /// Deletes a device's archive. Returns false if there was none.
    pub async fn remove(&self, device_id: &str) -> StoreResult<bool> {
        let path = self.path_for(device_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    pub async fn exists(&self, device_id: &str) -> StoreResult<bool> {
        let path = self.path_for(device_id)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DEVICE: &str = "C3:1A:00:00:12:34";

    #[test]
    fn test_path_sanitizes_device_id() {
        let cache = AgpsCache::new("/cache");
        assert_eq!(
            cache.path_for(DEVICE).unwrap(),
            PathBuf::from("/cache/C3_3A1A_3A00_3A00_3A12_3A34.agps")
        );
        assert_eq!(
            cache.path_for("../../etc/passwd").unwrap(),
            PathBuf::from("/cache/_2E_2E_2F_2E_2E_2Fetc_2Fpasswd.agps")
        );
        assert!(cache.path_for("").is_err());
    }

    #[tokio::test]
    async fn test_similar_ids_use_separate_files() {
        let dir = TempDir::new().unwrap();
        let cache = AgpsCache::new(dir.path());

        assert_ne!(cache.path_for("a:b").unwrap(), cache.path_for("a_b").unwrap());
        assert_ne!(cache.path_for("a_3Ab").unwrap(), cache.path_for("a:b").unwrap());

        cache.write("a:b", b"colon").await.unwrap();
        cache.write("a_b", b"underscore").await.unwrap();
        assert!(cache.remove("a:b").await.unwrap());

        assert_eq!(cache.read("a_b").await.unwrap(), Some(b"underscore".to_vec()));
        assert_eq!(cache.read("a:b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_read_remove() {
        let dir = TempDir::new().unwrap();
        let cache = AgpsCache::new(dir.path().join("agps"));

        assert_eq!(cache.read(DEVICE).await.unwrap(), None);

        cache.write(DEVICE, b"archive").await.unwrap();
        assert!(cache.exists(DEVICE).await.unwrap());
        assert_eq!(cache.read(DEVICE).await.unwrap(), Some(b"archive".to_vec()));

        assert!(cache.remove(DEVICE).await.unwrap());
        assert!(!cache.remove(DEVICE).await.unwrap());
        assert_eq!(cache.read(DEVICE).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_cap() {
        let dir = TempDir::new().unwrap();
        let cache = AgpsCache::new(dir.path()).with_max_bytes(16);

        cache.write(DEVICE, &[7u8; 16]).await.unwrap();
        assert_eq!(cache.read(DEVICE).await.unwrap().unwrap().len(), 16);

        cache.write(DEVICE, &[7u8; 17]).await.unwrap();
        let err = cache.read(DEVICE).await.unwrap_err();
        assert!(matches!(err, StoreError::TooLarge { size: 17, limit: 16, .. }));
    }

    #[tokio::test]
    async fn test_devices_are_isolated() {
        let dir = TempDir::new().unwrap();
        let cache = AgpsCache::new(dir.path());

        cache.write("band-a", b"a").await.unwrap();
        assert_eq!(cache.read("band-b").await.unwrap(), None);
        assert!(!cache.remove("band-b").await.unwrap());
        assert!(cache.exists("band-a").await.unwrap());
    }
}
