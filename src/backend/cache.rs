use bytes::Bytes;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use tokio::fs;

use super::error::Result;

/// On-disk store of raw page bytes, one file per resource, named by the
/// SHA-256 of the resource location.
#[derive(Clone)]
pub struct PageCache {
    cache_dir: PathBuf,
}

impl PageCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = cache_dir.into();

        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            warn!("Failed to create cache directory {}: {}", cache_dir.display(), e);
        }

        Self { cache_dir }
    }

    pub fn key_for(url: &str) -> String {
        format!("{:x}", Sha256::digest(url.as_bytes()))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.cache_dir.join(key)
    }

    /// A missing or unreadable entry is just a miss; the directory may be
    /// purged from under us at any time.
    pub async fn read(&self, key: &str) -> Option<Bytes> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                debug!("Cache read for {} failed: {}", key, e);
                None
            }
        }
    }

    /// Entries are created once and never rewritten. Each writer stages its
    /// bytes in its own temporary file before linking it into place.
    pub async fn write(&self, key: &str, bytes: Bytes) -> Result<()> {
        let dir = self.cache_dir.clone();
        let path = self.path_for(key);

        let result = tokio::task::spawn_blocking(move || -> Result<()> {
            if path.exists() {
                return Ok(());
            }

            std::fs::create_dir_all(&dir)?;
            let mut staged = NamedTempFile::new_in(&dir)?;
            staged.write_all(&bytes)?;
            match staged.persist_noclobber(&path) {
                Ok(_) => Ok(()),
                Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(()),
                Err(e) => Err(e.error.into()),
            }
        })
        .await
        .map_err(std::io::Error::other)?;
        result
    }
}
