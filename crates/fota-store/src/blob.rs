//! Firmware blob store implementations

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use fota_core::{BlobGateway, GatewayError, GatewayResult};
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::warn;

// =============================================================================
// Filesystem store
// =============================================================================

/// Firmware images on the local filesystem.
///
/// Locations are resolved as follows:
/// - `file:///abs/path` and absolute paths are used as-is
/// - `scheme://host/container/a/b.hex` maps to `<root>/a/b.hex`
///   (the first path segment names the container and is dropped)
/// - anything else is relative to `<root>`
///
/// Relative locations may not escape the root with `..`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a catalog location onto a filesystem path
    pub fn resolve(&self, location: &str) -> GatewayResult<PathBuf> {
        let location = location.trim();
        if location.is_empty() {
            return Err(GatewayError::InvalidLocation("empty location".to_string()));
        }

        if let Some(path) = location.strip_prefix("file://") {
            return Ok(PathBuf::from(path));
        }

        let relative = match location.split_once("://") {
            Some((_, rest)) => blob_name_from_url(rest)
                .ok_or_else(|| GatewayError::InvalidLocation(location.to_string()))?,
            None => {
                let path = Path::new(location);
                if path.is_absolute() {
                    return Ok(path.to_path_buf());
                }
                location.to_string()
            }
        };

        let relative = Path::new(&relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(GatewayError::InvalidLocation(location.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

/// `host/container/a/b.hex?sig` -> `a/b.hex`
fn blob_name_from_url(after_scheme: &str) -> Option<String> {
    let path = after_scheme.split_once('/').map(|(_, p)| p)?;
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [] => None,
        [only] => Some((*only).to_string()),
        [_container, rest @ ..] => Some(rest.join("/")),
    }
}

#[async_trait]
impl BlobGateway for FsBlobStore {
    async fn read_range(
        &self,
        location: &str,
        offset: u64,
        len: usize,
    ) -> GatewayResult<Option<Bytes>> {
        let path = self.resolve(location)?;
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Firmware image unreadable");
                return Ok(None);
            }
        };

        let size = file.metadata().await?.len();
        if offset >= size || len == 0 {
            return Ok(None);
        }

        file.seek(SeekFrom::Start(offset)).await?;
        let want = len.min((size - offset) as usize);
        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);

        if buf.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Bytes::from(buf)))
        }
    }

    async fn size(&self, location: &str) -> GatewayResult<u64> {
        let path = self.resolve(location)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    GatewayError::BlobNotFound(path.display().to_string())
                }
                _ => GatewayError::Storage(e.to_string()),
            })?;
        Ok(meta.len())
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Firmware images held in memory, keyed by exact location string
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, location: impl Into<String>, data: impl Into<Bytes>) {
        self.blobs.write().insert(location.into(), data.into());
    }
}

#[async_trait]
impl BlobGateway for MemoryBlobStore {
    async fn read_range(
        &self,
        location: &str,
        offset: u64,
        len: usize,
    ) -> GatewayResult<Option<Bytes>> {
        let blobs = self.blobs.read();
        let Some(data) = blobs.get(location) else {
            return Ok(None);
        };
        let size = data.len() as u64;
        if offset >= size || len == 0 {
            return Ok(None);
        }
        let start = offset as usize;
        let end = start.saturating_add(len).min(data.len());
        Ok(Some(data.slice(start..end)))
    }

    async fn size(&self, location: &str) -> GatewayResult<u64> {
        self.blobs
            .read()
            .get(location)
            .map(|data| data.len() as u64)
            .ok_or_else(|| GatewayError::BlobNotFound(location.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolve_locations() {
        let store = FsBlobStore::new("/srv/firmware");
        assert_eq!(
            store.resolve("ecm/1.2.0.hex").unwrap(),
            PathBuf::from("/srv/firmware/ecm/1.2.0.hex")
        );
        assert_eq!(
            store.resolve("file:///tmp/ecm.hex").unwrap(),
            PathBuf::from("/tmp/ecm.hex")
        );
        assert_eq!(
            store
                .resolve("https://acct.blob.core.windows.net/hexfiles/ECM_1.2.0_abc.hex?sv=1")
                .unwrap(),
            PathBuf::from("/srv/firmware/ECM_1.2.0_abc.hex")
        );
        assert_eq!(
            store.resolve("/opt/images/tcm.hex").unwrap(),
            PathBuf::from("/opt/images/tcm.hex")
        );
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let store = FsBlobStore::new("/srv/firmware");
        assert!(matches!(
            store.resolve("../etc/passwd"),
            Err(GatewayError::InvalidLocation(_))
        ));
        assert!(matches!(
            store.resolve("https://host/container/../../x"),
            Err(GatewayError::InvalidLocation(_))
        ));
        assert!(store.resolve("  ").is_err());
    }

    #[tokio::test]
    async fn test_fs_read_range() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        std::fs::write(dir.path().join("ecm.hex"), &data).unwrap();
        let store = FsBlobStore::new(dir.path());

        assert_eq!(store.size("ecm.hex").await.unwrap(), 10_000);

        let chunk = store.read_range("ecm.hex", 8192, 8192).await.unwrap().unwrap();
        assert_eq!(chunk.len(), 10_000 - 8192);
        assert_eq!(&chunk[..], &data[8192..]);

        assert!(store.read_range("ecm.hex", 10_000, 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fs_missing_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store.read_range("missing.hex", 0, 16).await.unwrap().is_none());
        assert!(matches!(
            store.size("missing.hex").await,
            Err(GatewayError::BlobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryBlobStore::new();
        store.insert("ecm", vec![7u8; 100]);
        assert_eq!(store.size("ecm").await.unwrap(), 100);
        assert_eq!(store.read_range("ecm", 90, 50).await.unwrap().unwrap().len(), 10);
        assert!(store.read_range("ecm", 100, 1).await.unwrap().is_none());
        assert!(store.read_range("tcm", 0, 1).await.unwrap().is_none());
        assert!(store.size("tcm").await.is_err());
    }
}
