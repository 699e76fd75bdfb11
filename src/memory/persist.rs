//! Cache snapshot files.
//!
//! Snapshots are plain JSON. Writes go to a sibling `.tmp` file first and are
//! renamed into place so a crash never leaves a truncated snapshot behind.

use std::path::Path;
use tokio::io::AsyncWriteExt;

use super::cache::CacheSnapshot;
use crate::error::Result;

/// Read a snapshot. A missing file is `None`, not an error.
pub async fn load_snapshot(path: &Path) -> Result<Option<CacheSnapshot>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let snapshot: CacheSnapshot = serde_json::from_slice(&bytes)?;
    tracing::debug!(
        path = %path.display(),
        entries = snapshot.entries.len(),
        "loaded cache snapshot"
    );
    Ok(Some(snapshot))
}

/// Write a snapshot atomically (tmp + rename), creating parent directories.
pub async fn save_snapshot(path: &Path, snapshot: &CacheSnapshot) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_vec_pretty(snapshot)?;
    let tmp_path = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path).await?;
    file.write_all(&json).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await?;
    tracing::debug!(
        path = %path.display(),
        entries = snapshot.entries.len(),
        "saved cache snapshot"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::cache::CacheLayer;
    use serde_json::json;
    use std::collections::HashMap;

    #[tokio::test]
    async fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_snapshot(&dir.path().join("nope.json")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn save_then_load_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        let cache = CacheLayer::new(10, 1).unwrap();
        let key = cache.store(json!("persist me"), "fact", HashMap::new(), "ci");
        cache.retrieve(&key, "ci");
        save_snapshot(&path, &cache.snapshot()).await.unwrap();
        assert!(!path.with_extension("tmp").exists());

        let snapshot = load_snapshot(&path).await.unwrap().unwrap();
        let restored = CacheLayer::new(10, 1).unwrap();
        assert_eq!(restored.restore(snapshot), 1);
        let entry = restored.peek(&key).unwrap();
        assert_eq!(entry.access_count, 1);
        assert!(restored.promotion_candidates().contains(&key));
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let err = load_snapshot(&path).await.unwrap_err();
        assert!(matches!(err, crate::Error::Serialization(_)));
    }
}
