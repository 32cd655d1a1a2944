//! Atomic JSON file writes: write to a temp path, then rename into place.

use loomquill_core::{Error, Result};
use serde::Serialize;
use std::path::Path;

/// Serialize `value` and write it to `path` atomically: write to
/// `<path>.tmp-<nanos>-<pid>` in the same directory, then rename over `path`.
/// On any failure the temp file is removed; callers always see a clean error.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec_pretty(value)?;
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(format!(".tmp-{}-{}", nanos, std::process::id()));
    let tmp_path = path.with_file_name(tmp_name);

    if let Err(err) = tokio::fs::write(&tmp_path, &body).await {
        tokio::fs::remove_file(&tmp_path).await.ok();
        return Err(Error::Io(err));
    }
    if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
        tokio::fs::remove_file(&tmp_path).await.ok();
        return Err(Error::Io(err));
    }
    Ok(())
}

/// Read and parse a JSON file. Returns `Ok(None)` when the file is absent or
/// unparseable (read failures are not surfaced; writes are fail-fast, reads
/// degrade to "not there").
pub async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "unparseable JSON file, treating as absent");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Thing {
        n: u32,
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thing.json");
        write_json(&path, &Thing { n: 7 }).await.unwrap();
        let read: Thing = read_json(&path).await.unwrap();
        assert_eq!(read, Thing { n: 7 });
    }

    #[tokio::test]
    async fn read_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let read: Option<Thing> = read_json(&path).await;
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn read_unparseable_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let read: Option<Thing> = read_json(&path).await;
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn write_leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thing.json");
        write_json(&path, &Thing { n: 1 }).await.unwrap();
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(e) = entries.next_entry().await.unwrap() {
            names.push(e.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["thing.json"]);
    }
}
