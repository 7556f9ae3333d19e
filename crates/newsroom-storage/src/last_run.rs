use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

/// Durable timestamp of the last successful fetch run, one RFC 3339 line on disk.
#[derive(Debug, Clone)]
pub struct LastRunStore {
    path: PathBuf,
}

impl LastRunStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable content means "never ran".
    pub async fn load(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading last-run file {}", self.path.display()))
            }
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        match DateTime::parse_from_rfc3339(trimmed) {
            Ok(ts) => Ok(Some(ts.with_timezone(&Utc))),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "ignoring malformed last-run timestamp");
                Ok(None)
            }
        }
    }

    /// Write via temp file + rename so readers never observe a torn value.
    pub async fn save(&self, at: DateTime<Utc>) -> anyhow::Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating last-run directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".last_run.{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp last-run file {}", temp_path.display()))?;
        file.write_all(at.to_rfc3339().as_bytes())
            .await
            .with_context(|| format!("writing temp last-run file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp last-run file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "renaming {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_means_never_ran() {
        let dir = tempdir().unwrap();
        let store = LastRunStore::new(dir.path().join("last_fetch.txt"));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn saved_timestamp_survives_a_new_handle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("last_fetch.txt");
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 0).unwrap();

        LastRunStore::new(&path).save(at).await.unwrap();
        LastRunStore::new(&path)
            .save(at + chrono::Duration::hours(2))
            .await
            .unwrap();

        let loaded = LastRunStore::new(&path).load().await.unwrap();
        assert_eq!(loaded, Some(at + chrono::Duration::hours(2)));

        let leftovers = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn garbage_content_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("last_fetch.txt");
        std::fs::write(&path, "yesterday-ish").unwrap();
        assert_eq!(LastRunStore::new(&path).load().await.unwrap(), None);
    }
}
