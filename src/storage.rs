//! On-disk store for generated CSV artifacts.

use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct ExportStorage {
    root: PathBuf,
}

impl ExportStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, file_name: &str) -> AppResult<PathBuf> {
        let plain = !file_name.is_empty()
            && file_name != "."
            && file_name != ".."
            && !file_name.contains(|c: char| matches!(c, '/' | '\\' | '\0'));
        if !plain {
            return Err(AppError::Validation(format!(
                "invalid artifact name '{}'",
                file_name
            )));
        }
        Ok(self.root.join(file_name))
    }

    /// Write an artifact, creating the directory on first use.
    #[instrument(skip(self, contents), fields(bytes = contents.len()))]
    pub async fn save(&self, file_name: &str, contents: &[u8]) -> AppResult<PathBuf> {
        let path = self.path_for(file_name)?;
        fs::create_dir_all(&self.root).await?;
        // write-then-rename
        let partial = self.root.join(format!(".{}.partial", file_name));
        fs::write(&partial, contents).await?;
        fs::rename(&partial, &path).await?;
        debug!(path = %path.display(), "artifact stored");
        Ok(path)
    }

    /// Delete an artifact. Removing one that is already gone succeeds.
    pub async fn remove(&self, file_name: &str) -> AppResult<()> {
        let path = self.path_for(file_name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read(&self, file_name: &str) -> AppResult<Vec<u8>> {
        let path = self.path_for(file_name)?;
        match fs::read(&path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("artifact {}", file_name)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Campaign name reduced to `[A-Za-z0-9_-]`.
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' => c,
            _ => '_',
        })
        .collect();
    if cleaned.is_empty() {
        "campaign".to_string()
    } else {
        cleaned
    }
}

/// File name for a campaign export generated at `at`.
pub fn artifact_name(campaign_name: &str, at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "patient-export-{}-{}-{}.csv",
        sanitize(campaign_name),
        at.format("%Y%m%dT%H%M%S"),
        &suffix[..8]
    )
}
