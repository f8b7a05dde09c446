use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use uuid::Uuid;
use walkdir::WalkDir;
use crate::profile::OutputFormat;

/// Upload and output directories with time-based retention
#[derive(Debug, Clone)]
pub struct Storage {
    upload_dir: PathBuf,
    output_dir: PathBuf,
}

impl Storage {
    pub fn new(upload_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self { upload_dir, output_dir }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.upload_dir, &self.output_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create storage directory: {}", dir.display()))?;
        }
        Ok(())
    }

    /// Unique upload location for an incoming file: `<8 hex>_<name>`
    pub fn upload_path(&self, original_name: &str) -> PathBuf {
        let unique = Uuid::new_v4().simple().to_string();
        self.upload_dir.join(format!("{}_{}", &unique[..8], sanitize_file_name(original_name)))
    }

    /// Copy an external file into the upload directory
    pub async fn ingest(&self, path: &Path) -> Result<PathBuf> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("Input path has no file name")?;
        let dest = self.upload_path(name);
        tokio::fs::copy(path, &dest)
            .await
            .with_context(|| format!("Failed to ingest {} -> {}", path.display(), dest.display()))?;
        debug!("Ingested {} as {}", path.display(), dest.display());
        Ok(dest)
    }

    /// Output location for a source: `<output_dir>/<stem>_converted.<ext>`
    pub fn target_for(&self, source: &Path, format: OutputFormat) -> PathBuf {
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .map(sanitize_file_name)
            .unwrap_or_else(|| "upload".to_string());
        self.output_dir.join(format!("{}_converted.{}", stem, format.extension()))
    }

    /// Delete regular files older than `retention` from both directories.
    /// Returns the number of files removed.
    pub fn sweep(&self, retention: Duration) -> usize {
        let now = SystemTime::now();
        let mut removed = 0;

        for root in [&self.upload_dir, &self.output_dir] {
            if !root.exists() {
                continue;
            }

            for entry in WalkDir::new(root).min_depth(1).max_depth(1).follow_links(false) {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        warn!("Error reading directory entry: {}", e);
                        continue;
                    }
                };

                if !entry.file_type().is_file() {
                    continue;
                }

                let modified = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
                    Some(m) => m,
                    None => continue,
                };
                let age = now.duration_since(modified).unwrap_or_default();
                if age <= retention {
                    continue;
                }

                match std::fs::remove_file(entry.path()) {
                    Ok(()) => {
                        removed += 1;
                        debug!("Cleaned up old file: {} (age {}s)", entry.path().display(), age.as_secs());
                    }
                    Err(e) => warn!("Error deleting file {}: {}", entry.path().display(), e),
                }
            }
        }

        if removed > 0 {
            info!("Retention sweep removed {} file(s)", removed);
        }
        removed
    }

    /// Run `sweep` every `interval` on a background task
    pub fn spawn_sweeper(&self, retention: Duration, interval: Duration) -> JoinHandle<()> {
        let storage = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            loop {
                ticker.tick().await;
                let storage = storage.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || storage.sweep(retention)).await {
                    warn!("Retention sweep panicked: {}", e);
                }
            }
        })
    }
}

/// Keep a client-supplied name to a single safe path component
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}
