// src/core/fs_ops.rs
//! File system helpers for state files and the repairable fetcher source

use anyhow::{Context, Result};
use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

pub struct FsOps;

impl FsOps {
    pub async fn ensure_dir_exists(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)
                .await
                .with_context(|| format!("Failed to create directory: {}", path.display()))?;
            info!("Created directory: {}", path.display());
        }
        Ok(())
    }

    pub async fn read_file_safe(path: &Path) -> Result<String> {
        fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read file: {}", path.display()))
    }

    /// Write through a sibling temp file and rename it over the target, so a
    /// reader sees either the old content or the new one
    pub async fn write_file_atomic(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            Self::ensure_dir_exists(parent).await?;
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("Target path has no file name")?;
        let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

        fs::write(&tmp_path, content)
            .await
            .with_context(|| format!("Failed to write file: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).await.with_context(|| {
            format!(
                "Failed to move {} into place at {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }

    /// Copy `path` to `<name>.<YYYYmmdd_HHMMSS>.bak` next to it.
    ///
    /// Returns once the copy is on disk.
    pub async fn backup_file(path: &Path) -> Result<PathBuf> {
        if !path.exists() {
            anyhow::bail!("File to backup does not exist: {}", path.display());
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file");
        let mut backup_path = path.with_file_name(format!(
            "{}.{}.bak",
            file_name,
            Local::now().format("%Y%m%d_%H%M%S")
        ));
        // two repairs inside one second must not clobber the first backup
        let mut attempt = 1;
        while backup_path.exists() {
            backup_path = path.with_file_name(format!(
                "{}.{}-{}.bak",
                file_name,
                Local::now().format("%Y%m%d_%H%M%S"),
                attempt
            ));
            attempt += 1;
        }

        fs::copy(path, &backup_path).await.with_context(|| {
            format!(
                "Failed to copy {} to {}",
                path.display(),
                backup_path.display()
            )
        })?;

        info!("Backed up {} to {}", path.display(), backup_path.display());
        Ok(backup_path)
    }

    /// Concatenate the text of every regular file in `dir`, each under a
    /// `--- File: name ---` header. A missing directory yields an empty string.
    pub async fn read_dir_texts(dir: &Path) -> Result<String> {
        let mut content = String::new();
        if !dir.exists() {
            warn!("Directory {} not found", dir.display());
            return Ok(content);
        }

        let mut entries = fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            match fs::read(&path).await {
                Ok(bytes) => {
                    let name = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or_default();
                    content.push_str(&format!("\n--- File: {} ---\n", name));
                    content.push_str(&String::from_utf8_lossy(&bytes));
                }
                Err(e) => warn!("Error reading {}: {}", path.display(), e),
            }
        }

        Ok(content)
    }
}
