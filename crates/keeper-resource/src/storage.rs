//! Local materialization with change detection.
//!
//! A file is only (re)written when it is missing or its bytes differ, so a
//! store of unchanged material is a no-op and reports no change.

use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Mode for certificate and public material.
pub const PUBLIC_MODE: u32 = 0o644;

/// Mode for private keys and secrets.
pub const PRIVATE_MODE: u32 = 0o600;

/// `<dir>/<name>.pem`
pub fn cert_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.pem", name))
}

/// `<dir>/<name>-key.pem`
pub fn key_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}-key.pem", name))
}

/// `<dir>/<name>.pub`
pub fn public_key_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.pub", name))
}

/// Read a file, mapping "not found" to `None`.
pub async fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write `content` unless the file already holds exactly these bytes.
///
/// Returns whether the file was written.
pub async fn write_if_changed(path: &Path, content: &[u8], mode: u32) -> Result<bool> {
    if let Ok(existing) = tokio::fs::read(path).await {
        if existing == content {
            return Ok(false);
        }
    }
    write_file(path, content, mode).await?;
    debug!(path = ?path, "file written");
    Ok(true)
}

/// Write `content` with the given mode, creating parent directories.
pub async fn write_file(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("mkdir all {:?}", dir))?;
    }
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("failed to write {:?}", path))?;
    set_mode(path, mode).await
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .with_context(|| format!("failed to set mode {:o} on {:?}", mode, path))
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Store a certificate and/or key as `<dir>/<name>.pem` and `<dir>/<name>-key.pem`.
///
/// Each half is change-detected independently; `None` leaves that file alone.
/// Returns whether anything was written.
pub async fn store_key_pair(
    dir: &Path,
    name: &str,
    cert: Option<&[u8]>,
    key: Option<&[u8]>,
) -> Result<bool> {
    if cert.is_none() && key.is_none() {
        return Ok(false);
    }
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("mkdir all {:?}", dir))?;

    let mut changed = false;
    if let Some(cert) = cert {
        changed |= write_if_changed(&cert_path(dir, name), cert, PUBLIC_MODE)
            .await
            .context("failed to save certificate")?;
    }
    if let Some(key) = key {
        changed |= write_if_changed(&key_path(dir, name), key, PRIVATE_MODE)
            .await
            .context("failed to save key file")?;
    }
    Ok(changed)
}
