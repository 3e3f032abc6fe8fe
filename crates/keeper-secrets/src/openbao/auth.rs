//! AppRole authentication for OpenBao.

use crate::config::{AppRoleConfig, AuthConfig, BootstrapConfig};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// AppRole login material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRoleCredentials {
    pub role_id: String,
    pub secret_id: String,
}

/// AppRole authentication handler.
///
/// Resolves the bootstrap credential and keeps the role_id/secret_id cached
/// on local disk so a restarted agent can log in without the bootstrap token.
#[derive(Debug, Clone)]
pub struct AppRoleAuth {
    bootstrap: BootstrapConfig,
    app_role: AppRoleConfig,
}

impl AppRoleAuth {
    /// Create a new AppRole auth handler.
    pub fn new(config: AuthConfig) -> Self {
        Self {
            bootstrap: config.bootstrap,
            app_role: config.app_role,
        }
    }

    /// Resolve the bootstrap token: the inline value, else the file content
    /// with the trailing newline removed.
    pub fn bootstrap_token(&self) -> Result<String> {
        if let Some(token) = self.bootstrap.token.as_ref().filter(|t| !t.is_empty()) {
            return Ok(token.clone());
        }
        let Some(path) = self.bootstrap.file.as_ref() else {
            bail!("no bootstrap token configured");
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read bootstrap token from {:?}", path))?;
        debug!(path = ?path, "loaded bootstrap token");
        Ok(content.trim_end_matches(['\n', '\r']).to_string())
    }

    /// The role_id cached on disk, if any.
    pub fn cached_role_id(&self) -> Option<String> {
        read_cached(&self.app_role.role_id_local_path)
    }

    /// The secret_id cached on disk, if any.
    pub fn cached_secret_id(&self) -> Option<String> {
        read_cached(&self.app_role.secret_id_local_path)
    }

    /// Persist a freshly fetched role_id.
    pub fn cache_role_id(&self, role_id: &str) -> Result<()> {
        write_cached(&self.app_role.role_id_local_path, role_id)
            .with_context(|| format!("save role_id to {:?}", self.app_role.role_id_local_path))
    }

    /// Persist a freshly fetched secret_id.
    pub fn cache_secret_id(&self, secret_id: &str) -> Result<()> {
        write_cached(&self.app_role.secret_id_local_path, secret_id).with_context(|| {
            format!(
                "save secret_id to {:?}",
                self.app_role.secret_id_local_path
            )
        })
    }

    /// Logical path for reading the role_id.
    pub fn role_id_path(&self) -> String {
        format!(
            "auth/{}/role/{}/role-id",
            self.mount(),
            self.app_role.name
        )
    }

    /// Logical path for generating a secret_id.
    pub fn secret_id_path(&self) -> String {
        format!(
            "auth/{}/role/{}/secret-id",
            self.mount(),
            self.app_role.name
        )
    }

    /// Logical path for the AppRole login.
    pub fn login_path(&self) -> String {
        format!("auth/{}/login", self.mount())
    }

    fn mount(&self) -> &str {
        self.app_role.path.trim_matches('/')
    }

    /// Get the role_id cache path.
    pub fn role_id_file(&self) -> &PathBuf {
        &self.app_role.role_id_local_path
    }

    /// Get the secret_id cache path.
    pub fn secret_id_file(&self) -> &PathBuf {
        &self.app_role.secret_id_local_path
    }
}

fn read_cached(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let value = content.trim().to_string();
    if value.is_empty() {
        return None;
    }
    debug!(path = ?path, "loaded cached AppRole credential");
    Some(value)
}

fn write_cached(path: &Path, value: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        std::io::Write::write_all(&mut file, value.as_bytes())
    }

    #[cfg(not(unix))]
    {
        std::fs::write(path, value)
    }
}

/// Something that can log in again and install the new token.
#[async_trait]
pub trait TokenRenewer: Send + Sync {
    /// Re-authenticate and return the TTL of the token now in use.
    async fn renew(&self) -> Result<Duration>;
}

/// Delay before re-authenticating: half the token TTL.
///
/// Returns `None` for tokens without a TTL, which never need renewal.
pub fn renewal_delay(ttl: Duration) -> Option<Duration> {
    if ttl.is_zero() {
        None
    } else {
        Some(ttl / 2)
    }
}

/// Spawn the background loop that re-authenticates at half the token TTL.
///
/// A failed renewal is logged and retried after the same delay. The loop ends
/// once the renewer is dropped.
pub fn spawn_token_renewal<R>(issuer: String, renewer: Weak<R>, initial_ttl: Duration) -> JoinHandle<()>
where
    R: TokenRenewer + 'static,
{
    tokio::spawn(async move {
        let mut ttl = initial_ttl;
        loop {
            let Some(delay) = renewal_delay(ttl) else {
                debug!(issuer = %issuer, "token has no TTL, renewal loop stopped");
                return;
            };
            tokio::time::sleep(delay).await;

            let Some(renewer) = renewer.upgrade() else {
                debug!(issuer = %issuer, "issuer dropped, renewal loop stopped");
                return;
            };
            match renewer.renew().await {
                Ok(new_ttl) => {
                    info!(issuer = %issuer, ttl_secs = new_ttl.as_secs(), "auth token renewed");
                    ttl = new_ttl;
                }
                Err(e) => {
                    warn!(issuer = %issuer, error = %e, "update auth token");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tempfile::{NamedTempFile, TempDir};

    fn auth_with(bootstrap: BootstrapConfig, dir: &TempDir) -> AppRoleAuth {
        AppRoleAuth::new(AuthConfig {
            bootstrap,
            app_role: AppRoleConfig {
                name: "node".to_string(),
                path: "approle".to_string(),
                role_id_local_path: dir.path().join("cache/role-id"),
                secret_id_local_path: dir.path().join("cache/secret-id"),
            },
        })
    }

    #[test]
    fn test_bootstrap_token_inline_wins() {
        let dir = TempDir::new().unwrap();
        let auth = auth_with(
            BootstrapConfig {
                token: Some("s.inline".to_string()),
                file: Some(PathBuf::from("/nonexistent/token")),
            },
            &dir,
        );
        assert_eq!(auth.bootstrap_token().unwrap(), "s.inline");
    }

    #[test]
    fn test_bootstrap_token_from_file_trims_newline() {
        let dir = TempDir::new().unwrap();
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "s.from-file").unwrap();

        let auth = auth_with(
            BootstrapConfig {
                token: None,
                file: Some(file.path().to_path_buf()),
            },
            &dir,
        );
        assert_eq!(auth.bootstrap_token().unwrap(), "s.from-file");
    }

    #[test]
    fn test_bootstrap_token_missing() {
        let dir = TempDir::new().unwrap();
        let auth = auth_with(BootstrapConfig::default(), &dir);
        let err = auth.bootstrap_token().unwrap_err();
        assert!(err.to_string().contains("no bootstrap token"));
    }

    #[test]
    fn test_credential_cache_round_trip() {
        let dir = TempDir::new().unwrap();
        let auth = auth_with(BootstrapConfig::default(), &dir);

        assert!(auth.cached_role_id().is_none());
        assert!(auth.cached_secret_id().is_none());

        auth.cache_role_id("role-123").unwrap();
        auth.cache_secret_id("secret-456").unwrap();

        assert_eq!(auth.cached_role_id(), Some("role-123".to_string()));
        assert_eq!(auth.cached_secret_id(), Some("secret-456".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_cached_secret_id_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let auth = auth_with(BootstrapConfig::default(), &dir);
        auth.cache_secret_id("secret-456").unwrap();

        let mode = std::fs::metadata(auth.secret_id_file())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_paths() {
        let dir = TempDir::new().unwrap();
        let auth = auth_with(BootstrapConfig::default(), &dir);
        assert_eq!(auth.role_id_path(), "auth/approle/role/node/role-id");
        assert_eq!(auth.secret_id_path(), "auth/approle/role/node/secret-id");
        assert_eq!(auth.login_path(), "auth/approle/login");
    }

    #[test]
    fn test_renewal_delay_is_half_ttl() {
        assert_eq!(
            renewal_delay(Duration::from_secs(3600)),
            Some(Duration::from_secs(1800))
        );
        assert_eq!(renewal_delay(Duration::ZERO), None);
    }

    struct RecordingRenewer {
        started: tokio::time::Instant,
        attempts: Mutex<Vec<Duration>>,
        fail_first: bool,
    }

    #[async_trait]
    impl TokenRenewer for RecordingRenewer {
        async fn renew(&self) -> Result<Duration> {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(self.started.elapsed());
            if self.fail_first && attempts.len() == 1 {
                bail!("connection refused");
            }
            Ok(Duration::from_secs(3600))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_renewal_waits_half_ttl() {
        let renewer = Arc::new(RecordingRenewer {
            started: tokio::time::Instant::now(),
            attempts: Mutex::new(Vec::new()),
            fail_first: false,
        });
        let handle = spawn_token_renewal(
            "vault-main".to_string(),
            Arc::downgrade(&renewer),
            Duration::from_secs(3600),
        );

        tokio::time::sleep(Duration::from_secs(1799)).await;
        assert!(renewer.attempts.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let attempts = renewer.attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0] >= Duration::from_secs(1800));

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_renewal_retries_on_same_cadence() {
        let renewer = Arc::new(RecordingRenewer {
            started: tokio::time::Instant::now(),
            attempts: Mutex::new(Vec::new()),
            fail_first: true,
        });
        let handle = spawn_token_renewal(
            "vault-main".to_string(),
            Arc::downgrade(&renewer),
            Duration::from_secs(600),
        );

        tokio::time::sleep(Duration::from_secs(601)).await;
        let attempts = renewer.attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0], Duration::from_secs(300));
        assert_eq!(attempts[1], Duration::from_secs(600));

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_stops_when_renewer_dropped() {
        let renewer = Arc::new(RecordingRenewer {
            started: tokio::time::Instant::now(),
            attempts: Mutex::new(Vec::new()),
            fail_first: false,
        });
        let handle = spawn_token_renewal(
            "vault-main".to_string(),
            Arc::downgrade(&renewer),
            Duration::from_secs(60),
        );
        drop(renewer);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(handle.is_finished());
    }
}
