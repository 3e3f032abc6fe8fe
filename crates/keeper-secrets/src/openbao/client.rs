//! OpenBao HTTP client with retry logic.

use crate::config::OpenBaoConfig;
use crate::openbao::auth::{spawn_token_renewal, AppRoleAuth, AppRoleCredentials, TokenRenewer};
use crate::store::{string_field, SecretData};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use reqwest::{Client, ClientBuilder, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// OpenBao HTTP client for one named issuer.
///
/// Handles AppRole bootstrap, token management and API requests.
pub struct OpenBaoClient {
    http: Client,
    address: String,
    issuer: String,
    auth: AppRoleAuth,
    credentials: OnceLock<AppRoleCredentials>,
    token: Arc<RwLock<TokenState>>,
    max_retries: u32,
}

/// Token state for authentication.
#[derive(Default)]
struct TokenState {
    token: Option<String>,
    /// `None` for the static bootstrap token, which is used until login.
    expires_at: Option<Instant>,
}

impl TokenState {
    fn valid_token(&self) -> Option<String> {
        let token = self.token.as_ref()?;
        match self.expires_at {
            // Consider token invalid if it expires in less than 30 seconds
            Some(expires) if expires <= Instant::now() + Duration::from_secs(30) => None,
            _ => Some(token.clone()),
        }
    }
}

/// Generic OpenBao API response wrapper.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
    #[serde(default)]
    pub auth: Option<AuthInfo>,
}

/// Authentication info from login response.
#[derive(Debug, Deserialize)]
pub struct AuthInfo {
    pub client_token: String,
    #[serde(default)]
    pub policies: Vec<String>,
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
}

/// Non-success HTTP status from the server.
#[derive(Debug)]
pub struct StatusError {
    pub status: StatusCode,
    pub body: String,
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request failed: {} - {}", self.status, self.body)
    }
}

impl std::error::Error for StatusError {}

/// Whether an error is worth another attempt: connection problems, timeouts
/// and gateway-style server errors.
fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            return e.is_connect() || e.is_timeout();
        }
        if let Some(e) = cause.downcast_ref::<StatusError>() {
            return matches!(
                e.status,
                StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            );
        }
        false
    })
}

impl OpenBaoClient {
    /// Create a client without authenticating.
    pub fn new(issuer: &str, config: &OpenBaoConfig) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .timeout(config.timeout)
            .pool_max_idle_per_host(4);

        // Configure TLS if CA bundle is provided
        if let Some(ref ca_path) = config.ca_bundle {
            let ca_cert = std::fs::read(ca_path)
                .with_context(|| format!("failed to read CA bundle: {:?}", ca_path))?;
            let cert = reqwest::Certificate::from_pem(&ca_cert)
                .with_context(|| "failed to parse CA certificate")?;
            builder = builder.add_root_certificate(cert);
        }
        if config.tls_insecure {
            warn!(issuer = %issuer, "server certificate verification disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder.build().context("failed to build HTTP client")?;

        Ok(Self {
            http,
            address: config.address.trim_end_matches('/').to_string(),
            issuer: issuer.to_string(),
            auth: AppRoleAuth::new(config.auth.clone()),
            credentials: OnceLock::new(),
            token: Arc::new(RwLock::new(TokenState::default())),
            max_retries: config.max_retries.max(1),
        })
    }

    /// Connect an issuer: resolve AppRole credentials (fetching them with the
    /// bootstrap token when not cached), log in and start token renewal.
    pub async fn connect(issuer: &str, config: &OpenBaoConfig) -> Result<Arc<Self>> {
        let client = Arc::new(Self::new(issuer, config)?);

        let credentials = client
            .resolve_credentials()
            .await
            .with_context(|| format!("resolve AppRole credentials for issuer {}", issuer))?;
        let _ = client.credentials.set(credentials);

        let ttl = client
            .authenticate()
            .await
            .with_context(|| format!("AppRole login for issuer {}", issuer))?;

        spawn_token_renewal(issuer.to_string(), Arc::downgrade(&client), ttl);

        info!(issuer = %issuer, address = %client.address, "connected to OpenBao");
        Ok(client)
    }

    /// Resolve role_id and secret_id, each from its local cache or, failing
    /// that, from the server using the bootstrap token.
    async fn resolve_credentials(&self) -> Result<AppRoleCredentials> {
        let role_id = match self.auth.cached_role_id() {
            Some(role_id) => role_id,
            None => {
                self.use_bootstrap_token().await?;
                let response = self
                    .get_data::<SecretData>(&self.auth.role_id_path())
                    .await?
                    .ok_or_else(|| anyhow!("role_id not found at {}", self.auth.role_id_path()))?;
                let role_id = string_field(&response, "role_id")
                    .ok_or_else(|| anyhow!("no role_id in response"))?;
                self.auth.cache_role_id(&role_id)?;
                debug!(issuer = %self.issuer, "fetched and cached role_id");
                role_id
            }
        };

        let secret_id = match self.auth.cached_secret_id() {
            Some(secret_id) => secret_id,
            None => {
                self.use_bootstrap_token().await?;
                let response = self
                    .post_data::<_, SecretData>(&self.auth.secret_id_path(), &SecretData::new())
                    .await?
                    .ok_or_else(|| anyhow!("empty secret-id response"))?;
                let secret_id = string_field(&response, "secret_id")
                    .ok_or_else(|| anyhow!("no secret_id in response"))?;
                self.auth.cache_secret_id(&secret_id)?;
                debug!(issuer = %self.issuer, "generated and cached secret_id");
                secret_id
            }
        };

        Ok(AppRoleCredentials { role_id, secret_id })
    }

    async fn use_bootstrap_token(&self) -> Result<()> {
        let mut state = self.token.write().await;
        if state.token.is_none() {
            state.token = Some(self.auth.bootstrap_token()?);
            state.expires_at = None;
        }
        Ok(())
    }

    /// Authenticate with OpenBao using AppRole and return the token TTL.
    pub async fn authenticate(&self) -> Result<Duration> {
        let credentials = self
            .credentials
            .get()
            .ok_or_else(|| anyhow!("AppRole credentials not resolved"))?;

        let url = format!("{}/v1/{}", self.address, self.auth.login_path());
        let body = serde_json::json!({
            "role_id": credentials.role_id,
            "secret_id": credentials.secret_id
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("failed to send auth request")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("authentication failed: {} - {}", status, text);
        }

        let api_response: ApiResponse<serde_json::Value> =
            response.json().await.context("failed to parse auth response")?;

        let auth = api_response
            .auth
            .ok_or_else(|| anyhow!("no auth info in response"))?;
        let ttl = Duration::from_secs(auth.lease_duration);

        let mut state = self.token.write().await;
        state.token = Some(auth.client_token);
        state.expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };

        debug!(
            issuer = %self.issuer,
            policies = ?auth.policies,
            lease_duration_secs = auth.lease_duration,
            renewable = auth.renewable,
            "authenticated with OpenBao"
        );

        Ok(ttl)
    }

    /// Get a valid token, logging in again if it expired.
    pub async fn get_token(&self) -> Result<String> {
        {
            let state = self.token.read().await;
            if let Some(token) = state.valid_token() {
                return Ok(token);
            }
        }

        self.authenticate().await?;

        let state = self.token.read().await;
        state
            .valid_token()
            .ok_or_else(|| anyhow!("no token after authentication"))
    }

    /// Make an authenticated GET request.
    pub async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        self.request_with_retry(Method::GET, path, None::<()>).await
    }

    /// Make an authenticated POST request.
    pub async fn post_data<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<T>> {
        self.request_with_retry(Method::POST, path, Some(body)).await
    }

    /// Make a request with automatic retry on transient failures.
    async fn request_with_retry<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<B>,
    ) -> Result<Option<T>> {
        let mut backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.do_request(&method, path, &body).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempts >= self.max_retries || !is_transient(&e) {
                        return Err(e);
                    }

                    if let Some(delay) = backoff.next_backoff() {
                        warn!(
                            issuer = %self.issuer,
                            path = %path,
                            error = %e,
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            "retrying request after transient failure"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Execute a single request.
    async fn do_request<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &Method,
        path: &str,
        body: &Option<B>,
    ) -> Result<Option<T>> {
        let token = self.get_token().await?;
        let url = format!("{}/v1/{}", self.address, path.trim_start_matches('/'));

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header("X-Vault-Token", &token);

        if let Some(b) = body {
            request = request.json(b);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("{} {}", method, path))?;

        match response.status() {
            StatusCode::OK => {
                let api_response: ApiResponse<T> =
                    response.json().await.context("failed to parse response")?;
                Ok(api_response.data)
            }
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(None),
            StatusCode::FORBIDDEN => {
                // Token might be invalid; force a fresh login next time
                let mut state = self.token.write().await;
                if state.expires_at.is_some() {
                    state.token = None;
                    state.expires_at = None;
                }
                bail!("forbidden: {} {}: token may be invalid or insufficient permissions", method, path)
            }
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(anyhow::Error::new(StatusError { status, body: text })
                    .context(format!("{} {}", method, path)))
            }
        }
    }

    /// Get the issuer name.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Get the base address.
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl TokenRenewer for OpenBaoClient {
    async fn renew(&self) -> Result<Duration> {
        self.authenticate().await
    }
}
