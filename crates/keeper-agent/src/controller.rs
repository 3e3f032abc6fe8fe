// SPDX-License-Identifier: Apache-2.0
//! Discovery and reconciliation loops over all issuers.

use crate::http::HealthState;
use crate::metrics::{metrics, PassTimer};
use crate::source::{ConfigSource, IssuerDeclaration};
use anyhow::Result;
use async_trait::async_trait;
use key_keeper_resource::{Issuer, PassSummary, Resources};
use key_keeper_secrets::{OpenBaoClient, OpenBaoConfig, Store};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Opens the backend connection of a named issuer.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, name: &str, config: &OpenBaoConfig) -> Result<Arc<dyn Store>>;
}

/// Connects to OpenBao/Vault with AppRole authentication.
pub struct OpenBaoConnector;

#[async_trait]
impl Connector for OpenBaoConnector {
    async fn connect(&self, name: &str, config: &OpenBaoConfig) -> Result<Arc<dyn Store>> {
        let client: Arc<dyn Store> = OpenBaoClient::connect(name, config).await?;
        Ok(client)
    }
}

/// Loop periods and per-issuer limits.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub discovery_interval: Duration,
    pub reconcile_interval: Duration,
    pub max_concurrency: usize,
    /// Substituted for `$HOSTNAME`; the local host name when unset.
    pub hostname: Option<String>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(30),
            reconcile_interval: Duration::from_secs(3600),
            max_concurrency: 32,
            hostname: None,
        }
    }
}

/// Declarations waiting for their issuer.
#[derive(Default)]
struct Pending {
    issuers: Vec<IssuerDeclaration>,
    resources: Resources,
}

pub struct Controller {
    source: Mutex<Box<dyn ConfigSource>>,
    connector: Arc<dyn Connector>,
    issuers: RwLock<HashMap<String, Arc<Issuer>>>,
    pending: Mutex<Pending>,
    options: ControllerOptions,
    health: Option<HealthState>,
    cancel: CancellationToken,
}

impl Controller {
    pub fn new(
        source: Box<dyn ConfigSource>,
        connector: Arc<dyn Connector>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            source: Mutex::new(source),
            connector,
            issuers: RwLock::new(HashMap::new()),
            pending: Mutex::new(Pending::default()),
            options,
            health: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Report readiness through the health endpoint.
    pub fn with_health(mut self, health: HealthState) -> Self {
        self.health = Some(health);
        self
    }

    /// Token that stops both loops once cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Names of the connected issuers.
    pub async fn issuer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.issuers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of resource declarations still waiting for their issuer.
    pub async fn pending_resources(&self) -> usize {
        self.pending.lock().await.resources.len()
    }

    /// Run an initial discovery pass, then both loops until cancelled.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        self.refresh().await?;
        if let Some(health) = &self.health {
            health.set_ready(true);
        }

        let discovery = tokio::spawn(self.clone().discovery_loop());
        let reconcile = tokio::spawn(self.clone().reconcile_loop());
        let (discovery, reconcile) = tokio::join!(discovery, reconcile);
        if let Err(e) = discovery {
            error!(error = %e, "discovery loop stopped");
        }
        if let Err(e) = reconcile {
            error!(error = %e, "reconciliation loop stopped");
        }

        if let Some(health) = &self.health {
            health.set_ready(false);
        }
        info!("controller stopped");
        Ok(())
    }

    async fn discovery_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.options.discovery_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        error!(error = %format!("{:#}", e), "discovery pass");
                    }
                }
            }
        }
        debug!("discovery loop finished");
    }

    async fn reconcile_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.options.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.reconcile().await;
                }
            }
        }
        debug!("reconciliation loop finished");
    }

    /// Pull new declarations, connect new issuers and route resources to them.
    ///
    /// Issuers that fail to connect and resources whose issuer is unknown are
    /// kept and retried on the next call.
    pub async fn refresh(&self) -> Result<PassSummary> {
        let config = match self.source.lock().await.next_config().await {
            Ok(config) => config,
            Err(e) => {
                metrics().discovery_total.with_label_values(&["failure"]).inc();
                return Err(e);
            }
        };
        metrics().discovery_total.with_label_values(&["success"]).inc();

        let (declarations, resources) = {
            let mut pending = self.pending.lock().await;
            let mut declarations = std::mem::take(&mut pending.issuers);
            declarations.extend(config.issuers);
            let mut resources = std::mem::take(&mut pending.resources);
            resources.extend(config.resources);
            (declarations, resources)
        };

        let mut failed = Vec::new();
        for declaration in declarations {
            if !self.register(&declaration).await {
                failed.push(declaration);
            }
        }

        let mut unrouted = Resources::default();
        let mut summary = PassSummary::default();
        for (name, batch) in resources.by_issuer() {
            let issuer = self.issuers.read().await.get(&name).cloned();
            match issuer {
                Some(issuer) => {
                    let timer = PassTimer::new(&name);
                    let pass = issuer.add_resource(batch).await;
                    timer.finish(&pass);
                    summary.merge(pass);
                }
                None => {
                    error!(issuer = %name, resources = batch.len(), "unknown issuer, keeping resources for the next pass");
                    unrouted.extend(batch);
                }
            }
        }

        {
            let mut pending = self.pending.lock().await;
            pending.issuers.extend(failed);
            pending.resources.extend(unrouted);
        }
        self.update_gauges().await;
        Ok(summary)
    }

    /// Connect and register an issuer. Returns false when it should be retried.
    async fn register(&self, declaration: &IssuerDeclaration) -> bool {
        if self.issuers.read().await.contains_key(&declaration.name) {
            warn!(issuer = %declaration.name, "issuer already registered, ignoring the new declaration");
            return true;
        }

        let store = match self.connector.connect(&declaration.name, &declaration.vault).await {
            Ok(store) => store,
            Err(e) => {
                error!(issuer = %declaration.name, error = %format!("{:#}", e), "connect issuer");
                return false;
            }
        };

        let mut issuer = Issuer::new(
            &declaration.name,
            store,
            &declaration.vault.kv.path,
            self.options.max_concurrency,
        );
        if let Some(hostname) = &self.options.hostname {
            issuer = issuer.with_hostname(hostname);
        }

        let mut issuers = self.issuers.write().await;
        if issuers.contains_key(&declaration.name) {
            warn!(issuer = %declaration.name, "issuer already registered, ignoring the new declaration");
        } else {
            info!(issuer = %declaration.name, address = %declaration.vault.address, "issuer connected");
            issuers.insert(declaration.name.clone(), Arc::new(issuer));
        }
        true
    }

    /// Run a pass on every issuer and wait for all of them.
    pub async fn reconcile(&self) -> PassSummary {
        let issuers: Vec<Arc<Issuer>> = self.issuers.read().await.values().cloned().collect();

        let mut set = JoinSet::new();
        for issuer in issuers {
            set.spawn(async move {
                let timer = PassTimer::new(issuer.name());
                let pass = issuer.check_resource().await;
                timer.finish(&pass);
                pass
            });
        }

        let mut summary = PassSummary::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pass) => summary.merge(pass),
                Err(e) => error!(error = %e, "issuer pass"),
            }
        }
        self.update_gauges().await;
        summary
    }

    async fn update_gauges(&self) {
        let issuers: Vec<Arc<Issuer>> = self.issuers.read().await.values().cloned().collect();
        let mut resources = 0;
        for issuer in &issuers {
            resources += issuer.resource_count().await;
        }
        metrics().issuers.set(issuers.len() as f64);
        metrics().resources.set(resources as f64);
    }
}
