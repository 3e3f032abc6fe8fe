//! Per-issuer resource registry and reconciliation passes.

use crate::ca::reconcile_ca;
use crate::certificate::reconcile_certificate;
use crate::context::UnitContext;
use crate::declaration::{Certificate, CertificateRole, Key, Resources, Secret};
use crate::key::reconcile_key;
use crate::outcome::{Outcome, PassSummary, ResourceKind, UnitReport};
use crate::san::local_hostname;
use crate::secret::reconcile_secret;
use key_keeper_secrets::Store;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Declarations owned by one issuer, keyed by name.
#[derive(Debug, Clone, Default)]
struct Registry {
    certificates: BTreeMap<String, Certificate>,
    keys: BTreeMap<String, Key>,
    secrets: BTreeMap<String, Secret>,
}

impl Registry {
    fn len(&self) -> usize {
        self.certificates.len() + self.keys.len() + self.secrets.len()
    }
}

/// One reconciliation unit, holding a snapshot of its declaration.
enum Unit {
    Ca(Certificate),
    Certificate(Certificate),
    Key(Key),
    Secret(Secret),
}

impl Unit {
    fn kind(&self) -> ResourceKind {
        match self {
            Unit::Ca(cert) if cert.role() == CertificateRole::RootCa => ResourceKind::RootCa,
            Unit::Ca(_) => ResourceKind::IntermediateCa,
            Unit::Certificate(_) => ResourceKind::Certificate,
            Unit::Key(_) => ResourceKind::Key,
            Unit::Secret(_) => ResourceKind::Secret,
        }
    }

    fn name(&self) -> &str {
        match self {
            Unit::Ca(cert) | Unit::Certificate(cert) => &cert.name,
            Unit::Key(key) => &key.name,
            Unit::Secret(secret) => &secret.name,
        }
    }

    async fn reconcile(self, ctx: &UnitContext) -> UnitReport {
        match self {
            Unit::Ca(cert) => reconcile_ca(ctx, &cert).await,
            Unit::Certificate(cert) => reconcile_certificate(ctx, &cert).await,
            Unit::Key(key) => reconcile_key(ctx, &key).await,
            Unit::Secret(secret) => reconcile_secret(ctx, &secret).await,
        }
    }
}

/// A named backend connection and the resources assigned to it.
pub struct Issuer {
    ctx: UnitContext,
    registry: RwLock<Registry>,
    permits: Arc<Semaphore>,
    /// One guard per declaration. A unit still running from an earlier pass
    /// is skipped instead of waited for.
    in_flight: Mutex<HashMap<(ResourceKind, String), Arc<Mutex<()>>>>,
}

impl Issuer {
    pub fn new(name: &str, store: Arc<dyn Store>, kv_mount: &str, max_concurrency: usize) -> Self {
        Self {
            ctx: UnitContext {
                issuer: name.to_string(),
                store,
                kv_mount: kv_mount.trim_matches('/').to_string(),
                hostname: local_hostname(),
            },
            registry: RwLock::new(Registry::default()),
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Override the host name substituted for `$HOSTNAME`.
    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.ctx.hostname = hostname.to_string();
        self
    }

    pub fn name(&self) -> &str {
        &self.ctx.issuer
    }

    /// Number of registered declarations.
    pub async fn resource_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Merge declarations into the registry (a redeclared name replaces the
    /// previous one) and run a pass.
    pub async fn add_resource(&self, resources: Resources) -> PassSummary {
        {
            let mut registry = self.registry.write().await;
            for cert in resources.certificates {
                if let Err(e) = cert.validate() {
                    error!(issuer = %self.name(), error = %e, "invalid certificate declaration");
                    continue;
                }
                debug!(issuer = %self.name(), name = %cert.name, "certificate registered");
                registry.certificates.insert(cert.name.clone(), cert);
            }
            for key in resources.keys {
                if key.name.is_empty() {
                    error!(issuer = %self.name(), "key declaration without a name");
                    continue;
                }
                registry.keys.insert(key.name.clone(), key);
            }
            for secret in resources.secrets {
                if secret.name.is_empty() || secret.key.is_empty() {
                    error!(issuer = %self.name(), name = %secret.name, "secret declaration needs a name and a key");
                    continue;
                }
                registry.secrets.insert(secret.name.clone(), secret);
            }
        }
        self.check_resource().await
    }

    /// Reconcile every registered declaration and return once all units are
    /// done.
    ///
    /// Units run concurrently within a group, bounded by the issuer's permit
    /// count. Groups run in order: root CAs, intermediate CAs, leaf
    /// certificates, then keys and secrets. Passes never wait for each other:
    /// a declaration another pass is still reconciling is reported as
    /// skipped.
    pub async fn check_resource(&self) -> PassSummary {
        let snapshot = self.registry.read().await.clone();

        let mut roots = Vec::new();
        let mut intermediates = Vec::new();
        let mut leaves = Vec::new();
        for cert in snapshot.certificates.into_values() {
            match cert.role() {
                CertificateRole::RootCa => roots.push(Unit::Ca(cert)),
                CertificateRole::IntermediateCa => intermediates.push(Unit::Ca(cert)),
                CertificateRole::Leaf => leaves.push(Unit::Certificate(cert)),
            }
        }
        let mut rest: Vec<Unit> = snapshot.keys.into_values().map(Unit::Key).collect();
        rest.extend(snapshot.secrets.into_values().map(Unit::Secret));

        let mut summary = PassSummary::default();
        for group in [roots, intermediates, leaves, rest] {
            if group.is_empty() {
                continue;
            }
            summary.reports.extend(self.run_group(group).await);
        }

        if summary.count(Outcome::Failed) > 0 {
            warn!(issuer = %self.name(), summary = %summary, "reconciliation pass finished with failures");
        } else {
            info!(issuer = %self.name(), summary = %summary, "reconciliation pass finished");
        }
        summary
    }

    /// Take the guard of one declaration, or `None` while another pass holds
    /// it.
    async fn claim(&self, kind: ResourceKind, name: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = self
            .in_flight
            .lock()
            .await
            .entry((kind, name.to_string()))
            .or_default()
            .clone();
        lock.try_lock_owned().ok()
    }

    /// Run a group of units and wait for all of them.
    async fn run_group(&self, units: Vec<Unit>) -> Vec<UnitReport> {
        let expected: Vec<(ResourceKind, String)> = units
            .iter()
            .map(|unit| (unit.kind(), unit.name().to_string()))
            .collect();

        let mut reports = Vec::with_capacity(expected.len());
        let mut set = JoinSet::new();
        for unit in units {
            let Some(guard) = self.claim(unit.kind(), unit.name()).await else {
                debug!(issuer = %self.name(), name = %unit.name(), "still reconciling from an earlier pass");
                reports.push(UnitReport::new(unit.kind(), unit.name(), Outcome::Skipped));
                continue;
            };
            let ctx = self.ctx.clone();
            let permits = self.permits.clone();
            set.spawn(async move {
                let _guard = guard;
                let _permit = permits.acquire_owned().await;
                unit.reconcile(&ctx).await
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!(issuer = %self.name(), error = %e, "reconciliation task"),
            }
        }

        // A unit that panicked never reported back.
        let reported: HashSet<(ResourceKind, String)> = reports
            .iter()
            .map(|r| (r.kind, r.name.clone()))
            .collect();
        for (kind, name) in expected {
            if !reported.contains(&(kind, name.clone())) {
                reports.push(UnitReport::new(kind, &name, Outcome::Failed));
            }
        }
        reports
    }
}
