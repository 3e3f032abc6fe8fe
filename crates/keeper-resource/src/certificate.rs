//! Leaf certificate reconciliation.

use crate::context::UnitContext;
use crate::csr::{create_csr, CsrRequest};
use crate::declaration::{expand_hostname, Certificate, IssueStrategy};
use crate::expiry::pem_needs_renewal;
use crate::outcome::{Outcome, ResourceKind, UnitReport};
use crate::san::resolve_ip_sans;
use crate::storage::{cert_path, read_optional, store_key_pair};
use crate::trigger::run_triggers;
use anyhow::{anyhow, Context, Result};
use key_keeper_secrets::openbao::{from_data, to_data, CertificateBundle, IssueRequest, PkiClient, SignRequest};
use tracing::{debug, error, info, warn};

/// Freshly issued certificate and its key, PEM-encoded.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

/// Reconcile one leaf certificate declaration.
///
/// A local certificate that is still valid past `renew_before` is left alone
/// without contacting the backend.
pub async fn reconcile_certificate(ctx: &UnitContext, cert: &Certificate) -> UnitReport {
    if is_current(ctx, cert).await {
        debug!(issuer = %ctx.issuer, name = %cert.name, "certificate is valid");
        return UnitReport::new(ResourceKind::Certificate, &cert.name, Outcome::Unchanged);
    }

    let issued = match issue(ctx, cert).await {
        Ok(issued) => issued,
        Err(e) => {
            error!(issuer = %ctx.issuer, name = %cert.name, error = %format!("{:#}", e), "issue certificate");
            return UnitReport::new(ResourceKind::Certificate, &cert.name, Outcome::Failed);
        }
    };

    let changed = match store_key_pair(&cert.host_path, &cert.name, Some(&issued.cert), Some(&issued.key)).await {
        Ok(changed) => changed,
        Err(e) => {
            error!(issuer = %ctx.issuer, name = %cert.name, error = %format!("{:#}", e), "store certificate");
            return UnitReport::new(ResourceKind::Certificate, &cert.name, Outcome::Failed);
        }
    };
    info!(issuer = %ctx.issuer, name = %cert.name, path = ?cert.host_path, "certificate issued");

    let triggers = if changed {
        run_triggers(&cert.name, &cert.trigger).await
    } else {
        Default::default()
    };
    UnitReport::new(ResourceKind::Certificate, &cert.name, Outcome::Issued).with_triggers(triggers)
}

async fn is_current(ctx: &UnitContext, cert: &Certificate) -> bool {
    let path = cert_path(&cert.host_path, &cert.name);
    match read_optional(&path).await {
        Ok(Some(pem)) => match pem_needs_renewal(&pem, cert.renew_before) {
            Ok(renew) => !renew,
            Err(e) => {
                warn!(issuer = %ctx.issuer, name = %cert.name, error = %format!("{:#}", e), "local certificate is unreadable");
                false
            }
        },
        Ok(None) => false,
        Err(e) => {
            warn!(issuer = %ctx.issuer, name = %cert.name, path = ?path, error = %e, "read local certificate");
            false
        }
    }
}

/// Obtain a new certificate according to the declaration's strategy.
pub async fn issue(ctx: &UnitContext, cert: &Certificate) -> Result<IssuedCertificate> {
    let role = cert
        .vault
        .role
        .as_deref()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| anyhow!("certificate {} has no vault.role", cert.name))?;
    let pki = PkiClient::new(&cert.vault.path);

    let common_name = if cert.spec.common_name.is_empty() {
        cert.name.clone()
    } else {
        expand_hostname(&cert.spec.common_name, &ctx.hostname)
    };
    let dns_names: Vec<String> = cert
        .spec
        .hostnames
        .iter()
        .map(|h| expand_hostname(h, &ctx.hostname))
        .collect();
    let ip_addresses = resolve_ip_sans(&cert.spec.ip_addresses, &ctx.hostname)
        .await
        .context("resolve ip addresses")?;

    match cert.vault.strategy {
        IssueStrategy::Sign => {
            let key_bits = cert.spec.private_key.ensure_rsa()?;
            let request = CsrRequest {
                common_name,
                subject: cert.spec.subject.clone(),
                dns_names,
                ip_addresses,
                key_bits,
            };
            let bundle = tokio::task::spawn_blocking(move || create_csr(&request))
                .await
                .context("csr task")??;

            let body = SignRequest {
                csr: String::from_utf8_lossy(&bundle.csr).into_owned(),
                ttl: cert.spec.ttl.clone(),
            };
            let path = pki.sign_path(role);
            let response = ctx
                .store
                .write(&path, to_data(&body)?)
                .await
                .with_context(|| format!("sign certificate with path {}", path))?
                .ok_or_else(|| anyhow!("sign certificate with path {}: empty response", path))?;
            let signed: CertificateBundle = from_data(response)?;

            Ok(IssuedCertificate {
                cert: signed.certificate.into_bytes(),
                key: bundle.key,
            })
        }
        IssueStrategy::Issue => {
            let ip_sans: Vec<String> = ip_addresses.iter().map(|ip| ip.to_string()).collect();
            let body = IssueRequest::new(&common_name, &dns_names, &ip_sans, cert.spec.ttl.clone());
            let path = pki.issue_path(role);
            let response = ctx
                .store
                .write(&path, to_data(&body)?)
                .await
                .with_context(|| format!("issue certificate with path {}", path))?
                .ok_or_else(|| anyhow!("issue certificate with path {}: empty response", path))?;
            let issued: CertificateBundle = from_data(response)?;
            let key = issued
                .private_key
                .ok_or_else(|| anyhow!("issue certificate with path {}: no private key", path))?;

            Ok(IssuedCertificate {
                cert: issued.certificate.into_bytes(),
                key: key.into_bytes(),
            })
        }
    }
}
