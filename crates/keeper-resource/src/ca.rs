//! Root and intermediate CA reconciliation.
//!
//! A unit first decides what material it holds (read, or freshly generated)
//! and then always runs the store phase with whatever it ended up holding.
//! Nothing held means nothing is written.

use crate::context::UnitContext;
use crate::csr::parse_private_key;
use crate::declaration::{expand_hostname, Certificate, CertificateRole};
use crate::expiry::pem_needs_renewal;
use crate::outcome::{Outcome, ResourceKind, UnitReport};
use crate::storage::store_key_pair;
use crate::trigger::run_triggers;
use anyhow::{anyhow, Context, Result};
use key_keeper_secrets::openbao::{
    from_data, to_data, CertificateBundle, GenerateRequest, GeneratedCsr, KeyExport, PkiClient,
    SetSignedRequest, SignIntermediateRequest,
};
use key_keeper_secrets::{string_field, SecretData};
use serde_json::Value;
use std::fmt;
use tracing::{debug, error, info, warn};

/// PEM material of a CA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaMaterial {
    pub cert: Vec<u8>,
    /// Only known for exported-key CAs.
    pub key: Option<Vec<u8>>,
}

/// What the read phase found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaState {
    Valid,
    Absent,
    Expiring,
    Unparseable,
}

impl fmt::Display for CaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CaState::Valid => "valid",
            CaState::Absent => "absent",
            CaState::Expiring => "expiring",
            CaState::Unparseable => "unparseable",
        })
    }
}

/// KV entry holding shared material of an exported-key CA.
pub fn kv_key(cert: &Certificate) -> String {
    format!("{}-ca", cert.name)
}

/// Reconcile one CA declaration.
pub async fn reconcile_ca(ctx: &UnitContext, cert: &Certificate) -> UnitReport {
    let role = cert.role();
    let kind = match role {
        CertificateRole::RootCa => ResourceKind::RootCa,
        _ => ResourceKind::IntermediateCa,
    };

    let (mut held, state) = read_ca(ctx, cert, role).await;
    let mut decided = None;
    let mut publish = false;

    if state != CaState::Valid {
        warn!(issuer = %ctx.issuer, name = %cert.name, state = %state, "ca is not usable");

        if cert.ca.generate {
            match generate(ctx, cert, role).await {
                Ok(material) => {
                    info!(issuer = %ctx.issuer, name = %cert.name, "ca generated");
                    publish = cert.ca.exported_key;
                    held = Some(material);
                    decided = Some(Outcome::Issued);
                }
                Err(e) => {
                    error!(issuer = %ctx.issuer, name = %cert.name, error = %format!("{:#}", e), "generate ca");
                    held = None;
                    decided = Some(Outcome::Failed);
                }
            }
        } else {
            debug!(issuer = %ctx.issuer, name = %cert.name, "ca is read-only, not generating");
            if state == CaState::Unparseable {
                held = None;
            }
            decided = Some(Outcome::Skipped);
        }
    }

    store_ca(ctx, cert, kind, held, publish, decided).await
}

/// The guaranteed store phase.
async fn store_ca(
    ctx: &UnitContext,
    cert: &Certificate,
    kind: ResourceKind,
    held: Option<CaMaterial>,
    publish: bool,
    decided: Option<Outcome>,
) -> UnitReport {
    let Some(material) = held else {
        return UnitReport::new(kind, &cert.name, decided.unwrap_or(Outcome::Skipped));
    };

    let mut failed = false;
    if publish {
        if let Err(e) = publish_to_kv(ctx, cert, &material).await {
            error!(issuer = %ctx.issuer, name = %cert.name, error = %format!("{:#}", e), "share ca through kv");
            failed = true;
        }
    }

    let changed = match store_key_pair(
        &cert.host_path,
        &cert.name,
        Some(&material.cert),
        material.key.as_deref(),
    )
    .await
    {
        Ok(changed) => changed,
        Err(e) => {
            error!(issuer = %ctx.issuer, name = %cert.name, error = %format!("{:#}", e), "store ca");
            return UnitReport::new(kind, &cert.name, Outcome::Failed);
        }
    };

    let triggers = if changed {
        info!(issuer = %ctx.issuer, name = %cert.name, path = ?cert.host_path, "ca stored");
        run_triggers(&cert.name, &cert.trigger).await
    } else {
        Default::default()
    };

    let outcome = if failed {
        Outcome::Failed
    } else {
        decided.unwrap_or(if changed {
            Outcome::Stored
        } else {
            Outcome::Unchanged
        })
    };
    UnitReport::new(kind, &cert.name, outcome).with_triggers(triggers)
}

async fn publish_to_kv(ctx: &UnitContext, cert: &Certificate, material: &CaMaterial) -> Result<()> {
    let key = material
        .key
        .as_ref()
        .ok_or_else(|| anyhow!("exported-key CA returned no private key"))?;
    let mut data = SecretData::new();
    data.insert(
        "certificate".to_string(),
        Value::String(String::from_utf8_lossy(&material.cert).into_owned()),
    );
    data.insert(
        "private_key".to_string(),
        Value::String(String::from_utf8_lossy(key).into_owned()),
    );
    ctx.store
        .put(&ctx.kv_mount, &kv_key(cert), data)
        .await
        .with_context(|| format!("put {}/{}", ctx.kv_mount, kv_key(cert)))
}

/// Read existing CA material and classify it.
async fn read_ca(
    ctx: &UnitContext,
    cert: &Certificate,
    role: CertificateRole,
) -> (Option<CaMaterial>, CaState) {
    if cert.ca.exported_key {
        match ctx.store.get(&ctx.kv_mount, &kv_key(cert)).await {
            Ok(Some(entry)) => {
                if let Some(material) = material_from(&entry) {
                    return classify(material, cert);
                }
            }
            Ok(None) => {
                debug!(issuer = %ctx.issuer, name = %cert.name, "no shared ca material in kv");
            }
            Err(e) => {
                warn!(issuer = %ctx.issuer, name = %cert.name, error = %e, "read ca from kv");
            }
        }
    }

    let pki = PkiClient::new(&cert.vault.path);
    let path = match role {
        CertificateRole::RootCa => pki.ca_path(),
        _ => pki.ca_chain_path(),
    };
    match ctx.store.read(&path).await {
        Ok(Some(data)) => match material_from(&data) {
            Some(material) => classify(material, cert),
            None => (None, CaState::Absent),
        },
        Ok(None) => (None, CaState::Absent),
        Err(e) => {
            warn!(issuer = %ctx.issuer, name = %cert.name, path = %path, error = %e, "read ca");
            (None, CaState::Absent)
        }
    }
}

fn material_from(data: &SecretData) -> Option<CaMaterial> {
    let cert = string_field(data, "certificate").filter(|c| !c.trim().is_empty())?;
    let key = string_field(data, "private_key").filter(|k| !k.trim().is_empty());
    Some(CaMaterial {
        cert: cert.into_bytes(),
        key: key.map(String::into_bytes),
    })
}

fn classify(material: CaMaterial, cert: &Certificate) -> (Option<CaMaterial>, CaState) {
    if let Some(key) = &material.key {
        if parse_private_key(key).is_err() {
            return (Some(material), CaState::Unparseable);
        }
    }
    match pem_needs_renewal(&material.cert, cert.renew_before) {
        Ok(false) => (Some(material), CaState::Valid),
        Ok(true) => (Some(material), CaState::Expiring),
        Err(_) => (Some(material), CaState::Unparseable),
    }
}

async fn generate(ctx: &UnitContext, cert: &Certificate, role: CertificateRole) -> Result<CaMaterial> {
    match role {
        CertificateRole::RootCa => generate_root(ctx, cert).await,
        _ => generate_intermediate(ctx, cert).await,
    }
}

async fn generate_root(ctx: &UnitContext, cert: &Certificate) -> Result<CaMaterial> {
    let pki = PkiClient::new(&cert.vault.path);
    let common_name = if cert.spec.common_name.is_empty() {
        format!("{} Root Authority", cert.name)
    } else {
        expand_hostname(&cert.spec.common_name, &ctx.hostname)
    };
    let request = GenerateRequest {
        common_name,
        ttl: cert.spec.ttl.clone(),
    };

    let path = pki.generate_root_path(KeyExport::from_exported(cert.ca.exported_key));
    let response = ctx
        .store
        .write(&path, to_data(&request)?)
        .await
        .with_context(|| format!("generate root with path {}", path))?
        .ok_or_else(|| anyhow!("generate root with path {}: empty response", path))?;
    let bundle: CertificateBundle = from_data(response)?;

    Ok(CaMaterial {
        cert: bundle.certificate.into_bytes(),
        key: bundle.private_key.map(String::into_bytes),
    })
}

/// generate -> sign-intermediate -> set-signed; any failure aborts with
/// nothing to store.
async fn generate_intermediate(ctx: &UnitContext, cert: &Certificate) -> Result<CaMaterial> {
    let pki = PkiClient::new(&cert.vault.path);
    let root_path = cert
        .vault
        .root_ca_path
        .as_deref()
        .ok_or_else(|| anyhow!("intermediate CA without rootCaPath"))?;
    let root = PkiClient::new(root_path);
    let export = KeyExport::from_exported(cert.ca.exported_key);

    let request = GenerateRequest {
        common_name: format!("{} Intermediate Authority", cert.name),
        ttl: cert.spec.ttl.clone(),
    };
    let path = pki.generate_intermediate_path(export);
    let response = ctx
        .store
        .write(&path, to_data(&request)?)
        .await
        .context("generate")?
        .ok_or_else(|| anyhow!("generate: empty response from {}", path))?;
    let generated: GeneratedCsr = from_data(response)?;

    let request = SignIntermediateRequest::new(generated.csr, cert.spec.ttl.clone());
    let path = root.sign_intermediate_path();
    let response = ctx
        .store
        .write(&path, to_data(&request)?)
        .await
        .context("send the intermediate ca CSR to the root CA for signing")?
        .ok_or_else(|| anyhow!("sign-intermediate: empty response from {}", path))?;
    let signed: CertificateBundle = from_data(response)?;

    let request = SetSignedRequest {
        certificate: signed.certificate.clone(),
    };
    ctx.store
        .write(&pki.set_signed_path(), to_data(&request)?)
        .await
        .context("publish the signed certificate back to the intermediate ca")?;

    Ok(CaMaterial {
        cert: signed.certificate.into_bytes(),
        key: generated.private_key.map(String::into_bytes),
    })
}
