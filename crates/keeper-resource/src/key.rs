//! Raw key pair reconciliation.

use crate::context::UnitContext;
use crate::csr::{generate_rsa, parse_private_key, RsaKeyPair};
use crate::declaration::Key;
use crate::outcome::{Outcome, ResourceKind, UnitReport};
use crate::storage::{cert_path, public_key_path, read_optional, write_if_changed, PRIVATE_MODE};
use anyhow::{Context, Result};
use key_keeper_secrets::{string_field, SecretData};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Where the pair of a pass came from.
enum Source {
    Shared,
    Local,
    Generated,
}

/// Reconcile one key declaration.
///
/// A pair published in KV wins; otherwise a valid local pair is kept;
/// otherwise a new pair is generated and, for public keys, published. A failed
/// publish leaves the local files untouched.
pub async fn reconcile_key(ctx: &UnitContext, key: &Key) -> UnitReport {
    match reconcile(ctx, key).await {
        Ok(outcome) => UnitReport::new(ResourceKind::Key, &key.name, outcome),
        Err(e) => {
            error!(issuer = %ctx.issuer, name = %key.name, error = %format!("{:#}", e), "reconcile key");
            UnitReport::new(ResourceKind::Key, &key.name, Outcome::Failed)
        }
    }
}

async fn reconcile(ctx: &UnitContext, key: &Key) -> Result<Outcome> {
    let (pair, source) = match shared_pair(ctx, key).await {
        Some(pair) => (pair, Source::Shared),
        None => match local_pair(&key.host_path, &key.name).await {
            Some(pair) => (pair, Source::Local),
            None => {
                let bits = key.private_key.ensure_rsa()?;
                let pair = tokio::task::spawn_blocking(move || generate_rsa(bits))
                    .await
                    .context("key generation task")??;
                info!(issuer = %ctx.issuer, name = %key.name, "key generated");
                (pair, Source::Generated)
            }
        },
    };

    if key.public && matches!(source, Source::Generated) {
        publish(ctx, key, &pair).await?;
    }

    let dir = &key.host_path;
    let mut changed = write_if_changed(&cert_path(dir, &key.name), &pair.private, PRIVATE_MODE)
        .await
        .context("failed to save private key")?;
    changed |= write_if_changed(&public_key_path(dir, &key.name), &pair.public, PRIVATE_MODE)
        .await
        .context("failed to save public key")?;

    Ok(match (source, changed) {
        (Source::Generated, _) => Outcome::Issued,
        (_, true) => Outcome::Stored,
        (_, false) => Outcome::Unchanged,
    })
}

async fn shared_pair(ctx: &UnitContext, key: &Key) -> Option<RsaKeyPair> {
    let entry = match ctx.store.get(&ctx.kv_mount, &key.name).await {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            debug!(issuer = %ctx.issuer, name = %key.name, "no shared key pair");
            return None;
        }
        Err(e) => {
            warn!(issuer = %ctx.issuer, name = %key.name, error = %format!("{:#}", e), "get key from kv");
            return None;
        }
    };
    match (string_field(&entry, "private"), string_field(&entry, "public")) {
        (Some(private), Some(public)) if !private.is_empty() && !public.is_empty() => Some(RsaKeyPair {
            private: private.into_bytes(),
            public: public.into_bytes(),
        }),
        _ => {
            warn!(issuer = %ctx.issuer, name = %key.name, "shared key pair is incomplete");
            None
        }
    }
}

async fn local_pair(dir: &Path, name: &str) -> Option<RsaKeyPair> {
    let private = read_optional(&cert_path(dir, name)).await.ok().flatten()?;
    let public = read_optional(&public_key_path(dir, name)).await.ok().flatten()?;
    parse_private_key(&private).ok()?;
    Some(RsaKeyPair { private, public })
}

async fn publish(ctx: &UnitContext, key: &Key, pair: &RsaKeyPair) -> Result<()> {
    let mut data = SecretData::new();
    data.insert(
        "private".to_string(),
        Value::String(String::from_utf8_lossy(&pair.private).into_owned()),
    );
    data.insert(
        "public".to_string(),
        Value::String(String::from_utf8_lossy(&pair.public).into_owned()),
    );
    ctx.store
        .put(&ctx.kv_mount, &key.name, data)
        .await
        .with_context(|| format!("put key {} to kv", key.name))
}
