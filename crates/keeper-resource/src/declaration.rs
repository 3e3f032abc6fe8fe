//! Declarative resource types as they appear in configuration files.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Placeholder substituted with the local host name in names and lookups.
pub const HOSTNAME_PLACEHOLDER: &str = "$HOSTNAME";

/// Reference to the issuer that owns a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerRef {
    pub name: String,
}

/// A certificate: root CA, intermediate CA or leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub name: String,

    pub issuer_ref: IssuerRef,

    #[serde(default)]
    pub is_ca: bool,

    /// CA behaviour; only meaningful when `is_ca` is set.
    #[serde(default)]
    pub ca: CaSpec,

    #[serde(default)]
    pub spec: CertificateSpec,

    /// Directory the certificate and key are written to.
    pub host_path: PathBuf,

    pub vault: VaultPaths,

    /// Commands run after the on-disk material changed.
    #[serde(default)]
    pub trigger: Vec<String>,

    /// Renew once the remaining validity drops below this.
    #[serde(default, with = "humantime_serde")]
    pub renew_before: Duration,
}

/// Which part of the CA chain a certificate declaration describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateRole {
    RootCa,
    IntermediateCa,
    Leaf,
}

impl Certificate {
    pub fn role(&self) -> CertificateRole {
        if !self.is_ca {
            return CertificateRole::Leaf;
        }
        match self.vault.root_ca_path.as_deref() {
            Some(root) if !root.is_empty() && trim(root) != trim(&self.vault.path) => {
                CertificateRole::IntermediateCa
            }
            _ => CertificateRole::RootCa,
        }
    }

    /// Reject declarations that can never reconcile.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("certificate without a name");
        }
        if self.vault.path.is_empty() {
            bail!("certificate {}: vault.path is required", self.name);
        }
        if !self.is_ca && self.vault.role.as_deref().unwrap_or_default().is_empty() {
            bail!("certificate {}: vault.role is required for a leaf certificate", self.name);
        }
        Ok(())
    }
}

fn trim(path: &str) -> &str {
    path.trim_matches('/')
}

/// CA generation switches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaSpec {
    /// Create the CA when it is absent, unparseable or expiring. A CA without
    /// this flag is read-only and sourced from whoever creates it.
    #[serde(default)]
    pub generate: bool,

    /// Have the engine return the CA private key, which is then shared via KV.
    #[serde(default)]
    pub exported_key: bool,
}

/// Subject, SANs, key and lifetime of a certificate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    #[serde(default)]
    pub common_name: String,

    #[serde(default)]
    pub subject: Subject,

    #[serde(default)]
    pub private_key: PrivateKeySpec,

    /// Accepted and ignored. Key usages come from the engine role.
    #[serde(default)]
    pub usages: Vec<String>,

    /// DNS SANs.
    #[serde(default)]
    pub hostnames: Vec<String>,

    #[serde(default)]
    pub ip_addresses: IpAddresses,

    /// Requested lifetime, passed verbatim to the engine (e.g. "720h").
    #[serde(default)]
    pub ttl: Option<String>,
}

/// Distinguished name fields beyond the common name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub localities: Vec<String>,
    #[serde(default)]
    pub organizational_units: Vec<String>,
    #[serde(default)]
    pub organizations: Vec<String>,
    #[serde(default)]
    pub postal_codes: Vec<String>,
    #[serde(default)]
    pub provinces: Vec<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub street_addresses: Vec<String>,
}

/// Private key parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateKeySpec {
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    #[serde(default = "default_encoding")]
    pub encoding: String,

    #[serde(default = "default_key_size")]
    pub size: u32,
}

impl Default for PrivateKeySpec {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            encoding: default_encoding(),
            size: default_key_size(),
        }
    }
}

impl PrivateKeySpec {
    /// Only RSA keys in PKCS#1 encoding can be generated locally.
    pub fn ensure_rsa(&self) -> Result<u32> {
        if !self.algorithm.eq_ignore_ascii_case("rsa") {
            bail!("unsupported key algorithm {:?}", self.algorithm);
        }
        if !self.encoding.eq_ignore_ascii_case("pkcs1") {
            bail!("unsupported key encoding {:?}", self.encoding);
        }
        Ok(self.size)
    }
}

/// Sources of IP SANs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpAddresses {
    /// Literal addresses.
    #[serde(default, rename = "static")]
    pub static_ips: Vec<String>,

    /// Regular expressions matched against local interface names.
    #[serde(default)]
    pub interfaces: Vec<String>,

    /// Host names resolved through DNS.
    #[serde(default)]
    pub dns_lookup: Vec<String>,
}

impl IpAddresses {
    pub fn is_empty(&self) -> bool {
        self.static_ips.is_empty() && self.interfaces.is_empty() && self.dns_lookup.is_empty()
    }
}

/// How a leaf certificate is obtained from the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStrategy {
    /// Build the key and CSR locally and have `<path>/sign/<role>` sign it.
    #[default]
    Sign,
    /// Let `<path>/issue/<role>` generate key and certificate.
    Issue,
}

/// Engine paths for a certificate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultPaths {
    /// PKI mount of this certificate (the CA mount for a CA).
    pub path: String,

    /// Role used to sign or issue a leaf certificate.
    #[serde(default)]
    pub role: Option<String>,

    /// Mount of the root CA that signs an intermediate.
    #[serde(default)]
    pub root_ca_path: Option<String>,

    #[serde(default)]
    pub strategy: IssueStrategy,
}

/// A raw key pair, optionally shared between hosts through KV.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    pub name: String,

    pub issuer_ref: IssuerRef,

    #[serde(default)]
    pub private_key: PrivateKeySpec,

    /// Publish a generated pair to KV so other hosts pick up the same one.
    #[serde(default)]
    pub public: bool,

    /// Directory the `.pem`/`.pub` files are written to.
    pub host_path: PathBuf,
}

/// An opaque secret copied from KV to a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    /// KV entry name.
    pub name: String,

    pub issuer_ref: IssuerRef,

    /// Field of the KV entry to extract.
    pub key: String,

    /// File the value is written to.
    pub host_path: PathBuf,
}

/// A batch of resource declarations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    #[serde(default)]
    pub certificates: Vec<Certificate>,

    #[serde(default)]
    pub keys: Vec<Key>,

    #[serde(default)]
    pub secrets: Vec<Secret>,
}

impl Resources {
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty() && self.keys.is_empty() && self.secrets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.certificates.len() + self.keys.len() + self.secrets.len()
    }

    /// Append another batch.
    pub fn extend(&mut self, other: Resources) {
        self.certificates.extend(other.certificates);
        self.keys.extend(other.keys);
        self.secrets.extend(other.secrets);
    }

    /// Split by owning issuer name.
    pub fn by_issuer(self) -> Vec<(String, Resources)> {
        let mut grouped: Vec<(String, Resources)> = Vec::new();
        fn slot<'a>(grouped: &'a mut Vec<(String, Resources)>, name: &str) -> &'a mut Resources {
            let index = match grouped.iter().position(|(n, _)| n == name) {
                Some(index) => index,
                None => {
                    grouped.push((name.to_string(), Resources::default()));
                    grouped.len() - 1
                }
            };
            &mut grouped[index].1
        }

        for cert in self.certificates {
            let name = cert.issuer_ref.name.clone();
            slot(&mut grouped, &name).certificates.push(cert);
        }
        for key in self.keys {
            let name = key.issuer_ref.name.clone();
            slot(&mut grouped, &name).keys.push(key);
        }
        for secret in self.secrets {
            let name = secret.issuer_ref.name.clone();
            slot(&mut grouped, &name).secrets.push(secret);
        }
        grouped
    }
}

/// Replace the host name placeholder.
pub fn expand_hostname(value: &str, hostname: &str) -> String {
    value.replace(HOSTNAME_PLACEHOLDER, hostname)
}

fn default_algorithm() -> String {
    "rsa".to_string()
}

fn default_encoding() -> String {
    "pkcs1".to_string()
}

fn default_key_size() -> u32 {
    2048
}

#[cfg(test)]
mod tests {
    use super::*;

    const CERTIFICATES: &str = r#"
certificates:
  - name: web-ica
    issuerRef:
      name: vault-main
    isCa: true
    ca:
      generate: true
      exportedKey: true
    spec:
      ttl: 8760h
    hostPath: /etc/pki/web
    vault:
      path: pki-web
      rootCaPath: pki-root
    renewBefore: 720h
  - name: web
    issuerRef:
      name: vault-main
    spec:
      commonName: $HOSTNAME.example.com
      subject:
        organizations: [example]
        countries: [NL]
      privateKey:
        size: 4096
      hostnames: [$HOSTNAME, web.example.com]
      ipAddresses:
        static: [10.0.0.1]
        interfaces: ["^eth[0-9]+$"]
        dnsLookup: [db.example.com]
      ttl: 720h
    hostPath: /etc/pki/web
    vault:
      path: pki-web
      role: web
      strategy: issue
    trigger:
      - systemctl reload nginx
    renewBefore: 48h
secrets:
  - name: svc-secret
    issuerRef:
      name: vault-main
    key: token
    hostPath: /etc/svc/token
"#;

    #[test]
    fn test_parse_certificates() {
        let resources: Resources = serde_yaml::from_str(CERTIFICATES).unwrap();
        assert_eq!(resources.certificates.len(), 2);
        assert_eq!(resources.secrets.len(), 1);

        let ica = &resources.certificates[0];
        assert_eq!(ica.role(), CertificateRole::IntermediateCa);
        assert!(ica.ca.generate);
        assert!(ica.ca.exported_key);
        assert_eq!(ica.renew_before, Duration::from_secs(720 * 3600));
        assert!(ica.validate().is_ok());

        let leaf = &resources.certificates[1];
        assert_eq!(leaf.role(), CertificateRole::Leaf);
        assert_eq!(leaf.vault.strategy, IssueStrategy::Issue);
        assert_eq!(leaf.spec.private_key.size, 4096);
        assert_eq!(leaf.spec.private_key.algorithm, "rsa");
        assert_eq!(leaf.spec.ip_addresses.static_ips, vec!["10.0.0.1"]);
        assert_eq!(leaf.spec.ip_addresses.dns_lookup, vec!["db.example.com"]);
        assert_eq!(leaf.trigger, vec!["systemctl reload nginx"]);
        assert_eq!(leaf.spec.subject.countries, vec!["NL"]);
    }

    #[test]
    fn test_root_ca_role() {
        let yaml = r#"
name: root
issuerRef: {name: vault-main}
isCa: true
hostPath: /etc/pki/root
vault: {path: pki-root, rootCaPath: /pki-root/}
"#;
        let cert: Certificate = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cert.role(), CertificateRole::RootCa);
        assert_eq!(cert.renew_before, Duration::ZERO);
        assert!(!cert.ca.generate);
    }

    #[test]
    fn test_leaf_requires_role() {
        let yaml = r#"
name: web
issuerRef: {name: vault-main}
hostPath: /etc/pki/web
vault: {path: pki-web}
"#;
        let cert: Certificate = serde_yaml::from_str(yaml).unwrap();
        let err = cert.validate().unwrap_err();
        assert!(err.to_string().contains("vault.role"));
    }

    #[test]
    fn test_by_issuer_groups_resources() {
        let mut resources: Resources = serde_yaml::from_str(CERTIFICATES).unwrap();
        resources.secrets.push(Secret {
            name: "other".to_string(),
            issuer_ref: IssuerRef {
                name: "ghost".to_string(),
            },
            key: "value".to_string(),
            host_path: PathBuf::from("/tmp/other"),
        });

        let grouped = resources.by_issuer();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, "vault-main");
        assert_eq!(grouped[0].1.len(), 3);
        assert_eq!(grouped[1].0, "ghost");
        assert_eq!(grouped[1].1.secrets.len(), 1);
    }

    #[test]
    fn test_unsupported_algorithm() {
        let spec = PrivateKeySpec {
            algorithm: "ecdsa".to_string(),
            ..Default::default()
        };
        assert!(spec.ensure_rsa().is_err());
        assert_eq!(PrivateKeySpec::default().ensure_rsa().unwrap(), 2048);
    }

    #[test]
    fn test_unsupported_encoding() {
        let spec = PrivateKeySpec {
            encoding: "pkcs8".to_string(),
            ..Default::default()
        };
        let err = spec.ensure_rsa().unwrap_err();
        assert!(err.to_string().contains("pkcs8"));

        let upper = PrivateKeySpec {
            encoding: "PKCS1".to_string(),
            ..Default::default()
        };
        assert_eq!(upper.ensure_rsa().unwrap(), 2048);
    }

    #[test]
    fn test_expand_hostname() {
        assert_eq!(expand_hostname("$HOSTNAME.example.com", "node-1"), "node-1.example.com");
        assert_eq!(expand_hostname("static.example.com", "node-1"), "static.example.com");
    }
}
