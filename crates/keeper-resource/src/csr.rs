//! Local key generation and certificate signing requests.

use crate::declaration::Subject;
use anyhow::{Context, Result};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509NameBuilder, X509ReqBuilder};
use std::net::Ipv4Addr;

/// PEM-encoded CSR with the private key it was built from.
#[derive(Debug, Clone)]
pub struct CsrBundle {
    /// `CERTIFICATE REQUEST`
    pub csr: Vec<u8>,
    /// `RSA PRIVATE KEY` (PKCS#1)
    pub key: Vec<u8>,
}

/// PEM-encoded RSA key pair.
#[derive(Debug, Clone)]
pub struct RsaKeyPair {
    /// `RSA PRIVATE KEY` (PKCS#1)
    pub private: Vec<u8>,
    /// `PUBLIC KEY` (SubjectPublicKeyInfo)
    pub public: Vec<u8>,
}

/// What goes into a CSR.
#[derive(Debug, Clone, Default)]
pub struct CsrRequest {
    pub common_name: String,
    pub subject: Subject,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<Ipv4Addr>,
    pub key_bits: u32,
}

/// Generate an RSA key pair.
pub fn generate_rsa(bits: u32) -> Result<RsaKeyPair> {
    let rsa = Rsa::generate(bits).context("generate key")?;
    Ok(RsaKeyPair {
        private: rsa.private_key_to_pem().context("encode private key")?,
        public: rsa.public_key_to_pem().context("encode public key")?,
    })
}

/// Check that a PEM document holds a private key (PKCS#1 or PKCS#8).
pub fn parse_private_key(pem: &[u8]) -> Result<()> {
    PKey::private_key_from_pem(pem).context("parse private key")?;
    Ok(())
}

/// Generate a key and a SHA-256 signed CSR for it.
pub fn create_csr(request: &CsrRequest) -> Result<CsrBundle> {
    let rsa = Rsa::generate(request.key_bits).context("generate key")?;
    let key_pem = rsa.private_key_to_pem().context("encode private key")?;
    let pkey = PKey::from_rsa(rsa).context("wrap key")?;

    let csr = build_request(request, &pkey).context("create certificate request")?;
    Ok(CsrBundle { csr, key: key_pem })
}

fn build_request(request: &CsrRequest, pkey: &PKey<Private>) -> Result<Vec<u8>> {
    let mut name = X509NameBuilder::new()?;
    if !request.common_name.is_empty() {
        name.append_entry_by_nid(Nid::COMMONNAME, &request.common_name)?;
    }
    let subject = &request.subject;
    let fields: [(Nid, &Vec<String>); 7] = [
        (Nid::COUNTRYNAME, &subject.countries),
        (Nid::STATEORPROVINCENAME, &subject.provinces),
        (Nid::LOCALITYNAME, &subject.localities),
        (Nid::STREETADDRESS, &subject.street_addresses),
        (Nid::POSTALCODE, &subject.postal_codes),
        (Nid::ORGANIZATIONNAME, &subject.organizations),
        (Nid::ORGANIZATIONALUNITNAME, &subject.organizational_units),
    ];
    for (nid, values) in fields {
        for value in values {
            name.append_entry_by_nid(nid, value)?;
        }
    }
    if let Some(serial) = subject.serial_number.as_deref().filter(|s| !s.is_empty()) {
        name.append_entry_by_nid(Nid::SERIALNUMBER, serial)?;
    }
    let name = name.build();

    let mut builder = X509ReqBuilder::new()?;
    builder.set_version(0)?;
    builder.set_subject_name(&name)?;
    builder.set_pubkey(pkey)?;

    if !request.dns_names.is_empty() || !request.ip_addresses.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for dns in &request.dns_names {
            san.dns(dns);
        }
        for ip in &request.ip_addresses {
            san.ip(&ip.to_string());
        }
        let extension = san.build(&builder.x509v3_context(None))?;
        let mut extensions = Stack::new()?;
        extensions.push(extension)?;
        builder.add_extensions(&extensions)?;
    }

    builder.sign(pkey, MessageDigest::sha256())?;
    Ok(builder.build().to_pem()?)
}
