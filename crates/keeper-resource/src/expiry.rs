//! Certificate validity checks.

use anyhow::{Context, Result};
use openssl::asn1::Asn1Time;
use openssl::x509::X509;
use std::time::Duration;

/// Parse the first certificate of a PEM document.
pub fn parse_certificate(pem: &[u8]) -> Result<X509> {
    X509::from_pem(pem).context("parse certificate")
}

/// Seconds until `not_after`; negative once expired.
pub fn seconds_until_expiry(cert: &X509) -> Result<i64> {
    let now = Asn1Time::days_from_now(0).context("current time")?;
    let diff = now.diff(cert.not_after()).context("compare expiry")?;
    Ok(i64::from(diff.days) * 86_400 + i64::from(diff.secs))
}

/// Whether the remaining validity is below `renew_before`.
pub fn needs_renewal(cert: &X509, renew_before: Duration) -> Result<bool> {
    let remaining = seconds_until_expiry(cert)?;
    let threshold = i64::try_from(renew_before.as_secs()).unwrap_or(i64::MAX);
    Ok(remaining < threshold)
}

/// Parse a PEM certificate and decide whether it must be renewed.
pub fn pem_needs_renewal(pem: &[u8], renew_before: Duration) -> Result<bool> {
    needs_renewal(&parse_certificate(pem)?, renew_before)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Self-signed certificates for tests.

    use openssl::asn1::Asn1Time;
    use openssl::bn::{BigNum, MsbOption};
    use openssl::hash::MessageDigest;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::x509::{X509NameBuilder, X509};

    /// A certificate expiring `days` days from now, with its PKCS#1 key.
    pub fn self_signed(common_name: &str, days: u32) -> (Vec<u8>, Vec<u8>) {
        let rsa = Rsa::generate(2048).unwrap();
        let key = PKey::from_rsa(rsa).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", common_name).unwrap();
        let name = name.build();

        let mut serial = BigNum::new().unwrap();
        serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder
            .set_serial_number(&serial.to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::from_unix(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(days).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        let cert = builder.build().to_pem().unwrap();
        let key = key.rsa().unwrap().private_key_to_pem().unwrap();
        (cert, key)
    }
}
