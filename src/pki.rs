//! Certificate authority bootstrap for the webhook's TLS identity.
//!
//! The webhook mints its own root CA and a leaf server certificate signed by
//! it, so it needs neither cert-manager nor any external issuer. Both are
//! long-lived: nothing in this crate rotates them, and an operator forces
//! regeneration by deleting the stored identity record.
//!
//! Certificates are PEM `CERTIFICATE` blocks. Keys are ECDSA P-256 in PKCS#8
//! PEM (`PRIVATE KEY`).

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType, string::Ia5String,
};
use ::time::{Duration, OffsetDateTime};
use x509_parser::prelude::*;

use crate::error::{Error, Result};

/// PEM tag for certificates
pub const CERTIFICATE_PEM_TAG: &str = "CERTIFICATE";
/// PEM tag for PKCS#8 private keys
pub const PRIVATE_KEY_PEM_TAG: &str = "PRIVATE KEY";

/// Validity horizon for both the CA and the leaf
pub const VALIDITY_YEARS: i32 = 30;

/// Backdating applied to `not_before` to absorb clock skew between issuer and verifier
pub const CLOCK_SKEW_ALLOWANCE_SECS: i64 = 10;

/// Organization used in every subject this crate issues
pub const ORGANIZATION: &str = "AutoOps";
/// Country used in every subject this crate issues
pub const COUNTRY: &str = "CN";
/// Common name of the root CA
pub const ROOT_CA_COMMON_NAME: &str = "AutoOps Common Root CA";

/// A certificate and its private key, both PEM-encoded
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// PEM `CERTIFICATE` block
    pub cert_pem: String,
    /// PEM `PRIVATE KEY` block
    pub key_pem: String,
}

/// Compute the (not_before, not_after) window for a certificate issued now
fn validity_window() -> (OffsetDateTime, OffsetDateTime) {
    let now = OffsetDateTime::now_utc();
    let not_before = now - Duration::seconds(CLOCK_SKEW_ALLOWANCE_SECS);
    // Feb 29 has no counterpart in most target years
    let not_after = now
        .replace_year(now.year() + VALIDITY_YEARS)
        .unwrap_or_else(|_| now + Duration::days(365 * i64::from(VALIDITY_YEARS) + 8));
    (not_before, not_after)
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CountryName, DnValue::Utf8String(COUNTRY.to_string()));
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ORGANIZATION.to_string()),
    );
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    dn
}

fn generate_key() -> Result<KeyPair> {
    KeyPair::generate().map_err(|e| Error::Crypto(format!("failed to generate key: {}", e)))
}

/// Issue a fresh self-signed root CA.
///
/// The CA may sign exactly one level of certificates below it.
pub fn issue_root_ca() -> Result<IssuedCertificate> {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(ROOT_CA_COMMON_NAME);
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(1));
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let (not_before, not_after) = validity_window();
    params.not_before = not_before;
    params.not_after = not_after;

    let key_pair = generate_key()?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::Crypto(format!("failed to self-sign CA certificate: {}", e)))?;

    Ok(IssuedCertificate {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Parse a single PEM block and check its tag
fn decode_pem(input: &str, expected_tag: &str, what: &str) -> Result<::pem::Pem> {
    if input.trim().is_empty() {
        return Err(Error::Decode(format!("{} is empty", what)));
    }
    let block = ::pem::parse(input.as_bytes())
        .map_err(|e| Error::Decode(format!("invalid {}: {}", what, e)))?;
    if block.tag() != expected_tag {
        return Err(Error::Decode(format!(
            "invalid {} type: {} (expected {})",
            what,
            block.tag(),
            expected_tag
        )));
    }
    Ok(block)
}

/// Issue a leaf server certificate signed by the given CA.
///
/// `dns_names[0]` becomes the subject common name and `dns_names[1..]` the
/// DNS subject alternative names, so callers put the primary service
/// hostname first (and repeat it if TLS clients must match it by SAN).
pub fn issue_leaf(
    dns_names: &[String],
    ca_cert_pem: &str,
    ca_key_pem: &str,
) -> Result<IssuedCertificate> {
    let Some((common_name, alt_names)) = dns_names.split_first() else {
        return Err(Error::InvalidInput("missing dns names".to_string()));
    };

    decode_pem(ca_cert_pem, CERTIFICATE_PEM_TAG, "CA certificate")?;
    decode_pem(ca_key_pem, PRIVATE_KEY_PEM_TAG, "CA key")?;

    let ca_key = KeyPair::from_pem(ca_key_pem)
        .map_err(|e| Error::Decode(format!("failed to parse CA key: {}", e)))?;
    let issuer = Issuer::from_ca_cert_pem(ca_cert_pem, ca_key)
        .map_err(|e| Error::Decode(format!("failed to parse CA certificate: {}", e)))?;

    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(common_name);
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.subject_alt_names = alt_names
        .iter()
        .map(|name| {
            Ia5String::try_from(name.clone())
                .map(SanType::DnsName)
                .map_err(|e| Error::InvalidInput(format!("invalid DNS name '{}': {}", name, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    let (not_before, not_after) = validity_window();
    params.not_before = not_before;
    params.not_after = not_after;

    let key_pair = generate_key()?;
    let cert = params
        .signed_by(&key_pair, &issuer)
        .map_err(|e| Error::Crypto(format!("failed to sign server certificate: {}", e)))?;

    Ok(IssuedCertificate {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Facts about an issued certificate, parsed back out of its PEM
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// When the certificate becomes valid (Unix timestamp)
    pub not_before: i64,
    /// When the certificate expires (Unix timestamp)
    pub not_after: i64,
    /// Subject common name
    pub common_name: String,
    /// DNS subject alternative names, in certificate order
    pub dns_names: Vec<String>,
    /// Whether basic constraints mark this as a CA
    pub is_ca: bool,
    /// Basic constraints path length, if any
    pub path_len: Option<u32>,
}

impl CertificateInfo {
    /// Parse certificate info from a PEM-encoded certificate
    pub fn from_pem(pem_data: &str) -> Result<Self> {
        let block = decode_pem(pem_data, CERTIFICATE_PEM_TAG, "certificate")?;
        Self::from_der(block.contents())
    }

    /// Parse certificate info from a DER-encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Decode(format!("failed to parse certificate: {}", e)))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        let dns_names = cert
            .subject_alternative_name()
            .map_err(|e| Error::Decode(format!("invalid subjectAltName: {}", e)))?
            .map(|san| {
                san.value
                    .general_names
                    .iter()
                    .filter_map(|name| match name {
                        GeneralName::DNSName(dns) => Some(dns.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let path_len = cert
            .basic_constraints()
            .map_err(|e| Error::Decode(format!("invalid basicConstraints: {}", e)))?
            .and_then(|bc| bc.value.path_len_constraint);

        Ok(Self {
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            common_name,
            dns_names,
            is_ca: cert.is_ca(),
            path_len,
        })
    }

    /// Total lifetime of the certificate in seconds
    pub fn lifetime_secs(&self) -> i64 {
        self.not_after - self.not_before
    }
}
