// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Runtime certificate generation.
//!
//! Scenarios present certificates crafted on the fly: self-signed ones,
//! leaves signed by another leaf, expired ones, ones issued for the wrong
//! host. Keys are P-256, signatures SHA-256.

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use time::{Duration, OffsetDateTime};

use super::Certificate;
use crate::error::CertificateError;

/// Organization of forged certificates, unless overridden.
pub const DEFAULT_ORGANIZATION: &str = "tlsaudit";

/// A certificate and its private key.
#[derive(Clone)]
pub struct Identity {
    pub cert: X509,
    pub key: PKey<Private>,
}

impl Identity {
    pub fn certificate(&self) -> Certificate {
        Certificate::from_x509(&self.cert)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Identity({:?})", self.certificate())
    }
}

/// What to forge.
#[derive(Clone, Debug)]
pub struct ForgeRequest {
    pub common_name: String,
    pub organization: String,
    /// DNS alternative names.
    pub dns_names: Vec<String>,
    /// Email alternative name.
    pub email: Option<String>,
    pub ca: bool,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl ForgeRequest {
    /// A leaf for `common_name`, valid from yesterday for 30 days.
    pub fn leaf(common_name: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            common_name: common_name.to_string(),
            organization: DEFAULT_ORGANIZATION.to_string(),
            dns_names: if common_name.is_empty() {
                Vec::new()
            } else {
                vec![common_name.to_string()]
            },
            email: None,
            ca: false,
            not_before: now - Duration::days(1),
            not_after: now + Duration::days(30),
        }
    }

    /// A certificate authority, valid from yesterday for 30 days.
    pub fn authority(common_name: &str) -> Self {
        Self {
            dns_names: Vec::new(),
            ca: true,
            ..Self::leaf(common_name)
        }
    }

    /// Moves the validity window to end ten days ago.
    pub fn expired(mut self) -> Self {
        let now = OffsetDateTime::now_utc();
        self.not_before = now - Duration::days(20);
        self.not_after = now - Duration::days(10);
        self
    }

    pub fn with_dns_names<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.dns_names = names.iter().map(|n| n.as_ref().to_string()).collect();
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn with_organization(mut self, organization: &str) -> Self {
        self.organization = organization.to_string();
        self
    }
}

/// Generates a P-256 key.
pub fn generate_key() -> crate::Result<PKey<Private>> {
    crate::support::ensure_library_initialized();
    EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)
        .and_then(|group| EcKey::generate(&group))
        .and_then(PKey::from_ec_key)
        .map_err(generation_error)
}

/// Forges a certificate signed by `issuer`, or self-signed.
///
/// The issuer does not need to be a certificate authority: a leaf signing
/// another leaf is a scenario of its own.
pub fn forge(request: &ForgeRequest, issuer: Option<&Identity>) -> crate::Result<Identity> {
    let key = generate_key()?;
    let cert = build(request, issuer, &key).map_err(generation_error)?;
    log::debug!(
        "forged {} for {:?}, issued by {}",
        if request.ca { "authority" } else { "leaf" },
        request.common_name,
        issuer
            .map(|i| format!("{:?}", i.certificate().subject_attribute("CN")))
            .unwrap_or_else(|| "itself".to_string())
    );
    Ok(Identity { cert, key })
}

fn build(
    request: &ForgeRequest,
    issuer: Option<&Identity>,
    key: &PKey<Private>,
) -> Result<X509, ErrorStack> {
    let mut name = X509NameBuilder::new()?;
    if !request.organization.is_empty() {
        name.append_entry_by_text("O", &request.organization)?;
    }
    if !request.common_name.is_empty() {
        name.append_entry_by_text("CN", &request.common_name)?;
    }
    let name = name.build();

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    let mut serial = BigNum::new()?;
    serial.rand(63, openssl::bn::MsbOption::MAYBE_ZERO, false)?;
    builder.set_serial_number(&*serial.to_asn1_integer()?)?;
    builder.set_subject_name(&name)?;
    match issuer {
        Some(issuer) => builder.set_issuer_name(issuer.cert.subject_name())?,
        None => builder.set_issuer_name(&name)?,
    }
    builder.set_not_before(&*Asn1Time::from_unix(request.not_before.unix_timestamp() as _)?)?;
    builder.set_not_after(&*Asn1Time::from_unix(request.not_after.unix_timestamp() as _)?)?;
    builder.set_pubkey(key)?;

    let mut bc = BasicConstraints::new();
    bc.critical();
    if request.ca {
        bc.ca();
    }
    builder.append_extension(bc.build()?)?;

    let mut ku = KeyUsage::new();
    ku.critical();
    if request.ca {
        ku.key_cert_sign().crl_sign();
    } else {
        ku.digital_signature().key_encipherment();
        if issuer.is_none() {
            // A self-issued leaf signs itself.
            ku.key_cert_sign();
        }
    }
    builder.append_extension(ku.build()?)?;

    let issuer_cert = issuer.map(|i| &*i.cert);
    let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(issuer_cert, None))?;
    builder.append_extension(ski)?;

    if let Some(issuer_cert) = issuer_cert {
        let aki = AuthorityKeyIdentifier::new()
            .keyid(true)
            .build(&builder.x509v3_context(Some(issuer_cert), None))?;
        builder.append_extension(aki)?;
    }

    if !request.dns_names.is_empty() || request.email.is_some() {
        let mut san = SubjectAlternativeName::new();
        for dns in request.dns_names.iter() {
            san.dns(dns);
        }
        if let Some(email) = request.email.as_deref() {
            san.email(email);
        }
        let san = san.build(&builder.x509v3_context(issuer_cert, None))?;
        builder.append_extension(san)?;
    }

    let signer = issuer.map(|i| &i.key).unwrap_or(key);
    builder.sign(signer, MessageDigest::sha256())?;
    Ok(builder.build())
}

fn generation_error(e: ErrorStack) -> crate::Error {
    (
        CertificateError::Generation,
        crate::support::format_error_stack(&e),
    )
        .into()
}

#[cfg(test)]
mod test {
    use super::*;

    /// Tests a self-signed leaf.
    #[test]
    fn test_self_signed() {
        let id = forge(&ForgeRequest::leaf("self.example.com"), None).unwrap();
        let cert = id.certificate();
        assert!(!cert.is_null());
        assert!(cert.is_self_signed());
        assert_eq!(
            cert.subject_attribute("O"),
            vec![DEFAULT_ORGANIZATION.to_string()]
        );
        assert_eq!(cert.subject_alt_names().len(), 1);
    }

    /// Tests a leaf signed by another leaf.
    #[test]
    fn test_leaf_signed_by_leaf() {
        let user = forge(&ForgeRequest::leaf("user.example.com"), None).unwrap();
        let forged = forge(&ForgeRequest::leaf("target.example.com"), Some(&user)).unwrap();
        let cert = forged.certificate();
        assert!(!cert.is_self_signed());
        assert_eq!(
            cert.issuer_attribute("CN"),
            vec!["user.example.com".to_string()]
        );
        assert!(cert.extension("authorityKeyIdentifier").is_some());
    }

    /// Tests [`ForgeRequest::expired`].
    #[test]
    fn test_expired() {
        let id = forge(&ForgeRequest::leaf("old.example.com").expired(), None).unwrap();
        assert!(id.certificate().is_expired_at(OffsetDateTime::now_utc()));
    }
}
