// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Certificate chain verification.
//!
//! [`verify`] walks a chain against a trust store and reports *every*
//! problem it meets, as an ordered list of [`VerificationFinding`]. It never
//! stops at the first error and never fails: problems are data.

use std::ffi::c_int;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::certificate::Certificate;
use crate::trust::TrustStore;

pub(crate) mod collector;

pub mod hostname;

/// `X509_V_ERR_*` codes, as defined by the library ABI.
mod codes {
    use std::ffi::c_int;

    pub(super) const OK: c_int = 0;
    pub(super) const UNABLE_TO_GET_ISSUER_CERT: c_int = 2;
    pub(super) const UNABLE_TO_DECRYPT_CERT_SIGNATURE: c_int = 4;
    pub(super) const UNABLE_TO_DECODE_ISSUER_PUBLIC_KEY: c_int = 6;
    pub(super) const CERT_SIGNATURE_FAILURE: c_int = 7;
    pub(super) const CERT_NOT_YET_VALID: c_int = 9;
    pub(super) const CERT_HAS_EXPIRED: c_int = 10;
    pub(super) const ERROR_IN_CERT_NOT_BEFORE_FIELD: c_int = 13;
    pub(super) const ERROR_IN_CERT_NOT_AFTER_FIELD: c_int = 14;
    pub(super) const DEPTH_ZERO_SELF_SIGNED_CERT: c_int = 18;
    pub(super) const SELF_SIGNED_CERT_IN_CHAIN: c_int = 19;
    pub(super) const UNABLE_TO_GET_ISSUER_CERT_LOCALLY: c_int = 20;
    pub(super) const UNABLE_TO_VERIFY_LEAF_SIGNATURE: c_int = 21;
    pub(super) const CERT_REVOKED: c_int = 23;
    pub(super) const INVALID_CA: c_int = 24;
    pub(super) const PATH_LENGTH_EXCEEDED: c_int = 25;
    pub(super) const INVALID_PURPOSE: c_int = 26;
    pub(super) const CERT_UNTRUSTED: c_int = 27;
    pub(super) const CERT_REJECTED: c_int = 28;
}

/// Kind of a verification problem.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum VerificationErrorKind {
    NoError,
    UnableToGetIssuerCertificate,
    UnableToDecryptCertificateSignature,
    UnableToDecodeIssuerPublicKey,
    CertificateSignatureFailed,
    CertificateNotYetValid,
    CertificateExpired,
    InvalidNotBeforeField,
    InvalidNotAfterField,
    SelfSignedCertificate,
    SelfSignedCertificateInChain,
    UnableToGetLocalIssuerCertificate,
    UnableToVerifyFirstCertificate,
    CertificateRevoked,
    InvalidCaCertificate,
    PathLengthExceeded,
    InvalidPurpose,
    CertificateUntrusted,
    CertificateRejected,
    HostNameMismatch,
    NoPeerCertificate,
    /// The session failed in the cipher layer.
    InternalError,
    Unspecified,
}

impl VerificationErrorKind {
    /// Maps an `X509_V_ERR_*` code. Unmapped codes become
    /// [`VerificationErrorKind::Unspecified`].
    pub fn from_code(code: c_int) -> Self {
        match code {
            codes::OK => Self::NoError,
            codes::UNABLE_TO_GET_ISSUER_CERT => Self::UnableToGetIssuerCertificate,
            codes::UNABLE_TO_DECRYPT_CERT_SIGNATURE => Self::UnableToDecryptCertificateSignature,
            codes::UNABLE_TO_DECODE_ISSUER_PUBLIC_KEY => Self::UnableToDecodeIssuerPublicKey,
            codes::CERT_SIGNATURE_FAILURE => Self::CertificateSignatureFailed,
            codes::CERT_NOT_YET_VALID => Self::CertificateNotYetValid,
            codes::CERT_HAS_EXPIRED => Self::CertificateExpired,
            codes::ERROR_IN_CERT_NOT_BEFORE_FIELD => Self::InvalidNotBeforeField,
            codes::ERROR_IN_CERT_NOT_AFTER_FIELD => Self::InvalidNotAfterField,
            codes::DEPTH_ZERO_SELF_SIGNED_CERT => Self::SelfSignedCertificate,
            codes::SELF_SIGNED_CERT_IN_CHAIN => Self::SelfSignedCertificateInChain,
            codes::UNABLE_TO_GET_ISSUER_CERT_LOCALLY => Self::UnableToGetLocalIssuerCertificate,
            codes::UNABLE_TO_VERIFY_LEAF_SIGNATURE => Self::UnableToVerifyFirstCertificate,
            codes::CERT_REVOKED => Self::CertificateRevoked,
            codes::INVALID_CA => Self::InvalidCaCertificate,
            codes::PATH_LENGTH_EXCEEDED => Self::PathLengthExceeded,
            codes::INVALID_PURPOSE => Self::InvalidPurpose,
            codes::CERT_UNTRUSTED => Self::CertificateUntrusted,
            codes::CERT_REJECTED => Self::CertificateRejected,
            _ => Self::Unspecified,
        }
    }

    /// Returns a human readable description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NoError => "no error",
            Self::UnableToGetIssuerCertificate => "the issuer certificate could not be found",
            Self::UnableToDecryptCertificateSignature => {
                "the certificate signature could not be decrypted"
            }
            Self::UnableToDecodeIssuerPublicKey => {
                "the public key in the certificate could not be read"
            }
            Self::CertificateSignatureFailed => "the signature of the certificate is invalid",
            Self::CertificateNotYetValid => "the certificate is not yet valid",
            Self::CertificateExpired => "the certificate has expired",
            Self::InvalidNotBeforeField => {
                "the certificate's notBefore field contains an invalid time"
            }
            Self::InvalidNotAfterField => {
                "the certificate's notAfter field contains an invalid time"
            }
            Self::SelfSignedCertificate => "the certificate is self-signed, and untrusted",
            Self::SelfSignedCertificateInChain => {
                "the root certificate of the certificate chain is self-signed, and untrusted"
            }
            Self::UnableToGetLocalIssuerCertificate => {
                "the issuer certificate of a locally looked up certificate could not be found"
            }
            Self::UnableToVerifyFirstCertificate => "no certificates could be verified",
            Self::CertificateRevoked => "the certificate has been revoked",
            Self::InvalidCaCertificate => "one of the CA certificates is invalid",
            Self::PathLengthExceeded => "the basicConstraints path length parameter has been exceeded",
            Self::InvalidPurpose => "the supplied certificate is unsuitable for this purpose",
            Self::CertificateUntrusted => "the root CA certificate is not trusted for this purpose",
            Self::CertificateRejected => "the root CA certificate is marked to reject the specified purpose",
            Self::HostNameMismatch => "the host name did not match any of the valid hosts for this certificate",
            Self::NoPeerCertificate => "the peer did not present any certificate",
            Self::InternalError => "the TLS session failed",
            Self::Unspecified => "an unknown error occurred",
        }
    }
}

impl std::fmt::Display for VerificationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// One recorded verification problem.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct VerificationFinding {
    /// Kind of problem.
    pub kind: VerificationErrorKind,

    /// Depth in the chain, 0 being the leaf.
    pub depth: u32,

    /// Certificate at that depth, null if unknown.
    pub certificate: Certificate,
}

impl VerificationFinding {
    pub fn new(kind: VerificationErrorKind, depth: u32, certificate: Certificate) -> Self {
        Self {
            kind,
            depth,
            certificate,
        }
    }

    /// Builds a finding from a chain-walk rejection.
    pub(crate) fn from_raw(raw: collector::RawFinding) -> Self {
        Self {
            kind: VerificationErrorKind::from_code(raw.code),
            depth: raw.depth,
            certificate: raw.certificate.unwrap_or_default(),
        }
    }
}

impl std::fmt::Display for VerificationFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} (depth {})", self.kind, self.depth)
    }
}

/// Returns true if `findings` holds a finding of kind `kind`.
pub fn has_kind(findings: &[VerificationFinding], kind: VerificationErrorKind) -> bool {
    findings.iter().any(|f| f.kind == kind)
}

/// Builds the untrusted intermediates offered to the chain walk.
fn intermediates(chain: &[Certificate]) -> Result<openssl::stack::Stack<openssl::x509::X509>, openssl::error::ErrorStack> {
    let mut stack = openssl::stack::Stack::new()?;
    for cert in chain {
        match cert.to_x509() {
            Ok(x509) => stack.push(x509)?,
            Err(e) => log::warn!("dropping intermediate {cert:?}: {e}"),
        }
    }
    Ok(stack)
}

/// Runs the chain walk and returns every rejection, in discovery order.
fn walk(
    chain: &[Certificate],
    trust: &TrustStore,
    now: OffsetDateTime,
) -> Vec<VerificationFinding> {
    let unspecified = || {
        vec![VerificationFinding::new(
            VerificationErrorKind::Unspecified,
            0,
            chain[0].clone(),
        )]
    };

    let store = match trust.to_x509_store(now) {
        Ok(store) => store,
        Err(e) => {
            log::error!("failed to build the verification store: {e}");
            return unspecified();
        }
    };
    let leaf = match chain[0].to_x509() {
        Ok(leaf) => leaf,
        Err(e) => {
            log::warn!("leaf cannot be verified: {e}");
            return unspecified();
        }
    };

    let result = intermediates(&chain[1..]).and_then(|stack| {
        let mut ctx = openssl::x509::X509StoreContext::new()?;
        ctx.init(&store, &leaf, &stack, |ctx| {
            let (verified, raw) = collector::collect(ctx, |ctx| ctx.verify_cert());
            if let Err(e) = verified {
                log::warn!(
                    "chain walk aborted: {}",
                    crate::support::format_error_stack(&e)
                );
            }
            Ok(raw)
        })
    });

    match result {
        Ok(raw) => raw.into_iter().map(VerificationFinding::from_raw).collect(),
        Err(e) => {
            log::error!(
                "failed to set up the chain walk: {}",
                crate::support::format_error_stack(&e)
            );
            unspecified()
        }
    }
}

/// Verifies a chain, leaf first, against a trust-store snapshot.
///
/// Trust anchors already expired at call time are left out. If `hostname`
/// is given and does not match the leaf, a
/// [`VerificationErrorKind::HostNameMismatch`] finding at depth 0 comes
/// first. The other findings follow in discovery order.
pub fn verify(
    chain: &[Certificate],
    trust: &TrustStore,
    hostname: Option<&str>,
) -> Vec<VerificationFinding> {
    crate::support::ensure_library_initialized();
    let Some(leaf) = chain.first() else {
        return vec![VerificationFinding::new(
            VerificationErrorKind::Unspecified,
            0,
            Certificate::null(),
        )];
    };

    let mut findings = Vec::new();
    if let Some(hostname) = hostname.filter(|h| !h.is_empty()) {
        if !hostname::certificate_matches(leaf, hostname) {
            findings.push(VerificationFinding::new(
                VerificationErrorKind::HostNameMismatch,
                0,
                leaf.clone(),
            ));
        }
    }
    findings.extend(walk(chain, trust, OffsetDateTime::now_utc()));
    for f in &findings {
        log::debug!("finding: {f}");
    }
    findings
}
