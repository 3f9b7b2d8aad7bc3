// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Immutable X.509 certificates.
//!
//! A [`Certificate`] is built once from DER or PEM bytes and never mutated.
//! Parsing never fails loudly: malformed input yields a *null* certificate,
//! which callers detect with [`Certificate::is_null`].
//!
//! Cloning a [`Certificate`] only bumps a reference count. Derived views
//! (names, alternative names, extensions) are computed on first use and
//! cached for the lifetime of the certificate.

use std::sync::{Arc, OnceLock};

use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;

use crate::error::CertificateError;
use crate::support::hex_colon;

pub mod extension;
pub use extension::{AltNameKind, Extension, ExtensionValue, SubjectAltName};

pub mod name;
pub use name::{NameEntries, NameEntry, SubjectInfo};

pub mod pem;

pub mod forge;
pub use forge::{ForgeRequest, Identity};

/// Encoding format of certificate bytes.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum EncodingFormat {
    Pem,
    Der,
}

/// Digest algorithm used by [`Certificate::digest`].
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
}

/// Algorithm tag of a public key.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum KeyAlgorithm {
    Rsa,
    Dsa,
    Ec,
    Ed25519,
    Opaque,
}

impl KeyAlgorithm {
    /// Resolves a dotted algorithm OID.
    fn from_oid(oid: &str) -> Self {
        match oid {
            "1.2.840.113549.1.1.1" => Self::Rsa,
            "1.2.840.10040.4.1" => Self::Dsa,
            "1.2.840.10045.2.1" => Self::Ec,
            "1.3.101.112" => Self::Ed25519,
            _ => Self::Opaque,
        }
    }
}

/// A public key: algorithm tag and opaque material.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct PublicKey {
    /// Algorithm tag.
    pub algorithm: KeyAlgorithm,

    /// Dotted OID of the algorithm.
    pub algorithm_oid: String,

    /// DER encoding of the `SubjectPublicKeyInfo`.
    pub material: Vec<u8>,
}

/// Fields extracted eagerly at construction.
struct Fields {
    version: u32,
    serial_number: String,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    public_key: PublicKey,
}

/// Shared state of a non-null certificate.
struct Inner {
    /// DER encoding.
    der: Vec<u8>,

    /// SHA-256 of the DER encoding.
    sha256: [u8; 32],

    /// Eager fields.
    fields: Fields,

    /// Lazily computed views.
    subject: OnceLock<NameEntries>,
    issuer: OnceLock<NameEntries>,
    subject_alt_names: OnceLock<Vec<SubjectAltName>>,
    extensions: OnceLock<Vec<Extension>>,
}

/// An immutable X.509 certificate.
#[derive(Clone, Default)]
pub struct Certificate(Option<Arc<Inner>>);

/// Converts an ASN.1 time into an [`OffsetDateTime`].
fn to_datetime(t: &x509_parser::time::ASN1Time) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(t.timestamp()).ok()
}

impl Inner {
    /// Parses DER bytes. Trailing bytes after the certificate are dropped.
    fn parse(der: &[u8]) -> Option<Self> {
        let (rest, cert) = match x509_parser::parse_x509_certificate(der) {
            Ok(r) => r,
            Err(e) => {
                log::debug!("failed to parse certificate: {e}");
                return None;
            }
        };
        let der = der[..der.len() - rest.len()].to_vec();
        let validity = cert.validity();
        let spki = cert.public_key();
        let algorithm_oid = spki.algorithm.algorithm.to_id_string();
        let fields = Fields {
            version: cert.version().0 + 1,
            serial_number: hex_colon(cert.raw_serial()),
            not_before: to_datetime(&validity.not_before)?,
            not_after: to_datetime(&validity.not_after)?,
            public_key: PublicKey {
                algorithm: KeyAlgorithm::from_oid(&algorithm_oid),
                algorithm_oid,
                material: spki.raw.to_vec(),
            },
        };
        Some(Self {
            sha256: openssl::sha::sha256(&der),
            der,
            fields,
            subject: OnceLock::new(),
            issuer: OnceLock::new(),
            subject_alt_names: OnceLock::new(),
            extensions: OnceLock::new(),
        })
    }

    /// Re-parses the stored DER to compute a derived view.
    ///
    /// The DER was accepted once at construction, so failures here are not
    /// expected and yield the default value.
    fn with_parsed<T: Default>(&self, f: impl FnOnce(&X509Certificate<'_>) -> T) -> T {
        match x509_parser::parse_x509_certificate(&self.der) {
            Ok((_, cert)) => f(&cert),
            Err(e) => {
                log::error!("stored certificate no longer parses: {e}");
                T::default()
            }
        }
    }
}

impl Certificate {
    /// Returns the null certificate.
    pub fn null() -> Self {
        Self(None)
    }

    /// Parses a DER-encoded certificate.
    pub fn from_der(der: impl AsRef<[u8]>) -> Self {
        Self(Inner::parse(der.as_ref()).map(Arc::new))
    }

    /// Parses the first certificate of a PEM bundle.
    pub fn from_pem(pem: impl AsRef<[u8]>) -> Self {
        Self::from_pem_nth(pem, 0)
    }

    /// Parses the `n`th (0-based) certificate of a PEM bundle.
    pub fn from_pem_nth(pem: impl AsRef<[u8]>, n: usize) -> Self {
        pem::decode_blocks(pem.as_ref(), Some(n + 1))
            .into_iter()
            .nth(n)
            .map(Self::from_der)
            .unwrap_or_default()
    }

    /// Parses every certificate of a PEM bundle.
    ///
    /// Blocks that do not hold a valid certificate are skipped.
    pub fn from_pem_all(pem: impl AsRef<[u8]>) -> Vec<Self> {
        pem::decode_blocks(pem.as_ref(), None)
            .into_iter()
            .map(Self::from_der)
            .filter(|c| !c.is_null())
            .collect()
    }

    /// Parses a sequence of concatenated DER certificates.
    pub fn from_der_all(der: impl AsRef<[u8]>) -> Vec<Self> {
        let mut certs = Vec::new();
        let mut rest = der.as_ref();
        while !rest.is_empty() {
            let cert = Self::from_der(rest);
            let Some(inner) = cert.0.as_ref() else {
                break;
            };
            rest = &rest[inner.der.len()..];
            certs.push(cert);
        }
        certs
    }

    /// Parses bytes in the given format.
    pub fn parse(bytes: impl AsRef<[u8]>, format: EncodingFormat) -> Self {
        match format {
            EncodingFormat::Pem => Self::from_pem(bytes),
            EncodingFormat::Der => Self::from_der(bytes),
        }
    }

    /// Encodes the certificate. A null certificate encodes to nothing.
    pub fn encode(&self, format: EncodingFormat) -> Vec<u8> {
        match format {
            EncodingFormat::Der => self.to_der().to_vec(),
            EncodingFormat::Pem => self.to_pem().into_bytes(),
        }
    }

    /// Returns the DER encoding.
    pub fn to_der(&self) -> &[u8] {
        self.0.as_ref().map(|i| i.der.as_slice()).unwrap_or_default()
    }

    /// Returns the PEM encoding.
    pub fn to_pem(&self) -> String {
        match self.0.as_ref() {
            Some(i) => pem::encode(&i.der),
            None => String::new(),
        }
    }

    /// Returns true if parsing failed.
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    fn inner(&self) -> Option<&Inner> {
        self.0.as_deref()
    }

    /// Returns the subject name.
    pub fn subject_info(&self) -> NameEntries {
        self.inner()
            .map(|i| {
                i.subject
                    .get_or_init(|| i.with_parsed(|c| NameEntries::from_x509_name(c.subject())))
                    .clone()
            })
            .unwrap_or_default()
    }

    /// Returns the issuer name.
    pub fn issuer_info(&self) -> NameEntries {
        self.inner()
            .map(|i| {
                i.issuer
                    .get_or_init(|| i.with_parsed(|c| NameEntries::from_x509_name(c.issuer())))
                    .clone()
            })
            .unwrap_or_default()
    }

    /// Returns every value of a subject attribute, given by short name or
    /// dotted OID.
    pub fn subject_attribute(&self, key: &str) -> Vec<String> {
        self.subject_info().values_by_key(key)
    }

    /// Returns every value of an issuer attribute, given by short name or
    /// dotted OID.
    pub fn issuer_attribute(&self, key: &str) -> Vec<String> {
        self.issuer_info().values_by_key(key)
    }

    /// Returns the DNS and e-mail subject alternative names.
    pub fn subject_alt_names(&self) -> Vec<SubjectAltName> {
        self.inner()
            .map(|i| {
                i.subject_alt_names
                    .get_or_init(|| i.with_parsed(|c| extension::subject_alt_names(c.extensions())))
                    .clone()
            })
            .unwrap_or_default()
    }

    /// Returns the extensions, in encoding order.
    pub fn extensions(&self) -> Vec<Extension> {
        self.inner()
            .map(|i| {
                i.extensions
                    .get_or_init(|| {
                        i.with_parsed(|c| c.extensions().iter().map(extension::convert).collect())
                    })
                    .clone()
            })
            .unwrap_or_default()
    }

    /// Returns the extension with the given dotted OID or short name.
    pub fn extension(&self, key: &str) -> Option<Extension> {
        self.extensions()
            .into_iter()
            .find(|e| e.oid == key || e.name == key)
    }

    /// Returns the start of the validity period.
    pub fn not_before(&self) -> Option<OffsetDateTime> {
        self.inner().map(|i| i.fields.not_before)
    }

    /// Returns the end of the validity period.
    pub fn not_after(&self) -> Option<OffsetDateTime> {
        self.inner().map(|i| i.fields.not_after)
    }

    /// Alias of [`Certificate::not_before`].
    pub fn effective_date(&self) -> Option<OffsetDateTime> {
        self.not_before()
    }

    /// Alias of [`Certificate::not_after`].
    pub fn expiry_date(&self) -> Option<OffsetDateTime> {
        self.not_after()
    }

    /// Returns true if the validity period ended before `now`.
    /// A null certificate is never expired.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.not_after().map(|t| t < now).unwrap_or(false)
    }

    /// Returns the serial number as lowercase colon-hex.
    pub fn serial_number(&self) -> String {
        self.inner()
            .map(|i| i.fields.serial_number.clone())
            .unwrap_or_default()
    }

    /// Returns the 1-based X.509 version, 0 for a null certificate.
    pub fn version(&self) -> u32 {
        self.inner().map(|i| i.fields.version).unwrap_or(0)
    }

    /// Returns the public key.
    pub fn public_key(&self) -> Option<PublicKey> {
        self.inner().map(|i| i.fields.public_key.clone())
    }

    /// Returns the digest of the DER encoding.
    pub fn digest(&self, algorithm: DigestAlgorithm) -> Vec<u8> {
        match (self.inner(), algorithm) {
            (None, _) => Vec::new(),
            (Some(i), DigestAlgorithm::Sha256) => i.sha256.to_vec(),
            (Some(i), DigestAlgorithm::Sha1) => openssl::sha::sha1(&i.der).to_vec(),
        }
    }

    /// Returns true if the issuer is the subject and the signature verifies
    /// with the certificate's own key.
    pub fn is_self_signed(&self) -> bool {
        let Ok(x509) = self.to_x509() else {
            return false;
        };
        if x509.issued(&x509) != openssl::x509::X509VerifyResult::OK {
            return false;
        }
        x509.public_key()
            .and_then(|k| x509.verify(&k))
            .unwrap_or(false)
    }

    /// Converts into an OpenSSL certificate.
    pub fn to_x509(&self) -> crate::Result<openssl::x509::X509> {
        crate::support::ensure_library_initialized();
        let inner = self
            .inner()
            .ok_or((CertificateError::Malformed, "null certificate"))?;
        openssl::x509::X509::from_der(&inner.der).map_err(|e| {
            (
                CertificateError::Unsupported,
                crate::support::format_error_stack(&e),
            )
                .into()
        })
    }

    /// Converts an OpenSSL certificate.
    pub fn from_x509(x509: &openssl::x509::X509Ref) -> Self {
        match x509.to_der() {
            Ok(der) => Self::from_der(der),
            Err(e) => {
                log::warn!(
                    "failed to encode certificate: {}",
                    crate::support::format_error_stack(&e)
                );
                Self::null()
            }
        }
    }
}

impl std::cmp::PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.to_der() == other.to_der()
    }
}

impl std::cmp::Eq for Certificate {}

impl std::hash::Hash for Certificate {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self.inner() {
            Some(i) => i.sha256.hash(state),
            None => [0u8; 32].hash(state),
        }
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.is_null() {
            return write!(f, "Certificate(null)");
        }
        let cn = self.subject_info().values(SubjectInfo::CommonName);
        write!(
            f,
            "Certificate(CN={}, serial={})",
            cn.first().map(String::as_str).unwrap_or("?"),
            self.serial_number()
        )
    }
}
