// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Defines [`TlsConfiguration`].
//!
//! ## [`TlsConfiguration`]
//!
//! A [`TlsConfiguration`] is a snapshot of everything a [`super::TlsEngine`]
//! needs to negotiate a session: protocol and cipher policies, the local
//! identity, the trust anchors and the verification policy.
//!
//! It can be built in Rust or loaded from JSON, in which case certificates
//! and keys are given inline as PEM strings:
//!
//! ```
//! let configuration = tlsaudit::tunnel::TlsConfiguration::from_json(r#"{
//!     "protocol": "TlsV1_2OrLater",
//!     "verify_mode": "VerifyPeer",
//!     "peer_verify_name": "example.com",
//!     "alpn_protocols": ["h2", "http/1.1"]
//! }"#).unwrap();
//! assert_eq!(configuration.alpn_protocols.len(), 2);
//! ```
//!
//! The configuration is only validated when an engine starts, see
//! [`TlsConfiguration::build_context`].

use openssl::pkey::{PKey, Private};
use openssl::ssl::{SslContext, SslContextBuilder, SslMethod, SslVerifyMode};
use serde::{Deserialize, Serialize};

use crate::certificate::Certificate;
use crate::error::{AlpnError, CertificateError, ConfigurationError, PrivateKeyError, SystemError};
use crate::trust::{default_store, TrustStore, TrustStoreProvider};
use crate::verifier::VerificationErrorKind;

use super::cipher::{cipher_rule, default_ciphers, LEGACY_SECURITY_LEVEL};
use super::keylog::KeyLog;
use super::protocol::SslProtocol;
use super::psk::PskAuthenticator;
use super::verification::{self, SharedVerification};
use super::Mode;

/// Maximum length of an ALPN protocol name.
const MAX_ALPN_LENGTH: usize = 255;

/// Cipher rule used when no default cipher is known.
const FALLBACK_CIPHERS: &str = "DEFAULT";

/// How a session verifies its peer.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum VerifyMode {
    /// Do not request a certificate.
    VerifyNone,
    /// Request a certificate and collect findings, never fail on them.
    QueryPeer,
    /// Request a certificate and fail on findings.
    VerifyPeer,
    /// [`VerifyMode::VerifyPeer`] for clients, [`VerifyMode::QueryPeer`] for
    /// servers.
    #[default]
    AutoVerifyPeer,
}

impl VerifyMode {
    /// Resolves [`VerifyMode::AutoVerifyPeer`].
    pub fn effective(self, mode: Mode) -> Self {
        match (self, mode) {
            (Self::AutoVerifyPeer, Mode::Client) => Self::VerifyPeer,
            (Self::AutoVerifyPeer, Mode::Server) => Self::QueryPeer,
            (m, _) => m,
        }
    }

    /// Returns true if findings fail the handshake.
    pub fn is_mandatory(self, mode: Mode) -> bool {
        self.effective(mode) == Self::VerifyPeer
    }
}

/// Configuration of a [`super::TlsEngine`].
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfiguration {
    /// Protocol version policy.
    pub protocol: SslProtocol,

    /// Cipher suites to offer, by library name. Empty means
    /// [`super::cipher::default_ciphers`].
    pub ciphers: Vec<String>,

    /// Local certificate chain, leaf first, as PEM.
    pub certificate_chain_pem: Option<String>,

    /// Local private key, as PEM.
    pub private_key_pem: Option<String>,

    /// Trust anchors, as PEM. When no anchor is configured the default
    /// store is used.
    pub trusted_cas_pem: Option<String>,

    /// Local certificate chain, leaf first. Takes precedence over
    /// `certificate_chain_pem`.
    #[serde(skip)]
    pub certificate_chain: Vec<Certificate>,

    /// Local private key. Takes precedence over `private_key_pem`.
    #[serde(skip)]
    pub private_key: Option<PKey<Private>>,

    /// Trust anchors. Takes precedence over `trusted_cas_pem`.
    #[serde(skip)]
    pub trust_store: Option<TrustStore>,

    pub verify_mode: VerifyMode,

    /// Maximum chain depth, library default if unset.
    pub verify_depth: Option<u32>,

    /// Name the peer certificate must match. Also sent as SNI by clients.
    pub peer_verify_name: Option<String>,

    pub disable_sni: bool,

    /// Pause the handshake instead of failing it on findings.
    pub pause_on_findings: bool,

    pub ignored_findings: Vec<VerificationErrorKind>,

    pub ignore_all_findings: bool,

    /// ALPN protocols, in preference order.
    pub alpn_protocols: Vec<String>,

    pub psk: Option<PskAuthenticator>,

    /// Sink receiving the key log line of each completed handshake.
    #[serde(skip)]
    pub key_log: Option<KeyLog>,
}

impl std::fmt::Debug for TlsConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("TlsConfiguration")
            .field("protocol", &self.protocol)
            .field("ciphers", &self.ciphers)
            .field("certificates", &self.certificate_chain.len())
            .field("verify_mode", &self.verify_mode)
            .field("peer_verify_name", &self.peer_verify_name)
            .field("pause_on_findings", &self.pause_on_findings)
            .field("alpn_protocols", &self.alpn_protocols)
            .field("psk", &self.psk)
            .finish_non_exhaustive()
    }
}

impl TlsConfiguration {
    /// Loads a configuration from JSON.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| (ConfigurationError::Parse, e.to_string()).into())
    }

    /// Sets the local identity.
    pub fn with_identity(mut self, chain: Vec<Certificate>, key: PKey<Private>) -> Self {
        self.certificate_chain = chain;
        self.private_key = Some(key);
        self
    }

    /// Sets the trust anchors.
    pub fn with_trust_store(mut self, store: TrustStore) -> Self {
        self.trust_store = Some(store);
        self
    }

    /// Returns the local chain, leaf first. Empty if none is configured.
    pub(crate) fn local_chain(&self) -> crate::Result<Vec<Certificate>> {
        if !self.certificate_chain.is_empty() {
            return Ok(self.certificate_chain.clone());
        }
        let Some(pem) = self.certificate_chain_pem.as_deref() else {
            return Ok(Vec::new());
        };
        let chain = Certificate::from_pem_all(pem);
        if chain.is_empty() {
            return Err(
                errors! {CertificateError::Malformed => ConfigurationError::InvalidCertificate},
            );
        }
        Ok(chain)
    }

    /// Returns the local private key, if any.
    pub(crate) fn local_key(&self) -> crate::Result<Option<PKey<Private>>> {
        if let Some(key) = self.private_key.as_ref() {
            return Ok(Some(key.clone()));
        }
        self.private_key_pem
            .as_deref()
            .map(|pem| {
                PKey::private_key_from_pem(pem.as_bytes()).map_err(|e| {
                    crate::Error::from((
                        PrivateKeyError::Malformed,
                        crate::support::format_error_stack(&e),
                    )) >> ConfigurationError::InvalidPrivateKey
                })
            })
            .transpose()
    }

    /// Returns the trust anchors: the configured ones, or a snapshot of the
    /// default store.
    pub fn trust(&self) -> TrustStore {
        if let Some(store) = self.trust_store.as_ref() {
            return store.clone();
        }
        match self.trusted_cas_pem.as_deref() {
            Some(pem) => TrustStore::from_pem(pem),
            None => default_store().snapshot(),
        }
    }

    /// Returns the name to send as SNI, if any.
    pub(crate) fn sni_name(&self, mode: Mode) -> Option<String> {
        if mode != Mode::Client || self.disable_sni || self.protocol.is_ssl3_only() {
            return None;
        }
        let name = self.peer_verify_name.as_deref()?.trim_end_matches('.');
        if name.is_empty() || crate::verifier::hostname::is_ip_literal(name) {
            return None;
        }
        Some(name.to_string())
    }

    /// Returns the cipher rule string to apply to TLS 1.2 and older, or
    /// `None` if the configured list only names TLS 1.3 suites.
    fn cipher_list(&self) -> Option<String> {
        let rule = if self.ciphers.is_empty() {
            let defaults = default_ciphers()
                .iter()
                .map(|c| c.name.clone())
                .collect::<Vec<_>>();
            if defaults.is_empty() {
                FALLBACK_CIPHERS.to_string()
            } else {
                cipher_rule(&defaults)
            }
        } else {
            let legacy = self
                .ciphers
                .iter()
                .filter(|name| !is_tls13_suite(name))
                .collect::<Vec<_>>();
            if legacy.is_empty() {
                return None;
            }
            cipher_rule(&legacy)
        };
        Some(if self.protocol.allows_legacy() || !self.ciphers.is_empty() {
            format!("{rule}:{LEGACY_SECURITY_LEVEL}")
        } else {
            rule
        })
    }

    /// Restricts the suites a session may negotiate.
    ///
    /// TLS 1.3 suites are configured apart from the cipher rule. An explicit
    /// list bounds both: TLS 1.3 is left with the `TLS_*` names it contains,
    /// none if it contains none, and a list of TLS 1.3 names only raises the
    /// minimum protocol to TLS 1.3.
    fn apply_ciphers(&self, builder: &mut SslContextBuilder) -> crate::Result<()> {
        let invalid = |rule: &str, e: openssl::error::ErrorStack| {
            crate::Error::from((
                ConfigurationError::InvalidCipherList,
                format!("{rule}: {}", crate::support::format_error_stack(&e)),
            ))
        };
        match self.cipher_list() {
            Some(rule) => builder
                .set_cipher_list(&rule)
                .map_err(|e| invalid(&rule, e))?,
            None => builder
                .set_min_proto_version(Some(openssl::ssl::SslVersion::TLS1_3))
                .map_err(|e| invalid("TLSv1.3", e))?,
        }
        if self.ciphers.is_empty() {
            return Ok(());
        }
        let suites = cipher_rule(
            &self
                .ciphers
                .iter()
                .filter(|name| is_tls13_suite(name))
                .collect::<Vec<_>>(),
        );
        builder
            .set_ciphersuites(&suites)
            .map_err(|e| invalid(&suites, e))
    }

    /// Builds the library context of a session.
    ///
    /// `shared` receives the findings of the session. This is where the
    /// configuration is validated.
    pub(crate) fn build_context(
        &self,
        mode: Mode,
        shared: &SharedVerification,
    ) -> crate::Result<SslContext> {
        crate::support::ensure_library_initialized();
        let mut builder = SslContext::builder(SslMethod::tls())
            .map_err(|e| (SystemError::Memory, crate::support::format_error_stack(&e)))?;

        self.protocol.apply(&mut builder)?;

        self.apply_ciphers(&mut builder)?;

        self.apply_identity(&mut builder, mode)?;

        let store = self
            .trust()
            .to_x509_store(time::OffsetDateTime::now_utc())
            .map_err(|e| e >> ConfigurationError::InvalidTrustStore)?;
        builder.set_cert_store(store);

        match self.verify_mode.effective(mode) {
            VerifyMode::VerifyNone => builder.set_verify(SslVerifyMode::NONE),
            _ => verification::install_callback(&mut builder, SslVerifyMode::PEER, shared.clone()),
        }
        if let Some(depth) = self.verify_depth {
            builder.set_verify_depth(depth);
        }

        self.apply_alpn(&mut builder, mode)?;

        if let Some(psk) = self.psk.as_ref() {
            psk.install(&mut builder, mode)?;
        }

        Ok(builder.build())
    }

    /// Installs the local certificate chain and private key.
    fn apply_identity(&self, builder: &mut SslContextBuilder, mode: Mode) -> crate::Result<()> {
        let chain = self.local_chain()?;
        let key = self.local_key()?;
        let Some(leaf) = chain.first() else {
            if key.is_some() {
                return Err((
                    ConfigurationError::InvalidCertificate,
                    "private key without certificate",
                )
                    .into());
            }
            if mode == Mode::Server && self.psk.is_none() {
                return Err((
                    ConfigurationError::InvalidCertificate,
                    "a server needs a certificate or a pre-shared key",
                )
                    .into());
            }
            return Ok(());
        };

        let leaf = leaf
            .to_x509()
            .map_err(|e| e >> ConfigurationError::InvalidCertificate)?;
        builder.set_certificate(&leaf).map_err(|e| {
            (
                ConfigurationError::InvalidCertificate,
                crate::support::format_error_stack(&e),
            )
        })?;
        for cert in chain.iter().skip(1) {
            let x509 = cert
                .to_x509()
                .map_err(|e| e >> ConfigurationError::InvalidCertificate)?;
            builder.add_extra_chain_cert(x509).map_err(|e| {
                (
                    ConfigurationError::InvalidCertificate,
                    crate::support::format_error_stack(&e),
                )
            })?;
        }

        let key = key.ok_or((ConfigurationError::InvalidPrivateKey, "no private key"))?;
        let public = leaf.public_key().map_err(|e| {
            (
                ConfigurationError::InvalidCertificate,
                crate::support::format_error_stack(&e),
            )
        })?;
        if !public.public_eq(&key) {
            return Err((
                ConfigurationError::PrivateKeyMismatch,
                "the private key does not belong to the leaf certificate",
            )
                .into());
        }
        builder.set_private_key(&key).map_err(|e| {
            crate::Error::from((
                PrivateKeyError::Unsupported,
                crate::support::format_error_stack(&e),
            )) >> ConfigurationError::InvalidPrivateKey
        })?;
        builder.check_private_key().map_err(|e| {
            (
                ConfigurationError::PrivateKeyMismatch,
                crate::support::format_error_stack(&e),
            )
        })?;
        Ok(())
    }

    /// Installs ALPN.
    fn apply_alpn(&self, builder: &mut SslContextBuilder, mode: Mode) -> crate::Result<()> {
        if self.alpn_protocols.is_empty() {
            return Ok(());
        }
        let wire = alpn_wire_format(&self.alpn_protocols)?;
        match mode {
            Mode::Client => builder.set_alpn_protos(&wire).map_err(|e| {
                (
                    ConfigurationError::Invalid,
                    crate::support::format_error_stack(&e),
                )
                    .into()
            }),
            Mode::Server => {
                builder.set_alpn_select_callback(move |_, client| {
                    select_alpn(&wire, client).ok_or(openssl::ssl::AlpnError::NOACK)
                });
                Ok(())
            }
        }
    }
}

/// Encodes ALPN protocols as length-prefixed strings.
pub(crate) fn alpn_wire_format(protocols: &[String]) -> crate::Result<Vec<u8>> {
    let mut wire = Vec::new();
    for proto in protocols {
        if proto.is_empty() {
            return Err(errors! {AlpnError::ProtocolEmpty => ConfigurationError::Invalid});
        }
        if proto.len() > MAX_ALPN_LENGTH {
            return Err(crate::Error::from((AlpnError::ProtocolTooLong, proto.clone()))
                >> ConfigurationError::Invalid);
        }
        if crate::support::contains_any_of(proto, "\0") {
            return Err(errors! {AlpnError::InvalidString => ConfigurationError::Invalid});
        }
        wire.push(proto.len() as u8);
        wire.extend_from_slice(proto.as_bytes());
    }
    Ok(wire)
}

/// Iterates over the protocols of an ALPN wire list. A truncated entry
/// ends the list.
fn alpn_entries(wire: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = wire;
    std::iter::from_fn(move || {
        let (&len, tail) = rest.split_first()?;
        let len = usize::from(len);
        if len == 0 || tail.len() < len {
            rest = &[];
            return None;
        }
        let (proto, tail) = tail.split_at(len);
        rest = tail;
        Some(proto)
    })
}

/// Picks the first server protocol the client offers. The result borrows
/// from the client list.
pub(crate) fn select_alpn<'a>(server: &[u8], client: &'a [u8]) -> Option<&'a [u8]> {
    alpn_entries(server).find_map(|wanted| alpn_entries(client).find(|offered| *offered == wanted))
}

/// Returns true for TLS 1.3 suite names, which cipher rules do not select.
fn is_tls13_suite(name: &str) -> bool {
    name.starts_with("TLS_")
}
