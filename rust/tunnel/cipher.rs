// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Cipher suites and cipher policies.

use std::sync::{Arc, OnceLock};

use foreign_types::ForeignTypeRef;
use openssl::ssl::{Ssl, SslCipher, SslCipherRef, SslContext, SslMethod, SslRef};
use openssl::stack::StackRef;
use openssl_sys as ffi;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, SystemError};
use crate::support::{errstr, format_error_stack, join_strings_with_delimiter};

extern "C" {
    fn SSL_get_ciphers(ssl: *const ffi::SSL) -> *mut ffi::stack_st_SSL_CIPHER;
}

/// Cipher rule that lets every suite through, whatever its strength.
pub(crate) const ALL_CIPHERS: &str = "ALL:COMPLEMENTOFDEFAULT";

/// Suffix lowering the library security level so that legacy suites and
/// protocol versions can be negotiated.
pub(crate) const LEGACY_SECURITY_LEVEL: &str = "@SECLEVEL=0";

/// Name prefixes of the suites that offer no authentication at all.
const ANONYMOUS_PREFIXES: [&str; 3] = ["adh", "exp-adh", "aecdh"];

/// Minimum strength of a default cipher, in bits.
const DEFAULT_MIN_BITS: i32 = 128;

/// A cipher suite, as described by the library.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct Cipher {
    /// Library name, e.g. `ECDHE-RSA-AES128-GCM-SHA256`.
    pub name: String,

    /// Protocol string, e.g. `TLSv1.2`.
    pub protocol: String,

    /// Key exchange label.
    pub key_exchange: String,

    /// Authentication label.
    pub authentication: String,

    /// Encryption label.
    pub encryption: String,

    /// True for export-grade suites.
    pub exportable: bool,

    /// Strength actually used, in bits.
    pub used_bits: i32,

    /// Strength of the algorithm, in bits.
    pub supported_bits: i32,
}

impl Cipher {
    /// Parses the canonical one-line description of a suite.
    ///
    /// Returns `None` if the description has fewer fields than expected.
    pub fn from_description(description: &str, used_bits: i32, supported_bits: i32) -> Option<Self> {
        let fields = description.split_whitespace().collect::<Vec<_>>();
        if fields.len() <= 5 {
            return None;
        }
        let label = |i: usize, prefix: &str| {
            fields[i]
                .strip_prefix(prefix)
                .map(str::to_string)
                .unwrap_or_default()
        };
        Some(Self {
            name: fields[0].to_string(),
            protocol: fields[1].to_string(),
            key_exchange: label(2, "Kx="),
            authentication: label(3, "Au="),
            encryption: label(4, "Enc="),
            exportable: fields.get(6).map(|f| *f == "export").unwrap_or(false),
            used_bits,
            supported_bits,
        })
    }

    /// Describes a library suite.
    pub(crate) fn from_ssl_cipher(cipher: &SslCipherRef) -> Option<Self> {
        let bits = cipher.bits();
        Self::from_description(&cipher.description(), bits.secret, bits.algorithm)
    }

    /// Returns true for the suites that offer no authentication.
    pub fn is_anonymous(&self) -> bool {
        let name = self.name.to_ascii_lowercase();
        ANONYMOUS_PREFIXES.iter().any(|p| name.starts_with(p))
    }

    /// Returns true for TLS 1.3 suites, which are not selected by cipher
    /// rules.
    pub fn is_tls13(&self) -> bool {
        self.protocol == "TLSv1.3"
    }
}

impl std::fmt::Display for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} ({} bits)", self.name, self.used_bits)
    }
}

/// Returns the suites enabled on a session.
pub(crate) fn session_ciphers(ssl: &SslRef) -> Vec<Cipher> {
    let ptr = unsafe { SSL_get_ciphers(ssl.as_ptr()) };
    if ptr.is_null() {
        return Vec::new();
    }
    let stack = unsafe { StackRef::<SslCipher>::from_ptr(ptr) };
    stack.iter().filter_map(Cipher::from_ssl_cipher).collect()
}

/// Lists the suites a cipher rule string selects.
///
/// The rule is evaluated at the lowest security level, so weak suites the
/// library still implements are listed too. TLS 1.3 suites are left out.
pub fn list_ciphers(rule: &str) -> crate::Result<Vec<Cipher>> {
    crate::support::ensure_library_initialized();
    let mut builder = SslContext::builder(SslMethod::tls())
        .map_err(|e| (SystemError::Memory, format_error_stack(&e)))?;
    builder
        .set_cipher_list(&format!("{rule}:{LEGACY_SECURITY_LEVEL}"))
        .map_err(|e| {
            (
                ConfigurationError::InvalidCipherList,
                format!("{rule}: {}", format_error_stack(&e)),
            )
        })?;
    let ctx = builder.build();
    let ssl = Ssl::new(&ctx).map_err(|_| (SystemError::Memory, errstr()))?;
    Ok(session_ciphers(&ssl)
        .into_iter()
        .filter(|c| !c.is_tls13())
        .collect())
}

/// Renders cipher names as a rule string.
pub(crate) fn cipher_rule<S: AsRef<str>>(names: &[S]) -> String {
    join_strings_with_delimiter(names.iter(), ':')
}

/// Process-wide cipher lists.
struct CipherLists {
    supported: Arc<[Cipher]>,
    default: Arc<[Cipher]>,
}

impl CipherLists {
    fn compute() -> Self {
        let all = match list_ciphers(ALL_CIPHERS) {
            Ok(all) => all,
            Err(e) => {
                log::error!("failed to list the supported ciphers: {e}");
                Vec::new()
            }
        };
        let supported = all
            .into_iter()
            .filter(|c| !c.is_anonymous())
            .collect::<Vec<_>>();
        let default = supported
            .iter()
            .filter(|c| c.used_bits >= DEFAULT_MIN_BITS)
            .cloned()
            .collect::<Vec<_>>();
        log::debug!(
            "{} supported ciphers, {} default ciphers",
            supported.len(),
            default.len()
        );
        Self {
            supported: supported.into(),
            default: default.into(),
        }
    }
}

fn lists() -> &'static RwLock<CipherLists> {
    static LISTS: OnceLock<RwLock<CipherLists>> = OnceLock::new();
    LISTS.get_or_init(|| RwLock::new(CipherLists::compute()))
}

/// Returns every suite the library implements, anonymous suites excluded.
pub fn supported_ciphers() -> Arc<[Cipher]> {
    lists().read().supported.clone()
}

/// Returns the suites offered when a configuration names none: the
/// supported suites of at least 128 bits, unless replaced.
pub fn default_ciphers() -> Arc<[Cipher]> {
    lists().read().default.clone()
}

/// Replaces the supported list. Sessions already holding the previous list
/// keep it.
pub fn set_supported_ciphers(ciphers: Vec<Cipher>) {
    lists().write().supported = ciphers.into();
}

/// Replaces the default list.
pub fn set_default_ciphers(ciphers: Vec<Cipher>) {
    lists().write().default = ciphers.into();
}
