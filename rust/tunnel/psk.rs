// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Pre-shared key authentication.

use openssl::error::ErrorStack;
use openssl::ssl::{SslContextBuilder, SslRef};
use serde::{Deserialize, Serialize};

use crate::tunnel::Mode;

/// Credentials of a pre-shared key handshake.
///
/// An empty key makes the callback decline, which aborts the handshake.
#[derive(Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PskAuthenticator {
    /// Identity sent by a client, expected by a server. A server with an
    /// empty identity accepts any.
    pub identity: String,

    /// Hint a server advertises.
    #[serde(default)]
    pub identity_hint: Option<String>,

    /// The shared secret.
    pub key: Vec<u8>,
}

impl std::fmt::Debug for PskAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PskAuthenticator")
            .field("identity", &self.identity)
            .field("identity_hint", &self.identity_hint)
            .field("key", &format_args!("<{} bytes>", self.key.len()))
            .finish()
    }
}

impl PskAuthenticator {
    /// Fills the client identity and key buffers. Returns the key length,
    /// 0 to decline.
    fn client_fill(&self, hint: Option<&[u8]>, identity: &mut [u8], psk: &mut [u8]) -> usize {
        if let Some(hint) = hint {
            log::debug!("server PSK identity hint: {}", String::from_utf8_lossy(hint));
        }
        let id = self.identity.as_bytes();
        // Room for the NUL terminator.
        if self.key.is_empty() || id.len() >= identity.len() || self.key.len() > psk.len() {
            log::warn!(
                "declining PSK handshake: key of {} bytes, identity of {} bytes",
                self.key.len(),
                id.len()
            );
            return 0;
        }
        identity[..id.len()].copy_from_slice(id);
        identity[id.len()] = 0;
        psk[..self.key.len()].copy_from_slice(&self.key);
        self.key.len()
    }

    /// Checks the client identity and fills the key buffer. Returns the key
    /// length, 0 to decline.
    fn server_fill(&self, identity: Option<&[u8]>, psk: &mut [u8]) -> usize {
        let received = identity.unwrap_or_default();
        if !self.identity.is_empty() && received != self.identity.as_bytes() {
            log::warn!(
                "declining PSK handshake for identity {}",
                String::from_utf8_lossy(received)
            );
            return 0;
        }
        if self.key.is_empty() || self.key.len() > psk.len() {
            log::warn!("declining PSK handshake: key of {} bytes", self.key.len());
            return 0;
        }
        psk[..self.key.len()].copy_from_slice(&self.key);
        self.key.len()
    }

    /// Installs the callback matching `mode`.
    pub(crate) fn install(&self, builder: &mut SslContextBuilder, mode: Mode) -> crate::Result<()> {
        let auth = self.clone();
        match mode {
            Mode::Client => builder.set_psk_client_callback(
                move |_: &mut SslRef, hint: Option<&[u8]>, identity: &mut [u8], psk: &mut [u8]| {
                    Ok::<usize, ErrorStack>(auth.client_fill(hint, identity, psk))
                },
            ),
            Mode::Server => {
                if let Some(hint) = self.identity_hint.as_deref() {
                    set_identity_hint(builder, hint)?;
                }
                builder.set_psk_server_callback(
                    move |_: &mut SslRef, identity: Option<&[u8]>, psk: &mut [u8]| {
                        Ok::<usize, ErrorStack>(auth.server_fill(identity, psk))
                    },
                )
            }
        }
        Ok(())
    }
}

extern "C" {
    fn SSL_CTX_use_psk_identity_hint(
        ctx: *mut openssl_sys::SSL_CTX,
        hint: *const std::ffi::c_char,
    ) -> std::ffi::c_int;
}

/// Sets the hint a server advertises.
fn set_identity_hint(builder: &mut SslContextBuilder, hint: &str) -> crate::Result<()> {
    use crate::error::ConfigurationError;

    let hint = std::ffi::CString::new(hint)
        .map_err(|_| (ConfigurationError::Invalid, "PSK identity hint contains a NUL byte"))?;
    if unsafe { SSL_CTX_use_psk_identity_hint(builder.as_ptr(), hint.as_ptr()) } != 1 {
        return Err((ConfigurationError::Invalid, crate::support::errstr()).into());
    }
    Ok(())
}
