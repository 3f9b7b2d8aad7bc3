// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Protocol version policies.

use openssl::ssl::{SslContextBuilder, SslOptions, SslVersion};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// A protocol version policy, as requested by a configuration.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum SslProtocol {
    SslV3,
    TlsV1_0,
    TlsV1_1,
    TlsV1_2,
    TlsV1_3,
    /// TLS 1.0 or SSL 3.
    TlsV1SslV3,
    /// Every version except the ones known to be broken.
    #[default]
    SecureProtocols,
    AnyProtocol,
    TlsV1_0OrLater,
    TlsV1_1OrLater,
    TlsV1_2OrLater,
    TlsV1_3OrLater,
    UnknownProtocol,
}

/// Concrete settings a policy expands to.
#[derive(Clone, Copy, Eq, PartialEq)]
pub(crate) struct VersionBounds {
    pub(crate) options: SslOptions,
    pub(crate) min: Option<SslVersion>,
    pub(crate) max: Option<SslVersion>,
}

impl SslProtocol {
    /// Expands the policy into library options and version bounds.
    pub(crate) fn bounds(self) -> crate::Result<VersionBounds> {
        let legacy = SslOptions::ALL | SslOptions::NO_SSLV2;
        let secure = legacy | SslOptions::NO_SSLV3;
        let exact = |v: SslVersion| VersionBounds {
            options: SslOptions::ALL,
            min: Some(v),
            max: Some(v),
        };
        let at_least = |options: SslOptions, v: SslVersion| VersionBounds {
            options,
            min: Some(v),
            max: None,
        };
        Ok(match self {
            Self::SslV3 => exact(SslVersion::SSL3),
            Self::TlsV1_0 => exact(SslVersion::TLS1),
            Self::TlsV1_1 => exact(SslVersion::TLS1_1),
            Self::TlsV1_2 => exact(SslVersion::TLS1_2),
            Self::TlsV1_3 => exact(SslVersion::TLS1_3),
            Self::TlsV1SslV3 => VersionBounds {
                options: legacy,
                min: Some(SslVersion::SSL3),
                max: Some(SslVersion::TLS1),
            },
            Self::SecureProtocols | Self::TlsV1_0OrLater => at_least(secure, SslVersion::TLS1),
            Self::TlsV1_1OrLater => at_least(secure | SslOptions::NO_TLSV1, SslVersion::TLS1_1),
            Self::TlsV1_2OrLater => at_least(
                secure | SslOptions::NO_TLSV1 | SslOptions::NO_TLSV1_1,
                SslVersion::TLS1_2,
            ),
            Self::TlsV1_3OrLater => at_least(
                secure | SslOptions::NO_TLSV1 | SslOptions::NO_TLSV1_1 | SslOptions::NO_TLSV1_2,
                SslVersion::TLS1_3,
            ),
            Self::AnyProtocol => at_least(SslOptions::ALL, SslVersion::SSL3),
            Self::UnknownProtocol => {
                return Err((
                    ConfigurationError::UnsupportedProtocol,
                    "unknown protocol policy",
                )
                    .into())
            }
        })
    }

    /// Returns true if the policy lets versions older than TLS 1.2 through,
    /// which requires lowering the library security level.
    pub(crate) fn allows_legacy(self) -> bool {
        !matches!(
            self,
            Self::TlsV1_2 | Self::TlsV1_3 | Self::TlsV1_2OrLater | Self::TlsV1_3OrLater
        )
    }

    /// Returns true if the policy only allows SSL 3, which has no SNI.
    pub(crate) fn is_ssl3_only(self) -> bool {
        self == Self::SslV3
    }

    /// Applies the policy to a context builder.
    pub(crate) fn apply(self, builder: &mut SslContextBuilder) -> crate::Result<()> {
        let bounds = self.bounds()?;
        builder.clear_options(SslOptions::NO_SSLV3 | SslOptions::NO_TLSV1 | SslOptions::NO_TLSV1_1);
        builder.set_options(bounds.options);
        builder
            .set_min_proto_version(bounds.min)
            .and_then(|_| builder.set_max_proto_version(bounds.max))
            .map_err(|e| {
                (
                    ConfigurationError::UnsupportedProtocol,
                    format!("{self:?}: {}", crate::support::format_error_stack(&e)),
                )
                    .into()
            })
    }
}

/// The protocol version a session negotiated.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum NegotiatedProtocol {
    SslV3,
    TlsV1_0,
    TlsV1_1,
    TlsV1_2,
    TlsV1_3,
    #[default]
    Unknown,
}

impl NegotiatedProtocol {
    /// Maps a wire protocol version.
    pub fn from_wire(version: u16) -> Self {
        match version {
            0x300 => Self::SslV3,
            0x301 => Self::TlsV1_0,
            0x302 => Self::TlsV1_1,
            0x303 => Self::TlsV1_2,
            0x304 => Self::TlsV1_3,
            _ => Self::Unknown,
        }
    }

    /// Maps a library version.
    pub(crate) fn from_ssl_version(version: Option<SslVersion>) -> Self {
        let wire = match version {
            Some(v) if v == SslVersion::SSL3 => 0x300,
            Some(v) if v == SslVersion::TLS1 => 0x301,
            Some(v) if v == SslVersion::TLS1_1 => 0x302,
            Some(v) if v == SslVersion::TLS1_2 => 0x303,
            Some(v) if v == SslVersion::TLS1_3 => 0x304,
            _ => 0,
        };
        Self::from_wire(wire)
    }
}

impl std::fmt::Display for NegotiatedProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::SslV3 => "SSLv3",
                Self::TlsV1_0 => "TLSv1.0",
                Self::TlsV1_1 => "TLSv1.1",
                Self::TlsV1_2 => "TLSv1.2",
                Self::TlsV1_3 => "TLSv1.3",
                Self::Unknown => "unknown",
            }
        )
    }
}
