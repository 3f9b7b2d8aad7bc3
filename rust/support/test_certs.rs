// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Runtime generated certificates for unit tests.

use openssl::pkey::{PKey, Private};

use crate::certificate::forge::{self, ForgeRequest};

/// A certificate and its private key.
pub(crate) type Issued = forge::Identity;

/// Organization of test certificates.
const ORGANIZATION: &str = "tlsaudit tests";

/// Email alternative name of test leaves.
const EMAIL: &str = "admin@example.com";

/// Generates a P-256 key.
pub(crate) fn ec_key() -> PKey<Private> {
    forge::generate_key().unwrap()
}

/// A self-signed root CA, valid now.
pub(crate) fn root(cn: &str) -> Issued {
    forge::forge(
        &ForgeRequest::authority(cn).with_organization(ORGANIZATION),
        None,
    )
    .unwrap()
}

/// A leaf issued by `issuer`, valid now.
pub(crate) fn leaf(issuer: &Issued, cn: &str, dns: &[&str]) -> Issued {
    let mut request = ForgeRequest::leaf(cn)
        .with_organization(ORGANIZATION)
        .with_dns_names(dns);
    if !dns.is_empty() {
        request = request.with_email(EMAIL);
    }
    forge::forge(&request, Some(issuer)).unwrap()
}

/// A leaf issued by `issuer` whose validity ended ten days ago.
pub(crate) fn expired_leaf(issuer: &Issued, cn: &str) -> Issued {
    forge::forge(
        &ForgeRequest::leaf(cn)
            .with_organization(ORGANIZATION)
            .with_email(EMAIL)
            .expired(),
        Some(issuer),
    )
    .unwrap()
}

/// A self-signed leaf whose validity ended ten days ago.
pub(crate) fn expired_self_signed(cn: &str) -> Issued {
    forge::forge(
        &ForgeRequest::leaf(cn)
            .with_organization(ORGANIZATION)
            .with_email(EMAIL)
            .expired(),
        None,
    )
    .unwrap()
}
