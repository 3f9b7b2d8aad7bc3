// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! The standard set of scenarios.
//!
//! Certificate scenarios come first, protocol scenarios follow. Ids are
//! stable: a scenario that cannot be built for lack of a user identity is
//! left out, it does not shift the others.

use openssl::pkey::{PKey, Private};

use crate::certificate::forge::{forge, ForgeRequest, Identity};
use crate::certificate::Certificate;
use crate::error::ScenarioError;
use crate::tunnel::SslProtocol;

use super::{CipherTier, ScenarioKind, ScenarioSpec};

/// Host name certificates are issued for when they must not match.
pub const DEFAULT_OTHER_HOST: &str = "www.example.com";

/// A certificate chain and key the auditor owns, for instance a leaf a
/// public authority issued for a domain of theirs.
#[derive(Clone, Debug)]
pub struct UserIdentity {
    /// Leaf first.
    pub chain: Vec<Certificate>,
    pub key: PKey<Private>,
}

/// Inputs of the catalog.
#[derive(Clone, Debug)]
pub struct CatalogSettings {
    /// Host the peer under test expects to reach.
    pub target_host: String,
    /// Host name that does not match the target.
    pub other_host: String,
    pub user_identity: Option<UserIdentity>,
}

impl CatalogSettings {
    pub fn new(target_host: &str) -> Self {
        Self {
            target_host: target_host.to_string(),
            other_host: DEFAULT_OTHER_HOST.to_string(),
            user_identity: None,
        }
    }
}

/// Builds every scenario of the catalog.
pub fn build(settings: &CatalogSettings) -> crate::Result<Vec<ScenarioSpec>> {
    let mut specs = certificate_scenarios(settings)?;
    specs.extend(protocol_scenarios(settings)?);
    Ok(specs)
}

/// Builds the certificate scenarios.
pub fn certificate_scenarios(settings: &CatalogSettings) -> crate::Result<Vec<ScenarioSpec>> {
    let target = settings.target_host.as_str();
    let other = settings.other_host.as_str();
    let mut specs = Vec::new();

    let own = forge(&ForgeRequest::leaf(target), None)?;
    specs.push(certificate_spec(
        1,
        "certs_selfsigned_target",
        &format!("self-signed certificate for {target}"),
        vec![own.certificate()],
        own.key,
    ));

    let own = forge(&ForgeRequest::leaf(other), None)?;
    specs.push(certificate_spec(
        2,
        "certs_selfsigned_other",
        &format!("self-signed certificate for {other}"),
        vec![own.certificate()],
        own.key,
    ));

    if let Some(user) = settings.user_identity.as_ref() {
        let signer = user_signer(user)?;
        let forged = forge(&ForgeRequest::leaf(target), Some(&signer))?;
        let mut chain = vec![forged.certificate()];
        chain.extend(user.chain.iter().cloned());
        specs.push(certificate_spec(
            3,
            "certs_userleaf_signed_target",
            &format!("certificate for {target} signed by the user-supplied leaf"),
            chain,
            forged.key,
        ));
    }

    let authority = forge(&ForgeRequest::authority("tlsaudit authority"), None)?;
    let expired = forge(&ForgeRequest::leaf(target).expired(), Some(&authority))?;
    specs.push(certificate_spec(
        4,
        "certs_expired_target",
        &format!("expired certificate for {target}"),
        vec![expired.certificate(), authority.certificate()],
        expired.key,
    ));

    let wrong = match settings.user_identity.as_ref() {
        Some(user) => {
            let signer = user_signer(user)?;
            let forged = forge(&ForgeRequest::leaf(other), Some(&signer))?;
            let mut chain = vec![forged.certificate()];
            chain.extend(user.chain.iter().cloned());
            (chain, forged.key)
        }
        None => {
            let forged = forge(&ForgeRequest::leaf(other), Some(&authority))?;
            (
                vec![forged.certificate(), authority.certificate()],
                forged.key,
            )
        }
    };
    specs.push(certificate_spec(
        5,
        "certs_wrong_host",
        &format!("certificate for {other} presented as {target}"),
        wrong.0,
        wrong.1,
    ));

    Ok(specs)
}

/// Builds the protocol scenarios. They present the user identity if there is
/// one, a self-signed certificate for the target otherwise.
pub fn protocol_scenarios(settings: &CatalogSettings) -> crate::Result<Vec<ScenarioSpec>> {
    let (chain, key) = match settings.user_identity.as_ref() {
        Some(user) => (user.chain.clone(), user.key.clone()),
        None => {
            let own = forge(&ForgeRequest::leaf(&settings.target_host), None)?;
            (vec![own.certificate()], own.key)
        }
    };

    let mut plan = vec![(SslProtocol::SslV3, CipherTier::Supported)];
    for protocol in [SslProtocol::SslV3, SslProtocol::TlsV1_0, SslProtocol::TlsV1_1] {
        for tier in [CipherTier::Export, CipherTier::Low, CipherTier::Medium] {
            plan.push((protocol, tier));
        }
    }

    Ok(plan
        .into_iter()
        .zip(6..)
        .map(|((protocol, tier), id)| {
            ScenarioSpec::new(
                id,
                &format!("protocols_{}_{}", protocol_label(protocol), tier_label(tier)),
                &format!("{} with {tier} ciphers", protocol_display(protocol)),
                ScenarioKind::Protocol { protocol, tier },
            )
            .with_identity(chain.clone(), key.clone())
        })
        .collect())
}

fn certificate_spec(
    id: u32,
    name: &str,
    description: &str,
    chain: Vec<Certificate>,
    key: PKey<Private>,
) -> ScenarioSpec {
    ScenarioSpec::new(id, name, description, ScenarioKind::Certificate).with_identity(chain, key)
}

/// Turns the user leaf into a signer.
fn user_signer(user: &UserIdentity) -> crate::Result<Identity> {
    let leaf = user
        .chain
        .first()
        .ok_or((ScenarioError::InvalidSpec, "empty user certificate chain"))?;
    Ok(Identity {
        cert: leaf.to_x509().map_err(|e| e >> ScenarioError::InvalidSpec)?,
        key: user.key.clone(),
    })
}

fn protocol_label(protocol: SslProtocol) -> &'static str {
    match protocol {
        SslProtocol::SslV3 => "sslv3",
        SslProtocol::TlsV1_0 => "tls10",
        SslProtocol::TlsV1_1 => "tls11",
        SslProtocol::TlsV1_2 => "tls12",
        SslProtocol::TlsV1_3 => "tls13",
        _ => "other",
    }
}

fn protocol_display(protocol: SslProtocol) -> &'static str {
    match protocol {
        SslProtocol::SslV3 => "SSLv3",
        SslProtocol::TlsV1_0 => "TLS 1.0",
        SslProtocol::TlsV1_1 => "TLS 1.1",
        SslProtocol::TlsV1_2 => "TLS 1.2",
        SslProtocol::TlsV1_3 => "TLS 1.3",
        _ => "protocol policy",
    }
}

fn tier_label(tier: CipherTier) -> &'static str {
    match tier {
        CipherTier::Supported => "supported",
        CipherTier::Export => "export",
        CipherTier::Low => "low",
        CipherTier::Medium => "medium",
    }
}
