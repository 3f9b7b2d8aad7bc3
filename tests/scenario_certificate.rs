// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Test certificate scenarios against client engines.

mod support;

use support::tlsaudit;

use support::{pki, Confrontation};
use tlsaudit::scenario::catalog::{self, CatalogSettings, UserIdentity};
use tlsaudit::scenario::{ScenarioResult, ScenarioSpec};
use tlsaudit::trust::TrustStore;
use tlsaudit::tunnel::{State, TlsConfiguration, VerifyMode};
use tlsaudit::verifier::{has_kind, VerificationErrorKind};

/// Simple message to send.
const MSG: &[u8] = b"hello world";

/// Host the client expects.
const TARGET: &str = "target.example.org";

/// Returns the scenario of the catalog with the given id.
fn scenario(settings: &CatalogSettings, id: u32) -> ScenarioSpec {
    catalog::certificate_scenarios(settings)
        .unwrap()
        .into_iter()
        .find(|s| s.id == id)
        .unwrap()
}

/// A client that accepts any certificate.
fn insecure_client() -> TlsConfiguration {
    TlsConfiguration {
        verify_mode: VerifyMode::VerifyNone,
        peer_verify_name: Some(TARGET.to_string()),
        ..Default::default()
    }
}

/// A client that verifies the certificate against `anchors`.
fn verifying_client(anchors: TrustStore) -> TlsConfiguration {
    TlsConfiguration {
        verify_mode: VerifyMode::VerifyPeer,
        peer_verify_name: Some(TARGET.to_string()),
        ..Default::default()
    }
    .with_trust_store(anchors)
}

/// Test the expired certificate scenario against a client that accepts
/// anything and sends data.
///
/// Configuration:
///
///     Client:
///         verify_mode: VerifyNone
///
///     Scenario: `certs_expired_target`.
#[test]
fn test_expired_data_intercepted() {
    let spec = scenario(&CatalogSettings::new(TARGET), 4);
    assert_eq!(spec.name, "certs_expired_target");

    let mut c = Confrontation::new(spec, insecure_client());
    c.run();
    assert_eq!(c.peer.state(), State::Established);
    c.peer.write(MSG).unwrap();
    c.run();

    let report = c.finish();
    assert_eq!(report.result, ScenarioResult::DataIntercepted);
    assert_eq!(report.result.code(), -2);
    assert_eq!(report.intercepted, MSG);
    assert!(report.established);
    assert!(report.summary().starts_with("#4 certs_expired_target: FAILED: data intercepted"));
}

/// Test the expired certificate scenario against a client that accepts
/// anything and stays silent.
///
/// Configuration:
///
///     Client:
///         verify_mode: VerifyNone
///
///     Scenario: `certs_expired_target`.
#[test]
fn test_expired_cert_accepted() {
    let mut c = Confrontation::new(scenario(&CatalogSettings::new(TARGET), 4), insecure_client());
    c.run();
    assert_eq!(c.peer.state(), State::Established);

    let report = c.finish();
    assert_eq!(report.result, ScenarioResult::CertAccepted);
    assert!(report.intercepted.is_empty());
}

/// Test the expired certificate scenario against a verifying client.
///
/// Configuration:
///
///     Client:
///         verify_mode: VerifyPeer
///         trusted_cas: none
///
///     Scenario: `certs_expired_target`.
#[test]
fn test_expired_rejected() {
    let mut c = Confrontation::new(
        scenario(&CatalogSettings::new(TARGET), 4),
        verifying_client(TrustStore::default()),
    );
    c.run();

    assert_eq!(c.peer.state(), State::Failed);
    assert!(!c.peer.findings().is_empty());
    let report = c.finish();
    assert_eq!(report.result, ScenarioResult::Success);
    assert_eq!(report.result.code(), 0);
    assert!(!report.established);
}

/// Test the wrong host scenario against a client trusting the authority of
/// the user identity.
///
/// Configuration:
///
///     Client:
///         verify_mode: VerifyPeer
///         trusted_cas: user root
///
///     Scenario: `certs_wrong_host`, with a user identity issued by the
///     user root.
#[test]
fn test_wrong_host_rejected() {
    let root = pki::root("User Root");
    let user = pki::leaf(&root, "user.example.net", &["user.example.net"]);
    let settings = CatalogSettings {
        user_identity: Some(UserIdentity {
            chain: vec![user.certificate(), root.certificate()],
            key: user.key.clone(),
        }),
        ..CatalogSettings::new(TARGET)
    };
    let spec = scenario(&settings, 5);
    assert_eq!(spec.certificate_chain.len(), 3);

    let mut c = Confrontation::new(spec, verifying_client(TrustStore::new([root.certificate()])));
    c.run();

    assert_eq!(c.peer.state(), State::Failed);
    assert!(has_kind(
        &c.peer.findings(),
        VerificationErrorKind::HostNameMismatch
    ));
    assert_eq!(c.finish().result, ScenarioResult::Success);
}

/// Test the self-signed scenario against a client that queries the peer
/// without enforcing the verification.
///
/// Configuration:
///
///     Client:
///         verify_mode: QueryPeer
///
///     Scenario: `certs_selfsigned_target`.
#[test]
fn test_selfsigned_queried() {
    let client = TlsConfiguration {
        verify_mode: VerifyMode::QueryPeer,
        ..verifying_client(TrustStore::default())
    };
    let mut c = Confrontation::new(scenario(&CatalogSettings::new(TARGET), 1), client);
    c.run();

    assert_eq!(c.peer.state(), State::Established);
    assert!(has_kind(
        &c.peer.findings(),
        VerificationErrorKind::SelfSignedCertificate
    ));
    c.peer.write(MSG).unwrap();
    c.run();
    assert_eq!(c.finish().result, ScenarioResult::DataIntercepted);
}
