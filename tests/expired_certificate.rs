// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Test a TLS tunnel with an expired certificate.

mod support;

use support::tlsaudit;

use support::{pki, Link};
use tlsaudit::error::TunnelError;
use tlsaudit::tunnel::{State, TlsConfiguration};
use tlsaudit::verifier::{has_kind, VerificationErrorKind};

/// Simple message to send.
const MSG: &[u8] = b"hello world";

/// Host name of the expired certificate.
const HOST: &str = "expired.example.com";

/// Builds the server side from an expired self-signed certificate.
fn expired_server() -> TlsConfiguration {
    let expired = pki::expired_self_signed(HOST);
    TlsConfiguration::from_json(
        &serde_json::json!({
            "certificate_chain_pem": pki::pem_bundle(&[&expired]),
            "private_key_pem": pki::key_pem(&expired),
        })
        .to_string(),
    )
    .unwrap()
}

/// Builds the client side. It trusts nothing.
fn client(verify_mode: &str, ignored: &[&str]) -> TlsConfiguration {
    TlsConfiguration::from_json(
        &serde_json::json!({
            "verify_mode": verify_mode,
            "peer_verify_name": HOST,
            "trusted_cas_pem": "",
            "ignored_findings": ignored,
        })
        .to_string(),
    )
    .unwrap()
}

/// Test a TLS tunnel using an expired certificate.
///
/// Configuration:
///
///     Client:
///         verify_mode: VerifyPeer
///         trusted_cas: none
///         ignored_findings: none
///
///     Server:
///         certificate: expired, self-signed.
#[test]
fn test_nok_expired_certificate() {
    let mut link = Link::new(client("VerifyPeer", &[]), expired_server());
    link.run();

    assert_eq!(link.client.state(), State::Failed);
    assert_ne!(link.server.state(), State::Established);
    let e = link.client.last_error().unwrap();
    assert!(e.contains(TunnelError::HandshakeFailed));

    let findings = link.client.findings();
    assert!(has_kind(&findings, VerificationErrorKind::CertificateExpired));
    assert!(has_kind(&findings, VerificationErrorKind::SelfSignedCertificate));
    assert!(!has_kind(&findings, VerificationErrorKind::HostNameMismatch));
    assert!(link.client.write(MSG).is_err());
}

/// Test a TLS tunnel using an expired certificate, ignoring the findings it
/// raises.
///
/// Configuration:
///
///     Client:
///         verify_mode: VerifyPeer
///         trusted_cas: none
///         ignored_findings: CertificateExpired, SelfSignedCertificate
///
///     Server:
///         certificate: expired, self-signed.
#[test]
fn test_ok_expired_certificate_ignored() {
    let mut link = Link::new(
        client(
            "VerifyPeer",
            &["CertificateExpired", "SelfSignedCertificate"],
        ),
        expired_server(),
    );
    link.run();

    assert_eq!(link.client.state(), State::Established);
    assert_eq!(link.server.state(), State::Established);
    assert!(link.client_errors.is_empty());

    // Ignored findings are still reported.
    let findings = link.client.findings();
    assert!(has_kind(&findings, VerificationErrorKind::CertificateExpired));
    assert!(has_kind(&findings, VerificationErrorKind::SelfSignedCertificate));
    assert!(link.client.blocking_findings().is_empty());

    link.client.write(MSG).unwrap();
    link.run();
    assert_eq!(link.server.read_all(), MSG);
}

/// Test a TLS tunnel using an expired certificate, querying the peer
/// without enforcing the verification.
///
/// Configuration:
///
///     Client:
///         verify_mode: QueryPeer
///         trusted_cas: none
///
///     Server:
///         certificate: expired, self-signed.
#[test]
fn test_ok_expired_certificate_queried() {
    let mut link = Link::new(client("QueryPeer", &[]), expired_server());
    link.run();

    assert_eq!(link.client.state(), State::Established);
    assert!(has_kind(
        &link.client.blocking_findings(),
        VerificationErrorKind::CertificateExpired
    ));
    assert!(link
        .client
        .peer_certificate()
        .is_expired_at(time::OffsetDateTime::now_utc()));

    link.server.write(MSG).unwrap();
    link.run();
    assert_eq!(link.client.read_all(), MSG);
}
