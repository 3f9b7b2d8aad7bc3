// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Test a TLS tunnel that pauses its handshake on verification findings.

mod support;

use support::tlsaudit;

use support::{client_configuration, pki, server_configuration, Link};
use tlsaudit::error::TunnelError;
use tlsaudit::tunnel::{State, TlsConfiguration};
use tlsaudit::verifier::{has_kind, VerificationErrorKind};

/// Simple message to send.
const MSG: &[u8] = b"hello world";

/// Host name of the server.
const HOST: &str = "paused.example.com";

/// Returns a client verifying `HOST` that trusts nothing and pauses on
/// findings.
fn pausing_client() -> TlsConfiguration {
    TlsConfiguration {
        pause_on_findings: true,
        ..client_configuration(&[], HOST)
    }
}

/// Test a paused handshake that is resumed.
///
/// Configuration:
///
///     Client:
///         verify_mode: VerifyPeer
///         trusted_cas: none
///         pause_on_findings: true
///
///     Server:
///         certificate: self-signed.
#[test]
fn test_pause_and_resume() {
    let own = pki::self_signed(HOST);
    let mut link = Link::new(pausing_client(), server_configuration(&[&own]));
    link.run();

    assert!(link.client.is_paused());
    assert_eq!(link.client.state(), State::Handshaking);
    assert!(link.client_errors.is_empty());
    let findings = link.client.blocking_findings();
    assert!(!findings.is_empty());
    assert!(!has_kind(&findings, VerificationErrorKind::HostNameMismatch));

    // Plaintext is held back while paused.
    link.client.write(MSG).unwrap();
    link.server.write(MSG).unwrap();
    link.run();
    assert_eq!(link.client.available(), 0);
    assert_eq!(link.server.available(), 0);

    link.client.resume().unwrap();
    assert!(!link.client.is_paused());
    assert_eq!(link.client.state(), State::Established);
    link.run();
    assert_eq!(link.client.read_all(), MSG);
    assert_eq!(link.server.read_all(), MSG);

    // Findings outlive the pause.
    assert_eq!(link.client.blocking_findings(), findings);
    assert!(link.client.resume().is_err());
}

/// Test a paused handshake that is aborted.
///
/// Configuration:
///
///     Client:
///         verify_mode: VerifyPeer
///         trusted_cas: none
///         pause_on_findings: true
///
///     Server:
///         certificate: self-signed, expired.
#[test]
fn test_pause_and_abort() {
    let expired = pki::expired_self_signed(HOST);
    let mut link = Link::new(pausing_client(), server_configuration(&[&expired]));
    link.run();

    assert!(link.client.is_paused());
    assert!(has_kind(
        &link.client.findings(),
        VerificationErrorKind::CertificateExpired
    ));

    link.client.abort();
    assert_eq!(link.client.state(), State::Failed);
    assert!(!link.client.is_paused());
    assert!(link
        .client
        .last_error()
        .unwrap()
        .contains(TunnelError::Closed));
    assert!(link.client.resume().is_err());
    assert!(link.client.write(MSG).is_err());
    assert!(link.client.pump().is_err());
}

/// Test a pause lifted by ignoring the findings that caused it.
///
/// Configuration:
///
///     Client:
///         verify_mode: VerifyPeer
///         trusted_cas: none
///         pause_on_findings: true
///
///     Server:
///         certificate: self-signed.
#[test]
fn test_pause_then_ignore() {
    let own = pki::self_signed(HOST);
    let mut link = Link::new(pausing_client(), server_configuration(&[&own]));
    link.run();
    assert!(link.client.is_paused());

    let kinds = link
        .client
        .blocking_findings()
        .iter()
        .map(|f| f.kind)
        .collect::<Vec<_>>();
    link.client.ignore_findings(&kinds);
    assert!(link.client.blocking_findings().is_empty());
    assert!(!link.client.findings().is_empty());
    assert_eq!(link.client.configuration().ignored_findings, kinds);

    link.client.resume().unwrap();
    link.server.write(MSG).unwrap();
    link.run();
    assert_eq!(link.client.read_all(), MSG);
}
