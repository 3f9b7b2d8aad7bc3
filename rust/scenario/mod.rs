// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Adversarial scenarios.
//!
//! A scenario weakens one aspect of a handshake (the certificate presented,
//! or the protocol version and cipher suites offered), lets a peer connect,
//! and classifies how the peer reacted into a [`ScenarioResult`].
//!
//! Scenarios are described by a [`ScenarioSpec`], driven by a
//! [`runner::ScenarioRunner`] and summarized in a [`ScenarioReport`].
//! [`catalog`] builds the standard set.

use openssl::pkey::{PKey, Private};
use serde::{Deserialize, Serialize};

use crate::certificate::Certificate;
use crate::error::{ConfigurationError, ScenarioError};
use crate::tunnel::cipher::{list_ciphers, supported_ciphers};
use crate::tunnel::{Cipher, NegotiatedProtocol, SslProtocol, TlsConfiguration, VerifyMode};
use crate::verifier::VerificationFinding;

pub mod catalog;

pub mod proxy;
pub use proxy::ProxyRelay;

pub mod runner;
pub use runner::ScenarioRunner;

/// How a peer reacted to a scenario.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum ScenarioResult {
    /// The peer refused the connection, as it should.
    Success,
    /// No rule matched.
    #[default]
    Undefined,
    /// The scenario could not be configured.
    InitFailed,
    /// The peer sent application data over a connection it should have
    /// refused.
    DataIntercepted,
    /// The peer completed the handshake despite an invalid certificate.
    CertAccepted,
    /// The peer completed a legacy handshake and sent data.
    ProtoAccepted,
    /// The peer completed a legacy handshake, with errors.
    ProtoAcceptedWithErr,
}

impl ScenarioResult {
    /// Returns the numeric code of the result. Negative codes are failures
    /// of the peer under test.
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Undefined => -99,
            Self::InitFailed => -1,
            Self::DataIntercepted => -2,
            Self::CertAccepted => -3,
            Self::ProtoAccepted => -4,
            Self::ProtoAcceptedWithErr => -5,
        }
    }
}

impl std::fmt::Display for ScenarioResult {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Success => "PASSED",
                Self::Undefined => "UNDEFINED",
                Self::InitFailed => "INIT FAILED",
                Self::DataIntercepted => "FAILED: data intercepted",
                Self::CertAccepted => "FAILED: certificate accepted",
                Self::ProtoAccepted => "FAILED: protocol accepted",
                Self::ProtoAcceptedWithErr => "FAILED: protocol accepted with errors",
            }
        )
    }
}

/// Strength class of the suites a protocol scenario offers.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum CipherTier {
    /// Every supported suite.
    Supported,
    Export,
    Low,
    Medium,
}

impl CipherTier {
    /// Cipher rule selecting the tier, `None` for the supported list.
    pub fn rule(self) -> Option<&'static str> {
        match self {
            Self::Supported => None,
            Self::Export => Some("EXPORT"),
            Self::Low => Some("LOW"),
            Self::Medium => Some("MEDIUM"),
        }
    }

    /// Resolves the suites of the tier the library implements.
    pub fn resolve(self) -> Vec<Cipher> {
        match self.rule() {
            None => supported_ciphers().to_vec(),
            Some(rule) => list_ciphers(rule).unwrap_or_else(|e| {
                log::debug!("no {self:?} cipher available: {e}");
                Vec::new()
            }),
        }
    }
}

impl std::fmt::Display for CipherTier {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Supported => "supported",
                Self::Export => "EXPORT",
                Self::Low => "LOW",
                Self::Medium => "MEDIUM",
            }
        )
    }
}

/// Scenario family.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum ScenarioKind {
    /// Present an invalid certificate.
    Certificate,
    /// Force a protocol version and a cipher tier.
    Protocol { protocol: SslProtocol, tier: CipherTier },
}

/// Description of a scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub kind: ScenarioKind,

    /// Local certificate chain, leaf first, as PEM.
    #[serde(default)]
    pub certificate_chain_pem: Option<String>,

    /// Local private key, as PEM.
    #[serde(default)]
    pub private_key_pem: Option<String>,

    /// Local certificate chain. Takes precedence over
    /// `certificate_chain_pem`.
    #[serde(skip)]
    pub certificate_chain: Vec<Certificate>,

    #[serde(skip)]
    pub private_key: Option<PKey<Private>>,

    /// Protocol policy of certificate scenarios.
    #[serde(default)]
    pub protocol: SslProtocol,

    /// Suites of certificate scenarios. Empty means the defaults.
    #[serde(default)]
    pub ciphers: Vec<String>,
}

impl ScenarioSpec {
    pub fn new(id: u32, name: &str, description: &str, kind: ScenarioKind) -> Self {
        Self {
            id,
            name: name.to_string(),
            description: description.to_string(),
            kind,
            certificate_chain_pem: None,
            private_key_pem: None,
            certificate_chain: Vec::new(),
            private_key: None,
            protocol: SslProtocol::default(),
            ciphers: Vec::new(),
        }
    }

    /// Loads a batch of scenarios from a JSON array.
    pub fn list_from_json(json: &str) -> crate::Result<Vec<Self>> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::from((ConfigurationError::Parse, e.to_string())) >> ScenarioError::InvalidSpec
        })
    }

    pub fn with_identity(mut self, chain: Vec<Certificate>, key: PKey<Private>) -> Self {
        self.certificate_chain = chain;
        self.private_key = Some(key);
        self
    }

    /// Builds the configuration of the local engine, facing the peer under
    /// test.
    ///
    /// Errors are the reason the scenario is [`ScenarioResult::InitFailed`].
    pub fn configuration(&self) -> crate::Result<TlsConfiguration> {
        if self.certificate_chain.is_empty() && self.certificate_chain_pem.is_none() {
            return Err((ScenarioError::InvalidSpec, "no local certificate").into());
        }
        let mut configuration = TlsConfiguration {
            certificate_chain: self.certificate_chain.clone(),
            certificate_chain_pem: self.certificate_chain_pem.clone(),
            private_key: self.private_key.clone(),
            private_key_pem: self.private_key_pem.clone(),
            verify_mode: VerifyMode::VerifyNone,
            ..Default::default()
        };
        match self.kind {
            ScenarioKind::Certificate => {
                configuration.protocol = self.protocol;
                configuration.ciphers = self.ciphers.clone();
            }
            ScenarioKind::Protocol { protocol, tier } => {
                let ciphers = tier.resolve();
                if ciphers.is_empty() {
                    return Err((
                        ScenarioError::EmptyCipherTier,
                        format!("no {tier} cipher for {protocol:?}"),
                    )
                        .into());
                }
                configuration.protocol = protocol;
                configuration.ciphers = ciphers.into_iter().map(|c| c.name).collect();
            }
        }
        Ok(configuration)
    }
}

/// What a scenario observed.
#[derive(Clone, Debug, Default)]
pub struct Observation {
    /// The local engine could not be configured.
    pub init_failed: bool,

    /// The peer sent at least one byte.
    pub peer_seen: bool,

    pub established: bool,

    /// Plaintext the peer sent after the handshake.
    pub intercepted: Vec<u8>,

    pub findings: Vec<VerificationFinding>,

    /// Errors of the cipher layer.
    pub engine_errors: Vec<String>,

    /// Errors of the transport.
    pub socket_errors: Vec<String>,

    pub protocol: NegotiatedProtocol,

    pub cipher: Option<Cipher>,
}

/// Classifies a certificate scenario.
pub fn classify_certificate(o: &Observation) -> ScenarioResult {
    if o.init_failed {
        ScenarioResult::InitFailed
    } else if o.established && !o.intercepted.is_empty() {
        ScenarioResult::DataIntercepted
    } else if o.established {
        ScenarioResult::CertAccepted
    } else if o.peer_seen {
        ScenarioResult::Success
    } else {
        ScenarioResult::Undefined
    }
}

/// Classifies a protocol scenario.
pub fn classify_protocol(o: &Observation) -> ScenarioResult {
    let errors = !o.engine_errors.is_empty() || !o.findings.is_empty();
    if o.init_failed {
        ScenarioResult::InitFailed
    } else if o.established && !o.intercepted.is_empty() && !errors {
        ScenarioResult::ProtoAccepted
    } else if o.established && errors {
        ScenarioResult::ProtoAcceptedWithErr
    } else if !o.established && o.peer_seen {
        ScenarioResult::Success
    } else {
        ScenarioResult::Undefined
    }
}

/// Classifies an observation according to the scenario family.
pub fn classify(kind: ScenarioKind, observation: &Observation) -> ScenarioResult {
    match kind {
        ScenarioKind::Certificate => classify_certificate(observation),
        ScenarioKind::Protocol { .. } => classify_protocol(observation),
    }
}

/// Outcome of a scenario, for reporting.
#[derive(Clone, Debug)]
pub struct ScenarioReport {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub result: ScenarioResult,
    pub established: bool,
    pub protocol: NegotiatedProtocol,
    pub cipher: Option<Cipher>,
    pub intercepted: Vec<u8>,
    pub findings: Vec<VerificationFinding>,
    pub engine_errors: Vec<String>,
    pub socket_errors: Vec<String>,
}

impl ScenarioReport {
    pub fn new(spec: &ScenarioSpec, observation: Observation) -> Self {
        let result = classify(spec.kind, &observation);
        Self {
            id: spec.id,
            name: spec.name.clone(),
            description: spec.description.clone(),
            result,
            established: observation.established,
            protocol: observation.protocol,
            cipher: observation.cipher,
            intercepted: observation.intercepted,
            findings: observation.findings,
            engine_errors: observation.engine_errors,
            socket_errors: observation.socket_errors,
        }
    }

    /// Renders a one-line summary.
    pub fn summary(&self) -> String {
        let mut s = format!("#{} {}: {}", self.id, self.name, self.result);
        if self.established {
            s.push_str(&format!(
                " ({}, {})",
                self.protocol,
                self.cipher
                    .as_ref()
                    .map(|c| c.name.as_str())
                    .unwrap_or("unknown cipher")
            ));
        }
        if !self.intercepted.is_empty() {
            s.push_str(&format!(", {} bytes intercepted", self.intercepted.len()));
        }
        if !self.findings.is_empty() {
            s.push_str(&format!(", {} findings", self.findings.len()));
        }
        if let Some(e) = self.engine_errors.first().or(self.socket_errors.first()) {
            s.push_str(&format!(", {e}"));
        }
        s
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn established(data: &[u8]) -> Observation {
        Observation {
            peer_seen: true,
            established: true,
            intercepted: data.to_vec(),
            ..Default::default()
        }
    }

    /// Tests [`classify_certificate`].
    #[test]
    fn test_classify_certificate() {
        assert_eq!(
            classify_certificate(&established(b"x")),
            ScenarioResult::DataIntercepted
        );
        assert_eq!(
            classify_certificate(&established(b"")),
            ScenarioResult::CertAccepted
        );
        let rejected = Observation {
            peer_seen: true,
            engine_errors: vec!["alert bad certificate".to_string()],
            ..Default::default()
        };
        assert_eq!(classify_certificate(&rejected), ScenarioResult::Success);
        assert_eq!(
            classify_certificate(&Observation::default()),
            ScenarioResult::Undefined
        );
        let init = Observation {
            init_failed: true,
            ..established(b"x")
        };
        assert_eq!(classify_certificate(&init), ScenarioResult::InitFailed);
    }

    /// Tests [`classify_protocol`].
    #[test]
    fn test_classify_protocol() {
        assert_eq!(
            classify_protocol(&established(b"GET /")),
            ScenarioResult::ProtoAccepted
        );
        let mut with_err = established(b"GET /");
        with_err.engine_errors.push("record failed".to_string());
        assert_eq!(
            classify_protocol(&with_err),
            ScenarioResult::ProtoAcceptedWithErr
        );
        assert_eq!(
            classify_protocol(&established(b"")),
            ScenarioResult::Undefined
        );
        let refused = Observation {
            peer_seen: true,
            ..Default::default()
        };
        assert_eq!(classify_protocol(&refused), ScenarioResult::Success);
    }

    /// Tests the numeric result codes.
    #[test]
    fn test_result_codes() {
        assert_eq!(ScenarioResult::Success.code(), 0);
        assert_eq!(ScenarioResult::Undefined.code(), -99);
        assert_eq!(ScenarioResult::ProtoAcceptedWithErr.code(), -5);
    }

    /// Tests that a scenario without certificate cannot be configured.
    #[test]
    fn test_configuration_without_certificate() {
        let spec = ScenarioSpec::new(1, "empty", "no certificate", ScenarioKind::Certificate);
        let e = spec.configuration().err().unwrap();
        assert!(e.contains(ScenarioError::InvalidSpec));
    }

    /// Tests [`ScenarioSpec::list_from_json`].
    #[test]
    fn test_list_from_json() {
        let specs = ScenarioSpec::list_from_json(
            r#"[
                {"id": 1, "name": "cert", "description": "d", "kind": "Certificate"},
                {"id": 2, "name": "proto", "description": "d",
                 "kind": {"Protocol": {"protocol": "TlsV1_0", "tier": "Low"}}}
            ]"#,
        )
        .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(
            specs[1].kind,
            ScenarioKind::Protocol {
                protocol: SslProtocol::TlsV1_0,
                tier: CipherTier::Low
            }
        );
        assert!(ScenarioSpec::list_from_json("{}")
            .err()
            .unwrap()
            .contains(ScenarioError::InvalidSpec));
    }

    /// Tests [`ScenarioReport::summary`].
    #[test]
    fn test_summary() {
        let spec = ScenarioSpec::new(7, "expired", "expired leaf", ScenarioKind::Certificate);
        let report = ScenarioReport::new(&spec, established(b"abc"));
        assert_eq!(report.result, ScenarioResult::DataIntercepted);
        let s = report.summary();
        assert!(s.starts_with("#7 expired: FAILED: data intercepted"));
        assert!(s.contains("3 bytes intercepted"));
    }
}
