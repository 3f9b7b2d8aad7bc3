// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Support for the integration test suite.

#![allow(dead_code)]

pub extern crate tlsaudit;

use tlsaudit::certificate::forge::{forge, ForgeRequest, Identity};
use tlsaudit::io::MpscIO;
use tlsaudit::trust::TrustStore;
use tlsaudit::tunnel::{Mode, TlsConfiguration, TlsEngine, VerifyMode};

/// Upper bound of exchange rounds.
const MAX_ROUNDS: usize = 256;

/// Installs the test logger.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub mod pki {
    use super::*;

    /// A root CA, valid now.
    pub fn root(cn: &str) -> Identity {
        forge(&ForgeRequest::authority(cn), None).unwrap()
    }

    /// An intermediate CA issued by `issuer`.
    pub fn intermediate(issuer: &Identity, cn: &str) -> Identity {
        forge(&ForgeRequest::authority(cn), Some(issuer)).unwrap()
    }

    /// A leaf issued by `issuer`, with `dns` as alternative names.
    pub fn leaf(issuer: &Identity, cn: &str, dns: &[&str]) -> Identity {
        forge(&ForgeRequest::leaf(cn).with_dns_names(dns), Some(issuer)).unwrap()
    }

    /// A self-signed leaf, valid now.
    pub fn self_signed(cn: &str) -> Identity {
        forge(&ForgeRequest::leaf(cn), None).unwrap()
    }

    /// A self-signed leaf whose validity ended ten days ago.
    pub fn expired_self_signed(cn: &str) -> Identity {
        forge(&ForgeRequest::leaf(cn).expired(), None).unwrap()
    }

    /// Renders certificates as a PEM bundle.
    pub fn pem_bundle(identities: &[&Identity]) -> String {
        identities
            .iter()
            .map(|i| i.certificate().to_pem())
            .collect::<Vec<_>>()
            .concat()
    }

    /// Renders the private key of an identity as PEM.
    pub fn key_pem(identity: &Identity) -> String {
        String::from_utf8(identity.key.private_key_to_pem_pkcs8().unwrap()).unwrap()
    }
}

/// A server configuration presenting `chain`, leaf first.
pub fn server_configuration(chain: &[&Identity]) -> TlsConfiguration {
    TlsConfiguration::default().with_identity(
        chain.iter().map(|i| i.certificate()).collect(),
        chain[0].key.clone(),
    )
}

/// A client configuration trusting `anchors` and verifying `name`.
pub fn client_configuration(anchors: &[&Identity], name: &str) -> TlsConfiguration {
    TlsConfiguration {
        verify_mode: VerifyMode::VerifyPeer,
        peer_verify_name: Some(name.to_string()),
        ..Default::default()
    }
    .with_trust_store(TrustStore::new(anchors.iter().map(|i| i.certificate())))
}

/// A client and a server linked by a pair of [`MpscIO`].
pub struct Link {
    pub client: TlsEngine,
    pub server: TlsEngine,
    pub client_io: MpscIO,
    pub server_io: MpscIO,
    pub client_errors: Vec<tlsaudit::Error>,
    pub server_errors: Vec<tlsaudit::Error>,
}

impl Link {
    /// Starts both engines.
    pub fn new(client: TlsConfiguration, server: TlsConfiguration) -> Self {
        init_logging();
        let (client_io, server_io) = MpscIO::new_pair();
        let mut client = TlsEngine::new(client);
        let mut server = TlsEngine::new(server);
        client.start(Mode::Client).unwrap();
        server.start(Mode::Server).unwrap();
        Self {
            client,
            server,
            client_io,
            server_io,
            client_errors: Vec::new(),
            server_errors: Vec::new(),
        }
    }

    /// Exchanges bytes until both sides are idle.
    pub fn run(&mut self) {
        for _ in 0..MAX_ROUNDS {
            let client = step(&mut self.client, &mut self.client_io, &mut self.client_errors);
            let server = step(&mut self.server, &mut self.server_io, &mut self.server_errors);
            if !client && !server {
                return;
            }
        }
        panic!("engines still busy after {MAX_ROUNDS} rounds");
    }
}

/// Pumps an engine against its transport once.
pub fn step(engine: &mut TlsEngine, io: &mut MpscIO, errors: &mut Vec<tlsaudit::Error>) -> bool {
    match engine.pump_io(io) {
        Ok(progress) => progress,
        Err(e) => {
            errors.push(e);
            true
        }
    }
}

/// A scenario facing a peer engine over a pair of [`MpscIO`].
pub struct Confrontation {
    pub runner: tlsaudit::scenario::ScenarioRunner,
    pub peer: TlsEngine,
    pub runner_io: MpscIO,
    pub peer_io: MpscIO,
    pub peer_errors: Vec<tlsaudit::Error>,
}

impl Confrontation {
    /// Starts the peer in client mode against `spec`.
    pub fn new(spec: tlsaudit::scenario::ScenarioSpec, peer: TlsConfiguration) -> Self {
        init_logging();
        let (runner_io, peer_io) = MpscIO::new_pair();
        let mut peer = TlsEngine::new(peer);
        peer.start(Mode::Client).unwrap();
        Self {
            runner: tlsaudit::scenario::ScenarioRunner::new(spec),
            peer,
            runner_io,
            peer_io,
            peer_errors: Vec::new(),
        }
    }

    /// Exchanges bytes until both sides are idle.
    pub fn run(&mut self) {
        for _ in 0..MAX_ROUNDS {
            let peer = step(&mut self.peer, &mut self.peer_io, &mut self.peer_errors);
            let runner = self.runner.step(&mut self.runner_io);
            if !peer && !runner {
                return;
            }
        }
        panic!("scenario still busy after {MAX_ROUNDS} rounds");
    }

    /// Classifies the scenario.
    pub fn finish(self) -> tlsaudit::scenario::ScenarioReport {
        self.runner.finish()
    }
}
