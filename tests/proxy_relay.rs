// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Test a man-in-the-middle relay between a client and an echo server.

mod support;

use support::tlsaudit;

use support::{client_configuration, pki, server_configuration, step};
use tlsaudit::io::MpscIO;
use tlsaudit::scenario::ProxyRelay;
use tlsaudit::tunnel::{Mode, State, TlsConfiguration, TlsEngine, VerifyMode};

/// Simple message to send.
const MSG: &[u8] = b"hello world";

/// Host the client believes it talks to.
const HOST: &str = "echo.example.com";

/// Upper bound of exchange rounds.
const MAX_ROUNDS: usize = 256;

/// A client, a relay and an echo server, chained over two pairs of
/// [`MpscIO`].
struct Chain {
    client: TlsEngine,
    relay: ProxyRelay,
    server: TlsEngine,
    client_io: MpscIO,
    relay_client_io: MpscIO,
    relay_server_io: MpscIO,
    server_io: MpscIO,
    errors: Vec<tlsaudit::Error>,
}

impl Chain {
    fn new(client: TlsConfiguration, relay: ProxyRelay, server: TlsConfiguration) -> Self {
        support::init_logging();
        let (client_io, relay_client_io) = MpscIO::new_pair();
        let (relay_server_io, server_io) = MpscIO::new_pair();
        let mut client = TlsEngine::new(client);
        let mut server = TlsEngine::new(server);
        let mut relay = relay;
        client.start(Mode::Client).unwrap();
        relay.start().unwrap();
        server.start(Mode::Server).unwrap();
        Self {
            client,
            relay,
            server,
            client_io,
            relay_client_io,
            relay_server_io,
            server_io,
            errors: Vec::new(),
        }
    }

    /// Exchanges bytes until every party is idle. The server echoes what it
    /// reads.
    fn run(&mut self) {
        for _ in 0..MAX_ROUNDS {
            let mut progress = step(&mut self.client, &mut self.client_io, &mut self.errors);
            progress |= self
                .relay
                .step(&mut self.relay_client_io, &mut self.relay_server_io);
            progress |= step(&mut self.server, &mut self.server_io, &mut self.errors);
            let echo = self.server.read_all();
            if !echo.is_empty() {
                self.server.write(&echo).unwrap();
                progress = true;
            }
            if !progress {
                return;
            }
        }
        panic!("chain still busy after {MAX_ROUNDS} rounds");
    }
}

/// Builds the relay: it impersonates `HOST` with a certificate issued by its
/// own authority, and trusts the real server's authority.
fn relay(server_root: &tlsaudit::certificate::Identity) -> ProxyRelay {
    let relay_root = pki::root("Relay Root");
    let forged = pki::leaf(&relay_root, HOST, &[HOST]);
    ProxyRelay::new(
        server_configuration(&[&forged]),
        client_configuration(&[server_root], HOST),
    )
}

/// Test an insecure client talking through the relay.
///
/// Configuration:
///
///     Client:
///         verify_mode: VerifyNone
///
///     Relay:
///         client facing: leaf for `echo.example.com` issued by the relay
///         root.
///         server facing: verify_mode VerifyPeer, trusted_cas: server root.
///
///     Server:
///         certificate chain: leaf for `echo.example.com` issued by the
///         server root.
#[test]
fn test_relay_intercepts() {
    let server_root = pki::root("Server Root");
    let server_leaf = pki::leaf(&server_root, HOST, &[HOST]);
    let client = TlsConfiguration {
        verify_mode: VerifyMode::VerifyNone,
        ..Default::default()
    };
    let mut chain = Chain::new(
        client,
        relay(&server_root),
        server_configuration(&[&server_leaf]),
    );
    chain.run();

    assert_eq!(chain.client.state(), State::Established);
    assert_eq!(chain.relay.client_side().state(), State::Established);
    assert_eq!(chain.relay.server_side().state(), State::Established);
    assert_eq!(chain.server.state(), State::Established);
    assert!(chain.errors.is_empty());
    assert!(chain.relay.server_side().findings().is_empty());

    // The client sees the forged certificate.
    assert_eq!(
        chain.client.peer_certificate().issuer_attribute("CN"),
        vec!["Relay Root".to_string()]
    );

    chain.client.write(MSG).unwrap();
    chain.run();
    assert_eq!(chain.relay.intercepted(), MSG);
    assert_eq!(chain.client.read_all(), MSG);

    chain.client.write(MSG).unwrap();
    chain.run();
    assert_eq!(chain.relay.intercepted(), [MSG, MSG].concat());
    assert_eq!(chain.client.read_all(), MSG);

    chain.client.shutdown().unwrap();
    chain.run();
    assert_eq!(chain.client.state(), State::Closed);
    assert!(chain.relay.is_finished());
    assert_eq!(chain.server.state(), State::Closed);
    assert!(chain.relay.errors().is_empty());
}

/// Test a verifying client: it refuses the relay, which never reaches the
/// server with data.
///
/// Configuration:
///
///     Client:
///         verify_mode: VerifyPeer
///         trusted_cas: server root
///
///     Relay: as above.
///
///     Server: as above.
#[test]
fn test_relay_refused() {
    let server_root = pki::root("Server Root");
    let server_leaf = pki::leaf(&server_root, HOST, &[HOST]);
    let mut chain = Chain::new(
        client_configuration(&[&server_root], HOST),
        relay(&server_root),
        server_configuration(&[&server_leaf]),
    );
    chain.run();

    assert_eq!(chain.client.state(), State::Failed);
    assert_eq!(chain.relay.client_side().state(), State::Failed);
    assert!(!chain.relay.errors().is_empty());
    assert!(chain.relay.intercepted().is_empty());
    assert_eq!(chain.server.available(), 0);
}
