// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Man-in-the-middle relay between a client and a server.

use crate::tunnel::{Mode, State, TlsConfiguration, TlsEngine};
use crate::IO;

/// Relays plaintext between a client-facing engine, impersonating the
/// server, and a server-facing engine, impersonating the client.
///
/// Bytes keep their order within a direction. What the client sends is
/// recorded as intercepted.
pub struct ProxyRelay {
    /// Faces the client, runs in server mode.
    client_side: TlsEngine,

    /// Faces the server, runs in client mode.
    server_side: TlsEngine,

    intercepted: Vec<u8>,

    errors: Vec<crate::Error>,
}

impl std::fmt::Debug for ProxyRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ProxyRelay")
            .field("client_side", &self.client_side)
            .field("server_side", &self.server_side)
            .field("intercepted", &self.intercepted.len())
            .finish()
    }
}

impl ProxyRelay {
    pub fn new(client_facing: TlsConfiguration, server_facing: TlsConfiguration) -> Self {
        Self {
            client_side: TlsEngine::new(client_facing),
            server_side: TlsEngine::new(server_facing),
            intercepted: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Starts both engines.
    pub fn start(&mut self) -> crate::Result<()> {
        self.client_side.start(Mode::Server)?;
        self.server_side.start(Mode::Client)
    }

    /// Exchanges bytes with both transports once and relays plaintext.
    /// Returns true if anything moved.
    pub fn step(&mut self, client_io: &mut dyn IO, server_io: &mut dyn IO) -> bool {
        let mut progress = Self::pump(&mut self.client_side, client_io, &mut self.errors);
        progress |= self.relay();
        progress |= Self::pump(&mut self.server_side, server_io, &mut self.errors);
        progress |= self.relay();
        progress |= Self::pump(&mut self.client_side, client_io, &mut self.errors);

        // A side going away takes the other one with it.
        if is_done(&self.client_side) && is_live(&self.server_side) {
            progress |= self.server_side.shutdown().is_ok();
        }
        if is_done(&self.server_side) && is_live(&self.client_side) {
            progress |= self.client_side.shutdown().is_ok();
        }
        progress
    }

    fn pump(engine: &mut TlsEngine, io: &mut dyn IO, errors: &mut Vec<crate::Error>) -> bool {
        match engine.pump_io(io) {
            Ok(progress) => progress,
            Err(e) => {
                log::debug!("proxy: {e}");
                errors.push(e);
                true
            }
        }
    }

    /// Moves deciphered bytes to the other side.
    fn relay(&mut self) -> bool {
        let mut progress = false;
        let upstream = self.client_side.read_all();
        if !upstream.is_empty() {
            self.intercepted.extend_from_slice(&upstream);
            progress = true;
            if let Err(e) = self.server_side.write(&upstream) {
                log::warn!("proxy: dropping {} bytes to the server: {e}", upstream.len());
            }
        }
        let downstream = self.server_side.read_all();
        if !downstream.is_empty() {
            progress = true;
            if let Err(e) = self.client_side.write(&downstream) {
                log::warn!("proxy: dropping {} bytes to the client: {e}", downstream.len());
            }
        }
        progress
    }

    /// Bytes the client sent.
    pub fn intercepted(&self) -> &[u8] {
        &self.intercepted
    }

    /// Errors of either side, in order.
    pub fn errors(&self) -> &[crate::Error] {
        &self.errors
    }

    pub fn client_side(&self) -> &TlsEngine {
        &self.client_side
    }

    pub fn server_side(&self) -> &TlsEngine {
        &self.server_side
    }

    /// Returns true once both sides are closed or failed.
    pub fn is_finished(&self) -> bool {
        is_done(&self.client_side) && is_done(&self.server_side)
    }
}

fn is_done(engine: &TlsEngine) -> bool {
    matches!(engine.state(), State::Closed | State::Failed)
}

fn is_live(engine: &TlsEngine) -> bool {
    matches!(engine.state(), State::Handshaking | State::Established)
}
