// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Drives one scenario against a transport.

use crate::error::TunnelError;
use crate::tunnel::{Mode, State, TlsEngine};
use crate::IO;

use super::{Observation, ScenarioReport, ScenarioResult, ScenarioSpec};

/// Upper bound of steps [`ScenarioRunner::run_until_idle`] takes.
const MAX_IDLE_STEPS: usize = 1024;

/// Runs a [`ScenarioSpec`].
///
/// The runner impersonates a server by default. Every call to
/// [`ScenarioRunner::step`] exchanges bytes with the transport once, so a
/// caller can interleave the peer.
pub struct ScenarioRunner {
    spec: ScenarioSpec,
    engine: TlsEngine,
    observation: Observation,
}

impl std::fmt::Debug for ScenarioRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ScenarioRunner")
            .field("id", &self.spec.id)
            .field("engine", &self.engine)
            .finish()
    }
}

impl ScenarioRunner {
    /// Configures and starts the local engine in server mode.
    pub fn new(spec: ScenarioSpec) -> Self {
        Self::with_mode(spec, Mode::Server)
    }

    /// Configures and starts the local engine.
    ///
    /// A configuration failure is recorded, not returned: the scenario then
    /// reports [`ScenarioResult::InitFailed`].
    pub fn with_mode(spec: ScenarioSpec, mode: Mode) -> Self {
        let mut observation = Observation::default();
        let engine = match spec.configuration() {
            Ok(configuration) => {
                let mut engine = TlsEngine::new(configuration);
                if let Err(e) = engine.start(mode) {
                    observation.init_failed = true;
                    observation.engine_errors.push(e.to_string());
                }
                engine
            }
            Err(e) => {
                log::warn!("scenario #{} {}: {e}", spec.id, spec.name);
                observation.init_failed = true;
                observation.engine_errors.push(e.to_string());
                TlsEngine::new(Default::default())
            }
        };
        Self {
            spec,
            engine,
            observation,
        }
    }

    pub fn spec(&self) -> &ScenarioSpec {
        &self.spec
    }

    pub fn engine(&self) -> &TlsEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut TlsEngine {
        &mut self.engine
    }

    pub fn observation(&self) -> &Observation {
        &self.observation
    }

    /// Returns true once nothing more can be observed.
    pub fn is_finished(&self) -> bool {
        self.observation.init_failed
            || matches!(self.engine.state(), State::Closed | State::Failed)
    }

    /// Exchanges bytes with the transport once. Returns true if anything
    /// moved.
    pub fn step(&mut self, io: &mut dyn IO) -> bool {
        if self.is_finished() {
            return false;
        }
        let mut peer = PeerTap { io, seen: false };
        let progress = match self.engine.pump_io(&mut peer) {
            Ok(progress) => progress,
            Err(e) => {
                if e.contains(TunnelError::Closed) {
                    self.observation.socket_errors.push(e.to_string());
                } else {
                    self.observation.engine_errors.push(e.to_string());
                }
                true
            }
        };
        self.observation.peer_seen |= peer.seen;
        self.record();
        progress
    }

    /// Steps until no more progress is made.
    pub fn run_until_idle(&mut self, io: &mut dyn IO) {
        for _ in 0..MAX_IDLE_STEPS {
            if !self.step(io) {
                return;
            }
        }
        log::warn!(
            "scenario #{} still busy after {MAX_IDLE_STEPS} steps",
            self.spec.id
        );
    }

    /// Updates the observation from the engine.
    fn record(&mut self) {
        if self.engine.state() == State::Established && !self.observation.established {
            self.observation.established = true;
            if let Some(metadata) = self.engine.metadata() {
                self.observation.protocol = metadata.protocol;
                self.observation.cipher = metadata.cipher.clone();
            }
        }
        let data = self.engine.read_all();
        if !data.is_empty() {
            log::debug!(
                "scenario #{}: intercepted {} bytes",
                self.spec.id,
                data.len()
            );
            self.observation.intercepted.extend(data);
        }
    }

    /// Ends the scenario and classifies it.
    pub fn finish(mut self) -> ScenarioReport {
        self.record();
        self.observation.findings = self.engine.findings();
        let report = ScenarioReport::new(&self.spec, self.observation);
        if report.result == ScenarioResult::Undefined {
            log::warn!("{}", report.summary());
        } else {
            log::debug!("{}", report.summary());
        }
        report
    }
}

/// Remembers whether the peer sent anything.
struct PeerTap<'a> {
    io: &'a mut dyn IO,
    seen: bool,
}

impl std::io::Read for PeerTap<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.io.read(buf)?;
        self.seen |= n > 0;
        Ok(n)
    }
}

impl std::io::Write for PeerTap<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.io.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.io.flush()
    }
}
