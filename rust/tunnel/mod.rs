// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Defines [`TlsEngine`].
//!
//! A [`TlsEngine`] is the handshake/record state machine of one TLS
//! connection attempt. It owns no socket: ciphertext goes in through
//! [`TlsEngine::feed`] and comes out through [`TlsEngine::take_outbound`],
//! plaintext goes in through [`TlsEngine::write`] and comes out through
//! [`TlsEngine::read`]. [`TlsEngine::pump`] moves bytes between the two
//! layers until no more progress is possible.
//!
//! ```text
//!   Initial --start--> Handshaking --> Established --shutdown--> ShuttingDown --> Closed
//!                           |               |
//!                           +----> Failed <-+
//! ```
//!
//! Certificate verification runs during the handshake and records every
//! finding, see [`TlsEngine::findings`].

use std::collections::VecDeque;

use openssl::ssl::{ErrorCode as SslErrorCode, Ssl, SslRef, SslStream};
use serde::{Deserialize, Serialize};

use crate::certificate::Certificate;
use crate::error::{ApiError, ConfigurationError, SystemError, TunnelError};
use crate::io::{IntoTransportStatus, MemoryPort, TransportStatus};
use crate::verifier::{VerificationErrorKind, VerificationFinding};

pub mod cipher;
pub use cipher::Cipher;

pub mod context;
pub use context::{TlsConfiguration, VerifyMode};

pub mod keylog;
pub use keylog::{KeyLog, KeyLogSink};

pub mod protocol;
pub use protocol::{NegotiatedProtocol, SslProtocol};

pub mod psk;
pub use psk::PskAuthenticator;

mod verification;
use verification::{IgnorePolicy, SharedVerification};

/// ALPN protocol reported when the peer did not negotiate one.
pub const DEFAULT_ALPN_PROTOCOL: &str = "http/1.1";

/// Size of the buffer plaintext is read into.
const READ_CHUNK: usize = 16 * 1024;

/// Side of a session.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum Mode {
    /// Client mode.
    Client,
    /// Server mode.
    Server,
}

/// The state of a [`TlsEngine`].
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum State {
    #[default]
    Initial,
    Handshaking,
    Established,
    ShuttingDown,
    Closed,
    /// Terminal. The engine must be discarded.
    Failed,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Initial => "initial",
                Self::Handshaking => "handshake in progress",
                Self::Established => "established",
                Self::ShuttingDown => "being shutdown",
                Self::Closed => "closed",
                Self::Failed => "failed",
            }
        )
    }
}

/// Outcome of ALPN.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum AlpnStatus {
    /// Not configured.
    #[default]
    None,
    Negotiated,
    /// Configured, but the peer did not negotiate.
    Unsupported,
}

/// What a session negotiated.
#[derive(Clone, Eq, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub protocol: NegotiatedProtocol,
    pub cipher: Option<Cipher>,
    pub session_reused: bool,
    pub alpn_status: AlpnStatus,
    /// The negotiated protocol, [`DEFAULT_ALPN_PROTOCOL`] if the peer did
    /// not negotiate.
    pub alpn_protocol: Option<String>,
}

impl SessionMetadata {
    fn from_ssl(ssl: &SslRef, alpn_configured: bool) -> Self {
        let (alpn_status, alpn_protocol) = match (alpn_configured, ssl.selected_alpn_protocol()) {
            (false, _) => (AlpnStatus::None, None),
            (true, Some(p)) => (
                AlpnStatus::Negotiated,
                Some(String::from_utf8_lossy(p).into_owned()),
            ),
            (true, None) => (
                AlpnStatus::Unsupported,
                Some(DEFAULT_ALPN_PROTOCOL.to_string()),
            ),
        };
        Self {
            protocol: NegotiatedProtocol::from_ssl_version(ssl.version2()),
            cipher: ssl.current_cipher().and_then(Cipher::from_ssl_cipher),
            session_reused: ssl.session_reused(),
            alpn_status,
            alpn_protocol,
        }
    }
}

/// The handshake/record state machine of one session.
pub struct TlsEngine {
    /// Configuration snapshot.
    configuration: TlsConfiguration,

    /// Side, set by [`TlsEngine::start`].
    mode: Option<Mode>,

    state: State,

    /// Cipher layer. Released when the engine reaches a terminal state.
    stream: Option<SslStream<MemoryPort>>,

    /// Ciphertext left in the cipher layer when it was released.
    residual: Vec<u8>,

    /// Findings of this session.
    verification: SharedVerification,

    /// Deciphered bytes, not read yet.
    plaintext_in: VecDeque<u8>,

    /// Plaintext written, not ciphered yet.
    plaintext_out: VecDeque<u8>,

    /// True once the library completed the handshake.
    handshake_done: bool,

    paused: bool,

    peer_certificate: Certificate,

    peer_chain: Vec<Certificate>,

    metadata: Option<SessionMetadata>,

    last_error: Option<crate::Error>,
}

impl std::fmt::Debug for TlsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("TlsEngine")
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("paused", &self.paused)
            .finish_non_exhaustive()
    }
}

impl TlsEngine {
    /// Instantiates an engine in the [`State::Initial`] state.
    pub fn new(configuration: TlsConfiguration) -> Self {
        Self {
            configuration,
            mode: None,
            state: State::Initial,
            stream: None,
            residual: Vec::new(),
            verification: SharedVerification::default(),
            plaintext_in: VecDeque::new(),
            plaintext_out: VecDeque::new(),
            handshake_done: false,
            paused: false,
            peer_certificate: Certificate::null(),
            peer_chain: Vec::new(),
            metadata: None,
            last_error: None,
        }
    }

    /// Validates the configuration and moves to [`State::Handshaking`].
    ///
    /// On error the engine stays in [`State::Initial`]. Nothing is sent
    /// until [`TlsEngine::pump`] is called.
    pub fn start(&mut self, mode: Mode) -> crate::Result<()> {
        if self.state != State::Initial {
            return Err(self.invalid_state("start"));
        }
        match self.open(mode) {
            Ok(stream) => {
                self.stream = Some(stream);
                self.mode = Some(mode);
                self.set_state(State::Handshaking);
                Ok(())
            }
            Err(e) => {
                let e = e >> ApiError::Configuration;
                log::error!("failed to start a {mode:?} session: {e}");
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Builds the cipher layer.
    fn open(&self, mode: Mode) -> crate::Result<SslStream<MemoryPort>> {
        let verify_mode = self.configuration.verify_mode.effective(mode);
        let mandatory = verify_mode == VerifyMode::VerifyPeer;
        {
            let mut v = self.verification.lock();
            v.hostname = match verify_mode {
                VerifyMode::VerifyNone => None,
                _ => self.configuration.peer_verify_name.clone(),
            };
            v.ignored = IgnorePolicy {
                all: self.configuration.ignore_all_findings,
                kinds: self.configuration.ignored_findings.clone(),
            };
            v.reject_in_handshake = mandatory && !self.configuration.pause_on_findings;
        }

        let ctx = self.configuration.build_context(mode, &self.verification)?;
        let mut ssl = Ssl::new(&ctx)
            .map_err(|e| (SystemError::Memory, crate::support::format_error_stack(&e)))?;
        match mode {
            Mode::Client => ssl.set_connect_state(),
            Mode::Server => ssl.set_accept_state(),
        }
        if let Some(name) = self.configuration.sni_name(mode) {
            ssl.set_hostname(&name).map_err(|e| {
                (
                    ConfigurationError::InvalidServerName,
                    format!("{name}: {}", crate::support::format_error_stack(&e)),
                )
            })?;
        }
        SslStream::new(ssl, MemoryPort::new())
            .map_err(|e| (SystemError::Memory, crate::support::format_error_stack(&e)).into())
    }

    /// Appends ciphertext received from the transport.
    pub fn feed(&mut self, ciphertext: &[u8]) -> crate::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => {
                stream.get_mut().push_inbound(ciphertext);
                Ok(())
            }
            None => Err(self.invalid_state("feed")),
        }
    }

    /// Signals that the transport reached end of stream.
    pub fn close_inbound(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            stream.get_mut().close_inbound();
        }
    }

    /// Removes and returns the ciphertext to send to the transport.
    pub fn take_outbound(&mut self) -> Vec<u8> {
        let mut out = std::mem::take(&mut self.residual);
        if let Some(stream) = self.stream.as_mut() {
            out.extend(stream.get_mut().take_outbound());
        }
        out
    }

    /// Returns true if ciphertext is waiting for the transport.
    pub fn has_outbound(&self) -> bool {
        !self.residual.is_empty()
            || self
                .stream
                .as_ref()
                .map(|s| s.get_ref().outbound_len() > 0)
                .unwrap_or(false)
    }

    /// Queues plaintext. It is ciphered once the session is established.
    pub fn write(&mut self, plaintext: &[u8]) -> crate::Result<usize> {
        match self.state {
            State::Handshaking | State::Established => {
                self.plaintext_out.extend(plaintext);
                Ok(plaintext.len())
            }
            _ => Err(self.invalid_state("write")),
        }
    }

    /// Reads deciphered plaintext. Returns 0 if none is available.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = std::cmp::min(buf.len(), self.plaintext_in.len());
        for (dst, src) in buf.iter_mut().zip(self.plaintext_in.drain(..n)) {
            *dst = src;
        }
        n
    }

    /// Reads every deciphered byte.
    pub fn read_all(&mut self) -> Vec<u8> {
        self.plaintext_in.drain(..).collect()
    }

    /// Returns the number of deciphered bytes not read yet.
    pub fn available(&self) -> usize {
        self.plaintext_in.len()
    }

    /// Moves bytes between the plaintext and ciphertext layers until no
    /// more progress is possible.
    ///
    /// Returns true if any progress was made. Reaching [`State::Failed`]
    /// returns the error that caused it.
    pub fn pump(&mut self) -> crate::Result<bool> {
        match self.state {
            State::Initial | State::Failed => return Err(self.invalid_state("pump")),
            State::Closed => return Ok(false),
            _ => {}
        }
        let mut progress = false;
        while self.pump_once()? {
            progress = true;
        }
        Ok(progress)
    }

    /// Moves bytes between a transport and the engine, then pumps.
    ///
    /// Returns true if any byte moved.
    pub fn pump_io(&mut self, io: &mut dyn crate::IO) -> crate::Result<bool> {
        let mut progress = false;
        let mut buf = [0u8; READ_CHUNK];
        if self.stream.is_some() {
            loop {
                match io.read(&mut buf) {
                    Ok(0) => {
                        self.close_inbound();
                        break;
                    }
                    Ok(n) => {
                        self.feed(&buf[..n])?;
                        progress = true;
                    }
                    Err(e) => {
                        match (&e).into_transport_status() {
                            TransportStatus::WouldBlock => {}
                            TransportStatus::Closed => self.close_inbound(),
                            TransportStatus::Failed => {
                                log::warn!("transport read failed: {e}");
                                self.close_inbound();
                            }
                        }
                        break;
                    }
                }
            }
        }

        let result = match self.state {
            State::Initial | State::Failed | State::Closed => Ok(false),
            _ => self.pump(),
        };

        let out = self.take_outbound();
        if !out.is_empty() {
            progress = true;
            if let Err(e) = io.write_all(&out) {
                log::warn!("transport write failed: {e}");
                if (&e).into_transport_status() == TransportStatus::Failed {
                    return Err((TunnelError::Closed, format!("transport write: {e}")).into());
                }
            }
        }
        // Draining the port may complete a shutdown.
        if self.state == State::ShuttingDown && self.pump()? {
            progress = true;
        }
        result.map(|p| p || progress)
    }

    /// Ciphers pending plaintext, sends close_notify and moves to
    /// [`State::ShuttingDown`].
    pub fn shutdown(&mut self) -> crate::Result<()> {
        match self.state {
            State::Handshaking | State::Established => {}
            State::ShuttingDown | State::Closed => return Ok(()),
            _ => return Err(self.invalid_state("shutdown")),
        }
        if self.state == State::Established && !self.paused {
            self.flush_plaintext()?;
        }
        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.shutdown() {
                log::debug!("shutdown: {e}");
            }
        }
        self.set_state(State::ShuttingDown);
        Ok(())
    }

    /// Defers the handshake completion. [`TlsEngine::pump`] makes no
    /// progress while paused.
    pub fn pause(&mut self) {
        if !self.paused {
            log::debug!("session paused");
        }
        self.paused = true;
    }

    /// Resumes a paused session. If the handshake was complete, the session
    /// is established regardless of outstanding findings.
    pub fn resume(&mut self) -> crate::Result<()> {
        if !self.paused {
            return Err(self.invalid_state("resume"));
        }
        self.paused = false;
        log::debug!("session resumed");
        if self.state == State::Handshaking && self.handshake_done {
            self.establish();
        }
        Ok(())
    }

    /// Abandons the session.
    pub fn abort(&mut self) {
        if matches!(self.state, State::Closed | State::Failed) {
            return;
        }
        self.fail((TunnelError::Closed, "aborted").into());
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Ignores findings of the given kinds from now on.
    pub fn ignore_findings(&mut self, kinds: &[VerificationErrorKind]) {
        let mut v = self.verification.lock();
        for kind in kinds {
            if !v.ignored.kinds.contains(kind) {
                v.ignored.kinds.push(*kind);
            }
        }
        self.configuration.ignored_findings = v.ignored.kinds.clone();
    }

    /// Ignores every finding from now on.
    pub fn ignore_all_findings(&mut self) {
        self.verification.lock().ignored.all = true;
        self.configuration.ignore_all_findings = true;
    }

    /// Returns every finding of the session, ignored ones included.
    pub fn findings(&self) -> Vec<VerificationFinding> {
        self.verification.lock().findings.clone()
    }

    /// Returns the findings that are not ignored.
    pub fn blocking_findings(&self) -> Vec<VerificationFinding> {
        self.verification.lock().blocking().cloned().collect()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    pub fn configuration(&self) -> &TlsConfiguration {
        &self.configuration
    }

    /// Returns what the session negotiated, once the handshake completed.
    pub fn metadata(&self) -> Option<&SessionMetadata> {
        self.metadata.as_ref()
    }

    /// Returns the peer certificate, null if none was received.
    pub fn peer_certificate(&self) -> &Certificate {
        &self.peer_certificate
    }

    /// Returns the peer chain, leaf first.
    pub fn peer_chain(&self) -> &[Certificate] {
        &self.peer_chain
    }

    /// Returns the error that failed the session, or the configuration
    /// error that prevented it from starting.
    pub fn last_error(&self) -> Option<&crate::Error> {
        self.last_error.as_ref()
    }

    /// Runs one cycle. Returns true if it made progress.
    fn pump_once(&mut self) -> crate::Result<bool> {
        let Some((inbound, outbound)) = self.port_lengths() else {
            return Ok(false);
        };
        let moved = match self.state {
            State::Handshaking if !self.paused && !self.handshake_done => self.handshake()?,
            State::Established if !self.paused => {
                let wrote = self.flush_plaintext()?;
                let read = self.decipher()?;
                wrote || read
            }
            State::ShuttingDown => {
                if self.port_lengths().map(|(_, out)| out == 0).unwrap_or(true) {
                    self.set_state(State::Closed);
                    self.release();
                    return Ok(true);
                }
                false
            }
            _ => false,
        };
        let changed = self
            .port_lengths()
            .map(|lengths| lengths != (inbound, outbound))
            .unwrap_or(true);
        Ok(moved || changed)
    }

    fn port_lengths(&self) -> Option<(usize, usize)> {
        self.stream
            .as_ref()
            .map(|s| (s.get_ref().inbound_len(), s.get_ref().outbound_len()))
    }

    /// Drives the handshake. Returns true when it completed.
    fn handshake(&mut self) -> crate::Result<bool> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(false);
        };
        match stream.do_handshake() {
            Ok(()) => {
                self.handshake_done = true;
                self.complete_handshake()?;
                Ok(true)
            }
            Err(e) => match e.code() {
                SslErrorCode::WANT_READ | SslErrorCode::WANT_WRITE => Ok(false),
                _ => {
                    let e = crate::Error::from((TunnelError::HandshakeFailed, e.to_string()));
                    let rejected = {
                        let v = self.verification.lock();
                        v.reject_in_handshake && v.has_blocking()
                    };
                    if rejected {
                        self.fail(e.clone());
                    } else {
                        self.fail_internal(e.clone());
                    }
                    Err(e)
                }
            },
        }
    }

    /// Stores the peer identity, applies the verification policy and
    /// establishes the session.
    fn complete_handshake(&mut self) -> crate::Result<()> {
        let Some(stream) = self.stream.as_ref() else {
            return Ok(());
        };
        let mode = self.mode.unwrap_or(Mode::Client);
        let ssl = stream.ssl();

        self.peer_certificate = ssl
            .peer_certificate()
            .map(|c| Certificate::from_x509(&c))
            .unwrap_or_default();
        self.peer_chain = ssl
            .peer_cert_chain()
            .map(|chain| chain.iter().map(Certificate::from_x509).collect())
            .unwrap_or_default();
        if mode == Mode::Server && !self.peer_certificate.is_null() {
            self.peer_chain.insert(0, self.peer_certificate.clone());
        }
        self.metadata = Some(SessionMetadata::from_ssl(
            ssl,
            !self.configuration.alpn_protocols.is_empty(),
        ));

        let verify_mode = self.configuration.verify_mode.effective(mode);
        let mandatory = verify_mode == VerifyMode::VerifyPeer;
        let blocking = {
            let mut v = self.verification.lock();
            if verify_mode != VerifyMode::VerifyNone && !self.peer_certificate.is_null() {
                v.check_hostname(&self.peer_certificate);
            }
            if mandatory && self.peer_certificate.is_null() {
                v.findings.push(VerificationFinding::new(
                    VerificationErrorKind::NoPeerCertificate,
                    0,
                    Certificate::null(),
                ));
            }
            mandatory && v.has_blocking()
        };

        if !blocking {
            self.establish();
            return Ok(());
        }
        if self.configuration.pause_on_findings {
            log::debug!("handshake complete with findings, pausing");
            self.paused = true;
            return Ok(());
        }
        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.shutdown() {
                log::debug!("shutdown after verification failure: {e}");
            }
        }
        let e = crate::Error::from((
            TunnelError::HandshakeFailed,
            "peer certificate verification failed",
        ));
        self.fail(e.clone());
        Err(e)
    }

    fn establish(&mut self) {
        self.set_state(State::Established);
        if let Some(metadata) = self.metadata.as_ref() {
            log::debug!(
                "negotiated {} with {}",
                metadata.protocol,
                metadata
                    .cipher
                    .as_ref()
                    .map(|c| c.name.as_str())
                    .unwrap_or("no cipher")
            );
        }
        if let (Some(key_log), Some(stream)) = (self.configuration.key_log.as_ref(), self.stream.as_ref()) {
            key_log.record(stream.ssl());
        }
    }

    /// Ciphers queued plaintext. Returns true if any byte was ciphered.
    fn flush_plaintext(&mut self) -> crate::Result<bool> {
        let mut progress = false;
        while !self.plaintext_out.is_empty() {
            let Some(stream) = self.stream.as_mut() else {
                break;
            };
            let (chunk, _) = self.plaintext_out.as_slices();
            match stream.ssl_write(chunk) {
                Ok(n) => {
                    self.plaintext_out.drain(..n);
                    progress = true;
                }
                Err(e) => match e.code() {
                    SslErrorCode::WANT_READ | SslErrorCode::WANT_WRITE => break,
                    _ => {
                        let e = crate::Error::from((TunnelError::RecordFailed, e.to_string()));
                        self.fail_internal(e.clone());
                        return Err(e);
                    }
                },
            }
        }
        Ok(progress)
    }

    /// Deciphers inbound records. Returns true if any plaintext came out.
    fn decipher(&mut self) -> crate::Result<bool> {
        let mut progress = false;
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let Some(stream) = self.stream.as_mut() else {
                break;
            };
            match stream.ssl_read(&mut buf) {
                Ok(0) => {
                    self.peer_closed();
                    return Ok(true);
                }
                Ok(n) => {
                    self.plaintext_in.extend(&buf[..n]);
                    progress = true;
                }
                Err(e) => match e.code() {
                    SslErrorCode::WANT_READ | SslErrorCode::WANT_WRITE => break,
                    SslErrorCode::ZERO_RETURN => {
                        self.peer_closed();
                        return Ok(true);
                    }
                    SslErrorCode::SYSCALL if e.io_error().is_none() && e.ssl_error().is_none() => {
                        log::debug!("transport closed without close_notify");
                        self.peer_closed();
                        return Ok(true);
                    }
                    _ => {
                        let e = crate::Error::from((TunnelError::RecordFailed, e.to_string()));
                        self.fail_internal(e.clone());
                        return Err(e);
                    }
                },
            }
        }
        Ok(progress)
    }

    /// Answers the peer's close_notify and moves to [`State::Closed`].
    fn peer_closed(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.shutdown() {
                log::debug!("shutdown after peer close: {e}");
            }
        }
        self.set_state(State::Closed);
        self.release();
    }

    /// Moves to [`State::Failed`].
    fn fail(&mut self, e: crate::Error) {
        log::warn!("session failed: {e}");
        self.last_error = Some(e);
        self.paused = false;
        self.set_state(State::Failed);
        self.release();
    }

    /// Records an [`VerificationErrorKind::InternalError`] finding and moves
    /// to [`State::Failed`].
    fn fail_internal(&mut self, e: crate::Error) {
        self.verification.lock().findings.push(VerificationFinding::new(
            VerificationErrorKind::InternalError,
            0,
            self.peer_certificate.clone(),
        ));
        self.fail(e);
    }

    /// Releases the cipher layer, keeping the ciphertext it still holds.
    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            self.residual.extend(stream.get_mut().take_outbound());
        }
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            log::debug!("{} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn invalid_state(&self, operation: &str) -> crate::Error {
        (
            TunnelError::InvalidState,
            format!("cannot {operation} in state {}", self.state),
        )
            .into()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::support::test_certs;
    use crate::trust::TrustStore;

    /// Exchanges bytes between two engines until both are idle.
    pub(crate) fn drive(a: &mut TlsEngine, b: &mut TlsEngine) {
        for _ in 0..64 {
            let pa = a.pump().unwrap_or(false);
            let out = a.take_outbound();
            if !out.is_empty() {
                let _ = b.feed(&out);
            }
            let pb = b.pump().unwrap_or(false);
            let out = b.take_outbound();
            if !out.is_empty() {
                let _ = a.feed(&out);
            }
            if !pa && !pb && !a.has_outbound() && !b.has_outbound() {
                return;
            }
        }
    }

    /// Returns a client trusting `root`, verifying `name`.
    pub(crate) fn client_configuration(root: &test_certs::Issued, name: &str) -> TlsConfiguration {
        TlsConfiguration {
            verify_mode: VerifyMode::VerifyPeer,
            peer_verify_name: Some(name.to_string()),
            ..Default::default()
        }
        .with_trust_store(TrustStore::new([Certificate::from_x509(&root.cert)]))
    }

    /// Tests the initial transitions.
    #[test]
    fn test_start() {
        let mut engine = TlsEngine::new(TlsConfiguration::default());
        assert_eq!(engine.state(), State::Initial);
        assert!(engine.pump().err().unwrap().contains(TunnelError::InvalidState));
        assert!(engine.feed(b"x").is_err());

        engine.start(Mode::Client).unwrap();
        assert_eq!(engine.state(), State::Handshaking);
        assert!(engine.start(Mode::Client).is_err());

        // A client sends its hello on the first pump, then waits.
        assert!(engine.pump().unwrap());
        assert!(!engine.take_outbound().is_empty());
        assert!(!engine.pump().unwrap());
        assert_eq!(engine.state(), State::Handshaking);
        assert!(engine.findings().is_empty());
    }

    /// Tests that an invalid configuration leaves the engine in
    /// [`State::Initial`].
    #[test]
    fn test_start_invalid_configuration() {
        let mut engine = TlsEngine::new(TlsConfiguration {
            protocol: SslProtocol::UnknownProtocol,
            ..Default::default()
        });
        let e = engine.start(Mode::Client).err().unwrap();
        assert!(e.contains(ConfigurationError::UnsupportedProtocol));
        assert!(e.contains(ApiError::Configuration));
        assert_eq!(engine.state(), State::Initial);
        assert!(engine.last_error().is_some());
    }

    /// Tests a handshake against a trusted chain, then data both ways and
    /// shutdown.
    #[test]
    fn test_handshake_and_records() {
        let root = test_certs::root("Engine Root");
        let mut server = TlsEngine::new(context::test::server_configuration(
            &root,
            "engine.example.com",
        ));
        let mut client = TlsEngine::new(client_configuration(&root, "engine.example.com"));
        server.start(Mode::Server).unwrap();
        client.start(Mode::Client).unwrap();
        drive(&mut client, &mut server);

        assert_eq!(client.state(), State::Established);
        assert_eq!(server.state(), State::Established);
        assert!(client.findings().is_empty());
        assert_eq!(
            client.peer_certificate().subject_attribute("CN"),
            vec!["engine.example.com".to_string()]
        );
        let metadata = client.metadata().unwrap();
        assert_ne!(metadata.protocol, NegotiatedProtocol::Unknown);
        assert!(metadata.cipher.is_some());
        assert_eq!(metadata.alpn_status, AlpnStatus::None);

        client.write(b"ping").unwrap();
        drive(&mut client, &mut server);
        assert_eq!(server.read_all(), b"ping".to_vec());

        server.write(b"pong").unwrap();
        drive(&mut client, &mut server);
        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf), 4);
        assert_eq!(&buf[..4], b"pong");

        client.shutdown().unwrap();
        assert_eq!(client.state(), State::ShuttingDown);
        drive(&mut client, &mut server);
        assert_eq!(client.state(), State::Closed);
        assert_eq!(server.state(), State::Closed);
        assert!(client.write(b"late").is_err());
    }

    /// Tests ALPN negotiation and the fallback protocol.
    #[test]
    fn test_alpn() {
        let root = test_certs::root("Alpn Root");
        let mut server_conf = context::test::server_configuration(&root, "alpn.example.com");
        server_conf.alpn_protocols = vec!["h2".to_string()];
        let mut client_conf = client_configuration(&root, "alpn.example.com");
        client_conf.alpn_protocols = vec!["h2".to_string(), "http/1.1".to_string()];

        let mut server = TlsEngine::new(server_conf);
        let mut client = TlsEngine::new(client_conf.clone());
        server.start(Mode::Server).unwrap();
        client.start(Mode::Client).unwrap();
        drive(&mut client, &mut server);
        let metadata = client.metadata().unwrap();
        assert_eq!(metadata.alpn_status, AlpnStatus::Negotiated);
        assert_eq!(metadata.alpn_protocol.as_deref(), Some("h2"));

        let mut server = TlsEngine::new(context::test::server_configuration(
            &root,
            "alpn.example.com",
        ));
        let mut client = TlsEngine::new(client_conf);
        server.start(Mode::Server).unwrap();
        client.start(Mode::Client).unwrap();
        drive(&mut client, &mut server);
        let metadata = client.metadata().unwrap();
        assert_eq!(metadata.alpn_status, AlpnStatus::Unsupported);
        assert_eq!(metadata.alpn_protocol.as_deref(), Some(DEFAULT_ALPN_PROTOCOL));
    }

    /// Tests that garbage ciphertext fails the handshake.
    #[test]
    fn test_garbage_fails() {
        let root = test_certs::root("Garbage Root");
        let mut server = TlsEngine::new(context::test::server_configuration(
            &root,
            "garbage.example.com",
        ));
        server.start(Mode::Server).unwrap();
        server.feed(&[0x17; 64]).unwrap();
        let e = server.pump().err().unwrap();
        assert!(e.contains(TunnelError::HandshakeFailed));
        assert_eq!(server.state(), State::Failed);
        let findings = server.findings();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, VerificationErrorKind::InternalError);
        assert!(server.pump().err().unwrap().contains(TunnelError::InvalidState));
    }

    /// Tests that a garbage record fails an established session.
    #[test]
    fn test_garbage_record_fails() {
        let root = test_certs::root("Record Root");
        let mut server = TlsEngine::new(context::test::server_configuration(
            &root,
            "record.example.com",
        ));
        let mut client = TlsEngine::new(client_configuration(&root, "record.example.com"));
        server.start(Mode::Server).unwrap();
        client.start(Mode::Client).unwrap();
        drive(&mut client, &mut server);
        assert_eq!(client.state(), State::Established);
        assert!(client.findings().is_empty());

        client.feed(&[0x17; 64]).unwrap();
        let e = client.pump().err().unwrap();
        assert!(e.contains(TunnelError::RecordFailed));
        assert_eq!(client.state(), State::Failed);
        let findings = client.findings();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, VerificationErrorKind::InternalError);
        assert_eq!(
            findings[0].certificate.subject_attribute("CN"),
            vec!["record.example.com".to_string()]
        );
    }

    /// Tests [`TlsEngine::abort`] and the pause flag.
    #[test]
    fn test_abort() {
        let mut engine = TlsEngine::new(TlsConfiguration::default());
        engine.start(Mode::Client).unwrap();
        assert!(engine.resume().is_err());
        engine.pause();
        assert!(engine.is_paused());
        assert!(!engine.pump().unwrap());
        engine.abort();
        assert_eq!(engine.state(), State::Failed);
        assert!(!engine.is_paused());
        assert!(engine.last_error().unwrap().contains(TunnelError::Closed));
    }
}
