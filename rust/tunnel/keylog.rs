// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Key material export for out-of-band decryption.
//!
//! Each completed handshake appends one line of the form
//! `CLIENT_RANDOM <client random> <master secret>\n`, hex in uppercase.

use std::io::Write;
use std::sync::Arc;

use openssl::ssl::SslRef;
use parking_lot::Mutex;

use crate::support::hex_upper;

/// An append-only sink of key log lines.
pub trait KeyLogSink: Send {
    /// Appends one line, newline included.
    fn log(&mut self, line: &str);
}

/// Adapts any [`Write`] into a [`KeyLogSink`].
#[derive(Debug, Default)]
pub struct WriterSink<W: Write + Send>(pub W);

impl<W: Write + Send> KeyLogSink for WriterSink<W> {
    fn log(&mut self, line: &str) {
        if let Err(e) = self.0.write_all(line.as_bytes()).and_then(|_| self.0.flush()) {
            log::warn!("failed to write key log line: {e}");
        }
    }
}

impl KeyLogSink for Vec<u8> {
    fn log(&mut self, line: &str) {
        self.extend_from_slice(line.as_bytes());
    }
}

/// A shared handle on a [`KeyLogSink`].
#[derive(Clone)]
pub struct KeyLog(Arc<Mutex<dyn KeyLogSink>>);

impl KeyLog {
    pub fn new(sink: impl KeyLogSink + 'static) -> Self {
        Self(Arc::new(Mutex::new(sink)))
    }

    /// Writes the line of a completed handshake.
    ///
    /// Returns false if the session exposes no master secret.
    pub(crate) fn record(&self, ssl: &SslRef) -> bool {
        match format_line(ssl) {
            Some(line) => {
                self.0.lock().log(&line);
                true
            }
            None => {
                log::warn!("session exposes no master secret, nothing logged");
                false
            }
        }
    }
}

impl std::fmt::Debug for KeyLog {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "KeyLog")
    }
}

/// Formats the key log line of a session.
fn format_line(ssl: &SslRef) -> Option<String> {
    let mut random = [0u8; 32];
    let n = ssl.client_random(&mut random);
    let session = ssl.session()?;
    let mut master = vec![0u8; session.master_key_len()];
    let m = session.master_key(&mut master);
    if n == 0 || m == 0 {
        return None;
    }
    Some(line(&random[..n], &master[..m]))
}

/// Formats a key log line.
pub(crate) fn line(client_random: &[u8], master_secret: &[u8]) -> String {
    format!(
        "CLIENT_RANDOM {} {}\n",
        hex_upper(client_random),
        hex_upper(master_secret)
    )
}
