// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! TLS interception and conformance-testing engine.
//!
//! The crate terminates TLS connections as a client or a server, entirely
//! over in-memory byte buffers, deliberately weakens the handshake (forced
//! legacy protocols, weak cipher suites, invalid certificates) and classifies
//! how the peer reacts.
//!
//! The main entry points are:
//!
//!   * [`certificate::Certificate`]: an immutable, parsed X.509 certificate.
//!   * [`verifier::verify`]: chain verification collecting every finding.
//!   * [`tunnel::TlsEngine`]: the handshake/record state machine.
//!   * [`scenario`]: adversarial scenarios and their classification.

#[macro_use]
pub mod error;
pub use error::Error;

/// A `Result` whose error is an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) mod support;

pub mod io;
pub use io::IO;

pub mod certificate;
pub use certificate::Certificate;

pub mod trust;

pub mod verifier;

#[cfg(feature = "tunnel")]
pub mod tunnel;
#[cfg(feature = "tunnel")]
pub use tunnel::TlsEngine;

#[cfg(feature = "tunnel")]
pub mod scenario;
