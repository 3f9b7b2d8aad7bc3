// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-session collection of verification findings.
//!
//! The library verify callback of a session captures its own
//! [`SharedVerification`], so findings never cross sessions.

use std::sync::Arc;

use openssl::ssl::{SslContextBuilder, SslVerifyMode};
use openssl::x509::X509StoreContextRef;
use parking_lot::Mutex;

use crate::certificate::Certificate;
use crate::verifier::collector::RawFinding;
use crate::verifier::{hostname, VerificationErrorKind, VerificationFinding};

/// Findings a session does not act upon.
#[derive(Clone, Default, Eq, PartialEq, Debug)]
pub(crate) struct IgnorePolicy {
    pub(crate) all: bool,
    pub(crate) kinds: Vec<VerificationErrorKind>,
}

impl IgnorePolicy {
    pub(crate) fn ignores(&self, kind: VerificationErrorKind) -> bool {
        self.all || self.kinds.contains(&kind)
    }
}

/// Verification state of one session.
#[derive(Debug, Default)]
pub(crate) struct SessionVerification {
    /// Findings, in discovery order. A host name mismatch is kept first.
    pub(crate) findings: Vec<VerificationFinding>,

    /// Ignored findings.
    pub(crate) ignored: IgnorePolicy,

    /// Expected peer name, checked against the leaf.
    pub(crate) hostname: Option<String>,

    /// Fail the handshake from the callback when blocking findings remain.
    pub(crate) reject_in_handshake: bool,

    /// True once the host name was checked.
    pub(crate) leaf_checked: bool,
}

pub(crate) type SharedVerification = Arc<Mutex<SessionVerification>>;

impl SessionVerification {
    /// Returns the findings that are not ignored.
    pub(crate) fn blocking(&self) -> impl Iterator<Item = &VerificationFinding> {
        self.findings
            .iter()
            .filter(|f| !self.ignored.ignores(f.kind))
    }

    pub(crate) fn has_blocking(&self) -> bool {
        self.blocking().next().is_some()
    }

    /// Checks the expected peer name against the leaf, once.
    pub(crate) fn check_hostname(&mut self, leaf: &Certificate) {
        if self.leaf_checked {
            return;
        }
        self.leaf_checked = true;
        let Some(name) = self.hostname.as_deref() else {
            return;
        };
        if !hostname::certificate_matches(leaf, name) {
            log::debug!("peer certificate does not match {name}");
            self.findings.insert(
                0,
                VerificationFinding::new(VerificationErrorKind::HostNameMismatch, 0, leaf.clone()),
            );
        }
    }

    /// Records a chain-walk step. Returns false to fail the handshake.
    fn on_step(&mut self, preverify_ok: bool, ctx: &X509StoreContextRef) -> bool {
        if !preverify_ok {
            let finding = VerificationFinding::from_raw(RawFinding::from_context(ctx));
            log::debug!("peer verification: {finding}");
            self.findings.push(finding);
            return true;
        }
        if ctx.error_depth() != 0 {
            return true;
        }
        let leaf = ctx
            .current_cert()
            .map(Certificate::from_x509)
            .unwrap_or_default();
        self.check_hostname(&leaf);
        !(self.reject_in_handshake && self.has_blocking())
    }
}

/// Installs the verify callback of a session.
pub(crate) fn install_callback(
    builder: &mut SslContextBuilder,
    mode: SslVerifyMode,
    shared: SharedVerification,
) {
    builder.set_verify_callback(mode, move |preverify_ok, ctx| {
        shared.lock().on_step(preverify_ok, ctx)
    });
}
