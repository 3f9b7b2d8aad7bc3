// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Call-scoped collection of chain-walk errors.
//!
//! The library only accepts a plain function pointer as store verify
//! callback. The callback records into a thread-local sink that exists only
//! for the duration of [`collect`], so two verifications running on
//! different threads never see each other's errors.

use std::cell::RefCell;
use std::ffi::c_int;
use std::ptr::NonNull;

use foreign_types::ForeignTypeRef;
use openssl::x509::X509StoreContextRef;
use openssl_sys as ffi;

use crate::certificate::Certificate;

extern "C" {
    fn X509_STORE_CTX_set_verify_cb(
        ctx: *mut ffi::X509_STORE_CTX,
        verify_cb: Option<unsafe extern "C" fn(c_int, *mut ffi::X509_STORE_CTX) -> c_int>,
    );
}

/// A rejection reported by the chain walk.
#[derive(Clone, Debug)]
pub(crate) struct RawFinding {
    /// `X509_V_ERR_*` code.
    pub(crate) code: c_int,

    /// Depth in the chain, 0 being the leaf.
    pub(crate) depth: u32,

    /// Certificate at that depth, if any.
    pub(crate) certificate: Option<Certificate>,
}

impl RawFinding {
    /// Reads the current error of a store context.
    pub(crate) fn from_context(ctx: &X509StoreContextRef) -> Self {
        Self {
            code: ctx.error().as_raw(),
            depth: ctx.error_depth(),
            certificate: ctx.current_cert().map(Certificate::from_x509),
        }
    }
}

thread_local! {
    /// Sinks of the verifications in progress on this thread, innermost last.
    static SINKS: RefCell<Vec<Vec<RawFinding>>> = const { RefCell::new(Vec::new()) };
}

/// Removes the sink on drop, even if the walk unwinds.
struct SinkGuard;

impl SinkGuard {
    fn install() -> Self {
        SINKS.with(|s| s.borrow_mut().push(Vec::new()));
        Self
    }

    fn take(self) -> Vec<RawFinding> {
        let found = SINKS.with(|s| s.borrow_mut().pop()).unwrap_or_default();
        std::mem::forget(self);
        found
    }
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        SINKS.with(|s| s.borrow_mut().pop());
    }
}

/// Store verify callback. Records every rejection and lets the walk go on.
unsafe extern "C" fn collect_callback(preverify_ok: c_int, store_ctx: *mut ffi::X509_STORE_CTX) -> c_int {
    if preverify_ok == 1 {
        return 1;
    }
    let Some(store_ctx) = NonNull::new(store_ctx) else {
        return 1;
    };
    let ctx = X509StoreContextRef::from_ptr(store_ctx.as_ptr());
    let finding = RawFinding::from_context(ctx);
    log::debug!(
        "chain walk rejection {} at depth {}: {}",
        finding.code,
        finding.depth,
        ctx.error().error_string()
    );
    SINKS.with(|s| {
        if let Some(sink) = s.borrow_mut().last_mut() {
            sink.push(finding);
        }
    });
    1
}

/// Runs `walk` with the collecting callback installed on `ctx`, and returns
/// its result with every rejection recorded during the walk.
pub(crate) fn collect<T>(
    ctx: &mut X509StoreContextRef,
    walk: impl FnOnce(&mut X509StoreContextRef) -> T,
) -> (T, Vec<RawFinding>) {
    let guard = SinkGuard::install();
    unsafe { X509_STORE_CTX_set_verify_cb(ctx.as_ptr(), Some(collect_callback)) };
    let result = walk(ctx);
    (result, guard.take())
}
