// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Trust-store snapshots.
//!
//! The verifier never enumerates platform trust anchors itself. It consumes
//! a [`TrustStore`], an immutable snapshot obtained from a
//! [`TrustStoreProvider`].
//!
//! A process-wide default snapshot is available through [`default_store`].
//! Updating it replaces the snapshot wholesale, so a session that already
//! holds a snapshot never observes a partial update.

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use time::OffsetDateTime;

use crate::certificate::Certificate;

/// An immutable set of trusted certificates.
#[derive(Clone, Debug)]
pub struct TrustStore(Arc<[Certificate]>);

impl Default for TrustStore {
    fn default() -> Self {
        Self(Vec::new().into())
    }
}

impl TrustStore {
    /// Builds a snapshot, dropping null certificates and duplicates.
    pub fn new(certificates: impl IntoIterator<Item = Certificate>) -> Self {
        let mut certs: Vec<Certificate> = Vec::new();
        for cert in certificates {
            if cert.is_null() {
                log::debug!("ignoring null certificate in trust store");
                continue;
            }
            if !certs.contains(&cert) {
                certs.push(cert);
            }
        }
        Self(certs.into())
    }

    /// Builds a snapshot from a PEM bundle.
    pub fn from_pem(pem: impl AsRef<[u8]>) -> Self {
        Self::new(Certificate::from_pem_all(pem))
    }

    /// Returns the certificates.
    pub fn certificates(&self) -> &[Certificate] {
        &self.0
    }

    /// Returns the certificates still valid at `now`.
    pub fn unexpired_at(&self, now: OffsetDateTime) -> impl Iterator<Item = &Certificate> {
        self.0.iter().filter(move |c| {
            let expired = c.is_expired_at(now);
            if expired {
                log::debug!("excluding expired trust anchor {c:?}");
            }
            !expired
        })
    }

    /// Returns true if `cert` is part of the snapshot.
    pub fn contains(&self, cert: &Certificate) -> bool {
        self.0.contains(cert)
    }

    /// Returns a new snapshot with `cert` appended.
    pub fn with(&self, cert: Certificate) -> Self {
        Self::new(self.0.iter().cloned().chain(std::iter::once(cert)))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builds an OpenSSL store from the certificates valid at `now`.
    pub(crate) fn to_x509_store(
        &self,
        now: OffsetDateTime,
    ) -> crate::Result<openssl::x509::store::X509Store> {
        use crate::error::{ConfigurationError, SystemError};

        let mut builder = openssl::x509::store::X509StoreBuilder::new().map_err(|e| {
            (SystemError::Memory, crate::support::format_error_stack(&e))
        })?;
        for cert in self.unexpired_at(now) {
            let x509 = unwrap_or!(cert.to_x509(), ConfigurationError::InvalidTrustStore);
            if let Err(e) = builder.add_cert(x509) {
                // Duplicate subjects are rejected by some library versions.
                log::warn!(
                    "failed to add trust anchor {cert:?}: {}",
                    crate::support::format_error_stack(&e)
                );
            }
        }
        Ok(builder.build())
    }
}

impl FromIterator<Certificate> for TrustStore {
    fn from_iter<T: IntoIterator<Item = Certificate>>(iter: T) -> Self {
        Self::new(iter)
    }
}

/// A source of trust-store snapshots.
///
/// Platform-specific enumeration (system stores, keychains, bundles on disk)
/// lives behind this trait, outside of the crate.
pub trait TrustStoreProvider: Send + Sync {
    /// Returns the current snapshot.
    fn snapshot(&self) -> TrustStore;
}

/// A provider returning a fixed snapshot.
#[derive(Clone, Default, Debug)]
pub struct StaticTrustStore(TrustStore);

impl StaticTrustStore {
    pub fn new(store: TrustStore) -> Self {
        Self(store)
    }
}

impl TrustStoreProvider for StaticTrustStore {
    fn snapshot(&self) -> TrustStore {
        self.0.clone()
    }
}

/// A provider whose snapshot can be replaced atomically.
#[derive(Default, Debug)]
pub struct SharedTrustStore(RwLock<TrustStore>);

impl SharedTrustStore {
    pub fn new(store: TrustStore) -> Self {
        Self(RwLock::new(store))
    }

    /// Replaces the snapshot.
    pub fn replace(&self, store: TrustStore) {
        *self.0.write() = store;
    }

    /// Appends a newly trusted certificate by publishing a new snapshot.
    ///
    /// Returns false if the certificate was already trusted or is null.
    pub fn add(&self, cert: Certificate) -> bool {
        if cert.is_null() {
            return false;
        }
        let mut guard = self.0.write();
        if guard.contains(&cert) {
            return false;
        }
        log::debug!("adding trust anchor {cert:?}");
        *guard = guard.with(cert);
        true
    }
}

impl TrustStoreProvider for SharedTrustStore {
    fn snapshot(&self) -> TrustStore {
        self.0.read().clone()
    }
}

/// Returns the process-wide default provider. It starts empty.
pub fn default_store() -> &'static SharedTrustStore {
    static DEFAULT: OnceLock<SharedTrustStore> = OnceLock::new();
    DEFAULT.get_or_init(SharedTrustStore::default)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::support::test_certs;

    /// Tests that a snapshot is unaffected by later updates.
    #[test]
    fn test_copy_on_write() {
        let a = Certificate::from_x509(&test_certs::root("Trust A").cert);
        let b = Certificate::from_x509(&test_certs::root("Trust B").cert);

        let shared = SharedTrustStore::new(TrustStore::new([a.clone()]));
        let before = shared.snapshot();
        assert!(shared.add(b.clone()));
        assert!(!shared.add(b.clone()));
        assert!(!shared.add(Certificate::null()));
        let after = shared.snapshot();

        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
        assert!(after.contains(&b));
        assert!(!before.contains(&b));
    }

    /// Tests that expired anchors are excluded.
    #[test]
    fn test_unexpired_at() {
        let valid = Certificate::from_x509(&test_certs::root("Trust Valid").cert);
        let expired =
            Certificate::from_x509(&test_certs::expired_self_signed("trust.example.com").cert);
        let store: TrustStore = [valid.clone(), expired, Certificate::null()].into_iter().collect();
        assert_eq!(store.len(), 2);
        let now = OffsetDateTime::now_utc();
        assert_eq!(store.unexpired_at(now).collect::<Vec<_>>(), vec![&valid]);
        assert!(store.to_x509_store(now).is_ok());
    }

    /// Tests [`StaticTrustStore`].
    #[test]
    fn test_static_provider() {
        let provider = StaticTrustStore::default();
        assert!(provider.snapshot().is_empty());
    }
}
