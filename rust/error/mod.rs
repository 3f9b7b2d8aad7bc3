// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Defines [`Error`] struct.
//!
//! When an operation fails, an [`Error`] is returned, usually through
//! [`crate::Result`]. An [`Error`] is a chain of [`ErrorCode`], where the
//! first element of the chain is the most precise error and the last element
//! is the most general one.
//!
//! For instance, a configuration holding a malformed PEM certificate results
//! in the following chain:
//!
//! ```text
//! CertificateError::Malformed                  // The most precise error.
//!   <- ConfigurationError::InvalidCertificate
//!     <- ApiError::Configuration                // The most general error.
//! ```
//!
//! Error codes are defined in the [`code`] module.

pub mod code;
pub use code::{
    AlpnError, ApiError, BaseErrorCode, CertificateError, ConfigurationError, ErrorCode,
    ErrorKind, PrivateKeyError, ScenarioError, SystemError, TunnelError,
};

use code::AllowedBaseErrorCodeEnum;

/// An error.
/// An [`Error`] holds a chain of [`ErrorCode`].
#[derive(Clone, PartialEq, Eq)]
pub struct Error(Vec<ErrorCode>);

/// Instantiates an [`Error`] from an enum value.
impl<E: AllowedBaseErrorCodeEnum> std::convert::From<E> for Error
where
    BaseErrorCode: From<E>,
{
    fn from(e: E) -> Self {
        Self(vec![ErrorCode::from(e)])
    }
}

/// Instantiates an [`Error`] from an enum value and a string.
impl<E: AllowedBaseErrorCodeEnum> std::convert::From<(E, &str)> for Error
where
    BaseErrorCode: From<E>,
{
    fn from((e, s): (E, &str)) -> Self {
        Self(vec![ErrorCode::from((e, s))])
    }
}

/// Instantiates an [`Error`] from an enum value and a string.
impl<E: AllowedBaseErrorCodeEnum> std::convert::From<(E, String)> for Error
where
    BaseErrorCode: From<E>,
{
    fn from((e, s): (E, String)) -> Self {
        Self(vec![ErrorCode::from((e, s))])
    }
}

/// Instantiates an [`Error`] from an [`ErrorCode`].
impl std::convert::From<ErrorCode> for Error {
    fn from(e: ErrorCode) -> Self {
        Self(vec![e])
    }
}

/// Appends an error into the chain, using the `>>` operator.
///
/// The `>>` operator is used to easily build a chain of errors:
/// `child_error >> parent_error`, where `child_error` is more precise than
/// `parent_error`.
///
/// # Example
///
/// ```
/// use tlsaudit::error::{CertificateError, ConfigurationError, Error};
///
/// let e = Error::from(CertificateError::Malformed);
/// let e = e >> ConfigurationError::InvalidCertificate;
/// assert_eq!(e.len(), 2);
/// ```
impl<E: AllowedBaseErrorCodeEnum> std::ops::Shr<E> for Error
where
    BaseErrorCode: From<E>,
{
    type Output = Self;

    fn shr(mut self, e: E) -> Self::Output {
        self.0.push(ErrorCode::from(e));
        self
    }
}

/// Appends an error into the chain, using the `>>` operator and a string.
impl<E: AllowedBaseErrorCodeEnum> std::ops::Shr<(E, &str)> for Error
where
    BaseErrorCode: From<E>,
{
    type Output = Self;

    fn shr(mut self, (e, s): (E, &str)) -> Self::Output {
        self.0.push(ErrorCode::from((e, s)));
        self
    }
}

/// Appends an error into the chain, using the `>>` operator and a string.
impl<E: AllowedBaseErrorCodeEnum> std::ops::Shr<(E, String)> for Error
where
    BaseErrorCode: From<E>,
{
    type Output = Self;

    fn shr(mut self, (e, s): (E, String)) -> Self::Output {
        self.0.push(ErrorCode::from((e, s)));
        self
    }
}

/// Appends an [`ErrorCode`] into the chain, using the `>>` operator.
impl std::ops::Shr<ErrorCode> for Error {
    type Output = Self;

    fn shr(mut self, e: ErrorCode) -> Self::Output {
        self.0.push(e);
        self
    }
}

/// Implements [`std::fmt::Display`] for [`Error`].
impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for (i, e) in self.0.iter().rev().enumerate() {
            if i > 0 {
                write!(f, ": ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

/// Implements [`std::fmt::Debug`] for [`Error`].
impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            for _ in 0..i {
                write!(f, "\t")?;
            }
            writeln!(f, "~>#{i}: {e}")?;
        }
        Ok(())
    }
}

/// Implements [`std::error::Error`] for [`Error`].
impl std::error::Error for Error {}

/// Wraps error enums to produce an [`Error`].
///
/// # Example
///
/// ```ignore
/// let e = errors!{CertificateError::Malformed => ConfigurationError::InvalidCertificate};
/// ```
macro_rules! errors{
    { $( $e:expr ) => * } => {
        crate::Error::new()
        $(
            >> $e
        )*
    };
}

/// Unwraps a result, or returns the error chained with another one.
///
/// # Example
///
/// ```ignore
///     unwrap_or!(Certificate::to_x509(&cert), ConfigurationError::InvalidCertificate);
/// ```
macro_rules! unwrap_or {
    ( $res:expr, $err:expr ) => {
        match $res {
            Ok(o) => o,
            Err(e) => return Err(e >> $err),
        }
    };
}

/// Implements [`Error`].
impl Error {
    /// Instantiates an empty [`Error`].
    pub(crate) fn new() -> Error {
        Error(Vec::new())
    }

    /// Returns an iterator over the [`ErrorCode`] from the chain.
    pub fn iter(&self) -> std::slice::Iter<'_, ErrorCode> {
        self.0.iter()
    }

    /// Returns the length of the chain.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the emptiness of the chain.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the most general error code of the chain.
    pub fn outermost(&self) -> Option<&ErrorCode> {
        self.0.last()
    }

    /// Returns true if one of the codes of the chain matches `code`.
    pub fn contains(&self, code: impl Into<BaseErrorCode>) -> bool {
        let code = code.into();
        self.0.iter().any(|e| e.code() == code)
    }

    /// Verifies that two [`Error`] share the same error codes, ignoring
    /// messages.
    pub fn is(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(other.0.iter()).all(|(a, b)| a.is(b))
    }
}
