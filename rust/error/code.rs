// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Defines [`ErrorCode`], [`BaseErrorCode`] and the error enums.
//!
//! Errors are classified by kind. Each kind owns an enum listing the
//! precise errors that may happen, along with a description.

/// An enum allowed in [`BaseErrorCode`].
pub(crate) trait AllowedBaseErrorCodeEnum: Copy + Clone + Sized {}

/// Generates the error enums, the [`ErrorKind`] enum and [`BaseErrorCode`].
///
/// This macro accepts a variadic list of dictionaries ({}) as input.
/// Dictionaries MUST respect the following format:
///
/// ```text
///   {
///     kind: KIND,
///     sym: SYM,
///     desc: ESTR,
///     values: [
///        VALUE_SYM => VALUE_STR,
///        …
///     ],
///   },
///   …
/// ```
///
/// `KIND` is the variant of [`ErrorKind`] the enum belongs to.
/// `SYM` is the name of the generated enum.
/// `ESTR` is the string description of the error kind.
/// `VALUE_SYM` is a variant of the generated enum and `VALUE_STR` its
/// description.
macro_rules! GenErrorCode {
    ( $( {kind: $kind:ident, sym: $sym:ident, desc: $desc:expr, values: [$( $vsym:ident => $vstr:expr,)*], },) *) => {
        /// Kind of an error.
        #[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
        pub enum ErrorKind {
            $(
                #[doc=$desc]
                $kind,
            )*
        }

        $(
            #[doc=$desc]
            #[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
            pub enum $sym {
                $(
                    #[doc=$vstr]
                    $vsym,
                )*
            }

            impl $sym {
                /// Returns the description of the error.
                pub fn description(&self) -> &'static str {
                    match self {
                        $(
                            Self::$vsym => $vstr,
                        )*
                    }
                }
            }

            impl std::convert::From<$sym> for BaseErrorCode {
                fn from(v: $sym) -> Self {
                    Self::$sym(v)
                }
            }

            impl AllowedBaseErrorCodeEnum for $sym {}

            /// Implements comparison operator between [`BaseErrorCode`] and the current error enum.
            impl PartialEq<BaseErrorCode> for $sym {
                fn eq(&self, other: &BaseErrorCode) -> bool {
                    match other {
                        BaseErrorCode::$sym(ec) => ec == self,
                        #[allow(unreachable_patterns)]
                        _ => false,
                    }
                }
            }
        )*

        /// An error code, without its optional message.
        #[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
        pub enum BaseErrorCode {
            $(
                #[doc=$desc]
                $sym($sym),
            )*
        }

        impl BaseErrorCode {
            /// Returns the kind of the error code.
            pub fn kind(&self) -> ErrorKind {
                match self {
                    $(
                        Self::$sym(_) => ErrorKind::$kind,
                    )*
                }
            }
        }

        /// Implements [`std::fmt::Display`] for [`BaseErrorCode`].
        impl std::fmt::Display for BaseErrorCode {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                match self {
                    $(
                        Self::$sym(e) => write!(f, "{}: {}", $desc, e.description()),
                    )*
                }
            }
        }

    };
}

GenErrorCode!(
    {
        kind: Api,
        sym: ApiError,
        desc: "api error",
        values: [
            Configuration => "invalid configuration",
            Tunnel => "tunnel error",
            Scenario => "scenario error",
        ],
    },
    {
        kind: Configuration,
        sym: ConfigurationError,
        desc: "configuration error",
        values: [
            Invalid => "invalid configuration",
            UnsupportedProtocol => "unsupported protocol version policy",
            InvalidCipherList => "no cipher matched the cipher list",
            InvalidCertificate => "invalid local certificate",
            InvalidPrivateKey => "invalid private key",
            PrivateKeyMismatch => "private key does not match the certificate",
            InvalidTrustStore => "invalid trust store",
            InvalidServerName => "invalid server name",
            Parse => "failed to parse the configuration",
        ],
    },
    {
        kind: Alpn,
        sym: AlpnError,
        desc: "ALPN error",
        values: [
            ProtocolEmpty => "empty protocol name",
            ProtocolTooLong => "protocol name too long",
            InvalidString => "protocol name contains a NUL byte",
        ],
    },
    {
        kind: Certificate,
        sym: CertificateError,
        desc: "certificate error",
        values: [
            Malformed => "malformed certificate",
            Unsupported => "certificate not supported by the underlying implementation",
            Generation => "certificate generation failed",
        ],
    },
    {
        kind: PrivateKey,
        sym: PrivateKeyError,
        desc: "private key error",
        values: [
            Malformed => "malformed private key",
            Unsupported => "private key not supported by the underlying implementation",
        ],
    },
    {
        kind: Tunnel,
        sym: TunnelError,
        desc: "tunnel error",
        values: [
            InvalidState => "operation not permitted in the current state",
            HandshakeFailed => "handshake failed",
            RecordFailed => "record layer failure",
            Closed => "tunnel closed",
            Internal => "internal cipher layer error",
        ],
    },
    {
        kind: System,
        sym: SystemError,
        desc: "system error",
        values: [
            Memory => "memory error",
            Initialization => "cryptographic library initialization failed",
            IntegerOverflow => "integer overflow",
        ],
    },
    {
        kind: Scenario,
        sym: ScenarioError,
        desc: "scenario error",
        values: [
            InvalidSpec => "invalid scenario description",
            EmptyCipherTier => "cipher tier resolved to no cipher",
            Unexpected => "unexpected condition while running the scenario",
        ],
    },
);

/// An error code, with an optional message.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ErrorCode {
    /// The code.
    code: BaseErrorCode,

    /// An optional message.
    msg: Option<String>,
}

impl<E: AllowedBaseErrorCodeEnum> std::convert::From<E> for ErrorCode
where
    BaseErrorCode: From<E>,
{
    fn from(e: E) -> Self {
        Self {
            code: BaseErrorCode::from(e),
            msg: None,
        }
    }
}

impl<E: AllowedBaseErrorCodeEnum> std::convert::From<(E, &str)> for ErrorCode
where
    BaseErrorCode: From<E>,
{
    fn from((e, s): (E, &str)) -> Self {
        Self {
            code: BaseErrorCode::from(e),
            msg: Some(s.to_string()),
        }
    }
}

impl<E: AllowedBaseErrorCodeEnum> std::convert::From<(E, String)> for ErrorCode
where
    BaseErrorCode: From<E>,
{
    fn from((e, s): (E, String)) -> Self {
        Self {
            code: BaseErrorCode::from(e),
            msg: Some(s),
        }
    }
}

impl std::convert::From<BaseErrorCode> for ErrorCode {
    fn from(code: BaseErrorCode) -> Self {
        Self { code, msg: None }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.msg.as_ref() {
            Some(msg) => write!(f, "{} ({msg})", self.code),
            None => write!(f, "{}", self.code),
        }
    }
}

impl ErrorCode {
    /// Returns the code.
    pub fn code(&self) -> BaseErrorCode {
        self.code
    }

    /// Returns the kind of the code.
    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    /// Returns the message, if any.
    pub fn msg(&self) -> Option<&str> {
        self.msg.as_deref()
    }

    /// Compares two codes, ignoring their messages.
    pub fn is(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl<T> PartialEq<T> for ErrorCode
where
    T: AllowedBaseErrorCodeEnum,
    BaseErrorCode: From<T>,
{
    fn eq(&self, other: &T) -> bool {
        self.code == BaseErrorCode::from(*other)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Tests the comparison between [`ErrorCode`] and an error enum.
    #[test]
    fn test_comparison_error_code_enum() {
        let e = ErrorCode::from(ApiError::Tunnel);
        assert_eq!(e, ApiError::Tunnel);
        assert_ne!(e, ApiError::Configuration);
        assert_ne!(e, CertificateError::Malformed);
    }

    /// Tests that [`ErrorCode::is`] ignores messages.
    #[test]
    fn test_is_ignores_message() {
        let a = ErrorCode::from((TunnelError::Internal, "bad record mac"));
        let b = ErrorCode::from(TunnelError::Internal);
        assert!(a.is(&b));
        assert_ne!(a, b);
        assert_eq!(a.msg(), Some("bad record mac"));
    }

    /// Tests the display of an [`ErrorCode`] carrying a message.
    #[test]
    fn test_display() {
        let e = ErrorCode::from((ConfigurationError::InvalidCipherList, "EXPORT".to_string()));
        assert_eq!(
            e.to_string(),
            "configuration error: no cipher matched the cipher list (EXPORT)"
        );
        assert_eq!(e.kind(), ErrorKind::Configuration);
    }
}
