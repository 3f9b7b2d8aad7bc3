// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Support module.

use std::sync::Once;

#[cfg(test)]
pub(crate) mod test_certs;

/// Guards the one-time initialization of the cryptographic library.
static LIBRARY_INIT: Once = Once::new();

/// Initializes OpenSSL exactly once per process.
///
/// Every entry point that touches the library calls this before doing
/// anything else.
pub(crate) fn ensure_library_initialized() {
    LIBRARY_INIT.call_once(|| {
        openssl::init();
        log::debug!("initialized {}", openssl::version::version());
    });
}

/// Returns a string containing the error strings for all errors that
/// OpenSSL has recorded.
/// This function clears the error queue.
pub(crate) fn errstr() -> String {
    format_error_stack(&openssl::error::ErrorStack::get())
}

/// Renders an [`openssl::error::ErrorStack`].
pub(crate) fn format_error_stack(stack: &openssl::error::ErrorStack) -> String {
    let errors = stack.errors();
    if errors.is_empty() {
        return "no additional information".to_string();
    }
    join_strings_with_delimiter(
        errors
            .iter()
            .map(|e| match e.reason() {
                Some(reason) => format!("{}: {reason}", e.library().unwrap_or("unknown library")),
                None => format!("error code {:#x}", e.code()),
            })
            .collect::<Vec<_>>()
            .iter(),
        ',',
    )
}

/// Checks if a given string contains any of the characters from another string.
pub(crate) fn contains_any_of(string: &str, invalid_chars: &str) -> bool {
    string.chars().any(|c| invalid_chars.contains(c))
}

/// Joins the strings together with the delimiter in between each string.
pub(crate) fn join_strings_with_delimiter(
    strings: std::slice::Iter<'_, impl AsRef<str>>,
    delimiter: char,
) -> String {
    let mut output = String::new();
    for s in strings {
        output.push_str(s.as_ref());
        output.push(delimiter);
    }
    output.pop();
    output
}

/// Renders bytes as uppercase hexadecimal, without separator.
pub(crate) fn hex_upper(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02X}");
    }
    s
}

/// Renders bytes as lowercase hexadecimal, colon separated.
pub(crate) fn hex_colon(bytes: &[u8]) -> String {
    let parts = bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>();
    join_strings_with_delimiter(parts.iter(), ':')
}

#[cfg(test)]
mod test {
    use super::*;

    /// Tests [`contains_any_of`].
    #[test]
    fn test_contains_any_of() {
        assert!(contains_any_of("h2\0", "\0"));
        assert!(!contains_any_of("http/1.1", "\0"));
    }

    /// Tests [`join_strings_with_delimiter`].
    #[test]
    fn test_join_strings_with_delimiter() {
        let v = ["AES128-SHA", "DES-CBC3-SHA"];
        assert_eq!(
            join_strings_with_delimiter(v.iter(), ':'),
            "AES128-SHA:DES-CBC3-SHA"
        );
        let empty: [&str; 0] = [];
        assert_eq!(join_strings_with_delimiter(empty.iter(), ':'), "");
    }

    /// Tests [`hex_upper`] and [`hex_colon`].
    #[test]
    fn test_hex() {
        assert_eq!(hex_upper(&[0x0a, 0xff, 0x00]), "0AFF00");
        assert_eq!(hex_colon(&[0x0a, 0xff, 0x00]), "0a:ff:00");
        assert_eq!(hex_colon(&[]), "");
    }

    /// Tests that [`errstr`] never returns an empty string.
    #[test]
    fn test_errstr_empty_queue() {
        ensure_library_initialized();
        let _ = errstr();
        assert_eq!(errstr(), "no additional information");
    }
}
