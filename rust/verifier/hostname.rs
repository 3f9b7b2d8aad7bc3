// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Host name matching against certificate names.

use std::net::IpAddr;

use crate::certificate::{AltNameKind, Certificate, SubjectInfo};

/// Lowercases a name and strips one trailing dot.
fn normalize(name: &str) -> String {
    name.strip_suffix('.').unwrap_or(name).to_ascii_lowercase()
}

/// Returns true if `hostname` is an IP literal.
pub(crate) fn is_ip_literal(hostname: &str) -> bool {
    let trimmed = hostname.trim_start_matches('[').trim_end_matches(']');
    trimmed.parse::<IpAddr>().is_ok()
}

/// Registry suffixes spanning two labels. Not a public suffix list: only the
/// common ones are known.
const MULTI_LABEL_SUFFIXES: &[&str] = &[
    "ac.uk", "co.uk", "gov.uk", "org.uk", "com.au", "net.au", "org.au", "co.jp", "ne.jp",
    "or.jp", "co.nz", "com.br", "com.cn", "co.in", "co.za",
];

/// Matches a certificate name against a host name.
///
/// A wildcard is only honored in the leftmost label, where it matches
/// within exactly one label. The labels on its right must span at least two
/// labels, so `*.com` never matches anything, and must not be one of
/// [`MULTI_LABEL_SUFFIXES`], so `*.co.uk` does not either. Other registry
/// suffixes are not known. IP literals and IDN labels are never matched by a
/// wildcard.
pub fn matches(pattern: &str, hostname: &str) -> bool {
    let pattern = normalize(pattern);
    let hostname = normalize(hostname);
    if pattern.is_empty() || hostname.is_empty() {
        return false;
    }

    let Some(star) = pattern.find('*') else {
        return pattern == hostname;
    };

    let Some((first, rest)) = pattern.split_once('.') else {
        return false;
    };
    if star > first.len() || first.matches('*').count() != 1 || rest.contains('*') {
        return false;
    }
    if rest.split('.').filter(|l| !l.is_empty()).count() < 2
        || MULTI_LABEL_SUFFIXES.contains(&rest)
    {
        return false;
    }
    if first.starts_with("xn--") || is_ip_literal(&hostname) {
        return false;
    }

    let Some((host_first, host_rest)) = hostname.split_once('.') else {
        return false;
    };
    if host_rest != rest {
        return false;
    }
    let (prefix, suffix) = first.split_at(star);
    let suffix = &suffix[1..];
    host_first.len() >= prefix.len() + suffix.len()
        && host_first.starts_with(prefix)
        && host_first.ends_with(suffix)
}

/// Returns true if the leaf's CommonName or one of its DNS alternative names
/// matches `hostname`.
pub fn certificate_matches(cert: &Certificate, hostname: &str) -> bool {
    if cert.is_null() {
        return false;
    }
    if is_ip_literal(hostname) {
        let host = normalize(hostname.trim_start_matches('[').trim_end_matches(']'));
        return cert
            .subject_info()
            .values(SubjectInfo::CommonName)
            .iter()
            .chain(
                cert.subject_alt_names()
                    .iter()
                    .filter(|n| n.kind == AltNameKind::Dns)
                    .map(|n| &n.value),
            )
            .any(|name| normalize(name) == host);
    }

    let sans = cert.subject_alt_names();
    let dns = sans.iter().filter(|n| n.kind == AltNameKind::Dns);
    cert.subject_info()
        .values(SubjectInfo::CommonName)
        .iter()
        .chain(dns.map(|n| &n.value))
        .any(|name| matches(name, hostname))
}
