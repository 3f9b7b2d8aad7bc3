// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! X.509 v3 extensions and subject alternative names.

use x509_parser::der_parser::parse_der;
use x509_parser::extensions::{
    DistributionPointName, GeneralName, ParsedExtension, X509Extension,
};

use crate::support::hex_colon;

/// Upper bound on decoded name lengths. Longer entries are treated as
/// malformed.
pub(crate) const MAX_NAME_LENGTH: usize = 8192;

/// Kind of a subject alternative name.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum AltNameKind {
    Dns,
    Email,
}

/// A subject alternative name entry.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct SubjectAltName {
    pub kind: AltNameKind,
    pub value: String,
}

/// Value of a decoded extension.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum ExtensionValue {
    Bool(bool),
    Integer(i64),
    String(String),
    List(Vec<String>),
    /// Ordered key/value pairs. Keys may repeat.
    Map(Vec<(String, ExtensionValue)>),
    /// Opaque dump of the extension content.
    Bytes(Vec<u8>),
}

impl ExtensionValue {
    /// Returns the first value stored under `key`, if this is a map.
    pub fn get(&self, key: &str) -> Option<&ExtensionValue> {
        match self {
            Self::Map(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Returns the string, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// An X.509 extension.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Extension {
    /// Dotted OID.
    pub oid: String,

    /// Short name, or the dotted OID when the extension is unknown.
    pub name: String,

    /// Critical flag.
    pub critical: bool,

    /// Decoded value.
    pub value: ExtensionValue,

    /// True if a dedicated decoder handled the extension.
    pub supported: bool,
}

/// Returns the short name of a well-known extension OID.
fn extension_name(oid: &str) -> Option<&'static str> {
    Some(match oid {
        "2.5.29.19" => "basicConstraints",
        "1.3.6.1.5.5.7.1.1" => "authorityInfoAccess",
        "2.5.29.14" => "subjectKeyIdentifier",
        "2.5.29.35" => "authorityKeyIdentifier",
        "2.5.29.15" => "keyUsage",
        "2.5.29.37" => "extendedKeyUsage",
        "2.5.29.17" => "subjectAltName",
        "2.5.29.18" => "issuerAltName",
        "2.5.29.31" => "crlDistributionPoints",
        "2.5.29.32" => "certificatePolicies",
        "2.5.29.30" => "nameConstraints",
        "2.16.840.1.113730.1.13" => "nsComment",
        "1.3.6.1.4.1.11129.2.4.2" => "ct_precert_scts",
        _ => return None,
    })
}

/// Returns the short name of an access method.
fn access_method_name(oid: &str) -> String {
    match oid {
        "1.3.6.1.5.5.7.48.1" => "OCSP".to_string(),
        "1.3.6.1.5.5.7.48.2" => "caIssuers".to_string(),
        other => other.to_string(),
    }
}

/// Returns a bounded string, or `None` if it is implausibly long.
fn bounded(s: &str) -> Option<String> {
    (s.len() < MAX_NAME_LENGTH).then(|| s.to_string())
}

/// Renders a general name as an `(label, value)` pair.
fn general_name_pair(name: &GeneralName<'_>) -> Option<(String, String)> {
    match name {
        GeneralName::DNSName(s) => bounded(s).map(|v| ("DNS".to_string(), v)),
        GeneralName::RFC822Name(s) => bounded(s).map(|v| ("email".to_string(), v)),
        GeneralName::URI(s) => bounded(s).map(|v| ("URI".to_string(), v)),
        GeneralName::IPAddress(ip) => Some(("IP Address".to_string(), render_ip(ip))),
        GeneralName::DirectoryName(n) => Some(("DirName".to_string(), n.to_string())),
        GeneralName::RegisteredID(oid) => Some(("Registered ID".to_string(), oid.to_id_string())),
        _ => None,
    }
}

/// Renders an IP address from its raw octets.
fn render_ip(ip: &[u8]) -> String {
    match ip.len() {
        4 => {
            let octets: [u8; 4] = [ip[0], ip[1], ip[2], ip[3]];
            std::net::Ipv4Addr::from(octets).to_string()
        }
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(ip);
            std::net::Ipv6Addr::from(octets).to_string()
        }
        _ => hex_colon(ip),
    }
}

/// Decodes the extensions with a dedicated decoder.
fn decode_specific(ext: &ParsedExtension<'_>) -> Option<ExtensionValue> {
    match ext {
        ParsedExtension::BasicConstraints(bc) => {
            let mut pairs = vec![("ca".to_string(), ExtensionValue::Bool(bc.ca))];
            if let Some(len) = bc.path_len_constraint {
                pairs.push((
                    "pathLenConstraint".to_string(),
                    ExtensionValue::Integer(i64::from(len)),
                ));
            }
            Some(ExtensionValue::Map(pairs))
        }
        ParsedExtension::AuthorityInfoAccess(aia) => {
            let mut pairs = Vec::new();
            for desc in &aia.accessdescs {
                match &desc.access_location {
                    GeneralName::URI(uri) => match bounded(uri) {
                        Some(uri) => pairs.push((
                            access_method_name(&desc.access_method.to_id_string()),
                            ExtensionValue::String(uri),
                        )),
                        None => log::debug!("skipping oversized access location"),
                    },
                    other => log::warn!("unexpected access location type: {other:?}"),
                }
            }
            Some(ExtensionValue::Map(pairs))
        }
        ParsedExtension::SubjectKeyIdentifier(ski) => {
            Some(ExtensionValue::String(hex_colon(ski.0).to_uppercase()))
        }
        ParsedExtension::AuthorityKeyIdentifier(aki) => {
            let mut pairs = Vec::new();
            if let Some(keyid) = aki.key_identifier.as_ref() {
                let hex = keyid.0.iter().map(|b| format!("{b:02x}")).collect::<String>();
                pairs.push(("keyid".to_string(), ExtensionValue::String(hex)));
            }
            if let Some(serial) = aki.authority_cert_serial {
                pairs.push(("serial".to_string(), ExtensionValue::String(hex_colon(serial))));
            }
            Some(ExtensionValue::Map(pairs))
        }
        _ => None,
    }
}

/// Decodes the extensions without a dedicated decoder, as a multi-value
/// structure first, then as a plain string.
fn decode_generic(ext: &ParsedExtension<'_>) -> Option<ExtensionValue> {
    match ext {
        ParsedExtension::KeyUsage(ku) => {
            let flags = [
                (ku.digital_signature(), "Digital Signature"),
                (ku.non_repudiation(), "Non Repudiation"),
                (ku.key_encipherment(), "Key Encipherment"),
                (ku.data_encipherment(), "Data Encipherment"),
                (ku.key_agreement(), "Key Agreement"),
                (ku.key_cert_sign(), "Certificate Sign"),
                (ku.crl_sign(), "CRL Sign"),
                (ku.encipher_only(), "Encipher Only"),
                (ku.decipher_only(), "Decipher Only"),
            ];
            Some(ExtensionValue::List(
                flags
                    .iter()
                    .filter(|(set, _)| *set)
                    .map(|(_, name)| name.to_string())
                    .collect(),
            ))
        }
        ParsedExtension::ExtendedKeyUsage(eku) => {
            let mut list = Vec::new();
            for (set, name) in [
                (eku.any, "Any Extended Key Usage"),
                (eku.server_auth, "TLS Web Server Authentication"),
                (eku.client_auth, "TLS Web Client Authentication"),
                (eku.code_signing, "Code Signing"),
                (eku.email_protection, "E-mail Protection"),
                (eku.time_stamping, "Time Stamping"),
                (eku.ocsp_signing, "OCSP Signing"),
            ] {
                if set {
                    list.push(name.to_string());
                }
            }
            list.extend(eku.other.iter().map(|oid| oid.to_id_string()));
            Some(ExtensionValue::List(list))
        }
        ParsedExtension::SubjectAlternativeName(san) => Some(ExtensionValue::Map(
            san.general_names
                .iter()
                .filter_map(general_name_pair)
                .map(|(k, v)| (k, ExtensionValue::String(v)))
                .collect(),
        )),
        ParsedExtension::IssuerAlternativeName(ian) => Some(ExtensionValue::Map(
            ian.general_names
                .iter()
                .filter_map(general_name_pair)
                .map(|(k, v)| (k, ExtensionValue::String(v)))
                .collect(),
        )),
        ParsedExtension::CRLDistributionPoints(cdp) => {
            let mut list = Vec::new();
            for point in cdp.points.iter() {
                if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                    list.extend(
                        names
                            .iter()
                            .filter_map(general_name_pair)
                            .map(|(k, v)| format!("{k}:{v}")),
                    );
                }
            }
            Some(ExtensionValue::List(list))
        }
        ParsedExtension::CertificatePolicies(policies) => Some(ExtensionValue::List(
            policies
                .iter()
                .map(|p| format!("Policy: {}", p.policy_id.to_id_string()))
                .collect(),
        )),
        ParsedExtension::NsCertComment(comment) => bounded(comment).map(ExtensionValue::String),
        _ => None,
    }
}

/// Decodes an extension value holding a single string: a DER string type,
/// or bare printable UTF-8.
fn decode_string(value: &[u8]) -> Option<String> {
    if let Ok((rest, object)) = parse_der(value) {
        if rest.is_empty() {
            if let Ok(s) = object.as_str() {
                return bounded(s);
            }
        }
    }
    let s = std::str::from_utf8(value).ok()?;
    if s.is_empty() || s.chars().any(char::is_control) {
        return None;
    }
    bounded(s)
}

/// Converts a parsed extension.
pub(crate) fn convert(ext: &X509Extension<'_>) -> Extension {
    let oid = ext.oid.to_id_string();
    let name = extension_name(&oid)
        .map(str::to_string)
        .unwrap_or_else(|| oid.clone());
    let parsed = ext.parsed_extension();

    let (value, supported) = if let Some(v) = decode_specific(parsed) {
        (v, true)
    } else if let Some(v) = decode_generic(parsed) {
        (v, false)
    } else if let Some(v) = decode_string(ext.value) {
        (ExtensionValue::String(v), false)
    } else {
        (ExtensionValue::Bytes(ext.value.to_vec()), false)
    };

    Extension {
        oid,
        name,
        critical: ext.critical,
        value,
        supported,
    }
}

/// Collects the DNS and e-mail subject alternative names of a list of
/// extensions. Other kinds and oversized entries are ignored.
pub(crate) fn subject_alt_names(extensions: &[X509Extension<'_>]) -> Vec<SubjectAltName> {
    let mut names = Vec::new();
    for ext in extensions {
        let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() else {
            continue;
        };
        for name in &san.general_names {
            let (kind, value) = match name {
                GeneralName::DNSName(s) => (AltNameKind::Dns, *s),
                GeneralName::RFC822Name(s) => (AltNameKind::Email, *s),
                _ => continue,
            };
            match bounded(value) {
                Some(value) => names.push(SubjectAltName { kind, value }),
                None => log::warn!("ignoring oversized subject alternative name"),
            }
        }
    }
    names
}
