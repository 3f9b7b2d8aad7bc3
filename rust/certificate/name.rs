// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! Subject and issuer distinguished names.

use x509_parser::x509::X509Name;

/// Well-known attributes of a distinguished name.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum SubjectInfo {
    Organization,
    CommonName,
    LocalityName,
    OrganizationalUnitName,
    CountryName,
    StateOrProvinceName,
    DistinguishedNameQualifier,
    SerialNumber,
    EmailAddress,
}

impl SubjectInfo {
    /// Returns the dotted OID of the attribute.
    pub fn oid(&self) -> &'static str {
        match self {
            Self::Organization => "2.5.4.10",
            Self::CommonName => "2.5.4.3",
            Self::LocalityName => "2.5.4.7",
            Self::OrganizationalUnitName => "2.5.4.11",
            Self::CountryName => "2.5.4.6",
            Self::StateOrProvinceName => "2.5.4.8",
            Self::DistinguishedNameQualifier => "2.5.4.46",
            Self::SerialNumber => "2.5.4.5",
            Self::EmailAddress => "1.2.840.113549.1.9.1",
        }
    }

    /// Returns the short name of the attribute.
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Organization => "O",
            Self::CommonName => "CN",
            Self::LocalityName => "L",
            Self::OrganizationalUnitName => "OU",
            Self::CountryName => "C",
            Self::StateOrProvinceName => "ST",
            Self::DistinguishedNameQualifier => "dnQualifier",
            Self::SerialNumber => "serialNumber",
            Self::EmailAddress => "emailAddress",
        }
    }

    const ALL: [SubjectInfo; 9] = [
        Self::Organization,
        Self::CommonName,
        Self::LocalityName,
        Self::OrganizationalUnitName,
        Self::CountryName,
        Self::StateOrProvinceName,
        Self::DistinguishedNameQualifier,
        Self::SerialNumber,
        Self::EmailAddress,
    ];

    /// Resolves a short name or a dotted OID.
    pub fn lookup(key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|i| i.oid() == key || i.short_name().eq_ignore_ascii_case(key))
    }
}

/// One attribute of a distinguished name.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct NameEntry {
    /// Dotted OID of the attribute type.
    pub oid: String,

    /// Decoded value.
    pub value: String,
}

/// A distinguished name, as an ordered multi-valued mapping from attribute
/// OID to string.
#[derive(Clone, Default, Eq, PartialEq, Debug)]
pub struct NameEntries(Vec<NameEntry>);

impl NameEntries {
    /// Collects the attributes of an [`X509Name`], in encoding order.
    ///
    /// Attributes whose value is not a string type are skipped.
    pub(crate) fn from_x509_name(name: &X509Name<'_>) -> Self {
        let mut entries = Vec::new();
        for rdn in name.iter() {
            for attr in rdn.iter() {
                match attr.as_str() {
                    Ok(value) => entries.push(NameEntry {
                        oid: attr.attr_type().to_id_string(),
                        value: value.to_string(),
                    }),
                    Err(e) => log::debug!(
                        "skipping non-string attribute {}: {e}",
                        attr.attr_type().to_id_string()
                    ),
                }
            }
        }
        Self(entries)
    }

    /// Returns every value of an attribute, by dotted OID.
    pub fn values_by_oid(&self, oid: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|e| e.oid == oid)
            .map(|e| e.value.clone())
            .collect()
    }

    /// Returns every value of a well-known attribute.
    pub fn values(&self, info: SubjectInfo) -> Vec<String> {
        self.values_by_oid(info.oid())
    }

    /// Returns every value of an attribute given by short name or dotted
    /// OID.
    pub fn values_by_key(&self, key: &str) -> Vec<String> {
        match SubjectInfo::lookup(key) {
            Some(info) => self.values(info),
            None => self.values_by_oid(key),
        }
    }

    /// Returns the attributes, in encoding order.
    pub fn entries(&self) -> &[NameEntry] {
        &self.0
    }

    /// Returns true if the name holds no decodable attribute.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Tests [`SubjectInfo::lookup`].
    #[test]
    fn test_lookup() {
        assert_eq!(SubjectInfo::lookup("CN"), Some(SubjectInfo::CommonName));
        assert_eq!(SubjectInfo::lookup("cn"), Some(SubjectInfo::CommonName));
        assert_eq!(SubjectInfo::lookup("2.5.4.10"), Some(SubjectInfo::Organization));
        assert_eq!(SubjectInfo::lookup("1.2.3.4"), None);
    }

    /// Tests the multi-valued lookups of [`NameEntries`].
    #[test]
    fn test_values() {
        let names = NameEntries(vec![
            NameEntry {
                oid: "2.5.4.3".into(),
                value: "a.example.com".into(),
            },
            NameEntry {
                oid: "2.5.4.10".into(),
                value: "Example".into(),
            },
            NameEntry {
                oid: "2.5.4.3".into(),
                value: "b.example.com".into(),
            },
        ]);
        assert_eq!(
            names.values(SubjectInfo::CommonName),
            vec!["a.example.com".to_string(), "b.example.com".to_string()]
        );
        assert_eq!(names.values_by_key("O"), vec!["Example".to_string()]);
        assert_eq!(names.values_by_key("2.5.4.10"), vec!["Example".to_string()]);
        assert!(names.values(SubjectInfo::CountryName).is_empty());
    }
}
