// Copyright (c) SandboxAQ. All rights reserved.
// SPDX-License-Identifier: AGPL-3.0-only

//! PEM framing of certificates.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use x509_parser::error::PEMError;
use x509_parser::pem::Pem;

/// Header of a PEM certificate block.
pub const BEGIN_CERTIFICATE: &str = "-----BEGIN CERTIFICATE-----";

/// Footer of a PEM certificate block.
pub const END_CERTIFICATE: &str = "-----END CERTIFICATE-----";

/// Width of a base64 line.
pub const LINE_WIDTH: usize = 64;

/// Wraps DER bytes into a PEM certificate block.
///
/// Every line holds [`LINE_WIDTH`] base64 characters except the last one,
/// and every line, including the footer, ends with `\n`.
pub fn encode(der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let mut out = String::with_capacity(
        BEGIN_CERTIFICATE.len() + END_CERTIFICATE.len() + body.len() + body.len() / LINE_WIDTH + 3,
    );
    out.push_str(BEGIN_CERTIFICATE);
    out.push('\n');
    for chunk in body.as_bytes().chunks(LINE_WIDTH) {
        // base64 output is ASCII.
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out.push_str(END_CERTIFICATE);
    out.push('\n');
    out
}

/// Label of a certificate block.
const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// Extracts the DER content of up to `count` certificate blocks.
///
/// `None` means all blocks. Blocks with another label or whose body is not
/// valid base64 are skipped. Scanning stops at the first structurally broken
/// block.
pub fn decode_blocks(pem: &[u8], count: Option<usize>) -> Vec<Vec<u8>> {
    let mut blocks = Vec::new();
    for block in Pem::iter_from_buffer(pem) {
        if count.map(|c| blocks.len() >= c).unwrap_or(false) {
            break;
        }
        match block {
            Ok(block) if block.label == CERTIFICATE_LABEL => blocks.push(block.contents),
            Ok(block) => log::debug!("skipping PEM block labelled {}", block.label),
            Err(PEMError::Base64DecodeError) => {
                log::debug!("skipping PEM block with invalid base64")
            }
            Err(e) => {
                log::debug!("stopping at broken PEM block: {e}");
                break;
            }
        }
    }
    blocks
}
