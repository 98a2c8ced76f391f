// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HMAC-SHA256 payload signing.
//!
//! The signature covers the raw request bytes exactly as sent, so receivers
//! must verify before any JSON re-serialization.

use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "X-Flowline-Signature-256";

type HmacSha256 = Hmac<Sha256>;

/// Header value for `body` under `secret`: `sha256=<hex digest>`.
pub fn signature(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time verification of a received signature header value.
pub fn verify(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_digest) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(received) = hex::decode(hex_digest) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    mac.verify_slice(&received).is_ok()
}
