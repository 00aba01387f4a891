// SPDX-License-Identifier: MIT OR Apache-2.0
//! Content-addressed call identity.
//!
//! An identifier is the base64 encoding of a SHA-512/256 digest of
//! `<account>/<region>/<service>.<api>?<canonical-json(input)>`. Canonical
//! JSON here means every field of the input is present (callers must not
//! build `in_` with `skip_serializing_if`-style omission before it reaches
//! this crate) and object keys serialize in sorted order, which
//! `serde_json::Value`'s default `BTreeMap`-backed object representation
//! already guarantees without any extra sorting pass.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha512_256};

/// Serialize a JSON value in canonical form: sorted object keys, no HTML
/// escaping (`serde_json` never HTML-escapes), every field present as
/// constructed by the caller.
#[must_use]
pub fn canonical_json(value: &serde_json::Value) -> String {
    serde_json::to_string(value).expect("serde_json::Value serialization is infallible")
}

/// Derive the stable content-addressed id for one concrete call.
///
/// Two calls to this function with identical arguments always return the
/// same string; identity must be stable across repeated runs.
#[must_use]
pub fn call_id(account: &str, region: &str, service: &str, api: &str, input: &serde_json::Value) -> String {
    let payload = format!("{account}/{region}/{service}.{api}?{}", canonical_json(input));
    let digest = Sha512_256::digest(payload.as_bytes());
    BASE64.encode(digest)
}
