//! Base64 helpers for binary MIME payloads (`image/png`) carried in kernel frames.

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serializer};

/// Decode a base64 MIME payload.
///
/// Kernels wrap long payloads across lines, so ASCII whitespace is dropped
/// before decoding.
pub fn decode_payload(encoded: &str) -> Result<Bytes, base64::DecodeError> {
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    BASE64_STANDARD.decode(compact).map(Bytes::from)
}

/// Encode raw bytes back into the standard base64 alphabet.
pub fn encode_payload(data: &[u8]) -> String {
    BASE64_STANDARD.encode(data)
}

/// Serialize Bytes as a single base64 string.
///
/// Used with `#[serde(serialize_with = "serialize_payload")]`
pub fn serialize_payload<S>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&encode_payload(data))
}

/// Deserialize a base64 string into Bytes.
///
/// Used with `#[serde(deserialize_with = "deserialize_payload")]`
pub fn deserialize_payload<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    decode_payload(&encoded).map_err(serde::de::Error::custom)
}
