//! Wire types for the plas kernel relay.
//!
//! This crate provides the JSON frames exchanged with the execution relay at
//! `ws://{host}/ws/{kernel_id}` and the escaping rules used when kernel output
//! is rendered into a node.
//!
//! # Features
//!
//! - Inbound frame parsing into a typed [`KernelMessage`] union
//! - Outbound execute frames in both the identity-carrying and legacy shapes
//! - Base64 decoding of binary MIME payloads
//! - ANSI stripping and HTML escaping of output text

mod base64;
mod message;
pub mod render;

pub use crate::base64::{decode_payload, deserialize_payload, encode_payload, serialize_payload};
pub use message::{
    ConversionError, DisplayContent, ErrorContent, ExecuteFrame, ExecutionState, FrameFormat,
    KernelFrame, KernelMessage, LegacyOp, MimeBundle, RawKernelFrame, StatusContent,
    StreamContent, EXEC_END_SIG,
};
