//! Kernel relay frames exchanged over `ws://{host}/ws/{kernel_id}`.
//!
//! The relay forwards iopub messages from the kernel as JSON objects with a
//! top-level `msg_type`, the message `content`, and the `node_id` of the
//! execute request that produced them. When the kernel goes idle the relay
//! sends a synthetic `exec-end-sig` frame instead of the idle status.

use std::borrow::Cow;
use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::base64::decode_payload;

/// Error type for frame conversion failures.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Failed to parse {msg_type} content: {source}")]
    ContentParseError {
        msg_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Intermediate struct for deserializing inbound frames.
///
/// `content` stays raw until `msg_type` tells us how to read it. Other keys the
/// relay copies from the Jupyter message (`header`, `parent_header`, ...) are
/// ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RawKernelFrame {
    pub msg_type: String,

    #[serde(default)]
    pub content: Value,

    #[serde(default)]
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Busy,
    Idle,
    Starting,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusContent {
    pub execution_state: ExecutionState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamContent {
    #[serde(default)]
    pub name: String,
    pub text: String,
}

/// MIME-keyed output data (`content.data`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MimeBundle(pub HashMap<String, Value>);

impl MimeBundle {
    /// `text/plain` payload. Multiline payloads may arrive as an array of lines.
    pub fn text_plain(&self) -> Option<Cow<'_, str>> {
        match self.0.get("text/plain")? {
            Value::String(text) => Some(Cow::Borrowed(text.as_str())),
            Value::Array(lines) => Some(Cow::Owned(
                lines.iter().filter_map(Value::as_str).collect::<String>(),
            )),
            _ => None,
        }
    }

    /// Decoded `image/png` payload, if the bundle carries one.
    pub fn image_png(&self) -> Option<Result<Bytes, base64::DecodeError>> {
        self.0
            .get("image/png")
            .and_then(Value::as_str)
            .map(decode_payload)
    }
}

/// Content shared by `execute_result` and `display_data`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DisplayContent {
    #[serde(default)]
    pub data: MimeBundle,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorContent {
    #[serde(default)]
    pub ename: String,
    #[serde(default)]
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

/// A parsed inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelMessage {
    Status(StatusContent),
    Stream(StreamContent),
    ExecuteResult(DisplayContent),
    DisplayData(DisplayContent),
    Error(ErrorContent),
    /// Relay marker: the kernel went idle after the current execution.
    ExecEnd,
    /// Anything else (`execute_input`, `clear_output`, comm traffic, ...)
    Other { msg_type: String, content: Value },
}

pub const EXEC_END_SIG: &str = "exec-end-sig";

impl KernelMessage {
    pub fn from_type_and_content(msg_type: &str, content: Value) -> Result<Self, ConversionError> {
        fn parse<T: serde::de::DeserializeOwned>(
            msg_type: &str,
            content: Value,
        ) -> Result<T, ConversionError> {
            serde_json::from_value(content).map_err(|source| ConversionError::ContentParseError {
                msg_type: msg_type.to_string(),
                source,
            })
        }

        Ok(match msg_type {
            "status" => KernelMessage::Status(parse(msg_type, content)?),
            "stream" => KernelMessage::Stream(parse(msg_type, content)?),
            "execute_result" => KernelMessage::ExecuteResult(parse(msg_type, content)?),
            "display_data" => KernelMessage::DisplayData(parse(msg_type, content)?),
            // An error ends the execution whatever its payload looks like.
            "error" if content.is_null() => KernelMessage::Error(ErrorContent::default()),
            "error" => KernelMessage::Error(parse(msg_type, content)?),
            EXEC_END_SIG => KernelMessage::ExecEnd,
            other => KernelMessage::Other {
                msg_type: other.to_string(),
                content,
            },
        })
    }

    pub fn msg_type(&self) -> &str {
        match self {
            KernelMessage::Status(_) => "status",
            KernelMessage::Stream(_) => "stream",
            KernelMessage::ExecuteResult(_) => "execute_result",
            KernelMessage::DisplayData(_) => "display_data",
            KernelMessage::Error(_) => "error",
            KernelMessage::ExecEnd => EXEC_END_SIG,
            KernelMessage::Other { msg_type, .. } => msg_type,
        }
    }

    pub fn is_busy_status(&self) -> bool {
        matches!(
            self,
            KernelMessage::Status(StatusContent {
                execution_state: ExecutionState::Busy
            })
        )
    }
}

/// An inbound frame: the message plus the node it was produced for.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelFrame {
    pub node_id: Option<String>,
    pub message: KernelMessage,
}

impl KernelFrame {
    pub fn parse(text: &str) -> Result<Self, ConversionError> {
        let raw: RawKernelFrame = serde_json::from_str(text)?;
        raw.try_into()
    }
}

impl TryFrom<RawKernelFrame> for KernelFrame {
    type Error = ConversionError;

    fn try_from(raw: RawKernelFrame) -> Result<Self, Self::Error> {
        let message = KernelMessage::from_type_and_content(&raw.msg_type, raw.content)?;
        Ok(KernelFrame {
            node_id: raw.node_id.filter(|id| !id.is_empty()),
            message,
        })
    }
}

/// Custom Deserialize implementation that uses RawKernelFrame internally.
impl<'de> Deserialize<'de> for KernelFrame {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawKernelFrame::deserialize(deserializer)?;
        raw.try_into().map_err(serde::de::Error::custom)
    }
}

/// Which outbound execute frame the relay expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    /// `{code, node_id}`; replies carry the node id back.
    #[default]
    Identity,
    /// `{ops: "exec", code}`; replies are attributed by queue position only.
    Legacy,
}

impl std::fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameFormat::Identity => write!(f, "identity"),
            FrameFormat::Legacy => write!(f, "legacy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacyOp {
    Exec,
}

/// Outbound execute request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecuteFrame {
    Identity { code: String, node_id: String },
    Legacy { ops: LegacyOp, code: String },
}

impl ExecuteFrame {
    pub fn new(format: FrameFormat, code: impl Into<String>, node_id: impl Into<String>) -> Self {
        match format {
            FrameFormat::Identity => ExecuteFrame::Identity {
                code: code.into(),
                node_id: node_id.into(),
            },
            FrameFormat::Legacy => ExecuteFrame::Legacy {
                ops: LegacyOp::Exec,
                code: code.into(),
            },
        }
    }

    pub fn code(&self) -> &str {
        match self {
            ExecuteFrame::Identity { code, .. } | ExecuteFrame::Legacy { code, .. } => code,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_busy_status() {
        let frame = KernelFrame::parse(
            r#"{"msg_type": "status", "content": {"execution_state": "busy"}, "node_id": "n1"}"#,
        )
        .unwrap();
        assert_eq!(frame.node_id.as_deref(), Some("n1"));
        assert!(frame.message.is_busy_status());
    }

    #[test]
    fn test_parse_unknown_execution_state() {
        let frame = KernelFrame::parse(
            r#"{"msg_type": "status", "content": {"execution_state": "restarting"}}"#,
        )
        .unwrap();
        assert_eq!(
            frame.message,
            KernelMessage::Status(StatusContent {
                execution_state: ExecutionState::Unknown
            })
        );
    }

    #[test]
    fn test_parse_ignores_jupyter_envelope() {
        let text = json!({
            "header": {"msg_id": "abc", "msg_type": "stream"},
            "parent_header": {},
            "metadata": {},
            "msg_type": "stream",
            "content": {"name": "stdout", "text": "hello\n"},
            "node_id": "n1"
        })
        .to_string();
        let frame = KernelFrame::parse(&text).unwrap();
        assert_eq!(
            frame.message,
            KernelMessage::Stream(StreamContent {
                name: "stdout".to_string(),
                text: "hello\n".to_string()
            })
        );
    }

    #[test]
    fn test_parse_exec_end_without_content() {
        let frame = KernelFrame::parse(r#"{"msg_type": "exec-end-sig", "node_id": "n2"}"#).unwrap();
        assert_eq!(frame.message, KernelMessage::ExecEnd);
        assert_eq!(frame.message.msg_type(), "exec-end-sig");
    }

    #[test]
    fn test_parse_error_without_content() {
        let frame = KernelFrame::parse(r#"{"msg_type": "error", "node_id": "n1"}"#).unwrap();
        assert_eq!(frame.message, KernelMessage::Error(ErrorContent::default()));
    }

    #[test]
    fn test_empty_node_id_is_none() {
        let frame = KernelFrame::parse(r#"{"msg_type": "exec-end-sig", "node_id": ""}"#).unwrap();
        assert!(frame.node_id.is_none());
    }

    #[test]
    fn test_parse_error_traceback() {
        let frame = KernelFrame::parse(
            r#"{"msg_type": "error", "content": {"ename": "NameError", "evalue": "x", "traceback": ["a", "b"]}}"#,
        )
        .unwrap();
        match frame.message {
            KernelMessage::Error(err) => {
                assert_eq!(err.ename, "NameError");
                assert_eq!(err.traceback, vec!["a", "b"]);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_msg_type_is_forwarded() {
        let frame =
            KernelFrame::parse(r#"{"msg_type": "execute_input", "content": {"code": "1+1"}}"#)
                .unwrap();
        match frame.message {
            KernelMessage::Other { msg_type, content } => {
                assert_eq!(msg_type, "execute_input");
                assert_eq!(content["code"], "1+1");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_stream_is_content_error() {
        let err = KernelFrame::parse(r#"{"msg_type": "stream", "content": {}}"#).unwrap_err();
        assert!(matches!(err, ConversionError::ContentParseError { .. }));
    }

    #[test]
    fn test_mime_bundle_text_plain_accepts_line_arrays() {
        let bundle: MimeBundle =
            serde_json::from_value(json!({"text/plain": ["line 1\n", "line 2"]})).unwrap();
        assert_eq!(bundle.text_plain().unwrap(), "line 1\nline 2");
    }

    #[test]
    fn test_mime_bundle_image_png() {
        let bundle: MimeBundle =
            serde_json::from_value(json!({"text/plain": "<Figure>", "image/png": "aGVsbG8="}))
                .unwrap();
        assert_eq!(&bundle.image_png().unwrap().unwrap()[..], b"hello");
    }

    #[test]
    fn test_identity_execute_frame() {
        let frame = ExecuteFrame::new(FrameFormat::Identity, "print(1)", "n1");
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"code": "print(1)", "node_id": "n1"}));
    }

    #[test]
    fn test_legacy_execute_frame() {
        let frame = ExecuteFrame::new(FrameFormat::Legacy, "print(1)", "n1");
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"ops": "exec", "code": "print(1)"}));
    }
}
