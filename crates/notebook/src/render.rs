//! Rendering kernel messages into a Code node's output area.

use bytes::Bytes;
use log::warn;
use plas_wire::render::escape_html;
use plas_wire::{encode_payload, DisplayContent, KernelMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEntry {
    Text(String),
    /// Decoded PNG bytes
    Image(Bytes),
    Error(String),
}

impl OutputEntry {
    pub fn to_html(&self) -> String {
        match self {
            OutputEntry::Text(text) => {
                format!("<p class=\"exec-res\">{}</p>", escape_html(text, true))
            }
            OutputEntry::Image(png) => format!(
                "<img class=\"exec-res ms-2\" src=\"data:image/png;base64,{}\"/>",
                encode_payload(png)
            ),
            OutputEntry::Error(text) => format!(
                "<p class=\"text-danger exec-res\">{}</p>",
                escape_html(text, true).replace('\n', "<br>")
            ),
        }
    }

    /// Plain-text form, for terminals.
    pub fn to_text(&self) -> String {
        match self {
            OutputEntry::Text(text) | OutputEntry::Error(text) => {
                plas_wire::render::strip_ansi(text).into_owned()
            }
            OutputEntry::Image(png) => format!("<image/png, {} bytes>", png.len()),
        }
    }
}

fn display_entries(content: &DisplayContent, with_image: bool) -> Vec<OutputEntry> {
    let mut entries = Vec::new();
    if let Some(text) = content.data.text_plain() {
        entries.push(OutputEntry::Text(text.into_owned()));
    }
    if with_image {
        match content.data.image_png() {
            Some(Ok(png)) => entries.push(OutputEntry::Image(png)),
            Some(Err(e)) => warn!("[render] Dropping undecodable image/png: {}", e),
            None => {}
        }
    }
    entries
}

/// Output entries for one message. Status and bookkeeping messages render nothing.
pub fn render_message(message: &KernelMessage) -> Vec<OutputEntry> {
    match message {
        KernelMessage::Stream(stream) => vec![OutputEntry::Text(stream.text.clone())],
        KernelMessage::ExecuteResult(content) => display_entries(content, false),
        KernelMessage::DisplayData(content) => display_entries(content, true),
        KernelMessage::Error(error) => vec![OutputEntry::Error(error.traceback.join("\n"))],
        KernelMessage::Status(_) | KernelMessage::ExecEnd | KernelMessage::Other { .. } => {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plas_wire::KernelFrame;

    fn message(json: &str) -> KernelMessage {
        KernelFrame::parse(json).unwrap().message
    }

    #[test]
    fn test_stream_renders_escaped_text() {
        let entries = render_message(&message(
            r#"{"msg_type": "stream", "content": {"name": "stdout", "text": "<b>hi</b>\n"}}"#,
        ));
        assert_eq!(entries, vec![OutputEntry::Text("<b>hi</b>\n".to_string())]);
        assert_eq!(
            entries[0].to_html(),
            "<p class=\"exec-res\">&lt;b&gt;hi&lt;/b&gt;\n</p>"
        );
    }

    #[test]
    fn test_execute_result_uses_text_plain() {
        let entries = render_message(&message(
            r#"{"msg_type": "execute_result", "content": {"data": {"text/plain": "3"}, "execution_count": 1}}"#,
        ));
        assert_eq!(entries, vec![OutputEntry::Text("3".to_string())]);
    }

    #[test]
    fn test_display_data_with_image() {
        let entries = render_message(&message(
            r#"{"msg_type": "display_data", "content": {"data": {"text/plain": "<Figure>", "image/png": "iVBORw0K\nGgo="}}}"#,
        ));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], OutputEntry::Text("<Figure>".to_string()));
        assert_eq!(
            entries[1].to_html(),
            "<img class=\"exec-res ms-2\" src=\"data:image/png;base64,iVBORw0KGgo=\"/>"
        );
    }

    #[test]
    fn test_error_joins_traceback_and_breaks_lines() {
        let entries = render_message(&message(
            r#"{"msg_type": "error", "content": {"ename": "NameError", "evalue": "x", "traceback": ["\u001b[0;31mNameError\u001b[0m", "name 'x' is not defined"]}}"#,
        ));
        assert_eq!(
            entries[0].to_html(),
            "<p class=\"text-danger exec-res\">NameError<br>name &#x27;x&#x27; is not defined</p>"
        );
        assert_eq!(
            entries[0].to_text(),
            "NameError\nname 'x' is not defined"
        );
    }

    #[test]
    fn test_status_renders_nothing() {
        assert!(render_message(&message(
            r#"{"msg_type": "status", "content": {"execution_state": "busy"}}"#
        ))
        .is_empty());
        assert!(render_message(&KernelMessage::ExecEnd).is_empty());
    }
}
