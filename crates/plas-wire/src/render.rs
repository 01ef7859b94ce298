//! Escaping for kernel output shown in a node's output area.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

fn ansi_sgr() -> &'static Regex {
    static ANSI_SGR: OnceLock<Regex> = OnceLock::new();
    ANSI_SGR.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").expect("static regex is valid"))
}

/// Remove ANSI SGR color sequences (`ESC[...m`), as emitted in IPython tracebacks.
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    ansi_sgr().replace_all(text, "")
}

/// HTML-escape `& ' ` " < >`, optionally stripping ANSI sequences first.
pub fn escape_html(text: &str, ansi: bool) -> String {
    let text = if ansi {
        strip_ansi(text)
    } else {
        Cow::Borrowed(text)
    };
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '\'' => escaped.push_str("&#x27;"),
            '`' => escaped.push_str("&#x60;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            c => escaped.push(c),
        }
    }
    escaped
}
