//! Server-side page documents.
//!
//! `GET /api/probleminfo/{p_id}` returns the exercise record with the page
//! itself embedded as a JSON string. The page body is the ordered list of
//! original node records the document is built from, and the reference the
//! reset manager restores against.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::node::FormField;

/// Response body of `GET /api/probleminfo/{p_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemInfo {
    pub p_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    /// The page document, serialized as a JSON string.
    pub page: String,
    #[serde(default, rename = "DESCR")]
    pub descr: String,
}

impl ProblemInfo {
    pub fn parse_page(&self) -> Result<Page, serde_json::Error> {
        serde_json::from_str(&self.page)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageHeader {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub env: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub header: PageHeader,
    #[serde(default)]
    pub body: Vec<OriginNode>,
}

/// One original node record. Question-only fields are empty for other types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OriginNode {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub q_id: Option<String>,
    #[serde(default)]
    pub ptype: Option<u8>,
    #[serde(default, rename = "conponent")]
    pub components: Vec<OriginNode>,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub editable: bool,
    #[serde(default)]
    pub answers: Vec<String>,
    #[serde(default)]
    pub explanations: Vec<OriginNode>,
}

impl OriginNode {
    pub fn code(content: impl Into<String>, readonly: bool) -> Self {
        Self {
            node_type: "code".to_string(),
            content: content.into(),
            readonly,
            ..Default::default()
        }
    }

    pub fn explain(content: impl Into<String>) -> Self {
        Self {
            node_type: "explain".to_string(),
            content: content.into(),
            ..Default::default()
        }
    }
}

/// Response body of `GET /api/saves/{p_id}`: saved learner answers by question id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavedAnswers {
    #[serde(default)]
    pub p_id: String,
    #[serde(default)]
    pub saves: HashMap<String, Vec<String>>,
}

/// Who the document is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Learner,
    Author,
}

fn form_tag() -> &'static Regex {
    static FORM_TAG: OnceLock<Regex> = OnceLock::new();
    FORM_TAG.get_or_init(|| {
        Regex::new(r"(?is)<input\b(?P<input>[^>]*)>|<select\b(?P<select>[^>]*)>(?P<options>.*?)</select>")
            .expect("static regex is valid")
    })
}

fn option_tag() -> &'static Regex {
    static OPTION_TAG: OnceLock<Regex> = OnceLock::new();
    OPTION_TAG.get_or_init(|| {
        Regex::new(r"(?is)<option\b(?P<attrs>[^>]*)>(?P<text>.*?)(?:</option>|$)")
            .expect("static regex is valid")
    })
}

fn attribute(attrs: &str, name: &str) -> Option<String> {
    let pattern = format!(r#"(?i)\b{}\s*=\s*(?:"([^"]*)"|'([^']*)')"#, regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(attrs)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

/// Learner-facing form fields of a word-test question, in document order.
pub fn parse_form_fields(markup: &str) -> Vec<FormField> {
    form_tag()
        .captures_iter(markup)
        .map(|caps| {
            if let Some(attrs) = caps.name("input") {
                FormField::Input {
                    value: attribute(attrs.as_str(), "value").unwrap_or_default(),
                }
            } else {
                let options_markup = caps.name("options").map(|m| m.as_str()).unwrap_or("");
                let mut selected = None;
                let options = option_tag()
                    .captures_iter(options_markup)
                    .enumerate()
                    .map(|(idx, opt)| {
                        let attrs = opt.name("attrs").map(|m| m.as_str()).unwrap_or("");
                        if Regex::new(r"(?i)\bselected\b")
                            .map(|re| re.is_match(attrs))
                            .unwrap_or(false)
                        {
                            selected = Some(idx);
                        }
                        attribute(attrs, "value").unwrap_or_else(|| {
                            opt.name("text")
                                .map(|m| m.as_str().trim().to_string())
                                .unwrap_or_default()
                        })
                    })
                    .collect();
                FormField::Select { options, selected }
            }
        })
        .collect()
}

/// Canonical answers authored as `ans="..."` on `<input>`/`<select>` tags.
pub fn authored_answers(markup: &str) -> Vec<String> {
    form_tag()
        .captures_iter(markup)
        .filter_map(|caps| {
            let attrs = caps.name("input").or_else(|| caps.name("select"))?;
            attribute(attrs.as_str(), "ans")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUESTION: &str = r#"<div class="question-form">
  What does `len([1, 2])` return?
  <input type="text" class="form-control" placeholder="answer" ans="2">
</div>
<div class="question-form">
  Pick the mutable type
  <select class="form-select" ans="2">
    <option> Open this select menu</option>
    <option value="1">tuple</option>
    <option value="2">list</option>
  </select>
</div>"#;

    #[test]
    fn test_problem_info_parses_embedded_page() {
        let info: ProblemInfo = serde_json::from_value(serde_json::json!({
            "p_id": "p1",
            "title": "Lists",
            "category": null,
            "page": r#"{"header": {"summary": "s"}, "body": [{"type": "code", "content": "x = 1", "readonly": true}]}"#,
            "DESCR": "Get information on Problem(p_id='p1')."
        }))
        .unwrap();

        let page = info.parse_page().unwrap();
        assert_eq!(page.header.summary, "s");
        assert_eq!(page.body, vec![OriginNode::code("x = 1", true)]);
    }

    #[test]
    fn test_question_record_fields() {
        let record: OriginNode = serde_json::from_value(serde_json::json!({
            "type": "question",
            "q_id": "q1",
            "ptype": 1,
            "conponent": [{"type": "explain", "content": "hint"}, {"type": "code", "content": "def f():", "readonly": false}],
            "question": "Write f",
            "editable": false
        }))
        .unwrap();

        assert_eq!(record.q_id.as_deref(), Some("q1"));
        assert_eq!(record.ptype, Some(1));
        assert_eq!(record.components.len(), 2);
        assert!(!record.editable);
    }

    #[test]
    fn test_parse_form_fields_in_document_order() {
        let fields = parse_form_fields(QUESTION);
        assert_eq!(
            fields,
            vec![
                FormField::Input {
                    value: String::new()
                },
                FormField::Select {
                    options: vec![
                        "Open this select menu".to_string(),
                        "1".to_string(),
                        "2".to_string()
                    ],
                    selected: None
                },
            ]
        );
    }

    #[test]
    fn test_parse_form_fields_keeps_rendered_values() {
        let fields = parse_form_fields(
            r#"<input type="text" value="42"><select><option value="a">A</option><option value="b" selected>B</option></select>"#,
        );
        assert_eq!(fields[0].value(), "42");
        assert_eq!(fields[1].value(), "b");
    }

    #[test]
    fn test_authored_answers() {
        assert_eq!(authored_answers(QUESTION), vec!["2", "2"]);
        assert!(authored_answers("<input type='text'>").is_empty());
    }
}
