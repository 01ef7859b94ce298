//! Restoring nodes to their original page content.
//!
//! The page is fetched once from `GET /api/probleminfo/{p_id}` and memoized;
//! a node is matched to its original record by its index in the root
//! container.

use std::sync::Arc;

use log::{debug, info};
use tokio::sync::OnceCell;

use crate::error::{ApplicationError, NodeStructureError};
use crate::http::{Method, Transport};
use crate::node::{Container, Document, NodeId, NodeType, QuestionKind, Slot};
use crate::page::{OriginNode, Page, ProblemInfo};

struct Origin {
    title: String,
    page: Page,
}

pub struct ResetManager {
    transport: Arc<dyn Transport>,
    p_id: String,
    origin: OnceCell<Origin>,
}

impl ResetManager {
    pub fn new(transport: Arc<dyn Transport>, p_id: impl Into<String>) -> Self {
        Self {
            transport,
            p_id: p_id.into(),
            origin: OnceCell::new(),
        }
    }

    /// The original page, fetched on first use. A failed fetch is retried
    /// on the next call.
    pub async fn origin_page(&self) -> Result<&Page, ApplicationError> {
        Ok(&self.origin().await?.page)
    }

    /// The title the page was registered under.
    pub async fn origin_title(&self) -> Result<&str, ApplicationError> {
        Ok(&self.origin().await?.title)
    }

    async fn origin(&self) -> Result<&Origin, ApplicationError> {
        self.origin.get_or_try_init(|| self.fetch_origin()).await
    }

    async fn fetch_origin(&self) -> Result<Origin, ApplicationError> {
        let path = format!("/api/probleminfo/{}", self.p_id);
        let response = self.transport.request(Method::Get, &path, None).await?;
        if !response.is_success() {
            return Err(response.fetch_error().into());
        }
        let info: ProblemInfo = response.json()?;
        let page = info
            .parse_page()
            .map_err(|e| ApplicationError::Other(format!("Malformed page for {}: {e}", self.p_id)))?;
        debug!("[reset] Loaded {} original nodes for {}", page.body.len(), self.p_id);
        Ok(Origin {
            title: info.title,
            page,
        })
    }

    /// Restore one root node. Returns the nodes removed from the document,
    /// which is non-empty only when an editable answer field is cleared.
    pub async fn reset_input(
        &self,
        doc: &mut Document,
        node_id: &NodeId,
    ) -> Result<Vec<NodeId>, ApplicationError> {
        let node_type = doc.node_type(node_id)?;
        let index = doc.root_index(node_id).ok_or_else(|| {
            NodeStructureError::with_message(node_type.label(), "only top-level nodes can be reset")
        })?;
        let origin = self
            .origin_page()
            .await?
            .body
            .get(index)
            .ok_or_else(|| ApplicationError::Other(format!("No original node at index {index}")))?;

        if NodeType::classify(&origin.node_type) != Some(node_type) {
            return Err(NodeStructureError::with_message(
                node_type.label(),
                format!("original node at index {index} is '{}'", origin.node_type),
            )
            .into());
        }

        let removed = match node_type {
            NodeType::Code => {
                doc.code_mut(node_id)?.set_value(origin.content.as_str());
                Vec::new()
            }
            NodeType::Question => reset_question(doc, node_id, origin)?,
            NodeType::Explain => {
                return Err(NodeStructureError::with_message(
                    "Explain",
                    "explain nodes have no input to reset",
                )
                .into());
            }
        };
        info!("[reset] Reset {} node at index {}", node_type, index);
        Ok(removed)
    }
}

fn reset_question(
    doc: &mut Document,
    node_id: &NodeId,
    origin: &OriginNode,
) -> Result<Vec<NodeId>, NodeStructureError> {
    let question = doc.question_mut(node_id)?;
    match (question.kind, question.editable) {
        (QuestionKind::WordTest, _) => {
            question.fields.iter_mut().for_each(|field| field.clear());
            Ok(Vec::new())
        }
        (QuestionKind::CodeTest, true) => {
            Ok(doc.clear_slot(node_id, Slot::AnswerField)?.removed)
        }
        (QuestionKind::CodeTest, false) => {
            let answer_field = Container::Slot {
                question: node_id.clone(),
                slot: Slot::AnswerField,
            };
            let children = doc.code_children(&answer_field)?;
            let originals: Vec<&str> = origin
                .components
                .iter()
                .filter(|c| NodeType::classify(&c.node_type) == Some(NodeType::Code))
                .map(|c| c.content.as_str())
                .collect();
            if children.len() > originals.len() {
                return Err(NodeStructureError::with_message(
                    "Question",
                    format!(
                        "answer field has {} code nodes but the original has {}",
                        children.len(),
                        originals.len()
                    ),
                ));
            }
            for (child, content) in children.iter().zip(originals) {
                doc.code_mut(child)?.set_value(content);
            }
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{CodeNode, Node};
    use crate::page::ViewMode;
    use crate::testing::MockTransport;
    use serde_json::json;

    fn page() -> Page {
        Page {
            body: vec![
                OriginNode::code("print('hello')\n", false),
                OriginNode::explain("# Intro"),
                OriginNode {
                    node_type: "question".to_string(),
                    q_id: Some("q1".to_string()),
                    ptype: Some(0),
                    question: "<input type='text'><select><option>a</option></select>".to_string(),
                    ..Default::default()
                },
                OriginNode {
                    node_type: "question".to_string(),
                    q_id: Some("q2".to_string()),
                    ptype: Some(1),
                    editable: true,
                    ..Default::default()
                },
                OriginNode {
                    node_type: "question".to_string(),
                    q_id: Some("q3".to_string()),
                    ptype: Some(1),
                    components: vec![
                        OriginNode::code("def f():\n    pass", false),
                        OriginNode::explain("note"),
                        OriginNode::code("f()", true),
                    ],
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    fn setup() -> (ResetManager, MockTransport, Document) {
        let transport = MockTransport::new();
        let page = page();
        transport.respond(
            Method::Get,
            "/api/probleminfo/p1",
            200,
            json!({
                "p_id": "p1",
                "title": "Lists",
                "page": serde_json::to_string(&page).unwrap(),
            }),
        );
        let manager = ResetManager::new(Arc::new(transport.clone()), "p1");
        let doc = Document::from_page(&page, ViewMode::Learner).unwrap();
        (manager, transport, doc)
    }

    #[tokio::test]
    async fn test_reset_code_restores_exact_content() {
        let (manager, transport, mut doc) = setup();
        let id = doc.root()[0].clone();
        doc.code_mut(&id).unwrap().set_value("garbage");

        assert!(manager.reset_input(&mut doc, &id).await.unwrap().is_empty());
        assert_eq!(doc.code(&id).unwrap().value(), "print('hello')\n");

        manager.reset_input(&mut doc, &id).await.unwrap();
        assert_eq!(manager.origin_title().await.unwrap(), "Lists");
        assert_eq!(transport.count(Method::Get, "/api/probleminfo/p1"), 1);
    }

    #[tokio::test]
    async fn test_reset_word_test_clears_fields() {
        let (manager, _transport, mut doc) = setup();
        let id = doc.root()[2].clone();
        {
            let question = doc.question_mut(&id).unwrap();
            question.fields[0].set_value("answer");
            question.fields[1].set_value("a");
        }

        manager.reset_input(&mut doc, &id).await.unwrap();

        let question = doc.question(&id).unwrap();
        assert_eq!(question.fields[0].value(), "");
        assert_eq!(question.fields[1].value(), "");
    }

    #[tokio::test]
    async fn test_reset_editable_code_test_empties_answer_field() {
        let (manager, _transport, mut doc) = setup();
        let id = doc.root()[3].clone();
        let answer_field = Container::Slot {
            question: id.clone(),
            slot: Slot::AnswerField,
        };
        let added = doc
            .append(&answer_field, Node::Code(CodeNode::new("x = 1", false)))
            .unwrap();

        let removed = manager.reset_input(&mut doc, &id).await.unwrap();

        assert_eq!(removed, vec![added.clone()]);
        assert!(!doc.contains(&added));
        assert!(doc.children(&answer_field).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_fixed_code_test_restores_components_in_order() {
        let (manager, _transport, mut doc) = setup();
        let id = doc.root()[4].clone();
        let answer_field = Container::Slot {
            question: id.clone(),
            slot: Slot::AnswerField,
        };
        let codes = doc.code_children(&answer_field).unwrap();
        for code in &codes {
            doc.code_mut(code).unwrap().set_value("edited");
        }

        manager.reset_input(&mut doc, &id).await.unwrap();

        assert_eq!(doc.code(&codes[0]).unwrap().value(), "def f():\n    pass");
        assert_eq!(doc.code(&codes[1]).unwrap().value(), "f()");
    }

    #[tokio::test]
    async fn test_reset_fixed_code_test_with_extra_code_is_structure_error() {
        let (manager, _transport, mut doc) = setup();
        let id = doc.root()[4].clone();
        let answer_field = Container::Slot {
            question: id.clone(),
            slot: Slot::AnswerField,
        };
        doc.append(&answer_field, Node::Code(CodeNode::new("", false)))
            .unwrap();

        let err = manager.reset_input(&mut doc, &id).await.unwrap_err();
        assert!(matches!(err, ApplicationError::Node(_)));
    }

    #[tokio::test]
    async fn test_reset_type_mismatch_and_missing_index() {
        let (manager, _transport, mut doc) = setup();
        let first = doc.root()[0].clone();
        let inserted = doc
            .insert_before(&first, Node::Code(CodeNode::new("", false)))
            .unwrap();
        let shifted = doc.root()[1].clone();
        let err = manager.reset_input(&mut doc, &shifted).await.unwrap_err();
        assert!(matches!(err, ApplicationError::Node(_)));
        assert_eq!(doc.code(&shifted).unwrap().value(), "print('hello')\n");

        let last = doc.root().last().cloned().unwrap();
        doc.insert_after(&last, Node::Code(CodeNode::new("", false)))
            .unwrap();
        let beyond = doc.root()[6].clone();
        let err = manager.reset_input(&mut doc, &beyond).await.unwrap_err();
        assert_eq!(err.to_string(), "No original node at index 6");

        assert!(manager.reset_input(&mut doc, &inserted).await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_not_memoized() {
        let transport = MockTransport::new();
        transport.respond(Method::Get, "/api/probleminfo/p1", 503, json!({}));
        transport.respond(
            Method::Get,
            "/api/probleminfo/p1",
            200,
            json!({"p_id": "p1", "page": serde_json::to_string(&page()).unwrap()}),
        );
        let manager = ResetManager::new(Arc::new(transport.clone()), "p1");

        let err = manager.origin_page().await.unwrap_err();
        assert!(matches!(err, ApplicationError::Fetch(ref e) if e.status == 503));
        assert_eq!(manager.origin_page().await.unwrap().body.len(), 5);
    }
}
