//! Persisting a page back to the server.
//!
//! Learners save their answers to `POST /problems/{p_id}/save`; authors
//! register the whole page with `POST /create/{p_id}/register`.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::ApplicationError;
use crate::http::{Method, Transport};
use crate::node::{ComponentParams, Document, ExtractMode, Node, NodeId};
use crate::page::{OriginNode, Page, PageHeader};

#[derive(Debug, Serialize)]
struct SaveRequest {
    q_content: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    title: &'a str,
    page: Page,
    answers: BTreeMap<String, Vec<String>>,
    explanations: BTreeMap<String, Vec<OriginNode>>,
}

#[derive(Debug, Deserialize)]
struct RegisterReply {
    p_id: String,
}

pub struct SaveClient {
    transport: Arc<dyn Transport>,
    p_id: String,
}

impl SaveClient {
    pub fn new(transport: Arc<dyn Transport>, p_id: impl Into<String>) -> Self {
        Self {
            transport,
            p_id: p_id.into(),
        }
    }

    /// Save the learner's answers to every top-level question. Returns the
    /// number of questions saved.
    pub async fn save_answers(&self, doc: &Document) -> Result<usize, ApplicationError> {
        let mut q_content = BTreeMap::new();
        for id in questions(doc) {
            let params = doc.extract_question_params(&id, ExtractMode::Learner)?;
            q_content.insert(params.q_id, params.answers);
        }
        let saved = q_content.len();
        let body = serde_json::to_value(SaveRequest { q_content })
            .map_err(|e| ApplicationError::Other(format!("could not encode answers: {e}")))?;

        let path = format!("/problems/{}/save", self.p_id);
        let response = self.transport.request(Method::Post, &path, Some(body)).await?;
        if !response.is_success() {
            warn!("[save] Saving {} failed: {}", self.p_id, response.status);
            return Err(response.fetch_error().into());
        }
        info!("[save] {}", response.descr());
        Ok(saved)
    }

    /// Register the authored page under `title`. Question ids are renumbered
    /// from 1 in page order. Returns the problem id the server assigned.
    pub async fn register(
        &self,
        doc: &Document,
        title: &str,
        header: PageHeader,
    ) -> Result<String, ApplicationError> {
        if title.trim().is_empty() {
            return Err(ApplicationError::Other("Problem title is empty".to_string()));
        }

        let mut body = Vec::with_capacity(doc.root().len());
        let mut answers = BTreeMap::new();
        let mut explanations = BTreeMap::new();
        let mut next_q_id = 1;
        for id in doc.root() {
            let record = match doc.get(id)? {
                Node::Code(code) => OriginNode::code(code.value(), code.read_only()),
                Node::Explain(explain) => OriginNode::explain(explain.value()),
                Node::Question(_) => {
                    let params = doc.extract_question_params(id, ExtractMode::Author)?;
                    let q_id = next_q_id.to_string();
                    next_q_id += 1;
                    let authored: Vec<OriginNode> = params
                        .explanations
                        .unwrap_or_default()
                        .into_iter()
                        .map(origin_of)
                        .collect();
                    answers.insert(q_id.clone(), params.answers.clone());
                    explanations.insert(q_id.clone(), authored.clone());
                    OriginNode {
                        node_type: "question".to_string(),
                        q_id: Some(q_id),
                        ptype: Some(params.ptype.into()),
                        question: params.question.unwrap_or_default(),
                        editable: params.editable.unwrap_or(false),
                        components: params
                            .components
                            .unwrap_or_default()
                            .into_iter()
                            .map(origin_of)
                            .collect(),
                        answers: params.answers,
                        explanations: authored,
                        ..Default::default()
                    }
                }
            };
            body.push(record);
        }

        let request = RegisterRequest {
            title,
            page: Page { header, body },
            answers,
            explanations,
        };
        let body = serde_json::to_value(request)
            .map_err(|e| ApplicationError::Other(format!("could not encode page: {e}")))?;

        let path = format!("/create/{}/register", self.p_id);
        let response = self.transport.request(Method::Post, &path, Some(body)).await?;
        if !response.is_success() {
            warn!("[register] Registering {} failed: {}", self.p_id, response.status);
            return Err(response.fetch_error().into());
        }
        let reply: RegisterReply = response.json()?;
        info!("[register] {}", response.descr());
        Ok(reply.p_id)
    }
}

fn questions(doc: &Document) -> Vec<NodeId> {
    doc.root()
        .iter()
        .filter(|id| doc.question(id).is_ok())
        .cloned()
        .collect()
}

fn origin_of(component: ComponentParams) -> OriginNode {
    OriginNode {
        node_type: component.node_type.label().to_ascii_lowercase(),
        content: component.content,
        readonly: component.readonly.unwrap_or(false),
        ..Default::default()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::ViewMode;
    use crate::testing::MockTransport;
    use serde_json::json;

    fn word_test(q_id: &str) -> OriginNode {
        OriginNode {
            node_type: "question".to_string(),
            q_id: Some(q_id.to_string()),
            ptype: Some(0),
            question: r#"<input type="text" ans="4"> <input type="text" ans="5">"#.to_string(),
            ..Default::default()
        }
    }

    fn code_test(q_id: &str) -> OriginNode {
        OriginNode {
            node_type: "question".to_string(),
            q_id: Some(q_id.to_string()),
            ptype: Some(1),
            question: "Write `add`".to_string(),
            components: vec![OriginNode::code("def add(a, b):\n    pass", false)],
            answers: vec!["assert add(1, 2) == 3".to_string()],
            explanations: vec![OriginNode::explain("use +")],
            ..Default::default()
        }
    }

    fn setup(records: Vec<OriginNode>, view: ViewMode) -> (SaveClient, MockTransport, Document) {
        let transport = MockTransport::new();
        let client = SaveClient::new(Arc::new(transport.clone()), "p1");
        let page = Page {
            body: records,
            ..Default::default()
        };
        let doc = Document::from_page(&page, view).unwrap();
        (client, transport, doc)
    }

    #[tokio::test]
    async fn test_save_answers_posts_every_question() {
        let (client, transport, mut doc) = setup(
            vec![OriginNode::code("x = 1", false), word_test("q1"), code_test("q2")],
            ViewMode::Learner,
        );
        let word = doc.root()[1].clone();
        doc.question_mut(&word).unwrap().fields[0].set_value("4");
        transport.respond(
            Method::Post,
            "/problems/p1/save",
            200,
            json!({"DESCR": "data is successfully saved."}),
        );

        assert_eq!(client.save_answers(&doc).await.unwrap(), 2);

        let request = &transport.requests()[0];
        assert_eq!(request.path, "/problems/p1/save");
        assert_eq!(
            request.body,
            Some(json!({"q_content": {
                "q1": ["4", ""],
                "q2": ["def add(a, b):\n    pass"]
            }}))
        );
    }

    #[tokio::test]
    async fn test_save_failure_is_fetch_error() {
        let (client, transport, doc) = setup(vec![word_test("q1")], ViewMode::Learner);
        transport.respond(Method::Post, "/problems/p1/save", 400, json!({}));

        let err = client.save_answers(&doc).await.unwrap_err();

        assert!(matches!(err, ApplicationError::Fetch(ref e) if e.status == 400));
    }

    #[tokio::test]
    async fn test_register_sends_authored_page() {
        let (client, transport, doc) = setup(
            vec![
                OriginNode::explain("# Intro"),
                OriginNode::code("import math", true),
                word_test("q7"),
                code_test("q3"),
            ],
            ViewMode::Author,
        );
        transport.respond(
            Method::Post,
            "/create/p1/register",
            200,
            json!({"p_id": "p1", "DESCR": "Problem(id='p1') is successfully saved."}),
        );
        let header = PageHeader {
            summary: "Sums".to_string(),
            ..Default::default()
        };

        let p_id = client.register(&doc, "Adding", header).await.unwrap();

        assert_eq!(p_id, "p1");
        let body = transport.requests()[0].body.clone().unwrap();
        assert_eq!(body["title"], "Adding");
        assert_eq!(body["page"]["header"]["summary"], "Sums");
        let records = body["page"]["body"].as_array().unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0]["type"], "explain");
        assert_eq!(records[1]["readonly"], true);
        assert_eq!(records[2]["q_id"], "1");
        assert_eq!(records[3]["q_id"], "2");
        assert_eq!(records[3]["ptype"], 1);
        assert_eq!(records[3]["conponent"][0]["content"], "def add(a, b):\n    pass");
        assert_eq!(body["answers"], json!({"1": ["4", "5"], "2": ["assert add(1, 2) == 3"]}));
        assert_eq!(body["explanations"]["2"][0]["content"], "use +");
    }

    #[tokio::test]
    async fn test_register_requires_title() {
        let (client, transport, doc) = setup(vec![word_test("q1")], ViewMode::Author);

        let err = client
            .register(&doc, "  ", PageHeader::default())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Problem title is empty");
        assert!(transport.requests().is_empty());
    }
}
