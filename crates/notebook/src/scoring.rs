//! Question grading against `POST /scoring`.

use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::ApplicationError;
use crate::http::{Method, Transport};
use crate::node::{Document, ExtractMode, NodeId, Progress, QuestionKind};
use crate::page::SavedAnswers;

#[derive(Debug, Serialize)]
struct ScoringRequest<'a> {
    p_id: &'a str,
    q_id: &'a str,
    ptype: QuestionKind,
    answers: &'a [String],
    job_id: &'a NodeId,
}

#[derive(Debug, Deserialize)]
struct ScoringVerdict {
    result: bool,
    #[serde(default)]
    html: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringOutcome {
    Graded { correct: bool },
    /// Accepted for asynchronous grading; no verdict yet.
    Pending,
}

pub struct ScoringClient {
    transport: Arc<dyn Transport>,
    p_id: String,
}

impl ScoringClient {
    pub fn new(transport: Arc<dyn Transport>, p_id: impl Into<String>) -> Self {
        Self {
            transport,
            p_id: p_id.into(),
        }
    }

    pub fn p_id(&self) -> &str {
        &self.p_id
    }

    /// Submit the question's learner answers and show the verdict.
    pub async fn scoring(
        &self,
        doc: &mut Document,
        node_id: &NodeId,
    ) -> Result<ScoringOutcome, ApplicationError> {
        let params = doc.extract_question_params(node_id, ExtractMode::Learner)?;
        let body = serde_json::to_value(ScoringRequest {
            p_id: &self.p_id,
            q_id: &params.q_id,
            ptype: params.ptype,
            answers: &params.answers,
            job_id: node_id,
        })
        .map_err(|e| ApplicationError::Other(format!("could not encode answers: {e}")))?;

        doc.question_mut(node_id)?.show_progress_bar();
        info!("[scoring] Submitting {} ({} answers)", params.q_id, params.answers.len());

        let response = match self.transport.request(Method::Post, "/scoring", Some(body)).await {
            Ok(response) => response,
            Err(e) => {
                doc.question_mut(node_id)?.hide_progress_bar();
                return Err(e.into());
            }
        };

        let question = doc.question_mut(node_id)?;
        match response.status {
            200 => {
                question.hide_progress_bar();
                let verdict: ScoringVerdict = response.json()?;
                question.progress = if verdict.result {
                    Progress::Complete
                } else {
                    Progress::Tried
                };
                question.show_toast(verdict.html);
                info!("[scoring] {} graded: {}", params.q_id, verdict.result);
                Ok(ScoringOutcome::Graded {
                    correct: verdict.result,
                })
            }
            202 => {
                info!("[scoring] {} accepted, grading pending", params.q_id);
                Ok(ScoringOutcome::Pending)
            }
            _ => {
                question.hide_progress_bar();
                warn!("[scoring] {} rejected: {}", params.q_id, response.status);
                Err(response.fetch_error().into())
            }
        }
    }

    /// Cancel a pending grading job.
    pub async fn canceling(
        &self,
        doc: &mut Document,
        node_id: &NodeId,
    ) -> Result<(), ApplicationError> {
        let response = self
            .transport
            .request(Method::Delete, &format!("/scoring?job_id={node_id}"), None)
            .await?;
        if !response.is_success() {
            return Err(response.fetch_error().into());
        }
        doc.question_mut(node_id)?.hide_progress_bar();
        info!("[scoring] Cancelled job {}", node_id);
        Ok(())
    }

    /// Fill word-test fields from the learner's saved answers. Returns the
    /// number of questions restored.
    pub async fn restore_saved_answers(&self, doc: &mut Document) -> Result<usize, ApplicationError> {
        let response = self
            .transport
            .request(Method::Get, &format!("/api/saves/{}", self.p_id), None)
            .await?;
        if !response.is_success() {
            return Err(response.fetch_error().into());
        }
        let saved: SavedAnswers = response.json()?;

        let questions: Vec<NodeId> = doc.root().to_vec();
        let mut restored = 0;
        for id in &questions {
            let Ok(question) = doc.question_mut(id) else {
                continue;
            };
            if question.kind != QuestionKind::WordTest {
                continue;
            }
            let Some(answers) = saved.saves.get(&question.q_id) else {
                continue;
            };
            for (idx, field) in question.fields.iter_mut().enumerate() {
                field.restore(answers.get(idx).map(String::as_str));
            }
            restored += 1;
        }
        info!("[scoring] Restored saved answers for {} question(s)", restored);
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Slot;
    use crate::page::{OriginNode, Page, ViewMode};
    use crate::testing::MockTransport;
    use serde_json::json;

    fn setup(records: Vec<OriginNode>) -> (ScoringClient, MockTransport, Document, NodeId) {
        let transport = MockTransport::new();
        let client = ScoringClient::new(Arc::new(transport.clone()), "p1");
        let doc = Document::from_page(
            &Page {
                body: records,
                ..Default::default()
            },
            ViewMode::Learner,
        )
        .unwrap();
        let id = doc.root()[0].clone();
        (client, transport, doc, id)
    }

    fn word_test(q_id: &str) -> OriginNode {
        OriginNode {
            node_type: "question".to_string(),
            q_id: Some(q_id.to_string()),
            ptype: Some(0),
            question: "<input type='text'><select><option value='x'>X</option><option value='y'>Y</option></select>".to_string(),
            ..Default::default()
        }
    }

    fn code_test() -> OriginNode {
        OriginNode {
            node_type: "question".to_string(),
            q_id: Some("q9".to_string()),
            ptype: Some(1),
            components: vec![OriginNode::code("def f(): pass", false)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_scoring_posts_answers_and_shows_verdict() {
        let (client, transport, mut doc, id) = setup(vec![word_test("q1")]);
        doc.question_mut(&id).unwrap().fields[0].set_value("42");
        transport.respond(
            Method::Post,
            "/scoring",
            200,
            json!({"result": true, "html": "<p>Correct!</p>"}),
        );

        let outcome = client.scoring(&mut doc, &id).await.unwrap();

        assert_eq!(outcome, ScoringOutcome::Graded { correct: true });
        let request = &transport.requests()[0];
        assert_eq!(
            request.body,
            Some(json!({"p_id": "p1", "q_id": "q1", "ptype": 0, "answers": ["42", ""], "job_id": id.as_str()}))
        );
        let question = doc.question(&id).unwrap();
        assert_eq!(question.progress, Progress::Complete);
        assert_eq!(question.toast(), Some("<p>Correct!</p>"));
        assert!(!question.progress_bar_visible());
    }

    #[tokio::test]
    async fn test_wrong_answer_marks_tried() {
        let (client, transport, mut doc, id) = setup(vec![code_test()]);
        transport.respond(Method::Post, "/scoring", 200, json!({"result": false, "html": "nope"}));

        let outcome = client.scoring(&mut doc, &id).await.unwrap();

        assert_eq!(outcome, ScoringOutcome::Graded { correct: false });
        assert_eq!(doc.question(&id).unwrap().progress, Progress::Tried);
        assert_eq!(
            transport.requests()[0].body.as_ref().unwrap()["answers"],
            json!(["def f(): pass"])
        );
    }

    #[tokio::test]
    async fn test_pending_keeps_progress_bar() {
        let (client, transport, mut doc, id) = setup(vec![code_test()]);
        transport.respond(Method::Post, "/scoring", 202, json!({"DESCR": "queued"}));

        let outcome = client.scoring(&mut doc, &id).await.unwrap();

        assert_eq!(outcome, ScoringOutcome::Pending);
        let question = doc.question(&id).unwrap();
        assert!(question.progress_bar_visible());
        assert_eq!(question.progress, Progress::Untried);
    }

    #[tokio::test]
    async fn test_server_error_is_fetch_error() {
        let (client, transport, mut doc, id) = setup(vec![code_test()]);
        transport.respond(Method::Post, "/scoring", 500, json!({}));

        let err = client.scoring(&mut doc, &id).await.unwrap_err();

        assert_eq!(err.to_string(), "500 - Internal Server Error");
        assert!(!doc.question(&id).unwrap().progress_bar_visible());
    }

    #[tokio::test]
    async fn test_scoring_non_question_is_structure_error() {
        let (client, transport, mut doc, id) = setup(vec![OriginNode::code("x", false)]);
        let err = client.scoring(&mut doc, &id).await.unwrap_err();
        assert!(matches!(err, ApplicationError::Node(_)));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_canceling() {
        let (client, transport, mut doc, id) = setup(vec![code_test()]);
        doc.question_mut(&id).unwrap().show_progress_bar();

        client.canceling(&mut doc, &id).await.unwrap();

        assert_eq!(transport.count(Method::Delete, &format!("/scoring?job_id={id}")), 1);
        assert!(!doc.question(&id).unwrap().progress_bar_visible());

        transport.respond(Method::Delete, &format!("/scoring?job_id={id}"), 404, json!({}));
        let err = client.canceling(&mut doc, &id).await.unwrap_err();
        assert!(matches!(err, ApplicationError::Fetch(ref e) if e.status == 404));
    }

    #[tokio::test]
    async fn test_restore_saved_answers() {
        let (client, transport, mut doc, first) = setup(vec![word_test("q1"), code_test(), word_test("q3")]);
        transport.respond(
            Method::Get,
            "/api/saves/p1",
            200,
            json!({"p_id": "p1", "saves": {"q1": ["hello", "y"], "q3": ["only-input"]}}),
        );

        assert_eq!(client.restore_saved_answers(&mut doc).await.unwrap(), 2);

        let q1 = doc.question(&first).unwrap();
        assert_eq!(q1.fields[0].value(), "hello");
        assert_eq!(q1.fields[1].value(), "y");
        let third = doc.root()[2].clone();
        let q3 = doc.question(&third).unwrap();
        assert_eq!(q3.fields[0].value(), "only-input");
        assert_eq!(q3.fields[1].value(), "x");
        assert!(doc.question(&doc.root()[1]).unwrap().has_slot(Slot::AnswerField));
    }
}
