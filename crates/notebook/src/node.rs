//! Node model and document arena.
//!
//! A page is a tree of nodes: the root container holds Code, Explain and
//! Question nodes, and each Question owns named slots holding its own
//! children. Nodes live in an arena keyed by [`NodeId`]; containers hold ids
//! in document order.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::editor::{Editor, EditorConfig, EditorSlot};
use crate::error::{NodeError, NodeStructureError};
use crate::execution_queue::ExecutionQueueState;
use crate::page::{authored_answers, parse_form_fields, OriginNode, Page, ViewMode};
use crate::render::OutputEntry;

/// Process-unique node identity, assigned when a node enters the document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Code,
    Explain,
    Question,
}

impl NodeType {
    /// Classify a raw record's `type` string.
    pub fn classify(tag: &str) -> Option<Self> {
        match tag {
            "code" => Some(NodeType::Code),
            "explain" => Some(NodeType::Explain),
            "question" => Some(NodeType::Question),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeType::Code => "Code",
            NodeType::Explain => "Explain",
            NodeType::Question => "Question",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Execution indicator shown on a Code node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Suspending,
}

#[derive(Debug, Clone)]
pub struct CodeNode {
    editor: EditorSlot,
    run_state: RunState,
    outputs: Vec<OutputEntry>,
}

impl CodeNode {
    pub fn new(content: impl Into<String>, read_only: bool) -> Self {
        Self {
            editor: EditorSlot::new(EditorConfig::python(read_only), content),
            run_state: RunState::Idle,
            outputs: Vec::new(),
        }
    }

    pub fn value(&self) -> &str {
        self.editor.value()
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.editor.set_value(value);
    }

    pub fn editor(&mut self) -> &mut Editor {
        self.editor.editor()
    }

    pub fn read_only(&self) -> bool {
        self.editor.read_only()
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn set_run_state(&mut self, state: RunState) {
        self.run_state = state;
    }

    pub fn outputs(&self) -> &[OutputEntry] {
        &self.outputs
    }

    pub fn push_outputs(&mut self, entries: impl IntoIterator<Item = OutputEntry>) {
        self.outputs.extend(entries);
    }

    pub fn clear_outputs(&mut self) {
        self.outputs.clear();
    }

    /// Clear the output area and the run indicator.
    pub fn reset_state(&mut self) {
        self.outputs.clear();
        self.run_state = RunState::Idle;
    }
}

#[derive(Debug, Clone)]
pub struct ExplainNode {
    editor: EditorSlot,
    preview: bool,
}

impl ExplainNode {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            editor: EditorSlot::new(EditorConfig::markdown(), content),
            preview: false,
        }
    }

    fn rendered(content: impl Into<String>) -> Self {
        Self {
            preview: true,
            ..Self::new(content)
        }
    }

    pub fn value(&self) -> &str {
        self.editor.value()
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.editor.set_value(value);
    }

    pub fn editor(&mut self) -> &mut Editor {
        self.editor.editor()
    }

    pub fn is_preview(&self) -> bool {
        self.preview
    }

    /// Switch to the rendered view. Markdown rendering happens in the view layer.
    pub fn show_preview(&mut self) {
        if self.editor.is_attached() {
            self.editor.editor().blur();
        }
        self.preview = true;
    }

    pub fn show_editor(&mut self) {
        self.preview = false;
        self.editor.editor().focus();
    }
}

/// Question kind, carried on the wire as `ptype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QuestionKind {
    WordTest,
    CodeTest,
}

impl TryFrom<u8> for QuestionKind {
    type Error = NodeStructureError;

    fn try_from(ptype: u8) -> Result<Self, Self::Error> {
        match ptype {
            0 => Ok(QuestionKind::WordTest),
            1 => Ok(QuestionKind::CodeTest),
            other => Err(NodeStructureError::with_message(
                "Question",
                format!("unknown ptype {other}"),
            )),
        }
    }
}

impl From<QuestionKind> for u8 {
    fn from(kind: QuestionKind) -> Self {
        match kind {
            QuestionKind::WordTest => 0,
            QuestionKind::CodeTest => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Progress {
    #[default]
    Untried,
    Tried,
    Complete,
}

/// Named child containers of a Question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    QuestionField,
    AnswerField,
    TestCode,
    Explanations,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Slot::QuestionField => "question field",
            Slot::AnswerField => "answer field",
            Slot::TestCode => "test code",
            Slot::Explanations => "explanations",
        })
    }
}

/// A learner-facing form control of a word-test question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormField {
    Input {
        value: String,
    },
    Select {
        options: Vec<String>,
        selected: Option<usize>,
    },
}

impl FormField {
    pub fn value(&self) -> &str {
        match self {
            FormField::Input { value } => value,
            FormField::Select { options, selected } => selected
                .and_then(|idx| options.get(idx))
                .map(String::as_str)
                .unwrap_or(""),
        }
    }

    pub fn set_value(&mut self, answer: &str) {
        match self {
            FormField::Input { value } => *value = answer.to_string(),
            FormField::Select { options, selected } => {
                *selected = options.iter().position(|opt| opt == answer);
            }
        }
    }

    /// Empty the input or unselect the select.
    pub fn clear(&mut self) {
        match self {
            FormField::Input { value } => value.clear(),
            FormField::Select { selected, .. } => *selected = None,
        }
    }

    /// Restore a saved answer. Selects fall back to their first option.
    pub fn restore(&mut self, answer: Option<&str>) {
        match self {
            FormField::Input { value } => *value = answer.unwrap_or_default().to_string(),
            FormField::Select { options, selected } => {
                let matched = answer.and_then(|a| options.iter().position(|opt| opt == a));
                *selected = matched.or(if options.is_empty() { None } else { Some(0) });
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuestionNode {
    pub q_id: String,
    pub kind: QuestionKind,
    pub editable: bool,
    pub fields: Vec<FormField>,
    pub progress: Progress,
    progress_bar: bool,
    toast: Option<String>,
    slots: BTreeMap<Slot, Vec<NodeId>>,
}

impl QuestionNode {
    pub fn new(
        q_id: impl Into<String>,
        kind: QuestionKind,
        editable: bool,
        slots: impl IntoIterator<Item = Slot>,
    ) -> Self {
        Self {
            q_id: q_id.into(),
            kind,
            editable,
            fields: Vec::new(),
            progress: Progress::Untried,
            progress_bar: false,
            toast: None,
            slots: slots.into_iter().map(|slot| (slot, Vec::new())).collect(),
        }
    }

    pub fn has_slot(&self, slot: Slot) -> bool {
        self.slots.contains_key(&slot)
    }

    pub fn slot(&self, slot: Slot) -> Option<&[NodeId]> {
        self.slots.get(&slot).map(Vec::as_slice)
    }

    fn children(&self) -> impl Iterator<Item = &NodeId> {
        self.slots.values().flatten()
    }

    pub fn show_progress_bar(&mut self) {
        self.progress_bar = true;
    }

    pub fn hide_progress_bar(&mut self) {
        self.progress_bar = false;
    }

    pub fn progress_bar_visible(&self) -> bool {
        self.progress_bar
    }

    pub fn show_toast(&mut self, html: impl Into<String>) {
        self.toast = Some(html.into());
    }

    pub fn hide_toast(&mut self) -> bool {
        self.toast.take().is_some()
    }

    pub fn toast(&self) -> Option<&str> {
        self.toast.as_deref()
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Code(CodeNode),
    Explain(ExplainNode),
    Question(QuestionNode),
}

impl Node {
    pub fn node_type(&self) -> NodeType {
        match self {
            Node::Code(_) => NodeType::Code,
            Node::Explain(_) => NodeType::Explain,
            Node::Question(_) => NodeType::Question,
        }
    }

    fn editor_slot_mut(&mut self) -> Option<&mut EditorSlot> {
        match self {
            Node::Code(code) => Some(&mut code.editor),
            Node::Explain(explain) => Some(&mut explain.editor),
            Node::Question(_) => None,
        }
    }

    /// The node's editor, attached on first use. Questions have none.
    pub fn editor(&mut self) -> Option<&mut Editor> {
        self.editor_slot_mut().map(EditorSlot::editor)
    }

    /// Whether an attached editor currently has focus.
    pub fn is_editing(&mut self) -> bool {
        self.editor_slot_mut()
            .is_some_and(|slot| slot.is_attached() && slot.editor().is_focused())
    }

    /// Editor contents of a Code or Explain node.
    pub fn value(&self) -> Option<&str> {
        match self {
            Node::Code(code) => Some(code.value()),
            Node::Explain(explain) => Some(explain.value()),
            Node::Question(_) => None,
        }
    }
}

/// Where a node lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Container {
    Root,
    Slot { question: NodeId, slot: Slot },
}

#[derive(Debug, Clone)]
struct Entry {
    node: Node,
    container: Container,
    allow_delete: bool,
}

/// Ids removed by a deletion, children before their parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub removed: Vec<NodeId>,
    pub detached_editors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    Learner,
    Author,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentParams {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,
}

/// Answers and, in author mode, the authored question definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionParams {
    pub node_id: NodeId,
    pub q_id: String,
    pub ptype: QuestionKind,
    pub answers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editable: Option<bool>,
    #[serde(rename = "conponent", skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<ComponentParams>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanations: Option<Vec<ComponentParams>>,
}

#[derive(Debug, Clone, Default)]
pub struct Document {
    nodes: HashMap<NodeId, Entry>,
    root: Vec<NodeId>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the document from a page body. Page nodes are deletable in the
    /// author view only.
    pub fn from_page(page: &Page, view: ViewMode) -> Result<Self, NodeStructureError> {
        let mut doc = Self::new();
        let allow_delete = view == ViewMode::Author;
        for record in &page.body {
            doc.build(&Container::Root, record, view, allow_delete)?;
        }
        debug!("[document] Built {} root nodes ({:?} view)", doc.root.len(), view);
        Ok(doc)
    }

    fn build(
        &mut self,
        container: &Container,
        record: &OriginNode,
        view: ViewMode,
        allow_delete: bool,
    ) -> Result<NodeId, NodeStructureError> {
        let node_type = NodeType::classify(&record.node_type).ok_or_else(|| {
            NodeStructureError::with_message(
                "Node",
                format!("unknown node type '{}'", record.node_type),
            )
        })?;

        match node_type {
            NodeType::Code => self.push(
                container,
                Node::Code(CodeNode::new(&record.content, record.readonly)),
                allow_delete,
            ),
            NodeType::Explain => self.push(
                container,
                Node::Explain(ExplainNode::rendered(&record.content)),
                allow_delete,
            ),
            NodeType::Question => self.build_question(container, record, view, allow_delete),
        }
    }

    fn build_question(
        &mut self,
        container: &Container,
        record: &OriginNode,
        view: ViewMode,
        allow_delete: bool,
    ) -> Result<NodeId, NodeStructureError> {
        let q_id = record
            .q_id
            .clone()
            .ok_or_else(|| NodeStructureError::with_message("Question", "missing q_id"))?;
        let kind = QuestionKind::try_from(record.ptype.unwrap_or_default())?;

        let mut slots = vec![Slot::QuestionField];
        if kind == QuestionKind::CodeTest {
            slots.push(Slot::AnswerField);
            if view == ViewMode::Author {
                slots.extend([Slot::TestCode, Slot::Explanations]);
            }
        }

        let mut question = QuestionNode::new(q_id, kind, record.editable, slots);
        if kind == QuestionKind::WordTest {
            question.fields = parse_form_fields(&record.question);
        }
        let id = self.push(container, Node::Question(question), allow_delete)?;

        let slot = |slot| Container::Slot {
            question: id.clone(),
            slot,
        };

        self.push(
            &slot(Slot::QuestionField),
            Node::Explain(ExplainNode::rendered(&record.question)),
            false,
        )?;

        if kind == QuestionKind::CodeTest {
            if !record.editable {
                for component in &record.components {
                    self.build(&slot(Slot::AnswerField), component, view, false)?;
                }
            }
            if view == ViewMode::Author {
                let test_code = record.answers.first().cloned().unwrap_or_default();
                self.push(
                    &slot(Slot::TestCode),
                    Node::Code(CodeNode::new(test_code, false)),
                    false,
                )?;
                for explanation in &record.explanations {
                    self.build(&slot(Slot::Explanations), explanation, view, true)?;
                }
            }
        }
        Ok(id)
    }

    fn push(
        &mut self,
        container: &Container,
        node: Node,
        allow_delete: bool,
    ) -> Result<NodeId, NodeStructureError> {
        let len = self.children(container)?.len();
        self.insert_at(container, len, node, allow_delete)
    }

    /// Insert a node at `index` (clamped) within `container`.
    pub fn insert_at(
        &mut self,
        container: &Container,
        index: usize,
        node: Node,
        allow_delete: bool,
    ) -> Result<NodeId, NodeStructureError> {
        let id = NodeId::generate();
        let siblings = self.children_mut(container)?;
        let index = index.min(siblings.len());
        siblings.insert(index, id.clone());
        self.nodes.insert(
            id.clone(),
            Entry {
                node,
                container: container.clone(),
                allow_delete,
            },
        );
        Ok(id)
    }

    /// Append a deletable node to the end of a container.
    pub fn append(&mut self, container: &Container, node: Node) -> Result<NodeId, NodeStructureError> {
        self.push(container, node, true)
    }

    pub fn insert_before(&mut self, anchor: &NodeId, node: Node) -> Result<NodeId, NodeStructureError> {
        let (container, index) = self.position(anchor)?;
        self.insert_at(&container, index, node, true)
    }

    pub fn insert_after(&mut self, anchor: &NodeId, node: Node) -> Result<NodeId, NodeStructureError> {
        let (container, index) = self.position(anchor)?;
        self.insert_at(&container, index + 1, node, true)
    }

    fn position(&self, id: &NodeId) -> Result<(Container, usize), NodeStructureError> {
        let container = self.container_of(id)?.clone();
        let index = self
            .children(&container)?
            .iter()
            .position(|sibling| sibling == id)
            .ok_or_else(|| NodeStructureError::missing(id))?;
        Ok((container, index))
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> &[NodeId] {
        &self.root
    }

    pub fn get(&self, id: &NodeId) -> Result<&Node, NodeStructureError> {
        self.nodes
            .get(id)
            .map(|entry| &entry.node)
            .ok_or_else(|| NodeStructureError::missing(id))
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Result<&mut Node, NodeStructureError> {
        self.nodes
            .get_mut(id)
            .map(|entry| &mut entry.node)
            .ok_or_else(|| NodeStructureError::missing(id))
    }

    pub fn node_type(&self, id: &NodeId) -> Result<NodeType, NodeStructureError> {
        self.get(id).map(Node::node_type)
    }

    pub fn code(&self, id: &NodeId) -> Result<&CodeNode, NodeStructureError> {
        match self.get(id)? {
            Node::Code(code) => Ok(code),
            other => Err(wrong_type(other, "Code")),
        }
    }

    pub fn code_mut(&mut self, id: &NodeId) -> Result<&mut CodeNode, NodeStructureError> {
        match self.get_mut(id)? {
            Node::Code(code) => Ok(code),
            other => Err(wrong_type(other, "Code")),
        }
    }

    pub fn explain_mut(&mut self, id: &NodeId) -> Result<&mut ExplainNode, NodeStructureError> {
        match self.get_mut(id)? {
            Node::Explain(explain) => Ok(explain),
            other => Err(wrong_type(other, "Explain")),
        }
    }

    pub fn question(&self, id: &NodeId) -> Result<&QuestionNode, NodeStructureError> {
        match self.get(id)? {
            Node::Question(question) => Ok(question),
            other => Err(wrong_type(other, "Question")),
        }
    }

    pub fn question_mut(&mut self, id: &NodeId) -> Result<&mut QuestionNode, NodeStructureError> {
        match self.get_mut(id)? {
            Node::Question(question) => Ok(question),
            other => Err(wrong_type(other, "Question")),
        }
    }

    pub fn container_of(&self, id: &NodeId) -> Result<&Container, NodeStructureError> {
        self.nodes
            .get(id)
            .map(|entry| &entry.container)
            .ok_or_else(|| NodeStructureError::missing(id))
    }

    pub fn allow_delete(&self, id: &NodeId) -> bool {
        self.nodes.get(id).is_some_and(|entry| entry.allow_delete)
    }

    pub fn children(&self, container: &Container) -> Result<&[NodeId], NodeStructureError> {
        match container {
            Container::Root => Ok(&self.root),
            Container::Slot { question, slot } => self
                .question(question)?
                .slot(*slot)
                .ok_or_else(|| missing_slot(*slot)),
        }
    }

    fn children_mut(&mut self, container: &Container) -> Result<&mut Vec<NodeId>, NodeStructureError> {
        match container {
            Container::Root => Ok(&mut self.root),
            Container::Slot { question, slot } => self
                .question_mut(question)?
                .slots
                .get_mut(slot)
                .ok_or_else(|| missing_slot(*slot)),
        }
    }

    /// Code nodes that are direct children of `container`, in document order.
    pub fn code_children(&self, container: &Container) -> Result<Vec<NodeId>, NodeStructureError> {
        Ok(self
            .children(container)?
            .iter()
            .filter(|id| matches!(self.get(id), Ok(Node::Code(_))))
            .cloned()
            .collect())
    }

    pub fn next_node(&self, id: &NodeId) -> Option<NodeId> {
        let (container, index) = self.position(id).ok()?;
        self.children(&container).ok()?.get(index + 1).cloned()
    }

    pub fn prev_node(&self, id: &NodeId) -> Option<NodeId> {
        let (container, index) = self.position(id).ok()?;
        let index = index.checked_sub(1)?;
        self.children(&container).ok()?.get(index).cloned()
    }

    /// The enclosing Question, for nodes nested in one of its slots.
    pub fn parent_node(&self, id: &NodeId) -> Option<NodeId> {
        match self.container_of(id).ok()? {
            Container::Root => None,
            Container::Slot { question, .. } => Some(question.clone()),
        }
    }

    /// Position among the root container's nodes.
    pub fn root_index(&self, id: &NodeId) -> Option<usize> {
        self.root.iter().position(|sibling| sibling == id)
    }

    /// Delete a node and, for a Question, all of its children first.
    pub fn delete(&mut self, id: &NodeId) -> Result<DeleteOutcome, NodeError> {
        let entry = self
            .nodes
            .get(id)
            .ok_or_else(|| NodeStructureError::missing(id))?;
        if !entry.allow_delete {
            return Err(NodeError::NotDeletable(id.clone()));
        }
        let container = entry.container.clone();

        let mut outcome = DeleteOutcome::default();
        self.remove_subtree(id, &mut outcome);
        if let Ok(siblings) = self.children_mut(&container) {
            siblings.retain(|sibling| sibling != id);
        }
        debug!("[document] Deleted {} node(s)", outcome.removed.len());
        Ok(outcome)
    }

    /// Remove every child of a question slot, regardless of `allow_delete`.
    pub fn clear_slot(&mut self, question: &NodeId, slot: Slot) -> Result<DeleteOutcome, NodeStructureError> {
        let container = Container::Slot {
            question: question.clone(),
            slot,
        };
        let children = std::mem::take(self.children_mut(&container)?);
        let mut outcome = DeleteOutcome::default();
        for child in &children {
            self.remove_subtree(child, &mut outcome);
        }
        Ok(outcome)
    }

    fn remove_subtree(&mut self, id: &NodeId, outcome: &mut DeleteOutcome) {
        let Some(mut entry) = self.nodes.remove(id) else {
            return;
        };
        if let Node::Question(question) = &entry.node {
            let children: Vec<NodeId> = question.children().cloned().collect();
            for child in &children {
                self.remove_subtree(child, outcome);
            }
        }
        if let Some(editor) = entry.node.editor_slot_mut() {
            if editor.detach() {
                outcome.detached_editors += 1;
            }
        }
        outcome.removed.push(id.clone());
    }

    /// Every live Code node, in no particular order.
    pub fn code_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, entry)| matches!(entry.node, Node::Code(_)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn reset_code_states(&mut self) {
        for entry in self.nodes.values_mut() {
            if let Node::Code(code) = &mut entry.node {
                code.reset_state();
            }
        }
    }

    /// Mirror the queue onto the run indicators.
    pub fn apply_queue_state(&mut self, state: &ExecutionQueueState) {
        for entry in self.nodes.values_mut() {
            if let Node::Code(code) = &mut entry.node {
                code.set_run_state(RunState::Idle);
            }
        }
        if !state.running {
            return;
        }
        for (position, queued) in state.nodes.iter().enumerate() {
            if let Ok(code) = self.code_mut(&queued.node_id) {
                code.set_run_state(if position == 0 {
                    RunState::Running
                } else {
                    RunState::Suspending
                });
            }
        }
    }

    pub fn extract_question_params(
        &self,
        id: &NodeId,
        mode: ExtractMode,
    ) -> Result<QuestionParams, NodeStructureError> {
        let question = self.question(id)?;
        let slot = |slot: Slot| question.slot(slot).ok_or_else(|| missing_slot(slot));
        let question_field = slot(Slot::QuestionField)?;

        let mut params = QuestionParams {
            node_id: id.clone(),
            q_id: question.q_id.clone(),
            ptype: question.kind,
            answers: Vec::new(),
            question: None,
            editable: None,
            components: None,
            explanations: None,
        };

        match (mode, question.kind) {
            (ExtractMode::Learner, QuestionKind::WordTest) => {
                params.answers = question
                    .fields
                    .iter()
                    .map(|field| field.value().to_string())
                    .collect();
            }
            (ExtractMode::Learner, QuestionKind::CodeTest) => {
                params.answers = self
                    .components(slot(Slot::AnswerField)?)
                    .filter(|c| c.node_type == NodeType::Code)
                    .map(|c| c.content)
                    .collect();
            }
            (ExtractMode::Author, QuestionKind::WordTest) => {
                let markdown = self.question_markdown(question_field)?;
                params.answers = authored_answers(&markdown);
                params.question = Some(markdown);
            }
            (ExtractMode::Author, QuestionKind::CodeTest) => {
                params.question = Some(self.question_markdown(question_field)?);
                let test_code = self
                    .components(slot(Slot::TestCode)?)
                    .find(|c| c.node_type == NodeType::Code)
                    .ok_or_else(|| {
                        NodeStructureError::with_message("Question", "missing test code")
                    })?;
                params.answers = vec![test_code.content];
                params.editable = Some(question.editable);
                if !question.editable {
                    params.components = Some(self.components(slot(Slot::AnswerField)?).collect());
                }
                params.explanations = Some(
                    self.components(slot(Slot::Explanations)?)
                        .map(|c| ComponentParams {
                            readonly: None,
                            ..c
                        })
                        .collect(),
                );
            }
        }
        Ok(params)
    }

    fn question_markdown(&self, question_field: &[NodeId]) -> Result<String, NodeStructureError> {
        question_field
            .iter()
            .find_map(|id| match self.get(id) {
                Ok(Node::Explain(explain)) => Some(explain.value().to_string()),
                _ => None,
            })
            .ok_or_else(|| NodeStructureError::with_message("Question", "missing question text"))
    }

    fn components<'a>(&'a self, ids: &'a [NodeId]) -> impl Iterator<Item = ComponentParams> + 'a {
        ids.iter().filter_map(|id| match self.get(id).ok()? {
            Node::Code(code) => Some(ComponentParams {
                node_type: NodeType::Code,
                content: code.value().to_string(),
                readonly: Some(code.read_only()),
            }),
            Node::Explain(explain) => Some(ComponentParams {
                node_type: NodeType::Explain,
                content: explain.value().to_string(),
                readonly: None,
            }),
            Node::Question(_) => None,
        })
    }
}

fn wrong_type(node: &Node, expected: &str) -> NodeStructureError {
    NodeStructureError::with_message(
        node.node_type().label(),
        format!("expected a {expected} node"),
    )
}

fn missing_slot(slot: Slot) -> NodeStructureError {
    NodeStructureError::with_message("Question", format!("missing {slot}"))
}
