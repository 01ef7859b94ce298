//! Notebook controller: the context object that turns button actions and
//! keyboard shortcuts into kernel calls and document mutations.
//!
//! The controller owns everything the view talks to. Kernel events are
//! drained with [`NotebookController::process_events`] and applied to the
//! document (output areas, run indicators); errors surface as [`Notice`]s.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::error::{ApplicationError, NodeStructureError};
use crate::http::{HttpApi, Transport};
use crate::kernel::{KernelClient, KernelEvent, KernelOptions};
use crate::node::{
    CodeNode, Container, Document, ExplainNode, Node, NodeId, NodeType, QuestionKind, RunState,
    Slot,
};
use crate::page::ViewMode;
use crate::render::render_message;
use crate::reset::ResetManager;
use crate::save::SaveClient;
use crate::scoring::ScoringClient;
use crate::session::{FileSessionStore, SessionStore};
use crate::settings::ClientSettings;
use crate::ws::{SocketConnector, WsConnector};

/// A button action. Names match the `data-action` values of the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ExecAll,
    RestartKernel,
    InterruptKernel,
    Exec,
    Test,
    CancelTest,
    ExecAllInQuestion,
    ResetInput,
    DelNode,
    AddCode,
    AddExplain,
    ShowPreview,
    Save,
}

impl Action {
    pub const ALL: [Action; 13] = [
        Action::ExecAll,
        Action::RestartKernel,
        Action::InterruptKernel,
        Action::Exec,
        Action::Test,
        Action::CancelTest,
        Action::ExecAllInQuestion,
        Action::ResetInput,
        Action::DelNode,
        Action::AddCode,
        Action::AddExplain,
        Action::ShowPreview,
        Action::Save,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Action::ExecAll => "exec-all",
            Action::RestartKernel => "restart-kernel",
            Action::InterruptKernel => "interrupt-kernel",
            Action::Exec => "exec",
            Action::Test => "test",
            Action::CancelTest => "cancel-test",
            Action::ExecAllInQuestion => "exec-all-in-question",
            Action::ResetInput => "reset-input",
            Action::DelNode => "del-node",
            Action::AddCode => "add-code",
            Action::AddExplain => "add-explain",
            Action::ShowPreview => "show-preview",
            Action::Save => "save",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Action {
    type Err = ApplicationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.name() == s)
            .ok_or_else(|| ApplicationError::Other(format!("Unknown action '{s}'")))
    }
}

/// Keyboard shortcuts handled in command mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    CtrlEnter,
    Enter,
    Escape,
    /// `j`
    Next,
    /// `k`
    Prev,
    /// `a`
    InsertAbove,
    /// `b`
    InsertBelow,
    CtrlD,
    CtrlS,
}

impl Key {
    /// Parse a key chord such as `Ctrl+Enter` or `j`.
    pub fn parse(chord: &str) -> Option<Key> {
        let key = match chord.to_ascii_lowercase().as_str() {
            "ctrl+enter" => Key::CtrlEnter,
            "enter" => Key::Enter,
            "escape" | "esc" => Key::Escape,
            "j" => Key::Next,
            "k" => Key::Prev,
            "a" => Key::InsertAbove,
            "b" => Key::InsertBelow,
            "ctrl+d" => Key::CtrlD,
            "ctrl+s" => Key::CtrlS,
            _ => return None,
        };
        Some(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A user-visible message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

pub struct NotebookController {
    document: Document,
    kernel: KernelClient,
    events: mpsc::UnboundedReceiver<KernelEvent>,
    scoring: ScoringClient,
    saver: SaveClient,
    reset: ResetManager,
    view: ViewMode,
    title: Option<String>,
    active: Option<NodeId>,
    disabled: HashSet<(Action, Option<NodeId>)>,
    notices: Vec<Notice>,
}

impl NotebookController {
    /// Connect to a live server and load exercise `p_id`.
    pub async fn connect(
        settings: &ClientSettings,
        p_id: &str,
        view: ViewMode,
    ) -> Result<Self, ApplicationError> {
        let transport: Arc<dyn Transport> =
            Arc::new(HttpApi::new(&settings.origin, settings.request_timeout())?);
        let connector: Arc<dyn SocketConnector> = Arc::new(WsConnector::new(&settings.origin)?);
        let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(settings.origin.clone()));
        Self::load(transport, connector, store, settings.kernel_options(), p_id, view).await
    }

    /// Fetch the page for `p_id` and build the document from it.
    pub async fn load(
        transport: Arc<dyn Transport>,
        connector: Arc<dyn SocketConnector>,
        store: Arc<dyn SessionStore>,
        options: KernelOptions,
        p_id: &str,
        view: ViewMode,
    ) -> Result<Self, ApplicationError> {
        let reset = ResetManager::new(transport.clone(), p_id);
        let document = Document::from_page(reset.origin_page().await?, view)?;
        let scoring = ScoringClient::new(transport.clone(), p_id);
        let saver = SaveClient::new(transport.clone(), p_id);
        let (kernel, events) = KernelClient::new(transport, connector, store, options);
        info!("[controller] Loaded {} ({} nodes)", p_id, document.len());
        Ok(Self::new(document, kernel, events, scoring, saver, reset, view))
    }

    pub fn new(
        document: Document,
        kernel: KernelClient,
        events: mpsc::UnboundedReceiver<KernelEvent>,
        scoring: ScoringClient,
        saver: SaveClient,
        reset: ResetManager,
        view: ViewMode,
    ) -> Self {
        Self {
            document,
            kernel,
            events,
            scoring,
            saver,
            reset,
            view,
            title: None,
            active: None,
            disabled: HashSet::new(),
            notices: Vec::new(),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn kernel(&self) -> &KernelClient {
        &self.kernel
    }

    pub fn view(&self) -> ViewMode {
        self.view
    }

    /// Title to register the page under in the author view. Defaults to the
    /// title the page was loaded with.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    pub fn active(&self) -> Option<&NodeId> {
        self.active.as_ref()
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Whether `action`'s control for `node` is disabled by a running action.
    pub fn is_disabled(&self, action: Action, node: Option<&NodeId>) -> bool {
        self.disabled.contains(&(action, node.cloned()))
    }

    fn notify(&mut self, level: NoticeLevel, message: impl Into<String>) {
        self.notices.push(Notice {
            level,
            message: message.into(),
        });
    }

    fn fail(&mut self, err: ApplicationError) -> ApplicationError {
        error!("[controller] {}", err);
        self.notify(NoticeLevel::Error, err.to_string());
        err
    }

    /// Reattach to the stored kernel or start one. In the learner view the
    /// learner's saved answers are restored; failing that is only a notice.
    pub async fn open(&mut self) -> Result<(), ApplicationError> {
        let attached = self.kernel.reattach().await;
        self.process_events();
        let kernel_id = attached.map_err(|e| self.fail(e.into()))?;
        info!("[controller] Attached to kernel {}", kernel_id);

        if self.view == ViewMode::Learner {
            if let Err(e) = self.scoring.restore_saved_answers(&mut self.document).await {
                warn!("[controller] Could not restore saved answers: {}", e);
                self.notify(NoticeLevel::Info, format!("Saved answers unavailable: {e}"));
            }
        }
        Ok(())
    }

    /// Shut the kernel down.
    pub async fn close(&mut self) -> Result<(), ApplicationError> {
        let closed = self.kernel.shutdown().await;
        self.process_events();
        closed.map_err(|e| self.fail(e.into()))
    }

    pub fn select(&mut self, node_id: &NodeId) -> Result<(), ApplicationError> {
        if !self.document.contains(node_id) {
            return Err(self.fail(NodeStructureError::missing(node_id).into()));
        }
        self.active = Some(node_id.clone());
        Ok(())
    }

    /// Run a button action. Its control stays disabled until the action
    /// finishes; a click on a disabled control is ignored.
    pub async fn handle_action(
        &mut self,
        action: Action,
        node: Option<NodeId>,
    ) -> Result<(), ApplicationError> {
        let control = (action, node.clone());
        if !self.disabled.insert(control.clone()) {
            debug!("[controller] {} is disabled, ignoring", action);
            return Ok(());
        }
        debug!("[controller] {} on {:?}", action, node);

        let result = self.run_action(action, node).await;
        self.process_events();
        self.disabled.remove(&control);
        result.map_err(|e| self.fail(e))
    }

    async fn run_action(
        &mut self,
        action: Action,
        node: Option<NodeId>,
    ) -> Result<(), ApplicationError> {
        let target = || {
            node.clone()
                .ok_or_else(|| ApplicationError::Other(format!("{action} needs a target node")))
        };

        match action {
            Action::ExecAll => {
                let ids = self.document.code_children(&Container::Root)?;
                self.kernel.execute_all(ids, &self.document).await?;
            }
            Action::RestartKernel => {
                let restarted = self.kernel.set_up_kernel(true).await;
                self.document.reset_code_states();
                restarted?;
            }
            Action::InterruptKernel => self.kernel.kernel_interrupt().await?,
            Action::Exec => {
                let id = target()?;
                self.document.code(&id)?;
                self.kernel.execute(id, &self.document).await?;
            }
            Action::Test => {
                let outcome = self.scoring.scoring(&mut self.document, &target()?).await?;
                debug!("[controller] Scoring outcome {:?}", outcome);
            }
            Action::CancelTest => {
                self.scoring
                    .canceling(&mut self.document, &target()?)
                    .await?
            }
            Action::ExecAllInQuestion => {
                let answer_field = Container::Slot {
                    question: target()?,
                    slot: Slot::AnswerField,
                };
                let ids = self.document.code_children(&answer_field)?;
                self.kernel.execute_all(ids, &self.document).await?;
            }
            Action::ResetInput => {
                let id = target()?;
                let removed = self.reset.reset_input(&mut self.document, &id).await?;
                if self.active.as_ref().is_some_and(|a| removed.contains(a)) {
                    self.active = Some(id);
                }
            }
            Action::DelNode => self.delete_node(&target()?)?,
            Action::AddCode => {
                self.add_node(node.as_ref(), Node::Code(CodeNode::new("", false)))?;
            }
            Action::AddExplain => {
                self.add_node(node.as_ref(), Node::Explain(ExplainNode::new("")))?;
            }
            Action::ShowPreview => self.document.explain_mut(&target()?)?.show_preview(),
            Action::Save => self.save().await?,
        }
        Ok(())
    }

    /// Learners save their answers; authors register the page.
    async fn save(&mut self) -> Result<(), ApplicationError> {
        match self.view {
            ViewMode::Learner => {
                let saved = self.saver.save_answers(&self.document).await?;
                self.notify(NoticeLevel::Info, format!("Saved answers to {saved} question(s)"));
            }
            ViewMode::Author => {
                let title = match &self.title {
                    Some(title) => title.clone(),
                    None => self.reset.origin_title().await?.to_string(),
                };
                let header = self.reset.origin_page().await?.header.clone();
                let p_id = self.saver.register(&self.document, &title, header).await?;
                self.notify(NoticeLevel::Info, format!("Registered problem {p_id}"));
            }
        }
        Ok(())
    }

    /// Insert after `anchor`, or into an editable question's answer field,
    /// or at the end of the document. The new node becomes active.
    fn add_node(&mut self, anchor: Option<&NodeId>, node: Node) -> Result<NodeId, ApplicationError> {
        let id = match anchor {
            None => self.document.append(&Container::Root, node)?,
            Some(anchor) => {
                let into_answer_field = matches!(
                    self.document.get(anchor)?,
                    Node::Question(q) if q.kind == QuestionKind::CodeTest && q.editable
                );
                if into_answer_field {
                    let answer_field = Container::Slot {
                        question: anchor.clone(),
                        slot: Slot::AnswerField,
                    };
                    self.document.append(&answer_field, node)?
                } else {
                    self.document.insert_after(anchor, node)?
                }
            }
        };
        self.active = Some(id.clone());
        Ok(id)
    }

    /// Delete a node. If the selection goes with it, it moves to the next
    /// sibling, else the previous one, else the parent question.
    fn delete_node(&mut self, id: &NodeId) -> Result<(), ApplicationError> {
        let fallback = self
            .document
            .next_node(id)
            .or_else(|| self.document.prev_node(id))
            .or_else(|| self.document.parent_node(id));
        let outcome = self.document.delete(id)?;
        if self.active.as_ref().map_or(true, |a| outcome.removed.contains(a)) {
            self.active = fallback;
        }
        Ok(())
    }

    /// Handle a shortcut on the active node. Returns whether it was consumed.
    pub async fn handle_key(&mut self, key: Key) -> Result<bool, ApplicationError> {
        let Some(active) = self.active.clone().filter(|id| self.document.contains(id)) else {
            self.active = None;
            return match key {
                Key::Next | Key::Prev => {
                    self.active = self.document.root().first().cloned();
                    Ok(self.active.is_some())
                }
                Key::CtrlS => {
                    self.handle_action(Action::Save, None).await?;
                    Ok(true)
                }
                _ => Ok(false),
            };
        };
        let node_type = self.document.node_type(&active)?;

        match key {
            Key::CtrlEnter => match node_type {
                NodeType::Code => self.handle_action(Action::Exec, Some(active)).await?,
                NodeType::Explain => self.handle_action(Action::ShowPreview, Some(active)).await?,
                NodeType::Question if self.view == ViewMode::Learner => {
                    self.handle_action(Action::Test, Some(active)).await?
                }
                NodeType::Question => return Ok(false),
            },
            Key::Enter => {
                if let Err(e) = self.enter(&active, node_type) {
                    return Err(self.fail(e));
                }
            }
            Key::Escape => return Ok(self.escape(&active)),
            Key::Next | Key::Prev => {
                let neighbour = if key == Key::Next {
                    self.document.next_node(&active)
                } else {
                    self.document.prev_node(&active)
                };
                match neighbour {
                    Some(id) => self.active = Some(id),
                    None => return Ok(false),
                }
            }
            Key::InsertAbove | Key::InsertBelow => {
                let code = Node::Code(CodeNode::new("", false));
                let inserted = if key == Key::InsertAbove {
                    self.document.insert_before(&active, code)
                } else {
                    self.document.insert_after(&active, code)
                };
                match inserted {
                    Ok(id) => self.active = Some(id),
                    Err(e) => return Err(self.fail(e.into())),
                }
            }
            Key::CtrlD => self.handle_action(Action::DelNode, Some(active)).await?,
            Key::CtrlS => self.handle_action(Action::Save, None).await?,
        }
        Ok(true)
    }

    fn enter(&mut self, active: &NodeId, node_type: NodeType) -> Result<(), ApplicationError> {
        if node_type != NodeType::Question {
            return self.focus_editor(active);
        }

        let question = self.document.question(active)?;
        let creatable = question.kind == QuestionKind::CodeTest && question.editable;
        let first_answer = question
            .slot(Slot::AnswerField)
            .and_then(|children| children.first().cloned());
        let first_question = question
            .slot(Slot::QuestionField)
            .and_then(|children| children.first().cloned());

        let child = match first_answer {
            Some(child) => child,
            None if creatable => {
                let answer_field = Container::Slot {
                    question: active.clone(),
                    slot: Slot::AnswerField,
                };
                self.document
                    .append(&answer_field, Node::Code(CodeNode::new("", false)))?
            }
            None => match first_question {
                Some(child) if self.view == ViewMode::Author => child,
                _ => return Ok(()),
            },
        };
        self.active = Some(child.clone());
        self.focus_editor(&child)
    }

    fn focus_editor(&mut self, id: &NodeId) -> Result<(), ApplicationError> {
        match self.document.get_mut(id)? {
            Node::Explain(explain) => explain.show_editor(),
            node => {
                if let Some(editor) = node.editor() {
                    editor.focus();
                }
            }
        }
        Ok(())
    }

    fn escape(&mut self, active: &NodeId) -> bool {
        if let Ok(node) = self.document.get_mut(active) {
            if node.is_editing() {
                if let Some(editor) = node.editor() {
                    editor.blur();
                }
                return true;
            }
        }
        if let Some(parent) = self.document.parent_node(active) {
            self.active = Some(parent);
            return true;
        }
        self.document
            .question_mut(active)
            .is_ok_and(|question| question.hide_toast())
    }

    /// Apply every pending kernel event to the document.
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.apply_event(event);
            handled += 1;
        }
        handled
    }

    fn apply_event(&mut self, event: KernelEvent) {
        match event {
            KernelEvent::Dispatched { node_id } => {
                if let Ok(code) = self.document.code_mut(&node_id) {
                    code.clear_outputs();
                }
            }
            KernelEvent::MessageReceived { target, message } => {
                let entries = render_message(&message);
                if entries.is_empty() {
                    return;
                }
                let code = match &target {
                    Some(id) => self.document.code_mut(id).ok(),
                    None => None,
                };
                match code {
                    Some(code) => code.push_outputs(entries),
                    None => debug!(
                        "[controller] Dropping {} output(s) with no live target",
                        entries.len()
                    ),
                }
            }
            KernelEvent::QueueChanged(state) => self.document.apply_queue_state(&state),
            KernelEvent::TasksDiscarded { node_ids } => {
                for id in &node_ids {
                    if let Ok(code) = self.document.code_mut(id) {
                        code.set_run_state(RunState::Idle);
                    }
                }
            }
            KernelEvent::LifecycleChanged(state) => {
                debug!("[controller] Kernel session is {:?}", state);
            }
        }
    }

    /// Handle one inbound frame. Returns `false` once the socket has closed.
    pub async fn pump(&mut self) -> Result<bool, ApplicationError> {
        let received = self.kernel.next_message(&self.document).await;
        self.process_events();
        Ok(received?)
    }

    /// Pump frames until the execution queue drains.
    pub async fn run_until_idle(&mut self, limit: Duration) -> Result<(), ApplicationError> {
        let drained = tokio::time::timeout(limit, async {
            while !self.kernel.is_idle() {
                if !self.pump().await? {
                    return Err(ApplicationError::Other(
                        "Kernel connection closed before execution finished".to_string(),
                    ));
                }
            }
            Ok(())
        })
        .await;
        match drained {
            Ok(result) => result,
            Err(_) => Err(ApplicationError::Other(format!(
                "Timed out after {}s waiting for the kernel",
                limit.as_secs_f32()
            ))),
        }
    }
}
