//! Session orchestration: owns the per-run state (slots, history, anchor
//! and start overrides, pending input) and drives the execute/advance loop.
//!
//! Every run gets a generation id. Restarting bumps it, and every async
//! continuation (timers, API joins, stream chunks) re-checks the generation
//! after each await before touching state, so late completions from a
//! superseded run are dropped instead of corrupting the new one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::events::{EngineEvent, EventCallback};
use crate::graph::{Node, NodeKind, QuickReply, ScenarioGraph};
use crate::history::{ConversationHistory, HistoryEntry};
use crate::http::{HttpFetcher, ReqwestFetcher};
use crate::llm::{HttpLlmClient, LlmClient, DEFAULT_LLM_ENDPOINT};
use crate::notify::{Notifier, TracingNotifier};
use crate::sim::executors::Step;
use crate::sim::traversal;
use crate::slots::{SlotStore, Slots};
use crate::validate::validate_form;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pacing delay applied before each automatically appended node. The
    /// editor's two historical delays (post-execution and bare display
    /// auto-advance) are unified behind this single knob.
    pub advance_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            advance_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Awaiting {
    pub(crate) node_id: String,
    pub(crate) kind: AwaitingKind,
}

#[derive(Debug, Clone)]
pub(crate) enum AwaitingKind {
    SlotFilling { slot: String, entry_id: u64 },
    BranchButtons { entry_id: u64 },
    Form { entry_id: u64 },
}

#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) slots: SlotStore,
    pub(crate) history: ConversationHistory,
    pub(crate) current_node: Option<String>,
    pub(crate) anchor_node: Option<String>,
    pub(crate) start_node: Option<String>,
    pub(crate) awaiting: Option<Awaiting>,
    pub(crate) fixed_menu: Vec<QuickReply>,
    pub(crate) fixed_menu_node: Option<String>,
}

/// The flow interpreter: executes a scenario graph as a stateful
/// conversation. Clone-able handle; clones share one session.
#[derive(Clone)]
pub struct Simulator {
    pub(crate) graph: Arc<ScenarioGraph>,
    pub(crate) config: EngineConfig,
    pub(crate) http: Arc<dyn HttpFetcher>,
    pub(crate) llm: Arc<dyn LlmClient>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) event_callback: Option<EventCallback>,
    pub(crate) state: Arc<RwLock<SessionState>>,
    pub(crate) generation: Arc<AtomicU64>,
}

impl Simulator {
    pub fn new(graph: ScenarioGraph) -> Result<Self, EngineError> {
        Ok(Self {
            graph: Arc::new(graph),
            config: EngineConfig::default(),
            http: Arc::new(ReqwestFetcher::new()?),
            llm: Arc::new(HttpLlmClient::new(DEFAULT_LLM_ENDPOINT)?),
            notifier: Arc::new(TracingNotifier),
            event_callback: None,
            state: Arc::new(RwLock::new(SessionState::default())),
            generation: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_http_fetcher(mut self, http: Arc<dyn HttpFetcher>) -> Self {
        self.http = http;
        self
    }

    pub fn with_llm_client(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = llm;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_event_callback(
        mut self,
        callback: impl Fn(&EngineEvent) + Send + Sync + 'static,
    ) -> Self {
        self.event_callback = Some(Arc::new(callback));
        self
    }

    pub fn graph(&self) -> &ScenarioGraph {
        self.graph.as_ref()
    }

    /// Begin (or restart) the conversation. Resets slots, history and menu
    /// state and supersedes any in-flight timers or streams of a previous
    /// run. Start node resolution: explicit argument, session override,
    /// document start id, `start`-typed node, unique edge-less node.
    pub async fn start_simulation(&self, start_node_id: Option<&str>) -> Result<(), EngineError> {
        let run = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let start_id = {
            let mut state = self.state.write().await;
            state.slots.clear();
            state.history.clear();
            state.fixed_menu.clear();
            state.fixed_menu_node = None;
            state.awaiting = None;
            let explicit = start_node_id
                .map(str::to_string)
                .or_else(|| state.start_node.clone());
            match self.graph.resolve_start(explicit.as_deref()) {
                Some(node) => {
                    state.current_node = Some(node.id.clone());
                    node.id.clone()
                }
                None => return Err(EngineError::NoStartNode),
            }
        };
        info!(start = %start_id, run, "starting simulation");
        self.emit(&EngineEvent::SlotsChanged { slots: Slots::new() });
        self.run_node(run, start_id, None).await
    }

    /// Free-text answer for a suspended slotfilling node.
    pub async fn submit_text(&self, text: impl Into<String>) -> Result<(), EngineError> {
        let run = self.current_run();
        let text = text.into();
        let (node_id, completed, user_entry, slots) = {
            let mut state = self.state.write().await;
            let awaiting = state
                .awaiting
                .take()
                .ok_or(EngineError::NotSuspended("free text"))?;
            match awaiting.kind {
                AwaitingKind::SlotFilling { ref slot, entry_id } => {
                    if !slot.is_empty() {
                        state.slots.assign(slot.clone(), Value::String(text.clone()));
                    }
                    state.history.complete(entry_id);
                    let user_id = state.history.append_user(text.clone());
                    (
                        awaiting.node_id.clone(),
                        state.history.entry(entry_id).cloned(),
                        state.history.entry(user_id).cloned(),
                        state.slots.snapshot(),
                    )
                }
                _ => {
                    state.awaiting = Some(awaiting);
                    return Err(EngineError::NotSuspended("free text"));
                }
            }
        };
        self.emit(&EngineEvent::SlotsChanged { slots });
        if let Some(entry) = completed {
            self.emit(&EngineEvent::HistoryUpdated { entry });
        }
        if let Some(entry) = user_entry {
            self.emit(&EngineEvent::HistoryAppended { entry });
        }
        self.resume_from(run, node_id, None).await
    }

    /// Quick-reply selection for a suspended slotfilling or branch(BUTTON)
    /// node. Slotfilling stores the value into its slot; branch uses it as
    /// the outgoing edge handle.
    pub async fn select_reply(&self, value: impl Into<String>) -> Result<(), EngineError> {
        let run = self.current_run();
        let value = value.into();
        let (node_id, handle, completed, user_entry, slots_changed) = {
            let mut state = self.state.write().await;
            let awaiting = state
                .awaiting
                .take()
                .ok_or(EngineError::NotSuspended("a reply selection"))?;
            match awaiting.kind {
                AwaitingKind::SlotFilling { ref slot, entry_id } => {
                    if !slot.is_empty() {
                        state.slots.assign(slot.clone(), Value::String(value.clone()));
                    }
                    state.history.complete(entry_id);
                    let user_id = state.history.append_user(value.clone());
                    (
                        awaiting.node_id.clone(),
                        None,
                        state.history.entry(entry_id).cloned(),
                        state.history.entry(user_id).cloned(),
                        Some(state.slots.snapshot()),
                    )
                }
                AwaitingKind::BranchButtons { entry_id } => {
                    state.history.complete(entry_id);
                    let user_id = state.history.append_user(value.clone());
                    (
                        awaiting.node_id.clone(),
                        Some(value.clone()),
                        state.history.entry(entry_id).cloned(),
                        state.history.entry(user_id).cloned(),
                        None,
                    )
                }
                _ => {
                    state.awaiting = Some(awaiting);
                    return Err(EngineError::NotSuspended("a reply selection"));
                }
            }
        };
        if let Some(slots) = slots_changed {
            self.emit(&EngineEvent::SlotsChanged { slots });
        }
        if let Some(entry) = completed {
            self.emit(&EngineEvent::HistoryUpdated { entry });
        }
        if let Some(entry) = user_entry {
            self.emit(&EngineEvent::HistoryAppended { entry });
        }
        self.resume_from(run, node_id, handle).await
    }

    /// Submit a suspended form. On a validation failure the first failing
    /// element's message goes through the notifier, the node stays
    /// interactive, and this returns `Ok` (a blocked submission is not an
    /// engine error).
    pub async fn submit_form(
        &self,
        form_data: HashMap<String, String>,
    ) -> Result<(), EngineError> {
        let run = self.current_run();
        let (node_id, entry_id) = {
            let state = self.state.read().await;
            match &state.awaiting {
                Some(Awaiting {
                    node_id,
                    kind: AwaitingKind::Form { entry_id },
                }) => (node_id.clone(), *entry_id),
                _ => return Err(EngineError::NotSuspended("a form submission")),
            }
        };

        let node = self
            .graph
            .node(&node_id)
            .ok_or_else(|| EngineError::NodeNotFound(node_id.clone()))?;
        let elements = match &node.kind {
            NodeKind::Form(data) => &data.elements,
            _ => return Err(EngineError::NotSuspended("a form submission")),
        };

        if let Err(failure) = validate_form(elements, &form_data) {
            warn!(node = %node_id, %failure, "form submission blocked");
            self.notifier.alert(&failure.to_string());
            return Ok(());
        }

        let (completed, slots) = {
            let mut state = self.state.write().await;
            state.awaiting = None;
            for (key, value) in &form_data {
                state.slots.assign(key.clone(), Value::String(value.clone()));
            }
            state.history.complete(entry_id);
            (state.history.entry(entry_id).cloned(), state.slots.snapshot())
        };
        self.emit(&EngineEvent::SlotsChanged { slots });
        if let Some(entry) = completed {
            self.emit(&EngineEvent::HistoryUpdated { entry });
        }
        self.resume_from(run, node_id, None).await
    }

    /// Persistent-menu selection; valid whenever a fixedmenu node has been
    /// reached, regardless of other pending input.
    pub async fn select_menu(&self, value: impl Into<String>) -> Result<(), EngineError> {
        let run = self.current_run();
        let value = value.into();
        let (node_id, user_entry) = {
            let mut state = self.state.write().await;
            let node_id = match &state.fixed_menu_node {
                Some(id) if state.fixed_menu.iter().any(|reply| reply.value == value) => id.clone(),
                _ => return Err(EngineError::NotSuspended("a menu selection")),
            };
            state.awaiting = None;
            let user_id = state.history.append_user(value.clone());
            (node_id, state.history.entry(user_id).cloned())
        };
        if let Some(entry) = user_entry {
            self.emit(&EngineEvent::HistoryAppended { entry });
        }
        self.resume_from(run, node_id, Some(value)).await
    }

    /// Early-exit marker: traversal terminates whenever this node is the
    /// traversal source, regardless of its outgoing edges.
    pub async fn set_anchor_node(&self, node_id: Option<String>) {
        self.state.write().await.anchor_node = node_id;
    }

    /// Session-level start override consulted by `start_simulation`.
    pub async fn set_start_node(&self, node_id: Option<String>) {
        self.state.write().await.start_node = node_id;
    }

    pub async fn slots(&self) -> Slots {
        self.state.read().await.slots.snapshot()
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.state.read().await.history.entries().to_vec()
    }

    pub async fn current_node(&self) -> Option<String> {
        self.state.read().await.current_node.clone()
    }

    pub async fn is_suspended(&self) -> bool {
        self.state.read().await.awaiting.is_some()
    }

    pub async fn fixed_menu(&self) -> Vec<QuickReply> {
        self.state.read().await.fixed_menu.clone()
    }

    pub(crate) fn current_run(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn is_current(&self, run: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == run
    }

    pub(crate) fn emit(&self, event: &EngineEvent) {
        if let Some(callback) = &self.event_callback {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (callback)(event)));
        }
    }

    /// Execute `node_id`, then keep advancing along resolved edges until the
    /// flow suspends, terminates, or this run is superseded.
    pub(crate) async fn run_node(
        &self,
        run: u64,
        mut node_id: String,
        mut chain: Option<u64>,
    ) -> Result<(), EngineError> {
        loop {
            if !self.is_current(run) {
                return Ok(());
            }
            let node = self
                .graph
                .node(&node_id)
                .cloned()
                .ok_or_else(|| EngineError::NodeNotFound(node_id.clone()))?;
            {
                let mut state = self.state.write().await;
                state.current_node = Some(node.id.clone());
            }
            debug!(node = %node.id, kind = node.kind.name(), "entering node");
            self.emit(&EngineEvent::NodeEntered {
                node_id: node.id.clone(),
            });

            // Only message and delay nodes carry an open chain forward.
            let chain_for_node = match &node.kind {
                NodeKind::Message(_) | NodeKind::Delay(_) => chain,
                _ => {
                    self.close_chain(chain).await;
                    None
                }
            };

            match self.execute_node(run, &node, chain_for_node).await? {
                Step::Continue {
                    handle,
                    chain: next_chain,
                    llm_text,
                } => match self.advance(run, &node, handle, next_chain, llm_text).await? {
                    Some((next, carried)) => {
                        node_id = next;
                        chain = carried;
                    }
                    None => return Ok(()),
                },
                Step::Jump { node_id: target } => {
                    node_id = target;
                    chain = None;
                }
                Step::Suspend => return Ok(()),
                Step::Abandon => return Ok(()),
            }
        }
    }

    /// Resume traversal out of `node_id` after user input resolved it.
    pub(crate) async fn resume_from(
        &self,
        run: u64,
        node_id: String,
        handle: Option<String>,
    ) -> Result<(), EngineError> {
        if !self.is_current(run) {
            return Ok(());
        }
        let node = self
            .graph
            .node(&node_id)
            .cloned()
            .ok_or_else(|| EngineError::NodeNotFound(node_id))?;
        match self.advance(run, &node, handle, None, None).await? {
            Some((next, chain)) => self.run_node(run, next, chain).await,
            None => Ok(()),
        }
    }

    /// One traversal step out of `source`. Applies the anchor rule, resolves
    /// the edge, closes chains across group boundaries and applies the
    /// pacing delay. `None` means the loop is done (suspended in place or
    /// terminated).
    async fn advance(
        &self,
        run: u64,
        source: &Node,
        handle: Option<String>,
        chain: Option<u64>,
        llm_text: Option<String>,
    ) -> Result<Option<(String, Option<u64>)>, EngineError> {
        let (anchored, slots) = {
            let state = self.state.read().await;
            (
                state.anchor_node.as_deref() == Some(source.id.as_str()),
                state.slots.snapshot(),
            )
        };
        if anchored {
            debug!(node = %source.id, "anchor reached, terminating");
            self.close_chain(chain).await;
            self.terminate(run).await;
            return Ok(None);
        }

        let target = traversal::resolve_next(
            self.graph.as_ref(),
            source,
            handle.as_deref(),
            &slots,
            llm_text.as_deref(),
        )
        .map(|edge| edge.target.clone());

        match target {
            Some(target) => {
                // Crossing a group boundary closes any open chain.
                let target_parent = self
                    .graph
                    .node(&target)
                    .and_then(|node| node.parent_id.clone());
                let chain = if source.parent_id == target_parent {
                    chain
                } else {
                    self.close_chain(chain).await;
                    None
                };

                self.pause().await;
                if !self.is_current(run) {
                    debug!(run, "run superseded during advance delay");
                    return Ok(None);
                }
                Ok(Some((target, chain)))
            }
            None => {
                self.close_chain(chain).await;
                // fixedmenu, branch and api manage their own suspension or
                // termination; everything else dead-ends the conversation.
                let stays_interactive = matches!(
                    &source.kind,
                    NodeKind::Fixedmenu(_) | NodeKind::Branch(_) | NodeKind::Api(_)
                );
                if stays_interactive {
                    debug!(node = %source.id, "no outgoing edge, holding position");
                } else {
                    self.terminate(run).await;
                }
                Ok(None)
            }
        }
    }

    pub(crate) async fn terminate(&self, run: u64) {
        if !self.is_current(run) {
            return;
        }
        {
            let mut state = self.state.write().await;
            state.current_node = None;
            state.awaiting = None;
        }
        debug!(run, "conversation terminated");
        self.emit(&EngineEvent::Terminated);
    }

    /// Mark an open chained entry as complete.
    pub(crate) async fn close_chain(&self, chain: Option<u64>) {
        let Some(id) = chain else { return };
        let entry = {
            let mut state = self.state.write().await;
            if state.history.complete(id) {
                state.history.entry(id).cloned()
            } else {
                None
            }
        };
        if let Some(entry) = entry {
            self.emit(&EngineEvent::HistoryUpdated { entry });
        }
    }

    async fn pause(&self) {
        if self.config.advance_delay.is_zero() {
            return;
        }
        time::sleep(self.config.advance_delay).await;
    }
}
