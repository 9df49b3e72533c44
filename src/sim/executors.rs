//! Per-kind node execution. Each executor performs the node's side effects
//! (history entries, slot writes, network calls) and reports how traversal
//! should proceed.

use std::sync::Arc;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::time;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::graph::{
    ApiCall, ApiData, BranchData, BranchMode, FixedMenuData, FormData, IframeData, LinkData,
    LlmData, MessageData, Node, NodeKind, ResponseMapping, SetSlotData, SlotfillingData,
};
use crate::history::NodePacket;
use crate::http::{HttpCallRequest, HttpCallResponse};
use crate::interpolate::{get_nested_value, interpolate, interpolate_request};
use crate::sim::session::{Awaiting, AwaitingKind, Simulator};
use crate::slots::{coerce_assignment, Slots};
use crate::validate::default_slot_updates;

const MAX_ERROR_BODY: usize = 200;

/// What a node execution tells the traversal loop to do next.
#[derive(Debug)]
pub(crate) enum Step {
    /// Resolve an outgoing edge and keep going.
    Continue {
        /// Explicit edge handle, e.g. `onSuccess` after an API node.
        handle: Option<String>,
        /// History entry still collecting bubbles from chained nodes.
        chain: Option<u64>,
        /// Accumulated LLM output, consulted for keyword routing.
        llm_text: Option<String>,
    },
    /// Traversal restarts at this node without resolving an edge.
    Jump { node_id: String },
    /// Waiting for user input; the loop parks here.
    Suspend,
    /// This run was superseded mid-execution; stop without touching state.
    Abandon,
}

impl Step {
    fn advance() -> Self {
        Step::Continue {
            handle: None,
            chain: None,
            llm_text: None,
        }
    }
}

impl Simulator {
    pub(crate) async fn execute_node(
        &self,
        run: u64,
        node: &Node,
        chain: Option<u64>,
    ) -> Result<Step, EngineError> {
        match &node.kind {
            NodeKind::Start(_) => Ok(Step::advance()),
            NodeKind::Message(data) => self.execute_message(node, data, chain).await,
            NodeKind::Iframe(data) => self.execute_iframe(node, data).await,
            NodeKind::Slotfilling(data) => self.execute_slotfilling(node, data).await,
            NodeKind::Form(data) => self.execute_form(node, data).await,
            NodeKind::Branch(data) => self.execute_branch(node, data).await,
            NodeKind::Api(data) => self.execute_api(run, node, data).await,
            NodeKind::Llm(data) => self.execute_llm(run, node, data).await,
            NodeKind::Link(data) => self.execute_link(node, data).await,
            NodeKind::Toast(data) => {
                let slots = self.slots().await;
                self.notifier
                    .toast(data.toast_type, &interpolate(&data.message, &slots));
                Ok(Step::advance())
            }
            NodeKind::Fixedmenu(data) => self.execute_fixed_menu(node, data).await,
            NodeKind::SetSlot(data) => self.execute_set_slot(data).await,
            NodeKind::Delay(data) => {
                debug!(node = %node.id, ms = data.duration, "delaying");
                time::sleep(std::time::Duration::from_millis(data.duration)).await;
                if !self.is_current(run) {
                    return Ok(Step::Abandon);
                }
                // A delay is transparent to chaining.
                Ok(Step::Continue {
                    handle: None,
                    chain,
                    llm_text: None,
                })
            }
            NodeKind::Scenario(data) => {
                match self.graph.group_entry(&node.id) {
                    Some(entry) => {
                        debug!(group = %node.id, name = data.name.as_deref().unwrap_or(""), entry = %entry.id, "entering group");
                        Ok(Step::Jump {
                            node_id: entry.id.clone(),
                        })
                    }
                    // Empty group: fall through to its outgoing edge.
                    None => Ok(Step::advance()),
                }
            }
        }
    }

    async fn execute_message(
        &self,
        node: &Node,
        data: &MessageData,
        chain: Option<u64>,
    ) -> Result<Step, EngineError> {
        let slots = self.slots().await;
        let packet = NodePacket::new(node.id.clone(), interpolate(&data.text, &slots));

        if let Some(id) = chain {
            // Bubble into the already-open entry.
            let entry = {
                let mut state = self.state.write().await;
                if state.history.push_packet(id, packet.clone()) {
                    state.history.entry(id).cloned()
                } else {
                    None
                }
            };
            if let Some(entry) = entry {
                self.emit(&EngineEvent::HistoryUpdated { entry });
            }
            if data.chain_next {
                return Ok(Step::Continue {
                    handle: None,
                    chain: Some(id),
                    llm_text: None,
                });
            }
            self.close_chain(Some(id)).await;
            return Ok(Step::advance());
        }

        let (id, entry) = {
            let mut state = self.state.write().await;
            let id = state.history.append_bot(node.id.clone(), packet, data.chain_next);
            (id, state.history.entry(id).cloned())
        };
        if let Some(entry) = entry {
            self.emit(&EngineEvent::HistoryAppended { entry });
        }
        Ok(Step::Continue {
            handle: None,
            chain: data.chain_next.then_some(id),
            llm_text: None,
        })
    }

    async fn execute_iframe(&self, node: &Node, data: &IframeData) -> Result<Step, EngineError> {
        let slots = self.slots().await;
        let packet = NodePacket::new(node.id.clone(), interpolate(&data.url, &slots));
        let entry = {
            let mut state = self.state.write().await;
            let id = state.history.append_bot(node.id.clone(), packet, false);
            state.history.entry(id).cloned()
        };
        if let Some(entry) = entry {
            self.emit(&EngineEvent::HistoryAppended { entry });
        }
        Ok(Step::advance())
    }

    async fn execute_slotfilling(
        &self,
        node: &Node,
        data: &SlotfillingData,
    ) -> Result<Step, EngineError> {
        let slots = self.slots().await;
        let packet = NodePacket::new(node.id.clone(), interpolate(&data.text, &slots))
            .with_replies(data.replies.clone());
        let entry = {
            let mut state = self.state.write().await;
            let id = state.history.append_bot(node.id.clone(), packet, true);
            state.awaiting = Some(Awaiting {
                node_id: node.id.clone(),
                kind: AwaitingKind::SlotFilling {
                    slot: data.slot.clone(),
                    entry_id: id,
                },
            });
            state.history.entry(id).cloned()
        };
        if let Some(entry) = entry {
            self.emit(&EngineEvent::HistoryAppended { entry });
        }
        self.emit(&EngineEvent::Suspended {
            node_id: node.id.clone(),
        });
        Ok(Step::Suspend)
    }

    async fn execute_form(&self, node: &Node, data: &FormData) -> Result<Step, EngineError> {
        let (entry, slots) = {
            let mut state = self.state.write().await;
            // Seed declared defaults so templates and conditions can see them
            // before submission.
            let defaults = default_slot_updates(&data.elements, state.slots.get());
            if !defaults.is_empty() {
                state.slots.merge(defaults);
            }
            let packet = NodePacket::new(node.id.clone(), String::new());
            let id = state.history.append_bot(node.id.clone(), packet, true);
            state.awaiting = Some(Awaiting {
                node_id: node.id.clone(),
                kind: AwaitingKind::Form { entry_id: id },
            });
            (state.history.entry(id).cloned(), state.slots.snapshot())
        };
        self.emit(&EngineEvent::SlotsChanged { slots });
        if let Some(entry) = entry {
            self.emit(&EngineEvent::HistoryAppended { entry });
        }
        self.emit(&EngineEvent::Suspended {
            node_id: node.id.clone(),
        });
        Ok(Step::Suspend)
    }

    async fn execute_branch(&self, node: &Node, data: &BranchData) -> Result<Step, EngineError> {
        match data.mode {
            // Edge selection happens in traversal, where the conditions are
            // evaluated against current slots.
            BranchMode::Condition => Ok(Step::advance()),
            BranchMode::Button => {
                let slots = self.slots().await;
                let packet = NodePacket::new(node.id.clone(), interpolate(&data.text, &slots))
                    .with_replies(data.replies.clone());
                let entry = {
                    let mut state = self.state.write().await;
                    let id = state.history.append_bot(node.id.clone(), packet, true);
                    state.awaiting = Some(Awaiting {
                        node_id: node.id.clone(),
                        kind: AwaitingKind::BranchButtons { entry_id: id },
                    });
                    state.history.entry(id).cloned()
                };
                if let Some(entry) = entry {
                    self.emit(&EngineEvent::HistoryAppended { entry });
                }
                self.emit(&EngineEvent::Suspended {
                    node_id: node.id.clone(),
                });
                Ok(Step::Suspend)
            }
        }
    }

    async fn execute_link(&self, node: &Node, data: &LinkData) -> Result<Step, EngineError> {
        let slots = self.slots().await;
        let url = interpolate(&data.content, &slots);
        let label = if data.display.is_empty() {
            url.clone()
        } else {
            interpolate(&data.display, &slots)
        };
        let packet = NodePacket::new(node.id.clone(), label.clone());
        let entry = {
            let mut state = self.state.write().await;
            let id = state.history.append_bot(node.id.clone(), packet, false);
            state.history.entry(id).cloned()
        };
        if let Some(entry) = entry {
            self.emit(&EngineEvent::HistoryAppended { entry });
        }
        self.emit(&EngineEvent::LinkOpened { url, label });
        Ok(Step::advance())
    }

    async fn execute_fixed_menu(
        &self,
        node: &Node,
        data: &FixedMenuData,
    ) -> Result<Step, EngineError> {
        {
            let mut state = self.state.write().await;
            state.history.clear();
            state.fixed_menu = data.replies.clone();
            state.fixed_menu_node = Some(node.id.clone());
            state.awaiting = None;
        }
        self.emit(&EngineEvent::MenuChanged {
            replies: data.replies.clone(),
        });
        self.emit(&EngineEvent::Suspended {
            node_id: node.id.clone(),
        });
        Ok(Step::Suspend)
    }

    async fn execute_set_slot(&self, data: &SetSlotData) -> Result<Step, EngineError> {
        let slots = {
            let mut state = self.state.write().await;
            // Sequential: later assignments see earlier ones.
            for assignment in &data.assignments {
                if assignment.key.is_empty() {
                    continue;
                }
                let value = coerce_assignment(&assignment.value, state.slots.get());
                state.slots.assign(assignment.key.clone(), value);
            }
            state.slots.snapshot()
        };
        self.emit(&EngineEvent::SlotsChanged { slots });
        Ok(Step::advance())
    }

    async fn execute_api(
        &self,
        run: u64,
        node: &Node,
        data: &ApiData,
    ) -> Result<Step, EngineError> {
        let slots = self.slots().await;
        let loading_id = {
            let mut state = self.state.write().await;
            let id = state.history.append_loading(node.id.clone());
            let entry = state.history.entry(id).cloned();
            drop(state);
            if let Some(entry) = entry {
                self.emit(&EngineEvent::HistoryAppended { entry });
            }
            id
        };

        let selected: Vec<&ApiCall> = if data.is_multi {
            data.calls.iter().collect()
        } else {
            data.calls.iter().take(1).collect()
        };

        let mut failures: Vec<String> = Vec::new();
        let mut in_flight = FuturesUnordered::new();
        for call in selected {
            match prepare_call(call, &slots) {
                Ok(request) => {
                    let http = Arc::clone(&self.http);
                    let mappings = call.response_mapping.clone();
                    in_flight.push(async move { (mappings, http.fetch(request).await) });
                }
                Err(failure) => {
                    warn!(node = %node.id, %failure, "api call template invalid");
                    self.notifier.alert(&failure.to_string());
                    failures.push(failure.to_string());
                }
            }
        }

        // All-settled semantics: every call reports before routing.
        let mut succeeded = 0usize;
        while let Some((mappings, outcome)) = in_flight.next().await {
            if !self.is_current(run) {
                return Ok(Step::Abandon);
            }
            match outcome {
                Ok(response) if response.is_success() => {
                    match mapped_updates(&mappings, &response) {
                        Ok(updates) => {
                            if !updates.is_empty() {
                                let slots = {
                                    let mut state = self.state.write().await;
                                    state.slots.merge(updates);
                                    state.slots.snapshot()
                                };
                                self.emit(&EngineEvent::SlotsChanged { slots });
                            }
                            succeeded += 1;
                        }
                        Err(failure) => failures.push(failure),
                    }
                }
                Ok(response) => failures.push(format!(
                    "HTTP {}: {}",
                    response.status,
                    truncate(&response.body)
                )),
                Err(err) => failures.push(err.to_string()),
            }
        }

        let success = failures.is_empty();
        let text = if success {
            if succeeded > 1 {
                format!("{succeeded} requests completed")
            } else {
                "Request completed".to_string()
            }
        } else {
            failures.join("; ")
        };

        let entry = {
            let mut state = self.state.write().await;
            if let Some(entry) = state.history.entry_mut(loading_id) {
                entry.role = crate::history::EntryRole::Bot;
                entry.packets.push(NodePacket::new(node.id.clone(), text));
                entry.is_completed = true;
            }
            state.history.entry(loading_id).cloned()
        };
        if let Some(entry) = entry {
            self.emit(&EngineEvent::HistoryUpdated { entry });
        }

        let handle = if success { "onSuccess" } else { "onError" };
        Ok(Step::Continue {
            handle: Some(handle.to_string()),
            chain: None,
            llm_text: None,
        })
    }

    async fn execute_llm(&self, run: u64, node: &Node, data: &LlmData) -> Result<Step, EngineError> {
        let slots = self.slots().await;
        let prompt = interpolate(&data.prompt, &slots);
        let (entry_id, entry) = {
            let mut state = self.state.write().await;
            let id = state.history.append_streaming(node.id.clone());
            (id, state.history.entry(id).cloned())
        };
        if let Some(entry) = entry {
            self.emit(&EngineEvent::HistoryAppended { entry });
        }

        let mut accumulated = String::new();
        match self.llm.stream_prompt(&prompt).await {
            Ok(mut stream) => {
                while let Some(chunk) = stream.next().await {
                    if !self.is_current(run) {
                        debug!(node = %node.id, "dropping stale llm chunk");
                        return Ok(Step::Abandon);
                    }
                    match chunk {
                        Ok(text) => {
                            accumulated.push_str(&text);
                            let entry = {
                                let mut state = self.state.write().await;
                                if state.history.append_stream_chunk(entry_id, &text) {
                                    state.history.entry(entry_id).cloned()
                                } else {
                                    None
                                }
                            };
                            if let Some(entry) = entry {
                                self.emit(&EngineEvent::HistoryUpdated { entry });
                            }
                        }
                        Err(err) => {
                            warn!(node = %node.id, %err, "llm stream failed");
                            accumulated = format!("Error: {err}");
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(node = %node.id, %err, "llm request failed");
                accumulated = format!("Error: {err}");
            }
        }

        if !self.is_current(run) {
            return Ok(Step::Abandon);
        }

        let (entry, slots_changed) = {
            let mut state = self.state.write().await;
            if let Some(entry) = state.history.entry_mut(entry_id) {
                entry.content = accumulated.clone();
                entry.is_streaming = false;
                entry.is_completed = true;
            }
            let slots_changed = match data.output_var.as_deref().filter(|var| !var.is_empty()) {
                Some(var) => {
                    state
                        .slots
                        .assign(var.to_string(), Value::String(accumulated.clone()));
                    Some(state.slots.snapshot())
                }
                None => None,
            };
            (state.history.entry(entry_id).cloned(), slots_changed)
        };
        if let Some(entry) = entry {
            self.emit(&EngineEvent::HistoryUpdated { entry });
        }
        if let Some(slots) = slots_changed {
            self.emit(&EngineEvent::SlotsChanged { slots });
        }

        Ok(Step::Continue {
            handle: None,
            chain: None,
            llm_text: Some(accumulated),
        })
    }
}

/// Render one API call template into a concrete request. URL and headers
/// use display interpolation; the body goes through the type-preserving
/// form so numeric and structured slots splice as JSON.
fn prepare_call(call: &ApiCall, slots: &Slots) -> Result<HttpCallRequest, EngineError> {
    let url = interpolate(&call.url, slots);

    let mut headers = Vec::new();
    if let Some(template) = call.headers.as_deref().filter(|t| !t.trim().is_empty()) {
        let rendered = interpolate(template, slots);
        let parsed: Value = serde_json::from_str(&rendered)
            .map_err(|err| EngineError::Config(format!("invalid header template: {err}")))?;
        let object = parsed
            .as_object()
            .ok_or_else(|| EngineError::Config("header template must be a JSON object".into()))?;
        for (name, value) in object {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            headers.push((name.clone(), value));
        }
    }

    let body = match call.body.as_deref().filter(|t| !t.trim().is_empty()) {
        Some(template) => Some(interpolate_request(template, slots)?),
        None => None,
    };

    Ok(HttpCallRequest {
        method: if call.method.is_empty() {
            "GET".to_string()
        } else {
            call.method.clone()
        },
        url,
        headers,
        body,
    })
}

/// Extract mapped slots from a successful response. Paths that resolve to
/// nothing are skipped rather than failed.
fn mapped_updates(
    mappings: &[ResponseMapping],
    response: &HttpCallResponse,
) -> Result<Slots, String> {
    if mappings.is_empty() {
        return Ok(Slots::new());
    }
    let json = response
        .json()
        .map_err(|err| format!("invalid JSON response: {err}"))?;
    let mut updates = Slots::new();
    for mapping in mappings {
        if let Some(value) = get_nested_value(&json, &mapping.json_path) {
            updates.insert(mapping.slot.clone(), value.clone());
        }
    }
    Ok(updates)
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn slots_with(pairs: &[(&str, Value)]) -> Slots {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn prepare_call_interpolates_url_and_headers() {
        let call = ApiCall {
            method: "POST".into(),
            url: "https://api.example.com/users/{userId}".into(),
            headers: Some(r#"{"Authorization": "Bearer {token}"}"#.into()),
            body: Some(r#"{"age": {{age}}}"#.into()),
            response_mapping: Vec::new(),
        };
        let slots = slots_with(&[
            ("userId", json!("u-77")),
            ("token", json!("abc")),
            ("age", json!(41)),
        ]);

        let request = prepare_call(&call, &slots).unwrap();
        assert_eq!(request.url, "https://api.example.com/users/u-77");
        assert_eq!(
            request.headers,
            vec![("Authorization".to_string(), "Bearer abc".to_string())]
        );
        let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"age": 41}));
    }

    #[test]
    fn prepare_call_rejects_non_object_headers() {
        let call = ApiCall {
            method: "GET".into(),
            url: "https://api.example.com".into(),
            headers: Some(r#"["not", "an", "object"]"#.into()),
            body: None,
            response_mapping: Vec::new(),
        };
        assert!(matches!(
            prepare_call(&call, &Slots::new()),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn prepare_call_defaults_method_to_get() {
        let call = ApiCall {
            url: "https://api.example.com".into(),
            ..ApiCall::default()
        };
        let request = prepare_call(&call, &Slots::new()).unwrap();
        assert_eq!(request.method, "GET");
    }

    #[test]
    fn mapped_updates_skips_missing_paths() {
        let mappings = vec![
            ResponseMapping {
                json_path: "data.name".into(),
                slot: "name".into(),
            },
            ResponseMapping {
                json_path: "data.missing".into(),
                slot: "nope".into(),
            },
        ];
        let response = HttpCallResponse {
            status: 200,
            body: r#"{"data": {"name": "Ada"}}"#.into(),
        };
        let updates = mapped_updates(&mappings, &response).unwrap();
        assert_eq!(updates.get("name"), Some(&json!("Ada")));
        assert!(!updates.contains_key("nope"));
    }

    #[test]
    fn mapped_updates_reports_invalid_json() {
        let mappings = vec![ResponseMapping {
            json_path: "x".into(),
            slot: "x".into(),
        }];
        let response = HttpCallResponse {
            status: 200,
            body: "not json".into(),
        };
        assert!(mapped_updates(&mappings, &response).is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let body = "é".repeat(300);
        let truncated = truncate(&body);
        assert!(truncated.ends_with('…'));
        assert!(truncated.chars().count() < 300);
    }
}
