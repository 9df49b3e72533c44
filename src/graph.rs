//! Scenario document model and the indexed graph view the interpreter runs
//! against.
//!
//! The wire shape mirrors what the editor persists: nodes carry a `type`
//! discriminator plus a `data` payload, edges reference nodes by id with an
//! optional `sourceHandle` naming one of the source's outputs.

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::condition::ConditionOperator;
use crate::error::EngineError;
use crate::notify::ToastLevel;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub position: Position,
    /// Set for members of a scenario-group subgraph.
    #[serde(default, rename = "parentId", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(flatten)]
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum NodeKind {
    Start(StartData),
    Message(MessageData),
    Slotfilling(SlotfillingData),
    Form(FormData),
    Branch(BranchData),
    Api(ApiData),
    Llm(LlmData),
    Link(LinkData),
    Toast(ToastData),
    Iframe(IframeData),
    Fixedmenu(FixedMenuData),
    #[serde(rename = "setSlot")]
    SetSlot(SetSlotData),
    Delay(DelayData),
    Scenario(ScenarioData),
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Start(_) => "start",
            NodeKind::Message(_) => "message",
            NodeKind::Slotfilling(_) => "slotfilling",
            NodeKind::Form(_) => "form",
            NodeKind::Branch(_) => "branch",
            NodeKind::Api(_) => "api",
            NodeKind::Llm(_) => "llm",
            NodeKind::Link(_) => "link",
            NodeKind::Toast(_) => "toast",
            NodeKind::Iframe(_) => "iframe",
            NodeKind::Fixedmenu(_) => "fixedmenu",
            NodeKind::SetSlot(_) => "setSlot",
            NodeKind::Delay(_) => "delay",
            NodeKind::Scenario(_) => "scenario",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct StartData {}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct QuickReply {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct MessageData {
    #[serde(default)]
    pub text: String,
    /// Bubble the next node's output into this node's history entry.
    #[serde(default, rename = "chainNext")]
    pub chain_next: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct SlotfillingData {
    #[serde(default)]
    pub text: String,
    /// Slot that receives the user's answer.
    #[serde(default)]
    pub slot: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<QuickReply>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct FormData {
    #[serde(default)]
    pub elements: Vec<FormElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FormElement {
    #[serde(rename = "type")]
    pub kind: FormElementKind,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub slot: String,
    #[serde(default, rename = "defaultValue", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<InputValidation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<DateRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FormElementKind {
    Input,
    Date,
    Checkbox,
    Dropbox,
    Grid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputValidation {
    Email,
    Phone,
    Custom { pattern: String },
}

/// Day-granular date bounds; each side is either a literal `YYYY-MM-DD`
/// date or the keyword `today`, both inclusive.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum BranchMode {
    Button,
    Condition,
}

impl Default for BranchMode {
    fn default() -> Self {
        BranchMode::Button
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BranchCondition {
    pub slot: String,
    #[serde(default)]
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct BranchData {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub mode: BranchMode,
    /// CONDITION mode: evaluated in order, index-paired with `replies`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<BranchCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<QuickReply>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResponseMapping {
    /// Dot-separated path into the response JSON.
    #[serde(rename = "jsonPath")]
    pub json_path: String,
    /// Slot that receives the extracted value.
    pub slot: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ApiCall {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    /// JSON object of header name/value pairs, display-interpolated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<String>,
    /// JSON body template, type-preserving interpolation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, rename = "responseMapping", skip_serializing_if = "Vec::is_empty")]
    pub response_mapping: Vec<ResponseMapping>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ApiData {
    /// Run every configured call concurrently; otherwise only the first.
    #[serde(default, rename = "isMulti")]
    pub is_multi: bool,
    #[serde(default)]
    pub calls: Vec<ApiCall>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LlmCondition {
    /// Edge handle selected when the keyword matches.
    pub id: String,
    #[serde(default)]
    pub keyword: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct LlmData {
    #[serde(default)]
    pub prompt: String,
    /// Slot that captures the accumulated output.
    #[serde(default, rename = "outputVar", skip_serializing_if = "Option::is_none")]
    pub output_var: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<LlmCondition>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct LinkData {
    /// URL template.
    #[serde(default)]
    pub content: String,
    /// Label template.
    #[serde(default)]
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ToastData {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "toastType")]
    pub toast_type: ToastLevel,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct IframeData {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct FixedMenuData {
    #[serde(default)]
    pub replies: Vec<QuickReply>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SlotAssignment {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct SetSlotData {
    #[serde(default)]
    pub assignments: Vec<SlotAssignment>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct DelayData {
    /// Milliseconds to wait before proceeding.
    #[serde(default)]
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ScenarioData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, rename = "sourceHandle", skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

/// The persistence exchange shape: what a backend returns on load and
/// accepts verbatim on save.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ScenarioDocument {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default, rename = "startNodeId", skip_serializing_if = "Option::is_none")]
    pub start_node_id: Option<String>,
}

impl ScenarioDocument {
    pub fn from_json_str(input: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn to_json_string(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Indexed, immutable-per-turn view of a scenario document.
///
/// Edges are scanned in document order; when several edges share a
/// `(source, handle)` pair the first structurally-found one wins. The editor
/// does not enforce uniqueness, so this is a documented tie-break, not a
/// guarantee of authoring intent.
#[derive(Debug, Clone)]
pub struct ScenarioGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    node_index: HashMap<String, usize>,
    start_node_id: Option<String>,
}

impl ScenarioGraph {
    pub fn new(document: ScenarioDocument) -> Self {
        let node_index = document
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (node.id.clone(), index))
            .collect();
        Self {
            nodes: document.nodes,
            edges: document.edges,
            node_index,
            start_node_id: document.start_node_id,
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_index.get(id).map(|&index| &self.nodes[index])
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Outgoing edges in document order. Owns a copy of the key so the
    /// iterator borrows the graph alone.
    pub fn edges_from(&self, source: &str) -> impl Iterator<Item = &Edge> + '_ {
        let source = source.to_string();
        self.edges.iter().filter(move |edge| edge.source == source)
    }

    /// First edge matching `(source, handle)` in document order.
    pub fn edge_with_handle(&self, source: &str, handle: &str) -> Option<&Edge> {
        self.edges
            .iter()
            .find(|edge| edge.source == source && edge.source_handle.as_deref() == Some(handle))
    }

    /// Fallback edge: a `default`-handled edge first, then a handle-less one.
    pub fn default_edge(&self, source: &str) -> Option<&Edge> {
        self.edge_with_handle(source, "default").or_else(|| {
            self.edges
                .iter()
                .find(|edge| edge.source == source && edge.source_handle.is_none())
        })
    }

    pub fn has_incoming(&self, id: &str) -> bool {
        self.edges.iter().any(|edge| edge.target == id)
    }

    pub fn children(&self, group_id: &str) -> impl Iterator<Item = &Node> + '_ {
        let group_id = group_id.to_string();
        self.nodes
            .iter()
            .filter(move |node| node.parent_id.as_deref() == Some(group_id.as_str()))
    }

    /// Internal start node of a scenario group: the member with no incoming
    /// edge from another member of the same group.
    pub fn group_entry(&self, group_id: &str) -> Option<&Node> {
        self.children(group_id).find(|member| {
            !self.edges.iter().any(|edge| {
                edge.target == member.id
                    && self
                        .node(&edge.source)
                        .map(|source| source.parent_id.as_deref() == Some(group_id))
                        .unwrap_or(false)
            })
        })
    }

    /// Resolve the simulation entry point: explicit id, then the document's
    /// configured start node, then a `start`-typed node, then the node with
    /// no incoming edges.
    pub fn resolve_start(&self, explicit: Option<&str>) -> Option<&Node> {
        if let Some(id) = explicit {
            return self.node(id);
        }
        if let Some(id) = &self.start_node_id {
            if let Some(node) = self.node(id) {
                return Some(node);
            }
        }
        if let Some(node) = self
            .nodes
            .iter()
            .find(|node| matches!(node.kind, NodeKind::Start(_)))
        {
            return Some(node);
        }
        self.nodes
            .iter()
            .find(|node| node.parent_id.is_none() && !self.has_incoming(&node.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            position: Position::default(),
            parent_id: None,
            kind: NodeKind::Message(MessageData::default()),
        }
    }

    fn edge(id: &str, source: &str, target: &str, handle: Option<&str>) -> Edge {
        Edge {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            source_handle: handle.map(str::to_string),
        }
    }

    #[test]
    fn document_round_trips() {
        let json = r#"{
            "nodes": [
                {"id": "n1", "type": "start", "data": {}},
                {"id": "n2", "type": "message", "data": {"text": "hi {name}", "chainNext": true}},
                {"id": "n3", "type": "setSlot", "data": {"assignments": [{"key": "a", "value": "1"}]}}
            ],
            "edges": [
                {"id": "e1", "source": "n1", "target": "n2"},
                {"id": "e2", "source": "n2", "target": "n3", "sourceHandle": "default"}
            ],
            "startNodeId": "n1"
        }"#;
        let document = ScenarioDocument::from_json_str(json).unwrap();
        assert_eq!(document.nodes.len(), 3);
        assert!(matches!(document.nodes[0].kind, NodeKind::Start(_)));
        match &document.nodes[1].kind {
            NodeKind::Message(data) => {
                assert_eq!(data.text, "hi {name}");
                assert!(data.chain_next);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        assert!(matches!(document.nodes[2].kind, NodeKind::SetSlot(_)));

        let serialized = document.to_json_string().unwrap();
        let reparsed = ScenarioDocument::from_json_str(&serialized).unwrap();
        assert_eq!(document, reparsed);
    }

    #[test]
    fn edge_lookups_outlive_the_query_key() {
        let graph = ScenarioGraph::new(ScenarioDocument {
            nodes: vec![message_node("a"), message_node("b"), message_node("c")],
            edges: vec![
                edge("e1", "a", "b", Some("yes")),
                edge("e2", "a", "c", None),
            ],
            start_node_id: None,
        });
        // Results borrow the graph, not the key they were looked up with.
        let (handled, fallback, outgoing) = {
            let key = String::from("a");
            (
                graph.edge_with_handle(&key, "yes"),
                graph.default_edge(&key),
                graph.edges_from(&key).collect::<Vec<_>>(),
            )
        };
        assert_eq!(handled.unwrap().target, "b");
        assert_eq!(fallback.unwrap().target, "c");
        assert_eq!(outgoing.len(), 2);

        let members = {
            let key = String::from("missing-group");
            graph.children(&key).count()
        };
        assert_eq!(members, 0);
    }

    #[test]
    fn first_edge_wins_on_duplicate_handles() {
        let graph = ScenarioGraph::new(ScenarioDocument {
            nodes: vec![message_node("a"), message_node("b"), message_node("c")],
            edges: vec![
                edge("e1", "a", "b", Some("yes")),
                edge("e2", "a", "c", Some("yes")),
            ],
            start_node_id: None,
        });
        assert_eq!(graph.edge_with_handle("a", "yes").unwrap().target, "b");
    }

    #[test]
    fn default_edge_prefers_named_default() {
        let graph = ScenarioGraph::new(ScenarioDocument {
            nodes: vec![message_node("a"), message_node("b"), message_node("c")],
            edges: vec![
                edge("e1", "a", "b", None),
                edge("e2", "a", "c", Some("default")),
            ],
            start_node_id: None,
        });
        assert_eq!(graph.default_edge("a").unwrap().target, "c");
    }

    #[test]
    fn group_entry_ignores_edges_from_outside_the_group() {
        let mut inner_a = message_node("inner_a");
        inner_a.parent_id = Some("group".to_string());
        let mut inner_b = message_node("inner_b");
        inner_b.parent_id = Some("group".to_string());
        let group = Node {
            id: "group".to_string(),
            position: Position::default(),
            parent_id: None,
            kind: NodeKind::Scenario(ScenarioData::default()),
        };
        let graph = ScenarioGraph::new(ScenarioDocument {
            nodes: vec![message_node("outside"), group, inner_a, inner_b],
            edges: vec![
                edge("e1", "outside", "inner_a", None),
                edge("e2", "inner_a", "inner_b", None),
            ],
            start_node_id: None,
        });
        assert_eq!(graph.group_entry("group").unwrap().id, "inner_a");
    }

    #[test]
    fn start_resolution_order() {
        let start = Node {
            id: "s".to_string(),
            position: Position::default(),
            parent_id: None,
            kind: NodeKind::Start(StartData::default()),
        };
        let graph = ScenarioGraph::new(ScenarioDocument {
            nodes: vec![message_node("m"), start],
            edges: vec![],
            start_node_id: None,
        });
        // Explicit id beats the start-typed node.
        assert_eq!(graph.resolve_start(Some("m")).unwrap().id, "m");
        assert_eq!(graph.resolve_start(None).unwrap().id, "s");

        // Without a start-typed node, the edge-less node is the entry.
        let graph = ScenarioGraph::new(ScenarioDocument {
            nodes: vec![message_node("a"), message_node("b")],
            edges: vec![edge("e1", "a", "b", None)],
            start_node_id: None,
        });
        assert_eq!(graph.resolve_start(None).unwrap().id, "a");
    }
}
