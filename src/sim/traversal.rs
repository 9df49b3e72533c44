//! Edge selection: given a just-executed node and an optional outgoing
//! handle, pick the next edge.
//!
//! Resolution priority: llm keyword override, branch CONDITION override,
//! explicit handle, `default` handle, handle-less edge, then one bubble-up
//! retry through the enclosing scenario group. The anchor early-exit rule
//! lives in the session, since it is session state rather than graph
//! structure.

use crate::condition::evaluate;
use crate::graph::{BranchMode, Edge, Node, NodeKind, ScenarioGraph};
use crate::slots::Slots;

/// Resolve the outgoing edge for `source`. `llm_text` carries the
/// accumulated output of an llm node so its keyword conditions can pick the
/// edge. Returns `None` when traversal dead-ends (a defined terminal state,
/// not an error).
pub fn resolve_next<'g>(
    graph: &'g ScenarioGraph,
    source: &Node,
    handle: Option<&str>,
    slots: &Slots,
    llm_text: Option<&str>,
) -> Option<&'g Edge> {
    // llm keyword override: first matching condition id, else "default".
    if let (NodeKind::Llm(data), Some(text)) = (&source.kind, llm_text) {
        let lowered = text.to_lowercase();
        let selected = data
            .conditions
            .iter()
            .find(|condition| {
                !condition.keyword.is_empty()
                    && lowered.contains(&condition.keyword.to_lowercase())
            })
            .map(|condition| condition.id.as_str())
            .unwrap_or("default");
        if let Some(edge) = graph.edge_with_handle(&source.id, selected) {
            return Some(edge);
        }
    }

    // branch CONDITION override: first true condition selects the
    // index-paired reply value as the handle.
    if let NodeKind::Branch(data) = &source.kind {
        if data.mode == BranchMode::Condition {
            for (index, condition) in data.conditions.iter().enumerate() {
                if evaluate(slots.get(&condition.slot), condition.operator, &condition.value) {
                    if let Some(reply) = data.replies.get(index) {
                        if let Some(edge) = graph.edge_with_handle(&source.id, &reply.value) {
                            return Some(edge);
                        }
                    }
                    // Matched but no edge: fall through to default lookup.
                    break;
                }
            }
        }
    }

    if let Some(handle) = handle {
        if let Some(edge) = graph.edge_with_handle(&source.id, handle) {
            return Some(edge);
        }
    }

    if let Some(edge) = graph.default_edge(&source.id) {
        return Some(edge);
    }

    // Group member with no outgoing edge: the group's own exit edge stands
    // in for "falls off the end of the subgraph".
    if let Some(parent_id) = &source.parent_id {
        if let Some(parent) = graph.node(parent_id) {
            return resolve_next(graph, parent, handle, slots, None);
        }
    }

    None
}
