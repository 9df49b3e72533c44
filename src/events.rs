//! Discrete engine events a host UI subscribes to instead of framework
//! reactivity. Emission is synchronous and best-effort; a panicking
//! subscriber never unwinds into the engine.

use std::sync::Arc;

use crate::graph::QuickReply;
use crate::history::HistoryEntry;
use crate::slots::Slots;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    NodeEntered { node_id: String },
    SlotsChanged { slots: Slots },
    HistoryAppended { entry: HistoryEntry },
    HistoryUpdated { entry: HistoryEntry },
    /// Fixed menu replaced (and history reset) by a fixedmenu node.
    MenuChanged { replies: Vec<QuickReply> },
    /// A link node asked the host to open an external URL.
    LinkOpened { url: String, label: String },
    /// Flow is waiting for user input at an interactive node.
    Suspended { node_id: String },
    /// No next node resolved or the anchor was reached.
    Terminated,
}

pub type EventCallback = Arc<dyn Fn(&EngineEvent) + Send + Sync>;
