//! botflow: an execution engine for editor-authored chatbot scenarios.
//!
//! A scenario is a directed graph of typed nodes (messages, slot prompts,
//! branches, API calls, streaming LLM prompts, delays, grouped subflows)
//! joined by handle-labelled edges. The [`Simulator`] walks that graph as a
//! stateful conversation: it renders slot templates, suspends at interactive
//! nodes until input arrives, fans API calls out concurrently, streams model
//! output chunk by chunk, and reports everything to the host through
//! [`EngineEvent`]s.
//!
//! ```no_run
//! use botflow::{ScenarioDocument, ScenarioGraph, Simulator};
//!
//! # async fn demo(json: &str) -> Result<(), botflow::EngineError> {
//! let document = ScenarioDocument::from_json_str(json)?;
//! let sim = Simulator::new(ScenarioGraph::new(document))?;
//! sim.start_simulation(None).await?;
//! if sim.is_suspended().await {
//!     sim.submit_text("Seoul").await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod condition;
pub mod error;
pub mod events;
pub mod graph;
pub mod history;
pub mod http;
pub mod interpolate;
pub mod llm;
pub mod notify;
pub mod sim;
pub mod slots;
pub mod store;
pub mod validate;

pub use error::EngineError;
pub use events::{EngineEvent, EventCallback};
pub use graph::{Edge, Node, NodeKind, QuickReply, ScenarioDocument, ScenarioGraph};
pub use history::{ConversationHistory, EntryRole, HistoryEntry, NodePacket};
pub use http::{HttpCallRequest, HttpCallResponse, HttpFetcher, ReqwestFetcher};
pub use llm::{HttpLlmClient, LlmClient, PromptStream};
pub use notify::{Notifier, ToastLevel, TracingNotifier};
pub use sim::{EngineConfig, Simulator};
pub use slots::{SlotStore, Slots};
pub use store::{GraphStore, InMemoryGraphStore};
pub use validate::{validate_form, FormError};
