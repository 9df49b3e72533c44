//! Persistence collaborator: supplies the initial scenario document and
//! accepts it back verbatim for save. Only the contract matters to the
//! engine; concrete backends decide the format.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::EngineError;
use crate::graph::ScenarioDocument;

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn load(&self) -> Result<ScenarioDocument, EngineError>;

    async fn save(&self, document: &ScenarioDocument) -> Result<(), EngineError>;
}

#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    document: RwLock<ScenarioDocument>,
}

impl InMemoryGraphStore {
    pub fn new(document: ScenarioDocument) -> Self {
        Self {
            document: RwLock::new(document),
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn load(&self) -> Result<ScenarioDocument, EngineError> {
        Ok(self.document.read().await.clone())
    }

    async fn save(&self, document: &ScenarioDocument) -> Result<(), EngineError> {
        *self.document.write().await = document.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{GraphStore, InMemoryGraphStore};
    use crate::graph::{Edge, ScenarioDocument};

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryGraphStore::default();
        let document = ScenarioDocument {
            nodes: vec![],
            edges: vec![Edge {
                id: "e1".to_string(),
                source: "a".to_string(),
                target: "b".to_string(),
                source_handle: None,
            }],
            start_node_id: Some("a".to_string()),
        };
        store.save(&document).await.unwrap();
        assert_eq!(store.load().await.unwrap(), document);
    }
}
