use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("remote error (status {status}): {body}")]
    Remote { status: u16, body: String },

    #[error("unknown node: {0}")]
    NodeNotFound(String),

    #[error("no start node could be resolved")]
    NoStartNode,

    #[error("no interactive node is awaiting {0}")]
    NotSuspended(&'static str),

    #[error("stream error: {0}")]
    Stream(String),
}
