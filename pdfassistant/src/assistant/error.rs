use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid table name: {0}")]
    InvalidTableName(String),

    #[error("lock error: {0}")]
    Lock(String),
}

#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read pdf {name}: {source}")]
    Pdf {
        name: String,
        #[source]
        source: lopdf::Error,
    },

    #[error("no text found in document: {0}")]
    EmptyDocument(String),

    #[error("vector store error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("assistant has no usable method (tried run, respond, ask)")]
    NoUsableMethod,

    #[error("assistant does not support {0}")]
    Unsupported(&'static str),

    #[error("model request failed: {0}")]
    Model(String),

    #[error("knowledge base error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<reqwest::Error> for AssistantError {
    fn from(err: reqwest::Error) -> Self {
        AssistantError::Model(err.to_string())
    }
}
