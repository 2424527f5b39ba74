use thiserror::Error;

/// Invalid timing or server configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),

    #[error("'{0}' is required")]
    Missing(&'static str),

    #[error("'{name}' is {value}ms, below the minimum of {min}ms")]
    BelowMinimum {
        name: &'static str,
        value: u64,
        min: u64,
    },
}

/// A document path that cannot be mapped onto the content root
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("document path is empty")]
    Empty,

    #[error("document path '{0}' must be relative")]
    Absolute(String),

    #[error("document path '{0}' contains an invalid component")]
    InvalidComponent(String),
}

/// Inbound control message that cannot be routed
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("invalid payload for {kind}: {source}")]
    BadPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("message type {0} is server-to-client only")]
    WrongDirection(&'static str),
}

/// Failure merging into or exporting from the replicated document
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("corrupt update rejected: {0}")]
    Corrupt(String),

    #[error("failed to export document: {0}")]
    Export(String),

    #[error("failed to seed document text: {0}")]
    Seed(String),
}

/// Failure reading or writing a document through the content store
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("document '{0}' is not valid UTF-8")]
    Encoding(String),
}

/// Failure turning the document text into preview HTML
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer failed: {0}")]
    Failed(String),

    #[error("render task panicked: {0}")]
    Panicked(String),
}

/// Failure bringing a document session up
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
