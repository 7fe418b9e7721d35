use thiserror::Error;

/// Unrecoverable failure of one backend stream. Always the last fragment of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("request failed with status code {code}: {body}")]
    Status { code: u16, body: String },

    #[error("could not connect to backend: {0}")]
    Connect(String),

    #[error("backend closed the connection before the stream ended")]
    ConnectionClosed,

    #[error("stream transport error: {0}")]
    Transport(String),

    #[error("could not decode backend response: {0}")]
    Decode(String),

    #[error("API Error: {0}")]
    Api(String),
}

/// A single protocol record that could not be decoded. Logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed backend record: {reason}")]
pub struct MalformedRecord {
    pub reason: String,
}

impl MalformedRecord {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("template '{name}' not found")]
pub struct TemplateNotFound {
    pub name: String,
}

impl TemplateNotFound {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The display surface refused an edit because the text did not change.
    #[error("message text is unchanged")]
    EditConflict,

    #[error("message delivery failed: {0}")]
    Delivery(String),
}

/// Everything that can fail a single turn.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Template(#[from] TemplateNotFound),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
