use thiserror::Error;

/// A property of a live host object could not be read.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("{0} is missing")]
    Missing(String),
    #[error("{what} refers to something that no longer exists: {target}")]
    Dangling { what: String, target: String },
    #[error("host refused to read {what}: {reason}")]
    Host { what: String, reason: String },
}

impl ReadError {
    pub fn host(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Host {
            what: what.into(),
            reason: reason.into(),
        }
    }
}

/// Outcome of a handler thread waiting on a queued task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("timed out waiting for the host thread")]
    Timeout,
    #[error("task failed on the host thread: {0}")]
    TaskFailed(String),
    #[error("task queue was shut down before the task ran")]
    Disconnected,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("cannot bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error("config: {0}")]
    Config(String),
}
