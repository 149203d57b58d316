#[cfg(feature = "server")]
use axum::{Json, http::StatusCode, response::IntoResponse};
#[cfg(feature = "server")]
use serde::Serialize;
use thiserror::Error;

use crate::playback::state_machine::InvalidTransition;

/// Failures talking to the authoritative server over HTTP or the push stream.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build HTTP client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// A request could not be sent or the connection dropped mid-flight.
    #[error("failed to send request to `{path}`")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// The server answered with a non-success status.
    #[error("unexpected response status {status} for `{path}`")]
    RequestStatus {
        path: String,
        status: reqwest::StatusCode,
    },
    /// Response payload could not be parsed into JSON.
    #[error("failed to decode response for `{path}`")]
    DecodeResponse {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// The push stream failed while reading.
    #[error("state stream interrupted")]
    Stream {
        #[source]
        source: reqwest::Error,
    },
    /// The push stream was closed by the server.
    #[error("state stream closed by server")]
    StreamClosed,
    /// A pushed message was not a valid snapshot.
    #[error("malformed snapshot payload")]
    MalformedSnapshot {
        #[source]
        source: serde_json::Error,
    },
}

/// Failures reported by an audio device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    /// The platform refused to start playback without a user gesture.
    #[error("playback blocked until the user interacts")]
    AutoplayBlocked,
    /// The source could not be loaded or decoded.
    #[error("failed to load `{url}`: {message}")]
    Load {
        url: String,
        message: String,
    },
    /// Playback failed for another reason.
    #[error("playback failed: {0}")]
    Playback(String),
    /// No source has been loaded on the device.
    #[error("no source loaded")]
    NoSource,
}

impl MediaError {
    /// Whether the failure only needs a user gesture before retrying the same operation.
    pub fn is_autoplay_block(&self) -> bool {
        matches!(self, MediaError::AutoplayBlocked)
    }
}

/// Local rejections of user input; never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The number lies outside the playable range.
    #[error("number {value} is outside 0..=99")]
    OutOfRange { value: i64 },
    /// The number is already waiting in the queue.
    #[error("number {0:02} is already queued")]
    AlreadyQueued(u8),
    /// The number was already called in this game.
    #[error("number {0:02} has already been called")]
    AlreadyCalled(u8),
    /// No number remains to pick at random.
    #[error("every number has been called or queued")]
    Exhausted,
    /// No queue entry exists at the requested position.
    #[error("no queued number at position {0}")]
    NoSuchEntry(usize),
    /// The queue only exists on the caller client.
    #[error("the pending queue is only available to the caller")]
    QueueUnavailable,
    /// Input could not be parsed as a number.
    #[error("`{0}` is not a number")]
    NotANumber(String),
    /// The action is reserved to the caller client.
    #[error("only the caller may {0}")]
    CallerOnly(&'static str),
    /// A clip path is not playable.
    #[error("`{0}` is not a valid clip path")]
    InvalidClip(String),
}

/// Failures of the durable key/value store backing the pending queue.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing file could not be read or written.
    #[error("storage I/O failed for `{path}`")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// Stored content was not valid JSON.
    #[error("stored data under `{key}` is corrupt")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A reconciliation step failed; logged at the engine boundary.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A playback controller rejected a transition.
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
    /// The device refused an operation.
    #[error(transparent)]
    Media(#[from] MediaError),
}

/// Failures returned to callers of the engine handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine task has stopped.
    #[error("sync engine is not running")]
    Closed,
    /// The request was refused locally.
    #[error(transparent)]
    Rejected(#[from] ValidationError),
}

/// Errors that can occur in service layer operations.
#[cfg(feature = "server")]
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Application-level errors that are converted to HTTP responses.
#[cfg(feature = "server")]
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
}

#[cfg(feature = "server")]
impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
        }
    }
}

#[cfg(feature = "server")]
#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

#[cfg(feature = "server")]
impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
