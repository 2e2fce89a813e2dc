//! Error kinds surfaced by the store, the sync engine and the connection
//! loop. Kept as a hand-rolled enum rather than a generic boxed error so
//! callers can match on what actually went wrong.

use std::fmt;

pub type CResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Operation attempted against a transaction that has already
    /// committed, rolled back, or whose store closed underneath it.
    TransactionClosed,

    /// Operation attempted against a closed store.
    StoreClosed,

    /// `mutate()` called with a name that was never `register()`ed.
    UnknownMutator(String),

    /// A scan named an index that does not exist (or was dropped).
    UnknownIndex(String),

    /// `create_index` called with a name already in use.
    IndexExists(String),

    /// A JSON Pointer string itself was malformed (not: "didn't match this row").
    InvalidPointer(String),

    /// Push or pull returned a non-2xx, non-401 HTTP status.
    HttpError(u16, String),

    /// Push or pull returned HTTP 401 and no fresh credential was available.
    Unauthorized,

    /// The reauthentication callback was invoked more than the per-cycle limit.
    ReauthLimit,

    /// A pull/push response could not be parsed into the expected shape.
    ProtocolError(String),

    /// A registered mutator returned an error while applying a write.
    MutatorFailed(String),

    /// Wraps the underlying backend's I/O failures.
    Io(std::io::Error),

    /// Wraps JSON (de)serialization failures.
    Json(serde_json::Error),

    /// Wraps the HTTP client's transport failures.
    Transport(String),

    /// Catch-all for conditions the spec leaves undefined (e.g. a pull
    /// response whose lastMutationID regresses relative to the local
    /// snapshot).
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TransactionClosed => write!(f, "transaction closed"),
            Error::StoreClosed => write!(f, "store closed"),
            Error::UnknownMutator(name) => write!(f, "unknown mutator: {name}"),
            Error::UnknownIndex(name) => write!(f, "unknown index: {name}"),
            Error::IndexExists(name) => write!(f, "index already exists: {name}"),
            Error::InvalidPointer(ptr) => write!(f, "invalid json pointer: {ptr}"),
            Error::HttpError(status, body) => write!(f, "http error {status}: {body}"),
            Error::Unauthorized => write!(f, "unauthorized"),
            Error::ReauthLimit => write!(f, "Tried to reauthenticate too many times"),
            Error::ProtocolError(msg) => write!(f, "protocol error: {msg}"),
            Error::MutatorFailed(msg) => write!(f, "mutator failed: {msg}"),
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Json(err) => write!(f, "json error: {err}"),
            Error::Transport(msg) => write!(f, "transport error: {msg}"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}
