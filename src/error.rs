//! Errors raised by the basecall client.
//!
//! Everything fatal is surfaced to the caller of connect / basecall / batch calls.
//! A NONE_PENDING reply is not an error, it is represented as `Ok(None)` by the polling functions.

use std::io;

use thiserror::Error;

/// crate wide result
pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// peer speaks another major version of the ipc protocol
    #[error("server ipc major version {got} does not match client ipc major version {expected}, cannot decode message")]
    ProtocolMismatch { got: u32, expected: u32 },

    /// buffer could not be decoded as an envelope
    #[error("could not decode message: {0}")]
    Decode(String),

    /// transport reported not ready on every attempt
    #[error("transport unavailable after {attempts} attempts")]
    TransportUnavailable { attempts: usize },

    #[error("transport error: {0}")]
    Transport(String),

    /// server says the config does not exist
    #[error("'{0}' could not be loaded by the server")]
    InvalidConfig(String),

    #[error("failed to load config '{config}' after {attempts} attempts")]
    ConfigTimeout { config: String, attempts: usize },

    #[error("connect with '{config}' failed after {attempts} attempts")]
    Connection { config: String, attempts: usize },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("bad reply: {0}")]
    BadReply(String),

    /// server answered with a content we did not expect for this request
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// read submission or polling on a session that is not connected
    #[error("session with config '{0}' is not connected")]
    NotConnected(String),

    #[error("basecall response not received after {elapsed_ms} ms for read '{read_id}'")]
    BasecallTimeout { read_id: String, elapsed_ms: u128 },

    #[error("no files found to basecall")]
    EmptyBatch,

    #[error("worker {worker} failed: {msg}")]
    Worker { worker: usize, msg: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ClientError {
    /// true for failures that may go away if the same exchange is tried again later.
    /// Used by session connect to decide what to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::TransportUnavailable { .. })
    }
} // end of impl ClientError

impl From<xdr_codec::Error> for ClientError {
    fn from(e: xdr_codec::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}

// end of mod tests
