use crate::role::Role;
use crate::session::SessionState;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to spawn {role} peer `{program}`: {source}")]
    Spawn {
        role: Role,
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{role} peer is already running")]
    AlreadyRunning { role: Role },
    #[error("{role} peer is not running")]
    NotRunning { role: Role },
    #[error("{role} peer did not become ready: {reason}")]
    NotReady { role: Role, reason: String },
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<tungstenite::Error>,
    },
    #[error("connection to {url} was not open after {timeout:?}")]
    ConnectTimeout { url: String, timeout: Duration },
    #[error("no reply from {url} within {timeout:?}")]
    ResponseTimeout { url: String, timeout: Duration },
    #[error("transport error on {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: Box<tungstenite::Error>,
    },
    #[error("{url} closed the connection before replying")]
    ClosedByPeer { url: String },
    #[error("session to {url} is {state}, not open")]
    SessionNotOpen { url: String, state: SessionState },
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("peer at {url} rejected the request: {reply}")]
    PeerRejected { url: String, reply: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
