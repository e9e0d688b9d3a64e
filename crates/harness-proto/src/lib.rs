//! Wire definitions for the peer application's WebSocket channels.
//! Kept in a dedicated crate so other tooling can speak the same
//! control-plane format without pulling in the harness runtime.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Request kinds the harness sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "showCurrentPeers")]
    ShowCurrentPeers,
    #[serde(rename = "p2p")]
    P2p,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::ShowCurrentPeers => "showCurrentPeers",
            MessageType::P2p => "p2p",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound request frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub data: String,
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    #[serde(rename = "publicKey", default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

impl WireMessage {
    pub fn show_current_peers() -> Self {
        Self {
            kind: MessageType::ShowCurrentPeers,
            data: String::new(),
            timestamp: now_millis(),
            public_key: None,
        }
    }

    /// A peer-to-peer message addressed to `recipient` (hex public key).
    pub fn p2p(text: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            kind: MessageType::P2p,
            data: text.into(),
            timestamp: now_millis(),
            public_key: Some(recipient.into()),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Reply frame as emitted by the peer application.
///
/// Replies are application defined; `data` may be a string or any JSON
/// value, and every field other than `type` may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerReply {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(rename = "publicKey", default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PeerReply {
    /// Lenient parse: anything that is not a JSON object with a `type`
    /// field yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// Whether the peer flagged this reply as a rejection.
    pub fn is_error(&self) -> bool {
        self.kind == "error" || self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
