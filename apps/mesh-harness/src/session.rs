//! One WebSocket connection to one role channel.
//!
//! The peer protocol carries no request ids, so a reply is simply the first
//! frame received after a request. `request` takes `&mut self`, which keeps a
//! session to a single outstanding request.

use futures_util::{SinkExt, StreamExt};
use harness_proto::{PeerReply, WireMessage};
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::HarnessError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        })
    }
}

/// The first frame received after a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    text: String,
}

impl Reply {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// The reply as a structured peer frame, if it is one.
    pub fn parsed(&self) -> Option<PeerReply> {
        PeerReply::parse(&self.text)
    }
}

enum ReadFailure {
    Closed,
    Transport(tungstenite::Error),
}

pub struct Session {
    url: String,
    state: SessionState,
    stream: Option<WsStream>,
}

impl Session {
    /// Connects to `url`, giving up after `connect_timeout`.
    pub async fn open(url: impl Into<String>, connect_timeout: Duration) -> Result<Self, HarnessError> {
        let url = url.into();
        debug!(%url, state = %SessionState::Connecting, "opening session");

        match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, _response))) => {
                info!(%url, outcome = "success", "connected");
                Ok(Self {
                    url,
                    state: SessionState::Open,
                    stream: Some(stream),
                })
            }
            Ok(Err(err)) => {
                warn!(%url, error = %err, "connection failed");
                Err(HarnessError::Connect {
                    url,
                    source: Box::new(err),
                })
            }
            Err(_) => {
                warn!(%url, timeout = ?connect_timeout, "connection timed out");
                Err(HarnessError::ConnectTimeout {
                    url,
                    timeout: connect_timeout,
                })
            }
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Sends `message` and waits for the next inbound frame.
    ///
    /// A timeout leaves the session open. A reply that arrives late is then
    /// taken as the answer to whatever is sent next.
    pub async fn request(
        &mut self,
        message: &WireMessage,
        response_timeout: Duration,
    ) -> Result<Reply, HarnessError> {
        let payload = message.to_json()?;
        let Some(stream) = self.stream.as_mut().filter(|_| self.state == SessionState::Open) else {
            return Err(HarnessError::SessionNotOpen {
                url: self.url.clone(),
                state: self.state,
            });
        };

        debug!(url = %self.url, kind = %message.kind, "sending request");
        if let Err(err) = stream.send(Message::Text(payload.into())).await {
            return Err(self.fail(err));
        }

        let outcome = tokio::time::timeout(response_timeout, next_reply(stream)).await;
        match outcome {
            Ok(Ok(reply)) => {
                debug!(url = %self.url, reply = reply.text(), "reply received");
                Ok(reply)
            }
            Ok(Err(ReadFailure::Closed)) => {
                self.state = SessionState::Closed;
                self.stream = None;
                Err(HarnessError::ClosedByPeer {
                    url: self.url.clone(),
                })
            }
            Ok(Err(ReadFailure::Transport(err))) => Err(self.fail(err)),
            Err(_) => Err(HarnessError::ResponseTimeout {
                url: self.url.clone(),
                timeout: response_timeout,
            }),
        }
    }

    /// Releases the connection. Later requests fail with `SessionNotOpen`.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if self.state == SessionState::Open {
                match stream.close(None).await {
                    Ok(())
                    | Err(tungstenite::Error::ConnectionClosed)
                    | Err(tungstenite::Error::AlreadyClosed) => {}
                    Err(err) => debug!(url = %self.url, error = %err, "close handshake failed"),
                }
            }
        }
        if !self.state.is_terminal() {
            self.state = SessionState::Closed;
        }
        debug!(url = %self.url, state = %self.state, "session released");
    }

    fn fail(&mut self, err: tungstenite::Error) -> HarnessError {
        warn!(url = %self.url, error = %err, "session failed");
        self.state = SessionState::Failed;
        self.stream = None;
        HarnessError::Transport {
            url: self.url.clone(),
            source: Box::new(err),
        }
    }
}

async fn next_reply(stream: &mut WsStream) -> Result<Reply, ReadFailure> {
    while let Some(frame) = stream.next().await {
        match frame.map_err(ReadFailure::Transport)? {
            Message::Text(text) => {
                return Ok(Reply {
                    text: text.as_str().to_owned(),
                })
            }
            Message::Binary(bytes) => {
                return Ok(Reply {
                    text: String::from_utf8_lossy(&bytes).into_owned(),
                })
            }
            Message::Close(frame) => {
                debug!(?frame, "peer sent close frame");
                return Err(ReadFailure::Closed);
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        }
    }
    Err(ReadFailure::Closed)
}
