#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use mesh_harness::config::{HarnessConfig, PeerCommand, Timings};
use mesh_harness::role::{Role, RoleConfig};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// How a [`FakePeer`] answers each request.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Reply the way the real peer does.
    Answer,
    /// Send a ping before every reply.
    PingThenAnswer,
    /// Read requests, never reply.
    Silent,
    /// Reply with the peer's error frame.
    Reject,
    /// Close the connection instead of replying.
    Hangup,
    /// Hold the first reply back for the given time, answer the rest at once.
    SlowFirst(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub path: String,
    pub body: Value,
}

/// In-process stand-in for one role's WebSocket server.
pub struct FakePeer {
    pub port: u16,
    received: Arc<Mutex<Vec<Received>>>,
    task: JoinHandle<()>,
}

impl FakePeer {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake peer");
        let port = listener.local_addr().expect("local addr").port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, behavior, log.clone()));
            }
        });
        Self {
            port,
            received,
            task,
        }
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().expect("received log").clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.received().into_iter().map(|r| r.path).collect()
    }
}

impl Drop for FakePeer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(socket: TcpStream, behavior: Behavior, log: Arc<Mutex<Vec<Received>>>) {
    let path = Arc::new(Mutex::new(String::new()));
    let slot = path.clone();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        *slot.lock().expect("path slot") = req.uri().path().to_string();
        Ok(resp)
    };
    let Ok(mut ws) = accept_hdr_async(socket, callback).await else {
        return;
    };
    let path = path.lock().expect("path").clone();

    let mut seq = 0u64;
    while let Some(Ok(frame)) = ws.next().await {
        let Message::Text(text) = frame else {
            continue;
        };
        let body: Value = serde_json::from_str(text.as_str()).unwrap_or(Value::Null);
        log.lock().expect("received log").push(Received {
            path: path.clone(),
            body: body.clone(),
        });

        let reply = match behavior {
            Behavior::Silent => continue,
            Behavior::Hangup => {
                let _ = ws.send(Message::Close(None)).await;
                return;
            }
            Behavior::Reject => json!({
                "type": "error",
                "data": "Unknown command type",
                "timestamp": 1,
                "error": "UNKNOWN_COMMAND",
            }),
            Behavior::PingThenAnswer => {
                let _ = ws.send(Message::Ping(Vec::new().into())).await;
                answer_for(&body, seq)
            }
            Behavior::SlowFirst(delay) => {
                if seq == 0 {
                    tokio::time::sleep(delay).await;
                }
                answer_for(&body, seq)
            }
            Behavior::Answer => answer_for(&body, seq),
        };
        seq += 1;
        if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
            return;
        }
    }
}

fn answer_for(request: &Value, seq: u64) -> Value {
    match request["type"].as_str() {
        Some("showCurrentPeers") => json!({
            "type": "currentPeers",
            "data": { "peers": ["peer-a"] },
            "timestamp": 1,
            "seq": seq,
        }),
        _ => json!({
            "type": "p2p",
            "data": request["data"].clone(),
            "timestamp": 1,
            "seq": seq,
        }),
    }
}

/// Accepts TCP connections and never completes a WebSocket handshake.
pub async fn black_hole() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind black hole");
    let port = listener.local_addr().expect("local addr").port();
    let task = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    (port, task)
}

/// Runs `script` with `sh -c`; role flags land in `$@`.
pub fn sh_peer(script: &str) -> PeerCommand {
    PeerCommand {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string(), "peer".to_string()],
        working_dir: None,
    }
}

pub fn role_config(role: Role, p2p_port: u16, ws_port: u16) -> RoleConfig {
    RoleConfig {
        role,
        p2p_port,
        ws_port,
        public_key: format!("{role}-key"),
        env_file: PathBuf::from(format!(".{role}-env")),
        use_local_address: true,
        sellers_source: (role == Role::Buyer).then(|| "env".to_string()),
    }
}

pub fn fast_timings() -> Timings {
    Timings {
        ready_fallback: Duration::from_secs(2),
        post_launch_settle: Duration::ZERO,
        mesh_settle: Duration::from_millis(50),
        message_settle: Duration::ZERO,
        connect_timeout: Duration::from_secs(2),
        response_timeout: Duration::from_secs(2),
        exit_grace: Duration::ZERO,
        termination_grace: Duration::from_secs(1),
    }
}

/// Config pointed at local fake peers. The P2P ports are only passed as flags.
pub fn local_config(peer: PeerCommand, seller_ws: u16, buyer_ws: u16) -> HarnessConfig {
    HarnessConfig {
        peer,
        seller: role_config(Role::Seller, 41354, seller_ws),
        buyer: role_config(Role::Buyer, 41355, buyer_ws),
        ws_host: "127.0.0.1".to_string(),
        timings: fast_timings(),
        reclaim_ports: false,
        ..HarnessConfig::default()
    }
}

#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    // SAFETY: signal 0 only checks for existence.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}
