use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::role::{Role, RoleConfig};

pub const SELLER_PUBLIC_KEY: &str =
    "0278b309d9b02ade112cdda215cd79da90916c940359cce783ae0b1779135f85ae";
pub const BUYER_PUBLIC_KEY: &str =
    "02c7370bf416ee6e9f9a430a12869c456d93db6b7392a9f90d0db8981190f47153";
pub const SELLER_MESSAGE: &str = "Hello from seller to buyer - automated test message";
pub const BUYER_MESSAGE: &str = "Hello from buyer to seller - automated response message";
pub const READINESS_SIGNALS: [&str; 2] = ["WebSocket server started", "listening"];

/// How the peer application is started; role flags are appended to `args`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Default for PeerCommand {
    fn default() -> Self {
        Self {
            program: "go".to_string(),
            args: vec!["run".to_string(), ".".to_string()],
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// After this long without a readiness line a live process is assumed ready.
    pub ready_fallback: Duration,
    pub post_launch_settle: Duration,
    /// Time given to the peers to discover each other.
    pub mesh_settle: Duration,
    pub message_settle: Duration,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    /// Pause before the process exits so buffered log output is flushed.
    pub exit_grace: Duration,
    /// How long a peer may take to exit after SIGTERM before it is killed.
    pub termination_grace: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            ready_fallback: Duration::from_secs(5),
            post_launch_settle: Duration::from_secs(3),
            mesh_settle: Duration::from_secs(10),
            message_settle: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(10),
            exit_grace: Duration::from_secs(2),
            termination_grace: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub peer: PeerCommand,
    pub seller: RoleConfig,
    pub buyer: RoleConfig,
    pub ws_host: String,
    pub seller_message: String,
    pub buyer_message: String,
    pub readiness_signals: Vec<String>,
    pub timings: Timings,
    /// Kill leftover processes bound to the role ports during cleanup.
    pub reclaim_ports: bool,
    /// Fail a step when the peer answers with an error reply.
    pub strict_replies: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            peer: PeerCommand::default(),
            seller: RoleConfig {
                role: Role::Seller,
                p2p_port: 1354,
                ws_port: 3001,
                public_key: SELLER_PUBLIC_KEY.to_string(),
                env_file: PathBuf::from(".seller-env"),
                use_local_address: true,
                sellers_source: None,
            },
            buyer: RoleConfig {
                role: Role::Buyer,
                p2p_port: 1355,
                ws_port: 3002,
                public_key: BUYER_PUBLIC_KEY.to_string(),
                env_file: PathBuf::from(".buyer-env"),
                use_local_address: true,
                sellers_source: Some("env".to_string()),
            },
            ws_host: "localhost".to_string(),
            seller_message: SELLER_MESSAGE.to_string(),
            buyer_message: BUYER_MESSAGE.to_string(),
            readiness_signals: READINESS_SIGNALS.iter().map(|s| s.to_string()).collect(),
            timings: Timings::default(),
            reclaim_ports: true,
            strict_replies: false,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("port {port} is assigned more than once")]
    DuplicatePort { port: u16 },
    #[error("port 0 is not a usable {what} port for the {role}")]
    ZeroPort { role: Role, what: &'static str },
    #[error("{role} public key is empty")]
    MissingPublicKey { role: Role },
    #[error("peer program is empty")]
    MissingProgram,
}

impl HarnessConfig {
    pub fn role(&self, role: Role) -> &RoleConfig {
        match role {
            Role::Seller => &self.seller,
            Role::Buyer => &self.buyer,
        }
    }

    /// The text `role` sends to its counterpart.
    pub fn message_from(&self, role: Role) -> &str {
        match role {
            Role::Seller => &self.seller_message,
            Role::Buyer => &self.buyer_message,
        }
    }

    pub fn known_ports(&self) -> Vec<u16> {
        let mut ports = Vec::with_capacity(4);
        ports.extend(self.seller.ports());
        ports.extend(self.buyer.ports());
        ports
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peer.program.trim().is_empty() {
            return Err(ConfigError::MissingProgram);
        }
        for role in [&self.seller, &self.buyer] {
            if role.p2p_port == 0 {
                return Err(ConfigError::ZeroPort { role: role.role, what: "p2p" });
            }
            if role.ws_port == 0 {
                return Err(ConfigError::ZeroPort { role: role.role, what: "websocket" });
            }
            if role.public_key.trim().is_empty() {
                return Err(ConfigError::MissingPublicKey { role: role.role });
            }
        }
        let mut seen = HashSet::new();
        for port in self.known_ports() {
            if !seen.insert(port) {
                return Err(ConfigError::DuplicatePort { port });
            }
        }
        Ok(())
    }
}
