use std::fmt;
use std::path::PathBuf;

/// One of the two participants in the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Seller,
    Buyer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Seller => "seller",
            Role::Buyer => "buyer",
        }
    }

    /// The participant on the other end of a peer-to-peer message.
    pub fn counterpart(self) -> Role {
        match self {
            Role::Seller => Role::Buyer,
            Role::Buyer => Role::Seller,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WebSocket path a role exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Control-plane queries such as peer listings.
    Commands,
    /// Submission of peer-to-peer messages.
    P2p,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Commands => "commands",
            Channel::P2p => "p2p",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleConfig {
    pub role: Role,
    pub p2p_port: u16,
    pub ws_port: u16,
    pub public_key: String,
    pub env_file: PathBuf,
    pub use_local_address: bool,
    /// Where the buyer discovers seller addresses; ignored for sellers.
    pub sellers_source: Option<String>,
}

impl RoleConfig {
    /// Flags appended after the peer command's own leading arguments.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--port={}", self.p2p_port),
            "--mode=peer".to_string(),
            format!("--buyer-or-seller={}", self.role),
        ];
        if self.role == Role::Buyer {
            if let Some(source) = &self.sellers_source {
                args.push(format!("--list-of-sellers-source={source}"));
            }
        }
        args.push(format!("--envFile={}", self.env_file.display()));
        if self.use_local_address {
            args.push("--use-local-address".to_string());
        }
        args.push(format!("--ws-port={}", self.ws_port));
        args
    }

    pub fn endpoint(&self, host: &str, channel: Channel) -> String {
        format!("ws://{host}:{}/{}/{channel}", self.ws_port, self.role)
    }

    pub fn ports(&self) -> [u16; 2] {
        [self.p2p_port, self.ws_port]
    }
}
