use clap::{Args, Parser};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{
    HarnessConfig, PeerCommand, Timings, BUYER_MESSAGE, BUYER_PUBLIC_KEY, SELLER_MESSAGE,
    SELLER_PUBLIC_KEY,
};
use crate::role::{Role, RoleConfig};
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "mesh-harness",
    about = "Drive a seller and a buyer peer through a scripted message exchange",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub peer: PeerArgs,

    #[command(flatten)]
    pub seller: SellerArgs,

    #[command(flatten)]
    pub buyer: BuyerArgs,

    #[command(flatten)]
    pub timings: TimingArgs,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[arg(
        long = "ws-host",
        env = "MESH_HARNESS_WS_HOST",
        default_value = "localhost",
        help = "Host the peers' WebSocket servers listen on"
    )]
    pub ws_host: String,

    #[arg(
        long = "ready-signal",
        value_name = "TEXT",
        env = "MESH_HARNESS_READY_SIGNALS",
        value_delimiter = ',',
        default_values = ["WebSocket server started", "listening"],
        help = "Stdout substring that marks a peer as ready (repeatable)"
    )]
    pub ready_signals: Vec<String>,

    #[arg(
        long = "no-reclaim-ports",
        env = "MESH_HARNESS_NO_RECLAIM_PORTS",
        help = "Skip killing leftover processes bound to the role ports during cleanup"
    )]
    pub no_reclaim_ports: bool,

    #[arg(
        long = "strict-replies",
        env = "MESH_HARNESS_STRICT_REPLIES",
        help = "Fail a step when the peer answers with an error reply"
    )]
    pub strict_replies: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PeerArgs {
    #[arg(
        long = "peer-program",
        value_name = "PROGRAM",
        env = "MESH_HARNESS_PEER_PROGRAM",
        default_value = "go",
        help = "Executable that starts a peer"
    )]
    pub program: String,

    #[arg(
        long = "peer-arg",
        value_name = "ARG",
        allow_hyphen_values = true,
        default_values = ["run", "."],
        help = "Argument placed before the role flags (repeatable)"
    )]
    pub args: Vec<String>,

    #[arg(
        long = "peer-dir",
        value_name = "DIR",
        env = "MESH_HARNESS_PEER_DIR",
        help = "Working directory for the peer processes"
    )]
    pub working_dir: Option<PathBuf>,

    #[arg(
        long = "no-local-address",
        help = "Do not pass --use-local-address to the peers"
    )]
    pub no_local_address: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SellerArgs {
    #[arg(id = "seller_p2p_port", long = "seller-port", env = "MESH_HARNESS_SELLER_PORT", default_value_t = 1354)]
    pub p2p_port: u16,

    #[arg(id = "seller_ws_port", long = "seller-ws-port", env = "MESH_HARNESS_SELLER_WS_PORT", default_value_t = 3001)]
    pub ws_port: u16,

    #[arg(
        id = "seller_public_key",
        long = "seller-public-key",
        env = "MESH_HARNESS_SELLER_PUBLIC_KEY",
        default_value = SELLER_PUBLIC_KEY
    )]
    pub public_key: String,

    #[arg(id = "seller_env_file", long = "seller-env-file", default_value = ".seller-env")]
    pub env_file: PathBuf,

    #[arg(id = "seller_message", long = "seller-message", default_value = SELLER_MESSAGE)]
    pub message: String,
}

#[derive(Args, Debug, Clone)]
pub struct BuyerArgs {
    #[arg(id = "buyer_p2p_port", long = "buyer-port", env = "MESH_HARNESS_BUYER_PORT", default_value_t = 1355)]
    pub p2p_port: u16,

    #[arg(id = "buyer_ws_port", long = "buyer-ws-port", env = "MESH_HARNESS_BUYER_WS_PORT", default_value_t = 3002)]
    pub ws_port: u16,

    #[arg(
        id = "buyer_public_key",
        long = "buyer-public-key",
        env = "MESH_HARNESS_BUYER_PUBLIC_KEY",
        default_value = BUYER_PUBLIC_KEY
    )]
    pub public_key: String,

    #[arg(id = "buyer_env_file", long = "buyer-env-file", default_value = ".buyer-env")]
    pub env_file: PathBuf,

    #[arg(id = "buyer_message", long = "buyer-message", default_value = BUYER_MESSAGE)]
    pub message: String,

    #[arg(
        long = "sellers-source",
        value_name = "SOURCE",
        default_value = "env",
        help = "Where the buyer reads its seller list from"
    )]
    pub sellers_source: String,
}

/// All durations are given in (fractional) seconds.
#[derive(Args, Debug, Clone)]
pub struct TimingArgs {
    #[arg(long = "ready-timeout", value_name = "SECS", value_parser = parse_secs, default_value = "5")]
    pub ready_fallback: Duration,

    #[arg(long = "post-launch-settle", value_name = "SECS", value_parser = parse_secs, default_value = "3")]
    pub post_launch_settle: Duration,

    #[arg(long = "mesh-settle", value_name = "SECS", value_parser = parse_secs, default_value = "10")]
    pub mesh_settle: Duration,

    #[arg(long = "message-settle", value_name = "SECS", value_parser = parse_secs, default_value = "3")]
    pub message_settle: Duration,

    #[arg(long = "connect-timeout", value_name = "SECS", value_parser = parse_secs, default_value = "10")]
    pub connect_timeout: Duration,

    #[arg(long = "response-timeout", value_name = "SECS", value_parser = parse_secs, default_value = "10")]
    pub response_timeout: Duration,

    #[arg(long = "exit-grace", value_name = "SECS", value_parser = parse_secs, default_value = "2")]
    pub exit_grace: Duration,

    #[arg(long = "termination-grace", value_name = "SECS", value_parser = parse_secs, default_value = "3")]
    pub termination_grace: Duration,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "MESH_HARNESS_LOG_LEVEL",
        default_value_t = LogLevel::Info,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "MESH_HARNESS_LOG_FILE",
        help = "Write logs to the specified file instead of stdout"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

fn parse_secs(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("'{raw}' is not a number of seconds"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("'{raw}' must be a non-negative number of seconds"));
    }
    Ok(Duration::from_secs_f64(secs))
}

impl Cli {
    pub fn to_config(&self) -> HarnessConfig {
        let use_local_address = !self.peer.no_local_address;
        HarnessConfig {
            peer: PeerCommand {
                program: self.peer.program.clone(),
                args: self.peer.args.clone(),
                working_dir: self.peer.working_dir.clone(),
            },
            seller: RoleConfig {
                role: Role::Seller,
                p2p_port: self.seller.p2p_port,
                ws_port: self.seller.ws_port,
                public_key: self.seller.public_key.clone(),
                env_file: self.seller.env_file.clone(),
                use_local_address,
                sellers_source: None,
            },
            buyer: RoleConfig {
                role: Role::Buyer,
                p2p_port: self.buyer.p2p_port,
                ws_port: self.buyer.ws_port,
                public_key: self.buyer.public_key.clone(),
                env_file: self.buyer.env_file.clone(),
                use_local_address,
                sellers_source: Some(self.buyer.sellers_source.clone()),
            },
            ws_host: self.ws_host.clone(),
            seller_message: self.seller.message.clone(),
            buyer_message: self.buyer.message.clone(),
            readiness_signals: self.ready_signals.clone(),
            timings: Timings {
                ready_fallback: self.timings.ready_fallback,
                post_launch_settle: self.timings.post_launch_settle,
                mesh_settle: self.timings.mesh_settle,
                message_settle: self.timings.message_settle,
                connect_timeout: self.timings.connect_timeout,
                response_timeout: self.timings.response_timeout,
                exit_grace: self.timings.exit_grace,
                termination_grace: self.timings.termination_grace,
            },
            reclaim_ports: !self.no_reclaim_ports,
            strict_replies: self.strict_replies,
        }
    }
}
