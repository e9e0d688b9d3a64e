pub mod cli;
pub mod config;
pub mod error;
pub mod process;
pub mod role;
pub mod scenario;
pub mod session;
pub mod telemetry;
