#![forbid(unsafe_code)]

//! `shellwire`: remote command execution over JSON-RPC/WebSocket.

pub mod config;
pub mod errors;
pub mod hooks;
pub mod models;
pub mod orchestrator;
pub mod process;
pub mod rpc;
pub mod stream;
pub mod timing;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use rpc::server::ExecServer;
