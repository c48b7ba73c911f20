//! JSON-RPC over WebSocket: wire types, per-connection handling and the
//! HTTP server hosting both the WebSocket route and `/health`.

pub mod connection;
pub mod outbound;
pub mod protocol;
pub mod server;
