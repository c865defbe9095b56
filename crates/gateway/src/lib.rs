//! The robot-facing gateway: WebSocket protocol handling, per-robot session
//! state, the process-wide session registry, and the master-facing RPC
//! channel that drives it all.

pub mod framing;
pub mod gateway;
pub mod interfaces;
pub mod master;
pub mod rpc;
pub mod server;
pub mod session;
pub mod ws;

pub use gateway::Gateway;
pub use session::{ConnectionState, RobotSession};
