//! Process configuration shape (spec §6, §10.3).

use serde::{Deserialize, Serialize};

fn default_master_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_master_port() -> u16 {
    9000
}

const fn default_ext_port() -> u16 {
    9010
}

const fn default_comm_port() -> u16 {
    9020
}

const fn default_msg_queue_timeout_secs() -> u64 {
    corvid_protocol::DEFAULT_MSG_QUEUE_TIMEOUT_SECS
}

const fn default_reconnect_timeout_secs() -> u64 {
    corvid_protocol::DEFAULT_RECONNECT_TIMEOUT_SECS
}

/// The process configuration a gateway is started with. No field is
/// persisted back to disk by the running process; all session state lives
/// in memory only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Host the master coordinator is reachable at.
    #[serde(default = "default_master_host")]
    pub master_host: String,

    /// Port the master coordinator is reachable at.
    #[serde(default = "default_master_port")]
    pub master_port: u16,

    /// Port robots connect to (the client-facing WebSocket).
    #[serde(default = "default_ext_port")]
    pub ext_port: u16,

    /// Port the master-facing RPC channel listens on.
    #[serde(default = "default_comm_port")]
    pub comm_port: u16,

    /// Pre-shared credential material this gateway was configured with
    /// (opaque to the core; used only to seed the auth layer at startup).
    #[serde(default)]
    pub credentials: Option<String>,

    /// Maximum age, in seconds, a parked partial message may reach before
    /// the reassembly sweep evicts it.
    #[serde(default = "default_msg_queue_timeout_secs")]
    pub msg_queue_timeout_secs: u64,

    /// Grace window, in seconds, a robot has to reconnect before its
    /// session is destroyed.
    #[serde(default = "default_reconnect_timeout_secs")]
    pub reconnect_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            master_host: default_master_host(),
            master_port: default_master_port(),
            ext_port: default_ext_port(),
            comm_port: default_comm_port(),
            credentials: None,
            msg_queue_timeout_secs: default_msg_queue_timeout_secs(),
            reconnect_timeout_secs: default_reconnect_timeout_secs(),
        }
    }
}

impl GatewayConfig {
    #[must_use]
    pub fn msg_queue_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.msg_queue_timeout_secs)
    }

    #[must_use]
    pub fn reconnect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reconnect_timeout_secs)
    }
}
