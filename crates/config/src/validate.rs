//! Config validation: catches bad values at load time rather than deep in
//! the server.

use thiserror::Error;

use crate::schema::GatewayConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("extPort and commPort must differ (both {0})")]
    PortCollision(u16),

    #[error("msgQueueTimeoutSecs must be greater than zero")]
    ZeroMsgQueueTimeout,

    #[error("reconnectTimeoutSecs must be greater than zero")]
    ZeroReconnectTimeout,
}

pub fn validate(config: &GatewayConfig) -> Result<(), ValidationError> {
    if config.ext_port == config.comm_port {
        return Err(ValidationError::PortCollision(config.ext_port));
    }
    if config.msg_queue_timeout_secs == 0 {
        return Err(ValidationError::ZeroMsgQueueTimeout);
    }
    if config.reconnect_timeout_secs == 0 {
        return Err(ValidationError::ZeroReconnectTimeout);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn rejects_port_collision() {
        let mut cfg = GatewayConfig::default();
        cfg.comm_port = cfg.ext_port;
        assert_eq!(validate(&cfg), Err(ValidationError::PortCollision(cfg.ext_port)));
    }

    #[test]
    fn rejects_zero_timeouts() {
        let mut cfg = GatewayConfig::default();
        cfg.msg_queue_timeout_secs = 0;
        assert_eq!(validate(&cfg), Err(ValidationError::ZeroMsgQueueTimeout));
    }
}
