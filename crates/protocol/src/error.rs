//! Typed error taxonomy for the robot protocol (spec §7).
//!
//! These variants are the only errors that cross the WebSocket or the
//! master RPC surface; everything else is wrapped into one of them at the
//! boundary before it gets that far.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The robot sent a malformed or unsupported frame. Reported back as a
    /// text error frame on the same WebSocket; the session continues.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// `receivedFromClient` referenced an interface tag not present in the
    /// session's registry.
    #[error("unknown interface: {0}")]
    UnknownInterface(String),

    /// Authentication failed. Deliberately generic: it must never reveal
    /// which half of the credential (identity vs. key) was wrong.
    #[error("unauthorized login")]
    UnauthorizedLogin,

    /// The master asked to create an already-existing session or interface
    /// tag.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The master RPC channel is gone; the session is marked for
    /// destruction on the next turn.
    #[error("dead connection")]
    DeadConnection,

    /// The distributor was asked for a gateway while its registered set was
    /// empty.
    #[error("no free process")]
    NoFreeProcess,
}

pub type Result<T> = std::result::Result<T, Error>;
