//! Wire protocol between a robot and its gateway: frame shapes, the binary
//! URI-placeholder convention, the interface type-code table, and the typed
//! error taxonomy reported back to robots or raised to the master.

pub mod error;
pub mod frame;
pub mod interface;
pub mod uri;

pub use {
    error::{Error, Result},
    frame::{ClientFrame, FrameType},
    interface::InterfaceTypeCode,
    uri::{OutboundBlob, ParkedSlot, Payload, UriWalker},
};

/// Length in bytes (and ASCII-hex characters) of a binary URI placeholder.
pub const URI_LEN: usize = 32;

/// Default age after which a parked partial message is evicted, in seconds.
pub const DEFAULT_MSG_QUEUE_TIMEOUT_SECS: u64 = 60;

/// Default grace window after a WebSocket drops before the session is
/// destroyed, in seconds.
pub const DEFAULT_RECONNECT_TIMEOUT_SECS: u64 = 10;
