//! Master-side gateway registry and load-aware placement (spec §4.4).
//!
//! The distributor tracks every registered gateway endpoint's advertised
//! `active` session count and hands out the least-loaded one on request. It
//! never holds a robot session itself — it is purely a placement oracle.

pub mod error;
pub mod registry;

pub use {
    error::{Error, Result},
    registry::{Distributor, GatewayEndpoint, GatewayId},
};
