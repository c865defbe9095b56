//! The distributor itself: a registered set of gateway endpoints and the
//! "pick the least-loaded one" placement rule (spec §4.4), grounded on the
//! original system's master-side `Distributor`, whose `getNextLocation()`
//! is literally `min(gateways, key=lambda g: g.active)`.

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub type GatewayId = String;

/// A registered gateway process as seen by the master: its reachable
/// address and its self-reported live-session count.
#[derive(Debug, Clone)]
pub struct GatewayEndpoint {
    pub id: GatewayId,
    address: String,
    active: u32,
}

impl GatewayEndpoint {
    #[must_use]
    pub fn new(id: impl Into<GatewayId>, address: impl Into<String>) -> Self {
        Self { id: id.into(), address: address.into(), active: 0 }
    }

    /// The reachable network address of this gateway (spec §10.6
    /// `getAddress()`), informational only.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub const fn active(&self) -> u32 {
        self.active
    }
}

/// Master-side registry of gateway processes, used to answer "which
/// gateway should the next robot land on". Holds no sessions itself.
#[derive(Debug, Default)]
pub struct Distributor {
    endpoints: RwLock<Vec<GatewayEndpoint>>,
}

impl Distributor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a gateway process. Registrations must be unique by id.
    pub async fn register(&self, id: impl Into<GatewayId>, address: impl Into<String>) -> Result<()> {
        let id = id.into();
        let mut endpoints = self.endpoints.write().await;
        if endpoints.iter().any(|e| e.id == id) {
            return Err(Error::AlreadyRegistered(id));
        }
        info!(gateway = %id, "registered gateway process");
        endpoints.push(GatewayEndpoint::new(id, address));
        Ok(())
    }

    pub async fn unregister(&self, id: &str) -> Result<()> {
        let mut endpoints = self.endpoints.write().await;
        let before = endpoints.len();
        endpoints.retain(|e| e.id != id);
        if endpoints.len() == before {
            return Err(Error::NotRegistered(id.to_string()));
        }
        info!(gateway = %id, "unregistered gateway process");
        Ok(())
    }

    /// Sets a gateway's advertised `active` count. Called whenever a
    /// gateway's live session count changes.
    pub async fn set_active(&self, id: &str, active: u32) -> Result<()> {
        let mut endpoints = self.endpoints.write().await;
        let endpoint = endpoints
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::NotRegistered(id.to_string()))?;
        endpoint.active = active;
        Ok(())
    }

    /// Returns the id of the endpoint with the smallest `active` count.
    /// Ties are broken by earliest registration (first match wins, which
    /// is what `Iterator::min_by_key` already guarantees).
    pub async fn get_next_location(&self) -> Result<GatewayId> {
        let endpoints = self.endpoints.read().await;
        let chosen = endpoints
            .iter()
            .min_by_key(|e| e.active)
            .map(|e| e.id.clone());
        match chosen {
            Some(id) => {
                debug!(gateway = %id, "selected least-loaded gateway");
                Ok(id)
            },
            None => {
                warn!("no gateway process registered");
                Err(Error::NoFreeProcess)
            },
        }
    }

    /// The reachable address of a registered gateway (spec §10.6
    /// `getAddress()`).
    pub async fn address_of(&self, id: &str) -> Result<String> {
        let endpoints = self.endpoints.read().await;
        endpoints
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.address().to_string())
            .ok_or_else(|| Error::NotRegistered(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn picks_least_loaded() {
        let d = Distributor::new();
        d.register("gw-a", "10.0.0.1:9010").await.expect("register a");
        d.register("gw-b", "10.0.0.2:9010").await.expect("register b");
        d.set_active("gw-a", 5).await.expect("set active a");
        d.set_active("gw-b", 2).await.expect("set active b");
        assert_eq!(d.get_next_location().await.expect("location"), "gw-b");
    }

    #[tokio::test]
    async fn ties_break_by_earliest_registration() {
        let d = Distributor::new();
        d.register("first", "a").await.expect("register first");
        d.register("second", "b").await.expect("register second");
        assert_eq!(d.get_next_location().await.expect("location"), "first");
    }

    #[tokio::test]
    async fn empty_set_is_no_free_process() {
        let d = Distributor::new();
        assert_eq!(d.get_next_location().await, Err(Error::NoFreeProcess));
    }

    #[tokio::test]
    async fn duplicate_registration_is_conflict() {
        let d = Distributor::new();
        d.register("gw", "addr").await.expect("first register");
        assert_eq!(
            d.register("gw", "addr2").await,
            Err(Error::AlreadyRegistered("gw".to_string()))
        );
    }

    #[tokio::test]
    async fn unregister_removes_from_selection() {
        let d = Distributor::new();
        d.register("only", "addr").await.expect("register");
        d.unregister("only").await.expect("unregister");
        assert_eq!(d.get_next_location().await, Err(Error::NoFreeProcess));
    }
}
