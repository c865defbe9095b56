//! Per-robot interface registry and the interface handle contract.
//!
//! The actual converter/forwarder implementations are out of scope (spec
//! §1): the gateway only instantiates them by type code and hands messages
//! in and out. [`StubInterface`] is the minimal handle that satisfies that
//! contract so the rest of the session machinery has something concrete to
//! drive and destroy.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use corvid_protocol::{InterfaceTypeCode, Payload, Result};
use tokio::sync::mpsc;
use tracing::debug;

/// One message handed from the robot, through its session, into an
/// interface.
#[derive(Debug, Clone)]
pub struct InboundDelivery {
    pub interface_tag: String,
    pub class_name: String,
    pub msg_id: String,
    pub payload: Payload,
}

/// The capability every declared interface exposes to its owning session:
/// accept a message routed to it from the robot.
#[async_trait]
pub trait Interface: Send + Sync {
    fn type_code(&self) -> InterfaceTypeCode;

    async fn receive(&self, class_name: &str, msg_id: &str, payload: Payload) -> Result<()>;

    /// `ConfigureInterfaceState`'s `activateInterface` / `deactivateInterface`
    /// (spec §4.1). Default no-op for handles that don't track activity.
    fn set_active(&self, _active: bool) {}

    fn is_active(&self) -> bool {
        true
    }
}

/// A minimal interface handle that forwards every delivery onto a channel
/// instead of a real converter/forwarder, since those are out of scope.
/// Good enough for the gateway to exercise `createInterface` /
/// `removeInterface` / teardown ordering end to end.
pub struct StubInterface {
    type_code: InterfaceTypeCode,
    tag: String,
    class_name: String,
    out: mpsc::UnboundedSender<InboundDelivery>,
    active: AtomicBool,
}

impl StubInterface {
    #[must_use]
    pub fn new(
        type_code: InterfaceTypeCode,
        tag: impl Into<String>,
        class_name: impl Into<String>,
        out: mpsc::UnboundedSender<InboundDelivery>,
    ) -> Self {
        Self { type_code, tag: tag.into(), class_name: class_name.into(), out, active: AtomicBool::new(true) }
    }
}

#[async_trait]
impl Interface for StubInterface {
    fn type_code(&self) -> InterfaceTypeCode {
        self.type_code
    }

    async fn receive(&self, class_name: &str, msg_id: &str, payload: Payload) -> Result<()> {
        debug!(tag = %self.tag, class_name, msg_id, "interface received message");
        let class_name = if class_name.is_empty() { self.class_name.clone() } else { class_name.to_string() };
        let _ = self.out.send(InboundDelivery {
            interface_tag: self.tag.clone(),
            class_name,
            msg_id: msg_id.to_string(),
            payload,
        });
        Ok(())
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

/// Instantiates an interface from its fixed type code (spec §9, §10.6).
pub struct InterfaceFactory;

impl InterfaceFactory {
    #[must_use]
    pub fn create(
        type_code: InterfaceTypeCode,
        tag: &str,
        class_name: &str,
        out: mpsc::UnboundedSender<InboundDelivery>,
    ) -> Box<dyn Interface> {
        Box::new(StubInterface::new(type_code, tag, class_name, out))
    }
}

/// Per-session interface registry: tag → handle, insertion-ordered so
/// destruction can walk entries in declaration order (spec §4.2 `destroy`).
#[derive(Default)]
pub struct InterfaceRegistry {
    entries: Vec<(String, Box<dyn Interface>)>,
}

impl InterfaceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new interface under `tag`. `Err` (duplicate tag) leaves the
    /// registry untouched — the caller reports `Conflict`.
    pub fn insert(&mut self, tag: String, handle: Box<dyn Interface>) -> std::result::Result<(), ()> {
        if self.entries.iter().any(|(t, _)| *t == tag) {
            return Err(());
        }
        self.entries.push((tag, handle));
        Ok(())
    }

    pub fn remove(&mut self, tag: &str) -> Option<Box<dyn Interface>> {
        let idx = self.entries.iter().position(|(t, _)| t == tag)?;
        Some(self.entries.remove(idx).1)
    }

    #[must_use]
    pub fn get(&self, tag: &str) -> Option<&dyn Interface> {
        self.entries.iter().find(|(t, _)| t == tag).map(|(_, h)| h.as_ref())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drains every entry in declaration order, for teardown.
    pub fn drain_in_order(&mut self) -> Vec<(String, Box<dyn Interface>)> {
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_one() -> (InterfaceRegistry, mpsc::UnboundedReceiver<InboundDelivery>) {
        let mut reg = InterfaceRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = InterfaceFactory::create(InterfaceTypeCode::PublisherConverter, "i1", "Image", tx);
        reg.insert("i1".to_string(), handle).expect("insert");
        (reg, rx)
    }

    #[test]
    fn duplicate_tag_is_rejected() {
        let (mut reg, _rx) = registry_with_one();
        let (tx, _rx2) = mpsc::unbounded_channel();
        let handle = InterfaceFactory::create(InterfaceTypeCode::PublisherConverter, "i1", "Image", tx);
        assert!(reg.insert("i1".to_string(), handle).is_err());
    }

    #[test]
    fn remove_and_empty_check() {
        let (mut reg, _rx) = registry_with_one();
        assert_eq!(reg.len(), 1);
        assert!(reg.remove("i1").is_some());
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn receive_forwards_to_channel() {
        let (reg, mut rx) = registry_with_one();
        let iface = reg.get("i1").expect("present");
        iface.receive("", "", Payload::Null).await.expect("receive");
        let delivery = rx.recv().await.expect("delivery");
        assert_eq!(delivery.interface_tag, "i1");
        assert_eq!(delivery.class_name, "Image");
    }

    #[test]
    fn set_active_toggles_is_active() {
        let (reg, _rx) = registry_with_one();
        let iface = reg.get("i1").expect("present");
        assert!(iface.is_active());
        iface.set_active(false);
        assert!(!iface.is_active());
    }

    #[test]
    fn drain_preserves_declaration_order() {
        let mut reg = InterfaceRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        reg.insert("a".to_string(), InterfaceFactory::create(InterfaceTypeCode::PublisherConverter, "a", "", tx.clone()))
            .expect("insert a");
        reg.insert("b".to_string(), InterfaceFactory::create(InterfaceTypeCode::PublisherConverter, "b", "", tx))
            .expect("insert b");
        let drained = reg.drain_in_order();
        assert_eq!(drained[0].0, "a");
        assert_eq!(drained[1].0, "b");
    }
}
