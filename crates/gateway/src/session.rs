//! The per-robot session ("avatar"), spec §3–§4.2.
//!
//! One session exists per authenticated `(userID, robotID)` pair. It is the
//! only place that knows the identity, the bound master user ref, and the
//! interface table; the WebSocket handler and the gateway both act through
//! it rather than touching its internals directly.

use std::{sync::Arc, time::Duration};

use corvid_protocol::{self as protocol, InterfaceTypeCode, Payload};
use subtle::ConstantTimeEq;
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

use crate::{
    framing::{ReassemblyBuffer, prepare_outbound},
    interfaces::{InterfaceFactory, InterfaceRegistry},
    master::{MasterRpcError, MasterUser},
};

/// One outbound WebSocket frame, already encoded. The write-loop task just
/// forwards these onto the socket in order.
#[derive(Debug)]
pub enum OutboundWsMessage {
    Text(String),
    Binary(Vec<u8>),
}

pub type OutboundSink = mpsc::UnboundedSender<OutboundWsMessage>;

/// Connection state machine (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Live,
    Orphaned,
    Destroyed,
}

struct Inner {
    state: ConnectionState,
    interfaces: InterfaceRegistry,
    reassembly: ReassemblyBuffer,
    outbound: Option<OutboundSink>,
    user_ref: Arc<dyn MasterUser>,
}

pub struct RobotSession {
    pub user_id: String,
    pub robot_id: String,
    auth_key: Vec<u8>,
    inner: Mutex<Inner>,
}

impl RobotSession {
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        robot_id: impl Into<String>,
        auth_key: Vec<u8>,
        user_ref: Arc<dyn MasterUser>,
    ) -> Arc<Self> {
        Arc::new(Self {
            user_id: user_id.into(),
            robot_id: robot_id.into(),
            auth_key,
            inner: Mutex::new(Inner {
                state: ConnectionState::Pending,
                interfaces: InterfaceRegistry::new(),
                reassembly: ReassemblyBuffer::new(),
                outbound: None,
                user_ref,
            }),
        })
    }

    /// Constant-time key comparison: never reveals which half of the
    /// credential failed (spec §7 `UnauthorizedLogin`).
    #[must_use]
    pub async fn key_matches(&self, candidate: &[u8]) -> bool {
        self.auth_key.ct_eq(candidate).into()
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    pub async fn interface_count(&self) -> usize {
        self.inner.lock().await.interfaces.len()
    }

    // ── Connection lifecycle hooks (spec §4.2) ──────────────────────────────

    /// Called by the gateway on successful authentication (first connect or
    /// reconnect): transitions to `Live` and attaches the WebSocket outbound
    /// sink.
    pub async fn register_connection_to_robot(&self, outbound: OutboundSink) {
        let mut inner = self.inner.lock().await;
        inner.state = ConnectionState::Live;
        inner.outbound = Some(outbound);
        info!(user_id = %self.user_id, robot_id = %self.robot_id, "session is live");
    }

    /// Called when the WebSocket closes for any reason: transitions to
    /// `Orphaned` and drops the outbound sink (no buffering across
    /// disconnects).
    pub async fn unregister_connection_to_robot(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = ConnectionState::Orphaned;
        inner.outbound = None;
        info!(user_id = %self.user_id, robot_id = %self.robot_id, "session orphaned");
    }

    // ── Operations exposed to the protocol handler (spec §4.2) ──────────────

    pub async fn create_container(&self, container_tag: &str) {
        self.call_master(|u| {
            let tag = container_tag.to_string();
            async move { u.create_container(&tag).await }
        })
        .await;
    }

    pub async fn destroy_container(&self, container_tag: &str) {
        self.call_master(|u| {
            let tag = container_tag.to_string();
            async move { u.destroy_container(&tag).await }
        })
        .await;
    }

    pub async fn add_node(&self, c_tag: &str, n_tag: &str, pkg: &str, exe: &str, namespace: &str) {
        let (c_tag, n_tag, pkg, exe, namespace) = (
            c_tag.to_string(),
            n_tag.to_string(),
            pkg.to_string(),
            exe.to_string(),
            namespace.to_string(),
        );
        self.call_master(|u| async move { u.add_node(&c_tag, &n_tag, &pkg, &exe, &namespace).await })
            .await;
    }

    pub async fn remove_node(&self, c_tag: &str, n_tag: &str) {
        let (c_tag, n_tag) = (c_tag.to_string(), n_tag.to_string());
        self.call_master(|u| async move { u.remove_node(&c_tag, &n_tag).await }).await;
    }

    /// Asks the master to create an interface (spec §4.2 `addInterface`).
    /// This only issues the RPC; the local handle is not instantiated here
    /// — the master calls back into [`Self::create_interface`] once the
    /// interface actually exists on its side.
    pub async fn add_interface(
        &self,
        endpoint_tag: &str,
        interface_tag: &str,
        interface_type: InterfaceTypeCode,
        class_name: &str,
    ) {
        let (endpoint_tag, interface_tag, class_name) =
            (endpoint_tag.to_string(), interface_tag.to_string(), class_name.to_string());
        let type_name = interface_type.to_string();
        self.call_master(|u| async move {
            u.add_interface(&endpoint_tag, &interface_tag, &type_name, &class_name).await
        })
        .await;
    }

    /// `remote_createInterface`: the master's callback once it has actually
    /// created the interface. Instantiates the handle from the fixed type
    /// table and installs it under `interface_tag`. Duplicate tag ⇒
    /// `Conflict` (spec §7).
    pub async fn create_interface(
        &self,
        interface_tag: &str,
        interface_type: InterfaceTypeCode,
        class_name: &str,
    ) -> protocol::Result<()> {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let handle = InterfaceFactory::create(interface_type, interface_tag, class_name, out_tx);
        self.inner
            .lock()
            .await
            .interfaces
            .insert(interface_tag.to_string(), handle)
            .map_err(|()| protocol::Error::Conflict(interface_tag.to_string()))
    }

    pub async fn remove_interface(&self, endpoint_tag: &str, interface_tag: &str) {
        {
            let mut inner = self.inner.lock().await;
            inner.interfaces.remove(interface_tag);
        }
        let (endpoint_tag, interface_tag) = (endpoint_tag.to_string(), interface_tag.to_string());
        self.call_master(|u| async move { u.remove_interface(&endpoint_tag, &interface_tag).await })
            .await;
    }

    pub async fn add_parameter(&self, c_tag: &str, name: &str, value: serde_json::Value) {
        let (c_tag, name) = (c_tag.to_string(), name.to_string());
        self.call_master(|u| async move { u.add_parameter(&c_tag, &name, &value).await }).await;
    }

    pub async fn remove_parameter(&self, c_tag: &str, name: &str) {
        let (c_tag, name) = (c_tag.to_string(), name.to_string());
        self.call_master(|u| async move { u.remove_parameter(&c_tag, &name).await }).await;
    }

    pub async fn add_connection(&self, tag_a: &str, tag_b: &str) {
        let (tag_a, tag_b) = (tag_a.to_string(), tag_b.to_string());
        self.call_master(|u| async move { u.add_connection(&tag_a, &tag_b).await }).await;
    }

    pub async fn remove_connection(&self, tag_a: &str, tag_b: &str) {
        let (tag_a, tag_b) = (tag_a.to_string(), tag_b.to_string());
        self.call_master(|u| async move { u.remove_connection(&tag_a, &tag_b).await }).await;
    }

    /// Locates the interface handle by tag and delegates the message to it.
    /// `UnknownInterface` if the tag is not present (spec §4.2).
    pub async fn received_from_client(
        &self,
        interface_tag: &str,
        class_name: &str,
        msg_id: &str,
        payload: Payload,
    ) -> protocol::Result<()> {
        let inner = self.inner.lock().await;
        let handle = inner
            .interfaces
            .get(interface_tag)
            .ok_or_else(|| protocol::Error::UnknownInterface(interface_tag.to_string()))?;
        handle.receive(class_name, msg_id, payload).await
    }

    /// `ConfigureInterfaceState`: `activateInterface` / `deactivateInterface`
    /// per entry (spec §4.1). Unknown tags are silently ignored — the
    /// master's view of the registry may lag a removal by one frame.
    pub async fn set_interface_active(&self, interface_tag: &str, active: bool) {
        let inner = self.inner.lock().await;
        if let Some(handle) = inner.interfaces.get(interface_tag) {
            handle.set_active(active);
        }
    }

    // ── Callback from an interface into the session (spec §4.2) ────────────

    /// Delivers a message from an interface out to the robot, if currently
    /// `Live`. Silently dropped otherwise — data messages are never
    /// buffered across disconnects.
    pub async fn send_to_client(&self, interface_tag: &str, payload: Payload) {
        let outbound = {
            let inner = self.inner.lock().await;
            if inner.state != ConnectionState::Live {
                return;
            }
            inner.outbound.clone()
        };
        let Some(outbound) = outbound else { return };

        let frame = corvid_protocol::frame::ClientFrame {
            r#type: "DataMessage".to_string(),
            orig: self.robot_id.clone(),
            dest: interface_tag.to_string(),
            data: serde_json::json!({}),
        };
        let (prepared, blobs) = prepare_outbound(payload);
        let Some(msg_json) = prepared.into_json() else {
            warn!(interface_tag, "outbound payload still had raw bytes after extraction");
            return;
        };
        let mut envelope = serde_json::to_value(&frame).unwrap_or_else(|_| serde_json::json!({}));
        envelope["data"] = serde_json::json!({ "msg": msg_json });
        let Ok(text) = serde_json::to_string(&envelope) else { return };

        if outbound.send(OutboundWsMessage::Text(text)).is_err() {
            return;
        }
        for blob in blobs {
            let mut frame_bytes = Vec::with_capacity(protocol::URI_LEN + blob.bytes.len());
            frame_bytes.extend_from_slice(blob.uri.as_bytes());
            frame_bytes.extend_from_slice(&blob.bytes);
            if outbound.send(OutboundWsMessage::Binary(frame_bytes)).is_err() {
                return;
            }
        }
    }

    /// Sends a plain-text error frame back to the robot (spec §4.1 "Error
    /// reporting back to robot"), if currently `Live`. Never closes the
    /// socket.
    pub async fn report_error_to_client(&self, message: &str) {
        let outbound = {
            let inner = self.inner.lock().await;
            inner.outbound.clone()
        };
        if let Some(outbound) = outbound {
            let _ = outbound.send(OutboundWsMessage::Text(message.to_string()));
        }
    }

    /// Idempotent teardown (spec §4.2 `destroy`): drops the WebSocket if
    /// attached, destroys every interface in declaration order, clears the
    /// registry.
    pub async fn destroy(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == ConnectionState::Destroyed {
            return;
        }
        inner.outbound = None;
        let drained = inner.interfaces.drain_in_order();
        drop(inner);
        for (tag, _handle) in drained {
            // Real converter/forwarder teardown is out of scope; the
            // handle's Drop is its destruction.
            tracing::debug!(tag, "interface destroyed");
        }
        let mut inner = self.inner.lock().await;
        inner.state = ConnectionState::Destroyed;
        info!(user_id = %self.user_id, robot_id = %self.robot_id, "session destroyed");
    }

    /// A bounded per-tick sweep of the reassembly buffer (spec §4.1).
    pub async fn sweep_reassembly(&self, max_age: Duration) -> usize {
        self.inner.lock().await.reassembly.sweep(max_age)
    }

    pub(crate) async fn park_partial(
        &self,
        dest: String,
        root: Payload,
        missing: Vec<corvid_protocol::ParkedSlot>,
    ) {
        self.inner.lock().await.reassembly.park(dest, root, missing);
    }

    pub(crate) async fn complete_partial(
        &self,
        uri: &str,
        bytes: Vec<u8>,
    ) -> Option<crate::framing::CompletedMessage> {
        self.inner.lock().await.reassembly.complete(uri, bytes)
    }

    async fn call_master<F, Fut>(&self, op: F)
    where
        F: FnOnce(Arc<dyn MasterUser>) -> Fut,
        Fut: std::future::Future<Output = Result<(), MasterRpcError>>,
    {
        let user_ref = self.inner.lock().await.user_ref.clone();
        match op(user_ref).await {
            Ok(()) => {},
            Err(MasterRpcError::Dead) => {
                warn!(user_id = %self.user_id, robot_id = %self.robot_id, "master channel dead");
                self.report_error_to_client("DeadConnection: master channel is gone").await;
                self.destroy().await;
            },
            Err(MasterRpcError::Failed(message)) => {
                self.report_error_to_client(&message).await;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use corvid_protocol::InterfaceTypeCode;

    use super::*;
    use crate::master::test_util::{RecordedCall, RecordingMasterUser};

    fn session() -> (Arc<RobotSession>, Arc<RecordingMasterUser>) {
        let recorder = Arc::new(RecordingMasterUser::default());
        let session = RobotSession::new("u1", "r1", b"secret".to_vec(), recorder.clone());
        (session, recorder)
    }

    #[tokio::test]
    async fn create_then_destroy_container_dispatches_in_order() {
        let (session, recorder) = session();
        session.create_container("c1").await;
        session.destroy_container("c1").await;
        assert_eq!(
            recorder.calls(),
            vec![
                RecordedCall::CreateContainer("c1".to_string()),
                RecordedCall::DestroyContainer("c1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_interface_is_reported() {
        let (session, _recorder) = session();
        let err = session.received_from_client("missing", "", "", Payload::Null).await;
        assert_eq!(err, Err(protocol::Error::UnknownInterface("missing".to_string())));
    }

    #[tokio::test]
    async fn destroy_empties_interface_table_and_is_idempotent() {
        let (session, _recorder) = session();
        session
            .create_interface("i1", InterfaceTypeCode::PublisherConverter, "Image")
            .await
            .expect("create");
        assert_eq!(session.interface_count().await, 1);
        session.destroy().await;
        assert_eq!(session.interface_count().await, 0);
        assert_eq!(session.state().await, ConnectionState::Destroyed);
        session.destroy().await; // idempotent
        assert_eq!(session.state().await, ConnectionState::Destroyed);
    }

    #[tokio::test]
    async fn add_interface_only_issues_rpc_without_touching_registry() {
        let (session, recorder) = session();
        session.add_interface("e1", "i1", InterfaceTypeCode::PublisherConverter, "Image").await;
        assert_eq!(session.interface_count().await, 0);
        assert_eq!(
            recorder.calls(),
            vec![RecordedCall::AddInterface { endpoint_tag: "e1".to_string(), interface_tag: "i1".to_string() }]
        );
    }

    #[tokio::test]
    async fn create_interface_populates_registry_and_rejects_duplicate_tag() {
        let (session, _recorder) = session();
        session.create_interface("i1", InterfaceTypeCode::PublisherConverter, "Image").await.expect("create");
        assert_eq!(session.interface_count().await, 1);
        let err = session.create_interface("i1", InterfaceTypeCode::PublisherConverter, "Image").await;
        assert_eq!(err, Err(protocol::Error::Conflict("i1".to_string())));
    }

    #[tokio::test]
    async fn key_match_is_constant_time_and_correct() {
        let (session, _recorder) = session();
        assert!(session.key_matches(b"secret").await);
        assert!(!session.key_matches(b"wrong").await);
    }

    #[tokio::test]
    async fn send_to_client_drops_silently_when_not_live() {
        let (session, _recorder) = session();
        // Not live: no outbound sink attached yet.
        session.send_to_client("i1", Payload::Null).await; // must not panic
        assert_eq!(session.state().await, ConnectionState::Pending);
    }
}
