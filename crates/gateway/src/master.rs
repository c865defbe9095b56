//! The master-facing RPC surface a session invokes on its bound "user ref"
//! (spec §4.2, §6). Credential storage, container runtimes, and the actual
//! interface converters/forwarders live on the other side of this trait and
//! are out of scope here — the gateway only calls through it.
//!
//! `add_interface` below is the outbound half of interface creation: it
//! only asks the master to create one. The inbound half — the master
//! telling this gateway the interface now exists, so it should instantiate
//! and register a local handle — arrives the other direction, as a
//! `createInterface` request on the master RPC connection (see `rpc.rs`),
//! and is not part of this trait.

use async_trait::async_trait;

/// The outcome of one RPC call to the master-side user ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterRpcError {
    /// The channel to the master/user is gone. The session must raise
    /// `DeadConnection` and tear itself down.
    Dead,
    /// Any other failure; reported back to the robot as a text error frame.
    Failed(String),
}

pub type MasterRpcResult = std::result::Result<(), MasterRpcError>;

/// Everything a `RobotSession` may invoke on the master's bound user
/// object (spec §4.2 "Public operations exposed to the protocol handler").
#[async_trait]
pub trait MasterUser: Send + Sync {
    async fn create_container(&self, container_tag: &str) -> MasterRpcResult;
    async fn destroy_container(&self, container_tag: &str) -> MasterRpcResult;
    async fn add_node(
        &self,
        container_tag: &str,
        node_tag: &str,
        pkg: &str,
        exe: &str,
        namespace: &str,
    ) -> MasterRpcResult;
    async fn remove_node(&self, container_tag: &str, node_tag: &str) -> MasterRpcResult;
    async fn add_interface(
        &self,
        endpoint_tag: &str,
        interface_tag: &str,
        interface_type: &str,
        class_name: &str,
    ) -> MasterRpcResult;
    async fn remove_interface(&self, endpoint_tag: &str, interface_tag: &str) -> MasterRpcResult;
    async fn add_parameter(
        &self,
        container_tag: &str,
        name: &str,
        value: &serde_json::Value,
    ) -> MasterRpcResult;
    async fn remove_parameter(&self, container_tag: &str, name: &str) -> MasterRpcResult;
    async fn add_connection(&self, tag_a: &str, tag_b: &str) -> MasterRpcResult;
    async fn remove_connection(&self, tag_a: &str, tag_b: &str) -> MasterRpcResult;
}

/// A `MasterUser` that records every call it received; used to exercise
/// scenario-level tests without a real master.
#[cfg(any(test, feature = "test-util"))]
pub mod test_util {
    use std::sync::Mutex;

    use super::{MasterRpcResult, MasterUser};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RecordedCall {
        CreateContainer(String),
        DestroyContainer(String),
        AddNode { container_tag: String, node_tag: String },
        RemoveNode { container_tag: String, node_tag: String },
        AddInterface { endpoint_tag: String, interface_tag: String },
        RemoveInterface { endpoint_tag: String, interface_tag: String },
        AddParameter { container_tag: String, name: String },
        RemoveParameter { container_tag: String, name: String },
        AddConnection(String, String),
        RemoveConnection(String, String),
    }

    #[derive(Default)]
    pub struct RecordingMasterUser {
        calls: Mutex<Vec<RecordedCall>>,
    }

    impl RecordingMasterUser {
        #[must_use]
        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().expect("recording lock").clone()
        }
    }

    #[async_trait::async_trait]
    impl MasterUser for RecordingMasterUser {
        async fn create_container(&self, container_tag: &str) -> MasterRpcResult {
            self.calls.lock().expect("lock").push(RecordedCall::CreateContainer(container_tag.to_string()));
            Ok(())
        }

        async fn destroy_container(&self, container_tag: &str) -> MasterRpcResult {
            self.calls.lock().expect("lock").push(RecordedCall::DestroyContainer(container_tag.to_string()));
            Ok(())
        }

        async fn add_node(
            &self,
            container_tag: &str,
            node_tag: &str,
            _pkg: &str,
            _exe: &str,
            _namespace: &str,
        ) -> MasterRpcResult {
            self.calls.lock().expect("lock").push(RecordedCall::AddNode {
                container_tag: container_tag.to_string(),
                node_tag: node_tag.to_string(),
            });
            Ok(())
        }

        async fn remove_node(&self, container_tag: &str, node_tag: &str) -> MasterRpcResult {
            self.calls.lock().expect("lock").push(RecordedCall::RemoveNode {
                container_tag: container_tag.to_string(),
                node_tag: node_tag.to_string(),
            });
            Ok(())
        }

        async fn add_interface(
            &self,
            endpoint_tag: &str,
            interface_tag: &str,
            _interface_type: &str,
            _class_name: &str,
        ) -> MasterRpcResult {
            self.calls.lock().expect("lock").push(RecordedCall::AddInterface {
                endpoint_tag: endpoint_tag.to_string(),
                interface_tag: interface_tag.to_string(),
            });
            Ok(())
        }

        async fn remove_interface(&self, endpoint_tag: &str, interface_tag: &str) -> MasterRpcResult {
            self.calls.lock().expect("lock").push(RecordedCall::RemoveInterface {
                endpoint_tag: endpoint_tag.to_string(),
                interface_tag: interface_tag.to_string(),
            });
            Ok(())
        }

        async fn add_parameter(
            &self,
            container_tag: &str,
            name: &str,
            _value: &serde_json::Value,
        ) -> MasterRpcResult {
            self.calls.lock().expect("lock").push(RecordedCall::AddParameter {
                container_tag: container_tag.to_string(),
                name: name.to_string(),
            });
            Ok(())
        }

        async fn remove_parameter(&self, container_tag: &str, name: &str) -> MasterRpcResult {
            self.calls.lock().expect("lock").push(RecordedCall::RemoveParameter {
                container_tag: container_tag.to_string(),
                name: name.to_string(),
            });
            Ok(())
        }

        async fn add_connection(&self, tag_a: &str, tag_b: &str) -> MasterRpcResult {
            self.calls
                .lock()
                .expect("lock")
                .push(RecordedCall::AddConnection(tag_a.to_string(), tag_b.to_string()));
            Ok(())
        }

        async fn remove_connection(&self, tag_a: &str, tag_b: &str) -> MasterRpcResult {
            self.calls
                .lock()
                .expect("lock")
                .push(RecordedCall::RemoveConnection(tag_a.to_string(), tag_b.to_string()));
            Ok(())
        }
    }
}
