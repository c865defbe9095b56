//! The master-facing RPC channel (spec §6 "Master-facing RPC").
//!
//! The real system describes this as "a bidirectional object-capability
//! channel" and treats its wire mechanism as opaque, the same way it treats
//! the client credential mechanism as opaque. This implementation picks one
//! concrete, idiomatic shape for it: a persistent newline-delimited JSON
//! connection on `commPort`, opened by the master once per robot namespace.
//! The first line is the `createNamespace` handshake; every later line is
//! either a request this gateway must answer (`destroy`, `getAddress`) or a
//! response correlating to an RPC this gateway placed on
//! [`TcpMasterUser::call`].

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use corvid_protocol::InterfaceTypeCode;
use serde_json::{Value, json};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    sync::{Mutex, oneshot},
};
use tracing::{info, warn};

use crate::{
    gateway::Gateway,
    master::{MasterRpcError, MasterRpcResult, MasterUser},
};

/// One master-facing connection, bound to exactly one `(userID, robotID)`
/// namespace for its lifetime.
pub struct TcpMasterUser {
    writer: Mutex<OwnedWriteHalf>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    next_id: AtomicU64,
}

impl TcpMasterUser {
    fn new(writer: OwnedWriteHalf) -> Self {
        Self { writer: Mutex::new(writer), pending: Mutex::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    async fn write_line(&self, value: &Value) -> bool {
        let mut line = value.to_string();
        line.push('\n');
        self.writer.lock().await.write_all(line.as_bytes()).await.is_ok()
    }

    async fn call(&self, op: &str, params: Value) -> MasterRpcResult {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if !self.write_line(&json!({ "id": id, "op": op, "params": params })).await {
            self.pending.lock().await.remove(&id);
            return Err(MasterRpcError::Dead);
        }

        match rx.await {
            Ok(response) => {
                if response.get("ok").and_then(Value::as_bool).unwrap_or(false) {
                    Ok(())
                } else {
                    let message =
                        response.get("error").and_then(Value::as_str).unwrap_or("master RPC failed").to_string();
                    Err(MasterRpcError::Failed(message))
                }
            },
            Err(_) => Err(MasterRpcError::Dead),
        }
    }

    /// Completes a pending call matched by `id`, if one is outstanding.
    async fn resolve(&self, id: u64, response: Value) {
        if let Some(tx) = self.pending.lock().await.remove(&id) {
            let _ = tx.send(response);
        }
    }

    /// Answers an inbound request from the master (as opposed to a response
    /// to one of our own calls).
    async fn respond(&self, id: u64, response: Value) {
        let mut envelope = response;
        envelope["id"] = json!(id);
        let _ = self.write_line(&envelope).await;
    }
}

#[async_trait]
impl MasterUser for TcpMasterUser {
    async fn create_container(&self, container_tag: &str) -> MasterRpcResult {
        self.call("createContainer", json!({ "containerTag": container_tag })).await
    }

    async fn destroy_container(&self, container_tag: &str) -> MasterRpcResult {
        self.call("destroyContainer", json!({ "containerTag": container_tag })).await
    }

    async fn add_node(
        &self,
        container_tag: &str,
        node_tag: &str,
        pkg: &str,
        exe: &str,
        namespace: &str,
    ) -> MasterRpcResult {
        self.call(
            "addNode",
            json!({ "containerTag": container_tag, "nodeTag": node_tag, "pkg": pkg, "exe": exe, "namespace": namespace }),
        )
        .await
    }

    async fn remove_node(&self, container_tag: &str, node_tag: &str) -> MasterRpcResult {
        self.call("removeNode", json!({ "containerTag": container_tag, "nodeTag": node_tag })).await
    }

    async fn add_interface(
        &self,
        endpoint_tag: &str,
        interface_tag: &str,
        interface_type: &str,
        class_name: &str,
    ) -> MasterRpcResult {
        self.call(
            "addInterface",
            json!({ "endpointTag": endpoint_tag, "interfaceTag": interface_tag, "interfaceType": interface_type, "className": class_name }),
        )
        .await
    }

    async fn remove_interface(&self, endpoint_tag: &str, interface_tag: &str) -> MasterRpcResult {
        self.call("removeInterface", json!({ "endpointTag": endpoint_tag, "interfaceTag": interface_tag })).await
    }

    async fn add_parameter(&self, container_tag: &str, name: &str, value: &Value) -> MasterRpcResult {
        self.call("addParameter", json!({ "containerTag": container_tag, "name": name, "value": value })).await
    }

    async fn remove_parameter(&self, container_tag: &str, name: &str) -> MasterRpcResult {
        self.call("removeParameter", json!({ "containerTag": container_tag, "name": name })).await
    }

    async fn add_connection(&self, tag_a: &str, tag_b: &str) -> MasterRpcResult {
        self.call("addConnection", json!({ "tagA": tag_a, "tagB": tag_b })).await
    }

    async fn remove_connection(&self, tag_a: &str, tag_b: &str) -> MasterRpcResult {
        self.call("removeConnection", json!({ "tagA": tag_a, "tagB": tag_b })).await
    }
}

/// Listens on `commPort` for master connections; one connection per
/// `createNamespace` call, kept open for the namespace's lifetime.
pub async fn serve(listener: TcpListener, gateway: Arc<Gateway>, own_address: String) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "master RPC connection accepted");
        let gateway = gateway.clone();
        let own_address = own_address.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, gateway, own_address).await {
                warn!(%peer, %err, "master RPC connection ended with error");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, gateway: Arc<Gateway>, own_address: String) -> anyhow::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let Some(first) = lines.next_line().await? else {
        return Ok(());
    };
    let handshake: Value = serde_json::from_str(&first)?;
    let user_id = handshake["userId"].as_str().unwrap_or_default().to_string();
    let robot_id = handshake["robotId"].as_str().unwrap_or_default().to_string();
    let key_hex = handshake["key"].as_str().unwrap_or_default();
    let key_bytes = hex::decode(key_hex).unwrap_or_default();

    let master_user = Arc::new(TcpMasterUser::new(write_half));
    match gateway.remote_create_namespace(&user_id, &robot_id, key_bytes, master_user.clone()).await {
        Ok(()) => {
            master_user.write_line(&json!({ "op": "ack", "ok": true })).await;
        },
        Err(err) => {
            master_user.write_line(&json!({ "op": "ack", "ok": false, "error": err.to_string() })).await;
            return Ok(());
        },
    }

    while let Some(line) = lines.next_line().await? {
        let Ok(msg) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let id = msg.get("id").and_then(Value::as_u64).unwrap_or(0);

        if let Some(op) = msg.get("op").and_then(Value::as_str) {
            match op {
                "destroy" => {
                    if let Some(session) = gateway.find_session(&user_id, &robot_id).await {
                        session.destroy().await;
                    }
                    master_user.respond(id, json!({ "ok": true })).await;
                },
                "createInterface" => {
                    let response = handle_create_interface(&gateway, &user_id, &robot_id, &msg).await;
                    master_user.respond(id, response).await;
                },
                "getAddress" => {
                    master_user.respond(id, json!({ "ok": true, "address": own_address })).await;
                },
                other => {
                    warn!(op = other, "unrecognized master RPC request");
                    master_user.respond(id, json!({ "ok": false, "error": "unknown op" })).await;
                },
            }
        } else {
            master_user.resolve(id, msg).await;
        }
    }
    Ok(())
}

/// `remote_createInterface`: the master tells this gateway an interface it
/// asked for (via the `addInterface` RPC) now exists, and hands back the
/// type/class it should instantiate locally.
async fn handle_create_interface(gateway: &Arc<Gateway>, user_id: &str, robot_id: &str, msg: &Value) -> Value {
    let Some(session) = gateway.find_session(user_id, robot_id).await else {
        return json!({ "ok": false, "error": "unknown namespace" });
    };
    let params = msg.get("params").cloned().unwrap_or_default();
    let interface_tag = params.get("interfaceTag").and_then(Value::as_str).unwrap_or_default();
    let class_name = params.get("className").and_then(Value::as_str).unwrap_or_default();
    let Some(interface_type) =
        params.get("interfaceType").and_then(Value::as_str).and_then(InterfaceTypeCode::parse)
    else {
        return json!({ "ok": false, "error": "unknown interface type" });
    };

    match session.create_interface(interface_tag, interface_type, class_name).await {
        Ok(()) => json!({ "ok": true }),
        Err(err) => json!({ "ok": false, "error": err.to_string() }),
    }
}
