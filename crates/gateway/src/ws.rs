//! The client-facing WebSocket handler (spec §4.1, §5).
//!
//! One upgrade per robot connection attempt. The handshake's query string
//! carries the credential the core treats as opaque: `userId`, `robotId`,
//! `key` (hex-encoded). Authentication runs once up front; everything after
//! that is frame dispatch through the matched [`RobotSession`], one frame at
//! a time — the read loop never dispatches the next frame before the
//! previous one's await has resolved, which is what gives the session its
//! "no concurrent frames" guarantee without an extra lock at this layer.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use corvid_protocol::{self as protocol, FrameType, InterfaceTypeCode, Payload, URI_LEN};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{gateway::Gateway, session::OutboundWsMessage};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    pub user_id: String,
    pub robot_id: String,
    pub key: String,
}

pub async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<ConnectQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway, query))
}

async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>, query: ConnectQuery) {
    let Ok(candidate_key) = hex::decode(&query.key) else {
        warn!(user_id = %query.user_id, robot_id = %query.robot_id, "malformed key encoding");
        return;
    };

    let session = match gateway.request_avatar(&query.user_id, &query.robot_id, &candidate_key).await {
        Ok(session) => session,
        Err(err) => {
            warn!(user_id = %query.user_id, robot_id = %query.robot_id, %err, "authentication failed");
            return;
        },
    };

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundWsMessage>();
    session.register_connection_to_robot(out_tx).await;
    info!(user_id = %query.user_id, robot_id = %query.robot_id, "robot connected");
    let sweeper = tokio::spawn(spawn_reassembly_sweeper(session.clone(), gateway.msg_queue_timeout));

    let write_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let frame = match msg {
                OutboundWsMessage::Text(text) => Message::Text(text.into()),
                OutboundWsMessage::Binary(bytes) => Message::Binary(bytes.into()),
            };
            if ws_tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => dispatch_text(&session, &text).await,
            Message::Binary(bytes) => dispatch_binary(&session, &bytes).await,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {},
        }
    }

    write_task.abort();
    sweeper.abort();
    gateway.connection_lost(&query.user_id, &query.robot_id).await;
    info!(user_id = %query.user_id, robot_id = %query.robot_id, "robot disconnected");
}

async fn dispatch_text(session: &crate::session::RobotSession, text: &str) {
    let frame: protocol::ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(err) => {
            session.report_error_to_client(&format!("InvalidRequest: malformed frame: {err}")).await;
            return;
        },
    };
    let Some(frame_type) = FrameType::parse(&frame.r#type) else {
        session.report_error_to_client(&format!("InvalidRequest: unknown type '{}'", frame.r#type)).await;
        return;
    };

    if let Err(err) = dispatch_known_frame(session, frame_type, &frame).await {
        session.report_error_to_client(&err.to_string()).await;
    }
}

async fn dispatch_known_frame(
    session: &crate::session::RobotSession,
    frame_type: FrameType,
    frame: &protocol::ClientFrame,
) -> protocol::Result<()> {
    match frame_type {
        FrameType::CreateContainer => {
            let data: protocol::frame::CreateContainerData = parse_data(&frame.data)?;
            session.create_container(&data.container_tag).await;
        },
        FrameType::DestroyContainer => {
            let data: protocol::frame::DestroyContainerData = parse_data(&frame.data)?;
            session.destroy_container(&data.container_tag).await;
        },
        FrameType::ConfigureComponent => {
            let data: protocol::frame::ConfigureComponentData = parse_data(&frame.data)?;
            for node in &data.add_nodes {
                session.add_node(&frame.dest, &node.node_tag, &node.pkg, &node.exe, &node.namespace).await;
            }
            for node_tag in &data.remove_nodes {
                session.remove_node(&frame.dest, node_tag).await;
            }
            for iface in &data.add_interfaces {
                let Some(type_code) = InterfaceTypeCode::parse(&iface.interface_type) else {
                    return Err(protocol::Error::InvalidRequest(format!(
                        "unknown interface type '{}'",
                        iface.interface_type
                    )));
                };
                session.add_interface(&frame.dest, &iface.name, type_code, &iface.class_name).await;
            }
            for iface_tag in &data.remove_interfaces {
                session.remove_interface(&frame.dest, iface_tag).await;
            }
            for param in &data.set_param {
                session.add_parameter(&frame.dest, &param.param_name, param.param_value.clone()).await;
            }
            for param_name in &data.delete_param {
                session.remove_parameter(&frame.dest, param_name).await;
            }
        },
        FrameType::ConnectInterfaces => {
            let data: protocol::frame::ConnectInterfacesData = parse_data(&frame.data)?;
            for (a, b) in &data.connect {
                session.add_connection(a, b).await;
            }
            for (a, b) in &data.disconnect {
                session.remove_connection(a, b).await;
            }
        },
        FrameType::ConfigureInterfaceState => {
            let data: protocol::frame::InterfaceStateData = parse_data(&frame.data)?;
            for (tag, active) in &data {
                session.set_interface_active(tag, *active).await;
            }
        },
        FrameType::DataMessage => {
            let data: protocol::frame::DataMessageData = parse_data(&frame.data)?;
            let payload = Payload::from_json(data.msg);
            let missing = protocol::UriWalker::scan_inbound(&payload);
            if missing.is_empty() {
                session.received_from_client(&frame.dest, "", "", payload).await?;
            } else {
                session.park_partial(frame.dest.clone(), payload, missing).await;
            }
        },
    }
    Ok(())
}

fn parse_data<T: serde::de::DeserializeOwned>(data: &serde_json::Value) -> protocol::Result<T> {
    serde_json::from_value(data.clone())
        .map_err(|err| protocol::Error::InvalidRequest(format!("bad data payload: {err}")))
}

async fn dispatch_binary(session: &crate::session::RobotSession, bytes: &[u8]) {
    if bytes.len() < URI_LEN {
        session.report_error_to_client("InvalidRequest: binary frame shorter than a URI").await;
        return;
    }
    let (uri_bytes, payload) = bytes.split_at(URI_LEN);
    let Ok(uri) = std::str::from_utf8(uri_bytes) else {
        session.report_error_to_client("InvalidRequest: binary frame URI is not valid UTF-8").await;
        return;
    };
    let Some(completed) = session.complete_partial(uri, payload.to_vec()).await else {
        return;
    };
    if let Err(err) = session.received_from_client(&completed.dest, "", "", completed.payload).await {
        session.report_error_to_client(&err.to_string()).await;
    }
}

/// Periodic reassembly-buffer sweep for one session (spec §4.1, §9). Ticks
/// four times per `max_age` window so a parked message is never more than
/// ~1.25x its max age stale before eviction catches it.
pub async fn spawn_reassembly_sweeper(session: Arc<crate::session::RobotSession>, max_age: Duration) {
    let sweep_interval = max_age / 4;
    let mut ticker = tokio::time::interval(sweep_interval);
    loop {
        ticker.tick().await;
        let dropped = session.sweep_reassembly(max_age).await;
        if dropped > 0 {
            warn!(dropped, "evicted stale partial messages");
        }
        if session.state().await == crate::session::ConnectionState::Destroyed {
            break;
        }
    }
}
