//! Text-frame shape exchanged with a robot (spec §4.1).
//!
//! Every inbound/outbound control message is one JSON object:
//! `{ "type": ..., "orig": ..., "dest": ..., "data": ... }`. `type` selects
//! which of the fixed set of operations `data` describes.

use serde::{Deserialize, Serialize};

/// The envelope every text frame carries on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    pub r#type: String,
    #[serde(default)]
    pub orig: String,
    #[serde(default)]
    pub dest: String,
    pub data: serde_json::Value,
}

/// The fixed set of recognized `type` tags (spec §4.1 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    CreateContainer,
    DestroyContainer,
    ConfigureComponent,
    ConnectInterfaces,
    ConfigureInterfaceState,
    DataMessage,
}

impl FrameType {
    /// Parse a raw `type` string into one of the known frame types.
    /// Anything else is `InvalidRequest` at the call site.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "CreateContainer" => Self::CreateContainer,
            "DestroyContainer" => Self::DestroyContainer,
            "ConfigureComponent" => Self::ConfigureComponent,
            "ConnectInterfaces" => Self::ConnectInterfaces,
            "ConfigureInterfaceState" => Self::ConfigureInterfaceState,
            "DataMessage" => Self::DataMessage,
            _ => return None,
        })
    }
}

// ── Typed `data` payloads, one per frame type ───────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContainerData {
    pub container_tag: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestroyContainerData {
    pub container_tag: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub node_tag: String,
    pub pkg: String,
    pub exe: String,
    #[serde(default)]
    pub args: String,
    #[serde(default)]
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceSpec {
    pub name: String,
    pub interface_type: String,
    pub class_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamSpec {
    pub param_name: String,
    pub param_value: serde_json::Value,
    #[serde(default)]
    pub param_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureComponentData {
    #[serde(default)]
    pub add_nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub remove_nodes: Vec<String>,
    #[serde(default)]
    pub add_interfaces: Vec<InterfaceSpec>,
    #[serde(default)]
    pub remove_interfaces: Vec<String>,
    #[serde(default)]
    pub set_param: Vec<ParamSpec>,
    #[serde(default)]
    pub delete_param: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectInterfacesData {
    #[serde(default)]
    pub connect: Vec<(String, String)>,
    #[serde(default)]
    pub disconnect: Vec<(String, String)>,
}

/// `ConfigureInterfaceState`'s data is a bare map of interface tag to
/// desired active state.
pub type InterfaceStateData = std::collections::HashMap<String, bool>;

#[derive(Debug, Clone, Deserialize)]
pub struct DataMessageData {
    pub msg: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_types() {
        assert_eq!(FrameType::parse("CreateContainer"), Some(FrameType::CreateContainer));
        assert_eq!(FrameType::parse("DataMessage"), Some(FrameType::DataMessage));
        assert_eq!(FrameType::parse("Nonsense"), None);
    }

    #[test]
    fn deserializes_envelope() {
        let raw = r#"{"type":"CreateContainer","orig":"r1","dest":"","data":{"containerTag":"c1"}}"#;
        let frame: ClientFrame = serde_json::from_str(raw).expect("valid frame");
        assert_eq!(frame.r#type, "CreateContainer");
        let data: CreateContainerData =
            serde_json::from_value(frame.data).expect("valid data");
        assert_eq!(data.container_tag, "c1");
    }
}
