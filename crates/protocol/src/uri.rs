//! The binary URI-placeholder convention (spec §4.1) and the JSON-like
//! [`Payload`] tree it operates on.
//!
//! Plain `serde_json::Value` cannot hold a raw byte buffer, but a
//! reassembled data message needs exactly that once its binary
//! continuations have arrived. `Payload` mirrors `Value`'s shape with one
//! addition: a `Bytes` leaf.

use serde::Serialize;

use crate::URI_LEN;

/// A JSON-shaped tree that additionally supports raw byte leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Payload>),
    /// Preserves field declaration order, unlike a `HashMap`.
    Object(Vec<(String, Payload)>),
}

impl Payload {
    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from_json).collect())
            },
            serde_json::Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts back to plain JSON. `None` if any `Bytes` leaf remains —
    /// those are not representable in JSON and must have been extracted
    /// via [`UriWalker::scan_outbound`] first.
    #[must_use]
    pub fn into_json(self) -> Option<serde_json::Value> {
        Some(match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(b),
            Self::Number(n) => serde_json::Value::Number(n),
            Self::String(s) => serde_json::Value::String(s),
            Self::Bytes(_) => return None,
            Self::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.into_json()?);
                }
                serde_json::Value::Array(out)
            },
            Self::Object(fields) => {
                let mut out = serde_json::Map::with_capacity(fields.len());
                for (k, v) in fields {
                    out.insert(k, v.into_json()?);
                }
                serde_json::Value::Object(out)
            },
        })
    }

    fn as_object_mut(&mut self) -> Option<&mut Vec<(String, Self)>> {
        match self {
            Self::Object(fields) => Some(fields),
            _ => None,
        }
    }
}

/// One path step while walking down a [`Payload`] tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

/// A still-missing binary slot inside a parked inbound message: the path to
/// the object that owns it, the placeholder key (including its trailing
/// `*`), and the URI it promised.
#[derive(Debug, Clone, PartialEq)]
pub struct ParkedSlot {
    pub uri: String,
    pub path: Vec<PathStep>,
    pub key: String,
}

/// One blob discovered while walking an outbound message, alongside the URI
/// minted for it.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundBlob {
    pub uri: String,
    pub bytes: Vec<u8>,
}

pub struct UriWalker;

impl UriWalker {
    /// Scans an inbound message for URI placeholders. Recurses into nested
    /// objects only — not arrays — matching the shape placeholders are
    /// actually produced in and the original system's own inbound scanner.
    #[must_use]
    pub fn scan_inbound(root: &Payload) -> Vec<ParkedSlot> {
        let mut found = Vec::new();
        Self::scan_inbound_into(root, &mut Vec::new(), &mut found);
        found
    }

    fn scan_inbound_into(node: &Payload, path: &mut Vec<PathStep>, out: &mut Vec<ParkedSlot>) {
        let Payload::Object(fields) = node else {
            return;
        };
        for (k, v) in fields {
            match v {
                Payload::Object(_) => {
                    path.push(PathStep::Key(k.clone()));
                    Self::scan_inbound_into(v, path, out);
                    path.pop();
                },
                Payload::String(uri) if k.ends_with('*') => {
                    out.push(ParkedSlot {
                        uri: uri.clone(),
                        path: path.clone(),
                        key: k.clone(),
                    });
                },
                _ => {},
            }
        }
    }

    /// Installs a binary payload into the slot that promised `uri`,
    /// replacing the placeholder key (with trailing `*`) by the same key
    /// stripped of it. Returns `false` if the path no longer resolves
    /// (should not happen in practice; defensive against a malformed
    /// parked entry).
    pub fn install(root: &mut Payload, slot: &ParkedSlot, bytes: Vec<u8>) -> bool {
        let Some(parent) = Self::resolve_mut(root, &slot.path) else {
            return false;
        };
        let Some(fields) = parent.as_object_mut() else {
            return false;
        };
        let Some(idx) = fields.iter().position(|(k, _)| k == &slot.key) else {
            return false;
        };
        let stripped = slot.key.trim_end_matches('*').to_string();
        fields[idx] = (stripped, Payload::Bytes(bytes));
        true
    }

    fn resolve_mut<'a>(root: &'a mut Payload, path: &[PathStep]) -> Option<&'a mut Payload> {
        let mut cur = root;
        for step in path {
            cur = match (cur, step) {
                (Payload::Object(fields), PathStep::Key(k)) => {
                    &mut fields.iter_mut().find(|(fk, _)| fk == k)?.1
                },
                (Payload::Array(items), PathStep::Index(i)) => items.get_mut(*i)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Walks an outbound message, extracting every raw byte blob and
    /// replacing it in place with a freshly minted URI placeholder.
    /// Recurses into both objects and arrays, so a blob nested inside a
    /// list is still found (an intentional broadening versus the inbound
    /// scan, which only needs to match the shapes robots actually send).
    #[must_use]
    pub fn scan_outbound(root: &mut Payload) -> Vec<OutboundBlob> {
        let mut out = Vec::new();
        Self::scan_outbound_into(root, &mut out);
        out
    }

    fn scan_outbound_into(node: &mut Payload, out: &mut Vec<OutboundBlob>) {
        match node {
            Payload::Object(fields) => {
                let mut renamed = Vec::new();
                for (k, v) in fields.iter_mut() {
                    if let Payload::Bytes(bytes) = v {
                        let uri = fresh_uri();
                        out.push(OutboundBlob { uri: uri.clone(), bytes: std::mem::take(bytes) });
                        renamed.push((k.clone(), uri));
                    } else {
                        Self::scan_outbound_into(v, out);
                    }
                }
                for (old_key, uri) in renamed {
                    if let Some(entry) = fields.iter_mut().find(|(k, _)| k == &old_key) {
                        entry.0 = format!("{old_key}*");
                        entry.1 = Payload::String(uri);
                    }
                }
            },
            Payload::Array(items) => {
                for item in items {
                    Self::scan_outbound_into(item, out);
                }
            },
            _ => {},
        }
    }
}

/// Generates a fresh random 32-character hex URI, matching [`URI_LEN`].
#[must_use]
pub fn fresh_uri() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; URI_LEN / 2];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(fields: Vec<(&str, Payload)>) -> Payload {
        Payload::Object(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn inbound_scan_finds_top_level_placeholder() {
        let tree = obj(vec![("img*", Payload::String("a".repeat(32)))]);
        let slots = UriWalker::scan_inbound(&tree);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].uri, "a".repeat(32));
        assert_eq!(slots[0].key, "img*");
        assert!(slots[0].path.is_empty());
    }

    #[test]
    fn inbound_scan_recurses_into_objects_only() {
        let nested = obj(vec![("deep*", Payload::String("b".repeat(32)))]);
        let tree = obj(vec![
            ("child", nested),
            ("arr", Payload::Array(vec![obj(vec![("ignored*", Payload::String("c".repeat(32)))])])),
        ]);
        let slots = UriWalker::scan_inbound(&tree);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].path, vec![PathStep::Key("child".to_string())]);
    }

    #[test]
    fn install_replaces_placeholder_with_bytes() {
        let mut tree = obj(vec![("img*", Payload::String("a".repeat(32)))]);
        let slots = UriWalker::scan_inbound(&tree);
        let ok = UriWalker::install(&mut tree, &slots[0], vec![0xDE, 0xAD]);
        assert!(ok);
        let Payload::Object(fields) = &tree else { unreachable!() };
        assert_eq!(fields[0].0, "img");
        assert_eq!(fields[0].1, Payload::Bytes(vec![0xDE, 0xAD]));
    }

    #[test]
    fn outbound_scan_mints_unique_uris_and_renames_key() {
        let mut tree = obj(vec![
            ("a", Payload::Bytes(vec![1, 2, 3])),
            ("b", Payload::Bytes(vec![4, 5, 6])),
        ]);
        let blobs = UriWalker::scan_outbound(&mut tree);
        assert_eq!(blobs.len(), 2);
        assert_ne!(blobs[0].uri, blobs[1].uri);
        let Payload::Object(fields) = &tree else { unreachable!() };
        assert_eq!(fields[0].0, "a*");
        assert_eq!(fields[1].0, "b*");
    }

    #[test]
    fn outbound_scan_recurses_into_arrays() {
        let mut tree = Payload::Array(vec![obj(vec![("blob", Payload::Bytes(vec![9]))])]);
        let blobs = UriWalker::scan_outbound(&mut tree);
        assert_eq!(blobs.len(), 1);
        let Payload::Array(items) = &tree else { unreachable!() };
        let Payload::Object(fields) = &items[0] else { unreachable!() };
        assert_eq!(fields[0].0, "blob*");
    }
}
