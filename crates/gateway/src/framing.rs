//! Binary reassembly buffer (spec §3 `PartialMessage`, §4.1, §9).
//!
//! Parks a control message that still has missing binary slots; completes
//! it as matching binary frames arrive; evicts entries that outlive
//! `MSG_QUEUE_TIMEOUT` on a periodic sweep. The original implementation
//! this is modeled on had two confirmed bugs here — mutating the parked
//! list while iterating it, and a sweep that dropped nothing when every
//! entry was fresh. Both are corrected: the sweep below is a single
//! `retain` pass, and completion never mutates a list it is still walking.

use std::time::{Duration, Instant};

use corvid_protocol::{OutboundBlob, ParkedSlot, Payload, UriWalker};

/// A control message parked while it awaits one or more binary
/// continuations.
struct ParkedMessage {
    dest: String,
    root: Payload,
    missing: Vec<ParkedSlot>,
    arrived_at: Instant,
}

/// A message that has received all of its binary continuations and is
/// ready to dispatch.
pub struct CompletedMessage {
    pub dest: String,
    pub payload: Payload,
}

#[derive(Default)]
pub struct ReassemblyBuffer {
    parked: Vec<ParkedMessage>,
}

impl ReassemblyBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.parked.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }

    /// Parks a control message with at least one missing binary slot.
    pub fn park(&mut self, dest: String, root: Payload, missing: Vec<ParkedSlot>) {
        self.parked.push(ParkedMessage { dest, root, missing, arrived_at: Instant::now() });
    }

    /// Installs one binary continuation. Returns the completed message if
    /// this was the last missing slot for its parked entry; `None` if the
    /// URI matched nothing (aged out or never parked — silently dropped
    /// per spec §4.1) or the entry still has other slots outstanding.
    pub fn complete(&mut self, uri: &str, bytes: Vec<u8>) -> Option<CompletedMessage> {
        let entry_idx = self.parked.iter().position(|m| m.missing.iter().any(|s| s.uri == uri))?;

        let slot_idx = self.parked[entry_idx].missing.iter().position(|s| s.uri == uri)?;
        let slot = self.parked[entry_idx].missing[slot_idx].clone();
        UriWalker::install(&mut self.parked[entry_idx].root, &slot, bytes);
        self.parked[entry_idx].missing.remove(slot_idx);

        if self.parked[entry_idx].missing.is_empty() {
            let entry = self.parked.remove(entry_idx);
            return Some(CompletedMessage { dest: entry.dest, payload: entry.root });
        }
        None
    }

    /// Drops every parked entry older than `max_age`. Correct semantics
    /// (unlike the buggy original): entries older than the threshold are
    /// dropped, every other entry is retained, in one bounded pass.
    /// Returns the number of entries dropped.
    pub fn sweep(&mut self, max_age: Duration) -> usize {
        let before = self.parked.len();
        let now = Instant::now();
        self.parked.retain(|m| now.saturating_duration_since(m.arrived_at) <= max_age);
        before - self.parked.len()
    }
}

/// Walks an outbound payload, replacing blobs with URI placeholders, and
/// returns the blobs to send as binary frames after the text frame.
#[must_use]
pub fn prepare_outbound(mut payload: Payload) -> (Payload, Vec<OutboundBlob>) {
    let blobs = UriWalker::scan_outbound(&mut payload);
    (payload, blobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(fields: Vec<(&str, Payload)>) -> Payload {
        Payload::Object(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn completes_when_last_slot_installed() {
        let tree = obj(vec![("img*", Payload::String("a".repeat(32)))]);
        let slots = corvid_protocol::UriWalker::scan_inbound(&tree);
        let mut buf = ReassemblyBuffer::new();
        buf.park("i1".to_string(), tree, slots);
        assert_eq!(buf.len(), 1);

        let completed = buf.complete(&"a".repeat(32), vec![0xDE, 0xAD]).expect("completed");
        assert_eq!(completed.dest, "i1");
        assert!(buf.is_empty());
    }

    #[test]
    fn unmatched_uri_is_dropped_silently() {
        let mut buf = ReassemblyBuffer::new();
        assert!(buf.complete("nonexistent", vec![1]).is_none());
    }

    #[test]
    fn sweep_drops_all_stale_entries_even_when_all_are_stale() {
        let tree = obj(vec![("img*", Payload::String("a".repeat(32)))]);
        let slots = corvid_protocol::UriWalker::scan_inbound(&tree);
        let mut buf = ReassemblyBuffer::new();
        buf.park("i1".to_string(), tree, slots);
        std::thread::sleep(Duration::from_millis(5));
        let dropped = buf.sweep(Duration::from_millis(1));
        assert_eq!(dropped, 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn sweep_retains_fresh_entries() {
        let tree = obj(vec![("img*", Payload::String("a".repeat(32)))]);
        let slots = corvid_protocol::UriWalker::scan_inbound(&tree);
        let mut buf = ReassemblyBuffer::new();
        buf.park("i1".to_string(), tree, slots);
        let dropped = buf.sweep(Duration::from_secs(60));
        assert_eq!(dropped, 0);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn prepare_outbound_mints_placeholders() {
        let tree = obj(vec![("img", Payload::Bytes(vec![1, 2, 3]))]);
        let (prepared, blobs) = prepare_outbound(tree);
        assert_eq!(blobs.len(), 1);
        let Payload::Object(fields) = &prepared else { unreachable!() };
        assert_eq!(fields[0].0, "img*");
    }
}
