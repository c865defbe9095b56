//! The gateway-wide registry of robot sessions (spec §3 `RobotClient`, §4.2).
//!
//! Tracks every session this process owns across three states: awaiting its
//! first authenticated connection (`pending`), live or orphaned (`robots`),
//! and armed for destruction after the reconnect grace window
//! (`death_candidates`). A death timer is armed both when a pending
//! registration is first created and when a live connection drops, so
//! either "never connected" or "disconnected and never came back" elapses
//! the same way. Timer (re)arming is idempotent: a second disconnect of an
//! already-orphaned session just cancels and restarts the same timer rather
//! than stacking another one.

use std::{collections::HashMap, sync::Arc, time::Duration};

use corvid_protocol as protocol;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{master::MasterUser, session::RobotSession};

type SessionKey = (String, String);

fn key(user_id: &str, robot_id: &str) -> SessionKey {
    (user_id.to_string(), robot_id.to_string())
}

/// A session awaiting its first authenticated connection: registered by the
/// master but no robot has dialed in yet.
struct PendingEntry {
    session: Arc<RobotSession>,
}

struct DeathCandidate {
    token: CancellationToken,
}

/// Owns every `RobotSession` this gateway process is responsible for.
pub struct Gateway {
    reconnect_timeout: Duration,
    pub msg_queue_timeout: Duration,
    pending: RwLock<HashMap<SessionKey, PendingEntry>>,
    robots: RwLock<HashMap<SessionKey, Arc<RobotSession>>>,
    death_candidates: RwLock<HashMap<SessionKey, DeathCandidate>>,
}

impl Gateway {
    #[must_use]
    pub fn new(reconnect_timeout: Duration) -> Arc<Self> {
        Self::with_msg_queue_timeout(reconnect_timeout, Duration::from_secs(protocol::DEFAULT_MSG_QUEUE_TIMEOUT_SECS))
    }

    #[must_use]
    pub fn with_msg_queue_timeout(reconnect_timeout: Duration, msg_queue_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            reconnect_timeout,
            msg_queue_timeout,
            pending: RwLock::new(HashMap::new()),
            robots: RwLock::new(HashMap::new()),
            death_candidates: RwLock::new(HashMap::new()),
        })
    }

    /// Registers a brand-new robot namespace the master has just created,
    /// ahead of any connection attempt (spec §4.2 `remote_createNamespace`).
    /// Rejects a second registration for the same identity with `Conflict`
    /// rather than silently replacing it. A death timer is armed
    /// immediately: if no robot claims the registration within the
    /// reconnect grace window, it is torn down unclaimed.
    pub async fn remote_create_namespace(
        self: &Arc<Self>,
        user_id: &str,
        robot_id: &str,
        auth_key: Vec<u8>,
        user_ref: Arc<dyn MasterUser>,
    ) -> protocol::Result<()> {
        let k = key(user_id, robot_id);
        if self.pending.read().await.contains_key(&k) {
            return Err(protocol::Error::Conflict(format!("{robot_id} is already pending for {user_id}")));
        }
        let session = RobotSession::new(user_id, robot_id, auth_key, user_ref);
        self.pending.write().await.insert(k.clone(), PendingEntry { session: session.clone() });
        info!(user_id, robot_id, "namespace registered, awaiting first connection");
        self.arm_death_timer(k, session).await;
        Ok(())
    }

    /// Authenticates an inbound connection attempt against either a pending
    /// first-time registration or an orphaned session within its grace
    /// window. Returns the matched session without attaching the socket —
    /// the caller does that via [`RobotSession::register_connection_to_robot`]
    /// once the upgrade completes.
    pub async fn request_avatar(
        &self,
        user_id: &str,
        robot_id: &str,
        candidate_key: &[u8],
    ) -> protocol::Result<Arc<RobotSession>> {
        let k = key(user_id, robot_id);

        let pending_session = self.pending.read().await.get(&k).map(|e| e.session.clone());
        if let Some(session) = pending_session {
            if session.key_matches(candidate_key).await {
                self.disarm_death_timer(&k).await;
                self.pending.write().await.remove(&k);
                self.robots.write().await.insert(k, session.clone());
                return Ok(session);
            }
            return Err(protocol::Error::UnauthorizedLogin);
        }

        let orphaned_session = self.robots.read().await.get(&k).cloned();
        if let Some(session) = orphaned_session {
            if session.state().await == crate::session::ConnectionState::Orphaned
                && session.key_matches(candidate_key).await
            {
                self.disarm_death_timer(&k).await;
                return Ok(session);
            }
        }

        Err(protocol::Error::UnauthorizedLogin)
    }

    /// Called once the socket drops: orphans the session and arms (or
    /// re-arms) its death timer.
    pub async fn connection_lost(self: &Arc<Self>, user_id: &str, robot_id: &str) {
        let k = key(user_id, robot_id);
        let Some(session) = self.robots.read().await.get(&k).cloned() else { return };
        session.unregister_connection_to_robot().await;
        self.arm_death_timer(k, session).await;
    }

    async fn arm_death_timer(self: &Arc<Self>, k: SessionKey, session: Arc<RobotSession>) {
        self.disarm_death_timer(&k).await;
        let token = CancellationToken::new();
        self.death_candidates.write().await.insert(k.clone(), DeathCandidate { token: token.clone() });

        let gateway = self.clone();
        let timeout = self.reconnect_timeout;
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {},
                () = tokio::time::sleep(timeout) => {
                    gateway.reap_if_unclaimed(&k, session).await;
                }
            }
        });
    }

    /// Cancels a pending death timer without removing the session — used on
    /// a successful reconnect within the grace window.
    async fn disarm_death_timer(&self, k: &SessionKey) {
        if let Some(candidate) = self.death_candidates.write().await.remove(k) {
            candidate.token.cancel();
        }
    }

    /// Tears down a session whose grace window elapsed unclaimed — either a
    /// pending registration no robot ever connected to, or an orphaned
    /// session no robot reconnected to. A reconnect that raced the timer and
    /// won is detected via the session's current state and left alone.
    async fn reap_if_unclaimed(&self, k: &SessionKey, session: Arc<RobotSession>) {
        let (user_id, robot_id) = (k.0.as_str(), k.1.as_str());
        match session.state().await {
            crate::session::ConnectionState::Pending => {
                self.pending.write().await.remove(k);
                self.death_candidates.write().await.remove(k);
                session.destroy().await;
                warn!(user_id, robot_id, "pending registration never claimed, session destroyed");
            },
            crate::session::ConnectionState::Orphaned => {
                self.robots.write().await.remove(k);
                self.death_candidates.write().await.remove(k);
                session.destroy().await;
                warn!(user_id, robot_id, "reconnect grace window elapsed, session destroyed");
            },
            crate::session::ConnectionState::Live | crate::session::ConnectionState::Destroyed => {},
        }
    }

    /// Forcibly destroys every tracked session, e.g. on shutdown.
    pub async fn terminate(&self) {
        for candidate in self.death_candidates.write().await.drain().collect::<Vec<_>>() {
            candidate.1.token.cancel();
        }
        let sessions: Vec<_> = self.robots.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.destroy().await;
        }
        self.pending.write().await.clear();
    }

    #[must_use]
    pub async fn live_count(&self) -> usize {
        self.robots.read().await.len()
    }

    /// Looks up a currently tracked session (`Live` or `Orphaned`) by
    /// identity, for the master-facing `destroy` / explicit teardown path.
    #[must_use]
    pub async fn find_session(&self, user_id: &str, robot_id: &str) -> Option<Arc<RobotSession>> {
        self.robots.read().await.get(&key(user_id, robot_id)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::master::test_util::RecordingMasterUser;

    #[tokio::test]
    async fn first_connection_matches_pending_registration() {
        let gateway = Gateway::new(Duration::from_millis(50));
        let recorder = Arc::new(RecordingMasterUser::default());
        gateway.remote_create_namespace("u1", "r1", b"secret".to_vec(), recorder).await.expect("register");

        let session = gateway.request_avatar("u1", "r1", b"secret").await.expect("auth ok");
        session.register_connection_to_robot(tokio::sync::mpsc::unbounded_channel().0).await;
        assert_eq!(gateway.live_count().await, 1);
    }

    #[tokio::test]
    async fn wrong_key_is_rejected() {
        let gateway = Gateway::new(Duration::from_millis(50));
        let recorder = Arc::new(RecordingMasterUser::default());
        gateway.remote_create_namespace("u1", "r1", b"secret".to_vec(), recorder).await.expect("register");
        let err = gateway.request_avatar("u1", "r1", b"wrong").await.unwrap_err();
        assert_eq!(err, protocol::Error::UnauthorizedLogin);
    }

    #[tokio::test]
    async fn reconnect_within_grace_window_recovers_same_session() {
        let gateway = Gateway::new(Duration::from_millis(200));
        let recorder = Arc::new(RecordingMasterUser::default());
        gateway.remote_create_namespace("u1", "r1", b"secret".to_vec(), recorder).await.expect("register");
        let session = gateway.request_avatar("u1", "r1", b"secret").await.expect("auth ok");
        session.register_connection_to_robot(tokio::sync::mpsc::unbounded_channel().0).await;

        gateway.connection_lost("u1", "r1").await;
        let reconnected = gateway.request_avatar("u1", "r1", b"secret").await.expect("reconnect ok");
        assert!(Arc::ptr_eq(&session, &reconnected));
    }

    #[tokio::test]
    async fn session_is_destroyed_after_grace_window_elapses() {
        let gateway = Gateway::new(Duration::from_millis(20));
        let recorder = Arc::new(RecordingMasterUser::default());
        gateway.remote_create_namespace("u1", "r1", b"secret".to_vec(), recorder).await.expect("register");
        let session = gateway.request_avatar("u1", "r1", b"secret").await.expect("auth ok");
        session.register_connection_to_robot(tokio::sync::mpsc::unbounded_channel().0).await;

        gateway.connection_lost("u1", "r1").await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(gateway.live_count().await, 0);
        assert_eq!(session.state().await, crate::session::ConnectionState::Destroyed);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let gateway = Gateway::new(Duration::from_millis(50));
        let recorder = Arc::new(RecordingMasterUser::default());
        gateway.remote_create_namespace("u1", "r1", b"secret".to_vec(), recorder.clone()).await.expect("register");
        let err = gateway.remote_create_namespace("u1", "r1", b"other".to_vec(), recorder).await.unwrap_err();
        assert!(matches!(err, protocol::Error::Conflict(_)));
    }

    #[tokio::test]
    async fn pending_registration_never_claimed_is_destroyed_after_grace_window() {
        let gateway = Gateway::new(Duration::from_millis(20));
        let recorder = Arc::new(RecordingMasterUser::default());
        gateway.remote_create_namespace("u1", "r1", b"secret".to_vec(), recorder).await.expect("register");

        tokio::time::sleep(Duration::from_millis(80)).await;
        let err = gateway.request_avatar("u1", "r1", b"secret").await.unwrap_err();
        assert_eq!(err, protocol::Error::UnauthorizedLogin);
        assert_eq!(gateway.live_count().await, 0);
    }
}
