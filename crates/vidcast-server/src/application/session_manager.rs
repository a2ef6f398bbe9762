//! Registry of live sessions.
//!
//! The manager is passed explicitly to every session (no global state).  A
//! session registers itself before its media handle is built and
//! unregisters as the last step of teardown.  [`SessionManager::shutdown_all`]
//! signals every registered session and waits until the registry drains.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use vidcast_core::{NegotiationPhase, SessionId};

use crate::application::session::SessionState;

/// One live session as reported by [`SessionManager::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer: String,
    pub phase: NegotiationPhase,
}

struct SessionEntry {
    peer: String,
    state: Arc<SessionState>,
    shutdown: watch::Sender<bool>,
}

struct ManagerInner {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    live: watch::Sender<usize>,
    /// Set by `shutdown_all`; only written under the `sessions` write lock.
    shutting_down: AtomicBool,
}

/// Shared handle to the live-session registry.  Clones share one registry.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    /// Creates an empty registry.
    pub fn new() -> Self {
        let (live, _) = watch::channel(0);
        Self {
            inner: Arc::new(ManagerInner {
                sessions: RwLock::new(HashMap::new()),
                live,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Adds a session and returns its shutdown signal.
    ///
    /// The signal flips to `true` when [`SessionManager::shutdown_all`] runs.
    /// Once shutdown has begun the signal is already `true`, so a late
    /// session closes straight away.  Registering an id that is already
    /// present replaces the old entry.
    pub async fn register(
        &self,
        id: SessionId,
        peer: impl Into<String>,
        state: Arc<SessionState>,
    ) -> watch::Receiver<bool> {
        let peer = peer.into();
        let mut sessions = self.inner.sessions.write().await;
        let stopping = self.inner.shutting_down.load(Ordering::Acquire);
        let (shutdown, signal) = watch::channel(stopping);
        debug!(session = %id, %peer, "registering session");
        sessions.insert(
            id,
            SessionEntry {
                peer,
                state,
                shutdown,
            },
        );
        self.inner.live.send_replace(sessions.len());
        signal
    }

    /// Removes a session.  Returns `false` when it was not registered, which
    /// makes repeated calls harmless.
    pub async fn unregister(&self, id: SessionId) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        let removed = sessions.remove(&id).is_some();
        if removed {
            debug!(session = %id, remaining = sessions.len(), "session unregistered");
            self.inner.live.send_replace(sessions.len());
        }
        removed
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.sessions.read().await.is_empty()
    }

    /// Id, peer and current phase of every live session, ordered by id.
    pub async fn snapshot(&self) -> Vec<SessionInfo> {
        let sessions = self.inner.sessions.read().await;
        let mut infos: Vec<SessionInfo> = sessions
            .iter()
            .map(|(id, entry)| SessionInfo {
                id: *id,
                peer: entry.peer.clone(),
                phase: entry.state.phase(),
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Tells every live session to close and waits until none remain.
    ///
    /// Callers bound this with their own timeout.
    pub async fn shutdown_all(&self) {
        {
            let sessions = self.inner.sessions.write().await;
            self.inner.shutting_down.store(true, Ordering::Release);
            if !sessions.is_empty() {
                info!(live = sessions.len(), "shutting down all sessions");
            }
            for entry in sessions.values() {
                entry.shutdown.send_replace(true);
            }
        }

        let mut live = self.inner.live.subscribe();
        // The sender lives in `inner`, so this only ends when the count hits zero.
        let _ = live.wait_for(|count| *count == 0).await;
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_register_adds_to_live_set() {
        // Arrange
        let manager = SessionManager::new();
        let id = SessionId::new();

        // Act
        let _signal = manager
            .register(id, "127.0.0.1:5000", Arc::new(SessionState::new()))
            .await;

        // Assert
        assert_eq!(manager.len().await, 1);
        assert!(!manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        // Arrange
        let manager = SessionManager::new();
        let id = SessionId::new();
        let _signal = manager
            .register(id, "peer", Arc::new(SessionState::new()))
            .await;

        // Act
        let first = manager.unregister(id).await;
        let second = manager.unregister(id).await;

        // Assert
        assert!(first);
        assert!(!second);
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_unregister_unknown_id_leaves_others_alone() {
        let manager = SessionManager::new();
        let kept = SessionId::new();
        let _signal = manager
            .register(kept, "peer", Arc::new(SessionState::new()))
            .await;

        assert!(!manager.unregister(SessionId::new()).await);
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_reports_phase_of_each_session() {
        // Arrange
        let manager = SessionManager::new();
        let id = SessionId::new();
        let state = Arc::new(SessionState::new());
        let _signal = manager.register(id, "10.0.0.9:4000", state.clone()).await;

        // Act
        let snapshot = manager.snapshot().await;

        // Assert
        assert_eq!(
            snapshot,
            vec![SessionInfo {
                id,
                peer: "10.0.0.9:4000".into(),
                phase: NegotiationPhase::Idle,
            }]
        );
    }

    #[tokio::test]
    async fn test_shutdown_all_with_no_sessions_returns_immediately() {
        let manager = SessionManager::new();

        tokio::time::timeout(Duration::from_secs(1), manager.shutdown_all())
            .await
            .expect("empty registry must not block");
    }

    #[tokio::test]
    async fn test_shutdown_all_signals_and_waits_for_unregister() {
        // Arrange: a fake session that unregisters when signalled
        let manager = SessionManager::new();
        let id = SessionId::new();
        let mut signal = manager
            .register(id, "peer", Arc::new(SessionState::new()))
            .await;
        let worker = {
            let manager = manager.clone();
            tokio::spawn(async move {
                signal.wait_for(|stop| *stop).await.expect("signal");
                manager.unregister(id).await;
            })
        };

        // Act
        tokio::time::timeout(Duration::from_secs(1), manager.shutdown_all())
            .await
            .expect("shutdown_all should finish once the session leaves");

        // Assert
        assert!(manager.is_empty().await);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_session_registered_during_shutdown_is_signalled() {
        // Arrange: one session that takes a while to leave keeps
        // shutdown_all waiting
        let manager = SessionManager::new();
        let early = SessionId::new();
        let mut early_signal = manager
            .register(early, "peer-a", Arc::new(SessionState::new()))
            .await;
        let early_worker = {
            let manager = manager.clone();
            tokio::spawn(async move {
                early_signal.wait_for(|stop| *stop).await.expect("signal");
                tokio::time::sleep(Duration::from_millis(200)).await;
                manager.unregister(early).await;
            })
        };
        let shutdown = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.shutdown_all().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Act: a browser connects while the first session is still closing
        let late = SessionId::new();
        let mut late_signal = manager
            .register(late, "peer-b", Arc::new(SessionState::new()))
            .await;

        // Assert: the late session is told to stop and shutdown_all completes
        assert!(*late_signal.borrow_and_update());
        manager.unregister(late).await;
        tokio::time::timeout(Duration::from_secs(1), shutdown)
            .await
            .expect("shutdown_all should finish once both sessions leave")
            .unwrap();
        assert!(manager.is_empty().await);
        early_worker.await.unwrap();
    }
}
