//! Session registry implementation
//!
//! The central map from session code to live bridge. Connections of
//! either role resolve their code here and meet on the shared bridge.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::bridge::{Bridge, SessionCode};

/// Central registry for all live sessions
///
/// Thread-safe via `RwLock`. The lock is held only for map operations;
/// per-frame forwarding never touches the registry.
pub struct SessionRegistry {
    /// Map of session code to bridge
    sessions: RwLock<HashMap<SessionCode, Arc<Bridge>>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Get the live bridge for a code, creating one if none exists
    ///
    /// A torn-down bridge still sitting in the map (its owner has not
    /// finished cleanup yet) is evicted and replaced, so a code becomes
    /// reusable the moment its session closes.
    pub async fn get_or_create(&self, code: &SessionCode) -> Arc<Bridge> {
        let mut sessions = self.sessions.write().await;

        if let Some(bridge) = sessions.get(code) {
            if !bridge.is_closed() {
                return Arc::clone(bridge);
            }
        }

        let bridge = Arc::new(Bridge::new(code.clone()));
        sessions.insert(code.clone(), Arc::clone(&bridge));

        tracing::info!(
            session = %code,
            total = sessions.len(),
            "Session registered"
        );
        bridge
    }

    /// Remove a session by code
    ///
    /// Removing a code that is absent is a no-op.
    pub async fn remove(&self, code: &SessionCode) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(code).is_some() {
            tracing::info!(
                session = %code,
                total = sessions.len(),
                "Session removed"
            );
        }
    }

    /// Remove a session only if it still maps to the given bridge
    ///
    /// A finished connection cleans up with this so it can never evict a
    /// successor bridge that reused the same code in the meantime.
    pub async fn remove_bridge(&self, code: &SessionCode, bridge: &Arc<Bridge>) {
        let mut sessions = self.sessions.write().await;
        if let Some(current) = sessions.get(code) {
            if Arc::ptr_eq(current, bridge) {
                sessions.remove(code);
                tracing::info!(
                    session = %code,
                    total = sessions.len(),
                    "Session removed"
                );
            }
        }
    }

    /// Find the session that still holds a connection in either role
    ///
    /// Used on the cleanup path: a connection that was displaced finds
    /// nothing here and leaves the session alone.
    pub async fn find_by_connection(&self, conn_id: u64) -> Option<(SessionCode, Arc<Bridge>)> {
        let candidates: Vec<(SessionCode, Arc<Bridge>)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .map(|(code, bridge)| (code.clone(), Arc::clone(bridge)))
                .collect()
        };

        for (code, bridge) in candidates {
            if bridge.holds_connection(conn_id).await {
                return Some((code, bridge));
            }
        }
        None
    }

    /// Number of registered sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Tear down every session and clear the map
    ///
    /// Used on server shutdown.
    pub async fn drain(&self) {
        let sessions: Vec<(SessionCode, Arc<Bridge>)> = {
            let mut map = self.sessions.write().await;
            map.drain().collect()
        };

        for (_code, bridge) in sessions {
            bridge.teardown("server shutdown").await;
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
