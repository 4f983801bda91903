//! Supervisor-owned session registry.
//!
//! Sessions insert themselves on accept and remove themselves on close.
//! The registry exists for exactly one consumer: graceful shutdown, which
//! has to tear down every STT upstream and close every connection within a
//! bounded grace period.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::session::SessionHandle;

struct RegisteredSession {
    handle: SessionHandle,
    /// Cancelling this closes the session's transport connection.
    closing: CancellationToken,
}

/// Process-wide map of live sessions by id.
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<HashMap<u64, RegisteredSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, id: u64, handle: SessionHandle, closing: CancellationToken) {
        self.inner
            .write()
            .await
            .insert(id, RegisteredSession { handle, closing });
        debug!("Session {} registered", id);
    }

    pub async fn remove(&self, id: u64) {
        if self.inner.write().await.remove(&id).is_some() {
            debug!("Session {} deregistered", id);
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Signal every session to shut down and wait, bounded by `grace`, for
    /// the connection loops to deregister themselves.
    pub async fn drain(&self, grace: Duration) {
        let sessions: Vec<(u64, CancellationToken)> = {
            let guard = self.inner.read().await;
            for session in guard.values() {
                session.handle.signal_shutdown();
            }
            guard
                .iter()
                .map(|(id, s)| (*id, s.closing.clone()))
                .collect()
        };

        if sessions.is_empty() {
            return;
        }
        info!("Draining {} active session(s)", sessions.len());
        for (_, closing) in &sessions {
            closing.cancel();
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if self.is_empty().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        info!(
            "Grace period elapsed with {} session(s) still open",
            self.len().await
        );
    }
}
