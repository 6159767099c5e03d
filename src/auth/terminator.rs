use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::metrics::PipelineMetrics;
use crate::session::{EndReason, Revocation, Session, SessionEnded, SessionStore};

const EVENT_CAPACITY: usize = 16;

/// Clears the session and emits the session-ended signal
///
/// Exactly one notification is emitted per session actually removed; clearing
/// an absent session is a silent no-op.
#[derive(Clone)]
pub struct SessionTerminator {
    store: SessionStore,
    events: broadcast::Sender<SessionEnded>,
    metrics: Arc<PipelineMetrics>,
}

impl SessionTerminator {
    pub fn new(store: SessionStore, metrics: Arc<PipelineMetrics>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            events,
            metrics,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEnded> {
        self.events.subscribe()
    }

    /// End whatever session is current
    pub async fn end_session(&self, reason: EndReason) -> bool {
        match self.store.clear().await {
            Some(session) => {
                self.notify(&session, reason);
                true
            }
            None => false,
        }
    }

    /// End the session only if it still carries `refresh_token`
    pub async fn end_if_current(&self, refresh_token: &str, reason: EndReason) -> Revocation {
        let revocation = self.store.revoke(refresh_token).await;
        if let Revocation::Revoked(ref session) = revocation {
            self.notify(session, reason);
        }
        revocation
    }

    fn notify(&self, session: &Session, reason: EndReason) {
        tracing::warn!(reason = ?reason, "Session ended");
        self.metrics.record_session_ended();

        let event = SessionEnded {
            reason,
            identity: session.identity.clone(),
            ended_at: Utc::now(),
        };
        // Fails only when nobody is subscribed
        if self.events.send(event).is_err() {
            tracing::debug!("No session-ended subscribers");
        }
    }
}
