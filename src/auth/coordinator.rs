use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};

use super::authenticator::Credential;
use super::identity::IdentityService;
use super::terminator::SessionTerminator;
use crate::error::IdentityError;
use crate::metrics::PipelineMetrics;
use crate::session::{EndReason, Revocation, Rotation, Session, SessionEnded, SessionStore};

type RefreshOutcome = Result<Arc<Session>, IdentityError>;
type OutcomeReceiver = watch::Receiver<Option<RefreshOutcome>>;

/// Single-flight credential refresh
///
/// Idle when `in_flight` is `None`, refreshing otherwise. The first auth
/// failure seen while idle spawns the refresh as its own task; every failure
/// arriving before that task publishes attaches to the same watch channel and
/// receives the same outcome. Waiters hold no lock while they wait, and
/// dropping a waiter never cancels the refresh.
///
/// Login and logout also go through the `in_flight` lock so they cannot
/// interleave with a refresh publishing its result.
pub struct RefreshCoordinator {
    store: SessionStore,
    identity: Arc<dyn IdentityService>,
    terminator: SessionTerminator,
    metrics: Arc<PipelineMetrics>,
    refresh_timeout: Duration,
    in_flight: Arc<Mutex<Option<OutcomeReceiver>>>,
}

impl RefreshCoordinator {
    pub fn new(
        store: SessionStore,
        identity: Arc<dyn IdentityService>,
        metrics: Arc<PipelineMetrics>,
        refresh_timeout: Duration,
    ) -> Self {
        let terminator = SessionTerminator::new(store.clone(), metrics.clone());
        Self {
            store,
            identity,
            terminator,
            metrics,
            refresh_timeout,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// The session requests should currently be sent with
    pub async fn current(&self) -> Option<Arc<Session>> {
        self.store.current().await
    }

    pub async fn is_authenticated(&self) -> bool {
        self.store.is_authenticated().await
    }

    /// Session-ended notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEnded> {
        self.terminator.subscribe()
    }

    pub async fn is_refreshing(&self) -> bool {
        self.in_flight.lock().await.is_some()
    }

    /// Log in through the identity service and install the new session
    pub async fn login(&self, username: &str, password: &str) -> Result<Arc<Session>, IdentityError> {
        let grant = self.identity.login(username, password).await?;
        let session = Session::from_grant(grant)?;
        Ok(self.establish(session).await)
    }

    /// Install `session` as the current session
    pub async fn establish(&self, session: Session) -> Arc<Session> {
        let _in_flight = self.in_flight.lock().await;
        let session = self.store.set(session).await;
        tracing::info!("Session established");
        session
    }

    /// End the current session, notifying subscribers if one existed
    pub async fn end(&self, reason: EndReason) -> bool {
        let _in_flight = self.in_flight.lock().await;
        self.terminator.end_session(reason).await
    }

    /// Obtain a session to replay a request that was rejected with `failed`
    ///
    /// Starts a refresh if none is running and the current session is the one
    /// the request was sent with; attaches to the running refresh otherwise.
    /// When the session already moved on since the request was sent, it is
    /// returned directly without another round-trip.
    pub async fn recover(&self, failed: &Credential) -> RefreshOutcome {
        let mut outcome = {
            let mut in_flight = self.in_flight.lock().await;

            // A closed channel means the refresh task died before publishing
            let running = in_flight
                .as_ref()
                .filter(|rx| rx.has_changed().is_ok())
                .cloned();

            match running {
                Some(rx) => {
                    tracing::debug!("Refresh already in flight, waiting for its result");
                    rx
                }
                None => {
                    if in_flight.take().is_some() {
                        tracing::warn!("Discarding refresh operation that ended without a result");
                    }

                    let Some(session) = self.store.current().await else {
                        tracing::debug!("No session to refresh");
                        return Err(IdentityError::NoSession);
                    };

                    if !failed.was_issued_by(&session) {
                        tracing::debug!("Session changed since the request was sent, skipping refresh");
                        self.metrics.record_direct_replay();
                        return Ok(session);
                    }

                    let rx = self.spawn_refresh(session);
                    *in_flight = Some(rx.clone());
                    rx
                }
            }
        };

        let published = outcome
            .wait_for(Option::is_some)
            .await
            .map(|published| published.clone());

        match published {
            Ok(Some(result)) => result,
            _ => Err(IdentityError::Abandoned),
        }
    }

    fn spawn_refresh(&self, session: Arc<Session>) -> OutcomeReceiver {
        let (tx, rx) = watch::channel(None);
        self.metrics.record_refresh_started();

        let operation = RefreshOperation {
            store: self.store.clone(),
            identity: self.identity.clone(),
            terminator: self.terminator.clone(),
            metrics: self.metrics.clone(),
            in_flight: self.in_flight.clone(),
            timeout: self.refresh_timeout,
        };
        tokio::spawn(operation.run(session, tx));

        rx
    }
}

/// The one outstanding identity-service call
struct RefreshOperation {
    store: SessionStore,
    identity: Arc<dyn IdentityService>,
    terminator: SessionTerminator,
    metrics: Arc<PipelineMetrics>,
    in_flight: Arc<Mutex<Option<OutcomeReceiver>>>,
    timeout: Duration,
}

impl RefreshOperation {
    async fn run(self, session: Arc<Session>, tx: watch::Sender<Option<RefreshOutcome>>) {
        tracing::info!("Access token rejected, refreshing session...");

        let refreshed =
            match tokio::time::timeout(self.timeout, self.identity.refresh(&session.refresh_token))
                .await
            {
                Ok(result) => result.and_then(|grant| session.rotate(grant)),
                Err(_) => Err(IdentityError::Timeout(self.timeout)),
            };

        let mut in_flight = self.in_flight.lock().await;
        let outcome = match refreshed {
            Ok(next) => self.publish(&session, next).await,
            Err(e) => self.fail(&session, e).await,
        };

        *in_flight = None;
        tx.send_replace(Some(outcome));
    }

    async fn publish(&self, previous: &Session, next: Session) -> RefreshOutcome {
        match self.store.rotate(&previous.refresh_token, next).await {
            Rotation::Rotated(session) => {
                self.metrics.record_refresh_end(true);
                tracing::info!("Session refreshed");
                Ok(session)
            }
            Rotation::Superseded(Some(current)) => {
                tracing::warn!("Session replaced during refresh, keeping the newer session");
                Ok(current)
            }
            Rotation::Superseded(None) => {
                tracing::warn!("Session ended during refresh, discarding new credentials");
                Err(IdentityError::NoSession)
            }
        }
    }

    async fn fail(&self, previous: &Session, err: IdentityError) -> RefreshOutcome {
        self.metrics.record_refresh_end(false);
        tracing::error!("Token refresh failed: {}", err);

        let reason = EndReason::RefreshFailed {
            message: err.to_string(),
        };
        match self.terminator.end_if_current(&previous.refresh_token, reason).await {
            // A login happened while the refresh was running
            Revocation::Superseded(current) => Ok(current),
            Revocation::Revoked(_) | Revocation::Absent => Err(err),
        }
    }
}
