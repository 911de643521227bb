//! Top-level server wiring: database, reservation engine, billing,
//! correlator, scheduler, and the admin-controlled maintenance/cleanup
//! scalar flags. Shaped after the teacher's `CallCenterServer` +
//! `CallCenterServerBuilder`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::billing::Billing;
use crate::config::EngineConfig;
use crate::correlator::{CorrelationOutcome, Correlator};
use crate::database::DatabaseManager;
use crate::domain::{ReservationOutcome, ServiceId, UserId};
use crate::error::{EngineError, EngineResult};
use crate::notify::NotificationSink;
use crate::reservation::ReservationEngine;
use crate::scheduler::Scheduler;
use crate::webhook;

/// Owns the engine's process-wide scalar state: a maintenance flag and a
/// cleanup-enabled flag, mutated only through admin operations and read
/// without locking. Grounded on the source bot's module-level
/// `maintenance_mode` / `auto_cleanup_enabled` globals.
pub struct Server<N: NotificationSink> {
    db: DatabaseManager,
    reservations: ReservationEngine,
    correlator: Arc<Correlator<N>>,
    scheduler: Arc<Scheduler<N>>,
    background_handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
    maintenance_mode: AtomicBool,
    cleanup_enabled: AtomicBool,
    hmac_secret: Option<String>,
}

impl<N: NotificationSink> Server<N> {
    pub async fn new(config: EngineConfig, notifier: N) -> EngineResult<Arc<Self>> {
        let hmac_secret = config.hmac_secret.clone();
        let db = DatabaseManager::new(&config.database.database_url).await?;
        let reservations = ReservationEngine::new(db.clone(), config.reservation.timeout);

        // Correlator and scheduler each own an independent Billing instance
        // (neither borrows the other); both close over the same pool, so
        // they observe one consistent store.
        let billing = Billing::new(db.clone(), reservations.clone(), notifier.clone(), &config.reservation);
        let scheduler_billing = Billing::new(db.clone(), reservations.clone(), notifier.clone(), &config.reservation);

        let correlator = Correlator::new(db.clone(), billing);
        let scheduler = Scheduler::new(
            db.clone(),
            reservations.clone(),
            scheduler_billing,
            notifier.clone(),
            &config.reservation,
            config.cleanup.clone(),
        );

        Ok(Arc::new(Self {
            db,
            reservations,
            correlator: Arc::new(correlator),
            scheduler: Arc::new(scheduler),
            background_handles: std::sync::Mutex::new(Vec::new()),
            maintenance_mode: AtomicBool::new(false),
            cleanup_enabled: AtomicBool::new(true),
            hmac_secret,
        }))
    }

    pub fn start(self: &Arc<Self>) {
        let mut handles = self.scheduler.spawn_background_jobs();
        self.background_handles.lock().unwrap().append(&mut handles);
        tracing::info!("server started: expiry sweep + retention cleanup running");
    }

    pub fn stop(&self) {
        for handle in self.background_handles.lock().unwrap().drain(..) {
            handle.abort();
        }
        tracing::info!("server stopped");
    }

    /// Short-circuits `reserve` without touching the store; in-flight
    /// billing and expiry of already-WAITING_CODE reservations proceed
    /// unaffected, per SPEC_FULL.md §4.9.
    pub fn set_maintenance_mode(&self, enabled: bool) {
        self.maintenance_mode.store(enabled, Ordering::Relaxed);
    }

    pub fn is_maintenance_mode(&self) -> bool {
        self.maintenance_mode.load(Ordering::Relaxed)
    }

    pub fn set_cleanup_enabled(&self, enabled: bool) {
        self.cleanup_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_cleanup_enabled(&self) -> bool {
        self.cleanup_enabled.load(Ordering::Relaxed)
    }

    pub async fn reserve(
        self: &Arc<Self>,
        user_id: UserId,
        service_id: ServiceId,
        country_code: &str,
    ) -> EngineResult<ReservationOutcome> {
        if self.is_maintenance_mode() {
            return Err(EngineError::InvalidState);
        }
        let outcome = self.reservations.reserve(user_id, service_id, country_code).await?;
        if let ReservationOutcome::Success(reservation) = &outcome {
            self.scheduler.spawn_auto_search(reservation.id);
        }
        Ok(outcome)
    }

    pub fn reservations(&self) -> &ReservationEngine {
        &self.reservations
    }

    /// Gates entry with an optional HMAC-SHA256 `signature` over `text`
    /// when `HMAC_SECRET` is configured, per SPEC_FULL.md §6, then
    /// delegates to the correlator. Inert (no `signature` required) when
    /// no secret is configured.
    pub async fn submit_message(
        &self,
        group_chat_id: &str,
        sender_id: &str,
        text: &str,
        received_at: chrono::DateTime<chrono::Utc>,
        signature: Option<&str>,
    ) -> EngineResult<CorrelationOutcome> {
        if let Some(secret) = &self.hmac_secret {
            let valid = signature
                .map(|sig| webhook::verify_webhook_signature(secret, text.as_bytes(), sig))
                .unwrap_or(false);
            if !valid {
                return Err(EngineError::InvalidSignature);
            }
        }
        self.correlator.submit(group_chat_id, sender_id, text, received_at).await
    }

    pub async fn reprocess_orphans(&self, service_ids: &[ServiceId]) -> EngineResult<usize> {
        if !self.is_cleanup_enabled() {
            return Ok(0);
        }
        self.scheduler.reprocess_orphans(&self.correlator, service_ids).await
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.db
    }
}

pub struct ServerBuilder<N: NotificationSink> {
    config: Option<EngineConfig>,
    notifier: Option<N>,
}

impl<N: NotificationSink> ServerBuilder<N> {
    pub fn new() -> Self {
        Self { config: None, notifier: None }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_notifier(mut self, notifier: N) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub async fn build(self) -> EngineResult<Arc<Server<N>>> {
        let config = self.config.unwrap_or_default();
        let notifier = self
            .notifier
            .ok_or_else(|| EngineError::Transient("notifier not provided".to_string()))?;
        Server::new(config, notifier).await
    }
}

impl<N: NotificationSink> Default for ServerBuilder<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullSink;

    #[tokio::test]
    async fn maintenance_mode_blocks_reserve() {
        let server = Server::new(EngineConfig::default(), NullSink).await.unwrap();
        server.set_maintenance_mode(true);
        let result = server.reserve(UserId(1), ServiceId(1), "+20").await;
        assert!(matches!(result, Err(EngineError::InvalidState)));
    }

    #[tokio::test]
    async fn builder_produces_working_server() {
        let server = ServerBuilder::new()
            .with_config(EngineConfig::default())
            .with_notifier(NullSink)
            .build()
            .await
            .unwrap();
        assert!(!server.is_maintenance_mode());
        assert!(server.is_cleanup_enabled());
    }
}
