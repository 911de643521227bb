//! Background scheduler (component G): expiry sweep, per-reservation
//! auto-search, and retention cleanup, each an independent `tokio::spawn`
//! loop on a `tokio::time::interval`. Grounded on the teacher's
//! `monitor_loop`/`queue_processor_loop` pair in `server.rs`; auto-search
//! timing follows the source bot's `auto_search_for_code`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::billing::{Billing, BillingOutcome};
use crate::config::{CleanupConfig, ReservationConfig};
use crate::database::DatabaseManager;
use crate::domain::{ReservationId, ReservationStatus, ServiceId};
use crate::extract::{extract_code_with_context, extract_full};
use crate::notify::{NotificationSink, Template};
use crate::reservation::ReservationEngine;

const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const AUTO_SEARCH_INITIAL_DELAY: Duration = Duration::from_secs(5);
const AUTO_SEARCH_POLL_INTERVAL: Duration = Duration::from_secs(2);
const AUTO_SEARCH_MAX_WALL_CLOCK: Duration = Duration::from_secs(5 * 60);

pub struct Scheduler<N: NotificationSink> {
    db: DatabaseManager,
    reservations: ReservationEngine,
    billing: Arc<Billing<N>>,
    notifier: N,
    cleanup: CleanupConfig,
    /// Serializes retention sweeps so only one runs at a time, per §4.7.
    cleanup_lock: Arc<Mutex<()>>,
}

impl<N: NotificationSink> Scheduler<N> {
    pub fn new(
        db: DatabaseManager,
        reservations: ReservationEngine,
        billing: Billing<N>,
        notifier: N,
        _reservation_config: &ReservationConfig,
        cleanup: CleanupConfig,
    ) -> Self {
        Self {
            db,
            reservations,
            billing: Arc::new(billing),
            notifier,
            cleanup,
            cleanup_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Spawns the expiry sweep and retention cleanup loops. Auto-search
    /// tasks are spawned per-reservation via [`Scheduler::spawn_auto_search`]
    /// at reservation creation time, not here.
    pub fn spawn_background_jobs(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![self.clone().spawn_expiry_sweep(), self.clone().spawn_retention_cleanup()]
    }

    fn spawn_expiry_sweep(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(EXPIRY_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_expiry_sweep().await {
                    tracing::error!("expiry sweep failed: {}", e);
                }
            }
        })
    }

    async fn run_expiry_sweep(&self) -> crate::error::EngineResult<()> {
        let expired = self.db.find_expired_waiting(Utc::now()).await?;
        for reservation in expired {
            if let Err(e) = self.expire_one(reservation.id).await {
                tracing::warn!("failed to expire reservation {}: {}", reservation.id.0, e);
            }
        }
        Ok(())
    }

    async fn expire_one(&self, reservation_id: ReservationId) -> crate::error::EngineResult<()> {
        let Some(reservation) = self.db.get_reservation(reservation_id).await? else {
            return Ok(());
        };
        if reservation.status != ReservationStatus::WaitingCode {
            return Ok(());
        }
        let number = self.db.get_number(reservation.number_id).await?;
        self.reservations.expire(reservation_id).await?;

        if let Some(user) = self.db.get_user(reservation.user_id).await? {
            let phone = number.map(|n| n.phone_number).unwrap_or_default();
            self.notifier
                .notify_user(&user.external_id, Template::ReservationExpired, &[("phone", &phone)])
                .await;
        }
        Ok(())
    }

    /// Opportunistic code search for one reservation: polls recent
    /// ProviderMessages for the reservation's number/service and bills on
    /// the first usable code. Self-terminates when the reservation leaves
    /// WAITING_CODE (observed each poll) or after the wall-clock cap.
    pub fn spawn_auto_search(self: &Arc<Self>, reservation_id: ReservationId) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(AUTO_SEARCH_INITIAL_DELAY).await;
            let deadline = tokio::time::Instant::now() + AUTO_SEARCH_MAX_WALL_CLOCK;
            let mut ticker = interval(AUTO_SEARCH_POLL_INTERVAL);

            loop {
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                let Ok(Some(reservation)) = scheduler.db.get_reservation(reservation_id).await else {
                    break;
                };
                if reservation.status != ReservationStatus::WaitingCode {
                    break;
                }

                if let Err(e) = scheduler.try_auto_bill(reservation_id).await {
                    tracing::debug!("auto-search attempt failed for {}: {}", reservation_id.0, e);
                }

                ticker.tick().await;
            }
        })
    }

    async fn try_auto_bill(&self, reservation_id: ReservationId) -> crate::error::EngineResult<()> {
        let Some(reservation) = self.db.get_reservation(reservation_id).await? else {
            return Ok(());
        };
        let orphans = self.db.find_orphans_for_service(reservation.service_id).await?;
        for message in orphans {
            let (phone, mut code) = extract_full(&message.text);
            if code.is_none() {
                code = extract_code_with_context(&message.text, None, None);
            }
            let Some(code) = code else { continue };
            if let Some(number) = self.db.get_number(reservation.number_id).await? {
                if phone.as_deref().is_some_and(|p| p != number.phone_number) {
                    continue;
                }
            }
            match self.billing.complete(reservation_id, &code).await? {
                BillingOutcome::Completed { .. } => {
                    self.db
                        .set_message_status(message.id, crate::domain::MessageStatus::Processed)
                        .await?;
                    return Ok(());
                }
                BillingOutcome::InsufficientFunds | BillingOutcome::InvalidState => return Ok(()),
            }
        }
        Ok(())
    }

    fn spawn_retention_cleanup(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.cleanup.sweep_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_retention_sweep().await {
                    tracing::error!("retention sweep failed: {}", e);
                }
            }
        })
    }

    async fn run_retention_sweep(&self) -> crate::error::EngineResult<()> {
        let _guard = self.cleanup_lock.lock().await;
        let now = Utc::now();

        let orphan_cutoff = now - chrono_duration(self.cleanup.orphan_retention);
        let orphans = self.db.find_orphans_older_than(orphan_cutoff).await?;
        for orphan in &orphans {
            self.db.delete_message(orphan.id).await?;
        }

        let message_cutoff = now - chrono_duration(self.cleanup.message_retention);
        let deleted_messages = self.db.delete_messages_older_than(message_cutoff).await?;

        let blocked_cutoff = now - chrono_duration(self.cleanup.blocked_retention);
        let deleted_blocked = self.db.delete_blocked_older_than(blocked_cutoff).await?;

        tracing::info!(
            deleted_orphans = orphans.len(),
            deleted_messages,
            deleted_blocked,
            "retention sweep complete"
        );
        Ok(())
    }

    /// Re-runs the correlator from step 4 for every ORPHAN message still
    /// inside the orphan-retention window, in case a matching reservation
    /// appeared after the message arrived.
    pub async fn reprocess_orphans(
        &self,
        correlator: &crate::correlator::Correlator<N>,
        service_ids: &[ServiceId],
    ) -> crate::error::EngineResult<usize> {
        let cutoff = Utc::now() - chrono_duration(self.cleanup.orphan_retention);
        let mut rebound = 0;
        for service_id in service_ids {
            let orphans = self.db.find_orphans_for_service(*service_id).await?;
            for orphan in orphans {
                if orphan.received_at < cutoff {
                    continue;
                }
                let outcome = correlator
                    .reprocess_orphan(orphan.id, &orphan.text, service_ids)
                    .await?;
                if outcome == crate::correlator::CorrelationOutcome::Completed {
                    rebound += 1;
                }
            }
        }
        Ok(rebound)
    }
}

fn chrono_duration(std_duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(std_duration).unwrap_or(chrono::Duration::zero())
}
