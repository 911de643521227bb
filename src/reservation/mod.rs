//! Reservation engine (component D). Public operations `reserve`,
//! `change_number`, `change_country`, `cancel`, `status`. Allocation is
//! serialized per `(service, country)` by locking the candidate Number
//! row inside the claiming transaction, mirroring the teacher's
//! `reserve_agent`.

use chrono::Utc;

use crate::database::DatabaseManager;
use crate::domain::{
    Number, NumberId, NumberStatus, Reservation, ReservationId, ReservationOutcome,
    ReservationStatus, ServiceId, UserId,
};
use crate::error::{retry_transient, EngineError, EngineResult};

#[derive(Clone)]
pub struct ReservationEngine {
    db: DatabaseManager,
    timeout: chrono::Duration,
}

impl ReservationEngine {
    pub fn new(db: DatabaseManager, timeout: std::time::Duration) -> Self {
        Self {
            db,
            timeout: chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::minutes(15)),
        }
    }

    /// Allocates the oldest AVAILABLE-or-USED number for `(service,
    /// country)` that this user has never completed a reservation against,
    /// per §4.3's allocation algorithm.
    pub async fn reserve(
        &self,
        user_id: UserId,
        service_id: ServiceId,
        country_code: &str,
    ) -> EngineResult<ReservationOutcome> {
        let used_number_ids = self.db.find_completed_number_ids(user_id).await?;
        let expires_at = Utc::now() + self.timeout;
        let number = retry_transient(3, || {
            self.db
                .claim_number(service_id, country_code, &used_number_ids, user_id, expires_at)
        })
        .await?;

        let Some(number) = number else {
            return Ok(ReservationOutcome::NoInventory);
        };

        let reservation = self
            .db
            .insert_reservation(user_id, service_id, number.id, expires_at)
            .await?;
        tracing::info!(
            reservation_id = reservation.id.0,
            number_id = number.id.0,
            "reservation created"
        );
        Ok(ReservationOutcome::Success(reservation))
    }

    /// Releases the current number, then reserves excluding it. On failure
    /// to find an alternative, restores the original reservation/number
    /// state atomically and reports NoAlternative.
    pub async fn change_number(&self, reservation_id: ReservationId) -> EngineResult<ReservationOutcome> {
        let Some(reservation) = self.db.get_reservation(reservation_id).await? else {
            return Ok(ReservationOutcome::NotFound);
        };
        if reservation.status != ReservationStatus::WaitingCode {
            return Ok(ReservationOutcome::InvalidState);
        }
        let Some(old_number) = self.db.get_number(reservation.number_id).await? else {
            return Ok(ReservationOutcome::NotFound);
        };

        self.release_number(&old_number).await?;
        self.db
            .set_reservation_status(reservation_id, ReservationStatus::Canceled)
            .await?;

        let mut exclude: Vec<NumberId> = self.db.find_completed_number_ids(reservation.user_id).await?;
        if !exclude.contains(&old_number.id) {
            exclude.push(old_number.id);
        }
        let expires_at = Utc::now() + self.timeout;
        let claimed = retry_transient(3, || {
            self.db.claim_number(
                reservation.service_id,
                &old_number.country_code,
                &exclude,
                reservation.user_id,
                expires_at,
            )
        })
        .await?;

        let Some(new_number) = claimed else {
            self.restore_reservation(&reservation, &old_number).await?;
            return Ok(ReservationOutcome::NoAlternative);
        };

        let new_reservation = self
            .db
            .insert_reservation(reservation.user_id, reservation.service_id, new_number.id, expires_at)
            .await?;
        Ok(ReservationOutcome::Success(new_reservation))
    }

    /// Cancels the current reservation outright; the caller is expected to
    /// restart selection with a new country via `reserve`.
    pub async fn change_country(&self, reservation_id: ReservationId) -> EngineResult<ReservationOutcome> {
        self.cancel(reservation_id).await
    }

    pub async fn cancel(&self, reservation_id: ReservationId) -> EngineResult<ReservationOutcome> {
        let Some(reservation) = self.db.get_reservation(reservation_id).await? else {
            return Ok(ReservationOutcome::NotFound);
        };
        if reservation.status != ReservationStatus::WaitingCode {
            return Ok(ReservationOutcome::InvalidState);
        }
        let Some(number) = self.db.get_number(reservation.number_id).await? else {
            return Ok(ReservationOutcome::NotFound);
        };

        self.release_number(&number).await?;
        self.db
            .set_reservation_status(reservation_id, ReservationStatus::Canceled)
            .await?;

        let mut canceled = reservation;
        canceled.status = ReservationStatus::Canceled;
        Ok(ReservationOutcome::Success(canceled))
    }

    pub async fn status(&self, reservation_id: ReservationId) -> EngineResult<ReservationOutcome> {
        match self.db.get_reservation(reservation_id).await? {
            Some(r) => Ok(ReservationOutcome::Success(r)),
            None => Ok(ReservationOutcome::NotFound),
        }
    }

    /// Expires a single reservation and applies the release policy. Used
    /// directly by both the scheduler's sweep and billing's insufficient-
    /// funds path so both share one implementation of §4.3's policy.
    pub async fn expire(&self, reservation_id: ReservationId) -> EngineResult<()> {
        let Some(reservation) = self.db.get_reservation(reservation_id).await? else {
            return Err(EngineError::NotFound(format!("reservation {}", reservation_id.0)));
        };
        let Some(number) = self.db.get_number(reservation.number_id).await? else {
            return Err(EngineError::NotFound(format!("number {}", reservation.number_id.0)));
        };

        self.release_number(&number).await?;
        self.db
            .set_reservation_status(reservation_id, ReservationStatus::Expired)
            .await?;
        Ok(())
    }

    /// §4.3 release policy: a number that has ever delivered a code is
    /// "burned" for recycling and is retired instead of freed.
    async fn release_number(&self, number: &Number) -> EngineResult<()> {
        if number.code_received_at.is_some() {
            self.db.retire_number(number.id).await
        } else {
            self.db.release_number(number.id).await
        }
    }

    async fn restore_reservation(&self, reservation: &Reservation, number: &Number) -> EngineResult<()> {
        let reserved_at = number.reserved_at.unwrap_or_else(Utc::now);
        let reclaimed = self
            .db
            .reclaim_number(number.id, reservation.user_id, reserved_at, reservation.expired_at)
            .await?;
        if !reclaimed {
            // Number was claimed by someone else between release and restore;
            // the reservation stays canceled rather than pointing at a number
            // it no longer holds.
            return Ok(());
        }
        self.db
            .set_reservation_status(reservation.id, ReservationStatus::WaitingCode)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::time::Duration;

    async fn setup() -> (DatabaseManager, ServiceId, UserId) {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        let service_id = sqlx::query(
            "INSERT INTO services (name, emoji, default_price, active) VALUES ('WhatsApp', '', '10', 1)",
        )
        .execute(db.pool())
        .await
        .unwrap()
        .last_insert_rowid();
        let user = db.get_or_create_user("tg:1").await.unwrap();
        db.credit(user.id, Decimal::new(100, 0), "seed").await.unwrap();
        db.insert_number("+201112223344", ServiceId(service_id), "+20", None)
            .await
            .unwrap();
        (db, ServiceId(service_id), user.id)
    }

    #[tokio::test]
    async fn reserve_allocates_available_number() {
        let (db, service_id, user_id) = setup().await;
        let engine = ReservationEngine::new(db, Duration::from_secs(900));
        let outcome = engine.reserve(user_id, service_id, "+20").await.unwrap();
        assert!(matches!(outcome, ReservationOutcome::Success(_)));
    }

    #[tokio::test]
    async fn reserve_returns_no_inventory_when_exhausted() {
        let (db, service_id, user_id) = setup().await;
        let engine = ReservationEngine::new(db, Duration::from_secs(900));
        engine.reserve(user_id, service_id, "+20").await.unwrap();
        let second = engine.reserve(user_id, service_id, "+20").await.unwrap();
        assert!(matches!(second, ReservationOutcome::NoInventory));
    }

    #[tokio::test]
    async fn cancel_releases_unburned_number() {
        let (db, service_id, user_id) = setup().await;
        let engine = ReservationEngine::new(db.clone(), Duration::from_secs(900));
        let ReservationOutcome::Success(reservation) = engine.reserve(user_id, service_id, "+20").await.unwrap() else {
            panic!("expected success");
        };
        engine.cancel(reservation.id).await.unwrap();
        let number = db.get_number(reservation.number_id).await.unwrap().unwrap();
        assert_eq!(number.status, NumberStatus::Available);
    }
}
