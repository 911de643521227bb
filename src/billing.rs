//! Atomic billing (component F): debit, reservation completion, and
//! number-retirement check in a single transaction, per §4.5. Mirrors the
//! teacher's `assign_call_to_agent` multi-statement transaction shape.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::Row;

use crate::config::ReservationConfig;
use crate::database::DatabaseManager;
use crate::domain::{ReservationId, ReservationStatus};
use crate::error::{EngineError, EngineResult};
use crate::notify::{NotificationSink, Template};
use crate::reservation::ReservationEngine;

#[derive(Debug, PartialEq, Eq)]
pub enum BillingOutcome {
    Completed { amount: Decimal, new_balance: Decimal },
    InsufficientFunds,
    InvalidState,
}

pub struct Billing<N: NotificationSink> {
    db: DatabaseManager,
    reservations: ReservationEngine,
    notifier: N,
    retirement_threshold: u32,
}

impl<N: NotificationSink> Billing<N> {
    pub fn new(db: DatabaseManager, reservations: ReservationEngine, notifier: N, config: &ReservationConfig) -> Self {
        Self {
            db,
            reservations,
            notifier,
            retirement_threshold: config.number_retirement_users,
        }
    }

    pub async fn complete(&self, reservation_id: ReservationId, code: &str) -> EngineResult<BillingOutcome> {
        let Some(reservation) = self.db.get_reservation(reservation_id).await? else {
            return Err(EngineError::NotFound(format!("reservation {}", reservation_id.0)));
        };
        if reservation.status != ReservationStatus::WaitingCode {
            return Ok(BillingOutcome::InvalidState);
        }

        let Some(number) = self.db.get_number(reservation.number_id).await? else {
            return Err(EngineError::NotFound(format!("number {}", reservation.number_id.0)));
        };
        let Some(service) = self.get_service(reservation.service_id.0).await? else {
            return Err(EngineError::NotFound(format!("service {}", reservation.service_id.0)));
        };
        let price = number.price_override.unwrap_or(service.1);

        let user = self
            .db
            .get_user(reservation.user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("user {}", reservation.user_id.0)))?;

        if user.balance < price {
            self.reservations.expire(reservation_id).await?;
            self.notifier
                .notify_user(&user.external_id, Template::InsufficientBalance, &[("phone", &number.phone_number)])
                .await;
            return Ok(BillingOutcome::InsufficientFunds);
        }

        let mut tx = self.db.begin_transaction().await?;
        self.db
            .debit_in_tx(&mut tx, reservation.user_id, price, &format!("{}:{}", service.0, number.phone_number))
            .await?;

        sqlx::query("UPDATE reservations SET status = 'COMPLETED', completed_at = ?, code_value = ? WHERE id = ? AND status = 'WAITING_CODE'")
            .bind(Utc::now())
            .bind(code)
            .bind(reservation_id.0)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE numbers SET status = 'USED', code_received_at = ?, usage_count = usage_count + 1 WHERE id = ?")
            .bind(Utc::now())
            .bind(number.id.0)
            .execute(&mut *tx)
            .await?;

        let distinct_users: i64 = sqlx::query(
            "SELECT COUNT(DISTINCT user_id) as c FROM reservations WHERE number_id = ? AND status = 'COMPLETED'",
        )
        .bind(number.id.0)
        .fetch_one(&mut *tx)
        .await?
        .get("c");

        if distinct_users >= self.retirement_threshold as i64 {
            sqlx::query("UPDATE numbers SET status = 'DELETED' WHERE id = ?")
                .bind(number.id.0)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("INSERT INTO transactions (user_id, kind, amount, reason, created_at) VALUES (?, 'PURCHASE', ?, ?, ?)")
            .bind(reservation.user_id.0)
            .bind(price.to_string())
            .bind(format!("{} / {}", service.0, number.phone_number))
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        let remaining_stock: i64 = sqlx::query(
            "SELECT COUNT(*) as c FROM numbers WHERE service_id = ? AND country_code = ? AND status = 'AVAILABLE' AND id != ?",
        )
        .bind(reservation.service_id.0)
        .bind(&number.country_code)
        .bind(number.id.0)
        .fetch_one(&mut *tx)
        .await?
        .get("c");

        tx.commit().await?;

        let new_balance = user.balance - price;
        self.notifier
            .notify_user(
                &user.external_id,
                Template::CodeDelivered,
                &[
                    ("phone", &number.phone_number),
                    ("code", code),
                    ("amount", &price.to_string()),
                    ("balance", &new_balance.to_string()),
                ],
            )
            .await;
        if remaining_stock == 0 {
            self.notifier
                .notify_operator(Template::LowStock, &[("service", &service.0), ("country", &number.country_code)])
                .await;
        }

        Ok(BillingOutcome::Completed { amount: price, new_balance })
    }

    async fn get_service(&self, id: i64) -> EngineResult<Option<(String, Decimal)>> {
        let row = sqlx::query("SELECT name, default_price FROM services WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.map(|r| {
            let price: String = r.get("default_price");
            (r.get::<String, _>("name"), price.parse().unwrap_or(Decimal::ZERO))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullSink;
    use std::time::Duration;

    async fn setup() -> (Billing<NullSink>, DatabaseManager, crate::domain::UserId, ReservationId) {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        let service_id = sqlx::query("INSERT INTO services (name, emoji, default_price, active) VALUES ('WhatsApp', '', '10', 1)")
            .execute(db.pool())
            .await
            .unwrap()
            .last_insert_rowid();
        let user = db.get_or_create_user("tg:1").await.unwrap();
        db.credit(user.id, Decimal::new(100, 0), "seed").await.unwrap();
        db.insert_number("+201112223344", crate::domain::ServiceId(service_id), "+20", None)
            .await
            .unwrap();

        let reservations = ReservationEngine::new(db.clone(), Duration::from_secs(900));
        let outcome = reservations
            .reserve(user.id, crate::domain::ServiceId(service_id), "+20")
            .await
            .unwrap();
        let crate::domain::ReservationOutcome::Success(reservation) = outcome else {
            panic!("expected reservation");
        };

        let config = ReservationConfig::default();
        let billing = Billing::new(db.clone(), reservations, NullSink, &config);
        (billing, db, user.id, reservation.id)
    }

    #[tokio::test]
    async fn happy_path_debits_and_completes() {
        let (billing, db, user_id, reservation_id) = setup().await;
        let outcome = billing.complete(reservation_id, "482913").await.unwrap();
        match outcome {
            BillingOutcome::Completed { amount, new_balance } => {
                assert_eq!(amount, Decimal::new(10, 0));
                assert_eq!(new_balance, Decimal::new(90, 0));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let user = db.get_user(user_id).await.unwrap().unwrap();
        assert_eq!(user.balance, Decimal::new(90, 0));
    }

    #[tokio::test]
    async fn insufficient_funds_expires_reservation_without_charge() {
        let (billing, db, user_id, reservation_id) = setup().await;
        sqlx::query("UPDATE users SET balance = '3' WHERE id = ?")
            .bind(user_id.0)
            .execute(db.pool())
            .await
            .unwrap();

        let outcome = billing.complete(reservation_id, "482913").await.unwrap();
        assert_eq!(outcome, BillingOutcome::InsufficientFunds);

        let reservation = db.get_reservation(reservation_id).await.unwrap().unwrap();
        assert_eq!(reservation.status, ReservationStatus::Expired);

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions WHERE kind = 'PURCHASE'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }
}
