//! Reservation lifecycle queries.

use chrono::{DateTime, Utc};
use sqlx::Row;

use super::DatabaseManager;
use crate::domain::{NumberId, Reservation, ReservationId, ReservationStatus, ServiceId, UserId};
use crate::error::EngineResult;

impl DatabaseManager {
    pub async fn insert_reservation(
        &self,
        user_id: UserId,
        service_id: ServiceId,
        number_id: NumberId,
        expired_at: DateTime<Utc>,
    ) -> EngineResult<Reservation> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO reservations (user_id, service_id, number_id, status, created_at, expired_at) VALUES (?, ?, ?, 'WAITING_CODE', ?, ?)",
        )
        .bind(user_id.0)
        .bind(service_id.0)
        .bind(number_id.0)
        .bind(now)
        .bind(expired_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Reservation {
            id: ReservationId(id),
            user_id,
            service_id,
            number_id,
            status: ReservationStatus::WaitingCode,
            created_at: now,
            expired_at,
            completed_at: None,
            code_value: None,
        })
    }

    pub async fn get_reservation(&self, id: ReservationId) -> EngineResult<Option<Reservation>> {
        let row = sqlx::query("SELECT * FROM reservations WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_reservation(&r)))
    }

    pub async fn find_active_by_number(&self, number_id: NumberId) -> EngineResult<Option<Reservation>> {
        let row = sqlx::query(
            "SELECT * FROM reservations WHERE number_id = ? AND status = 'WAITING_CODE' ORDER BY id DESC LIMIT 1",
        )
        .bind(number_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| row_to_reservation(&r)))
    }

    pub async fn find_active_by_user(&self, user_id: UserId) -> EngineResult<Vec<Reservation>> {
        let rows = sqlx::query(
            "SELECT * FROM reservations WHERE user_id = ? AND status = 'WAITING_CODE' ORDER BY id",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_reservation).collect())
    }

    pub async fn complete_reservation(
        &self,
        id: ReservationId,
        code_value: &str,
    ) -> EngineResult<()> {
        sqlx::query(
            "UPDATE reservations SET status = 'COMPLETED', completed_at = ?, code_value = ? WHERE id = ? AND status = 'WAITING_CODE'",
        )
        .bind(Utc::now())
        .bind(code_value)
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_reservation_status(
        &self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> EngineResult<bool> {
        let result = sqlx::query(
            "UPDATE reservations SET status = ? WHERE id = ? AND status = 'WAITING_CODE'",
        )
        .bind(status.as_str())
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_expired_waiting(&self, now: DateTime<Utc>) -> EngineResult<Vec<Reservation>> {
        let rows = sqlx::query(
            "SELECT * FROM reservations WHERE status = 'WAITING_CODE' AND expired_at < ?",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_reservation).collect())
    }

    /// Number of distinct users who have ever completed a reservation on
    /// this number, used by the retirement check after billing.
    pub async fn count_distinct_completed_users(&self, number_id: NumberId) -> EngineResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT user_id) as c FROM reservations WHERE number_id = ? AND status = 'COMPLETED'",
        )
        .bind(number_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("c"))
    }

    /// `usedNumberIds`: every number this user has ever completed a
    /// reservation against, excluded from their own future allocation
    /// candidates per §4.3 step 1.
    pub async fn find_completed_number_ids(&self, user_id: UserId) -> EngineResult<Vec<NumberId>> {
        let rows = sqlx::query(
            "SELECT DISTINCT number_id FROM reservations WHERE user_id = ? AND status = 'COMPLETED'",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| NumberId(r.get("number_id"))).collect())
    }
}

fn row_to_reservation(row: &sqlx::sqlite::SqliteRow) -> Reservation {
    Reservation {
        id: ReservationId(row.get("id")),
        user_id: UserId(row.get("user_id")),
        service_id: ServiceId(row.get("service_id")),
        number_id: NumberId(row.get("number_id")),
        status: ReservationStatus::from_str(row.get("status")).unwrap_or(ReservationStatus::Canceled),
        created_at: row.get("created_at"),
        expired_at: row.get("expired_at"),
        completed_at: row.get("completed_at"),
        code_value: row.get("code_value"),
    }
}
