//! Number inventory queries: allocation, release, retirement.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;

use super::DatabaseManager;
use crate::domain::{Number, NumberId, NumberStatus, ServiceId, UserId};
use crate::error::EngineResult;

impl DatabaseManager {
    /// Atomically claims one eligible number for `service_id`/`country_code`,
    /// skipping every id in `exclude` (the caller's own previously-completed
    /// numbers per spec §4.3 step 1, plus — for `change_number` — the number
    /// being replaced). Eligible statuses are AVAILABLE and USED: a number
    /// stays claimable by other users until it hits the retirement
    /// threshold and is marked DELETED, which is what makes retirement at N
    /// distinct users reachable at all. Mirrors the teacher's
    /// `reserve_agent`: a conditional UPDATE whose `rows_affected()` tells
    /// us whether the claim won the race.
    pub async fn claim_number(
        &self,
        service_id: ServiceId,
        country_code: &str,
        exclude: &[NumberId],
        reserved_by: UserId,
        expires_at: DateTime<Utc>,
    ) -> EngineResult<Option<Number>> {
        let mut tx = self.pool.begin().await?;

        let exclusion_clause = if exclude.is_empty() {
            String::new()
        } else {
            let placeholders = exclude.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            format!(" AND id NOT IN ({placeholders})")
        };
        let select_sql = format!(
            "SELECT id FROM numbers WHERE service_id = ? AND country_code = ? AND status IN ('AVAILABLE', 'USED'){exclusion_clause} ORDER BY id LIMIT 1"
        );
        let mut select_query = sqlx::query(&select_sql).bind(service_id.0).bind(country_code);
        for id in exclude {
            select_query = select_query.bind(id.0);
        }
        let candidate = select_query.fetch_optional(&mut *tx).await?;

        let Some(row) = candidate else {
            tx.rollback().await?;
            return Ok(None);
        };
        let number_id: i64 = row.get("id");

        // code_received_at is never cleared here: it records whether this
        // number has EVER delivered a code, which the release policy
        // (§4.3) needs intact even across a later claim by a new user.
        let result = sqlx::query(
            "UPDATE numbers SET status = 'RESERVED', reserved_by_user_id = ?, reserved_at = ?, expires_at = ? WHERE id = ? AND status IN ('AVAILABLE', 'USED')",
        )
        .bind(reserved_by.0)
        .bind(Utc::now())
        .bind(expires_at)
        .bind(number_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let row = sqlx::query("SELECT * FROM numbers WHERE id = ?")
            .bind(number_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(row_to_number(&row)))
    }

    /// Reclaims a specific number back to RESERVED for the same user, used
    /// to restore state after a `change_number` attempt finds no
    /// alternative. Unlike `claim_number`, this targets `id` directly
    /// rather than picking the oldest AVAILABLE candidate.
    pub async fn reclaim_number(
        &self,
        id: NumberId,
        reserved_by: UserId,
        reserved_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let result = sqlx::query(
            "UPDATE numbers SET status = 'RESERVED', reserved_by_user_id = ?, reserved_at = ?, expires_at = ?, code_received_at = NULL WHERE id = ? AND status = 'AVAILABLE'",
        )
        .bind(reserved_by.0)
        .bind(reserved_at)
        .bind(expires_at)
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_number(&self, id: NumberId) -> EngineResult<Option<Number>> {
        let row = sqlx::query("SELECT * FROM numbers WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_number(&r)))
    }

    pub async fn find_number_by_phone(
        &self,
        phone_number: &str,
        service_id: ServiceId,
    ) -> EngineResult<Option<Number>> {
        let row = sqlx::query("SELECT * FROM numbers WHERE phone_number = ? AND service_id = ?")
            .bind(phone_number)
            .bind(service_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_number(&r)))
    }

    pub async fn release_number(&self, id: NumberId) -> EngineResult<()> {
        sqlx::query(
            "UPDATE numbers SET status = 'AVAILABLE', reserved_by_user_id = NULL, reserved_at = NULL, expires_at = NULL, code_received_at = NULL WHERE id = ?",
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_number_used(&self, id: NumberId, code_received_at: DateTime<Utc>) -> EngineResult<()> {
        sqlx::query("UPDATE numbers SET status = 'USED', code_received_at = ? WHERE id = ?")
            .bind(code_received_at)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn increment_usage_count(&self, id: NumberId) -> EngineResult<i64> {
        sqlx::query("UPDATE numbers SET usage_count = usage_count + 1 WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        let row = sqlx::query("SELECT usage_count FROM numbers WHERE id = ?")
            .bind(id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("usage_count"))
    }

    pub async fn retire_number(&self, id: NumberId) -> EngineResult<()> {
        sqlx::query("UPDATE numbers SET status = 'DELETED' WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_number(
        &self,
        phone_number: &str,
        service_id: ServiceId,
        country_code: &str,
        price_override: Option<Decimal>,
    ) -> EngineResult<NumberId> {
        let id = sqlx::query(
            "INSERT INTO numbers (phone_number, service_id, country_code, status, price_override) VALUES (?, ?, ?, 'AVAILABLE', ?)",
        )
        .bind(phone_number)
        .bind(service_id.0)
        .bind(country_code)
        .bind(price_override.map(|d| d.to_string()))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(NumberId(id))
    }

    pub async fn count_available(&self, service_id: ServiceId, country_code: &str) -> EngineResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as c FROM numbers WHERE service_id = ? AND country_code = ? AND status = 'AVAILABLE'",
        )
        .bind(service_id.0)
        .bind(country_code)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("c"))
    }

    /// Numbers whose reservation has outlived its expiry window but whose
    /// status hasn't been reconciled yet — consumed by the expiry sweep.
    pub async fn find_expired_reserved(&self, now: DateTime<Utc>) -> EngineResult<Vec<Number>> {
        let rows = sqlx::query("SELECT * FROM numbers WHERE status = 'RESERVED' AND expires_at < ?")
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_number).collect())
    }

    /// Masked-tail fallback lookup: currently-RESERVED numbers belonging to
    /// one of `service_ids` whose phone number ends in `tail`.
    pub async fn find_reserved_by_tail(&self, service_ids: &[ServiceId], tail: &str) -> EngineResult<Vec<Number>> {
        if service_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = service_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT * FROM numbers WHERE status = 'RESERVED' AND service_id IN ({placeholders}) AND phone_number LIKE ? ORDER BY reserved_at"
        );
        let mut query = sqlx::query(&sql);
        for id in service_ids {
            query = query.bind(id.0);
        }
        query = query.bind(format!("%{tail}"));
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_number).collect())
    }
}

fn row_to_number(row: &sqlx::sqlite::SqliteRow) -> Number {
    let price_override: Option<String> = row.get("price_override");
    Number {
        id: NumberId(row.get("id")),
        phone_number: row.get("phone_number"),
        service_id: ServiceId(row.get("service_id")),
        country_code: row.get("country_code"),
        status: NumberStatus::from_str(row.get("status")).unwrap_or(NumberStatus::Available),
        price_override: price_override.and_then(|s| s.parse().ok()),
        reserved_by_user_id: row.get::<Option<i64>, _>("reserved_by_user_id").map(UserId),
        reserved_at: row.get("reserved_at"),
        expires_at: row.get("expires_at"),
        code_received_at: row.get("code_received_at"),
        usage_count: row.get("usage_count"),
    }
}
