//! User queries: lookup, balance mutation, ban state.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::Row;

use super::DatabaseManager;
use crate::domain::{User, UserId};
use crate::error::EngineResult;

impl DatabaseManager {
    pub async fn get_or_create_user(&self, external_id: &str) -> EngineResult<User> {
        if let Some(user) = self.find_user_by_external_id(external_id).await? {
            return Ok(user);
        }
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO users (external_id, balance, is_banned, joined_at) VALUES (?, '0', 0, ?)",
        )
        .bind(external_id)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(User {
            id: UserId(id),
            external_id: external_id.to_string(),
            balance: Decimal::ZERO,
            is_banned: false,
            joined_at: now,
            language_tag: None,
        })
    }

    pub async fn find_user_by_external_id(&self, external_id: &str) -> EngineResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_user(&r)))
    }

    pub async fn get_user(&self, id: UserId) -> EngineResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_user(&r)))
    }

    pub async fn set_user_language(&self, id: UserId, language_tag: &str) -> EngineResult<()> {
        sqlx::query("UPDATE users SET language_tag = ? WHERE id = ?")
            .bind(language_tag)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_user_banned(&self, id: UserId, banned: bool) -> EngineResult<()> {
        sqlx::query("UPDATE users SET is_banned = ? WHERE id = ?")
            .bind(banned)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub(crate) fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> User {
    let balance: String = row.get("balance");
    User {
        id: UserId(row.get("id")),
        external_id: row.get("external_id"),
        balance: balance.parse().unwrap_or(Decimal::ZERO),
        is_banned: row.get::<i64, _>("is_banned") != 0,
        joined_at: row.get("joined_at"),
        language_tag: row.get("language_tag"),
    }
}
