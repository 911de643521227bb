//! Provider message, blocked message, and service-group queries used by
//! the correlator pipeline.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::Row;

use super::DatabaseManager;
use crate::domain::{BlockedMessage, MessageStatus, ProviderMessage, ServiceGroup, ServiceId};
use crate::error::EngineResult;

/// `(group_chat_id, sender_id, text, received_at)` — identical inbound
/// deliveries (provider retries, duplicate webhooks) hash identically.
pub fn dedup_hash(group_chat_id: &str, sender_id: &str, text: &str, received_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(group_chat_id.as_bytes());
    hasher.update(sender_id.as_bytes());
    hasher.update(text.as_bytes());
    hasher.update(received_at.to_rfc3339().as_bytes());
    format!("{:x}", hasher.finalize())
}

impl DatabaseManager {
    /// Inserts a new inbound message, returning `Ok(None)` instead of an
    /// error when the dedup hash collides with one already on file.
    pub async fn insert_message(
        &self,
        service_id: ServiceId,
        group_chat_id: &str,
        sender_id: &str,
        text: &str,
        received_at: DateTime<Utc>,
        raw_payload: Option<&str>,
    ) -> EngineResult<Option<ProviderMessage>> {
        let hash = dedup_hash(group_chat_id, sender_id, text, received_at);

        let existing = sqlx::query("SELECT id FROM provider_messages WHERE dedup_hash = ?")
            .bind(&hash)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Ok(None);
        }

        let id = sqlx::query(
            "INSERT INTO provider_messages (service_id, group_chat_id, sender_id, text, received_at, status, raw_payload, dedup_hash) VALUES (?, ?, ?, ?, ?, 'PENDING', ?, ?)",
        )
        .bind(service_id.0)
        .bind(group_chat_id)
        .bind(sender_id)
        .bind(text)
        .bind(received_at)
        .bind(raw_payload)
        .bind(&hash)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Some(ProviderMessage {
            id,
            service_id,
            group_chat_id: group_chat_id.to_string(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            received_at,
            status: MessageStatus::Pending,
            raw_payload: raw_payload.map(str::to_string),
            processed_at: None,
        }))
    }

    pub async fn set_message_status(&self, id: i64, status: MessageStatus) -> EngineResult<()> {
        sqlx::query("UPDATE provider_messages SET status = ?, processed_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn find_orphans_older_than(&self, cutoff: DateTime<Utc>) -> EngineResult<Vec<ProviderMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM provider_messages WHERE status = 'ORPHAN' AND received_at < ?",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_message).collect())
    }

    pub async fn find_orphans_for_service(&self, service_id: ServiceId) -> EngineResult<Vec<ProviderMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM provider_messages WHERE status = 'ORPHAN' AND service_id = ? ORDER BY received_at",
        )
        .bind(service_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_message).collect())
    }

    pub async fn delete_messages_older_than(&self, cutoff: DateTime<Utc>) -> EngineResult<u64> {
        let result = sqlx::query("DELETE FROM provider_messages WHERE received_at < ? AND status != 'ORPHAN'")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_message(&self, id: i64) -> EngineResult<()> {
        sqlx::query("DELETE FROM provider_messages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_blocked_message(
        &self,
        service_id: ServiceId,
        group_chat_id: &str,
        sender_id: &str,
        text: &str,
        reason: &str,
    ) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO blocked_messages (service_id, group_chat_id, sender_id, text, reason, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(service_id.0)
        .bind(group_chat_id)
        .bind(sender_id)
        .bind(text)
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_blocked_older_than(&self, cutoff: DateTime<Utc>) -> EngineResult<u64> {
        let result = sqlx::query("DELETE FROM blocked_messages WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// `ServiceGroup` rows for a chat, in ascending id (registration) order —
    /// resolves masked-tail precedence when several services share a group.
    pub async fn service_groups_for_chat(&self, group_chat_id: &str) -> EngineResult<Vec<ServiceGroup>> {
        let rows = sqlx::query(
            "SELECT sg.service_id, sg.group_chat_id, sg.regex_pattern, sg.active FROM service_groups sg JOIN services s ON s.id = sg.service_id WHERE sg.group_chat_id = ? AND sg.active = 1 ORDER BY sg.service_id",
        )
        .bind(group_chat_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| ServiceGroup {
                service_id: ServiceId(r.get("service_id")),
                group_chat_id: r.get("group_chat_id"),
                regex_pattern: r.get("regex_pattern"),
                active: r.get::<i64, _>("active") != 0,
            })
            .collect())
    }

    pub async fn get_blocked_messages(&self, service_id: ServiceId) -> EngineResult<Vec<BlockedMessage>> {
        let rows = sqlx::query("SELECT * FROM blocked_messages WHERE service_id = ? ORDER BY id DESC")
            .bind(service_id.0)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| BlockedMessage {
                id: r.get("id"),
                service_id: ServiceId(r.get("service_id")),
                group_chat_id: r.get("group_chat_id"),
                sender_id: r.get("sender_id"),
                text: r.get("text"),
                reason: r.get("reason"),
                created_at: r.get("created_at"),
            })
            .collect())
    }
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> ProviderMessage {
    ProviderMessage {
        id: row.get("id"),
        service_id: ServiceId(row.get("service_id")),
        group_chat_id: row.get("group_chat_id"),
        sender_id: row.get("sender_id"),
        text: row.get("text"),
        received_at: row.get("received_at"),
        status: MessageStatus::from_str(row.get("status")).unwrap_or(MessageStatus::Pending),
        raw_payload: row.get("raw_payload"),
        processed_at: row.get("processed_at"),
    }
}
