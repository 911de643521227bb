//! Ledger queries for user balance changes.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::Row;

use super::DatabaseManager;
use crate::domain::{Transaction, TransactionKind, UserId};
use crate::error::{EngineError, EngineResult};

impl DatabaseManager {
    /// Debits `amount` from the user's balance within `tx`, failing with
    /// [`EngineError::InsufficientFunds`] if the conditional UPDATE affects
    /// zero rows (balance too low or user vanished mid-flight). Writes no
    /// ledger row itself — the caller owns the single transaction row for
    /// the operation this debit is part of (billing's PURCHASE row), so a
    /// completion produces exactly one ledger entry, not two.
    pub async fn debit_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        user_id: UserId,
        amount: Decimal,
        _reason: &str,
    ) -> EngineResult<()> {
        let row = sqlx::query("SELECT balance FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(EngineError::InsufficientFunds)?;
        let balance: String = row.get("balance");
        let balance: Decimal = balance.parse().unwrap_or(Decimal::ZERO);

        if balance < amount {
            return Err(EngineError::InsufficientFunds);
        }
        let new_balance = balance - amount;

        sqlx::query("UPDATE users SET balance = ? WHERE id = ?")
            .bind(new_balance.to_string())
            .bind(user_id.0)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    pub async fn credit(&self, user_id: UserId, amount: Decimal, reason: &str) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT balance FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_one(&mut *tx)
            .await?;
        let balance: String = row.get("balance");
        let balance: Decimal = balance.parse().unwrap_or(Decimal::ZERO);
        let new_balance = balance + amount;

        sqlx::query("UPDATE users SET balance = ? WHERE id = ?")
            .bind(new_balance.to_string())
            .bind(user_id.0)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO transactions (user_id, kind, amount, reason, created_at) VALUES (?, 'ADD', ?, ?, ?)",
        )
        .bind(user_id.0)
        .bind(amount.to_string())
        .bind(reason)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_transactions(&self, user_id: UserId, page_size: u32, offset: u32) -> EngineResult<Vec<Transaction>> {
        let rows = sqlx::query(
            "SELECT * FROM transactions WHERE user_id = ? ORDER BY id DESC LIMIT ? OFFSET ?",
        )
        .bind(user_id.0)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_transaction).collect())
    }
}

fn row_to_transaction(row: &sqlx::sqlite::SqliteRow) -> Transaction {
    let amount: String = row.get("amount");
    let kind: String = row.get("kind");
    Transaction {
        id: row.get("id"),
        user_id: UserId(row.get("user_id")),
        kind: match kind.as_str() {
            "ADD" => TransactionKind::Add,
            "DEDUCT" => TransactionKind::Deduct,
            "PURCHASE" => TransactionKind::Purchase,
            _ => TransactionKind::Reward,
        },
        amount: amount.parse().unwrap_or(Decimal::ZERO),
        reason: row.get("reason"),
        created_at: row.get("created_at"),
    }
}
