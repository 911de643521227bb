//! Core entity types. Mirrors the spec's data model (§3); identified by
//! opaque monotonic integer ids, mutated only through the engine/billing/
//! correlator, never constructed ad hoc by callers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NumberId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationId(pub i64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub external_id: String,
    pub balance: Decimal,
    pub is_banned: bool,
    pub joined_at: DateTime<Utc>,
    pub language_tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub emoji: String,
    pub description: Option<String>,
    pub default_price: Decimal,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberStatus {
    Available,
    Reserved,
    Used,
    Deleted,
}

impl NumberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NumberStatus::Available => "AVAILABLE",
            NumberStatus::Reserved => "RESERVED",
            NumberStatus::Used => "USED",
            NumberStatus::Deleted => "DELETED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "AVAILABLE" => Some(NumberStatus::Available),
            "RESERVED" => Some(NumberStatus::Reserved),
            "USED" => Some(NumberStatus::Used),
            "DELETED" => Some(NumberStatus::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Number {
    pub id: NumberId,
    pub phone_number: String,
    pub service_id: ServiceId,
    pub country_code: String,
    pub status: NumberStatus,
    pub price_override: Option<Decimal>,
    pub reserved_by_user_id: Option<UserId>,
    pub reserved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub code_received_at: Option<DateTime<Utc>>,
    pub usage_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    WaitingCode,
    Completed,
    Expired,
    Canceled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::WaitingCode => "WAITING_CODE",
            ReservationStatus::Completed => "COMPLETED",
            ReservationStatus::Expired => "EXPIRED",
            ReservationStatus::Canceled => "CANCELED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "WAITING_CODE" => Some(ReservationStatus::WaitingCode),
            "COMPLETED" => Some(ReservationStatus::Completed),
            "EXPIRED" => Some(ReservationStatus::Expired),
            "CANCELED" => Some(ReservationStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::WaitingCode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub user_id: UserId,
    pub service_id: ServiceId,
    pub number_id: NumberId,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub code_value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Add,
    Deduct,
    Purchase,
    Reward,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Add => "ADD",
            TransactionKind::Deduct => "DEDUCT",
            TransactionKind::Purchase => "PURCHASE",
            TransactionKind::Reward => "REWARD",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Pending,
    Processed,
    Rejected,
    Orphan,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "PENDING",
            MessageStatus::Processed => "PROCESSED",
            MessageStatus::Rejected => "REJECTED",
            MessageStatus::Orphan => "ORPHAN",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(MessageStatus::Pending),
            "PROCESSED" => Some(MessageStatus::Processed),
            "REJECTED" => Some(MessageStatus::Rejected),
            "ORPHAN" => Some(MessageStatus::Orphan),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub id: i64,
    pub service_id: ServiceId,
    pub group_chat_id: String,
    pub sender_id: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub raw_payload: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedMessage {
    pub id: i64,
    pub service_id: ServiceId,
    pub group_chat_id: String,
    pub sender_id: String,
    pub text: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceGroup {
    pub service_id: ServiceId,
    pub group_chat_id: String,
    pub regex_pattern: String,
    pub active: bool,
}

/// Outcome tag returned by the Reservation API (§6), used by the bot/admin
/// collaborators that sit outside the core.
#[derive(Debug)]
pub enum ReservationOutcome {
    Success(Reservation),
    NoInventory,
    NoAlternative,
    InvalidState,
    NotFound,
}
