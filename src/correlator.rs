//! Inbound-message correlator (component E): binds SMS text to a
//! reservation and drives billing. Implements the six-step pipeline from
//! §4.4.

use chrono::{DateTime, Utc};

use crate::billing::{Billing, BillingOutcome};
use crate::database::DatabaseManager;
use crate::domain::{MessageStatus, ServiceId};
use crate::error::EngineResult;
use crate::extract::{extract_code_with_context, extract_full, extract_masked_tail};
use crate::notify::NotificationSink;

#[derive(Debug, PartialEq, Eq)]
pub enum CorrelationOutcome {
    Completed,
    InsufficientFunds,
    Rejected,
    Orphan,
    DuplicateIgnored,
    Dropped,
}

pub struct Correlator<N: NotificationSink> {
    db: DatabaseManager,
    billing: Billing<N>,
}

impl<N: NotificationSink> Correlator<N> {
    pub fn new(db: DatabaseManager, billing: Billing<N>) -> Self {
        Self { db, billing }
    }

    pub async fn submit(
        &self,
        group_chat_id: &str,
        sender_id: &str,
        text: &str,
        received_at: DateTime<Utc>,
    ) -> EngineResult<CorrelationOutcome> {
        let groups = self.db.service_groups_for_chat(group_chat_id).await?;
        if groups.is_empty() {
            return Ok(CorrelationOutcome::Dropped);
        }

        // Step 1: group gating + persist for audit. Any group's service id
        // anchors the audit row; resolution below searches all bound services.
        let primary_service = groups[0].service_id;
        let stored = self
            .db
            .insert_message(primary_service, group_chat_id, sender_id, text, received_at, None)
            .await?;
        let Some(message) = stored else {
            return Ok(CorrelationOutcome::DuplicateIgnored);
        };

        let service_ids: Vec<ServiceId> = groups.iter().map(|g| g.service_id).collect();
        let service_pattern = groups.first().map(|g| g.regex_pattern.as_str());

        // Step 2: primary extraction.
        let (phone, mut code) = extract_full(text);

        if phone.is_some() && code.is_some() {
            return self.resolve_and_bill(message.id, phone, code, text, &service_ids, None).await;
        }

        // Step 3: fallback extraction.
        if code.is_none() {
            code = extract_code_with_context(text, None, service_pattern);
        }

        let masked_tail = extract_masked_tail(text);

        if phone.is_none() && code.is_none() {
            self.db
                .insert_blocked_message(primary_service, group_chat_id, sender_id, text, "no_number_or_no_code")
                .await?;
            self.db.set_message_status(message.id, MessageStatus::Rejected).await?;
            return Ok(CorrelationOutcome::Rejected);
        }

        self.resolve_and_bill(message.id, phone, code, text, &service_ids, masked_tail.as_deref())
            .await
    }

    /// Steps 4-6: resolve a Number (by phone or masked tail), bind its
    /// active reservation, and bill.
    async fn resolve_and_bill(
        &self,
        message_id: i64,
        phone: Option<String>,
        code: Option<String>,
        _text: &str,
        service_ids: &[ServiceId],
        masked_tail: Option<&str>,
    ) -> EngineResult<CorrelationOutcome> {
        let Some(code) = code else {
            self.db.set_message_status(message_id, MessageStatus::Orphan).await?;
            return Ok(CorrelationOutcome::Orphan);
        };

        let mut number = None;
        if let Some(phone) = &phone {
            for service_id in service_ids {
                if let Some(n) = self.db.find_number_by_phone(phone, *service_id).await? {
                    number = Some(n);
                    break;
                }
            }
        }
        if number.is_none() {
            if let Some(tail) = masked_tail {
                number = self.db.find_reserved_by_tail(service_ids, tail).await?.into_iter().next();
            }
        }

        let Some(number) = number else {
            self.db.set_message_status(message_id, MessageStatus::Orphan).await?;
            return Ok(CorrelationOutcome::Orphan);
        };

        let Some(reservation) = self.db.find_active_by_number(number.id).await? else {
            self.db.set_message_status(message_id, MessageStatus::Orphan).await?;
            return Ok(CorrelationOutcome::Orphan);
        };

        match self.billing.complete(reservation.id, &code).await? {
            BillingOutcome::Completed { .. } => {
                self.db.set_message_status(message_id, MessageStatus::Processed).await?;
                Ok(CorrelationOutcome::Completed)
            }
            BillingOutcome::InsufficientFunds => {
                self.db.set_message_status(message_id, MessageStatus::Rejected).await?;
                Ok(CorrelationOutcome::InsufficientFunds)
            }
            BillingOutcome::InvalidState => {
                self.db.set_message_status(message_id, MessageStatus::Orphan).await?;
                Ok(CorrelationOutcome::Orphan)
            }
        }
    }

    /// Re-runs the pipeline from step 4 for a single ORPHAN message, used
    /// by the scheduler's orphan-reprocessing job.
    pub async fn reprocess_orphan(&self, message_id: i64, text: &str, service_ids: &[ServiceId]) -> EngineResult<CorrelationOutcome> {
        let (phone, code) = extract_full(text);
        let masked_tail = extract_masked_tail(text);
        let code = code.or_else(|| extract_code_with_context(text, None, None));
        self.resolve_and_bill(message_id, phone, code, text, service_ids, masked_tail.as_deref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReservationConfig;
    use crate::notify::NullSink;
    use crate::reservation::ReservationEngine;
    use rust_decimal::Decimal;
    use std::time::Duration;

    async fn setup() -> (Correlator<NullSink>, DatabaseManager, crate::domain::UserId) {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        let service_id = sqlx::query("INSERT INTO services (name, emoji, default_price, active) VALUES ('WhatsApp', '', '10', 1)")
            .execute(db.pool())
            .await
            .unwrap()
            .last_insert_rowid();
        sqlx::query("INSERT INTO service_groups (service_id, group_chat_id, regex_pattern, active) VALUES (?, 'chat1', '', 1)")
            .bind(service_id)
            .execute(db.pool())
            .await
            .unwrap();

        let user = db.get_or_create_user("tg:1").await.unwrap();
        db.credit(user.id, Decimal::new(100, 0), "seed").await.unwrap();
        db.insert_number("+201112223344", ServiceId(service_id), "+20", None)
            .await
            .unwrap();

        let reservations = ReservationEngine::new(db.clone(), Duration::from_secs(900));
        reservations.reserve(user.id, ServiceId(service_id), "+20").await.unwrap();

        let config = ReservationConfig::default();
        let billing = Billing::new(db.clone(), reservations, NullSink, &config);
        (Correlator::new(db.clone(), billing), db, user.id)
    }

    #[tokio::test]
    async fn happy_path_binds_and_bills() {
        let (correlator, db, user_id) = setup().await;
        let outcome = correlator
            .submit("chat1", "gateway", "to: +201112223344 code: 482913", Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, CorrelationOutcome::Completed);
        let user = db.get_user(user_id).await.unwrap().unwrap();
        assert_eq!(user.balance, Decimal::new(90, 0));
    }

    #[tokio::test]
    async fn masked_tail_resolves_reservation() {
        let (correlator, db, user_id) = setup().await;
        let outcome = correlator
            .submit("chat1", "gateway", "to: 20 11122\u{2022}\u{2022}\u{2022}344 your code is 55921", Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, CorrelationOutcome::Completed);
        let user = db.get_user(user_id).await.unwrap().unwrap();
        assert_eq!(user.balance, Decimal::new(90, 0));
    }

    #[tokio::test]
    async fn duplicate_submission_is_idempotent() {
        let (correlator, _db, _user_id) = setup().await;
        let received = Utc::now();
        let first = correlator.submit("chat1", "gateway", "to: +201112223344 code: 482913", received).await.unwrap();
        let second = correlator.submit("chat1", "gateway", "to: +201112223344 code: 482913", received).await.unwrap();
        assert_eq!(first, CorrelationOutcome::Completed);
        assert_eq!(second, CorrelationOutcome::DuplicateIgnored);
    }

    #[tokio::test]
    async fn ungated_group_is_dropped() {
        let (correlator, _db, _user_id) = setup().await;
        let outcome = correlator.submit("unknown-chat", "gateway", "anything", Utc::now()).await.unwrap();
        assert_eq!(outcome, CorrelationOutcome::Dropped);
    }
}
