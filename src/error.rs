//! Component-boundary error types.
//!
//! Mirrors the teacher's split between a store-level error (`DatabaseError`)
//! and an engine-level error (`EngineError`) that wraps it: internal
//! failures are recovered or retried close to the store, and only the
//! tagged variants below cross a component boundary.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no eligible number for this service/country")]
    NoInventory,

    #[error("no alternative number available, original reservation preserved")]
    NoAlternative,

    #[error("operation attempted on a reservation not in the expected state")]
    InvalidState,

    #[error("user balance is insufficient for the service price")]
    InsufficientFunds,

    #[error("message produced neither a phone number nor a code")]
    ExtractionFailed,

    #[error("parsed phone/tail matched no active reservation")]
    NoReservation,

    #[error("webhook signature missing or invalid")]
    InvalidSignature,

    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("transient store error, retry budget exhausted: {0}")]
    Transient(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Retries a store operation up to `attempts` times, classifying persistent
/// failure as [`EngineError::Transient`]. Reservation operations retry up to
/// 3 times per spec.
pub async fn retry_transient<T, F, Fut>(attempts: u32, mut op: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = EngineResult<T>>,
{
    let mut last_err = None;
    for attempt in 0..attempts {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                tracing::warn!("store operation failed (attempt {}/{}): {}", attempt + 1, attempts, e);
                last_err = Some(e);
            }
        }
    }
    Err(EngineError::Transient(
        last_err.map(|e| e.to_string()).unwrap_or_default(),
    ))
}
