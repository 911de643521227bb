//! Reservation and SMS-correlation engine for short-lived rented phone
//! numbers. See [`server::Server`] for the top-level entry point.

pub mod billing;
pub mod config;
pub mod correlator;
pub mod database;
pub mod domain;
pub mod error;
pub mod extract;
pub mod notify;
pub mod normalize;
pub mod reservation;
pub mod scheduler;
pub mod server;
pub mod webhook;

pub mod prelude {
    pub use crate::billing::{Billing, BillingOutcome};
    pub use crate::config::EngineConfig;
    pub use crate::correlator::{Correlator, CorrelationOutcome};
    pub use crate::database::DatabaseManager;
    pub use crate::domain::*;
    pub use crate::error::{EngineError, EngineResult};
    pub use crate::notify::{LoggingSink, NotificationSink, NullSink, Template};
    pub use crate::reservation::ReservationEngine;
    pub use crate::server::{Server, ServerBuilder};
}
