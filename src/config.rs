//! Runtime configuration, loaded from environment variables with documented
//! defaults. Nesting mirrors the teacher's `CallCenterConfig { general,
//! database, routing }` split.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GeneralConfig {
    /// Pagination size for user-facing listings.
    pub page_size: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { page_size: 10 }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReservationConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub number_retirement_users: u32,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15 * 60),
            poll_interval: Duration::from_secs(2),
            number_retirement_users: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub message_retention: Duration,
    pub orphan_retention: Duration,
    pub blocked_retention: Duration,
    pub sweep_interval: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            message_retention: Duration::from_secs(3 * 24 * 3600),
            orphan_retention: Duration::from_secs(24 * 3600),
            blocked_retention: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(6 * 3600),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub general: GeneralConfig,
    pub database: DatabaseConfig,
    pub reservation: ReservationConfig,
    pub cleanup: CleanupConfig,
    /// Reserved for authenticating optional webhook-style gateways. `None`
    /// disables signature verification on the webhook ingestion shim.
    pub hmac_secret: Option<String>,
}

impl EngineConfig {
    /// Load configuration from the environment, falling back to the
    /// documented defaults in SPEC_FULL.md §6 for any unset variable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_u64("RESERVATION_TIMEOUT_MIN") {
            config.reservation.timeout = Duration::from_secs(v * 60);
        }
        if let Some(v) = env_u64("POLL_INTERVAL_SEC") {
            config.reservation.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("PAGE_SIZE") {
            config.general.page_size = v as u32;
        }
        if let Some(v) = env_u64("MESSAGE_RETENTION_DAYS") {
            config.cleanup.message_retention = Duration::from_secs(v * 24 * 3600);
        }
        if let Some(v) = env_u64("ORPHAN_RETENTION_HOURS") {
            config.cleanup.orphan_retention = Duration::from_secs(v * 3600);
        }
        if let Some(v) = env_u64("BLOCKED_RETENTION_HOURS") {
            config.cleanup.blocked_retention = Duration::from_secs(v * 3600);
        }
        if let Some(v) = env_u64("CLEANUP_INTERVAL_HOURS") {
            config.cleanup.sweep_interval = Duration::from_secs(v * 3600);
        }
        if let Some(v) = env_u64("NUMBER_RETIREMENT_USERS") {
            config.reservation.number_retirement_users = v as u32;
        }
        if let Ok(v) = env::var("HMAC_SECRET") {
            if !v.is_empty() {
                config.hmac_secret = Some(v);
            }
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            if !v.is_empty() {
                config.database.database_url = v;
            }
        }

        config
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
