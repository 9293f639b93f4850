use anyhow::{Context, Result};
use editorial_core::SweepPolicy;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::sweep::SweepSettings;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// Root of the local file storage.
    pub file_storage_dir: PathBuf,
    /// JSON-lines file outbound notifications are appended to.
    pub outbox_path: PathBuf,
    /// Base URL signed invitation links point at.
    pub public_base_url: String,
    pub signed_link_secret: String,
    pub signed_link_ttl_days: u32,
    /// Optional bearer token for the /admin routes.
    /// If not set, the admin routes are disabled (return 503).
    pub admin_auth_token: Option<String>,
    pub sweeps: SweepSettings,
    pub sweep_interval_secs: u64,
    pub retention_interval_secs: u64,
    pub notifications_per_minute: u32,
    pub notification_queue_capacity: usize,
}

/// Read `name`, falling back to `default` when unset.
fn var_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} must be a valid number", name)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = var_or("PORT", 3000u16)?;

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let file_storage_dir = env::var("FILE_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./storage"));

        let outbox_path = env::var("OUTBOX_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("outbox.jsonl"));

        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();

        let signed_link_secret = env::var("SIGNED_LINK_SECRET")
            .context("SIGNED_LINK_SECRET environment variable is required")?;
        if signed_link_secret.is_empty() {
            anyhow::bail!("SIGNED_LINK_SECRET must not be empty");
        }

        let signed_link_ttl_days = var_or("SIGNED_LINK_TTL_DAYS", 14u32)?;

        let admin_auth_token = parse_admin_auth_token(env::var("ADMIN_AUTH_TOKEN").ok());

        let defaults = SweepSettings::default();
        let sweeps = SweepSettings {
            reinvite: SweepPolicy::new(
                var_or("REINVITE_CAP", defaults.reinvite.cap)?,
                var_or("REINVITE_COOLDOWN_DAYS", defaults.reinvite.cooldown_days)?,
            ),
            remind: SweepPolicy::new(
                var_or("REMIND_CAP", defaults.remind.cap)?,
                var_or("REMIND_COOLDOWN_DAYS", defaults.remind.cooldown_days)?,
            ),
            retention_days: var_or("RETENTION_DAYS", defaults.retention_days)?,
        };

        Ok(Config {
            port,
            state_dir,
            file_storage_dir,
            outbox_path,
            public_base_url,
            signed_link_secret,
            signed_link_ttl_days,
            admin_auth_token,
            sweeps,
            sweep_interval_secs: var_or("SWEEP_INTERVAL_SECS", 60u64)?.max(1),
            retention_interval_secs: var_or("RETENTION_INTERVAL_SECS", 86_400u64)?.max(1),
            notifications_per_minute: var_or("NOTIFICATIONS_PER_MINUTE", 30u32)?,
            notification_queue_capacity: var_or("NOTIFICATION_QUEUE_CAPACITY", 256usize)?,
        })
    }
}

/// Parse ADMIN_AUTH_TOKEN from an optional string value.
///
/// Returns None if the value is missing, empty, or contains only whitespace,
/// so an empty token can never authenticate a request.
pub fn parse_admin_auth_token(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
