use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_COMPLETION_POLL_MS: u64 = 1_000;
pub const DEFAULT_COMPLETION_TIMEOUT_SECS: u64 = 60 * 60;
pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1_000;
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_FROM: &str = "no-reply@example.com";

/// Top-level config (mailcast.toml + MAILCAST_* env overrides).
///
/// Nested keys are addressed with a double underscore in the environment,
/// e.g. `MAILCAST_WORKERS__COUNT=8` or `MAILCAST_SMTP__HOST=smtp.example.com`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailcastConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    /// Absent means mail is only logged, never delivered.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Timing of the scheduler loop and of per-job completion tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between scans for due jobs.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Milliseconds between store re-checks while a dispatcher waits.
    #[serde(default = "default_completion_poll_ms")]
    pub completion_poll_ms: u64,
    /// Upper bound on how long a dispatcher waits for its sends to settle.
    /// Zero disables the bound.
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn completion_poll(&self) -> Duration {
        Duration::from_millis(self.completion_poll_ms.max(1))
    }

    pub fn completion_timeout(&self) -> Option<Duration> {
        let secs = self.completion_timeout_secs;
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            completion_poll_ms: DEFAULT_COMPLETION_POLL_MS,
            completion_timeout_secs: DEFAULT_COMPLETION_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Per-message deadline for the mailer. Zero disables it.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

impl WorkerConfig {
    /// Worker count, never below one.
    pub fn worker_count(&self) -> usize {
        self.count.max(1)
    }

    /// Queue capacity, never below one (tokio rejects zero-capacity channels).
    pub fn capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        (self.send_timeout_secs > 0).then(|| Duration::from_secs(self.send_timeout_secs))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            send_timeout_secs: DEFAULT_SEND_TIMEOUT_SECS,
        }
    }
}

/// SMTP relay credentials. STARTTLS is always used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_from")]
    pub from: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_tick_interval_secs() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}
fn default_completion_poll_ms() -> u64 {
    DEFAULT_COMPLETION_POLL_MS
}
fn default_completion_timeout_secs() -> u64 {
    DEFAULT_COMPLETION_TIMEOUT_SECS
}
fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}
fn default_send_timeout_secs() -> u64 {
    DEFAULT_SEND_TIMEOUT_SECS
}
fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}
fn default_from() -> String {
    DEFAULT_FROM.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.mailcast/mailcast.db", home)
}

impl MailcastConfig {
    /// Load config from a TOML file with MAILCAST_* env var overrides.
    ///
    /// Without an explicit path, `~/.mailcast/mailcast.toml` is used. A missing
    /// file is not an error: every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::MailcastError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("MAILCAST_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.mailcast/mailcast.toml", home)
}
