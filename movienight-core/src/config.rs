use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    pub rooms: RoomsConfig,
    pub scheduler: SchedulerConfig,
    pub signaling: SignalingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

/// Postgres connection settings. An empty `url` selects the in-memory room store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 20,
            min_connections: 2,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
        }
    }
}

/// Verification of tokens issued by the external authentication service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret shared with the authentication service
    pub jwt_secret: String,
    /// Allowed clock skew when checking `exp`
    pub leeway_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            leeway_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// Hard ceiling on participants per room, applied regardless of what the
    /// client asks for
    pub max_capacity: u32,
    /// Capacity used when the client does not supply one
    pub default_capacity: u32,
    /// Attempts at finding an unused join code before giving up
    pub code_generation_attempts: u32,
    pub max_name_length: usize,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            max_capacity: 4,
            default_capacity: 4,
            code_generation_attempts: 16,
            max_name_length: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    /// How long before `scheduledStartTime` the reminder goes out
    pub notification_window_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
            notification_window_minutes: 10,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    #[must_use]
    pub fn notification_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.notification_window_minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Per-connection outbound queue. A receiver that lets it fill up is
    /// disconnected.
    pub send_buffer: usize,
    pub max_message_size: usize,
    /// Close connections that have not sent a frame for this long.
    /// Pong replies count as traffic.
    pub idle_timeout_seconds: u64,
    /// Server ping cadence; must be shorter than the idle timeout
    pub ping_interval_seconds: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            send_buffer: 256,
            max_message_size: 64 * 1024,
            idle_timeout_seconds: 120,
            ping_interval_seconds: 30,
        }
    }
}

impl SignalingConfig {
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_seconds)
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // MOVIENIGHT_SERVER__HTTP_PORT=9000, MOVIENIGHT_AUTH__JWT_SECRET=...
        builder = builder.add_source(
            Environment::with_prefix("MOVIENIGHT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Validate the configuration, reporting every problem at once
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }
        if self.auth.jwt_secret.is_empty() {
            errors.push("auth.jwt_secret must be set".to_string());
        }
        if self.rooms.max_capacity == 0 {
            errors.push("rooms.max_capacity must be at least 1".to_string());
        }
        if self.rooms.default_capacity == 0 || self.rooms.default_capacity > self.rooms.max_capacity {
            errors.push(format!(
                "rooms.default_capacity must be between 1 and rooms.max_capacity ({})",
                self.rooms.max_capacity
            ));
        }
        if self.rooms.code_generation_attempts == 0 {
            errors.push("rooms.code_generation_attempts must be at least 1".to_string());
        }
        if self.scheduler.interval_seconds == 0 {
            errors.push("scheduler.interval_seconds must be non-zero".to_string());
        }
        if self.scheduler.notification_window_minutes <= 0 {
            errors.push("scheduler.notification_window_minutes must be positive".to_string());
        } else if self.scheduler.interval_seconds
            > (self.scheduler.notification_window_minutes as u64) * 60
        {
            // A tick cadence longer than the window could skip the reminder entirely.
            errors.push(
                "scheduler.interval_seconds must not exceed the notification window".to_string(),
            );
        }
        if self.signaling.send_buffer == 0 {
            errors.push("signaling.send_buffer must be at least 1".to_string());
        }
        if self.signaling.ping_interval_seconds == 0
            || self.signaling.ping_interval_seconds >= self.signaling.idle_timeout_seconds
        {
            errors.push(
                "signaling.ping_interval_seconds must be non-zero and below signaling.idle_timeout_seconds"
                    .to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    #[must_use]
    pub fn uses_database(&self) -> bool {
        !self.database.url.is_empty()
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }
}
