//! Configuration for the `WebChat` client core.
//!
//! Layered: a TOML config file (default `~/.config/webchat/config.toml`)
//! merged over compiled defaults. A missing default file is not an error;
//! an explicit path that does not exist is. Every timer interval and retry
//! knob is injectable so tests can run on a compressed clock.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    connection: ConnectionFileConfig,
    outbox: OutboxFileConfig,
    sync: SyncFileConfig,
    typing: TypingFileConfig,
}

/// `[connection]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConnectionFileConfig {
    socket_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    reconnect_base_delay_ms: Option<u64>,
    reconnect_backoff_factor: Option<f64>,
    max_reconnect_attempts: Option<u32>,
    reconnect_jitter: Option<f64>,
    event_channel_capacity: Option<usize>,
}

/// `[outbox]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct OutboxFileConfig {
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
    backoff_factor: Option<f64>,
    max_delay_ms: Option<u64>,
    jitter: Option<f64>,
    ack_timeout_secs: Option<u64>,
    send_interval_ms: Option<u64>,
    retry_interval_ms: Option<u64>,
    sweep_interval_ms: Option<u64>,
    send_batch: Option<usize>,
    max_age_secs: Option<u64>,
    redundant_post: Option<bool>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    base_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// `[typing]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TypingFileConfig {
    expiry_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Socket connection and reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Timeout for establishing the socket connection.
    pub connect_timeout: Duration,
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Multiplier applied to the delay per attempt.
    pub backoff_factor: f64,
    /// Attempts before giving up with a terminal connection failure.
    pub max_attempts: u32,
    /// Jitter fraction applied to each delay (0.1 = ±10%).
    pub jitter: f64,
    /// Capacity of the transport event channel.
    pub event_channel_capacity: usize,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            base_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            max_attempts: 5,
            jitter: 0.1,
            event_channel_capacity: 256,
        }
    }
}

/// Outbound reliability queue behavior.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Delivery attempts before a message fails terminally.
    pub max_retries: u32,
    /// Base retry delay.
    pub base_delay: Duration,
    /// Multiplier applied to the retry delay per attempt.
    pub backoff_factor: f64,
    /// Upper bound on any single retry delay.
    pub max_delay: Duration,
    /// Jitter fraction applied to retry delays (0.1 = up to 10%).
    pub jitter: f64,
    /// How long to wait for a send acknowledgment.
    pub ack_timeout: Duration,
    /// Send queue processing tick.
    pub send_interval: Duration,
    /// Retry queue processing tick.
    pub retry_interval: Duration,
    /// Stale-entry sweep tick.
    pub sweep_interval: Duration,
    /// Maximum concurrent in-flight sends per tick window.
    pub send_batch: usize,
    /// Entries older than this are evicted as abandoned.
    pub max_age: Duration,
    /// Also POST over HTTP when the socket path is used, relying on
    /// idempotent message IDs server-side.
    pub redundant_post: bool,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
            ack_timeout: Duration::from_secs(10),
            send_interval: Duration::from_millis(100),
            retry_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(5),
            send_batch: 3,
            max_age: Duration::from_secs(5 * 60),
            redundant_post: false,
        }
    }
}

/// REST sync collaborator behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the REST backend, if configured.
    pub base_url: Option<String>,
    /// Per-request timeout for sync calls.
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Socket URL of the real-time channel, if configured.
    pub socket_url: Option<String>,
    /// Connection and reconnection behavior.
    pub reconnect: ReconnectConfig,
    /// Reliability queue behavior.
    pub outbox: OutboxConfig,
    /// REST sync behavior.
    pub sync: SyncConfig,
    /// How long an inbound typing indicator stays live without renewal.
    pub typing_expiry: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_url: None,
            reconnect: ReconnectConfig::default(),
            outbox: OutboxConfig::default(),
            sync: SyncConfig::default(),
            typing_expiry: Duration::from_secs(3),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file merged over defaults.
    ///
    /// With `path = None` the default location
    /// (`~/.config/webchat/config.toml`) is tried and a missing file is
    /// treated as empty config. An explicit path must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit config file cannot be read,
    /// or if any file fails to parse.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let file = load_config_file(path)?;
        Ok(Self::resolve(&file))
    }

    /// Parse configuration from a TOML string merged over defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseToml`] if the string is not valid TOML.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(toml_str)?;
        Ok(Self::resolve(&file))
    }

    /// Resolve a `ClientConfig` from a parsed config file.
    /// Priority: file > default.
    fn resolve(file: &ConfigFile) -> Self {
        let reconnect_defaults = ReconnectConfig::default();
        let outbox_defaults = OutboxConfig::default();
        let sync_defaults = SyncConfig::default();

        Self {
            socket_url: file.connection.socket_url.clone(),
            reconnect: ReconnectConfig {
                connect_timeout: file
                    .connection
                    .connect_timeout_secs
                    .map_or(reconnect_defaults.connect_timeout, Duration::from_secs),
                base_delay: file
                    .connection
                    .reconnect_base_delay_ms
                    .map_or(reconnect_defaults.base_delay, Duration::from_millis),
                backoff_factor: file
                    .connection
                    .reconnect_backoff_factor
                    .unwrap_or(reconnect_defaults.backoff_factor),
                max_attempts: file
                    .connection
                    .max_reconnect_attempts
                    .unwrap_or(reconnect_defaults.max_attempts),
                jitter: file
                    .connection
                    .reconnect_jitter
                    .unwrap_or(reconnect_defaults.jitter),
                event_channel_capacity: file
                    .connection
                    .event_channel_capacity
                    .unwrap_or(reconnect_defaults.event_channel_capacity),
            },
            outbox: OutboxConfig {
                max_retries: file.outbox.max_retries.unwrap_or(outbox_defaults.max_retries),
                base_delay: file
                    .outbox
                    .base_delay_ms
                    .map_or(outbox_defaults.base_delay, Duration::from_millis),
                backoff_factor: file
                    .outbox
                    .backoff_factor
                    .unwrap_or(outbox_defaults.backoff_factor),
                max_delay: file
                    .outbox
                    .max_delay_ms
                    .map_or(outbox_defaults.max_delay, Duration::from_millis),
                jitter: file.outbox.jitter.unwrap_or(outbox_defaults.jitter),
                ack_timeout: file
                    .outbox
                    .ack_timeout_secs
                    .map_or(outbox_defaults.ack_timeout, Duration::from_secs),
                send_interval: file
                    .outbox
                    .send_interval_ms
                    .map_or(outbox_defaults.send_interval, Duration::from_millis),
                retry_interval: file
                    .outbox
                    .retry_interval_ms
                    .map_or(outbox_defaults.retry_interval, Duration::from_millis),
                sweep_interval: file
                    .outbox
                    .sweep_interval_ms
                    .map_or(outbox_defaults.sweep_interval, Duration::from_millis),
                send_batch: file.outbox.send_batch.unwrap_or(outbox_defaults.send_batch),
                max_age: file
                    .outbox
                    .max_age_secs
                    .map_or(outbox_defaults.max_age, Duration::from_secs),
                redundant_post: file
                    .outbox
                    .redundant_post
                    .unwrap_or(outbox_defaults.redundant_post),
            },
            sync: SyncConfig {
                base_url: file.sync.base_url.clone(),
                request_timeout: file
                    .sync
                    .request_timeout_secs
                    .map_or(sync_defaults.request_timeout, Duration::from_secs),
            },
            typing_expiry: file
                .typing
                .expiry_secs
                .map_or(Duration::from_secs(3), Duration::from_secs),
        }
    }
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and a missing
/// file is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            // No config dir available — use defaults.
            return Ok(ConfigFile::default());
        };
        config_dir.join("webchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
