use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use crate::credentials::MediaKeys;

/// Command line options for the server.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Room limits and timings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomSettings {
    /// Maximum participants per room.
    pub capacity: usize,
    /// Messages kept per room; older ones are dropped.
    pub history_limit: usize,
    /// Messages sent to a session when it joins.
    pub join_history: usize,
    /// How long an empty room survives before it is removed.
    pub grace_period: Duration,
    /// Longest accepted chat message, in characters.
    pub max_message_len: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            capacity: 50,
            history_limit: 100,
            join_history: 50,
            grace_period: Duration::from_secs(300),
            max_message_len: 2000,
        }
    }
}

/// Runtime configuration for the server resolved from file, env and CLI.
#[derive(Clone)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    /// Secret for session tokens. Generated per process when absent.
    pub jwt_secret: Option<String>,
    /// Keys of the media service used to sign access credentials.
    pub media: Option<MediaKeys>,
    pub rooms: RoomSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: format!("127.0.0.1:{}", default_port()),
            logging_enabled: default_logging(),
            jwt_secret: None,
            media: None,
            rooms: RoomSettings::default(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind)
            .field("logging_enabled", &self.logging_enabled)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("media", &self.media)
            .field("rooms", &self.rooms)
            .finish()
    }
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    rooms: FileRooms,
    #[serde(default)]
    auth: FileAuth,
    #[serde(default)]
    media: FileMedia,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

#[derive(Deserialize, Default)]
struct FileRooms {
    capacity: Option<usize>,
    history_limit: Option<usize>,
    join_history: Option<usize>,
    grace_period_secs: Option<u64>,
    max_message_len: Option<usize>,
}

#[derive(Deserialize, Default)]
struct FileAuth {
    jwt_secret: Option<String>,
}

#[derive(Deserialize, Default)]
struct FileMedia {
    api_key: Option<String>,
    api_secret: Option<String>,
}

fn default_port() -> u16 {
    3001
}

fn default_logging() -> bool {
    true
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // built-in defaults
        let mut port = default_port();
        let mut logging = default_logging();
        let mut rooms = RoomSettings::default();
        let mut jwt_secret = None;
        let mut api_key = None;
        let mut api_secret = None;

        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("BELL_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/bell.toml"));

        if let Ok(bytes) = fs::read(&config_path) {
            let contents = String::from_utf8_lossy(&bytes);
            let file_cfg: FileConfig = toml::from_str(&contents).context("invalid config file")?;
            port = file_cfg.server.port;
            logging = file_cfg.logging.enabled;
            let r = file_cfg.rooms;
            rooms.capacity = r.capacity.unwrap_or(rooms.capacity);
            rooms.history_limit = r.history_limit.unwrap_or(rooms.history_limit);
            rooms.join_history = r.join_history.unwrap_or(rooms.join_history);
            rooms.max_message_len = r.max_message_len.unwrap_or(rooms.max_message_len);
            if let Some(secs) = r.grace_period_secs {
                rooms.grace_period = Duration::from_secs(secs);
            }
            jwt_secret = file_cfg.auth.jwt_secret;
            api_key = file_cfg.media.api_key;
            api_secret = file_cfg.media.api_secret;
        }

        // environment overrides
        if let Ok(p) = std::env::var("BELL_PORT") {
            if let Ok(p) = p.parse::<u16>() {
                port = p;
            }
        }
        if let Ok(l) = std::env::var("BELL_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }
        jwt_secret = env_nonempty("BELL_JWT_SECRET").or(jwt_secret);
        api_key = env_nonempty("MEDIA_API_KEY").or(api_key);
        api_secret = env_nonempty("MEDIA_API_SECRET").or(api_secret);

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }

        // validate port range
        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }
        if rooms.capacity == 0 {
            anyhow::bail!("room capacity must be at least 1");
        }
        if rooms.join_history > rooms.history_limit {
            rooms.join_history = rooms.history_limit;
        }

        // bind address precedence for host override
        let bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };

        let media = match (api_key, api_secret) {
            (Some(api_key), Some(api_secret)) => Some(MediaKeys {
                api_key,
                api_secret,
            }),
            _ => None,
        };

        Ok(Self {
            bind,
            logging_enabled: logging,
            jwt_secret,
            media,
            rooms,
        })
    }
}
