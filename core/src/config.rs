use std::str::FromStr;
use std::time::Duration;
use std::{env, fs, net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "sqlite" => Ok(StoreBackend::Sqlite),
            other => Err(anyhow!("unknown store backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,
    #[serde(default = "default_store_backend")]
    pub store_backend: StoreBackend,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default = "default_room_code_length")]
    pub room_code_length: usize,
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            store_backend: default_store_backend(),
            database_path: default_database_path(),
            database_max_connections: default_database_max_connections(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            room_code_length: default_room_code_length(),
            log_dir: None,
        }
    }
}

impl AppConfig {
    const CONFIG_ENV: &'static str = "LECTERN_CONFIG_FILE";
    const BIND_ADDRESS_ENV: &'static str = "LECTERN_BIND_ADDRESS";
    const STORE_BACKEND_ENV: &'static str = "LECTERN_STORE_BACKEND";
    const DATABASE_PATH_ENV: &'static str = "LECTERN_DATABASE_PATH";
    const DATABASE_MAX_CONNECTIONS_ENV: &'static str = "LECTERN_DATABASE_MAX_CONNECTIONS";
    const HEARTBEAT_INTERVAL_ENV: &'static str = "LECTERN_HEARTBEAT_INTERVAL_SECS";
    const HEARTBEAT_TIMEOUT_ENV: &'static str = "LECTERN_HEARTBEAT_TIMEOUT_SECS";
    const ROOM_CODE_LENGTH_ENV: &'static str = "LECTERN_ROOM_CODE_LENGTH";
    const LOG_DIR_ENV: &'static str = "LECTERN_LOG_DIR";

    /// Load configuration from defaults layered with optional config files and
    /// environment variables.
    pub fn load() -> Result<Self> {
        Self::load_with(None)
    }

    pub fn load_with(config_path: Option<PathBuf>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::resolve_config_path(config_path)? {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            let file_config: Self = toml::from_str(&contents)
                .with_context(|| format!("invalid config file: {}", path.display()))?;

            config = file_config;
        }

        if let Ok(addr) = env::var(Self::BIND_ADDRESS_ENV) {
            config.bind_address = addr
                .parse()
                .with_context(|| format!("invalid {name}", name = Self::BIND_ADDRESS_ENV))?;
        }

        if let Ok(backend) = env::var(Self::STORE_BACKEND_ENV) {
            config.store_backend = backend
                .parse()
                .with_context(|| format!("invalid {name}", name = Self::STORE_BACKEND_ENV))?;
        }

        if let Ok(path) = env::var(Self::DATABASE_PATH_ENV) {
            config.database_path = path;
        }

        if let Ok(value) = env::var(Self::DATABASE_MAX_CONNECTIONS_ENV) {
            config.database_max_connections = value.parse().with_context(|| {
                format!("invalid {name}", name = Self::DATABASE_MAX_CONNECTIONS_ENV)
            })?;
        }

        if let Ok(value) = env::var(Self::HEARTBEAT_INTERVAL_ENV) {
            config.heartbeat_interval_secs = value
                .parse()
                .with_context(|| format!("invalid {name}", name = Self::HEARTBEAT_INTERVAL_ENV))?;
        }

        if let Ok(value) = env::var(Self::HEARTBEAT_TIMEOUT_ENV) {
            config.heartbeat_timeout_secs = value
                .parse()
                .with_context(|| format!("invalid {name}", name = Self::HEARTBEAT_TIMEOUT_ENV))?;
        }

        if let Ok(value) = env::var(Self::ROOM_CODE_LENGTH_ENV) {
            config.room_code_length = value
                .parse()
                .with_context(|| format!("invalid {name}", name = Self::ROOM_CODE_LENGTH_ENV))?;
        }

        if let Ok(dir) = env::var(Self::LOG_DIR_ENV) {
            config.log_dir = if dir.is_empty() { None } else { Some(dir) };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_secs == 0 {
            bail!("heartbeat_interval_secs must be positive");
        }
        if self.heartbeat_timeout_secs <= self.heartbeat_interval_secs {
            bail!(
                "heartbeat_timeout_secs ({timeout}) must exceed heartbeat_interval_secs ({interval})",
                timeout = self.heartbeat_timeout_secs,
                interval = self.heartbeat_interval_secs,
            );
        }
        if self.room_code_length < 4 {
            bail!("room_code_length must be at least 4");
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    fn resolve_config_path(explicit: Option<PathBuf>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            return Self::validate_path(path);
        }

        if let Ok(path) = env::var(Self::CONFIG_ENV) {
            return Self::validate_path(PathBuf::from(path));
        }

        let mut candidates = vec![PathBuf::from("lectern.toml")];
        if let Some(dir) = Self::default_config_dir() {
            candidates.push(dir.join("config.toml"));
        }

        for candidate in candidates {
            if candidate.exists() {
                return Ok(Some(candidate));
            }
        }

        Ok(None)
    }

    fn validate_path(path: PathBuf) -> Result<Option<PathBuf>> {
        if path.exists() {
            Ok(Some(path))
        } else {
            Err(anyhow!(
                "configuration file does not exist: {}",
                path.display()
            ))
        }
    }

    fn default_config_dir() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".lectern"))
    }
}

/// Whether a configured database path names a file rather than a data
/// directory. Paths ending in `.db` are files; anything else is a directory
/// the store drops its database file into.
pub fn database_path_is_file(path: &str) -> bool {
    PathBuf::from(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("db"))
}

fn default_bind_address() -> SocketAddr {
    "127.0.0.1:52002"
        .parse()
        .expect("default bind address must be valid")
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Sqlite
}

fn default_database_path() -> String {
    "./data/lectern.db".to_owned()
}

fn default_database_max_connections() -> u32 {
    4
}

fn default_heartbeat_interval_secs() -> u64 {
    15
}

fn default_heartbeat_timeout_secs() -> u64 {
    45
}

fn default_room_code_length() -> usize {
    5
}

fn home_dir() -> Option<PathBuf> {
    if let Some(path) = env::var_os("HOME") {
        return Some(PathBuf::from(path));
    }

    if let Some(path) = env::var_os("USERPROFILE") {
        return Some(PathBuf::from(path));
    }

    None
}
