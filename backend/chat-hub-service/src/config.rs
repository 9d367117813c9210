use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Which collaborator backend persists messages and resolves users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl StorageBackend {
    fn parse(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(AppError::Config(format!(
                "HUB_STORAGE must be `postgres` or `memory`, got `{other}`"
            ))),
        }
    }
}

/// Per-connection transport settings shared by every WebSocket session.
#[derive(Debug, Clone, Copy)]
pub struct WsConfig {
    /// Capacity of each connection's outbound queue. A full queue gets the
    /// connection dropped by the hub.
    pub outbound_capacity: usize,
    /// How often the write-loop sends a ping frame.
    pub ping_interval: Duration,
    /// How long the read-loop waits for any frame (pong included).
    pub idle_timeout: Duration,
    /// Deadline for a single frame write.
    pub write_timeout: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            ping_interval: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl WsConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.outbound_capacity == 0 {
            return Err(AppError::Config(
                "WS_OUTBOUND_CAPACITY must be greater than zero".into(),
            ));
        }
        if self.ping_interval >= self.idle_timeout {
            return Err(AppError::Config(format!(
                "WS_PING_INTERVAL_SECS ({}s) must be shorter than WS_IDLE_TIMEOUT_SECS ({}s)",
                self.ping_interval.as_secs(),
                self.idle_timeout.as_secs()
            )));
        }
        if self.write_timeout.is_zero() {
            return Err(AppError::Config(
                "WS_WRITE_TIMEOUT_SECS must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageBackend,
    pub database_url: Option<String>,
    /// JSON file with users and chat participants for `HUB_STORAGE=memory`.
    pub memory_seed: Option<PathBuf>,
    pub db_max_connections: usize,
    pub db_connect_timeout_secs: u64,
    pub port: u16,
    pub ws_port: u16,
    pub ws: WsConfig,
}

impl Config {
    fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
        env::var(key)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let storage = match env::var("HUB_STORAGE") {
            Ok(value) => StorageBackend::parse(&value)?,
            Err(_) => StorageBackend::Postgres,
        };

        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
        if storage == StorageBackend::Postgres && database_url.is_none() {
            return Err(AppError::Config(
                "DATABASE_URL missing (required when HUB_STORAGE=postgres)".into(),
            ));
        }

        let memory_seed = env::var("HUB_SEED_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let defaults = WsConfig::default();
        let ws = WsConfig {
            outbound_capacity: Self::parsed("WS_OUTBOUND_CAPACITY", defaults.outbound_capacity),
            ping_interval: Duration::from_secs(Self::parsed(
                "WS_PING_INTERVAL_SECS",
                defaults.ping_interval.as_secs(),
            )),
            idle_timeout: Duration::from_secs(Self::parsed(
                "WS_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout.as_secs(),
            )),
            write_timeout: Duration::from_secs(Self::parsed(
                "WS_WRITE_TIMEOUT_SECS",
                defaults.write_timeout.as_secs(),
            )),
        };
        ws.validate()?;

        Ok(Self {
            storage,
            database_url,
            memory_seed,
            db_max_connections: Self::parsed("DB_MAX_CONNECTIONS", 10),
            db_connect_timeout_secs: Self::parsed("DB_CONNECT_TIMEOUT_SECS", 5),
            port: Self::parsed("PORT", 3000),
            ws_port: Self::parsed("WS_PORT", 8081),
            ws,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "HUB_STORAGE",
        "DATABASE_URL",
        "HUB_SEED_FILE",
        "DB_MAX_CONNECTIONS",
        "DB_CONNECT_TIMEOUT_SECS",
        "PORT",
        "WS_PORT",
        "WS_OUTBOUND_CAPACITY",
        "WS_PING_INTERVAL_SECS",
        "WS_IDLE_TIMEOUT_SECS",
        "WS_WRITE_TIMEOUT_SECS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn memory_storage_uses_defaults() {
        clear_env();
        std::env::set_var("HUB_STORAGE", "memory");

        let config = Config::from_env().unwrap();
        assert_eq!(config.storage, StorageBackend::Memory);
        assert!(config.database_url.is_none());
        assert!(config.memory_seed.is_none());
        assert_eq!(config.port, 3000);
        assert_eq!(config.ws_port, 8081);
        assert_eq!(config.ws.outbound_capacity, 256);
        assert_eq!(config.ws.ping_interval, Duration::from_secs(5));
        assert_eq!(config.ws.idle_timeout, Duration::from_secs(30));

        clear_env();
    }

    #[test]
    #[serial]
    fn postgres_storage_requires_database_url() {
        clear_env();

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("DATABASE_URL")));

        std::env::set_var("DATABASE_URL", "postgres://localhost/chat");
        let config = Config::from_env().unwrap();
        assert_eq!(config.storage, StorageBackend::Postgres);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/chat")
        );

        clear_env();
    }

    #[test]
    #[serial]
    fn reads_memory_seed_path() {
        clear_env();
        std::env::set_var("HUB_STORAGE", "memory");
        std::env::set_var("HUB_SEED_FILE", "fixtures/memory_seed.json");

        let config = Config::from_env().unwrap();
        assert_eq!(
            config.memory_seed.as_deref(),
            Some(std::path::Path::new("fixtures/memory_seed.json"))
        );

        clear_env();
    }

    #[test]
    #[serial]
    fn rejects_unknown_storage_backend() {
        clear_env();
        std::env::set_var("HUB_STORAGE", "redis");

        assert!(matches!(Config::from_env(), Err(AppError::Config(_))));

        clear_env();
    }

    #[test]
    #[serial]
    fn overrides_transport_settings() {
        clear_env();
        std::env::set_var("HUB_STORAGE", "memory");
        std::env::set_var("WS_OUTBOUND_CAPACITY", "8");
        std::env::set_var("WS_PING_INTERVAL_SECS", "10");
        std::env::set_var("WS_IDLE_TIMEOUT_SECS", "40");

        let config = Config::from_env().unwrap();
        assert_eq!(config.ws.outbound_capacity, 8);
        assert_eq!(config.ws.ping_interval, Duration::from_secs(10));
        assert_eq!(config.ws.idle_timeout, Duration::from_secs(40));

        clear_env();
    }

    #[test]
    fn ping_interval_must_be_shorter_than_idle_timeout() {
        let ws = WsConfig {
            ping_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(30),
            ..WsConfig::default()
        };
        assert!(ws.validate().is_err());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let ws = WsConfig {
            outbound_capacity: 0,
            ..WsConfig::default()
        };
        assert!(ws.validate().is_err());
    }
}
