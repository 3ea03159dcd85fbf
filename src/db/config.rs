use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite URL; `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl DbConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Self {
            database_url,
            max_connections: env_u32("DB_MAX_CONNECTIONS", 5),
            busy_timeout: Duration::from_millis(env_u64("SQLITE_BUSY_TIMEOUT_MS", 30_000)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            database_url: None,
            max_connections: 1,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}
