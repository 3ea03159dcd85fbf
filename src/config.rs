use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::db::config::DbConfig;
use crate::services::assessment::AssessmentPolicy;
use crate::services::llm_provider::LLMConfig;
use crate::services::retry::RetryConfig;
use crate::services::search_provider::SearchConfig;
use crate::services::sessions::SessionConfig;

/// Process configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub llm: LLMConfig,
    pub retry: RetryConfig,
    pub search: SearchConfig,
    pub assessment: AssessmentPolicy,
    pub db: DbConfig,
    pub sessions: SessionConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let host = std::env::var("HOST")
            .ok()
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            host,
            port,
            log_level,
            llm: LLMConfig::from_env(),
            retry: RetryConfig::from_env(),
            search: SearchConfig::from_env(),
            assessment: AssessmentPolicy::from_env(),
            db: DbConfig::from_env(),
            sessions: SessionConfig::from_env(),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
