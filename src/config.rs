//! Server configuration.

use serde::{Deserialize, Serialize};
use std::env;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// SQLite database path.
    pub db_path: String,
    /// Tick interval for the background snapshot scheduler.
    pub snapshot_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8090,
            db_path: "realty_pipeline.db".into(),
            snapshot_interval_secs: 24 * 60 * 60,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `PIPELINE_HOST`, `PIPELINE_PORT`, `PIPELINE_DB`
    /// and `PIPELINE_SNAPSHOT_INTERVAL_SECS`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(host) = env::var("PIPELINE_HOST") {
            cfg.host = host;
        }
        if let Ok(port) = env::var("PIPELINE_PORT") {
            match port.parse() {
                Ok(p) => cfg.port = p,
                Err(_) => log::warn!("Ignoring invalid PIPELINE_PORT: {}", port),
            }
        }
        if let Ok(path) = env::var("PIPELINE_DB") {
            cfg.db_path = path;
        }
        if let Ok(secs) = env::var("PIPELINE_SNAPSHOT_INTERVAL_SECS") {
            match secs.parse() {
                Ok(s) => cfg.snapshot_interval_secs = s,
                Err(_) => log::warn!("Ignoring invalid PIPELINE_SNAPSHOT_INTERVAL_SECS: {}", secs),
            }
        }

        cfg
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 8090);
        assert_eq!(cfg.db_path, "realty_pipeline.db");
        assert_eq!(cfg.snapshot_interval_secs, 86_400);
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:8090");
    }
}
