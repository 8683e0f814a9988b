use std::env;

use analysis_worker::config::WorkerConfig;
use analysis_worker::WorkerError;

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Database, engine, analysis and progress settings
    pub worker: WorkerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, WorkerError> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
            worker: WorkerConfig::load()?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
