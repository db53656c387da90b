use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

/// Process configuration, read from `NATTER_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Append logs here instead of stdout.
    pub log_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let db_path = lookup("NATTER_DB_PATH").unwrap_or_else(|| "natter.db".into());
        let host = lookup("NATTER_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = match lookup("NATTER_PORT") {
            Some(port) => port
                .parse()
                .with_context(|| format!("invalid NATTER_PORT {:?}", port))?,
            None => 8080,
        };

        let log_file = lookup("NATTER_LOG_FILE")
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            db_path: PathBuf::from(db_path),
            host,
            port,
            log_file,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
