//! Server configuration

use anyhow::{Context, Result};
use protocol::{Cipher, CipherTables, DEFAULT_KEY_ROT_DELTA, DeltaSource, TableCipher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub bind_address: String,
    pub bind_port: u16,
    pub max_concurrent_clients: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_read_timeout_sec")]
    pub read_timeout_sec: u64,
    /// 512-byte substitution/shared-key table file extracted from the client
    #[serde(default)]
    pub cipher_tables: Option<PathBuf>,
    #[serde(default)]
    pub key_rot_delta: DeltaPolicy,
}

/// How the server picks each outgoing packet's key rotation delta
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DeltaPolicy {
    Fixed { value: u8 },
    Random { seed: Option<u64> },
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub log_packets: bool,
    #[serde(default = "default_true")]
    pub log_connections: bool,
}

fn default_read_timeout_sec() -> u64 {
    120
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout_sec: default_read_timeout_sec(),
            cipher_tables: None,
            key_rot_delta: DeltaPolicy::default(),
        }
    }
}

impl Default for DeltaPolicy {
    fn default() -> Self {
        DeltaPolicy::Fixed {
            value: DEFAULT_KEY_ROT_DELTA,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_packets: false,
            log_connections: true,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context("Failed to read config file")?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .context("Failed to parse config file")?;

        if config.general.max_concurrent_clients == 0 {
            anyhow::bail!("max_concurrent_clients must be at least 1");
        }
        if config.session.read_timeout_sec == 0 {
            anyhow::bail!("read_timeout_sec must be at least 1");
        }

        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.general.bind_address, self.general.bind_port)
    }
}

impl SessionConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_sec)
    }

    /// Build the packet cipher, loading the client's tables if configured
    pub fn cipher(&self) -> Result<Arc<dyn Cipher>> {
        let tables = match &self.cipher_tables {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("Failed to read cipher tables {}", path.display()))?;
                CipherTables::from_bytes(&bytes)
                    .with_context(|| format!("Invalid cipher tables in {}", path.display()))?
            }
            None => {
                warn!("No cipher_tables configured; using development tables, real clients will not connect");
                CipherTables::development()
            }
        };
        Ok(Arc::new(TableCipher::new(tables)))
    }

    pub fn delta_source(&self) -> DeltaSource {
        match self.key_rot_delta {
            DeltaPolicy::Fixed { value } => DeltaSource::fixed(value),
            DeltaPolicy::Random { seed: Some(seed) } => DeltaSource::seeded(seed),
            DeltaPolicy::Random { seed: None } => DeltaSource::from_entropy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [general]
        bind_address = "127.0.0.1"
        bind_port = 53310
        max_concurrent_clients = 100
    "#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:53310");
        assert_eq!(config.session.read_timeout(), Duration::from_secs(120));
        assert_eq!(config.session.key_rot_delta, DeltaPolicy::Fixed { value: 3 });
        assert_eq!(config.session.delta_source().next_delta(), 3);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.log_packets);
        assert!(config.session.cipher().is_ok());
    }

    #[test]
    fn test_full_config() {
        let config = Config::parse(
            r#"
            [general]
            bind_address = "0.0.0.0"
            bind_port = 53312
            max_concurrent_clients = 8

            [session]
            read_timeout_sec = 30

            [session.key_rot_delta]
            mode = "random"
            seed = 42

            [logging]
            level = "debug"
            log_packets = true
            log_connections = false
            "#,
        )
        .unwrap();

        assert_eq!(config.session.key_rot_delta, DeltaPolicy::Random { seed: Some(42) });
        let deltas = config.session.delta_source();
        assert_eq!(deltas.next_delta(), DeltaSource::seeded(42).next_delta());
        assert!(config.logging.log_packets);
        assert!(!config.logging.log_connections);
    }

    #[test]
    fn test_rejects_zero_limits() {
        let config = MINIMAL.replace("max_concurrent_clients = 100", "max_concurrent_clients = 0");
        assert!(Config::parse(&config).is_err());
    }

    #[test]
    fn test_missing_cipher_tables_file() {
        let mut config = Config::parse(MINIMAL).unwrap();
        config.session.cipher_tables = Some(PathBuf::from("/nonexistent/cipher_tables.bin"));
        assert!(config.session.cipher().is_err());
    }
}
