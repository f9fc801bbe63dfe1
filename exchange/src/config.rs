use crate::engine::data::DEFAULT_MAX_DEPTH;
use crate::engine::entry::Symbol;
use crate::error::ConfigError;
use log::{info, warn};
use serde_derive::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Price levels a trade plate keeps before it stops adding new ones
    pub plate_max_depth: usize,
    /// Levels published per trade plate snapshot
    pub plate_publish_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            plate_max_depth: DEFAULT_MAX_DEPTH,
            plate_publish_depth: 24,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SagaConfig {
    pub lock_ttl_ms: u64,
    pub freeze_timeout_ms: u64,
    pub store_timeout_ms: u64,
    /// Backoff between publish attempts that must eventually succeed
    pub publish_backoff_ms: u64,
    /// Backoff after a message is handed back to its topic
    pub requeue_backoff_ms: u64,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            lock_ttl_ms: 30_000,
            freeze_timeout_ms: 3_000,
            store_timeout_ms: 3_000,
            publish_backoff_ms: 250,
            requeue_backoff_ms: 200,
        }
    }
}

impl SagaConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn freeze_timeout(&self) -> Duration {
        Duration::from_millis(self.freeze_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn publish_backoff(&self) -> Duration {
        Duration::from_millis(self.publish_backoff_ms)
    }

    pub fn requeue_backoff(&self) -> Duration {
        Duration::from_millis(self.requeue_backoff_ms)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Empty disables the metrics endpoint
    pub metrics_addr: String,
    /// Visible trading pairs, `COIN/BASE`
    pub symbols: Vec<String>,
    pub engine: EngineConfig,
    pub saga: SagaConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            metrics_addr: "0.0.0.0:4010".to_string(),
            symbols: vec!["BTC/USDT".to_string()],
            engine: EngineConfig::default(),
            saga: SagaConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Reads `path`, falling back to defaults when it is missing or invalid
    pub fn from_toml(path: &str) -> Self {
        match Self::load(path) {
            Ok(config) => {
                info!("loaded runtime config from {}", path);
                config
            }
            Err(e) => {
                warn!(
                    "Something went wrong reading the runtime config file {}, using defaults: {}",
                    path, e
                );
                RuntimeConfig::new()
            }
        }
    }

    /// Trading pairs parsed from `symbols`; malformed names are skipped
    pub fn trading_symbols(&self) -> Vec<Symbol> {
        self.symbols
            .iter()
            .filter_map(|name| {
                let symbol = Symbol::parse(name);
                if symbol.is_none() {
                    warn!("ignoring malformed symbol {:?}", name);
                }
                symbol
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
metrics_addr = ""
symbols = ["BTC/USDT", "ETH/USDT", "bogus"]

[saga]
lock_ttl_ms = 5000
"#
        )
        .unwrap();
        let config = RuntimeConfig::from_toml(file.path().to_str().unwrap());
        assert_eq!(config.metrics_addr, "");
        assert_eq!(config.saga.lock_ttl(), Duration::from_secs(5));
        assert_eq!(config.saga.requeue_backoff(), Duration::from_millis(200));
        assert_eq!(config.engine, EngineConfig::default());
        let names: Vec<_> = config.trading_symbols().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["BTC/USDT", "ETH/USDT"]);
    }

    #[test]
    fn test_missing_or_invalid_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert_eq!(RuntimeConfig::from_toml(missing.to_str().unwrap()), RuntimeConfig::new());

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "symbols = 3").unwrap();
        assert!(matches!(RuntimeConfig::load(&bad), Err(ConfigError::Parse(_))));
        assert_eq!(RuntimeConfig::from_toml(bad.to_str().unwrap()), RuntimeConfig::new());
    }
}
