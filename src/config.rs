//! Configuration management for AcadChain

use crate::error::ChainError;
use crate::miner::MAX_DIFFICULTY;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
}

/// When issued credentials are sealed into a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SealingPolicy {
    /// Every issuance mines a block before returning.
    #[default]
    Synchronous,
    /// Issuances stay pending until `mine_pending` is called.
    Batched,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    #[serde(default)]
    pub sealing: SealingPolicy,
    #[serde(default, with = "humantime_serde_opt")]
    pub mining_timeout: Option<Duration>,
    #[serde(default = "default_miner_identity")]
    pub miner_identity: String,
    #[serde(default = "default_mining_reward")]
    pub mining_reward: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            sealing: SealingPolicy::default(),
            mining_timeout: None,
            miner_identity: default_miner_identity(),
            mining_reward: default_mining_reward(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            enabled: default_enabled(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "default_enabled")]
    pub seed_builtin: bool,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            seed_builtin: default_enabled(),
            path: None,
        }
    }
}

fn default_difficulty() -> u32 {
    2
}

fn default_miner_identity() -> String {
    "SYSTEM".to_string()
}

fn default_mining_reward() -> u64 {
    100
}

fn default_db_path() -> String {
    "./data/acadchain.db".to_string()
}

fn default_enabled() -> bool {
    true
}

mod humantime_serde_opt {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

impl Config {
    /// Parse a TOML document and validate it.
    pub fn from_toml(source: &str) -> Result<Self, ChainError> {
        let config: Config = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration for a throwaway ledger: in-memory storage, no timeout.
    pub fn ephemeral(difficulty: u32) -> Self {
        let mut config = Config::default();
        config.ledger.difficulty = difficulty;
        config.database.enabled = false;
        config
    }

    pub fn validate(&self) -> Result<(), ChainError> {
        if self.ledger.difficulty > MAX_DIFFICULTY {
            return Err(ChainError::ConfigError(format!(
                "ledger.difficulty must be at most {} (got {})",
                MAX_DIFFICULTY, self.ledger.difficulty
            )));
        }

        if self.ledger.miner_identity.trim().is_empty() {
            return Err(ChainError::ConfigError(
                "ledger.miner_identity must not be empty".to_string(),
            ));
        }

        if self.database.enabled && self.database.path.trim().is_empty() {
            return Err(ChainError::ConfigError(
                "database.path must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Load `path`, or fall back to defaults when the file does not exist.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ChainError> {
    let path = path.as_ref();
    let config_str = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    if config_str.trim().is_empty() {
        tracing::debug!("No configuration at {}, using defaults", path.display());
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }

    Config::from_toml(&config_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.ledger.difficulty, 2);
        assert_eq!(config.ledger.sealing, SealingPolicy::Synchronous);
        assert_eq!(config.ledger.miner_identity, "SYSTEM");
        assert_eq!(config.ledger.mining_reward, 100);
        assert!(config.ledger.mining_timeout.is_none());
        assert_eq!(config.database.path, "./data/acadchain.db");
        assert!(config.database.enabled);
        assert!(config.directory.seed_builtin);
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml(
            r#"
            [ledger]
            difficulty = 3
            sealing = "batched"
            mining_timeout = "1m 30s"
            miner_identity = "registrar"

            [database]
            path = "/tmp/ledger.db"

            [directory]
            seed_builtin = false
            path = "colleges.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.ledger.difficulty, 3);
        assert_eq!(config.ledger.sealing, SealingPolicy::Batched);
        assert_eq!(config.ledger.mining_timeout, Some(Duration::from_secs(90)));
        assert_eq!(config.ledger.miner_identity, "registrar");
        assert_eq!(config.ledger.mining_reward, 100);
        assert_eq!(config.database.path, "/tmp/ledger.db");
        assert!(!config.directory.seed_builtin);
        assert_eq!(config.directory.path, Some(PathBuf::from("colleges.json")));
    }

    #[test]
    fn test_rejects_out_of_range_difficulty() {
        let err = Config::from_toml("[ledger]\ndifficulty = 65\n").unwrap_err();
        assert!(matches!(err, ChainError::ConfigError(_)));
    }

    #[test]
    fn test_rejects_empty_miner_identity() {
        let err = Config::from_toml("[ledger]\nminer_identity = \"  \"\n").unwrap_err();
        assert!(matches!(err, ChainError::ConfigError(_)));
    }

    #[test]
    fn test_rejects_bad_timeout() {
        let err = Config::from_toml("[ledger]\nmining_timeout = \"soon\"\n").unwrap_err();
        assert!(matches!(err, ChainError::ConfigError(_)));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.ledger.difficulty, 2);
    }
}
