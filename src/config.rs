//! Ledger configuration and `CERTCHAIN_*` environment overrides.

use crate::block::difficulty_in_range;
use crate::consensus::{ReconcilePolicy, TieBreak, ValidationMode};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;

/// Default sealing difficulty (leading zero hex digits).
pub const DEFAULT_DIFFICULTY: u8 = 2;
/// Default reward carried by AUTHORITY_REWARD transactions.
pub const DEFAULT_AUTHORITY_REWARD: u64 = 10;

/// Tunables of the ledger engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Leading zero hex digits required of sealed blocks, within `1..=6`.
    pub difficulty: u8,
    /// Reward units credited to the sealer of each block.
    pub authority_reward: u64,
    /// Peer chain adoption policy.
    pub reconcile: ReconcilePolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            authority_reward: DEFAULT_AUTHORITY_REWARD,
            reconcile: ReconcilePolicy::default(),
        }
    }
}

impl LedgerConfig {
    /// Defaults overridden by `CERTCHAIN_DIFFICULTY`,
    /// `CERTCHAIN_AUTHORITY_REWARD`, `CERTCHAIN_RECONCILE_MODE`
    /// (`linkage|full`) and `CERTCHAIN_TIE_BREAK` (`first-seen|lowest-hash`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = env_value("CERTCHAIN_DIFFICULTY") {
            config.difficulty = parse_value("CERTCHAIN_DIFFICULTY", &value)?;
        }
        if let Some(value) = env_value("CERTCHAIN_AUTHORITY_REWARD") {
            config.authority_reward = parse_value("CERTCHAIN_AUTHORITY_REWARD", &value)?;
        }
        if let Some(value) = env_value("CERTCHAIN_RECONCILE_MODE") {
            config.reconcile.validation =
                parse_value::<ValidationMode>("CERTCHAIN_RECONCILE_MODE", &value)?;
        }
        if let Some(value) = env_value("CERTCHAIN_TIE_BREAK") {
            config.reconcile.tie_break = parse_value::<TieBreak>("CERTCHAIN_TIE_BREAK", &value)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Rejects out-of-range settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !difficulty_in_range(self.difficulty) {
            return Err(ConfigError::InvalidDifficulty(self.difficulty));
        }
        Ok(())
    }
}

pub(crate) fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn parse_value<T: std::str::FromStr>(
    key: &'static str,
    value: &str,
) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

#[cfg_attr(not(feature = "net"), allow(dead_code))]
pub(crate) fn parse_env_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconcile.validation, ValidationMode::LinkageOnly);
        assert_eq!(config.reconcile.tie_break, TieBreak::FirstSeen);
    }

    #[test]
    fn test_validate_rejects_difficulty() {
        let config = LedgerConfig {
            difficulty: 9,
            ..LedgerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidDifficulty(9)));
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_value::<u8>("K", "3"), Ok(3));
        assert_eq!(
            parse_value::<u8>("K", "three"),
            Err(ConfigError::InvalidValue {
                key: "K",
                value: "three".into()
            })
        );
        assert!(parse_env_flag("On"));
        assert!(!parse_env_flag("off"));
    }
}
