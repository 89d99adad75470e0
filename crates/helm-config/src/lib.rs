//! Configuration management for Helm
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (HELM_* prefix, `__` between section and key)
//! 2. helm.local.toml (gitignored, local overrides)
//! 3. helm.toml (git-tracked, project config)
//! 4. ~/.config/helm/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)
//!
//! The result converts into [`helm_kernel::GovernanceParams`], which are
//! fixed at genesis.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use helm_kernel::{GovernanceParams, Threshold};
use serde::{Deserialize, Serialize};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main Helm configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmConfig {
    pub project: ProjectConfig,
    pub governance: GovernanceConfig,
    pub emergency: EmergencyConfig,
    pub rollback: RollbackConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "helm-project".to_string(),
        }
    }
}

/// Proposal and voting settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// How long proposals accept votes.
    pub voting_period_secs: u64,
    /// `majority`, a fraction such as `2/3`, or `count:N`.
    pub threshold: String,
    /// Minimum number of cast votes.
    pub quorum: u32,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        let params = GovernanceParams::default();
        Self {
            voting_period_secs: params.voting_period.as_secs(),
            threshold: "majority".to_string(),
            quorum: params.quorum,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyConfig {
    /// How long emergency mode stays active once enabled.
    pub duration_secs: u64,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            duration_secs: GovernanceParams::default().emergency_duration.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    /// Number of most recent upgrades that may be rolled back.
    pub window: u32,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            window: GovernanceParams::default().rollback_window,
        }
    }
}

impl HelmConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Checks every value can be turned into working governance parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.governance.voting_period_secs == 0 {
            return Err(ConfigError::ValidationError(
                "governance.voting_period_secs must be greater than zero".to_string(),
            ));
        }
        if self.emergency.duration_secs == 0 {
            return Err(ConfigError::ValidationError(
                "emergency.duration_secs must be greater than zero".to_string(),
            ));
        }
        if self.rollback.window == 0 {
            return Err(ConfigError::ValidationError(
                "rollback.window must be at least 1".to_string(),
            ));
        }
        self.threshold()?;
        Ok(())
    }

    /// Parses the configured approval threshold.
    pub fn threshold(&self) -> Result<Threshold, ConfigError> {
        self.governance
            .threshold
            .parse()
            .map_err(ConfigError::ValidationError)
    }

    /// Converts into kernel governance parameters, validating first.
    pub fn governance_params(&self) -> Result<GovernanceParams, ConfigError> {
        self.validate()?;

        Ok(GovernanceParams::default()
            .with_voting_period(Duration::from_secs(self.governance.voting_period_secs))
            .with_threshold(self.threshold()?)
            .with_quorum(self.governance.quorum)
            .with_rollback_window(self.rollback.window)
            .with_emergency_duration(Duration::from_secs(self.emergency.duration_secs)))
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_kernel_defaults() {
        let config = HelmConfig::default();
        let params = config.governance_params().expect("defaults are valid");

        assert_eq!(params, GovernanceParams::default());
        assert_eq!(config.governance.voting_period_secs, 3 * 24 * 60 * 60);
        assert_eq!(config.emergency.duration_secs, 24 * 60 * 60);
        assert_eq!(config.rollback.window, 3);
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let mut config = HelmConfig::default();
        config.rollback.window = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = HelmConfig::default();
        config.governance.voting_period_secs = 0;
        assert!(config.validate().is_err());

        let mut config = HelmConfig::default();
        config.emergency.duration_secs = 0;
        assert!(config.governance_params().is_err());
    }

    #[test]
    fn test_threshold_is_parsed() {
        let mut config = HelmConfig::default();
        config.governance.threshold = "2/3".to_string();
        assert_eq!(
            config.governance_params().unwrap().threshold,
            Threshold::Fraction {
                numerator: 2,
                denominator: 3
            }
        );

        config.governance.threshold = "5/4".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = HelmConfig::default();
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("[governance]"));

        let parsed: HelmConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
