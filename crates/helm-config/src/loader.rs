//! Configuration loader with multi-source merging

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::{HelmConfig, Paths};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    user_config: bool,
}

impl ConfigLoader {
    /// Loader rooted at the current directory
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "HELM".to_string(),
            user_config: true,
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "HELM")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skip ~/.config/helm/config.toml
    pub fn without_user_config(mut self) -> Self {
        self.user_config = false;
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<HelmConfig> {
        let mut builder = config::Config::builder();

        // 1. Built-in defaults
        let defaults = HelmConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config
        if self.user_config {
            if let Ok(user_config_file) = Paths::new().user_config_file() {
                builder = builder.add_source(toml_file(user_config_file));
            }
        }

        // 3. Project config (helm.toml)
        builder = builder.add_source(toml_file(Paths::project_config_file(&self.project_dir)));

        // 4. Local config (helm.local.toml)
        builder = builder.add_source(toml_file(Paths::local_config_file(&self.project_dir)));

        // 5. Environment, e.g. HELM_ROLLBACK__WINDOW=5
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let helm_config: HelmConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        helm_config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", self.project_dir.display()))?;

        Ok(helm_config)
    }

    /// Load configuration or return defaults if anything fails
    pub fn load_or_default(self) -> HelmConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn toml_file(path: PathBuf) -> config::File<config::FileSourceFile, config::FileFormat> {
    config::File::from(path)
        .required(false)
        .format(config::FileFormat::Toml)
}
