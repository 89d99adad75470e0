//! Path utilities and XDG directory discovery

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::ConfigError;

/// XDG-compliant paths for Helm
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("dev", "Helm", "helm"),
        }
    }

    /// User config directory (~/.config/helm/)
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| {
                ConfigError::XdgError("Failed to determine user config directory".to_string())
            })
    }

    /// User config file (~/.config/helm/config.toml)
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.user_config_dir()?.join("config.toml"))
    }

    /// Project config file (helm.toml)
    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("helm.toml")
    }

    /// Local override file (helm.local.toml, gitignored)
    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("helm.local.toml")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
