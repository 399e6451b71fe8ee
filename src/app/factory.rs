use crate::{app::service::AppService, config::Config};
use anyhow::{Context, Result};
use homedir::my_home;
use std::path::{Path, PathBuf};

/// Application factory for creating and configuring application components
pub struct AppFactory;

impl AppFactory {
    /// Load the config from the base directory and create a service per
    /// enabled language.
    pub fn create_app_service(paths: &AppPaths) -> Result<AppService> {
        let config = Self::create_config(&paths.base_path)?;
        Ok(AppService::new(config))
    }

    /// Get application paths, creating the base directory if needed
    pub fn get_paths() -> Result<AppPaths> {
        let base_path = Self::get_base_path()?;

        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Ok(AppPaths { base_path })
    }

    pub fn create_config(base_path: &Path) -> Result<Config> {
        Config::load_with(base_path)
            .with_context(|| format!("Failed to load config from {}", base_path.display()))
    }

    /// `NIC_BASE_PATH`, or `~/.local/share/nic-search`
    fn get_base_path() -> Result<PathBuf> {
        if let Ok(base_path) = std::env::var("NIC_BASE_PATH") {
            return Ok(PathBuf::from(base_path));
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;
        Ok(home.join(".local").join("share").join("nic-search"))
    }
}

/// Application paths structure
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: PathBuf,
}
