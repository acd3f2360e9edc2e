//! Configuration loading and root folder resolution

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Name of the SQLite database file inside the root folder
pub const DATABASE_FILE_NAME: &str = "segcraft.db";

/// Environment variable consulted when no command-line root folder is given
pub const ROOT_FOLDER_ENV: &str = "SEGCRAFT_ROOT_FOLDER";

/// Root folder resolution, in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file (`root_folder = "..."`)
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    if let Ok(config_path) = locate_config_file() {
        if let Some(root_folder) = read_root_folder_from(&config_path)? {
            return Ok(root_folder);
        }
    }

    Ok(default_root_folder())
}

/// Path of the database file for a resolved root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join(DATABASE_FILE_NAME)
}

/// Read the `root_folder` key from a TOML config file
///
/// A missing key yields `None`; a malformed file is a configuration error.
pub fn read_root_folder_from(config_path: &Path) -> Result<Option<PathBuf>> {
    let toml_content = std::fs::read_to_string(config_path)?;
    let config = toml::from_str::<toml::Value>(&toml_content)
        .map_err(|e| Error::Config(format!("Invalid config file {}: {}", config_path.display(), e)))?;

    Ok(config
        .get("root_folder")
        .and_then(|v| v.as_str())
        .map(PathBuf::from))
}

/// Find the configuration file for the platform
fn locate_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("segcraft").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/segcraft/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("segcraft"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\segcraft"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("segcraft"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/segcraft"))
    } else {
        // ~/.local/share/segcraft, or /var/lib/segcraft for system-wide installs
        dirs::data_local_dir()
            .map(|d| d.join("segcraft"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/segcraft"))
    }
}
