use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config file")]
    ReadFailed,
    #[error("failed to write config file")]
    WriteFailed,
    #[error("failed to parse config file")]
    ParseFailed,
    #[error("no usable config path (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: Database,
    pub service: Service,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Append-only error sink, written in addition to console logging.
    pub error_log: String,
    /// How often the active monitor set is re-read from the database.
    pub monitor_reload_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: Database { path: "pulse.db".into() },
            service: Service { error_log: "pulse-error.log".into(), monitor_reload_seconds: 30 },
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current Internal Configuration State:")?;
        writeln!(f, "  Database")?;
        writeln!(f, "    Path: {}", self.database.path)?;
        writeln!(f, "  Service")?;
        writeln!(f, "    Error Log: {}", self.service.error_log)?;
        writeln!(f, "    Monitor Reload: {}s", self.service.monitor_reload_seconds)?;
        Ok(())
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/pulse/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("pulse/config.toml"))
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/pulse/config.toml or the
    /// specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(|_err| Error::ReadFailed)?;
            toml::from_str(raw_string.as_str()).map_err(|_err| Error::ParseFailed)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), Error> {
        let config_str: String =
            toml::to_string_pretty(self).map_err(|_err| Error::ParseFailed)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_err| Error::WriteFailed)?;
        }

        std::fs::write(path, config_str).map_err(|_err| Error::WriteFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.database.path, "pulse.db");
        assert!(path.exists());

        // Round-trips through the file it just wrote.
        let reread = Config::from_config(Some(&path)).unwrap();
        assert_eq!(reread.service.monitor_reload_seconds, 30);
    }

    #[test]
    fn non_toml_extension_is_normalized() {
        assert_eq!(
            normalize_toml_path(path::Path::new("/tmp/pulse-config")),
            path::PathBuf::from("/tmp/pulse-config.toml")
        );
    }
}
