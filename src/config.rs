use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::LabError;

pub const DEFAULT_CONFIG_FILE: &str = "genolab.json";
pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub const ENV_PORT: &str = "GENOLAB_PORT";
pub const ENV_DATABASE: &str = "GENOLAB_DATABASE";
pub const ENV_UPLOAD_DIR: &str = "GENOLAB_UPLOAD_DIR";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub upload_dir: Option<String>,
    #[serde(default)]
    pub max_upload_bytes: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub port: u16,
    pub database: Utf8PathBuf,
    pub upload_dir: Utf8PathBuf,
    pub max_upload_bytes: usize,
}

impl ResolvedConfig {
    /// Applies `GENOLAB_*` overrides found through `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, LabError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port.trim().parse().map_err(|_| LabError::ConfigEnv {
                key: ENV_PORT.to_string(),
                message: format!("not a port number: {port}"),
            })?;
            info!(port = self.port, "{ENV_PORT} override applied");
        }
        if let Some(database) = lookup(ENV_DATABASE).filter(|value| !value.trim().is_empty()) {
            self.database = Utf8PathBuf::from(database.trim());
        }
        if let Some(upload_dir) = lookup(ENV_UPLOAD_DIR).filter(|value| !value.trim().is_empty()) {
            self.upload_dir = Utf8PathBuf::from(upload_dir.trim());
        }
        Ok(self)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `genolab.json` when present, then applies `GENOLAB_*`
    /// environment overrides.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, LabError> {
        Self::resolve_config(Self::load(path)?)?.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Parses the config file; the implicit `genolab.json` is optional.
    pub fn load(path: Option<&str>) -> Result<Config, LabError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };
        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }
        let content =
            fs::read_to_string(&config_path).map_err(|_| LabError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| LabError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, LabError> {
        let database = match config.database {
            Some(database) => Utf8PathBuf::from(database),
            None => default_database_path()?,
        };
        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            port: config.port.unwrap_or(DEFAULT_PORT),
            database,
            upload_dir: Utf8PathBuf::from(
                config
                    .upload_dir
                    .unwrap_or_else(|| DEFAULT_UPLOAD_DIR.to_string()),
            ),
            max_upload_bytes: config.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        })
    }
}

pub fn default_database_path() -> Result<Utf8PathBuf, LabError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.data_dir().join("genolab").join("genolab.sqlite")).ok()
        })
        .ok_or_else(|| LabError::Filesystem("unable to resolve data directory".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_values_win_over_defaults() {
        let config = Config {
            schema_version: None,
            port: Some(8081),
            database: Some("lab.sqlite".to_string()),
            upload_dir: None,
            max_upload_bytes: None,
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.port, 8081);
        assert_eq!(resolved.database, Utf8PathBuf::from("lab.sqlite"));
        assert_eq!(resolved.upload_dir, Utf8PathBuf::from(DEFAULT_UPLOAD_DIR));
        assert_eq!(resolved.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }
}
