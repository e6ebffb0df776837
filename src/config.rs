use crate::collectors::sources::SourcePaths;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_broadcast_interval")]
    pub broadcast_interval: String,
    #[serde(default = "default_cpu_sample_window")]
    pub cpu_sample_window: String,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourcesConfig {
    #[serde(default = "default_roots")]
    pub roots: Vec<String>,
    #[serde(default = "default_thermal_zone")]
    pub thermal_zone: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            broadcast_interval: default_broadcast_interval(),
            cpu_sample_window: default_cpu_sample_window(),
            sources: SourcesConfig::default(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            thermal_zone: default_thermal_zone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "поле listen обязательно".to_string(),
            ));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            ));
        }

        let interval = self.broadcast_interval()?;
        if interval < Duration::from_secs(1) {
            return Err(ConfigError::Validation(
                "broadcast_interval должно быть >= 1s".to_string(),
            ));
        }
        let window = self.cpu_sample_window()?;
        if window.is_zero() {
            return Err(ConfigError::Validation(
                "cpu_sample_window должно быть > 0".to_string(),
            ));
        }
        if window >= interval {
            return Err(ConfigError::Validation(
                "cpu_sample_window должно быть меньше broadcast_interval".to_string(),
            ));
        }

        validate_sources(&self.sources)
    }

    pub fn broadcast_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration("broadcast_interval", &self.broadcast_interval)
    }

    pub fn cpu_sample_window(&self) -> Result<Duration, ConfigError> {
        parse_duration("cpu_sample_window", &self.cpu_sample_window)
    }

    pub fn source_paths(&self) -> SourcePaths {
        SourcePaths::new(
            self.sources.roots.iter().map(PathBuf::from).collect(),
            self.sources.thermal_zone.clone(),
        )
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|err| {
        ConfigError::Validation(format!(
            "{field} '{value}' не является длительностью (например 5s, 250ms): {err}"
        ))
    })
}

fn validate_sources(sources: &SourcesConfig) -> Result<(), ConfigError> {
    if sources.roots.is_empty() {
        return Err(ConfigError::Validation(
            "sources.roots должен содержать хотя бы один каталог".to_string(),
        ));
    }
    for root in &sources.roots {
        if !Path::new(root).is_absolute() {
            return Err(ConfigError::Validation(format!(
                "sources.roots '{root}' должен быть абсолютным путём"
            )));
        }
    }
    let zone = sources.thermal_zone.trim();
    if zone.is_empty() {
        return Err(ConfigError::Validation(
            "sources.thermal_zone не должен быть пустым".to_string(),
        ));
    }
    if zone.contains('/') {
        return Err(ConfigError::Validation(format!(
            "sources.thermal_zone '{zone}' должен быть именем зоны, а не путём"
        )));
    }
    Ok(())
}

fn default_listen() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_broadcast_interval() -> String {
    "5s".to_string()
}

fn default_cpu_sample_window() -> String {
    "250ms".to_string()
}

fn default_roots() -> Vec<String> {
    vec!["/".to_string(), "/host".to_string()]
}

fn default_thermal_zone() -> String {
    "thermal_zone0".to_string()
}
