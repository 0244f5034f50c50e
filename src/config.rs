use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const MIN_INTERVAL: Duration = Duration::from_millis(100);
const MIN_REFRESH: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub sensors: SensorsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    Bars,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DisplayConfig {
    #[serde(default = "default_display_mode")]
    pub mode: DisplayMode,
    #[serde(default = "default_refresh")]
    pub refresh: String,
    #[serde(default = "default_bar_width")]
    pub bar_width: usize,
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SensorsConfig {
    #[serde(default = "default_nvidia_smi")]
    pub nvidia_smi: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            display: DisplayConfig::default(),
            sensors: SensorsConfig::default(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            mode: default_display_mode(),
            refresh: default_refresh(),
            bar_width: default_bar_width(),
            placeholder: default_placeholder(),
        }
    }
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            nvidia_smi: default_nvidia_smi(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
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
        let interval = self.interval()?;
        if interval < MIN_INTERVAL {
            return Err(ConfigError::Validation(format!(
                "interval must be at least {}",
                humantime::format_duration(MIN_INTERVAL)
            )));
        }

        let refresh = self.display.refresh()?;
        if refresh < MIN_REFRESH {
            return Err(ConfigError::Validation(format!(
                "display.refresh must be at least {}",
                humantime::format_duration(MIN_REFRESH)
            )));
        }
        if !(1..=100).contains(&self.display.bar_width) {
            return Err(ConfigError::Validation(
                "display.bar_width must be in 1..=100".to_string(),
            ));
        }
        if self.display.placeholder.trim().is_empty() {
            return Err(ConfigError::Validation(
                "display.placeholder must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn interval(&self) -> Result<Duration, ConfigError> {
        parse_duration_field("interval", &self.interval)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

impl DisplayConfig {
    pub fn refresh(&self) -> Result<Duration, ConfigError> {
        parse_duration_field("display.refresh", &self.refresh)
    }
}

fn parse_duration_field(name: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|err| {
        ConfigError::Validation(format!("{name} '{value}' is not a duration: {err}"))
    })
}

fn default_interval() -> String {
    "500ms".to_string()
}

fn default_refresh() -> String {
    "500ms".to_string()
}

const fn default_display_mode() -> DisplayMode {
    DisplayMode::Bars
}

const fn default_bar_width() -> usize {
    20
}

fn default_placeholder() -> String {
    "N/A".to_string()
}

const fn default_nvidia_smi() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().expect("defaults validate");
        assert_eq!(cfg.interval().expect("interval"), Duration::from_millis(500));
        assert_eq!(cfg.display.mode, DisplayMode::Bars);
    }

    #[test]
    fn example_file_parses_and_validates() {
        let cfg: Config = serde_yaml::from_str(Config::example_yaml()).expect("example parses");
        cfg.validate().expect("example validates");
        assert_eq!(cfg.display.placeholder, "N/A");
    }

    #[test]
    fn empty_document_falls_back_to_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").expect("parses");
        assert_eq!(cfg.interval, "500ms");
        assert_eq!(cfg.display.bar_width, 20);
        assert!(cfg.sensors.nvidia_smi);
    }

    #[test]
    fn rejects_bad_durations_and_limits() {
        let mut cfg = Config::default();
        cfg.interval = "soon".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));

        cfg.interval = "10ms".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));

        let mut cfg = Config::default();
        cfg.display.bar_width = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.display.placeholder = "  ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_display_mode_is_a_parse_error() {
        let parsed: Result<Config, _> = serde_yaml::from_str("display:\n  mode: window\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Config::load_from_file("/nonexistent/hwoverlay.yaml").expect_err("missing");
        assert!(err.to_string().contains("/nonexistent/hwoverlay.yaml"));
    }
}
