//! Configuration loading and parsing

use anyhow::{Context, Result};
use apdu_trace_decoder::{CorrelatorConfig, RenderMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub correlator: CorrelatorConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Default strftime pattern for transaction timestamps
pub const DEFAULT_TIME_FORMAT: &str = "%H:%M:%S%.3f";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub mode: RenderMode,
    #[serde(default)]
    pub timestamps: bool,
    /// chrono strftime pattern used when `timestamps` is on
    #[serde(default = "default_time_format")]
    pub time_format: String,
    pub file: Option<PathBuf>,
}

fn default_time_format() -> String {
    DEFAULT_TIME_FORMAT.to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            mode: RenderMode::default(),
            timestamps: false,
            time_format: default_time_format(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Txt,
    Json,
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::num::NonZeroUsize;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [correlator]
            no_response_markers = ["80 14 05 00 00", "80CA9F7F"]
            max_history = 500

            [output]
            format = "json"
            mode = "readable"
            timestamps = true
            time_format = "%Y-%m-%d %H:%M:%S"
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.correlator.no_response_markers.len(), 2);
        assert_eq!(config.correlator.max_history, NonZeroUsize::new(500));
        assert_eq!(config.output.format, OutputFormat::Json);
        assert_eq!(config.output.mode, RenderMode::Readable);
        assert!(config.output.timestamps);
        assert_eq!(config.output.time_format, "%Y-%m-%d %H:%M:%S");
        assert!(config.output.file.is_none());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(
            config.correlator.no_response_markers,
            vec![apdu_trace_decoder::DEFAULT_NO_RESPONSE_MARKER]
        );
        assert_eq!(config.output.format, OutputFormat::Txt);
        assert_eq!(config.output.mode, RenderMode::Hex);
        assert_eq!(config.output.time_format, DEFAULT_TIME_FORMAT);
        assert_eq!(config.correlator.max_history, None);
    }

    #[test]
    fn test_zero_max_history_is_rejected() {
        assert!(toml::from_str::<AppConfig>("[correlator]\nmax_history = 0").is_err());
        assert!(toml::from_str::<AppConfig>("[correlator]\nmax_history = 1").is_ok());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[output]\nfile = \"report.json\"\nformat = \"json\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.output.file, Some(PathBuf::from("report.json")));
        assert_eq!(config.output.format, OutputFormat::Json);
    }

    #[test]
    fn test_load_config_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[output]\nformat = \"xml\"").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
