use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::dialogue::{LoadingTiming, LOADING_CYCLE_MS, LOADING_DELAY_MS};
use crate::error_codes::CodedError;
use crate::timecodes::TimecodeTable;

pub const ENDPOINT_ENV: &str = "STEVESROOM_ENDPOINT";
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:5000";
pub const DEFAULT_OPENING_LINE: &str = "...(sigh)";
pub const DEFAULT_OPENING_DELAY_MS: u64 = 5_500;
pub const DEFAULT_VOLUME: f32 = 1.0;
/// Length of `room.webm`.
pub const DEFAULT_VIDEO_DURATION_SECS: f64 = 50.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RoomConfig {
    pub endpoint: String,
    /// Timecode YAML. Relative paths resolve against the config file.
    pub timecodes: Option<PathBuf>,
    /// Volume restored by start and by unmuting.
    pub volume: f32,
    pub request_timeout_secs: u64,
    pub opening_line: String,
    pub opening_delay_ms: u64,
    pub loading_delay_ms: u64,
    pub loading_cycle_ms: u64,
    pub video_duration_secs: f64,
    /// Seed for shake jitter.
    pub seed: u64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            timecodes: None,
            volume: DEFAULT_VOLUME,
            request_timeout_secs: 20,
            opening_line: DEFAULT_OPENING_LINE.to_owned(),
            opening_delay_ms: DEFAULT_OPENING_DELAY_MS,
            loading_delay_ms: LOADING_DELAY_MS,
            loading_cycle_ms: LOADING_CYCLE_MS,
            video_duration_secs: DEFAULT_VIDEO_DURATION_SECS,
            seed: 0,
        }
    }
}

impl RoomConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config: RoomConfig = serde_yaml::from_str(&contents).map_err(|error| {
            let location = error
                .location()
                .map(|location| format!("line {}, column {}", location.line(), location.column()))
                .unwrap_or_else(|| "unknown location".to_owned());
            anyhow!(
                "failed to parse yaml in {} at {}: {}",
                path.display(),
                location,
                error
            )
        })?;

        if let Some(timecodes) = config.timecodes.as_mut() {
            if timecodes.is_relative() {
                let config_dir = path.parent().unwrap_or_else(|| Path::new("."));
                *timecodes = config_dir.join(&*timecodes);
            }
        }

        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        parse_endpoint(&self.endpoint)?;
        if !self.volume.is_finite() || self.volume <= 0.0 || self.volume > 1.0 {
            return Err(anyhow!(CodedError::config(
                "INVALID_VOLUME",
                format!("volume must be within (0, 1], got {}", self.volume),
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow!(CodedError::config(
                "INVALID_TIMEOUT",
                "request_timeout_secs must be > 0",
            )));
        }
        if !self.video_duration_secs.is_finite() || self.video_duration_secs <= 0.0 {
            return Err(anyhow!(CodedError::config(
                "INVALID_DURATION",
                "video_duration_secs must be > 0",
            )));
        }
        Ok(())
    }

    /// CLI wins over env, env wins over the config file.
    pub fn resolve_endpoint(&self, cli_arg: Option<&str>, env_var: Option<String>) -> Result<Url> {
        if let Some(endpoint) = cli_arg {
            return parse_endpoint(endpoint);
        }
        match env_var.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => parse_endpoint(endpoint),
            _ => parse_endpoint(&self.endpoint),
        }
    }

    pub fn timecode_table(&self) -> Result<TimecodeTable> {
        match &self.timecodes {
            Some(path) => TimecodeTable::load(path),
            None => Ok(TimecodeTable::room()),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn loading_timing(&self) -> LoadingTiming {
        LoadingTiming {
            delay_ms: self.loading_delay_ms,
            cycle_ms: self.loading_cycle_ms,
        }
    }
}

pub fn parse_endpoint(raw: &str) -> Result<Url> {
    let invalid = |reason: String| {
        anyhow!(CodedError::usage(
            "INVALID_ENDPOINT",
            format!("invalid chat endpoint '{raw}': {reason}"),
        )
        .with_details(json!({ "provided": raw, "allowed_schemes": ["http", "https"] })))
    };

    let url = Url::parse(raw.trim()).map_err(|error| invalid(error.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_codes::find_coded_error;

    #[test]
    fn defaults_are_valid() {
        let config = RoomConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.opening_line, "...(sigh)");
        assert_eq!(config.loading_timing(), LoadingTiming::default());
    }

    #[test]
    fn endpoint_resolution_prefers_cli_then_env_then_file() {
        let config = RoomConfig {
            endpoint: "http://file.local:1".to_owned(),
            ..RoomConfig::default()
        };
        let cli = config
            .resolve_endpoint(Some("http://cli.local:2"), Some("http://env.local:3".to_owned()))
            .expect("cli");
        assert_eq!(cli.host_str(), Some("cli.local"));

        let env = config
            .resolve_endpoint(None, Some("http://env.local:3".to_owned()))
            .expect("env");
        assert_eq!(env.host_str(), Some("env.local"));

        let file = config
            .resolve_endpoint(None, Some("  ".to_owned()))
            .expect("file");
        assert_eq!(file.host_str(), Some("file.local"));
    }

    #[test]
    fn non_http_endpoint_is_rejected_with_code() {
        let error = parse_endpoint("ftp://example.com").unwrap_err();
        assert_eq!(
            find_coded_error(&error).map(|coded| coded.code),
            Some("INVALID_ENDPOINT")
        );
    }

    #[test]
    fn load_resolves_timecodes_relative_to_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("room.yaml");
        fs::write(
            &config_path,
            "endpoint: http://127.0.0.1:9000\ntimecodes: cuts.yaml\nvolume: 0.5\n",
        )
        .expect("write config");

        let config = RoomConfig::load(&config_path).expect("config");
        assert_eq!(config.timecodes, Some(dir.path().join("cuts.yaml")));
        assert_eq!(config.volume, 0.5);
        assert_eq!(config.opening_delay_ms, DEFAULT_OPENING_DELAY_MS);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("room.yaml");
        fs::write(&config_path, "endpoint: http://x\nvolumee: 0.5\n").expect("write config");
        let error = RoomConfig::load(&config_path).unwrap_err();
        assert!(format!("{error:#}").contains("volumee"));
    }

    #[test]
    fn zero_volume_is_rejected() {
        let config = RoomConfig {
            volume: 0.0,
            ..RoomConfig::default()
        };
        let error = config.validate().unwrap_err();
        assert_eq!(
            find_coded_error(&error).map(|coded| coded.code),
            Some("INVALID_VOLUME")
        );
    }
}
