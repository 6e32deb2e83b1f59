use anyhow::{Context, Result};
use bowed_core::EngineSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Output device selection. Unset fields fall back to the platform defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceOptions {
    /// cpal host id, e.g. "ALSA", "CoreAudio", "ASIO"
    pub host: Option<String>,
    pub output_device: Option<String>,
    /// Frames per callback
    pub buffer_size: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub engine: EngineSettings,
    pub device: DeviceOptions,
}

/// Load a config from a JSON file
pub fn load_config(path: &Path) -> Result<HostConfig> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config: HostConfig = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse config JSON in {}", path.display()))?;
    Ok(config)
}

/// Save a config as pretty-printed JSON
pub fn save_config(path: &Path, config: &HostConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;
    Ok(())
}

/// A missing file means defaults; an unreadable or malformed one is an error.
pub fn load_or_default(path: Option<&Path>) -> Result<HostConfig> {
    match path {
        Some(path) if path.exists() => load_config(path),
        Some(path) => {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(HostConfig::default())
        }
        None => Ok(HostConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, tempdir};

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bowed.json");

        let mut config = HostConfig::default();
        config.engine.gain_db = -18.0;
        config.engine.params.fundamental_frequency = 196.0;
        config.device.buffer_size = Some(256);

        save_config(&path, &config).unwrap();
        let loaded = load_config(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let json = r#"{
            "engine": { "sample_rate": 96000, "params": { "beta": 0.001 } },
            "device": { "output_device": "Speakers" }
        }"#;
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(json.as_bytes()).unwrap();

        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(loaded.engine.sample_rate, 96000);
        assert_eq!(loaded.engine.params.beta, 0.001);
        assert_eq!(loaded.engine.params.fundamental_frequency, 220.0);
        assert_eq!(loaded.device.output_device.as_deref(), Some("Speakers"));
        assert_eq!(loaded.device.buffer_size, None);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let loaded = load_or_default(Some(Path::new("/nonexistent/bowed.json"))).unwrap();
        assert_eq!(loaded, HostConfig::default());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"{ \"engine\": [").unwrap();

        let result = load_or_default(Some(temp_file.path()));
        assert!(result.is_err());
    }
}
