use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{dsp::DynamicsConfig, mapping::MappingConfig, mixer::MixerConfig, timeline::LoopTiming, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub timing: LoopTiming,
    pub mapping: MappingConfig,
    pub dynamics: DynamicsConfig,
    pub mixer: MixerConfig,
    pub export: ExportConfig,
    pub assets: AssetConfig,
}

impl AppConfig {
    /// Parses a JSON document. Missing sections fall back to their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON configuration file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    /// FFT length of the master-bus analyser.
    pub analyser_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 1024,
            analyser_size: 1024,
        }
    }
}

/// Where sticker samples live on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub root: PathBuf,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("assets"),
        }
    }
}

/// Settings for the external video encoding service and export defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub server_url: String,
    pub health_timeout_secs: u64,
    pub encode_timeout_secs: u64,
    pub duration_secs: f32,
    pub fps: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3001".to_string(),
            health_timeout_secs: 3,
            encode_timeout_secs: 300,
            duration_secs: 16.0,
            fps: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_fill_in_defaults() {
        let config = AppConfig::from_json_str(
            r#"{ "audio": { "sample_rate": 44100 }, "export": { "fps": 24 } }"#,
        )
        .unwrap();

        assert_eq!(config.audio.sample_rate, 44_100);
        assert_eq!(config.audio.block_size, 1024);
        assert_eq!(config.export.fps, 24);
        assert_eq!(config.export.health_timeout_secs, 3);
        assert_eq!(config.timing.tempo_bpm, 120.0);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = AppConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, crate::AlbumAudioError::Json(_)));
    }
}
