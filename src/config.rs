//! Runtime configuration.
//!
//! The embedding game owns the config file location; this module only
//! defines the shape and the TOML round-trip. All values have defaults
//! matching the engine's wire-level constants, so an empty document is a
//! valid configuration.

use serde::{Deserialize, Serialize};

use crate::stream::{MAX_VOLUME, NORMAL_VOLUME};

/// Sound runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    /// Volume settings
    pub volume: VolumeConfig,

    /// Sound-effect behavior
    pub sfx: SfxConfig,

    /// Streaming behavior
    pub stream: StreamConfig,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            volume: VolumeConfig::default(),
            sfx: SfxConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

/// Initial volume levels (0-255).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Music stream volume
    pub music: u32,
    /// Speech stream volume
    pub speech: u32,
    /// Sound-effect volume
    pub sfx: u32,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            music: NORMAL_VOLUME,
            speech: MAX_VOLUME,
            sfx: MAX_VOLUME,
        }
    }
}

/// Sound-effect settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SfxConfig {
    /// Whether effects are placed in the stereo field. When false, all
    /// effects play from the non-positional fallback position.
    pub positional: bool,
}

impl Default for SfxConfig {
    fn default() -> Self {
        Self { positional: true }
    }
}

/// Streaming settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bytes decoded per mixer buffer. Together with the per-slot buffer
    /// count this sets the stream's latency tolerance.
    pub chunk_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { chunk_bytes: 4096 }
    }
}

impl SoundConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Serialize the configuration to TOML text.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
