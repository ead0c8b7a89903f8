//! Configuration management (config.toml)
//!
//! Handles loading, saving, and providing defaults for session settings.
//! Settings are stored in TOML format in the platform-specific config directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::audio::{MAX_SOUND_BUFFERS, MIN_SOUND_BUFFERS, SUPPORTED_SAMPLE_RATES};
use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.toml";

/// Session configuration.
///
/// Contains all user-configurable settings organized into sections.
/// Serialized to/from TOML format for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Frame timing settings
    #[serde(default)]
    pub video: VideoConfig,
    /// Audio stream settings
    #[serde(default)]
    pub audio: AudioConfig,
    /// Screenshot settings
    #[serde(default)]
    pub capture: CaptureConfig,
}

/// Frame timing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Emulated frame rate in Hz (default: 60.0)
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,
    /// Hold frames to real time on the emulation thread (default: true)
    #[serde(default = "default_true")]
    pub pacing: bool,
}

/// Audio configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Whether sound is produced at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Output sample rate (default: 44100, one of 22050/32000/44100/48000)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Interleaved channel count (default: 2)
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Buffers queued ahead of the device (default: 3, range: 2-8)
    #[serde(default = "default_sound_buffers")]
    pub sound_buffers: u32,
    /// Ceiling for automatic buffer growth (default: 8)
    #[serde(default = "default_max_sound_buffers")]
    pub max_sound_buffers: u32,
    /// Grow the buffer count when the device underruns (default: true)
    #[serde(default = "default_true")]
    pub add_buffers_on_underrun: bool,
    /// Keep sound on while fast-forwarding (default: false)
    #[serde(default)]
    pub sound_during_fast_forward: bool,
}

/// Screenshot configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CaptureConfig {
    /// Where screenshots are written (default: `<data dir>/screenshots`)
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}
fn default_frame_rate() -> f64 {
    crate::pacing::DEFAULT_FRAME_RATE
}
fn default_sample_rate() -> u32 {
    44_100
}
fn default_channels() -> u16 {
    2
}
fn default_sound_buffers() -> u32 {
    3
}
fn default_max_sound_buffers() -> u32 {
    MAX_SOUND_BUFFERS
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            frame_rate: default_frame_rate(),
            pacing: default_true(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            sound_buffers: default_sound_buffers(),
            max_sound_buffers: default_max_sound_buffers(),
            add_buffers_on_underrun: default_true(),
            sound_during_fast_forward: false,
        }
    }
}

impl CaptureConfig {
    /// Configured screenshot directory, or the platform default
    pub fn resolved_directory(&self) -> Option<PathBuf> {
        self.directory
            .clone()
            .or_else(crate::capture::default_screenshots_dir)
    }
}

impl Config {
    /// Load from an explicit path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save to an explicit path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_err)
    }

    /// Check values against their supported ranges.
    ///
    /// Returns a list of warning messages; an empty list means the config is usable as-is.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !(self.video.frame_rate.is_finite() && self.video.frame_rate > 0.0) {
            warnings.push(format!(
                "video.frame_rate {} is not a positive rate",
                self.video.frame_rate
            ));
        }
        if !SUPPORTED_SAMPLE_RATES.contains(&self.audio.sample_rate) {
            warnings.push(format!(
                "audio.sample_rate {} is not one of {:?}",
                self.audio.sample_rate, SUPPORTED_SAMPLE_RATES
            ));
        }
        if self.audio.channels == 0 {
            warnings.push("audio.channels must be at least 1".to_string());
        }
        if !(MIN_SOUND_BUFFERS..=MAX_SOUND_BUFFERS).contains(&self.audio.max_sound_buffers) {
            warnings.push(format!(
                "audio.max_sound_buffers {} outside {}-{}",
                self.audio.max_sound_buffers, MIN_SOUND_BUFFERS, MAX_SOUND_BUFFERS
            ));
        }
        if self.audio.sound_buffers < MIN_SOUND_BUFFERS
            || self.audio.sound_buffers > self.audio.max_sound_buffers
        {
            warnings.push(format!(
                "audio.sound_buffers {} outside {}-{}",
                self.audio.sound_buffers, MIN_SOUND_BUFFERS, self.audio.max_sound_buffers
            ));
        }

        warnings
    }

    /// Copy with every value clamped into its supported range
    pub fn sanitized(&self) -> Self {
        let mut config = self.clone();
        if !(config.video.frame_rate.is_finite() && config.video.frame_rate > 0.0) {
            config.video.frame_rate = default_frame_rate();
        }
        if !SUPPORTED_SAMPLE_RATES.contains(&config.audio.sample_rate) {
            config.audio.sample_rate = default_sample_rate();
        }
        config.audio.channels = config.audio.channels.max(1);
        config.audio.max_sound_buffers = config
            .audio
            .max_sound_buffers
            .clamp(MIN_SOUND_BUFFERS, MAX_SOUND_BUFFERS);
        config.audio.sound_buffers = config
            .audio
            .sound_buffers
            .clamp(MIN_SOUND_BUFFERS, config.audio.max_sound_buffers);
        config
    }
}

/// Returns the platform-specific configuration directory.
///
/// On Linux: `~/.config/Framestep`
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.framestep", "", "Framestep")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Returns the platform-specific data directory (screenshots live here).
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.framestep", "", "Framestep")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Loads the configuration from disk.
///
/// Reads `config.toml` from the platform's configuration directory.
/// Returns default values if the file doesn't exist or cannot be parsed.
pub fn load() -> Config {
    let Some(path) = config_dir().map(|dir| dir.join(CONFIG_FILE)) else {
        return Config::default();
    };
    if !path.exists() {
        debug!("No config at {}, using defaults", path.display());
        return Config::default();
    }
    match Config::load_from(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!("{}; using defaults", e);
            Config::default()
        }
    }
}

/// Saves the configuration to the platform's configuration directory.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    match config_dir() {
        Some(dir) => config.save_to(&dir.join(CONFIG_FILE)),
        None => Ok(()),
    }
}
