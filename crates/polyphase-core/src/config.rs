//! Configuration file support for polyphase
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/polyphase/config.toml`
//! - macOS: `~/Library/Application Support/polyphase/config.toml`
//! - Windows: `%APPDATA%\polyphase\config.toml`

use crate::audio::Waveform;
use crate::error::{Error, Result};
use crate::timing::DEFAULT_TICKS_PER_SECOND;
use crate::voice::{Adsr, VoiceSettings};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Transport and scheduler timing
    pub transport: TransportSettings,
    /// Pitch derivation
    pub tone: ToneSettings,
    /// Voice shaping
    pub voice: VoiceConfig,
    /// Audio output
    pub audio: AudioSettings,
}

impl EngineConfig {
    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Err(Error::Config(format!("Config file not found at {:?}", path)))
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return default if not found
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(Error::Config(_)) => Self::default(),
            Err(e) => {
                log::warn!("Ignoring unreadable config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the default config file location
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "polyphase") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(Error::Config("Could not determine config directory".to_string()))
        }
    }

    /// Create a default config file with comments
    pub fn create_default_config_file() -> Result<PathBuf> {
        let path = Self::config_path()?;
        Self::write_default_config(&path)?;
        Ok(path)
    }

    /// Write the commented default config to a specific file
    pub fn write_default_config(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let t = &self.transport;
        if t.ticks_per_second == 0 {
            return Err(Error::Config("ticks_per_second must be positive".to_string()));
        }
        if t.schedule_interval_ms == 0 || t.schedule_interval_ms >= t.lookahead_ms {
            return Err(Error::Config(format!(
                "schedule_interval_ms ({}) must be positive and smaller than lookahead_ms ({})",
                t.schedule_interval_ms, t.lookahead_ms
            )));
        }
        if !t.cycle_duration_seconds.is_finite() || t.cycle_duration_seconds <= 0.0 {
            return Err(Error::InvalidTempo(format!(
                "cycle_duration_seconds must be positive, got {}",
                t.cycle_duration_seconds
            )));
        }

        for hz in [self.tone.fundamental_hz, self.tone.max_frequency_hz] {
            if !hz.is_finite() || hz <= 0.0 {
                return Err(Error::InvalidFrequency(hz));
            }
        }

        self.voice.envelope.validate()?;
        if !(0.0..=1.0).contains(&self.voice.voice_gain) {
            return Err(Error::Config(format!(
                "voice_gain must be within 0..=1, got {}",
                self.voice.voice_gain
            )));
        }
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".to_string()));
        }
        Ok(())
    }

    /// Lookahead horizon in seconds
    pub fn lookahead_seconds(&self) -> f64 {
        self.transport.lookahead_ms as f64 / 1000.0
    }

    /// Voice settings for the voice manager
    pub fn voice_settings(&self) -> VoiceSettings {
        VoiceSettings {
            envelope: self.voice.envelope,
            gain: self.voice.voice_gain,
            waveform: self.voice.waveform,
            legato: self.voice.legato,
        }
    }
}

/// Transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Scheduler resolution
    pub ticks_per_second: u32,
    /// Poll interval of the scheduling loop
    pub schedule_interval_ms: u64,
    /// How far ahead of the audio clock events are scheduled
    pub lookahead_ms: u64,
    /// Length of one cycle at tempo multiplier 1
    pub cycle_duration_seconds: f64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            schedule_interval_ms: 30,
            lookahead_ms: 150,
            cycle_duration_seconds: 2.0,
        }
    }
}

/// Tone settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneSettings {
    /// Frequency of the longest space
    pub fundamental_hz: f64,
    /// Notes above this are silent
    pub max_frequency_hz: f64,
}

impl Default for ToneSettings {
    fn default() -> Self {
        Self {
            fundamental_hz: 110.0,
            // five octaves above the fundamental
            max_frequency_hz: 110.0 * 32.0,
        }
    }
}

/// Voice settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Linear gain of each voice
    pub voice_gain: f32,
    /// Start in legato mode
    pub legato: bool,
    pub waveform: Waveform,
    pub envelope: Adsr,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        let settings = VoiceSettings::default();
        Self {
            voice_gain: settings.gain,
            legato: settings.legato,
            waveform: settings.waveform,
            envelope: settings.envelope,
        }
    }
}

/// Audio settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Sample rate for offline rendering
    pub sample_rate: u32,
    /// Output gain
    pub master_gain: f32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            master_gain: 0.8,
        }
    }
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# polyphase configuration file

[transport]
# Scheduler resolution (ticks per second at tempo multiplier 1)
ticks_per_second = 960

# How often the scheduler wakes up, must be smaller than lookahead_ms
schedule_interval_ms = 30

# How far ahead of the audio clock notes are scheduled
lookahead_ms = 150

# Length of one cycle in seconds
cycle_duration_seconds = 2.0

[tone]
# Frequency of the longest space in Hz
fundamental_hz = 110.0

# Notes above this frequency are silent
max_frequency_hz = 3520.0

[voice]
# Linear gain per voice (0-1)
voice_gain = 0.2

# Hold each layer's note until the next one instead of using the envelope
legato = false

# "sine", "triangle", "square" or "sawtooth"
waveform = "sine"

[voice.envelope]
attack = 0.01
decay = 0.1
sustain = 0.7
release = 0.1

[audio]
# Sample rate used by `polyphase render`
sample_rate = 48000

# Output gain (0-1)
master_gain = 0.8
"#;
