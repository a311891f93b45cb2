//! Session configuration.
//!
//! Values come from a `settings.json` file layered over built in defaults.  The file is only
//! ever read here; a missing or broken file means the defaults are used.
//!
//! [`SessionConfig`] is what the session is built from.  Every integer in it must be positive,
//! anything else is rejected before the interval state machine ever sees it.
use json::JsonValue;
use log::{info, warn};
use regex::Regex;
use std::{error::Error, fmt};

pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, PartialEq)]
pub enum ConfigError {
    /// the key is in neither the settings file nor the defaults
    Missing(String),
    /// integers must be > 0
    NotPositive { key: String, value: i64 },
    /// pan, gain and friends outside of their range
    OutOfRange { key: String, value: f64 },
    BadFilename(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => {
                write!(f, "Required configuration value '{}' is missing", key)
            }
            ConfigError::NotPositive { key, value } => {
                write!(f, "Configuration value '{}' must be positive, got {}", key, value)
            }
            ConfigError::OutOfRange { key, value } => {
                write!(f, "Configuration value '{}' is out of range: {}", key, value)
            }
            ConfigError::BadFilename(name) => write!(
                f,
                "Invalid filename '{}' - must contain only letters, numbers, underscore, dash, dot and end in .json",
                name
            ),
        }
    }
}

impl Error for ConfigError {}

/// read only view of a json settings file with fallback defaults
pub struct SettingsFile {
    filename: String,
    settings: JsonValue,
    defaults: JsonValue,
}

impl SettingsFile {
    pub fn build(filename: &str, defaults: JsonValue) -> Result<SettingsFile, ConfigError> {
        let filename_regex = Regex::new(r"^[a-zA-Z0-9_\-\./]+\.json$")
            .map_err(|_| ConfigError::BadFilename(filename.to_string()))?;
        if !filename_regex.is_match(filename) {
            return Err(ConfigError::BadFilename(filename.to_string()));
        }
        let mut file = SettingsFile {
            filename: filename.to_string(),
            settings: json::object! {},
            defaults,
        };
        file.load();
        Ok(file)
    }

    /// settings straight from a string, mostly for tests
    pub fn from_string(raw: &str, defaults: JsonValue) -> SettingsFile {
        let mut file = SettingsFile {
            filename: String::from("<inline>"),
            settings: json::object! {},
            defaults,
        };
        file.parse(raw);
        file
    }

    fn load(&mut self) {
        match std::fs::read_to_string(&self.filename) {
            Ok(raw) => self.parse(&raw),
            Err(err) => warn!("Using default settings, can't read {}: {}", self.filename, err),
        }
    }

    fn parse(&mut self, raw: &str) {
        match json::parse(raw) {
            Ok(parsed) => {
                self.settings = parsed;
                info!("Loaded settings from {}: {}", self.filename, self.settings.dump());
            }
            Err(err) => warn!("Failed to parse settings {}: {}", self.filename, err),
        }
    }

    fn lookup(&self, key: &str) -> Option<&JsonValue> {
        if !self.settings[key].is_null() {
            return Some(&self.settings[key]);
        }
        if !self.defaults[key].is_null() {
            return Some(&self.defaults[key]);
        }
        None
    }

    pub fn get_str_value(&self, key: &str) -> Result<String, ConfigError> {
        self.lookup(key)
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or(ConfigError::Missing(key.to_string()))
    }

    pub fn get_bool_value(&self, key: &str) -> Result<bool, ConfigError> {
        self.lookup(key)
            .and_then(|v| v.as_bool())
            .ok_or(ConfigError::Missing(key.to_string()))
    }

    pub fn get_i64_value(&self, key: &str) -> Result<i64, ConfigError> {
        self.lookup(key)
            .and_then(|v| v.as_i64())
            .ok_or(ConfigError::Missing(key.to_string()))
    }

    pub fn get_f64_value(&self, key: &str) -> Result<f64, ConfigError> {
        self.lookup(key)
            .and_then(|v| v.as_f64())
            .ok_or(ConfigError::Missing(key.to_string()))
    }
}

/// defaults used when the settings file does not say otherwise
pub fn default_settings() -> JsonValue {
    json::object! {
        "sample_rate": 48000,
        "block_size": 128,
        "bpi": 16,
        "bpm": 120,
        "beats_per_accent": 4,
        "local_identity": "anonymous",
        "no_loopback": false,
        "metronome_gain": 1.0,
        "metronome_pan": 0.0,
        "metronome_mute": false,
    }
}

/// check an integer coming in from the outside world
pub fn positive(key: &str, value: i64) -> Result<u32, ConfigError> {
    if value <= 0 || value > u32::MAX as i64 {
        return Err(ConfigError::NotPositive {
            key: key.to_string(),
            value,
        });
    }
    Ok(value as u32)
}

/// Everything the session needs at start
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub sample_rate: u32,
    pub block_size: u32,
    pub bpi: u32,
    pub bpm: u32,
    pub beats_per_accent: u32,
    /// our own name on the server, used to spot our own `!vote` commands
    pub local_identity: String,
    /// start with the local input muted in the monitor mix
    pub no_loopback: bool,
    pub metronome_gain: f32,
    pub metronome_pan: f32,
    pub metronome_mute: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            sample_rate: 48_000,
            block_size: 128,
            bpi: 16,
            bpm: 120,
            beats_per_accent: 4,
            local_identity: String::from("anonymous"),
            no_loopback: false,
            metronome_gain: 1.0,
            metronome_pan: 0.0,
            metronome_mute: false,
        }
    }
}

impl SessionConfig {
    /// Build from raw (possibly negative) integers.  This is the boundary where bad values
    /// get turned away.
    pub fn from_values(
        sample_rate: i64,
        block_size: i64,
        bpi: i64,
        bpm: i64,
        beats_per_accent: i64,
    ) -> Result<SessionConfig, ConfigError> {
        let config = SessionConfig {
            sample_rate: positive("sample_rate", sample_rate)?,
            block_size: positive("block_size", block_size)?,
            bpi: positive("bpi", bpi)?,
            bpm: positive("bpm", bpm)?,
            beats_per_accent: positive("beats_per_accent", beats_per_accent)?,
            ..SessionConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_settings(settings: &SettingsFile) -> Result<SessionConfig, ConfigError> {
        let mut config = SessionConfig::from_values(
            settings.get_i64_value("sample_rate")?,
            settings.get_i64_value("block_size")?,
            settings.get_i64_value("bpi")?,
            settings.get_i64_value("bpm")?,
            settings.get_i64_value("beats_per_accent")?,
        )?;
        config.local_identity = settings.get_str_value("local_identity")?;
        config.no_loopback = settings.get_bool_value("no_loopback")?;
        config.metronome_gain = settings.get_f64_value("metronome_gain")? as f32;
        config.metronome_pan = settings.get_f64_value("metronome_pan")? as f32;
        config.metronome_mute = settings.get_bool_value("metronome_mute")?;
        config.validate()?;
        info!("session config: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("sample_rate", self.sample_rate as i64)?;
        positive("block_size", self.block_size as i64)?;
        positive("bpi", self.bpi as i64)?;
        positive("bpm", self.bpm as i64)?;
        positive("beats_per_accent", self.beats_per_accent as i64)?;
        if !(0.0..=4.0).contains(&self.metronome_gain) {
            return Err(ConfigError::OutOfRange {
                key: String::from("metronome_gain"),
                value: self.metronome_gain as f64,
            });
        }
        if !(-1.0..=1.0).contains(&self.metronome_pan) {
            return Err(ConfigError::OutOfRange {
                key: String::from("metronome_pan"),
                value: self.metronome_pan as f64,
            });
        }
        Ok(())
    }

    /// length of one interval at the configured tempo, in frames
    pub fn frames_per_interval(&self) -> usize {
        let per_beat = (60 * self.sample_rate as u64 / self.bpm.max(1) as u64).max(1);
        (per_beat * self.bpi as u64) as usize
    }
}
