//! Configuration module for controller tuning.
//!
//! Every threshold the classifier and sampler use is a configurable default
//! here. This module handles loading, saving, and validating those settings.

use crate::capability::{DeviceClass, PlatformFamily, ResourceTier};
use crate::error::ConfigError;
use crate::frame_sampler::{DEFAULT_HISTORY_CAPACITY, DEFAULT_MIN_ELAPSED_MS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Controller and classifier tuning.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct QualitySettings {
    /// Period of the evaluation loop.
    pub evaluation_interval_ms: u64,
    /// Number of per-interval FPS samples averaged.
    pub history_capacity: usize,
    /// Floor applied to the elapsed time of a tick.
    pub min_elapsed_ms: f64,
    /// FPS below which a sample counts toward emergency.
    pub emergency_fps_floor: u32,
    /// Consecutive sub-floor samples needed to enter emergency.
    pub emergency_sample_count: usize,
    /// Fractions of the target FPS separating Low/Medium/High/Ultra.
    pub low_fraction: f64,
    pub medium_fraction: f64,
    pub high_fraction: f64,
    pub ultra_fraction: f64,
    /// Dead band, as a fraction of the target FPS, a reading must clear
    /// beyond a boundary before the level moves.
    pub hysteresis_margin: f64,
    pub desktop_target_fps: u32,
    /// Target for high-tier mobile (tablet-class) devices.
    pub tablet_target_fps: u32,
    pub mobile_target_fps: u32,
    /// Whether the daemon starts the evaluation loop on launch.
    pub enabled: bool,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            evaluation_interval_ms: 1000,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            min_elapsed_ms: DEFAULT_MIN_ELAPSED_MS,
            emergency_fps_floor: 20,
            emergency_sample_count: 3,
            low_fraction: 0.4,
            medium_fraction: 0.6,
            high_fraction: 0.9,
            ultra_fraction: 1.0,
            hysteresis_margin: 0.05,
            desktop_target_fps: 60,
            tablet_target_fps: 45,
            mobile_target_fps: 30,
            enabled: true,
        }
    }
}

impl QualitySettings {
    /// Service target FPS for a device class.
    pub fn target_fps(&self, device_class: DeviceClass) -> u32 {
        match (device_class.family(), device_class.tier()) {
            (PlatformFamily::Desktop, _) => self.desktop_target_fps,
            (PlatformFamily::Mobile, ResourceTier::High) => self.tablet_target_fps,
            (PlatformFamily::Mobile, _) => self.mobile_target_fps,
        }
    }

    /// Validate configuration values.
    /// Returns Ok(()) if valid, Err with descriptive message if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.evaluation_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "evaluation_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.history_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "history_capacity must be greater than 0".to_string(),
            ));
        }

        if !(self.min_elapsed_ms >= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "min_elapsed_ms ({}) must be at least 1ms",
                self.min_elapsed_ms
            )));
        }

        if self.emergency_sample_count == 0 || self.emergency_sample_count > self.history_capacity {
            return Err(ConfigError::ValidationError(format!(
                "emergency_sample_count ({}) must be between 1 and history_capacity ({})",
                self.emergency_sample_count, self.history_capacity
            )));
        }

        let fractions = [
            self.low_fraction,
            self.medium_fraction,
            self.high_fraction,
            self.ultra_fraction,
        ];
        if fractions.iter().any(|f| !(*f > 0.0 && *f <= 1.5)) {
            return Err(ConfigError::ValidationError(format!(
                "tier fractions {:?} must lie in (0, 1.5]",
                fractions
            )));
        }
        if fractions.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ConfigError::ValidationError(format!(
                "tier fractions {:?} must be strictly increasing",
                fractions
            )));
        }

        if !(self.hysteresis_margin >= 0.0 && self.hysteresis_margin < 0.5) {
            return Err(ConfigError::ValidationError(format!(
                "hysteresis_margin ({}) must be in [0, 0.5)",
                self.hysteresis_margin
            )));
        }

        if self.desktop_target_fps == 0 || self.tablet_target_fps == 0 || self.mobile_target_fps == 0
        {
            return Err(ConfigError::ValidationError(
                "target FPS values must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Settings manager with file I/O.
pub struct SettingsManager {
    settings: RwLock<QualitySettings>,
    path: PathBuf,
}

impl SettingsManager {
    /// Load settings from file or use defaults.
    /// If the file doesn't exist, returns a manager with default settings.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        let settings = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|e| {
                ConfigError::ParseError(format!("Failed to read config file: {}", e))
            })?;

            let settings: QualitySettings = serde_json::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(format!("Invalid JSON: {}", e)))?;

            settings.validate()?;
            settings
        } else {
            QualitySettings::default()
        };

        Ok(Self {
            settings: RwLock::new(settings),
            path: path.to_path_buf(),
        })
    }

    /// Load settings that must already exist on disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        Self::load_or_default(path)
    }

    /// Save settings to file using atomic write.
    pub fn save(&self) -> Result<(), ConfigError> {
        let settings = self.get();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to a temp file, then rename over the target.
        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&settings)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {}", e)))?;

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Get current settings.
    pub fn get(&self) -> QualitySettings {
        self.settings
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|_| QualitySettings::default())
    }

    /// Update settings with validation, then persist.
    pub fn update(&self, settings: QualitySettings) -> Result<(), ConfigError> {
        settings.validate()?;

        {
            let mut current = self.settings.write().map_err(|_| {
                ConfigError::ValidationError("Failed to acquire write lock".to_string())
            })?;
            *current = settings;
        }

        self.save()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Default config path (e.g. ~/.config/adaptive-quality/config.json).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("adaptive-quality")
            .join("config.json")
    }
}
