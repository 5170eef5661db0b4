//! Quality levels and the static level → configuration table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A discrete rendering-quality tier.
///
/// `Emergency < Low < Medium < High < Ultra` form the FPS-driven order.
/// `Accessible` sits outside that order: it is forced by the environment,
/// never earned, so it has no rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Emergency,
    Low,
    Medium,
    High,
    Ultra,
    Accessible,
}

impl QualityLevel {
    /// Every level, in table order.
    pub const ALL: [QualityLevel; 6] = [
        QualityLevel::Emergency,
        QualityLevel::Low,
        QualityLevel::Medium,
        QualityLevel::High,
        QualityLevel::Ultra,
        QualityLevel::Accessible,
    ];

    /// The FPS-driven levels from cheapest to most expensive.
    pub const RANKED: [QualityLevel; 5] = [
        QualityLevel::Emergency,
        QualityLevel::Low,
        QualityLevel::Medium,
        QualityLevel::High,
        QualityLevel::Ultra,
    ];

    /// Position in the FPS-driven order, `None` for `Accessible`.
    pub fn rank(self) -> Option<u8> {
        match self {
            QualityLevel::Emergency => Some(0),
            QualityLevel::Low => Some(1),
            QualityLevel::Medium => Some(2),
            QualityLevel::High => Some(3),
            QualityLevel::Ultra => Some(4),
            QualityLevel::Accessible => None,
        }
    }

    /// Stable lowercase name, as used in config files and IPC.
    pub fn as_str(self) -> &'static str {
        match self {
            QualityLevel::Emergency => "emergency",
            QualityLevel::Low => "low",
            QualityLevel::Medium => "medium",
            QualityLevel::High => "high",
            QualityLevel::Ultra => "ultra",
            QualityLevel::Accessible => "accessible",
        }
    }

    /// Configuration bundle for this level.
    pub fn config(self) -> &'static QualityConfig {
        config_for(self)
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "emergency" => Ok(QualityLevel::Emergency),
            "low" => Ok(QualityLevel::Low),
            "medium" => Ok(QualityLevel::Medium),
            "high" => Ok(QualityLevel::High),
            "ultra" => Ok(QualityLevel::Ultra),
            "accessible" => Ok(QualityLevel::Accessible),
            _ => Err(format!(
                "Invalid quality level '{}', expected one of: emergency, low, medium, high, ultra, accessible",
                s
            )),
        }
    }
}

/// Concrete rendering budget handed to scene consumers.
///
/// Advisory only: consumers feed these into their own draw calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Fraction of native resolution to render at.
    pub render_scale: f32,
    pub shadows: bool,
    /// Shadow map edge length in texels, 0 when shadows are off.
    pub shadow_map_size: u32,
    pub reflections: bool,
    pub particles: bool,
    pub max_particles: u32,
    pub max_lights: u32,
    pub antialias: bool,
    pub post_processing: bool,
    /// Whether ambient scene motion (camera drift, idle animation) should run.
    pub animate_scene: bool,
}

const ULTRA: QualityConfig = QualityConfig {
    render_scale: 1.0,
    shadows: true,
    shadow_map_size: 4096,
    reflections: true,
    particles: true,
    max_particles: 10_000,
    max_lights: 8,
    antialias: true,
    post_processing: true,
    animate_scene: true,
};

const HIGH: QualityConfig = QualityConfig {
    render_scale: 1.0,
    shadows: true,
    shadow_map_size: 2048,
    reflections: true,
    particles: true,
    max_particles: 5_000,
    max_lights: 6,
    antialias: true,
    post_processing: true,
    animate_scene: true,
};

const MEDIUM: QualityConfig = QualityConfig {
    render_scale: 0.85,
    shadows: true,
    shadow_map_size: 1024,
    reflections: false,
    particles: true,
    max_particles: 2_000,
    max_lights: 4,
    antialias: true,
    post_processing: false,
    animate_scene: true,
};

const LOW: QualityConfig = QualityConfig {
    render_scale: 0.7,
    shadows: false,
    shadow_map_size: 0,
    reflections: false,
    particles: true,
    max_particles: 500,
    max_lights: 2,
    antialias: false,
    post_processing: false,
    animate_scene: true,
};

const EMERGENCY: QualityConfig = QualityConfig {
    render_scale: 0.5,
    shadows: false,
    shadow_map_size: 0,
    reflections: false,
    particles: false,
    max_particles: 0,
    max_lights: 1,
    antialias: false,
    post_processing: false,
    animate_scene: true,
};

// Predictable and motion-safe rather than strictly cheapest.
const ACCESSIBLE: QualityConfig = QualityConfig {
    render_scale: 0.75,
    shadows: false,
    shadow_map_size: 0,
    reflections: false,
    particles: false,
    max_particles: 0,
    max_lights: 2,
    antialias: true,
    post_processing: false,
    animate_scene: false,
};

/// Look up the configuration bundle for a level.
///
/// Exhaustive over `QualityLevel`, so a missing entry is a compile error.
pub fn config_for(level: QualityLevel) -> &'static QualityConfig {
    match level {
        QualityLevel::Ultra => &ULTRA,
        QualityLevel::High => &HIGH,
        QualityLevel::Medium => &MEDIUM,
        QualityLevel::Low => &LOW,
        QualityLevel::Emergency => &EMERGENCY,
        QualityLevel::Accessible => &ACCESSIBLE,
    }
}
