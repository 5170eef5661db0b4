//! Quality classifier: the state machine choosing the quality level.
//!
//! Rules are evaluated in strict priority order, first match wins:
//! 1. no graphics support or reduced motion requested → `Accessible`
//! 2. manual override set → the override
//! 3. the last N samples all below the emergency floor → `Emergency`
//! 4. average FPS against fractions of the device's target FPS
//!
//! Rule 4 is damped by hysteresis: degrading requires the average to clear a
//! boundary by `hysteresis_margin × target`, while upgrading happens as soon
//! as the rules select a higher tier. Noise inside the dead band holds the
//! current level.

use crate::capability::{CapabilitySnapshot, DeviceClass, ResourceTier};
use crate::config::QualitySettings;
use crate::frame_sampler::FpsHistory;
use crate::quality_table::QualityLevel;
use serde::{Deserialize, Serialize};

/// Everything one classification looks at.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierInput<'a> {
    pub average_fps: u32,
    pub device_class: DeviceClass,
    pub prefers_reduced_motion: bool,
    pub graphics_supported: bool,
    pub history: &'a FpsHistory,
}

/// Which rule produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationReason {
    Accessibility,
    ManualOverride,
    Emergency,
    FrameRate,
}

/// Result of one classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub level: QualityLevel,
    /// Whether `level` differs from the level before this classification.
    pub changed: bool,
    pub reason: ClassificationReason,
}

/// Level a device class is assumed to sustain before any FPS data exists.
pub fn baseline_level(device_class: DeviceClass) -> QualityLevel {
    match device_class.tier() {
        ResourceTier::High => QualityLevel::Ultra,
        ResourceTier::Medium => QualityLevel::High,
        ResourceTier::Low => QualityLevel::Medium,
    }
}

/// Level a freshly constructed controller starts at.
pub fn initial_level(capability: &CapabilitySnapshot, prefers_reduced_motion: bool) -> QualityLevel {
    if !capability.graphics_supported || prefers_reduced_motion {
        return QualityLevel::Accessible;
    }
    baseline_level(capability.device_class)
}

/// Hysteresis state machine over [`QualityLevel`].
#[derive(Debug, Clone)]
pub struct QualityClassifier {
    settings: QualitySettings,
    current: QualityLevel,
    /// Whether `current` may anchor hysteresis. Cleared after a forced level
    /// (accessibility, override) so the next frame-rate decision is taken
    /// fresh.
    anchored: bool,
    is_emergency: bool,
    manual_override: Option<QualityLevel>,
}

impl QualityClassifier {
    pub fn new(settings: QualitySettings, initial: QualityLevel) -> Self {
        Self {
            settings,
            current: initial,
            anchored: initial.rank().is_some(),
            is_emergency: false,
            manual_override: None,
        }
    }

    pub fn level(&self) -> QualityLevel {
        self.current
    }

    pub fn is_emergency(&self) -> bool {
        self.is_emergency
    }

    pub fn manual_override(&self) -> Option<QualityLevel> {
        self.manual_override
    }

    pub fn settings(&self) -> &QualitySettings {
        &self.settings
    }

    /// Set or clear the manual override. Takes effect on the next
    /// [`classify`](Self::classify).
    pub fn set_manual_override(&mut self, level: Option<QualityLevel>) {
        if self.manual_override.is_some() && level.is_none() {
            self.anchored = false;
        }
        self.manual_override = level;
    }

    /// Run the rules against `input` and update the current level.
    pub fn classify(&mut self, input: &ClassifierInput<'_>) -> Classification {
        let previous = self.current;

        let (level, reason) = if !input.graphics_supported || input.prefers_reduced_motion {
            self.is_emergency = false;
            self.anchored = false;
            (QualityLevel::Accessible, ClassificationReason::Accessibility)
        } else if let Some(level) = self.manual_override {
            self.is_emergency = false;
            self.anchored = false;
            (level, ClassificationReason::ManualOverride)
        } else if self.sustained_collapse(input.history) {
            self.is_emergency = true;
            self.anchored = true;
            (QualityLevel::Emergency, ClassificationReason::Emergency)
        } else if input.history.is_empty() {
            // Nothing sampled yet: an average of 0 means "unknown", not "slow".
            self.is_emergency = false;
            self.anchored = true;
            (baseline_level(input.device_class), ClassificationReason::FrameRate)
        } else {
            self.is_emergency = false;
            let level = self.frame_rate_level(input.average_fps, input.device_class);
            self.anchored = true;
            (level, ClassificationReason::FrameRate)
        };

        self.current = level;
        Classification {
            level,
            changed: level != previous,
            reason,
        }
    }

    /// True when the newest `emergency_sample_count` samples are all below
    /// the floor. Fewer samples than that never count.
    fn sustained_collapse(&self, history: &FpsHistory) -> bool {
        let needed = self.settings.emergency_sample_count;
        let floor = self.settings.emergency_fps_floor;
        needed > 0
            && history.len() >= needed
            && history.recent(needed).all(|fps| fps < floor)
    }

    fn frame_rate_level(&self, average_fps: u32, device_class: DeviceClass) -> QualityLevel {
        let target = f64::from(self.settings.target_fps(device_class));
        let fps = f64::from(average_fps);
        let selected = self.tier_for(fps, target, device_class);

        let current_rank = match (self.anchored, self.current.rank()) {
            (true, Some(rank)) => rank,
            _ => return selected,
        };

        if rank(selected) >= current_rank {
            return selected;
        }

        // Degrade only as far as the reading still points after giving it
        // the benefit of the margin.
        let margin = self.settings.hysteresis_margin * target;
        let confirmed = self.tier_for(fps + margin, target, device_class);
        if rank(confirmed) < current_rank {
            confirmed
        } else {
            self.current
        }
    }

    fn tier_for(&self, fps: f64, target: f64, device_class: DeviceClass) -> QualityLevel {
        let s = &self.settings;
        if fps < s.low_fraction * target {
            QualityLevel::Low
        } else if fps < s.medium_fraction * target {
            QualityLevel::Medium
        } else if fps < s.high_fraction * target {
            QualityLevel::High
        } else if fps >= s.ultra_fraction * target && device_class.tier() == ResourceTier::High {
            QualityLevel::Ultra
        } else {
            QualityLevel::High
        }
    }
}

fn rank(level: QualityLevel) -> u8 {
    level.rank().unwrap_or(0)
}
