//! Frame sampler: counts rendered frames and turns them into FPS readings.
//!
//! Render loops call [`FrameSampler::record_frame`] once per frame; the
//! controller calls [`FrameSampler::tick`] on a fixed cadence to convert the
//! pending count into an instantaneous FPS and a moving average.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of per-interval FPS samples kept for smoothing.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Smallest elapsed interval a tick will divide by, in milliseconds.
pub const DEFAULT_MIN_ELAPSED_MS: f64 = 16.0;

/// Bounded FIFO of per-interval FPS samples.
#[derive(Debug, Clone)]
pub struct FpsHistory {
    samples: VecDeque<u32>,
    capacity: usize,
}

impl FpsHistory {
    /// Create a history with the default capacity (10 samples).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Create a history with a specific capacity (at least 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a new sample, evicting the oldest if at capacity.
    pub fn push(&mut self, fps: u32) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(fps);
    }

    /// Rounded arithmetic mean of the samples, 0 when empty.
    pub fn average(&self) -> u32 {
        if self.samples.is_empty() {
            return 0;
        }
        let sum: u64 = self.samples.iter().map(|&s| u64::from(s)).sum();
        (sum as f64 / self.samples.len() as f64).round() as u32
    }

    /// The most recent `n` samples, oldest first. Shorter if fewer exist.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = u32> + '_ {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for FpsHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// FPS values produced by one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpsReading {
    pub instant_fps: u32,
    pub average_fps: u32,
}

/// Counts frames between ticks and smooths the resulting FPS.
#[derive(Debug, Clone)]
pub struct FrameSampler {
    frames_since_tick: u32,
    last_tick_ms: f64,
    min_elapsed_ms: f64,
    active: bool,
    reading: FpsReading,
    history: FpsHistory,
}

impl FrameSampler {
    /// Create an inactive sampler with the default history and elapsed floor.
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_HISTORY_CAPACITY, DEFAULT_MIN_ELAPSED_MS)
    }

    pub fn with_settings(history_capacity: usize, min_elapsed_ms: f64) -> Self {
        Self {
            frames_since_tick: 0,
            last_tick_ms: 0.0,
            min_elapsed_ms: if min_elapsed_ms >= 1.0 {
                min_elapsed_ms
            } else {
                DEFAULT_MIN_ELAPSED_MS
            },
            active: false,
            reading: FpsReading::default(),
            history: FpsHistory::with_capacity(history_capacity),
        }
    }

    /// Begin counting. The next tick measures from `now_ms`.
    ///
    /// The pending counter is reset; history is kept.
    pub fn start(&mut self, now_ms: f64) {
        self.frames_since_tick = 0;
        self.last_tick_ms = now_ms;
        self.active = true;
    }

    /// Stop counting. History survives a stop/start cycle.
    pub fn stop(&mut self) {
        self.active = false;
        self.frames_since_tick = 0;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Count one rendered frame. No-op while stopped.
    pub fn record_frame(&mut self) {
        if self.active {
            self.frames_since_tick = self.frames_since_tick.saturating_add(1);
        }
    }

    /// Count several frames at once (batched reporting). No-op while stopped.
    pub fn record_frames(&mut self, count: u32) {
        if self.active {
            self.frames_since_tick = self.frames_since_tick.saturating_add(count);
        }
    }

    /// Close the current interval and return the new readings.
    ///
    /// Elapsed time below 1ms (including zero, negative, or NaN from a clock
    /// anomaly) is clamped to the configured floor before dividing.
    pub fn tick(&mut self, now_ms: f64) -> FpsReading {
        let raw_elapsed = now_ms - self.last_tick_ms;
        let elapsed = if raw_elapsed >= 1.0 {
            raw_elapsed
        } else {
            self.min_elapsed_ms
        };

        let instant_fps = (f64::from(self.frames_since_tick) * 1000.0 / elapsed).round() as u32;

        self.history.push(instant_fps);
        self.frames_since_tick = 0;
        if now_ms.is_finite() {
            self.last_tick_ms = now_ms;
        }

        self.reading = FpsReading {
            instant_fps,
            average_fps: self.history.average(),
        };
        self.reading
    }

    /// Readings from the most recent tick.
    pub fn reading(&self) -> FpsReading {
        self.reading
    }

    pub fn history(&self) -> &FpsHistory {
        &self.history
    }

    pub fn pending_frames(&self) -> u32 {
        self.frames_since_tick
    }
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new()
    }
}
