//! Host-supplied inputs: the time source and the reduced-motion preference.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// Millisecond time source used to timestamp evaluation ticks.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> f64;
}

/// Monotonic clock measured from construction.
///
/// Reads tokio's clock, so it follows paused or advanced time inside a
/// runtime and falls back to the system clock outside one.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Deterministic clock advanced by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(start_ms.to_bits())),
        }
    }

    pub fn set(&self, now_ms: f64) {
        self.bits.store(now_ms.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: f64) {
        self.set(self.now_ms() + delta_ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// The accessibility "prefers reduced motion" signal.
///
/// Sampled on every classification, so implementations should answer with
/// the live value rather than a cached one.
pub trait MotionPreference: Send + Sync {
    fn prefers_reduced_motion(&self) -> bool;
}

/// A preference that never asks for reduced motion.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMotionPreference;

impl MotionPreference for NoMotionPreference {
    fn prefers_reduced_motion(&self) -> bool {
        false
    }
}

/// Shared toggle the host flips when the OS setting changes.
#[derive(Debug, Clone, Default)]
pub struct ReducedMotionFlag {
    enabled: Arc<AtomicBool>,
}

impl ReducedMotionFlag {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn set(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn get(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

impl MotionPreference for ReducedMotionFlag {
    fn prefers_reduced_motion(&self) -> bool {
        self.get()
    }
}

impl<F> MotionPreference for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn prefers_reduced_motion(&self) -> bool {
        self()
    }
}
