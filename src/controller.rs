//! Quality controller: owns the sampler and classifier and runs the
//! evaluation loop.
//!
//! One controller serves any number of render surfaces. Frames recorded by
//! every surface accumulate into the same counter, so the chosen level
//! reflects aggregate load. Surfaces that need independent budgets should use
//! separate controllers.
//!
//! Listeners are notified only when the effective level changes, one change
//! at a time and in the order the changes happened. They run outside the
//! controller's lock, so they may call back into the controller. A change made
//! while another thread (or a listener) is already delivering is queued and
//! handed out by that delivery once its current round finishes.

use crate::capability::{CapabilityProbe, CapabilitySnapshot};
use crate::classifier::{initial_level, ClassifierInput, QualityClassifier};
use crate::config::QualitySettings;
use crate::environment::{Clock, MonotonicClock, MotionPreference, NoMotionPreference};
use crate::frame_sampler::{FpsReading, FrameSampler};
use crate::metrics::{MetricsSnapshot, QualityMetrics};
use crate::quality_table::{config_for, QualityConfig, QualityLevel};
use crate::subscribers::{SubscriberList, Subscription};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Point-in-time view of the controller for polling consumers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityState {
    pub level: QualityLevel,
    pub config: QualityConfig,
    pub fps: FpsReading,
    pub is_emergency: bool,
}

impl QualityState {
    fn new(level: QualityLevel, fps: FpsReading, is_emergency: bool) -> Self {
        Self {
            level,
            config: *config_for(level),
            fps,
            is_emergency,
        }
    }
}

struct ControllerState {
    capability: CapabilitySnapshot,
    sampler: FrameSampler,
    classifier: QualityClassifier,
    running: bool,
    /// Bumped on every start/stop so timer ticks from an older run are
    /// discarded.
    generation: u64,
    destroyed: bool,
    /// Timer task of the current run, replaced only under this lock.
    timer: Option<JoinHandle<()>>,
    /// Changes not yet handed to listeners, oldest first.
    pending: VecDeque<QualityState>,
    /// Set while some thread is draining `pending`.
    delivering: bool,
}

impl ControllerState {
    fn snapshot(&self) -> QualityState {
        QualityState::new(
            self.classifier.level(),
            self.sampler.reading(),
            self.classifier.is_emergency(),
        )
    }

    fn cancel_timer(&mut self) {
        if let Some(task) = self.timer.take() {
            task.abort();
        }
    }
}

enum Trigger {
    /// Close a sampling interval, then classify.
    Tick { now_ms: f64, generation: Option<u64> },
    /// Classify the existing readings again without sampling.
    Reclassify,
}

struct Shared {
    state: Mutex<ControllerState>,
    subscribers: Arc<SubscriberList>,
    clock: Arc<dyn Clock>,
    motion: Arc<dyn MotionPreference>,
    watch_tx: watch::Sender<QualityState>,
    metrics: QualityMetrics,
    interval_ms: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Returns the new state, or `None` when the trigger was discarded.
    fn evaluate(&self, trigger: Trigger) -> Option<QualityState> {
        // Sampled before locking: the preference may be a host callback.
        let prefers_reduced_motion = self.motion.prefers_reduced_motion();

        let mut guard = lock(&self.state);
        let state = &mut *guard;
        if state.destroyed {
            return None;
        }

        let reading = match trigger {
            Trigger::Tick { now_ms, generation } => {
                if !state.running || generation.is_some_and(|g| g != state.generation) {
                    return None;
                }
                let reading = state.sampler.tick(now_ms);
                self.metrics.record_evaluation();
                debug!(
                    instant_fps = reading.instant_fps,
                    average_fps = reading.average_fps,
                    "Frame sample"
                );
                reading
            }
            Trigger::Reclassify => state.sampler.reading(),
        };

        let previous = state.classifier.level();
        let classification = state.classifier.classify(&ClassifierInput {
            average_fps: reading.average_fps,
            device_class: state.capability.device_class,
            prefers_reduced_motion,
            graphics_supported: state.capability.graphics_supported,
            history: state.sampler.history(),
        });
        let snapshot = state.snapshot();

        // Published under the lock: the watch channel, metrics and the
        // delivery queue all see changes in evaluation order.
        self.watch_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });

        if classification.changed {
            self.metrics
                .record_transition(previous, classification.level, self.clock.now_ms());
            info!(
                from = %previous,
                to = %classification.level,
                average_fps = reading.average_fps,
                reason = ?classification.reason,
                "Quality level changed"
            );
            state.pending.push_back(snapshot);
        }

        let deliver = !state.delivering && !state.pending.is_empty();
        if deliver {
            state.delivering = true;
        }
        drop(guard);

        if deliver {
            self.deliver_pending();
        }

        Some(snapshot)
    }

    /// Hand queued changes to listeners until none are left.
    ///
    /// Only one thread drains at a time. Listeners run with the state lock
    /// released; anything they change is queued behind the current change.
    fn deliver_pending(&self) {
        loop {
            let next = {
                let mut state = lock(&self.state);
                match state.pending.pop_front() {
                    Some(next) => next,
                    None => {
                        state.delivering = false;
                        return;
                    }
                }
            };
            self.subscribers.notify(next.level, &next.config);
        }
    }
}

/// Builder for [`QualityController`].
pub struct ControllerBuilder {
    settings: QualitySettings,
    clock: Arc<dyn Clock>,
    motion: Arc<dyn MotionPreference>,
}

impl ControllerBuilder {
    /// Time source for evaluation ticks. Defaults to [`MonotonicClock`].
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Reduced-motion signal. Defaults to [`NoMotionPreference`].
    pub fn motion_preference(mut self, motion: impl MotionPreference + 'static) -> Self {
        self.motion = Arc::new(motion);
        self
    }

    /// Probe capabilities once and construct the controller.
    ///
    /// Never fails: invalid settings fall back to defaults and a panicking
    /// probe is treated as an environment without graphics support.
    pub fn build(self, probe: &dyn CapabilityProbe) -> QualityController {
        let settings = match self.settings.validate() {
            Ok(()) => self.settings,
            Err(e) => {
                warn!(error = %e, "Invalid controller settings, using defaults");
                QualitySettings::default()
            }
        };

        let capability = match catch_unwind(AssertUnwindSafe(|| probe.probe())) {
            Ok(snapshot) => snapshot,
            Err(_) => {
                error!("Capability probe panicked, assuming no graphics support");
                CapabilitySnapshot::unsupported()
            }
        };

        let initial = initial_level(&capability, self.motion.prefers_reduced_motion());
        info!(
            device_class = ?capability.device_class,
            graphics_supported = capability.graphics_supported,
            memory_gb = capability.estimated_memory_gb,
            cores = capability.logical_cores,
            level = %initial,
            "Quality controller created"
        );

        let sampler = FrameSampler::with_settings(settings.history_capacity, settings.min_elapsed_ms);
        let initial_state = QualityState::new(initial, sampler.reading(), false);
        let (watch_tx, _) = watch::channel(initial_state);

        let shared = Shared {
            state: Mutex::new(ControllerState {
                capability,
                sampler,
                classifier: QualityClassifier::new(settings.clone(), initial),
                running: false,
                generation: 0,
                destroyed: false,
                timer: None,
                pending: VecDeque::new(),
                delivering: false,
            }),
            subscribers: Arc::new(SubscriberList::new()),
            metrics: QualityMetrics::new(initial, self.clock.now_ms()),
            clock: self.clock,
            motion: self.motion,
            watch_tx,
            interval_ms: settings.evaluation_interval_ms,
        };

        QualityController {
            shared: Arc::new(shared),
        }
    }
}

/// Adaptive quality controller.
pub struct QualityController {
    shared: Arc<Shared>,
}

impl QualityController {
    pub fn builder(settings: QualitySettings) -> ControllerBuilder {
        ControllerBuilder {
            settings,
            clock: Arc::new(MonotonicClock::new()),
            motion: Arc::new(NoMotionPreference),
        }
    }

    /// Controller with default settings, clock, and motion preference.
    pub fn new(probe: &dyn CapabilityProbe) -> Self {
        Self::builder(QualitySettings::default()).build(probe)
    }

    /// Start sampling with the configured evaluation interval.
    pub fn start(&self) {
        self.start_with_interval(self.shared.interval_ms);
    }

    /// Start sampling, evaluating every `interval_ms`. Idempotent.
    ///
    /// Inside a tokio runtime a timer task drives evaluation. Without one,
    /// the host must call [`tick`](Self::tick) itself.
    pub fn start_with_interval(&self, interval_ms: u64) {
        let interval_ms = if interval_ms == 0 {
            warn!("Evaluation interval of 0ms requested, using configured interval");
            self.shared.interval_ms
        } else {
            interval_ms
        };

        {
            let mut state = lock(&self.shared.state);
            if state.destroyed {
                warn!("start() called after shutdown, ignoring");
                return;
            }
            if state.running {
                debug!("Controller already running");
                return;
            }
            state.sampler.start(self.shared.clock.now_ms());
            state.running = true;
            state.generation += 1;

            // Spawned and stored under the lock: a racing stop() or start()
            // sees either no timer or this one, never a stale handle.
            let task = self.spawn_timer(state.generation, interval_ms);
            if let Some(previous) = std::mem::replace(&mut state.timer, task) {
                previous.abort();
            }
        }

        info!(interval_ms, "Quality evaluation started");
    }

    /// Spawn the evaluation task, or `None` outside a tokio runtime.
    fn spawn_timer(&self, generation: u64, interval_ms: u64) -> Option<JoinHandle<()>> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No tokio runtime available, host must drive tick()");
                return None;
            }
        };

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let task = handle.spawn(async move {
            let period = Duration::from_millis(interval_ms);
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let now_ms = shared.clock.now_ms();
                let trigger = Trigger::Tick {
                    now_ms,
                    generation: Some(generation),
                };
                if shared.evaluate(trigger).is_none() {
                    break;
                }
            }
        });

        Some(task)
    }

    /// Stop sampling. History is kept for the next start.
    pub fn stop(&self) {
        let mut state = lock(&self.shared.state);
        if state.destroyed {
            warn!("stop() called after shutdown, ignoring");
            return;
        }
        state.cancel_timer();
        state.generation += 1;
        if state.running {
            state.running = false;
            state.sampler.stop();
            info!("Quality evaluation stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.state).running
    }

    /// Count one rendered frame.
    pub fn record_frame(&self) {
        lock(&self.shared.state).sampler.record_frame();
    }

    /// Count a batch of rendered frames.
    pub fn record_frames(&self, count: u32) {
        lock(&self.shared.state).sampler.record_frames(count);
    }

    /// Close the current interval at the controller clock's time.
    pub fn tick(&self) -> QualityState {
        self.tick_at(self.shared.clock.now_ms())
    }

    /// Close the current interval at `now_ms` and reclassify.
    ///
    /// A no-op returning the current state while stopped.
    pub fn tick_at(&self, now_ms: f64) -> QualityState {
        let trigger = Trigger::Tick {
            now_ms,
            generation: None,
        };
        self.shared
            .evaluate(trigger)
            .unwrap_or_else(|| self.state())
    }

    /// Classify the current readings again without closing an interval.
    ///
    /// Hosts call this after an environment signal (such as reduced motion)
    /// changes, to apply it before the next tick.
    pub fn reevaluate(&self) -> QualityState {
        self.shared
            .evaluate(Trigger::Reclassify)
            .unwrap_or_else(|| self.state())
    }

    /// Register a listener for level changes.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(QualityLevel, &QualityConfig) + Send + Sync + 'static,
    {
        let subscription = self.shared.subscribers.subscribe(listener);
        if lock(&self.shared.state).destroyed {
            warn!("subscribe() called after shutdown, listener will never be called");
            subscription.unsubscribe();
        }
        subscription
    }

    /// Set or clear the manual override and reclassify immediately.
    ///
    /// Listeners hear about it once if the effective level changes.
    /// Reduced motion and missing graphics support still win.
    pub fn set_manual_override(&self, level: Option<QualityLevel>) {
        {
            let mut state = lock(&self.shared.state);
            if state.destroyed {
                warn!("set_manual_override() called after shutdown, ignoring");
                return;
            }
            state.classifier.set_manual_override(level);
        }

        match level {
            Some(level) => info!(level = %level, "Manual override set"),
            None => info!("Manual override cleared"),
        }
        self.shared.evaluate(Trigger::Reclassify);
    }

    pub fn manual_override(&self) -> Option<QualityLevel> {
        lock(&self.shared.state).classifier.manual_override()
    }

    pub fn state(&self) -> QualityState {
        lock(&self.shared.state).snapshot()
    }

    /// Receiver that sees every new state.
    pub fn watch(&self) -> watch::Receiver<QualityState> {
        self.shared.watch_tx.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot(self.shared.clock.now_ms())
    }

    pub fn capability(&self) -> CapabilitySnapshot {
        lock(&self.shared.state).capability
    }

    /// Tear the controller down: stop evaluation and drop every listener.
    ///
    /// Later calls on the controller are logged no-ops.
    pub fn shutdown(&self) {
        {
            let mut state = lock(&self.shared.state);
            if state.destroyed {
                warn!("shutdown() called twice, ignoring");
                return;
            }
            state.cancel_timer();
            state.pending.clear();
            state.generation += 1;
            state.running = false;
            state.sampler.stop();
            state.destroyed = true;
        }

        self.shared.subscribers.clear();
        info!("Quality controller shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.shared.state).destroyed
    }
}

impl Drop for QualityController {
    fn drop(&mut self) {
        lock(&self.shared.state).cancel_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{DeviceClass, StaticProbe};
    use crate::environment::{ManualClock, ReducedMotionFlag};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Condvar};
    use std::thread;

    fn snapshot(device_class: DeviceClass) -> CapabilitySnapshot {
        CapabilitySnapshot {
            graphics_supported: true,
            device_class,
            max_texture_size: 16384,
            estimated_memory_gb: 16.0,
            logical_cores: 8,
        }
    }

    fn desktop_high(clock: &ManualClock) -> QualityController {
        QualityController::builder(QualitySettings::default())
            .clock(clock.clone())
            .build(&StaticProbe(snapshot(DeviceClass::DesktopHigh)))
    }

    fn counting(controller: &QualityController) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let sub = controller.subscribe(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    /// Feed `frames` then tick one second later.
    fn second_of(controller: &QualityController, clock: &ManualClock, frames: u32) -> QualityState {
        controller.record_frames(frames);
        clock.advance(1000.0);
        controller.tick()
    }

    struct PanickingProbe;

    impl CapabilityProbe for PanickingProbe {
        fn probe(&self) -> CapabilitySnapshot {
            panic!("driver exploded")
        }
    }

    #[test]
    fn test_end_to_end_desktop_high() {
        let clock = ManualClock::new(0.0);
        let controller = desktop_high(&clock);
        assert_eq!(controller.state().level, QualityLevel::Ultra);

        let levels = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&levels);
        let _sub = controller.subscribe(move |level, _| sink.lock().unwrap().push(level));

        controller.start();
        for _ in 0..58 {
            controller.record_frame();
        }
        clock.set(1000.0);
        let state = controller.tick();
        assert_eq!(state.fps.instant_fps, 58);
        assert_eq!(state.fps.average_fps, 58);
        assert_eq!(state.level, QualityLevel::Ultra);
        assert!(levels.lock().unwrap().is_empty());

        // Ten 20-frame seconds push the 58 out of the 10-sample history.
        let mut state = state;
        for _ in 0..10 {
            state = second_of(&controller, &clock, 20);
        }
        assert_eq!(state.fps.average_fps, 20);
        assert_eq!(state.level, QualityLevel::Low);
        assert_eq!(state.config, *config_for(QualityLevel::Low));
        assert!(!state.is_emergency);
        assert_eq!(levels.lock().unwrap().last(), Some(&QualityLevel::Low));

        let metrics = controller.metrics();
        assert_eq!(metrics.evaluations, 11);
        assert_eq!(metrics.upgrades, 0);
        assert!(metrics.degradations >= 1);
    }

    #[test]
    fn test_sustained_collapse_enters_emergency() {
        let clock = ManualClock::new(0.0);
        let controller = desktop_high(&clock);
        controller.start();

        second_of(&controller, &clock, 60);
        second_of(&controller, &clock, 5);
        let state = second_of(&controller, &clock, 5);
        assert_ne!(state.level, QualityLevel::Emergency);

        let state = second_of(&controller, &clock, 5);
        assert_eq!(state.level, QualityLevel::Emergency);
        assert!(state.is_emergency);
        assert_eq!(controller.metrics().emergency_entries, 1);
    }

    #[test]
    fn test_accessibility_beats_ultra_override() {
        let clock = ManualClock::new(0.0);
        let motion = ReducedMotionFlag::new(true);
        let controller = QualityController::builder(QualitySettings::default())
            .clock(clock.clone())
            .motion_preference(motion.clone())
            .build(&StaticProbe(snapshot(DeviceClass::DesktopHigh)));
        assert_eq!(controller.state().level, QualityLevel::Accessible);

        controller.start();
        controller.set_manual_override(Some(QualityLevel::Ultra));
        for _ in 0..3 {
            second_of(&controller, &clock, 60);
        }
        assert_eq!(controller.state().level, QualityLevel::Accessible);

        // Turning the preference off hands control back to the override.
        motion.set(false);
        assert_eq!(controller.reevaluate().level, QualityLevel::Ultra);
    }

    #[test]
    fn test_reduced_motion_applies_on_next_tick() {
        let clock = ManualClock::new(0.0);
        let motion = ReducedMotionFlag::new(false);
        let controller = QualityController::builder(QualitySettings::default())
            .clock(clock.clone())
            .motion_preference(motion.clone())
            .build(&StaticProbe(snapshot(DeviceClass::DesktopHigh)));
        controller.start();
        second_of(&controller, &clock, 60);

        motion.set(true);
        assert_eq!(second_of(&controller, &clock, 60).level, QualityLevel::Accessible);
        motion.set(false);
        assert_eq!(second_of(&controller, &clock, 60).level, QualityLevel::Ultra);
    }

    #[test]
    fn test_manual_override_bypass_then_clear() {
        let clock = ManualClock::new(0.0);
        let controller = desktop_high(&clock);
        let (count, _sub) = counting(&controller);
        controller.start();
        for _ in 0..3 {
            second_of(&controller, &clock, 60);
        }
        assert_eq!(controller.state().level, QualityLevel::Ultra);

        controller.set_manual_override(Some(QualityLevel::Low));
        assert_eq!(controller.state().level, QualityLevel::Low);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        for _ in 0..3 {
            assert_eq!(second_of(&controller, &clock, 60).level, QualityLevel::Low);
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(controller.manual_override(), Some(QualityLevel::Low));

        controller.set_manual_override(None);
        assert_eq!(controller.state().level, QualityLevel::Ultra);
        assert_eq!(second_of(&controller, &clock, 60).level, QualityLevel::Ultra);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_override_before_any_sample() {
        let clock = ManualClock::new(0.0);
        let controller = desktop_high(&clock);
        controller.set_manual_override(Some(QualityLevel::Medium));
        assert_eq!(controller.state().level, QualityLevel::Medium);

        // No readings yet: clearing returns to the device baseline.
        controller.set_manual_override(None);
        assert_eq!(controller.state().level, QualityLevel::Ultra);
    }

    #[test]
    fn test_same_level_twice_notifies_once() {
        let clock = ManualClock::new(0.0);
        let controller = desktop_high(&clock);
        let (a, _sa) = counting(&controller);
        let (b, _sb) = counting(&controller);

        controller.set_manual_override(Some(QualityLevel::Low));
        controller.set_manual_override(Some(QualityLevel::Low));
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_mid_notification() {
        let clock = ManualClock::new(0.0);
        let controller = desktop_high(&clock);
        let (first, _s1) = counting(&controller);

        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_in = Arc::clone(&slot);
        let sub = controller.subscribe(move |_, _| {
            if let Some(sub) = slot_in.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);
        let (third, _s3) = counting(&controller);

        controller.set_manual_override(Some(QualityLevel::Medium));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(third.load(Ordering::SeqCst), 1);

        controller.set_manual_override(Some(QualityLevel::Low));
        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(third.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listener_may_read_state() {
        let clock = ManualClock::new(0.0);
        let controller = Arc::new(desktop_high(&clock));
        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        let weak = Arc::downgrade(&controller);
        let _sub = controller.subscribe(move |_, _| {
            if let Some(controller) = weak.upgrade() {
                *sink.lock().unwrap() = Some(controller.state().level);
            }
        });

        controller.set_manual_override(Some(QualityLevel::High));
        assert_eq!(*observed.lock().unwrap(), Some(QualityLevel::High));
    }

    #[test]
    fn test_change_during_delivery_is_heard_after_it() {
        let clock = ManualClock::new(0.0);
        let controller = Arc::new(desktop_high(&clock));
        let heard = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let (entered_tx, entered_rx) = mpsc::channel();
        let entered_tx = Mutex::new(entered_tx);

        let sink = Arc::clone(&heard);
        let listener_gate = Arc::clone(&gate);
        let _sub = controller.subscribe(move |level, _| {
            if level == QualityLevel::Low {
                entered_tx.lock().unwrap().send(()).unwrap();
                let (open, cvar) = &*listener_gate;
                let mut open = open.lock().unwrap();
                while !*open {
                    open = cvar.wait(open).unwrap();
                }
            }
            sink.lock().unwrap().push(level);
        });

        let worker = Arc::clone(&controller);
        let slow = thread::spawn(move || worker.set_manual_override(Some(QualityLevel::Low)));
        entered_rx.recv().unwrap();

        // Low is still being delivered; High must queue behind it.
        controller.set_manual_override(Some(QualityLevel::High));
        assert_eq!(controller.state().level, QualityLevel::High);
        assert!(heard.lock().unwrap().is_empty());

        {
            let (open, cvar) = &*gate;
            *open.lock().unwrap() = true;
            cvar.notify_all();
        }
        slow.join().unwrap();

        assert_eq!(
            *heard.lock().unwrap(),
            vec![QualityLevel::Low, QualityLevel::High]
        );
        assert_eq!(controller.metrics().current_level, QualityLevel::High);
        assert_eq!(controller.watch().borrow().level, QualityLevel::High);
    }

    #[test]
    fn test_concurrent_override_and_tick_end_on_current_level() {
        let clock = ManualClock::new(0.0);
        let controller = Arc::new(desktop_high(&clock));
        controller.start();
        let last = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&last);
        let _sub = controller.subscribe(move |level, _| {
            *sink.lock().unwrap() = Some(level);
        });

        let levels = [
            QualityLevel::Low,
            QualityLevel::Medium,
            QualityLevel::High,
            QualityLevel::Ultra,
        ];
        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let controller = Arc::clone(&controller);
                thread::spawn(move || {
                    for round in 0..200 {
                        if (round + worker) % 3 == 0 {
                            controller.record_frames(25);
                            controller.tick();
                        } else {
                            controller.set_manual_override(Some(levels[(round + worker) % 4]));
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let current = controller.state().level;
        assert_eq!(*last.lock().unwrap(), Some(current));
        assert_eq!(controller.metrics().current_level, current);
        assert_eq!(controller.watch().borrow().level, current);
    }

    #[test]
    fn test_tick_twice_with_same_time() {
        let clock = ManualClock::new(0.0);
        let controller = desktop_high(&clock);
        controller.start();
        controller.record_frames(5);

        let first = controller.tick_at(1000.0);
        let second = controller.tick_at(1000.0);
        assert_eq!(first.fps.instant_fps, 5);
        assert_eq!(second.fps.instant_fps, 0);
        assert_eq!(second.fps.average_fps, 3);
    }

    #[test]
    fn test_tick_while_stopped_is_noop() {
        let clock = ManualClock::new(0.0);
        let controller = desktop_high(&clock);
        controller.record_frames(60);
        let state = controller.tick_at(1000.0);
        assert_eq!(state.fps, FpsReading::default());
        assert_eq!(controller.metrics().evaluations, 0);
    }

    #[test]
    fn test_stop_start_resets_counter_keeps_history() {
        let clock = ManualClock::new(0.0);
        let controller = desktop_high(&clock);
        controller.start();
        controller.start();
        second_of(&controller, &clock, 60);

        controller.stop();
        assert!(!controller.is_running());
        controller.record_frames(500);

        clock.advance(10_000.0);
        controller.start();
        let state = second_of(&controller, &clock, 30);
        assert_eq!(state.fps.instant_fps, 30);
        assert_eq!(state.fps.average_fps, 45);
    }

    #[test]
    fn test_missing_graphics_forces_accessible() {
        let clock = ManualClock::new(0.0);
        let controller = QualityController::builder(QualitySettings::default())
            .clock(clock.clone())
            .build(&StaticProbe(CapabilitySnapshot::unsupported()));
        controller.start();
        assert_eq!(second_of(&controller, &clock, 60).level, QualityLevel::Accessible);
    }

    #[test]
    fn test_panicking_probe_degrades_to_accessible() {
        let controller = QualityController::new(&PanickingProbe);
        assert_eq!(controller.capability(), CapabilitySnapshot::unsupported());
        assert_eq!(controller.state().level, QualityLevel::Accessible);
    }

    #[test]
    fn test_invalid_settings_fall_back_to_defaults() {
        let settings = QualitySettings {
            history_capacity: 0,
            ..QualitySettings::default()
        };
        let clock = ManualClock::new(0.0);
        let controller = QualityController::builder(settings)
            .clock(clock.clone())
            .build(&StaticProbe(snapshot(DeviceClass::DesktopHigh)));
        controller.start();
        let state = second_of(&controller, &clock, 60);
        assert_eq!(state.fps.average_fps, 60);
    }

    #[test]
    fn test_misuse_after_shutdown_is_harmless() {
        let clock = ManualClock::new(0.0);
        let controller = desktop_high(&clock);
        let (count, sub) = counting(&controller);
        controller.start();
        second_of(&controller, &clock, 60);

        controller.shutdown();
        assert!(controller.is_shut_down());
        assert!(!sub.is_active());

        let before = controller.state();
        controller.shutdown();
        controller.stop();
        controller.start();
        controller.record_frame();
        controller.set_manual_override(Some(QualityLevel::Low));
        let late = controller.subscribe(|_, _| panic!("must never be called"));
        assert!(!late.is_active());

        assert!(!controller.is_running());
        assert_eq!(second_of(&controller, &clock, 60), before);
        assert_eq!(controller.state(), before);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_watch_sees_level_changes() {
        let clock = ManualClock::new(0.0);
        let controller = desktop_high(&clock);
        let mut rx = controller.watch();
        assert_eq!(rx.borrow_and_update().level, QualityLevel::Ultra);

        controller.set_manual_override(Some(QualityLevel::Low));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().level, QualityLevel::Low);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_drives_evaluation() {
        let controller = QualityController::builder(QualitySettings::default())
            .build(&StaticProbe(snapshot(DeviceClass::DesktopHigh)));
        controller.start();
        controller.record_frames(60);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let state = controller.state();
        assert_eq!(state.fps.instant_fps, 60);
        assert_eq!(controller.metrics().evaluations, 1);

        controller.stop();
        controller.record_frames(60);
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(controller.metrics().evaluations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_discards_old_timer() {
        let controller = QualityController::builder(QualitySettings::default())
            .build(&StaticProbe(snapshot(DeviceClass::DesktopHigh)));
        controller.start_with_interval(1000);
        tokio::time::sleep(Duration::from_millis(500)).await;
        controller.stop();
        controller.start_with_interval(1000);

        // Only the new run's timer fires: once at 1500ms.
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(controller.metrics().evaluations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_restarts_leave_a_live_timer() {
        let controller = Arc::new(
            QualityController::builder(QualitySettings::default())
                .build(&StaticProbe(snapshot(DeviceClass::DesktopHigh))),
        );
        let runtime = tokio::runtime::Handle::current();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let controller = Arc::clone(&controller);
                let runtime = runtime.clone();
                thread::spawn(move || {
                    let _entered = runtime.enter();
                    for _ in 0..50 {
                        controller.start_with_interval(1000);
                        controller.stop();
                        controller.start_with_interval(1000);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        // Every worker ends on start(), so the controller runs and its
        // timer must still be alive.
        assert!(controller.is_running());
        controller.record_frames(60);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(controller.metrics().evaluations, 1);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(controller.metrics().evaluations, 2);
    }
}
