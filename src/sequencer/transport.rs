// Transport - Beat/bar clock and loop planner
// Loops are re-planned one span ahead on a dedicated timeline

use crate::config::EngineConfig;
use crate::core::{AudioDevice, LoopController, SettingHandler};
use crate::sequencer::loops::{Loop, LoopId};
use crate::sequencer::note::Sequenceable;
use crate::sequencer::timeline::{Timeline, TimelineEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Beat/bar position as a linear function of wall time
///
/// Every tempo or meter change re-anchors the clock at the current position,
/// so only the rate of future progress changes.
#[derive(Debug, Clone, Copy)]
struct Clock {
    bpm: f64,
    biab: u32,
    running: bool,
    anchor: Instant,
    anchor_beats: f64,
    anchor_bars: f64,
}

impl Clock {
    fn new(bpm: f64, biab: u32) -> Self {
        Self {
            bpm,
            biab,
            running: false,
            anchor: Instant::now(),
            anchor_beats: 0.0,
            anchor_bars: 0.0,
        }
    }

    fn beat_secs(&self) -> f64 {
        60.0 / self.bpm
    }

    fn bar_duration(&self) -> Duration {
        Duration::from_secs_f64(self.beat_secs() * f64::from(self.biab))
    }

    /// (beats, bars) at `at`, fractional
    fn position(&self, at: Instant) -> (f64, f64) {
        let elapsed = if at >= self.anchor {
            (at - self.anchor).as_secs_f64()
        } else {
            -(self.anchor - at).as_secs_f64()
        };
        let beats = elapsed / self.beat_secs();
        (
            self.anchor_beats + beats,
            self.anchor_bars + beats / f64::from(self.biab),
        )
    }

    fn rebase(&mut self, now: Instant) {
        let (beats, bars) = self.position(now);
        self.anchor = now;
        self.anchor_beats = beats;
        self.anchor_bars = bars;
    }

    fn restart(&mut self, now: Instant) {
        self.anchor = now;
        self.anchor_beats = 0.0;
        self.anchor_bars = 0.0;
    }

    /// Instant at which bar number `bar` begins
    fn bar_instant(&self, bar: f64) -> Instant {
        let secs = (bar - self.anchor_bars) * f64::from(self.biab) * self.beat_secs();
        if secs >= 0.0 {
            self.anchor + Duration::from_secs_f64(secs)
        } else {
            self.anchor
                .checked_sub(Duration::from_secs_f64(-secs))
                .unwrap_or(self.anchor)
        }
    }
}

struct Inner {
    device: Arc<dyn AudioDevice>,
    clock: RwLock<Clock>,
    loops: Mutex<HashMap<LoopId, Arc<Loop>>>,
    timeline: Timeline,
    notifier: RwLock<Option<SettingHandler>>,
    lookahead: Duration,
    initial: (f64, u32),
}

/// Loop controller driving playback through an `AudioDevice`
///
/// Cloning gives another handle to the same transport.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    pub fn new(device: Arc<dyn AudioDevice>, config: &EngineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                device,
                clock: RwLock::new(Clock::new(config.bpm, config.biab)),
                loops: Mutex::new(HashMap::new()),
                timeline: Timeline::new(),
                notifier: RwLock::new(None),
                lookahead: Duration::from_millis(config.loop_lookahead_ms),
                initial: (config.bpm, config.biab),
            }),
        }
    }

    fn clock(&self) -> Clock {
        *self.inner.clock.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.clock().running
    }

    /// Length of one bar at the current tempo and meter
    pub fn bar_duration(&self) -> Duration {
        self.clock().bar_duration()
    }

    pub fn active_loops(&self) -> Vec<Arc<Loop>> {
        self.inner
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// End every running loop
    pub fn end_all_loops(&self) {
        let loops: Vec<Arc<Loop>> = self
            .inner
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, l)| l)
            .collect();
        for l in &loops {
            l.end();
        }
        if !loops.is_empty() {
            debug!(count = loops.len(), "all loops ended");
        }
    }

    /// Instant of the bar boundary `bars` bars after the next one
    pub fn next_bar_start(&self, bars: i64) -> Instant {
        let clock = self.clock();
        let (_, now_bars) = clock.position(Instant::now());
        clock.bar_instant(now_bars.floor() + 1.0 + bars.max(0) as f64)
    }

    fn schedule_span(&self, target: Arc<dyn Sequenceable>, start: Instant, run: Option<u64>) {
        let fire_at = start.checked_sub(self.inner.lookahead).unwrap_or(start);
        let event = PlanEvent {
            transport: self.clone(),
            target,
            start,
            run,
        };
        self.inner.timeline.schedule(Box::new(event), fire_at);
    }

    fn notify_settings(&self) {
        let handler = self
            .inner
            .notifier
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            let transport = self.clone();
            let spawned = thread::Builder::new()
                .name("melokit-settings".to_string())
                .spawn(move || {
                    let controller: &dyn LoopController = &transport;
                    handler(controller);
                });
            if let Err(e) = spawned {
                error!("failed to spawn settings notifier: {}", e);
            }
        }
    }
}

impl LoopController for Transport {
    /// Start the clock at beat zero. No-op when running.
    fn start(&self) {
        {
            let mut clock = self.inner.clock.write().unwrap_or_else(PoisonError::into_inner);
            if clock.running {
                return;
            }
            clock.running = true;
            clock.restart(Instant::now());
        }
        self.inner.timeline.start();
        debug!("transport started");
    }

    /// End all loops, drop planned spans and stop the clock
    fn stop(&self) {
        self.end_all_loops();
        self.inner.timeline.stop();
        self.inner
            .clock
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .running = false;
        debug!("transport stopped");
    }

    /// End all loops and restore the initial tempo and meter
    fn reset(&self) {
        self.end_all_loops();
        self.inner.timeline.reset();
        {
            let mut clock = self.inner.clock.write().unwrap_or_else(PoisonError::into_inner);
            let (bpm, biab) = self.inner.initial;
            clock.bpm = bpm;
            clock.biab = biab;
            clock.restart(Instant::now());
        }
        debug!("transport reset");
    }

    fn set_bpm(&self, bpm: f64) {
        if !(bpm > 0.0 && bpm.is_finite()) {
            warn!(bpm, "ignoring non-positive BPM");
            return;
        }
        {
            let mut clock = self.inner.clock.write().unwrap_or_else(PoisonError::into_inner);
            clock.rebase(Instant::now());
            clock.bpm = bpm;
        }
        debug!(bpm, "BPM changed");
        self.notify_settings();
    }

    fn bpm(&self) -> f64 {
        self.clock().bpm
    }

    fn set_biab(&self, biab: u32) {
        if biab == 0 {
            warn!("ignoring zero beats in a bar");
            return;
        }
        {
            let mut clock = self.inner.clock.write().unwrap_or_else(PoisonError::into_inner);
            clock.rebase(Instant::now());
            clock.biab = biab;
        }
        debug!(biab, "BIAB changed");
        self.notify_settings();
    }

    fn biab(&self) -> u32 {
        self.clock().biab
    }

    fn start_loop(&self, l: &Arc<Loop>) {
        if !l.begin() {
            return;
        }
        self.inner
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(l.id(), Arc::clone(l));
        debug!(id = %l.id(), "loop started");
        self.plan(0, Arc::clone(l) as Arc<dyn Sequenceable>);
    }

    fn end_loop(&self, l: &Arc<Loop>) {
        if !l.end() {
            return;
        }
        self.inner
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&l.id());
        debug!(id = %l.id(), "loop ended");
    }

    fn beats_and_bars(&self) -> (i64, i64) {
        let clock = self.clock();
        if !clock.running {
            return (0, 0);
        }
        let (beats, bars) = clock.position(Instant::now());
        (beats.floor() as i64, bars.floor() as i64)
    }

    fn plan(&self, bars: i64, seq: Arc<dyn Sequenceable>) {
        // planning needs a running clock to align on
        self.start();
        let start = self.next_bar_start(bars);
        let run = Arc::clone(&seq).as_loop().map(|l| l.run());
        self.schedule_span(seq, start, run);
    }

    fn setting_notifier(&self, handler: SettingHandler) {
        *self
            .inner
            .notifier
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }
}

/// Renders one span of a planned sequence and, for loops, plans the next one
struct PlanEvent {
    transport: Transport,
    target: Arc<dyn Sequenceable>,
    start: Instant,
    /// Loop run this span belongs to
    run: Option<u64>,
}

impl TimelineEvent for PlanEvent {
    fn handle(&self, _timeline: &Timeline, _when: Instant) {
        let as_loop = Arc::clone(&self.target).as_loop();
        if let Some(l) = &as_loop {
            // ended, or ended and restarted since this span was planned
            if !self.run.is_some_and(|run| l.is_current(run)) {
                return;
            }
        }

        // resolved now, so a replaced loop body is picked up on this span
        let seq = self.target.to_sequence();
        let clock = self.transport.clock();
        let device = Arc::clone(&self.transport.inner.device);
        let start = self.start;
        let beats = seq.beats();

        let spawned = thread::Builder::new()
            .name("melokit-span".to_string())
            .spawn(move || {
                device.play(&seq, clock.bpm, start);
            });
        if let Err(e) = spawned {
            error!("failed to spawn span player: {}", e);
        }

        if let Some(l) = as_loop {
            l.span_planned(start);
            let bars = (beats / f64::from(clock.biab)).ceil().max(1.0);
            let next = start + clock.bar_duration().mul_f64(bars);
            self.transport.schedule_span(l, next, self.run);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::Notification;
    use crate::midi::DeviceError;
    use crate::core::NoteListener;
    use crate::sequencer::note::Note;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingDevice {
        plays: Mutex<Vec<Instant>>,
    }

    impl AudioDevice for CountingDevice {
        fn command(&self, _args: &[&str]) -> Option<Notification> {
            None
        }

        fn play(&self, _seq: &dyn Sequenceable, _bpm: f64, begin_at: Instant) -> Instant {
            self.plays.lock().unwrap().push(begin_at);
            begin_at
        }

        fn schedule(&self, _event: Box<dyn TimelineEvent>, _begin_at: Instant) {}

        fn reset(&self) {}

        fn close(&self) -> Result<(), DeviceError> {
            Ok(())
        }

        fn has_input_capability(&self) -> bool {
            false
        }

        fn listen(&self, _device_id: usize, _who: Arc<dyn NoteListener>, _start: bool) {}
    }

    fn transport(device: Arc<CountingDevice>) -> Transport {
        let config = EngineConfig {
            bpm: 600.0,
            biab: 1,
            loop_lookahead_ms: 20,
            ..EngineConfig::default()
        };
        Transport::new(device, &config)
    }

    #[test]
    fn test_non_positive_bpm_ignored() {
        let t = transport(Arc::default());
        t.set_bpm(90.0);
        t.set_bpm(0.0);
        t.set_bpm(-10.0);
        t.set_bpm(f64::NAN);
        assert_eq!(t.bpm(), 90.0);
        t.set_biab(0);
        assert_eq!(t.biab(), 1);
    }

    #[test]
    fn test_beats_and_bars_advance() {
        let t = transport(Arc::default());
        assert_eq!(t.beats_and_bars(), (0, 0));
        t.start();
        t.set_biab(2);
        thread::sleep(Duration::from_millis(450));
        // 100ms per beat
        let (beats, bars) = t.beats_and_bars();
        assert!((4..=5).contains(&beats), "beats = {}", beats);
        assert_eq!(bars, beats / 2);
        t.stop();
        assert_eq!(t.beats_and_bars(), (0, 0));
    }

    #[test]
    fn test_tempo_change_keeps_position() {
        let t = transport(Arc::default());
        t.start();
        thread::sleep(Duration::from_millis(250));
        let (before, _) = t.beats_and_bars();
        t.set_bpm(60.0);
        let (after, _) = t.beats_and_bars();
        assert_eq!(before, after);
        t.stop();
    }

    #[test]
    fn test_setting_notifier_called() {
        let t = transport(Arc::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        t.setting_notifier(Arc::new(move |c: &dyn LoopController| {
            assert_eq!(c.bpm(), 100.0);
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        t.set_bpm(100.0);
        t.set_bpm(-1.0);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_plan_starts_on_bar_boundary() {
        let device = Arc::new(CountingDevice::default());
        let t = transport(Arc::clone(&device));
        t.start();
        let expected = t.next_bar_start(1);
        t.plan(1, Arc::new(Note::new(60, 0.25)));

        thread::sleep(Duration::from_millis(300));
        assert_eq!(*device.plays.lock().unwrap(), vec![expected]);
        t.stop();
    }

    #[test]
    fn test_loop_replans_until_ended() {
        let device = Arc::new(CountingDevice::default());
        let t = transport(Arc::clone(&device));
        let l = Loop::new(Arc::new(Note::new(60, 0.25)));

        t.start_loop(&l);
        t.start_loop(&l);
        assert_eq!(t.active_loops().len(), 1);
        thread::sleep(Duration::from_millis(450));
        t.end_loop(&l);
        let spans = device.plays.lock().unwrap().len();
        assert!(spans >= 3, "spans = {}", spans);

        thread::sleep(Duration::from_millis(300));
        assert!(device.plays.lock().unwrap().len() <= spans + 1);
        assert!(t.active_loops().is_empty());

        let plays = device.plays.lock().unwrap().clone();
        for pair in plays.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_millis(100));
        }
        t.stop();
    }

    #[test]
    fn test_restarted_loop_keeps_one_chain() {
        let device = Arc::new(CountingDevice::default());
        let t = transport(Arc::clone(&device));
        let l = Loop::new(Arc::new(Note::new(60, 0.25)));

        t.start_loop(&l);
        thread::sleep(Duration::from_millis(250));
        t.end_loop(&l);
        t.start_loop(&l);
        let before = device.plays.lock().unwrap().len();
        thread::sleep(Duration::from_millis(500));
        t.end_loop(&l);

        let plays = device.plays.lock().unwrap().clone();
        let after_restart = &plays[before..];
        assert!(after_restart.len() <= 6, "spans = {}", after_restart.len());
        for pair in after_restart.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_millis(100));
        }
        t.stop();
    }
}
