// Loop - A sequenceable replayed bar after bar while running
// Content can be swapped while the loop plays; the swap lands on the next span

use crate::sequencer::note::{Sequence, Sequenceable};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;
use uuid::Uuid;

/// Unique identifier for loops
pub type LoopId = Uuid;

pub struct Loop {
    id: LoopId,
    target: RwLock<Arc<dyn Sequenceable>>,
    running: AtomicBool,
    /// Bar-aligned instant the current run began
    anchor: Mutex<Option<Instant>>,
    /// Spans rendered since the loop was created
    spans: AtomicU64,
    /// Bumped on every transition
    run: AtomicU64,
}

impl Loop {
    pub fn new(target: Arc<dyn Sequenceable>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            target: RwLock::new(target),
            running: AtomicBool::new(false),
            anchor: Mutex::new(None),
            spans: AtomicU64::new(0),
            run: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> LoopId {
        self.id
    }

    pub fn target(&self) -> Arc<dyn Sequenceable> {
        self.target
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace what the loop plays, picked up at the next span
    pub fn set_target(&self, target: Arc<dyn Sequenceable>) {
        *self.target.write().unwrap_or_else(PoisonError::into_inner) = target;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Instant of the first bar of the current run, once planned
    pub fn anchor(&self) -> Option<Instant> {
        *self.anchor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn spans_played(&self) -> u64 {
        self.spans.load(Ordering::Relaxed)
    }

    /// Current run number; spans planned under an earlier run are stale
    pub fn run(&self) -> u64 {
        self.run.load(Ordering::Acquire)
    }

    /// True while running and still on run `run`
    pub(crate) fn is_current(&self, run: u64) -> bool {
        self.is_running() && self.run() == run
    }

    /// Stopped -> Running. Returns false when already running.
    pub(crate) fn begin(&self) -> bool {
        let started = !self.running.swap(true, Ordering::AcqRel);
        if started {
            self.run.fetch_add(1, Ordering::AcqRel);
            *self.anchor.lock().unwrap_or_else(PoisonError::into_inner) = None;
        }
        started
    }

    /// Running -> Stopped. Returns false when already stopped.
    pub(crate) fn end(&self) -> bool {
        let ended = self.running.swap(false, Ordering::AcqRel);
        if ended {
            self.run.fetch_add(1, Ordering::AcqRel);
        }
        ended
    }

    pub(crate) fn span_planned(&self, start: Instant) {
        let mut anchor = self.anchor.lock().unwrap_or_else(PoisonError::into_inner);
        anchor.get_or_insert(start);
        self.spans.fetch_add(1, Ordering::Relaxed);
    }
}

impl Sequenceable for Loop {
    fn to_sequence(&self) -> Sequence {
        self.target().to_sequence()
    }

    fn as_loop(self: Arc<Self>) -> Option<Arc<Loop>> {
        Some(self)
    }
}
