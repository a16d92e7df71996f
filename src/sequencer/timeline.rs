// Timeline - Fires timestamped events from a background dispatch thread
// Events with equal timestamps fire in submission order

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;
use tracing::{debug, error, trace};

/// Something that happens at a point in time
///
/// `handle` runs on the timeline's dispatch thread. It receives the timeline
/// so it can schedule follow-up events, and the instant it actually fired.
pub trait TimelineEvent: Send {
    fn handle(&self, timeline: &Timeline, when: Instant);
}

impl<F> TimelineEvent for F
where
    F: Fn(&Timeline, Instant) + Send,
{
    fn handle(&self, timeline: &Timeline, when: Instant) {
        self(timeline, when)
    }
}

struct ScheduledEvent {
    at: Instant,
    /// Submission order, breaks ties between equal `at`
    seq: u64,
    event: Box<dyn TimelineEvent>,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    // BinaryHeap is a max-heap: the earliest (at, seq) must compare greatest
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct TimelineState {
    queue: BinaryHeap<ScheduledEvent>,
    next_seq: u64,
    running: bool,
    /// Bumped on every start so a stale dispatcher exits
    generation: u64,
}

#[derive(Default)]
struct Shared {
    state: Mutex<TimelineState>,
    wakeup: Condvar,
    worker: Mutex<Option<(ThreadId, JoinHandle<()>)>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TimelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Event scheduler with a single dispatch thread
///
/// Cloning yields another handle to the same timeline. There is no way to
/// cancel a single event: once scheduled it fires unless the timeline is
/// reset or stopped.
#[derive(Clone, Default)]
pub struct Timeline {
    shared: Arc<Shared>,
}

impl Timeline {
    /// Create a timeline; events queue up until `start` is called
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the dispatch thread. No-op when already running.
    pub fn start(&self) {
        let mut worker = self
            .shared
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let generation = {
            let mut state = self.shared.lock();
            if state.running {
                return;
            }
            state.running = true;
            state.generation += 1;
            state.generation
        };

        let timeline = self.clone();
        let handle = thread::Builder::new()
            .name("melokit-timeline".to_string())
            .spawn(move || timeline.dispatch(generation));

        match handle {
            Ok(handle) => {
                *worker = Some((handle.thread().id(), handle));
                debug!("timeline started");
            }
            Err(e) => {
                self.shared.lock().running = false;
                error!("failed to spawn timeline thread: {}", e);
            }
        }
    }

    /// Stop dispatching and drop every pending event
    pub fn stop(&self) {
        {
            let mut state = self.shared.lock();
            state.running = false;
            state.queue.clear();
        }
        self.shared.wakeup.notify_all();

        let worker = self
            .shared
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((id, handle)) = worker {
            // an event handler stopping its own timeline cannot join itself
            if id != thread::current().id() {
                let _ = handle.join();
            }
            debug!("timeline stopped");
        }
    }

    /// Drop every pending event, keep the dispatch thread alive
    pub fn reset(&self) {
        let dropped = {
            let mut state = self.shared.lock();
            let dropped = state.queue.len();
            state.queue.clear();
            dropped
        };
        self.shared.wakeup.notify_all();
        debug!(dropped, "timeline reset");
    }

    /// Enqueue `event` to fire at or after `at`. Never blocks on dispatch.
    pub fn schedule(&self, event: Box<dyn TimelineEvent>, at: Instant) {
        {
            let mut state = self.shared.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(ScheduledEvent { at, seq, event });
        }
        self.shared.wakeup.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Number of events waiting to fire
    pub fn pending(&self) -> usize {
        self.shared.lock().queue.len()
    }

    fn dispatch(&self, generation: u64) {
        let mut state = self.shared.lock();
        loop {
            if !state.running || state.generation != generation {
                break;
            }

            let now = Instant::now();
            let next_at = state.queue.peek().map(|e| e.at);
            match next_at {
                None => {
                    state = self
                        .shared
                        .wakeup
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(at) if at <= now => {
                    let Some(due) = state.queue.pop() else {
                        continue;
                    };
                    // handlers may schedule more events, so fire unlocked
                    drop(state);
                    trace!(seq = due.seq, "timeline event fired");
                    due.event.handle(self, Instant::now());
                    state = self.shared.lock();
                }
                Some(at) => {
                    state = self
                        .shared
                        .wakeup
                        .wait_timeout(state, at - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
}
