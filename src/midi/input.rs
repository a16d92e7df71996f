// Input device - reads a hardware input stream and dispatches notes to subscribers
//
// One read thread per device. Subscribers can be added and removed while it
// runs; each batch of events goes to the subscribers present when it was read.

use crate::core::NoteListener;
use crate::midi::driver::InputStream;
use crate::midi::event::MidiEvent;
use crate::sequencer::note::Note;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Note-on bookkeeping with a monotonically increasing change counter
///
/// `notes_on` maps a sounding pitch to the counter value at which it went
/// down, so a later check can tell whether the same key press is still held.
#[derive(Debug, Default)]
pub struct NoteTracker {
    count: u64,
    notes_on: HashMap<u8, u64>,
}

impl NoteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a press and return its counter value
    pub fn note_on(&mut self, pitch: u8) -> u64 {
        self.count += 1;
        self.notes_on.insert(pitch, self.count);
        self.count
    }

    pub fn note_off(&mut self, pitch: u8) {
        self.notes_on.remove(&pitch);
    }

    /// True while `pitch` is held from the press that got `count`
    pub fn is_on_count(&self, pitch: u8, count: u64) -> bool {
        self.notes_on.get(&pitch) == Some(&count)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Currently held pitches, ascending
    pub fn sounding(&self) -> Vec<u8> {
        let mut pitches: Vec<u8> = self.notes_on.keys().copied().collect();
        pitches.sort_unstable();
        pitches
    }
}

type Subscribers = Arc<Mutex<Vec<Arc<dyn NoteListener>>>>;
type SharedInput = Arc<Mutex<Option<Box<dyn InputStream>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct InputListener {
    device_id: usize,
    stream: SharedInput,
    subscribers: Subscribers,
    tracker: Arc<Mutex<NoteTracker>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    poll_interval: Duration,
}

impl InputListener {
    fn new(device_id: usize, stream: SharedInput, poll_interval: Duration) -> Self {
        Self {
            device_id,
            stream,
            subscribers: Arc::default(),
            tracker: Arc::default(),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            poll_interval,
        }
    }

    /// Spawn the read thread. No-op when already reading.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let device_id = self.device_id;
        let stream = Arc::clone(&self.stream);
        let subscribers = Arc::clone(&self.subscribers);
        let tracker = Arc::clone(&self.tracker);
        let running = Arc::clone(&self.running);
        let poll_interval = self.poll_interval;

        let spawned = thread::Builder::new()
            .name(format!("melokit-input-{}", device_id))
            .spawn(move || read_loop(device_id, stream, subscribers, tracker, running, poll_interval));

        match spawned {
            Ok(handle) => {
                *lock(&self.worker) = Some(handle);
                debug!(device_id, "input listener started");
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                error!("failed to spawn input thread: {}", e);
            }
        }
    }

    /// Stop reading and wait for the read thread. No-op when not reading.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = lock(&self.worker).take() {
            let _ = handle.join();
        }
        debug!(device_id = self.device_id, "input listener stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Subscribe; adding the same listener twice has no effect
    pub fn add(&self, who: Arc<dyn NoteListener>) {
        let mut subscribers = lock(&self.subscribers);
        if !subscribers.iter().any(|s| Arc::ptr_eq(s, &who)) {
            subscribers.push(who);
        }
    }

    pub fn remove(&self, who: &Arc<dyn NoteListener>) {
        lock(&self.subscribers).retain(|s| !Arc::ptr_eq(s, who));
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Pitches held on the device right now
    pub fn sounding(&self) -> Vec<u8> {
        lock(&self.tracker).sounding()
    }
}

fn read_loop(
    device_id: usize,
    stream: SharedInput,
    subscribers: Subscribers,
    tracker: Arc<Mutex<NoteTracker>>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    while running.load(Ordering::Acquire) {
        let events = match lock(&stream).as_mut() {
            Some(input) => input.read(),
            None => break,
        };

        let events = match events {
            Ok(events) => events,
            Err(e) => {
                warn!(device_id, "input read failed: {}", e);
                thread::sleep(poll_interval);
                continue;
            }
        };
        if events.is_empty() {
            thread::sleep(poll_interval);
            continue;
        }

        let targets: Vec<Arc<dyn NoteListener>> = lock(&subscribers).clone();
        for raw in events {
            match raw.event() {
                Some(MidiEvent::NoteOn { note, velocity }) => {
                    lock(&tracker).note_on(note);
                    let received = Note::from_midi(note, velocity);
                    for target in &targets {
                        target.note_on(received);
                    }
                }
                Some(MidiEvent::NoteOff { note }) => {
                    lock(&tracker).note_off(note);
                    let received = Note::from_midi(note, 0);
                    for target in &targets {
                        target.note_off(received);
                    }
                }
                _ => {}
            }
        }
    }
}

/// One hardware input and its listener
pub struct InputDevice {
    id: usize,
    stream: SharedInput,
    listener: InputListener,
}

impl InputDevice {
    pub fn new(id: usize, stream: Box<dyn InputStream>, poll_interval: Duration) -> Self {
        let stream: SharedInput = Arc::new(Mutex::new(Some(stream)));
        Self {
            id,
            listener: InputListener::new(id, Arc::clone(&stream), poll_interval),
            stream,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn listener(&self) -> &InputListener {
        &self.listener
    }

    /// Stop the listener and release the stream; later calls are no-ops
    pub fn close(&self) {
        self.listener.stop();
        if let Some(mut input) = lock(&self.stream).take() {
            input.close();
            debug!(id = self.id, "input closed");
        }
    }
}
