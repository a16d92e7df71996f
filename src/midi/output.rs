// Output device - one hardware output stream, its channel, echo flag and timeline
//
// Every write goes through the stream mutex, so a Note-On/Off pair from one
// note never interleaves with bytes of another.

use crate::midi::driver::OutputStream;
use crate::midi::event::{NOTE_OFF, NOTE_OFF_VELOCITY, NOTE_ON, channel_status};
use crate::midi::pedal::PedalEvent;
use crate::sequencer::note::{Note, Sequenceable};
use crate::sequencer::player::{NoteSink, play_sequence};
use crate::sequencer::timeline::{Timeline, TimelineEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Hardware stream shared between the device and its scheduled events.
/// `None` once the device is closed, or when it never opened.
pub type SharedStream = Arc<Mutex<Option<Box<dyn OutputStream>>>>;

/// Write one short message, serialized with every other write to the stream
pub(crate) fn write_short(stream: &SharedStream, status: u8, data1: u8, data2: u8) {
    let mut guard = stream.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(out) = guard.as_mut() {
        trace!(status, data1, data2, "MIDI write");
        if let Err(e) = out.write_short(status, data1, data2) {
            warn!("{}", e);
        }
    }
}

pub struct OutputDevice {
    id: usize,
    stream: SharedStream,
    /// MIDI channel 1..=16
    channel: AtomicU8,
    echo: AtomicBool,
    timeline: Timeline,
    /// Pitches with a Note-On still waiting for its Note-Off
    sounding: Mutex<HashMap<u8, usize>>,
}

impl OutputDevice {
    pub fn new(id: usize, stream: Box<dyn OutputStream>, channel: u8) -> Self {
        Self {
            id,
            stream: Arc::new(Mutex::new(Some(stream))),
            channel: AtomicU8::new(channel.clamp(1, 16)),
            echo: AtomicBool::new(false),
            timeline: Timeline::new(),
            sounding: Mutex::new(HashMap::new()),
        }
    }

    /// A device without stream: accepts everything, writes nothing
    pub fn disabled(id: usize) -> Self {
        Self {
            id,
            stream: Arc::new(Mutex::new(None)),
            channel: AtomicU8::new(1),
            echo: AtomicBool::new(false),
            timeline: Timeline::new(),
            sounding: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn channel(&self) -> u8 {
        self.channel.load(Ordering::Relaxed)
    }

    /// Returns false (and keeps the current channel) when outside 1..=16
    pub fn set_channel(&self, channel: u8) -> bool {
        if !(1..=16).contains(&channel) {
            return false;
        }
        self.channel.store(channel, Ordering::Relaxed);
        true
    }

    pub fn echo_enabled(&self) -> bool {
        self.echo.load(Ordering::Relaxed)
    }

    pub fn set_echo(&self, echo: bool) {
        self.echo.store(echo, Ordering::Relaxed);
    }

    /// Flip echo and return the new value
    pub fn toggle_echo(&self) -> bool {
        !self.echo.fetch_xor(true, Ordering::Relaxed)
    }

    /// Begin accepting scheduled events
    pub fn start(&self) {
        if self.is_enabled() {
            self.timeline.start();
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Put an event on this device's timeline; dropped when disabled
    pub fn schedule(&self, event: Box<dyn TimelineEvent>, at: Instant) {
        if self.is_enabled() {
            self.timeline.schedule(event, at);
        }
    }

    /// Play `seq` from `begin_at`, returning when its last group ends.
    /// A disabled device, or a non-positive or non-finite `bpm`, returns
    /// `begin_at` right away.
    pub fn play(&self, seq: &dyn Sequenceable, bpm: f64, begin_at: Instant) -> Instant {
        if !(bpm > 0.0 && bpm.is_finite()) {
            warn!(bpm, "ignoring play at non-positive BPM");
            return begin_at;
        }
        if !self.is_enabled() {
            return begin_at;
        }
        play_sequence(self, &seq.to_sequence(), bpm, begin_at)
    }

    /// Drop pending events and silence every sounding note
    pub fn reset(&self) {
        self.timeline.reset();
        let pitches: Vec<u8> = {
            let mut sounding = self.sounding.lock().unwrap_or_else(PoisonError::into_inner);
            sounding.drain().map(|(pitch, _)| pitch).collect()
        };
        let status = channel_status(NOTE_OFF, self.channel());
        for pitch in &pitches {
            write_short(&self.stream, status, *pitch, NOTE_OFF_VELOCITY);
        }
        debug!(id = self.id, silenced = pitches.len(), "output reset");
    }

    /// Stop the timeline and release the stream; later calls are no-ops
    pub fn close(&self) {
        self.timeline.stop();
        let stream = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut out) = stream {
            out.close();
            debug!(id = self.id, "output closed");
        }
    }
}

impl NoteSink for OutputDevice {
    fn note_on(&self, note: &Note) {
        let Some(pitch) = note.pitch() else {
            return;
        };
        *self
            .sounding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(pitch)
            .or_default() += 1;
        write_short(
            &self.stream,
            channel_status(NOTE_ON, self.channel()),
            pitch,
            note.velocity(),
        );
    }

    fn note_off(&self, note: &Note) {
        let Some(pitch) = note.pitch() else {
            return;
        };
        {
            let mut sounding = self.sounding.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(count) = sounding.get_mut(&pitch) {
                *count -= 1;
                if *count == 0 {
                    sounding.remove(&pitch);
                }
            }
        }
        write_short(
            &self.stream,
            channel_status(NOTE_OFF, self.channel()),
            pitch,
            NOTE_OFF_VELOCITY,
        );
    }

    fn pedal(&self, going_down: bool, at: Instant) {
        let event = PedalEvent::new(going_down, self.channel(), Arc::clone(&self.stream));
        self.schedule(Box::new(event), at);
    }

    fn echo(&self) -> bool {
        self.echo_enabled()
    }
}
