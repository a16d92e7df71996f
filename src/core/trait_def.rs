// Capability traits shared by the engine's components
//
// The device, the loop clock and input consumers only know each other
// through these traits, so tests and alternative back-ends can stand in.

use crate::core::context::Context;
use crate::messaging::notification::Notification;
use crate::midi::DeviceError;
use crate::sequencer::loops::Loop;
use crate::sequencer::note::{Note, Sequenceable};
use crate::sequencer::timeline::TimelineEvent;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Output side of the engine
pub trait AudioDevice: Send + Sync {
    /// Per device control commands (`echo`, `in <id>`, `out <id>`, ...)
    fn command(&self, args: &[&str]) -> Option<Notification>;

    /// Play all notes of `seq` starting at `begin_at` using `bpm`.
    /// Returns the end time of the last played group.
    fn play(&self, seq: &dyn Sequenceable, bpm: f64, begin_at: Instant) -> Instant;

    /// Put an event on the timeline of the default output
    fn schedule(&self, event: Box<dyn TimelineEvent>, begin_at: Instant);

    fn reset(&self);

    fn close(&self) -> Result<(), DeviceError>;

    fn has_input_capability(&self) -> bool;

    /// Subscribe (`start`) or unsubscribe `who` from input device `device_id`
    fn listen(&self, device_id: usize, who: Arc<dyn NoteListener>, start: bool);
}

/// Called with the controller after a BPM/BIAB change
pub type SettingHandler = Arc<dyn Fn(&dyn LoopController) + Send + Sync>;

/// Beat/bar clock and owner of the running loops
pub trait LoopController: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn reset(&self);

    /// Non-positive values are ignored
    fn set_bpm(&self, bpm: f64);
    fn bpm(&self) -> f64;

    fn set_biab(&self, biab: u32);
    fn biab(&self) -> u32;

    fn start_loop(&self, l: &Arc<Loop>);
    fn end_loop(&self, l: &Arc<Loop>);

    /// Playhead as whole (beats, bars) since the clock started
    fn beats_and_bars(&self) -> (i64, i64);

    /// Play `seq` from the bar boundary `bars` bars after the next one
    fn plan(&self, bars: i64, seq: Arc<dyn Sequenceable>);

    fn setting_notifier(&self, handler: SettingHandler);
}

/// Implemented by consumers of input devices
pub trait NoteListener: Send + Sync {
    fn note_on(&self, note: Note);
    fn note_off(&self, note: Note);
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluation failed: {0}")]
    Failed(String),
}

/// Something that can be run against a context, e.g. a listen target
pub trait Evaluatable: Send + Sync {
    fn evaluate(&self, ctx: &Context) -> Result<(), EvalError>;
}
