// Listen - binds an input device to a variable and a reactive target
//
// Each note-on is published into the variable and then handed to the target
// together with a guard that only holds while that same key press is down.

use crate::core::{Condition, Context, Evaluatable, NoteListener, Value};
use crate::midi::NoteTracker;
use crate::sequencer::note::Note;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListenError {
    #[error("MIDI input is not available")]
    NoInputCapability,
}

pub struct Listen {
    ctx: Context,
    device_id: usize,
    variable: String,
    target: RwLock<Option<Arc<dyn Evaluatable>>>,
    listening: Mutex<bool>,
    tracker: Mutex<NoteTracker>,
    me: Weak<Listen>,
}

impl Listen {
    pub fn new(
        ctx: Context,
        device_id: usize,
        variable: impl Into<String>,
        target: Option<Arc<dyn Evaluatable>>,
    ) -> Arc<Self> {
        let variable = variable.into();
        Arc::new_cyclic(|me| Self {
            ctx,
            device_id,
            variable,
            target: RwLock::new(target),
            listening: Mutex::new(false),
            tracker: Mutex::new(NoteTracker::new()),
            me: me.clone(),
        })
    }

    pub fn device_id(&self) -> usize {
        self.device_id
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn target(&self) -> Option<Arc<dyn Evaluatable>> {
        self.target
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace what runs on each note-on; takes effect on the next one
    pub fn set_target(&self, target: Option<Arc<dyn Evaluatable>>) {
        *self.target.write().unwrap_or_else(PoisonError::into_inner) = target;
    }

    pub fn is_listening(&self) -> bool {
        *self.state()
    }

    /// Subscribe to the input device. No-op when already listening.
    pub fn play(&self) -> Result<(), ListenError> {
        let mut listening = self.state();
        if *listening {
            return Ok(());
        }
        if !self.ctx.device().has_input_capability() {
            return Err(ListenError::NoInputCapability);
        }
        let Some(me) = self.me.upgrade() else {
            return Ok(());
        };
        self.ctx.device().listen(self.device_id, me, true);
        *listening = true;
        debug!(device_id = self.device_id, variable = %self.variable, "listen started");
        Ok(())
    }

    /// Unsubscribe from the input device. No-op when not listening.
    pub fn stop(&self) {
        let mut listening = self.state();
        if !*listening {
            return;
        }
        if let Some(me) = self.me.upgrade() {
            self.ctx.device().listen(self.device_id, me, false);
        }
        *listening = false;
        debug!(device_id = self.device_id, variable = %self.variable, "listen stopped");
    }

    /// True while `pitch` is still held from the press numbered `count`
    pub fn is_note_on_count(&self, pitch: u8, count: u64) -> bool {
        self.tracker().is_on_count(pitch, count)
    }

    /// Condition bound to one key press
    pub fn guard(&self, pitch: u8, count: u64) -> Condition {
        let me = self.me.clone();
        Arc::new(move || {
            me.upgrade()
                .is_some_and(|listen| listen.is_note_on_count(pitch, count))
        })
    }

    fn state(&self) -> MutexGuard<'_, bool> {
        self.listening.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tracker(&self) -> MutexGuard<'_, NoteTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NoteListener for Listen {
    fn note_on(&self, note: Note) {
        let Some(pitch) = note.pitch() else {
            return;
        };
        let count = {
            let mut tracker = self.tracker();
            let count = tracker.note_on(pitch);
            self.ctx.variables().put(self.variable.as_str(), Value::Note(note));
            count
        };

        if let Some(target) = self.target() {
            let ctx = self.ctx.with_condition(self.guard(pitch, count));
            if let Err(e) = target.evaluate(&ctx) {
                warn!(variable = %self.variable, "listen target failed: {}", e);
            }
        }
    }

    fn note_off(&self, note: Note) {
        if let Some(pitch) = note.pitch() {
            self.tracker().note_off(pitch);
        }
    }
}
