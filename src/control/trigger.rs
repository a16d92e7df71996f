// Trigger - plays a sequenceable when evaluated, typically as a listen target

use crate::core::{Context, EvalError, Evaluatable};
use crate::sequencer::note::Sequenceable;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub struct Trigger {
    what: Arc<dyn Sequenceable>,
    delay: Duration,
}

impl Trigger {
    pub fn new(what: Arc<dyn Sequenceable>) -> Self {
        Self {
            what,
            delay: Duration::ZERO,
        }
    }

    /// Wait `delay` and check the context condition again before playing
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Evaluatable for Trigger {
    /// Returns at once; playback runs on its own thread
    fn evaluate(&self, ctx: &Context) -> Result<(), EvalError> {
        let ctx = ctx.clone();
        let what = Arc::clone(&self.what);
        let delay = self.delay;

        thread::Builder::new()
            .name("melokit-trigger".to_string())
            .spawn(move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                if !ctx.condition_holds() {
                    return;
                }
                let bpm = ctx.control().bpm();
                ctx.device().play(what.as_ref(), bpm, Instant::now());
            })
            .map_err(|e| EvalError::Failed(e.to_string()))?;
        Ok(())
    }
}
