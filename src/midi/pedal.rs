// Sustain pedal change, fired from an output device's timeline

use crate::midi::event::{CONTROL_CHANGE, SUSTAIN_PEDAL, channel_status};
use crate::midi::output::{SharedStream, write_short};
use crate::sequencer::timeline::{Timeline, TimelineEvent};
use std::time::Instant;

pub struct PedalEvent {
    going_down: bool,
    channel: u8,
    out: SharedStream,
}

impl PedalEvent {
    pub fn new(going_down: bool, channel: u8, out: SharedStream) -> Self {
        Self {
            going_down,
            channel,
            out,
        }
    }

    /// Control-Change bytes written when the event fires
    pub fn bytes(&self) -> [u8; 3] {
        let value = if self.going_down { 127 } else { 0 };
        [channel_status(CONTROL_CHANGE, self.channel), SUSTAIN_PEDAL, value]
    }
}

impl TimelineEvent for PedalEvent {
    fn handle(&self, _timeline: &Timeline, _when: Instant) {
        let [status, controller, value] = self.bytes();
        write_short(&self.out, status, controller, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn detached() -> SharedStream {
        Arc::new(Mutex::new(None))
    }

    #[test]
    fn test_pedal_bytes() {
        assert_eq!(PedalEvent::new(true, 1, detached()).bytes(), [0xB0, 64, 127]);
        assert_eq!(PedalEvent::new(false, 1, detached()).bytes(), [0xB0, 64, 0]);
        assert_eq!(PedalEvent::new(true, 10, detached()).bytes(), [0xB9, 64, 127]);
    }

    #[test]
    fn test_detached_stream_is_ignored() {
        let event = PedalEvent::new(true, 1, detached());
        event.handle(&Timeline::new(), Instant::now());
    }
}
