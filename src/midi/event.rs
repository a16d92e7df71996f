// MIDI wire messages - status bytes and parsing of incoming messages

/// Note-On status byte (channel 1)
pub const NOTE_ON: u8 = 0x90;
/// Note-Off status byte (channel 1)
pub const NOTE_OFF: u8 = 0x80;
/// Control-Change status byte (channel 1)
pub const CONTROL_CHANGE: u8 = 0xB0;
/// MIDI CC 64, damper/sustain pedal
pub const SUSTAIN_PEDAL: u8 = 64;
/// Velocity written with every Note-Off
pub const NOTE_OFF_VELOCITY: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    ControlChange { controller: u8, value: u8 },
}

/// One message as read from a hardware input stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMidiEvent {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
    /// Driver timestamp in microseconds
    pub timestamp: u64,
}

impl RawMidiEvent {
    pub fn new(status: u8, data1: u8, data2: u8, timestamp: u64) -> Self {
        Self {
            status,
            data1,
            data2,
            timestamp,
        }
    }

    /// Build from the variable-length byte slice a driver hands us.
    /// Missing data bytes are zero-filled.
    pub fn from_slice(bytes: &[u8], timestamp: u64) -> Option<Self> {
        let (&status, rest) = bytes.split_first()?;
        Some(Self {
            status,
            data1: rest.first().copied().unwrap_or(0),
            data2: rest.get(1).copied().unwrap_or(0),
            timestamp,
        })
    }

    pub fn bytes(&self) -> [u8; 3] {
        [self.status, self.data1, self.data2]
    }

    /// Decode into a typed event; unsupported statuses yield `None`
    pub fn event(&self) -> Option<MidiEvent> {
        MidiEvent::from_bytes(&self.bytes())
    }
}

/// Status byte for `base` on a 1-based channel (1..=16)
pub fn channel_status(base: u8, channel: u8) -> u8 {
    base | (channel.clamp(1, 16) - 1)
}

impl MidiEvent {
    /// Parse a raw MIDI message
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 3 {
            return None;
        }

        let status = bytes[0];
        match status & 0xF0 {
            NOTE_ON => {
                let note = bytes[1] & 0x7F;
                let velocity = bytes[2] & 0x7F;
                // velocity 0 is a release
                if velocity == 0 {
                    Some(MidiEvent::NoteOff { note })
                } else {
                    Some(MidiEvent::NoteOn { note, velocity })
                }
            }
            NOTE_OFF => Some(MidiEvent::NoteOff {
                note: bytes[1] & 0x7F,
            }),
            CONTROL_CHANGE => Some(MidiEvent::ControlChange {
                controller: bytes[1],
                value: bytes[2],
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on() {
        let event = MidiEvent::from_bytes(&[0x90, 60, 100]).unwrap();
        assert_eq!(
            event,
            MidiEvent::NoteOn {
                note: 60,
                velocity: 100
            }
        );
    }

    #[test]
    fn test_note_on_velocity_zero_is_release() {
        let event = MidiEvent::from_bytes(&[0x90, 64, 0]).unwrap();
        assert_eq!(event, MidiEvent::NoteOff { note: 64 });
    }

    #[test]
    fn test_channel_bits_ignored_when_parsing() {
        let a = MidiEvent::from_bytes(&[0x90, 60, 100]).unwrap();
        let b = MidiEvent::from_bytes(&[0x9F, 60, 100]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_incomplete_and_unknown_messages() {
        assert!(MidiEvent::from_bytes(&[]).is_none());
        assert!(MidiEvent::from_bytes(&[0x90, 60]).is_none());
        assert!(MidiEvent::from_bytes(&[0xF0, 0, 0]).is_none());
    }

    #[test]
    fn test_channel_status() {
        assert_eq!(channel_status(NOTE_ON, 1), 0x90);
        assert_eq!(channel_status(NOTE_OFF, 1), 0x80);
        assert_eq!(channel_status(CONTROL_CHANGE, 2), 0xB1);
        assert_eq!(channel_status(CONTROL_CHANGE, 16), 0xBF);
    }

    #[test]
    fn test_sustain_pedal_parsed() {
        let event = MidiEvent::from_bytes(&[0xB3, SUSTAIN_PEDAL, 127]).unwrap();
        assert_eq!(
            event,
            MidiEvent::ControlChange {
                controller: 64,
                value: 127
            }
        );
        assert!(MidiEvent::from_bytes(&[0xE0, 0, 64]).is_none());
    }

    #[test]
    fn test_raw_from_short_slice() {
        let raw = RawMidiEvent::from_slice(&[0xC0, 5], 42).unwrap();
        assert_eq!(raw.bytes(), [0xC0, 5, 0]);
        assert_eq!(raw.timestamp, 42);
        assert!(RawMidiEvent::from_slice(&[], 0).is_none());
    }
}
