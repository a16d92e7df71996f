// Note representation for the sequencer
// Notes, simultaneous groups and linear sequences handed to the playback engine

use crate::sequencer::loops::Loop;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Velocity used when a note does not carry its own
pub const DEFAULT_VELOCITY: u8 = 100;

/// Duration factor of a quarter note
pub const QUARTER: f64 = 0.25;

/// Sustain pedal marker carried by a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Pedal {
    #[default]
    None,
    Down,
    Up,
    /// Release and press again at the same instant
    UpDown,
}

/// A musical note, a rest, or a pedal change
///
/// Notes are immutable values. The duration is a factor of a whole note,
/// so 0.25 is a quarter note regardless of tempo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    /// MIDI note number (0-127, where 60 = C4); `None` for rests
    pitch: Option<u8>,

    /// Fraction of a whole note
    duration: f64,

    /// MIDI velocity (0-127)
    velocity: u8,

    pedal: Pedal,
}

impl Note {
    /// Creates a pitched note
    pub fn new(pitch: u8, duration: f64) -> Self {
        assert!(pitch <= 127, "MIDI pitch must be 0-127");
        assert!(duration >= 0.0, "Note duration must be >= 0");

        Self {
            pitch: Some(pitch),
            duration,
            velocity: DEFAULT_VELOCITY,
            pedal: Pedal::None,
        }
    }

    /// Creates a rest: takes time, writes nothing
    pub fn rest(duration: f64) -> Self {
        assert!(duration >= 0.0, "Note duration must be >= 0");

        Self {
            pitch: None,
            duration,
            velocity: 0,
            pedal: Pedal::None,
        }
    }

    /// Creates a pedal change marker
    pub fn pedal(pedal: Pedal) -> Self {
        Self {
            pitch: None,
            duration: 0.0,
            velocity: 0,
            pedal,
        }
    }

    /// Quarter note as received from an input device
    pub fn from_midi(pitch: u8, velocity: u8) -> Self {
        Self::new(pitch, QUARTER).with_velocity(velocity)
    }

    #[must_use]
    pub fn with_velocity(mut self, velocity: u8) -> Self {
        assert!(velocity <= 127, "MIDI velocity must be 0-127");
        self.velocity = velocity;
        self
    }

    pub fn pitch(&self) -> Option<u8> {
        self.pitch
    }

    pub fn duration_factor(&self) -> f64 {
        self.duration
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn pedal_marker(&self) -> Pedal {
        self.pedal
    }

    pub fn is_rest(&self) -> bool {
        self.pitch.is_none() && self.pedal == Pedal::None
    }

    pub fn is_pedal_change(&self) -> bool {
        self.pedal != Pedal::None
    }

    /// Wall-clock length of this note for a given whole-note duration
    pub fn actual_duration(&self, whole_note: Duration) -> Duration {
        whole_note.mul_f64(self.duration)
    }

    /// Get the note name (e.g., "C4", "A#5")
    pub fn name(&self) -> String {
        const NOTE_NAMES: [&str; 12] = [
            "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
        ];

        match (self.pitch, self.pedal) {
            (_, Pedal::Down) => "_".to_string(),
            (_, Pedal::Up) => "^".to_string(),
            (_, Pedal::UpDown) => "^_".to_string(),
            (None, Pedal::None) => "=".to_string(),
            (Some(pitch), Pedal::None) => {
                let octave = (pitch / 12) as i32 - 1;
                format!("{}{}", NOTE_NAMES[(pitch % 12) as usize], octave)
            }
        }
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // quarter notes carry no prefix, others show their denominator
        if self.is_pedal_change() || (self.duration - QUARTER).abs() < f64::EPSILON {
            return write!(f, "{}", self.name());
        }
        if self.duration > 0.0 {
            write!(f, "{}{}", (1.0 / self.duration).round(), self.name())
        } else {
            write!(f, "{}", self.name())
        }
    }
}

/// Notes that sound simultaneously
pub type NoteGroup = Vec<Note>;

/// Pedal marker of a group made of exactly one pedal change
pub fn pedal_of(group: &[Note]) -> Option<Pedal> {
    match group {
        [note] if note.is_pedal_change() => Some(note.pedal),
        _ => None,
    }
}

/// Whole-note duration at a tempo, rounded to whole milliseconds
pub fn whole_note_duration(bpm: f64) -> Duration {
    Duration::from_millis((4.0 * 60_000.0 / bpm).round() as u64)
}

/// A linear musical line: groups in playback order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sequence {
    groups: Vec<NoteGroup>,
}

impl Sequence {
    pub fn new(groups: Vec<NoteGroup>) -> Self {
        Self { groups }
    }

    /// One single-note group per note
    pub fn serial(notes: impl IntoIterator<Item = Note>) -> Self {
        Self::new(notes.into_iter().map(|n| vec![n]).collect())
    }

    pub fn groups(&self) -> &[NoteGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Append another sequence after this one
    #[must_use]
    pub fn join(mut self, other: Sequence) -> Self {
        self.groups.extend(other.groups);
        self
    }

    /// A group lasts as long as its longest member; pedal groups take no time
    pub fn group_duration(group: &[Note], whole_note: Duration) -> Duration {
        if pedal_of(group).is_some() {
            return Duration::ZERO;
        }
        group
            .iter()
            .map(|n| n.actual_duration(whole_note))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Wall-clock length when played at `bpm`
    pub fn duration(&self, bpm: f64) -> Duration {
        let whole = whole_note_duration(bpm);
        self.groups
            .iter()
            .map(|g| Self::group_duration(g, whole))
            .sum()
    }

    /// Musical length in quarter-note beats, independent of tempo rounding
    pub fn beats(&self) -> f64 {
        self.groups
            .iter()
            .filter(|g| pedal_of(g).is_none())
            .map(|g| {
                g.iter()
                    .map(|n| n.duration * 4.0)
                    .fold(0.0_f64, f64::max)
            })
            .sum()
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, group) in self.groups.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            if group.len() == 1 {
                write!(f, "{}", group[0])?;
            } else {
                let names: Vec<String> = group.iter().map(|n| n.to_string()).collect();
                write!(f, "({})", names.join(" "))?;
            }
        }
        Ok(())
    }
}

/// Anything that can be rendered as a sequence
///
/// Resolution happens on every call, so implementations backed by mutable
/// state (variables, loops) yield their current value.
pub trait Sequenceable: Send + Sync {
    fn to_sequence(&self) -> Sequence;

    /// Loops re-arm themselves when planned; everything else plays once
    fn as_loop(self: Arc<Self>) -> Option<Arc<Loop>> {
        None
    }
}

impl Sequenceable for Sequence {
    fn to_sequence(&self) -> Sequence {
        self.clone()
    }
}

impl Sequenceable for Note {
    fn to_sequence(&self) -> Sequence {
        Sequence::new(vec![vec![*self]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_note_duration() {
        assert_eq!(whole_note_duration(120.0), Duration::from_millis(2000));
        assert_eq!(whole_note_duration(60.0), Duration::from_millis(4000));
        // 2666.67 rounds up
        assert_eq!(whole_note_duration(90.0), Duration::from_millis(2667));
    }

    #[test]
    fn test_quarter_at_120_is_500ms() {
        let note = Note::new(60, 0.25);
        assert_eq!(
            note.actual_duration(whole_note_duration(120.0)),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_group_duration_is_max_not_sum() {
        let whole = whole_note_duration(120.0);
        let group = vec![Note::new(60, 0.25), Note::new(64, 0.5), Note::new(67, 0.125)];
        assert_eq!(
            Sequence::group_duration(&group, whole),
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn test_sequence_duration() {
        let seq = Sequence::new(vec![
            vec![Note::new(60, 1.0), Note::new(64, 1.0), Note::new(67, 1.0)],
            vec![Note::new(62, 0.5)],
        ]);
        assert_eq!(seq.duration(120.0), Duration::from_millis(3000));
        assert_eq!(seq.beats(), 6.0);
    }

    #[test]
    fn test_pedal_groups_take_no_time() {
        let seq = Sequence::new(vec![
            vec![Note::pedal(Pedal::Down)],
            vec![Note::new(60, 0.25)],
            vec![Note::pedal(Pedal::Up)],
        ]);
        assert_eq!(seq.duration(120.0), Duration::from_millis(500));
        assert_eq!(seq.beats(), 1.0);
    }

    #[test]
    fn test_pedal_of_requires_single_note() {
        assert_eq!(pedal_of(&[Note::pedal(Pedal::UpDown)]), Some(Pedal::UpDown));
        assert_eq!(pedal_of(&[Note::new(60, 0.25)]), None);
        assert_eq!(
            pedal_of(&[Note::pedal(Pedal::Down), Note::new(60, 0.25)]),
            None
        );
        assert_eq!(pedal_of(&[]), None);
    }

    #[test]
    fn test_note_name() {
        assert_eq!(Note::new(60, 0.25).name(), "C4");
        assert_eq!(Note::new(69, 0.25).name(), "A4");
        assert_eq!(Note::new(73, 0.25).name(), "C#5");
        assert_eq!(Note::rest(0.25).name(), "=");
        assert!(Note::rest(0.25).is_rest());
        assert!(!Note::pedal(Pedal::Down).is_rest());
    }

    #[test]
    fn test_sequence_display() {
        let seq = Sequence::new(vec![
            vec![Note::new(60, 0.25)],
            vec![Note::new(60, 0.5), Note::new(64, 0.5)],
            vec![Note::rest(0.125)],
        ]);
        assert_eq!(seq.to_string(), "C4 (2C4 2E4) 8=");
    }

    #[test]
    #[should_panic(expected = "MIDI pitch must be 0-127")]
    fn test_invalid_pitch() {
        Note::new(128, 0.25);
    }

    #[test]
    #[should_panic(expected = "MIDI velocity must be 0-127")]
    fn test_invalid_velocity() {
        let _ = Note::new(60, 0.25).with_velocity(128);
    }
}
