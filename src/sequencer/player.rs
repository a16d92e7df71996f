// Sequence player - Renders note groups into timed on/off writes
// One thread per note of a group, all joined before the next group starts

use crate::sequencer::note::{Note, Pedal, Sequence, pedal_of, whole_note_duration};
use std::io::{self, Write};
use std::thread;
use std::time::Instant;

/// Where rendered notes end up (an output device, or a recorder in tests)
///
/// `note_on`/`note_off` are called from the per-note threads; implementations
/// serialize the actual writes themselves.
pub trait NoteSink: Sync {
    fn note_on(&self, note: &Note);

    fn note_off(&self, note: &Note);

    /// Submit a sustain pedal change to fire at `at`
    fn pedal(&self, going_down: bool, at: Instant);

    fn echo(&self) -> bool {
        false
    }
}

fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        thread::sleep(deadline - now);
    }
}

/// Play `seq` on `sink` from `begin_at`. Blocks until the last group is done.
///
/// Returns `begin_at` plus the sum of all group durations, which is where a
/// follow-up sequence should begin to sound back-to-back.
pub fn play_sequence(sink: &dyn NoteSink, seq: &Sequence, bpm: f64, begin_at: Instant) -> Instant {
    let whole = whole_note_duration(bpm);
    let echo = sink.echo();
    let mut moment = begin_at;

    sleep_until(begin_at);
    for group in seq.groups() {
        if let Some(pedal) = pedal_of(group) {
            match pedal {
                Pedal::Down => sink.pedal(true, moment),
                Pedal::Up => sink.pedal(false, moment),
                Pedal::UpDown => {
                    sink.pedal(false, moment);
                    sink.pedal(true, moment);
                }
                Pedal::None => {}
            }
            continue;
        }

        if echo {
            print_group(group);
        }

        let group_start = moment;
        thread::scope(|scope| {
            for note in group {
                let ends_at = group_start + note.actual_duration(whole);
                scope.spawn(move || {
                    if note.pitch().is_none() {
                        sleep_until(ends_at);
                        return;
                    }
                    sink.note_on(note);
                    sleep_until(ends_at);
                    sink.note_off(note);
                });
            }
        });

        moment += Sequence::group_duration(group, whole);
        sleep_until(moment);
    }

    if echo {
        println!();
    }
    moment
}

fn print_group(group: &[Note]) {
    let mut out = io::stdout().lock();
    let _ = match group {
        [single] => write!(out, "{} ", single),
        _ => {
            let names: Vec<String> = group.iter().map(|n| n.to_string()).collect();
            write!(out, "({}) ", names.join(" "))
        }
    };
    let _ = out.flush();
}
