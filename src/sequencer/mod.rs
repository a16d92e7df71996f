// Sequencer module
// Musical data, the event timeline, the note renderer and the loop clock

pub mod loops;
pub mod note;
pub mod player;
pub mod timeline;
pub mod transport;

pub use loops::{Loop, LoopId};
pub use note::{Note, NoteGroup, Pedal, Sequence, Sequenceable};
pub use player::{NoteSink, play_sequence};
pub use timeline::{Timeline, TimelineEvent};
pub use transport::Transport;
