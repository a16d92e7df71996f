// melokit - real-time MIDI scheduling and playback engine
// Library exports for the binary, tests and benchmarks

pub mod config;
pub mod control;
pub mod core;
pub mod logging;
pub mod messaging;
pub mod midi;
pub mod sequencer;

// Re-export commonly used types for convenience
pub use config::EngineConfig;
pub use control::{Listen, ListenError, Trigger};
pub use crate::core::{AudioDevice, Context, Evaluatable, LoopController, NoteListener, VariableStore};
pub use messaging::Notification;
pub use midi::{DeviceError, DeviceRegistry};
pub use sequencer::{Loop, Note, Pedal, Sequence, Sequenceable, Timeline, TimelineEvent, Transport};
