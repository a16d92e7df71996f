// Control - reactive bindings between input and playback

pub mod listen;
pub mod trigger;

pub use listen::{Listen, ListenError};
pub use trigger::Trigger;
