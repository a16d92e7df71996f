// MIDI device layer - hardware boundary, devices and their registry

pub mod driver;
pub mod event;
pub mod input;
pub mod midir_driver;
pub mod output;
pub mod pedal;
pub mod registry;
pub mod virtual_driver;

pub use driver::{DeviceInfo, Driver, InputStream, OutputStream};
pub use event::{MidiEvent, RawMidiEvent};
pub use input::{InputDevice, InputListener, NoteTracker};
pub use output::OutputDevice;
pub use registry::DeviceRegistry;

use thiserror::Error;

/// MIDI device errors
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("MIDI driver error: {0}")]
    Driver(String),

    #[error("no default output MIDI device available")]
    NoDefaultOutput,

    #[error("unknown MIDI device id {0}")]
    UnknownDevice(usize),

    #[error("MIDI device {0} has no input capability")]
    NotInputCapable(usize),

    #[error("MIDI device {0} has no output capability")]
    NotOutputCapable(usize),

    #[error("MIDI write failed: {0}")]
    Write(String),

    /// A registry operation failed for a given device
    #[error("{op} failed for device id {id}: {source}")]
    Access {
        op: &'static str,
        id: usize,
        #[source]
        source: Box<DeviceError>,
    },
}

impl DeviceError {
    pub fn access(op: &'static str, id: usize, source: DeviceError) -> Self {
        DeviceError::Access {
            op,
            id,
            source: Box::new(source),
        }
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;
