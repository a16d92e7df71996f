// Hardware boundary - what the engine needs from a MIDI driver
//
// Streams are opaque: outputs accept short messages, inputs hand back
// whatever arrived since the last read.

use crate::midi::DeviceResult;
use crate::midi::event::RawMidiEvent;

/// An opened hardware output
pub trait OutputStream: Send {
    fn write_short(&mut self, status: u8, data1: u8, data2: u8) -> DeviceResult<()>;

    /// Release the hardware; further writes are dropped
    fn close(&mut self) {}
}

/// An opened hardware input
pub trait InputStream: Send {
    /// Drain the events received since the previous call (may be empty)
    fn read(&mut self) -> DeviceResult<Vec<RawMidiEvent>>;

    fn close(&mut self) {}
}

/// Enumeration entry for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: usize,
    pub name: String,
    /// Host API the device lives on (ALSA, CoreMIDI, ...)
    pub interface: String,
    pub input_capable: bool,
    pub opened: bool,
}

/// Driver context owning device enumeration and stream creation
pub trait Driver: Send + Sync {
    fn devices(&self) -> Vec<DeviceInfo>;

    fn default_output_id(&self) -> Option<usize>;

    fn default_input_id(&self) -> Option<usize>;

    fn open_output(&self, id: usize) -> DeviceResult<Box<dyn OutputStream>>;

    fn open_input(&self, id: usize) -> DeviceResult<Box<dyn InputStream>>;

    /// Tear down the driver context after all streams are closed
    fn terminate(&self) {}

    fn device(&self, id: usize) -> Option<DeviceInfo> {
        self.devices().into_iter().find(|d| d.id == id)
    }
}
