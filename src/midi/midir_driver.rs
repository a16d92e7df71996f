// midir driver - real hardware ports
//
// Device ids are global across directions: input ports come first
// (0..n_in), output ports follow (n_in..n_in + n_out).

use crate::midi::driver::{DeviceInfo, Driver, InputStream, OutputStream};
use crate::midi::event::RawMidiEvent;
use crate::midi::{DeviceError, DeviceResult};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Producer, Split};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Incoming messages buffered between driver callback and read loop.
/// A human player stays far below this between two polls.
const INPUT_BUFFER_CAPACITY: usize = 1024;

#[cfg(target_os = "linux")]
const INTERFACE: &str = "ALSA";
#[cfg(target_os = "macos")]
const INTERFACE: &str = "CoreMIDI";
#[cfg(target_os = "windows")]
const INTERFACE: &str = "WinMM";
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const INTERFACE: &str = "midir";

type OpenedSet = Arc<Mutex<HashSet<usize>>>;

pub struct MidirDriver {
    client_name: String,
    opened: OpenedSet,
}

impl MidirDriver {
    /// Connect to the host MIDI system
    pub fn new(client_name: &str) -> DeviceResult<Self> {
        // fail early when there is no MIDI system at all
        MidiInput::new(client_name).map_err(|e| DeviceError::Driver(e.to_string()))?;
        Ok(Self {
            client_name: client_name.to_string(),
            opened: Arc::default(),
        })
    }

    fn input_client(&self) -> DeviceResult<MidiInput> {
        MidiInput::new(&format!("{} input", self.client_name))
            .map_err(|e| DeviceError::Driver(e.to_string()))
    }

    fn output_client(&self) -> DeviceResult<MidiOutput> {
        MidiOutput::new(&format!("{} output", self.client_name))
            .map_err(|e| DeviceError::Driver(e.to_string()))
    }

    fn input_count(&self) -> usize {
        self.input_client().map(|m| m.port_count()).unwrap_or(0)
    }

    fn is_opened(&self, id: usize) -> bool {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    fn mark_opened(&self, id: usize) {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
    }
}

impl Driver for MidirDriver {
    fn devices(&self) -> Vec<DeviceInfo> {
        let mut devices = Vec::new();
        let mut input_count = 0;

        if let Ok(midi_in) = self.input_client() {
            let ports = midi_in.ports();
            input_count = ports.len();
            for (id, port) in ports.iter().enumerate() {
                let name = midi_in
                    .port_name(port)
                    .unwrap_or_else(|_| "Unknown".to_string());
                devices.push(DeviceInfo {
                    id,
                    name,
                    interface: INTERFACE.to_string(),
                    input_capable: true,
                    opened: self.is_opened(id),
                });
            }
        }

        if let Ok(midi_out) = self.output_client() {
            for (index, port) in midi_out.ports().iter().enumerate() {
                let id = input_count + index;
                let name = midi_out
                    .port_name(port)
                    .unwrap_or_else(|_| "Unknown".to_string());
                devices.push(DeviceInfo {
                    id,
                    name,
                    interface: INTERFACE.to_string(),
                    input_capable: false,
                    opened: self.is_opened(id),
                });
            }
        }

        devices
    }

    fn default_output_id(&self) -> Option<usize> {
        let midi_out = self.output_client().ok()?;
        // the first output port is the default
        (midi_out.port_count() > 0).then(|| self.input_count())
    }

    fn default_input_id(&self) -> Option<usize> {
        (self.input_count() > 0).then_some(0)
    }

    fn open_output(&self, id: usize) -> DeviceResult<Box<dyn OutputStream>> {
        let input_count = self.input_count();
        if id < input_count {
            return Err(DeviceError::NotOutputCapable(id));
        }

        let midi_out = self.output_client()?;
        let ports = midi_out.ports();
        let port = ports
            .get(id - input_count)
            .ok_or(DeviceError::UnknownDevice(id))?;
        let name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| "Unknown".to_string());

        let connection = midi_out
            .connect(port, &format!("{}-out-{}", self.client_name, id))
            .map_err(|e| DeviceError::Driver(e.to_string()))?;

        self.mark_opened(id);
        debug!(id, %name, "MIDI output opened");
        Ok(Box::new(MidirOutputStream {
            id,
            connection: Some(connection),
            opened: Arc::clone(&self.opened),
        }))
    }

    fn open_input(&self, id: usize) -> DeviceResult<Box<dyn InputStream>> {
        let mut midi_in = self.input_client()?;
        midi_in.ignore(Ignore::All);

        let ports = midi_in.ports();
        let Some(port) = ports.get(id) else {
            let known = self.devices().iter().any(|d| d.id == id);
            return Err(if known {
                DeviceError::NotInputCapable(id)
            } else {
                DeviceError::UnknownDevice(id)
            });
        };
        let name = midi_in
            .port_name(port)
            .unwrap_or_else(|_| "Unknown".to_string());

        let (mut producer, consumer) = HeapRb::<RawMidiEvent>::new(INPUT_BUFFER_CAPACITY).split();

        let connection = midi_in
            .connect(
                port,
                &format!("{}-in-{}", self.client_name, id),
                move |timestamp, message, _| {
                    // runs on the driver's thread; never block here
                    if let Some(raw) = RawMidiEvent::from_slice(message, timestamp) {
                        if producer.try_push(raw).is_err() {
                            warn!("MIDI input buffer full, event dropped");
                        }
                    }
                },
                (),
            )
            .map_err(|e| DeviceError::Driver(e.to_string()))?;

        self.mark_opened(id);
        debug!(id, %name, "MIDI input opened");
        Ok(Box::new(MidirInputStream {
            id,
            connection: Some(connection),
            events: consumer,
            opened: Arc::clone(&self.opened),
        }))
    }
}

struct MidirOutputStream {
    id: usize,
    connection: Option<MidiOutputConnection>,
    opened: OpenedSet,
}

impl OutputStream for MidirOutputStream {
    fn write_short(&mut self, status: u8, data1: u8, data2: u8) -> DeviceResult<()> {
        match self.connection.as_mut() {
            Some(connection) => connection
                .send(&[status, data1, data2])
                .map_err(|e| DeviceError::Write(e.to_string())),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            self.opened
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}

struct MidirInputStream {
    id: usize,
    connection: Option<MidiInputConnection<()>>,
    events: ringbuf::HeapCons<RawMidiEvent>,
    opened: OpenedSet,
}

impl InputStream for MidirInputStream {
    fn read(&mut self) -> DeviceResult<Vec<RawMidiEvent>> {
        let mut events = Vec::new();
        while let Some(raw) = self.events.try_pop() {
            events.push(raw);
        }
        Ok(events)
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            self.opened
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}
