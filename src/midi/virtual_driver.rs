// Virtual driver - in-memory ports for tests and machines without MIDI hardware
//
// Outputs record every message with the instant it was written. Inputs
// replay whatever was handed to `send`.

use crate::midi::driver::{DeviceInfo, Driver, InputStream, OutputStream};
use crate::midi::event::RawMidiEvent;
use crate::midi::{DeviceError, DeviceResult};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// One message as it reached a virtual output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenMessage {
    pub device: usize,
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
    pub at: Instant,
}

#[derive(Debug, Clone)]
struct PortSpec {
    id: usize,
    name: String,
    input: bool,
}

#[derive(Default)]
struct VirtualShared {
    written: Mutex<Vec<WrittenMessage>>,
    inputs: Mutex<HashMap<usize, VecDeque<RawMidiEvent>>>,
    open_counts: Mutex<HashMap<usize, usize>>,
    opened: Mutex<HashSet<usize>>,
    failing: Mutex<HashSet<usize>>,
    writes_in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    terminated: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct VirtualDriver {
    ports: Vec<PortSpec>,
    write_delay: Duration,
    shared: Arc<VirtualShared>,
}

impl VirtualDriver {
    /// One input (id 0) and one output (id 1)
    pub fn new() -> Self {
        Self::with_ports(1, 1)
    }

    /// `inputs` input ports followed by `outputs` output ports
    pub fn with_ports(inputs: usize, outputs: usize) -> Self {
        let mut ports = Vec::with_capacity(inputs + outputs);
        for i in 0..inputs {
            ports.push(PortSpec {
                id: i,
                name: format!("Virtual Input {}", i + 1),
                input: true,
            });
        }
        for o in 0..outputs {
            ports.push(PortSpec {
                id: inputs + o,
                name: format!("Virtual Output {}", o + 1),
                input: false,
            });
        }

        Self {
            ports,
            write_delay: Duration::ZERO,
            shared: Arc::default(),
        }
    }

    /// Hold every write for `delay`, widening any window for interleaving
    #[must_use]
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Make opening `id` fail with a driver error
    pub fn fail_opening(&self, id: usize) {
        lock(&self.shared.failing).insert(id);
    }

    /// Queue an incoming message on input `id`
    pub fn send(&self, id: usize, status: u8, data1: u8, data2: u8) {
        let timestamp = lock(&self.shared.written).len() as u64;
        lock(&self.shared.inputs)
            .entry(id)
            .or_default()
            .push_back(RawMidiEvent::new(status, data1, data2, timestamp));
    }

    /// Every message written to any output, in write order
    pub fn written(&self) -> Vec<WrittenMessage> {
        lock(&self.shared.written).clone()
    }

    pub fn written_to(&self, id: usize) -> Vec<WrittenMessage> {
        self.written().into_iter().filter(|m| m.device == id).collect()
    }

    pub fn clear_written(&self) {
        lock(&self.shared.written).clear();
    }

    /// How many times a stream was opened for `id`
    pub fn open_count(&self, id: usize) -> usize {
        lock(&self.shared.open_counts).get(&id).copied().unwrap_or(0)
    }

    /// Highest number of writes observed in progress at once
    pub fn max_concurrent_writes(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::SeqCst)
    }

    fn port(&self, id: usize) -> Option<&PortSpec> {
        self.ports.iter().find(|p| p.id == id)
    }

    fn check_open(&self, id: usize, input: bool) -> DeviceResult<()> {
        let port = self.port(id).ok_or(DeviceError::UnknownDevice(id))?;
        if port.input != input {
            return Err(if input {
                DeviceError::NotInputCapable(id)
            } else {
                DeviceError::NotOutputCapable(id)
            });
        }
        if lock(&self.shared.failing).contains(&id) {
            return Err(DeviceError::Driver(format!("cannot allocate stream for {}", id)));
        }
        *lock(&self.shared.open_counts).entry(id).or_default() += 1;
        lock(&self.shared.opened).insert(id);
        Ok(())
    }
}

impl Default for VirtualDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for VirtualDriver {
    fn devices(&self) -> Vec<DeviceInfo> {
        let opened = lock(&self.shared.opened);
        self.ports
            .iter()
            .map(|p| DeviceInfo {
                id: p.id,
                name: p.name.clone(),
                interface: "virtual".to_string(),
                input_capable: p.input,
                opened: opened.contains(&p.id),
            })
            .collect()
    }

    fn default_output_id(&self) -> Option<usize> {
        self.ports.iter().find(|p| !p.input).map(|p| p.id)
    }

    fn default_input_id(&self) -> Option<usize> {
        self.ports.iter().find(|p| p.input).map(|p| p.id)
    }

    fn open_output(&self, id: usize) -> DeviceResult<Box<dyn OutputStream>> {
        self.check_open(id, false)?;
        Ok(Box::new(VirtualOutputStream {
            id,
            write_delay: self.write_delay,
            shared: Arc::clone(&self.shared),
            closed: false,
        }))
    }

    fn open_input(&self, id: usize) -> DeviceResult<Box<dyn InputStream>> {
        self.check_open(id, true)?;
        Ok(Box::new(VirtualInputStream {
            id,
            shared: Arc::clone(&self.shared),
            closed: false,
        }))
    }

    fn terminate(&self) {
        self.shared.terminated.store(true, Ordering::SeqCst);
    }
}

struct VirtualOutputStream {
    id: usize,
    write_delay: Duration,
    shared: Arc<VirtualShared>,
    closed: bool,
}

impl OutputStream for VirtualOutputStream {
    fn write_short(&mut self, status: u8, data1: u8, data2: u8) -> DeviceResult<()> {
        if self.closed {
            return Ok(());
        }

        let in_flight = self.shared.writes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        if !self.write_delay.is_zero() {
            thread::sleep(self.write_delay);
        }
        lock(&self.shared.written).push(WrittenMessage {
            device: self.id,
            status,
            data1,
            data2,
            at: Instant::now(),
        });
        self.shared.writes_in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            lock(&self.shared.opened).remove(&self.id);
        }
    }
}

struct VirtualInputStream {
    id: usize,
    shared: Arc<VirtualShared>,
    closed: bool,
}

impl InputStream for VirtualInputStream {
    fn read(&mut self) -> DeviceResult<Vec<RawMidiEvent>> {
        if self.closed {
            return Ok(Vec::new());
        }
        Ok(lock(&self.shared.inputs)
            .get_mut(&self.id)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            lock(&self.shared.opened).remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_layout() {
        let driver = VirtualDriver::with_ports(2, 1);
        let devices = driver.devices();
        assert_eq!(devices.len(), 3);
        assert!(devices[0].input_capable);
        assert!(!devices[2].input_capable);
        assert_eq!(driver.default_input_id(), Some(0));
        assert_eq!(driver.default_output_id(), Some(2));
    }

    #[test]
    fn test_direction_checked_on_open() {
        let driver = VirtualDriver::new();
        assert!(matches!(
            driver.open_output(0),
            Err(DeviceError::NotOutputCapable(0))
        ));
        assert!(matches!(
            driver.open_input(1),
            Err(DeviceError::NotInputCapable(1))
        ));
        assert!(matches!(
            driver.open_output(9),
            Err(DeviceError::UnknownDevice(9))
        ));
    }

    #[test]
    fn test_output_records_writes() {
        let driver = VirtualDriver::new();
        let mut out = driver.open_output(1).unwrap();
        out.write_short(0x90, 60, 100).unwrap();
        out.close();
        out.write_short(0x80, 60, 100).unwrap();

        let written = driver.written_to(1);
        assert_eq!(written.len(), 1);
        assert_eq!((written[0].status, written[0].data1), (0x90, 60));
        assert!(!driver.devices()[1].opened);
    }

    #[test]
    fn test_input_replays_sent_messages() {
        let driver = VirtualDriver::new();
        let mut input = driver.open_input(0).unwrap();
        driver.send(0, 0x90, 64, 90);
        driver.send(0, 0x80, 64, 0);

        let events = input.read().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].bytes(), [0x90, 64, 90]);
        assert!(input.read().unwrap().is_empty());
    }

    #[test]
    fn test_failing_open() {
        let driver = VirtualDriver::new();
        driver.fail_opening(1);
        assert!(matches!(driver.open_output(1), Err(DeviceError::Driver(_))));
        assert_eq!(driver.open_count(1), 0);
    }
}
