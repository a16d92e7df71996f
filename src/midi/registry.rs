// Device registry - lazily opened, cached input and output devices
//
// Devices are opened on first access by id and live until `close`. Lookups
// take the read lock; a miss upgrades to the write lock and checks again, so
// concurrent first accesses open a single stream.

use crate::config::EngineConfig;
use crate::core::{AudioDevice, NoteListener};
use crate::messaging::{Notification, NotificationCategory};
use crate::midi::driver::{DeviceInfo, Driver};
use crate::midi::input::InputDevice;
use crate::midi::midir_driver::MidirDriver;
use crate::midi::output::OutputDevice;
use crate::midi::{DeviceError, DeviceResult};
use crate::sequencer::note::Sequenceable;
use crate::sequencer::timeline::TimelineEvent;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default)]
struct DefaultIds {
    input: Option<usize>,
    output: Option<usize>,
}

pub struct DeviceRegistry {
    driver: Arc<dyn Driver>,
    inputs: RwLock<HashMap<usize, Arc<InputDevice>>>,
    outputs: RwLock<HashMap<usize, Arc<OutputDevice>>>,
    defaults: RwLock<DefaultIds>,
    /// Stand-in returned while the default output cannot be opened
    disabled: Arc<OutputDevice>,
    config: EngineConfig,
}

impl DeviceRegistry {
    pub fn new(driver: Arc<dyn Driver>, config: EngineConfig) -> Self {
        let defaults = DefaultIds {
            input: driver.default_input_id(),
            output: driver.default_output_id(),
        };
        if defaults.output.is_none() {
            warn!("{}, playback disabled", DeviceError::NoDefaultOutput);
        }
        debug!(input = ?defaults.input, output = ?defaults.output, "device registry created");

        Self {
            driver,
            inputs: RwLock::new(HashMap::new()),
            outputs: RwLock::new(HashMap::new()),
            defaults: RwLock::new(defaults),
            disabled: Arc::new(OutputDevice::disabled(usize::MAX)),
            config,
        }
    }

    /// Registry on the host MIDI system
    pub fn with_midir(config: EngineConfig) -> DeviceResult<Self> {
        let driver = MidirDriver::new(&config.client_name)?;
        Ok(Self::new(Arc::new(driver), config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.driver.devices()
    }

    /// Default (input, output) device ids
    pub fn io(&self) -> (Option<usize>, Option<usize>) {
        let defaults = *self.defaults.read().unwrap_or_else(PoisonError::into_inner);
        (defaults.input, defaults.output)
    }

    /// Output device `id`, opening and starting it on first access
    pub fn output(&self, id: usize) -> DeviceResult<Arc<OutputDevice>> {
        if let Some(device) = self
            .outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
        {
            return Ok(Arc::clone(device));
        }

        let mut outputs = self.outputs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(device) = outputs.get(&id) {
            return Ok(Arc::clone(device));
        }

        let stream = self
            .driver
            .open_output(id)
            .map_err(|e| DeviceError::access("Output", id, e))?;
        let device = Arc::new(OutputDevice::new(id, stream, self.config.default_channel));
        device.set_echo(self.config.echo);
        device.start();
        outputs.insert(id, Arc::clone(&device));
        info!(id, "output device opened");
        Ok(device)
    }

    /// Input device `id`, opening it on first access. Its listener is not started.
    pub fn input(&self, id: usize) -> DeviceResult<Arc<InputDevice>> {
        if let Some(device) = self
            .inputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
        {
            return Ok(Arc::clone(device));
        }

        let mut inputs = self.inputs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(device) = inputs.get(&id) {
            return Ok(Arc::clone(device));
        }

        let stream = self
            .driver
            .open_input(id)
            .map_err(|e| DeviceError::access("Input", id, e))?;
        let poll = Duration::from_millis(self.config.input_poll_ms);
        let device = Arc::new(InputDevice::new(id, stream, poll));
        inputs.insert(id, Arc::clone(&device));
        info!(id, "input device opened");
        Ok(device)
    }

    /// The default output, or a disabled device when there is none
    pub fn default_output(&self) -> Arc<OutputDevice> {
        let Some(id) = self.io().1 else {
            return Arc::clone(&self.disabled);
        };
        match self.output(id) {
            Ok(device) => device,
            Err(e) => {
                warn!("{}", e);
                Arc::clone(&self.disabled)
            }
        }
    }

    pub fn change_input_device_id(&self, id: usize) -> DeviceResult<()> {
        self.input(id)?;
        self.defaults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .input = Some(id);
        Ok(())
    }

    pub fn change_output_device_id(&self, id: usize) -> DeviceResult<()> {
        self.output(id)?;
        self.defaults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .output = Some(id);
        Ok(())
    }

    /// Output `id` if it is already open
    fn cached_output(&self, id: usize) -> Option<Arc<OutputDevice>> {
        self.outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Device listing; an unopened default output shows the configured settings
    fn describe(&self) -> String {
        let (input, output) = self.io();
        let (channel, echo) = match output.and_then(|id| self.cached_output(id)) {
            Some(device) => (device.channel(), device.echo_enabled()),
            None => (self.config.default_channel, self.config.echo),
        };
        let mut text = String::new();

        for device in self.devices() {
            let direction = if device.input_capable { "input" } else { "output" };
            let state = if device.opened { "open" } else { "closed" };
            let _ = writeln!(
                text,
                "{}: {} ({}, {}, {})",
                device.id, device.name, device.interface, direction, state
            );
        }
        let show = |id: Option<usize>| id.map_or("none".to_string(), |id| id.to_string());
        let _ = write!(
            text,
            "default input: {}, default output: {}, channel: {}, echo: {}",
            show(input),
            show(output),
            channel,
            echo
        );
        text
    }

    fn parse_id(word: Option<&&str>) -> Option<usize> {
        word.and_then(|w| w.parse().ok())
    }
}

fn midi_info(message: String) -> Option<Notification> {
    Some(Notification::info(NotificationCategory::Midi, message))
}

fn midi_warning(message: String) -> Option<Notification> {
    Some(Notification::warning(NotificationCategory::Midi, message))
}

impl AudioDevice for DeviceRegistry {
    fn command(&self, args: &[&str]) -> Option<Notification> {
        let Some(name) = args.first() else {
            return midi_info(self.describe());
        };

        match *name {
            "echo" => {
                let on = self.default_output().toggle_echo();
                midi_info(format!("echo is {}", if on { "on" } else { "off" }))
            }
            "in" => match Self::parse_id(args.get(1)) {
                Some(id) => match self.change_input_device_id(id) {
                    Ok(()) => midi_info(format!("default input device is now {}", id)),
                    Err(e) => midi_warning(e.to_string()),
                },
                None => midi_warning("missing or invalid input device id".to_string()),
            },
            "out" => match Self::parse_id(args.get(1)) {
                Some(id) => match self.change_output_device_id(id) {
                    Ok(()) => midi_info(format!("default output device is now {}", id)),
                    Err(e) => midi_warning(e.to_string()),
                },
                None => midi_warning("missing or invalid output device id".to_string()),
            },
            "channel" => {
                let channel = args.get(1).and_then(|w| w.parse::<u8>().ok());
                match channel {
                    Some(ch) if self.default_output().set_channel(ch) => {
                        midi_info(format!("default output channel is now {}", ch))
                    }
                    _ => midi_warning("MIDI channel must be in 1..=16".to_string()),
                }
            }
            other => midi_warning(format!("unknown device access command: {}", other)),
        }
    }

    fn play(&self, seq: &dyn Sequenceable, bpm: f64, begin_at: Instant) -> Instant {
        self.default_output().play(seq, bpm, begin_at)
    }

    fn schedule(&self, event: Box<dyn TimelineEvent>, begin_at: Instant) {
        self.default_output().schedule(event, begin_at);
    }

    /// Silence every open output and stop every input read thread.
    ///
    /// Subscribers stay registered and a `Listen` still reports itself as
    /// listening, so its `play` is a no-op until it is stopped and played
    /// again. Any `listen(.., true)` restarts the read thread.
    fn reset(&self) {
        let outputs: Vec<_> = self
            .outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for output in outputs {
            output.reset();
        }

        let inputs: Vec<_> = self
            .inputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for input in inputs {
            input.listener().stop();
        }
    }

    fn close(&self) -> Result<(), DeviceError> {
        let inputs: Vec<_> = self
            .inputs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, device)| device)
            .collect();
        for input in &inputs {
            input.listener().stop();
        }
        for input in &inputs {
            input.close();
        }

        let outputs: Vec<_> = self
            .outputs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, device)| device)
            .collect();
        for output in &outputs {
            output.close();
        }

        self.driver.terminate();
        info!("device registry closed");
        Ok(())
    }

    fn has_input_capability(&self) -> bool {
        self.io().0.is_some()
    }

    fn listen(&self, device_id: usize, who: Arc<dyn NoteListener>, start: bool) {
        let input = match self.input(device_id) {
            Ok(input) => input,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };

        if start {
            input.listener().start();
            // let the stream drain whatever was buffered before we subscribe
            thread::sleep(Duration::from_millis(self.config.input_grace_ms));
            input.listener().add(who);
        } else {
            // the read loop keeps running; events find no subscriber
            input.listener().remove(&who);
        }
    }
}
