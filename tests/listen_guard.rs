// Integration test: listen note tracking and guard predicates
//
// A guard captured at note-on holds only while the same key press is down.

use melokit::core::{Condition, EvalError, Value};
use melokit::midi::virtual_driver::VirtualDriver;
use melokit::{
    AudioDevice, Context, DeviceRegistry, EngineConfig, Evaluatable, Listen, ListenError, Note,
    NoteListener, Transport, Trigger, VariableStore,
};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Capture {
    conditions: Mutex<Vec<Condition>>,
}

impl Evaluatable for Capture {
    fn evaluate(&self, ctx: &Context) -> Result<(), EvalError> {
        let condition = ctx
            .condition()
            .cloned()
            .ok_or_else(|| EvalError::Failed("no guard".to_string()))?;
        self.conditions.lock().unwrap().push(condition);
        Ok(())
    }
}

struct Fixture {
    driver: Arc<VirtualDriver>,
    registry: Arc<DeviceRegistry>,
    variables: Arc<VariableStore>,
    ctx: Context,
}

fn fixture(driver: VirtualDriver) -> Fixture {
    let driver = Arc::new(driver);
    let config = EngineConfig {
        input_grace_ms: 10,
        input_poll_ms: 1,
        ..EngineConfig::default()
    };
    let registry = Arc::new(DeviceRegistry::new(driver.clone(), config.clone()));
    let device: Arc<dyn AudioDevice> = registry.clone();
    let transport = Arc::new(Transport::new(Arc::clone(&device), &config));
    let variables = VariableStore::new();
    let ctx = Context::new(transport, device, variables.clone());
    Fixture {
        driver,
        registry,
        variables,
        ctx,
    }
}

fn wait_until(check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !check() {
        if Instant::now() > deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
    true
}

#[test]
fn test_guard_tracks_same_press() {
    let f = fixture(VirtualDriver::new());
    let capture = Arc::new(Capture::default());
    let listen = Listen::new(f.ctx.clone(), 0, "key", Some(capture.clone() as Arc<dyn Evaluatable>));

    listen.note_on(Note::from_midi(60, 100));
    let first = capture.conditions.lock().unwrap()[0].clone();
    assert!(first());

    // another key does not disturb the guard
    listen.note_on(Note::from_midi(62, 100));
    assert!(first());

    listen.note_off(Note::from_midi(60, 0));
    assert!(!first());

    listen.note_on(Note::from_midi(60, 100));
    let second = capture.conditions.lock().unwrap()[2].clone();
    assert!(second());
    assert!(!first());
}

#[test]
fn test_note_on_publishes_variable() {
    let f = fixture(VirtualDriver::new());
    let listen = Listen::new(f.ctx.clone(), 0, "key", None);

    listen.note_on(Note::from_midi(67, 90));
    match f.variables.get("key") {
        Some(Value::Note(note)) => {
            assert_eq!(note.pitch(), Some(67));
            assert_eq!(note.velocity(), 90);
        }
        other => panic!("unexpected value {:?}", other),
    }
}

#[test]
fn test_play_requires_input() {
    let f = fixture(VirtualDriver::with_ports(0, 1));
    let listen = Listen::new(f.ctx.clone(), 0, "key", None);
    assert_eq!(listen.play(), Err(ListenError::NoInputCapability));
    assert!(!listen.is_listening());
}

#[test]
fn test_play_stop_are_idempotent() {
    let f = fixture(VirtualDriver::new());
    let listen = Listen::new(f.ctx.clone(), 0, "key", None);

    listen.play().unwrap();
    listen.play().unwrap();
    let input = f.registry.input(0).unwrap();
    assert!(listen.is_listening());
    assert_eq!(input.listener().subscriber_count(), 1);

    listen.stop();
    listen.stop();
    assert!(!listen.is_listening());
    assert_eq!(input.listener().subscriber_count(), 0);
    f.registry.close().unwrap();
}

#[test]
fn test_hardware_note_triggers_playback() {
    let f = fixture(VirtualDriver::new());
    let trigger: Arc<dyn Evaluatable> = Arc::new(Trigger::new(Arc::new(Note::new(72, 0.0))));
    let listen = Listen::new(f.ctx.clone(), 0, "key", Some(trigger));

    listen.play().unwrap();
    f.driver.send(0, 0x90, 64, 90);

    assert!(wait_until(|| f.variables.get("key").is_some()));
    assert!(wait_until(|| {
        f.driver
            .written_to(1)
            .iter()
            .any(|m| m.status == 0x90 && m.data1 == 72)
    }));
    f.registry.close().unwrap();
}

#[test]
fn test_released_key_cancels_delayed_trigger() {
    let f = fixture(VirtualDriver::new());
    let trigger: Arc<dyn Evaluatable> =
        Arc::new(Trigger::new(Arc::new(Note::new(72, 0.0))).with_delay(Duration::from_millis(50)));
    let listen = Listen::new(f.ctx.clone(), 0, "key", Some(trigger));

    listen.note_on(Note::from_midi(60, 100));
    listen.note_off(Note::from_midi(60, 0));
    thread::sleep(Duration::from_millis(120));
    assert!(f.driver.written_to(1).is_empty());

    listen.note_on(Note::from_midi(60, 100));
    assert!(wait_until(|| !f.driver.written_to(1).is_empty()));
}
