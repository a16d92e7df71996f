// Integration test: sustain pedal events on the output timeline
//
// An up-then-down marker produces two events at the same instant that fire
// in submission order, ahead of anything scheduled later.

use melokit::midi::output::SharedStream;
use melokit::midi::pedal::PedalEvent;
use melokit::midi::virtual_driver::VirtualDriver;
use melokit::midi::{Driver, OutputStream};
use melokit::{AudioDevice, DeviceRegistry, EngineConfig, Note, Pedal, Sequence, Timeline};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_up_down_fires_up_first() {
    let driver = Arc::new(VirtualDriver::new());
    let registry = DeviceRegistry::new(driver.clone(), EngineConfig::default());
    let begin = Instant::now();
    let seq = Sequence::new(vec![
        vec![Note::pedal(Pedal::UpDown)],
        vec![Note::new(60, 0.25)],
    ]);

    registry.play(&seq, 2400.0, begin);
    thread::sleep(Duration::from_millis(20));

    let pedal: Vec<_> = driver
        .written_to(1)
        .into_iter()
        .filter(|m| m.status == 0xB0)
        .map(|m| (m.data1, m.data2))
        .collect();
    assert_eq!(pedal, vec![(64, 0), (64, 127)]);
}

#[test]
fn test_pedal_precedes_later_events() {
    let driver = VirtualDriver::new();
    let stream: SharedStream = Arc::new(Mutex::new(Some(driver.open_output(1).unwrap())));
    let timeline = Timeline::new();
    let at = Instant::now() + Duration::from_millis(30);

    // submitted first, due last
    let marker = Arc::clone(&stream);
    timeline.schedule(
        Box::new(move |_: &Timeline, _: Instant| {
            if let Some(out) = marker.lock().unwrap().as_mut() {
                out.write_short(0x90, 60, 1).unwrap();
            }
        }),
        at + Duration::from_millis(1),
    );
    timeline.schedule(Box::new(PedalEvent::new(false, 1, Arc::clone(&stream))), at);
    timeline.schedule(Box::new(PedalEvent::new(true, 1, Arc::clone(&stream))), at);
    timeline.start();

    thread::sleep(Duration::from_millis(80));
    let bytes: Vec<_> = driver
        .written_to(1)
        .iter()
        .map(|m| (m.status, m.data1, m.data2))
        .collect();
    assert_eq!(bytes, vec![(0xB0, 64, 0), (0xB0, 64, 127), (0x90, 60, 1)]);
    assert!(driver.written_to(1)[0].at >= at);
    timeline.stop();
}

#[test]
fn test_pedal_uses_device_channel() {
    let driver = Arc::new(VirtualDriver::new());
    let registry = DeviceRegistry::new(driver.clone(), EngineConfig::default());
    registry.output(1).unwrap().set_channel(2);

    let seq = Sequence::new(vec![vec![Note::pedal(Pedal::Down)]]);
    registry.play(&seq, 120.0, Instant::now());
    thread::sleep(Duration::from_millis(20));

    let written = driver.written_to(1);
    assert_eq!(written.len(), 1);
    assert_eq!((written[0].status, written[0].data1, written[0].data2), (0xB1, 64, 127));
}
