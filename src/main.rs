use melokit::core::Value;
use melokit::{
    AudioDevice, Context, DeviceRegistry, EngineConfig, Loop, LoopController, Note, Pedal,
    Sequence, Transport, VariableStore, logging,
};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{error, info};

fn phrase() -> Sequence {
    Sequence::new(vec![
        vec![Note::pedal(Pedal::Down)],
        vec![Note::new(60, 0.25), Note::new(64, 0.25), Note::new(67, 0.25)],
        vec![Note::new(62, 0.125)],
        vec![Note::new(64, 0.125)],
        vec![Note::rest(0.25)],
        vec![Note::new(60, 0.5), Note::new(67, 0.5)],
        vec![Note::pedal(Pedal::Up)],
    ])
}

fn main() {
    logging::init("info");

    println!("=== melokit ===");
    let config = EngineConfig::load_or_default();

    let registry = match DeviceRegistry::with_midir(config.clone()) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            error!("{}", e);
            return;
        }
    };
    if let Some(listing) = registry.command(&[]) {
        println!("{}\n", listing.message);
    }

    let device: Arc<dyn AudioDevice> = registry.clone();
    let transport = Arc::new(Transport::new(Arc::clone(&device), &config));
    let variables = VariableStore::new();

    let ctx = Context::new(transport.clone(), device, variables.clone());

    info!(bpm = ctx.control().bpm(), "playing phrase");
    let started = Instant::now();
    let end = ctx.device().play(&phrase(), ctx.control().bpm(), started);
    info!(length_ms = (end - started).as_millis() as u64, "phrase done");

    // a two-bar loop bound to a variable, rewritten while it plays
    variables.put(
        "riff",
        Value::Sequence(Arc::new(Sequence::serial([
            Note::new(48, 0.25),
            Note::new(55, 0.25),
            Note::new(52, 0.25),
            Note::new(55, 0.25),
        ]))),
    );
    let riff = Loop::new(variables.reference("riff"));
    ctx.control().start_loop(&riff);
    thread::sleep(transport.bar_duration() * 3);

    variables.put("riff", Value::Note(Note::new(43, 1.0)));
    thread::sleep(transport.bar_duration() * 2);
    ctx.control().end_loop(&riff);
    thread::sleep(transport.bar_duration());

    info!(spans = riff.spans_played(), "loop done");
    transport.stop();
    if let Err(e) = registry.close() {
        error!("{}", e);
    }
}
