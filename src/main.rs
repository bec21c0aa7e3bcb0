//! `onair <config.toml>`: runs the engine until Enter is pressed.

use onair::prelude::*;
use std::env;
use std::io::BufRead;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// C minor arpeggio, one note per step.
const ARPEGGIO: [u8; 8] = [48, 51, 55, 60, 63, 67, 72, 67];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = env::args().skip(1);
    let Some(config_path) = args.next() else {
        eprintln!("usage: onair <config.toml> [--demo]");
        std::process::exit(2);
    };
    let demo = args.any(|a| a == "--demo");

    let config = EngineConfig::load(&config_path)?;
    let mut engine = OnAirEngine::builder(config).build()?;
    engine.start()?;

    let stop = CancelToken::new();
    let arpeggio = demo.then(|| spawn_arpeggio(engine.midi_sender(), engine.clock(), stop.clone()));

    println!("onair running, press Enter to stop");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;

    stop.cancel();
    if let Some(handle) = arpeggio {
        let _ = handle.join();
    }
    let report = engine.stop()?;
    for fault in &report.faults {
        eprintln!("fault: {fault}");
    }
    report.into_result().map_err(Error::from)
}

fn spawn_arpeggio(
    midi: MidiSender,
    clock: MonotonicClock,
    stop: CancelToken,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("onair-demo-midi".into())
        .spawn(move || {
            let step = Duration::from_millis(250);
            for &note in ARPEGGIO.iter().cycle() {
                if midi.send(MidiEvent::note_on(clock.now_us(), 0, note, 100)).is_err() {
                    return;
                }
                let cancelled = stop.wait_timeout(step);
                let _ = midi.send(MidiEvent::note_off(clock.now_us(), 0, note, 0));
                if cancelled {
                    return;
                }
            }
        })
        .expect("failed to spawn demo MIDI thread")
}
