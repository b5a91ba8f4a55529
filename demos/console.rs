//! Rack Console Example
//!
//! Runs a rack on the audio thread and edits it from stdin with console
//! commands (`help` lists them). A device thread drains the sink's output
//! queue at the configured buffer rate, which paces the audio thread the way
//! a sound card would. On `quit` everything played is written to a WAV file.
//!
//! Run with: cargo run --example console -- [config.toml] [out.wav]

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use voltrack::prelude::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => RackConfig::load(path)?,
        None => RackConfig::default(),
    };
    let wav_path = args.next().unwrap_or_else(|| "console.wav".to_string());

    let mut rack = Rack::with_config(&config);
    let (output, device) = MemoryOutput::new(config.sink.buffer_count);
    rack.add(PcmSink::with_config(
        &config.sink,
        config.sample_rate,
        Box::new(output),
    ));

    // Stand-in for the sound card clock
    let playing = Arc::new(AtomicBool::new(true));
    let clock = {
        let playing = Arc::clone(&playing);
        let device = device.clone();
        let period = Duration::from_secs_f64(config.sink.buffer_ms() / 1000.0);
        thread::spawn(move || {
            while playing.load(Ordering::Relaxed) {
                device.play(1);
                thread::sleep(period);
            }
        })
    };

    let engine = RackEngine::start(rack, &config.engine)?;
    let registry = Arc::new(ModuleRegistry::new());
    println!("voltrack console, type 'help' for commands or 'quit' to exit");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed == "quit" || trimmed == "exit" {
            break;
        }
        if trimmed.is_empty() {
            continue;
        }

        // Files are read here and written below; the task only edits the rack
        let request = match Command::parse(trimmed).and_then(Command::prepare) {
            Ok(request) => request,
            Err(err) => {
                println!("error: {err}");
                continue;
            }
        };

        let (tx, rx) = mpsc::channel();
        let registry = Arc::clone(&registry);
        engine.dispatcher().enqueue(move |rack| {
            let _ = tx.send(request.apply(rack, &registry));
        });
        match rx.recv_timeout(Duration::from_secs(2)) {
            Ok(reply) => match reply.and_then(Reply::complete) {
                Ok(text) => println!("{text}"),
                Err(err) => println!("error: {err}"),
            },
            Err(_) => println!("error: audio thread did not answer"),
        }
        stdout.flush()?;
    }

    let rack = engine.stop()?;
    playing.store(false, Ordering::Relaxed);
    let _ = clock.join();

    let channels = config.sink.channels.clamp(1, 2);
    let mut wav = WavFileOutput::create(&wav_path, channels, config.sample_rate as u32)?;
    wav.submit(&device.played())?;
    wav.finalize()?;
    println!(
        "stopped after {} ticks with {} modules, recording written to {wav_path}",
        rack.tick_count(),
        rack.module_count()
    );
    Ok(())
}
