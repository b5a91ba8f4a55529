//! Simple Rack Example
//!
//! A VCO played through an amplifier into a PCM sink, with an envelope
//! sweeping the pitch and a scope watching the result. The rack is ticked
//! offline and the sink writes into an in-memory device.
//!
//! Run with: cargo run --example simple_rack

use tracing_subscriber::EnvFilter;
use voltrack::prelude::*;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = RackConfig::default();
    let mut rack = Rack::with_config(&config);
    let sample_rate = rack.sample_rate();

    let vco = rack.add(Vco::new());
    let adsr = rack.add(Adsr::new());
    let amp = rack.add(Amplifier::new());
    let scope = rack.add(Scope::new());
    let (output, device) = MemoryOutput::new(config.sink.buffer_count);
    let sink = rack.add(PcmSink::with_config(
        &config.sink,
        sample_rate,
        Box::new(output),
    ));

    rack.try_add_cable(vco.out("Out"), amp.in_("Left")).unwrap();
    rack.try_add_cable(adsr.out("Out"), vco.in_("FreqVC")).unwrap();
    rack.try_add_cable(amp.out("Left"), sink.in_("Left")).unwrap();
    rack.try_add_cable(amp.out("Left"), sink.in_("Right")).unwrap();
    rack.try_add_cable(amp.out("Left"), scope.in_("Input1")).unwrap();

    let level = rack.tap(amp.out("Left")).unwrap();
    let display = rack.module::<Scope>(scope.id()).unwrap().display();

    println!(
        "Rack: {} modules, {} cables",
        rack.module_count(),
        rack.cable_count()
    );

    // Short envelope so the sweep is audible
    rack.set_param(adsr.id(), Adsr::ATTACK, 0.2);
    rack.set_param(adsr.id(), Adsr::DECAY, 0.4);
    rack.set_param(adsr.id(), Adsr::SUSTAIN, 0.3);
    rack.set_value_smoothed(amp.id(), Amplifier::VOLUME, 0.5);

    let second = sample_rate as usize;
    let mut peak = 0.0_f64;
    for i in 0..second {
        if i == 0 {
            rack.set_param(adsr.id(), Adsr::TRIGGER, 1.0);
        }
        if i == second / 2 {
            println!("Note OFF at {:.2}s", i as f64 / sample_rate);
            rack.set_param(adsr.id(), Adsr::TRIGGER, 0.0);
        }
        rack.tick();
        peak = peak.max(level.get().abs());
        device.play_all();
    }

    let samples = device.played();
    println!("Rendered {} samples, peak {:.2}V", samples.len(), peak);
    println!(
        "Scope captured {} frames, last frame holds {} samples",
        display.captures(),
        display.snapshot().len()
    );

    let document = rack.to_document();
    match document.to_json() {
        Ok(json) => println!("Rack document is {} bytes of JSON", json.len()),
        Err(err) => eprintln!("Failed to serialize rack: {err}"),
    }
}
