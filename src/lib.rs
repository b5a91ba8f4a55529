//! # Voltrack: Modular Audio Rack
//!
//! `voltrack` models a modular synthesizer rack: modules expose input and
//! output ports carrying 16-channel voltages, cables copy voltages from
//! outputs to inputs, and the whole rack is processed once per audio sample
//! on a dedicated real-time thread.
//!
//! ## Architecture
//!
//! - **Ports and parameters** - [`port`] and [`param`] hold the voltage and
//!   knob state every module shares through [`ModuleCore`].
//! - **Rack** - [`rack`] owns modules and cables in processing order, drains
//!   the cross-thread [`task`] queue and runs the per-tick pipeline.
//! - **Modules** - oscillators, envelopes, mixing and metering in
//!   [`modules`]; PCM playback and output in [`pcm`]; nested racks in
//!   [`connector`].
//! - **Persistence** - JSON rack documents in [`serialize`], instantiated
//!   through the [`registry`].
//! - **Runtime** - [`engine`] runs a rack on its own thread, paced by the
//!   [`backend`] a [`PcmSink`] writes to; [`console`] edits a running rack.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltrack::prelude::*;
//!
//! let mut rack = Rack::new(44100.0);
//!
//! let vco = rack.add(Vco::new());
//! let adsr = rack.add(Adsr::new());
//! let amp = rack.add(Amplifier::new());
//! let (output, device) = MemoryOutput::new(8);
//! let sink = rack.add(PcmSink::new(Box::new(output)));
//!
//! rack.try_add_cable(vco.out("Out"), amp.in_("Left")).unwrap();
//! rack.try_add_cable(adsr.out("Out"), vco.in_("FreqVC")).unwrap();
//! rack.try_add_cable(amp.out("Left"), sink.in_("Left")).unwrap();
//! rack.try_add_cable(amp.out("Left"), sink.in_("Right")).unwrap();
//!
//! // Run it on the audio thread and edit it from here
//! let engine = RackEngine::start(rack, &EngineConfig::default()).unwrap();
//! engine.dispatcher().enqueue(move |rack| {
//!     rack.set_param(adsr.id(), Adsr::TRIGGER, 1.0);
//! });
//! device.play_all();
//! let rack = engine.stop().unwrap();
//! ```

pub mod backend;
pub mod config;
pub mod connector;
pub mod console;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod io;
pub mod module;
pub mod modules;
pub mod param;
pub mod pcm;
pub mod port;
pub mod rack;
pub mod registry;
pub mod serialize;
pub mod task;

/// Prelude module for convenient imports
pub mod prelude {
    // Ports and parameters
    pub use crate::param::{DisplayScale, ParamType, Parameter};
    pub use crate::port::{Direction, Port, PortRef, GATE_THRESHOLD, MAX_CHANNELS};

    // Modules
    pub use crate::module::{
        ModuleCore, Position, ProcessContext, RackModule, DEFAULT_SAMPLE_RATE,
    };

    // Rack
    pub use crate::error::{DocumentError, PatchError};
    pub use crate::rack::{Cable, CableId, ModuleHandle, ModuleId, Rack, RackId};
    pub use crate::task::TaskQueue;

    // Built-in modules
    pub use crate::connector::{ChildConnector, ParentConnector, ParentLink};
    pub use crate::envelope::{EnvelopeGenerator, EnvelopeState};
    pub use crate::modules::{Adsr, Amplifier, Mixer, Scope, ScopeDisplay, Vco};
    pub use crate::pcm::{PcmSink, PcmSource, PcmStream};

    // Output devices
    #[cfg(feature = "wav")]
    pub use crate::backend::WavFileOutput;
    pub use crate::backend::{
        AudioOutput, MemoryOutput, MemoryOutputHandle, NullOutput, OutputError, QueueDepth,
    };

    // Persistence
    pub use crate::registry::ModuleRegistry;
    pub use crate::serialize::{LoadReport, RackDocument};

    // Runtime
    pub use crate::config::{EngineConfig, RackConfig, SinkConfig};
    pub use crate::console::{Command, ConsoleError, Reply, Request};
    pub use crate::engine::{EngineError, RackEngine};
    pub use crate::io::AtomicF64;
}

// Re-export key types at crate root for convenience
pub use prelude::*;
