//! Core DSP Modules
//!
//! The standard module library: oscillator, envelope, mixer, amplifier and
//! oscilloscope. PCM playback and recording live in [`crate::pcm`]; rack
//! connectors in [`crate::connector`].

use crate::envelope::EnvelopeGenerator;
use crate::module::{ModuleCore, ProcessContext, RackModule};
use crate::param::{map_range, DisplayScale, Parameter};
use parking_lot::Mutex;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Middle C in Hz
pub const C4: f64 = 261.626;

/// Sine Voltage-Controlled Oscillator
///
/// Frequency is set by the `Freq` parameter and modulated by a ±5V signal on
/// `FreqVC`. The `LFO` toggle switches to a sub-audio range.
pub struct Vco {
    core: ModuleCore,
    phase: f64,
}

impl Vco {
    pub const FREQ: usize = 0;
    pub const LFO: usize = 1;

    pub const FREQ_VC: usize = 0;

    pub const OUT: usize = 0;

    const VCO_MIN: f64 = 16.0;
    const VCO_MAX: f64 = 2000.0;
    const LFO_MIN: f64 = 0.01;
    const LFO_MAX: f64 = 20.0;

    pub fn new() -> Self {
        let default = map_range(C4, Self::VCO_MIN, Self::VCO_MAX, 0.0, 1.0);
        Self {
            core: ModuleCore::new("VCO")
                .with_param(Parameter::slider("Freq", 0.0, 1.0, default))
                .with_param(Parameter::toggle("LFO", false))
                .with_input("FreqVC")
                .with_output("Out"),
            phase: 0.0,
        }
    }

    /// Current oscillator frequency in Hz
    pub fn frequency(&self) -> f64 {
        let (min, max) = if self.core.param(Self::LFO).is_toggle_up() {
            (Self::LFO_MIN, Self::LFO_MAX)
        } else {
            (Self::VCO_MIN, Self::VCO_MAX)
        };
        self.core
            .param(Self::FREQ)
            .bipolar_mapped_value(self.core.input(Self::FREQ_VC), min, max)
    }
}

impl Default for Vco {
    fn default() -> Self {
        Self::new()
    }
}

impl RackModule for Vco {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn process(&mut self, ctx: &ProcessContext) {
        let freq = self.frequency();
        self.phase = (self.phase + freq * ctx.sample_time()).fract();
        self.core
            .output_mut(Self::OUT)
            .set_voltage((TAU * self.phase).sin() * 5.0);
    }
}

/// ADSR Envelope Module
///
/// Time parameters map 0–1 exponentially onto 1ms–10s. The envelope fires
/// while `Gate` is high or the `Trigger` button is held. The output is
/// inverted: 0V at rest, -10V at peak.
pub struct Adsr {
    core: ModuleCore,
    env: EnvelopeGenerator,
}

impl Adsr {
    pub const ATTACK: usize = 0;
    pub const DECAY: usize = 1;
    pub const SUSTAIN: usize = 2;
    pub const RELEASE: usize = 3;
    pub const TRIGGER: usize = 4;

    pub const GATE: usize = 0;

    pub const OUT: usize = 0;

    const MIN_TIME: f64 = 0.001;
    const MAX_TIME: f64 = 10.0;
    const TIME_BASE: f64 = Self::MAX_TIME / Self::MIN_TIME;

    pub fn new() -> Self {
        let time = DisplayScale::exp(Self::TIME_BASE, Self::MIN_TIME * 1000.0);
        Self {
            core: ModuleCore::new("ADSR")
                .with_param(Parameter::slider("Attack", 0.0, 1.0, 0.5).with_display(time))
                .with_param(Parameter::slider("Decay", 0.0, 1.0, 0.5).with_display(time))
                .with_param(
                    Parameter::slider("Sustain", 0.0, 1.0, 0.5)
                        .with_display(DisplayScale::linear(100.0)),
                )
                .with_param(Parameter::slider("Release", 0.0, 1.0, 0.5).with_display(time))
                .with_param(Parameter::button("Trigger"))
                .with_input("Gate")
                .with_output("Out"),
            env: EnvelopeGenerator::new(),
        }
    }

    pub fn envelope(&self) -> &EnvelopeGenerator {
        &self.env
    }

    /// Segment duration in ticks for a 0–1 time parameter
    fn ticks(&self, param: usize, sample_rate: f64) -> f64 {
        let seconds = Self::MIN_TIME * Self::TIME_BASE.powf(self.core.param(param).value());
        seconds * sample_rate
    }
}

impl Default for Adsr {
    fn default() -> Self {
        Self::new()
    }
}

impl RackModule for Adsr {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn process(&mut self, ctx: &ProcessContext) {
        let sr = ctx.sample_rate;
        let sustain = self.core.param(Self::SUSTAIN).value();
        self.env.sustain_level = sustain;
        self.env.attack_rate = 1.0 / self.ticks(Self::ATTACK, sr);
        self.env.decay_rate = -(1.0 - sustain) / self.ticks(Self::DECAY, sr);
        self.env.release_time = self.ticks(Self::RELEASE, sr);

        let gate = self.core.input(Self::GATE).is_gate_high()
            || self.core.param(Self::TRIGGER).is_toggle_up();
        self.env.gate(gate);

        let (level, _) = self.env.process();
        self.core.output_mut(Self::OUT).set_voltage(-level * 10.0);
    }
}

/// Four-channel stereo mixer
///
/// Each `LeftN`/`RightN` pair is weighted by `VolumeN` and summed into the
/// `Left`/`Right` outputs.
pub struct Mixer {
    core: ModuleCore,
}

impl Mixer {
    pub const CHANNELS: usize = 4;

    pub const LEFT: usize = 0;
    pub const RIGHT: usize = 1;

    pub fn new() -> Self {
        let mut core = ModuleCore::new("Mix4");
        for n in 1..=Self::CHANNELS {
            core = core.with_param(Parameter::slider(format!("Volume{n}"), 0.0, 1.0, 0.5));
        }
        for n in 1..=Self::CHANNELS {
            core = core.with_input(format!("Left{n}")).with_input(format!("Right{n}"));
        }
        core = core.with_output("Left").with_output("Right");
        Self { core }
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

impl RackModule for Mixer {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn process(&mut self, _ctx: &ProcessContext) {
        let mut left = 0.0;
        let mut right = 0.0;
        for ch in 0..Self::CHANNELS {
            let volume = self.core.param(ch).value();
            left += self.core.input(ch * 2).voltage() * volume;
            right += self.core.input(ch * 2 + 1).voltage() * volume;
        }
        self.core.output_mut(Self::LEFT).set_voltage(left);
        self.core.output_mut(Self::RIGHT).set_voltage(right);
    }
}

/// Stereo Voltage-Controlled Amplifier
///
/// `VolumeVC` (0–10V) scales the `Volume` parameter when patched.
pub struct Amplifier {
    core: ModuleCore,
}

impl Amplifier {
    pub const VOLUME: usize = 0;

    pub const LEFT: usize = 0;
    pub const RIGHT: usize = 1;
    pub const VOLUME_VC: usize = 2;

    pub fn new() -> Self {
        Self {
            core: ModuleCore::new("Amplifier")
                .with_param(Parameter::slider("Volume", 0.0, 1.0, 1.0))
                .with_input("Left")
                .with_input("Right")
                .with_input("VolumeVC")
                .with_output("Left")
                .with_output("Right"),
        }
    }
}

impl Default for Amplifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RackModule for Amplifier {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn process(&mut self, _ctx: &ProcessContext) {
        let volume = self
            .core
            .param(Self::VOLUME)
            .unipolar_value(self.core.input(Self::VOLUME_VC));
        for ch in [Self::LEFT, Self::RIGHT] {
            let v = self.core.input(ch).voltage() * volume;
            self.core.output_mut(ch).set_voltage(v);
        }
    }
}

/// Number of samples in one scope capture
pub const SCOPE_BUFFER_SIZE: usize = 512;

/// Shared view of the most recent completed scope capture
///
/// The audio thread publishes with `try_lock` and skips the update if a
/// reader holds the lock, so readers may miss captures but never block
/// processing.
#[derive(Debug, Clone)]
pub struct ScopeDisplay {
    samples: Arc<Mutex<Vec<f64>>>,
    captures: Arc<AtomicU64>,
}

impl ScopeDisplay {
    fn new() -> Self {
        Self {
            samples: Arc::new(Mutex::new(vec![0.0; SCOPE_BUFFER_SIZE])),
            captures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Copy of the latest published capture
    pub fn snapshot(&self) -> Vec<f64> {
        self.samples.lock().clone()
    }

    /// Number of captures published so far
    pub fn captures(&self) -> u64 {
        self.captures.load(Ordering::Acquire)
    }

    fn publish(&self, buffer: &[f64]) {
        if let Some(mut samples) = self.samples.try_lock() {
            samples.copy_from_slice(buffer);
            self.captures.fetch_add(1, Ordering::Release);
        }
    }
}

/// Oscilloscope
///
/// Samples `Input1` into a fixed buffer, one sample every `ceil(2^-Time · sr)`
/// ticks, then holds the full capture for half a second before starting
/// over.
pub struct Scope {
    core: ModuleCore,
    buffer: [f64; SCOPE_BUFFER_SIZE],
    buffer_index: usize,
    frame_index: usize,
    display: ScopeDisplay,
}

impl Scope {
    pub const TIME: usize = 0;
    pub const SCALE_Y1: usize = 1;

    pub const INPUT1: usize = 0;

    /// Seconds a completed capture is held
    const HOLD_TIME: f64 = 0.5;

    pub fn new() -> Self {
        let time_base = SCOPE_BUFFER_SIZE as f64 / 6.0;
        Self {
            core: ModuleCore::new("Scope")
                .with_param(
                    Parameter::slider("Time", 6.0, 16.0, 14.0)
                        .with_display(DisplayScale::exp(0.5, 1000.0 * time_base)),
                )
                .with_param(Parameter::slider("ScaleY1", 0.5, 10.0, 1.0))
                .with_input("Input1"),
            buffer: [0.0; SCOPE_BUFFER_SIZE],
            buffer_index: 0,
            frame_index: 0,
            display: ScopeDisplay::new(),
        }
    }

    /// Handle for reading captures from another thread
    pub fn display(&self) -> ScopeDisplay {
        self.display.clone()
    }

    /// Capture currently being recorded (or held)
    pub fn buffer(&self) -> &[f64] {
        &self.buffer
    }

    pub fn is_holding(&self) -> bool {
        self.buffer_index >= SCOPE_BUFFER_SIZE
    }

    /// Restart capturing from the first sample
    pub fn trigger(&mut self) {
        self.buffer_index = 0;
        self.frame_index = 0;
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl RackModule for Scope {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn process(&mut self, ctx: &ProcessContext) {
        let delta = 2f64.powf(-self.core.param(Self::TIME).value());
        let frame_count = (delta * ctx.sample_rate).ceil() as usize;

        if self.buffer_index < SCOPE_BUFFER_SIZE {
            self.frame_index += 1;
            if self.frame_index > frame_count {
                self.frame_index = 0;
                self.buffer[self.buffer_index] = self.core.input(Self::INPUT1).voltage();
                self.buffer_index += 1;
                if self.buffer_index == SCOPE_BUFFER_SIZE {
                    self.display.publish(&self.buffer);
                }
            }
        }

        if self.buffer_index < SCOPE_BUFFER_SIZE {
            return;
        }

        self.frame_index += 1;
        if self.frame_index as f64 * ctx.sample_time() >= Self::HOLD_TIME {
            self.trigger();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortRef;
    use crate::rack::Rack;
    use approx::assert_relative_eq;

    fn run<M: RackModule>(module: &mut M, ticks: usize) {
        let mut ctx = ProcessContext::new(44100.0);
        for _ in 0..ticks {
            module.process(&ctx);
            ctx.advance();
        }
    }

    #[test]
    fn test_vco_default_frequency_is_c4() {
        let vco = Vco::new();
        assert_relative_eq!(vco.frequency(), C4, epsilon = 1e-9);
    }

    #[test]
    fn test_vco_sine_output() {
        let mut vco = Vco::new();
        run(&mut vco, 10);
        let expected = (TAU * C4 * 10.0 / 44100.0).sin() * 5.0;
        assert_relative_eq!(vco.core().output(Vco::OUT).voltage(), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_vco_output_bounded() {
        let mut vco = Vco::new();
        let mut ctx = ProcessContext::new(44100.0);
        for _ in 0..44100 {
            vco.process(&ctx);
            ctx.advance();
            let v = vco.core().output(Vco::OUT).voltage();
            assert!((-5.0..=5.0).contains(&v));
        }
    }

    #[test]
    fn test_vco_lfo_range() {
        let mut vco = Vco::new();
        vco.core_mut().param_mut(Vco::LFO).set_value(1.0);
        vco.core_mut().param_mut(Vco::FREQ).set_value(1.0);
        assert_relative_eq!(vco.frequency(), 20.0);
        vco.core_mut().param_mut(Vco::FREQ).set_value(0.0);
        assert_relative_eq!(vco.frequency(), 0.01);
    }

    #[test]
    fn test_vco_cv_modulates_when_patched() {
        let mut rack = Rack::new(44100.0);
        let mix = rack.add(Mixer::new());
        let vco = rack.add(Vco::new());
        rack.core_mut(mix.id()).unwrap().input_mut(0).set_voltage(5.0);
        rack.set_param(mix.id(), 0, 1.0);
        rack.set_param(vco.id(), Vco::FREQ, 1.0);
        rack.try_add_cable(mix.out("Left"), vco.in_("FreqVC")).unwrap();
        rack.tick();
        rack.tick();

        let freq = rack.module::<Vco>(vco.id()).unwrap().frequency();
        assert_relative_eq!(freq, 2000.0);

        rack.core_mut(mix.id()).unwrap().input_mut(0).set_voltage(2.5);
        rack.tick();
        rack.tick();
        let freq = rack.module::<Vco>(vco.id()).unwrap().frequency();
        assert_relative_eq!(freq, 16.0 + 0.5 * (2000.0 - 16.0));
    }

    #[test]
    fn test_adsr_attack_then_sustain() {
        let mut adsr = Adsr::new();
        adsr.core_mut().param_mut(Adsr::ATTACK).set_value(0.0);
        adsr.core_mut().param_mut(Adsr::DECAY).set_value(0.0);
        adsr.core_mut().input_mut(Adsr::GATE).set_voltage(5.0);

        run(&mut adsr, 1);
        let first = adsr.core().output(Adsr::OUT).voltage();
        assert!(first < 0.0);

        // 1ms attack and 1ms decay at 44.1kHz
        run(&mut adsr, 200);
        assert_relative_eq!(adsr.core().output(Adsr::OUT).voltage(), -5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_adsr_peak_is_minus_ten_volts() {
        let mut adsr = Adsr::new();
        adsr.core_mut().param_mut(Adsr::ATTACK).set_value(0.0);
        adsr.core_mut().input_mut(Adsr::GATE).set_voltage(5.0);
        let mut lowest: f64 = 0.0;
        let mut ctx = ProcessContext::new(44100.0);
        for _ in 0..100 {
            adsr.process(&ctx);
            ctx.advance();
            lowest = lowest.min(adsr.core().output(Adsr::OUT).voltage());
        }
        assert_relative_eq!(lowest, -10.0);
    }

    #[test]
    fn test_adsr_trigger_button() {
        let mut adsr = Adsr::new();
        adsr.core_mut().param_mut(Adsr::TRIGGER).set_value(1.0);
        run(&mut adsr, 10);
        assert!(adsr.core().output(Adsr::OUT).voltage() < 0.0);
    }

    #[test]
    fn test_adsr_release_returns_to_rest() {
        let mut adsr = Adsr::new();
        for p in [Adsr::ATTACK, Adsr::DECAY, Adsr::RELEASE] {
            adsr.core_mut().param_mut(p).set_value(0.0);
        }
        adsr.core_mut().input_mut(Adsr::GATE).set_voltage(5.0);
        run(&mut adsr, 200);
        adsr.core_mut().input_mut(Adsr::GATE).set_voltage(0.0);
        run(&mut adsr, 200);
        assert_eq!(adsr.core().output(Adsr::OUT).voltage(), 0.0);
        assert_eq!(adsr.envelope().state(), crate::envelope::EnvelopeState::Idle);
    }

    #[test]
    fn test_mixer_single_channel() {
        let mut mixer = Mixer::new();
        mixer.core_mut().input_mut(0).set_voltage(4.0);
        run(&mut mixer, 1);
        assert_relative_eq!(mixer.core().output(Mixer::LEFT).voltage(), 2.0);
        assert_relative_eq!(mixer.core().output(Mixer::RIGHT).voltage(), 0.0);
    }

    #[test]
    fn test_mixer_accumulator_resets_each_tick() {
        let mut mixer = Mixer::new();
        mixer.core_mut().input_mut(1).set_voltage(2.0);
        mixer.core_mut().input_mut(3).set_voltage(2.0);
        run(&mut mixer, 5);
        assert_relative_eq!(mixer.core().output(Mixer::RIGHT).voltage(), 2.0);
    }

    #[test]
    fn test_mixer_ports() {
        let mixer = Mixer::new();
        assert_eq!(mixer.name(), "Mix4");
        assert_eq!(mixer.core().inputs().len(), 8);
        assert_eq!(mixer.core().find_input("Right4"), Some(7));
        assert_eq!(mixer.core().find_param("Volume3"), Some(2));
    }

    #[test]
    fn test_amplifier_volume() {
        let mut amp = Amplifier::new();
        amp.core_mut().input_mut(Amplifier::LEFT).set_voltage(4.0);
        amp.core_mut().input_mut(Amplifier::RIGHT).set_voltage(-2.0);
        run(&mut amp, 1);
        assert_relative_eq!(amp.core().output(Amplifier::LEFT).voltage(), 4.0);
        assert_relative_eq!(amp.core().output(Amplifier::RIGHT).voltage(), -2.0);

        amp.core_mut().param_mut(Amplifier::VOLUME).set_value(0.25);
        run(&mut amp, 1);
        assert_relative_eq!(amp.core().output(Amplifier::LEFT).voltage(), 1.0);
    }

    #[test]
    fn test_amplifier_cv_when_patched() {
        let mut rack = Rack::new(44100.0);
        let mix = rack.add(Mixer::new());
        let amp = rack.add(Amplifier::new());
        rack.core_mut(mix.id()).unwrap().input_mut(0).set_voltage(10.0);
        rack.core_mut(amp.id()).unwrap().input_mut(Amplifier::LEFT).set_voltage(4.0);
        rack.try_add_cable(mix.out("Left"), PortRef::input(amp.id(), Amplifier::VOLUME_VC))
            .unwrap();
        rack.tick();
        rack.tick();
        let out = rack.port(amp.out("Left")).unwrap().voltage();
        assert_relative_eq!(out, 2.0);
    }

    #[test]
    fn test_scope_capture_and_hold() {
        let mut scope = Scope::new();
        scope.core_mut().param_mut(Scope::TIME).set_value(16.0);
        scope.core_mut().input_mut(Scope::INPUT1).set_voltage(2.0);
        let display = scope.display();
        assert_eq!(display.captures(), 0);

        // One sample every second tick at the fastest setting
        run(&mut scope, 2 * SCOPE_BUFFER_SIZE);
        assert!(scope.is_holding());
        assert_eq!(display.captures(), 1);
        assert!(display.snapshot().iter().all(|&v| v == 2.0));

        run(&mut scope, 22050);
        assert!(!scope.is_holding());
    }

    #[test]
    fn test_scope_skips_publish_while_reader_holds_lock() {
        let mut scope = Scope::new();
        scope.core_mut().param_mut(Scope::TIME).set_value(16.0);
        let display = scope.display();
        let guard = display.samples.lock();
        run(&mut scope, 2 * SCOPE_BUFFER_SIZE);
        drop(guard);
        assert_eq!(display.captures(), 0);
        assert!(scope.is_holding());
    }
}
