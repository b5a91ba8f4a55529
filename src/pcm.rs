//! PCM Playback and Output
//!
//! [`PcmSource`] plays a 16-bit [`PcmStream`] into the rack as ±5V audio.
//! [`PcmSink`] converts rack voltages back into interleaved 16-bit buffers
//! and hands them to an [`AudioOutput`]. The sink paces the rack: when the
//! output queue is full it waits for the hardware to free a slot.

use crate::backend::{AudioOutput, NullOutput};
use crate::config::SinkConfig;
use crate::module::{ModuleCore, ProcessContext, RackModule, DEFAULT_SAMPLE_RATE};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[cfg(feature = "wav")]
use std::path::Path;

/// Voltage corresponding to a full-scale sample
pub const FULL_SCALE_VOLTS: f64 = 5.0;

/// Convert a normalized float to a 16-bit sample, clamping to ±1
#[inline]
pub fn float_to_i16(value: f64) -> i16 {
    (value.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Convert a 16-bit sample to a normalized float in [-1, 1)
#[inline]
pub fn i16_to_float(sample: i16) -> f64 {
    f64::from(sample) / 32768.0
}

/// Decoded 16-bit PCM audio
#[derive(Debug, Clone)]
pub struct PcmStream {
    samples: Arc<[i16]>,
    channels: u16,
    sample_rate: u32,
}

impl PcmStream {
    /// Wrap interleaved samples; `channels` is clamped to at least 1
    pub fn from_samples(samples: Vec<i16>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            channels: channels.max(1),
            sample_rate,
        }
    }

    /// Decode a 16-bit integer WAV file
    #[cfg(feature = "wav")]
    pub fn from_wav(path: impl AsRef<Path>) -> Result<Self, hound::Error> {
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(hound::Error::Unsupported);
        }
        let samples = reader.into_samples::<i16>().collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_samples(samples, spec.channels, spec.sample_rate))
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    /// Left and right sample of a frame; mono streams feed both sides
    #[inline]
    fn frame(&self, index: usize) -> (i16, i16) {
        let base = index * usize::from(self.channels);
        let left = self.samples[base];
        let right = if self.channels > 1 {
            self.samples[base + 1]
        } else {
            left
        };
        (left, right)
    }
}

type EndListener = Box<dyn FnMut(&mut PcmSource) + Send>;

/// Stream player
///
/// Outputs `Left`/`Right` audio, a `Gate` that is high while playing and a
/// `Progress` voltage (0–1) when patched. Reaching the end of the stream
/// stops playback and raises the end-of-stream flag once per play. An end
/// listener that calls [`play`](Self::play) loops the stream without a gap.
pub struct PcmSource {
    core: ModuleCore,
    stream: Option<PcmStream>,
    position: usize,
    playing: bool,
    ended: bool,
    end_flag: Arc<AtomicBool>,
    on_end: Option<EndListener>,
}

impl PcmSource {
    pub const LEFT: usize = 0;
    pub const RIGHT: usize = 1;
    pub const GATE: usize = 2;
    pub const PROGRESS: usize = 3;

    pub fn new() -> Self {
        Self {
            core: ModuleCore::new("PCM Source")
                .with_output("Left")
                .with_output("Right")
                .with_output("Gate")
                .with_output("Progress"),
            stream: None,
            position: 0,
            playing: false,
            ended: false,
            end_flag: Arc::new(AtomicBool::new(false)),
            on_end: None,
        }
    }

    /// Replace the stream; playback stops until [`play`](Self::play)
    pub fn load(&mut self, stream: PcmStream) {
        self.stream = Some(stream);
        self.position = 0;
        self.playing = false;
    }

    pub fn stream(&self) -> Option<&PcmStream> {
        self.stream.as_ref()
    }

    /// Start from the first frame
    pub fn play(&mut self) {
        self.position = 0;
        self.playing = true;
        self.ended = false;
        self.end_flag.store(false, Ordering::Release);
    }

    pub fn stop(&mut self) {
        self.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Whether the last play ran to the end of the stream
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// End-of-stream flag readable from other threads
    pub fn end_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.end_flag)
    }

    /// Invoke `listener` on the audio thread when a play reaches the end
    ///
    /// The listener receives the source and may restart or reload it; a
    /// restart plays the first frame in the same tick.
    pub fn on_end<F>(&mut self, listener: F)
    where
        F: FnMut(&mut PcmSource) + Send + 'static,
    {
        self.on_end = Some(Box::new(listener));
    }

    pub fn position(&self) -> usize {
        self.position
    }

    fn finish(&mut self) {
        self.playing = false;
        self.ended = true;
        self.end_flag.store(true, Ordering::Release);
        if let Some(mut listener) = self.on_end.take() {
            listener(self);
            // Keep a listener installed from inside the callback
            self.on_end.get_or_insert(listener);
        }
    }

    fn silence(&mut self) {
        self.core.output_mut(Self::LEFT).set_voltage(0.0);
        self.core.output_mut(Self::RIGHT).set_voltage(0.0);
        self.core.output_mut(Self::GATE).set_voltage(0.0);
    }
}

impl Default for PcmSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RackModule for PcmSource {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn process(&mut self, _ctx: &ProcessContext) {
        if !self.playing {
            self.silence();
            return;
        }

        let mut frames = self.stream.as_ref().map_or(0, PcmStream::frames);
        if self.position >= frames {
            self.finish();
            frames = self.stream.as_ref().map_or(0, PcmStream::frames);
            if !self.playing || self.position >= frames {
                self.silence();
                self.core.output_mut(Self::PROGRESS).set_voltage(1.0);
                return;
            }
        }

        let (left, right) = match self.stream.as_ref() {
            Some(stream) => stream.frame(self.position),
            None => (0, 0),
        };
        self.core
            .output_mut(Self::LEFT)
            .set_voltage(i16_to_float(left) * FULL_SCALE_VOLTS);
        self.core
            .output_mut(Self::RIGHT)
            .set_voltage(i16_to_float(right) * FULL_SCALE_VOLTS);
        self.core.output_mut(Self::GATE).set_voltage(1.0);

        let progress = self.core.output_mut(Self::PROGRESS);
        if progress.is_connected() {
            progress.set_voltage(self.position as f64 / frames as f64);
        }

        self.position += 1;
    }
}

/// Rack endpoint that feeds an [`AudioOutput`]
///
/// Samples are written into one of two alternating buffers. When the active
/// buffer is full it is presented to the output at the start of the next
/// tick. A patched `Gate` below the gate threshold writes silence.
///
/// Presenting waits for a free output slot for at most one buffer's duration,
/// then drops the buffer.
pub struct PcmSink {
    core: ModuleCore,
    output: Box<dyn AudioOutput>,
    buffers: [Vec<i16>; 2],
    active: usize,
    write_index: usize,
    channels: u16,
    poll_interval: Duration,
    max_wait: Duration,
    underruns: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl PcmSink {
    pub const LEFT: usize = 0;
    pub const RIGHT: usize = 1;
    pub const GATE: usize = 2;

    /// Sink with default buffering
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self::with_config(&SinkConfig::default(), DEFAULT_SAMPLE_RATE, output)
    }

    pub fn with_config(config: &SinkConfig, sample_rate: f64, output: Box<dyn AudioOutput>) -> Self {
        let size = config.buffer_samples(sample_rate);
        let channels = config.channels.clamp(1, 2);
        let buffer_ms = config.buffer_ms();
        info!(
            "pcm sink: {sample_rate} Hz, {channels} channel(s), {size} samples x {} buffers",
            config.buffer_count
        );
        Self {
            core: ModuleCore::new("PCM Sink")
                .with_input("Left")
                .with_input("Right")
                .with_input("Gate"),
            output,
            buffers: [vec![0; size], vec![0; size]],
            active: 0,
            write_index: 0,
            channels,
            poll_interval: Duration::from_secs_f64((buffer_ms - 1.0).max(0.5) / 1000.0),
            max_wait: Duration::from_secs_f64(buffer_ms / 1000.0),
            underruns: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Swap the output device
    pub fn set_output(&mut self, output: Box<dyn AudioOutput>) {
        self.output = output;
    }

    pub fn output_mut(&mut self) -> &mut dyn AudioOutput {
        self.output.as_mut()
    }

    /// Interleaved samples per buffer
    pub fn buffer_len(&self) -> usize {
        self.buffers[0].len()
    }

    /// Times the output was found fully played when a buffer arrived
    pub fn underruns(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.underruns)
    }

    /// Buffers discarded because the output stayed full
    pub fn dropped(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    /// Present the partially filled buffer (zero-padded) and flush the output
    pub fn finish(&mut self) -> Result<(), crate::backend::OutputError> {
        if self.write_index > 0 {
            let active = self.active;
            self.buffers[active][self.write_index..].fill(0);
            self.present();
        }
        self.output.flush()
    }

    fn ensure_buffer(&mut self) {
        if self.write_index >= self.buffer_len() {
            self.present();
        }
    }

    fn present(&mut self) {
        let deadline = Instant::now() + self.max_wait;
        loop {
            let depth = self.output.queue_depth();
            if depth.can_accept() {
                if depth.is_starved() {
                    self.underruns.fetch_add(1, Ordering::Relaxed);
                    warn!("pcm sink: buffer underrun");
                }
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("pcm sink: output queue stayed full, dropping buffer");
                self.swap();
                return;
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
        }

        if let Err(err) = self.output.submit(&self.buffers[self.active]) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("pcm sink: output rejected buffer: {err}");
        }
        self.swap();
    }

    fn swap(&mut self) {
        self.active ^= 1;
        self.write_index = 0;
    }

    #[inline]
    fn sample(&self, input: usize, gate: bool) -> i16 {
        if gate {
            float_to_i16(self.core.input(input).voltage() / FULL_SCALE_VOLTS)
        } else {
            0
        }
    }
}

impl Default for PcmSink {
    fn default() -> Self {
        Self::new(Box::new(NullOutput))
    }
}

impl fmt::Debug for PcmSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcmSink")
            .field("buffer_len", &self.buffer_len())
            .field("channels", &self.channels)
            .field("write_index", &self.write_index)
            .finish_non_exhaustive()
    }
}

impl RackModule for PcmSink {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn process(&mut self, _ctx: &ProcessContext) {
        self.ensure_buffer();

        let gate_port = self.core.input(Self::GATE);
        let gate = !gate_port.is_connected() || gate_port.is_gate_high();

        let left = self.sample(Self::LEFT, gate);
        let active = self.active;
        let mut index = self.write_index;
        self.buffers[active][index] = left;
        index += 1;
        if self.channels > 1 {
            let right = self.sample(Self::RIGHT, gate);
            self.buffers[active][index] = right;
            index += 1;
        }
        self.write_index = index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryOutput;
    use crate::rack::Rack;

    fn run<M: RackModule>(module: &mut M, ticks: usize) {
        let mut ctx = ProcessContext::new(44100.0);
        for _ in 0..ticks {
            module.process(&ctx);
            ctx.advance();
        }
    }

    #[test]
    fn test_sample_conversion() {
        assert_eq!(float_to_i16(1.0), 32767);
        assert_eq!(float_to_i16(2.0), 32767);
        assert_eq!(float_to_i16(-1.5), -32767);
        assert_eq!(float_to_i16(0.0), 0);
        assert_eq!(i16_to_float(-32768), -1.0);
        assert_eq!(i16_to_float(16384), 0.5);
    }

    #[test]
    fn test_source_plays_mono_to_both_sides() {
        let mut source = PcmSource::new();
        source.load(PcmStream::from_samples(vec![16384, -16384], 1, 44100));
        source.play();
        run(&mut source, 1);
        assert_eq!(source.core().output(PcmSource::LEFT).voltage(), 2.5);
        assert_eq!(source.core().output(PcmSource::RIGHT).voltage(), 2.5);
        assert_eq!(source.core().output(PcmSource::GATE).voltage(), 1.0);
        run(&mut source, 1);
        assert_eq!(source.core().output(PcmSource::LEFT).voltage(), -2.5);
    }

    #[test]
    fn test_source_stereo_frames() {
        let mut source = PcmSource::new();
        source.load(PcmStream::from_samples(vec![16384, -16384], 2, 44100));
        assert_eq!(source.stream().unwrap().frames(), 1);
        source.play();
        run(&mut source, 1);
        assert_eq!(source.core().output(PcmSource::LEFT).voltage(), 2.5);
        assert_eq!(source.core().output(PcmSource::RIGHT).voltage(), -2.5);
    }

    #[test]
    fn test_source_end_of_stream_fires_once() {
        let mut source = PcmSource::new();
        let fired = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&fired);
        source.on_end(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        let flag = source.end_flag();
        source.load(PcmStream::from_samples(vec![1000; 3], 1, 44100));
        source.play();

        run(&mut source, 10);
        assert!(!source.is_playing());
        assert!(source.is_ended());
        assert!(flag.load(Ordering::Acquire));
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert_eq!(source.core().output(PcmSource::GATE).voltage(), 0.0);
        assert_eq!(source.core().output(PcmSource::LEFT).voltage(), 0.0);
        assert_eq!(source.core().output(PcmSource::PROGRESS).voltage(), 1.0);

        source.play();
        assert!(!flag.load(Ordering::Acquire));
        run(&mut source, 10);
        assert_eq!(fired.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_source_listener_loops_without_gap() {
        let mut source = PcmSource::new();
        let loops = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&loops);
        source.on_end(move |s| {
            counter.fetch_add(1, Ordering::Relaxed);
            s.play();
        });
        source.load(PcmStream::from_samples(vec![1000, 2000, 3000], 1, 44100));
        source.play();

        let mut ctx = ProcessContext::new(44100.0);
        let mut left = Vec::new();
        for _ in 0..7 {
            source.process(&ctx);
            ctx.advance();
            left.push(source.core().output(PcmSource::LEFT).voltage());
            assert_eq!(source.core().output(PcmSource::GATE).voltage(), 1.0);
        }

        let volts = |s: i16| i16_to_float(s) * FULL_SCALE_VOLTS;
        let expected: Vec<f64> = [1000, 2000, 3000, 1000, 2000, 3000, 1000]
            .into_iter()
            .map(volts)
            .collect();
        assert_eq!(left, expected);
        assert_eq!(loops.load(Ordering::Relaxed), 2);
        assert!(source.is_playing());
        assert!(!source.end_flag().load(Ordering::Acquire));
    }

    #[test]
    fn test_source_listener_can_stop_looping() {
        let mut source = PcmSource::new();
        let mut remaining = 1;
        source.on_end(move |s| {
            if remaining > 0 {
                remaining -= 1;
                s.play();
            }
        });
        source.load(PcmStream::from_samples(vec![500; 2], 1, 44100));
        source.play();

        run(&mut source, 4);
        assert!(source.is_playing());
        run(&mut source, 1);
        assert!(!source.is_playing());
        assert!(source.is_ended());
        assert_eq!(source.core().output(PcmSource::GATE).voltage(), 0.0);
    }

    #[test]
    fn test_source_progress_only_when_patched() {
        let mut rack = Rack::new(44100.0);
        let source = rack.add(PcmSource::new());
        let sink = rack.add(PcmSink::default());
        rack.module_mut::<PcmSource>(source.id()).unwrap().load(PcmStream::from_samples(
            vec![0; 4],
            1,
            44100,
        ));
        rack.module_mut::<PcmSource>(source.id()).unwrap().play();

        rack.tick();
        rack.tick();
        assert_eq!(rack.port(source.out("Progress")).unwrap().voltage(), 0.0);

        rack.try_add_cable(source.out("Progress"), sink.in_("Left")).unwrap();
        rack.tick();
        assert_eq!(rack.port(source.out("Progress")).unwrap().voltage(), 0.5);
    }

    #[test]
    fn test_sink_presents_full_buffers() {
        let (output, handle) = MemoryOutput::new(8);
        let mut sink = PcmSink::new(Box::new(output));
        assert_eq!(sink.buffer_len(), 660);
        sink.core_mut().input_mut(PcmSink::LEFT).set_voltage(5.0);
        sink.core_mut().input_mut(PcmSink::RIGHT).set_voltage(-2.5);

        run(&mut sink, 330);
        assert_eq!(handle.submitted(), 0);
        run(&mut sink, 1);
        assert_eq!(handle.submitted(), 1);

        handle.play_all();
        let played = handle.played();
        assert_eq!(played.len(), 660);
        assert_eq!(played[0], 32767);
        assert_eq!(played[1], -16383);
    }

    #[test]
    fn test_sink_gate_low_writes_silence() {
        let mut rack = Rack::new(44100.0);
        let (output, handle) = MemoryOutput::new(8);
        let gate = rack.add(crate::modules::Mixer::new());
        let sink = rack.add(PcmSink::new(Box::new(output)));
        rack.core_mut(sink.id()).unwrap().input_mut(PcmSink::LEFT).set_voltage(5.0);
        rack.try_add_cable(gate.out("Left"), sink.in_("Gate")).unwrap();

        for _ in 0..331 {
            rack.tick();
        }
        handle.play_all();
        assert!(handle.played().iter().all(|&s| s == 0));
    }

    #[test]
    fn test_sink_counts_underrun() {
        let (output, handle) = MemoryOutput::new(2);
        let config = SinkConfig {
            latency_ms: 2,
            buffer_count: 2,
            channels: 1,
        };
        let mut sink = PcmSink::with_config(&config, 1000.0, Box::new(output));
        assert_eq!(sink.buffer_len(), 1);
        let underruns = sink.underruns();

        // Fill both slots, let the hardware drain them, then submit again
        run(&mut sink, 3);
        assert_eq!(handle.submitted(), 2);
        handle.play_all();
        run(&mut sink, 1);
        assert_eq!(handle.submitted(), 3);
        assert_eq!(underruns.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_sink_drops_when_output_stays_full() {
        let (output, handle) = MemoryOutput::new(1);
        let config = SinkConfig {
            latency_ms: 1,
            buffer_count: 1,
            channels: 1,
        };
        let mut sink = PcmSink::with_config(&config, 1000.0, Box::new(output));
        let dropped = sink.dropped();
        run(&mut sink, 3);
        assert_eq!(handle.submitted(), 1);
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_sink_blocks_at_most_one_buffer() {
        let (output, _device) = MemoryOutput::new(1);
        let config = SinkConfig::default();
        let mut sink = PcmSink::with_config(&config, 44100.0, Box::new(output));
        let one_buffer = Duration::from_secs_f64(config.buffer_ms() / 1000.0);
        let frames = sink.buffer_len() / 2;
        let dropped = sink.dropped();

        let mut ctx = ProcessContext::new(44100.0);
        let mut worst = Duration::ZERO;
        for _ in 0..frames * 3 + 1 {
            let start = Instant::now();
            sink.process(&ctx);
            worst = worst.max(start.elapsed());
            ctx.advance();
        }

        // First buffer fills the only slot, the next two time out
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
        assert!(worst >= one_buffer, "worst tick {worst:?}");
        // sleep overshoot
        assert!(worst < one_buffer * 2, "worst tick {worst:?}");
    }

    #[test]
    fn test_sink_finish_pads_partial_buffer() {
        let (output, handle) = MemoryOutput::new(8);
        let mut sink = PcmSink::new(Box::new(output));
        sink.core_mut().input_mut(PcmSink::LEFT).set_voltage(5.0);
        run(&mut sink, 3);
        sink.finish().unwrap();
        handle.play_all();
        let played = handle.played();
        assert_eq!(played.len(), 660);
        assert_eq!(played[4], 32767);
        assert_eq!(played[6], 0);
    }

    #[cfg(feature = "wav")]
    #[test]
    fn test_stream_from_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for s in [0i16, 100, -100] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let stream = PcmStream::from_wav(&path).unwrap();
        assert_eq!(stream.frames(), 3);
        assert_eq!(stream.sample_rate(), 22050);
    }
}
