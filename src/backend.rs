//! Audio Output Boundary
//!
//! The PCM sink hands finished buffers of interleaved 16-bit samples to an
//! [`AudioOutput`]. An output models a hardware queue with a fixed number of
//! buffer slots: a slot is *queued* once submitted and *processed* once the
//! hardware has played it. Processed slots are reclaimed on the next submit.
//!
//! ```text
//!   PcmSink ──submit──▶ [ queued … | processed … ] ──▶ speaker / file / memory
//!           ◀─queue_depth──┘
//! ```
//!
//! Provided outputs:
//!
//! - [`NullOutput`]: discards everything, never fills up
//! - [`MemoryOutput`]: in-memory queue driven through a [`MemoryOutputHandle`]
//! - [`WavFileOutput`]: records to a 16-bit WAV file (feature `wav`)

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

#[cfg(feature = "wav")]
use std::path::Path;

/// Snapshot of an output's hardware queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    /// Slots holding a submitted buffer, played or not
    pub queued: usize,
    /// Queued slots the hardware has finished playing
    pub processed: usize,
    /// Total slots; zero means the output never fills up
    pub capacity: usize,
}

impl QueueDepth {
    /// Every slot is occupied
    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.queued >= self.capacity
    }

    /// Every slot is occupied and already played: the hardware ran dry
    pub fn is_starved(&self) -> bool {
        self.is_full() && self.processed >= self.capacity
    }

    /// A submit would be accepted
    pub fn can_accept(&self) -> bool {
        !self.is_full() || self.processed > 0
    }
}

/// Errors raised by audio outputs
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("output queue is full")]
    QueueFull,

    #[error("audio output I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "wav")]
    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),
}

/// Consumer of interleaved 16-bit PCM buffers
pub trait AudioOutput: Send {
    /// Current state of the hardware queue
    fn queue_depth(&mut self) -> QueueDepth;

    /// Accept the next buffer, reclaiming a processed slot if needed
    fn submit(&mut self, samples: &[i16]) -> Result<(), OutputError>;

    /// Push any buffered data to its destination
    fn flush(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

/// Output that accepts and discards every buffer
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn queue_depth(&mut self) -> QueueDepth {
        QueueDepth::default()
    }

    fn submit(&mut self, _samples: &[i16]) -> Result<(), OutputError> {
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryQueue {
    capacity: usize,
    pending: VecDeque<Vec<i16>>,
    processed: usize,
    played: Vec<i16>,
    submitted: usize,
}

impl MemoryQueue {
    fn depth(&self) -> QueueDepth {
        QueueDepth {
            queued: self.pending.len() + self.processed,
            processed: self.processed,
            capacity: self.capacity,
        }
    }
}

/// In-memory hardware queue
///
/// Nothing is played until the paired [`MemoryOutputHandle`] consumes
/// buffers, which lets tests stage full, starved and draining queues.
#[derive(Debug, Clone)]
pub struct MemoryOutput {
    queue: Arc<Mutex<MemoryQueue>>,
}

/// Observer and "hardware clock" of a [`MemoryOutput`]
#[derive(Debug, Clone)]
pub struct MemoryOutputHandle {
    queue: Arc<Mutex<MemoryQueue>>,
}

impl MemoryOutput {
    /// Create an output with `capacity` buffer slots
    pub fn new(capacity: usize) -> (Self, MemoryOutputHandle) {
        let queue = Arc::new(Mutex::new(MemoryQueue {
            capacity,
            pending: VecDeque::with_capacity(capacity),
            processed: 0,
            played: Vec::new(),
            submitted: 0,
        }));
        (
            Self {
                queue: Arc::clone(&queue),
            },
            MemoryOutputHandle { queue },
        )
    }
}

impl AudioOutput for MemoryOutput {
    fn queue_depth(&mut self) -> QueueDepth {
        self.queue.lock().depth()
    }

    fn submit(&mut self, samples: &[i16]) -> Result<(), OutputError> {
        let mut queue = self.queue.lock();
        if queue.depth().is_full() {
            if queue.processed == 0 {
                return Err(OutputError::QueueFull);
            }
            queue.processed -= 1;
        }
        queue.pending.push_back(samples.to_vec());
        queue.submitted += 1;
        Ok(())
    }
}

impl MemoryOutputHandle {
    /// Play up to `buffers` queued buffers; returns how many were played
    pub fn play(&self, buffers: usize) -> usize {
        let mut queue = self.queue.lock();
        let mut count = 0;
        while count < buffers {
            let Some(buffer) = queue.pending.pop_front() else {
                break;
            };
            queue.played.extend_from_slice(&buffer);
            queue.processed += 1;
            count += 1;
        }
        count
    }

    /// Play everything queued
    pub fn play_all(&self) -> usize {
        self.play(usize::MAX)
    }

    pub fn depth(&self) -> QueueDepth {
        self.queue.lock().depth()
    }

    /// Total buffers accepted so far
    pub fn submitted(&self) -> usize {
        self.queue.lock().submitted
    }

    /// Every sample played so far, in order
    pub fn played(&self) -> Vec<i16> {
        self.queue.lock().played.clone()
    }
}

/// Output that records every buffer into a 16-bit PCM WAV file
///
/// The file behaves like an infinitely fast device: the queue never fills.
#[cfg(feature = "wav")]
pub struct WavFileOutput {
    writer: hound::WavWriter<std::io::BufWriter<std::fs::File>>,
}

#[cfg(feature = "wav")]
impl WavFileOutput {
    pub fn create(
        path: impl AsRef<Path>,
        channels: u16,
        sample_rate: u32,
    ) -> Result<Self, OutputError> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)?;
        Ok(Self { writer })
    }

    /// Write the header and close the file
    pub fn finalize(self) -> Result<(), OutputError> {
        Ok(self.writer.finalize()?)
    }
}

#[cfg(feature = "wav")]
impl AudioOutput for WavFileOutput {
    fn queue_depth(&mut self) -> QueueDepth {
        QueueDepth::default()
    }

    fn submit(&mut self, samples: &[i16]) -> Result<(), OutputError> {
        for &sample in samples {
            self.writer.write_sample(sample)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        Ok(self.writer.flush()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_output_never_fills() {
        let mut out = NullOutput;
        for _ in 0..100 {
            out.submit(&[1, 2, 3]).unwrap();
        }
        let depth = out.queue_depth();
        assert!(!depth.is_full());
        assert!(depth.can_accept());
    }

    #[test]
    fn test_memory_output_fills_and_reclaims() {
        let (mut out, handle) = MemoryOutput::new(2);
        out.submit(&[1, 2]).unwrap();
        out.submit(&[3, 4]).unwrap();
        assert!(out.queue_depth().is_full());
        assert!(!out.queue_depth().can_accept());
        assert!(matches!(out.submit(&[5, 6]), Err(OutputError::QueueFull)));

        assert_eq!(handle.play(1), 1);
        assert!(out.queue_depth().can_accept());
        out.submit(&[5, 6]).unwrap();

        assert_eq!(handle.play_all(), 2);
        assert_eq!(handle.played(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(handle.submitted(), 3);
    }

    #[test]
    fn test_memory_output_starved() {
        let (mut out, handle) = MemoryOutput::new(2);
        out.submit(&[0]).unwrap();
        out.submit(&[0]).unwrap();
        handle.play_all();
        let depth = out.queue_depth();
        assert_eq!(
            depth,
            QueueDepth {
                queued: 2,
                processed: 2,
                capacity: 2
            }
        );
        assert!(depth.is_starved());
    }

    #[cfg(feature = "wav")]
    #[test]
    fn test_wav_output_records_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let mut out = WavFileOutput::create(&path, 2, 44100).unwrap();
        out.submit(&[100, -100, 200, -200]).unwrap();
        out.flush().unwrap();
        out.finalize().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![100, -100, 200, -200]);
    }
}
