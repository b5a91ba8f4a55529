//! Real-Time Engine
//!
//! Moves a [`Rack`] onto a dedicated audio thread and ticks it until
//! stopped. The thread is paced by whatever blocks inside the rack, normally
//! a [`PcmSink`](crate::pcm::PcmSink) waiting on its output queue; a rack
//! without one runs as fast as the CPU allows.
//!
//! Other threads talk to the running rack through the [`TaskQueue`] returned
//! by [`RackEngine::dispatcher`].

use crate::config::EngineConfig;
use crate::rack::Rack;
use crate::task::TaskQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while starting or stopping the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn audio thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("audio thread panicked")]
    Panicked,
}

/// A rack running on its own thread
#[derive(Debug)]
pub struct RackEngine {
    running: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    dispatcher: TaskQueue,
    sample_rate: f64,
    handle: Option<JoinHandle<Rack>>,
}

impl RackEngine {
    /// Spawn the audio thread and start ticking `rack`
    pub fn start(rack: Rack, config: &EngineConfig) -> Result<Self, EngineError> {
        let running = Arc::new(AtomicBool::new(true));
        let ticks = Arc::new(AtomicU64::new(0));
        let dispatcher = rack.dispatcher();
        let sample_rate = rack.sample_rate();

        let handle = {
            let running = Arc::clone(&running);
            let ticks = Arc::clone(&ticks);
            thread::Builder::new()
                .name(config.thread_name.clone())
                .spawn(move || run(rack, &running, &ticks))?
        };

        info!(
            "engine: started '{}' at {} Hz",
            config.thread_name, sample_rate
        );
        Ok(Self {
            running,
            ticks,
            dispatcher,
            sample_rate,
            handle: Some(handle),
        })
    }

    /// Queue for graph mutations executed at the start of the next tick
    pub fn dispatcher(&self) -> TaskQueue {
        self.dispatcher.clone()
    }

    /// Ticks completed since start
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the audio thread after its current tick and take the rack back
    pub fn stop(mut self) -> Result<Rack, EngineError> {
        self.shutdown().ok_or(EngineError::Panicked)
    }

    fn shutdown(&mut self) -> Option<Rack> {
        self.running.store(false, Ordering::Release);
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(rack) => {
                info!("engine: stopped after {} ticks", self.ticks());
                Some(rack)
            }
            Err(_) => {
                warn!("engine: audio thread panicked");
                None
            }
        }
    }
}

impl Drop for RackEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(mut rack: Rack, running: &AtomicBool, ticks: &AtomicU64) -> Rack {
    while running.load(Ordering::Acquire) {
        rack.tick();
        ticks.fetch_add(1, Ordering::Relaxed);
    }
    rack
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryOutput;
    use crate::modules::Vco;
    use crate::pcm::PcmSink;
    use std::time::{Duration, Instant};

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_start_and_stop_returns_rack() {
        let mut rack = Rack::new(44100.0);
        rack.add(Vco::new());
        let id = rack.id();

        let engine = RackEngine::start(rack, &EngineConfig::default()).unwrap();
        assert!(engine.is_running());
        wait_until(|| engine.ticks() >= 100);

        let rack = engine.stop().unwrap();
        assert_eq!(rack.id(), id);
        assert!(rack.tick_count() >= 100);
        assert_eq!(rack.module_count(), 1);
    }

    #[test]
    fn test_tasks_run_on_audio_thread() {
        let engine = RackEngine::start(Rack::new(44100.0), &EngineConfig::default()).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        engine.dispatcher().enqueue(move |rack| {
            rack.add(Vco::new());
            let _ = tx.send(thread::current().name().map(str::to_string));
        });

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("voltrack-audio"));
        let rack = engine.stop().unwrap();
        assert_eq!(rack.module_count(), 1);
    }

    #[test]
    fn test_sink_paces_the_thread() {
        let (output, handle) = MemoryOutput::new(2);
        let mut rack = Rack::new(44100.0);
        rack.add(PcmSink::new(Box::new(output)));

        let engine = RackEngine::start(rack, &EngineConfig::default()).unwrap();
        wait_until(|| handle.submitted() >= 2);
        thread::sleep(Duration::from_millis(20));

        // With nothing consumed the sink drops buffers after waiting, so the
        // thread keeps running but far slower than free-running.
        assert!(engine.ticks() < 44100);
        assert!(engine.is_running());
        engine.stop().unwrap();
    }

    #[test]
    fn test_custom_thread_name() {
        let config = EngineConfig {
            thread_name: "rack-under-test".to_string(),
        };
        let engine = RackEngine::start(Rack::new(48000.0), &config).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        engine.dispatcher().enqueue(move |_| {
            let _ = tx.send(thread::current().name().map(str::to_string));
        });
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap().as_deref(),
            Some("rack-under-test")
        );
        assert_eq!(engine.sample_rate(), 48000.0);
    }
}
