//! Lock-free Voltage Publishing
//!
//! Values that leave the real-time thread (voltage taps, counters read by a
//! UI) are published through atomics so readers never block the rack.

use crate::port::PortRef;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Atomic f64 for lock-free communication between threads
///
/// Uses AtomicU64 internally since there's no native AtomicF64.
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    /// Get the current value
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Set a new value
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn load(&self, ordering: Ordering) -> f64 {
        f64::from_bits(self.0.load(ordering))
    }

    pub fn store(&self, value: f64, ordering: Ordering) {
        self.0.store(value.to_bits(), ordering);
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// A port whose channel 0 voltage is mirrored into a shared atomic
#[derive(Debug, Clone)]
pub(crate) struct VoltageTap {
    port: PortRef,
    value: Arc<AtomicF64>,
}

impl VoltageTap {
    pub(crate) fn new(port: PortRef, value: Arc<AtomicF64>) -> Self {
        Self { port, value }
    }

    pub(crate) fn port(&self) -> PortRef {
        self.port
    }

    pub(crate) fn publishes_to(&self, value: &Arc<AtomicF64>) -> bool {
        Arc::ptr_eq(&self.value, value)
    }

    #[inline]
    pub(crate) fn publish(&self, voltage: f64) {
        self.value.set(voltage);
    }
}
