//! Ports and Channels
//!
//! A port is the smallest signal-carrying unit of a module. Each port holds
//! [`MAX_CHANNELS`] channel voltages (channel 0 is used for monophonic
//! signals) and the list of cables currently attached to it.
//!
//! Voltages follow hardware modular conventions: audio and bipolar CV use
//! ±5V, unipolar CV uses 0–10V and gates are considered high at
//! [`GATE_THRESHOLD`] and above.

use crate::error::PatchError;
use crate::rack::{Cable, CableId, ModuleId};
use serde::{Deserialize, Serialize};

/// Maximum number of polyphonic channels carried by a single port
pub const MAX_CHANNELS: usize = 16;

/// Voltage at or above which a gate input is considered high
pub const GATE_THRESHOLD: f64 = 0.9;

/// Signal flow direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Receives voltage from at most one cable
    Input,
    /// Drives any number of cables
    Output,
}

impl Direction {
    /// The direction a cable peer must have
    pub fn opposite(self) -> Self {
        match self {
            Direction::Input => Direction::Output,
            Direction::Output => Direction::Input,
        }
    }
}

/// Reference to a specific port on a specific module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRef {
    pub module: ModuleId,
    pub direction: Direction,
    pub index: usize,
}

impl PortRef {
    pub fn input(module: ModuleId, index: usize) -> Self {
        Self {
            module,
            direction: Direction::Input,
            index,
        }
    }

    pub fn output(module: ModuleId, index: usize) -> Self {
        Self {
            module,
            direction: Direction::Output,
            index,
        }
    }
}

/// A signal-carrying port owned by exactly one module
///
/// Channel voltages live inline in the port, so a channel is addressed by
/// `(port, channel index)` rather than by a separate object.
#[derive(Debug, Clone)]
pub struct Port {
    name: String,
    index: usize,
    direction: Direction,
    channels: [f64; MAX_CHANNELS],
    cables: Vec<CableId>,
    connected: Vec<PortRef>,
}

impl Port {
    pub fn new(direction: Direction, name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index,
            direction,
            channels: [0.0; MAX_CHANNELS],
            cables: Vec::new(),
            connected: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Voltage of channel 0
    #[inline]
    pub fn voltage(&self) -> f64 {
        self.channels[0]
    }

    /// Set the voltage of channel 0
    #[inline]
    pub fn set_voltage(&mut self, voltage: f64) {
        self.channels[0] = voltage;
    }

    /// Voltage of a specific channel
    ///
    /// # Panics
    ///
    /// Panics if `channel >= MAX_CHANNELS`.
    #[inline]
    pub fn channel_voltage(&self, channel: usize) -> f64 {
        self.channels[channel]
    }

    /// Set the voltage of a specific channel
    ///
    /// # Panics
    ///
    /// Panics if `channel >= MAX_CHANNELS`.
    #[inline]
    pub fn set_channel_voltage(&mut self, channel: usize, voltage: f64) {
        self.channels[channel] = voltage;
    }

    /// All channel voltages
    #[inline]
    pub fn channels(&self) -> &[f64; MAX_CHANNELS] {
        &self.channels
    }

    #[inline]
    pub(crate) fn copy_channels_from(&mut self, channels: &[f64; MAX_CHANNELS]) {
        self.channels = *channels;
    }

    /// Whether at least one cable is attached
    #[inline]
    pub fn is_connected(&self) -> bool {
        !self.cables.is_empty()
    }

    /// Whether the port reads as a high gate
    #[inline]
    pub fn is_gate_high(&self) -> bool {
        self.voltage() >= GATE_THRESHOLD
    }

    /// Cables attached to this port, in attach order
    pub fn cables(&self) -> &[CableId] {
        &self.cables
    }

    /// Ports on the other end of the attached cables
    pub fn connected_ports(&self) -> &[PortRef] {
        &self.connected
    }

    /// Attach a cable to this port
    ///
    /// Inputs accept a single cable. The caller is responsible for running
    /// the cable's transfer once afterwards so a freshly patched input
    /// reflects the current source voltage.
    pub fn add_cable(&mut self, id: CableId, cable: &Cable) -> Result<(), PatchError> {
        if cable.output().direction == cable.input().direction {
            return Err(PatchError::SameDirection(self.direction));
        }
        if self.direction == Direction::Input && self.is_connected() {
            return Err(PatchError::InputOccupied);
        }

        let peer = match self.direction {
            Direction::Input => cable.output(),
            Direction::Output => cable.input(),
        };
        self.connected.push(peer);
        self.cables.push(id);
        Ok(())
    }

    /// Detach a cable; an input left without cables falls silent
    ///
    /// Returns `false` if the cable was not attached.
    pub fn remove_cable(&mut self, id: CableId, cable: &Cable) -> bool {
        let Some(pos) = self.cables.iter().position(|&c| c == id) else {
            return false;
        };
        self.cables.remove(pos);

        let peer = match self.direction {
            Direction::Input => cable.output(),
            Direction::Output => cable.input(),
        };
        if let Some(pos) = self.connected.iter().position(|&p| p == peer) {
            self.connected.remove(pos);
        }

        if self.cables.is_empty() && self.direction == Direction::Input {
            self.channels = [0.0; MAX_CHANNELS];
        }
        true
    }
}
