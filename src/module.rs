//! Module Interface
//!
//! Every processing unit in a rack implements [`RackModule`]. The common
//! state (ports, parameters, name, position and user tag) lives in a
//! [`ModuleCore`] configured once at construction; port and parameter
//! indices are fixed for the module's lifetime.

use crate::param::Parameter;
use crate::port::{Direction, Port};
use crate::rack::{ModuleId, Rack, RackId};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Default sample rate used by modules constructed without a configuration
pub const DEFAULT_SAMPLE_RATE: f64 = 44100.0;

/// Per-tick processing context
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessContext {
    /// Index of the tick being processed
    pub tick: u64,
    /// Elapsed time in seconds
    pub time: f64,
    pub sample_rate: f64,
}

impl ProcessContext {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            tick: 0,
            time: 0.0,
            sample_rate,
        }
    }

    /// Duration of one tick in seconds
    #[inline]
    pub fn sample_time(&self) -> f64 {
        1.0 / self.sample_rate
    }

    /// Move to the next tick
    #[inline]
    pub fn advance(&mut self) {
        self.tick += 1;
        self.time += self.sample_time();
    }
}

impl Default for ProcessContext {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

/// Editor position of a module
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Ports, parameters and identity shared by every module
pub struct ModuleCore {
    name: String,
    position: Position,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    params: Vec<Parameter>,
    tag: Option<Box<dyn Any + Send>>,
}

impl ModuleCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: Position::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: Vec::new(),
            tag: None,
        }
    }

    /// Append an input port; its index is the number of inputs before it
    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        let index = self.inputs.len();
        self.inputs.push(Port::new(Direction::Input, name, index));
        self
    }

    /// Append an output port; its index is the number of outputs before it
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        let index = self.outputs.len();
        self.outputs.push(Port::new(Direction::Output, name, index));
        self
    }

    /// Append a parameter; its index is the number of parameters before it
    pub fn with_param(mut self, param: Parameter) -> Self {
        self.params.push(param);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    /// Opaque developer data attached to the module
    pub fn tag(&self) -> Option<&(dyn Any + Send)> {
        self.tag.as_deref()
    }

    pub fn set_tag(&mut self, tag: Option<Box<dyn Any + Send>>) {
        self.tag = tag;
    }

    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    #[inline]
    pub fn input(&self, index: usize) -> &Port {
        &self.inputs[index]
    }

    #[inline]
    pub fn input_mut(&mut self, index: usize) -> &mut Port {
        &mut self.inputs[index]
    }

    #[inline]
    pub fn output(&self, index: usize) -> &Port {
        &self.outputs[index]
    }

    #[inline]
    pub fn output_mut(&mut self, index: usize) -> &mut Port {
        &mut self.outputs[index]
    }

    #[inline]
    pub fn param(&self, index: usize) -> &Parameter {
        &self.params[index]
    }

    #[inline]
    pub fn param_mut(&mut self, index: usize) -> &mut Parameter {
        &mut self.params[index]
    }

    /// Port lookup that tolerates out-of-range indices
    pub fn port(&self, direction: Direction, index: usize) -> Option<&Port> {
        match direction {
            Direction::Input => self.inputs.get(index),
            Direction::Output => self.outputs.get(index),
        }
    }

    pub fn port_mut(&mut self, direction: Direction, index: usize) -> Option<&mut Port> {
        match direction {
            Direction::Input => self.inputs.get_mut(index),
            Direction::Output => self.outputs.get_mut(index),
        }
    }

    pub fn get_param(&self, index: usize) -> Option<&Parameter> {
        self.params.get(index)
    }

    pub fn get_param_mut(&mut self, index: usize) -> Option<&mut Parameter> {
        self.params.get_mut(index)
    }

    pub fn find_input(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|p| p.name() == name)
    }

    pub fn find_output(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|p| p.name() == name)
    }

    pub fn find_param(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name() == name)
    }

    /// Iterate every port, inputs first
    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.inputs.iter().chain(self.outputs.iter())
    }
}

impl fmt::Debug for ModuleCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCore")
            .field("name", &self.name)
            .field("position", &self.position)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("params", &self.params.len())
            .finish_non_exhaustive()
    }
}

/// Upcast helper so rack modules can be downcast to their concrete type
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Type-erased module interface for rack processing
///
/// `process` runs once per tick after cables have propagated. It reads input
/// voltages and parameters and writes output voltages; it must not allocate
/// and must only touch the module's own state.
pub trait RackModule: AsAny + Send {
    fn core(&self) -> &ModuleCore;

    fn core_mut(&mut self) -> &mut ModuleCore;

    /// Process one tick
    fn process(&mut self, ctx: &ProcessContext);

    /// Port-local pre-processing, run before cables propagate
    fn process_ports(&mut self, _ctx: &ProcessContext) {}

    /// Called when the module becomes resident in a rack
    fn on_attach(&mut self, _rack: RackId, _id: ModuleId) {}

    /// Nested rack owned by this module, if any
    fn sub_rack(&self) -> Option<&Rack> {
        None
    }

    fn sub_rack_mut(&mut self) -> Option<&mut Rack> {
        None
    }

    /// Replace the nested rack; returns `false` if the module has none or
    /// the replacement is not usable
    fn replace_sub_rack(&mut self, _rack: Rack) -> bool {
        false
    }

    fn name(&self) -> &str {
        self.core().name()
    }
}
