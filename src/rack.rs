//! Rack
//!
//! A rack owns an ordered collection of modules and an ordered collection of
//! cables. Insertion order is processing order; there is no topological
//! sort. Every cable copies voltage once per tick, so each hop adds one tick
//! of latency and feedback loops need no special handling.
//!
//! Each call to [`Rack::process`] runs, in order:
//!
//! 1. queued cross-thread tasks
//! 2. parameter smoothing
//! 3. per-module port pre-processing
//! 4. cable propagation
//! 5. module processing
//! 6. voltage taps and the tick counter

use crate::config::RackConfig;
use crate::error::PatchError;
use crate::io::{AtomicF64, VoltageTap};
use crate::module::{ModuleCore, ProcessContext, RackModule};
use crate::port::{Direction, Port, PortRef};
use crate::task::TaskQueue;
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

new_key_type! {
    /// Identifier of a module resident in a rack
    pub struct ModuleId;

    /// Identifier of a cable in a rack
    pub struct CableId;
}

static NEXT_RACK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a rack, used to navigate nested racks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RackId(u64);

impl RackId {
    fn next() -> Self {
        RackId(NEXT_RACK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A directed connection from an output port to an input port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cable {
    output: PortRef,
    input: PortRef,
}

impl Cable {
    /// Build a cable between two ports given in either order
    pub fn new(a: PortRef, b: PortRef) -> Result<Self, PatchError> {
        if a.direction == b.direction {
            return Err(PatchError::SameDirection(a.direction));
        }
        let (output, input) = match a.direction {
            Direction::Output => (a, b),
            Direction::Input => (b, a),
        };
        Ok(Self { output, input })
    }

    /// Source port
    pub fn output(&self) -> PortRef {
        self.output
    }

    /// Destination port
    pub fn input(&self) -> PortRef {
        self.input
    }

    /// Whether either end sits on `module`
    pub fn touches(&self, module: ModuleId) -> bool {
        self.output.module == module || self.input.module == module
    }
}

/// Handle to a module for ergonomic port references
#[derive(Debug, Clone)]
pub struct ModuleHandle {
    id: ModuleId,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl ModuleHandle {
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// Reference an output port by name
    ///
    /// # Panics
    ///
    /// Panics if the module has no output with that name.
    pub fn out(&self, name: &str) -> PortRef {
        let index = self
            .outputs
            .iter()
            .position(|n| n == name)
            .unwrap_or_else(|| panic!("Unknown output port: {}", name));
        PortRef::output(self.id, index)
    }

    /// Reference an input port by name
    ///
    /// # Panics
    ///
    /// Panics if the module has no input with that name.
    pub fn in_(&self, name: &str) -> PortRef {
        let index = self
            .inputs
            .iter()
            .position(|n| n == name)
            .unwrap_or_else(|| panic!("Unknown input port: {}", name));
        PortRef::input(self.id, index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ParamRef {
    module: ModuleId,
    index: usize,
}

type ModuleMap = SlotMap<ModuleId, Box<dyn RackModule>>;

/// Container of modules and the cables between them
pub struct Rack {
    id: RackId,
    sample_rate: f64,
    modules: ModuleMap,
    module_order: Vec<ModuleId>,
    cables: SlotMap<CableId, Cable>,
    cable_order: Vec<CableId>,
    tasks: TaskQueue,
    smoothing: Vec<ParamRef>,
    taps: Vec<VoltageTap>,
    tick: u64,
}

impl Rack {
    /// Create an empty rack
    pub fn new(sample_rate: f64) -> Self {
        Self {
            id: RackId::next(),
            sample_rate,
            modules: SlotMap::with_key(),
            module_order: Vec::new(),
            cables: SlotMap::with_key(),
            cable_order: Vec::new(),
            tasks: TaskQueue::new(),
            smoothing: Vec::new(),
            taps: Vec::new(),
            tick: 0,
        }
    }

    /// Create an empty rack at the configured sample rate
    pub fn with_config(config: &RackConfig) -> Self {
        Self::new(config.sample_rate)
    }

    pub fn id(&self) -> RackId {
        self.id
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Number of completed ticks
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Add a module, returning a handle for port lookups
    pub fn add<M: RackModule>(&mut self, module: M) -> ModuleHandle {
        let inputs = module.core().inputs().iter().map(|p| p.name().to_string()).collect();
        let outputs = module.core().outputs().iter().map(|p| p.name().to_string()).collect();
        let id = self.add_module(Box::new(module));
        ModuleHandle {
            id,
            inputs,
            outputs,
        }
    }

    /// Add a boxed module; the rack takes ownership
    pub fn add_module(&mut self, mut module: Box<dyn RackModule>) -> ModuleId {
        let name = module.name().to_string();
        let id = self.modules.insert_with_key(|id| {
            module.on_attach(self.id, id);
            module
        });
        self.module_order.push(id);
        debug!("rack_add: module {name} at index {}", self.module_order.len() - 1);
        id
    }

    /// Remove a module after tearing down every cable on its ports
    ///
    /// Ownership of the module returns to the caller.
    pub fn remove_module(&mut self, id: ModuleId) -> Option<Box<dyn RackModule>> {
        let attached: Vec<CableId> = self
            .modules
            .get(id)?
            .core()
            .ports()
            .flat_map(|p| p.cables().iter().copied())
            .collect();
        for cable in attached {
            self.remove_cable(cable);
        }

        self.module_order.retain(|&m| m != id);
        self.smoothing.retain(|r| r.module != id);
        self.taps.retain(|t| t.port().module != id);
        let module = self.modules.remove(id)?;
        debug!("rack_remove: module {}", module.name());
        Some(module)
    }

    pub fn module_count(&self) -> usize {
        self.module_order.len()
    }

    pub fn cable_count(&self) -> usize {
        self.cable_order.len()
    }

    /// Module ids in processing order
    pub fn module_ids(&self) -> &[ModuleId] {
        &self.module_order
    }

    /// Cable ids in processing order
    pub fn cable_ids(&self) -> &[CableId] {
        &self.cable_order
    }

    pub fn module_at(&self, index: usize) -> Option<ModuleId> {
        self.module_order.get(index).copied()
    }

    /// Current position of a module in processing order
    pub fn index_of(&self, id: ModuleId) -> Option<usize> {
        self.module_order.iter().position(|&m| m == id)
    }

    pub fn contains(&self, id: ModuleId) -> bool {
        self.modules.contains_key(id)
    }

    pub fn get(&self, id: ModuleId) -> Option<&dyn RackModule> {
        self.modules.get(id).map(|m| m.as_ref())
    }

    pub fn get_mut(&mut self, id: ModuleId) -> Option<&mut (dyn RackModule + 'static)> {
        self.modules.get_mut(id).map(|m| m.as_mut())
    }

    pub fn core(&self, id: ModuleId) -> Option<&ModuleCore> {
        self.modules.get(id).map(|m| m.core())
    }

    pub fn core_mut(&mut self, id: ModuleId) -> Option<&mut ModuleCore> {
        self.modules.get_mut(id).map(|m| m.core_mut())
    }

    /// Typed access to a module
    pub fn module<M: RackModule>(&self, id: ModuleId) -> Option<&M> {
        self.modules
            .get(id)
            .and_then(|m| (**m).as_any().downcast_ref::<M>())
    }

    pub fn module_mut<M: RackModule>(&mut self, id: ModuleId) -> Option<&mut M> {
        self.modules
            .get_mut(id)
            .and_then(|m| (**m).as_any_mut().downcast_mut::<M>())
    }

    /// Every module of type `M`, in processing order
    pub fn modules_of<M: RackModule>(&self) -> impl Iterator<Item = (ModuleId, &M)> + '_ {
        self.module_order
            .iter()
            .filter_map(move |&id| self.module::<M>(id).map(|m| (id, m)))
    }

    /// Iterate over all modules in processing order
    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &dyn RackModule)> + '_ {
        self.module_order
            .iter()
            .filter_map(move |&id| self.get(id).map(|m| (id, m)))
    }

    /// First module with the given name
    pub fn find_module(&self, name: &str) -> Option<ModuleId> {
        self.modules().find(|(_, m)| m.name() == name).map(|(id, _)| id)
    }

    pub fn port(&self, port: PortRef) -> Option<&Port> {
        self.modules
            .get(port.module)
            .and_then(|m| m.core().port(port.direction, port.index))
    }

    fn port_mut(&mut self, port: PortRef) -> Result<&mut Port, PatchError> {
        let module = self
            .modules
            .get_mut(port.module)
            .ok_or(PatchError::InvalidModule)?;
        module
            .core_mut()
            .port_mut(port.direction, port.index)
            .ok_or(PatchError::InvalidPort {
                direction: port.direction,
                index: port.index,
            })
    }

    pub fn cable(&self, id: CableId) -> Option<Cable> {
        self.cables.get(id).copied()
    }

    /// Cables in processing order
    pub fn cables(&self) -> impl Iterator<Item = (CableId, Cable)> + '_ {
        self.cable_order
            .iter()
            .filter_map(move |&id| self.cable(id).map(|c| (id, c)))
    }

    /// The cable between two ports, if patched
    pub fn find_cable(&self, a: PortRef, b: PortRef) -> Option<CableId> {
        let wanted = Cable::new(a, b).ok()?;
        self.cables().find(|(_, c)| *c == wanted).map(|(id, _)| id)
    }

    /// Connect two ports given in either order
    ///
    /// Fails without changing the rack if the ports have the same direction,
    /// either port does not exist or the input already carries a cable. On
    /// success the input immediately takes the source voltage.
    pub fn try_add_cable(&mut self, a: PortRef, b: PortRef) -> Result<CableId, PatchError> {
        let cable = Cable::new(a, b).inspect_err(|e| debug!("rack_connect rejected: {e}"))?;
        self.port_mut(cable.output)?;
        if self.port_mut(cable.input)?.is_connected() {
            debug!("rack_connect rejected: input already patched");
            return Err(PatchError::InputOccupied);
        }

        let id = self.cables.insert(cable);
        if let Err(err) = self.attach(id, &cable) {
            self.cables.remove(id);
            return Err(err);
        }
        self.cable_order.push(id);
        transfer(&mut self.modules, &cable);
        debug!(
            "rack_connect: output {} -> input {}",
            cable.output.index, cable.input.index
        );
        Ok(id)
    }

    fn attach(&mut self, id: CableId, cable: &Cable) -> Result<(), PatchError> {
        self.port_mut(cable.input)?.add_cable(id, cable)?;
        let attached = self.port_mut(cable.output).and_then(|p| p.add_cable(id, cable));
        if attached.is_err() {
            if let Ok(input) = self.port_mut(cable.input) {
                input.remove_cable(id, cable);
            }
        }
        attached
    }

    /// Detach a cable from both ports and the rack
    ///
    /// Unknown ids are ignored.
    pub fn remove_cable(&mut self, id: CableId) -> Option<Cable> {
        let cable = self.cables.remove(id)?;
        self.cable_order.retain(|&c| c != id);
        if let Ok(port) = self.port_mut(cable.output) {
            port.remove_cable(id, &cable);
        }
        if let Ok(port) = self.port_mut(cable.input) {
            port.remove_cable(id, &cable);
        }
        debug!("rack_disconnect: cable removed");
        Some(cable)
    }

    /// Set a parameter's raw value immediately
    pub fn set_param(&mut self, module: ModuleId, index: usize, value: f64) -> bool {
        match self.core_mut(module).and_then(|c| c.get_param_mut(index)) {
            Some(param) => {
                param.set_value(value);
                true
            }
            None => false,
        }
    }

    pub fn param_value(&self, module: ModuleId, index: usize) -> Option<f64> {
        self.core(module)
            .and_then(|c| c.get_param(index))
            .map(|p| p.value())
    }

    /// Move a parameter towards `target` over the following ticks
    ///
    /// Registering a parameter that is already smoothing only updates its
    /// target.
    pub fn set_value_smoothed(&mut self, module: ModuleId, index: usize, target: f64) -> bool {
        let Some(param) = self.core_mut(module).and_then(|c| c.get_param_mut(index)) else {
            return false;
        };
        if !param.begin_smoothing(target) {
            return false;
        }
        let entry = ParamRef { module, index };
        if !self.smoothing.contains(&entry) {
            self.smoothing.push(entry);
            debug!("rack_smooth: parameter {index} registered");
        }
        true
    }

    /// Number of parameters currently smoothing
    pub fn smoothing_count(&self) -> usize {
        self.smoothing.len()
    }

    /// Queue shared with other threads
    pub fn dispatcher(&self) -> TaskQueue {
        self.tasks.clone()
    }

    /// Run all queued tasks now
    pub fn drain_tasks(&mut self) -> usize {
        let tasks = self.tasks.clone();
        tasks.drain_and_run(self)
    }

    /// Publish a port's channel 0 voltage after every tick
    pub fn tap(&mut self, port: PortRef) -> Result<Arc<AtomicF64>, PatchError> {
        let voltage = self.port_mut(port)?.voltage();
        let value = Arc::new(AtomicF64::new(voltage));
        self.taps.push(VoltageTap::new(port, Arc::clone(&value)));
        Ok(value)
    }

    /// Stop publishing to a value returned by [`Rack::tap`]
    ///
    /// Other taps on the same port keep running. Returns false if the tap
    /// was already gone.
    pub fn untap(&mut self, value: &Arc<AtomicF64>) -> bool {
        let before = self.taps.len();
        self.taps.retain(|t| !t.publishes_to(value));
        let removed = self.taps.len() != before;
        if removed {
            debug!("rack_untap: {} taps left", self.taps.len());
        }
        removed
    }

    /// Process one tick with an externally supplied context
    pub fn process(&mut self, ctx: &ProcessContext) {
        self.drain_tasks();
        self.advance_smoothing();

        for &id in &self.module_order {
            if let Some(module) = self.modules.get_mut(id) {
                module.process_ports(ctx);
            }
        }

        for &id in &self.cable_order {
            if let Some(cable) = self.cables.get(id) {
                transfer(&mut self.modules, cable);
            }
        }

        for &id in &self.module_order {
            if let Some(module) = self.modules.get_mut(id) {
                module.process(ctx);
            }
        }

        for tap in &self.taps {
            let port = tap.port();
            if let Some(p) = self
                .modules
                .get(port.module)
                .and_then(|m| m.core().port(port.direction, port.index))
            {
                tap.publish(p.voltage());
            }
        }

        self.tick += 1;
    }

    /// Process one tick using the rack's own tick counter and sample rate
    pub fn tick(&mut self) {
        let ctx = ProcessContext {
            tick: self.tick,
            time: self.tick as f64 / self.sample_rate,
            sample_rate: self.sample_rate,
        };
        self.process(&ctx);
    }

    fn advance_smoothing(&mut self) {
        let modules = &mut self.modules;
        self.smoothing.retain(|r| {
            modules
                .get_mut(r.module)
                .and_then(|m| m.core_mut().get_param_mut(r.index))
                .is_some_and(|p| p.advance_smoothing())
        });
    }

    /// Find this rack or a rack nested below it
    pub fn find_rack(&self, id: RackId) -> Option<&Rack> {
        if self.id == id {
            return Some(self);
        }
        self.modules()
            .filter_map(|(_, m)| m.sub_rack())
            .find_map(|r| r.find_rack(id))
    }

    pub fn find_rack_mut(&mut self, id: RackId) -> Option<&mut Rack> {
        if self.id == id {
            return Some(self);
        }
        self.modules
            .values_mut()
            .find_map(|m| m.sub_rack_mut().and_then(|r| r.find_rack_mut(id)))
    }
}

impl fmt::Debug for Rack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rack")
            .field("id", &self.id)
            .field("modules", &self.module_order.len())
            .field("cables", &self.cable_order.len())
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

/// Copy every channel of the cable's source into its destination
#[inline]
fn transfer(modules: &mut ModuleMap, cable: &Cable) {
    let source = match modules
        .get(cable.output.module)
        .and_then(|m| m.core().port(Direction::Output, cable.output.index))
    {
        Some(port) => *port.channels(),
        None => return,
    };
    if let Some(port) = modules
        .get_mut(cable.input.module)
        .and_then(|m| m.core_mut().port_mut(Direction::Input, cable.input.index))
    {
        port.copy_channels_from(&source);
    }
}
