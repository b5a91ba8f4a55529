//! Nested Racks
//!
//! A [`ParentConnector`] owns a private child [`Rack`] containing one
//! [`ChildConnector`]. Every tick the parent copies its inputs onto the child
//! connector's outputs, processes the whole child rack, then copies the
//! child connector's inputs back onto its own outputs.
//!
//! ```text
//!   parent rack                         child rack
//!   ┌──────────────────┐  Input1..6 ─▶ ┌──────────────────┐
//!   │ ParentConnector  │               │ ChildConnector   │──▶ child modules
//!   │  (owns child)    │ ◀─ Output1..4 │  Input1..4       │◀── child modules
//!   └──────────────────┘               └──────────────────┘
//! ```
//!
//! The child connector refers back to its parent through a [`ParentLink`],
//! resolved with [`Rack::find_rack`] from the root.

use crate::module::{ModuleCore, ProcessContext, RackModule, DEFAULT_SAMPLE_RATE};
use crate::param::Parameter;
use crate::port::Direction;
use crate::rack::{ModuleId, Rack, RackId};
use tracing::debug;

/// Non-owning reference from a child connector to its parent connector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentLink {
    /// Rack holding the parent connector
    pub rack: RackId,
    /// Parent connector within that rack
    pub module: ModuleId,
}

/// Entry point of a child rack
///
/// Its outputs carry the parent's inputs; its inputs become the parent's
/// outputs. It does no processing of its own.
pub struct ChildConnector {
    core: ModuleCore,
    parent: Option<ParentLink>,
}

impl ChildConnector {
    pub const SWITCH_TO_PARENT: usize = 0;

    pub const INPUTS: usize = 4;
    pub const OUTPUTS: usize = 8;

    pub fn new() -> Self {
        let mut core = ModuleCore::new("RackChildConnector")
            .with_param(Parameter::button("SwitchToParent"));
        for n in 1..=Self::INPUTS {
            core = core.with_input(format!("Input{n}"));
        }
        for n in 1..=Self::OUTPUTS {
            core = core.with_output(format!("Output{n}"));
        }
        Self { core, parent: None }
    }

    /// The connector this child rack belongs to, once attached
    pub fn parent(&self) -> Option<ParentLink> {
        self.parent
    }
}

impl Default for ChildConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl RackModule for ChildConnector {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn process(&mut self, _ctx: &ProcessContext) {}
}

/// Module embedding a child rack
pub struct ParentConnector {
    core: ModuleCore,
    child: Rack,
    child_connector: ModuleId,
    link: Option<ParentLink>,
    trigger_held: bool,
}

impl ParentConnector {
    pub const SWITCH_TO_CHILD: usize = 0;
    pub const TRIGGER: usize = 1;

    pub const TRIGGER_IN: usize = 0;
    pub const VELOCITY_IN: usize = 1;

    /// Parent inputs, copied to child connector outputs 1–8
    pub const INPUTS: usize = 8;
    /// Parent outputs, copied from child connector inputs 1–4
    pub const OUTPUTS: usize = 4;

    pub fn new() -> Self {
        let mut core = ModuleCore::new("RackParentConnector")
            .with_param(Parameter::button("SwitchToChild"))
            .with_param(Parameter::button("Trigger"))
            .with_input("Trigger")
            .with_input("Velocity");
        for n in 1..=Self::INPUTS - 2 {
            core = core.with_input(format!("Input{n}"));
        }
        for n in 1..=Self::OUTPUTS {
            core = core.with_output(format!("Output{n}"));
        }

        let mut child = Rack::new(DEFAULT_SAMPLE_RATE);
        let child_connector = child.add(ChildConnector::new()).id();
        Self {
            core,
            child,
            child_connector,
            link: None,
            trigger_held: false,
        }
    }

    pub fn child_rack(&self) -> &Rack {
        &self.child
    }

    pub fn child_rack_mut(&mut self) -> &mut Rack {
        &mut self.child
    }

    /// The child connector inside the child rack
    pub fn child_connector(&self) -> ModuleId {
        self.child_connector
    }

    fn link_child(&mut self) {
        let link = self.link;
        if let Some(child) = self.child.module_mut::<ChildConnector>(self.child_connector) {
            child.parent = link;
        }
    }
}

impl Default for ParentConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl RackModule for ParentConnector {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    fn process(&mut self, ctx: &ProcessContext) {
        let trigger = self.core.param(Self::TRIGGER);
        let held = trigger.is_toggle_up();
        if held != self.trigger_held {
            self.trigger_held = held;
            let v = if held { trigger.max() } else { trigger.min() };
            self.core.input_mut(Self::TRIGGER_IN).set_voltage(v);
        }

        if let Some(child) = self.child.core_mut(self.child_connector) {
            for i in 0..Self::INPUTS {
                if let Some(out) = child.port_mut(Direction::Output, i) {
                    out.copy_channels_from(self.core.input(i).channels());
                }
            }
        }

        self.child.process(ctx);

        if let Some(child) = self.child.core(self.child_connector) {
            for i in 0..Self::OUTPUTS {
                if let Some(input) = child.port(Direction::Input, i) {
                    self.core.output_mut(i).copy_channels_from(input.channels());
                }
            }
        }
    }

    fn on_attach(&mut self, rack: RackId, id: ModuleId) {
        self.link = Some(ParentLink { rack, module: id });
        self.link_child();
    }

    fn sub_rack(&self) -> Option<&Rack> {
        Some(&self.child)
    }

    fn sub_rack_mut(&mut self) -> Option<&mut Rack> {
        Some(&mut self.child)
    }

    /// Adopt `rack` as the child if it contains a child connector
    fn replace_sub_rack(&mut self, rack: Rack) -> bool {
        let Some((id, _)) = rack.modules_of::<ChildConnector>().next() else {
            debug!("connector: replacement rack has no child connector, keeping current");
            return false;
        };
        self.child = rack;
        self.child_connector = id;
        self.link_child();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::Amplifier;
    use crate::port::PortRef;

    #[test]
    fn test_ports_and_names() {
        let parent = ParentConnector::new();
        assert_eq!(parent.name(), "RackParentConnector");
        assert_eq!(parent.core().inputs().len(), 8);
        assert_eq!(parent.core().find_input("Input6"), Some(7));
        assert_eq!(parent.core().outputs().len(), 4);
        assert_eq!(parent.child_rack().module_count(), 1);

        let child = ChildConnector::new();
        assert_eq!(child.name(), "RackChildConnector");
        assert_eq!(child.core().inputs().len(), 4);
        assert_eq!(child.core().outputs().len(), 8);
    }

    #[test]
    fn test_signal_round_trip_through_child() {
        let mut parent = ParentConnector::new();
        let child_id = parent.child_connector();
        let child = parent.child_rack_mut();
        let amp = child.add(Amplifier::new());
        child
            .try_add_cable(PortRef::output(child_id, 2), amp.in_("Left"))
            .unwrap();
        child
            .try_add_cable(amp.out("Left"), PortRef::input(child_id, 0))
            .unwrap();

        let mut rack = Rack::new(44100.0);
        let p = rack.add(parent);
        rack.core_mut(p.id()).unwrap().input_mut(2).set_voltage(4.0);

        rack.tick();
        assert_eq!(rack.port(p.out("Output1")).unwrap().voltage(), 0.0);
        rack.tick();
        assert_eq!(rack.port(p.out("Output1")).unwrap().voltage(), 4.0);
    }

    #[test]
    fn test_trigger_button_drives_trigger_input() {
        let mut rack = Rack::new(44100.0);
        let p = rack.add(ParentConnector::new());
        rack.set_param(p.id(), ParentConnector::TRIGGER, 1.0);
        rack.tick();

        let parent = rack.module::<ParentConnector>(p.id()).unwrap();
        let child = parent.child_rack().core(parent.child_connector()).unwrap();
        assert_eq!(child.output(0).voltage(), 1.0);

        rack.set_param(p.id(), ParentConnector::TRIGGER, 0.0);
        rack.tick();
        let parent = rack.module::<ParentConnector>(p.id()).unwrap();
        let child = parent.child_rack().core(parent.child_connector()).unwrap();
        assert_eq!(child.output(0).voltage(), 0.0);
    }

    #[test]
    fn test_child_links_back_to_parent() {
        let mut rack = Rack::new(44100.0);
        let p = rack.add(ParentConnector::new());

        let parent = rack.module::<ParentConnector>(p.id()).unwrap();
        let child_rack = parent.child_rack().id();
        let link = parent
            .child_rack()
            .module::<ChildConnector>(parent.child_connector())
            .unwrap()
            .parent()
            .unwrap();
        assert_eq!(link, ParentLink { rack: rack.id(), module: p.id() });

        let nested = rack.find_rack(child_rack).unwrap();
        assert_eq!(nested.module_count(), 1);
        assert!(rack.find_rack_mut(child_rack).is_some());
        assert_eq!(rack.find_rack(link.rack).map(|r| r.id()), Some(rack.id()));
    }

    #[test]
    fn test_replace_sub_rack_requires_child_connector() {
        let mut rack = Rack::new(44100.0);
        let p = rack.add(ParentConnector::new());
        let parent = rack.get_mut(p.id()).unwrap();

        assert!(!parent.replace_sub_rack(Rack::new(44100.0)));

        let mut replacement = Rack::new(44100.0);
        replacement.add(Amplifier::new());
        let child_id = replacement.add(ChildConnector::new()).id();
        let replacement_id = replacement.id();
        assert!(parent.replace_sub_rack(replacement));

        let parent = rack.module::<ParentConnector>(p.id()).unwrap();
        assert_eq!(parent.child_rack().id(), replacement_id);
        assert_eq!(parent.child_connector(), child_id);
        let child = parent.child_rack().module::<ChildConnector>(child_id).unwrap();
        assert_eq!(child.parent().map(|l| l.module), Some(p.id()));
    }

    #[test]
    fn test_child_processes_while_parent_runs() {
        let mut rack = Rack::new(44100.0);
        let p = rack.add(ParentConnector::new());
        for _ in 0..5 {
            rack.tick();
        }
        let parent = rack.module::<ParentConnector>(p.id()).unwrap();
        assert_eq!(parent.child_rack().tick_count(), 5);
    }
}
