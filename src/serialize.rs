//! Serialization and Persistence
//!
//! Racks are saved as JSON documents mirroring the rack tree:
//!
//! ```json
//! {
//!   "version": 1,
//!   "modules": [
//!     { "id": 0, "position": { "x": 0, "y": 0 }, "name": "VCO",
//!       "parameters": [ { "id": 0, "value": 261.6 } ] }
//!   ],
//!   "cables": [
//!     { "inputModuleId": 1, "inputPortId": 0, "outputModuleId": 0, "outputPortId": 0 }
//!   ]
//! }
//! ```
//!
//! Module ids are positions in the saved rack. Parameter values are stored
//! in display units. Loading appends to the target rack; records that cannot
//! be resolved are skipped and counted in the [`LoadReport`].

use crate::error::DocumentError;
use crate::module::Position;
use crate::port::PortRef;
use crate::rack::{ModuleId, Rack};
use crate::registry::ModuleRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Document schema version written by this crate
pub const DOCUMENT_VERSION: u32 = 1;

/// Serializable rack topology
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RackDocument {
    /// Schema version for forward compatibility
    #[serde(default)]
    pub version: u32,

    #[serde(default)]
    pub modules: Vec<ModuleRecord>,

    #[serde(default)]
    pub cables: Vec<CableRecord>,
}

impl RackDocument {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Read and parse a JSON file
    pub fn read(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| DocumentError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_json(&json)?)
    }

    /// Write the document as pretty-printed JSON
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), DocumentError> {
        let path = path.as_ref();
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|source| DocumentError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// One module instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRecord {
    /// Index of the module in the saved rack
    pub id: usize,

    #[serde(default)]
    pub position: Position,

    /// Registered module type name
    pub name: String,

    #[serde(default)]
    pub parameters: Vec<ParameterRecord>,

    /// Child rack of a connector module
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_rack: Option<RackDocument>,
}

/// One parameter value in display units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterRecord {
    pub id: usize,
    pub value: f64,
}

/// One cable, by module and port index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CableRecord {
    pub input_module_id: usize,
    pub input_port_id: usize,
    pub output_module_id: usize,
    pub output_port_id: usize,
}

/// Outcome of appending a document to a rack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub modules_added: usize,
    pub cables_added: usize,
    /// Records naming an unregistered module type
    pub modules_skipped: usize,
    /// Cables with unresolved endpoints or rejected by the rack
    pub cables_skipped: usize,
    /// Parameter ids the module does not have
    pub parameters_skipped: usize,
}

impl LoadReport {
    /// Whether every record was applied
    pub fn is_complete(&self) -> bool {
        self.modules_skipped == 0 && self.cables_skipped == 0 && self.parameters_skipped == 0
    }

    fn merge(&mut self, other: LoadReport) {
        self.modules_added += other.modules_added;
        self.cables_added += other.cables_added;
        self.modules_skipped += other.modules_skipped;
        self.cables_skipped += other.cables_skipped;
        self.parameters_skipped += other.parameters_skipped;
    }
}

/// Extension methods for Rack to support persistence
impl Rack {
    /// Capture the rack (and nested racks) as a document
    pub fn to_document(&self) -> RackDocument {
        let modules = self
            .modules()
            .enumerate()
            .map(|(index, (_, module))| {
                let core = module.core();
                ModuleRecord {
                    id: index,
                    position: core.position(),
                    name: module.name().to_string(),
                    parameters: core
                        .params()
                        .iter()
                        .enumerate()
                        .map(|(id, p)| ParameterRecord {
                            id,
                            value: p.display_value(),
                        })
                        .collect(),
                    sub_rack: module.sub_rack().map(Rack::to_document),
                }
            })
            .collect();

        let cables = self
            .cables()
            .filter_map(|(_, cable)| {
                Some(CableRecord {
                    input_module_id: self.index_of(cable.input().module)?,
                    input_port_id: cable.input().index,
                    output_module_id: self.index_of(cable.output().module)?,
                    output_port_id: cable.output().index,
                })
            })
            .collect();

        RackDocument {
            version: DOCUMENT_VERSION,
            modules,
            cables,
        }
    }

    /// Append every resolvable record of `document` to this rack
    ///
    /// Existing modules and cables are left untouched. Document module ids
    /// are remapped onto the newly created modules.
    pub fn append_document(
        &mut self,
        document: &RackDocument,
        registry: &ModuleRegistry,
    ) -> LoadReport {
        let mut report = LoadReport::default();
        let mut ids: HashMap<usize, ModuleId> = HashMap::new();

        for record in &document.modules {
            let Some(mut module) = registry.create_instance(&record.name) else {
                warn!("load: skipping unknown module type '{}'", record.name);
                report.modules_skipped += 1;
                continue;
            };

            let core = module.core_mut();
            core.set_position(record.position);
            for param in &record.parameters {
                match core.get_param_mut(param.id) {
                    Some(p) => p.set_display_value(param.value),
                    None => {
                        warn!(
                            "load: module '{}' has no parameter {}",
                            record.name, param.id
                        );
                        report.parameters_skipped += 1;
                    }
                }
            }

            if let Some(sub) = &record.sub_rack {
                let mut child = Rack::new(self.sample_rate());
                report.merge(child.append_document(sub, registry));
                if !module.replace_sub_rack(child) {
                    warn!("load: sub-rack of '{}' was not adopted", record.name);
                }
            }

            let id = self.add_module(module);
            ids.insert(record.id, id);
            report.modules_added += 1;
        }

        for cable in &document.cables {
            let (Some(&output), Some(&input)) = (
                ids.get(&cable.output_module_id),
                ids.get(&cable.input_module_id),
            ) else {
                warn!(
                    "load: skipping cable {}:{} -> {}:{} with unknown module",
                    cable.output_module_id,
                    cable.output_port_id,
                    cable.input_module_id,
                    cable.input_port_id
                );
                report.cables_skipped += 1;
                continue;
            };

            match self.try_add_cable(
                PortRef::output(output, cable.output_port_id),
                PortRef::input(input, cable.input_port_id),
            ) {
                Ok(_) => report.cables_added += 1,
                Err(err) => {
                    warn!("load: skipping cable: {err}");
                    report.cables_skipped += 1;
                }
            }
        }

        debug!(
            "load: {} modules, {} cables appended",
            report.modules_added, report.cables_added
        );
        report
    }

    /// Write the rack document to a JSON file
    ///
    /// Blocks on file I/O, so never call it from a rack task.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<(), DocumentError> {
        self.to_document().write(path)
    }

    /// Parse a JSON file and append it to the rack
    ///
    /// The whole document is parsed before any module is created, so a
    /// malformed file leaves the rack unchanged. Blocks on file I/O, so
    /// never call it from a rack task.
    pub fn load_from_path(
        &mut self,
        path: impl AsRef<Path>,
        registry: &ModuleRegistry,
    ) -> Result<LoadReport, DocumentError> {
        let document = RackDocument::read(path)?;
        Ok(self.append_document(&document, registry))
    }
}
