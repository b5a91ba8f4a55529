//! Console Commands
//!
//! A small line-oriented command language for inspecting and editing a rack
//! without a GUI.
//!
//! | Command         | Effect                                   |
//! |-----------------|------------------------------------------|
//! | `save <path>`   | write the rack document                  |
//! | `load <path>`   | append a rack document                   |
//! | `types`         | list registered module types             |
//! | `add <name>`    | add a module by type name                |
//! | `list`          | list modules in processing order         |
//! | `remove <n>`    | remove the module at index `n`           |
//! | `help`          | show this table                          |
//!
//! A command runs in three steps so the audio thread never touches the
//! filesystem:
//!
//! 1. [`Command::prepare`] on the console thread reads and parses `load` files.
//! 2. [`Request::apply`] inside a rack task edits the rack or snapshots it.
//! 3. [`Reply::complete`] back on the console thread writes `save` files.
//!
//! [`Command::execute`] chains all three for single-threaded callers.

use crate::error::DocumentError;
use crate::rack::Rack;
use crate::registry::ModuleRegistry;
use crate::serialize::RackDocument;
use std::fmt::Write as _;
use std::path::PathBuf;
use thiserror::Error;

const HELP: &str = "\
save <path>   write the rack to a JSON file
load <path>   append a JSON rack file
types         list module types
add <name>    add a module
list          list modules
remove <n>    remove module at index n
help          show this help";

/// Errors raised while parsing or executing a console command
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}', try 'help'")]
    UnknownCommand(String),

    #[error("'{0}' needs an argument")]
    MissingArgument(&'static str),

    #[error("no module at index {0}")]
    InvalidIndex(String),

    #[error("unknown module type '{0}'")]
    UnknownModuleType(String),

    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// A parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Save(PathBuf),
    Load(PathBuf),
    Types,
    Add(String),
    List,
    Remove(usize),
    Help,
}

impl Command {
    /// Parse one input line; arguments run to the end of the line
    pub fn parse(line: &str) -> Result<Self, ConsoleError> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        if word.is_empty() {
            return Err(ConsoleError::Empty);
        }

        let argument = |name: &'static str| {
            if rest.is_empty() {
                Err(ConsoleError::MissingArgument(name))
            } else {
                Ok(rest)
            }
        };

        match word.to_ascii_lowercase().as_str() {
            "save" => Ok(Command::Save(argument("save")?.into())),
            "load" => Ok(Command::Load(argument("load")?.into())),
            "types" => Ok(Command::Types),
            "add" => Ok(Command::Add(argument("add")?.to_string())),
            "list" => Ok(Command::List),
            "remove" => {
                let index = argument("remove")?;
                index
                    .parse()
                    .map(Command::Remove)
                    .map_err(|_| ConsoleError::InvalidIndex(index.to_string()))
            }
            "help" => Ok(Command::Help),
            _ => Err(ConsoleError::UnknownCommand(word.to_string())),
        }
    }

    /// Do the file reading a command needs, off the audio thread
    pub fn prepare(self) -> Result<Request, ConsoleError> {
        Ok(match self {
            Command::Save(path) => Request::Snapshot(path),
            Command::Load(path) => {
                let document = RackDocument::read(&path)?;
                Request::Append(Box::new(document))
            }
            Command::Types => Request::Types,
            Command::Add(name) => Request::Add(name),
            Command::List => Request::List,
            Command::Remove(index) => Request::Remove(index),
            Command::Help => Request::Help,
        })
    }

    /// Run the command to completion on the calling thread
    ///
    /// `save` and `load` block on file I/O here, so use [`prepare`](Self::prepare)
    /// and a rack task instead when the rack is ticking on another thread.
    pub fn execute(
        self,
        rack: &mut Rack,
        registry: &ModuleRegistry,
    ) -> Result<String, ConsoleError> {
        self.prepare()?.apply(rack, registry)?.complete()
    }
}

/// The rack-side part of a command, safe to run inside a rack task
#[derive(Debug)]
pub enum Request {
    /// Capture the rack for saving to the path
    Snapshot(PathBuf),
    /// Append an already parsed document
    Append(Box<RackDocument>),
    Types,
    Add(String),
    List,
    Remove(usize),
    Help,
}

impl Request {
    /// Apply to the rack without touching the filesystem
    pub fn apply(self, rack: &mut Rack, registry: &ModuleRegistry) -> Result<Reply, ConsoleError> {
        let text = match self {
            Request::Snapshot(path) => {
                return Ok(Reply::Save {
                    path,
                    document: rack.to_document(),
                })
            }
            Request::Append(document) => {
                let report = rack.append_document(&document, registry);
                let skipped =
                    report.modules_skipped + report.cables_skipped + report.parameters_skipped;
                format!(
                    "loaded {} modules and {} cables ({} skipped)",
                    report.modules_added, report.cables_added, skipped
                )
            }
            Request::Types => registry.names().collect::<Vec<_>>().join("\n"),
            Request::Add(name) => {
                let module = registry
                    .create_instance(&name)
                    .ok_or_else(|| ConsoleError::UnknownModuleType(name.clone()))?;
                rack.add_module(module);
                format!("added {} at {}", name, rack.module_count() - 1)
            }
            Request::List => {
                let mut out = String::new();
                for (i, (_, module)) in rack.modules().enumerate() {
                    if i > 0 {
                        out.push('\n');
                    }
                    let _ = write!(out, "{i}: {}", module.name());
                }
                out
            }
            Request::Remove(index) => {
                let id = rack
                    .module_at(index)
                    .ok_or_else(|| ConsoleError::InvalidIndex(index.to_string()))?;
                let name = rack
                    .remove_module(id)
                    .map(|m| m.name().to_string())
                    .unwrap_or_default();
                format!("removed {name}")
            }
            Request::Help => HELP.to_string(),
        };
        Ok(Reply::Text(text))
    }
}

/// What a request hands back to the console thread
#[derive(Debug)]
pub enum Reply {
    Text(String),
    /// A snapshot still to be written
    Save { path: PathBuf, document: RackDocument },
}

impl Reply {
    /// Finish off the audio thread, writing any snapshot to disk
    pub fn complete(self) -> Result<String, ConsoleError> {
        match self {
            Reply::Text(text) => Ok(text),
            Reply::Save { path, document } => {
                document.write(&path)?;
                Ok(format!(
                    "saved {} modules to {}",
                    document.modules.len(),
                    path.display()
                ))
            }
        }
    }
}

/// Parse and execute one line
pub fn run_line(
    line: &str,
    rack: &mut Rack,
    registry: &ModuleRegistry,
) -> Result<String, ConsoleError> {
    Command::parse(line)?.execute(rack, registry)
}
