use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::net::io;
use crate::net::{Net, PlaceId};
use crate::payload::Value;
use crate::process::{Annihilator, Collector, Generator, Mediator};

/// Queue capacities used when a net runs.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Capacity of each place's input and output queue.
    #[serde(default = "default_buffer")]
    pub place_buffer: usize,
    /// Capacity of each fabric's per-receiver queue.
    #[serde(default = "default_buffer")]
    pub receiver_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            place_buffer: default_buffer(),
            receiver_buffer: default_buffer(),
        }
    }
}

impl RuntimeConfig {
    /// Every queue holds at least one token.
    pub fn normalized(self) -> Self {
        Self {
            place_buffer: self.place_buffer.max(1),
            receiver_buffer: self.receiver_buffer.max(1),
        }
    }
}

// A one-slot queue stands in for an unbuffered hand-off.
fn default_buffer() -> usize {
    1
}

fn default_step() -> i64 {
    1
}

/// Process function of a place in a definition file.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProcessSpec {
    /// Emits `Int` values `from..to` by `step`.
    Generator {
        from: i64,
        to: i64,
        #[serde(default = "default_step")]
        step: i64,
    },
    /// Emits the listed values in order.
    Values { values: Vec<Value> },
    Mediator {
        #[serde(default)]
        label: Option<String>,
    },
    Annihilator {
        #[serde(default)]
        label: Option<String>,
    },
    /// Annihilator printing every token, labelled with the place id unless given.
    Printer {
        #[serde(default)]
        label: Option<String>,
    },
    Collector {
        #[serde(default)]
        limit: Option<usize>,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PlaceSpec {
    pub id: PlaceId,
    pub process: ProcessSpec,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TransitionSpec {
    pub id: String,
    pub from: Vec<PlaceId>,
    pub to: Vec<PlaceId>,
}

/// A net described in TOML, JSON or RON.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NetDefinition {
    pub id: String,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default, rename = "place")]
    pub places: Vec<PlaceSpec>,
    #[serde(default, rename = "transition")]
    pub transitions: Vec<TransitionSpec>,
}

/// A net built from a definition, with handles to its collector places.
pub struct BuiltNet {
    pub net: Net<Value>,
    pub collectors: IndexMap<PlaceId, Collector<Value>>,
}

impl NetDefinition {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let definition: NetDefinition = io::read_path(path)
            .with_context(|| format!("Failed to load net definition: {:?}", path))?;
        Ok(definition)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        io::write_path(path, self)
            .with_context(|| format!("Failed to write net definition: {:?}", path))
    }

    pub fn build(&self) -> Result<Net<Value>> {
        Ok(self.build_with_collectors()?.net)
    }

    pub fn build_with_collectors(&self) -> Result<BuiltNet> {
        let net = Net::with_config(self.id.clone(), self.runtime);
        let mut collectors = IndexMap::new();
        for place in &self.places {
            let id = place.id.clone();
            let added = match &place.process {
                ProcessSpec::Generator { from, to, step } => {
                    net.add_place(id.clone(), Generator::range(*from, *to, *step, Value::Int))
                }
                ProcessSpec::Values { values } => {
                    net.add_place(id.clone(), Generator::values(values.clone()))
                }
                ProcessSpec::Mediator { label: None } => net.add_place(id.clone(), Mediator::new()),
                ProcessSpec::Mediator { label: Some(label) } => {
                    net.add_place(id.clone(), Mediator::printing(label.clone()))
                }
                ProcessSpec::Annihilator { label: None } => {
                    net.add_place(id.clone(), Annihilator::new())
                }
                ProcessSpec::Annihilator { label: Some(label) }
                | ProcessSpec::Printer { label: Some(label) } => {
                    net.add_place(id.clone(), Annihilator::printing(label.clone()))
                }
                ProcessSpec::Printer { label: None } => {
                    net.add_place(id.clone(), Annihilator::printing(id.to_string()))
                }
                ProcessSpec::Collector { limit } => {
                    let collector = match limit {
                        Some(limit) => Collector::take(*limit),
                        None => Collector::new(),
                    };
                    collectors.insert(id.clone(), collector.clone());
                    net.add_place(id.clone(), collector)
                }
            };
            added.with_context(|| format!("Invalid place {} in net {}", id, self.id))?;
        }
        for transition in &self.transitions {
            net.add_transition(
                transition.id.as_str(),
                transition.from.iter(),
                transition.to.iter(),
            )
            .with_context(|| format!("Invalid transition {} in net {}", transition.id, self.id))?;
        }
        Ok(BuiltNet { net, collectors })
    }
}

/// Definition files directly inside `dir`, sorted by path.
pub fn list_definitions<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read directory: {:?}", dir))?;
    let mut found = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("Failed to read directory: {:?}", dir))?
            .path();
        let known = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| io::Format::EXTENSIONS.contains(&ext));
        if known && path.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}
