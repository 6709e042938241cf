//! Environment model: immutable-by-convention snapshots of everything the
//! unit under test can observe.
//!
//! Snapshots are plain values. `Clone` is the structural copy used at every
//! sequence-generation boundary, and the `with_*` methods are the
//! copy-with-override transitions: they consume `&self` and return a new
//! [`State`], leaving the original untouched.

pub mod container;
pub mod model;
pub mod network;
pub mod relation;
pub mod status;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

pub use container::{container, ContainerSpec, ExecOutput, ExecTable, FsNode, Layer};
pub use model::Model;
pub use network::{network, Address, BindAddress, Network, NetworkBuilder, NetworkSpec};
pub use relation::{relation, Databag, RelationBuilder, RelationMeta, RelationSpec};
pub use status::{Status, StatusKind};

use crate::error::{ScenarioError, ScenarioResult};

/// A configuration option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// Boolean option.
    Bool(bool),
    /// Integer option.
    Int(i64),
    /// Float option.
    Float(f64),
    /// String option.
    Str(String),
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// One line written through the `juju-log` tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Log level as given by the unit (`DEBUG`, `INFO`, ...).
    pub level: String,
    /// Message.
    pub message: String,
}

/// Full environment snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Configuration options.
    #[serde(default)]
    pub config: BTreeMap<String, ConfigValue>,
    /// Relations, in declaration order.
    #[serde(default)]
    pub relations: Vec<RelationSpec>,
    /// Network bindings.
    #[serde(default)]
    pub networks: Vec<NetworkSpec>,
    /// Workload containers.
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    /// Reported status.
    #[serde(default)]
    pub status: Status,
    /// Leadership flag.
    #[serde(default)]
    pub leader: bool,
    /// Model identity.
    #[serde(default)]
    pub model: Model,
    /// Lines logged by the unit.
    #[serde(default)]
    pub juju_log: Vec<LogEntry>,
    /// Agent protocol version.
    #[serde(default = "default_juju_version")]
    pub juju_version: String,
    /// Unit number.
    #[serde(default = "default_unit_id")]
    pub unit_id: String,
    /// Application name.
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

fn default_juju_version() -> String {
    "3.0.0".to_string()
}

fn default_unit_id() -> String {
    "0".to_string()
}

fn default_app_name() -> String {
    "local".to_string()
}

impl Default for State {
    fn default() -> Self {
        Self {
            config: BTreeMap::new(),
            relations: Vec::new(),
            networks: Vec::new(),
            containers: Vec::new(),
            status: Status::default(),
            leader: false,
            model: Model::default(),
            juju_log: Vec::new(),
            juju_version: default_juju_version(),
            unit_id: default_unit_id(),
            app_name: default_app_name(),
        }
    }
}

impl State {
    /// Create an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unit name, `<app>/<unit id>`.
    #[must_use]
    pub fn unit_name(&self) -> String {
        format!("{}/{}", self.app_name, self.unit_id)
    }

    /// Copy with the leadership flag replaced.
    #[must_use]
    pub fn with_leadership(&self, leader: bool) -> Self {
        Self {
            leader,
            ..self.clone()
        }
    }

    /// Copy with the unit status replaced.
    #[must_use]
    pub fn with_unit_status(&self, kind: StatusKind, message: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.status.unit = (kind, message.into());
        next
    }

    /// Copy with the application status replaced.
    #[must_use]
    pub fn with_app_status(&self, kind: StatusKind, message: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.status.app = (kind, message.into());
        next
    }

    /// Copy with one container's connectivity replaced. Unknown names leave
    /// the containers unchanged.
    #[must_use]
    pub fn with_can_connect(&self, container_name: &str, can_connect: bool) -> Self {
        let containers = self
            .containers
            .iter()
            .map(|c| {
                if c.name == container_name {
                    c.clone().with_can_connect(can_connect)
                } else {
                    c.clone()
                }
            })
            .collect();
        Self {
            containers,
            ..self.clone()
        }
    }

    /// Copy with the relations replaced.
    #[must_use]
    pub fn with_relations(&self, relations: impl IntoIterator<Item = RelationSpec>) -> Self {
        Self {
            relations: relations.into_iter().collect(),
            ..self.clone()
        }
    }

    /// Copy with the containers replaced.
    #[must_use]
    pub fn with_containers(&self, containers: impl IntoIterator<Item = ContainerSpec>) -> Self {
        Self {
            containers: containers.into_iter().collect(),
            ..self.clone()
        }
    }

    /// Copy with the networks replaced.
    #[must_use]
    pub fn with_networks(&self, networks: impl IntoIterator<Item = NetworkSpec>) -> Self {
        Self {
            networks: networks.into_iter().collect(),
            ..self.clone()
        }
    }

    /// Copy with one configuration option set.
    #[must_use]
    pub fn with_config(&self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        let mut next = self.clone();
        next.config.insert(key.into(), value.into());
        next
    }

    /// Look up a container by name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no container has this name.
    pub fn get_container(&self, name: &str) -> ScenarioResult<&ContainerSpec> {
        self.containers
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| ScenarioError::not_found("container", name))
    }

    /// Look up a relation by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no relation has this id.
    pub fn get_relation(&self, relation_id: u32) -> ScenarioResult<&RelationSpec> {
        self.relations
            .iter()
            .find(|r| r.relation_id() == relation_id)
            .ok_or_else(|| ScenarioError::not_found("relation", relation_id.to_string()))
    }

    pub(crate) fn get_relation_mut(&mut self, relation_id: u32) -> ScenarioResult<&mut RelationSpec> {
        self.relations
            .iter_mut()
            .find(|r| r.relation_id() == relation_id)
            .ok_or_else(|| ScenarioError::not_found("relation", relation_id.to_string()))
    }

    /// All relations bound to `endpoint`, in declaration order.
    pub fn relations_for<'a>(&'a self, endpoint: &'a str) -> impl Iterator<Item = &'a RelationSpec> {
        self.relations.iter().filter(move |r| r.endpoint() == endpoint)
    }

    /// Look up the network bound to `endpoint`, falling back to the
    /// default binding.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if neither exists.
    pub fn get_network(&self, endpoint: &str) -> ScenarioResult<&NetworkSpec> {
        self.networks
            .iter()
            .find(|n| n.name == endpoint)
            .or_else(|| self.networks.iter().find(|n| n.is_default))
            .ok_or_else(|| ScenarioError::not_found("network", endpoint))
    }

    /// Check the snapshot invariants.
    ///
    /// # Errors
    ///
    /// Returns a configuration error on duplicate relation ids, duplicate
    /// container names, or any invalid relation or network.
    pub fn validate(&self) -> ScenarioResult<()> {
        let mut ids = HashSet::new();
        for rel in &self.relations {
            if !ids.insert(rel.relation_id()) {
                return Err(ScenarioError::config(format!(
                    "duplicate relation id {}",
                    rel.relation_id()
                )));
            }
            rel.validate()?;
        }

        let mut names = HashSet::new();
        for ctr in &self.containers {
            if !names.insert(ctr.name.as_str()) {
                return Err(ScenarioError::config(format!(
                    "duplicate container name {}",
                    ctr.name
                )));
            }
        }

        for net in &self.networks {
            net.validate()?;
        }
        Ok(())
    }
}
