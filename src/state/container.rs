//! Workload containers with mock filesystem and exec tables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A runtime layer, kept as the raw mapping the workload manager consumes.
pub type Layer = serde_json::Value;

/// Mock filesystem node: a directory of named children, or a file backed
/// by a path on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FsNode {
    /// Local file whose contents stand in for the workload file.
    File(PathBuf),
    /// Directory.
    Dir(BTreeMap<String, FsNode>),
}

/// Mocked result of running a command in a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Process exit code.
    #[serde(default)]
    pub return_code: i32,
    /// Captured stdout.
    #[serde(default)]
    pub stdout: String,
    /// Captured stderr.
    #[serde(default)]
    pub stderr: String,
    /// Change id assigned when the command ran; `None` until then.
    #[serde(default)]
    pub change_id: Option<u64>,
}

/// Exec table: argv to mocked output.
pub type ExecTable = BTreeMap<Vec<String>, ExecOutput>;

/// One declared workload container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name, unique within a state.
    pub name: String,
    /// Whether the workload manager is reachable.
    #[serde(default)]
    pub can_connect: bool,
    /// Runtime layers.
    #[serde(default)]
    pub layers: Vec<Layer>,
    /// Mock filesystem rooted at `/`.
    #[serde(default)]
    pub filesystem: BTreeMap<String, FsNode>,
    /// Mock exec table.
    #[serde(default, with = "exec_table")]
    pub exec_mock: ExecTable,
}

impl ContainerSpec {
    /// Create a container with no layers, files or commands.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            can_connect: false,
            layers: Vec::new(),
            filesystem: BTreeMap::new(),
            exec_mock: ExecTable::new(),
        }
    }

    /// Set connectivity.
    #[must_use]
    pub const fn with_can_connect(mut self, can_connect: bool) -> Self {
        self.can_connect = can_connect;
        self
    }

    /// Append a layer.
    #[must_use]
    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    /// Replace the filesystem tree.
    #[must_use]
    pub fn with_filesystem(mut self, filesystem: BTreeMap<String, FsNode>) -> Self {
        self.filesystem = filesystem;
        self
    }

    /// Register a mocked command; a later registration of the same argv
    /// replaces the earlier one.
    #[must_use]
    pub fn with_exec<S: Into<String>>(
        mut self,
        argv: impl IntoIterator<Item = S>,
        output: ExecOutput,
    ) -> Self {
        self.exec_mock
            .insert(argv.into_iter().map(Into::into).collect(), output);
        self
    }

    /// Resolve an absolute workload path to its node in the mock tree.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&FsNode> {
        let mut parts = Path::new(path)
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .filter(|c| *c != "/");
        let first = parts.next()?;
        let mut node = self.filesystem.get(first)?;
        for part in parts {
            node = match node {
                FsNode::Dir(children) => children.get(part)?,
                FsNode::File(_) => return None,
            };
        }
        Some(node)
    }
}

/// Shorthand for [`ContainerSpec::new`].
#[must_use]
pub fn container(name: impl Into<String>) -> ContainerSpec {
    ContainerSpec::new(name)
}

/// JSON maps need string keys, so the exec table travels as a list of
/// `{command, output}` entries.
mod exec_table {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{ExecOutput, ExecTable};

    #[derive(Serialize, Deserialize)]
    struct Entry {
        command: Vec<String>,
        output: ExecOutput,
    }

    pub fn serialize<S: Serializer>(table: &ExecTable, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(table.iter().map(|(command, output)| Entry {
            command: command.clone(),
            output: output.clone(),
        }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ExecTable, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        let mut table = ExecTable::new();
        for entry in entries {
            if table.insert(entry.command.clone(), entry.output).is_some() {
                return Err(serde::de::Error::custom(format!(
                    "duplicate exec mock for {:?}",
                    entry.command
                )));
            }
        }
        Ok(table)
    }
}
