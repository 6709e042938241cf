//! State deltas.
//!
//! Diffing is a pluggable collaborator behind [`StateDiffer`]. Without one,
//! [`State::delta`] reports [`ScenarioError::DiffUnavailable`] instead of
//! failing anything else. [`JsonStructuralDiffer`] is the built-in
//! collaborator: it walks the serialized JSON of both snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ScenarioError, ScenarioResult};
use crate::state::State;

/// Edit operation kind.
///
/// Variants are declared in name order so the derived `Ord` agrees with
/// sorting on the operation name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    /// Insert a value.
    Add,
    /// Delete a value.
    Remove,
    /// Overwrite a value.
    Replace,
}

impl fmt::Display for PatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Replace => "replace",
        })
    }
}

/// One edit, addressed by JSON pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOp {
    /// Operation.
    pub op: PatchKind,
    /// JSON pointer into the document.
    pub path: String,
    /// New value; absent for removals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOp {
    fn add(path: String, value: &Value) -> Self {
        Self {
            op: PatchKind::Add,
            path,
            value: Some(value.clone()),
        }
    }

    fn remove(path: String) -> Self {
        Self {
            op: PatchKind::Remove,
            path,
            value: None,
        }
    }

    fn replace(path: String, value: &Value) -> Self {
        Self {
            op: PatchKind::Replace,
            path,
            value: Some(value.clone()),
        }
    }
}

/// Produces the edits turning `before` into `after`.
pub trait StateDiffer {
    /// Compute the edit list. Order is up to the implementation;
    /// [`State::delta`] sorts it.
    fn diff(&self, before: &Value, after: &Value) -> Vec<PatchOp>;
}

impl<F> StateDiffer for F
where
    F: Fn(&Value, &Value) -> Vec<PatchOp>,
{
    fn diff(&self, before: &Value, after: &Value) -> Vec<PatchOp> {
        self(before, after)
    }
}

/// Sort edits by `(path, op)` for deterministic comparison.
pub fn sort_patch(patch: &mut [PatchOp]) {
    patch.sort_by(|a, b| a.path.cmp(&b.path).then(a.op.cmp(&b.op)));
}

/// Recursive structural diff over JSON values.
///
/// Objects are compared key by key; arrays index by index, with trailing
/// elements added or removed; anything else that differs is replaced.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStructuralDiffer;

impl JsonStructuralDiffer {
    fn walk(path: &str, before: &Value, after: &Value, out: &mut Vec<PatchOp>) {
        match (before, after) {
            (Value::Object(a), Value::Object(b)) => Self::walk_object(path, a, b, out),
            (Value::Array(a), Value::Array(b)) => {
                for (i, (x, y)) in a.iter().zip(b).enumerate() {
                    Self::walk(&format!("{path}/{i}"), x, y, out);
                }
                for (i, y) in b.iter().enumerate().skip(a.len()) {
                    out.push(PatchOp::add(format!("{path}/{i}"), y));
                }
                for i in (b.len()..a.len()).rev() {
                    out.push(PatchOp::remove(format!("{path}/{i}")));
                }
            }
            _ if before == after => {}
            _ => out.push(PatchOp::replace(path.to_string(), after)),
        }
    }

    fn walk_object(
        path: &str,
        before: &Map<String, Value>,
        after: &Map<String, Value>,
        out: &mut Vec<PatchOp>,
    ) {
        for (key, old) in before {
            let child = format!("{path}/{}", escape(key));
            match after.get(key) {
                Some(new) => Self::walk(&child, old, new, out),
                None => out.push(PatchOp::remove(child)),
            }
        }
        for (key, new) in after {
            if !before.contains_key(key) {
                out.push(PatchOp::add(format!("{path}/{}", escape(key)), new));
            }
        }
    }
}

impl StateDiffer for JsonStructuralDiffer {
    fn diff(&self, before: &Value, after: &Value) -> Vec<PatchOp> {
        let mut out = Vec::new();
        Self::walk("", before, after, &mut out);
        out
    }
}

/// JSON pointer token escaping.
fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

impl State {
    /// Edits turning `self` into `other`, sorted by `(path, op)`.
    ///
    /// # Errors
    ///
    /// Returns `DiffUnavailable` if `differ` is `None`, or error if either
    /// state fails to serialize.
    pub fn delta(
        &self,
        other: &Self,
        differ: Option<&dyn StateDiffer>,
    ) -> ScenarioResult<Vec<PatchOp>> {
        let differ = differ.ok_or(ScenarioError::DiffUnavailable)?;
        let before = serde_json::to_value(self)?;
        let after = serde_json::to_value(other)?;
        let mut patch = differ.diff(&before, &after);
        sort_patch(&mut patch);
        Ok(patch)
    }
}
