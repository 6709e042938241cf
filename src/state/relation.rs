//! Relations: the integration points between the unit and remote applications.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{ScenarioError, ScenarioResult};
use crate::event::Event;

/// A relation databag: string keys to string values.
pub type Databag = BTreeMap<String, String>;

/// Static shape of one relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationMeta {
    /// Local endpoint name.
    pub endpoint: String,
    /// Interface name.
    pub interface: String,
    /// Relation id, unique within a state.
    pub relation_id: u32,
    /// Name of the remote application.
    pub remote_app_name: String,
    /// Ids of the remote units taking part in the relation.
    pub remote_unit_ids: Vec<u32>,
    /// Local unit limit.
    #[serde(default = "default_limit")]
    pub limit: u32,
}

const fn default_limit() -> u32 {
    1
}

/// One live relation instance with its databags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSpec {
    /// Relation metadata.
    pub meta: RelationMeta,
    /// Local application databag.
    #[serde(default)]
    pub local_app_data: Databag,
    /// Remote application databag.
    #[serde(default)]
    pub remote_app_data: Databag,
    /// Local unit databag.
    #[serde(default)]
    pub local_unit_data: Databag,
    /// Per-remote-unit databags, keyed by remote unit id.
    #[serde(default)]
    pub remote_units_data: BTreeMap<u32, Databag>,
}

impl RelationSpec {
    /// Local endpoint name.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.meta.endpoint
    }

    /// Relation id.
    #[must_use]
    pub const fn relation_id(&self) -> u32 {
        self.meta.relation_id
    }

    /// Check the relation invariants.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if there are no remote units, if a
    /// remote unit id is repeated, or if `remote_units_data` names a unit
    /// that is not in `remote_unit_ids`.
    pub fn validate(&self) -> ScenarioResult<()> {
        if self.meta.remote_unit_ids.is_empty() {
            return Err(ScenarioError::config(format!(
                "relation {} has no remote units",
                self.meta.relation_id
            )));
        }
        check_unique_unit_ids(self.meta.relation_id, &self.meta.remote_unit_ids)?;
        if let Some(stray) = self
            .remote_units_data
            .keys()
            .find(|id| !self.meta.remote_unit_ids.contains(id))
        {
            return Err(ScenarioError::config(format!(
                "relation {} has data for unknown remote unit {stray}",
                self.meta.relation_id
            )));
        }
        Ok(())
    }

    /// `<endpoint>-relation-created` for this relation.
    #[must_use]
    pub fn created_event(&self) -> Event {
        Event::for_relation("-relation-created", &self.meta)
    }

    /// `<endpoint>-relation-joined` for this relation.
    #[must_use]
    pub fn joined_event(&self) -> Event {
        Event::for_relation("-relation-joined", &self.meta)
    }

    /// `<endpoint>-relation-changed` for this relation.
    #[must_use]
    pub fn changed_event(&self) -> Event {
        Event::for_relation("-relation-changed", &self.meta)
    }

    /// `<endpoint>-relation-departed` for this relation.
    #[must_use]
    pub fn departed_event(&self) -> Event {
        Event::for_relation("-relation-departed", &self.meta)
    }

    /// `<endpoint>-relation-broken` for this relation.
    #[must_use]
    pub fn broken_event(&self) -> Event {
        Event::for_relation("-relation-broken", &self.meta)
    }
}

/// Start building a relation on `endpoint` speaking `interface`.
#[must_use]
pub fn relation(endpoint: impl Into<String>, interface: impl Into<String>) -> RelationBuilder {
    RelationBuilder::new(endpoint, interface)
}

fn check_unique_unit_ids(relation_id: u32, ids: &[u32]) -> ScenarioResult<()> {
    let mut seen = BTreeSet::new();
    match ids.iter().find(|id| !seen.insert(**id)) {
        Some(dup) => Err(ScenarioError::config(format!(
            "relation {relation_id} lists remote unit {dup} more than once"
        ))),
        None => Ok(()),
    }
}

/// Builder for [`RelationSpec`] with defaulting rules.
///
/// Remote unit ids and remote unit data default from each other: ids
/// alone get empty databags, data alone contributes its keys as ids, and
/// neither yields a single remote unit `0` with an empty databag.
#[derive(Debug, Clone)]
pub struct RelationBuilder {
    endpoint: String,
    interface: String,
    remote_app_name: String,
    relation_id: u32,
    limit: u32,
    remote_unit_ids: Vec<u32>,
    local_unit_data: Databag,
    local_app_data: Databag,
    remote_app_data: Databag,
    remote_units_data: BTreeMap<u32, Databag>,
}

impl RelationBuilder {
    /// Create a builder with defaults.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            interface: interface.into(),
            remote_app_name: "remote".to_string(),
            relation_id: 0,
            limit: default_limit(),
            remote_unit_ids: Vec::new(),
            local_unit_data: Databag::new(),
            local_app_data: Databag::new(),
            remote_app_data: Databag::new(),
            remote_units_data: BTreeMap::new(),
        }
    }

    /// Set the remote application name.
    #[must_use]
    pub fn remote_app_name(mut self, name: impl Into<String>) -> Self {
        self.remote_app_name = name.into();
        self
    }

    /// Set the relation id.
    #[must_use]
    pub const fn relation_id(mut self, id: u32) -> Self {
        self.relation_id = id;
        self
    }

    /// Set the local unit limit.
    #[must_use]
    pub const fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Set the remote unit ids.
    #[must_use]
    pub fn remote_unit_ids(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.remote_unit_ids = ids.into_iter().collect();
        self
    }

    /// Set the local unit databag.
    #[must_use]
    pub fn local_unit_data(mut self, data: Databag) -> Self {
        self.local_unit_data = data;
        self
    }

    /// Set the local application databag.
    #[must_use]
    pub fn local_app_data(mut self, data: Databag) -> Self {
        self.local_app_data = data;
        self
    }

    /// Set the remote application databag.
    #[must_use]
    pub fn remote_app_data(mut self, data: Databag) -> Self {
        self.remote_app_data = data;
        self
    }

    /// Set the per-remote-unit databags.
    #[must_use]
    pub fn remote_units_data(mut self, data: BTreeMap<u32, Databag>) -> Self {
        self.remote_units_data = data;
        self
    }

    /// Build the relation.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a remote unit id is repeated, or if
    /// both remote unit ids and remote unit data were given and they
    /// disagree on the set of unit ids.
    pub fn build(self) -> ScenarioResult<RelationSpec> {
        check_unique_unit_ids(self.relation_id, &self.remote_unit_ids)?;
        let (remote_unit_ids, remote_units_data) =
            match (self.remote_unit_ids.is_empty(), self.remote_units_data.is_empty()) {
                (false, false) => {
                    let ids: BTreeSet<u32> = self.remote_unit_ids.iter().copied().collect();
                    let keyed: BTreeSet<u32> = self.remote_units_data.keys().copied().collect();
                    if ids != keyed {
                        return Err(ScenarioError::config(format!(
                            "remote unit ids {:?} should include any and all ids from remote units data {:?}",
                            self.remote_unit_ids, keyed
                        )));
                    }
                    (self.remote_unit_ids, self.remote_units_data)
                }
                (false, true) => {
                    let data = self
                        .remote_unit_ids
                        .iter()
                        .map(|&id| (id, Databag::new()))
                        .collect();
                    (self.remote_unit_ids, data)
                }
                (true, false) => {
                    let ids = self.remote_units_data.keys().copied().collect();
                    (ids, self.remote_units_data)
                }
                (true, true) => (vec![0], BTreeMap::from([(0, Databag::new())])),
            };

        Ok(RelationSpec {
            meta: RelationMeta {
                endpoint: self.endpoint,
                interface: self.interface,
                relation_id: self.relation_id,
                remote_app_name: self.remote_app_name,
                remote_unit_ids,
                limit: self.limit,
            },
            local_app_data: self.local_app_data,
            remote_app_data: self.remote_app_data,
            local_unit_data: self.local_unit_data,
            remote_units_data,
        })
    }
}
