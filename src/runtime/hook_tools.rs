//! Intercepted outbound calls.
//!
//! Every tool call goes through [`Context::answer`] under a call-site key
//! equal to the tool name. Getters answer from the state when recording;
//! setters always apply their effect to the output state and record a
//! `null` response, so replaying them checks call identity and order.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, error, info, trace, warn};

use crate::error::{ScenarioError, ScenarioResult};
use crate::replay::{CallSignature, Context};
use crate::state::{ConfigValue, Databag, ExecOutput, FsNode, LogEntry, RelationSpec, State, StatusKind};

/// Which databag of a relation a member name refers to.
enum Member {
    LocalUnit,
    LocalApp,
    RemoteApp,
    RemoteUnit(u32),
}

impl Member {
    fn resolve(
        relation: &RelationSpec,
        name: &str,
        app_name: &str,
        unit_name: &str,
    ) -> ScenarioResult<Self> {
        if name == unit_name {
            return Ok(Self::LocalUnit);
        }
        if name == app_name {
            return Ok(Self::LocalApp);
        }
        let remote = &relation.meta.remote_app_name;
        if name == remote {
            return Ok(Self::RemoteApp);
        }
        name.strip_prefix(remote.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|id| id.parse::<u32>().ok())
            .filter(|id| relation.meta.remote_unit_ids.contains(id))
            .map(Self::RemoteUnit)
            .ok_or_else(|| ScenarioError::not_found("relation member", name))
    }
}

/// Handle through which the unit under test reaches its environment.
#[derive(Debug)]
pub struct HookTools<'a> {
    state: &'a mut State,
    context: &'a mut Context,
    app_name: String,
}

impl<'a> HookTools<'a> {
    pub(crate) fn new(state: &'a mut State, context: &'a mut Context, app_name: String) -> Self {
        Self {
            state,
            context,
            app_name,
        }
    }

    /// The state as the unit has changed it so far.
    #[must_use]
    pub fn state(&self) -> &State {
        self.state
    }

    /// Local application name.
    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Local unit name.
    #[must_use]
    pub fn unit_name(&self) -> String {
        format!("{}/{}", self.app_name, self.state.unit_id)
    }

    fn call<T, F>(&mut self, site: &str, args: Vec<Value>, live: F) -> ScenarioResult<T>
    where
        T: DeserializeOwned,
        F: FnOnce(&State) -> ScenarioResult<Value>,
    {
        let state = &*self.state;
        let response = self
            .context
            .answer(site, CallSignature::new(args), || live(state))?;
        Ok(serde_json::from_value(response)?)
    }

    fn notify(&mut self, site: &str, args: Vec<Value>) -> ScenarioResult<()> {
        self.context
            .answer(site, CallSignature::new(args), || Ok(Value::Null))?;
        Ok(())
    }

    /// `is-leader`.
    ///
    /// # Errors
    ///
    /// Returns error on replay failure.
    pub fn is_leader(&mut self) -> ScenarioResult<bool> {
        self.call("is-leader", vec![], |state| Ok(json!(state.leader)))
    }

    /// `config-get`.
    ///
    /// # Errors
    ///
    /// Returns error on replay failure.
    pub fn config_get(&mut self) -> ScenarioResult<BTreeMap<String, ConfigValue>> {
        self.call("config-get", vec![], |state| Ok(serde_json::to_value(&state.config)?))
    }

    /// `relation-ids`: ids of the relations on `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns error on replay failure.
    pub fn relation_ids(&mut self, endpoint: &str) -> ScenarioResult<Vec<u32>> {
        self.call("relation-ids", vec![json!(endpoint)], |state| {
            let ids: Vec<u32> = state
                .relations_for(endpoint)
                .map(RelationSpec::relation_id)
                .collect();
            Ok(json!(ids))
        })
    }

    /// `relation-list`: remote unit names in a relation.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown relation, or error on replay failure.
    pub fn relation_list(&mut self, relation_id: u32) -> ScenarioResult<Vec<String>> {
        self.call("relation-list", vec![json!(relation_id)], |state| {
            let relation = state.get_relation(relation_id)?;
            let units: Vec<String> = relation
                .meta
                .remote_unit_ids
                .iter()
                .map(|id| format!("{}/{id}", relation.meta.remote_app_name))
                .collect();
            Ok(json!(units))
        })
    }

    /// `relation-get`: the databag `member` holds in a relation.
    ///
    /// `member` is the local unit or application name, the remote
    /// application name, or a remote unit name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown relation or member, or error on
    /// replay failure.
    pub fn relation_get(&mut self, relation_id: u32, member: &str) -> ScenarioResult<Databag> {
        let app_name = self.app_name.clone();
        self.call(
            "relation-get",
            vec![json!(relation_id), json!(member)],
            |state| {
                let relation = state.get_relation(relation_id)?;
                let unit_name = format!("{app_name}/{}", state.unit_id);
                let bag = match Member::resolve(relation, member, &app_name, &unit_name)? {
                    Member::LocalUnit => &relation.local_unit_data,
                    Member::LocalApp => &relation.local_app_data,
                    Member::RemoteApp => &relation.remote_app_data,
                    Member::RemoteUnit(id) => relation
                        .remote_units_data
                        .get(&id)
                        .ok_or_else(|| ScenarioError::not_found("relation member", member))?,
                };
                Ok(serde_json::to_value(bag)?)
            },
        )
    }

    /// `relation-set`: write one key into the local unit (or, for the
    /// leader, application) databag.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a non-leader writes application
    /// data, `NotFound` for an unknown relation, or error on replay failure.
    pub fn relation_set(
        &mut self,
        relation_id: u32,
        key: &str,
        value: &str,
        app: bool,
    ) -> ScenarioResult<()> {
        if app && !self.state.leader {
            return Err(ScenarioError::config(
                "only the leader can write application relation data",
            ));
        }
        let relation = self.state.get_relation_mut(relation_id)?;
        let bag = if app {
            &mut relation.local_app_data
        } else {
            &mut relation.local_unit_data
        };
        bag.insert(key.to_string(), value.to_string());
        self.notify(
            "relation-set",
            vec![json!(relation_id), json!(key), json!(value), json!(app)],
        )
    }

    /// `status-get` for the unit, or the application when `app` is set.
    ///
    /// # Errors
    ///
    /// Returns error on replay failure.
    pub fn status_get(&mut self, app: bool) -> ScenarioResult<(StatusKind, String)> {
        self.call("status-get", vec![json!(app)], |state| {
            let status = if app { &state.status.app } else { &state.status.unit };
            Ok(serde_json::to_value(status)?)
        })
    }

    /// `status-set` for the unit, or the application when `app` is set.
    ///
    /// # Errors
    ///
    /// Returns error on replay failure.
    pub fn status_set(&mut self, kind: StatusKind, message: &str, app: bool) -> ScenarioResult<()> {
        let slot = if app {
            &mut self.state.status.app
        } else {
            &mut self.state.status.unit
        };
        *slot = (kind, message.to_string());
        self.notify(
            "status-set",
            vec![json!(kind.as_str()), json!(message), json!(app)],
        )
    }

    /// `application-version-set`.
    ///
    /// # Errors
    ///
    /// Returns error on replay failure.
    pub fn application_version_set(&mut self, version: &str) -> ScenarioResult<()> {
        self.state.status.app_version = version.to_string();
        self.notify("application-version-set", vec![json!(version)])
    }

    /// `network-get`: the binding for `endpoint`, in hook-tool shape.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no binding, or error on replay failure.
    pub fn network_get(&mut self, endpoint: &str) -> ScenarioResult<Value> {
        self.call("network-get", vec![json!(endpoint)], |state| {
            Ok(state.get_network(endpoint)?.network.hook_tool_output())
        })
    }

    /// `juju-log`: append to the state's log and forward to `tracing`.
    ///
    /// # Errors
    ///
    /// Returns error on replay failure.
    pub fn juju_log(&mut self, level: &str, message: &str) -> ScenarioResult<()> {
        match level.to_ascii_uppercase().as_str() {
            "CRITICAL" | "ERROR" => error!(target: "scenario::unit", "{message}"),
            "WARNING" => warn!(target: "scenario::unit", "{message}"),
            "INFO" => info!(target: "scenario::unit", "{message}"),
            "TRACE" => trace!(target: "scenario::unit", "{message}"),
            _ => debug!(target: "scenario::unit", "{message}"),
        }
        self.state.juju_log.push(LogEntry {
            level: level.to_string(),
            message: message.to_string(),
        });
        self.notify("juju-log", vec![json!(level), json!(message)])
    }

    /// Whether the workload manager of `container` is reachable.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown container, or error on replay failure.
    pub fn can_connect(&mut self, container: &str) -> ScenarioResult<bool> {
        self.call("can-connect", vec![json!(container)], |state| {
            Ok(json!(state.get_container(container)?.can_connect))
        })
    }

    /// Run `argv` in `container`, answered from its exec table. Each run
    /// gets the next change id of the context.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the container cannot connect,
    /// `NotFound` if the container or command is unknown, or error on
    /// replay failure.
    pub fn exec(&mut self, container: &str, argv: &[&str]) -> ScenarioResult<ExecOutput> {
        let change_id = self.context.next_change_id();
        self.call(
            "exec",
            vec![json!(container), json!(argv)],
            |state| {
                let spec = state.get_container(container)?;
                if !spec.can_connect {
                    return Err(ScenarioError::config(format!(
                        "cannot connect to container {container}"
                    )));
                }
                let key: Vec<String> = argv.iter().map(|a| (*a).to_string()).collect();
                let mut output = spec
                    .exec_mock
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| ScenarioError::not_found("exec mock", argv.join(" ")))?;
                output.change_id = Some(change_id);
                Ok(serde_json::to_value(output)?)
            },
        )
    }

    /// Local file standing in for `path` inside `container`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the container cannot connect,
    /// `NotFound` if the path is missing or a directory, or error on replay
    /// failure.
    pub fn pull(&mut self, container: &str, path: &str) -> ScenarioResult<PathBuf> {
        self.call("pull", vec![json!(container), json!(path)], |state| {
            let spec = state.get_container(container)?;
            if !spec.can_connect {
                return Err(ScenarioError::config(format!(
                    "cannot connect to container {container}"
                )));
            }
            match spec.lookup(path) {
                Some(FsNode::File(local)) => Ok(json!(local)),
                _ => Err(ScenarioError::not_found("file", path)),
            }
        })
    }
}
