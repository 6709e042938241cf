//! Dispatcher: runs the unit under test for one event against one snapshot.
//!
//! The unit sees the event through a [`DispatchedEvent`] whose placeholders
//! have been resolved against the live state, and talks to its environment
//! only through [`HookTools`], which routes every call through the
//! [`Context`] call-replay cache.

pub mod hook_tools;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

pub use hook_tools::HookTools;

use crate::config::ScenarioConfig;
use crate::error::{ScenarioError, ScenarioResult};
use crate::event::{Event, EventArg, Inject, InjectRelation};
use crate::replay::Context;
use crate::state::{RelationMeta, RelationSpec, State};

/// Error type units return. A boxed [`ScenarioError`] is propagated as is.
pub type UnitError = Box<dyn std::error::Error + Send + Sync>;

/// Result type units return.
pub type UnitResult = Result<(), UnitError>;

/// The reactive unit under test.
pub trait Unit {
    /// React to one event.
    ///
    /// # Errors
    ///
    /// Any error aborts the dispatch.
    fn handle(&mut self, event: &DispatchedEvent, tools: &mut HookTools<'_>) -> UnitResult;
}

impl<F> Unit for F
where
    F: FnMut(&DispatchedEvent, &mut HookTools<'_>) -> UnitResult,
{
    fn handle(&mut self, event: &DispatchedEvent, tools: &mut HookTools<'_>) -> UnitResult {
        self(event, tools)
    }
}

/// Static description of the unit: its name and declared metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Application name the unit belongs to.
    pub name: String,
    /// Declared metadata.
    #[serde(default)]
    pub meta: Option<Value>,
    /// Declared actions.
    #[serde(default)]
    pub actions: Option<Value>,
    /// Declared config options.
    #[serde(default)]
    pub config: Option<Value>,
}

impl UnitSpec {
    /// Spec with only a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// An event argument after placeholder resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedArg {
    /// Concrete value.
    Value(Value),
    /// Live relation, as found in the state at dispatch time.
    Relation(RelationSpec),
}

impl ResolvedArg {
    /// The relation, if this argument is one.
    #[must_use]
    pub const fn as_relation(&self) -> Option<&RelationSpec> {
        match self {
            Self::Relation(relation) => Some(relation),
            Self::Value(_) => None,
        }
    }
}

/// What the unit receives.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedEvent {
    /// Event name.
    pub name: String,
    /// Resolved positional arguments.
    pub args: Vec<ResolvedArg>,
    /// Resolved keyword arguments.
    pub kwargs: BTreeMap<String, ResolvedArg>,
    /// Hook environment.
    pub env: BTreeMap<String, String>,
}

impl DispatchedEvent {
    /// First relation among the arguments.
    #[must_use]
    pub fn relation(&self) -> Option<&RelationSpec> {
        self.args.iter().find_map(ResolvedArg::as_relation)
    }
}

/// Dispatch contract.
pub trait Dispatcher {
    /// Run `unit` for `event` against `state`, answering its outbound calls
    /// from `context`, and return the resulting state. On error `context`
    /// is left exactly as it was passed in.
    ///
    /// # Errors
    ///
    /// Returns error if the unit fails, a placeholder cannot be resolved,
    /// a meta-event was not expanded, or strict replay mismatches.
    fn dispatch(
        &self,
        event: Event,
        state: State,
        unit: &mut dyn Unit,
        context: &mut Context,
    ) -> ScenarioResult<State>;
}

/// Reference in-process dispatcher.
#[derive(Debug, Clone)]
pub struct Runtime {
    spec: UnitSpec,
    juju_version: String,
    charm_root: PathBuf,
}

impl Runtime {
    /// Create a runtime with default settings.
    #[must_use]
    pub fn new(spec: UnitSpec) -> Self {
        Self::from_config(spec, &ScenarioConfig::default())
    }

    /// Create a runtime from configuration.
    #[must_use]
    pub fn from_config(spec: UnitSpec, config: &ScenarioConfig) -> Self {
        Self {
            spec,
            juju_version: config.runtime.juju_version.clone(),
            charm_root: config.runtime.charm_root.clone(),
        }
    }

    /// Copy with the agent version replaced.
    #[must_use]
    pub fn with_juju_version(&self, version: impl Into<String>) -> Self {
        Self {
            juju_version: version.into(),
            ..self.clone()
        }
    }

    /// The unit spec.
    #[must_use]
    pub const fn spec(&self) -> &UnitSpec {
        &self.spec
    }

    /// Application name: the spec's, or the state's when the spec has none.
    #[must_use]
    pub fn app_name(&self, state: &State) -> String {
        if self.spec.name.is_empty() {
            state.app_name.clone()
        } else {
            self.spec.name.clone()
        }
    }

    /// Unit name reported to the unit.
    #[must_use]
    pub fn unit_name(&self, state: &State) -> String {
        format!("{}/{}", self.app_name(state), state.unit_id)
    }

    /// Hook environment for one dispatch.
    #[must_use]
    pub fn event_env(&self, state: &State, event: &Event) -> BTreeMap<String, String> {
        let mut env = BTreeMap::from([
            ("JUJU_VERSION".to_string(), self.juju_version.clone()),
            ("JUJU_UNIT_NAME".to_string(), self.unit_name(state)),
            ("JUJU_DISPATCH_PATH".to_string(), format!("hooks/{}", event.name)),
            ("JUJU_MODEL_NAME".to_string(), state.model.name.clone()),
            ("JUJU_MODEL_UUID".to_string(), state.model.uuid.clone()),
            (
                "JUJU_ACTION_NAME".to_string(),
                event.action_name().unwrap_or_default(),
            ),
            (
                "JUJU_CHARM_DIR".to_string(),
                self.charm_root.display().to_string(),
            ),
        ]);
        if let Some(relation) = event.relation() {
            env.insert("JUJU_RELATION".to_string(), relation.endpoint.clone());
            env.insert(
                "JUJU_RELATION_ID".to_string(),
                relation.relation_id.to_string(),
            );
        }
        env
    }

    fn resolve_relation(
        state: &State,
        inject: &InjectRelation,
        hint: Option<&RelationMeta>,
    ) -> ScenarioResult<RelationSpec> {
        let pinned = inject.relation_id.or_else(|| {
            hint.filter(|meta| meta.endpoint == inject.relation_name)
                .map(|meta| meta.relation_id)
        });
        if let Some(id) = pinned {
            let relation = state.get_relation(id)?;
            if relation.endpoint() != inject.relation_name {
                return Err(ScenarioError::not_found(
                    "relation",
                    format!("{}:{id}", inject.relation_name),
                ));
            }
            return Ok(relation.clone());
        }

        let mut candidates = state.relations_for(&inject.relation_name);
        let first = candidates
            .next()
            .ok_or_else(|| ScenarioError::not_found("relation", inject.relation_name.as_str()))?;
        if candidates.next().is_some() {
            debug!(
                endpoint = %inject.relation_name,
                relation_id = first.relation_id(),
                "ambiguous relation placeholder, using first declared"
            );
        }
        Ok(first.clone())
    }

    fn resolve_arg(state: &State, event: &Event, arg: &EventArg) -> ScenarioResult<ResolvedArg> {
        match arg {
            EventArg::Value(value) => Ok(ResolvedArg::Value(value.clone())),
            EventArg::Inject(Inject::Relation(inject)) => {
                Self::resolve_relation(state, inject, event.relation()).map(ResolvedArg::Relation)
            }
        }
    }

    fn resolve(&self, state: &State, event: &Event) -> ScenarioResult<DispatchedEvent> {
        let args: Vec<ResolvedArg> = event
            .args
            .iter()
            .map(|arg| Self::resolve_arg(state, event, arg))
            .collect::<ScenarioResult<_>>()?;
        let kwargs: BTreeMap<String, ResolvedArg> = event
            .kwargs
            .iter()
            .map(|(key, arg)| Ok((key.clone(), Self::resolve_arg(state, event, arg)?)))
            .collect::<ScenarioResult<_>>()?;
        let mut dispatched = DispatchedEvent {
            name: event.name.clone(),
            args,
            kwargs,
            env: self.event_env(state, event),
        };
        if let Some(relation) = dispatched.relation().map(|r| r.meta.clone()) {
            dispatched
                .env
                .entry("JUJU_RELATION".to_string())
                .or_insert(relation.endpoint);
            dispatched
                .env
                .entry("JUJU_RELATION_ID".to_string())
                .or_insert_with(|| relation.relation_id.to_string());
        }
        Ok(dispatched)
    }
}

impl Dispatcher for Runtime {
    fn dispatch(
        &self,
        event: Event,
        state: State,
        unit: &mut dyn Unit,
        context: &mut Context,
    ) -> ScenarioResult<State> {
        if let Some(meta) = event.meta_kind() {
            return Err(ScenarioError::config(format!(
                "meta-event {meta} must be decomposed before dispatch"
            )));
        }
        info!(event = %event.name, unit = %self.unit_name(&state), "preparing to fire event");

        let dispatched = self.resolve(&state, &event)?;
        debug!(env = ?dispatched.env, "prepared hook environment");

        let app_name = self.app_name(&state);
        let mut output = state;
        // The caller's context only changes if the unit completes.
        let mut working = context.clone();
        info!("entering unit");
        let outcome = {
            let mut tools = HookTools::new(&mut output, &mut working, app_name);
            unit.handle(&dispatched, &mut tools)
        };
        info!("exited unit");

        if let Err(err) = outcome {
            return Err(match err.downcast::<ScenarioError>() {
                Ok(scenario_err) => *scenario_err,
                Err(other) => ScenarioError::UncaughtUnitError {
                    event: event.name,
                    message: other.to_string(),
                },
            });
        }

        working.state = output.clone();
        *context = working;
        info!(event = %event.name, "event dispatched");
        Ok(output)
    }
}

/// Dispatch one event against `state` with a fresh recording context.
///
/// Strings are turned into events with derived arguments, so
/// `"db-relation-changed"` injects the `db` relation.
///
/// # Errors
///
/// Returns any dispatch failure.
pub fn trigger(
    state: &State,
    event: impl Into<TriggerEvent>,
    unit: &mut dyn Unit,
    spec: UnitSpec,
) -> ScenarioResult<State> {
    let event = match event.into() {
        TriggerEvent::Name(name) => crate::event::event(name),
        TriggerEvent::Event(event) => event,
    };
    let runtime = Runtime::new(spec).with_juju_version(state.juju_version.clone());
    let mut context = Context::new(state.clone());
    runtime.dispatch(event, state.clone(), unit, &mut context)
}

/// Event argument accepted by [`trigger`].
#[derive(Debug, Clone)]
pub enum TriggerEvent {
    /// Event name, arguments derived.
    Name(String),
    /// Fully built event.
    Event(Event),
}

impl From<&str> for TriggerEvent {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for TriggerEvent {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<Event> for TriggerEvent {
    fn from(event: Event) -> Self {
        Self::Event(event)
    }
}
