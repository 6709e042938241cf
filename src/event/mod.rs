//! Events: the atomic triggers dispatched to the unit under test, and the
//! closed catalog of meta-events that stand for a whole family of them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::RelationMeta;

/// Suffixes of the relation events whose relation argument can be derived
/// from the event name.
const RELATION_EVENT_SUFFIXES: [&str; 5] = [
    "-relation-created",
    "-relation-joined",
    "-relation-changed",
    "-relation-departed",
    "-relation-broken",
];

/// Meta-event catalog.
///
/// Each meta-event expands to one concrete event per declared relation (or
/// storage), named `<endpoint><suffix>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaEvent {
    /// `<endpoint>-relation-created` for every relation.
    CreateAllRelations,
    /// `<endpoint>-relation-broken` for every relation.
    BreakAllRelations,
    /// `<storage>-storage-attached` for every storage.
    AttachAllStorages,
    /// `<storage>-storage-detaching` for every storage.
    DetachAllStorages,
}

impl MetaEvent {
    /// Every meta-event in the catalog.
    pub const ALL: [Self; 4] = [
        Self::CreateAllRelations,
        Self::BreakAllRelations,
        Self::AttachAllStorages,
        Self::DetachAllStorages,
    ];

    /// Symbolic name used as the event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateAllRelations => "CREATE_ALL_RELATIONS",
            Self::BreakAllRelations => "BREAK_ALL_RELATIONS",
            Self::AttachAllStorages => "ATTACH_ALL_STORAGES",
            Self::DetachAllStorages => "DETACH_ALL_STORAGES",
        }
    }

    /// Suffix appended to each endpoint during decomposition.
    #[must_use]
    pub const fn suffix(&self) -> &'static str {
        match self {
            Self::CreateAllRelations => "-relation-created",
            Self::BreakAllRelations => "-relation-broken",
            Self::AttachAllStorages => "-storage-attached",
            Self::DetachAllStorages => "-storage-detaching",
        }
    }

    /// Whether this meta-event fans out over storages rather than relations.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::AttachAllStorages | Self::DetachAllStorages)
    }

    /// Parse a catalog name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// An event carrying this meta-event's name.
    #[must_use]
    pub fn event(&self) -> Event {
        Event::new(self.name())
    }
}

impl std::fmt::Display for MetaEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Relation placeholder resolved by the dispatcher at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectRelation {
    /// Endpoint of the relation to inject.
    pub relation_name: String,
    /// Relation id, when the caller could pin it down.
    #[serde(default)]
    pub relation_id: Option<u32>,
}

/// Placeholders for values that only exist once the unit is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inject {
    /// A live relation handle.
    Relation(InjectRelation),
}

/// One event argument: either a concrete value or an injection placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventArg {
    /// Concrete value passed through untouched.
    Value(Value),
    /// Placeholder resolved by the dispatcher.
    Inject(Inject),
}

impl From<InjectRelation> for EventArg {
    fn from(inject: InjectRelation) -> Self {
        Self::Inject(Inject::Relation(inject))
    }
}

impl From<Value> for EventArg {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Auxiliary context attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Relation metadata, for relation events.
    #[serde(default)]
    pub relation: Option<RelationMeta>,
}

/// One atomic trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name, e.g. `start` or `db-relation-changed`.
    pub name: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<EventArg>,
    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: BTreeMap<String, EventArg>,
    /// Auxiliary context.
    #[serde(default)]
    pub meta: Option<EventMeta>,
}

impl Event {
    /// Create an event with no arguments.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            meta: None,
        }
    }

    /// `<endpoint><suffix>` with the relation pinned by id and attached as
    /// metadata.
    #[must_use]
    pub fn for_relation(suffix: &str, relation: &RelationMeta) -> Self {
        Self {
            name: format!("{}{suffix}", relation.endpoint),
            args: vec![InjectRelation {
                relation_name: relation.endpoint.clone(),
                relation_id: Some(relation.relation_id),
            }
            .into()],
            kwargs: BTreeMap::new(),
            meta: Some(EventMeta {
                relation: Some(relation.clone()),
            }),
        }
    }

    /// Whether the name is in the meta-event catalog.
    #[must_use]
    pub fn is_meta(&self) -> bool {
        self.meta_kind().is_some()
    }

    /// The catalog entry for this event, if it is a meta-event.
    #[must_use]
    pub fn meta_kind(&self) -> Option<MetaEvent> {
        MetaEvent::from_name(&self.name)
    }

    /// Relation metadata attached to this event.
    #[must_use]
    pub fn relation(&self) -> Option<&RelationMeta> {
        self.meta.as_ref().and_then(|m| m.relation.as_ref())
    }

    /// Endpoint named by a `<endpoint>-relation-*` event name.
    #[must_use]
    pub fn relation_endpoint(&self) -> Option<&str> {
        RELATION_EVENT_SUFFIXES
            .iter()
            .find_map(|suffix| self.name.strip_suffix(suffix))
    }

    /// Action name for `<name>_action` events, with dashes restored.
    #[must_use]
    pub fn action_name(&self) -> Option<String> {
        self.name
            .strip_suffix("_action")
            .map(|action| action.replace('_', "-"))
    }

    /// Append a positional argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<EventArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set a keyword argument.
    #[must_use]
    pub fn with_kwarg(mut self, key: impl Into<String>, arg: impl Into<EventArg>) -> Self {
        self.kwargs.insert(key.into(), arg.into());
        self
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_meta(mut self, meta: EventMeta) -> Self {
        self.meta = Some(meta);
        self
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Placeholder arguments implied by an event name.
///
/// Relation events get an [`InjectRelation`] by endpoint only: the name
/// cannot say which relation is meant when several share an endpoint, so
/// the id is left for the dispatcher to settle.
#[must_use]
pub fn derive_args(event_name: &str) -> Vec<EventArg> {
    RELATION_EVENT_SUFFIXES
        .iter()
        .filter_map(|suffix| event_name.strip_suffix(suffix))
        .map(|endpoint| {
            InjectRelation {
                relation_name: endpoint.to_string(),
                relation_id: None,
            }
            .into()
        })
        .collect()
}

/// Build an event whose arguments are derived from its name.
#[must_use]
pub fn event(name: impl Into<String>) -> Event {
    let name = name.into();
    Event {
        args: derive_args(&name),
        ..Event::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_meta() {
        for meta in MetaEvent::ALL {
            assert!(meta.event().is_meta());
            assert_eq!(MetaEvent::from_name(meta.name()), Some(meta));
        }
        assert!(!Event::new("start").is_meta());
        assert!(!Event::new("create_all_relations").is_meta());
    }

    #[test]
    fn test_suffixes() {
        assert_eq!(MetaEvent::CreateAllRelations.suffix(), "-relation-created");
        assert_eq!(MetaEvent::BreakAllRelations.suffix(), "-relation-broken");
        assert_eq!(MetaEvent::AttachAllStorages.suffix(), "-storage-attached");
        assert_eq!(MetaEvent::DetachAllStorages.suffix(), "-storage-detaching");
        assert!(MetaEvent::AttachAllStorages.is_storage());
        assert!(!MetaEvent::BreakAllRelations.is_storage());
    }

    #[test]
    fn test_derived_relation_arg() {
        let evt = event("db-relation-changed");
        assert_eq!(
            evt.args,
            vec![EventArg::Inject(Inject::Relation(InjectRelation {
                relation_name: "db".to_string(),
                relation_id: None,
            }))]
        );
        assert_eq!(evt.relation_endpoint(), Some("db"));
    }

    #[test]
    fn test_no_derived_args_for_plain_events() {
        assert!(event("start").args.is_empty());
        assert!(event("db-storage-attached").args.is_empty());
        assert!(event("config-changed").relation_endpoint().is_none());
    }

    #[test]
    fn test_hyphenated_endpoint() {
        let evt = event("ingress-per-unit-relation-joined");
        assert_eq!(evt.relation_endpoint(), Some("ingress-per-unit"));
        assert_eq!(evt.args.len(), 1);
    }

    #[test]
    fn test_action_name() {
        assert_eq!(
            Event::new("do_backup_action").action_name().as_deref(),
            Some("do-backup")
        );
        assert!(Event::new("start").action_name().is_none());
    }

    #[test]
    fn test_builder_args() {
        let evt = event("db-relation-changed")
            .with_arg(serde_json::json!(42))
            .with_kwarg("force", serde_json::json!(true));
        assert_eq!(evt.args.len(), 2);
        assert_eq!(evt.kwargs["force"], EventArg::Value(serde_json::json!(true)));
    }
}
