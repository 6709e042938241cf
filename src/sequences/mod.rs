//! Lifecycle sequence generation.
//!
//! Expands meta-events into concrete `(Event, State)` steps and assembles
//! the canonical startup and teardown lifecycles:
//!
//! - Startup: storages → `start` → relations → leadership → `config-changed` → `install`
//! - Teardown: relations → storages → `stop` → `remove`
//!
//! The order between these groups follows real deployments and units may
//! rely on it. Within one fan-out, relations are visited in declaration
//! order, but units should not depend on that.
//!
//! Every step carries its own copy of the template, so one execution can
//! never observe another's changes.

use tracing::{debug, warn};

use crate::error::{ScenarioError, ScenarioResult};
use crate::event::{Event, InjectRelation, MetaEvent};
use crate::replay::Context;
use crate::runtime::{Dispatcher, Unit};
use crate::state::State;

/// One generated step: the event and the snapshot to dispatch it against.
pub type SequenceStep = (Event, State);

/// A lazily generated list of steps.
pub type Sequence = Box<dyn Iterator<Item = SequenceStep> + Send>;

/// Lazy fan-out of one meta-event over a template state.
#[derive(Debug, Clone)]
pub struct MetaEventFanOut {
    meta: MetaEvent,
    template: State,
    next: usize,
}

impl MetaEventFanOut {
    fn new(meta: MetaEvent, template: State) -> Self {
        if meta.is_storage() {
            warn!(meta_event = meta.name(), "meta-event not supported yet");
        }
        Self {
            meta,
            template,
            next: 0,
        }
    }

    fn len_remaining(&self) -> usize {
        if self.meta.is_storage() {
            0
        } else {
            self.template.relations.len().saturating_sub(self.next)
        }
    }
}

impl Iterator for MetaEventFanOut {
    type Item = SequenceStep;

    fn next(&mut self) -> Option<Self::Item> {
        // TODO: fan storage meta-events out once storages are part of State.
        if self.meta.is_storage() {
            return None;
        }
        let relation = self.template.relations.get(self.next)?;
        self.next += 1;

        let event = Event::new(format!("{}{}", relation.endpoint(), self.meta.suffix())).with_arg(
            InjectRelation {
                relation_name: relation.endpoint().to_string(),
                relation_id: Some(relation.relation_id()),
            },
        );
        debug!(meta_event = self.meta.name(), event = %event.name, "decomposed meta-event");
        Some((event, self.template.clone()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len_remaining();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for MetaEventFanOut {}

/// Expand a meta-event into one step per matching relation.
///
/// Storage meta-events log a warning and yield nothing.
///
/// # Errors
///
/// Returns `UnknownMetaEvent` if the name is not in the catalog. This is an
/// internal error: callers only build meta-events from [`MetaEvent`].
pub fn decompose_meta_event(meta_event: &Event, state: &State) -> ScenarioResult<MetaEventFanOut> {
    let meta = meta_event
        .meta_kind()
        .ok_or_else(|| ScenarioError::UnknownMetaEvent(meta_event.name.clone()))?;
    Ok(MetaEventFanOut::new(meta, state.clone()))
}

fn plain_steps(names: Vec<&'static str>, template: State) -> impl Iterator<Item = SequenceStep> {
    names
        .into_iter()
        .map(move |name| (Event::new(name), template.clone()))
}

/// Startup lifecycle for one template.
#[must_use]
pub fn generate_startup_sequence(template: &State) -> Sequence {
    let leadership = if template.leader {
        "leader-elected"
    } else {
        "leader-settings-changed"
    };
    Box::new(
        MetaEventFanOut::new(MetaEvent::AttachAllStorages, template.clone())
            .chain(plain_steps(vec!["start"], template.clone()))
            .chain(MetaEventFanOut::new(
                MetaEvent::CreateAllRelations,
                template.clone(),
            ))
            .chain(plain_steps(
                vec![leadership, "config-changed", "install"],
                template.clone(),
            )),
    )
}

/// Teardown lifecycle for one template.
#[must_use]
pub fn generate_teardown_sequence(template: &State) -> Sequence {
    Box::new(
        MetaEventFanOut::new(MetaEvent::BreakAllRelations, template.clone())
            .chain(MetaEventFanOut::new(
                MetaEvent::DetachAllStorages,
                template.clone(),
            ))
            .chain(plain_steps(vec!["stop", "remove"], template.clone())),
    )
}

/// Startup then teardown for each template, in template order.
#[must_use]
pub fn generate_builtin_sequences(templates: impl IntoIterator<Item = State>) -> Sequence {
    let templates: Vec<State> = templates.into_iter().collect();
    Box::new(templates.into_iter().flat_map(|template| {
        generate_startup_sequence(&template).chain(generate_teardown_sequence(&template))
    }))
}

/// Fire every builtin lifecycle event, as leader and as non-leader, and
/// return the resulting states in order.
///
/// Each step gets a fresh unit from `make_unit` and a fresh recording
/// [`Context`].
///
/// # Errors
///
/// Returns the first dispatch failure.
pub fn check_builtin_sequences<D, F>(dispatcher: &D, mut make_unit: F) -> ScenarioResult<Vec<State>>
where
    D: Dispatcher + ?Sized,
    F: FnMut() -> Box<dyn Unit>,
{
    let templates = [State::new().with_leadership(true), State::new().with_leadership(false)];
    let mut outputs = Vec::new();
    for (event, state) in generate_builtin_sequences(templates) {
        let mut unit = make_unit();
        let mut context = Context::new(state.clone());
        outputs.push(dispatcher.dispatch(event, state, unit.as_mut(), &mut context)?);
    }
    Ok(outputs)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::state::relation;
    use proptest::prelude::*;

    proptest! {
        /// Relation meta-events fan out to exactly one step per relation.
        #[test]
        fn prop_fan_out_cardinality(n in 0usize..16, breaking in any::<bool>()) {
            let relations: Vec<_> = (0..n)
                .map(|i| {
                    relation(format!("ep{i}"), "iface")
                        .relation_id(u32::try_from(i).unwrap_or(u32::MAX))
                        .build()
                })
                .collect::<ScenarioResult<_>>()
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let state = State::new().with_relations(relations);
            let meta = if breaking { MetaEvent::BreakAllRelations } else { MetaEvent::CreateAllRelations };

            let steps: Vec<_> = decompose_meta_event(&meta.event(), &state)
                .map_err(|e| TestCaseError::fail(e.to_string()))?
                .collect();
            prop_assert_eq!(steps.len(), n);
            for (i, (event, snapshot)) in steps.iter().enumerate() {
                prop_assert_eq!(&event.name, &format!("ep{i}{}", meta.suffix()));
                prop_assert_eq!(snapshot, &state);
            }
        }

        /// Startup always has relations + 4 steps; teardown relations + 2.
        #[test]
        fn prop_lifecycle_lengths(n in 0usize..8, leader in any::<bool>()) {
            let relations: Vec<_> = (0..n)
                .map(|i| relation("db", "pg").relation_id(u32::try_from(i).unwrap_or(u32::MAX)).build())
                .collect::<ScenarioResult<_>>()
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let state = State::new().with_leadership(leader).with_relations(relations);
            prop_assert_eq!(generate_startup_sequence(&state).count(), n + 4);
            prop_assert_eq!(generate_teardown_sequence(&state).count(), n + 2);
        }
    }
}
