//! # scenario
//!
//! Deterministic state-transition testing for event-driven units.
//!
//! A test describes the environment a unit lives in as a [`State`]
//! snapshot, fires an [`Event`] at the unit through a
//! [`Dispatcher`](runtime::Dispatcher), and asserts on the snapshot that
//! comes back. Outbound calls the unit makes are answered from a
//! [`Context`](replay::Context), which can record them and replay them
//! later, strictly or loosely.
//!
//! ## Example
//!
//! ```rust
//! use scenario::prelude::*;
//!
//! let state = State::new().with_leadership(true);
//! let mut unit = |_: &DispatchedEvent, tools: &mut HookTools<'_>| -> UnitResult {
//!     if tools.is_leader()? {
//!         tools.status_set(StatusKind::Active, "ready", false)?;
//!     }
//!     Ok(())
//! };
//!
//! let out = trigger(&state, "start", &mut unit, UnitSpec::named("app"))?;
//! assert_eq!(out.status.unit.0, StatusKind::Active);
//! # Ok::<(), ScenarioError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::missing_const_for_fn,  // Many functions can't be const in stable Rust
    clippy::needless_pass_by_value,
)]

pub mod config;
pub mod diff;
pub mod error;
pub mod event;
pub mod replay;
pub mod runtime;
pub mod sequences;
pub mod state;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{ScenarioConfig, ScenarioConfigBuilder};
    pub use crate::diff::{JsonStructuralDiffer, PatchKind, PatchOp, StateDiffer};
    pub use crate::error::{ScenarioError, ScenarioResult};
    pub use crate::event::{event, Event, InjectRelation, MetaEvent};
    pub use crate::replay::{CachingPolicy, CallMode, Context, Memo};
    pub use crate::runtime::{
        trigger, DispatchedEvent, Dispatcher, HookTools, Runtime, Unit, UnitResult, UnitSpec,
    };
    pub use crate::sequences::{
        check_builtin_sequences, decompose_meta_event, generate_builtin_sequences,
        generate_startup_sequence, generate_teardown_sequence,
    };
    pub use crate::state::{
        container, network, relation, ConfigValue, ContainerSpec, RelationSpec, State, StatusKind,
    };
}

/// Re-export for public API
pub use error::{ScenarioError, ScenarioResult};
pub use event::Event;
pub use state::State;
