//! The structural copy engine.
//!
//! This module is the internal machinery behind [`crate::copy`] and
//! [`crate::Controller::copy_to`]. It is split into focused submodules under
//! `src/engine/` while keeping public paths stable (for example
//! `crate::Controller` and `crate::Converter`).
//!
//! ## How the parts work together
//!
//! At a high level, copying a value is a pipeline:
//!
//! ```text
//! Options ──── Controller::new                  (controller.rs)
//!                  │
//! (src, dst) ── copy_to ─ self_copy hook?
//!                  │
//!                  v
//!            copy_value                         (dispatch.rs)
//!              - omit / clear / shallow policy  (flags.rs, params.rs)
//!              - branch on source kind
//!                  │
//!        ┌─────────┼──────────────┐
//!        v         v              v
//!   FieldIter   merge_slice   pipeline_assign
//!  (accessor.rs) merge_map    (convert.rs)
//!        │      (merge.rs)        │
//!        └─────────┴──────────────┘
//!                  │ every nested value funnels back
//!                  v
//!            copy_value (recursion)
//! ```
//!
//! Per-invocation state lives in `params.rs`: the borrow-chained context
//! nodes and the visited table that terminates cycles. Field annotations are
//! parsed in `tag.rs`; struct/map stringification in `marshal.rs`; graph
//! comparison in `diff.rs`.
//!
//! ## Debugging
//!
//! Set `REMOLD_DEBUG=1` to print dispatch and conversion traces.

#[path = "engine/accessor.rs"]
mod accessor;
#[path = "engine/controller.rs"]
mod controller;
#[path = "engine/convert.rs"]
mod convert;
#[path = "engine/diff.rs"]
mod diff;
#[path = "engine/dispatch.rs"]
mod dispatch;
#[path = "engine/errors.rs"]
mod errors;
#[path = "engine/flags.rs"]
mod flags;
#[path = "engine/marshal.rs"]
mod marshal;
#[path = "engine/merge.rs"]
mod merge;
#[path = "engine/params.rs"]
mod params;
#[path = "engine/tag.rs"]
mod tag;

pub use controller::{Controller, Options};
pub use convert::{Converter, Copier, SharedConverter, SharedCopier, find_converter, register_default_converter, register_default_copier};
pub use diff::{Delta, DiffEntry, DiffOptions, diff};
pub use errors::CopyError;
pub use flags::{Group, MAP_GROUP, ORDER_GROUP, Policy, PolicySet, SLICE_GROUP, group_of};
pub use marshal::{MarshalFn, default_marshal};
pub use tag::{DEFAULT_TAG_KEY, FieldTag, NameRule};
