//! Per-traversal state: the context chain and the visited table.
//!
//! A [`Params`] node exists for each recursion level (struct field, slice
//! element, map entry, pointer dereference). Nodes are borrow-chained to
//! their parent, so leaving a composite drops its node and memory stays
//! bounded by the active recursion path, not the whole graph.
//!
//! Flag resolution walks controller-global flags, then node-local flags,
//! then the current field's annotation, then the parent chain; the first
//! layer that explicitly sets a member of the queried group wins, and an
//! entirely unset group falls back to its leader.
//!
//! The [`Visited`] table is allocated fresh per top-level invocation. It maps
//! a canonicalized address pair plus the pointee type name to the target
//! handle already produced for that source, which both terminates cycles and
//! preserves aliasing topology in the output graph.

use crate::engine::controller::Controller;
use crate::engine::flags::{Group, Policy, PolicySet};
use crate::engine::tag::FieldTag;
use crate::value::Handle;
use std::collections::HashMap;

/// Cycle table: `(lo_addr, hi_addr, type_name) -> produced target handle`.
///
/// The pair is stored lower-address-first so the key is stable regardless of
/// which side was seen first.
#[derive(Debug, Default)]
pub(crate) struct Visited {
    map: HashMap<(usize, usize, String), Handle>,
}

impl Visited {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(src: usize, dst: usize, ty: &str) -> (usize, usize, String) {
        let (lo, hi) = if src <= dst { (src, dst) } else { (dst, src) };
        (lo, hi, ty.to_string())
    }

    pub fn record(&mut self, src: usize, dst: usize, ty: &str, produced: Handle) {
        self.map.insert(Self::key(src, dst, ty), produced);
    }

    pub fn lookup(&self, src: usize, dst: usize, ty: &str) -> Option<Handle> {
        self.map.get(&Self::key(src, dst, ty)).cloned()
    }
}

/// Shared state for one top-level copy invocation.
pub(crate) struct Run<'c> {
    pub ctl: &'c Controller,
    pub visited: Visited,
    pub depth: usize,
}

impl<'c> Run<'c> {
    pub fn new(ctl: &'c Controller) -> Self {
        Run { ctl, visited: Visited::new(), depth: 0 }
    }
}

/// One traversal node: the field annotation in effect, node-local flags, and
/// a link to the parent level.
#[derive(Debug, Default)]
pub(crate) struct Params<'p> {
    pub parent: Option<&'p Params<'p>>,
    pub field: Option<FieldTag>,
    pub local: PolicySet,
    pub name: Option<String>,
}

impl<'p> Params<'p> {
    pub fn root() -> Params<'static> {
        Params::default()
    }

    /// Enter a named child (struct field, map entry, slice index).
    pub fn child<'a>(&'a self, name: impl Into<String>, field: Option<FieldTag>) -> Params<'a>
    where
        'p: 'a,
    {
        Params { parent: Some(self), field, local: PolicySet::new(), name: Some(name.into()) }
    }

    /// Dotted path from the root, for error context.
    pub fn path(&self) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(self);
        while let Some(p) = cur {
            if let Some(name) = &p.name {
                parts.push(name.as_str());
            }
            cur = p.parent;
        }
        parts.reverse();
        if parts.is_empty() { String::from("<root>") } else { parts.join(".") }
    }

    /// The active member of `group`, honoring the resolution order described
    /// in the module docs. Never fails: an unset group yields its leader.
    pub fn resolve(&self, ctl: &Controller, group: &Group) -> Policy {
        if ctl.options().policy.group_explicit(group) {
            return ctl.options().policy.active(group);
        }
        let mut cur = Some(self);
        while let Some(p) = cur {
            if p.local.group_explicit(group) {
                return p.local.active(group);
            }
            if let Some(tag) = &p.field {
                if tag.policy.group_explicit(group) {
                    return tag.policy.active(group);
                }
            }
            cur = p.parent;
        }
        group.leader
    }

    /// True when `flag` is set globally or at this node (locally or via the
    /// field annotation). Boolean toggles do not inherit from parents.
    pub fn has_flag(&self, ctl: &Controller, flag: Policy) -> bool {
        ctl.options().policy.has(flag)
            || self.local.has(flag)
            || self.field.as_ref().map(|t| t.policy.has(flag)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::controller::Options;
    use crate::engine::flags::{ORDER_GROUP, SLICE_GROUP};
    use crate::value::Value;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn visited_key_is_order_insensitive() {
        let mut v = Visited::new();
        let h: Handle = Rc::new(RefCell::new(Value::Int(1)));
        v.record(0x20, 0x10, "Node", h.clone());
        let hit = v.lookup(0x10, 0x20, "Node").unwrap();
        assert!(Rc::ptr_eq(&h, &hit));
        assert!(v.lookup(0x10, 0x20, "Other").is_none());
    }

    #[test]
    fn unset_groups_fall_back_to_leader() {
        let ctl = Controller::new(Options::default());
        let root = Params::root();
        assert_eq!(root.resolve(&ctl, &SLICE_GROUP), Policy::SLICE_COPY);
        assert_eq!(root.resolve(&ctl, &ORDER_GROUP), Policy::BY_ORDINAL);
    }

    #[test]
    fn controller_global_flags_win_first() {
        let ctl = Controller::new(Options::default().slice_merge());
        let root = Params::root();
        let tag = crate::engine::tag::FieldTag::parse(",slicecopyappend");
        let child = root.child("F", Some(tag));
        assert_eq!(child.resolve(&ctl, &SLICE_GROUP), Policy::SLICE_MERGE);
    }

    #[test]
    fn field_annotation_wins_over_parent_chain() {
        let ctl = Controller::new(Options::default());
        let mut root = Params::root();
        root.local.set(Policy::SLICE_COPY_APPEND);
        let tag = crate::engine::tag::FieldTag::parse(",slicemerge");
        let child = root.child("F", Some(tag));
        assert_eq!(child.resolve(&ctl, &SLICE_GROUP), Policy::SLICE_MERGE);
        // A child without its own annotation inherits from the chain.
        let plain = root.child("G", None);
        assert_eq!(plain.resolve(&ctl, &SLICE_GROUP), Policy::SLICE_COPY_APPEND);
    }

    #[test]
    fn path_is_dotted_from_root() {
        let root = Params::root();
        let a = root.child("A", None);
        let b = a.child("B", None);
        assert_eq!(b.path(), "A.B");
        assert_eq!(Params::root().path(), "<root>");
    }
}
