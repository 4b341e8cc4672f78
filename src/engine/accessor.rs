//! Field pairing between composite values.
//!
//! [`FieldIter`] precomputes a *plan*: the ordered list of (source field,
//! target slot) pairs the struct copier will walk. Planning up front keeps
//! iteration single-pass and lets flattening, renames, and ignore filters
//! compose without re-scanning either side.
//!
//! Two pairing modes exist. *Ordinal* walks the source fields in declaration
//! order against target positions, preferring a name match when one exists
//! and falling back to the positional slot. *By-name* walks the target fields
//! and looks each one up in the source under its (possibly remapped) name,
//! skipping fields the source does not offer.
//!
//! Embedded fields, and fields annotated `flat`, are expanded into the parent
//! namespace on both sides. Source expansion follows live values (through one
//! pointer level); target expansion only descends direct struct fields, since
//! a slot behind a pointer is reached by the dispatcher's pointer pre-step
//! instead. Types whose name carries an opaque prefix stay leaves.

use crate::engine::controller::Controller;
use crate::engine::errors::CopyError;
use crate::engine::flags::Policy;
use crate::engine::tag::{FieldTag, glob_match};
use crate::value::{FieldDef, StructValue, TypeSpec, Value, zero_of};

/// Pairing strategy for composite copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IterMode {
    Ordinal,
    ByName,
}

/// Where a paired source field lands on the target.
#[derive(Debug, Clone)]
pub(crate) enum SlotRef {
    /// Index path through (possibly flattened) target struct fields.
    Field(Vec<usize>),
    /// Entry in a map target, keyed by the field's offered name.
    MapKey(Value),
    /// The whole target value (zero-field composites).
    Whole,
}

/// One planned copy step.
#[derive(Debug)]
pub(crate) struct FieldPair {
    pub name: String,
    pub src: Value,
    pub tag: Option<FieldTag>,
    pub dst: SlotRef,
}

/// A precomputed pairing plan; see the module docs.
pub(crate) struct FieldIter {
    pairs: std::vec::IntoIter<FieldPair>,
}

impl Iterator for FieldIter {
    type Item = FieldPair;

    fn next(&mut self) -> Option<FieldPair> {
        self.pairs.next()
    }
}

struct SrcLeaf {
    declared: String,
    value: Value,
    tag: Option<FieldTag>,
}

impl SrcLeaf {
    /// The name this field offers itself under on the target side.
    fn offered(&self) -> &str {
        match &self.tag {
            Some(t) => t.target_name(&self.declared),
            None => &self.declared,
        }
    }

    fn ignored(&self, ctl: &Controller) -> bool {
        if self.tag.as_ref().map(FieldTag::ignored).unwrap_or(false) {
            return true;
        }
        ctl.options().ignore_names.iter().any(|pat| glob_match(pat, &self.declared))
    }
}

struct TgtLeaf {
    declared: String,
    path: Vec<usize>,
    tag: Option<FieldTag>,
}

impl TgtLeaf {
    /// The source-side name this slot wants to be filled from.
    fn wanted(&self) -> &str {
        match &self.tag {
            Some(t) => t.source_name(&self.declared),
            None => &self.declared,
        }
    }

    fn ignored(&self) -> bool {
        self.tag.as_ref().map(FieldTag::ignored).unwrap_or(false)
    }
}

impl FieldIter {
    pub fn new(ctl: &Controller, src: &Value, dst: &Value, mode: IterMode) -> Result<FieldIter, CopyError> {
        let src_leaves = source_leaves(ctl, src)?;
        let pairs = match dst {
            Value::Map(_) => pair_into_map(ctl, src_leaves),
            Value::Struct(sv) => {
                if src_leaves.is_empty() && matches!(src, Value::Struct(ssv) if ssv.ty.fields.is_empty()) {
                    // Zero-field composites copy as a unit.
                    vec![FieldPair { name: String::new(), src: src.clone(), tag: None, dst: SlotRef::Whole }]
                } else {
                    let tgt_leaves = target_leaves(ctl, &sv.ty.fields, &mut Vec::new());
                    match mode {
                        IterMode::Ordinal => pair_ordinal(ctl, src_leaves, tgt_leaves),
                        IterMode::ByName => pair_by_name(ctl, src_leaves, tgt_leaves),
                    }
                }
            }
            other => {
                return Err(CopyError::Unsupported(format!("cannot pair fields into {}", other.type_name())));
            }
        };
        Ok(FieldIter { pairs: pairs.into_iter() })
    }
}

/// Resolve a planned slot to a live target location.
///
/// Map slots are materialized on demand with a zero value of the declared
/// entry type, so the copier always has somewhere to write.
pub(crate) fn slot_mut<'v>(dst: &'v mut Value, slot: &SlotRef) -> Result<&'v mut Value, CopyError> {
    match slot {
        SlotRef::Whole => Ok(dst),
        SlotRef::Field(path) => {
            let mut cur = dst;
            for &idx in path {
                cur = match cur {
                    Value::Struct(sv) => {
                        sv.fields.get_mut(idx).ok_or_else(|| CopyError::Unsettable(format!("field #{idx} out of range")))?
                    }
                    other => {
                        return Err(CopyError::Unsettable(format!("{} has no fields", other.type_name())));
                    }
                };
            }
            Ok(cur)
        }
        SlotRef::MapKey(key) => match dst {
            Value::Map(mv) => {
                if mv.get(key).is_none() {
                    let zero = zero_of(&mv.val);
                    mv.insert(key.clone(), zero);
                }
                Ok(mv.get_mut(key).expect("entry inserted above"))
            }
            other => Err(CopyError::Unsettable(format!("{} is not a map", other.type_name()))),
        },
    }
}

fn parse_tag(ctl: &Controller, fd: &FieldDef) -> Option<FieldTag> {
    fd.tag(&ctl.options().tag_key).map(FieldTag::parse)
}

fn is_opaque(ctl: &Controller, name: &str) -> bool {
    ctl.options().opaque_types.iter().any(|prefix| name.starts_with(prefix.as_str()))
}

fn wants_flatten(ctl: &Controller, fd: &FieldDef, tag: &Option<FieldTag>) -> bool {
    (fd.embedded && ctl.options().auto_expand) || tag.as_ref().map(|t| t.policy.has(Policy::FLAT)).unwrap_or(false)
}

/// Flatten the source into leaves. Map sources contribute their string-keyed
/// entries as synthetic fields.
fn source_leaves(ctl: &Controller, src: &Value) -> Result<Vec<SrcLeaf>, CopyError> {
    match src {
        Value::Struct(sv) => {
            let mut out = Vec::with_capacity(sv.ty.fields.len());
            flatten_source(ctl, sv, &mut out);
            Ok(out)
        }
        Value::Map(mv) => Ok(mv
            .entries
            .iter()
            .filter_map(|(k, v)| match k {
                Value::Str(name) => {
                    Some(SrcLeaf { declared: name.clone(), value: v.clone(), tag: None })
                }
                _ => None,
            })
            .collect()),
        other => Err(CopyError::Unsupported(format!("cannot pair fields from {}", other.type_name()))),
    }
}

fn flatten_source(ctl: &Controller, sv: &StructValue, out: &mut Vec<SrcLeaf>) {
    for (fd, value) in sv.ty.fields.iter().zip(&sv.fields) {
        if !fd.exported && !ctl.options().copy_unexported {
            continue;
        }
        let tag = parse_tag(ctl, fd);
        if wants_flatten(ctl, fd, &tag) {
            // Expansion follows the live value through one pointer level.
            // An empty composite stays a leaf; there is nothing to descend
            // into and the field itself must still be yielded once.
            let inner = value.decode();
            if let Value::Struct(embedded) = &inner {
                if !is_opaque(ctl, &embedded.ty.name) && !embedded.ty.fields.is_empty() {
                    flatten_source(ctl, embedded, out);
                    continue;
                }
            }
        }
        out.push(SrcLeaf { declared: fd.name.clone(), value: value.clone(), tag });
    }
}

/// Flatten the target's declared layout into addressable leaves.
fn target_leaves(ctl: &Controller, fields: &[FieldDef], prefix: &mut Vec<usize>) -> Vec<TgtLeaf> {
    let mut out = Vec::with_capacity(fields.len());
    for (idx, fd) in fields.iter().enumerate() {
        if !fd.exported && !ctl.options().copy_unexported {
            continue;
        }
        let tag = parse_tag(ctl, fd);
        if wants_flatten(ctl, fd, &tag) {
            if let TypeSpec::Struct(ty) = &fd.spec {
                if !is_opaque(ctl, &ty.name) && !ty.fields.is_empty() {
                    prefix.push(idx);
                    out.extend(target_leaves(ctl, &ty.fields, prefix));
                    prefix.pop();
                    continue;
                }
            }
        }
        let mut path = prefix.clone();
        path.push(idx);
        out.push(TgtLeaf { declared: fd.name.clone(), path, tag });
    }
    out
}

fn pair_into_map(ctl: &Controller, src_leaves: Vec<SrcLeaf>) -> Vec<FieldPair> {
    src_leaves
        .into_iter()
        .filter(|leaf| !leaf.ignored(ctl))
        .map(|leaf| {
            let key = Value::Str(leaf.offered().to_string());
            FieldPair { name: leaf.offered().to_string(), src: leaf.value.clone(), tag: leaf.tag.clone(), dst: SlotRef::MapKey(key) }
        })
        .collect()
}

fn pair_ordinal(ctl: &Controller, src_leaves: Vec<SrcLeaf>, tgt_leaves: Vec<TgtLeaf>) -> Vec<FieldPair> {
    let sync_advance = ctl.options().sync_advance;
    let mut used = vec![false; tgt_leaves.len()];
    let mut pairs = Vec::new();
    let mut pos = 0usize;
    for leaf in src_leaves {
        if leaf.ignored(ctl) {
            if sync_advance {
                pos += 1;
            }
            continue;
        }
        let idx = match tgt_leaves
            .iter()
            .enumerate()
            .find(|(i, t)| !used[*i] && !t.ignored() && t.wanted() == leaf.offered())
            .map(|(i, _)| i)
        {
            Some(i) => i,
            None => {
                // Positional fallback: the next unused, non-ignored slot at or
                // after the running position.
                let mut p = pos;
                while p < tgt_leaves.len() && (used[p] || tgt_leaves[p].ignored()) {
                    p += 1;
                }
                if p >= tgt_leaves.len() {
                    pos += 1;
                    continue;
                }
                p
            }
        };
        used[idx] = true;
        let target = &tgt_leaves[idx];
        pairs.push(FieldPair {
            name: target.declared.clone(),
            src: leaf.value.clone(),
            tag: merge_tags(&leaf.tag, &target.tag),
            dst: SlotRef::Field(target.path.clone()),
        });
        pos += 1;
    }
    pairs
}

fn pair_by_name(ctl: &Controller, src_leaves: Vec<SrcLeaf>, tgt_leaves: Vec<TgtLeaf>) -> Vec<FieldPair> {
    let offered: Vec<(String, &SrcLeaf)> = src_leaves
        .iter()
        .filter(|leaf| !leaf.ignored(ctl))
        .map(|leaf| (leaf.offered().to_string(), leaf))
        .collect();
    let mut pairs = Vec::new();
    for target in &tgt_leaves {
        if target.ignored() {
            continue;
        }
        let Some((_, leaf)) = offered.iter().find(|(name, _)| name == target.wanted()) else {
            continue;
        };
        pairs.push(FieldPair {
            name: target.declared.clone(),
            src: leaf.value.clone(),
            tag: merge_tags(&leaf.tag, &target.tag),
            dst: SlotRef::Field(target.path.clone()),
        });
    }
    pairs
}

/// Fold the source and target annotations for a pair; target flags win.
fn merge_tags(src: &Option<FieldTag>, tgt: &Option<FieldTag>) -> Option<FieldTag> {
    match (src, tgt) {
        (None, None) => None,
        (Some(s), None) => Some(s.clone()),
        (None, Some(t)) => Some(t.clone()),
        (Some(s), Some(t)) => {
            let mut merged = s.clone();
            merged.policy.overlay(&t.policy);
            Some(merged)
        }
    }
}
