//! The kind dispatch table.
//!
//! [`copy_value`] is the single recursion point of the engine: every nested
//! copy, whatever route it arrived by (struct field, collection element,
//! pointer dereference, converter result), funnels back through here. The
//! function applies the omit/clear/shallow policies in effect at the current
//! node, then branches on the source kind against the target kind, falling
//! through to the converter/copier pipeline for pairs with no structural
//! rule.
//!
//! Pointer handling records the visited entry *before* recursing into the
//! pointee, so cyclic graphs terminate and aliased sources map to aliased
//! targets (same `Rc` identity) in the output.

use crate::engine::accessor::{FieldIter, IterMode, SlotRef, slot_mut};
use crate::engine::convert::{convert_primitive, pipeline_assign};
use crate::engine::errors::{CopyError, ErrorList};
use crate::engine::flags::{MAP_GROUP, ORDER_GROUP, Policy, SLICE_GROUP};
use crate::engine::merge::{merge_map, merge_slice};
use crate::engine::params::{Params, Run};
use crate::value::{Handle, TypeSpec, Value, deep_equal, zero_of};
use std::cell::RefCell;
use std::rc::Rc;

pub(crate) fn copy_value(run: &mut Run, params: &Params, src: &Value, dst: &mut Value) -> Result<(), CopyError> {
    run.depth += 1;
    let r = dispatch(run, params, src, dst);
    run.depth -= 1;
    r
}

fn dispatch(run: &mut Run, params: &Params, src: &Value, dst: &mut Value) -> Result<(), CopyError> {
    let ctl = run.ctl;
    crate::debug_log!(
        "[copy] depth={} path={} {} -> {}",
        run.depth,
        params.path(),
        src.preview(),
        dst.type_name()
    );

    // Source-side omissions.
    if params.has_flag(ctl, Policy::OMIT_EMPTY) && src.is_empty() {
        return Ok(());
    }
    if params.has_flag(ctl, Policy::OMIT_NIL) && src.is_nil() {
        return Ok(());
    }
    if params.has_flag(ctl, Policy::OMIT_ZERO) && src.is_zero() {
        return Ok(());
    }
    // Target-side omissions.
    if params.has_flag(ctl, Policy::TGT_OMIT_EMPTY) && dst.is_empty() {
        return Ok(());
    }
    if params.has_flag(ctl, Policy::TGT_OMIT_NIL) && dst.is_nil() {
        return Ok(());
    }
    if params.has_flag(ctl, Policy::TGT_OMIT_ZERO) && dst.is_zero() {
        return Ok(());
    }

    if params.has_flag(ctl, Policy::CLEAR_IF_EQ) && deep_equal(src, dst) {
        *dst = zero_of(&TypeSpec::of(dst));
        return Ok(());
    }

    // Shallow assignment shares pointer handles instead of copying pointees.
    if params.has_flag(ctl, Policy::SHALLOW) {
        *dst = src.clone();
        return Ok(());
    }

    // Write through interface boxes on the target side.
    if let Value::Boxed(inner) = dst {
        return copy_value(run, params, src, inner);
    }

    // Target pointer pre-step: a non-pointer source writing into a pointer
    // slot lands on the pointee. Pointer sources do their own bookkeeping.
    if !matches!(src, Value::Ptr(_) | Value::Nil) {
        if let Value::Ptr(dp) = dst {
            let handle: Handle = match &dp.target {
                Some(h) => h.clone(),
                None => {
                    if !ctl.options().auto_instantiate {
                        return Ok(());
                    }
                    let h = Rc::new(RefCell::new(zero_of(&dp.pointee)));
                    dp.target = Some(h.clone());
                    h
                }
            };
            let mut guard = handle
                .try_borrow_mut()
                .map_err(|_| CopyError::Unsettable(format!("{} is already borrowed", dst.type_name())))?;
            return copy_value(run, params, src, &mut guard);
        }
    }

    match src {
        Value::Nil => {
            // An invalid source is skipped unless the node asks for a reset.
            if params.has_flag(ctl, Policy::CLEAR_IF_INVALID) {
                *dst = zero_of(&TypeSpec::of(dst));
            }
            Ok(())
        }
        Value::Boxed(inner) => copy_value(run, params, inner, dst),
        Value::Ptr(_) => copy_pointer(run, params, src, dst),
        Value::Struct(_) => copy_struct_src(run, params, src, dst),
        Value::Seq(sq) => match dst {
            Value::Seq(dseq) => {
                let strategy = params.resolve(ctl, &SLICE_GROUP);
                merge_slice(run, params, &sq.items, dseq, strategy)
            }
            Value::Array(_) => copy_into_array(run, params, &sq.items, dst),
            Value::Nil => {
                *dst = deep_copy(run, params, src)?;
                Ok(())
            }
            _ => pipeline_assign(ctl, src, dst),
        },
        Value::Array(ar) => match dst {
            Value::Array(_) => copy_into_array(run, params, &ar.items, dst),
            Value::Seq(dseq) => {
                let strategy = params.resolve(ctl, &SLICE_GROUP);
                merge_slice(run, params, &ar.items, dseq, strategy)
            }
            Value::Nil => {
                *dst = deep_copy(run, params, src)?;
                Ok(())
            }
            _ => pipeline_assign(ctl, src, dst),
        },
        Value::Map(mv) => match dst {
            Value::Map(dmap) => {
                let strategy = params.resolve(ctl, &MAP_GROUP);
                merge_map(run, params, mv, dmap, strategy)
            }
            Value::Struct(_) => copy_struct(run, params, src, dst, IterMode::ByName),
            Value::Nil => {
                *dst = deep_copy(run, params, src)?;
                Ok(())
            }
            _ => pipeline_assign(ctl, src, dst),
        },
        Value::Chan(_) => match dst {
            Value::Chan(_) | Value::Nil => {
                // Channels copy by handle; both sides refer to one channel.
                *dst = src.clone();
                Ok(())
            }
            other => Err(CopyError::Unsupported(format!("cannot copy a channel into {}", other.type_name()))),
        },
        Value::Func(_) => match dst {
            Value::Func(_) | Value::Nil => {
                *dst = src.clone();
                Ok(())
            }
            _ => pipeline_assign(ctl, src, dst),
        },
        other => assign_primitive(ctl, other, dst),
    }
}

/// Scalars, strings, bytes, time, and duration: direct conversion when the
/// pair allows it, pipeline otherwise.
fn assign_primitive(
    ctl: &crate::engine::controller::Controller,
    src: &Value,
    dst: &mut Value,
) -> Result<(), CopyError> {
    if matches!(dst, Value::Nil) {
        // An untyped slot adopts the source as-is.
        *dst = src.clone();
        return Ok(());
    }
    let spec = TypeSpec::of(dst);
    if let Some(v) = convert_primitive(src, &spec) {
        *dst = v;
        return Ok(());
    }
    pipeline_assign(ctl, src, dst)
}

fn copy_pointer(run: &mut Run, params: &Params, src: &Value, dst: &mut Value) -> Result<(), CopyError> {
    let Value::Ptr(p) = src else { return Err(CopyError::Unsupported("pointer dispatch on non-pointer".into())) };
    let Some(src_handle) = &p.target else {
        // Nil pointer source behaves like an invalid source.
        if params.has_flag(run.ctl, Policy::CLEAR_IF_INVALID) {
            *dst = zero_of(&TypeSpec::of(dst));
        }
        return Ok(());
    };

    let src_addr = Rc::as_ptr(src_handle) as usize;
    let pointee_name = p.pointee.name();

    if let Value::Ptr(dp) = dst {
        if let Some(existing) = run.visited.lookup(src_addr, 0, &pointee_name) {
            // Second visit of this source cell: alias instead of re-copying.
            dp.pointee = p.pointee.clone();
            dp.target = Some(existing);
            return Ok(());
        }
        let out: Handle = match &dp.target {
            Some(h) => h.clone(),
            None => {
                let h = Rc::new(RefCell::new(zero_of(&p.pointee)));
                dp.pointee = p.pointee.clone();
                dp.target = Some(h.clone());
                h
            }
        };
        // Recorded before recursing so a cycle back to this cell resolves.
        run.visited.record(src_addr, 0, &pointee_name, out.clone());
        let pointee = src_handle
            .try_borrow()
            .map_err(|_| CopyError::Unsettable(format!("*{pointee_name} is already mutably borrowed")))?
            .clone();
        let mut guard = out
            .try_borrow_mut()
            .map_err(|_| CopyError::Unsettable(format!("*{pointee_name} aliases the source")))?;
        return copy_value(run, params, &pointee, &mut guard);
    }

    // Pointer into a non-pointer slot: dereference and continue.
    let pointee = src_handle
        .try_borrow()
        .map_err(|_| CopyError::Unsettable(format!("*{pointee_name} is already mutably borrowed")))?
        .clone();
    copy_value(run, params, &pointee, dst)
}

fn copy_struct_src(run: &mut Run, params: &Params, src: &Value, dst: &mut Value) -> Result<(), CopyError> {
    match dst {
        Value::Struct(_) | Value::Map(_) => {
            let mode = match params.resolve(run.ctl, &ORDER_GROUP) {
                Policy::BY_NAME => IterMode::ByName,
                _ => IterMode::Ordinal,
            };
            // Struct into map always pairs by name through map keys.
            copy_struct(run, params, src, dst, mode)
        }
        Value::Seq(dseq) => {
            let strategy = params.resolve(run.ctl, &SLICE_GROUP);
            merge_slice(run, params, std::slice::from_ref(src), dseq, strategy)
        }
        Value::Array(_) => copy_into_array(run, params, std::slice::from_ref(src), dst),
        Value::Nil => {
            *dst = deep_copy(run, params, src)?;
            Ok(())
        }
        _ => pipeline_assign(run.ctl, src, dst),
    }
}

/// Walk a precomputed field plan, isolating per-field failures.
pub(crate) fn copy_struct(
    run: &mut Run,
    params: &Params,
    src: &Value,
    dst: &mut Value,
    mode: IterMode,
) -> Result<(), CopyError> {
    let plan: Vec<_> = FieldIter::new(run.ctl, src, dst, mode)?.collect();
    let mut errors = ErrorList::new();
    for pair in plan {
        if matches!(pair.dst, SlotRef::Whole) {
            // Zero-field composites have no members to pair; copy as a unit.
            *dst = pair.src.clone();
            continue;
        }
        let child = params.child(pair.name.clone(), pair.tag.clone());
        let must = child.has_flag(run.ctl, Policy::MUST) || run.ctl.options().hard_fail;
        let slot = match slot_mut(dst, &pair.dst) {
            Ok(s) => s,
            Err(e) => {
                if must {
                    return Err(e.at(&child.path()));
                }
                errors.push_at(&child.path(), e);
                continue;
            }
        };
        if let Err(e) = copy_value(run, &child, &pair.src, slot) {
            if must {
                return Err(e.at(&child.path()));
            }
            errors.push_at(&child.path(), e);
        }
    }
    errors.into_result()
}

/// Fixed-length target: pairwise copy up to the shorter length, zero-fill
/// the remainder.
fn copy_into_array(run: &mut Run, params: &Params, src_items: &[Value], dst: &mut Value) -> Result<(), CopyError> {
    let Value::Array(ar) = dst else {
        return Err(CopyError::Unsupported(format!("expected array target, found {}", dst.type_name())));
    };
    let elem = ar.elem.clone();
    let n = src_items.len().min(ar.items.len());
    let mut errors = ErrorList::new();
    for idx in 0..n {
        let child = params.child(format!("[{idx}]"), None);
        let slot = &mut ar.items[idx];
        if let Err(e) = copy_value(run, &child, &src_items[idx], slot) {
            errors.push_at(&child.path(), e);
        }
    }
    for slot in ar.items.iter_mut().skip(n) {
        *slot = zero_of(&elem);
    }
    errors.into_result()
}

/// Produce a fresh deep copy of `src` through the full dispatcher, sharing
/// the surrounding run's visited table.
pub(crate) fn deep_copy(run: &mut Run, params: &Params, src: &Value) -> Result<Value, CopyError> {
    let mut out = zero_of(&TypeSpec::of(src));
    copy_value(run, params, src, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::controller::{Controller, Options};
    use crate::value::{PtrValue, StructType, StructValue};

    fn run_copy(ctl: &Controller, src: &Value, dst: &mut Value) -> Result<(), CopyError> {
        let mut run = Run::new(ctl);
        copy_value(&mut run, &Params::root(), src, dst)
    }

    #[test]
    fn primitive_assignment_converts() {
        let ctl = Controller::new(Options::default());
        let mut dst = Value::Int(0);
        run_copy(&ctl, &Value::Int(8), &mut dst).unwrap();
        assert!(matches!(dst, Value::Int(8)));

        let mut dst = Value::Int(0);
        run_copy(&ctl, &Value::Float(8.75), &mut dst).unwrap();
        assert!(matches!(dst, Value::Int(9)));

        let mut dst = Value::Str(String::new());
        run_copy(&ctl, &Value::Int(42), &mut dst).unwrap();
        assert!(matches!(&dst, Value::Str(s) if s == "42"));
    }

    #[test]
    fn nil_source_is_a_no_op_without_clear() {
        let ctl = Controller::new(Options::default());
        let mut dst = Value::Int(7);
        run_copy(&ctl, &Value::Nil, &mut dst).unwrap();
        assert!(matches!(dst, Value::Int(7)));

        let mut run = Run::new(&ctl);
        let mut root = Params::root();
        root.local.set(Policy::CLEAR_IF_INVALID);
        copy_value(&mut run, &root, &Value::Nil, &mut dst).unwrap();
        assert!(matches!(dst, Value::Int(0)));
    }

    #[test]
    fn omit_flags_skip_without_touching_target() {
        let ctl = Controller::new(Options::default());
        let mut run = Run::new(&ctl);
        let mut root = Params::root();
        root.local.set(Policy::OMIT_EMPTY);
        let mut dst = Value::from("keep");
        copy_value(&mut run, &root, &Value::Str(String::new()), &mut dst).unwrap();
        assert!(matches!(&dst, Value::Str(s) if s == "keep"));
    }

    #[test]
    fn clear_if_eq_zeroes_a_matching_target() {
        let ctl = Controller::new(Options::default());
        let mut run = Run::new(&ctl);
        let mut root = Params::root();
        root.local.set(Policy::CLEAR_IF_EQ);
        let mut dst = Value::Int(5);
        copy_value(&mut run, &root, &Value::Int(5), &mut dst).unwrap();
        assert!(matches!(dst, Value::Int(0)));
        // A non-matching source copies normally.
        let mut dst = Value::Int(5);
        copy_value(&mut run, &root, &Value::Int(6), &mut dst).unwrap();
        assert!(matches!(dst, Value::Int(6)));
    }

    #[test]
    fn pointer_target_receives_through_pointee() {
        let ctl = Controller::new(Options::default());
        let mut dst = Value::Ptr(PtrValue::nil(TypeSpec::Int));
        run_copy(&ctl, &Value::Int(3), &mut dst).unwrap();
        assert!(matches!(dst.decode(), Value::Int(3)));
    }

    #[test]
    fn pointer_target_without_instantiate_is_skipped() {
        let mut opts = Options::default();
        opts.auto_instantiate = false;
        let ctl = Controller::new(opts);
        let mut dst = Value::Ptr(PtrValue::nil(TypeSpec::Int));
        run_copy(&ctl, &Value::Int(3), &mut dst).unwrap();
        assert!(dst.is_nil());
    }

    #[test]
    fn pointer_source_dereferences_into_plain_target() {
        let ctl = Controller::new(Options::default());
        let src = Value::Ptr(PtrValue::to(Value::Int(11)));
        let mut dst = Value::Int(0);
        run_copy(&ctl, &src, &mut dst).unwrap();
        assert!(matches!(dst, Value::Int(11)));
    }

    #[test]
    fn aliased_pointers_stay_aliased_in_the_target() {
        let ctl = Controller::new(Options::default());
        let shared = Rc::new(RefCell::new(Value::Int(1)));
        let holder = StructType::builder("Holder")
            .field("A", TypeSpec::ptr(TypeSpec::Int))
            .field("B", TypeSpec::ptr(TypeSpec::Int))
            .build();
        let mut sv = StructValue::new(holder.clone());
        sv.set("A", Value::Ptr(PtrValue::share(TypeSpec::Int, shared.clone())));
        sv.set("B", Value::Ptr(PtrValue::share(TypeSpec::Int, shared)));

        let mut dst = Value::Struct(StructValue::new(holder));
        run_copy(&ctl, &Value::Struct(sv), &mut dst).unwrap();
        let Value::Struct(out) = &dst else { panic!() };
        let (Some(Value::Ptr(a)), Some(Value::Ptr(b))) = (out.field("A"), out.field("B")) else { panic!() };
        let (ha, hb) = (a.target.as_ref().unwrap(), b.target.as_ref().unwrap());
        assert!(Rc::ptr_eq(ha, hb));
        // And the copy is detached from the source cell.
        *ha.borrow_mut() = Value::Int(99);
        assert!(matches!(dst.decode(), Value::Struct(_)));
    }

    #[test]
    fn cyclic_graphs_terminate() {
        let node = StructType::builder("Node")
            .field("Label", TypeSpec::Str)
            .field("Next", TypeSpec::ptr(TypeSpec::Any))
            .build();
        let cell = Rc::new(RefCell::new(Value::Struct(StructValue::new(node.clone()))));
        {
            let loopback = Value::Ptr(PtrValue::share(TypeSpec::Any, cell.clone()));
            let mut sv = cell.borrow_mut();
            if let Value::Struct(s) = &mut *sv {
                s.set("Label", Value::from("head"));
                s.set("Next", loopback);
            }
        }
        let src = Value::Ptr(PtrValue::share(TypeSpec::Any, cell));

        let ctl = Controller::new(Options::default());
        let mut dst = Value::Ptr(PtrValue::nil(TypeSpec::Any));
        run_copy(&ctl, &src, &mut dst).unwrap();

        // The copy closes its own loop rather than chaining back to the source.
        let Value::Ptr(dp) = &dst else { panic!() };
        let out_cell = dp.target.as_ref().unwrap();
        let inner = out_cell.borrow();
        let Value::Struct(sv) = &*inner else { panic!("{inner:?}") };
        let Some(Value::Ptr(next)) = sv.field("Next") else { panic!() };
        assert!(Rc::ptr_eq(next.target.as_ref().unwrap(), out_cell));
    }

    #[test]
    fn struct_fields_fail_independently() {
        let ty = StructType::builder("T").field("N", TypeSpec::Int).field("D", TypeSpec::Duration).build();
        // Source fields are loosely typed here; each converts independently.
        let loose = StructType::builder("T").field("N", TypeSpec::Any).field("D", TypeSpec::Any).build();
        let mut lsv = StructValue::new(loose);
        lsv.set("N", Value::from("5"));
        lsv.set("D", Value::from("bogus"));

        let ctl = Controller::new(Options::default());
        let mut dst = Value::Struct(StructValue::new(ty));
        let err = run_copy(&ctl, &Value::Struct(lsv), &mut dst).unwrap_err();
        assert!(matches!(err, CopyError::Field { ref path, .. } if path == "D"), "got {err:?}");
        // The good field landed despite the bad one.
        let Value::Struct(out) = &dst else { panic!() };
        assert!(matches!(out.field("N"), Some(Value::Int(5))));
    }

    #[test]
    fn hard_fail_escalates_the_first_field_error() {
        let ty = StructType::builder("T").field("D", TypeSpec::Duration).field("N", TypeSpec::Int).build();
        let loose = StructType::builder("T").field("D", TypeSpec::Any).field("N", TypeSpec::Any).build();
        let mut lsv = StructValue::new(loose);
        lsv.set("D", Value::from("bogus"));
        lsv.set("N", Value::from("5"));

        let mut opts = Options::default();
        opts.hard_fail = true;
        let ctl = Controller::new(opts);
        let mut dst = Value::Struct(StructValue::new(ty));
        assert!(run_copy(&ctl, &Value::Struct(lsv), &mut dst).is_err());
        let Value::Struct(out) = &dst else { panic!() };
        // Escalation stopped the walk before the second field.
        assert!(matches!(out.field("N"), Some(Value::Int(0))));
    }

    #[test]
    fn shallow_shares_pointer_handles() {
        let ctl = Controller::new(Options::default());
        let mut run = Run::new(&ctl);
        let mut root = Params::root();
        root.local.set(Policy::SHALLOW);
        let cell = Rc::new(RefCell::new(Value::Int(4)));
        let src = Value::Ptr(PtrValue::share(TypeSpec::Int, cell.clone()));
        let mut dst = Value::Ptr(PtrValue::nil(TypeSpec::Int));
        copy_value(&mut run, &root, &src, &mut dst).unwrap();
        let Value::Ptr(dp) = &dst else { panic!() };
        assert!(Rc::ptr_eq(dp.target.as_ref().unwrap(), &cell));
    }

    #[test]
    fn array_target_zero_fills_the_tail() {
        let ctl = Controller::new(Options::default());
        let src = Value::Seq(crate::value::SeqValue { elem: TypeSpec::Int, items: vec![Value::Int(1)] });
        let mut dst = Value::Array(crate::value::ArrayValue::new(TypeSpec::Int, 3));
        {
            let Value::Array(ar) = &mut dst else { panic!() };
            ar.items = vec![Value::Int(7), Value::Int(8), Value::Int(9)];
        }
        run_copy(&ctl, &src, &mut dst).unwrap();
        let Value::Array(ar) = &dst else { panic!() };
        assert!(matches!(ar.items[0], Value::Int(1)));
        assert!(matches!(ar.items[1], Value::Int(0)));
        assert!(matches!(ar.items[2], Value::Int(0)));
    }

    #[test]
    fn map_source_fills_struct_by_name() {
        let ty = StructType::builder("Brief").field("Age", TypeSpec::Int).build();
        let mut mv = crate::value::MapValue::new(TypeSpec::Str, TypeSpec::Any);
        mv.insert(Value::from("Age"), Value::Int(30));
        mv.insert(Value::from("Other"), Value::Int(1));
        let ctl = Controller::new(Options::default());
        let mut dst = Value::Struct(StructValue::new(ty));
        run_copy(&ctl, &Value::Map(mv), &mut dst).unwrap();
        let Value::Struct(out) = &dst else { panic!() };
        assert!(matches!(out.field("Age"), Some(Value::Int(30))));
    }

    #[test]
    fn struct_source_fills_map_by_keys() {
        let ty = StructType::builder("P").field("Name", TypeSpec::Str).build();
        let mut sv = StructValue::new(ty);
        sv.set("Name", Value::from("Bob"));
        let ctl = Controller::new(Options::default());
        let mut dst = Value::Map(crate::value::MapValue::new(TypeSpec::Str, TypeSpec::Any));
        run_copy(&ctl, &Value::Struct(sv), &mut dst).unwrap();
        let Value::Map(out) = &dst else { panic!() };
        assert!(matches!(out.get(&Value::from("Name")), Some(Value::Str(s)) if s == "Bob"));
    }

    #[test]
    fn channels_share_identity_across_copies() {
        let ctl = Controller::new(Options::default());
        let src = Value::Chan(crate::value::ChanValue::new(2));
        let mut dst = Value::Nil;
        run_copy(&ctl, &src, &mut dst).unwrap();
        let (Value::Chan(a), Value::Chan(b)) = (&src, &dst) else { panic!() };
        assert!(a.same_channel(b));
    }
}
