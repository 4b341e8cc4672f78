//! Collection strategies: slice replace/append/union and map replace/merge.
//!
//! Elements crossing a collection boundary are *coerced*: a zero value of the
//! declared element type is allocated and the element is copied into it
//! through the full dispatcher, so element-level conversions, tags, and
//! pointer bookkeeping all apply inside collections too. A declared `Any`
//! element adopts the source element's dynamic type.

use crate::engine::dispatch::copy_value;
use crate::engine::errors::{CopyError, ErrorList};
use crate::engine::flags::Policy;
use crate::engine::params::{Params, Run};
use crate::value::{MapValue, SeqValue, TypeSpec, Value, deep_equal, new_instance, zero_of};

/// Coerce one element into the declared `elem` type via the dispatcher.
pub(crate) fn coerce_elem(run: &mut Run, params: &Params, src: &Value, elem: &TypeSpec) -> Result<Value, CopyError> {
    let spec = concrete_or(elem, src);
    let mut out = zero_of(&spec);
    copy_value(run, params, src, &mut out)?;
    Ok(out)
}

/// A declared `Any` slot adopts the source's dynamic type.
fn concrete_or(declared: &TypeSpec, src: &Value) -> TypeSpec {
    match declared {
        TypeSpec::Any => TypeSpec::of(src),
        other => other.clone(),
    }
}

/// Apply the active slice strategy to `dst`.
///
/// `SLICE_COPY` replaces the target outright, `SLICE_COPY_APPEND` keeps the
/// existing elements and appends the coerced source, and `SLICE_MERGE` builds
/// the deduplicating union: target elements first, then source elements, each
/// appended only when the accumulator holds no structurally equal member yet.
pub(crate) fn merge_slice(
    run: &mut Run,
    params: &Params,
    src_items: &[Value],
    dst: &mut SeqValue,
    strategy: Policy,
) -> Result<(), CopyError> {
    let mut errors = ErrorList::new();
    let mut incoming = Vec::with_capacity(src_items.len());
    for (idx, item) in src_items.iter().enumerate() {
        let elem_params = params.child(format!("[{idx}]"), None);
        match coerce_elem(run, &elem_params, item, &dst.elem) {
            Ok(v) => incoming.push(v),
            Err(e) => errors.push_at(&elem_params.path(), e),
        }
    }

    match strategy {
        Policy::SLICE_COPY_APPEND => dst.items.extend(incoming),
        Policy::SLICE_MERGE => {
            // Target elements feed the accumulator first, so duplicates
            // already present in the target collapse as well.
            let existing = std::mem::take(&mut dst.items);
            let mut acc: Vec<Value> = Vec::new();
            for item in existing.into_iter().chain(incoming) {
                if !acc.iter().any(|kept| deep_equal(kept, &item)) {
                    acc.push(item);
                }
            }
            dst.items = acc;
        }
        _ => dst.items = incoming,
    }
    errors.into_result()
}

/// Apply the active map strategy to `dst`.
///
/// `MAP_COPY` rebuilds the target from the source alone; `MAP_MERGE` folds
/// the source in, recursing into values already present under the same key.
pub(crate) fn merge_map(
    run: &mut Run,
    params: &Params,
    src: &MapValue,
    dst: &mut MapValue,
    strategy: Policy,
) -> Result<(), CopyError> {
    // Declared Any on the target adopts the source's declared types, so a
    // rebuilt map stays as precise as possible.
    let key_spec = match &dst.key {
        TypeSpec::Any => src.key.clone(),
        other => other.clone(),
    };
    let val_spec = match &dst.val {
        TypeSpec::Any => src.val.clone(),
        other => other.clone(),
    };

    if strategy != Policy::MAP_MERGE {
        let mut fresh = MapValue::new(key_spec.clone(), val_spec.clone());
        let mut errors = ErrorList::new();
        for (k, v) in &src.entries {
            let entry_params = params.child(entry_name(k), None);
            let key = match coerce_elem(run, &entry_params, k, &key_spec) {
                Ok(key) => key,
                Err(e) => {
                    errors.push_at(&entry_params.path(), e);
                    continue;
                }
            };
            match coerce_elem(run, &entry_params, v, &val_spec) {
                Ok(val) => fresh.insert(key, val),
                Err(e) => errors.push_at(&entry_params.path(), e),
            }
        }
        *dst = fresh;
        return errors.into_result();
    }

    let mut errors = ErrorList::new();
    for (k, v) in &src.entries {
        let entry_params = params.child(entry_name(k), None);
        let key = match coerce_elem(run, &entry_params, k, &key_spec) {
            Ok(key) => key,
            Err(e) => {
                errors.push_at(&entry_params.path(), e);
                continue;
            }
        };
        if let Some(slot) = dst.get_mut(&key) {
            if let Err(e) = copy_value(run, &entry_params, v, slot) {
                errors.push_at(&entry_params.path(), e);
            }
            continue;
        }
        // Missing key: allocate a landing slot of the declared value type.
        // An Any slot prefers the source element's dynamic type.
        let slot_spec = concrete_or(&val_spec, v);
        let mut slot = new_instance(&slot_spec);
        match copy_value(run, &entry_params, v, &mut slot) {
            Ok(()) => dst.insert(key, slot),
            Err(e) => errors.push_at(&entry_params.path(), e),
        }
    }
    errors.into_result()
}

fn entry_name(key: &Value) -> String {
    match key {
        Value::Str(s) => s.clone(),
        other => other.preview(),
    }
}
