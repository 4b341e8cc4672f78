//! Text marshalling for struct/map-to-string copies.
//!
//! The chain is: controller-level override, then the target type's own
//! `text_marshal` hook, then the JSON default. The default renders through
//! `serde_json` with a cycle guard; a pointer loop marshals as `null` at the
//! point of re-entry.

use crate::engine::controller::Controller;
use crate::engine::convert::{format_complex, format_duration, format_time};
use crate::engine::errors::CopyError;
use crate::value::Value;
use std::collections::HashSet;
use std::rc::Rc;

/// A marshal override installed on [`crate::Options`].
pub type MarshalFn = fn(&Value) -> Result<Vec<u8>, CopyError>;

/// JSON rendering of a value, pretty-printed.
pub fn default_marshal(v: &Value) -> Result<Vec<u8>, CopyError> {
    let json = to_json(v, &mut HashSet::new())?;
    serde_json::to_vec_pretty(&json).map_err(|e| CopyError::Parse(e.to_string()))
}

/// Resolve the marshal chain for `v` and render it to a string.
pub(crate) fn marshal_text(ctl: &Controller, v: &Value) -> Result<String, CopyError> {
    let bytes = match ctl.options().marshaller {
        Some(m) => m(v)?,
        None => match v {
            Value::Struct(sv) => match &sv.ty.text_marshal {
                Some(hook) => (hook.as_ref())(v)?,
                None => default_marshal(v)?,
            },
            _ => default_marshal(v)?,
        },
    };
    String::from_utf8(bytes).map_err(|e| CopyError::Parse(e.to_string()))
}

fn to_json(v: &Value, seen: &mut HashSet<usize>) -> Result<serde_json::Value, CopyError> {
    use serde_json::{Map, Number, Value as Json};
    Ok(match v {
        Value::Nil => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => Json::Number(Number::from(*n)),
        Value::Uint(n) | Value::Uintptr(n) => Json::Number(Number::from(*n)),
        Value::Float(f) => Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| CopyError::Unsupported(format!("cannot marshal float {f}")))?,
        Value::Complex(re, im) => Json::String(format_complex(*re, *im)),
        Value::Str(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::String(String::from_utf8_lossy(b).into_owned()),
        Value::Time(t) => Json::String(format_time(t)),
        Value::Duration(ns) => Json::String(format_duration(*ns)),
        Value::Boxed(inner) => to_json(inner, seen)?,
        Value::Ptr(p) => match &p.target {
            None => Json::Null,
            Some(h) => {
                let addr = Rc::as_ptr(h) as usize;
                if !seen.insert(addr) {
                    return Ok(Json::Null);
                }
                let inner = to_json(&h.borrow(), seen)?;
                seen.remove(&addr);
                inner
            }
        },
        Value::Struct(sv) => {
            let mut obj = Map::new();
            for (fd, value) in sv.ty.fields.iter().zip(&sv.fields) {
                obj.insert(fd.name.clone(), to_json(value, seen)?);
            }
            Json::Object(obj)
        }
        Value::Seq(sq) => Json::Array(sq.items.iter().map(|i| to_json(i, seen)).collect::<Result<_, _>>()?),
        Value::Array(ar) => Json::Array(ar.items.iter().map(|i| to_json(i, seen)).collect::<Result<_, _>>()?),
        Value::Map(mv) => {
            let mut obj = Map::new();
            for (k, val) in &mv.entries {
                let key = match k {
                    Value::Str(s) => s.clone(),
                    other => other.preview(),
                };
                obj.insert(key, to_json(val, seen)?);
            }
            Json::Object(obj)
        }
        Value::Chan(_) | Value::Func(_) => {
            return Err(CopyError::Unsupported(format!("cannot marshal {}", v.type_name())));
        }
    })
}
