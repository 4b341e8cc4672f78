//! The extensible value-conversion pipeline.
//!
//! When the structural copy cannot bridge a (source, target) pair by direct
//! assignment, the dispatcher falls through to this pipeline: an ordered list
//! of pluggable handlers matched by predicate on the pair.
//!
//! Two handler shapes exist:
//!
//! - a [`Converter`] is a pure transform producing a fresh value of the
//!   target type;
//! - a [`Copier`] writes into the target handle directly and may have side
//!   effects (invoking a function value, feeding a sink).
//!
//! Scan order is most-recently-registered first: the controller's own list,
//! then the process-wide defaults, then the built-in baseline, so later
//! registrations shadow earlier ones. A handler that matched but wants to decline
//! returns [`CopyError::Fallback`] and the scan continues.
//!
//! ## Numeric semantics
//!
//! Float-to-integer truncation rounds to nearest (8.49 becomes 8, 8.75
//! becomes 9). Conversions into unsigned types wrap per two's complement.
//! Integer parsing of strings falls back to a float literal and then a
//! complex literal when the integer parse fails.

use crate::engine::controller::Controller;
use crate::engine::errors::CopyError;
use crate::engine::marshal;
use crate::value::{StructValue, TypeSpec, Value, zero_time};
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};

/// A pure transform: produce a fresh value convertible to `to`.
pub trait Converter {
    /// Name used in debug traces.
    fn name(&self) -> &'static str;
    /// Predicate on the (source value, target type) pair.
    fn matches(&self, from: &Value, to: &TypeSpec) -> bool;
    /// Produce the converted value. Must not mutate caller-owned state.
    fn transform(&self, ctl: &Controller, from: &Value, to: &TypeSpec) -> Result<Value, CopyError>;
}

/// An in-place handler: write the source into the target handle directly.
pub trait Copier {
    fn name(&self) -> &'static str;
    fn matches(&self, from: &Value, to: &Value) -> bool;
    fn copy_to(&self, ctl: &Controller, from: &Value, to: &mut Value) -> Result<(), CopyError>;
}

pub type SharedConverter = Arc<dyn Converter + Send + Sync>;
pub type SharedCopier = Arc<dyn Copier + Send + Sync>;

// Process-wide registries. Registration is expected before concurrent use;
// the locks only guard the list structure itself.
static DEFAULT_CONVERTERS: Lazy<RwLock<Vec<SharedConverter>>> = Lazy::new(|| RwLock::new(Vec::new()));
static DEFAULT_COPIERS: Lazy<RwLock<Vec<SharedCopier>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// Register a converter on the process-wide default list.
pub fn register_default_converter(c: SharedConverter) {
    DEFAULT_CONVERTERS.write().expect("converter registry poisoned").push(c);
}

/// Register a copier on the process-wide default list.
pub fn register_default_copier(c: SharedCopier) {
    DEFAULT_COPIERS.write().expect("copier registry poisoned").push(c);
}

static BUILTIN_CONVERTERS: Lazy<Vec<SharedConverter>> = Lazy::new(|| {
    vec![
        Arc::new(StrToPrimitive),
        Arc::new(PrimitiveToStr),
        Arc::new(StrToTime),
        Arc::new(TimeToStr),
        Arc::new(StrToDuration),
        Arc::new(DurationToStr),
        Arc::new(DurationNumeric),
        Arc::new(TimeNumeric),
        Arc::new(BufferToBytes),
        Arc::new(BytesToBuffer),
        Arc::new(BytesSeq),
        Arc::new(MapToStr),
        Arc::new(StructToStr),
    ]
});

static BUILTIN_COPIERS: Lazy<Vec<SharedCopier>> = Lazy::new(|| vec![Arc::new(InvokeFunc), Arc::new(FeedFunc)]);

/// All converters visible to `ctl`, newest-registered first.
pub(crate) fn converter_chain(ctl: &Controller) -> Vec<SharedConverter> {
    let mut chain: Vec<SharedConverter> = ctl.converters().iter().rev().cloned().collect();
    chain.extend(DEFAULT_CONVERTERS.read().expect("converter registry poisoned").iter().rev().cloned());
    chain.extend(BUILTIN_CONVERTERS.iter().rev().cloned());
    chain
}

pub(crate) fn copier_chain(ctl: &Controller) -> Vec<SharedCopier> {
    let mut chain: Vec<SharedCopier> = ctl.copiers().iter().rev().cloned().collect();
    chain.extend(DEFAULT_COPIERS.read().expect("copier registry poisoned").iter().rev().cloned());
    chain.extend(BUILTIN_COPIERS.iter().rev().cloned());
    chain
}

/// First registered converter whose predicate accepts the pair.
pub fn find_converter(ctl: &Controller, from: &Value, to: &TypeSpec) -> Option<SharedConverter> {
    converter_chain(ctl).into_iter().find(|c| c.matches(from, to))
}

/// Run the pipeline for a pair the dispatcher could not assign directly.
pub(crate) fn pipeline_assign(ctl: &Controller, src: &Value, dst: &mut Value) -> Result<(), CopyError> {
    let to_spec = TypeSpec::of(dst);
    let converters_first = ctl.options().converters_first;
    for stage in 0..2 {
        let run_converters = (stage == 0) == converters_first;
        if run_converters {
            for c in converter_chain(ctl) {
                if !c.matches(src, &to_spec) {
                    continue;
                }
                crate::debug_log!("[convert] {} {} -> {}", c.name(), src.type_name(), to_spec.name());
                match c.transform(ctl, src, &to_spec) {
                    Err(e) if e.is_fallback() => continue,
                    Err(e) => return Err(e),
                    Ok(v) => {
                        *dst = v;
                        return Ok(());
                    }
                }
            }
        } else {
            for c in copier_chain(ctl) {
                if !c.matches(src, dst) {
                    continue;
                }
                crate::debug_log!("[copier] {} {} -> {}", c.name(), src.type_name(), dst.type_name());
                match c.copy_to(ctl, src, dst) {
                    Err(e) if e.is_fallback() => continue,
                    r => return r,
                }
            }
        }
    }
    Err(CopyError::unconvertible(src.type_name(), to_spec.name()))
}

// --- Direct convertibility ---------------------------------------------------

/// Assign-with-conversion for primitive pairs that need no registered
/// handler. Returns `None` when the pair is not directly convertible.
pub(crate) fn convert_primitive(from: &Value, to: &TypeSpec) -> Option<Value> {
    match to {
        TypeSpec::Any => Some(from.clone()),
        TypeSpec::Bool => match from {
            Value::Bool(b) => Some(Value::Bool(*b)),
            _ => None,
        },
        TypeSpec::Int => numeric_i64(from).map(Value::Int),
        TypeSpec::Uint => numeric_i64(from).map(|n| Value::Uint(n as u64)),
        TypeSpec::Uintptr => numeric_i64(from).map(|n| Value::Uintptr(n as u64)),
        TypeSpec::Float => match from {
            Value::Int(n) => Some(Value::Float(*n as f64)),
            Value::Uint(n) | Value::Uintptr(n) => Some(Value::Float(*n as f64)),
            Value::Float(f) => Some(Value::Float(*f)),
            _ => None,
        },
        TypeSpec::Complex => match from {
            Value::Complex(re, im) => Some(Value::Complex(*re, *im)),
            Value::Int(n) => Some(Value::Complex(*n as f64, 0.0)),
            Value::Uint(n) | Value::Uintptr(n) => Some(Value::Complex(*n as f64, 0.0)),
            Value::Float(f) => Some(Value::Complex(*f, 0.0)),
            _ => None,
        },
        TypeSpec::Str => match from {
            Value::Str(s) => Some(Value::Str(s.clone())),
            Value::Bytes(b) => Some(Value::Str(String::from_utf8_lossy(b).into_owned())),
            _ => None,
        },
        TypeSpec::Bytes => match from {
            Value::Bytes(b) => Some(Value::Bytes(b.clone())),
            Value::Str(s) => Some(Value::Bytes(s.clone().into_bytes())),
            _ => None,
        },
        TypeSpec::Time => match from {
            Value::Time(t) => Some(Value::Time(*t)),
            _ => None,
        },
        TypeSpec::Duration => match from {
            Value::Duration(ns) => Some(Value::Duration(*ns)),
            _ => None,
        },
        _ => None,
    }
}

/// The integer view of a numeric value. Floats round to nearest.
fn numeric_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Int(n) => Some(*n),
        Value::Uint(n) | Value::Uintptr(n) => Some(*n as i64),
        Value::Float(f) => Some(f.round() as i64),
        _ => None,
    }
}

// --- Textual parsing helpers -------------------------------------------------

/// Parse an integer, falling back to a float and then a complex literal.
pub(crate) fn parse_int_text(s: &str) -> Result<i64, CopyError> {
    let t = s.trim();
    if let Ok(n) = t.parse::<i64>() {
        return Ok(n);
    }
    if let Ok(f) = t.parse::<f64>() {
        return Ok(f.round() as i64);
    }
    if let Some((re, _)) = parse_complex_text(t) {
        return Ok(re.round() as i64);
    }
    Err(CopyError::Parse(format!("{t:?} is not an integer")))
}

/// Unsigned variant of [`parse_int_text`]; wide signed fallbacks wrap.
pub(crate) fn parse_uint_text(s: &str) -> Result<u64, CopyError> {
    let t = s.trim();
    if let Ok(n) = t.parse::<u64>() {
        return Ok(n);
    }
    parse_int_text(t).map(|n| n as u64)
}

pub(crate) fn parse_float_text(s: &str) -> Result<f64, CopyError> {
    let t = s.trim();
    if let Ok(f) = t.parse::<f64>() {
        return Ok(f);
    }
    if let Some((re, _)) = parse_complex_text(t) {
        return Ok(re);
    }
    Err(CopyError::Parse(format!("{t:?} is not a float")))
}

pub(crate) fn parse_bool_text(s: &str) -> Result<bool, CopyError> {
    match s.trim() {
        "true" | "True" | "TRUE" | "1" => Ok(true),
        "false" | "False" | "FALSE" | "0" => Ok(false),
        other => Err(CopyError::Parse(format!("{other:?} is not a bool"))),
    }
}

/// Parse a complex literal like `3+4i`, `3-4i`, `4i`, or a plain real.
pub(crate) fn parse_complex_text(s: &str) -> Option<(f64, f64)> {
    let t = s.trim();
    if let Some(imag) = t.strip_suffix('i') {
        // Split at the sign separating real and imaginary parts; skip the
        // leading sign of the real part itself.
        let bytes = imag.as_bytes();
        for idx in (1..bytes.len()).rev() {
            let c = bytes[idx] as char;
            if (c == '+' || c == '-') && !matches!(bytes[idx - 1] as char, 'e' | 'E') {
                let re: f64 = imag[..idx].parse().ok()?;
                let im_text = &imag[idx..];
                let im: f64 = if im_text == "+" || im_text == "-" {
                    if im_text == "+" { 1.0 } else { -1.0 }
                } else {
                    im_text.parse().ok()?
                };
                return Some((re, im));
            }
        }
        let im: f64 = if imag.is_empty() { 1.0 } else { imag.parse().ok()? };
        return Some((0.0, im));
    }
    t.parse::<f64>().ok().map(|re| (re, 0.0))
}

pub(crate) fn format_complex(re: f64, im: f64) -> String {
    if im < 0.0 { format!("{re}{im}i") } else { format!("{re}+{im}i") }
}

// --- Duration text -----------------------------------------------------------

const NS_PER_US: i64 = 1_000;
const NS_PER_MS: i64 = 1_000_000;
const NS_PER_SEC: i64 = 1_000_000_000;
const NS_PER_MIN: i64 = 60 * NS_PER_SEC;
const NS_PER_HOUR: i64 = 60 * NS_PER_MIN;

/// Format nanoseconds as `1h30m0s`, `250ms`, `1.5s` and so on.
pub(crate) fn format_duration(ns: i64) -> String {
    if ns == 0 {
        return "0s".to_string();
    }
    let neg = ns < 0;
    let mut u = ns.unsigned_abs();
    let mut out = String::new();
    if u < NS_PER_SEC as u64 {
        // Sub-second durations pick the largest fitting unit.
        let (div, unit) = if u < NS_PER_US as u64 {
            (1, "ns")
        } else if u < NS_PER_MS as u64 {
            (NS_PER_US as u64, "µs")
        } else {
            (NS_PER_MS as u64, "ms")
        };
        out.push_str(&format_scaled(u, div));
        out.push_str(unit);
    } else {
        let hours = u / NS_PER_HOUR as u64;
        u %= NS_PER_HOUR as u64;
        let mins = u / NS_PER_MIN as u64;
        u %= NS_PER_MIN as u64;
        if hours > 0 {
            out.push_str(&format!("{hours}h"));
        }
        if hours > 0 || mins > 0 {
            out.push_str(&format!("{mins}m"));
        }
        out.push_str(&format_scaled(u, NS_PER_SEC as u64));
        out.push('s');
    }
    if neg { format!("-{out}") } else { out }
}

fn format_scaled(value: u64, div: u64) -> String {
    let whole = value / div;
    let frac = value % div;
    if frac == 0 {
        return whole.to_string();
    }
    let width = div.ilog10() as usize;
    let mut frac_text = format!("{frac:0width$}");
    while frac_text.ends_with('0') {
        frac_text.pop();
    }
    format!("{whole}.{frac_text}")
}

/// Parse a duration literal: a signed sequence of `number[.fraction]unit`
/// pieces with units `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`.
pub(crate) fn parse_duration(s: &str) -> Result<i64, CopyError> {
    let t = s.trim();
    let bad = || CopyError::Parse(format!("{t:?} is not a duration"));
    let (neg, mut rest) = match t.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    if rest == "0" {
        return Ok(0);
    }
    if rest.is_empty() {
        return Err(bad());
    }
    let mut total = 0f64;
    while !rest.is_empty() {
        let num_len = rest.find(|c: char| !c.is_ascii_digit() && c != '.').ok_or_else(bad)?;
        if num_len == 0 {
            return Err(bad());
        }
        let num: f64 = rest[..num_len].parse().map_err(|_| bad())?;
        rest = &rest[num_len..];
        let (scale, used) = if let Some(r) = rest.strip_prefix("ns") {
            (1f64, r)
        } else if let Some(r) = rest.strip_prefix("us") {
            (NS_PER_US as f64, r)
        } else if let Some(r) = rest.strip_prefix("µs") {
            (NS_PER_US as f64, r)
        } else if let Some(r) = rest.strip_prefix("ms") {
            (NS_PER_MS as f64, r)
        } else if let Some(r) = rest.strip_prefix('s') {
            (NS_PER_SEC as f64, r)
        } else if let Some(r) = rest.strip_prefix('m') {
            (NS_PER_MIN as f64, r)
        } else if let Some(r) = rest.strip_prefix('h') {
            (NS_PER_HOUR as f64, r)
        } else {
            return Err(bad());
        };
        total += num * scale;
        rest = used;
    }
    let ns = total.round() as i64;
    Ok(if neg { -ns } else { ns })
}

// --- Time text ---------------------------------------------------------------

pub(crate) const TIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) fn parse_time(s: &str) -> Result<NaiveDateTime, CopyError> {
    let t = s.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(dt);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(t) {
        return Ok(dt.naive_utc());
    }
    if let Ok(d) = chrono::NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Ok(d.and_hms_opt(0, 0, 0).unwrap_or_else(|| zero_time()));
    }
    Err(CopyError::Parse(format!("{t:?} is not a time")))
}

pub(crate) fn format_time(t: &NaiveDateTime) -> String {
    t.format(TIME_LAYOUT).to_string()
}

// --- Built-in converters -----------------------------------------------------

struct StrToPrimitive;

impl Converter for StrToPrimitive {
    fn name(&self) -> &'static str {
        "str->primitive"
    }

    fn matches(&self, from: &Value, to: &TypeSpec) -> bool {
        matches!(from, Value::Str(_))
            && matches!(
                to,
                TypeSpec::Bool | TypeSpec::Int | TypeSpec::Uint | TypeSpec::Uintptr | TypeSpec::Float | TypeSpec::Complex
            )
    }

    fn transform(&self, _ctl: &Controller, from: &Value, to: &TypeSpec) -> Result<Value, CopyError> {
        let Value::Str(s) = from else { return Err(CopyError::Fallback) };
        Ok(match to {
            TypeSpec::Bool => Value::Bool(parse_bool_text(s)?),
            TypeSpec::Int => Value::Int(parse_int_text(s)?),
            TypeSpec::Uint => Value::Uint(parse_uint_text(s)?),
            TypeSpec::Uintptr => Value::Uintptr(parse_uint_text(s)?),
            TypeSpec::Float => Value::Float(parse_float_text(s)?),
            TypeSpec::Complex => {
                let (re, im) =
                    parse_complex_text(s).ok_or_else(|| CopyError::Parse(format!("{s:?} is not a complex")))?;
                Value::Complex(re, im)
            }
            _ => return Err(CopyError::Fallback),
        })
    }
}

struct PrimitiveToStr;

impl Converter for PrimitiveToStr {
    fn name(&self) -> &'static str {
        "primitive->str"
    }

    fn matches(&self, from: &Value, to: &TypeSpec) -> bool {
        matches!(to, TypeSpec::Str)
            && matches!(
                from,
                Value::Bool(_) | Value::Int(_) | Value::Uint(_) | Value::Uintptr(_) | Value::Float(_) | Value::Complex(_, _)
            )
    }

    fn transform(&self, _ctl: &Controller, from: &Value, _to: &TypeSpec) -> Result<Value, CopyError> {
        Ok(Value::Str(match from {
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Uint(n) | Value::Uintptr(n) => n.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Complex(re, im) => format_complex(*re, *im),
            _ => return Err(CopyError::Fallback),
        }))
    }
}

struct StrToTime;

impl Converter for StrToTime {
    fn name(&self) -> &'static str {
        "str->time"
    }

    fn matches(&self, from: &Value, to: &TypeSpec) -> bool {
        matches!(from, Value::Str(_)) && matches!(to, TypeSpec::Time)
    }

    fn transform(&self, _ctl: &Controller, from: &Value, _to: &TypeSpec) -> Result<Value, CopyError> {
        let Value::Str(s) = from else { return Err(CopyError::Fallback) };
        Ok(Value::Time(parse_time(s)?))
    }
}

struct TimeToStr;

impl Converter for TimeToStr {
    fn name(&self) -> &'static str {
        "time->str"
    }

    fn matches(&self, from: &Value, to: &TypeSpec) -> bool {
        matches!(from, Value::Time(_)) && matches!(to, TypeSpec::Str)
    }

    fn transform(&self, _ctl: &Controller, from: &Value, _to: &TypeSpec) -> Result<Value, CopyError> {
        let Value::Time(t) = from else { return Err(CopyError::Fallback) };
        Ok(Value::Str(format_time(t)))
    }
}

struct StrToDuration;

impl Converter for StrToDuration {
    fn name(&self) -> &'static str {
        "str->duration"
    }

    fn matches(&self, from: &Value, to: &TypeSpec) -> bool {
        matches!(from, Value::Str(_)) && matches!(to, TypeSpec::Duration)
    }

    fn transform(&self, _ctl: &Controller, from: &Value, _to: &TypeSpec) -> Result<Value, CopyError> {
        let Value::Str(s) = from else { return Err(CopyError::Fallback) };
        Ok(Value::Duration(parse_duration(s)?))
    }
}

struct DurationToStr;

impl Converter for DurationToStr {
    fn name(&self) -> &'static str {
        "duration->str"
    }

    fn matches(&self, from: &Value, to: &TypeSpec) -> bool {
        matches!(from, Value::Duration(_)) && matches!(to, TypeSpec::Str)
    }

    fn transform(&self, _ctl: &Controller, from: &Value, _to: &TypeSpec) -> Result<Value, CopyError> {
        let Value::Duration(ns) = from else { return Err(CopyError::Fallback) };
        Ok(Value::Str(format_duration(*ns)))
    }
}

struct DurationNumeric;

impl Converter for DurationNumeric {
    fn name(&self) -> &'static str {
        "duration<->numeric"
    }

    fn matches(&self, from: &Value, to: &TypeSpec) -> bool {
        (matches!(from, Value::Duration(_))
            && matches!(to, TypeSpec::Int | TypeSpec::Uint | TypeSpec::Float))
            || (matches!(from, Value::Int(_) | Value::Uint(_) | Value::Float(_)) && matches!(to, TypeSpec::Duration))
    }

    fn transform(&self, _ctl: &Controller, from: &Value, to: &TypeSpec) -> Result<Value, CopyError> {
        match (from, to) {
            (Value::Duration(ns), TypeSpec::Int) => Ok(Value::Int(*ns)),
            (Value::Duration(ns), TypeSpec::Uint) => Ok(Value::Uint(*ns as u64)),
            (Value::Duration(ns), TypeSpec::Float) => Ok(Value::Float(*ns as f64)),
            (Value::Int(n), TypeSpec::Duration) => Ok(Value::Duration(*n)),
            (Value::Uint(n), TypeSpec::Duration) => Ok(Value::Duration(*n as i64)),
            (Value::Float(f), TypeSpec::Duration) => Ok(Value::Duration(f.round() as i64)),
            _ => Err(CopyError::Fallback),
        }
    }
}

struct TimeNumeric;

impl Converter for TimeNumeric {
    fn name(&self) -> &'static str {
        "time<->numeric"
    }

    fn matches(&self, from: &Value, to: &TypeSpec) -> bool {
        (matches!(from, Value::Time(_)) && matches!(to, TypeSpec::Int | TypeSpec::Uint | TypeSpec::Float))
            || (matches!(from, Value::Int(_) | Value::Uint(_) | Value::Float(_)) && matches!(to, TypeSpec::Time))
    }

    fn transform(&self, _ctl: &Controller, from: &Value, to: &TypeSpec) -> Result<Value, CopyError> {
        match (from, to) {
            (Value::Time(t), TypeSpec::Int) => Ok(Value::Int(t.and_utc().timestamp())),
            (Value::Time(t), TypeSpec::Uint) => Ok(Value::Uint(t.and_utc().timestamp().max(0) as u64)),
            (Value::Time(t), TypeSpec::Float) => {
                let utc = t.and_utc();
                Ok(Value::Float(utc.timestamp() as f64 + utc.timestamp_subsec_nanos() as f64 / 1e9))
            }
            (Value::Int(n), TypeSpec::Time) => secs_to_time(*n),
            (Value::Uint(n), TypeSpec::Time) => secs_to_time(*n as i64),
            (Value::Float(f), TypeSpec::Time) => {
                let secs = f.trunc() as i64;
                let nanos = ((f - f.trunc()) * 1e9).round() as u32;
                chrono::DateTime::from_timestamp(secs, nanos)
                    .map(|dt| Value::Time(dt.naive_utc()))
                    .ok_or_else(|| CopyError::Parse(format!("{f} is out of time range")))
            }
            _ => Err(CopyError::Fallback),
        }
    }
}

fn secs_to_time(secs: i64) -> Result<Value, CopyError> {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| Value::Time(dt.naive_utc()))
        .ok_or_else(|| CopyError::Parse(format!("{secs} is out of time range")))
}

/// A byte-buffer struct is any struct type whose only field holds bytes.
fn buffer_field(v: &Value) -> Option<&Vec<u8>> {
    match v {
        Value::Struct(sv) if sv.fields.len() == 1 => match &sv.fields[0] {
            Value::Bytes(b) => Some(b),
            _ => None,
        },
        _ => None,
    }
}

struct BufferToBytes;

impl Converter for BufferToBytes {
    fn name(&self) -> &'static str {
        "buffer->bytes"
    }

    fn matches(&self, from: &Value, to: &TypeSpec) -> bool {
        buffer_field(from).is_some() && matches!(to, TypeSpec::Bytes | TypeSpec::Str)
    }

    fn transform(&self, _ctl: &Controller, from: &Value, to: &TypeSpec) -> Result<Value, CopyError> {
        let bytes = buffer_field(from).ok_or(CopyError::Fallback)?;
        Ok(match to {
            TypeSpec::Str => Value::Str(String::from_utf8_lossy(bytes).into_owned()),
            _ => Value::Bytes(bytes.clone()),
        })
    }
}

struct BytesToBuffer;

impl Converter for BytesToBuffer {
    fn name(&self) -> &'static str {
        "bytes->buffer"
    }

    fn matches(&self, from: &Value, to: &TypeSpec) -> bool {
        matches!(from, Value::Bytes(_) | Value::Str(_))
            && matches!(to, TypeSpec::Struct(ty)
                if ty.fields.len() == 1 && matches!(ty.fields[0].spec, TypeSpec::Bytes))
    }

    fn transform(&self, _ctl: &Controller, from: &Value, to: &TypeSpec) -> Result<Value, CopyError> {
        let TypeSpec::Struct(ty) = to else { return Err(CopyError::Fallback) };
        let bytes = match from {
            Value::Bytes(b) => b.clone(),
            Value::Str(s) => s.clone().into_bytes(),
            _ => return Err(CopyError::Fallback),
        };
        let mut sv = StructValue::new(ty.clone());
        sv.fields[0] = Value::Bytes(bytes);
        Ok(Value::Struct(sv))
    }
}

struct BytesSeq;

impl Converter for BytesSeq {
    fn name(&self) -> &'static str {
        "bytes<->slice"
    }

    fn matches(&self, from: &Value, to: &TypeSpec) -> bool {
        (matches!(from, Value::Bytes(_)) && matches!(to, TypeSpec::Seq(elem) if matches!(**elem, TypeSpec::Uint | TypeSpec::Int)))
            || (matches!(from, Value::Seq(_)) && matches!(to, TypeSpec::Bytes))
    }

    fn transform(&self, _ctl: &Controller, from: &Value, to: &TypeSpec) -> Result<Value, CopyError> {
        match (from, to) {
            (Value::Bytes(b), TypeSpec::Seq(elem)) => {
                let items = b
                    .iter()
                    .map(|&byte| match **elem {
                        TypeSpec::Int => Value::Int(byte as i64),
                        _ => Value::Uint(byte as u64),
                    })
                    .collect();
                Ok(Value::Seq(crate::value::SeqValue { elem: (**elem).clone(), items }))
            }
            (Value::Seq(sq), TypeSpec::Bytes) => {
                let mut out = Vec::with_capacity(sq.items.len());
                for item in &sq.items {
                    match item {
                        Value::Uint(n) => out.push(*n as u8),
                        Value::Int(n) => out.push(*n as u8),
                        _ => return Err(CopyError::Fallback),
                    }
                }
                Ok(Value::Bytes(out))
            }
            _ => Err(CopyError::Fallback),
        }
    }
}

struct MapToStr;

impl Converter for MapToStr {
    fn name(&self) -> &'static str {
        "map->str"
    }

    fn matches(&self, from: &Value, to: &TypeSpec) -> bool {
        matches!(from, Value::Map(_)) && matches!(to, TypeSpec::Str)
    }

    fn transform(&self, ctl: &Controller, from: &Value, _to: &TypeSpec) -> Result<Value, CopyError> {
        marshal::marshal_text(ctl, from).map(Value::Str)
    }
}

struct StructToStr;

impl Converter for StructToStr {
    fn name(&self) -> &'static str {
        "struct->str"
    }

    fn matches(&self, from: &Value, to: &TypeSpec) -> bool {
        matches!(from, Value::Struct(_)) && matches!(to, TypeSpec::Str)
    }

    fn transform(&self, ctl: &Controller, from: &Value, _to: &TypeSpec) -> Result<Value, CopyError> {
        marshal::marshal_text(ctl, from).map(Value::Str)
    }
}

// --- Built-in copiers --------------------------------------------------------

/// Invoke a function-valued source and route its result into the target.
/// Declines unless the controller opts in.
struct InvokeFunc;

impl Copier for InvokeFunc {
    fn name(&self) -> &'static str {
        "invoke-func"
    }

    fn matches(&self, from: &Value, to: &Value) -> bool {
        matches!(from, Value::Func(_)) && !matches!(to, Value::Func(_))
    }

    fn copy_to(&self, ctl: &Controller, from: &Value, to: &mut Value) -> Result<(), CopyError> {
        if !ctl.options().invoke_funcs {
            return Err(CopyError::Fallback);
        }
        let Value::Func(f) = from else { return Err(CopyError::Fallback) };
        let result = f.call(ctl.options().func_args.as_slice())?;
        ctl.copy_to(&result, to)
    }
}

/// Call a function-valued target with the source as its argument.
struct FeedFunc;

impl Copier for FeedFunc {
    fn name(&self) -> &'static str {
        "feed-func"
    }

    fn matches(&self, from: &Value, to: &Value) -> bool {
        matches!(to, Value::Func(_)) && !matches!(from, Value::Func(_))
    }

    fn copy_to(&self, ctl: &Controller, from: &Value, to: &mut Value) -> Result<(), CopyError> {
        if !ctl.options().feed_funcs {
            return Err(CopyError::Fallback);
        }
        let Value::Func(f) = to else { return Err(CopyError::Fallback) };
        f.call(&[from.clone()])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::controller::Options;

    fn ctl() -> Controller {
        Controller::new(Options::default())
    }

    #[test]
    fn float_to_int_rounds_to_nearest() {
        assert!(matches!(convert_primitive(&Value::Float(8.49), &TypeSpec::Int), Some(Value::Int(8))));
        assert!(matches!(convert_primitive(&Value::Float(8.75), &TypeSpec::Int), Some(Value::Int(9))));
        assert!(matches!(convert_primitive(&Value::Float(-2.5), &TypeSpec::Int), Some(Value::Int(-3))));
    }

    #[test]
    fn signed_to_unsigned_wraps() {
        match convert_primitive(&Value::Int(-1), &TypeSpec::Uint) {
            Some(Value::Uint(n)) => assert_eq!(n, u64::MAX),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn int_string_parse_falls_back_to_float_then_complex() {
        assert_eq!(parse_int_text("42").unwrap(), 42);
        assert_eq!(parse_int_text("8.75").unwrap(), 9);
        assert_eq!(parse_int_text("3+4i").unwrap(), 3);
        assert!(parse_int_text("wat").is_err());
    }

    #[test]
    fn uint_parse_primary_failure_uses_fallback() {
        assert_eq!(parse_uint_text("7").unwrap(), 7);
        // Primary u64 parse fails; the signed fallback wraps.
        assert_eq!(parse_uint_text("-1").unwrap(), u64::MAX);
        assert_eq!(parse_uint_text("2.6").unwrap(), 3);
    }

    #[test]
    fn complex_literals() {
        assert_eq!(parse_complex_text("3+4i"), Some((3.0, 4.0)));
        assert_eq!(parse_complex_text("3-4i"), Some((3.0, -4.0)));
        assert_eq!(parse_complex_text("4i"), Some((0.0, 4.0)));
        assert_eq!(parse_complex_text("2.5"), Some((2.5, 0.0)));
        assert_eq!(parse_complex_text("1e2+0.5i"), Some((100.0, 0.5)));
        assert_eq!(format_complex(3.0, -4.0), "3-4i");
        assert_eq!(format_complex(3.0, 4.0), "3+4i");
    }

    #[test]
    fn duration_round_trips() {
        for (ns, text) in [
            (0i64, "0s"),
            (250 * NS_PER_MS, "250ms"),
            (NS_PER_SEC + NS_PER_SEC / 2, "1.5s"),
            (NS_PER_HOUR + 30 * NS_PER_MIN, "1h30m0s"),
            (-5 * NS_PER_SEC, "-5s"),
            (123, "123ns"),
            (1_500, "1.5µs"),
        ] {
            assert_eq!(format_duration(ns), text);
            assert_eq!(parse_duration(text).unwrap(), ns, "parsing {text}");
        }
        assert_eq!(parse_duration("1h30m").unwrap(), NS_PER_HOUR + 30 * NS_PER_MIN);
        assert_eq!(parse_duration("1.5us").unwrap(), 1_500);
        assert!(parse_duration("3x").is_err());
        assert!(parse_duration("h").is_err());
    }

    #[test]
    fn time_round_trips() {
        let t = parse_time("2013-02-12 04:30:00").unwrap();
        assert_eq!(format_time(&t), "2013-02-12 04:30:00");
        assert!(parse_time("2013-02-12").is_ok());
        assert!(parse_time("2013-02-12T04:30:00Z").is_ok());
        assert!(parse_time("never").is_err());
    }

    #[test]
    fn pipeline_converts_string_to_int() {
        let ctl = ctl();
        let mut dst = Value::Int(0);
        pipeline_assign(&ctl, &Value::from("41"), &mut dst).unwrap();
        assert!(matches!(dst, Value::Int(41)));
    }

    #[test]
    fn pipeline_reports_unconvertible_pairs() {
        let ctl = ctl();
        let mut dst = Value::Bool(false);
        let err = pipeline_assign(&ctl, &Value::Time(zero_time()), &mut dst).unwrap_err();
        assert!(matches!(err, CopyError::Unconvertible { .. }));
    }

    #[test]
    fn last_registered_converter_wins() {
        struct Shadow;
        impl Converter for Shadow {
            fn name(&self) -> &'static str {
                "shadow"
            }
            fn matches(&self, from: &Value, to: &TypeSpec) -> bool {
                matches!(from, Value::Str(_)) && matches!(to, TypeSpec::Int)
            }
            fn transform(&self, _ctl: &Controller, _from: &Value, _to: &TypeSpec) -> Result<Value, CopyError> {
                Ok(Value::Int(-99))
            }
        }
        let mut ctl = ctl();
        ctl.register_converter(Arc::new(Shadow));
        let mut dst = Value::Int(0);
        pipeline_assign(&ctl, &Value::from("41"), &mut dst).unwrap();
        assert!(matches!(dst, Value::Int(-99)));
    }

    #[test]
    fn declined_handler_falls_through() {
        struct Decline;
        impl Converter for Decline {
            fn name(&self) -> &'static str {
                "decline"
            }
            fn matches(&self, from: &Value, to: &TypeSpec) -> bool {
                matches!(from, Value::Str(_)) && matches!(to, TypeSpec::Int)
            }
            fn transform(&self, _ctl: &Controller, _from: &Value, _to: &TypeSpec) -> Result<Value, CopyError> {
                Err(CopyError::Fallback)
            }
        }
        let mut ctl = ctl();
        ctl.register_converter(Arc::new(Decline));
        let mut dst = Value::Int(0);
        pipeline_assign(&ctl, &Value::from("41"), &mut dst).unwrap();
        // The declining converter was tried first, then the builtin parsed.
        assert!(matches!(dst, Value::Int(41)));
    }

    #[test]
    fn buffer_struct_converts_to_bytes() {
        let buf_ty = buffer_type();
        let mut sv = StructValue::new(buf_ty.clone());
        sv.fields[0] = Value::Bytes(b"abc".to_vec());
        let ctl = ctl();
        let mut dst = Value::Bytes(Vec::new());
        pipeline_assign(&ctl, &Value::Struct(sv), &mut dst).unwrap();
        assert!(matches!(&dst, Value::Bytes(b) if b == b"abc"));

        let mut back = crate::value::zero_of(&TypeSpec::Struct(buf_ty));
        pipeline_assign(&ctl, &Value::Bytes(b"xyz".to_vec()), &mut back).unwrap();
        assert!(matches!(&back, Value::Struct(sv) if matches!(&sv.fields[0], Value::Bytes(b) if b == b"xyz")));
    }

    fn buffer_type() -> std::rc::Rc<crate::value::StructType> {
        crate::value::StructType::builder("Buffer").field("Data", TypeSpec::Bytes).build()
    }

    #[test]
    fn invoke_func_copier_routes_result() {
        let mut opts = Options::default();
        opts.invoke_funcs = true;
        let ctl = Controller::new(opts);
        let f = crate::value::FuncValue::new(vec![], TypeSpec::Int, |_| Ok(Value::Int(12)));
        let mut dst = Value::Int(0);
        pipeline_assign(&ctl, &Value::Func(f), &mut dst).unwrap();
        assert!(matches!(dst, Value::Int(12)));
    }

    #[test]
    fn invoke_func_trailing_error_short_circuits() {
        let mut opts = Options::default();
        opts.invoke_funcs = true;
        let ctl = Controller::new(opts);
        let f = crate::value::FuncValue::new(vec![], TypeSpec::Int, |_| Err("boom".to_string()));
        let mut dst = Value::Int(0);
        let err = pipeline_assign(&ctl, &Value::Func(f), &mut dst).unwrap_err();
        assert!(matches!(err, CopyError::Call(msg) if msg == "boom"));
    }
}
