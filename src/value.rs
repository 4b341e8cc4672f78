//! The dynamic value model.
//!
//! The engine copies *values*, not Rust types: every datum is a [`Value`], a
//! tagged union over the kinds the dispatcher understands (scalars, strings,
//! byte buffers, time, pointers, boxed/interface values, structs, sequences,
//! arrays, maps, channels, and function values). A slot's *declared* type is a
//! [`TypeSpec`]; a value's *dynamic* type is recovered with [`TypeSpec::of`].
//!
//! Pointers are `Rc<RefCell<Value>>` handles, which gives the two properties
//! the traversal needs: identity (for the visited/cycle table) and interior
//! mutability (for writing through a shared target). Cloning a `Value` is
//! deep *up to* pointer boundaries, so self-referential graphs stay finite.
//!
//! Struct layout lives in an [`StructType`] descriptor shared by all
//! instances of that type: ordered [`FieldDef`]s carrying the raw annotation
//! strings, the embedded/exported bits, and optional capability hooks
//! (`self_copy`, `text_marshal`).

use crate::engine::CopyError;
use chrono::NaiveDateTime;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

/// A live pointer cell.
pub type Handle = Rc<RefCell<Value>>;

/// Runtime kind of a [`Value`]: one row of the dispatch table each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Nil,
    Bool,
    Int,
    Uint,
    Uintptr,
    Float,
    Complex,
    Str,
    Bytes,
    Time,
    Duration,
    Ptr,
    Boxed,
    Struct,
    Seq,
    Array,
    Map,
    Chan,
    Func,
}

impl Kind {
    pub fn name(self) -> &'static str {
        match self {
            Kind::Nil => "nil",
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Uint => "uint",
            Kind::Uintptr => "uintptr",
            Kind::Float => "float",
            Kind::Complex => "complex",
            Kind::Str => "string",
            Kind::Bytes => "bytes",
            Kind::Time => "time",
            Kind::Duration => "duration",
            Kind::Ptr => "pointer",
            Kind::Boxed => "boxed",
            Kind::Struct => "struct",
            Kind::Seq => "slice",
            Kind::Array => "array",
            Kind::Map => "map",
            Kind::Chan => "chan",
            Kind::Func => "func",
        }
    }
}

// --- Declared types ----------------------------------------------------------

/// Declared (static) type of a slot.
///
/// `Any` is the abstract/interface type: a slot that accepts any dynamic
/// value. Collection specs carry their element types so empty collections
/// still know what to coerce incoming elements to.
#[derive(Clone, Debug)]
pub enum TypeSpec {
    Any,
    Bool,
    Int,
    Uint,
    Uintptr,
    Float,
    Complex,
    Str,
    Bytes,
    Time,
    Duration,
    Ptr(Box<TypeSpec>),
    Seq(Box<TypeSpec>),
    Array(Box<TypeSpec>, usize),
    Map(Box<TypeSpec>, Box<TypeSpec>),
    Struct(Rc<StructType>),
    Chan(usize),
    Func,
}

impl TypeSpec {
    pub fn ptr(inner: TypeSpec) -> TypeSpec {
        TypeSpec::Ptr(Box::new(inner))
    }

    pub fn seq(elem: TypeSpec) -> TypeSpec {
        TypeSpec::Seq(Box::new(elem))
    }

    pub fn array(elem: TypeSpec, len: usize) -> TypeSpec {
        TypeSpec::Array(Box::new(elem), len)
    }

    pub fn map(key: TypeSpec, val: TypeSpec) -> TypeSpec {
        TypeSpec::Map(Box::new(key), Box::new(val))
    }

    /// The kind a value of this type has at runtime.
    pub fn kind(&self) -> Kind {
        match self {
            TypeSpec::Any => Kind::Boxed,
            TypeSpec::Bool => Kind::Bool,
            TypeSpec::Int => Kind::Int,
            TypeSpec::Uint => Kind::Uint,
            TypeSpec::Uintptr => Kind::Uintptr,
            TypeSpec::Float => Kind::Float,
            TypeSpec::Complex => Kind::Complex,
            TypeSpec::Str => Kind::Str,
            TypeSpec::Bytes => Kind::Bytes,
            TypeSpec::Time => Kind::Time,
            TypeSpec::Duration => Kind::Duration,
            TypeSpec::Ptr(_) => Kind::Ptr,
            TypeSpec::Seq(_) => Kind::Seq,
            TypeSpec::Array(_, _) => Kind::Array,
            TypeSpec::Map(_, _) => Kind::Map,
            TypeSpec::Struct(_) => Kind::Struct,
            TypeSpec::Chan(_) => Kind::Chan,
            TypeSpec::Func => Kind::Func,
        }
    }

    /// Human-readable type name, used in error messages and visited keys.
    pub fn name(&self) -> String {
        match self {
            TypeSpec::Any => "any".into(),
            TypeSpec::Bool => "bool".into(),
            TypeSpec::Int => "int".into(),
            TypeSpec::Uint => "uint".into(),
            TypeSpec::Uintptr => "uintptr".into(),
            TypeSpec::Float => "float".into(),
            TypeSpec::Complex => "complex".into(),
            TypeSpec::Str => "string".into(),
            TypeSpec::Bytes => "bytes".into(),
            TypeSpec::Time => "time".into(),
            TypeSpec::Duration => "duration".into(),
            TypeSpec::Ptr(inner) => format!("*{}", inner.name()),
            TypeSpec::Seq(elem) => format!("[]{}", elem.name()),
            TypeSpec::Array(elem, len) => format!("[{}]{}", len, elem.name()),
            TypeSpec::Map(k, v) => format!("map[{}]{}", k.name(), v.name()),
            TypeSpec::Struct(ty) => ty.name.clone(),
            TypeSpec::Chan(cap) => format!("chan({cap})"),
            TypeSpec::Func => "func".into(),
        }
    }

    /// Dynamic type of a value.
    pub fn of(v: &Value) -> TypeSpec {
        match v {
            Value::Nil => TypeSpec::Any,
            Value::Bool(_) => TypeSpec::Bool,
            Value::Int(_) => TypeSpec::Int,
            Value::Uint(_) => TypeSpec::Uint,
            Value::Uintptr(_) => TypeSpec::Uintptr,
            Value::Float(_) => TypeSpec::Float,
            Value::Complex(_, _) => TypeSpec::Complex,
            Value::Str(_) => TypeSpec::Str,
            Value::Bytes(_) => TypeSpec::Bytes,
            Value::Time(_) => TypeSpec::Time,
            Value::Duration(_) => TypeSpec::Duration,
            Value::Ptr(p) => TypeSpec::ptr(p.pointee.clone()),
            Value::Boxed(inner) => TypeSpec::of(inner),
            Value::Struct(sv) => TypeSpec::Struct(sv.ty.clone()),
            Value::Seq(sq) => TypeSpec::seq(sq.elem.clone()),
            Value::Array(ar) => TypeSpec::array(ar.elem.clone(), ar.items.len()),
            Value::Map(mv) => TypeSpec::map(mv.key.clone(), mv.val.clone()),
            Value::Chan(ch) => TypeSpec::Chan(ch.capacity),
            Value::Func(_) => TypeSpec::Func,
        }
    }
}

// --- Struct descriptors ------------------------------------------------------

/// One declared struct field: name, declared type, raw annotation strings
/// keyed by tag key, and the embedded/exported bits.
#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: String,
    pub spec: TypeSpec,
    pub tags: Vec<(String, String)>,
    pub embedded: bool,
    pub exported: bool,
}

impl FieldDef {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// Native clone-self capability: produce a replacement target from the
/// source, or return [`CopyError::Fallback`] to hand back to the engine.
pub type SelfCopyFn = Rc<dyn Fn(&Value) -> Result<Value, CopyError>>;

/// Per-type text-marshal capability (struct-to-string fallback chain).
pub type TextMarshalFn = Rc<dyn Fn(&Value) -> Result<Vec<u8>, CopyError>>;

/// Shared descriptor for a named struct type.
pub struct StructType {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub self_copy: Option<SelfCopyFn>,
    pub text_marshal: Option<TextMarshalFn>,
}

impl fmt::Debug for StructType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructType").field("name", &self.name).field("fields", &self.fields).finish()
    }
}

impl StructType {
    pub fn builder(name: &str) -> StructTypeBuilder {
        StructTypeBuilder {
            ty: StructType { name: name.to_string(), fields: Vec::new(), self_copy: None, text_marshal: None },
        }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|fd| fd.name == name)
    }
}

/// Builder for [`StructType`] descriptors.
pub struct StructTypeBuilder {
    ty: StructType,
}

impl StructTypeBuilder {
    pub fn field(self, name: &str, spec: TypeSpec) -> Self {
        self.push(name, spec, None, false, true)
    }

    /// Field with an annotation string under the default `copy` tag key.
    pub fn tagged_field(self, name: &str, spec: TypeSpec, tag: &str) -> Self {
        self.push(name, spec, Some(("copy", tag)), false, true)
    }

    /// Field with an annotation string under an explicit tag key.
    pub fn keyed_field(self, name: &str, spec: TypeSpec, key: &str, tag: &str) -> Self {
        self.push(name, spec, Some((key, tag)), false, true)
    }

    /// Anonymous/embedded sub-structure, flattened by the accessor.
    pub fn embedded(self, name: &str, spec: TypeSpec) -> Self {
        self.push(name, spec, None, true, true)
    }

    /// Non-public field, skipped unless `copy_unexported` is enabled.
    pub fn unexported(self, name: &str, spec: TypeSpec) -> Self {
        self.push(name, spec, None, false, false)
    }

    fn push(mut self, name: &str, spec: TypeSpec, tag: Option<(&str, &str)>, embedded: bool, exported: bool) -> Self {
        let tags = tag.map(|(k, v)| vec![(k.to_string(), v.to_string())]).unwrap_or_default();
        self.ty.fields.push(FieldDef { name: name.to_string(), spec, tags, embedded, exported });
        self
    }

    pub fn self_copy(mut self, f: SelfCopyFn) -> Self {
        self.ty.self_copy = Some(f);
        self
    }

    pub fn text_marshal(mut self, f: TextMarshalFn) -> Self {
        self.ty.text_marshal = Some(f);
        self
    }

    pub fn build(self) -> Rc<StructType> {
        Rc::new(self.ty)
    }
}

/// A struct instance: shared descriptor plus one value per declared field.
#[derive(Clone, Debug)]
pub struct StructValue {
    pub ty: Rc<StructType>,
    pub fields: Vec<Value>,
}

impl StructValue {
    /// A zero-valued instance of `ty`.
    pub fn new(ty: Rc<StructType>) -> Self {
        let fields = ty.fields.iter().map(|fd| zero_of(&fd.spec)).collect();
        StructValue { ty, fields }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.ty.field_index(name).map(|i| &self.fields[i])
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.ty.field_index(name).map(move |i| &mut self.fields[i])
    }

    /// Set a field by name; returns false if the type has no such field.
    pub fn set(&mut self, name: &str, value: Value) -> bool {
        match self.ty.field_index(name) {
            Some(i) => {
                self.fields[i] = value;
                true
            }
            None => false,
        }
    }
}

// --- Collections -------------------------------------------------------------

/// A growable sequence with a declared element type.
#[derive(Clone, Debug)]
pub struct SeqValue {
    pub elem: TypeSpec,
    pub items: Vec<Value>,
}

impl SeqValue {
    pub fn new(elem: TypeSpec) -> Self {
        SeqValue { elem, items: Vec::new() }
    }
}

/// A fixed-length sequence; `items.len()` is the declared length.
#[derive(Clone, Debug)]
pub struct ArrayValue {
    pub elem: TypeSpec,
    pub items: Vec<Value>,
}

impl ArrayValue {
    pub fn new(elem: TypeSpec, len: usize) -> Self {
        let items = (0..len).map(|_| zero_of(&elem)).collect();
        ArrayValue { elem, items }
    }
}

/// An insertion-ordered map with declared key/value types.
///
/// Lookup compares keys structurally, so composite keys work; iteration is
/// deterministic (insertion order), though the engine promises nothing about
/// ordering across unrelated types.
#[derive(Clone, Debug)]
pub struct MapValue {
    pub key: TypeSpec,
    pub val: TypeSpec,
    pub entries: Vec<(Value, Value)>,
}

impl MapValue {
    pub fn new(key: TypeSpec, val: TypeSpec) -> Self {
        MapValue { key, val, entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| deep_equal(k, key)).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &Value) -> Option<&mut Value> {
        self.entries.iter_mut().find(|(k, _)| deep_equal(k, key)).map(|(_, v)| v)
    }

    /// Insert or replace the value at `key`.
    pub fn insert(&mut self, key: Value, value: Value) {
        match self.get_mut(&key) {
            Some(slot) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }
}

/// A channel handle: capacity plus an identity marker. Copying a channel
/// shares the identity; allocating makes a distinct one.
#[derive(Clone)]
pub struct ChanValue {
    pub capacity: usize,
    id: Rc<()>,
}

impl ChanValue {
    pub fn new(capacity: usize) -> Self {
        ChanValue { capacity, id: Rc::new(()) }
    }

    pub fn same_channel(&self, other: &ChanValue) -> bool {
        Rc::ptr_eq(&self.id, &other.id)
    }
}

impl fmt::Debug for ChanValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chan(cap={}, id={:p})", self.capacity, Rc::as_ptr(&self.id))
    }
}

/// A callable value. The closure returns either a produced value (routed
/// onward by the dispatcher) or the function's trailing error.
#[derive(Clone)]
pub struct FuncValue {
    pub params: Vec<TypeSpec>,
    pub result: TypeSpec,
    f: Rc<dyn Fn(&[Value]) -> Result<Value, String>>,
}

impl FuncValue {
    pub fn new(
        params: Vec<TypeSpec>,
        result: TypeSpec,
        f: impl Fn(&[Value]) -> Result<Value, String> + 'static,
    ) -> Self {
        FuncValue { params, result, f: Rc::new(f) }
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, CopyError> {
        (self.f.as_ref())(args).map_err(CopyError::Call)
    }

    pub fn same_func(&self, other: &FuncValue) -> bool {
        Rc::ptr_eq(&self.f, &other.f)
    }
}

impl fmt::Debug for FuncValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Func({} params -> {})", self.params.len(), self.result.name())
    }
}

/// A pointer: declared pointee type plus an optional live cell. `target:
/// None` is the nil pointer.
#[derive(Clone)]
pub struct PtrValue {
    pub pointee: TypeSpec,
    pub target: Option<Handle>,
}

impl PtrValue {
    pub fn nil(pointee: TypeSpec) -> Self {
        PtrValue { pointee, target: None }
    }

    pub fn to(value: Value) -> Self {
        let pointee = TypeSpec::of(&value);
        PtrValue { pointee, target: Some(Rc::new(RefCell::new(value))) }
    }

    pub fn share(pointee: TypeSpec, handle: Handle) -> Self {
        PtrValue { pointee, target: Some(handle) }
    }

    pub fn addr(&self) -> Option<usize> {
        self.target.as_ref().map(|h| Rc::as_ptr(h) as usize)
    }
}

// Printing the pointee would recurse forever on cyclic graphs, so only the
// cell address is shown.
impl fmt::Debug for PtrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr() {
            Some(addr) => write!(f, "Ptr(*{} @ {addr:#x})", self.pointee.name()),
            None => write!(f, "Ptr(*{} nil)", self.pointee.name()),
        }
    }
}

// --- Value -------------------------------------------------------------------

/// A dynamically typed datum: the unit the engine copies and merges.
#[derive(Clone, Debug)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Uintptr(u64),
    Float(f64),
    /// Complex number as (real, imaginary).
    Complex(f64, f64),
    Str(String),
    Bytes(Vec<u8>),
    Time(NaiveDateTime),
    /// Duration in nanoseconds.
    Duration(i64),
    Ptr(PtrValue),
    /// An interface-boxed value; dispatch unboxes it transparently.
    Boxed(Box<Value>),
    Struct(StructValue),
    Seq(SeqValue),
    Array(ArrayValue),
    Map(MapValue),
    Chan(ChanValue),
    Func(FuncValue),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Nil => Kind::Nil,
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::Uint(_) => Kind::Uint,
            Value::Uintptr(_) => Kind::Uintptr,
            Value::Float(_) => Kind::Float,
            Value::Complex(_, _) => Kind::Complex,
            Value::Str(_) => Kind::Str,
            Value::Bytes(_) => Kind::Bytes,
            Value::Time(_) => Kind::Time,
            Value::Duration(_) => Kind::Duration,
            Value::Ptr(_) => Kind::Ptr,
            Value::Boxed(_) => Kind::Boxed,
            Value::Struct(_) => Kind::Struct,
            Value::Seq(_) => Kind::Seq,
            Value::Array(_) => Kind::Array,
            Value::Map(_) => Kind::Map,
            Value::Chan(_) => Kind::Chan,
            Value::Func(_) => Kind::Func,
        }
    }

    pub fn type_name(&self) -> String {
        TypeSpec::of(self).name()
    }

    /// Recursively unwrap boxes and dereference pointers, producing the
    /// underlying concrete value. Nil pointers decode to [`Value::Nil`].
    pub fn decode(&self) -> Value {
        match self {
            Value::Boxed(inner) => inner.decode(),
            Value::Ptr(p) => match &p.target {
                Some(h) => h.borrow().decode(),
                None => Value::Nil,
            },
            other => other.clone(),
        }
    }

    /// True for nil values: `Nil`, nil pointers, and boxes around them.
    pub fn is_nil(&self) -> bool {
        match self {
            Value::Nil => true,
            Value::Ptr(p) => p.target.is_none(),
            Value::Boxed(inner) => inner.is_nil(),
            _ => false,
        }
    }

    /// True for the zero value of the dynamic type.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Nil => true,
            Value::Bool(b) => !b,
            Value::Int(n) => *n == 0,
            Value::Uint(n) | Value::Uintptr(n) => *n == 0,
            Value::Float(f) => *f == 0.0,
            Value::Complex(re, im) => *re == 0.0 && *im == 0.0,
            Value::Str(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Time(t) => *t == zero_time(),
            Value::Duration(ns) => *ns == 0,
            Value::Ptr(p) => p.target.is_none(),
            Value::Boxed(inner) => inner.is_zero(),
            Value::Struct(sv) => sv.fields.iter().all(Value::is_zero),
            Value::Seq(sq) => sq.items.is_empty(),
            Value::Array(ar) => ar.items.iter().all(Value::is_zero),
            Value::Map(mv) => mv.is_empty(),
            Value::Chan(_) | Value::Func(_) => false,
        }
    }

    /// True for empty values: zero-length collections and strings, nil, and
    /// zero scalars.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Str(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Seq(sq) => sq.items.is_empty(),
            Value::Array(ar) => ar.items.is_empty(),
            Value::Map(mv) => mv.is_empty(),
            Value::Boxed(inner) => inner.is_empty(),
            other => other.is_zero(),
        }
    }

    /// Identity of the pointer cell, if this is a live pointer.
    pub fn addr(&self) -> Option<usize> {
        match self {
            Value::Ptr(p) => p.addr(),
            Value::Boxed(inner) => inner.addr(),
            _ => None,
        }
    }

    /// Short single-line preview for debug traces.
    pub fn preview(&self) -> String {
        let s = match self {
            Value::Str(s) => format!("{s:?}"),
            Value::Struct(sv) => format!("{}{{..{} fields}}", sv.ty.name, sv.fields.len()),
            Value::Seq(sq) => format!("[]{}(len={})", sq.elem.name(), sq.items.len()),
            Value::Map(mv) => format!("map(len={})", mv.len()),
            other => format!("{other:?}"),
        };
        s.chars().take(80).collect()
    }
}

/// The fixed zero instant used as the zero value for [`Kind::Time`].
pub(crate) fn zero_time() -> NaiveDateTime {
    chrono::DateTime::from_timestamp(0, 0).map(|dt| dt.naive_utc()).unwrap_or_default()
}

/// The zero value of a declared type. Pointers and channels are nil; structs
/// have all fields zeroed.
pub fn zero_of(spec: &TypeSpec) -> Value {
    match spec {
        TypeSpec::Any => Value::Nil,
        TypeSpec::Bool => Value::Bool(false),
        TypeSpec::Int => Value::Int(0),
        TypeSpec::Uint => Value::Uint(0),
        TypeSpec::Uintptr => Value::Uintptr(0),
        TypeSpec::Float => Value::Float(0.0),
        TypeSpec::Complex => Value::Complex(0.0, 0.0),
        TypeSpec::Str => Value::Str(String::new()),
        TypeSpec::Bytes => Value::Bytes(Vec::new()),
        TypeSpec::Time => Value::Time(zero_time()),
        TypeSpec::Duration => Value::Duration(0),
        TypeSpec::Ptr(inner) => Value::Ptr(PtrValue::nil((**inner).clone())),
        TypeSpec::Seq(elem) => Value::Seq(SeqValue::new((**elem).clone())),
        TypeSpec::Array(elem, len) => Value::Array(ArrayValue::new((**elem).clone(), *len)),
        TypeSpec::Map(k, v) => Value::Map(MapValue::new((**k).clone(), (**v).clone())),
        TypeSpec::Struct(ty) => Value::Struct(StructValue::new(ty.clone())),
        TypeSpec::Chan(_) => Value::Nil,
        TypeSpec::Func => Value::Nil,
    }
}

/// Like [`zero_of`], but pointer/slice/map/channel slots come back *live* so
/// a nested write has somewhere to land: pointers get an allocated pointee,
/// channels a fresh identity.
pub fn new_instance(spec: &TypeSpec) -> Value {
    match spec {
        TypeSpec::Ptr(inner) => Value::Ptr(PtrValue::to(zero_of(inner))),
        TypeSpec::Chan(cap) => Value::Chan(ChanValue::new(*cap)),
        other => zero_of(other),
    }
}

// --- Structural equality -----------------------------------------------------

/// Deep structural equality with cycle protection.
///
/// Pointer pairs already under comparison are assumed equal, which makes the
/// relation well-defined on self-referential graphs. Channels and functions
/// compare by identity. `Int`/`Uint` compare numerically across signedness.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    let mut seen = HashSet::new();
    eq_rec(a, b, &mut seen)
}

fn eq_rec(a: &Value, b: &Value, seen: &mut HashSet<(usize, usize)>) -> bool {
    match (a, b) {
        (Value::Boxed(x), y) => eq_rec(x, y, seen),
        (x, Value::Boxed(y)) => eq_rec(x, y, seen),
        (Value::Nil, Value::Nil) => true,
        (Value::Nil, other) | (other, Value::Nil) => other.is_nil(),
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Uint(x), Value::Uint(y)) => x == y,
        (Value::Uintptr(x), Value::Uintptr(y)) => x == y,
        (Value::Int(x), Value::Uint(y)) | (Value::Uint(y), Value::Int(x)) => *x >= 0 && *x as u64 == *y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Complex(xr, xi), Value::Complex(yr, yi)) => xr == yr && xi == yi,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::Time(x), Value::Time(y)) => x == y,
        (Value::Duration(x), Value::Duration(y)) => x == y,
        (Value::Ptr(x), Value::Ptr(y)) => match (&x.target, &y.target) {
            (None, None) => true,
            (Some(hx), Some(hy)) => {
                if Rc::ptr_eq(hx, hy) {
                    return true;
                }
                let key = (Rc::as_ptr(hx) as usize, Rc::as_ptr(hy) as usize);
                if !seen.insert(key) {
                    return true;
                }
                let r = eq_rec(&hx.borrow(), &hy.borrow(), seen);
                seen.remove(&key);
                r
            }
            _ => false,
        },
        (Value::Struct(x), Value::Struct(y)) => {
            x.ty.name == y.ty.name
                && x.fields.len() == y.fields.len()
                && x.fields.iter().zip(&y.fields).all(|(fx, fy)| eq_rec(fx, fy, seen))
        }
        (Value::Seq(x), Value::Seq(y)) => {
            x.items.len() == y.items.len() && x.items.iter().zip(&y.items).all(|(ix, iy)| eq_rec(ix, iy, seen))
        }
        (Value::Array(x), Value::Array(y)) => {
            x.items.len() == y.items.len() && x.items.iter().zip(&y.items).all(|(ix, iy)| eq_rec(ix, iy, seen))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.entries.iter().all(|(k, v)| y.get(k).map(|w| eq_rec(v, w, seen)).unwrap_or(false))
        }
        (Value::Chan(x), Value::Chan(y)) => x.same_channel(y),
        (Value::Func(x), Value::Func(y)) => x.same_func(y),
        _ => false,
    }
}

// --- Ergonomic constructors --------------------------------------------------

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        // IEEE-754 widening: the f64 carries the f32's exact value.
        Value::Float(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_type() -> Rc<StructType> {
        StructType::builder("Point").field("X", TypeSpec::Int).field("Y", TypeSpec::Int).build()
    }

    #[test]
    fn zero_values_are_zero_and_empty() {
        for spec in [
            TypeSpec::Bool,
            TypeSpec::Int,
            TypeSpec::Float,
            TypeSpec::Str,
            TypeSpec::Bytes,
            TypeSpec::Time,
            TypeSpec::Duration,
            TypeSpec::seq(TypeSpec::Int),
            TypeSpec::map(TypeSpec::Str, TypeSpec::Int),
            TypeSpec::ptr(TypeSpec::Int),
            TypeSpec::Struct(point_type()),
        ] {
            let v = zero_of(&spec);
            assert!(v.is_zero(), "{} zero value not zero", spec.name());
            assert!(v.is_empty(), "{} zero value not empty", spec.name());
        }
    }

    #[test]
    fn new_instance_allocates_pointers() {
        let v = new_instance(&TypeSpec::ptr(TypeSpec::Str));
        match &v {
            Value::Ptr(p) => assert!(p.target.is_some()),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(!v.is_nil());
    }

    #[test]
    fn struct_field_access_by_name() {
        let mut sv = StructValue::new(point_type());
        assert!(sv.set("X", Value::Int(3)));
        assert!(!sv.set("Z", Value::Int(9)));
        assert!(matches!(sv.field("X"), Some(Value::Int(3))));
        assert!(matches!(sv.field("Y"), Some(Value::Int(0))));
    }

    #[test]
    fn decode_unwraps_boxes_and_pointers() {
        let inner = Value::Ptr(PtrValue::to(Value::Int(7)));
        let boxed = Value::Boxed(Box::new(inner));
        assert!(matches!(boxed.decode(), Value::Int(7)));
        assert!(matches!(Value::Ptr(PtrValue::nil(TypeSpec::Int)).decode(), Value::Nil));
    }

    #[test]
    fn deep_equal_compares_structures() {
        let mut a = StructValue::new(point_type());
        a.set("X", Value::Int(1));
        let mut b = StructValue::new(point_type());
        b.set("X", Value::Int(1));
        assert!(deep_equal(&Value::Struct(a.clone()), &Value::Struct(b.clone())));
        b.set("Y", Value::Int(5));
        assert!(!deep_equal(&Value::Struct(a), &Value::Struct(b)));
    }

    #[test]
    fn deep_equal_crosses_signedness() {
        assert!(deep_equal(&Value::Int(8), &Value::Uint(8)));
        assert!(!deep_equal(&Value::Int(-1), &Value::Uint(u64::MAX)));
    }

    #[test]
    fn deep_equal_terminates_on_cycles() {
        let node = StructType::builder("Node").field("Next", TypeSpec::ptr(TypeSpec::Any)).build();

        let make = || {
            let cell = Rc::new(RefCell::new(Value::Struct(StructValue::new(node.clone()))));
            let ptr = Value::Ptr(PtrValue::share(TypeSpec::Any, cell.clone()));
            if let Value::Struct(sv) = &mut *cell.borrow_mut() {
                sv.set("Next", ptr);
            }
            cell
        };
        let a = make();
        let b = make();
        let va = Value::Ptr(PtrValue::share(TypeSpec::Any, a));
        let vb = Value::Ptr(PtrValue::share(TypeSpec::Any, b));
        assert!(deep_equal(&va, &vb));
    }

    #[test]
    fn map_lookup_is_structural() {
        let mut mv = MapValue::new(TypeSpec::Str, TypeSpec::Int);
        mv.insert(Value::from("a"), Value::Int(1));
        mv.insert(Value::from("a"), Value::Int(2));
        assert_eq!(mv.len(), 1);
        assert!(matches!(mv.get(&Value::from("a")), Some(Value::Int(2))));
    }

    #[test]
    fn channels_and_funcs_compare_by_identity() {
        let c1 = ChanValue::new(4);
        let c2 = c1.clone();
        let c3 = ChanValue::new(4);
        assert!(c1.same_channel(&c2));
        assert!(!c1.same_channel(&c3));

        let f1 = FuncValue::new(vec![], TypeSpec::Int, |_| Ok(Value::Int(1)));
        let f2 = f1.clone();
        assert!(f1.same_func(&f2));
    }

    #[test]
    fn type_names_are_descriptive() {
        assert_eq!(TypeSpec::seq(TypeSpec::Str).name(), "[]string");
        assert_eq!(TypeSpec::map(TypeSpec::Str, TypeSpec::Int).name(), "map[string]int");
        assert_eq!(TypeSpec::ptr(TypeSpec::Struct(point_type())).name(), "*Point");
        assert_eq!(TypeSpec::array(TypeSpec::Int, 3).name(), "[3]int");
    }
}
