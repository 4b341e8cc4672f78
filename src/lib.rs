//! remold: structural copying, merging, and diffing of dynamic value graphs.
//!
//! The engine copies a source [`Value`] into a target [`Value`], bridging
//! shape differences along the way: struct-to-struct field pairing (ordinal
//! or by name), struct-to-map and back, slice/map merge strategies, pointer
//! graphs with cycles and aliasing, and scalar conversions through an
//! extensible converter pipeline. Behavior is tuned with [`Options`] and,
//! per field, with `copy:"..."` annotations on [`StructType`] descriptors.
//!
//! ```
//! use remold::{StructType, StructValue, TypeSpec, Value, copy};
//!
//! let person = StructType::builder("Person")
//!     .field("Name", TypeSpec::Str)
//!     .field("Age", TypeSpec::Int)
//!     .build();
//! let mut src = StructValue::new(person.clone());
//! src.set("Name", Value::from("Bob"));
//! src.set("Age", Value::Int(24));
//!
//! let mut dst = Value::Struct(StructValue::new(person));
//! copy(&Value::Struct(src), &mut dst).unwrap();
//! ```
//!
//! Set `REMOLD_DEBUG=1` to print dispatch and conversion traces.

extern crate self as remold;

#[macro_use]
mod macros;
mod api;
mod engine;
mod value;

pub use api::{copy, copy_with};
pub use engine::{
    Controller, Converter, CopyError, Copier, DEFAULT_TAG_KEY, Delta, DiffEntry, DiffOptions, FieldTag, Group,
    MAP_GROUP, MarshalFn, NameRule, ORDER_GROUP, Options, Policy, PolicySet, SLICE_GROUP, SharedConverter,
    SharedCopier, default_marshal, diff, find_converter, group_of, register_default_converter,
    register_default_copier,
};
pub use value::{
    ArrayValue, ChanValue, FieldDef, FuncValue, Handle, Kind, MapValue, PtrValue, SelfCopyFn, SeqValue, StructType,
    StructTypeBuilder, StructValue, TextMarshalFn, TypeSpec, Value, deep_equal, new_instance, zero_of,
};
