//! The policy controller: configuration plus the registered handler lists.
//!
//! A [`Controller`] is cheap to build and immutable during a copy, so one can
//! be shared across many invocations. All tuning lives in [`Options`], a
//! plain struct with chainable builder methods for the common toggles.

use crate::engine::convert::{SharedConverter, SharedCopier};
use crate::engine::dispatch::copy_value;
use crate::engine::errors::CopyError;
use crate::engine::flags::{Policy, PolicySet};
use crate::engine::marshal::MarshalFn;
use crate::engine::params::{Params, Run};
use crate::value::Value;

/// Tuning for a controller. The zero value is the sensible default: ordinal
/// pairing, slice/map replace, converters before copiers, soft failure.
#[derive(Clone, Debug)]
pub struct Options {
    /// Tag key field annotations are read from.
    pub tag_key: String,
    /// Globally applied policy flags; field annotations layer on top.
    pub policy: PolicySet,
    /// Copy fields marked non-public.
    pub copy_unexported: bool,
    /// Flatten embedded fields into the parent namespace.
    pub auto_expand: bool,
    /// Allocate pointees for nil target pointers instead of skipping them.
    pub auto_instantiate: bool,
    /// Invoke function-valued sources and copy their results.
    pub invoke_funcs: bool,
    /// Call function-valued targets with the source as argument.
    pub feed_funcs: bool,
    /// Arguments passed when invoking function-valued sources.
    pub func_args: Vec<Value>,
    /// Scan converters before copiers in the pipeline.
    pub converters_first: bool,
    /// Abort the whole traversal on the first field error.
    pub hard_fail: bool,
    /// Ignored source fields still advance the ordinal position cursor.
    pub sync_advance: bool,
    /// Glob patterns for source field names to skip.
    pub ignore_names: Vec<String>,
    /// Type-name prefixes never flattened by the accessor.
    pub opaque_types: Vec<String>,
    /// Overrides the marshal chain used for struct/map-to-string copies.
    pub marshaller: Option<MarshalFn>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            tag_key: crate::engine::tag::DEFAULT_TAG_KEY.to_string(),
            policy: PolicySet::new(),
            copy_unexported: false,
            auto_expand: true,
            auto_instantiate: true,
            invoke_funcs: false,
            feed_funcs: false,
            func_args: Vec::new(),
            converters_first: true,
            hard_fail: false,
            sync_advance: true,
            ignore_names: Vec::new(),
            opaque_types: vec!["time.".to_string(), "chrono.".to_string(), "bytes.".to_string()],
            marshaller: None,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a global policy flag; group members displace their siblings.
    pub fn with_flag(mut self, flag: Policy) -> Self {
        self.policy.set(flag);
        self
    }

    pub fn slice_append(self) -> Self {
        self.with_flag(Policy::SLICE_COPY_APPEND)
    }

    pub fn slice_merge(self) -> Self {
        self.with_flag(Policy::SLICE_MERGE)
    }

    pub fn map_merge(self) -> Self {
        self.with_flag(Policy::MAP_MERGE)
    }

    pub fn by_name(self) -> Self {
        self.with_flag(Policy::BY_NAME)
    }

    pub fn omit_empty(self) -> Self {
        self.with_flag(Policy::OMIT_EMPTY)
    }

    pub fn with_tag_key(mut self, key: &str) -> Self {
        self.tag_key = key.to_string();
        self
    }

    pub fn ignore_name(mut self, pattern: &str) -> Self {
        self.ignore_names.push(pattern.to_string());
        self
    }

    pub fn hard_fail(mut self) -> Self {
        self.hard_fail = true;
        self
    }

    pub fn invoke_funcs(mut self, args: Vec<Value>) -> Self {
        self.invoke_funcs = true;
        self.func_args = args;
        self
    }

    pub fn feed_funcs(mut self) -> Self {
        self.feed_funcs = true;
        self
    }
}

/// An immutable copy engine instance.
pub struct Controller {
    opts: Options,
    converters: Vec<SharedConverter>,
    copiers: Vec<SharedCopier>,
}

impl Controller {
    pub fn new(opts: Options) -> Self {
        Controller { opts, converters: Vec::new(), copiers: Vec::new() }
    }

    pub fn options(&self) -> &Options {
        &self.opts
    }

    /// Register a converter on this controller; later registrations win.
    pub fn register_converter(&mut self, c: SharedConverter) {
        self.converters.push(c);
    }

    pub fn register_copier(&mut self, c: SharedCopier) {
        self.copiers.push(c);
    }

    pub(crate) fn converters(&self) -> &[SharedConverter] {
        &self.converters
    }

    pub(crate) fn copiers(&self) -> &[SharedCopier] {
        &self.copiers
    }

    /// Copy `src` into `dst` under this controller's policy.
    ///
    /// A nil pointer target is left untouched when `auto_instantiate` is off.
    /// A target struct type carrying a `self_copy` hook gets first refusal;
    /// returning [`CopyError::Fallback`] from the hook hands the pair back to
    /// the generic engine.
    pub fn copy_to(&self, src: &Value, dst: &mut Value) -> Result<(), CopyError> {
        if let Value::Ptr(p) = dst {
            if p.target.is_none() && !self.opts.auto_instantiate {
                return Ok(());
            }
        }
        if let Some(result) = self.try_self_copy(src, dst) {
            return result;
        }
        let target_name = dst.type_name();
        let mut run = Run::new(self);
        let root = Params::root();
        copy_value(&mut run, &root, src, dst).map_err(|e| match e {
            e @ (CopyError::Field { .. } | CopyError::Multi(_)) => e,
            other => other.at(&format!("{} -> {}", src.type_name(), target_name)),
        })
    }

    /// Run the target type's native copy hook, through one pointer level.
    fn try_self_copy(&self, src: &Value, dst: &mut Value) -> Option<Result<(), CopyError>> {
        match dst {
            Value::Struct(sv) => {
                let hook = sv.ty.self_copy.clone()?;
                match (hook.as_ref())(src) {
                    Ok(replacement) => {
                        *dst = replacement;
                        Some(Ok(()))
                    }
                    Err(e) if e.is_fallback() => None,
                    Err(e) => Some(Err(e)),
                }
            }
            Value::Ptr(p) => {
                let handle = p.target.clone()?;
                let mut guard = handle.try_borrow_mut().ok()?;
                self.try_self_copy(src, &mut guard)
            }
            _ => None,
        }
    }
}
