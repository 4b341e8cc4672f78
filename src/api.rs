use crate::engine::{Controller, CopyError, Options};
use crate::value::Value;

/// Copy `src` into `dst` with default options.
///
/// Equivalent to `Controller::new(Options::default()).copy_to(src, dst)`;
/// build a [`Controller`] directly to reuse configuration or register
/// converters.
pub fn copy(src: &Value, dst: &mut Value) -> Result<(), CopyError> {
    Controller::new(Options::default()).copy_to(src, dst)
}

/// Copy `src` into `dst` under `opts`.
pub fn copy_with(src: &Value, dst: &mut Value, opts: &Options) -> Result<(), CopyError> {
    Controller::new(opts.clone()).copy_to(src, dst)
}
