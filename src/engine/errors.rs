//! Error taxonomy and the per-composite accumulator.
//!
//! Copying one field never aborts its siblings: each composite keeps an
//! [`ErrorList`], pushes per-field failures wrapped with their path, and folds
//! the list into a single [`CopyError`] when the composite is done. The
//! controller's `hard_fail` option short-circuits on the first failure instead.

use thiserror::Error;

/// Errors produced by the copy/merge engine.
#[derive(Debug, Error)]
pub enum CopyError {
    /// The target handle cannot accept a write (for example, it is already
    /// borrowed because source and target alias the same cell).
    #[error("target is not settable: {0}")]
    Unsettable(String),

    /// No direct assignability, no convertibility, and no registered
    /// converter or copier matched the pair.
    #[error("cannot convert {from} into {to}")]
    Unconvertible { from: String, to: String },

    /// The pair is outside what the dispatch table handles.
    #[error("unsupported copy: {0}")]
    Unsupported(String),

    /// Sentinel returned by a pluggable hook to hand the pair back to the
    /// generic engine. Never surfaces to callers.
    #[error("handler declined the pair")]
    Fallback,

    /// A textual value failed to parse into the requested primitive.
    #[error("parse failed: {0}")]
    Parse(String),

    /// A function value returned its trailing error.
    #[error("call failed: {0}")]
    Call(String),

    /// A failure wrapped with the field/element path it occurred at.
    #[error("{path}: {source}")]
    Field {
        path: String,
        #[source]
        source: Box<CopyError>,
    },

    /// Multiple independent failures collected while copying one composite.
    #[error("{} error(s) while copying", .0.len())]
    Multi(Vec<CopyError>),
}

impl CopyError {
    pub fn unconvertible(from: impl Into<String>, to: impl Into<String>) -> Self {
        CopyError::Unconvertible { from: from.into(), to: to.into() }
    }

    pub fn at(self, path: impl Into<String>) -> Self {
        CopyError::Field { path: path.into(), source: Box::new(self) }
    }

    /// True if this is the fallback sentinel (or a wrapped one).
    pub fn is_fallback(&self) -> bool {
        match self {
            CopyError::Fallback => true,
            CopyError::Field { source, .. } => source.is_fallback(),
            _ => false,
        }
    }
}

/// Collects per-field failures so sibling fields keep copying.
#[derive(Debug, Default)]
pub(crate) struct ErrorList {
    errs: Vec<CopyError>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: CopyError) {
        match err {
            CopyError::Multi(inner) => self.errs.extend(inner),
            e => self.errs.push(e),
        }
    }

    pub fn push_at(&mut self, path: &str, err: CopyError) {
        self.push(err.at(path));
    }

    /// Fold into a result: zero errors is `Ok`, one error is returned as-is,
    /// several become [`CopyError::Multi`].
    pub fn into_result(mut self) -> Result<(), CopyError> {
        match self.errs.len() {
            0 => Ok(()),
            1 => Err(self.errs.remove(0)),
            _ => Err(CopyError::Multi(self.errs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_is_ok() {
        assert!(ErrorList::new().into_result().is_ok());
    }

    #[test]
    fn single_error_is_returned_unwrapped() {
        let mut errs = ErrorList::new();
        errs.push_at("Name", CopyError::unconvertible("int", "chan"));
        let err = errs.into_result().unwrap_err();
        assert!(matches!(err, CopyError::Field { .. }));
        assert_eq!(err.to_string(), "Name: cannot convert int into chan");
    }

    #[test]
    fn several_errors_fold_into_multi() {
        let mut errs = ErrorList::new();
        errs.push(CopyError::Fallback);
        errs.push(CopyError::Parse("x".into()));
        match errs.into_result() {
            Err(CopyError::Multi(v)) => assert_eq!(v.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn nested_multi_is_flattened() {
        let mut errs = ErrorList::new();
        errs.push(CopyError::Multi(vec![CopyError::Fallback, CopyError::Fallback]));
        errs.push(CopyError::Parse("y".into()));
        match errs.into_result() {
            Err(CopyError::Multi(v)) => assert_eq!(v.len(), 3),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn fallback_detection_sees_through_wrapping() {
        assert!(CopyError::Fallback.is_fallback());
        assert!(CopyError::Fallback.at("A.B").is_fallback());
        assert!(!CopyError::Parse("z".into()).is_fallback());
    }
}
