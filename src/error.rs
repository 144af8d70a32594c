use std::fmt;
use std::rc::Rc;

use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTIC CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const DIAG_MISSING_TEMPLATE: &str = "PB001";
pub const DIAG_AMBIGUOUS_TEMPLATE: &str = "PB002";
pub const DIAG_EMPTY_COLLECTION_PATH: &str = "PB003";
pub const DIAG_FRAGMENT_ROOT: &str = "PB004";
pub const DIAG_DELETE_TARGET: &str = "PB005";
pub const DIAG_PUSH_SOURCE: &str = "PB006";
pub const DIAG_EMPTY_BINDING_PATH: &str = "PB007";

/// A failure inside the binding engine.
///
/// None of these escape the engine: each one disables a single binding,
/// collection or action and is otherwise swallowed. They are logged and handed
/// to the mount's [`Diagnostics`] observer when one is configured.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("collection '{path}' has no <template> child")]
    MissingTemplate { path: String },

    #[error("collection '{path}' has {count} <template> children, expected exactly one")]
    AmbiguousTemplate { path: String, count: usize },

    #[error("collection container has an empty path")]
    EmptyCollectionPath,

    #[error("template for '{path}' key '{key}' produced {roots} root elements, expected exactly one")]
    FragmentRoot {
        path: String,
        key: String,
        roots: usize,
    },

    #[error("cannot delete '{path}': {reason}")]
    DeleteTarget { path: String, reason: String },

    #[error("cannot push from '{source_path}': {reason}")]
    PushSource { source_path: String, reason: String },

    #[error("attribute '{attribute}' names an empty path")]
    EmptyBindingPath { attribute: String },
}

impl BindError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingTemplate { .. } => DIAG_MISSING_TEMPLATE,
            Self::AmbiguousTemplate { .. } => DIAG_AMBIGUOUS_TEMPLATE,
            Self::EmptyCollectionPath => DIAG_EMPTY_COLLECTION_PATH,
            Self::FragmentRoot { .. } => DIAG_FRAGMENT_ROOT,
            Self::DeleteTarget { .. } => DIAG_DELETE_TARGET,
            Self::PushSource { .. } => DIAG_PUSH_SOURCE,
            Self::EmptyBindingPath { .. } => DIAG_EMPTY_BINDING_PATH,
        }
    }
}

/// Errors surfaced by the host-side markup helpers.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read markup: {0}")]
    Io(#[from] std::io::Error),
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTICS OBSERVER
// ═══════════════════════════════════════════════════════════════════════════════

/// Optional observer for failures the engine otherwise absorbs.
#[derive(Clone)]
pub struct Diagnostics(Rc<dyn Fn(&BindError)>);

impl Diagnostics {
    pub fn new(observer: impl Fn(&BindError) + 'static) -> Self {
        Self(Rc::new(observer))
    }

    pub fn emit(&self, error: &BindError) {
        (self.0)(error)
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Diagnostics(..)")
    }
}

/// Logs `error` and forwards it to `diagnostics`, if any.
pub(crate) fn report(diagnostics: Option<&Diagnostics>, error: BindError) {
    log::debug!("[pathbind] {} {}", error.code(), error);
    if let Some(observer) = diagnostics {
        observer.emit(&error);
    }
}
