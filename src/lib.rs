//! # pathbind: declarative bindings between markup and a path-addressed store
//!
//! Markup declares behavior through prefixed attributes (`s-text`, `s-model`,
//! `s-click`, `s-each`, ...). [`mount()`] scans a root element once, binds each
//! attribute to a dot-separated store path, and keeps the tree in sync with
//! store notifications from then on.
//!
//! ## Engine Invariants
//!
//! 1. **Single scan**: an element is bound at most once per mount, no matter
//!    how often its subtree is rescanned.
//!
//! 2. **Apply then follow**: a binding shows the current value as soon as it
//!    is created and every later write to its path.
//!
//! 3. **Delegated actions**: exactly three listeners live on the root (click,
//!    focus-out, Enter). Elements rendered later need no registration.
//!
//! 4. **Keyed structure**: a collection has exactly one element per present
//!    key, in first-appearance order. Removing a key revokes every binding
//!    inside its element before the element is detached.
//!
//! 5. **Atomic push**: copying a draft into a collection and resetting the
//!    draft reach subscribers in a single notification pass.
//!
//! 6. **Silent degradation**: malformed actions, missing templates and
//!    unusable targets never fail the mount. They are logged and reported to
//!    the optional diagnostics observer.
//!
//! 7. **Explicit teardown**: nothing is released on drop. [`Mount::teardown`]
//!    revokes every subscription of the mount and removes its root listeners.

mod actions;
mod attributes;
mod binding;
mod collection;
mod dom;
mod error;
mod expr;
mod mount;
mod parse;
mod store;

#[cfg(test)]
mod collection_tests;

pub use actions::{execute_action, execute_action_with, generate_item_key};
pub use attributes::{ActionTrigger, AttributeSurface, Directive, DEFAULT_PREFIX};
pub use collection::ITEM_KEY;
pub use dom::{
    Document, ElementData, Event, EventHandler, EventKind, FrameCallback, ListenerId, Node,
    NodeData, NodeId, NodeRef,
};
pub use error::{BindError, Diagnostics, ParseError};
pub use expr::{
    display_string, evaluate, parse_expr, parse_push, truthy, ActionExpr, PushForm,
    EXPR_SEPARATOR,
};
pub use mount::{mount, mount_with, Mount, MountOptions, DEFAULT_KEY_TOKEN, DEFAULT_PATH_TOKEN};
pub use parse::{parse_document, parse_fragment, single_root};
pub use store::{
    join_path, split_parent, Listener, MemoryStore, Store, Subscription, PATH_SEPARATOR,
    WILDCARD_SUFFIX,
};

pub use error::{
    DIAG_AMBIGUOUS_TEMPLATE, DIAG_DELETE_TARGET, DIAG_EMPTY_BINDING_PATH,
    DIAG_EMPTY_COLLECTION_PATH, DIAG_FRAGMENT_ROOT, DIAG_MISSING_TEMPLATE, DIAG_PUSH_SOURCE,
};

/// Routes `log` output through the test harness. Safe to call from every test.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
