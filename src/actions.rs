//! Action Dispatcher
//!
//! Three delegated listeners on the mount root (click, focus-out, Enter) find
//! the nearest element carrying the matching action attribute and execute it.
//! Because they rely on bubbling, elements rendered after mount are handled
//! without registering anything new.
//!
//! ## Action forms
//!
//! - `path` / `path:expr`: evaluate `expr` against the current value, write it.
//! - `path:delete`: rebuild the parent mapping without the last path segment.
//! - `path:push(source)`: copy the mapping at `source` under a fresh key of
//!   `path` and reset the source fields to zero values, in one batch.

use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Map, Value};

use crate::attributes::{ActionTrigger, AttributeSurface};
use crate::dom::{Event, EventKind, Node, NodeRef};
use crate::error::{report, BindError, Diagnostics};
use crate::expr::{evaluate, parse_expr, parse_push, PushForm};
use crate::store::{join_path, split_parent, Store, Subscription};

const DELETE_EXPR: &str = "delete";
const ENTER_KEY: &str = "Enter";

// ═══════════════════════════════════════════════════════════════════════════════
// ITEM KEY GENERATION
// ═══════════════════════════════════════════════════════════════════════════════

static ITEM_KEY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-wide unique key for pushed entries, shared by every mount.
pub fn generate_item_key() -> String {
    let id = ITEM_KEY_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("k{}", id)
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXECUTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Execute an action string against `store`. Never fails: malformed actions
/// are no-ops.
pub fn execute_action(store: &dyn Store, raw: &str) {
    execute_action_with(store, raw, None);
}

/// Like [`execute_action`], reporting absorbed failures to `diagnostics`.
pub fn execute_action_with(store: &dyn Store, raw: &str, diagnostics: Option<&Diagnostics>) {
    let action = parse_expr(raw);
    if action.path.is_empty() {
        log::debug!("[pathbind] action '{}' has no path", raw);
        return;
    }

    match action.expr.as_deref() {
        Some(DELETE_EXPR) => delete(store, &action.path, diagnostics),
        Some(expr) => match parse_push(expr) {
            Some(form) => push(store, &action.path, form, diagnostics),
            None => assign(store, &action.path, Some(expr)),
        },
        None => assign(store, &action.path, None),
    }
}

fn assign(store: &dyn Store, path: &str, expr: Option<&str>) {
    let current = store.get(path);
    match evaluate(expr, current.as_ref()) {
        Some(value) => store.set(path, value),
        // Absent expression over an absent value: nothing to write.
        None => log::trace!("[pathbind] '{}' has no value to recompute", path),
    }
}

fn delete(store: &dyn Store, path: &str, diagnostics: Option<&Diagnostics>) {
    let Some((parent, key)) = split_parent(path) else {
        report(
            diagnostics,
            BindError::DeleteTarget {
                path: path.to_string(),
                reason: "top-level path has no parent mapping".to_string(),
            },
        );
        return;
    };

    let rebuilt: Map<String, Value> = match store.get(parent) {
        Some(Value::Object(map)) => map.into_iter().filter(|(k, _)| k != key).collect(),
        _ => {
            report(
                diagnostics,
                BindError::DeleteTarget {
                    path: path.to_string(),
                    reason: format!("'{}' is not a mapping", parent),
                },
            );
            return;
        }
    };

    store.set(parent, Value::Object(rebuilt));
}

fn push(store: &dyn Store, target: &str, form: PushForm, diagnostics: Option<&Diagnostics>) {
    let Some(source) = form.source else {
        report(
            diagnostics,
            BindError::PushSource {
                source_path: String::new(),
                reason: "no source given".to_string(),
            },
        );
        return;
    };

    let fields = match store.get(&source) {
        Some(Value::Object(fields)) => fields,
        other => {
            let reason = if other.is_none() {
                "absent".to_string()
            } else {
                "not a mapping".to_string()
            };
            report(
                diagnostics,
                BindError::PushSource {
                    source_path: source,
                    reason,
                },
            );
            return;
        }
    };

    let entry_path = free_entry_path(store, target);
    log::debug!("[pathbind] push '{}' -> '{}'", source, entry_path);

    // Both halves land before any subscriber runs.
    store.batch(&mut || {
        store.set(&entry_path, Value::Object(fields.clone()));
        for (field, value) in fields.iter() {
            store.set(&join_path(&source, field), zero_value(value));
        }
    });
}

/// A path under `target` that holds nothing yet. Keys already present, for
/// example from data loaded before this process started, are skipped.
fn free_entry_path(store: &dyn Store, target: &str) -> String {
    loop {
        let entry_path = join_path(target, &generate_item_key());
        if store.get(&entry_path).is_none() {
            return entry_path;
        }
        log::trace!("[pathbind] '{}' is taken, drawing another key", entry_path);
    }
}

fn zero_value(value: &Value) -> Value {
    match value {
        Value::String(_) => json!(""),
        Value::Bool(_) => json!(false),
        Value::Number(_) => json!(0),
        _ => Value::Null,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DELEGATED LISTENERS
// ═══════════════════════════════════════════════════════════════════════════════

fn event_kind(trigger: ActionTrigger) -> EventKind {
    match trigger {
        ActionTrigger::Click => EventKind::Click,
        ActionTrigger::Blur => EventKind::FocusOut,
        ActionTrigger::Enter => EventKind::KeyDown,
    }
}

/// Attach the three root listeners. The returned handle removes them.
pub(crate) fn attach_dispatcher(
    store: Rc<dyn Store>,
    root: &NodeRef,
    surface: &AttributeSurface,
    diagnostics: Option<Diagnostics>,
) -> Subscription {
    let mut ids = Vec::with_capacity(ActionTrigger::ALL.len());

    for trigger in ActionTrigger::ALL {
        let attribute = surface.action(trigger);
        let store = Rc::clone(&store);
        let diagnostics = diagnostics.clone();
        let bound: Weak<Node> = Rc::downgrade(root);

        let id = root.add_listener(
            event_kind(trigger),
            Rc::new(move |event: &Event| {
                if trigger == ActionTrigger::Enter && event.key.as_deref() != Some(ENTER_KEY) {
                    return;
                }
                let Some(root) = bound.upgrade() else {
                    return;
                };
                let Some(owner) = event
                    .target
                    .closest(Some(&root), |node| node.has_attr(&attribute))
                else {
                    return;
                };
                if let Some(raw) = owner.attr(&attribute) {
                    log::trace!("[pathbind] {} on {:?}: '{}'", attribute, owner, raw);
                    execute_action_with(store.as_ref(), &raw, diagnostics.as_ref());
                }
            }),
        );
        ids.push(id);
    }

    let root = Rc::downgrade(root);
    Subscription::new(move || {
        if let Some(root) = root.upgrade() {
            for id in ids {
                root.remove_listener(id);
            }
        }
    })
}
