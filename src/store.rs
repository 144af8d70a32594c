//! Store contract and the in-memory reference store.
//!
//! The engine talks to the store only through [`Store`]: read, write,
//! subscribe (exact or wildcard) and batch. [`MemoryStore`] is a complete,
//! single-threaded implementation of that contract over a `serde_json::Value`
//! tree.
//!
//! ## Notification rules
//!
//! A write to `a.b` notifies, in subscription order:
//! 1. subscribers of `a.b`
//! 2. wildcard subscribers of `a.*`
//! 3. exact subscribers of any path beneath `a.b` (`a.b.c`, ...)
//!
//! Inside a batch the written paths are queued and delivered in one pass when
//! the outermost batch returns. Listeners run with no store borrow held, so
//! they may read, write, subscribe and revoke freely.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};

/// Path segment separator.
pub const PATH_SEPARATOR: char = '.';

/// Suffix turning a subscription path into a wildcard over its children.
pub const WILDCARD_SUFFIX: &str = ".*";

/// Called with the written path and the value now stored there.
pub type Listener = Rc<dyn Fn(&str, Option<&Value>)>;

/// The narrow store contract consumed by the binding engine.
pub trait Store {
    fn get(&self, path: &str) -> Option<Value>;

    fn set(&self, path: &str, value: Value);

    /// `path` may end in [`WILDCARD_SUFFIX`] to observe every immediate child.
    fn subscribe(&self, path: &str, listener: Listener) -> Subscription;

    /// Run `f`, then deliver every write it made in a single notification pass.
    fn batch(&self, f: &mut dyn FnMut());
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUBSCRIPTION HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Revocation handle. Dropping it does nothing; only [`Subscription::revoke`]
/// detaches the listener.
#[must_use = "a subscription is only released by calling revoke()"]
pub struct Subscription {
    revoke: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(revoke: impl FnOnce() + 'static) -> Self {
        Self {
            revoke: Some(Box::new(revoke)),
        }
    }

    pub fn noop() -> Self {
        Self { revoke: None }
    }

    /// Combine several handles into one that revokes them all.
    pub fn all(subscriptions: Vec<Subscription>) -> Self {
        Self::new(move || {
            for sub in subscriptions.into_iter().rev() {
                sub.revoke();
            }
        })
    }

    pub fn revoke(mut self) {
        if let Some(revoke) = self.revoke.take() {
            revoke();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.revoke.is_some())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PATH HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Split `a.b.c` into (`a.b`, `c`). Top-level paths have no parent.
pub fn split_parent(path: &str) -> Option<(&str, &str)> {
    path.rsplit_once(PATH_SEPARATOR)
}

pub fn join_path(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{}{}{}", base, PATH_SEPARATOR, key)
    }
}

/// The wildcard subscription path matching writes to `path`.
fn wildcard_for(path: &str) -> String {
    match split_parent(path) {
        Some((parent, _)) => format!("{}{}", parent, WILDCARD_SUFFIX),
        None => "*".to_string(),
    }
}

fn is_beneath(candidate: &str, ancestor: &str) -> bool {
    candidate.len() > ancestor.len() + 1
        && candidate.starts_with(ancestor)
        && candidate[ancestor.len()..].starts_with(PATH_SEPARATOR)
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(PATH_SEPARATOR).filter(|s| !s.is_empty())
}

fn read_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments(path) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn write_path(root: &mut Value, path: &str, value: Value) {
    let parts: Vec<&str> = segments(path).collect();
    let Some((last, parents)) = parts.split_last() else {
        *root = value;
        return;
    };

    let mut current = root;
    for segment in parents {
        current = child_slot(current, segment);
    }

    let array_index = match &*current {
        Value::Array(items) => last.parse::<usize>().ok().filter(|i| *i < items.len()),
        _ => None,
    };
    match (array_index, current) {
        (Some(index), Value::Array(items)) => items[index] = value,
        (_, current) => {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            if let Value::Object(map) = current {
                map.insert(last.to_string(), value);
            }
        }
    }
}

/// Descend into `segment`, creating an empty mapping when nothing usable is there.
fn child_slot<'a>(current: &'a mut Value, segment: &str) -> &'a mut Value {
    let array_index = match &*current {
        Value::Array(items) => segment.parse::<usize>().ok().filter(|i| *i < items.len()),
        _ => None,
    };
    match (array_index, current) {
        (Some(index), Value::Array(items)) => &mut items[index],
        (_, current) => {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            match current {
                Value::Object(map) => {
                    let slot = map
                        .entry(segment.to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !slot.is_object() && !slot.is_array() {
                        *slot = Value::Object(Map::new());
                    }
                    slot
                }
                other => other,
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════════

struct ListenerEntry {
    id: u64,
    path: String,
    active: Cell<bool>,
    listener: Listener,
}

fn is_descendant_entry(entry: &ListenerEntry, path: &str) -> bool {
    !entry.path.ends_with(WILDCARD_SUFFIX) && is_beneath(&entry.path, path)
}

struct StoreInner {
    root: RefCell<Value>,
    listeners: RefCell<Vec<Rc<ListenerEntry>>>,
    next_id: Cell<u64>,
    batch_depth: Cell<usize>,
    pending: RefCell<Vec<String>>,
}

/// Single-threaded in-memory [`Store`]. Cloning shares the same state.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Rc<StoreInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Value::Object(Map::new()))
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("root", &self.inner.root.borrow())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl MemoryStore {
    /// Non-mapping initial values are replaced by an empty mapping.
    pub fn new(initial: Value) -> Self {
        let root = if initial.is_object() {
            initial
        } else {
            Value::Object(Map::new())
        };
        Self {
            inner: Rc::new(StoreInner {
                root: RefCell::new(root),
                listeners: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
                batch_depth: Cell::new(0),
                pending: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Copy of the whole tree.
    pub fn snapshot(&self) -> Value {
        self.inner.root.borrow().clone()
    }

    /// Number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    fn notify(&self, path: &str) {
        let wildcard = wildcard_for(path);
        let matched: Vec<Rc<ListenerEntry>> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .filter(|e| e.path == path || e.path == wildcard || is_descendant_entry(e, path))
            .cloned()
            .collect();

        log::trace!("[pathbind] notify '{}' -> {} listener(s)", path, matched.len());

        for entry in matched {
            if !entry.active.get() {
                continue;
            }
            // Descendant subscribers receive their own path and value.
            let target = if is_descendant_entry(&entry, path) {
                entry.path.as_str()
            } else {
                path
            };
            let value = self.get(target);
            (entry.listener)(target, value.as_ref());
        }
    }

    fn flush(&self) {
        let pending = std::mem::take(&mut *self.inner.pending.borrow_mut());
        for path in pending {
            self.notify(&path);
        }
    }
}

impl Store for MemoryStore {
    fn get(&self, path: &str) -> Option<Value> {
        read_path(&self.inner.root.borrow(), path).cloned()
    }

    fn set(&self, path: &str, value: Value) {
        write_path(&mut self.inner.root.borrow_mut(), path, value);

        if self.inner.batch_depth.get() > 0 {
            let mut pending = self.inner.pending.borrow_mut();
            if !pending.iter().any(|p| p == path) {
                pending.push(path.to_string());
            }
            return;
        }
        self.notify(path);
    }

    fn subscribe(&self, path: &str, listener: Listener) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);

        self.inner.listeners.borrow_mut().push(Rc::new(ListenerEntry {
            id,
            path: path.to_string(),
            active: Cell::new(true),
            listener,
        }));

        let store: Weak<StoreInner> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = store.upgrade() {
                let mut listeners = inner.listeners.borrow_mut();
                if let Some(pos) = listeners.iter().position(|e| e.id == id) {
                    listeners[pos].active.set(false);
                    listeners.remove(pos);
                }
            }
        })
    }

    fn batch(&self, f: &mut dyn FnMut()) {
        let depth = self.inner.batch_depth.get();
        self.inner.batch_depth.set(depth + 1);
        f();
        self.inner.batch_depth.set(depth);
        if depth == 0 {
            self.flush();
        }
    }
}
