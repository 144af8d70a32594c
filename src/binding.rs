//! Binding Scanner & Subscription Registry
//!
//! ## Invariants
//!
//! 1. **Scan once**: an element is processed at most once per mount. The
//!    idempotency marker is a side table of node ids owned by the mount, so a
//!    nested scan (e.g. from a collection rendering an item) never doubles a
//!    binding.
//! 2. **Apply then follow**: every binding applies the current store value
//!    immediately, then re-applies on each notification for its path.
//! 3. **Explicit teardown**: bindings are only destroyed through the registry.
//!    `revoke_within(c)` removes exactly the entries whose node is `c` or lies
//!    under `c`.
//! 4. **Templates are inert**: scanning never descends into `<template>`.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::attributes::{AttributeSurface, Directive};
use crate::collection;
use crate::dom::{Event, EventKind, NodeId, NodeRef};
use crate::error::{report, BindError, Diagnostics};
use crate::expr::{display_string, truthy};
use crate::mount::MountOptions;
use crate::store::{Listener, Store, Subscription};

const TEMPLATE_TAG: &str = "template";

type UpdateFn = Rc<dyn Fn(Option<&Value>)>;

// ═══════════════════════════════════════════════════════════════════════════════
// SUBSCRIPTION REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// Every live subscription of one mount, keyed by the node that owns it.
#[derive(Default)]
pub(crate) struct Registry {
    entries: RefCell<Vec<(NodeRef, Subscription)>>,
    visited: RefCell<HashSet<NodeId>>,
}

impl Registry {
    pub fn record(&self, node: &NodeRef, subscription: Subscription) {
        self.entries
            .borrow_mut()
            .push((Rc::clone(node), subscription));
    }

    /// Marks `node` as scanned. Returns false when it already was.
    pub fn mark_visited(&self, node: &NodeRef) -> bool {
        self.visited.borrow_mut().insert(node.id())
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn count_within(&self, container: &NodeRef) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|(node, _)| container.contains(node))
            .count()
    }

    /// Revokes every subscription owned by `container` or a descendant and
    /// forgets that the subtree was scanned.
    pub fn revoke_within(&self, container: &NodeRef) -> usize {
        let removed = {
            let mut entries = self.entries.borrow_mut();
            let mut removed = Vec::new();
            // Reverse order keeps the remaining indices valid while removing.
            let mut i = entries.len();
            while i > 0 {
                i -= 1;
                if container.contains(&entries[i].0) {
                    removed.push(entries.remove(i));
                }
            }
            removed
        };

        {
            let mut visited = self.visited.borrow_mut();
            for node in container.descendants() {
                visited.remove(&node.id());
            }
        }

        let count = removed.len();
        for (_, subscription) in removed {
            subscription.revoke();
        }
        count
    }

    pub fn revoke_all(&self) -> usize {
        let removed = std::mem::take(&mut *self.entries.borrow_mut());
        self.visited.borrow_mut().clear();
        let count = removed.len();
        for (_, subscription) in removed.into_iter().rev() {
            subscription.revoke();
        }
        count
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCANNER
// ═══════════════════════════════════════════════════════════════════════════════

/// Mount-scoped scanning context shared by the scanner and every reconciler.
pub(crate) struct Binder {
    store: Rc<dyn Store>,
    surface: AttributeSurface,
    key_token: String,
    path_token: String,
    item_key: String,
    diagnostics: Option<Diagnostics>,
    registry: Registry,
    me: Weak<Binder>,
}

impl Binder {
    pub fn new(store: Rc<dyn Store>, options: &MountOptions) -> Rc<Self> {
        Rc::new_cyclic(|me| Binder {
            store,
            surface: AttributeSurface::new(&options.prefix),
            key_token: options.key_token.clone(),
            path_token: options.path_token.clone(),
            item_key: options.item_key.clone(),
            diagnostics: options.diagnostics.clone(),
            registry: Registry::default(),
            me: me.clone(),
        })
    }

    pub fn store(&self) -> &Rc<dyn Store> {
        &self.store
    }

    pub fn surface(&self) -> &AttributeSurface {
        &self.surface
    }

    pub fn tokens(&self) -> (&str, &str) {
        (&self.key_token, &self.path_token)
    }

    /// Dataset key rendered collection items are tagged with.
    pub fn item_key(&self) -> &str {
        &self.item_key
    }

    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        self.diagnostics.as_ref()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn weak(&self) -> Weak<Binder> {
        self.me.clone()
    }

    /// Visit `node` and its descendants, binding each element not seen before.
    pub fn scan(&self, node: &NodeRef) {
        let mut stack = vec![Rc::clone(node)];
        while let Some(current) = stack.pop() {
            if !current.is_element() {
                // The root node of a document still has children to visit.
                stack.extend(current.children().into_iter().rev());
                continue;
            }
            if current.tag() == Some(TEMPLATE_TAG) {
                continue;
            }
            if self.registry.mark_visited(&current) {
                self.scan_element(&current);
            }
            // Children are read after binding so items rendered by a
            // collection are seen already marked.
            stack.extend(current.element_children().into_iter().rev());
        }
    }

    fn scan_element(&self, element: &NodeRef) {
        let each = self.surface.each();
        for (name, value) in element.attrs() {
            if name == each {
                collection::attach(self, element, value.trim());
                continue;
            }
            let Some(directive) = self.surface.classify(&name) else {
                continue;
            };
            let path = value.trim();
            if path.is_empty() {
                report(
                    self.diagnostics(),
                    BindError::EmptyBindingPath { attribute: name },
                );
                continue;
            }
            self.bind(element, directive, path);
        }
    }

    fn bind(&self, element: &NodeRef, directive: Directive, path: &str) {
        log::trace!("[pathbind] bind {:?} {:?} -> '{}'", element, directive, path);

        let update: UpdateFn = match &directive {
            Directive::Text => {
                let node = Rc::clone(element);
                Rc::new(move |value| node.set_text_content(&display_string(value)))
            }
            Directive::Model => model_update(element),
            Directive::Focus => focus_update(element),
            Directive::Dataset(key) => {
                let node = Rc::clone(element);
                let key = key.clone();
                Rc::new(move |value| node.set_dataset(&key, &display_string(value)))
            }
            Directive::Attribute(name) => {
                let node = Rc::clone(element);
                let name = name.clone();
                Rc::new(move |value| match value {
                    None | Some(Value::Null) => node.remove_attr(&name),
                    Some(v) => node.set_attr(&name, &display_string(Some(v))),
                })
            }
        };

        update(self.store.get(path).as_ref());

        let follow = Rc::clone(&update);
        let listener: Listener = Rc::new(move |_, value| follow(value));
        let mut subscription = self.store.subscribe(path, listener);

        if directive == Directive::Model {
            subscription = Subscription::all(vec![
                subscription,
                self.listen_for_input(element, path),
            ]);
        }

        self.registry.record(element, subscription);
    }

    /// Writes user input back to the store.
    fn listen_for_input(&self, element: &NodeRef, path: &str) -> Subscription {
        let store = Rc::clone(&self.store);
        let path = path.to_string();
        let weak = Rc::downgrade(element);
        let boolean = is_boolean_control(element);

        let id = element.add_listener(
            EventKind::Input,
            Rc::new(move |event: &Event| {
                let Some(node) = weak.upgrade() else {
                    return;
                };
                // Input from a descendant bubbling through is not ours.
                if !Rc::ptr_eq(&event.target, &node) {
                    return;
                }
                let value = if boolean {
                    Value::Bool(node.checked())
                } else {
                    Value::String(node.value())
                };
                store.set(&path, value);
            }),
        );

        let weak = Rc::downgrade(element);
        Subscription::new(move || {
            if let Some(node) = weak.upgrade() {
                node.remove_listener(id);
            }
        })
    }
}

fn is_boolean_control(element: &NodeRef) -> bool {
    element.tag() == Some("input")
        && element
            .attr("type")
            .map(|t| t.eq_ignore_ascii_case("checkbox") || t.eq_ignore_ascii_case("radio"))
            .unwrap_or(false)
}

fn model_update(element: &NodeRef) -> UpdateFn {
    let node = Rc::clone(element);
    if is_boolean_control(element) {
        Rc::new(move |value| {
            let want = truthy(value);
            if node.checked() != want {
                node.set_checked(want);
            }
        })
    } else {
        Rc::new(move |value| {
            // Leave an identical value alone so the caret is not disturbed.
            let want = display_string(value);
            if node.value() != want {
                node.set_value(&want);
            }
        })
    }
}

fn focus_update(element: &NodeRef) -> UpdateFn {
    let node = Rc::clone(element);
    Rc::new(move |value| {
        if !truthy(value) {
            return;
        }
        let Some(document) = node.owner_document() else {
            return;
        };
        let target = Rc::clone(&node);
        document.request_frame(Box::new(move || {
            // Visibility is decided when the frame fires, not when scheduled.
            if !target.is_rendered() {
                return;
            }
            if let Some(document) = target.owner_document() {
                document.focus(&target);
            }
        }));
    })
}
