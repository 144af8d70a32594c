//! Collection Reconciler
//!
//! Projects a keyed mapping in the store onto repeated elements. Each
//! container owns its template markup, a key → element list in first
//! appearance order and the signature of the keys it last rendered.
//!
//! Only structure is reconciled here: which keys have an element. Changes to
//! an item's fields are handled by the bindings inside that item.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use crate::binding::Binder;
use crate::dom::NodeRef;
use crate::error::{report, BindError};
use crate::parse::{parse_fragment, single_root};
use crate::store::{join_path, Listener, Subscription, WILDCARD_SUFFIX};

const TEMPLATE_TAG: &str = "template";

/// Default dataset key every rendered item is tagged with (`data-key`).
pub const ITEM_KEY: &str = "key";

/// Joins keys into a signature (ASCII unit separator).
const SIGNATURE_SEPARATOR: &str = "\u{1f}";

/// Store listeners keep the reconciler, and with it the binder, alive until
/// they are revoked.
pub(crate) struct Reconciler {
    binder: Rc<Binder>,
    container: NodeRef,
    path: String,
    markup: String,
    items: RefCell<Vec<(String, NodeRef)>>,
    signature: RefCell<Option<String>>,
}

/// Set up keyed reconciliation for `container`. A missing path or template
/// disables this collection only.
pub(crate) fn attach(binder: &Binder, container: &NodeRef, path: &str) {
    if path.is_empty() {
        report(binder.diagnostics(), BindError::EmptyCollectionPath);
        return;
    }

    let templates: Vec<NodeRef> = container
        .element_children()
        .into_iter()
        .filter(|c| c.tag() == Some(TEMPLATE_TAG))
        .collect();
    let template = match templates.as_slice() {
        [one] => one,
        [] => {
            report(
                binder.diagnostics(),
                BindError::MissingTemplate {
                    path: path.to_string(),
                },
            );
            return;
        }
        many => {
            report(
                binder.diagnostics(),
                BindError::AmbiguousTemplate {
                    path: path.to_string(),
                    count: many.len(),
                },
            );
            return;
        }
    };

    let Some(owner) = binder.weak().upgrade() else {
        return;
    };
    let present = present_keys(binder.store().get(path).as_ref());
    let reconciler = Rc::new(Reconciler {
        binder: owner,
        container: Rc::clone(container),
        path: path.to_string(),
        markup: template.inner_html(),
        items: RefCell::new(adopt_rendered(container, binder.item_key(), &present)),
        signature: RefCell::new(None),
    });

    let on_exact: Listener = {
        let reconciler = Rc::clone(&reconciler);
        Rc::new(move |_, _| reconciler.reconcile())
    };
    let on_child: Listener = {
        let reconciler = Rc::clone(&reconciler);
        Rc::new(move |_, _| reconciler.reconcile())
    };
    let store = binder.store();
    let subscription = Subscription::all(vec![
        store.subscribe(path, on_exact),
        store.subscribe(&format!("{}{}", path, WILDCARD_SUFFIX), on_child),
    ]);
    binder.registry().record(container, subscription);

    log::debug!("[pathbind] collection '{}' attached", path);
    reconciler.reconcile();
}

/// Items already tagged with a present key (e.g. left by an earlier mount)
/// are reused instead of rendered twice. Other tagged children are not items
/// and stay untouched; only the first child per key is adopted.
fn adopt_rendered(
    container: &NodeRef,
    item_key: &str,
    present: &[String],
) -> Vec<(String, NodeRef)> {
    let mut adopted: Vec<(String, NodeRef)> = Vec::new();
    for child in container.element_children() {
        if child.tag() == Some(TEMPLATE_TAG) {
            continue;
        }
        let Some(key) = child.dataset(item_key) else {
            continue;
        };
        if present.contains(&key) && !adopted.iter().any(|(k, _)| *k == key) {
            adopted.push((key, child));
        }
    }
    adopted
}

/// Keys of the mapping at `path` whose value is present, in mapping order.
fn present_keys(mapping: Option<&Value>) -> Vec<String> {
    match mapping {
        Some(Value::Object(map)) => map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, _)| k.clone())
            .collect(),
        _ => Vec::new(),
    }
}

impl Reconciler {
    pub fn reconcile(&self) {
        let binder = &self.binder;
        let keys = present_keys(binder.store().get(&self.path).as_ref());
        let signature = keys.join(SIGNATURE_SEPARATOR);
        if self.signature.borrow().as_deref() == Some(signature.as_str()) {
            return;
        }

        let stale: Vec<(String, NodeRef)> = {
            let mut items = self.items.borrow_mut();
            let (keep, stale): (Vec<_>, Vec<_>) = std::mem::take(&mut *items)
                .into_iter()
                .partition(|(key, _)| keys.contains(key));
            *items = keep;
            stale
        };
        for (key, element) in stale {
            binder.registry().revoke_within(&element);
            element.detach();
            log::trace!("[pathbind] '{}' removed item '{}'", self.path, key);
        }

        let mut complete = true;
        for key in &keys {
            let rendered = self.items.borrow().iter().any(|(k, _)| k == key);
            if !rendered && !self.render_item(binder, key) {
                complete = false;
            }
        }

        // A skipped key must be retried on the next notification.
        *self.signature.borrow_mut() = complete.then_some(signature);
    }

    fn render_item(&self, binder: &Binder, key: &str) -> bool {
        let Some(document) = self.container.owner_document() else {
            return false;
        };
        let (key_token, path_token) = binder.tokens();
        let markup = self
            .markup
            .replace(path_token, &join_path(&self.path, key))
            .replace(key_token, key);
        let context = self.container.tag().unwrap_or("div");

        let element = match single_root(parse_fragment(&document, &markup, context)) {
            Ok(element) => element,
            Err(roots) => {
                report(
                    binder.diagnostics(),
                    BindError::FragmentRoot {
                        path: self.path.clone(),
                        key: key.to_string(),
                        roots,
                    },
                );
                return false;
            }
        };

        element.set_dataset(binder.item_key(), key);
        self.container.append_child(&element);
        self.items
            .borrow_mut()
            .push((key.to_string(), Rc::clone(&element)));
        log::trace!("[pathbind] '{}' rendered item '{}'", self.path, key);

        binder.scan(&element);
        true
    }
}
