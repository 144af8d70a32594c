//! Mount lifecycle.
//!
//! A [`Mount`] ties one store to one root element: it owns the registry of
//! bindings created under that root and the three delegated action
//! listeners. Nothing is shared between mounts except the pushed-item key
//! counter.

use std::rc::Rc;

use serde::Deserialize;

use crate::actions::attach_dispatcher;
use crate::attributes::DEFAULT_PREFIX;
use crate::binding::Binder;
use crate::collection::ITEM_KEY;
use crate::dom::NodeRef;
use crate::error::Diagnostics;
use crate::store::{Store, Subscription};

pub const DEFAULT_KEY_TOKEN: &str = "$key";
pub const DEFAULT_PATH_TOKEN: &str = "$path";

/// Mount configuration. Every field has a default, so `{}` is a valid
/// configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MountOptions {
    /// Prefix shared by every recognized attribute.
    pub prefix: String,
    /// Replaced by the item key in collection templates.
    pub key_token: String,
    /// Replaced by the item's full store path in collection templates.
    pub path_token: String,
    /// Dataset key collection items are tagged with (`data-<itemKey>`).
    pub item_key: String,
    #[serde(skip)]
    pub diagnostics: Option<Diagnostics>,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            key_token: DEFAULT_KEY_TOKEN.to_string(),
            path_token: DEFAULT_PATH_TOKEN.to_string(),
            item_key: ITEM_KEY.to_string(),
            diagnostics: None,
        }
    }
}

impl MountOptions {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }
}

/// A live mount. Dropping it leaves everything attached; call
/// [`Mount::teardown`] to release it.
pub struct Mount {
    binder: Rc<Binder>,
    root: NodeRef,
    dispatcher: Subscription,
}

/// Mount with default options.
pub fn mount(store: Rc<dyn Store>, root: &NodeRef) -> Mount {
    mount_with(store, root, MountOptions::default())
}

pub fn mount_with(store: Rc<dyn Store>, root: &NodeRef, options: MountOptions) -> Mount {
    let binder = Binder::new(Rc::clone(&store), &options);
    let dispatcher = attach_dispatcher(
        store,
        root,
        binder.surface(),
        options.diagnostics.clone(),
    );

    binder.scan(root);
    log::debug!(
        "[pathbind] mounted {:?} with {} bindings",
        root,
        binder.registry().len()
    );

    Mount {
        binder,
        root: Rc::clone(root),
        dispatcher,
    }
}

impl Mount {
    pub fn root(&self) -> &NodeRef {
        &self.root
    }

    /// Bind markup the host inserted after mount. Already bound elements are
    /// skipped.
    pub fn scan(&self, node: &NodeRef) {
        self.binder.scan(node);
    }

    /// Revoke every binding owned by `node` or its descendants. Returns how
    /// many were revoked.
    pub fn revoke_within(&self, node: &NodeRef) -> usize {
        self.binder.registry().revoke_within(node)
    }

    pub fn binding_count(&self) -> usize {
        self.binder.registry().len()
    }

    pub fn bindings_within(&self, node: &NodeRef) -> usize {
        self.binder.registry().count_within(node)
    }

    /// Revoke all bindings and collection subscriptions and remove the root
    /// listeners.
    pub fn teardown(self) {
        let revoked = self.binder.registry().revoke_all();
        self.dispatcher.revoke();
        log::debug!(
            "[pathbind] unmounted {:?}, revoked {} bindings",
            self.root,
            revoked
        );
    }
}

impl std::fmt::Debug for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mount")
            .field("root", &self.root)
            .field("bindings", &self.binding_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_json_fill_defaults() {
        let options = MountOptions::from_json(r#"{"prefix": "x-", "keyToken": "@key"}"#).unwrap();
        assert_eq!(options.prefix, "x-");
        assert_eq!(options.key_token, "@key");
        assert_eq!(options.path_token, DEFAULT_PATH_TOKEN);
        assert!(options.diagnostics.is_none());

        let empty = MountOptions::from_json("{}").unwrap();
        assert_eq!(empty.prefix, DEFAULT_PREFIX);
    }

    #[test]
    fn test_options_reject_wrong_types() {
        assert!(MountOptions::from_json(r#"{"prefix": 3}"#).is_err());
    }
}
