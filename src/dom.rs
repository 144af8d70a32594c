//! Host node tree.
//!
//! A small live element tree with the surface the binding engine needs:
//! parent links, ordered attributes, text, control value and checked state,
//! document-level focus, a paint-frame callback queue and bubbling event
//! dispatch. Nodes belong to the [`Document`] that created them.
//!
//! ## Invariants
//!
//! 1. A node has at most one parent; appending a node detaches it first.
//! 2. A node is *connected* iff its ancestor chain ends at its document's root.
//! 3. A node is *rendered* iff it is connected and neither it nor any ancestor
//!    carries the `hidden` attribute.
//! 4. Events bubble from the target to the root, visiting each node once.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

pub type NodeRef = Rc<Node>;
/// Unique across every document in the process, so nodes moved between
/// documents never share an id.
pub type NodeId = u64;
pub type ListenerId = u64;
pub type EventHandler = Rc<dyn Fn(&Event)>;
pub type FrameCallback = Box<dyn FnOnce()>;

static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_node_id() -> NodeId {
    NODE_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

// ═══════════════════════════════════════════════════════════════════════════════
// EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Click,
    FocusOut,
    KeyDown,
    Input,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub target: NodeRef,
    pub key: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind, target: &NodeRef) -> Self {
        Self {
            kind,
            target: Rc::clone(target),
            key: None,
        }
    }

    pub fn key_down(target: &NodeRef, key: &str) -> Self {
        Self {
            kind: EventKind::KeyDown,
            target: Rc::clone(target),
            key: Some(key.to_string()),
        }
    }
}

struct EventListener {
    id: ListenerId,
    kind: EventKind,
    active: Cell<bool>,
    handler: EventHandler,
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODES
// ═══════════════════════════════════════════════════════════════════════════════

pub enum NodeData {
    Root,
    Element(ElementData),
    Text(RefCell<String>),
}

pub struct ElementData {
    pub tag: String,
    attrs: RefCell<Vec<(String, String)>>,
    value: RefCell<String>,
    checked: Cell<bool>,
}

pub struct Node {
    id: NodeId,
    owner: Weak<DocumentInner>,
    parent: RefCell<Weak<Node>>,
    children: RefCell<Vec<NodeRef>>,
    data: NodeData,
    listeners: RefCell<Vec<Rc<EventListener>>>,
    next_listener: Cell<ListenerId>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            NodeData::Root => write!(f, "#root({})", self.id),
            NodeData::Text(text) => write!(f, "#text({}, {:?})", self.id, text.borrow()),
            NodeData::Element(el) => write!(f, "<{}#{}>", el.tag, self.id),
        }
    }
}

impl Node {
    fn new(owner: Weak<DocumentInner>, id: NodeId, data: NodeData) -> NodeRef {
        Rc::new(Node {
            id,
            owner,
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            data,
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn data(&self) -> &NodeData {
        &self.data
    }

    pub fn is_element(&self) -> bool {
        matches!(self.data, NodeData::Element(_))
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.data {
            NodeData::Element(el) => Some(el.tag.as_str()),
            _ => None,
        }
    }

    pub fn owner_document(&self) -> Option<Document> {
        self.owner.upgrade().map(|inner| Document { inner })
    }

    // ─── Attributes ──────────────────────────────────────────────────────────

    pub fn attr(&self, name: &str) -> Option<String> {
        let NodeData::Element(el) = &self.data else {
            return None;
        };
        el.attrs
            .borrow()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Snapshot of the attributes in declaration order.
    pub fn attrs(&self) -> Vec<(String, String)> {
        match &self.data {
            NodeData::Element(el) => el.attrs.borrow().clone(),
            _ => Vec::new(),
        }
    }

    pub fn set_attr(&self, name: &str, value: &str) {
        let NodeData::Element(el) = &self.data else {
            return;
        };
        let mut attrs = el.attrs.borrow_mut();
        match attrs.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_string(),
            None => attrs.push((name.to_string(), value.to_string())),
        }
    }

    pub fn remove_attr(&self, name: &str) {
        if let NodeData::Element(el) = &self.data {
            el.attrs.borrow_mut().retain(|(n, _)| n != name);
        }
    }

    /// Reads `data-<key>`.
    pub fn dataset(&self, key: &str) -> Option<String> {
        self.attr(&format!("data-{}", key))
    }

    pub fn set_dataset(&self, key: &str, value: &str) {
        self.set_attr(&format!("data-{}", key), value);
    }

    // ─── Control state ───────────────────────────────────────────────────────

    pub fn value(&self) -> String {
        match &self.data {
            NodeData::Element(el) => el.value.borrow().clone(),
            _ => String::new(),
        }
    }

    pub fn set_value(&self, value: &str) {
        if let NodeData::Element(el) = &self.data {
            *el.value.borrow_mut() = value.to_string();
        }
    }

    pub fn checked(&self) -> bool {
        match &self.data {
            NodeData::Element(el) => el.checked.get(),
            _ => false,
        }
    }

    pub fn set_checked(&self, checked: bool) {
        if let NodeData::Element(el) = &self.data {
            el.checked.set(checked);
        }
    }

    // ─── Text ────────────────────────────────────────────────────────────────

    pub fn text_content(&self) -> String {
        match &self.data {
            NodeData::Text(text) => text.borrow().clone(),
            _ => self
                .children
                .borrow()
                .iter()
                .map(|c| c.text_content())
                .collect(),
        }
    }

    /// Replaces every child with a single text node (none for `""`).
    pub fn set_text_content(self: &Rc<Self>, text: &str) {
        if let NodeData::Text(contents) = &self.data {
            *contents.borrow_mut() = text.to_string();
            return;
        }
        for child in self.children() {
            child.detach();
        }
        if text.is_empty() {
            return;
        }
        if let Some(doc) = self.owner_document() {
            self.append_child(&doc.create_text(text));
        }
    }

    // ─── Structure ───────────────────────────────────────────────────────────

    pub fn parent(&self) -> Option<NodeRef> {
        self.parent.borrow().upgrade()
    }

    pub fn children(&self) -> Vec<NodeRef> {
        self.children.borrow().clone()
    }

    pub fn element_children(&self) -> Vec<NodeRef> {
        self.children
            .borrow()
            .iter()
            .filter(|c| c.is_element())
            .cloned()
            .collect()
    }

    pub fn append_child(self: &Rc<Self>, child: &NodeRef) {
        child.detach();
        *child.parent.borrow_mut() = Rc::downgrade(self);
        self.children.borrow_mut().push(Rc::clone(child));
    }

    /// Removes this node from its parent, if it has one.
    pub fn detach(&self) {
        let parent = self.parent.replace(Weak::new()).upgrade();
        if let Some(parent) = parent {
            parent
                .children
                .borrow_mut()
                .retain(|c| !std::ptr::eq(Rc::as_ptr(c), self));
        }
    }

    /// True when `other` is this node or one of its descendants.
    pub fn contains(&self, other: &Node) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let mut current = other.parent();
        while let Some(node) = current {
            if std::ptr::eq(node.as_ref(), self) {
                return true;
            }
            current = node.parent();
        }
        false
    }

    /// Nearest inclusive ancestor matching `predicate`, not walking past `bound`.
    pub fn closest(
        self: &Rc<Self>,
        bound: Option<&NodeRef>,
        predicate: impl Fn(&NodeRef) -> bool,
    ) -> Option<NodeRef> {
        let mut current = Some(Rc::clone(self));
        while let Some(node) = current {
            if predicate(&node) {
                return Some(node);
            }
            if bound.is_some_and(|b| Rc::ptr_eq(b, &node)) {
                return None;
            }
            current = node.parent();
        }
        None
    }

    /// Pre-order list of this node and every descendant.
    pub fn descendants(self: &Rc<Self>) -> Vec<NodeRef> {
        let mut out = Vec::new();
        let mut stack = vec![Rc::clone(self)];
        while let Some(node) = stack.pop() {
            let children = node.children.borrow();
            for child in children.iter().rev() {
                stack.push(Rc::clone(child));
            }
            drop(children);
            out.push(node);
        }
        out
    }

    pub fn is_connected(&self) -> bool {
        let Some(doc) = self.owner.upgrade() else {
            return false;
        };
        let mut top = match &self.data {
            NodeData::Root => return std::ptr::eq(self, doc.root.as_ref()),
            _ => self.parent(),
        };
        while let Some(node) = top {
            if Rc::ptr_eq(&node, &doc.root) {
                return true;
            }
            top = node.parent();
        }
        false
    }

    /// Connected, and no inclusive ancestor is `hidden`.
    pub fn is_rendered(&self) -> bool {
        if !self.is_connected() || self.has_attr("hidden") {
            return false;
        }
        let mut current = self.parent();
        while let Some(node) = current {
            if node.has_attr("hidden") {
                return false;
            }
            current = node.parent();
        }
        true
    }

    // ─── Listeners ───────────────────────────────────────────────────────────

    pub fn add_listener(&self, kind: EventKind, handler: EventHandler) -> ListenerId {
        let id = self.next_listener.get();
        self.next_listener.set(id + 1);
        self.listeners.borrow_mut().push(Rc::new(EventListener {
            id,
            kind,
            active: Cell::new(true),
            handler,
        }));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        let mut listeners = self.listeners.borrow_mut();
        if let Some(pos) = listeners.iter().position(|l| l.id == id) {
            listeners[pos].active.set(false);
            listeners.remove(pos);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    fn handlers_for(&self, kind: EventKind) -> Vec<Rc<EventListener>> {
        self.listeners
            .borrow()
            .iter()
            .filter(|l| l.kind == kind)
            .cloned()
            .collect()
    }

    // ─── Serialization ───────────────────────────────────────────────────────

    pub fn inner_html(&self) -> String {
        let mut out = String::new();
        for child in self.children.borrow().iter() {
            child.write_html(&mut out);
        }
        out
    }

    pub fn outer_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        match &self.data {
            NodeData::Root => {
                for child in self.children.borrow().iter() {
                    child.write_html(out);
                }
            }
            NodeData::Text(text) => escape_into(out, &text.borrow(), false),
            NodeData::Element(el) => {
                out.push('<');
                out.push_str(&el.tag);
                for (name, value) in el.attrs.borrow().iter() {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    escape_into(out, value, true);
                    out.push('"');
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&el.tag.as_str()) {
                    return;
                }
                for child in self.children.borrow().iter() {
                    child.write_html(out);
                }
                out.push_str("</");
                out.push_str(&el.tag);
                out.push('>');
            }
        }
    }
}

fn escape_into(out: &mut String, text: &str, in_attribute: bool) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' if !in_attribute => out.push_str("&lt;"),
            '>' if !in_attribute => out.push_str("&gt;"),
            '"' if in_attribute => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DOCUMENT
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) struct DocumentInner {
    root: NodeRef,
    focused: RefCell<Weak<Node>>,
    frames: RefCell<Vec<FrameCallback>>,
    nodes_created: Cell<usize>,
}

/// Owner of a node tree. Cloning shares the same document.
#[derive(Clone)]
pub struct Document {
    inner: Rc<DocumentInner>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("nodes_created", &self.inner.nodes_created.get())
            .field("pending_frames", &self.pending_frames())
            .finish()
    }
}

impl Document {
    pub fn new() -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<DocumentInner>| DocumentInner {
            root: Node::new(weak.clone(), next_node_id(), NodeData::Root),
            focused: RefCell::new(Weak::new()),
            frames: RefCell::new(Vec::new()),
            nodes_created: Cell::new(1),
        });
        Document { inner }
    }

    pub fn root(&self) -> NodeRef {
        Rc::clone(&self.inner.root)
    }

    fn next_id(&self) -> NodeId {
        self.inner.nodes_created.set(self.inner.nodes_created.get() + 1);
        next_node_id()
    }

    pub fn create_element(&self, tag: &str) -> NodeRef {
        self.create_element_with(tag, Vec::new())
    }

    /// `value` and `checked` attributes seed the control state, as in markup.
    pub fn create_element_with(&self, tag: &str, attrs: Vec<(String, String)>) -> NodeRef {
        let value = attrs
            .iter()
            .find(|(n, _)| n == "value")
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        let checked = attrs.iter().any(|(n, _)| n == "checked");
        Node::new(
            Rc::downgrade(&self.inner),
            self.next_id(),
            NodeData::Element(ElementData {
                tag: tag.to_ascii_lowercase(),
                attrs: RefCell::new(attrs),
                value: RefCell::new(value),
                checked: Cell::new(checked),
            }),
        )
    }

    pub fn create_text(&self, text: &str) -> NodeRef {
        Node::new(
            Rc::downgrade(&self.inner),
            self.next_id(),
            NodeData::Text(RefCell::new(text.to_string())),
        )
    }

    /// First element with the given tag, in document order.
    pub fn first_by_tag(&self, tag: &str) -> Option<NodeRef> {
        self.root()
            .descendants()
            .into_iter()
            .find(|n| n.tag() == Some(tag))
    }

    pub fn body(&self) -> Option<NodeRef> {
        self.first_by_tag("body")
    }

    pub fn find_by_id(&self, id: &str) -> Option<NodeRef> {
        self.root()
            .descendants()
            .into_iter()
            .find(|n| n.attr("id").as_deref() == Some(id))
    }

    // ─── Focus ───────────────────────────────────────────────────────────────

    pub fn focused(&self) -> Option<NodeRef> {
        self.inner.focused.borrow().upgrade()
    }

    pub fn focus(&self, node: &NodeRef) {
        *self.inner.focused.borrow_mut() = Rc::downgrade(node);
    }

    // ─── Paint frames ────────────────────────────────────────────────────────

    pub fn request_frame(&self, callback: FrameCallback) {
        self.inner.frames.borrow_mut().push(callback);
    }

    pub fn pending_frames(&self) -> usize {
        self.inner.frames.borrow().len()
    }

    /// Runs the callbacks queued so far; ones queued meanwhile wait for the next frame.
    pub fn run_frame(&self) -> usize {
        let callbacks = std::mem::take(&mut *self.inner.frames.borrow_mut());
        let count = callbacks.len();
        for callback in callbacks {
            callback();
        }
        count
    }

    // ─── Event dispatch ──────────────────────────────────────────────────────

    /// Delivers `event` to the target, then to each ancestor in turn.
    pub fn dispatch(&self, event: &Event) {
        let mut current = Some(Rc::clone(&event.target));
        while let Some(node) = current {
            for listener in node.handlers_for(event.kind) {
                if listener.active.get() {
                    (listener.handler)(event);
                }
            }
            current = node.parent();
        }
    }

    pub fn click(&self, node: &NodeRef) {
        self.dispatch(&Event::new(EventKind::Click, node));
    }

    pub fn key_down(&self, node: &NodeRef, key: &str) {
        self.dispatch(&Event::key_down(node, key));
    }

    /// Moves focus away from `node` and fires focus-out.
    pub fn blur(&self, node: &NodeRef) {
        if self.focused().is_some_and(|f| Rc::ptr_eq(&f, node)) {
            *self.inner.focused.borrow_mut() = Weak::new();
        }
        self.dispatch(&Event::new(EventKind::FocusOut, node));
    }

    /// Simulates typing: replaces the control value and fires input.
    pub fn type_text(&self, node: &NodeRef, text: &str) {
        node.set_value(text);
        self.dispatch(&Event::new(EventKind::Input, node));
    }

    /// Simulates a user toggling a checkbox or radio.
    pub fn set_checked_by_user(&self, node: &NodeRef, checked: bool) {
        node.set_checked(checked);
        self.dispatch(&Event::new(EventKind::Input, node));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> (Document, NodeRef, NodeRef, NodeRef) {
        let doc = Document::new();
        let outer = doc.create_element("div");
        let inner = doc.create_element("span");
        let leaf = doc.create_element("b");
        doc.root().append_child(&outer);
        outer.append_child(&inner);
        inner.append_child(&leaf);
        (doc, outer, inner, leaf)
    }

    #[test]
    fn test_contains_is_inclusive() {
        let (_doc, outer, inner, leaf) = tree();
        assert!(outer.contains(&outer));
        assert!(outer.contains(&leaf));
        assert!(!inner.contains(&outer));
    }

    #[test]
    fn test_detached_node_is_not_contained() {
        let (doc, outer, _inner, leaf) = tree();
        leaf.detach();
        assert!(!outer.contains(&leaf));
        let stray = doc.create_element("i");
        assert!(!outer.contains(&stray));
        assert!(stray.contains(&stray));
    }

    #[test]
    fn test_append_moves_node() {
        let (doc, outer, inner, leaf) = tree();
        let other = doc.create_element("p");
        outer.append_child(&other);
        other.append_child(&leaf);
        assert!(inner.children().is_empty());
        assert!(Rc::ptr_eq(&leaf.parent().unwrap(), &other));
    }

    #[test]
    fn test_rendered_respects_hidden_ancestors() {
        let (doc, outer, _inner, leaf) = tree();
        assert!(leaf.is_rendered());
        outer.set_attr("hidden", "");
        assert!(!leaf.is_rendered());
        outer.remove_attr("hidden");
        leaf.detach();
        assert!(!leaf.is_rendered());
        assert!(!doc.create_element("p").is_connected());
    }

    #[test]
    fn test_events_bubble_to_ancestors() {
        let (doc, outer, _inner, leaf) = tree();
        let hits = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&hits);
        let id = outer.add_listener(
            EventKind::Click,
            Rc::new(move |e: &Event| sink.borrow_mut().push(e.target.id())),
        );

        doc.click(&leaf);
        doc.key_down(&leaf, "Enter");
        assert_eq!(*hits.borrow(), vec![leaf.id()]);

        outer.remove_listener(id);
        doc.click(&leaf);
        assert_eq!(hits.borrow().len(), 1);
    }

    #[test]
    fn test_text_content_replaces_children() {
        let (_doc, outer, _inner, _leaf) = tree();
        outer.set_text_content("hi");
        assert_eq!(outer.children().len(), 1);
        assert_eq!(outer.text_content(), "hi");
        outer.set_text_content("");
        assert!(outer.children().is_empty());
    }

    #[test]
    fn test_frames_run_once() {
        let doc = Document::new();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        doc.request_frame(Box::new(move || c.set(c.get() + 1)));
        assert_eq!(doc.run_frame(), 1);
        assert_eq!(doc.run_frame(), 0);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_serialization_escapes() {
        let doc = Document::new();
        let el = doc.create_element_with("a", vec![("title".into(), "x\"y".into())]);
        el.append_child(&doc.create_text("1 < 2 & 3"));
        el.append_child(&doc.create_element("br"));
        assert_eq!(
            el.outer_html(),
            "<a title=\"x&quot;y\">1 &lt; 2 &amp; 3<br></a>"
        );
    }

    #[test]
    fn test_ids_are_unique_across_documents() {
        let first = Document::new();
        let second = Document::new();
        let a = first.create_element("p");
        let b = second.create_element("p");
        assert_ne!(a.id(), b.id());
        assert_ne!(first.root().id(), second.root().id());
    }
}
