//! Markup Module
//!
//! HTML5-compliant parsing of documents and fragments into the host tree.
//! html5ever builds an `RcDom`, which is then converted node by node into
//! [`Document`]-owned nodes. `<template>` contents are kept as ordinary
//! children of the template element so their markup can be serialized back.

use html5ever::tendril::TendrilSink;
use html5ever::{parse_document as parse_html_document, parse_fragment as parse_html_fragment};
use html5ever::{LocalName, Namespace, ParseOpts, QualName};
use markup5ever_rcdom::{Handle, NodeData, RcDom};

use crate::dom::{Document, NodeRef};
use crate::error::ParseError;

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

// ═══════════════════════════════════════════════════════════════════════════════
// NODE CONVERSION
// ═══════════════════════════════════════════════════════════════════════════════

/// Convert one parsed node (and its subtree) into host nodes.
/// Comments, doctypes and processing instructions are dropped.
fn convert_node(document: &Document, handle: &Handle) -> Option<NodeRef> {
    match &handle.data {
        NodeData::Text { contents } => Some(document.create_text(&contents.borrow())),

        NodeData::Element {
            name,
            attrs,
            template_contents,
            ..
        } => {
            let attributes = attrs
                .borrow()
                .iter()
                .map(|attr| (attr.name.local.to_string(), attr.value.to_string()))
                .collect();
            let element = document.create_element_with(&name.local, attributes);

            // Template children live in a separate fragment in html5ever.
            if let Some(content) = template_contents.borrow().as_ref() {
                append_converted(document, &element, content);
            }
            append_converted(document, &element, handle);

            Some(element)
        }

        NodeData::Document
        | NodeData::Doctype { .. }
        | NodeData::Comment { .. }
        | NodeData::ProcessingInstruction { .. } => None,
    }
}

fn append_converted(document: &Document, parent: &NodeRef, handle: &Handle) {
    for child in handle.children.borrow().iter() {
        if let Some(node) = convert_node(document, child) {
            parent.append_child(&node);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN PARSING FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse a full HTML document. The `<html>` element becomes the child of the
/// document root.
pub fn parse_document(html: &str) -> Result<Document, ParseError> {
    let dom = parse_html_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut html.as_bytes())?;

    let document = Document::new();
    let root = document.root();
    append_converted(&document, &root, &dom.document);
    Ok(document)
}

/// Parse `markup` as the contents of a `context` element (e.g. `ul`, `tbody`),
/// returning the top-level nodes, detached.
pub fn parse_fragment(document: &Document, markup: &str, context: &str) -> Vec<NodeRef> {
    let context_name = QualName::new(
        None,
        Namespace::from(HTML_NAMESPACE),
        LocalName::from(context),
    );
    let dom = parse_html_fragment(RcDom::default(), ParseOpts::default(), context_name, vec![])
        .one(markup);

    // The fragment parser wraps its output in a synthetic <html> element.
    let Some(wrapper) = dom.document.children.borrow().first().cloned() else {
        return Vec::new();
    };
    let nodes: Vec<NodeRef> = wrapper
        .children
        .borrow()
        .iter()
        .filter_map(|child| convert_node(document, child))
        .collect();
    nodes
}

/// The single element a fragment yields, ignoring whitespace-only text.
/// `Err(n)` reports how many root elements were found when it is not one,
/// counting stray text as a root.
pub fn single_root(nodes: Vec<NodeRef>) -> Result<NodeRef, usize> {
    let mut roots: Vec<NodeRef> = nodes
        .into_iter()
        .filter(|n| n.is_element() || !n.text_content().trim().is_empty())
        .collect();
    match roots.len() {
        1 if roots[0].is_element() => Ok(roots.remove(0)),
        n => Err(n),
    }
}
