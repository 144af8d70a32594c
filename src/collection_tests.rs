//! Collection Reconciliation Tests
//!
//! Structural convergence of keyed collections: one element per present key,
//! first-appearance order, bindings released together with their element.

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::{json, Value};

    use crate::actions::execute_action;
    use crate::dom::{Document, NodeRef};
    use crate::error::{BindError, Diagnostics};
    use crate::mount::{mount, mount_with, Mount, MountOptions};
    use crate::parse::parse_document;
    use crate::store::{MemoryStore, Store};

    fn setup(html: &str, state: Value) -> (Document, MemoryStore, Mount) {
        crate::init_test_logging();
        let doc = parse_document(html).unwrap();
        let store = MemoryStore::new(state);
        let body = doc.body().unwrap();
        let mount = mount(Rc::new(store.clone()), &body);
        (doc, store, mount)
    }

    fn items(container: &NodeRef) -> Vec<NodeRef> {
        container
            .element_children()
            .into_iter()
            .filter(|c| c.tag() != Some("template"))
            .collect()
    }

    fn keys(container: &NodeRef) -> Vec<String> {
        items(container)
            .iter()
            .filter_map(|item| item.dataset("key"))
            .collect()
    }

    fn recording_options() -> (MountOptions, Rc<RefCell<Vec<BindError>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let options = MountOptions::default()
            .with_diagnostics(Diagnostics::new(move |e| sink.borrow_mut().push(e.clone())));
        (options, seen)
    }

    const TODO_LIST: &str = r#"<ul id="list" s-each="todos"><template><li s-text="$path.text"></li></template></ul>"#;

    // ═══════════════════════════════════════════════════════════════════════════════
    // CONVERGENCE
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_renders_one_element_per_key() {
        let (doc, _store, mount) = setup(
            TODO_LIST,
            json!({"todos": {"a": {"text": "A"}, "b": {"text": "B"}}}),
        );
        let list = doc.find_by_id("list").unwrap();
        let rendered = items(&list);
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].text_content(), "A");
        assert_eq!(rendered[1].text_content(), "B");
        assert_eq!(keys(&list), vec!["a", "b"]);
        // The collection itself plus one text binding per item.
        assert_eq!(mount.binding_count(), 3);
    }

    #[test]
    fn test_removed_key_leaves_no_bindings_behind() {
        let (doc, store, mount) = setup(
            TODO_LIST,
            json!({"todos": {"a": {"text": "A"}, "b": {"text": "B"}}}),
        );
        let list = doc.find_by_id("list").unwrap();
        let removed = items(&list)[0].clone();
        let before = store.listener_count();

        execute_action(&store, "todos.a:delete");

        assert_eq!(keys(&list), vec!["b"]);
        assert!(removed.parent().is_none());
        assert_eq!(mount.bindings_within(&removed), 0);
        assert_eq!(mount.binding_count(), 2);
        assert_eq!(store.listener_count(), before - 1);

        // Writes to the removed item no longer reach its old element.
        store.set("todos.a", json!({"text": "again"}));
        assert_eq!(removed.text_content(), "A");
    }

    #[test]
    fn test_field_changes_do_not_rerender() {
        let (doc, store, _mount) = setup(TODO_LIST, json!({"todos": {"a": {"text": "A"}}}));
        let list = doc.find_by_id("list").unwrap();
        let first = items(&list)[0].clone();

        store.set("todos.a.text", json!("edited"));

        let now = items(&list);
        assert_eq!(now.len(), 1);
        assert!(Rc::ptr_eq(&now[0], &first));
        assert_eq!(first.text_content(), "edited");
    }

    #[test]
    fn test_render_order_is_first_appearance() {
        let (doc, store, _mount) = setup(
            TODO_LIST,
            json!({"todos": {"b": {"text": "B"}, "a": {"text": "A"}}}),
        );
        let list = doc.find_by_id("list").unwrap();
        assert_eq!(keys(&list), vec!["b", "a"]);

        store.set("todos.c", json!({"text": "C"}));
        assert_eq!(keys(&list), vec!["b", "a", "c"]);

        execute_action(&store, "todos.a:delete");
        store.set("todos.a", json!({"text": "A2"}));
        assert_eq!(keys(&list), vec!["b", "c", "a"]);
        assert_eq!(items(&list)[2].text_content(), "A2");
    }

    #[test]
    fn test_null_values_count_as_absent() {
        let (doc, store, _mount) = setup(
            TODO_LIST,
            json!({"todos": {"a": {"text": "A"}, "b": null}}),
        );
        let list = doc.find_by_id("list").unwrap();
        assert_eq!(keys(&list), vec!["a"]);

        store.set("todos.a", Value::Null);
        assert!(items(&list).is_empty());
    }

    #[test]
    fn test_non_mapping_collection_renders_nothing() {
        let (doc, store, _mount) = setup(TODO_LIST, json!({"todos": "nope"}));
        let list = doc.find_by_id("list").unwrap();
        assert!(items(&list).is_empty());

        store.set("todos", json!({"x": {"text": "X"}}));
        assert_eq!(keys(&list), vec!["x"]);
    }

    #[test]
    fn test_key_token_is_substituted() {
        let (doc, _store, _mount) = setup(
            r#"<ul id="list" s-each="tags"><template><li class="tag-$key">$key</li></template></ul>"#,
            json!({"tags": {"red": true, "blue": true}}),
        );
        let list = doc.find_by_id("list").unwrap();
        let rendered = items(&list);
        assert_eq!(rendered[0].attr("class").as_deref(), Some("tag-red"));
        assert_eq!(rendered[1].text_content(), "blue");
    }

    #[test]
    fn test_table_rows_render_in_body_context() {
        let (doc, _store, _mount) = setup(
            r#"<table><tbody id="rows" s-each="rows"><template><tr><td s-text="$path.n"></td></tr></template></tbody></table>"#,
            json!({"rows": {"r1": {"n": 1}}}),
        );
        let rows = doc.find_by_id("rows").unwrap();
        let rendered = items(&rows);
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].tag(), Some("tr"));
        assert_eq!(rendered[0].text_content(), "1");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // DEGRADED COLLECTIONS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_multi_root_template_is_skipped_and_retried() {
        let doc = parse_document(
            r#"<ul id="list" s-each="todos"><template><li>$key</li><li>again</li></template></ul>"#,
        )
        .unwrap();
        let store = MemoryStore::new(json!({"todos": {"a": 1}}));
        let (options, seen) = recording_options();
        let _mount = mount_with(Rc::new(store.clone()), &doc.body().unwrap(), options);

        let list = doc.find_by_id("list").unwrap();
        assert!(items(&list).is_empty());
        assert_eq!(seen.borrow().len(), 1);
        assert!(matches!(
            &seen.borrow()[0],
            BindError::FragmentRoot { key, roots: 2, .. } if key == "a"
        ));

        // Nothing was cached, so the next notification tries again.
        store.set("todos.a", json!(2));
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn test_missing_or_ambiguous_template_disables_only_that_collection() {
        let doc = parse_document(
            r#"<ul id="none" s-each="a"></ul>
               <ul id="two" s-each="a"><template><li></li></template><template><li></li></template></ul>
               <ul id="blank" s-each=" "><template><li></li></template></ul>
               <ul id="ok" s-each="a"><template><li>$key</li></template></ul>"#,
        )
        .unwrap();
        let store = MemoryStore::new(json!({"a": {"x": 1}}));
        let (options, seen) = recording_options();
        let mount = mount_with(Rc::new(store.clone()), &doc.body().unwrap(), options);

        let codes: Vec<&str> = seen.borrow().iter().map(|e| e.code()).collect();
        assert_eq!(codes, vec!["PB001", "PB002", "PB003"]);
        assert!(items(&doc.find_by_id("none").unwrap()).is_empty());
        assert_eq!(keys(&doc.find_by_id("ok").unwrap()), vec!["x"]);
        assert_eq!(mount.binding_count(), 1);
        assert_eq!(store.listener_count(), 2);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // NESTING AND ADOPTION
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_nested_collections_are_torn_down_with_their_parent_item() {
        let (doc, store, mount) = setup(
            r#"<div id="groups" s-each="groups"><template><section><ul s-each="$path.items"><template><li>item</li></template></ul></section></template></div>"#,
            json!({"groups": {
                "g1": {"items": {"x": 1, "y": 1}},
                "g2": {"items": {"z": 1}}
            }}),
        );
        let groups = doc.find_by_id("groups").unwrap();
        let sections = items(&groups);
        assert_eq!(sections.len(), 2);
        let first_list = sections[0].element_children()[0].clone();
        assert_eq!(items(&first_list).len(), 2);
        // Exact and wildcard subscription per collection.
        assert_eq!(store.listener_count(), 6);

        execute_action(&store, "groups.g1:delete");

        assert_eq!(keys(&groups), vec!["g2"]);
        assert_eq!(store.listener_count(), 4);
        assert_eq!(mount.binding_count(), 2);
    }

    #[test]
    fn test_existing_keyed_children_are_adopted() {
        let (doc, store, _mount) = setup(
            r#"<ul id="list" s-each="todos"><template><li s-text="$path.text"></li></template><li data-key="a">kept</li></ul>"#,
            json!({"todos": {"a": {"text": "A"}, "b": {"text": "B"}}}),
        );
        let list = doc.find_by_id("list").unwrap();
        assert_eq!(keys(&list), vec!["a", "b"]);
        assert_eq!(items(&list)[0].text_content(), "kept");

        execute_action(&store, "todos.a:delete");
        assert_eq!(keys(&list), vec!["b"]);
    }

    #[test]
    fn test_tagged_children_outside_the_mapping_are_left_alone() {
        let (doc, store, _mount) = setup(
            r#"<ul id="list" s-each="todos"><template><li s-text="$path.text"></li></template><li id="legend" data-key="legend">legend</li></ul>"#,
            json!({"todos": {"a": {"text": "A"}}}),
        );
        let list = doc.find_by_id("list").unwrap();
        let legend = doc.find_by_id("legend").unwrap();

        execute_action(&store, "todos.a:delete");

        assert!(Rc::ptr_eq(&legend.parent().unwrap(), &list));
        assert_eq!(keys(&list), vec!["legend"]);
    }

    #[test]
    fn test_item_key_is_configurable() {
        let doc = parse_document(
            r#"<ul id="list" s-each="todos"><template><li s-data-key="$path.tag"></li></template></ul>"#,
        )
        .unwrap();
        let store = MemoryStore::new(json!({"todos": {"a": {"tag": "urgent"}}}));
        let options = MountOptions::from_json(r#"{"itemKey": "item"}"#).unwrap();
        let _mount = mount_with(Rc::new(store.clone()), &doc.body().unwrap(), options);

        let list = doc.find_by_id("list").unwrap();
        let item = items(&list)[0].clone();
        assert_eq!(item.dataset("item").as_deref(), Some("a"));
        assert_eq!(item.dataset("key").as_deref(), Some("urgent"));

        execute_action(&store, "todos.a:delete");
        assert!(items(&list).is_empty());
    }
}
