//! Local copy of the subscribed subtree.
//!
//! `put` and `patch` events are applied to a private working copy; each
//! applied event yields a fresh immutable snapshot for consumers. Empty
//! objects are pruned after deletions since the store has no empty nodes.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::event::StoreEvent;

#[derive(Debug, Clone, Default)]
pub struct LocalTree {
    root: Value,
}

impl LocalTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a data event. Returns the new snapshot, or `None` for events
    /// that carry no data.
    pub fn apply(&mut self, event: &StoreEvent) -> Option<Arc<Value>> {
        match event {
            StoreEvent::Put { path, data } => self.put(path, data.clone()),
            StoreEvent::Patch { path, data } => self.patch(path, data),
            _ => return None,
        }
        Some(self.snapshot())
    }

    pub fn put(&mut self, path: &str, data: Value) {
        set_at(&mut self.root, &segments(path), data);
        self.normalize_root();
    }

    pub fn patch(&mut self, path: &str, data: &Value) {
        let base = segments(path);
        match data.as_object() {
            Some(children) => {
                for (key, value) in children {
                    let mut target = base.clone();
                    target.extend(segments(key));
                    set_at(&mut self.root, &target, value.clone());
                }
            }
            // A patch with a non-object body behaves like a put.
            None => set_at(&mut self.root, &base, data.clone()),
        }
        self.normalize_root();
    }

    pub fn snapshot(&self) -> Arc<Value> {
        Arc::new(self.root.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_null()
    }

    fn normalize_root(&mut self) {
        if is_empty_node(&self.root) {
            self.root = Value::Null;
        }
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn is_empty_node(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn set_at(node: &mut Value, path: &[&str], data: Value) {
    let Some((head, rest)) = path.split_first() else {
        *node = data;
        return;
    };

    let map = as_object_mut(node);
    if rest.is_empty() && data.is_null() {
        map.remove(*head);
        return;
    }

    let child = map.entry(head.to_string()).or_insert(Value::Null);
    set_at(child, rest, data);
    if is_empty_node(child) {
        map.remove(*head);
    }
}

/// Turns `node` into an object so a child can be addressed by key. Arrays
/// become index-keyed maps, scalars are overwritten.
fn as_object_mut(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        let converted = match node.take() {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .filter(|(_, v)| !v.is_null())
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            _ => Map::new(),
        };
        *node = Value::Object(converted);
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just converted to an object"),
    }
}
