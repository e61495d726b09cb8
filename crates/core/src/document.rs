//! Document model: the schemaless JSON tree behind every entity
//!
//! This module defines the two pieces every layer above builds on:
//! - `DocPath`: a path into a JSON document (e.g. `address.lines[0]`)
//! - `DocHandle`: a shared, lockable handle to one document tree
//!
//! ## Design
//!
//! A document is the only persisted representation of an entity or embedded
//! instance. The tree is intentionally schemaless; all typed access goes
//! through the binder table so untyped access never leaks past this crate.
//!
//! Embedded instances do not copy their sub-document: they hold the same
//! `DocHandle` as their owner plus a longer `DocPath`, so a child view
//! observes every mutation of the parent tree and vice versa. The handle is
//! `Arc<RwLock<Value>>`; the lock is held only for the duration of a single
//! get/set, never across an await point.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// DocPath
// =============================================================================

/// One component of a `DocPath`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object member access by key
    Key(String),
    /// Array element access by position
    Index(usize),
}

/// A path into a JSON document
///
/// The empty path addresses the document root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocPath {
    segments: Vec<PathSegment>,
}

impl DocPath {
    /// The root path
    pub fn root() -> Self {
        DocPath::default()
    }

    /// True if this path addresses the document root
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Path segments, outermost first
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Extend with an object key, returning the child path
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Key(key.into()));
        DocPath { segments }
    }

    /// Extend with an array index, returning the child path
    pub fn index(&self, idx: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Index(idx));
        DocPath { segments }
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "$");
        }
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                PathSegment::Key(k) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{k}")?;
                }
                PathSegment::Index(n) => write!(f, "[{n}]")?,
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tree traversal
// =============================================================================

/// Resolve a path against a tree, read-only.
fn resolve<'a>(root: &'a Value, path: &DocPath) -> Option<&'a Value> {
    let mut cur = root;
    for seg in path.segments() {
        cur = match seg {
            PathSegment::Key(k) => cur.as_object()?.get(k)?,
            PathSegment::Index(n) => cur.as_array()?.get(*n)?,
        };
    }
    Some(cur)
}

/// Resolve a path against a tree, creating intermediate objects for key
/// segments. Array segments must already exist (or point one past the end,
/// in which case a `Null` element is appended).
fn resolve_mut<'a>(root: &'a mut Value, path: &DocPath) -> Option<&'a mut Value> {
    let mut cur = root;
    for seg in path.segments() {
        match seg {
            PathSegment::Key(k) => {
                if !cur.is_object() {
                    *cur = Value::Object(Map::new());
                }
                let map = cur.as_object_mut()?;
                cur = map.entry(k.clone()).or_insert(Value::Null);
            }
            PathSegment::Index(n) => {
                let arr = cur.as_array_mut()?;
                if *n == arr.len() {
                    arr.push(Value::Null);
                }
                cur = arr.get_mut(*n)?;
            }
        }
    }
    Some(cur)
}

// =============================================================================
// DocHandle
// =============================================================================

/// Shared handle to one document tree
///
/// Cloning the handle clones the `Arc`, not the tree: all clones observe the
/// same document. The per-instance scalar cache lives elsewhere
/// (`Instance`), never in the handle.
#[derive(Clone)]
pub struct DocHandle {
    root: Arc<RwLock<Value>>,
}

impl DocHandle {
    /// Wrap a document tree. An empty object is the usual starting point.
    pub fn new(root: Value) -> Self {
        DocHandle {
            root: Arc::new(RwLock::new(root)),
        }
    }

    /// Fresh empty object document
    pub fn empty() -> Self {
        DocHandle::new(Value::Object(Map::new()))
    }

    /// Run a closure over the value at `path`, if present
    pub fn with<R>(&self, path: &DocPath, f: impl FnOnce(Option<&Value>) -> R) -> R {
        let guard = self.root.read();
        f(resolve(&guard, path))
    }

    /// Clone of the value at `path`
    pub fn get(&self, path: &DocPath) -> Option<Value> {
        self.with(path, |v| v.cloned())
    }

    /// String at `path`, if the value is a string
    pub fn get_str(&self, path: &DocPath) -> Option<String> {
        self.with(path, |v| v.and_then(Value::as_str).map(str::to_owned))
    }

    /// True if a value exists at `path`
    pub fn contains(&self, path: &DocPath) -> bool {
        self.with(path, |v| v.is_some())
    }

    /// Write `value` at `path`, creating intermediate objects as needed
    pub fn set(&self, path: &DocPath, value: Value) {
        let mut guard = self.root.write();
        if path.is_root() {
            *guard = value;
            return;
        }
        if let Some(slot) = resolve_mut(&mut guard, path) {
            *slot = value;
        }
    }

    /// Remove and return the value at `path`
    pub fn remove(&self, path: &DocPath) -> Option<Value> {
        let (parent, last) = split_last(path)?;
        let mut guard = self.root.write();
        let holder = resolve_mut(&mut guard, &parent)?;
        match last {
            PathSegment::Key(k) => holder.as_object_mut()?.remove(&k),
            PathSegment::Index(n) => {
                let arr = holder.as_array_mut()?;
                if n < arr.len() {
                    Some(arr.remove(n))
                } else {
                    None
                }
            }
        }
    }

    /// Ensure an object exists at `path`; leaves an existing object alone
    pub fn ensure_object(&self, path: &DocPath) {
        let mut guard = self.root.write();
        if let Some(slot) = resolve_mut(&mut guard, path) {
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
        }
    }

    /// Ensure an array exists at `path`; leaves an existing array alone
    pub fn ensure_array(&self, path: &DocPath) {
        let mut guard = self.root.write();
        if let Some(slot) = resolve_mut(&mut guard, path) {
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
        }
    }

    /// Append to the array at `path`, creating the array when absent
    pub fn push(&self, path: &DocPath, value: Value) {
        let mut guard = self.root.write();
        if let Some(slot) = resolve_mut(&mut guard, path) {
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
            if let Some(arr) = slot.as_array_mut() {
                arr.push(value);
            }
        }
    }

    /// Length of the array at `path`, 0 when absent
    pub fn array_len(&self, path: &DocPath) -> usize {
        self.with(path, |v| {
            v.and_then(Value::as_array).map_or(0, Vec::len)
        })
    }

    /// Clone of the subtree at `path`, `Null` when absent
    pub fn snapshot(&self, path: &DocPath) -> Value {
        self.get(path).unwrap_or(Value::Null)
    }

    /// Replace the whole tree (hydration from storage)
    pub fn replace_root(&self, value: Value) {
        *self.root.write() = value;
    }
}

impl fmt::Debug for DocHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocHandle[{}]", self.root.read())
    }
}

fn split_last(path: &DocPath) -> Option<(DocPath, PathSegment)> {
    let segments = path.segments();
    let (last, parent) = segments.split_last()?;
    Some((
        DocPath {
            segments: parent.to_vec(),
        },
        last.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_display() {
        let p = DocPath::root().key("address").key("lines").index(0);
        assert_eq!(p.to_string(), "address.lines[0]");
        assert_eq!(DocPath::root().to_string(), "$");
    }

    #[test]
    fn test_get_set_at_path() {
        let doc = DocHandle::empty();
        let p = DocPath::root().key("a").key("b");
        doc.set(&p, json!(42));
        assert_eq!(doc.get(&p), Some(json!(42)));
        assert_eq!(doc.get(&DocPath::root().key("a")), Some(json!({"b": 42})));
    }

    #[test]
    fn test_remove_clears_key() {
        let doc = DocHandle::new(json!({"a": {"b": 1, "c": 2}}));
        let removed = doc.remove(&DocPath::root().key("a").key("b"));
        assert_eq!(removed, Some(json!(1)));
        assert_eq!(doc.get(&DocPath::root().key("a")), Some(json!({"c": 2})));
    }

    #[test]
    fn test_child_view_sees_parent_mutation() {
        let doc = DocHandle::new(json!({"address": {"city": "Aarhus"}}));
        let child = doc.clone();
        doc.set(&DocPath::root().key("address").key("city"), json!("Odense"));
        assert_eq!(
            child.get_str(&DocPath::root().key("address").key("city")),
            Some("Odense".to_string())
        );
    }

    #[test]
    fn test_push_and_len() {
        let doc = DocHandle::empty();
        let p = DocPath::root().key("tags");
        assert_eq!(doc.array_len(&p), 0);
        doc.push(&p, json!("a"));
        doc.push(&p, json!("b"));
        assert_eq!(doc.array_len(&p), 2);
        assert_eq!(doc.get(&p), Some(json!(["a", "b"])));
    }

    #[test]
    fn test_ensure_object_is_idempotent() {
        let doc = DocHandle::new(json!({"state": {"value": "OPEN"}}));
        doc.ensure_object(&DocPath::root().key("state"));
        assert_eq!(
            doc.get(&DocPath::root().key("state")),
            Some(json!({"value": "OPEN"}))
        );
    }

    #[test]
    fn test_snapshot_missing_is_null() {
        let doc = DocHandle::empty();
        assert_eq!(doc.snapshot(&DocPath::root().key("nope")), Value::Null);
    }
}
