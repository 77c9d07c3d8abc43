//! The item capability: values that can flow through the engine without it
//! ever needing to know their concrete shape.
//!
//! The engine never inspects the values flowing through it; it only moves,
//! clones and (optionally) projects them. `input_key`-based access becomes
//! a capability on the item type rather than a dynamic dictionary lookup.

use std::fmt::Debug;

/// A value that can flow through the engine.
///
/// `project` implements the `input_key` configuration option: nodes that
/// declare an `input_key` call `project(key)` on each incoming item and
/// operate on the projected value instead of the whole item. Item types
/// that don't support keyed projection simply return `None` always, which
/// amounts to opting that type out of `input_key` support entirely.
pub trait Item: Clone + Send + Sync + Debug + PartialEq + 'static {
    fn project(&self, key: &str) -> Option<Self>
    where
        Self: Sized;
}

/// Capability required to sit on either side of a Bulker/DeBulker boundary:
/// an item type must be able to represent "many of itself" as one value of
/// itself. Kept separate from
/// [`Item`] rather than folded into it, since most item types flowing
/// through a graph never pass through a Bulker and shouldn't have to define
/// an aggregate representation to qualify as an `Item` at all.
pub trait Bulkable: Item {
    fn bulk(items: Vec<Self>) -> Self;
    fn unbulk(self) -> Vec<Self>;
}

impl Item for serde_json::Value {
    fn project(&self, key: &str) -> Option<Self> {
        self.get(key).cloned()
    }
}

impl Bulkable for serde_json::Value {
    fn bulk(items: Vec<Self>) -> Self {
        serde_json::Value::Array(items)
    }

    fn unbulk(self) -> Vec<Self> {
        match self {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        }
    }
}

impl Item for String {
    fn project(&self, _key: &str) -> Option<Self> {
        None
    }
}

impl Item for i64 {
    fn project(&self, _key: &str) -> Option<Self> {
        None
    }
}

impl Bulkable for i64 {
    fn bulk(items: Vec<Self>) -> Self {
        items.iter().sum()
    }

    fn unbulk(self) -> Vec<Self> {
        vec![self]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn projects_object_field() {
        let v = json!({"a": 1, "b": "two"});
        assert_eq!(v.project("a"), Some(json!(1)));
        assert_eq!(v.project("b"), Some(json!("two")));
        assert_eq!(v.project("missing"), None);
    }

    #[test]
    fn non_keyed_items_never_project() {
        assert_eq!("hello".to_string().project("anything"), None);
        assert_eq!(42i64.project("anything"), None);
    }

    #[test]
    fn json_bulk_round_trips() {
        let items = vec![json!(1), json!(2), json!(3)];
        let bulked = serde_json::Value::bulk(items.clone());
        assert_eq!(bulked, json!([1, 2, 3]));
        assert_eq!(bulked.unbulk(), items);
    }

    #[test]
    fn json_unbulk_wraps_non_array_as_singleton() {
        assert_eq!(json!("scalar").unbulk(), vec![json!("scalar")]);
    }
}
