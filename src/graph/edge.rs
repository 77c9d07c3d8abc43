//! Edge: a resolved (origin, target) connection, as returned by
//! [`crate::graph::connect`] for callers that want to inspect the graph's
//! shape rather than just its nodes (spec.md §3.2).

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::item::Item;

use super::node::Node;

/// A single directed connection between two nodes. Identity-based equality,
/// same as [`Node`] — two `Edge`s are equal iff they link the same origin
/// and target node instances.
pub struct Edge<I: Item> {
    origin: Node<I>,
    target: Node<I>,
}

impl<I: Item> fmt::Debug for Edge<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Edge({:?} -> {:?})", self.origin, self.target)
    }
}

impl<I: Item> Edge<I> {
    pub(crate) fn new(origin: Node<I>, target: Node<I>) -> Self {
        Self { origin, target }
    }

    pub fn origin(&self) -> &Node<I> {
        &self.origin
    }

    pub fn target(&self) -> &Node<I> {
        &self.target
    }
}

impl<I: Item> Clone for Edge<I> {
    fn clone(&self) -> Self {
        Edge {
            origin: self.origin.clone(),
            target: self.target.clone(),
        }
    }
}

impl<I: Item> PartialEq for Edge<I> {
    fn eq(&self, other: &Self) -> bool {
        self.origin == other.origin && self.target == other.target
    }
}

impl<I: Item> Eq for Edge<I> {}

impl<I: Item> Hash for Edge<I> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.origin.hash(state);
        self.target.hash(state);
    }
}
