//! SubGraph and the `connect` operator (spec.md §3.2, §4.1).
//!
//! Mirrors the reference implementation's `_NodeConnector.connect` /
//! `Node.__rshift__` algebra: a left-hand side contributes its "leaf" nodes
//! as origins, a right-hand side contributes its "root" nodes as targets,
//! and every leaf is wired to every root. A `SubGraph` with more than one
//! leaf cannot itself be chained further to the right (its own leaves would
//! become ambiguous), which is the one hard rejection the algebra makes.

use crate::error::{EngineError, Result};
use crate::item::Item;

use super::edge::Edge;
use super::node::Node;

/// An opaque group of nodes produced by chaining connections, exposing only
/// the root nodes (no upstream within the subgraph) and leaf nodes (no
/// downstream within the subgraph) needed to keep chaining further.
#[derive(Clone, Debug)]
pub struct SubGraph<I: Item> {
    roots: Vec<Node<I>>,
    leaves: Vec<Node<I>>,
}

impl<I: Item> SubGraph<I> {
    pub fn roots(&self) -> &[Node<I>] {
        &self.roots
    }

    pub fn leaves(&self) -> &[Node<I>] {
        &self.leaves
    }

    pub fn is_single_leaf(&self) -> bool {
        self.leaves.len() == 1
    }
}

/// The result of resolving a `connect` left-hand side: `leaves` are the
/// actual nodes to wire the connection from, `roots` are the nodes the
/// resulting [`SubGraph`] should report as its own roots. For a bare node or
/// node list the two coincide; for a [`SubGraph`] being chained further,
/// `leaves` is its current leaf set (what the new edges attach to) while
/// `roots` is its *original* root set, carried through unchanged so the
/// pipeline's true entry point survives the chain.
pub struct ConnectOrigins<I: Item> {
    roots: Vec<Node<I>>,
    leaves: Vec<Node<I>>,
}

/// The result of resolving a `connect` right-hand side: `roots` are the
/// actual nodes to wire the connection to, `leaves` are the nodes the
/// resulting [`SubGraph`] should report as its own leaves.
pub struct ConnectTargets<I: Item> {
    roots: Vec<Node<I>>,
    leaves: Vec<Node<I>>,
}

/// Anything that can serve as the left-hand side of a `connect` call,
/// contributing one or more origin nodes.
pub trait IntoOrigins<I: Item> {
    fn into_origins(self) -> Result<ConnectOrigins<I>>;
}

/// Anything that can serve as the right-hand side of a `connect` call,
/// contributing one or more target roots.
pub trait IntoTargets<I: Item> {
    fn into_targets(self) -> ConnectTargets<I>;
}

impl<I: Item> IntoOrigins<I> for Node<I> {
    fn into_origins(self) -> Result<ConnectOrigins<I>> {
        Ok(ConnectOrigins {
            roots: vec![self.clone()],
            leaves: vec![self],
        })
    }
}

impl<I: Item> IntoOrigins<I> for SubGraph<I> {
    fn into_origins(self) -> Result<ConnectOrigins<I>> {
        if self.leaves.len() > 1 {
            return Err(EngineError::Connection(format!(
                "cannot chain a {}-leaf subgraph further; fan-out subgraphs have \
                 ambiguous leaves for the next connection",
                self.leaves.len()
            )));
        }
        Ok(ConnectOrigins {
            roots: self.roots,
            leaves: self.leaves,
        })
    }
}

impl<I: Item> IntoOrigins<I> for Vec<Node<I>> {
    fn into_origins(self) -> Result<ConnectOrigins<I>> {
        Ok(ConnectOrigins {
            roots: self.clone(),
            leaves: self,
        })
    }
}

impl<I: Item> IntoTargets<I> for Node<I> {
    fn into_targets(self) -> ConnectTargets<I> {
        ConnectTargets {
            roots: vec![self.clone()],
            leaves: vec![self],
        }
    }
}

impl<I: Item> IntoTargets<I> for SubGraph<I> {
    fn into_targets(self) -> ConnectTargets<I> {
        // Per spec.md §4.1: a SubGraph target contributes its root nodes to
        // wire to, and reports its own leaves onward (or its roots, if it
        // has none of its own — an empty-leaf subgraph is just its roots).
        let leaves = if self.leaves.is_empty() {
            self.roots.clone()
        } else {
            self.leaves
        };
        ConnectTargets {
            roots: self.roots,
            leaves,
        }
    }
}

impl<I: Item> IntoTargets<I> for Vec<Node<I>> {
    fn into_targets(self) -> ConnectTargets<I> {
        ConnectTargets {
            roots: self.clone(),
            leaves: self,
        }
    }
}

/// Connect every leaf of `origin` to every root of `target`, fan-out and
/// fan-in both allowed (spec.md §3.2's "nodes can have any number of
/// outputs" / "exactly zero or one input").
///
/// Rejects:
/// - connecting a node to itself (`EngineError::CyclicNode`);
/// - connecting the same (origin, target) pair twice (`AlreadyConnected`);
/// - assigning a second upstream to a target that already has one
///   (`Connection`, raised by [`Node::set_input`]).
pub fn connect<I, O, T>(origin: O, target: T) -> Result<SubGraph<I>>
where
    I: Item,
    O: IntoOrigins<I>,
    T: IntoTargets<I>,
{
    let ConnectOrigins { roots: result_roots, leaves: origins } = origin.into_origins()?;
    let ConnectTargets { roots: targets, leaves: result_leaves } = target.into_targets();

    validate_and_wire(&origins, &targets)?;

    Ok(SubGraph {
        roots: result_roots,
        leaves: result_leaves,
    })
}

/// Connect and additionally return the resolved [`Edge`]s, for callers that
/// want the explicit pairwise connection list rather than just the
/// resulting subgraph boundary.
pub fn connect_with_edges<I, O, T>(origin: O, target: T) -> Result<(SubGraph<I>, Vec<Edge<I>>)>
where
    I: Item,
    O: IntoOrigins<I>,
    T: IntoTargets<I>,
{
    let ConnectOrigins { roots: result_roots, leaves: origins } = origin.into_origins()?;
    let ConnectTargets { roots: targets, leaves: result_leaves } = target.into_targets();

    validate_and_wire(&origins, &targets)?;

    let edges: Vec<Edge<I>> = origins
        .iter()
        .flat_map(|o| targets.iter().map(move |t| Edge::new(o.clone(), t.clone())))
        .collect();

    let subgraph = SubGraph {
        roots: result_roots,
        leaves: result_leaves,
    };
    Ok((subgraph, edges))
}

/// Reject the two hard failure cases and then wire every origin to every
/// target, shared by [`connect`] and [`connect_with_edges`].
fn validate_and_wire<I: Item>(origins: &[Node<I>], targets: &[Node<I>]) -> Result<()> {
    for o in origins {
        for t in targets {
            if o == t {
                return Err(EngineError::CyclicNode(o.display_name()));
            }
            if o.has_output(t) {
                return Err(EngineError::AlreadyConnected {
                    origin: o.display_name(),
                    target: t.display_name(),
                });
            }
        }
    }

    for o in origins {
        for t in targets {
            t.set_input(o)?;
            o.push_output(t.clone());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::{Extract, FilterOp, Load, Transform};
    use anyhow::Result as AnyResult;

    #[derive(Clone)]
    struct Noop;
    impl Extract<i64> for Noop {
        fn extract(&mut self) -> AnyResult<Option<i64>> {
            Ok(None)
        }
    }
    impl Transform<i64> for Noop {
        fn transform(&mut self, item: i64) -> AnyResult<i64> {
            Ok(item)
        }
    }
    impl FilterOp<i64> for Noop {
        fn filter(&mut self, item: &i64) -> AnyResult<Option<i64>> {
            Ok(Some(*item))
        }
    }
    impl Load<i64> for Noop {
        fn load(&mut self, _item: i64) -> AnyResult<()> {
            Ok(())
        }
    }

    #[test]
    fn simple_chain_connects() {
        let e = Node::extractor(Noop);
        let t = Node::transformer(Noop);
        let l = Node::loader(Noop);

        let sg1 = connect(e.clone(), t.clone()).unwrap();
        assert_eq!(sg1.roots(), &[e.clone()]);
        assert_eq!(sg1.leaves(), &[t.clone()]);

        let sg2 = connect(sg1, l.clone()).unwrap();
        assert_eq!(sg2.roots(), &[e.clone()]);
        assert_eq!(sg2.leaves(), &[l.clone()]);

        assert_eq!(e.outputs(), vec![t.clone()]);
        assert_eq!(t.input().unwrap(), e);
        assert_eq!(t.outputs(), vec![l.clone()]);
    }

    #[test]
    fn fan_out_to_multiple_targets() {
        let e = Node::extractor(Noop);
        let t1 = Node::transformer(Noop);
        let t2 = Node::transformer(Noop);

        let sg = connect(e.clone(), vec![t1.clone(), t2.clone()]).unwrap();
        assert_eq!(sg.leaves().len(), 2);
        assert_eq!(e.outputs().len(), 2);
    }

    #[test]
    fn fan_in_from_multiple_origins() {
        let t1 = Node::transformer(Noop);
        let t2 = Node::transformer(Noop);
        let l = Node::loader(Noop);

        let sg = connect(vec![t1.clone(), t2.clone()], l.clone()).unwrap();
        assert_eq!(sg.roots().len(), 2);
        assert_eq!(t1.outputs(), vec![l.clone()]);
        assert_eq!(t2.outputs(), vec![l.clone()]);
    }

    #[test]
    fn self_connection_rejected() {
        let e = Node::extractor(Noop);
        let err = connect(e.clone(), e.clone()).unwrap_err();
        assert!(matches!(err, EngineError::CyclicNode(_)));
    }

    #[test]
    fn duplicate_connection_rejected() {
        let e = Node::extractor(Noop);
        let t = Node::transformer(Noop);
        connect(e.clone(), t.clone()).unwrap();
        let err = connect(e, t).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyConnected { .. }));
    }

    #[test]
    fn multi_leaf_subgraph_cannot_be_chained_further() {
        let e = Node::extractor(Noop);
        let t1 = Node::transformer(Noop);
        let t2 = Node::transformer(Noop);
        let sg = connect(e, vec![t1, t2]).unwrap();
        assert!(!sg.is_single_leaf());

        let l = Node::loader(Noop);
        let err = connect(sg, l).unwrap_err();
        assert!(matches!(err, EngineError::Connection(_)));
    }

    #[test]
    fn second_upstream_rejected() {
        let e1 = Node::extractor(Noop);
        let e2 = Node::extractor(Noop);
        let t = Node::transformer(Noop);
        connect(e1, t.clone()).unwrap();
        let err = connect(e2, t).unwrap_err();
        assert!(matches!(err, EngineError::Connection(_)));
    }
}
