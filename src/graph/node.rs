//! Node: the abstract unit of work (spec.md §3.1).
//!
//! A `Node<I>` is a cheap, cloneable handle (`Arc` underneath) around:
//! - identity (`id`, `name`), filled in once by the planner;
//! - connectivity (`input`, `outputs`), filled in by [`crate::graph::connect`];
//! - the per-kind user behavior and configuration.
//!
//! Forward edges (`outputs`) hold a strong `Arc`; the back-edge (`input`)
//! holds a `Weak` one so a chain of connected nodes doesn't form an Rc
//! cycle — the external `Vec<Node<I>>` the planner builds during discovery
//! is the graph's real owner.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{EngineError, NodeException, Result};
use crate::item::{Bulkable, Item};

/// Stable identifier assigned by the planner (`"node_1"`, `"node_2"`, ...).
pub type NodeId = String;

/// Kind discriminant, independent of the boxed user behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKindTag {
    Extractor,
    Transformer,
    Filter,
    Loader,
    Bulker,
    DeBulker,
}

impl fmt::Display for NodeKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKindTag::Extractor => "extractor",
            NodeKindTag::Transformer => "transformer",
            NodeKindTag::Filter => "filter",
            NodeKindTag::Loader => "loader",
            NodeKindTag::Bulker => "bulker",
            NodeKindTag::DeBulker => "debulker",
        };
        f.write_str(s)
    }
}

/// User-overridable hooks for an Extractor (spec.md §3.1, §4.4).
pub trait Extract<I: Item>: Send {
    fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
    /// Produce the next item, or `None` on exhaustion.
    fn extract(&mut self) -> anyhow::Result<Option<I>>;
    fn finalize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
    fn handle_exception(&mut self, _exception: &NodeException) -> anyhow::Result<()> {
        self.finalize()
    }
}

/// User-overridable hooks for a Transformer.
pub trait Transform<I: Item>: Send {
    fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
    fn transform(&mut self, item: I) -> anyhow::Result<I>;
    fn finalize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
    fn handle_exception(&mut self, _exception: &NodeException) -> anyhow::Result<()> {
        self.finalize()
    }
}

/// User-overridable hooks for a Filter. `filter` returns the value compared
/// against `FilterConfig::filter_value`; the item is dropped iff they're equal.
pub trait FilterOp<I: Item>: Send {
    fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
    fn filter(&mut self, item: &I) -> anyhow::Result<Option<I>>;
    fn finalize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
    fn handle_exception(&mut self, _exception: &NodeException) -> anyhow::Result<()> {
        self.finalize()
    }
}

/// User-overridable hooks for a Loader.
pub trait Load<I: Item>: Send {
    fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
    fn load(&mut self, item: I) -> anyhow::Result<()>;
    fn finalize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
    fn handle_exception(&mut self, _exception: &NodeException) -> anyhow::Result<()> {
        self.finalize()
    }
}

/// Extractor configuration (spec.md §3.5).
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Items accumulated per emitted batch. `None` defers to
    /// [`crate::config::EngineTunables::default_batch_size`].
    pub batch_size: Option<usize>,
    pub main_process_affinity: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            main_process_affinity: true,
        }
    }
}

/// Shared configuration for Transformer / Filter / Loader (spec.md §3.5).
#[derive(Debug, Clone, Default)]
pub struct ProcessorConfig {
    pub input_key: Option<String>,
    pub main_process_affinity: bool,
    /// `None` defers to [`crate::config::EngineTunables::default_queue_max_size`].
    pub queue_max_size: Option<usize>,
}

/// Filter-only extra configuration.
#[derive(Debug, Clone)]
pub struct FilterExtra<I: Item> {
    /// Items whose `filter` result equals this value are dropped. Left at
    /// the default `None`, a `filter` callback returning `None` means
    /// "drop"; any `Some(_)` means "keep" unless set to something else here.
    pub filter_value: Option<I>,
    pub disable_safe_copy: bool,
}

impl<I: Item> Default for FilterExtra<I> {
    fn default() -> Self {
        Self {
            filter_value: None,
            disable_safe_copy: false,
        }
    }
}

/// Loader-only extra configuration.
#[derive(Debug, Clone, Default)]
pub struct LoaderExtra {
    pub disable_safe_copy: bool,
}

/// Bulker configuration.
#[derive(Debug, Clone)]
pub struct BulkerConfig {
    pub target_bulk_size: usize,
    pub main_process_affinity: bool,
}

impl Default for BulkerConfig {
    fn default() -> Self {
        Self {
            target_bulk_size: 1,
            main_process_affinity: false,
        }
    }
}

/// DeBulker configuration.
#[derive(Debug, Clone, Default)]
pub struct DeBulkerConfig {
    pub main_process_affinity: bool,
}

/// The boxed, kind-specific user behavior. Spawned fresh for every segment
/// replica that hosts this node (spec.md §4.5: "parallel replicas of the
/// same segment each build their own local state"), via [`Node::spawn_behavior`].
pub enum NodeBehavior<I: Item> {
    Extractor(Box<dyn Extract<I>>),
    Transformer(Box<dyn Transform<I>>),
    Filter(Box<dyn FilterOp<I>>),
    Loader(Box<dyn Load<I>>),
    Bulker,
    DeBulker,
}

/// The kind-specific, read-only configuration, set at construction time and
/// never mutated after (spec.md §5: "no post-start mutation of configuration
/// is supported").
pub enum NodeConfig<I: Item> {
    Extractor(ExtractorConfig),
    Transformer(ProcessorConfig),
    Filter(ProcessorConfig, FilterExtra<I>),
    Loader(ProcessorConfig, LoaderExtra),
    Bulker(BulkerConfig),
    DeBulker(DeBulkerConfig),
}

/// Produces one fresh [`NodeBehavior`] per call, by cloning the user value
/// the node was constructed with. Wrapped in a `Mutex` purely to let
/// `NodeData<I>` stay `Sync` without requiring the user's behavior type to
/// be `Sync` itself — calls are never actually concurrent, since the engine
/// spawns every segment replica's behaviors up front from a single thread.
type BehaviorFactory<I> = Mutex<Box<dyn FnMut() -> NodeBehavior<I> + Send>>;

struct NodeData<I: Item> {
    type_name: &'static str,
    tag: NodeKindTag,
    config: NodeConfig<I>,
    factory: BehaviorFactory<I>,
    id: Mutex<Option<NodeId>>,
    name: Mutex<Option<String>>,
    input: Mutex<Option<Weak<NodeData<I>>>>,
    outputs: Mutex<Vec<Node<I>>>,
}

/// A node in the ETL graph. Cheap to clone (an `Arc` handle); equality and
/// hashing are by identity, not by configuration value.
pub struct Node<I: Item>(Arc<NodeData<I>>);

impl<I: Item> Clone for Node<I> {
    fn clone(&self) -> Self {
        Node(self.0.clone())
    }
}

impl<I: Item> PartialEq for Node<I> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<I: Item> Eq for Node<I> {}

impl<I: Item> Hash for Node<I> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl<I: Item> fmt::Debug for Node<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.display_name())
    }
}

/// Extract the last path segment of a (possibly generic) type name, e.g.
/// `my_crate::nodes::ListExtractor<Foo>` -> `ListExtractor`.
fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}

impl<I: Item> Node<I> {
    fn new(
        type_name: &'static str,
        tag: NodeKindTag,
        factory: Box<dyn FnMut() -> NodeBehavior<I> + Send>,
        config: NodeConfig<I>,
    ) -> Self {
        Node(Arc::new(NodeData {
            type_name,
            tag,
            config,
            factory: Mutex::new(factory),
            id: Mutex::new(None),
            name: Mutex::new(None),
            input: Mutex::new(None),
            outputs: Mutex::new(Vec::new()),
        }))
    }

    pub fn extractor<E: Extract<I> + Clone + 'static>(behavior: E) -> Self {
        Self::new(
            short_type_name::<E>(),
            NodeKindTag::Extractor,
            Box::new(move || NodeBehavior::Extractor(Box::new(behavior.clone()))),
            NodeConfig::Extractor(ExtractorConfig::default()),
        )
    }

    pub fn extractor_with_config<E: Extract<I> + Clone + 'static>(behavior: E, config: ExtractorConfig) -> Self {
        Self::new(
            short_type_name::<E>(),
            NodeKindTag::Extractor,
            Box::new(move || NodeBehavior::Extractor(Box::new(behavior.clone()))),
            NodeConfig::Extractor(config),
        )
    }

    pub fn transformer<T: Transform<I> + Clone + 'static>(behavior: T) -> Self {
        Self::new(
            short_type_name::<T>(),
            NodeKindTag::Transformer,
            Box::new(move || NodeBehavior::Transformer(Box::new(behavior.clone()))),
            NodeConfig::Transformer(ProcessorConfig::default()),
        )
    }

    pub fn transformer_with_config<T: Transform<I> + Clone + 'static>(behavior: T, config: ProcessorConfig) -> Self {
        Self::new(
            short_type_name::<T>(),
            NodeKindTag::Transformer,
            Box::new(move || NodeBehavior::Transformer(Box::new(behavior.clone()))),
            NodeConfig::Transformer(config),
        )
    }

    pub fn filter<F: FilterOp<I> + Clone + 'static>(behavior: F) -> Self {
        Self::filter_with_config(behavior, ProcessorConfig::default(), FilterExtra::default())
    }

    pub fn filter_with_config<F: FilterOp<I> + Clone + 'static>(
        behavior: F,
        config: ProcessorConfig,
        extra: FilterExtra<I>,
    ) -> Self {
        Self::new(
            short_type_name::<F>(),
            NodeKindTag::Filter,
            Box::new(move || NodeBehavior::Filter(Box::new(behavior.clone()))),
            NodeConfig::Filter(config, extra),
        )
    }

    pub fn loader<L: Load<I> + Clone + 'static>(behavior: L) -> Self {
        Self::loader_with_config(behavior, ProcessorConfig::default(), LoaderExtra::default())
    }

    pub fn loader_with_config<L: Load<I> + Clone + 'static>(
        behavior: L,
        config: ProcessorConfig,
        extra: LoaderExtra,
    ) -> Self {
        Self::new(
            short_type_name::<L>(),
            NodeKindTag::Loader,
            Box::new(move || NodeBehavior::Loader(Box::new(behavior.clone()))),
            NodeConfig::Loader(config, extra),
        )
    }

    pub fn tag(&self) -> NodeKindTag {
        self.0.tag
    }

    pub fn type_name(&self) -> &'static str {
        self.0.type_name
    }

    pub fn id(&self) -> Option<NodeId> {
        self.0.id.lock().clone()
    }

    pub(crate) fn assign_id(&self, id: NodeId) {
        *self.0.id.lock() = Some(id);
    }

    pub fn name(&self) -> Option<String> {
        self.0.name.lock().clone()
    }

    /// Explicitly set a user-supplied name. Must happen before planning.
    pub fn with_name(self, name: impl Into<String>) -> Self {
        *self.0.name.lock() = Some(name.into());
        self
    }

    pub(crate) fn assign_name_if_absent(&self, name: String) {
        let mut guard = self.0.name.lock();
        if guard.is_none() {
            *guard = Some(name);
        }
    }

    /// `id` if assigned, else `name` if assigned, else the derived type name
    /// — used only for error messages before planning has run.
    pub fn display_name(&self) -> String {
        if let Some(id) = self.id() {
            return id;
        }
        if let Some(name) = self.name() {
            return name;
        }
        self.0.type_name.to_string()
    }

    pub fn input(&self) -> Option<Node<I>> {
        self.0
            .input
            .lock()
            .as_ref()
            .and_then(|weak| weak.upgrade())
            .map(Node)
    }

    pub fn outputs(&self) -> Vec<Node<I>> {
        self.0.outputs.lock().clone()
    }

    pub fn is_terminal_loader(&self) -> bool {
        self.0.tag == NodeKindTag::Loader && self.outputs().is_empty()
    }

    pub fn has_output(&self, target: &Node<I>) -> bool {
        self.0.outputs.lock().iter().any(|n| n == target)
    }

    pub(crate) fn set_input(&self, origin: &Node<I>) -> Result<()> {
        let mut guard = self.0.input.lock();
        if guard.is_some() {
            return Err(EngineError::Connection(format!(
                "node {} already has an upstream; create a new node instead of reusing one",
                self.display_name()
            )));
        }
        *guard = Some(Arc::downgrade(&origin.0));
        Ok(())
    }

    pub(crate) fn push_output(&self, target: Node<I>) {
        self.0.outputs.lock().push(target);
    }

    pub fn config(&self) -> &NodeConfig<I> {
        &self.0.config
    }

    pub fn main_process_affinity(&self) -> bool {
        match &self.0.config {
            NodeConfig::Extractor(c) => c.main_process_affinity,
            NodeConfig::Transformer(c) => c.main_process_affinity,
            NodeConfig::Filter(c, _) => c.main_process_affinity,
            NodeConfig::Loader(c, _) => c.main_process_affinity,
            NodeConfig::Bulker(c) => c.main_process_affinity,
            NodeConfig::DeBulker(c) => c.main_process_affinity,
        }
    }

    pub fn queue_max_size(&self) -> Option<usize> {
        match &self.0.config {
            NodeConfig::Transformer(c) | NodeConfig::Filter(c, _) | NodeConfig::Loader(c, _) => {
                c.queue_max_size
            }
            _ => None,
        }
    }

    /// Spawn a fresh, independent instance of this node's behavior. Safe to
    /// call once per segment replica that hosts this node.
    pub(crate) fn spawn_behavior(&self) -> NodeBehavior<I> {
        (self.0.factory.lock())()
    }
}

/// Bulker/DeBulker are only constructible for item types with an aggregate
/// representation (see [`Bulkable`]); every other constructor above is
/// available for any `I: Item`.
impl<I: Bulkable> Node<I> {
    pub fn bulker(config: BulkerConfig) -> Self {
        Self::new(
            "Bulker",
            NodeKindTag::Bulker,
            Box::new(|| NodeBehavior::Bulker),
            NodeConfig::Bulker(config),
        )
    }

    pub fn debulker(config: DeBulkerConfig) -> Self {
        Self::new(
            "DeBulker",
            NodeKindTag::DeBulker,
            Box::new(|| NodeBehavior::DeBulker),
            NodeConfig::DeBulker(config),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result as AnyResult;

    #[derive(Clone)]
    struct Noop;
    impl Extract<i64> for Noop {
        fn extract(&mut self) -> AnyResult<Option<i64>> {
            Ok(None)
        }
    }

    #[test]
    fn derives_type_name_from_generic_struct() {
        let node = Node::extractor(Noop);
        assert_eq!(node.type_name(), "Noop");
    }

    #[test]
    fn display_name_prefers_id_then_name_then_type() {
        let node = Node::extractor(Noop).with_name("custom");
        assert_eq!(node.display_name(), "custom");
        node.assign_id("node_1".to_string());
        assert_eq!(node.display_name(), "node_1");
    }

    #[test]
    fn identity_equality_not_structural() {
        let a = Node::extractor(Noop);
        let b = a.clone();
        let c = Node::extractor(Noop);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
