//! Host record store abstraction.
//!
//! Records live behind shared nodes so that observers holding a node keep seeing the
//! same record when it is patched in place.
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub type Node<R> = Arc<RwLock<R>>;

pub fn read<R>(node: &Node<R>) -> RwLockReadGuard<'_, R> {
    node.read().unwrap_or_else(|e| e.into_inner())
}

pub fn write<R>(node: &Node<R>) -> RwLockWriteGuard<'_, R> {
    node.write().unwrap_or_else(|e| e.into_inner())
}

pub trait Store<R>: Send + Sync {
    /// Every record matching `predicate`, in document order.
    fn query_nodes(&self, predicate: &dyn Fn(&R) -> bool) -> Vec<Node<R>>;

    fn query_node(&self, predicate: &dyn Fn(&R) -> bool) -> Option<Node<R>> {
        self.query_nodes(predicate).into_iter().next()
    }

    /// Replaces the whole content.
    fn load(&self, records: Vec<R>);

    fn append(&self, record: R) -> Node<R>;

    fn remove(&self, node: &Node<R>);

    /// Mutates one record in place.
    fn set_attribute(&self, node: &Node<R>, mutate: &dyn Fn(&mut R));

    fn all(&self) -> Vec<Node<R>> {
        self.query_nodes(&|_| true)
    }
}

#[derive(Debug)]
pub struct MemoryStore<R> {
    nodes: RwLock<Vec<Node<R>>>,
}

impl<R> Default for MemoryStore<R> {
    fn default() -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
        }
    }
}

impl<R> MemoryStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: Send + Sync> Store<R> for MemoryStore<R> {
    fn query_nodes(&self, predicate: &dyn Fn(&R) -> bool) -> Vec<Node<R>> {
        self.nodes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|node| predicate(&read(node)))
            .cloned()
            .collect()
    }

    fn load(&self, records: Vec<R>) {
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        *nodes = records
            .into_iter()
            .map(|record| Arc::new(RwLock::new(record)))
            .collect();
    }

    fn append(&self, record: R) -> Node<R> {
        let node = Arc::new(RwLock::new(record));
        self.nodes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&node));
        node
    }

    fn remove(&self, node: &Node<R>) {
        self.nodes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|n| !Arc::ptr_eq(n, node));
    }

    fn set_attribute(&self, node: &Node<R>, mutate: &dyn Fn(&mut R)) {
        mutate(&mut write(node));
    }
}
