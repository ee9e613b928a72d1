//! Heap environment blocks for captured bindings
//!
//! A block is a fixed-size array of cells plus a link to the enclosing
//! block. Closures keep the chain alive through `Arc`. A closure stored in
//! a cell of the block it captured forms a cycle; the owning context breaks
//! those when it is dropped via [`EnvironmentRegistry::clear_all`].

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

use crate::value::Value;

/// One environment block
pub struct Environment {
    slots: Mutex<Vec<Value>>,
    parent: Option<Arc<Environment>>,
}

impl Environment {
    /// Create a block of `size` uninitialized (hole) cells
    pub fn new(size: usize, parent: Option<Arc<Environment>>) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(vec![Value::hole(); size]),
            parent,
        })
    }

    /// Enclosing block
    pub fn parent(&self) -> Option<&Arc<Environment>> {
        self.parent.as_ref()
    }

    /// Block `depth` levels out (0 = this block)
    pub fn ancestor(self: &Arc<Self>, depth: u16) -> Option<&Arc<Environment>> {
        let mut current = self;
        for _ in 0..depth {
            current = current.parent.as_ref()?;
        }
        Some(current)
    }

    /// Read a cell
    pub fn get(&self, slot: u16) -> Option<Value> {
        self.slots.lock().get(slot as usize).cloned()
    }

    /// Write a cell. Returns `false` if the slot does not exist.
    pub fn set(&self, slot: u16, value: Value) -> bool {
        match self.slots.lock().get_mut(slot as usize) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Check if the block has no cells
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cell value, breaking cycles through this block
    fn clear(&self) {
        self.slots.lock().clear();
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("cells", &self.len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

/// Weak list of every block allocated by one context
#[derive(Debug, Default)]
pub struct EnvironmentRegistry {
    blocks: Mutex<Vec<Weak<Environment>>>,
}

/// Registry size at which dead entries are pruned
const SWEEP_THRESHOLD: usize = 4096;

impl EnvironmentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a block and remember it
    pub fn allocate(&self, size: usize, parent: Option<Arc<Environment>>) -> Arc<Environment> {
        let env = Environment::new(size, parent);
        let mut blocks = self.blocks.lock();
        if blocks.len() >= SWEEP_THRESHOLD && blocks.len().is_power_of_two() {
            blocks.retain(|b| b.strong_count() > 0);
        }
        blocks.push(Arc::downgrade(&env));
        env
    }

    /// Prune entries whose block is already gone
    pub fn sweep(&self) -> usize {
        let mut blocks = self.blocks.lock();
        let before = blocks.len();
        blocks.retain(|b| b.strong_count() > 0);
        before - blocks.len()
    }

    /// Number of live blocks
    pub fn live_count(&self) -> usize {
        self.blocks
            .lock()
            .iter()
            .filter(|b| b.strong_count() > 0)
            .count()
    }

    /// Clear every live block
    pub fn clear_all(&self) {
        let blocks = std::mem::take(&mut *self.blocks.lock());
        let live: Vec<Arc<Environment>> = blocks.iter().filter_map(Weak::upgrade).collect();
        tracing::debug!(blocks = live.len(), "clearing environment blocks");
        for env in &live {
            env.clear();
        }
    }
}
