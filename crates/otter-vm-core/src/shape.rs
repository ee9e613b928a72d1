//! Hidden classes (shapes) for property access optimization.
//!
//! A Shape represents the structure of an object: what properties it has
//! and at what offsets they are stored. Shapes are shared between objects
//! with the same structure using a transition tree, and each shape carries
//! a process-unique id that inline caches use as their key.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use crate::object::PropertyKey;

static NEXT_SHAPE_ID: AtomicU64 = AtomicU64::new(1);
static ROOT: OnceLock<Arc<Shape>> = OnceLock::new();

/// A Shape defines the layout of properties in an object.
pub struct Shape {
    id: u64,

    /// The parent shape from which this shape was transitioned.
    /// None for the root (empty) shape.
    pub parent: Option<Arc<Shape>>,

    /// The property key that was added to the parent to create this shape.
    pub key: Option<PropertyKey>,

    /// Transitions to child shapes. Children hold their parent strongly;
    /// the parent only remembers them weakly.
    transitions: Mutex<FxHashMap<PropertyKey, Weak<Shape>>>,

    /// All property offsets in this shape (inherited + own)
    property_map: FxHashMap<PropertyKey, u32>,

    /// Keys in insertion order
    keys_ordered: Vec<PropertyKey>,
}

impl Shape {
    fn next_id() -> u64 {
        NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// The shared root (empty) shape.
    pub fn root() -> Arc<Self> {
        Arc::clone(ROOT.get_or_init(|| {
            Arc::new(Self {
                id: Self::next_id(),
                parent: None,
                key: None,
                transitions: Mutex::new(FxHashMap::default()),
                property_map: FxHashMap::default(),
                keys_ordered: Vec::new(),
            })
        }))
    }

    /// Cache key of this shape
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Find a transition for a given key, or create a new one.
    pub fn transition(self: &Arc<Self>, key: PropertyKey) -> Arc<Self> {
        let mut transitions = self.transitions.lock();
        if let Some(shape) = transitions.get(&key).and_then(Weak::upgrade) {
            return shape;
        }

        let next_offset = self.keys_ordered.len() as u32;

        let mut property_map = self.property_map.clone();
        property_map.insert(key.clone(), next_offset);

        let mut keys_ordered = self.keys_ordered.clone();
        keys_ordered.push(key.clone());

        let shape = Arc::new(Self {
            id: Self::next_id(),
            parent: Some(Arc::clone(self)),
            key: Some(key.clone()),
            transitions: Mutex::new(FxHashMap::default()),
            property_map,
            keys_ordered,
        });

        transitions.retain(|_, child| child.strong_count() > 0);
        transitions.insert(key, Arc::downgrade(&shape));
        shape
    }

    /// Get the offset of a property key in this shape.
    pub fn get_offset(&self, key: &PropertyKey) -> Option<u32> {
        self.property_map.get(key).copied()
    }

    /// Key stored at `offset`
    pub fn key_at(&self, offset: u32) -> Option<&PropertyKey> {
        self.keys_ordered.get(offset as usize)
    }

    /// Own property keys in insertion order.
    pub fn own_keys(&self) -> &[PropertyKey] {
        &self.keys_ordered
    }

    /// Number of properties defined in this shape.
    pub fn property_count(&self) -> usize {
        self.keys_ordered.len()
    }
}

impl std::fmt::Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shape")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("property_count", &self.property_count())
            .finish()
    }
}
