//! Per-site feedback: property inline caches and operand type summaries
//!
//! Every instruction that carries a [`FeedbackIndex`] owns one slot in its
//! function's [`FeedbackVector`]. Slots are shared by all activations of the
//! function and only ever move up their lattice.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::operand::FeedbackIndex;

/// Maximum number of (shape, offset) entries a polymorphic cache holds
pub const MAX_POLYMORPHIC_ENTRIES: usize = 4;

/// What a feedback slot records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedbackSlotKind {
    /// Shape/offset pairs for property access
    Property,
    /// Operand type summary for arithmetic and comparison
    Operation,
}

/// State of a property inline cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PropertyCache {
    /// Initial state: no information cached
    #[default]
    Uninitialized,
    /// Single shape and offset cached
    Monomorphic {
        /// The shape identifier of the cached object
        shape_id: u64,
        /// The slot offset inside the object
        offset: u32,
    },
    /// Several shapes cached
    Polymorphic {
        /// Number of live entries (2..=MAX_POLYMORPHIC_ENTRIES)
        count: u8,
        /// (shape_id, offset) pairs; only the first `count` are meaningful
        entries: [(u64, u32); MAX_POLYMORPHIC_ENTRIES],
    },
    /// Too many shapes seen, always take the generic path
    Megamorphic,
}

impl PropertyCache {
    /// Cached offset for `shape_id`, if any
    pub fn lookup(&self, shape_id: u64) -> Option<u32> {
        match self {
            Self::Monomorphic {
                shape_id: cached,
                offset,
            } if *cached == shape_id => Some(*offset),
            Self::Polymorphic { count, entries } => entries[..*count as usize]
                .iter()
                .find(|(shape, _)| *shape == shape_id)
                .map(|(_, offset)| *offset),
            _ => None,
        }
    }

    /// Record an observed (shape, offset) pair.
    ///
    /// An entry for an already cached shape is overwritten. Once more than
    /// `limit` distinct shapes have been seen the cache goes megamorphic.
    pub fn record(&mut self, shape_id: u64, offset: u32, limit: usize) {
        let limit = limit.clamp(1, MAX_POLYMORPHIC_ENTRIES);
        *self = match *self {
            Self::Uninitialized => Self::Monomorphic { shape_id, offset },
            Self::Monomorphic {
                shape_id: cached, ..
            } if cached == shape_id => Self::Monomorphic { shape_id, offset },
            Self::Monomorphic {
                shape_id: cached,
                offset: cached_offset,
            } => {
                if limit < 2 {
                    Self::Megamorphic
                } else {
                    let mut entries = [(0, 0); MAX_POLYMORPHIC_ENTRIES];
                    entries[0] = (cached, cached_offset);
                    entries[1] = (shape_id, offset);
                    Self::Polymorphic { count: 2, entries }
                }
            }
            Self::Polymorphic { count, mut entries } => {
                let live = count as usize;
                if let Some(entry) = entries[..live].iter_mut().find(|(s, _)| *s == shape_id) {
                    entry.1 = offset;
                    Self::Polymorphic { count, entries }
                } else if live < limit {
                    entries[live] = (shape_id, offset);
                    Self::Polymorphic {
                        count: count + 1,
                        entries,
                    }
                } else {
                    Self::Megamorphic
                }
            }
            Self::Megamorphic => Self::Megamorphic,
        };
    }

    /// Whether the cache has given up on specialization
    pub fn is_megamorphic(&self) -> bool {
        matches!(self, Self::Megamorphic)
    }
}

/// Precision of a numeric observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NumericRange {
    /// Every value fit in a signed 32-bit integer
    SignedSmall,
    /// Arbitrary doubles
    Number,
}

/// Lattice of operand types observed at an operation site.
///
/// `None` is the bottom, `Any` the top. `Numeric(SignedSmall)` is below
/// `Numeric(Number)`; all other non-bottom elements are incomparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub enum TypeSummary {
    /// Nothing observed yet
    #[default]
    None,
    /// Booleans only
    Boolean,
    /// Strings only
    String,
    /// Numbers only
    Numeric(NumericRange),
    /// BigInts only
    BigInt,
    /// `undefined` / `null` only
    Oddball,
    /// Objects (including functions) only
    Object,
    /// Mixed types
    Any,
}

impl TypeSummary {
    /// Least upper bound of two summaries
    pub fn join(self, other: Self) -> Self {
        match (self, other) {
            (Self::None, x) | (x, Self::None) => x,
            (Self::Any, _) | (_, Self::Any) => Self::Any,
            (Self::Numeric(a), Self::Numeric(b)) => Self::Numeric(a.max(b)),
            (a, b) if a == b => a,
            _ => Self::Any,
        }
    }

    /// Partial order of the lattice
    pub fn is_subsumed_by(self, other: Self) -> bool {
        self.join(other) == other
    }

    /// Whether only numbers were observed
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Numeric(_))
    }
}

/// Slot contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackState {
    /// Property inline cache
    Property(PropertyCache),
    /// Operation type summary
    Operation(TypeSummary),
}

/// One feedback slot with diagnostic counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackSlot {
    /// Current state
    pub state: FeedbackState,
    /// Cache hits (property slots)
    pub hits: u32,
    /// Cache misses (property slots)
    pub misses: u32,
}

impl FeedbackSlot {
    /// Fresh slot of the given kind
    pub fn new(kind: FeedbackSlotKind) -> Self {
        let state = match kind {
            FeedbackSlotKind::Property => FeedbackState::Property(PropertyCache::Uninitialized),
            FeedbackSlotKind::Operation => FeedbackState::Operation(TypeSummary::None),
        };
        Self {
            state,
            hits: 0,
            misses: 0,
        }
    }

    /// Kind of this slot
    pub fn kind(&self) -> FeedbackSlotKind {
        match self.state {
            FeedbackState::Property(_) => FeedbackSlotKind::Property,
            FeedbackState::Operation(_) => FeedbackSlotKind::Operation,
        }
    }

    /// Property cache, for property slots
    pub fn property_cache(&self) -> Option<&PropertyCache> {
        match &self.state {
            FeedbackState::Property(cache) => Some(cache),
            FeedbackState::Operation(_) => None,
        }
    }

    /// Type summary, for operation slots
    pub fn type_summary(&self) -> Option<TypeSummary> {
        match self.state {
            FeedbackState::Operation(summary) => Some(summary),
            FeedbackState::Property(_) => None,
        }
    }
}

/// Feedback vector of a function, shared by all its activations
#[derive(Debug, Default)]
pub struct FeedbackVector {
    slots: RwLock<Vec<FeedbackSlot>>,
}

impl FeedbackVector {
    /// Vector with one fresh slot per kind
    pub fn new(kinds: &[FeedbackSlotKind]) -> Self {
        Self {
            slots: RwLock::new(kinds.iter().map(|k| FeedbackSlot::new(*k)).collect()),
        }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Check if the vector has no slots
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Copy of a slot
    pub fn get(&self, index: FeedbackIndex) -> Option<FeedbackSlot> {
        self.slots.read().get(index.0 as usize).copied()
    }

    /// Kind of a slot
    pub fn kind(&self, index: FeedbackIndex) -> Option<FeedbackSlotKind> {
        self.slots.read().get(index.0 as usize).map(FeedbackSlot::kind)
    }

    /// Consult a property slot, counting the hit or miss
    pub fn lookup_property(&self, index: FeedbackIndex, shape_id: u64) -> Option<u32> {
        let mut slots = self.slots.write();
        let slot = slots.get_mut(index.0 as usize)?;
        let FeedbackState::Property(cache) = &slot.state else {
            return None;
        };
        match cache.lookup(shape_id) {
            Some(offset) => {
                slot.hits = slot.hits.saturating_add(1);
                Some(offset)
            }
            None => {
                slot.misses = slot.misses.saturating_add(1);
                None
            }
        }
    }

    /// Record a (shape, offset) observation in a property slot.
    /// Returns the cache state after the update.
    pub fn record_property(
        &self,
        index: FeedbackIndex,
        shape_id: u64,
        offset: u32,
        limit: usize,
    ) -> Option<PropertyCache> {
        let mut slots = self.slots.write();
        match &mut slots.get_mut(index.0 as usize)?.state {
            FeedbackState::Property(cache) => {
                cache.record(shape_id, offset, limit);
                Some(*cache)
            }
            FeedbackState::Operation(_) => None,
        }
    }

    /// Join an observation into an operation slot
    pub fn record_operation(&self, index: FeedbackIndex, observed: TypeSummary) {
        let mut slots = self.slots.write();
        if let Some(FeedbackSlot {
            state: FeedbackState::Operation(summary),
            ..
        }) = slots.get_mut(index.0 as usize)
        {
            *summary = summary.join(observed);
        }
    }

    /// Reset every slot to its initial state
    pub fn clear(&self) {
        for slot in self.slots.write().iter_mut() {
            *slot = FeedbackSlot::new(slot.kind());
        }
    }
}

impl Clone for FeedbackVector {
    fn clone(&self) -> Self {
        Self {
            slots: RwLock::new(self.slots.read().clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_cache_transitions() {
        let mut cache = PropertyCache::default();
        cache.record(1, 0, MAX_POLYMORPHIC_ENTRIES);
        assert!(matches!(cache, PropertyCache::Monomorphic { shape_id: 1, offset: 0 }));

        cache.record(2, 1, MAX_POLYMORPHIC_ENTRIES);
        assert!(matches!(cache, PropertyCache::Polymorphic { count: 2, .. }));
        assert_eq!(cache.lookup(1), Some(0));
        assert_eq!(cache.lookup(2), Some(1));

        cache.record(3, 2, MAX_POLYMORPHIC_ENTRIES);
        cache.record(4, 3, MAX_POLYMORPHIC_ENTRIES);
        assert!(matches!(cache, PropertyCache::Polymorphic { count: 4, .. }));

        cache.record(5, 4, MAX_POLYMORPHIC_ENTRIES);
        assert!(cache.is_megamorphic());
        assert_eq!(cache.lookup(1), None);

        cache.record(1, 0, MAX_POLYMORPHIC_ENTRIES);
        assert!(cache.is_megamorphic());
    }

    #[test]
    fn test_conflicting_entry_is_overwritten() {
        let mut cache = PropertyCache::default();
        cache.record(7, 0, MAX_POLYMORPHIC_ENTRIES);
        cache.record(7, 3, MAX_POLYMORPHIC_ENTRIES);
        assert_eq!(cache.lookup(7), Some(3));
        assert!(matches!(cache, PropertyCache::Monomorphic { .. }));

        cache.record(8, 1, MAX_POLYMORPHIC_ENTRIES);
        cache.record(8, 5, MAX_POLYMORPHIC_ENTRIES);
        assert!(matches!(cache, PropertyCache::Polymorphic { count: 2, .. }));
        assert_eq!(cache.lookup(8), Some(5));
    }

    #[test]
    fn test_polymorphic_limit() {
        let mut cache = PropertyCache::default();
        cache.record(1, 0, 1);
        cache.record(2, 0, 1);
        assert!(cache.is_megamorphic());

        let mut cache = PropertyCache::default();
        cache.record(1, 0, 2);
        cache.record(2, 0, 2);
        cache.record(3, 0, 2);
        assert!(cache.is_megamorphic());
    }

    #[test]
    fn test_type_summary_join() {
        use NumericRange::*;
        let small = TypeSummary::Numeric(SignedSmall);
        let number = TypeSummary::Numeric(Number);

        assert_eq!(TypeSummary::None.join(small), small);
        assert_eq!(small.join(number), number);
        assert_eq!(number.join(small), number);
        assert_eq!(small.join(TypeSummary::String), TypeSummary::Any);
        assert_eq!(TypeSummary::Any.join(TypeSummary::None), TypeSummary::Any);
        assert_eq!(TypeSummary::Oddball.join(TypeSummary::Oddball), TypeSummary::Oddball);
        assert!(small.is_subsumed_by(number));
        assert!(!number.is_subsumed_by(small));
    }

    #[test]
    fn test_type_summary_lattice_laws() {
        use NumericRange::*;
        let all = [
            TypeSummary::None,
            TypeSummary::Boolean,
            TypeSummary::String,
            TypeSummary::Numeric(SignedSmall),
            TypeSummary::Numeric(Number),
            TypeSummary::BigInt,
            TypeSummary::Oddball,
            TypeSummary::Object,
            TypeSummary::Any,
        ];
        for a in all {
            assert_eq!(a.join(a), a);
            assert!(a.is_subsumed_by(a.join(TypeSummary::Any)));
            for b in all {
                assert_eq!(a.join(b), b.join(a));
                assert!(a.is_subsumed_by(a.join(b)));
                for c in all {
                    assert_eq!(a.join(b).join(c), a.join(b.join(c)));
                }
            }
        }
    }

    #[test]
    fn test_vector_counts_hits_and_misses() {
        let vector = FeedbackVector::new(&[FeedbackSlotKind::Property, FeedbackSlotKind::Operation]);
        let slot = FeedbackIndex(0);

        assert_eq!(vector.lookup_property(slot, 10), None);
        vector.record_property(slot, 10, 2, MAX_POLYMORPHIC_ENTRIES);
        assert_eq!(vector.lookup_property(slot, 10), Some(2));

        let snapshot = vector.get(slot).unwrap();
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.misses, 1);

        vector.record_operation(FeedbackIndex(1), TypeSummary::Numeric(NumericRange::SignedSmall));
        assert_eq!(
            vector.get(FeedbackIndex(1)).unwrap().type_summary(),
            Some(TypeSummary::Numeric(NumericRange::SignedSmall))
        );

        // Wrong-kind accesses are ignored
        assert_eq!(vector.lookup_property(FeedbackIndex(1), 10), None);
        assert_eq!(vector.record_property(FeedbackIndex(1), 10, 0, 4), None);

        vector.clear();
        assert_eq!(vector.get(slot).unwrap().hits, 0);
    }
}
