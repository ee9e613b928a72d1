//! JavaScript objects with hidden classes (shapes)
//!
//! Named properties live in a slot vector whose layout is described by a
//! [`Shape`]. Deleting a property (or growing past
//! [`MAX_SHAPED_PROPERTIES`]) switches the object to dictionary mode, where
//! it no longer has a shape and inline caches skip it. Integer keys live in
//! a separate element vector.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::shape::Shape;
use crate::value::Value;

/// Named properties beyond this count put the object in dictionary mode
pub const MAX_SHAPED_PROPERTIES: usize = 64;

/// Index keys further than this past the end are stored as named properties
const MAX_ELEMENT_GAP: usize = 1 << 20;

/// Property key (string or array index)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// String property key
    String(Arc<str>),
    /// Integer index
    Index(u32),
}

impl PropertyKey {
    /// Create a string property key. Canonical array indices become
    /// [`PropertyKey::Index`].
    pub fn string(s: &str) -> Self {
        match s.parse::<u32>() {
            Ok(i) if i != u32::MAX && i.to_string() == s => Self::Index(i),
            _ => Self::String(Arc::from(s)),
        }
    }

    /// Create from a shared string
    pub fn from_shared(s: Arc<str>) -> Self {
        match s.parse::<u32>() {
            Ok(i) if i != u32::MAX && i.to_string() == *s => Self::Index(i),
            _ => Self::String(s),
        }
    }

    /// Create an index property key
    pub fn index(i: u32) -> Self {
        Self::Index(i)
    }
}

impl std::fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Index(i) => write!(f, "{}", i),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<u32> for PropertyKey {
    fn from(i: u32) -> Self {
        Self::Index(i)
    }
}

enum Layout {
    Shaped(Arc<Shape>),
    Dictionary {
        index: FxHashMap<PropertyKey, usize>,
        keys: Vec<PropertyKey>,
    },
}

struct Storage {
    layout: Layout,
    slots: Vec<Value>,
    /// Holes mark absent elements
    elements: Vec<Value>,
}

impl Storage {
    fn slot_of(&self, key: &PropertyKey) -> Option<usize> {
        match &self.layout {
            Layout::Shaped(shape) => shape.get_offset(key).map(|o| o as usize),
            Layout::Dictionary { index, .. } => index.get(key).copied(),
        }
    }

    fn to_dictionary(&mut self) {
        if let Layout::Shaped(shape) = &self.layout {
            let keys: Vec<PropertyKey> = shape.own_keys().to_vec();
            let index = keys.iter().cloned().enumerate().map(|(i, k)| (k, i)).collect();
            self.layout = Layout::Dictionary { index, keys };
        }
    }

    fn element(&self, i: u32) -> Option<Value> {
        self.elements
            .get(i as usize)
            .filter(|v| !v.is_hole())
            .cloned()
    }
}

/// A JavaScript object
///
/// Thread-safe with interior mutability.
pub struct JsObject {
    storage: RwLock<Storage>,
    prototype: RwLock<Option<Arc<JsObject>>>,
    is_array: bool,
}

impl JsObject {
    /// Create a new empty object
    pub fn new(prototype: Option<Arc<JsObject>>) -> Self {
        Self {
            storage: RwLock::new(Storage {
                layout: Layout::Shaped(Shape::root()),
                slots: Vec::new(),
                elements: Vec::new(),
            }),
            prototype: RwLock::new(prototype),
            is_array: false,
        }
    }

    /// Create a new array holding `elements`
    pub fn array(elements: Vec<Value>) -> Self {
        let mut obj = Self::new(None);
        obj.is_array = true;
        obj.storage.get_mut().elements = elements;
        obj
    }

    /// Shape id usable as an inline-cache key; `None` in dictionary mode
    pub fn shape_id(&self) -> Option<u64> {
        match &self.storage.read().layout {
            Layout::Shaped(shape) => Some(shape.id()),
            Layout::Dictionary { .. } => None,
        }
    }

    /// Whether the object has given up its shape
    pub fn is_dictionary_mode(&self) -> bool {
        self.shape_id().is_none()
    }

    /// Shape id and slot offset of an own named property
    pub fn lookup_offset(&self, key: &PropertyKey) -> Option<(u64, u32)> {
        let storage = self.storage.read();
        match &storage.layout {
            Layout::Shaped(shape) => shape.get_offset(key).map(|o| (shape.id(), o)),
            Layout::Dictionary { .. } => None,
        }
    }

    /// Read the slot at `offset` if the object still has shape `shape_id`
    pub fn get_at_offset(&self, shape_id: u64, offset: u32) -> Option<Value> {
        let storage = self.storage.read();
        match &storage.layout {
            Layout::Shaped(shape) if shape.id() == shape_id => {
                storage.slots.get(offset as usize).cloned()
            }
            _ => None,
        }
    }

    /// Overwrite the slot at `offset` if the object still has shape
    /// `shape_id`
    pub fn set_at_offset(&self, shape_id: u64, offset: u32, value: Value) -> bool {
        let mut storage = self.storage.write();
        let matches = matches!(&storage.layout, Layout::Shaped(shape) if shape.id() == shape_id);
        match storage.slots.get_mut(offset as usize) {
            Some(slot) if matches => {
                *slot = value;
                true
            }
            _ => false,
        }
    }

    /// Get own property by key
    pub fn get_own(&self, key: &PropertyKey) -> Option<Value> {
        let storage = self.storage.read();
        match key {
            PropertyKey::Index(i) => {
                if let Some(v) = storage.element(*i) {
                    return Some(v);
                }
            }
            PropertyKey::String(s) if self.is_array && &**s == "length" => {
                return Some(Value::number(storage.elements.len() as f64));
            }
            PropertyKey::String(_) => {}
        }
        storage
            .slot_of(key)
            .and_then(|slot| storage.slots.get(slot).cloned())
    }

    /// Get property by key, walking the prototype chain
    pub fn get(&self, key: &PropertyKey) -> Option<Value> {
        if let Some(value) = self.get_own(key) {
            return Some(value);
        }
        let mut current = self.prototype();
        while let Some(obj) = current {
            if let Some(value) = obj.get_own(key) {
                return Some(value);
            }
            current = obj.prototype();
        }
        None
    }

    /// Set own property by key, adding it if missing
    pub fn set(&self, key: PropertyKey, value: Value) -> bool {
        let mut storage = self.storage.write();

        if let PropertyKey::Index(i) = key {
            let idx = i as usize;
            let len = storage.elements.len();
            if idx < len {
                storage.elements[idx] = value;
                return true;
            }
            if idx - len <= MAX_ELEMENT_GAP && storage.slot_of(&key).is_none() {
                storage.elements.resize(idx, Value::hole());
                storage.elements.push(value);
                return true;
            }
        }

        if self.is_array {
            if let PropertyKey::String(s) = &key {
                if &**s == "length" {
                    let len = value.as_number().filter(|n| *n >= 0.0 && n.fract() == 0.0);
                    let Some(len) = len else {
                        return false;
                    };
                    storage.elements.resize(len as usize, Value::hole());
                    return true;
                }
            }
        }

        if let Some(slot) = storage.slot_of(&key) {
            storage.slots[slot] = value;
            return true;
        }

        let grow_dictionary = matches!(
            &storage.layout,
            Layout::Shaped(shape) if shape.property_count() >= MAX_SHAPED_PROPERTIES
        );
        if grow_dictionary {
            storage.to_dictionary();
        }

        let slot = storage.slots.len();
        match &mut storage.layout {
            Layout::Shaped(shape) => {
                let next = shape.transition(key);
                *shape = next;
            }
            Layout::Dictionary { index, keys } => {
                index.insert(key.clone(), slot);
                keys.push(key);
            }
        }
        storage.slots.push(value);
        true
    }

    /// Delete an own property. Deleting a named property leaves shape mode.
    pub fn delete(&self, key: &PropertyKey) -> bool {
        let mut storage = self.storage.write();
        if let PropertyKey::Index(i) = key {
            let idx = *i as usize;
            if idx < storage.elements.len() {
                if idx + 1 == storage.elements.len() && !self.is_array {
                    storage.elements.pop();
                } else {
                    storage.elements[idx] = Value::hole();
                }
                return true;
            }
        }

        let Some(slot) = storage.slot_of(key) else {
            return true;
        };
        storage.to_dictionary();
        storage.slots.remove(slot);
        if let Layout::Dictionary { index, keys } = &mut storage.layout {
            keys.remove(slot);
            *index = keys.iter().cloned().enumerate().map(|(i, k)| (k, i)).collect();
        }
        true
    }

    /// Check if object has own property
    pub fn has_own(&self, key: &PropertyKey) -> bool {
        self.get_own(key).is_some()
    }

    /// Check if object has property (including prototype chain)
    pub fn has(&self, key: &PropertyKey) -> bool {
        self.get(key).is_some()
    }

    /// Own property keys: indices in ascending order, then names in
    /// insertion order
    pub fn own_keys(&self) -> Vec<PropertyKey> {
        let storage = self.storage.read();
        let mut keys: Vec<PropertyKey> = storage
            .elements
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_hole())
            .map(|(i, _)| PropertyKey::Index(i as u32))
            .collect();
        match &storage.layout {
            Layout::Shaped(shape) => keys.extend(shape.own_keys().iter().cloned()),
            Layout::Dictionary { keys: names, .. } => keys.extend(names.iter().cloned()),
        }
        keys
    }

    /// Get prototype
    pub fn prototype(&self) -> Option<Arc<JsObject>> {
        self.prototype.read().clone()
    }

    /// Replace the prototype
    pub fn set_prototype(&self, prototype: Option<Arc<JsObject>>) {
        *self.prototype.write() = prototype;
    }

    /// Check if object is an array
    pub fn is_array(&self) -> bool {
        self.is_array
    }

    /// Array length (element count for non-arrays)
    pub fn array_length(&self) -> usize {
        self.storage.read().elements.len()
    }

    /// Push element to array
    pub fn array_push(&self, value: Value) {
        self.storage.write().elements.push(value);
    }

    /// Snapshot of the elements, holes read as undefined
    pub fn elements(&self) -> Vec<Value> {
        self.storage
            .read()
            .elements
            .iter()
            .map(|v| if v.is_hole() { Value::undefined() } else { v.clone() })
            .collect()
    }
}

impl std::fmt::Debug for JsObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let storage = self.storage.read();
        f.debug_struct("JsObject")
            .field("properties", &storage.slots.len())
            .field("elements", &storage.elements.len())
            .field("is_array", &self.is_array)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_get_set() {
        let obj = JsObject::new(None);
        obj.set(PropertyKey::string("foo"), Value::int32(42));
        assert_eq!(obj.get(&PropertyKey::string("foo")), Some(Value::int32(42)));
        assert_eq!(obj.get(&PropertyKey::string("bar")), None);
    }

    #[test]
    fn test_same_insertion_order_same_shape() {
        let a = JsObject::new(None);
        let b = JsObject::new(None);
        for obj in [&a, &b] {
            obj.set(PropertyKey::string("x"), Value::int32(1));
            obj.set(PropertyKey::string("y"), Value::int32(2));
        }
        assert!(a.shape_id().is_some());
        assert_eq!(a.shape_id(), b.shape_id());
    }

    #[test]
    fn test_offset_access_checks_shape() {
        let obj = JsObject::new(None);
        obj.set(PropertyKey::string("x"), Value::int32(1));
        let (shape, offset) = obj.lookup_offset(&PropertyKey::string("x")).unwrap();
        assert_eq!(obj.get_at_offset(shape, offset), Some(Value::int32(1)));

        obj.set(PropertyKey::string("y"), Value::int32(2));
        assert_eq!(obj.get_at_offset(shape, offset), None);
        assert!(!obj.set_at_offset(shape, offset, Value::int32(5)));
    }

    #[test]
    fn test_delete_enters_dictionary_mode() {
        let obj = JsObject::new(None);
        obj.set(PropertyKey::string("x"), Value::int32(1));
        obj.set(PropertyKey::string("y"), Value::int32(2));
        assert!(obj.delete(&PropertyKey::string("x")));
        assert!(obj.is_dictionary_mode());
        assert_eq!(obj.get(&PropertyKey::string("x")), None);
        assert_eq!(obj.get(&PropertyKey::string("y")), Some(Value::int32(2)));
        obj.set(PropertyKey::string("z"), Value::int32(3));
        assert_eq!(
            obj.own_keys(),
            vec![PropertyKey::string("y"), PropertyKey::string("z")]
        );
    }

    #[test]
    fn test_prototype_chain() {
        let proto = Arc::new(JsObject::new(None));
        proto.set(PropertyKey::string("inherited"), Value::boolean(true));
        let obj = JsObject::new(Some(proto));
        assert!(obj.has(&PropertyKey::string("inherited")));
        assert!(!obj.has_own(&PropertyKey::string("inherited")));
    }

    #[test]
    fn test_array() {
        let arr = JsObject::array(vec![Value::int32(1), Value::int32(2)]);
        assert!(arr.is_array());
        arr.set(PropertyKey::Index(3), Value::int32(4));
        assert_eq!(arr.array_length(), 4);
        assert_eq!(arr.get(&PropertyKey::Index(2)), None);
        assert_eq!(arr.get(&PropertyKey::string("length")), Some(Value::int32(4)));
        assert_eq!(arr.get(&PropertyKey::string("1")), Some(Value::int32(2)));
    }

    #[test]
    fn test_canonical_index_keys() {
        assert_eq!(PropertyKey::string("7"), PropertyKey::Index(7));
        assert!(matches!(PropertyKey::string("07"), PropertyKey::String(_)));
        assert!(matches!(PropertyKey::string("-1"), PropertyKey::String(_)));
    }

    #[test]
    fn test_object_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<JsObject>();
    }
}
