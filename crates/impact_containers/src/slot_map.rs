//! A [`Vec`] that reuses the locations of removed values and hands out
//! generational keys.

use bytemuck::{Pod, Zeroable};

/// A [`Vec`] that maintains a list of each index where a value has been
/// removed and reuses these locations when adding new values.
///
/// Each location ("slot") has an associated generation that is advanced every
/// time the slot is reused. The generation is part of the [`SlotKey`] returned
/// on insertion, so a key to a removed value can never reach the value that
/// later takes over its slot.
#[derive(Clone, Debug, Default)]
pub struct SlotMap<V> {
    slots: Vec<Slot<V>>,
    free_slot_indices: Vec<u32>,
}

/// A key into a [`SlotMap`].
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Zeroable, Pod)]
pub struct SlotKey {
    generation: u32,
    idx: u32,
}

#[derive(Clone, Debug)]
struct Slot<V> {
    generation: u32,
    value: Option<V>,
}

impl<V> SlotMap<V> {
    /// Creates a new empty map.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_slot_indices: Vec::new(),
        }
    }

    /// Returns the number of values in the map.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free_slot_indices.len()
    }

    /// Returns true if the map contains no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a value exists for the given key.
    pub fn contains(&self, key: SlotKey) -> bool {
        self.get(key).is_some()
    }

    /// Returns a reference to the value for the given key, or [`None`] if the
    /// value has been removed or the key belongs to a different map.
    pub fn get(&self, key: SlotKey) -> Option<&V> {
        self.slots
            .get(key.idx as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Returns a mutable reference to the value for the given key, or [`None`]
    /// if the value has been removed or the key belongs to a different map.
    pub fn get_mut(&mut self, key: SlotKey) -> Option<&mut V> {
        self.slots
            .get_mut(key.idx as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Returns a reference to the value for the given key.
    ///
    /// # Panics
    /// If no value exists for the key.
    pub fn value(&self, key: SlotKey) -> &V {
        self.get(key).expect("Tried to access free or reused slot")
    }

    /// Returns a mutable reference to the value for the given key.
    ///
    /// # Panics
    /// If no value exists for the key.
    pub fn value_mut(&mut self, key: SlotKey) -> &mut V {
        self.get_mut(key)
            .expect("Tried to access free or reused slot")
    }

    /// Inserts the given value into the map, reusing a free slot if one is
    /// available.
    ///
    /// # Returns
    /// The key for the slot where the value was added.
    ///
    /// # Panics
    /// If the map would exceed `u32::MAX` slots.
    pub fn insert(&mut self, value: V) -> SlotKey {
        if let Some(idx) = self.free_slot_indices.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.value = Some(value);
            SlotKey {
                generation: slot.generation,
                idx,
            }
        } else {
            let idx = u32::try_from(self.slots.len())
                .expect("Slot map exceeded maximum capacity (u32::MAX)");
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            SlotKey { generation: 0, idx }
        }
    }

    /// Removes and returns the value for the given key, or returns [`None`] if
    /// there is no value for the key.
    pub fn remove(&mut self, key: SlotKey) -> Option<V> {
        let slot = self
            .slots
            .get_mut(key.idx as usize)
            .filter(|slot| slot.generation == key.generation)?;
        let value = slot.value.take()?;
        self.free_slot_indices.push(key.idx);
        Some(value)
    }

    /// Removes every value for which the given predicate returns `false`.
    pub fn retain(&mut self, mut keep: impl FnMut(SlotKey, &V) -> bool) {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            let key = SlotKey {
                generation: slot.generation,
                idx: idx as u32,
            };
            if slot.value.as_ref().is_some_and(|value| !keep(key, value)) {
                slot.value = None;
                self.free_slot_indices.push(idx as u32);
            }
        }
    }
}

impl SlotKey {
    /// Returns the index of the slot the key refers to.
    pub fn idx(&self) -> u32 {
        self.idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserting_and_accessing_values_works() {
        let mut map = SlotMap::new();
        let key_a = map.insert(1.0);
        let key_b = map.insert(2.0);

        assert_eq!(map.len(), 2);
        assert_eq!(*map.value(key_a), 1.0);
        assert_eq!(*map.value(key_b), 2.0);

        *map.value_mut(key_b) = 3.0;
        assert_eq!(map.get(key_b), Some(&3.0));
    }

    #[test]
    fn removed_value_is_gone() {
        let mut map = SlotMap::new();
        let key = map.insert("a");

        assert_eq!(map.remove(key), Some("a"));
        assert!(map.is_empty());
        assert!(!map.contains(key));
        assert_eq!(map.remove(key), None);
    }

    #[test]
    fn reused_slot_rejects_old_key() {
        let mut map = SlotMap::new();
        let old_key = map.insert(1);
        map.remove(old_key);
        let new_key = map.insert(2);

        assert_eq!(old_key.idx(), new_key.idx());
        assert!(map.get(old_key).is_none());
        assert_eq!(*map.value(new_key), 2);
    }

    #[test]
    fn retain_frees_rejected_slots() {
        let mut map = SlotMap::new();
        let keys: Vec<_> = (0..5).map(|value| map.insert(value)).collect();

        map.retain(|_, value| value % 2 == 0);

        assert_eq!(map.len(), 3);
        assert!(map.contains(keys[0]));
        assert!(!map.contains(keys[1]));
        assert!(map.contains(keys[4]));
        assert_eq!(map.get(keys[2]), Some(&2));
    }

    #[test]
    #[should_panic]
    fn demanding_missing_value_panics() {
        let map = SlotMap::<f32>::new();
        map.value(SlotKey::zeroed());
    }
}
