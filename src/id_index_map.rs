//! Bidirectional mapping between stable instance IDs and dense instance
//! indices.

use bytemuck::{Pod, Zeroable};
use impact_containers::BitVector;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier for an instance. Unlike the instance's index, the ID does
/// not change when other instances are added, removed or reordered.
#[repr(transparent)]
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Zeroable, Pod, Serialize, Deserialize,
)]
pub struct InstanceID(u32);

/// Map for keeping track of which [`InstanceID`] corresponds to which index in
/// a dense array of instances.
///
/// As long as instances are only ever appended and removed from the end, the
/// ID of every instance equals its index, and the map stores nothing but the
/// instance count ("identity mode"). The first insertion or removal anywhere
/// else materializes explicit index-to-ID and ID-to-index tables, and the map
/// stays explicit until [`Self::reset`] is called.
///
/// Indices passed to the map must be in range. Violations are programming
/// errors and cause a panic.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstanceIDIndexMap {
    num_instances: usize,
    explicit: Option<ExplicitMapping>,
}

/// The index and ID of an instance whose index-to-ID entry has changed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IndexAssignment {
    pub index: u32,
    pub id: InstanceID,
    /// Whether the instance was added since the mapping was last synchronized,
    /// as opposed to only having changed index.
    pub is_new: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
struct ExplicitMapping {
    index_to_id: Vec<InstanceID>,
    id_to_index: Vec<u32>,
    valid_ids: BitVector,
}

const INVALID_INDEX: u32 = u32::MAX;

impl InstanceID {
    /// Creates an ID from the given integer.
    pub const fn from_u32(id: u32) -> Self {
        Self(id)
    }

    /// Returns the ID as an integer.
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    fn idx(self) -> usize {
        self.0 as usize
    }

    fn from_idx(idx: usize) -> Self {
        Self(u32::try_from(idx).expect("Instance ID space exceeded u32::MAX"))
    }
}

impl fmt::Display for InstanceID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl InstanceIDIndexMap {
    /// Creates a new empty map in identity mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new map in identity mode with the given number of instances.
    pub fn new_identity(num_instances: usize) -> Self {
        Self {
            num_instances,
            explicit: None,
        }
    }

    /// Rebuilds a map from its index-to-ID table. An empty table means an
    /// identity mapping of `num_instances` instances. The ID space is sized to
    /// at least `max_instance_id`.
    ///
    /// # Panics
    /// - If a non-empty table does not have `num_instances` entries.
    /// - If the table contains the same ID twice.
    pub fn from_index_to_id(
        index_to_id: Vec<InstanceID>,
        num_instances: usize,
        max_instance_id: usize,
    ) -> Self {
        if index_to_id.is_empty() {
            return Self::new_identity(num_instances);
        }
        assert_eq!(
            index_to_id.len(),
            num_instances,
            "Index-to-ID table length does not match instance count"
        );

        let id_space = index_to_id
            .iter()
            .map(|id| id.idx() + 1)
            .max()
            .unwrap_or(0)
            .max(max_instance_id);

        let mut explicit = ExplicitMapping {
            index_to_id,
            id_to_index: vec![INVALID_INDEX; id_space],
            valid_ids: BitVector::zeroed(id_space),
        };
        for (index, id) in explicit.index_to_id.iter().enumerate() {
            assert!(
                !explicit.valid_ids.set_bit(id.idx()),
                "Duplicate instance ID {id} in index-to-ID table"
            );
            explicit.id_to_index[id.idx()] = index as u32;
        }

        Self {
            num_instances,
            explicit: Some(explicit),
        }
    }

    /// Discards all mappings and returns to identity mode with the given
    /// number of instances.
    pub fn reset(&mut self, num_instances: usize) {
        self.num_instances = num_instances;
        self.explicit = None;
    }

    /// Whether every instance ID equals its index.
    pub fn is_identity(&self) -> bool {
        self.explicit.is_none()
    }

    /// Returns the number of instances, which is one past the largest valid
    /// instance index.
    pub fn max_instance_index(&self) -> usize {
        self.num_instances
    }

    /// Returns the size of the ID space, which is one past the largest ID that
    /// has been allocated.
    pub fn max_instance_id(&self) -> usize {
        match &self.explicit {
            Some(explicit) => explicit.id_to_index.len(),
            None => self.num_instances,
        }
    }

    /// Whether the given ID belongs to a live instance.
    pub fn is_valid_id(&self, id: InstanceID) -> bool {
        match &self.explicit {
            Some(explicit) => {
                id.idx() < explicit.valid_ids.len() && explicit.valid_ids.bit_is_set(id.idx())
            }
            None => id.idx() < self.num_instances,
        }
    }

    /// Returns the index of the instance with the given ID.
    ///
    /// # Panics
    /// If the ID is not valid.
    pub fn id_to_index(&self, id: InstanceID) -> usize {
        self.try_id_to_index(id)
            .unwrap_or_else(|| panic!("Tried to look up index of invalid instance ID {id}"))
    }

    /// Returns the index of the instance with the given ID, or [`None`] if the
    /// ID is not valid.
    pub fn try_id_to_index(&self, id: InstanceID) -> Option<usize> {
        if !self.is_valid_id(id) {
            return None;
        }
        Some(match &self.explicit {
            Some(explicit) => explicit.id_to_index[id.idx()] as usize,
            None => id.idx(),
        })
    }

    /// Returns the ID of the instance at the given index.
    ///
    /// # Panics
    /// If the index is out of range.
    pub fn index_to_id(&self, index: usize) -> InstanceID {
        assert!(
            index < self.num_instances,
            "Instance index {index} out of range for {} instances",
            self.num_instances
        );
        match &self.explicit {
            Some(explicit) => explicit.index_to_id[index],
            None => InstanceID::from_idx(index),
        }
    }

    /// Returns the index-to-ID table, which is empty in identity mode.
    pub fn index_to_id_table(&self) -> &[InstanceID] {
        self.explicit
            .as_ref()
            .map_or(&[], |explicit| &explicit.index_to_id)
    }

    /// Materializes explicit tables for the current identity mapping.
    ///
    /// # Panics
    /// If the map is not in identity mode.
    pub fn create_explicit_identity_mapping(&mut self) {
        assert!(
            self.is_identity(),
            "Tried to create explicit identity mapping for explicit map"
        );
        let n = self.num_instances;
        self.explicit = Some(ExplicitMapping {
            index_to_id: (0..n).map(InstanceID::from_idx).collect(),
            id_to_index: (0..n as u32).collect(),
            valid_ids: BitVector::filled(n),
        });
    }

    /// Adds an instance at the given index, shifting the instances at and
    /// after that index up by one, and returns the ID of the new instance.
    ///
    /// The lowest free ID is allocated. Appending to an identity map keeps it
    /// in identity mode.
    ///
    /// # Panics
    /// If `at_index` is larger than the number of instances.
    pub fn add(&mut self, at_index: usize) -> InstanceID {
        assert!(
            at_index <= self.num_instances,
            "Tried to add instance at index {at_index} beyond end ({})",
            self.num_instances
        );

        if self.is_identity() {
            if at_index == self.num_instances {
                self.num_instances += 1;
                return InstanceID::from_idx(at_index);
            }
            self.create_explicit_identity_mapping();
        }

        let explicit = self.explicit_mut();
        let id = explicit.allocate_id();
        explicit.index_to_id.insert(at_index, id);
        explicit.reassign_indices_from(at_index);

        self.num_instances += 1;
        id
    }

    /// Removes the instance at the given index by moving the last instance
    /// into its place, and returns the ID of the removed instance. Only the
    /// moved instance changes index.
    ///
    /// # Panics
    /// If the index is out of range.
    pub fn remove_at_swap(&mut self, index: usize) -> InstanceID {
        let id = self.index_to_id(index);
        let last_index = self.num_instances - 1;

        if self.is_identity() {
            if index == last_index {
                self.num_instances -= 1;
                return id;
            }
            self.create_explicit_identity_mapping();
        }

        let explicit = self.explicit_mut();
        explicit.index_to_id.swap_remove(index);
        explicit.free_id(id);
        if index < last_index {
            let moved_id = explicit.index_to_id[index];
            explicit.id_to_index[moved_id.idx()] = index as u32;
        }

        self.num_instances -= 1;
        id
    }

    /// Removes the instance at the given index, shifting every following
    /// instance down by one, and returns the ID of the removed instance.
    ///
    /// # Panics
    /// If the index is out of range.
    pub fn remove_at(&mut self, index: usize) -> InstanceID {
        let id = self.index_to_id(index);

        if self.is_identity() {
            if index == self.num_instances - 1 {
                self.num_instances -= 1;
                return id;
            }
            self.create_explicit_identity_mapping();
        }

        let explicit = self.explicit_mut();
        explicit.index_to_id.remove(index);
        explicit.free_id(id);
        explicit.reassign_indices_from(index);

        self.num_instances -= 1;
        id
    }

    /// Reorders the instances so that the instance at new index `i` is the one
    /// that was at index `new_to_old[i]`. IDs follow their instances, so the
    /// map becomes explicit.
    ///
    /// # Panics
    /// If `new_to_old` is not a permutation of the current indices.
    pub fn reorder(&mut self, new_to_old: &[u32]) {
        assert_eq!(
            new_to_old.len(),
            self.num_instances,
            "Reorder table length does not match instance count"
        );
        if self.is_identity() {
            self.create_explicit_identity_mapping();
        }
        let explicit = self.explicit_mut();
        let reordered: Vec<_> = new_to_old
            .iter()
            .map(|&old_index| explicit.index_to_id[old_index as usize])
            .collect();
        explicit.index_to_id = reordered;
        explicit.reassign_indices_from(0);
        debug_assert!(explicit.is_consistent());
    }

    /// Brings the map up to date with another map that has been modified
    /// since the two were last equal, given the IDs removed from it and the
    /// new index of every instance whose index-to-ID entry changed.
    pub fn apply_delta(
        &mut self,
        num_instances: usize,
        removed_ids: &[InstanceID],
        assignments: &[IndexAssignment],
    ) {
        if self.is_identity() {
            self.create_explicit_identity_mapping();
        }
        let explicit = self.explicit_mut();

        for &id in removed_ids {
            if id.idx() < explicit.valid_ids.len() && explicit.valid_ids.unset_bit(id.idx()) {
                explicit.id_to_index[id.idx()] = INVALID_INDEX;
            }
        }

        explicit
            .index_to_id
            .resize(num_instances, InstanceID(u32::MAX));

        for assignment in assignments {
            let id_idx = assignment.id.idx();
            if id_idx >= explicit.id_to_index.len() {
                explicit.id_to_index.resize(id_idx + 1, INVALID_INDEX);
                explicit.valid_ids.resize(id_idx + 1);
            }
            explicit.index_to_id[assignment.index as usize] = assignment.id;
            explicit.id_to_index[id_idx] = assignment.index;
            explicit.valid_ids.set_bit(id_idx);
        }

        self.num_instances = num_instances;
        debug_assert!(
            self.explicit
                .as_ref()
                .is_none_or(ExplicitMapping::is_consistent)
        );
    }

    fn explicit_mut(&mut self) -> &mut ExplicitMapping {
        self.explicit
            .as_mut()
            .expect("Instance ID map should be explicit")
    }
}

impl ExplicitMapping {
    fn allocate_id(&mut self) -> InstanceID {
        let idx = self.valid_ids.first_unset_bit().unwrap_or_else(|| {
            let idx = self.valid_ids.len();
            self.valid_ids.push(false);
            self.id_to_index.push(INVALID_INDEX);
            idx
        });
        self.valid_ids.set_bit(idx);
        InstanceID::from_idx(idx)
    }

    fn free_id(&mut self, id: InstanceID) {
        self.valid_ids.unset_bit(id.idx());
        self.id_to_index[id.idx()] = INVALID_INDEX;
    }

    fn reassign_indices_from(&mut self, start_index: usize) {
        for (index, id) in self.index_to_id.iter().enumerate().skip(start_index) {
            self.id_to_index[id.idx()] = index as u32;
        }
    }

    fn is_consistent(&self) -> bool {
        self.index_to_id.iter().enumerate().all(|(index, id)| {
            self.valid_ids.bit_is_set(id.idx()) && self.id_to_index[id.idx()] as usize == index
        }) && self.valid_ids.count_set_bits() == self.index_to_id.len()
    }
}
