//! Per-instance change tracking between flushes.

use crate::{delta::DeltaRange, id_index_map::InstanceID};
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use impact_containers::BitVector;

bitflags! {
    /// What has happened to an instance index since the last flush.
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Zeroable, Pod)]
    pub struct InstanceChangeFlags: u8 {
        const ADDED                 = 1 << 0;
        const INDEX_CHANGED         = 1 << 1;
        const TRANSFORM_CHANGED     = 1 << 2;
        const CUSTOM_DATA_CHANGED   = 1 << 3;
        const SKINNING_DATA_CHANGED = 1 << 4;
        const EDITOR_DATA_CHANGED   = 1 << 5;
    }
}

/// Records which instance indices became dirty for which attribute since the
/// last reset, together with the IDs of removed instances.
///
/// Only change flags are stored, never attribute values. Flags follow their
/// instance when it changes index, and every index whose occupant changed
/// gets [`InstanceChangeFlags::INDEX_CHANGED`], so the tracker knows the new
/// position of every instance that existed at the last reset.
#[derive(Clone, Debug, Default)]
pub struct InstanceAttributeTracker {
    flags: Vec<InstanceChangeFlags>,
    removed_ids: Vec<InstanceID>,
}

impl InstanceAttributeTracker {
    /// Creates a new tracker with no changes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets all recorded changes.
    pub fn reset(&mut self) {
        self.flags.clear();
        self.removed_ids.clear();
    }

    /// Whether any change has been recorded since the last reset.
    pub fn has_any_changes(&self) -> bool {
        !self.removed_ids.is_empty() || self.flags.iter().any(|flags| !flags.is_empty())
    }

    /// Returns the IDs of the instances removed since the last reset, in
    /// removal order.
    pub fn removed_ids(&self) -> &[InstanceID] {
        &self.removed_ids
    }

    /// Returns the change flags recorded for the given index.
    pub fn flags_at(&self, index: usize) -> InstanceChangeFlags {
        self.flags.get(index).copied().unwrap_or_default()
    }

    /// Adds the given flag to the instance at the given index.
    pub fn mark_index(&mut self, flag: InstanceChangeFlags, index: usize, num_instances: usize) {
        debug_assert!(index < num_instances);
        self.grow_to(num_instances);
        self.flags[index] |= flag;
    }

    /// Records the addition of an instance at the given index. Every instance
    /// at or after the index moves up by one and is marked as having changed
    /// index. `num_instances` is the count including the new instance.
    pub fn add(&mut self, index: usize, num_instances: usize) {
        debug_assert!(index < num_instances);
        self.grow_to(num_instances - 1);
        self.flags.insert(index, InstanceChangeFlags::ADDED);
        for flags in &mut self.flags[index + 1..] {
            *flags |= InstanceChangeFlags::INDEX_CHANGED;
        }
    }

    /// Records a swap removal of the instance with the given ID at the given
    /// index. `num_instances` is the count before the removal.
    pub fn remove_at_swap(&mut self, id: InstanceID, index: usize, num_instances: usize) {
        debug_assert!(index < num_instances);
        self.grow_to(num_instances);
        let last_index = num_instances - 1;
        if index != last_index {
            self.flags[index] = self.flags[last_index] | InstanceChangeFlags::INDEX_CHANGED;
        }
        self.flags.truncate(last_index);
        self.removed_ids.push(id);
    }

    /// Records an ordered removal of the instance with the given ID at the
    /// given index. `num_instances` is the count before the removal.
    pub fn remove_at(&mut self, id: InstanceID, index: usize, num_instances: usize) {
        debug_assert!(index < num_instances);
        self.grow_to(num_instances);
        self.flags.remove(index);
        for flags in &mut self.flags[index..] {
            *flags |= InstanceChangeFlags::INDEX_CHANGED;
        }
        self.removed_ids.push(id);
    }

    /// Returns the range of instances carrying any of the given flags, or
    /// every instance if `force_full` is set.
    pub fn delta_range(
        &self,
        mask: InstanceChangeFlags,
        force_full: bool,
        num_instances: usize,
    ) -> DeltaRange {
        if force_full {
            return DeltaRange::full(num_instances);
        }
        let bits: BitVector = (0..num_instances)
            .map(|index| self.flags_at(index).intersects(mask))
            .collect();
        DeltaRange::from_bits(bits)
    }

    fn grow_to(&mut self, num_instances: usize) {
        if self.flags.len() < num_instances {
            self.flags
                .resize(num_instances, InstanceChangeFlags::empty());
        }
    }
}
