//! Deduplicated animation bank playback records.
//!
//! Instances of skinned meshes refer to animation playback through an
//! [`AnimBankDesc`]. Instances with identical descriptors share one
//! reference counted [`AnimBankRecord`] holding the decoded sequence.
//!
//! The [`AnimBankRecordMap`] has a single logical owner and does no internal
//! locking. Callers on several threads must serialize access themselves.

use crate::{config::InstanceDataConfig, geometry::AxisAlignedBox};
use bytemuck::{Pod, Zeroable};
use impact_containers::{HashMap, SlotKey, SlotMap};
use impact_math::Hash64;
use nalgebra::Matrix4;
use std::sync::{Arc, Weak};

/// A decoded animation sequence: the transform of every bone at every frame,
/// together with the bounds of the animated mesh over the whole sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct AnimSequence {
    num_bones: usize,
    frame_rate: f32,
    bone_transforms: Vec<Matrix4<f32>>,
    sampled_bounds: AxisAlignedBox,
}

/// A bank of animation sequences.
#[derive(Clone, Debug, Default)]
pub struct AnimBankAsset {
    pub sequences: Vec<Arc<AnimSequence>>,
}

/// The skinned mesh animated by an animation bank.
#[derive(Clone, Debug)]
pub struct SkinnedAsset {
    pub num_bones: usize,
    pub mesh_bounds: AxisAlignedBox,
}

/// Animation playback parameters for an instance. Assets are referenced
/// weakly, so a descriptor never keeps an asset alive.
#[derive(Clone, Debug)]
pub struct AnimBankDesc {
    pub bank: Weak<AnimBankAsset>,
    pub sequence_index: u32,
    pub skinned_asset: Weak<SkinnedAsset>,
    /// Playback start time in seconds.
    pub position: f32,
    pub play_rate: f32,
    pub looping: bool,
    pub auto_start: bool,
}

/// Shared playback data for every instance registered with an identical
/// [`AnimBankDesc`].
#[derive(Clone, Debug)]
pub struct AnimBankRecord {
    desc: AnimBankDesc,
    sequence: Arc<AnimSequence>,
    is_ref_pose: bool,
    reference_count: u32,
}

/// Handle to a record in an [`AnimBankRecordMap`].
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Zeroable, Pod)]
pub struct AnimBankRecordHandle(SlotKey);

/// Table of [`AnimBankRecord`]s keyed by the content of their descriptors.
///
/// Records whose reference count drops to zero stay cached, and are revived
/// if the same descriptor is registered again, until
/// [`Self::collect_garbage`] evicts them.
#[derive(Debug)]
pub struct AnimBankRecordMap {
    records: SlotMap<AnimBankRecord>,
    buckets: HashMap<Hash64, Vec<AnimBankRecordHandle>>,
    force_ref_pose: bool,
    use_sampled_bounds: bool,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Zeroable, Pod)]
struct AnimBankKeyBytes {
    bank: u64,
    skinned_asset: u64,
    sequence_index: u32,
    position_bits: u32,
    play_rate_bits: u32,
    playback_flags: u32,
}

impl AnimSequence {
    /// Creates a sequence from per-frame bone transforms, stored frame by
    /// frame.
    ///
    /// # Panics
    /// If the number of transforms is not a multiple of the bone count.
    pub fn new(
        num_bones: usize,
        frame_rate: f32,
        bone_transforms: Vec<Matrix4<f32>>,
        sampled_bounds: AxisAlignedBox,
    ) -> Self {
        assert!(
            (num_bones == 0 && bone_transforms.is_empty())
                || (num_bones > 0 && bone_transforms.len() % num_bones == 0),
            "Bone transform count must be a multiple of the bone count"
        );
        Self {
            num_bones,
            frame_rate,
            bone_transforms,
            sampled_bounds,
        }
    }

    /// Creates a single-frame sequence with every bone in its reference
    /// pose.
    pub fn reference_pose(num_bones: usize, mesh_bounds: AxisAlignedBox) -> Self {
        Self::new(
            num_bones,
            1.0,
            vec![Matrix4::identity(); num_bones],
            mesh_bounds,
        )
    }

    pub fn num_bones(&self) -> usize {
        self.num_bones
    }

    /// Returns the number of frames, which is at least one.
    pub fn num_frames(&self) -> usize {
        self.bone_transforms
            .len()
            .checked_div(self.num_bones)
            .unwrap_or(0)
            .max(1)
    }

    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }

    /// Returns the playback duration in seconds.
    pub fn duration(&self) -> f32 {
        if self.frame_rate > 0.0 {
            self.num_frames() as f32 / self.frame_rate
        } else {
            0.0
        }
    }

    pub fn sampled_bounds(&self) -> &AxisAlignedBox {
        &self.sampled_bounds
    }

    /// Returns the transform of every bone at the given frame.
    ///
    /// # Panics
    /// If the frame is out of range.
    pub fn frame(&self, frame: usize) -> &[Matrix4<f32>] {
        &self.bone_transforms[frame * self.num_bones..(frame + 1) * self.num_bones]
    }
}

impl AnimBankDesc {
    /// Creates a descriptor for the reference pose of the given skinned
    /// asset.
    pub fn reference_pose(skinned_asset: Weak<SkinnedAsset>) -> Self {
        Self {
            skinned_asset,
            ..Self::default()
        }
    }

    /// Whether every field of the two descriptors is equal. Assets are
    /// compared by identity and floats by bit pattern.
    pub fn matches(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.bank, &other.bank)
            && Weak::ptr_eq(&self.skinned_asset, &other.skinned_asset)
            && self.sequence_index == other.sequence_index
            && self.position.to_bits() == other.position.to_bits()
            && self.play_rate.to_bits() == other.play_rate.to_bits()
            && self.looping == other.looping
            && self.auto_start == other.auto_start
    }

    /// Computes a hash of the raw bytes of every field.
    pub fn compute_hash(&self) -> Hash64 {
        let key = AnimBankKeyBytes {
            bank: self.bank.as_ptr() as *const () as usize as u64,
            skinned_asset: self.skinned_asset.as_ptr() as *const () as usize as u64,
            sequence_index: self.sequence_index,
            position_bits: self.position.to_bits(),
            play_rate_bits: self.play_rate.to_bits(),
            playback_flags: u32::from(self.looping) | (u32::from(self.auto_start) << 1),
        };
        impact_math::compute_hash_64_of_pod(&key)
    }
}

impl Default for AnimBankDesc {
    fn default() -> Self {
        Self {
            bank: Weak::new(),
            sequence_index: 0,
            skinned_asset: Weak::new(),
            position: 0.0,
            play_rate: 1.0,
            looping: false,
            auto_start: false,
        }
    }
}

impl AnimBankRecord {
    pub fn desc(&self) -> &AnimBankDesc {
        &self.desc
    }

    pub fn sequence(&self) -> &Arc<AnimSequence> {
        &self.sequence
    }

    /// Whether the record plays the reference pose rather than a sequence
    /// from a bank.
    pub fn is_ref_pose(&self) -> bool {
        self.is_ref_pose
    }

    pub fn reference_count(&self) -> u32 {
        self.reference_count
    }

    /// Returns the frame to display the given number of seconds after
    /// playback was started. Looping playback wraps around, other playback
    /// holds the first or last frame outside the sequence. Playback that is
    /// not started automatically stays at the start position.
    pub fn frame_at_time(&self, time: f32) -> usize {
        let num_frames = self.sequence.num_frames();
        let duration = self.sequence.duration();
        if duration <= 0.0 {
            return 0;
        }

        let elapsed = if self.desc.auto_start {
            time * self.desc.play_rate
        } else {
            0.0
        };
        let playback_time = self.desc.position + elapsed;

        let playback_time = if self.desc.looping {
            playback_time.rem_euclid(duration)
        } else {
            playback_time.clamp(0.0, duration)
        };

        ((playback_time * self.sequence.frame_rate()).floor() as usize).min(num_frames - 1)
    }

    /// Returns the local bounds of instances playing this record: the bounds
    /// sampled over the sequence if `use_sampled_bounds` is set and the
    /// record plays a sequence, and the given mesh bounds otherwise.
    pub fn bounds(&self, use_sampled_bounds: bool, mesh_bounds: &AxisAlignedBox) -> AxisAlignedBox {
        if use_sampled_bounds && !self.is_ref_pose {
            *self.sequence.sampled_bounds()
        } else {
            *mesh_bounds
        }
    }

    fn matches_live(&self, desc: &AnimBankDesc) -> bool {
        (self.is_ref_pose || self.desc.bank.strong_count() > 0) && self.desc.matches(desc)
    }
}

impl AnimBankRecordMap {
    /// Creates an empty map using the animation settings of the given
    /// configuration.
    pub fn new(config: &InstanceDataConfig) -> Self {
        Self {
            records: SlotMap::new(),
            buckets: HashMap::default(),
            force_ref_pose: config.force_ref_pose,
            use_sampled_bounds: config.use_sampled_bounds,
        }
    }

    /// Returns the number of cached records, including unreferenced ones.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the record for the given handle, or [`None`] if it has been
    /// evicted.
    pub fn record(&self, handle: AnimBankRecordHandle) -> Option<&AnimBankRecord> {
        self.records.get(handle.0)
    }

    /// Returns the reference count of the record for the given handle, or
    /// [`None`] if it has been evicted.
    pub fn reference_count(&self, handle: AnimBankRecordHandle) -> Option<u32> {
        self.record(handle).map(AnimBankRecord::reference_count)
    }

    /// Registers an instance with the given playback descriptor and returns
    /// the handle of the shared record for it.
    ///
    /// If a live record with an equal descriptor exists, its reference count
    /// is incremented. Otherwise a new record is created. Descriptors
    /// referring to a missing bank or sequence resolve to the reference pose,
    /// as do all descriptors if the reference pose is forced.
    pub fn register(&mut self, desc: AnimBankDesc) -> AnimBankRecordHandle {
        let (desc, sequence) = self.resolve(desc);
        let hash = desc.compute_hash();

        let existing = self.buckets.get(&hash).and_then(|handles| {
            handles.iter().copied().find(|handle| {
                self.records
                    .get(handle.0)
                    .is_some_and(|record| record.matches_live(&desc))
            })
        });

        if let Some(handle) = existing {
            self.records.value_mut(handle.0).reference_count += 1;
            return handle;
        }

        let is_ref_pose = sequence.is_none();
        let sequence = sequence.unwrap_or_else(|| {
            let (num_bones, mesh_bounds) = desc
                .skinned_asset
                .upgrade()
                .map_or((0, AxisAlignedBox::default()), |asset| {
                    (asset.num_bones, asset.mesh_bounds)
                });
            Arc::new(AnimSequence::reference_pose(num_bones, mesh_bounds))
        });

        impact_log::debug!(
            "Creating animation bank record for sequence {} ({})",
            desc.sequence_index,
            hash
        );

        let handle = AnimBankRecordHandle(self.records.insert(AnimBankRecord {
            desc,
            sequence,
            is_ref_pose,
            reference_count: 1,
        }));
        self.buckets.entry(hash).or_default().push(handle);
        handle
    }

    /// Unregisters an instance from the record for the given handle and
    /// returns the remaining reference count. A record reaching zero
    /// references stays cached until [`Self::collect_garbage`].
    ///
    /// Returns [`None`] if the record has been evicted.
    pub fn unregister(&mut self, handle: AnimBankRecordHandle) -> Option<u32> {
        let record = self.records.get_mut(handle.0)?;
        if record.reference_count == 0 {
            impact_log::warn!("Tried to unregister from unreferenced animation bank record");
        }
        record.reference_count = record.reference_count.saturating_sub(1);
        Some(record.reference_count)
    }

    /// Returns the bounds of instances playing the record for the given
    /// handle, or the mesh bounds if the record has been evicted.
    pub fn bounds(
        &self,
        handle: AnimBankRecordHandle,
        mesh_bounds: &AxisAlignedBox,
    ) -> AxisAlignedBox {
        self.record(handle).map_or(*mesh_bounds, |record| {
            record.bounds(self.use_sampled_bounds, mesh_bounds)
        })
    }

    /// Evicts every record without references and returns how many were
    /// evicted.
    pub fn collect_garbage(&mut self) -> usize {
        let num_records = self.records.len();
        self.records.retain(|_, record| record.reference_count > 0);
        let records = &self.records;
        self.buckets.retain(|_, handles| {
            handles.retain(|handle| records.contains(handle.0));
            !handles.is_empty()
        });
        let num_evicted = num_records - self.records.len();
        if num_evicted > 0 {
            impact_log::debug!("Evicted {num_evicted} animation bank records");
        }
        num_evicted
    }

    fn resolve(&self, desc: AnimBankDesc) -> (AnimBankDesc, Option<Arc<AnimSequence>>) {
        if self.force_ref_pose {
            return (AnimBankDesc::reference_pose(desc.skinned_asset), None);
        }
        let Some(bank) = desc.bank.upgrade() else {
            impact_log::warn!("Animation bank is no longer available, using reference pose");
            return (AnimBankDesc::reference_pose(desc.skinned_asset), None);
        };
        match bank.sequences.get(desc.sequence_index as usize) {
            Some(sequence) => {
                let sequence = Arc::clone(sequence);
                (desc, Some(sequence))
            }
            None => {
                impact_log::warn!(
                    "Animation bank has no sequence {}, using reference pose",
                    desc.sequence_index
                );
                (AnimBankDesc::reference_pose(desc.skinned_asset), None)
            }
        }
    }
}
