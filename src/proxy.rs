//! Consumer-side representation of a primitive's instance data.

use crate::{
    change_set::{IdMapUpdate, InstanceUpdateChangeSet},
    delta::DeltaRange,
    flags::InstanceDataFlags,
    geometry::AxisAlignedBox,
    id_index_map::{IndexAssignment, InstanceIDIndexMap},
    persist::PrecomputedInstanceData,
    remap::{self, IndexRemap},
    scatter_gather, transform,
};
use impact_containers::BitVector;
use impact_thread::TaskHandle;
use nalgebra::{Matrix4, Vector4};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// The dense per-instance arrays of a primitive as seen by consumers, kept up
/// to date by applying change sets.
///
/// The proxy is shared between the manager that feeds it and the consumers
/// reading it, and outlives the source if an update is still in flight. At
/// most one build or update runs at a time, and consumers wait for it to
/// complete before reading.
#[derive(Debug, Default)]
pub struct InstanceDataSceneProxy {
    data: RwLock<InstanceSceneData>,
    update_task: Mutex<Option<TaskHandle>>,
    attached: AtomicBool,
    num_builds: AtomicUsize,
    num_updates: AtomicUsize,
}

/// The instance data held by an [`InstanceDataSceneProxy`].
///
/// Transforms are stored composed with the primitive-to-world transform.
/// Arrays for attributes that are not present are empty.
#[derive(Clone, Debug, Default)]
pub struct InstanceSceneData {
    num_instances: usize,
    flags: InstanceDataFlags,
    num_custom_data_floats: usize,
    primitive_to_world: Matrix4<f32>,
    mesh_bounds: AxisAlignedBox,
    max_displacement: f32,
    id_map: InstanceIDIndexMap,
    precomputed: Option<Arc<PrecomputedInstanceData>>,
    transforms: Vec<Matrix4<f32>>,
    custom_data: Vec<f32>,
    random_ids: Vec<f32>,
    light_shadow_uv_biases: Vec<Vector4<f32>>,
    local_bounds: Vec<AxisAlignedBox>,
    skinning_data: Vec<u32>,
    editor_data: Vec<u32>,
}

/// Exclusive access to the update slot of a proxy, obtained once any previous
/// update has completed. The slot is released when the handle of the next
/// update is stored in it.
#[derive(Debug)]
pub struct UpdateSlot<'a> {
    task: MutexGuard<'a, Option<TaskHandle>>,
}

impl InstanceDataSceneProxy {
    /// Creates a new proxy with no instances.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the proxy as visible to consumers, after which updates may run
    /// asynchronously.
    pub fn mark_attached(&self) {
        self.attached.store(true, Ordering::Release);
    }

    /// Whether the proxy is visible to consumers.
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Returns the number of full builds applied so far.
    pub fn num_builds(&self) -> usize {
        self.num_builds.load(Ordering::Acquire)
    }

    /// Returns the number of incremental updates applied so far.
    pub fn num_updates(&self) -> usize {
        self.num_updates.load(Ordering::Acquire)
    }

    /// Waits for any in-flight update to complete and acquires the update
    /// slot.
    pub fn begin_update(&self) -> UpdateSlot<'_> {
        let task = self.update_task.lock();
        if let Some(handle) = task.as_ref() {
            handle.wait();
        }
        UpdateSlot { task }
    }

    /// Blocks until the most recently dispatched update has completed.
    pub fn wait_for_update_completion(&self) {
        let handle = self.update_task.lock().clone();
        if let Some(handle) = handle {
            handle.wait();
        }
    }

    /// Waits for any in-flight update and returns read access to the
    /// completed instance data.
    ///
    /// Any number of readers may hold the returned guard at once, but builds
    /// and updates need exclusive access. The guard must therefore be dropped
    /// before flushing changes on the same thread, since an inline update
    /// would otherwise deadlock.
    pub fn scene_data(&self) -> RwLockReadGuard<'_, InstanceSceneData> {
        self.wait_for_update_completion();
        self.data.read()
    }

    /// Applies the given change set as a build if it is full and as an
    /// update otherwise.
    pub fn apply_change_set(&self, change_set: InstanceUpdateChangeSet) {
        if change_set.is_full() {
            self.build(change_set);
        } else {
            self.update(change_set);
        }
    }

    /// Replaces all instance data with the data in the given full change set.
    ///
    /// If precomputed data with a reorder table is attached, the instances
    /// are stored in the baked order.
    pub fn build(&self, change_set: InstanceUpdateChangeSet) {
        let num_instances = change_set.num_instances;
        impact_log::with_trace_logging!(
            "Building proxy for {} instances", num_instances;
            self.data.write().build(change_set)
        );
        self.num_builds.fetch_add(1, Ordering::AcqRel);
    }

    /// Applies the incremental changes in the given change set.
    pub fn update(&self, change_set: InstanceUpdateChangeSet) {
        let num_instances = change_set.num_instances;
        impact_log::with_trace_logging!(
            "Updating proxy for {} instances", num_instances;
            self.data.write().update(change_set)
        );
        self.num_updates.fetch_add(1, Ordering::AcqRel);
    }

    /// Computes the world space box bounding every instance, or [`None`] if
    /// there are no instances.
    pub fn compute_bounds(&self) -> Option<AxisAlignedBox> {
        self.scene_data().compute_bounds()
    }
}

impl UpdateSlot<'_> {
    /// Stores the handle of the newly dispatched update, releasing the slot.
    pub fn set(mut self, handle: TaskHandle) {
        *self.task = Some(handle);
    }
}

impl InstanceSceneData {
    pub fn num_instances(&self) -> usize {
        self.num_instances
    }

    pub fn flags(&self) -> InstanceDataFlags {
        self.flags
    }

    pub fn num_custom_data_floats(&self) -> usize {
        self.num_custom_data_floats
    }

    pub fn primitive_to_world(&self) -> &Matrix4<f32> {
        &self.primitive_to_world
    }

    pub fn mesh_bounds(&self) -> &AxisAlignedBox {
        &self.mesh_bounds
    }

    pub fn max_displacement(&self) -> f32 {
        self.max_displacement
    }

    /// Returns the proxy's copy of the ID map, which refers to the proxy's own
    /// instance order.
    pub fn id_map(&self) -> &InstanceIDIndexMap {
        &self.id_map
    }

    pub fn precomputed(&self) -> Option<&PrecomputedInstanceData> {
        self.precomputed.as_deref()
    }

    pub fn instance_to_world_transforms(&self) -> &[Matrix4<f32>] {
        &self.transforms
    }

    pub fn custom_data(&self) -> &[f32] {
        &self.custom_data
    }

    pub fn random_ids(&self) -> &[f32] {
        &self.random_ids
    }

    pub fn light_shadow_uv_biases(&self) -> &[Vector4<f32>] {
        &self.light_shadow_uv_biases
    }

    pub fn local_bounds(&self) -> &[AxisAlignedBox] {
        &self.local_bounds
    }

    pub fn skinning_data(&self) -> &[u32] {
        &self.skinning_data
    }

    pub fn editor_data(&self) -> &[u32] {
        &self.editor_data
    }

    /// Computes the world space box bounding every instance, using the
    /// per-instance local bounds if present and the mesh bounds otherwise,
    /// expanded by the maximum displacement.
    pub fn compute_bounds(&self) -> Option<AxisAlignedBox> {
        self.transforms
            .iter()
            .enumerate()
            .map(|(index, transform)| {
                let local_bounds = self
                    .local_bounds
                    .get(index)
                    .unwrap_or(&self.mesh_bounds)
                    .expanded(self.max_displacement);
                local_bounds.aabb_of_transformed(transform)
            })
            .reduce(|bounds, instance_bounds| {
                AxisAlignedBox::aabb_from_pair(&bounds, &instance_bounds)
            })
    }

    fn apply_header(&mut self, change_set: &InstanceUpdateChangeSet) {
        self.num_instances = change_set.num_instances;
        self.flags = change_set.flags;
        self.num_custom_data_floats = change_set.num_custom_data_floats;
        self.primitive_to_world = change_set.primitive_to_world;
        self.mesh_bounds = change_set.mesh_bounds;
        self.max_displacement = change_set.max_displacement;
    }

    fn build(&mut self, mut change_set: InstanceUpdateChangeSet) {
        debug_assert!(change_set.is_full);
        self.apply_header(&change_set);
        let n = self.num_instances;

        self.id_map = match std::mem::replace(
            &mut change_set.id_map_update,
            IdMapUpdate::Identity { num_instances: 0 },
        ) {
            IdMapUpdate::Full(id_map) => id_map,
            IdMapUpdate::Identity { num_instances } => {
                InstanceIDIndexMap::new_identity(num_instances)
            }
            IdMapUpdate::Delta { .. } => {
                impact_log::warn!("Full change set carried an ID map delta, resetting ID map");
                InstanceIDIndexMap::new_identity(n)
            }
        };

        self.precomputed = change_set.precomputed.take();

        let source_to_dest = match self.precomputed.as_deref() {
            Some(precomputed) if precomputed.reorder_table.len() == n && n > 0 => {
                self.id_map.reorder(&precomputed.reorder_table);
                Some(remap::invert_permutation(&precomputed.reorder_table))
            }
            _ => None,
        };
        let remap = match &source_to_dest {
            Some(table) => IndexRemap::ReorderTable {
                table,
                num_dest: n,
            },
            None => IndexRemap::Identity,
        };

        self.write_attributes(change_set, &remap, true);
    }

    fn update(&mut self, mut change_set: InstanceUpdateChangeSet) {
        debug_assert!(!change_set.is_full);
        let num_instances = change_set.num_instances;

        match std::mem::replace(
            &mut change_set.id_map_update,
            IdMapUpdate::Identity { num_instances: 0 },
        ) {
            IdMapUpdate::Delta {
                num_instances,
                removed_ids,
                assignments,
            } => {
                self.relocate_moved_instances(num_instances, &assignments);
                self.id_map
                    .apply_delta(num_instances, &removed_ids, &assignments);
            }
            IdMapUpdate::Identity { num_instances } => {
                self.id_map.reset(num_instances);
            }
            IdMapUpdate::Full(id_map) => {
                self.id_map = id_map;
            }
        }

        self.apply_header(&change_set);
        self.resize_attributes(num_instances);
        self.write_attributes(change_set, &IndexRemap::Identity, false);
    }

    /// Moves the data of instances that only changed index from their old
    /// position, found through the current ID map, to their new one.
    fn relocate_moved_instances(&mut self, num_instances: usize, assignments: &[IndexAssignment]) {
        let old_num_instances = self.num_instances;
        let mut moved = BitVector::zeroed(old_num_instances);
        let mut old_to_new = vec![IndexRemap::DROPPED; old_num_instances];

        for assignment in assignments.iter().filter(|assignment| !assignment.is_new) {
            if let Some(old_index) = self.id_map.try_id_to_index(assignment.id) {
                moved.set_bit(old_index);
                old_to_new[old_index] = assignment.index;
            } else {
                impact_log::warn!(
                    "Moved instance {} is unknown to the proxy and keeps default data",
                    assignment.id
                );
            }
        }

        let delta = DeltaRange::from_bits(moved);
        let remap = IndexRemap::SrcIndex(&old_to_new);
        let stride = self.num_custom_data_floats;

        let n = num_instances;

        relocate(&mut self.transforms, &delta, &remap, n, 1, Matrix4::identity());
        relocate(&mut self.custom_data, &delta, &remap, n, stride, 0.0);
        relocate(&mut self.random_ids, &delta, &remap, n, 1, 0.0);
        relocate(&mut self.light_shadow_uv_biases, &delta, &remap, n, 1, Vector4::zeros());
        relocate(&mut self.local_bounds, &delta, &remap, n, 1, AxisAlignedBox::default());
        relocate(&mut self.skinning_data, &delta, &remap, n, 1, 0);
        relocate(&mut self.editor_data, &delta, &remap, n, 1, 0);
    }

    fn resize_attributes(&mut self, num_instances: usize) {
        let n = num_instances;
        let has = |flag| self.flags.contains(flag);
        let (custom_data, random, biases, local_bounds, skinning, editor) = (
            has(InstanceDataFlags::CUSTOM_DATA),
            has(InstanceDataFlags::RANDOM),
            has(InstanceDataFlags::LIGHT_SHADOW_UV_BIAS),
            has(InstanceDataFlags::LOCAL_BOUNDS),
            has(InstanceDataFlags::SKINNING_DATA),
            has(InstanceDataFlags::EDITOR_DATA),
        );
        let custom_len = n * self.num_custom_data_floats;

        self.transforms.resize(n, Matrix4::identity());
        resize_attribute(&mut self.custom_data, custom_data, custom_len, 0.0);
        resize_attribute(&mut self.random_ids, random, n, 0.0);
        resize_attribute(&mut self.light_shadow_uv_biases, biases, n, Vector4::zeros());
        resize_attribute(&mut self.local_bounds, local_bounds, n, AxisAlignedBox::default());
        resize_attribute(&mut self.skinning_data, skinning, n, 0);
        resize_attribute(&mut self.editor_data, editor, n, 0);
    }

    fn write_attributes(
        &mut self,
        change_set: InstanceUpdateChangeSet,
        remap: &IndexRemap<'_>,
        reset: bool,
    ) {
        let InstanceUpdateChangeSet {
            deltas,
            data,
            num_instances,
            ..
        } = change_set;

        if reset {
            self.transforms.clear();
            self.custom_data.clear();
            self.random_ids.clear();
            self.light_shadow_uv_biases.clear();
            self.local_bounds.clear();
            self.skinning_data.clear();
            self.editor_data.clear();
            self.resize_attributes(num_instances);
        }

        match data.transforms {
            Some(transforms) if transforms.len() == deltas.transforms.num_items() => {
                transform::scatter_transforms(
                    &deltas.transforms,
                    transforms,
                    &mut self.transforms,
                    remap,
                    &self.primitive_to_world,
                );
            }
            _ => warn_missing("transforms", &deltas.transforms),
        }

        // Disabled attributes have empty arrays and are skipped
        let stride = self.num_custom_data_floats;
        write_attribute(
            &mut self.custom_data,
            "custom data",
            &deltas.custom_data,
            data.custom_data,
            remap,
            stride,
        );
        write_attribute(
            &mut self.random_ids,
            "random IDs",
            &deltas.random_ids,
            data.random_ids,
            remap,
            1,
        );
        write_attribute(
            &mut self.light_shadow_uv_biases,
            "light/shadow UV biases",
            &deltas.light_shadow_uv_biases,
            data.light_shadow_uv_biases,
            remap,
            1,
        );
        write_attribute(
            &mut self.local_bounds,
            "local bounds",
            &deltas.local_bounds,
            data.local_bounds,
            remap,
            1,
        );
        write_attribute(
            &mut self.skinning_data,
            "skinning data",
            &deltas.skinning_data,
            data.skinning_data,
            remap,
            1,
        );
        write_attribute(
            &mut self.editor_data,
            "editor data",
            &deltas.editor_data,
            data.editor_data,
            remap,
            1,
        );
    }
}

fn relocate<T: Copy>(
    values: &mut Vec<T>,
    delta: &DeltaRange,
    remap: &IndexRemap<'_>,
    num_instances: usize,
    stride: usize,
    fill: T,
) {
    if values.is_empty() {
        return;
    }
    let compact = scatter_gather::gather(delta, values, stride);
    values.resize(num_instances * stride, fill);
    scatter_gather::scatter(delta, compact, values, remap, stride);
}

fn resize_attribute<T: Copy>(values: &mut Vec<T>, enabled: bool, len: usize, fill: T) {
    if enabled {
        values.resize(len, fill);
    } else {
        values.clear();
    }
}

fn write_attribute<T: Copy>(
    values: &mut Vec<T>,
    name: &str,
    delta: &DeltaRange,
    compact: Option<Vec<T>>,
    remap: &IndexRemap<'_>,
    stride: usize,
) {
    if values.is_empty() {
        return;
    }
    match compact {
        Some(compact) if compact.len() == delta.num_items() * stride => {
            scatter_gather::scatter(delta, compact, values, remap, stride);
        }
        _ => warn_missing(name, delta),
    }
}

fn warn_missing(name: &str, delta: &DeltaRange) {
    if !delta.is_empty() {
        impact_log::warn!(
            "Source did not provide {name} for {} changed instances, keeping defaults",
            delta.num_items()
        );
    }
}
