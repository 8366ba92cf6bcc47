//! Change tracking and dispatch of instance data updates for a primitive.

use crate::{
    change_set::{AttributeDeltas, IdMapUpdate, InstanceUpdateChangeSet},
    config::InstanceDataConfig,
    delta::DeltaRange,
    flags::InstanceDataFlags,
    geometry::AxisAlignedBox,
    id_index_map::{IndexAssignment, InstanceID, InstanceIDIndexMap},
    persist::{PersistedInstanceData, PrecomputedInstanceData},
    proxy::InstanceDataSceneProxy,
    source::{InstanceDataSource, InstanceSourceDesc},
    spatial_hash::{self, SpatialHashOrder},
    tracker::{InstanceAttributeTracker, InstanceChangeFlags},
};
use anyhow::Result;
use impact_thread::TaskPool;
use nalgebra::Matrix4;
use std::sync::Arc;

/// How the changes to a primitive's instances are currently being tracked.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InstanceTrackingState {
    /// Nothing is tracked and nothing is ever flushed.
    Disabled,
    /// The proxy does not hold valid data, so the next flush is a full build.
    Initial,
    /// The proxy holds the data as of the last flush, and exact per-instance
    /// changes are tracked.
    Tracked,
    /// The proxy holds spatial hash ordered data. The next flush is a full
    /// build.
    Optimized,
}

/// Owner of the instance ID map and change tracking of one primitive, which
/// turns the recorded changes into change sets and applies them to the
/// primitive's [`InstanceDataSceneProxy`].
///
/// The source calls the mutator methods as it edits its instance array and
/// periodically calls [`Self::flush_changes`].
#[derive(Debug)]
pub struct InstanceDataManager {
    config: InstanceDataConfig,
    state: InstanceTrackingState,
    id_map: InstanceIDIndexMap,
    tracker: InstanceAttributeTracker,
    proxy: Option<Arc<InstanceDataSceneProxy>>,
    task_pool: Option<Arc<TaskPool>>,
    has_pending_changes: bool,
    force_full_update: bool,
    primitive_transform_dirty: bool,
    flushed: Option<FlushedState>,
    pending_precomputed: Option<Arc<PrecomputedInstanceData>>,
}

/// The source properties sent with the last flush.
#[derive(Clone, Debug, PartialEq)]
struct FlushedState {
    flags: InstanceDataFlags,
    num_custom_data_floats: usize,
    mesh_bounds: AxisAlignedBox,
    max_displacement: f32,
    primitive_to_world: Matrix4<f32>,
}

/// What has changed since the last flush.
#[derive(Clone, Copy, Debug, Default)]
struct ChangeDesc {
    instances_changed: bool,
    layout_changed: bool,
    bounds_changed: bool,
    primitive_transform_changed: bool,
    has_precomputed_data: bool,
}

impl InstanceDataManager {
    /// Creates a manager for a primitive with no instances. Updates of
    /// attached proxies run on the given task pool if there is one.
    pub fn new(config: InstanceDataConfig, task_pool: Option<Arc<TaskPool>>) -> Self {
        Self {
            config,
            state: InstanceTrackingState::Initial,
            id_map: InstanceIDIndexMap::new(),
            tracker: InstanceAttributeTracker::new(),
            proxy: None,
            task_pool,
            has_pending_changes: false,
            force_full_update: false,
            primitive_transform_dirty: false,
            flushed: None,
            pending_precomputed: None,
        }
    }

    /// Creates a manager that ignores every mutation and never flushes, for
    /// primitives that are never rendered.
    pub fn new_disabled() -> Self {
        Self {
            state: InstanceTrackingState::Disabled,
            ..Self::new(InstanceDataConfig::default(), None)
        }
    }

    pub fn config(&self) -> &InstanceDataConfig {
        &self.config
    }

    pub fn state(&self) -> InstanceTrackingState {
        self.state
    }

    pub fn id_map(&self) -> &InstanceIDIndexMap {
        &self.id_map
    }

    /// Returns the proxy, which exists after the first flush.
    pub fn proxy(&self) -> Option<&Arc<InstanceDataSceneProxy>> {
        self.proxy.as_ref()
    }

    /// Whether anything has been changed since the last flush.
    pub fn has_pending_changes(&self) -> bool {
        self.has_pending_changes || self.force_full_update || self.primitive_transform_dirty
    }

    fn is_disabled(&self) -> bool {
        self.state == InstanceTrackingState::Disabled
    }

    fn is_tracked(&self) -> bool {
        self.state == InstanceTrackingState::Tracked
    }

    /// Records the addition of an instance at the given index and returns
    /// its ID, or [`None`] if the manager is disabled.
    ///
    /// # Panics
    /// If `at_index` is larger than the number of instances.
    pub fn add(&mut self, at_index: usize) -> Option<InstanceID> {
        if self.is_disabled() {
            return None;
        }
        let id = self.id_map.add(at_index);
        if self.is_tracked() {
            self.tracker.add(at_index, self.id_map.max_instance_index());
        }
        self.has_pending_changes = true;
        Some(id)
    }

    /// Records the swap removal of the instance at the given index.
    ///
    /// # Panics
    /// If the index is out of range.
    pub fn remove_at_swap(&mut self, index: usize) {
        if self.is_disabled() {
            return;
        }
        let num_instances = self.id_map.max_instance_index();
        let id = self.id_map.remove_at_swap(index);
        if self.is_tracked() {
            self.tracker.remove_at_swap(id, index, num_instances);
        }
        self.has_pending_changes = true;
    }

    /// Records the ordered removal of the instance at the given index.
    ///
    /// # Panics
    /// If the index is out of range.
    pub fn remove_at(&mut self, index: usize) {
        if self.is_disabled() {
            return;
        }
        let num_instances = self.id_map.max_instance_index();
        let id = self.id_map.remove_at(index);
        if self.is_tracked() {
            self.tracker.remove_at(id, index, num_instances);
        }
        self.has_pending_changes = true;
    }

    /// Records a change of the local transform of the instance at the given
    /// index.
    pub fn transform_changed(&mut self, index: usize) {
        self.mark_changed(InstanceChangeFlags::TRANSFORM_CHANGED, index);
    }

    /// Records a change of the custom data of the instance at the given
    /// index.
    pub fn custom_data_changed(&mut self, index: usize) {
        self.mark_changed(InstanceChangeFlags::CUSTOM_DATA_CHANGED, index);
    }

    /// Records a change of the skinning data, and thereby the local bounds,
    /// of the instance at the given index.
    pub fn skinning_data_changed(&mut self, index: usize) {
        self.mark_changed(InstanceChangeFlags::SKINNING_DATA_CHANGED, index);
    }

    /// Records a change of the editor data of the instance at the given index.
    pub fn editor_data_changed(&mut self, index: usize) {
        self.mark_changed(InstanceChangeFlags::EDITOR_DATA_CHANGED, index);
    }

    /// Records a change in the number of custom floats per instance, which
    /// requires all data to be resent.
    pub fn num_custom_data_changed(&mut self) {
        if !self.is_disabled() {
            self.force_full_update = true;
        }
    }

    /// Records a change of the primitive-to-world transform, which requires
    /// every instance transform to be resent.
    pub fn primitive_transform_changed(&mut self) {
        if !self.is_disabled() {
            self.primitive_transform_dirty = true;
        }
    }

    /// Removes all instances.
    pub fn clear_instances(&mut self) {
        if self.is_disabled() {
            return;
        }
        self.id_map.reset(0);
        self.tracker.reset();
        self.force_full_update = true;
    }

    /// Discards tracked changes and returns to the initial state, so that the
    /// next flush rebuilds the existing proxy from scratch. Used when the
    /// instances were edited without going through the mutators.
    pub fn clear_change_tracking(&mut self) {
        if self.is_disabled() {
            return;
        }
        self.tracker.reset();
        self.state = InstanceTrackingState::Initial;
        self.has_pending_changes = true;
    }

    fn mark_changed(&mut self, flag: InstanceChangeFlags, index: usize) {
        if self.is_disabled() {
            return;
        }
        if self.is_tracked() {
            self.tracker
                .mark_index(flag, index, self.id_map.max_instance_index());
        }
        self.has_pending_changes = true;
    }

    /// Sends everything that changed since the last flush to the proxy,
    /// creating the proxy on the first flush.
    ///
    /// The update runs on the task pool if the proxy is attached and
    /// asynchronous updates are enabled, and inline otherwise. A previous
    /// update of the same proxy that is still in flight is awaited first.
    ///
    /// # Returns
    /// Whether a change set was dispatched.
    pub fn flush_changes(&mut self, source: &impl InstanceDataSource) -> bool {
        let Some((change_set, flushed)) = self.prepare_change_set(source) else {
            return false;
        };
        let attached_precomputed = change_set.precomputed.is_some();
        self.dispatch(change_set);
        self.commit_flush(flushed, attached_precomputed);
        true
    }

    /// Builds the change set for everything that changed since the last
    /// flush, without dispatching it. Change tracking is left untouched until
    /// the change set has been dispatched. Returns [`None`] if the manager is
    /// disabled or nothing changed.
    fn prepare_change_set(
        &mut self,
        source: &impl InstanceDataSource,
    ) -> Option<(InstanceUpdateChangeSet, FlushedState)> {
        if self.is_disabled() {
            return None;
        }

        let desc = source.source_desc();

        if desc.num_instances != self.id_map.max_instance_index() {
            impact_log::warn!(
                "Source has {} instances but the ID map has {}, resynchronizing",
                desc.num_instances,
                self.id_map.max_instance_index()
            );
            self.id_map.reset(desc.num_instances);
            self.tracker.reset();
            self.force_full_update = true;
        }

        let flushed = FlushedState::from_desc(&desc);
        let change = self.compute_change_desc(&flushed);
        if !change.has_any_change() {
            return None;
        }

        let is_full = !self.is_tracked()
            || change.layout_changed
            || change.has_precomputed_data
            || self.force_full_update;

        let change_set = impact_log::with_timing_logging!(
            "Building {} change set for {} instances",
            if is_full { "full" } else { "incremental" },
            desc.num_instances;
            self.build_change_set(source, &desc, &flushed, is_full, change)
        );

        Some((change_set, flushed))
    }

    fn commit_flush(&mut self, flushed: FlushedState, attached_precomputed: bool) {
        self.tracker.reset();
        self.has_pending_changes = false;
        self.force_full_update = false;
        self.primitive_transform_dirty = false;
        if attached_precomputed {
            self.pending_precomputed = None;
        }
        self.flushed = Some(flushed);
        self.state = if attached_precomputed {
            InstanceTrackingState::Optimized
        } else {
            InstanceTrackingState::Tracked
        };
    }

    fn compute_change_desc(&self, flushed: &FlushedState) -> ChangeDesc {
        let instances_changed = self.has_pending_changes() || self.tracker.has_any_changes();
        let has_precomputed_data = self.pending_precomputed.is_some();
        match &self.flushed {
            Some(previous) => ChangeDesc {
                instances_changed,
                layout_changed: previous.flags != flushed.flags
                    || previous.num_custom_data_floats != flushed.num_custom_data_floats,
                bounds_changed: previous.mesh_bounds != flushed.mesh_bounds
                    || previous.max_displacement.to_bits() != flushed.max_displacement.to_bits(),
                primitive_transform_changed: self.primitive_transform_dirty
                    || previous.primitive_to_world != flushed.primitive_to_world,
                has_precomputed_data,
            },
            None => ChangeDesc {
                instances_changed,
                layout_changed: true,
                bounds_changed: true,
                primitive_transform_changed: true,
                has_precomputed_data,
            },
        }
    }

    fn build_change_set(
        &mut self,
        source: &impl InstanceDataSource,
        desc: &InstanceSourceDesc,
        flushed: &FlushedState,
        is_full: bool,
        change: ChangeDesc,
    ) -> InstanceUpdateChangeSet {
        let n = desc.num_instances;
        let flags = flushed.flags;

        let deltas = if is_full {
            full_deltas(flags, n)
        } else {
            self.incremental_deltas(flags, n, change.primitive_transform_changed)
        };

        let id_map_update = if self.id_map.is_identity() {
            IdMapUpdate::Identity { num_instances: n }
        } else if is_full {
            IdMapUpdate::Full(self.id_map.clone())
        } else {
            IdMapUpdate::Delta {
                num_instances: n,
                removed_ids: self.tracker.removed_ids().to_vec(),
                assignments: self.index_assignments(n),
            }
        };

        let mut change_set = InstanceUpdateChangeSet::new(
            is_full,
            n,
            flags,
            flushed.num_custom_data_floats,
            flushed.primitive_to_world,
            flushed.mesh_bounds,
            flushed.max_displacement,
            deltas,
            id_map_update,
        );

        if is_full {
            change_set.precomputed = self.pending_precomputed.clone();
        }

        source.build_change_set(&mut change_set);
        change_set
    }

    fn incremental_deltas(
        &self,
        flags: InstanceDataFlags,
        num_instances: usize,
        force_transforms: bool,
    ) -> AttributeDeltas {
        let delta = |flag: InstanceDataFlags, mask: InstanceChangeFlags| {
            if flags.contains(flag) {
                self.tracker
                    .delta_range(mask | InstanceChangeFlags::ADDED, false, num_instances)
            } else {
                DeltaRange::Empty
            }
        };
        AttributeDeltas {
            transforms: self.tracker.delta_range(
                InstanceChangeFlags::TRANSFORM_CHANGED | InstanceChangeFlags::ADDED,
                force_transforms,
                num_instances,
            ),
            custom_data: delta(
                InstanceDataFlags::CUSTOM_DATA,
                InstanceChangeFlags::CUSTOM_DATA_CHANGED,
            ),
            random_ids: delta(InstanceDataFlags::RANDOM, InstanceChangeFlags::empty()),
            light_shadow_uv_biases: delta(
                InstanceDataFlags::LIGHT_SHADOW_UV_BIAS,
                InstanceChangeFlags::empty(),
            ),
            local_bounds: delta(
                InstanceDataFlags::LOCAL_BOUNDS,
                InstanceChangeFlags::SKINNING_DATA_CHANGED,
            ),
            skinning_data: delta(
                InstanceDataFlags::SKINNING_DATA,
                InstanceChangeFlags::SKINNING_DATA_CHANGED,
            ),
            editor_data: delta(
                InstanceDataFlags::EDITOR_DATA,
                InstanceChangeFlags::EDITOR_DATA_CHANGED,
            ),
        }
    }

    fn index_assignments(&self, num_instances: usize) -> Vec<IndexAssignment> {
        (0..num_instances)
            .filter_map(|index| {
                let flags = self.tracker.flags_at(index);
                flags
                    .intersects(InstanceChangeFlags::ADDED | InstanceChangeFlags::INDEX_CHANGED)
                    .then(|| IndexAssignment {
                        index: index as u32,
                        id: self.id_map.index_to_id(index),
                        is_new: flags.contains(InstanceChangeFlags::ADDED),
                    })
            })
            .collect()
    }

    fn dispatch(&mut self, change_set: InstanceUpdateChangeSet) {
        let proxy = Arc::clone(
            self.proxy
                .get_or_insert_with(|| Arc::new(InstanceDataSceneProxy::new())),
        );

        let slot = proxy.begin_update();

        let task_pool = self
            .task_pool
            .as_ref()
            .filter(|_| self.config.async_updates && proxy.is_attached());

        let handle = match task_pool {
            Some(task_pool) => {
                let task_proxy = Arc::clone(&proxy);
                task_pool.spawn(move || task_proxy.apply_change_set(change_set))
            }
            None => TaskPool::run_inline(|| proxy.apply_change_set(change_set)),
        };

        slot.set(handle);
    }

    /// Computes a spatial hash ordering of the source's instances and returns
    /// the permutation table (the old index of the instance at each new
    /// index), which the source should apply to its own instance arrays.
    ///
    /// If `retain_id_map` is set, IDs follow their instances into the new
    /// order. Otherwise the ID map is reset to identity, invalidating
    /// previously handed out IDs. The proxy is not touched until the next
    /// flush, which rebuilds it with the ordering data attached.
    ///
    /// Returns an empty table without doing anything if the manager is
    /// disabled, the instance count is below
    /// [`InstanceDataConfig::min_instances_to_optimize`] or the culling
    /// hierarchy is unsupported.
    pub fn optimize(&mut self, source: &impl InstanceDataSource, retain_id_map: bool) -> Vec<u32> {
        if self.is_disabled() {
            return Vec::new();
        }
        let desc = source.source_desc();
        let Some(order) = self.compute_spatial_hash_order(source, &desc) else {
            return Vec::new();
        };

        let num_instances = desc.num_instances;
        if retain_id_map && self.id_map.max_instance_index() == num_instances {
            self.id_map.reorder(&order.reorder_table);
        } else {
            self.id_map.reset(num_instances);
        }
        self.tracker.reset();

        self.pending_precomputed = Some(Arc::new(PrecomputedInstanceData {
            spatial_hashes: order.hashes,
            reorder_table: Vec::new(),
        }));
        self.has_pending_changes = true;

        order.reorder_table
    }

    fn compute_spatial_hash_order(
        &self,
        source: &impl InstanceDataSource,
        desc: &InstanceSourceDesc,
    ) -> Option<SpatialHashOrder> {
        let num_instances = desc.num_instances;

        if !self.config.culling_hierarchy_supported
            || num_instances < self.config.min_instances_to_optimize
        {
            impact_log::debug!(
                "Skipping spatial hash ordering of {num_instances} instances"
            );
            return None;
        }

        let transforms = source.instance_transforms();
        if transforms.len() != num_instances {
            impact_log::warn!(
                "Source provided {} transforms for {num_instances} instances, skipping ordering",
                transforms.len()
            );
            return None;
        }

        Some(impact_log::with_timing_logging!(
            "Computing spatial hash order for {} instances", num_instances;
            spatial_hash::compute_spatial_hash_order(
                transforms,
                &desc.primitive_to_world,
                &desc.mesh_bounds,
                self.config.spatial_hash_cell_size(),
            )
        ))
    }

    /// Serializes the ID map. If `is_cooked` is set, the spatial hash
    /// ordering of the source's instances is precomputed and included, with
    /// the source left in its current order.
    ///
    /// # Errors
    /// Returns an error if the data cannot be serialized.
    pub fn serialize(&self, source: &impl InstanceDataSource, is_cooked: bool) -> Result<Vec<u8>> {
        let precomputed = if is_cooked {
            let desc = source.source_desc();
            self.compute_spatial_hash_order(source, &desc)
                .map(|order| {
                    let is_sorted = order
                        .reorder_table
                        .iter()
                        .enumerate()
                        .all(|(index, &old_index)| index == old_index as usize);
                    PrecomputedInstanceData {
                        spatial_hashes: order.hashes,
                        reorder_table: if is_sorted {
                            Vec::new()
                        } else {
                            order.reorder_table
                        },
                    }
                })
        } else {
            None
        };
        PersistedInstanceData::from_id_map(&self.id_map, precomputed)?.to_bytes()
    }

    /// Restores the ID map and any precomputed ordering data from bytes
    /// produced by [`Self::serialize`]. The next flush rebuilds the proxy.
    ///
    /// # Errors
    /// Returns an error if the bytes are not valid persisted instance data,
    /// in which case the manager is left unchanged.
    pub fn deserialize(&mut self, bytes: &[u8]) -> Result<()> {
        let data = match PersistedInstanceData::from_bytes(bytes) {
            Ok(data) => data,
            Err(error) => {
                impact_log::warn!("Discarding persisted instance data: {error:#}");
                return Err(error);
            }
        };

        self.id_map = data.id_map();
        self.tracker.reset();
        self.pending_precomputed = data.precomputed.map(Arc::new);

        if !self.is_disabled() {
            self.state = InstanceTrackingState::Initial;
            self.has_pending_changes = true;
        }
        Ok(())
    }
}

impl FlushedState {
    fn from_desc(desc: &InstanceSourceDesc) -> Self {
        let flags = desc.effective_flags();
        Self {
            flags,
            num_custom_data_floats: if flags.contains(InstanceDataFlags::CUSTOM_DATA) {
                desc.num_custom_data_floats
            } else {
                0
            },
            mesh_bounds: desc.mesh_bounds,
            max_displacement: desc.max_displacement,
            primitive_to_world: desc.primitive_to_world,
        }
    }
}

impl ChangeDesc {
    fn has_any_change(&self) -> bool {
        self.instances_changed
            || self.layout_changed
            || self.bounds_changed
            || self.primitive_transform_changed
            || self.has_precomputed_data
    }
}

fn full_deltas(flags: InstanceDataFlags, num_instances: usize) -> AttributeDeltas {
    let delta = |flag: InstanceDataFlags| {
        if flags.contains(flag) {
            DeltaRange::full(num_instances)
        } else {
            DeltaRange::Empty
        }
    };
    AttributeDeltas {
        transforms: DeltaRange::full(num_instances),
        custom_data: delta(InstanceDataFlags::CUSTOM_DATA),
        random_ids: delta(InstanceDataFlags::RANDOM),
        light_shadow_uv_biases: delta(InstanceDataFlags::LIGHT_SHADOW_UV_BIAS),
        local_bounds: delta(InstanceDataFlags::LOCAL_BOUNDS),
        skinning_data: delta(InstanceDataFlags::SKINNING_DATA),
        editor_data: delta(InstanceDataFlags::EDITOR_DATA),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::MaterialUsageFlags;
    use nalgebra::Vector3;
    use std::num::NonZeroUsize;

    #[derive(Debug, Default)]
    struct TestSource {
        transforms: Vec<Matrix4<f32>>,
        custom_data: Vec<f32>,
        flags: InstanceDataFlags,
    }

    impl TestSource {
        fn with_instances(n: usize) -> Self {
            Self {
                transforms: (0..n)
                    .map(|i| Matrix4::new_translation(&Vector3::new(i as f32, 0.0, 0.0)))
                    .collect(),
                ..Default::default()
            }
        }
    }

    impl InstanceDataSource for TestSource {
        fn source_desc(&self) -> InstanceSourceDesc {
            InstanceSourceDesc {
                num_instances: self.transforms.len(),
                requested_flags: self.flags,
                material_usage: MaterialUsageFlags::all(),
                num_custom_data_floats: 1,
                ..Default::default()
            }
        }

        fn build_change_set(&self, change_set: &mut InstanceUpdateChangeSet) {
            change_set.gather_transforms(&self.transforms);
            change_set.gather_custom_data(&self.custom_data);
        }

        fn instance_transforms(&self) -> &[Matrix4<f32>] {
            &self.transforms
        }
    }

    fn manager_with_instances(n: usize) -> InstanceDataManager {
        let mut manager = InstanceDataManager::new(InstanceDataConfig::default(), None);
        for index in 0..n {
            manager.add(index);
        }
        manager
    }

    #[test]
    fn disabled_manager_ignores_everything() {
        let mut manager = InstanceDataManager::new_disabled();
        assert_eq!(manager.add(0), None);
        manager.transform_changed(0);
        assert!(!manager.flush_changes(&TestSource::with_instances(0)));
        assert!(manager.proxy().is_none());
        assert_eq!(manager.state(), InstanceTrackingState::Disabled);
    }

    #[test]
    fn first_flush_is_full_and_enters_tracked_state() {
        let mut manager = manager_with_instances(2);
        let source = TestSource::with_instances(2);
        let (change_set, _) = manager.prepare_change_set(&source).unwrap();

        assert!(change_set.is_full());
        assert_eq!(change_set.deltas().transforms, DeltaRange::Full(2));
        assert_eq!(manager.state(), InstanceTrackingState::Initial);

        assert!(manager.flush_changes(&source));
        assert_eq!(manager.state(), InstanceTrackingState::Tracked);
    }

    #[test]
    fn dropping_prepared_change_set_keeps_next_flush_full() {
        let mut manager = manager_with_instances(3);
        let mut source = TestSource::with_instances(3);
        drop(manager.prepare_change_set(&source));

        source.transforms[1] = Matrix4::new_scaling(2.0);
        manager.transform_changed(1);
        assert!(manager.flush_changes(&source));

        let proxy = manager.proxy().unwrap();
        assert_eq!(proxy.num_builds(), 1);
        assert_eq!(proxy.num_updates(), 0);
        assert_eq!(
            proxy.scene_data().instance_to_world_transforms(),
            source.transforms.as_slice()
        );
    }

    #[test]
    fn dropping_prepared_change_set_keeps_precomputed_data_pending() {
        let mut manager = manager_with_instances(80);
        let source = TestSource {
            transforms: (0..80)
                .map(|i| {
                    Matrix4::new_translation(&Vector3::new((i % 9) as f32 * 3.0, 0.0, i as f32))
                })
                .collect(),
            ..Default::default()
        };
        let table = manager.optimize(&source, false);
        assert!(!table.is_empty());
        let source = TestSource {
            transforms: table
                .iter()
                .map(|&old_index| source.transforms[old_index as usize])
                .collect(),
            ..Default::default()
        };

        let (change_set, _) = manager.prepare_change_set(&source).unwrap();
        assert!(change_set.precomputed.is_some());
        drop(change_set);

        assert!(manager.flush_changes(&source));
        assert_eq!(manager.state(), InstanceTrackingState::Optimized);
        assert!(manager.proxy().unwrap().scene_data().precomputed().is_some());
    }

    #[test]
    fn changing_one_transform_sends_only_that_instance() {
        let mut manager = manager_with_instances(3);
        let source = TestSource::with_instances(3);
        manager.flush_changes(&source);

        manager.transform_changed(1);
        let (change_set, _) = manager.prepare_change_set(&source).unwrap();

        let changed: Vec<_> = change_set
            .deltas()
            .transforms
            .iter()
            .map(|(index, _)| index)
            .collect();
        assert!(!change_set.is_full());
        assert_eq!(changed, vec![1]);
        assert!(change_set.deltas().custom_data.is_empty());
    }

    #[test]
    fn inserting_at_front_sends_explicit_assignments() {
        let mut manager = manager_with_instances(2);
        let mut source = TestSource::with_instances(2);
        manager.flush_changes(&source);

        source
            .transforms
            .insert(0, Matrix4::new_translation(&Vector3::new(-1.0, 0.0, 0.0)));
        let new_id = manager.add(0).unwrap();
        let (change_set, _) = manager.prepare_change_set(&source).unwrap();

        assert!(!change_set.is_full());
        let sent: Vec<_> = change_set
            .deltas()
            .transforms
            .iter()
            .map(|(index, _)| index)
            .collect();
        assert_eq!(sent, vec![0]);

        match change_set.id_map_update() {
            IdMapUpdate::Delta {
                num_instances,
                removed_ids,
                assignments,
            } => {
                assert_eq!(*num_instances, 3);
                assert!(removed_ids.is_empty());
                assert_eq!(
                    assignments,
                    &[
                        IndexAssignment {
                            index: 0,
                            id: new_id,
                            is_new: true
                        },
                        IndexAssignment {
                            index: 1,
                            id: InstanceID::from_u32(0),
                            is_new: false
                        },
                        IndexAssignment {
                            index: 2,
                            id: InstanceID::from_u32(1),
                            is_new: false
                        },
                    ]
                );
            }
            update => panic!("Expected ID map delta, got {update:?}"),
        }
    }

    #[test]
    fn flush_without_changes_sends_nothing() {
        let mut manager = manager_with_instances(2);
        let source = TestSource::with_instances(2);
        assert!(manager.flush_changes(&source));
        assert!(!manager.flush_changes(&source));
        assert_eq!(manager.proxy().unwrap().num_builds(), 1);
    }

    #[test]
    fn enabling_attribute_forces_full_update() {
        let mut manager = manager_with_instances(2);
        let mut source = TestSource::with_instances(2);
        manager.flush_changes(&source);

        source.flags = InstanceDataFlags::CUSTOM_DATA;
        source.custom_data = vec![0.5, 1.5];
        let (change_set, _) = manager.prepare_change_set(&source).unwrap();

        assert!(change_set.is_full());
        assert_eq!(change_set.deltas().custom_data, DeltaRange::Full(2));
    }

    #[test]
    fn primitive_transform_change_resends_all_transforms_incrementally() {
        let mut manager = manager_with_instances(3);
        let source = TestSource::with_instances(3);
        manager.flush_changes(&source);

        manager.primitive_transform_changed();
        let (change_set, _) = manager.prepare_change_set(&source).unwrap();

        assert!(!change_set.is_full());
        assert_eq!(change_set.deltas().transforms, DeltaRange::Full(3));
    }

    #[test]
    fn mismatched_instance_count_resynchronizes_with_full_update() {
        let mut manager = manager_with_instances(1);
        let source = TestSource::with_instances(1);
        manager.flush_changes(&source);

        let (change_set, _) = manager
            .prepare_change_set(&TestSource::with_instances(4))
            .unwrap();

        assert!(change_set.is_full());
        assert_eq!(manager.id_map().max_instance_index(), 4);
    }

    #[test]
    fn swap_removal_is_applied_through_relocation() {
        let mut manager = manager_with_instances(3);
        let mut source = TestSource::with_instances(3);
        manager.flush_changes(&source);

        manager.remove_at_swap(0);
        source.transforms.swap_remove(0);
        assert!(manager.flush_changes(&source));

        let proxy = manager.proxy().unwrap();
        let data = proxy.scene_data();
        assert_eq!(proxy.num_updates(), 1);
        assert_eq!(data.num_instances(), 2);
        assert_eq!(data.instance_to_world_transforms(), source.transforms.as_slice());
        assert_eq!(data.id_map().index_to_id(0), InstanceID::from_u32(2));
    }

    #[test]
    fn clearing_change_tracking_rebuilds_existing_proxy() {
        let mut manager = manager_with_instances(2);
        let source = TestSource::with_instances(2);
        manager.flush_changes(&source);
        let proxy = Arc::clone(manager.proxy().unwrap());

        manager.clear_change_tracking();
        assert_eq!(manager.state(), InstanceTrackingState::Initial);
        assert!(manager.flush_changes(&source));

        assert!(Arc::ptr_eq(&proxy, manager.proxy().unwrap()));
        assert_eq!(proxy.num_builds(), 2);
    }

    #[test]
    fn clearing_instances_rebuilds_empty_proxy() {
        let mut manager = manager_with_instances(3);
        manager.flush_changes(&TestSource::with_instances(3));

        manager.clear_instances();
        assert!(manager.flush_changes(&TestSource::with_instances(0)));

        let proxy = manager.proxy().unwrap();
        assert_eq!(proxy.num_builds(), 2);
        assert_eq!(proxy.scene_data().num_instances(), 0);
        assert_eq!(manager.id_map().max_instance_index(), 0);
    }

    #[test]
    fn changing_custom_data_count_forces_full_update() {
        let mut manager = manager_with_instances(2);
        let source = TestSource::with_instances(2);
        manager.flush_changes(&source);

        manager.num_custom_data_changed();

        assert!(manager.prepare_change_set(&source).unwrap().0.is_full());
    }

    #[test]
    fn skinning_change_resends_skinning_data_and_local_bounds() {
        let mut manager = manager_with_instances(3);
        let source = TestSource {
            flags: InstanceDataFlags::SKINNING_DATA | InstanceDataFlags::LOCAL_BOUNDS,
            ..TestSource::with_instances(3)
        };
        manager.flush_changes(&source);

        manager.skinning_data_changed(1);
        let (change_set, _) = manager.prepare_change_set(&source).unwrap();

        let changed = |delta: &DeltaRange| delta.iter().map(|(index, _)| index).collect::<Vec<_>>();
        assert!(!change_set.is_full());
        assert_eq!(changed(&change_set.deltas().skinning_data), vec![1]);
        assert_eq!(changed(&change_set.deltas().local_bounds), vec![1]);
        assert!(change_set.deltas().transforms.is_empty());
    }

    #[test]
    fn optimize_is_skipped_for_few_instances() {
        let mut manager = manager_with_instances(3);
        assert!(manager.optimize(&TestSource::with_instances(3), true).is_empty());
    }

    #[test]
    fn attached_proxy_is_updated_on_task_pool() {
        let pool = Arc::new(TaskPool::new(NonZeroUsize::new(2).unwrap()).unwrap());
        let mut manager = InstanceDataManager::new(InstanceDataConfig::default(), Some(pool));
        for index in 0..3 {
            manager.add(index);
        }
        let mut source = TestSource::with_instances(3);
        manager.flush_changes(&source);
        manager.proxy().unwrap().mark_attached();

        source.transforms[1] = Matrix4::new_scaling(2.0);
        manager.transform_changed(1);
        assert!(manager.flush_changes(&source));

        let proxy = manager.proxy().unwrap();
        assert_eq!(
            proxy.scene_data().instance_to_world_transforms()[1],
            Matrix4::new_scaling(2.0)
        );
        assert_eq!(proxy.num_updates(), 1);
    }
}
