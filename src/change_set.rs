//! Single-use transfer of changed instance data from a source to a proxy.

use crate::{
    delta::DeltaRange,
    flags::InstanceDataFlags,
    geometry::AxisAlignedBox,
    id_index_map::{IndexAssignment, InstanceID, InstanceIDIndexMap},
    persist::PrecomputedInstanceData,
    scatter_gather,
};
use nalgebra::{Matrix4, Vector4};
use std::sync::Arc;

/// The instances whose data must be sent for each attribute.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributeDeltas {
    pub transforms: DeltaRange,
    pub custom_data: DeltaRange,
    pub random_ids: DeltaRange,
    pub light_shadow_uv_biases: DeltaRange,
    pub local_bounds: DeltaRange,
    pub skinning_data: DeltaRange,
    pub editor_data: DeltaRange,
}

/// How the proxy should bring its ID map up to date.
#[derive(Clone, Debug, PartialEq)]
pub enum IdMapUpdate {
    /// Every instance ID equals its index.
    Identity { num_instances: usize },
    /// Replace the map with the given one.
    Full(InstanceIDIndexMap),
    /// Apply the given removals and index assignments.
    Delta {
        num_instances: usize,
        removed_ids: Vec<InstanceID>,
        assignments: Vec<IndexAssignment>,
    },
}

/// Description of everything that changed in a primitive's instances since
/// the last flush, together with the data the source gathered for it.
///
/// A change set is either full, meaning the proxy rebuilds all of its data,
/// or incremental, meaning only the instances in the delta ranges carry new
/// data and instances that merely changed index are relocated by the proxy
/// itself. It is consumed by exactly one build or update.
#[derive(Debug)]
pub struct InstanceUpdateChangeSet {
    pub(crate) is_full: bool,
    pub(crate) num_instances: usize,
    pub(crate) flags: InstanceDataFlags,
    pub(crate) num_custom_data_floats: usize,
    pub(crate) primitive_to_world: Matrix4<f32>,
    pub(crate) mesh_bounds: AxisAlignedBox,
    pub(crate) max_displacement: f32,
    pub(crate) deltas: AttributeDeltas,
    pub(crate) id_map_update: IdMapUpdate,
    pub(crate) precomputed: Option<Arc<PrecomputedInstanceData>>,
    pub(crate) data: GatheredInstanceData,
}

#[derive(Debug, Default)]
pub(crate) struct GatheredInstanceData {
    pub(crate) transforms: Option<Vec<Matrix4<f32>>>,
    pub(crate) custom_data: Option<Vec<f32>>,
    pub(crate) random_ids: Option<Vec<f32>>,
    pub(crate) light_shadow_uv_biases: Option<Vec<Vector4<f32>>>,
    pub(crate) local_bounds: Option<Vec<AxisAlignedBox>>,
    pub(crate) skinning_data: Option<Vec<u32>>,
    pub(crate) editor_data: Option<Vec<u32>>,
}

impl InstanceUpdateChangeSet {
    pub(crate) fn new(
        is_full: bool,
        num_instances: usize,
        flags: InstanceDataFlags,
        num_custom_data_floats: usize,
        primitive_to_world: Matrix4<f32>,
        mesh_bounds: AxisAlignedBox,
        max_displacement: f32,
        deltas: AttributeDeltas,
        id_map_update: IdMapUpdate,
    ) -> Self {
        Self {
            is_full,
            num_instances,
            flags,
            num_custom_data_floats,
            primitive_to_world,
            mesh_bounds,
            max_displacement,
            deltas,
            id_map_update,
            precomputed: None,
            data: GatheredInstanceData::default(),
        }
    }

    /// Whether the proxy will rebuild all of its data from this change set.
    pub fn is_full(&self) -> bool {
        self.is_full
    }

    /// Returns the number of instances after the change.
    pub fn num_instances(&self) -> usize {
        self.num_instances
    }

    /// Returns the optional attributes present after the change.
    pub fn flags(&self) -> InstanceDataFlags {
        self.flags
    }

    /// Returns the number of custom floats per instance.
    pub fn num_custom_data_floats(&self) -> usize {
        self.num_custom_data_floats
    }

    /// Returns the instances whose data must be gathered for each attribute.
    pub fn deltas(&self) -> &AttributeDeltas {
        &self.deltas
    }

    /// Returns how the proxy's ID map will be updated.
    pub fn id_map_update(&self) -> &IdMapUpdate {
        &self.id_map_update
    }

    /// Returns the precomputed spatial hash data attached to the change set,
    /// if any.
    pub fn precomputed(&self) -> Option<&PrecomputedInstanceData> {
        self.precomputed.as_deref()
    }

    /// Gathers the local transforms of the changed instances from the
    /// source's transform array.
    pub fn gather_transforms(&mut self, transforms: &[Matrix4<f32>]) {
        self.data.transforms = Some(scatter_gather::gather(
            &self.deltas.transforms,
            transforms,
            1,
        ));
    }

    /// Gathers the custom floats of the changed instances from the source's
    /// custom data array, which holds
    /// [`num_custom_data_floats`](Self::num_custom_data_floats) floats per
    /// instance.
    pub fn gather_custom_data(&mut self, custom_data: &[f32]) {
        if self.flags.contains(InstanceDataFlags::CUSTOM_DATA) {
            self.data.custom_data = Some(scatter_gather::gather(
                &self.deltas.custom_data,
                custom_data,
                self.num_custom_data_floats,
            ));
        }
    }

    /// Gathers the random seeds of the added instances.
    pub fn gather_random_ids(&mut self, random_ids: &[f32]) {
        if self.flags.contains(InstanceDataFlags::RANDOM) {
            self.data.random_ids = Some(scatter_gather::gather(
                &self.deltas.random_ids,
                random_ids,
                1,
            ));
        }
    }

    /// Gathers the light/shadow map UV biases of the added instances.
    pub fn gather_light_shadow_uv_biases(&mut self, biases: &[Vector4<f32>]) {
        if self.flags.contains(InstanceDataFlags::LIGHT_SHADOW_UV_BIAS) {
            self.data.light_shadow_uv_biases = Some(scatter_gather::gather(
                &self.deltas.light_shadow_uv_biases,
                biases,
                1,
            ));
        }
    }

    /// Gathers the local bounds of the changed instances.
    pub fn gather_local_bounds(&mut self, local_bounds: &[AxisAlignedBox]) {
        if self.flags.contains(InstanceDataFlags::LOCAL_BOUNDS) {
            self.data.local_bounds = Some(scatter_gather::gather(
                &self.deltas.local_bounds,
                local_bounds,
                1,
            ));
        }
    }

    /// Gathers the skinning data of the changed instances.
    pub fn gather_skinning_data(&mut self, skinning_data: &[u32]) {
        if self.flags.contains(InstanceDataFlags::SKINNING_DATA) {
            self.data.skinning_data = Some(scatter_gather::gather(
                &self.deltas.skinning_data,
                skinning_data,
                1,
            ));
        }
    }

    /// Gathers the editor data of the changed instances.
    pub fn gather_editor_data(&mut self, editor_data: &[u32]) {
        if self.flags.contains(InstanceDataFlags::EDITOR_DATA) {
            self.data.editor_data = Some(scatter_gather::gather(
                &self.deltas.editor_data,
                editor_data,
                1,
            ));
        }
    }
}
