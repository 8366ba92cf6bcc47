//! Interface to the owner of the instances.

use crate::{
    change_set::InstanceUpdateChangeSet,
    flags::{InstanceDataFlags, MaterialUsageFlags},
    geometry::AxisAlignedBox,
};
use nalgebra::Matrix4;

/// Snapshot of the properties of a primitive that determine the layout and
/// bounds of its instance data.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceSourceDesc {
    /// Current number of instances.
    pub num_instances: usize,
    /// The optional attributes the primitive wants to provide.
    pub requested_flags: InstanceDataFlags,
    /// The per-instance inputs read by the primitive's materials.
    pub material_usage: MaterialUsageFlags,
    /// Local bounds of the instanced mesh.
    pub mesh_bounds: AxisAlignedBox,
    /// How far materials may displace vertices beyond the mesh bounds.
    pub max_displacement: f32,
    /// Number of custom floats per instance.
    pub num_custom_data_floats: usize,
    /// Transform from the primitive's space to world space.
    pub primitive_to_world: Matrix4<f32>,
}

/// An owner of instances whose data is mirrored to an
/// [`InstanceDataSceneProxy`](crate::proxy::InstanceDataSceneProxy) through
/// an [`InstanceDataManager`](crate::manager::InstanceDataManager).
pub trait InstanceDataSource {
    /// Describes the current state of the instances.
    fn source_desc(&self) -> InstanceSourceDesc;

    /// Fills the change set with the data of the instances in its delta
    /// ranges, using the `gather_*` methods of the change set.
    fn build_change_set(&self, change_set: &mut InstanceUpdateChangeSet);

    /// Returns the local transform of every instance, in instance index
    /// order.
    fn instance_transforms(&self) -> &[Matrix4<f32>];
}

impl InstanceSourceDesc {
    /// Returns the attributes that will actually be present, given the
    /// material usage and the number of custom floats.
    pub fn effective_flags(&self) -> InstanceDataFlags {
        let mut flags = InstanceDataFlags::effective(self.requested_flags, self.material_usage);
        if self.num_custom_data_floats == 0 {
            flags.remove(InstanceDataFlags::CUSTOM_DATA);
        }
        flags
    }
}

impl Default for InstanceSourceDesc {
    fn default() -> Self {
        Self {
            num_instances: 0,
            requested_flags: InstanceDataFlags::empty(),
            material_usage: MaterialUsageFlags::empty(),
            mesh_bounds: AxisAlignedBox::default(),
            max_displacement: 0.0,
            num_custom_data_floats: 0,
            primitive_to_world: Matrix4::identity(),
        }
    }
}
