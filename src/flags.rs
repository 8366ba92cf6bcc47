//! Flags describing which per-instance attributes are present.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

bitflags! {
    /// Which optional per-instance attributes a primitive carries in
    /// addition to the instance transform.
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Zeroable, Pod)]
    pub struct InstanceDataFlags: u8 {
        /// A fixed number of custom floats per instance.
        const CUSTOM_DATA          = 1 << 0;
        /// A random seed per instance.
        const RANDOM               = 1 << 1;
        /// A light/shadow map UV bias per instance.
        const LIGHT_SHADOW_UV_BIAS = 1 << 2;
        /// Local-space bounds per instance, overriding the mesh bounds.
        const LOCAL_BOUNDS         = 1 << 3;
        /// A skinning (animation bank) index per instance.
        const SKINNING_DATA        = 1 << 4;
        /// Editor selection state per instance.
        const EDITOR_DATA          = 1 << 5;
    }
}

bitflags! {
    /// Which per-instance inputs the materials of a primitive read.
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Zeroable, Pod)]
    pub struct MaterialUsageFlags: u8 {
        const USES_CUSTOM_DATA = 1 << 0;
        const USES_RANDOM      = 1 << 1;
    }
}

impl InstanceDataFlags {
    /// Returns the subset of the requested flags that is actually needed given
    /// the material usage. Custom data and random seeds are dropped when no
    /// material reads them.
    pub fn effective(requested: Self, material_usage: MaterialUsageFlags) -> Self {
        let mut flags = requested;
        if !material_usage.contains(MaterialUsageFlags::USES_CUSTOM_DATA) {
            flags.remove(Self::CUSTOM_DATA);
        }
        if !material_usage.contains(MaterialUsageFlags::USES_RANDOM) {
            flags.remove(Self::RANDOM);
        }
        flags
    }
}
