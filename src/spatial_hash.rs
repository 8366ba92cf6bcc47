//! Spatial hash ordering of instances.

use crate::geometry::AxisAlignedBox;
use bytemuck::{Pod, Zeroable};
use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

/// A cell in a multi-resolution grid. Cells at level `l` have edge length
/// `min_cell_size * 2^l`.
#[repr(C)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Zeroable, Pod, Serialize, Deserialize,
)]
pub struct SpatialHashLocation {
    pub level: u32,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// A run of consecutive instances that share the same spatial hash cell.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable, Pod, Serialize, Deserialize)]
pub struct CompressedSpatialHash {
    pub location: SpatialHashLocation,
    pub num_instances: u32,
}

/// Instance order grouping spatially coincident instances.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpatialHashOrder {
    /// The old index of the instance at each new index.
    pub reorder_table: Vec<u32>,
    /// The cells of the reordered instances, run-length encoded.
    pub hashes: Vec<CompressedSpatialHash>,
}

/// Computes the spatial hash cell for a sphere with the given world space
/// center and radius.
pub fn spatial_hash_location(
    center: &nalgebra::Point3<f32>,
    radius: f32,
    min_cell_size: f32,
) -> SpatialHashLocation {
    let diameter = 2.0 * radius;
    let level = if diameter > min_cell_size {
        (diameter / min_cell_size).log2().ceil() as u32
    } else {
        0
    };
    let cell_size = min_cell_size * (level as f32).exp2();
    SpatialHashLocation {
        level,
        x: (center.x / cell_size).floor() as i32,
        y: (center.y / cell_size).floor() as i32,
        z: (center.z / cell_size).floor() as i32,
    }
}

/// Sorts the instances with the given local transforms by the spatial hash
/// cell of their world space bounding sphere, breaking ties by original
/// index, and run-length encodes the cells of the sorted instances.
pub fn compute_spatial_hash_order(
    instance_transforms: &[Matrix4<f32>],
    primitive_to_world: &Matrix4<f32>,
    mesh_bounds: &AxisAlignedBox,
    min_cell_size: f32,
) -> SpatialHashOrder {
    let local_sphere = mesh_bounds.bounding_sphere();

    let mut keyed: Vec<(SpatialHashLocation, u32)> = instance_transforms
        .iter()
        .enumerate()
        .map(|(index, transform)| {
            let sphere = local_sphere.transformed(&(primitive_to_world * transform));
            (
                spatial_hash_location(sphere.center(), sphere.radius(), min_cell_size),
                index as u32,
            )
        })
        .collect();

    keyed.sort_unstable();

    let mut hashes: Vec<CompressedSpatialHash> = Vec::new();
    for (location, _) in &keyed {
        match hashes.last_mut() {
            Some(run) if run.location == *location => run.num_instances += 1,
            _ => hashes.push(CompressedSpatialHash {
                location: *location,
                num_instances: 1,
            }),
        }
    }

    SpatialHashOrder {
        reorder_table: keyed.into_iter().map(|(_, index)| index).collect(),
        hashes,
    }
}
