//! Composition of instance transforms with the primitive transform.

use crate::{delta::DeltaRange, remap::IndexRemap, scatter_gather};
use nalgebra::{Matrix4, Vector3};

const SCALE_TOLERANCE: f32 = 1e-4;

/// Returns the lengths of the three basis vectors of the given affine
/// transform.
pub fn axis_scales(transform: &Matrix4<f32>) -> Vector3<f32> {
    let linear = transform.fixed_view::<3, 3>(0, 0);
    Vector3::new(
        linear.column(0).norm(),
        linear.column(1).norm(),
        linear.column(2).norm(),
    )
}

/// Whether the given affine transform scales its axes by different amounts.
pub fn has_non_uniform_scale(transform: &Matrix4<f32>) -> bool {
    let scales = axis_scales(transform);
    scales.max() - scales.min() > SCALE_TOLERANCE * scales.max()
}

/// Removes shear from the given affine transform by making its basis vectors
/// mutually orthogonal, keeping the first axis direction and the length of
/// every axis.
pub fn orthogonalize(transform: &Matrix4<f32>) -> Matrix4<f32> {
    let scales = axis_scales(transform);
    let x = transform.fixed_view::<3, 1>(0, 0).into_owned();
    let y = transform.fixed_view::<3, 1>(0, 1).into_owned();
    let z = transform.fixed_view::<3, 1>(0, 2).into_owned();

    let Some(x_dir) = x.try_normalize(f32::EPSILON) else {
        return *transform;
    };
    let y_orth = y - x_dir * x_dir.dot(&y);
    let Some(y_dir) = y_orth.try_normalize(f32::EPSILON) else {
        return *transform;
    };
    let z_orth = z - x_dir * x_dir.dot(&z) - y_dir * y_dir.dot(&z);
    let z_dir = z_orth
        .try_normalize(f32::EPSILON)
        .unwrap_or_else(|| x_dir.cross(&y_dir));

    let mut result = *transform;
    result
        .fixed_view_mut::<3, 1>(0, 0)
        .copy_from(&(x_dir * scales.x));
    result
        .fixed_view_mut::<3, 1>(0, 1)
        .copy_from(&(y_dir * scales.y));
    result
        .fixed_view_mut::<3, 1>(0, 2)
        .copy_from(&(z_dir * scales.z));
    result
}

/// Composes every local instance transform in the compact buffer with the
/// primitive-to-world transform and scatters the results into the
/// destination array.
///
/// Shear introduced by the composition is removed, but only when the
/// primitive transform has non-uniform scale, since composing with a uniform
/// scale cannot introduce shear.
pub fn scatter_transforms(
    delta: &DeltaRange,
    mut local_transforms: Vec<Matrix4<f32>>,
    dest: &mut Vec<Matrix4<f32>>,
    remap: &IndexRemap<'_>,
    primitive_to_world: &Matrix4<f32>,
) {
    if has_non_uniform_scale(primitive_to_world) {
        for transform in &mut local_transforms {
            *transform = orthogonalize(&(primitive_to_world * *transform));
        }
    } else if *primitive_to_world != Matrix4::identity() {
        for transform in &mut local_transforms {
            *transform = primitive_to_world * *transform;
        }
    }
    scatter_gather::scatter(delta, local_transforms, dest, remap, 1);
}
