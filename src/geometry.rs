//! Bounding volumes for instances.

use approx::AbsDiffEq;
use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix4, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// An axis-aligned box, represented by its lower and upper corner.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Zeroable, Pod, Serialize, Deserialize)]
pub struct AxisAlignedBox {
    lower_corner: Point3<f32>,
    upper_corner: Point3<f32>,
}

/// A sphere represented by its center point and radius.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Sphere {
    center: Point3<f32>,
    radius: f32,
}

impl AxisAlignedBox {
    /// Creates a new box with the given lower and upper corner points.
    pub fn new(lower_corner: Point3<f32>, upper_corner: Point3<f32>) -> Self {
        debug_assert!(lower_corner.x <= upper_corner.x);
        debug_assert!(lower_corner.y <= upper_corner.y);
        debug_assert!(lower_corner.z <= upper_corner.z);
        Self {
            lower_corner,
            upper_corner,
        }
    }

    /// Creates a box centered at the origin with the given half extents.
    pub fn centered_with_half_extents(half_extents: Vector3<f32>) -> Self {
        Self::new(Point3::from(-half_extents), Point3::from(half_extents))
    }

    /// Creates the axis-aligned bounding box for the given points.
    ///
    /// # Panics
    /// If the point slice is empty.
    pub fn aabb_for_points(points: &[Point3<f32>]) -> Self {
        assert!(
            !points.is_empty(),
            "Tried to create AABB for empty point slice"
        );
        let first = points[0];
        let (lower_corner, upper_corner) = points[1..]
            .iter()
            .fold((first, first), |(lower, upper), point| {
                (lower.inf(point), upper.sup(point))
            });
        Self::new(lower_corner, upper_corner)
    }

    /// Creates the axis-aligned box bounding both of the given boxes.
    pub fn aabb_from_pair(aabb_1: &Self, aabb_2: &Self) -> Self {
        Self::new(
            aabb_1.lower_corner.inf(&aabb_2.lower_corner),
            aabb_1.upper_corner.sup(&aabb_2.upper_corner),
        )
    }

    /// Returns the lower corner of the box.
    pub fn lower_corner(&self) -> &Point3<f32> {
        &self.lower_corner
    }

    /// Returns the upper corner of the box.
    pub fn upper_corner(&self) -> &Point3<f32> {
        &self.upper_corner
    }

    /// Calculates and returns the center point of the box.
    pub fn center(&self) -> Point3<f32> {
        nalgebra::center(&self.lower_corner, &self.upper_corner)
    }

    /// Calculates and returns the half extents of the box along each axis.
    pub fn half_extents(&self) -> Vector3<f32> {
        (self.upper_corner - self.lower_corner) * 0.5
    }

    /// Returns the box expanded by the given margin in every direction.
    pub fn expanded(&self, margin: f32) -> Self {
        let margin = Vector3::repeat(margin.max(0.0));
        Self::new(self.lower_corner - margin, self.upper_corner + margin)
    }

    /// Returns all eight corners of the box.
    pub fn all_corners(&self) -> [Point3<f32>; 8] {
        let (lower, upper) = (&self.lower_corner, &self.upper_corner);
        [
            Point3::new(lower.x, lower.y, lower.z),
            Point3::new(lower.x, lower.y, upper.z),
            Point3::new(lower.x, upper.y, lower.z),
            Point3::new(lower.x, upper.y, upper.z),
            Point3::new(upper.x, lower.y, lower.z),
            Point3::new(upper.x, lower.y, upper.z),
            Point3::new(upper.x, upper.y, lower.z),
            Point3::new(upper.x, upper.y, upper.z),
        ]
    }

    /// Computes the axis-aligned box bounding this box after it has been
    /// transformed with the given affine transform.
    pub fn aabb_of_transformed(&self, transform: &Matrix4<f32>) -> Self {
        let corners = self
            .all_corners()
            .map(|corner| transform.transform_point(&corner));
        Self::aabb_for_points(&corners)
    }

    /// Computes the sphere bounding the box.
    pub fn bounding_sphere(&self) -> Sphere {
        Sphere::new(self.center(), self.half_extents().norm())
    }
}

impl Default for AxisAlignedBox {
    fn default() -> Self {
        Self::new(Point3::origin(), Point3::origin())
    }
}

impl AbsDiffEq for AxisAlignedBox {
    type Epsilon = f32;

    fn default_epsilon() -> f32 {
        f32::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: f32) -> bool {
        self.lower_corner.abs_diff_eq(&other.lower_corner, epsilon)
            && self.upper_corner.abs_diff_eq(&other.upper_corner, epsilon)
    }
}

impl Sphere {
    /// Creates a new sphere with the given center and radius.
    ///
    /// # Panics
    /// If `radius` is negative.
    pub fn new(center: Point3<f32>, radius: f32) -> Self {
        assert!(radius >= 0.0, "Tried to create sphere with negative radius");
        Self { center, radius }
    }

    /// Returns the center point of the sphere.
    pub fn center(&self) -> &Point3<f32> {
        &self.center
    }

    /// Returns the radius of the sphere.
    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Computes a sphere bounding this sphere after it has been transformed
    /// with the given affine transform. The radius is scaled by the largest
    /// axis scaling of the transform.
    pub fn transformed(&self, transform: &Matrix4<f32>) -> Self {
        let max_scale = crate::transform::axis_scales(transform).max();
        Self::new(
            transform.transform_point(&self.center),
            self.radius * max_scale,
        )
    }
}
