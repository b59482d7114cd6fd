use super::Vector3;

/// A sphere in 3D space.
///
/// Spheres are used to define a source's radius of influence, and to define
/// the influence region of a probe.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
#[repr(C)]
pub struct Sphere {
    /// The center of the sphere.
    pub center: Vector3,

    /// The radius of the sphere.
    pub radius: f32,
}

impl Sphere {
    pub const fn new(center: Vector3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Checks whether the sphere contains a point.
    pub fn contains(&self, point: Vector3) -> bool {
        (point - self.center).length_squared() <= self.radius * self.radius
    }

    /// Computes the minimal sphere that fully contains `a` and `b`.
    pub fn bounding_sphere(a: Self, b: Self) -> Self {
        let between_centers = a.center - b.center;
        let sq_dist = between_centers.length_squared();
        let radii_difference = a.radius - b.radius;

        // One sphere contained within the other.
        if sq_dist < radii_difference * radii_difference {
            return if a.radius > b.radius { a } else { b };
        }

        let radius = (a.radius + b.radius + sq_dist.sqrt()) * 0.5;
        let axis = between_centers.normalized();
        let center = b.center + axis * (radius - b.radius);

        Self { center, radius }
    }
}
