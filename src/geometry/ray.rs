use super::{Aabb, Mesh, Sphere, Vector3};

/// A single ray.
#[derive(Debug, Copy, Clone)]
pub struct Ray {
    pub origin: Vector3,
    pub direction: Vector3,
}

impl Ray {
    pub const fn new(origin: Vector3, direction: Vector3) -> Self {
        Self { origin, direction }
    }

    pub fn point_at_distance(&self, distance: f32) -> Vector3 {
        self.origin + self.direction * distance
    }

    /// Calculates the intersection of the ray with a mesh triangle, using the
    /// Möller-Trumbore algorithm. Returns +infinity on a miss.
    pub fn intersect_triangle(&self, mesh: &Mesh, triangle_index: usize) -> f32 {
        let v0 = mesh.triangle_vertex(triangle_index, 0);
        let v1 = mesh.triangle_vertex(triangle_index, 1);
        let v2 = mesh.triangle_vertex(triangle_index, 2);

        let edge1 = v1 - v0;
        let edge2 = v2 - v0;

        let p = Vector3::cross(self.direction, edge2);
        let determinant = Vector3::dot(edge1, p);

        // A zero determinant means the ray is parallel to the triangle plane.
        if determinant == 0.0 {
            return f32::INFINITY;
        }

        let inverse_determinant = 1.0 / determinant;

        let t = self.origin - v0;

        let u = Vector3::dot(t, p) * inverse_determinant;
        if !(0.0..=1.0).contains(&u) {
            return f32::INFINITY;
        }

        let q = Vector3::cross(t, edge1);
        let v = Vector3::dot(self.direction, q) * inverse_determinant;
        if v < 0.0 || 1.0 - u < v {
            return f32::INFINITY;
        }

        Vector3::dot(edge2, q) * inverse_determinant
    }

    /// Checks whether the ray passes through a box within the t interval
    /// `[min_distance, max_distance]`, using the branchless slab test.
    /// Returns the clipped interval when the ray passes through.
    pub fn intersect_aabb(
        &self,
        aabb: &Aabb,
        reciprocal_direction: Vector3,
        direction_signs: &[usize; 3],
        min_distance: f32,
        max_distance: f32,
    ) -> Option<(f32, f32)> {
        let mut t_min = min_distance;
        let mut t_max = max_distance;

        for axis in 0..3 {
            let sign = direction_signs[axis];
            let near = (aabb.coordinates(sign ^ 1).element(axis) - self.origin.element(axis))
                * reciprocal_direction.element(axis);
            let far = (aabb.coordinates(sign).element(axis) - self.origin.element(axis))
                * reciprocal_direction.element(axis);

            t_min = t_min.max(near);
            t_max = t_max.min(far);
        }

        if t_min <= t_max { Some((t_min, t_max)) } else { None }
    }

    /// Calculates the intersection of the ray with a sphere. Returns
    /// +infinity on a miss; the returned distance may be negative if the
    /// origin is inside the sphere.
    pub fn intersect_sphere(&self, sphere: &Sphere) -> f32 {
        let v = self.origin - sphere.center;

        let b = 2.0 * Vector3::dot(v, self.direction);
        let c = v.length_squared() - sphere.radius * sphere.radius;
        let d = b * b - 4.0 * c;

        if d < 0.0 {
            return f32::INFINITY;
        }

        -0.5 * (b + d.sqrt())
    }

    /// Reciprocal direction components for the slab test. Zero components map
    /// to +infinity, which yields an empty slab interval rather than a NaN.
    pub fn reciprocal_direction(&self) -> Vector3 {
        let recip = |x: f32| {
            if x == 0.0 { f32::INFINITY } else { 1.0 / x }
        };

        Vector3::new(
            recip(self.direction.x),
            recip(self.direction.y),
            recip(self.direction.z),
        )
    }

    /// Per-axis direction signs for ordered box traversal: 1 where the
    /// direction is non-negative, 0 otherwise.
    pub fn direction_signs(&self) -> [usize; 3] {
        [
            (self.direction.x >= 0.0) as usize,
            (self.direction.y >= 0.0) as usize,
            (self.direction.z >= 0.0) as usize,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Triangle;
    use approx::assert_relative_eq;

    fn unit_triangle_mesh() -> Mesh {
        Mesh::new(
            &[
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
            &[Triangle::new(0, 1, 2)],
        )
    }

    #[test]
    fn test_triangle_hit() {
        let mesh = unit_triangle_mesh();
        let ray = Ray::new(Vector3::new(0.25, 0.25, 1.0), Vector3::new(0.0, 0.0, -1.0));

        let t = ray.intersect_triangle(&mesh, 0);
        assert_relative_eq!(t, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_triangle_miss() {
        let mesh = unit_triangle_mesh();
        let ray = Ray::new(Vector3::new(2.0, 2.0, 1.0), Vector3::new(0.0, 0.0, -1.0));

        assert_eq!(ray.intersect_triangle(&mesh, 0), f32::INFINITY);
    }

    #[test]
    fn test_parallel_ray_misses() {
        let mesh = unit_triangle_mesh();
        let ray = Ray::new(Vector3::new(0.0, 0.0, 1.0), Vector3::new(1.0, 0.0, 0.0));

        assert_eq!(ray.intersect_triangle(&mesh, 0), f32::INFINITY);
    }

    #[test]
    fn test_aabb_slab_test_with_zero_direction_component() {
        let aabb = Aabb::new(Vector3::new(-1.0, -1.0, -1.0), Vector3::new(1.0, 1.0, 1.0));
        let ray = Ray::new(Vector3::new(0.0, 0.0, -5.0), Vector3::new(0.0, 0.0, 1.0));

        let interval = ray.intersect_aabb(
            &aabb,
            ray.reciprocal_direction(),
            &ray.direction_signs(),
            0.0,
            f32::MAX,
        );

        let (t_min, t_max) = interval.unwrap();
        assert_relative_eq!(t_min, 4.0, epsilon = 1e-5);
        assert_relative_eq!(t_max, 6.0, epsilon = 1e-5);
    }

    #[test]
    fn test_sphere_intersection() {
        let sphere = Sphere::new(Vector3::ZERO, 1.0);
        let ray = Ray::new(Vector3::new(0.0, 0.0, 3.0), Vector3::new(0.0, 0.0, -1.0));

        assert_relative_eq!(ray.intersect_sphere(&sphere), 2.0, epsilon = 1e-5);
    }
}
