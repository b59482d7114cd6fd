use super::{Material, Vector3};

/// The result of a ray query against a scene.
///
/// A distance of +infinity encodes a miss; queries always return a `Hit`,
/// possibly at infinite distance.
#[derive(Debug, Copy, Clone)]
pub struct Hit {
    /// The distance along the ray at which the intersection occurs.
    pub distance: f32,

    /// The index of the triangle that was hit.
    pub triangle_index: i32,

    /// The index of the scene object that was hit.
    pub object_index: i32,

    /// The material index at the hit point.
    pub material_index: i32,

    /// The surface normal at the hit point.
    pub normal: Vector3,

    /// The material at the hit point.
    pub material: Option<Material>,
}

impl Hit {
    pub fn is_valid(&self) -> bool {
        self.distance < f32::INFINITY
    }
}

impl Default for Hit {
    fn default() -> Self {
        Self {
            distance: f32::INFINITY,
            triangle_index: -1,
            object_index: -1,
            material_index: -1,
            normal: Vector3::ZERO,
            material: None,
        }
    }
}
