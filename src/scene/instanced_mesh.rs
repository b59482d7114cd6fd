use std::sync::Arc;

use super::Scene;
use crate::error::EchofieldError;
use crate::geometry::{Hit, Matrix4x4, Ray, Vector3};

/// A triangle mesh that can be moved (translated, rotated, or scaled) at
/// runtime.
///
/// An instanced mesh wraps a sub-scene with a 4×4 transform. Rays are
/// transformed into the sub-scene's local space for querying, and hit normals
/// are transformed back into world space.
#[derive(Debug)]
pub struct InstancedMesh {
    sub_scene: Arc<Scene>,
    transform: Matrix4x4,
    inverse_transform: Matrix4x4,
    staged_transform: Option<Matrix4x4>,
}

impl InstancedMesh {
    /// Creates a new instanced mesh.
    ///
    /// # Errors
    ///
    /// Returns [`EchofieldError::InvalidArgument`] if the transform is
    /// singular.
    pub fn try_new(settings: InstancedMeshSettings) -> Result<Self, EchofieldError> {
        let inverse_transform = settings
            .transform
            .inverse()
            .ok_or(EchofieldError::InvalidArgument)?;

        Ok(Self {
            sub_scene: settings.sub_scene,
            transform: settings.transform,
            inverse_transform,
            staged_transform: None,
        })
    }

    pub fn sub_scene(&self) -> &Arc<Scene> {
        &self.sub_scene
    }

    pub fn transform(&self) -> &Matrix4x4 {
        &self.transform
    }

    /// Stages a new transform, which takes effect when the owning scene is
    /// committed.
    pub fn update_transform(&mut self, transform: Matrix4x4) {
        self.staged_transform = Some(transform);
    }

    pub(crate) fn commit(&mut self) {
        if let Some(transform) = self.staged_transform.take()
            && let Some(inverse) = transform.inverse()
        {
            self.transform = transform;
            self.inverse_transform = inverse;
        }
    }

    /// Maps a world-space ray into the sub-scene's local space. Returns the
    /// local ray and the scale factor that converts world distances to local
    /// distances.
    fn to_local(&self, ray: &Ray) -> (Ray, f32) {
        let local_origin = self.inverse_transform.transform_point(ray.origin);
        let local_direction_raw = self.inverse_transform.transform_direction(ray.direction);
        let scale = local_direction_raw.length();

        let local_direction = if scale > 0.0 {
            local_direction_raw / scale
        } else {
            local_direction_raw
        };

        (Ray::new(local_origin, local_direction), scale)
    }

    pub(crate) fn closest_hit(&self, ray: &Ray, min_distance: f32, max_distance: f32) -> Hit {
        let (local_ray, scale) = self.to_local(ray);
        if scale == 0.0 {
            return Hit::default();
        }

        let mut hit =
            self.sub_scene
                .closest_hit_internal(&local_ray, min_distance * scale, max_distance * scale);

        if hit.is_valid() {
            hit.distance /= scale;
            hit.normal = self
                .inverse_transform
                .transposed()
                .transform_direction(hit.normal)
                .normalized();
        }

        hit
    }

    pub(crate) fn any_hit(&self, ray: &Ray, min_distance: f32, max_distance: f32) -> bool {
        let (local_ray, scale) = self.to_local(ray);
        if scale == 0.0 {
            return false;
        }

        self.sub_scene
            .any_hit_internal(&local_ray, min_distance * scale, max_distance * scale)
    }

    pub(crate) fn is_occluded(&self, start: Vector3, end: Vector3) -> bool {
        let local_start = self.inverse_transform.transform_point(start);
        let local_end = self.inverse_transform.transform_point(end);
        self.sub_scene.is_occluded_internal(local_start, local_end)
    }
}

/// Settings used to create an instanced mesh.
#[derive(Debug)]
pub struct InstancedMeshSettings {
    /// The sub-scene containing the geometry.
    ///
    /// The sub-scene must be committed for instanced queries to see its
    /// geometry.
    pub sub_scene: Arc<Scene>,

    /// The transform from the sub-scene's local space to world space.
    pub transform: Matrix4x4,
}
