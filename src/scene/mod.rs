//! Scene management: static and instanced meshes, and ray queries over them.

pub mod bvh;
pub use bvh::{Bvh, BvhNode};

mod static_mesh;
pub use static_mesh::{StaticMesh, StaticMeshSettings};

mod instanced_mesh;
pub use instanced_mesh::{InstancedMesh, InstancedMeshSettings};

use std::sync::Arc;

use crate::geometry::{Hit, Matrix4x4, Ray, Vector3};
use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Handle to a static mesh added to a scene.
    pub struct StaticMeshHandle;

    /// Handle to an instanced mesh added to a scene.
    pub struct InstancedMeshHandle;
}

/// A 3D scene, which can contain geometry objects that interact with
/// acoustic rays.
///
/// The scene object itself doesn't contain any geometry, but is a container
/// for [`StaticMesh`] and [`InstancedMesh`] objects, which do.
///
/// Additions, removals, and transform updates are staged, and take effect
/// only when [`Scene::commit`] is called. The scene must be committed before
/// any query; querying an uncommitted scene reports no hits. A sub-scene used
/// by an instanced mesh must be committed before it is wrapped in an `Arc`.
#[derive(Debug, Default)]
pub struct Scene {
    static_meshes: SlotMap<StaticMeshHandle, Arc<StaticMesh>>,
    instanced_meshes: SlotMap<InstancedMeshHandle, InstancedMesh>,

    staged_static_removals: Vec<StaticMeshHandle>,
    staged_instanced_removals: Vec<InstancedMeshHandle>,

    committed_static: Vec<StaticMeshHandle>,
    committed_instanced: Vec<InstancedMeshHandle>,

    version: u64,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a static mesh. Takes effect on the next [`Scene::commit`].
    pub fn add_static_mesh(&mut self, mesh: Arc<StaticMesh>) -> StaticMeshHandle {
        self.static_meshes.insert(mesh)
    }

    /// Removes a static mesh. Takes effect on the next [`Scene::commit`].
    pub fn remove_static_mesh(&mut self, handle: StaticMeshHandle) {
        self.staged_static_removals.push(handle);
    }

    /// Adds an instanced mesh. Takes effect on the next [`Scene::commit`].
    pub fn add_instanced_mesh(&mut self, mesh: InstancedMesh) -> InstancedMeshHandle {
        self.instanced_meshes.insert(mesh)
    }

    /// Removes an instanced mesh. Takes effect on the next [`Scene::commit`].
    pub fn remove_instanced_mesh(&mut self, handle: InstancedMeshHandle) {
        self.staged_instanced_removals.push(handle);
    }

    /// Stages a new transform for an instanced mesh. Takes effect on the next
    /// [`Scene::commit`].
    pub fn update_instanced_mesh_transform(
        &mut self,
        handle: InstancedMeshHandle,
        transform: Matrix4x4,
    ) {
        if let Some(mesh) = self.instanced_meshes.get_mut(handle) {
            mesh.update_transform(transform);
        }
    }

    /// Flushes all staged edits and advances the scene version.
    ///
    /// Must be called after any edit before simulation or queries can see the
    /// changes.
    pub fn commit(&mut self) {
        for handle in self.staged_static_removals.drain(..) {
            self.static_meshes.remove(handle);
        }
        for handle in self.staged_instanced_removals.drain(..) {
            self.instanced_meshes.remove(handle);
        }

        for (_, mesh) in self.instanced_meshes.iter_mut() {
            mesh.commit();
        }

        self.committed_static = self.static_meshes.keys().collect();
        self.committed_instanced = self.instanced_meshes.keys().collect();

        self.version += 1;

        log::debug!(
            "scene committed: version {}, {} static, {} instanced",
            self.version,
            self.committed_static.len(),
            self.committed_instanced.len()
        );
    }

    /// The number of commits applied to this scene. Zero for an uncommitted
    /// scene.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_committed(&self) -> bool {
        self.version > 0
    }

    /// Calculates the first intersection between a ray and the committed
    /// scene geometry. The returned hit is at infinite distance on a miss, or
    /// when the scene has not been committed.
    pub fn closest_hit(&self, ray: &Ray, min_distance: f32, max_distance: f32) -> Hit {
        if !self.is_committed() {
            return Hit::default();
        }

        self.closest_hit_internal(ray, min_distance, max_distance)
    }

    pub(crate) fn closest_hit_internal(
        &self,
        ray: &Ray,
        min_distance: f32,
        max_distance: f32,
    ) -> Hit {
        let mut best = Hit::default();
        let mut object_index = 0;

        for handle in &self.committed_static {
            let mesh = &self.static_meshes[*handle];
            let hit = mesh.closest_hit(ray, min_distance, best.distance.min(max_distance));
            if hit.distance < best.distance {
                best = hit;
                best.object_index = object_index;
            }
            object_index += 1;
        }

        for handle in &self.committed_instanced {
            let mesh = &self.instanced_meshes[*handle];
            let hit = mesh.closest_hit(ray, min_distance, best.distance.min(max_distance));
            if hit.distance < best.distance {
                best = hit;
                best.object_index = object_index;
            }
            object_index += 1;
        }

        best
    }

    /// Checks whether a ray hits anything in the committed scene within the
    /// given t interval.
    pub fn any_hit(&self, ray: &Ray, min_distance: f32, max_distance: f32) -> bool {
        if !self.is_committed() {
            return false;
        }

        self.any_hit_internal(ray, min_distance, max_distance)
    }

    pub(crate) fn any_hit_internal(&self, ray: &Ray, min_distance: f32, max_distance: f32) -> bool {
        self.committed_static
            .iter()
            .any(|handle| self.static_meshes[*handle].any_hit(ray, min_distance, max_distance))
            || self.committed_instanced.iter().any(|handle| {
                self.instanced_meshes[*handle].any_hit(ray, min_distance, max_distance)
            })
    }

    /// Checks whether the segment between two points is occluded by committed
    /// scene geometry.
    pub fn is_occluded(&self, start: Vector3, end: Vector3) -> bool {
        if !self.is_committed() {
            return false;
        }

        self.is_occluded_internal(start, end)
    }

    pub(crate) fn is_occluded_internal(&self, start: Vector3, end: Vector3) -> bool {
        self.committed_static
            .iter()
            .any(|handle| self.static_meshes[*handle].is_occluded(start, end))
            || self
                .committed_instanced
                .iter()
                .any(|handle| self.instanced_meshes[*handle].is_occluded(start, end))
    }

    /// Checks whether the given box overlaps any committed scene geometry.
    /// Used by the probe generator.
    pub fn box_intersects_geometry(&self, aabb: &crate::geometry::Aabb) -> bool {
        if !self.is_committed() {
            return false;
        }

        self.committed_static
            .iter()
            .any(|handle| self.static_meshes[*handle].box_intersects_mesh(aabb))
    }

    /// Axis-aligned bounds of all committed static geometry.
    pub fn bounds(&self) -> crate::geometry::Aabb {
        let mut bounds = crate::geometry::Aabb::EMPTY;
        for handle in &self.committed_static {
            bounds.grow_to_contain(&self.static_meshes[*handle].bounds());
        }
        bounds
    }

    /// Saves the committed static geometry of this scene to a serialized
    /// object. Instanced meshes are runtime constructs and are not
    /// serialized.
    pub fn save(&self, serialized_object: &mut crate::serialized_object::SerializedObject) {
        serialized_object.write_u64(self.committed_static.len() as u64);
        for handle in &self.committed_static {
            self.static_meshes[*handle].save(serialized_object);
        }
    }

    /// Loads a scene from a serialized object, rebuilding all BVHs. The
    /// returned scene is uncommitted.
    pub fn load(
        serialized_object: &mut crate::serialized_object::SerializedObject,
    ) -> Result<Self, crate::serialized_object::SerializeError> {
        serialized_object.check_header()?;

        let num_meshes = serialized_object.read_length()?;
        let mut scene = Self::new();
        for _ in 0..num_meshes {
            let mesh = StaticMesh::load(serialized_object)?;
            scene.add_static_mesh(Arc::new(mesh));
        }

        Ok(scene)
    }

    /// Batched closest-hit query.
    pub fn closest_hits(
        &self,
        rays: &[Ray],
        min_distances: &[f32],
        max_distances: &[f32],
        hits: &mut [Hit],
    ) {
        for (((ray, &min), &max), hit) in rays
            .iter()
            .zip(min_distances)
            .zip(max_distances)
            .zip(hits.iter_mut())
        {
            *hit = self.closest_hit(ray, min, max);
        }
    }

    /// Batched any-hit query.
    pub fn any_hits(
        &self,
        rays: &[Ray],
        min_distances: &[f32],
        max_distances: &[f32],
        occluded: &mut [bool],
    ) {
        for (((ray, &min), &max), flag) in rays
            .iter()
            .zip(min_distances)
            .zip(max_distances)
            .zip(occluded.iter_mut())
        {
            *flag = self.any_hit(ray, min, max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Material, Triangle};

    pub(crate) fn floor_mesh() -> Arc<StaticMesh> {
        Arc::new(
            StaticMesh::try_new(&StaticMeshSettings {
                vertices: &[
                    Vector3::new(-10.0, 0.0, -10.0),
                    Vector3::new(10.0, 0.0, -10.0),
                    Vector3::new(10.0, 0.0, 10.0),
                    Vector3::new(-10.0, 0.0, 10.0),
                ],
                triangles: &[Triangle::new(0, 1, 2), Triangle::new(0, 2, 3)],
                material_indices: &[0, 0],
                materials: &[Material::CONCRETE],
            })
            .unwrap(),
        )
    }

    #[test]
    fn test_uncommitted_scene_reports_no_hits() {
        let mut scene = Scene::new();
        scene.add_static_mesh(floor_mesh());

        let ray = Ray::new(Vector3::new(0.0, 5.0, 0.0), Vector3::new(0.0, -1.0, 0.0));
        assert!(!scene.closest_hit(&ray, 0.0, f32::MAX).is_valid());

        scene.commit();
        assert!(scene.closest_hit(&ray, 0.0, f32::MAX).is_valid());
    }

    #[test]
    fn test_commit_increments_version() {
        let mut scene = Scene::new();
        assert_eq!(scene.version(), 0);
        scene.commit();
        scene.commit();
        assert_eq!(scene.version(), 2);
    }

    #[test]
    fn test_removal_takes_effect_at_commit() {
        let mut scene = Scene::new();
        let handle = scene.add_static_mesh(floor_mesh());
        scene.commit();

        let ray = Ray::new(Vector3::new(0.0, 5.0, 0.0), Vector3::new(0.0, -1.0, 0.0));
        assert!(scene.closest_hit(&ray, 0.0, f32::MAX).is_valid());

        scene.remove_static_mesh(handle);
        assert!(scene.closest_hit(&ray, 0.0, f32::MAX).is_valid());

        scene.commit();
        assert!(!scene.closest_hit(&ray, 0.0, f32::MAX).is_valid());
    }

    #[test]
    fn test_instanced_mesh_transforms_hits() {
        let mut sub_scene = Scene::new();
        sub_scene.add_static_mesh(floor_mesh());
        sub_scene.commit();

        let mut scene = Scene::new();
        let instanced = InstancedMesh::try_new(InstancedMeshSettings {
            sub_scene: Arc::new(sub_scene),
            transform: Matrix4x4::translation(Vector3::new(0.0, 2.0, 0.0)),
        })
        .unwrap();
        scene.add_instanced_mesh(instanced);
        scene.commit();

        // The floor has been raised to y = 2.
        let ray = Ray::new(Vector3::new(0.0, 5.0, 0.0), Vector3::new(0.0, -1.0, 0.0));
        let hit = scene.closest_hit(&ray, 0.0, f32::MAX);

        assert!(hit.is_valid());
        approx::assert_relative_eq!(hit.distance, 3.0, epsilon = 1e-4);
    }
}
