use super::bvh::Bvh;
use crate::error::EchofieldError;
use crate::geometry::{Aabb, Hit, Material, Mesh, Ray, Triangle, Vector3};
use crate::serialized_object::{SerializeError, SerializedObject};

/// A triangle mesh that doesn't move or deform in any way.
///
/// The unchanging portions of a scene should typically be collected into a
/// single static mesh object. In addition to the geometry, a static mesh
/// contains acoustic material information for each triangle.
#[derive(Debug)]
pub struct StaticMesh {
    mesh: Mesh,
    material_indices: Vec<usize>,
    materials: Vec<Material>,
    bvh: Bvh,
}

impl StaticMesh {
    /// Creates a new static mesh. Builds the BVH immediately.
    ///
    /// # Errors
    ///
    /// Returns [`EchofieldError::InvalidArgument`] if any array is empty, if
    /// `material_indices` does not have one entry per triangle, or if any
    /// material index is out of range.
    pub fn try_new(settings: &StaticMeshSettings) -> Result<Self, EchofieldError> {
        if settings.vertices.is_empty()
            || settings.triangles.is_empty()
            || settings.materials.is_empty()
            || settings.material_indices.len() != settings.triangles.len()
        {
            return Err(EchofieldError::InvalidArgument);
        }

        if settings
            .material_indices
            .iter()
            .any(|&index| index >= settings.materials.len())
        {
            return Err(EchofieldError::InvalidArgument);
        }

        let mesh = Mesh::new(settings.vertices, settings.triangles);
        let bvh = Bvh::new(&mesh);

        Ok(Self {
            mesh,
            material_indices: settings.material_indices.to_vec(),
            materials: settings.materials.to_vec(),
            bvh,
        })
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn num_triangles(&self) -> usize {
        self.mesh.num_triangles()
    }

    pub fn material(&self, triangle_index: usize) -> &Material {
        &self.materials[self.material_indices[triangle_index]]
    }

    pub(crate) fn closest_hit(&self, ray: &Ray, min_distance: f32, max_distance: f32) -> Hit {
        let mut hit = self.bvh.closest_hit(ray, &self.mesh, min_distance, max_distance);

        if hit.is_valid() {
            let triangle_index = hit.triangle_index as usize;
            hit.material_index = self.material_indices[triangle_index] as i32;
            hit.material = Some(self.materials[self.material_indices[triangle_index]]);
            hit.normal = self.mesh.normal(triangle_index);
        }

        hit
    }

    pub(crate) fn any_hit(&self, ray: &Ray, min_distance: f32, max_distance: f32) -> bool {
        self.bvh.any_hit(ray, &self.mesh, min_distance, max_distance)
    }

    pub(crate) fn is_occluded(&self, start: Vector3, end: Vector3) -> bool {
        self.bvh.is_occluded(start, end, &self.mesh)
    }

    pub(crate) fn box_intersects_mesh(&self, aabb: &Aabb) -> bool {
        self.bvh.box_intersects_mesh(aabb, &self.mesh)
    }

    /// Axis-aligned bounds of the whole mesh.
    pub fn bounds(&self) -> Aabb {
        self.bvh.node(0).bounding_box()
    }

    /// Saves this static mesh to a serialized object.
    pub fn save(&self, serialized_object: &mut SerializedObject) {
        self.mesh.save(serialized_object);

        serialized_object.write_u64(self.materials.len() as u64);
        for material in &self.materials {
            for value in material.absorption {
                serialized_object.write_f32(value);
            }
            serialized_object.write_f32(material.scattering);
            for value in material.transmission {
                serialized_object.write_f32(value);
            }
        }

        serialized_object.write_u64(self.material_indices.len() as u64);
        for &index in &self.material_indices {
            serialized_object.write_u32(index as u32);
        }
    }

    /// Loads a static mesh from a serialized object, rebuilding the BVH.
    pub fn load(serialized_object: &mut SerializedObject) -> Result<Self, SerializeError> {
        let mesh = Mesh::load(serialized_object)?;

        let num_materials = serialized_object.read_nonzero_length()?;
        let mut materials = Vec::with_capacity(num_materials);
        for _ in 0..num_materials {
            let mut material = Material::default();
            for value in &mut material.absorption {
                *value = serialized_object.read_f32()?;
            }
            material.scattering = serialized_object.read_f32()?;
            for value in &mut material.transmission {
                *value = serialized_object.read_f32()?;
            }
            materials.push(material);
        }

        let num_indices = serialized_object.read_nonzero_length()?;
        let mut material_indices = Vec::with_capacity(num_indices);
        for _ in 0..num_indices {
            material_indices.push(serialized_object.read_u32()? as usize);
        }

        let vertices: Vec<Vector3> = (0..mesh.num_vertices()).map(|i| mesh.vertex(i)).collect();
        let triangles: Vec<Triangle> =
            (0..mesh.num_triangles()).map(|i| mesh.triangle(i)).collect();

        StaticMesh::try_new(&StaticMeshSettings {
            vertices: &vertices,
            triangles: &triangles,
            material_indices: &material_indices,
            materials: &materials,
        })
        .map_err(|_| SerializeError::EmptyArray { offset: 0 })
    }
}

/// Settings used to create a static mesh.
#[derive(Default, Debug)]
pub struct StaticMeshSettings<'a> {
    /// Array containing vertices.
    pub vertices: &'a [Vector3],

    /// Array containing (indexed) triangles.
    pub triangles: &'a [Triangle],

    /// Array containing, for each triangle, the index of the associated
    /// material.
    pub material_indices: &'a [usize],

    /// Array of materials.
    pub materials: &'a [Material],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floor() -> StaticMesh {
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
        .unwrap()
    }

    #[test]
    fn test_hit_carries_material() {
        let mesh = floor();
        let ray = Ray::new(Vector3::new(0.0, 5.0, 0.0), Vector3::new(0.0, -1.0, 0.0));
        let hit = mesh.closest_hit(&ray, 0.0, f32::MAX);

        assert!(hit.is_valid());
        assert_eq!(hit.material_index, 0);
        assert_eq!(hit.material.unwrap(), Material::CONCRETE);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let result = StaticMesh::try_new(&StaticMeshSettings {
            vertices: &[Vector3::ZERO],
            triangles: &[Triangle::new(0, 0, 0)],
            material_indices: &[3],
            materials: &[Material::default()],
        });

        assert_eq!(result.unwrap_err(), EchofieldError::InvalidArgument);
    }
}
