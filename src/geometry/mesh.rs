use super::{Triangle, Vector3, Vector4};
use crate::serialized_object::{SerializeError, SerializedObject};

/// A triangle mesh.
///
/// Vertices are stored in a contiguous array, and triangles are stored in
/// indexed form; each triangle requires three indices (strip and fan
/// representations are not supported). Vertices are stored 4-wide for SIMD
/// alignment. Geometric normals are cached per triangle and recomputed
/// whenever vertices or indices are rewritten.
#[derive(Debug, Clone)]
pub struct Mesh {
    vertices: Vec<Vector4>,
    triangles: Vec<Triangle>,
    normals: Vec<Vector3>,
}

impl Mesh {
    pub fn new(vertices: &[Vector3], triangles: &[Triangle]) -> Self {
        let mut mesh = Self {
            vertices: vertices.iter().map(|&v| Vector4::from(v)).collect(),
            triangles: triangles.to_vec(),
            normals: vec![Vector3::ZERO; triangles.len()],
        };

        mesh.calc_normals();
        mesh
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }

    pub fn vertex(&self, index: usize) -> Vector3 {
        self.vertices[index].xyz()
    }

    pub fn triangle(&self, index: usize) -> Triangle {
        self.triangles[index]
    }

    pub fn triangle_vertex(&self, triangle_index: usize, vertex_index: usize) -> Vector3 {
        self.vertex(self.triangles[triangle_index].indices[vertex_index] as usize)
    }

    /// The cached geometric normal of a triangle.
    pub fn normal(&self, triangle_index: usize) -> Vector3 {
        self.normals[triangle_index]
    }

    /// Replaces the vertex array. Normals are recomputed.
    pub fn set_vertices(&mut self, vertices: &[Vector3]) {
        self.vertices = vertices.iter().map(|&v| Vector4::from(v)).collect();
        self.calc_normals();
    }

    /// Replaces the triangle array. Normals are recomputed.
    pub fn set_triangles(&mut self, triangles: &[Triangle]) {
        self.triangles = triangles.to_vec();
        self.normals.resize(triangles.len(), Vector3::ZERO);
        self.calc_normals();
    }

    fn calc_normals(&mut self) {
        for i in 0..self.triangles.len() {
            let v0 = self.triangle_vertex(i, 0);
            let v1 = self.triangle_vertex(i, 1);
            let v2 = self.triangle_vertex(i, 2);

            self.normals[i] = Vector3::cross(v1 - v0, v2 - v0).normalized();
        }
    }

    pub fn save(&self, serialized_object: &mut SerializedObject) {
        serialized_object.write_u64(self.vertices.len() as u64);
        for vertex in &self.vertices {
            serialized_object.write_f32(vertex.x);
            serialized_object.write_f32(vertex.y);
            serialized_object.write_f32(vertex.z);
        }

        serialized_object.write_u64(self.triangles.len() as u64);
        for triangle in &self.triangles {
            for index in triangle.indices {
                serialized_object.write_u32(index);
            }
        }
    }

    pub fn load(serialized_object: &mut SerializedObject) -> Result<Self, SerializeError> {
        let num_vertices = serialized_object.read_nonzero_length()?;
        let mut vertices = Vec::with_capacity(num_vertices);
        for _ in 0..num_vertices {
            let x = serialized_object.read_f32()?;
            let y = serialized_object.read_f32()?;
            let z = serialized_object.read_f32()?;
            vertices.push(Vector3::new(x, y, z));
        }

        let num_triangles = serialized_object.read_nonzero_length()?;
        let mut triangles = Vec::with_capacity(num_triangles);
        for _ in 0..num_triangles {
            let v0 = serialized_object.read_u32()?;
            let v1 = serialized_object.read_u32()?;
            let v2 = serialized_object.read_u32()?;
            triangles.push(Triangle::new(v0, v1, v2));
        }

        Ok(Self::new(&vertices, &triangles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normals_follow_winding() {
        let mesh = Mesh::new(
            &[
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
            &[Triangle::new(0, 1, 2)],
        );

        assert_relative_eq!(mesh.normal(0).z, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_normals_recomputed_on_rewrite() {
        let mut mesh = Mesh::new(
            &[
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
            &[Triangle::new(0, 1, 2)],
        );

        // Reverse the winding; the normal must flip.
        mesh.set_triangles(&[Triangle::new(0, 2, 1)]);
        assert_relative_eq!(mesh.normal(0).z, -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_serialization_round_trip() {
        let mesh = Mesh::new(
            &[
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
            &[Triangle::new(0, 1, 2)],
        );

        let mut serialized = SerializedObject::new();
        mesh.save(&mut serialized);

        let mut reader = SerializedObject::from_bytes(serialized.data().to_vec());
        let loaded = Mesh::load(&mut reader).unwrap();

        assert_eq!(loaded.num_vertices(), 3);
        assert_eq!(loaded.num_triangles(), 1);
        assert_eq!(loaded.vertex(1), Vector3::new(1.0, 0.0, 0.0));
    }
}
