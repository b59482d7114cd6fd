/// A triangle in 3D space.
///
/// Triangles are specified by their three vertices, which are in turn
/// specified by indices into a vertex array. The engine uses a right-handed
/// coordinate system, so triangle indices should be counter-clockwise when
/// seen from outside the geometry.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct Triangle {
    /// Indices of the three vertices of this triangle.
    pub indices: [u32; 3],
}

impl Triangle {
    pub const fn new(v0: u32, v1: u32, v2: u32) -> Self {
        Self {
            indices: [v0, v1, v2],
        }
    }
}
