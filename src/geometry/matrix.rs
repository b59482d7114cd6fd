use super::Vector3;

/// A 4×4 matrix, in row-major order.
///
/// Used to position instanced meshes within a scene. Transforms at the API
/// boundary may be supplied column-major; use [`Matrix4x4::transposed`] to
/// convert.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Matrix4x4 {
    pub elements: [[f32; 4]; 4],
}

impl Matrix4x4 {
    pub const IDENTITY: Self = Self {
        elements: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub const fn new(elements: [[f32; 4]; 4]) -> Self {
        Self { elements }
    }

    /// A translation by `offset`.
    pub fn translation(offset: Vector3) -> Self {
        let mut m = Self::IDENTITY;
        m.elements[0][3] = offset.x;
        m.elements[1][3] = offset.y;
        m.elements[2][3] = offset.z;
        m
    }

    pub fn transposed(&self) -> Self {
        let mut out = Self::IDENTITY;
        for (i, row) in self.elements.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                out.elements[j][i] = *value;
            }
        }
        out
    }

    /// Transforms a point, applying the translation column.
    pub fn transform_point(&self, p: Vector3) -> Vector3 {
        let e = &self.elements;
        Vector3::new(
            e[0][0] * p.x + e[0][1] * p.y + e[0][2] * p.z + e[0][3],
            e[1][0] * p.x + e[1][1] * p.y + e[1][2] * p.z + e[1][3],
            e[2][0] * p.x + e[2][1] * p.y + e[2][2] * p.z + e[2][3],
        )
    }

    /// Transforms a direction, ignoring the translation column.
    pub fn transform_direction(&self, d: Vector3) -> Vector3 {
        let e = &self.elements;
        Vector3::new(
            e[0][0] * d.x + e[0][1] * d.y + e[0][2] * d.z,
            e[1][0] * d.x + e[1][1] * d.y + e[1][2] * d.z,
            e[2][0] * d.x + e[2][1] * d.y + e[2][2] * d.z,
        )
    }

    pub fn multiply(a: &Self, b: &Self) -> Self {
        let mut out = Self::new([[0.0; 4]; 4]);
        for i in 0..4 {
            for j in 0..4 {
                let mut sum = 0.0;
                for (k, b_row) in b.elements.iter().enumerate() {
                    sum += a.elements[i][k] * b_row[j];
                }
                out.elements[i][j] = sum;
            }
        }
        out
    }

    /// Returns the inverse, or `None` if the matrix is singular.
    pub fn inverse(&self) -> Option<Self> {
        // Gauss-Jordan elimination with partial pivoting.
        let mut a = self.elements;
        let mut inv = Self::IDENTITY.elements;

        for col in 0..4 {
            let mut pivot = col;
            for row in (col + 1)..4 {
                if a[row][col].abs() > a[pivot][col].abs() {
                    pivot = row;
                }
            }

            if a[pivot][col].abs() <= f32::EPSILON {
                return None;
            }

            a.swap(col, pivot);
            inv.swap(col, pivot);

            let scale = 1.0 / a[col][col];
            for j in 0..4 {
                a[col][j] *= scale;
                inv[col][j] *= scale;
            }

            for row in 0..4 {
                if row == col {
                    continue;
                }

                let factor = a[row][col];
                for j in 0..4 {
                    a[row][j] -= factor * a[col][j];
                    inv[row][j] -= factor * inv[col][j];
                }
            }
        }

        Some(Self::new(inv))
    }
}

impl Default for Matrix4x4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_translation_transforms_points_not_directions() {
        let m = Matrix4x4::translation(Vector3::new(1.0, 2.0, 3.0));
        let p = m.transform_point(Vector3::ZERO);
        assert_eq!(p, Vector3::new(1.0, 2.0, 3.0));

        let d = m.transform_direction(Vector3::UNIT_X);
        assert_eq!(d, Vector3::UNIT_X);
    }

    #[test]
    fn test_inverse() {
        let m = Matrix4x4::translation(Vector3::new(4.0, -1.0, 2.0));
        let inv = m.inverse().unwrap();
        let p = inv.transform_point(m.transform_point(Vector3::new(1.0, 1.0, 1.0)));
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-5);
        assert_relative_eq!(p.z, 1.0, epsilon = 1e-5);
    }
}
