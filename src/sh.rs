//! Real spherical harmonics.
//!
//! Channels are ordered ACN (`index = l(l+1) + m`), normalized so that the
//! basis is orthonormal over the sphere (N3D), with the Condon-Shortley phase
//! included in the associated Legendre polynomials. The polar axis is +z,
//! with azimuth measured from +x towards +y.

use crate::geometry::{CoordinateSpace3, Vector3};

/// Number of spherical harmonic coefficients for a given Ambisonic order.
pub const fn num_coeffs_for_order(order: usize) -> usize {
    (order + 1) * (order + 1)
}

/// ACN channel index for degree `l` and order `m`.
pub const fn index_for_degree_and_order(l: i32, m: i32) -> usize {
    (l * (l + 1) + m) as usize
}

/// Associated Legendre polynomial P_l^m(x) for m >= 0, including the
/// Condon-Shortley phase.
fn legendre(l: i32, m: i32, x: f64) -> f64 {
    let mut pmm = 1.0;
    if m > 0 {
        let somx2 = ((1.0 - x) * (1.0 + x)).sqrt();
        let mut fact = 1.0;
        for _ in 1..=m {
            pmm *= -fact * somx2;
            fact += 2.0;
        }
    }

    if l == m {
        return pmm;
    }

    let mut pmmp1 = x * (2 * m + 1) as f64 * pmm;
    if l == m + 1 {
        return pmmp1;
    }

    let mut pll = 0.0;
    for ll in (m + 2)..=l {
        pll = ((2 * ll - 1) as f64 * x * pmmp1 - (ll + m - 1) as f64 * pmm) / (ll - m) as f64;
        pmm = pmmp1;
        pmmp1 = pll;
    }

    pll
}

fn factorial(n: i32) -> f64 {
    (2..=n as i64).map(|x| x as f64).product()
}

fn normalization(l: i32, m: i32) -> f64 {
    ((2 * l + 1) as f64 * factorial(l - m)
        / (4.0 * std::f64::consts::PI * factorial(l + m)))
    .sqrt()
}

/// Evaluates the real spherical harmonic Y_l^m in the given direction.
///
/// The direction need not be normalized. Coefficients are computed in double
/// precision and cast to single at the output.
pub fn evaluate(l: i32, m: i32, direction: Vector3) -> f32 {
    let d = direction.normalized();
    let (x, y, z) = (d.x as f64, d.y as f64, d.z as f64);

    // Degenerate direction: only the omni term is nonzero.
    if x == 0.0 && y == 0.0 && z == 0.0 {
        return if l == 0 && m == 0 {
            normalization(0, 0) as f32
        } else {
            0.0
        };
    }

    let cos_theta = z;
    let phi = y.atan2(x);

    let abs_m = m.abs();
    let kml = normalization(l, abs_m);
    let p = legendre(l, abs_m, cos_theta);

    let value = if m == 0 {
        kml * p
    } else if m > 0 {
        std::f64::consts::SQRT_2 * kml * p * (abs_m as f64 * phi).cos()
    } else {
        std::f64::consts::SQRT_2 * kml * p * (abs_m as f64 * phi).sin()
    };

    value as f32
}

/// Projects a single point source in the given direction onto the SH basis,
/// accumulating `gain * Y_i(direction)` into each coefficient.
pub fn project_single_point_and_update(
    direction: Vector3,
    order: usize,
    gain: f32,
    coeffs: &mut [f32],
) {
    assert!(coeffs.len() >= num_coeffs_for_order(order));

    for l in 0..=order as i32 {
        for m in -l..=l {
            coeffs[index_for_degree_and_order(l, m)] += gain * evaluate(l, m, direction);
        }
    }
}

/// Evaluates an SH expansion in the given direction:
/// `sum_i coeffs[i] * Y_i(direction)`.
pub fn evaluate_sum(order: usize, coeffs: &[f32], direction: Vector3) -> f32 {
    assert!(coeffs.len() >= num_coeffs_for_order(order));

    let mut sum = 0.0;
    for l in 0..=order as i32 {
        for m in -l..=l {
            sum += coeffs[index_for_degree_and_order(l, m)] * evaluate(l, m, direction);
        }
    }

    sum
}

/// A rotation of SH coefficients, computed per degree with the
/// Ivanic-Ruedenberg recursion.
///
/// The recursion for higher degrees is numerically sensitive, so all
/// coefficients are computed in double precision and cast to single only when
/// applied.
#[derive(Debug, Clone)]
pub struct ShRotation {
    order: usize,
    // bands[l] is a (2l+1) x (2l+1) matrix in row-major order, indices offset
    // by l so that m, n range over -l..=l.
    bands: Vec<Vec<f64>>,
}

impl ShRotation {
    /// Computes the SH rotation corresponding to a listener orientation.
    ///
    /// Applying the rotation re-expresses a world-space sound field in the
    /// listener's frame.
    pub fn new(order: usize, listener: &CoordinateSpace3) -> Self {
        // World-to-local rotation: rows are the listener basis vectors, with
        // the local z-axis opposite `ahead`.
        let rows = [listener.right, listener.up, -listener.ahead];
        let r = [
            [rows[0].x as f64, rows[0].y as f64, rows[0].z as f64],
            [rows[1].x as f64, rows[1].y as f64, rows[1].z as f64],
            [rows[2].x as f64, rows[2].y as f64, rows[2].z as f64],
        ];

        Self::from_rotation_matrix(order, &r)
    }

    /// Computes the SH rotation for a 3×3 world-to-local rotation matrix.
    pub fn from_rotation_matrix(order: usize, r: &[[f64; 3]; 3]) -> Self {
        let mut bands = Vec::with_capacity(order + 1);

        // l = 0: the omni channel is rotation invariant.
        bands.push(vec![1.0]);

        if order >= 1 {
            // l = 1 in SH basis ordering (y, z, x).
            let map = [1usize, 2, 0];
            let mut m1 = vec![0.0; 9];
            for i in 0..3 {
                for j in 0..3 {
                    m1[i * 3 + j] = r[map[i]][map[j]];
                }
            }
            bands.push(m1);
        }

        for l in 2..=order as i32 {
            let dim = (2 * l + 1) as usize;
            let mut band = vec![0.0; dim * dim];

            for m in -l..=l {
                for n in -l..=l {
                    band[((m + l) * (2 * l + 1) + (n + l)) as usize] =
                        Self::entry(&bands, l, m, n);
                }
            }

            bands.push(band);
        }

        Self {
            order,
            bands,
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    fn band_get(bands: &[Vec<f64>], l: i32, m: i32, n: i32) -> f64 {
        bands[l as usize][((m + l) * (2 * l + 1) + (n + l)) as usize]
    }

    // Ivanic-Ruedenberg recursion terms. See:
    //  Rotation Matrices for Real Spherical Harmonics
    //  J. Ivanic, K. Ruedenberg
    //  J. Phys. Chem., 1996
    fn p(bands: &[Vec<f64>], i: i32, a: i32, b: i32, l: i32) -> f64 {
        if b == l {
            Self::band_get(bands, 1, i, 1) * Self::band_get(bands, l - 1, a, l - 1)
                - Self::band_get(bands, 1, i, -1) * Self::band_get(bands, l - 1, a, -l + 1)
        } else if b == -l {
            Self::band_get(bands, 1, i, 1) * Self::band_get(bands, l - 1, a, -l + 1)
                + Self::band_get(bands, 1, i, -1) * Self::band_get(bands, l - 1, a, l - 1)
        } else {
            Self::band_get(bands, 1, i, 0) * Self::band_get(bands, l - 1, a, b)
        }
    }

    fn u(bands: &[Vec<f64>], m: i32, n: i32, l: i32) -> f64 {
        Self::p(bands, 0, m, n, l)
    }

    fn v(bands: &[Vec<f64>], m: i32, n: i32, l: i32) -> f64 {
        if m == 0 {
            Self::p(bands, 1, 1, n, l) + Self::p(bands, -1, -1, n, l)
        } else if m > 0 {
            let d: f64 = if m == 1 { 1.0 } else { 0.0 };
            Self::p(bands, 1, m - 1, n, l) * (1.0 + d).sqrt()
                - Self::p(bands, -1, -m + 1, n, l) * (1.0 - d)
        } else {
            let d: f64 = if m == -1 { 1.0 } else { 0.0 };
            Self::p(bands, 1, m + 1, n, l) * (1.0 - d)
                + Self::p(bands, -1, -m - 1, n, l) * (1.0 + d).sqrt()
        }
    }

    fn w(bands: &[Vec<f64>], m: i32, n: i32, l: i32) -> f64 {
        if m == 0 {
            0.0
        } else if m > 0 {
            Self::p(bands, 1, m + 1, n, l) + Self::p(bands, -1, -m - 1, n, l)
        } else {
            Self::p(bands, 1, m - 1, n, l) - Self::p(bands, -1, -m + 1, n, l)
        }
    }

    fn entry(bands: &[Vec<f64>], l: i32, m: i32, n: i32) -> f64 {
        let denominator = if n.abs() < l {
            ((l + n) * (l - n)) as f64
        } else {
            ((2 * l) * (2 * l - 1)) as f64
        };

        let abs_m = m.abs();
        let u = (((l + m) * (l - m)) as f64 / denominator).sqrt();
        let v = 0.5
            * ((1.0 + if m == 0 { 1.0 } else { 0.0 }) * ((l + abs_m - 1) * (l + abs_m)) as f64
                / denominator)
                .sqrt()
            * (1.0 - 2.0 * if m == 0 { 1.0 } else { 0.0 });
        let w = -0.5 * (((l - abs_m - 1) * (l - abs_m)) as f64 / denominator).sqrt()
            * (1.0 - if m == 0 { 1.0 } else { 0.0 });

        let mut value = 0.0;
        if u != 0.0 {
            value += u * Self::u(bands, m, n, l);
        }
        if v != 0.0 {
            value += v * Self::v(bands, m, n, l);
        }
        if w != 0.0 {
            value += w * Self::w(bands, m, n, l);
        }

        value
    }

    /// Rotates a coefficient vector.
    pub fn apply(&self, input: &[f32], output: &mut [f32]) {
        let num_coeffs = num_coeffs_for_order(self.order);
        assert!(input.len() >= num_coeffs && output.len() >= num_coeffs);

        for l in 0..=self.order as i32 {
            for m in -l..=l {
                let mut sum = 0.0;
                for n in -l..=l {
                    sum += Self::band_get(&self.bands, l, m, n)
                        * input[index_for_degree_and_order(l, n)] as f64;
                }
                output[index_for_degree_and_order(l, m)] = sum as f32;
            }
        }
    }
}

impl Default for ShRotation {
    fn default() -> Self {
        Self::new(0, &CoordinateSpace3::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_acn_indexing() {
        assert_eq!(index_for_degree_and_order(0, 0), 0);
        assert_eq!(index_for_degree_and_order(1, -1), 1);
        assert_eq!(index_for_degree_and_order(1, 0), 2);
        assert_eq!(index_for_degree_and_order(1, 1), 3);
        assert_eq!(index_for_degree_and_order(2, -2), 4);
        assert_eq!(index_for_degree_and_order(2, 2), 8);
        assert_eq!(num_coeffs_for_order(3), 16);
    }

    #[test]
    fn test_low_degree_closed_forms() {
        let pi = std::f64::consts::PI;
        let d = Vector3::new(0.3, -0.5, 0.9).normalized();

        // Y_0^0 = 0.5 sqrt(1/pi)
        assert_relative_eq!(
            evaluate(0, 0, d),
            (0.5 * (1.0 / pi).sqrt()) as f32,
            epsilon = 1e-6
        );

        // Y_1^{-1} = sqrt(3/(4 pi)) y, Y_1^0 = sqrt(3/(4 pi)) z,
        // Y_1^1 = sqrt(3/(4 pi)) x.
        let k = ((3.0 / (4.0 * pi)) as f64).sqrt() as f32;
        assert_relative_eq!(evaluate(1, -1, d), k * d.y, epsilon = 1e-5);
        assert_relative_eq!(evaluate(1, 0, d), k * d.z, epsilon = 1e-5);
        assert_relative_eq!(evaluate(1, 1, d), k * d.x, epsilon = 1e-5);

        // Y_2^0 = 0.25 sqrt(5/pi) (3z^2 - 1)
        let k2 = (0.25 * (5.0 / pi).sqrt()) as f32;
        assert_relative_eq!(
            evaluate(2, 0, d),
            k2 * (3.0 * d.z * d.z - 1.0),
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_identity_rotation() {
        let rotation = ShRotation::new(3, &CoordinateSpace3::default());

        let input: Vec<f32> = (0..16).map(|i| (i as f32 * 0.37).sin()).collect();
        let mut output = vec![0.0f32; 16];
        rotation.apply(&input, &mut output);

        for (a, b) in input.iter().zip(output.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_rotation_matches_direct_evaluation() {
        // Rotating the coefficients of a point source must equal projecting
        // the rotated source direction.
        let listener = CoordinateSpace3::from_ahead_and_up(
            Vector3::new(1.0, 0.2, -0.4),
            Vector3::UNIT_Y,
            Vector3::ZERO,
        );
        let order = 3;

        let source_direction = Vector3::new(-0.3, 0.8, 0.5).normalized();

        let mut world_coeffs = vec![0.0f32; num_coeffs_for_order(order)];
        project_single_point_and_update(source_direction, order, 1.0, &mut world_coeffs);

        let rotation = ShRotation::new(order, &listener);
        let mut rotated = vec![0.0f32; num_coeffs_for_order(order)];
        rotation.apply(&world_coeffs, &mut rotated);

        let local_direction = listener.direction_to_local(source_direction);
        let mut expected = vec![0.0f32; num_coeffs_for_order(order)];
        project_single_point_and_update(local_direction, order, 1.0, &mut expected);

        for (a, b) in rotated.iter().zip(expected.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_rotation_preserves_energy() {
        let listener = CoordinateSpace3::from_ahead(Vector3::new(0.5, -0.3, 0.8), Vector3::ZERO);
        let rotation = ShRotation::new(2, &listener);

        let input: Vec<f32> = (0..9).map(|i| (i as f32 * 1.3).cos()).collect();
        let mut output = vec![0.0f32; 9];
        rotation.apply(&input, &mut output);

        let energy_in: f32 = input.iter().map(|x| x * x).sum();
        let energy_out: f32 = output.iter().map(|x| x * x).sum();
        assert_relative_eq!(energy_in, energy_out, max_relative = 1e-4);
    }
}
