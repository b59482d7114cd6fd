//! Vectorized kernels over f32 arrays.
//!
//! All per-band and per-sample arithmetic in the DSP pipeline goes through
//! these helpers, which process the bulk of each array 4 lanes at a time and
//! finish the remainder with scalar code.

use wide::f32x4;

fn split4(data: &[f32]) -> (&[f32], &[f32]) {
    let vector_len = data.len() & !3;
    data.split_at(vector_len)
}

/// `out[i] = a[i] + b[i]`
pub fn add(a: &[f32], b: &[f32], out: &mut [f32]) {
    assert!(a.len() == b.len() && a.len() == out.len());

    let chunks = a.len() / 4;
    for i in 0..chunks {
        let offset = 4 * i;
        let va = f32x4::from(<[f32; 4]>::try_from(&a[offset..offset + 4]).unwrap());
        let vb = f32x4::from(<[f32; 4]>::try_from(&b[offset..offset + 4]).unwrap());
        out[offset..offset + 4].copy_from_slice(&(va + vb).to_array());
    }

    for i in (chunks * 4)..a.len() {
        out[i] = a[i] + b[i];
    }
}

/// `out[i] = a[i] * b[i]`
pub fn multiply(a: &[f32], b: &[f32], out: &mut [f32]) {
    assert!(a.len() == b.len() && a.len() == out.len());

    let chunks = a.len() / 4;
    for i in 0..chunks {
        let offset = 4 * i;
        let va = f32x4::from(<[f32; 4]>::try_from(&a[offset..offset + 4]).unwrap());
        let vb = f32x4::from(<[f32; 4]>::try_from(&b[offset..offset + 4]).unwrap());
        out[offset..offset + 4].copy_from_slice(&(va * vb).to_array());
    }

    for i in (chunks * 4)..a.len() {
        out[i] = a[i] * b[i];
    }
}

/// `out[i] += a[i] * b[i]`
pub fn multiply_accumulate(a: &[f32], b: &[f32], out: &mut [f32]) {
    assert!(a.len() == b.len() && a.len() == out.len());

    let chunks = a.len() / 4;
    for i in 0..chunks {
        let offset = 4 * i;
        let va = f32x4::from(<[f32; 4]>::try_from(&a[offset..offset + 4]).unwrap());
        let vb = f32x4::from(<[f32; 4]>::try_from(&b[offset..offset + 4]).unwrap());
        let vout = f32x4::from(<[f32; 4]>::try_from(&out[offset..offset + 4]).unwrap());
        out[offset..offset + 4].copy_from_slice(&va.mul_add(vb, vout).to_array());
    }

    for i in (chunks * 4)..a.len() {
        out[i] += a[i] * b[i];
    }
}

/// `out[i] = a[i] * scalar`
pub fn scale(a: &[f32], scalar: f32, out: &mut [f32]) {
    assert_eq!(a.len(), out.len());

    let vscalar = f32x4::splat(scalar);
    let chunks = a.len() / 4;
    for i in 0..chunks {
        let offset = 4 * i;
        let va = f32x4::from(<[f32; 4]>::try_from(&a[offset..offset + 4]).unwrap());
        out[offset..offset + 4].copy_from_slice(&(va * vscalar).to_array());
    }

    for i in (chunks * 4)..a.len() {
        out[i] = a[i] * scalar;
    }
}

/// `out[i] += a[i] * scalar`
pub fn scale_accumulate(a: &[f32], scalar: f32, out: &mut [f32]) {
    assert_eq!(a.len(), out.len());

    let vscalar = f32x4::splat(scalar);
    let chunks = a.len() / 4;
    for i in 0..chunks {
        let offset = 4 * i;
        let va = f32x4::from(<[f32; 4]>::try_from(&a[offset..offset + 4]).unwrap());
        let vout = f32x4::from(<[f32; 4]>::try_from(&out[offset..offset + 4]).unwrap());
        out[offset..offset + 4].copy_from_slice(&va.mul_add(vscalar, vout).to_array());
    }

    for i in (chunks * 4)..a.len() {
        out[i] += a[i] * scalar;
    }
}

/// `out[i] = a[i] + constant`
pub fn add_constant(a: &[f32], constant: f32, out: &mut [f32]) {
    assert_eq!(a.len(), out.len());

    for (value, result) in a.iter().zip(out.iter_mut()) {
        *result = value + constant;
    }
}

/// The maximum value in the array.
pub fn max(a: &[f32]) -> f32 {
    a.iter().copied().fold(f32::NEG_INFINITY, f32::max)
}

/// The maximum value and its index.
pub fn max_index(a: &[f32]) -> (f32, usize) {
    let mut best = f32::NEG_INFINITY;
    let mut best_index = 0;

    for (i, &value) in a.iter().enumerate() {
        if value > best {
            best = value;
            best_index = i;
        }
    }

    (best, best_index)
}

/// Complex multiply of interleaved (re, im) pairs:
/// `out[i] = a[i] * b[i]` over ℂ.
pub fn complex_multiply(
    a: &[(f32, f32)],
    b: &[(f32, f32)],
    out: &mut [(f32, f32)],
) {
    assert!(a.len() == b.len() && a.len() == out.len());

    for ((&(ar, ai), &(br, bi)), result) in a.iter().zip(b.iter()).zip(out.iter_mut()) {
        *result = (ar * br - ai * bi, ar * bi + ai * br);
    }
}

/// `out[i] = sqrt(a[i].re² + a[i].im²)`
pub fn magnitude(a: &[(f32, f32)], out: &mut [f32]) {
    assert_eq!(a.len(), out.len());

    for (&(re, im), result) in a.iter().zip(out.iter_mut()) {
        *result = (re * re + im * im).sqrt();
    }
}

/// `out[i] = atan2(a[i].im, a[i].re)`
pub fn phase(a: &[(f32, f32)], out: &mut [f32]) {
    assert_eq!(a.len(), out.len());

    for (&(re, im), result) in a.iter().zip(out.iter_mut()) {
        *result = im.atan2(re);
    }
}

/// `out[i] = (magnitude[i] cos(phase[i]), magnitude[i] sin(phase[i]))`
pub fn polar_to_cartesian(magnitudes: &[f32], phases: &[f32], out: &mut [(f32, f32)]) {
    assert!(magnitudes.len() == phases.len() && magnitudes.len() == out.len());

    for ((&m, &p), result) in magnitudes.iter().zip(phases.iter()).zip(out.iter_mut()) {
        *result = (m * p.cos(), m * p.sin());
    }
}

/// Sum of all elements.
pub fn sum(a: &[f32]) -> f32 {
    let (vector_part, remainder) = split4(a);

    let mut accum = f32x4::splat(0.0);
    for chunk in vector_part.chunks_exact(4) {
        accum += f32x4::from(<[f32; 4]>::try_from(chunk).unwrap());
    }

    accum.reduce_add() + remainder.iter().sum::<f32>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng, rngs::SmallRng};

    #[test]
    fn test_add_and_scale() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [10.0, 20.0, 30.0, 40.0, 50.0];
        let mut out = [0.0; 5];

        add(&a, &b, &mut out);
        assert_eq!(out, [11.0, 22.0, 33.0, 44.0, 55.0]);

        scale(&a, 2.0, &mut out);
        assert_eq!(out, [2.0, 4.0, 6.0, 8.0, 10.0]);
    }

    #[test]
    fn test_multiply_accumulate() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 2.0, 2.0, 2.0];
        let mut out = [1.0, 1.0, 1.0, 1.0];

        multiply_accumulate(&a, &b, &mut out);
        assert_eq!(out, [3.0, 5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_complex_multiply_associative() {
        let mut rng = SmallRng::seed_from_u64(7);
        let random_complex = |rng: &mut SmallRng, n: usize| -> Vec<(f32, f32)> {
            (0..n)
                .map(|_| (rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
                .collect()
        };

        let n = 64;
        let a = random_complex(&mut rng, n);
        let b = random_complex(&mut rng, n);
        let c = random_complex(&mut rng, n);

        let mut ab = vec![(0.0, 0.0); n];
        let mut ab_c = vec![(0.0, 0.0); n];
        let mut bc = vec![(0.0, 0.0); n];
        let mut a_bc = vec![(0.0, 0.0); n];

        complex_multiply(&a, &b, &mut ab);
        complex_multiply(&ab, &c, &mut ab_c);
        complex_multiply(&b, &c, &mut bc);
        complex_multiply(&a, &bc, &mut a_bc);

        for (&(lr, li), &(rr, ri)) in ab_c.iter().zip(a_bc.iter()) {
            assert_relative_eq!(lr, rr, max_relative = 1e-5, epsilon = 1e-6);
            assert_relative_eq!(li, ri, max_relative = 1e-5, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_max_index() {
        let a = [0.5, 3.0, -1.0, 2.0];
        assert_eq!(max_index(&a), (3.0, 1));
        assert_eq!(max(&a), 3.0);
    }

    #[test]
    fn test_polar_round_trip() {
        let values = [(1.0, 2.0), (-0.5, 0.25), (3.0, -4.0)];
        let mut magnitudes = [0.0; 3];
        let mut phases = [0.0; 3];
        let mut restored = [(0.0, 0.0); 3];

        magnitude(&values, &mut magnitudes);
        phase(&values, &mut phases);
        polar_to_cartesian(&magnitudes, &phases, &mut restored);

        for (&(re, im), &(rre, rim)) in values.iter().zip(restored.iter()) {
            assert_relative_eq!(re, rre, epsilon = 1e-5);
            assert_relative_eq!(im, rim, epsilon = 1e-5);
        }
    }
}
