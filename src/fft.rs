//! FFT wrappers used by the convolution effects and spectral utilities.

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex32;
use rustfft::{Fft as RustFft, FftPlanner};
use std::sync::Arc;

/// A fixed-size FFT.
///
/// Wraps forward/inverse complex transforms plus real-input transforms of the
/// same size. Inverse transforms are normalized, so
/// `inverse(forward(x)) == x` to within 1e-5 relative error for signals up to
/// 32k samples.
pub struct Fft {
    size: usize,
    forward: Arc<dyn RustFft<f32>>,
    inverse: Arc<dyn RustFft<f32>>,
    real_forward: Arc<dyn RealToComplex<f32>>,
    real_inverse: Arc<dyn ComplexToReal<f32>>,
}

impl Fft {
    /// Plans transforms of the given size. The size must be even.
    pub fn new(size: usize) -> Self {
        assert!(size > 0 && size % 2 == 0);

        let mut planner = FftPlanner::<f32>::new();
        let mut real_planner = RealFftPlanner::<f32>::new();

        Self {
            size,
            forward: planner.plan_fft_forward(size),
            inverse: planner.plan_fft_inverse(size),
            real_forward: real_planner.plan_fft_forward(size),
            real_inverse: real_planner.plan_fft_inverse(size),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of complex bins produced by the real-input transforms.
    pub fn num_real_bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// In-place forward complex transform.
    pub fn forward(&self, data: &mut [Complex32]) {
        assert_eq!(data.len(), self.size);
        self.forward.process(data);
    }

    /// In-place inverse complex transform, normalized by 1/N.
    pub fn inverse(&self, data: &mut [Complex32]) {
        assert_eq!(data.len(), self.size);
        self.inverse.process(data);

        let scale = 1.0 / self.size as f32;
        for value in data.iter_mut() {
            *value *= scale;
        }
    }

    /// Forward real-input transform. `spectrum` must have
    /// [`Self::num_real_bins`] elements.
    pub fn forward_real(&self, signal: &mut [f32], spectrum: &mut [Complex32]) {
        assert_eq!(signal.len(), self.size);
        assert_eq!(spectrum.len(), self.num_real_bins());

        self.real_forward
            .process(signal, spectrum)
            .expect("forward real FFT with validated buffer sizes");
    }

    /// Inverse real-input transform, normalized by 1/N. The spectrum buffer
    /// is clobbered.
    pub fn inverse_real(&self, spectrum: &mut [Complex32], signal: &mut [f32]) {
        assert_eq!(signal.len(), self.size);
        assert_eq!(spectrum.len(), self.num_real_bins());

        // realfft requires the imaginary parts of the DC and Nyquist bins to
        // be exactly zero.
        spectrum[0].im = 0.0;
        let last = spectrum.len() - 1;
        spectrum[last].im = 0.0;

        self.real_inverse
            .process(spectrum, signal)
            .expect("inverse real FFT with validated buffer sizes");

        let scale = 1.0 / self.size as f32;
        for value in signal.iter_mut() {
            *value *= scale;
        }
    }
}

impl std::fmt::Debug for Fft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fft").field("size", &self.size).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng, rngs::SmallRng};

    #[test]
    fn test_complex_round_trip() {
        for size in [64, 1024, 32_768] {
            let mut rng = SmallRng::seed_from_u64(size as u64);
            let original: Vec<Complex32> = (0..size)
                .map(|_| Complex32::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
                .collect();

            let fft = Fft::new(size);
            let mut data = original.clone();
            fft.forward(&mut data);
            fft.inverse(&mut data);

            for (a, b) in original.iter().zip(data.iter()) {
                assert_relative_eq!(a.re, b.re, max_relative = 1e-5, epsilon = 1e-5);
                assert_relative_eq!(a.im, b.im, max_relative = 1e-5, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_real_round_trip() {
        let size = 2048;
        let mut rng = SmallRng::seed_from_u64(99);
        let original: Vec<f32> = (0..size).map(|_| rng.gen_range(-1.0..1.0)).collect();

        let fft = Fft::new(size);
        let mut signal = original.clone();
        let mut spectrum = vec![Complex32::default(); fft.num_real_bins()];

        fft.forward_real(&mut signal, &mut spectrum);

        let mut restored = vec![0.0f32; size];
        fft.inverse_real(&mut spectrum, &mut restored);

        for (a, b) in original.iter().zip(restored.iter()) {
            assert_relative_eq!(a, b, max_relative = 1e-5, epsilon = 1e-5);
        }
    }
}
