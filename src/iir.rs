//! IIR biquad filters.
//!
//! The engine splits the audible spectrum into three bands; filters are
//! specified per band as low-shelf, peaking, or high-shelf biquads with the
//! cutoff frequencies below.

use crate::NUM_BANDS;

/// Low cutoff frequency (in Hz) of each band.
pub const LOW_CUTOFF_FREQUENCIES: [f32; NUM_BANDS] = [20.0, 500.0, 5000.0];

/// High cutoff frequency (in Hz) of each band.
pub const HIGH_CUTOFF_FREQUENCIES: [f32; NUM_BANDS] = [500.0, 5000.0, 22000.0];

/// Normalized biquad coefficients (a0 == 1).
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Iir {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

impl Iir {
    /// A low-shelf filter with the given gain below `cutoff`.
    pub fn low_shelf(cutoff: f32, gain: f32, sampling_rate: u32) -> Self {
        let a = gain.max(1e-8).sqrt();
        let omega = 2.0 * std::f32::consts::PI * (cutoff / sampling_rate as f32);
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = 0.5 * sin_omega * std::f32::consts::SQRT_2; // Q = 1/sqrt(2)
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha;
        let b0 = a * ((a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha);
        let b1 = 2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega);
        let b2 = a * ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha);
        let a1 = -2.0 * ((a - 1.0) + (a + 1.0) * cos_omega);
        let a2 = (a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// A high-shelf filter with the given gain above `cutoff`.
    pub fn high_shelf(cutoff: f32, gain: f32, sampling_rate: u32) -> Self {
        let a = gain.max(1e-8).sqrt();
        let omega = 2.0 * std::f32::consts::PI * (cutoff / sampling_rate as f32);
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = 0.5 * sin_omega * std::f32::consts::SQRT_2;
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha;
        let b0 = a * ((a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha);
        let b1 = -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega);
        let b2 = a * ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha);
        let a1 = 2.0 * ((a - 1.0) - (a + 1.0) * cos_omega);
        let a2 = (a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// A peaking filter with the given gain between `low_cutoff` and
    /// `high_cutoff`.
    pub fn peaking(low_cutoff: f32, high_cutoff: f32, gain: f32, sampling_rate: u32) -> Self {
        let a = gain.max(1e-8).sqrt();
        let center = (low_cutoff * high_cutoff).sqrt();
        let omega = 2.0 * std::f32::consts::PI * (center / sampling_rate as f32);
        let (sin_omega, cos_omega) = omega.sin_cos();
        let q = center / (high_cutoff - low_cutoff);
        let alpha = 0.5 * sin_omega / q;

        let a0 = 1.0 + alpha / a;
        let b0 = 1.0 + alpha * a;
        let b1 = -2.0 * cos_omega;
        let b2 = 1.0 - alpha * a;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha / a;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// A low-pass filter with Butterworth Q.
    pub fn low_pass(cutoff: f32, sampling_rate: u32) -> Self {
        let omega = 2.0 * std::f32::consts::PI * (cutoff / sampling_rate as f32);
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = 0.5 * sin_omega * std::f32::consts::SQRT_2;

        let a0 = 1.0 + alpha;
        Self {
            b0: (0.5 * (1.0 - cos_omega)) / a0,
            b1: (1.0 - cos_omega) / a0,
            b2: (0.5 * (1.0 - cos_omega)) / a0,
            a1: (-2.0 * cos_omega) / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// A high-pass filter with Butterworth Q.
    pub fn high_pass(cutoff: f32, sampling_rate: u32) -> Self {
        let omega = 2.0 * std::f32::consts::PI * (cutoff / sampling_rate as f32);
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = 0.5 * sin_omega * std::f32::consts::SQRT_2;

        let a0 = 1.0 + alpha;
        Self {
            b0: (0.5 * (1.0 + cos_omega)) / a0,
            b1: -(1.0 + cos_omega) / a0,
            b2: (0.5 * (1.0 + cos_omega)) / a0,
            a1: (-2.0 * cos_omega) / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// A band-pass filter with constant 0 dB peak gain.
    pub fn band_pass(low_cutoff: f32, high_cutoff: f32, sampling_rate: u32) -> Self {
        let center = (low_cutoff * high_cutoff).sqrt();
        let omega = 2.0 * std::f32::consts::PI * (center / sampling_rate as f32);
        let (sin_omega, cos_omega) = omega.sin_cos();
        let q = center / (high_cutoff - low_cutoff);
        let alpha = 0.5 * sin_omega / q;

        let a0 = 1.0 + alpha;
        Self {
            b0: alpha / a0,
            b1: 0.0,
            b2: -alpha / a0,
            a1: (-2.0 * cos_omega) / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// The filter for a given band index: low shelf for band 0, peaking for
    /// band 1, high shelf for band 2.
    pub fn band_filter(band: usize, gain: f32, sampling_rate: u32) -> Self {
        match band {
            0 => Self::low_shelf(HIGH_CUTOFF_FREQUENCIES[0], gain, sampling_rate),
            1 => Self::peaking(
                LOW_CUTOFF_FREQUENCIES[1],
                HIGH_CUTOFF_FREQUENCIES[1],
                gain,
                sampling_rate,
            ),
            _ => Self::high_shelf(LOW_CUTOFF_FREQUENCIES[2], gain, sampling_rate),
        }
    }
}

/// Applies an [`Iir`] filter to a stream of samples, maintaining filter state
/// across frames (transposed direct form II).
#[derive(Debug, Default, Copy, Clone)]
pub struct IirFilterer {
    filter: Iir,
    z1: f32,
    z2: f32,
}

impl IirFilterer {
    pub fn new(filter: Iir) -> Self {
        Self {
            filter,
            z1: 0.0,
            z2: 0.0,
        }
    }

    pub fn set_filter(&mut self, filter: Iir) {
        self.filter = filter;
    }

    /// Copies filter state from another filterer, so a new filter can pick up
    /// where an old one left off without clicks.
    pub fn copy_state_from(&mut self, other: &IirFilterer) {
        self.z1 = other.z1;
        self.z2 = other.z2;
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    pub fn apply_sample(&mut self, x: f32) -> f32 {
        let y = self.filter.b0 * x + self.z1;
        self.z1 = self.filter.b1 * x - self.filter.a1 * y + self.z2;
        self.z2 = self.filter.b2 * x - self.filter.a2 * y;
        y
    }

    /// Applies the filter to a buffer. `input` and `output` may alias by
    /// passing the same slice via [`Self::apply_in_place`].
    pub fn apply(&mut self, input: &[f32], output: &mut [f32]) {
        assert_eq!(input.len(), output.len());

        for (x, y) in input.iter().zip(output.iter_mut()) {
            *y = self.apply_sample(*x);
        }
    }

    pub fn apply_in_place(&mut self, data: &mut [f32]) {
        for value in data.iter_mut() {
            *value = self.apply_sample(*value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn dc_gain(filter: Iir) -> f32 {
        (filter.b0 + filter.b1 + filter.b2) / (1.0 + filter.a1 + filter.a2)
    }

    #[test]
    fn test_low_shelf_dc_gain() {
        let gain = 0.25;
        let filter = Iir::low_shelf(500.0, gain, 48_000);
        assert_relative_eq!(dc_gain(filter), gain, max_relative = 1e-3);
    }

    #[test]
    fn test_unity_filters_pass_dc() {
        for band in 0..NUM_BANDS {
            let filter = Iir::band_filter(band, 1.0, 48_000);
            assert_relative_eq!(dc_gain(filter), 1.0, max_relative = 1e-3);
        }
    }

    #[test]
    fn test_state_copy_is_click_free() {
        let mut a = IirFilterer::new(Iir::low_shelf(500.0, 0.5, 48_000));
        let input: Vec<f32> = (0..64).map(|i| (i as f32 * 0.1).sin()).collect();
        let mut output = vec![0.0; 64];
        a.apply(&input, &mut output);

        let mut b = IirFilterer::new(Iir::low_shelf(500.0, 0.5, 48_000));
        b.copy_state_from(&a);

        // The state-copied filter continues the stream exactly.
        let mut cont_a = a;
        let mut out_a = vec![0.0; 64];
        let mut out_b = vec![0.0; 64];
        cont_a.apply(&input, &mut out_a);
        b.apply(&input, &mut out_b);

        for (x, y) in out_a.iter().zip(out_b.iter()) {
            assert_relative_eq!(x, y);
        }
    }
}
