//! Energy fields: directional histograms of arriving sound energy.

use crate::NUM_BANDS;
use crate::sh;

/// Duration of one histogram bin, in seconds.
pub const BIN_DURATION: f32 = 0.01;

/// A histogram of sound energy arriving at a point, as a function of incident
/// direction, frequency band, and arrival time.
///
/// Time is subdivided into bins of 10 ms. For each bin, incident energy is
/// stored separately for each frequency band. For a given band and bin, the
/// variation of incident energy with direction is stored as an Ambisonic
/// (spherical harmonic) expansion.
///
/// Data is stored as a 3D array of size `channels × bands × bins`, in
/// row-major order. All values are non-negative in the omni channel; higher
/// channels carry signed directional coefficients.
#[derive(Debug, Clone)]
pub struct EnergyField {
    num_channels: usize,
    num_bins: usize,
    data: Vec<f32>,
}

impl EnergyField {
    /// Creates an energy field covering `duration` seconds of arrival time,
    /// with `(order + 1)²` Ambisonic channels. All values start at zero.
    pub fn new(settings: &EnergyFieldSettings) -> Self {
        let num_channels = sh::num_coeffs_for_order(settings.order);
        let num_bins = (settings.duration / BIN_DURATION).ceil() as usize;

        Self {
            num_channels,
            num_bins,
            data: vec![0.0; num_channels * NUM_BANDS * num_bins],
        }
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    /// The full data array, in `channels × bands × bins` row-major order.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// All bands and bins of one channel.
    pub fn channel(&self, channel_index: usize) -> &[f32] {
        let stride = NUM_BANDS * self.num_bins;
        &self.data[channel_index * stride..(channel_index + 1) * stride]
    }

    /// The histogram of one channel and band.
    pub fn band(&self, channel_index: usize, band_index: usize) -> &[f32] {
        let offset = (channel_index * NUM_BANDS + band_index) * self.num_bins;
        &self.data[offset..offset + self.num_bins]
    }

    pub fn band_mut(&mut self, channel_index: usize, band_index: usize) -> &mut [f32] {
        let offset = (channel_index * NUM_BANDS + band_index) * self.num_bins;
        &mut self.data[offset..offset + self.num_bins]
    }

    /// Deposits energy into one bin of one band, spread over the Ambisonic
    /// channels according to the given per-channel SH weights.
    pub fn deposit(&mut self, band_index: usize, bin_index: usize, sh_weights: &[f32], energy: f32) {
        debug_assert!(sh_weights.len() >= self.num_channels);

        if bin_index >= self.num_bins {
            return;
        }

        for channel in 0..self.num_channels {
            let offset = (channel * NUM_BANDS + band_index) * self.num_bins + bin_index;
            self.data[offset] += energy * sh_weights[channel];
        }
    }

    /// Resets all values to zero.
    pub fn reset(&mut self) {
        self.data.fill(0.0);
    }

    /// Copies data into `dst`. If the fields have different numbers of
    /// channels or bins, only the smaller of each is copied.
    pub fn copy_into(&self, dst: &mut EnergyField) {
        let channels = self.num_channels.min(dst.num_channels);
        let bins = self.num_bins.min(dst.num_bins);

        for channel in 0..channels {
            for band in 0..NUM_BANDS {
                let src_offset = (channel * NUM_BANDS + band) * self.num_bins;
                let dst_offset = (channel * NUM_BANDS + band) * dst.num_bins;
                dst.data[dst_offset..dst_offset + bins]
                    .copy_from_slice(&self.data[src_offset..src_offset + bins]);
            }
        }
    }

    /// Swaps the contents of two energy fields. The fields may have different
    /// numbers of channels or bins.
    pub fn swap(&mut self, other: &mut EnergyField) {
        std::mem::swap(&mut self.num_channels, &mut other.num_channels);
        std::mem::swap(&mut self.num_bins, &mut other.num_bins);
        std::mem::swap(&mut self.data, &mut other.data);
    }

    /// Adds the values of `other` to `self`, over the common channels and
    /// bins.
    pub fn add(&mut self, other: &EnergyField) {
        let channels = self.num_channels.min(other.num_channels);
        let bins = self.num_bins.min(other.num_bins);

        for channel in 0..channels {
            for band in 0..NUM_BANDS {
                let src_offset = (channel * NUM_BANDS + band) * other.num_bins;
                let dst_offset = (channel * NUM_BANDS + band) * self.num_bins;
                for bin in 0..bins {
                    self.data[dst_offset + bin] += other.data[src_offset + bin];
                }
            }
        }
    }

    /// Scales all values by a scalar.
    pub fn scale(&mut self, scalar: f32) {
        for value in &mut self.data {
            *value *= scalar;
        }
    }
}

/// Settings used to create an [`EnergyField`].
#[derive(Debug, Copy, Clone)]
pub struct EnergyFieldSettings {
    /// Total duration (in seconds) of the energy field. Determines the number
    /// of bins.
    pub duration: f32,

    /// The Ambisonic order. Determines the number of channels.
    pub order: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions() {
        let field = EnergyField::new(&EnergyFieldSettings {
            duration: 1.0,
            order: 1,
        });

        assert_eq!(field.num_channels(), 4);
        assert_eq!(field.num_bins(), 100);
        assert_eq!(field.data().len(), 4 * NUM_BANDS * 100);
    }

    #[test]
    fn test_deposit_and_reset() {
        let mut field = EnergyField::new(&EnergyFieldSettings {
            duration: 0.5,
            order: 0,
        });

        field.deposit(1, 10, &[1.0], 0.25);
        assert_eq!(field.band(0, 1)[10], 0.25);

        // Deposits past the end of the histogram are dropped.
        field.deposit(1, 1000, &[1.0], 1.0);

        field.reset();
        assert!(field.data().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_add_with_mismatched_sizes() {
        let mut a = EnergyField::new(&EnergyFieldSettings {
            duration: 1.0,
            order: 1,
        });
        let mut b = EnergyField::new(&EnergyFieldSettings {
            duration: 0.5,
            order: 0,
        });

        b.band_mut(0, 0)[5] = 2.0;
        a.add(&b);
        assert_eq!(a.band(0, 0)[5], 2.0);

        b.add(&a);
        assert_eq!(b.band(0, 0)[5], 4.0);
    }

    #[test]
    fn test_swap() {
        let mut a = EnergyField::new(&EnergyFieldSettings {
            duration: 1.0,
            order: 1,
        });
        let mut b = EnergyField::new(&EnergyFieldSettings {
            duration: 0.5,
            order: 0,
        });

        a.band_mut(2, 1)[3] = 7.0;
        a.swap(&mut b);

        assert_eq!(b.num_channels(), 4);
        assert_eq!(b.band(2, 1)[3], 7.0);
        assert_eq!(a.num_channels(), 1);
    }
}
