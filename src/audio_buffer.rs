//! Audio buffers and Ambisonic format conversion.

/// A single audio sample.
pub type Sample = f32;

/// Supported Ambisonic normalization and ordering conventions.
///
/// Channel ordering is ACN for [`AmbisonicsType::N3D`] and
/// [`AmbisonicsType::SN3D`]; [`AmbisonicsType::FuMa`] uses Furse-Malham
/// ordering and normalization, and is supported up to 3rd order. All
/// conversions are lossless channel-wise scalings (plus the FuMa channel
/// permutation); round trips are exact to within 1e-6 relative error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AmbisonicsType {
    /// ACN ordering, N3D (full 3D) normalization. Used internally by the
    /// engine.
    N3D,

    /// ACN ordering, SN3D (Schmidt semi-normalized) normalization.
    SN3D,

    /// Furse-Malham ordering and normalization (MaxN). Supported up to 3rd
    /// order.
    FuMa,
}

// Per-ACN-channel conversion tables for orders <= 3.
const MAX_FUMA_CHANNELS: usize = 16;

/// FuMa channel index for each ACN channel (W Y Z X V T R S U Q O M K L N P
/// reordered to W X Y Z R S T U V K L M N O P Q).
const ACN_TO_FUMA_INDEX: [usize; MAX_FUMA_CHANNELS] =
    [0, 2, 3, 1, 8, 6, 4, 5, 7, 15, 13, 11, 9, 10, 12, 14];

/// Scaling from SN3D to FuMa for each ACN channel.
fn sn3d_to_fuma_scale(acn: usize) -> f32 {
    const SQRT_3: f32 = 1.732_050_8;
    const SQRT_5: f32 = 2.236_068;

    match acn {
        0 => 1.0 / std::f32::consts::SQRT_2,
        1..=3 => 1.0,
        6 => 1.0,
        4 | 5 | 7 | 8 => 2.0 / SQRT_3,
        12 => 1.0,
        11 | 13 => (45.0f32 / 32.0).sqrt(),
        10 | 14 => 3.0 / SQRT_5,
        9 | 15 => (8.0f32 / 5.0).sqrt(),
        _ => 1.0,
    }
}

/// Scaling from N3D to SN3D for an ACN channel: `1 / sqrt(2l + 1)`.
fn n3d_to_sn3d_scale(acn: usize) -> f32 {
    let l = (acn as f32).sqrt().floor() as usize;
    1.0 / ((2 * l + 1) as f32).sqrt()
}

/// A planar, multi-channel buffer of audio samples.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    num_channels: usize,
    num_samples: usize,
    data: Vec<Sample>,
}

impl AudioBuffer {
    /// Creates a silent buffer.
    pub fn new(num_channels: usize, num_samples: usize) -> Self {
        assert!(num_channels > 0 && num_samples > 0);

        Self {
            num_channels,
            num_samples,
            data: vec![0.0; num_channels * num_samples],
        }
    }

    /// Creates a mono buffer from existing samples.
    pub fn from_mono(samples: &[Sample]) -> Self {
        Self {
            num_channels: 1,
            num_samples: samples.len(),
            data: samples.to_vec(),
        }
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn channel(&self, channel_index: usize) -> &[Sample] {
        &self.data[channel_index * self.num_samples..(channel_index + 1) * self.num_samples]
    }

    pub fn channel_mut(&mut self, channel_index: usize) -> &mut [Sample] {
        &mut self.data[channel_index * self.num_samples..(channel_index + 1) * self.num_samples]
    }

    /// Mutable views of two distinct channels.
    pub fn two_channels_mut(&mut self, a: usize, b: usize) -> (&mut [Sample], &mut [Sample]) {
        assert!(a < b);
        let (left, right) = self.data.split_at_mut(b * self.num_samples);
        (
            &mut left[a * self.num_samples..(a + 1) * self.num_samples],
            &mut right[..self.num_samples],
        )
    }

    pub fn make_silent(&mut self) {
        self.data.fill(0.0);
    }

    /// Mixes (adds) another buffer into this one. Both buffers must have the
    /// same shape.
    pub fn mix(&mut self, other: &AudioBuffer) {
        assert_eq!(self.num_channels, other.num_channels);
        assert_eq!(self.num_samples, other.num_samples);

        for (out, x) in self.data.iter_mut().zip(other.data.iter()) {
            *out += x;
        }
    }

    pub fn scale(&mut self, scalar: Sample) {
        for value in &mut self.data {
            *value *= scalar;
        }
    }

    /// Downmixes to mono: the output is the arithmetic mean of the input
    /// channels.
    pub fn downmix(&self, mono: &mut AudioBuffer) {
        assert_eq!(mono.num_channels, 1);
        assert_eq!(mono.num_samples, self.num_samples);

        let scale = 1.0 / self.num_channels as f32;
        let out = mono.channel_mut(0);
        out.fill(0.0);

        for channel_index in 0..self.num_channels {
            let channel = self.channel(channel_index);
            for (accumulated, x) in out.iter_mut().zip(channel.iter()) {
                *accumulated += x;
            }
        }

        for value in out.iter_mut() {
            *value *= scale;
        }
    }

    /// Reads interleaved samples into this (planar) buffer.
    pub fn read_interleaved(&mut self, interleaved: &[Sample]) {
        assert_eq!(interleaved.len(), self.num_channels * self.num_samples);

        for sample_index in 0..self.num_samples {
            for channel_index in 0..self.num_channels {
                self.data[channel_index * self.num_samples + sample_index] =
                    interleaved[sample_index * self.num_channels + channel_index];
            }
        }
    }

    /// Writes this (planar) buffer out as interleaved samples.
    pub fn write_interleaved(&self, interleaved: &mut [Sample]) {
        assert_eq!(interleaved.len(), self.num_channels * self.num_samples);

        for sample_index in 0..self.num_samples {
            for channel_index in 0..self.num_channels {
                interleaved[sample_index * self.num_channels + channel_index] =
                    self.data[channel_index * self.num_samples + sample_index];
            }
        }
    }

    /// Converts an Ambisonic buffer between normalization/ordering
    /// conventions. Input and output must have the same shape, with at most
    /// 16 channels (3rd order) when FuMa is involved.
    pub fn convert_ambisonics(
        from: AmbisonicsType,
        to: AmbisonicsType,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
    ) {
        assert_eq!(input.num_channels, output.num_channels);
        assert_eq!(input.num_samples, output.num_samples);

        if from == AmbisonicsType::FuMa || to == AmbisonicsType::FuMa {
            assert!(input.num_channels <= MAX_FUMA_CHANNELS);
        }

        for acn in 0..input.num_channels {
            // Channel index and scaling in the source convention, relative to
            // SN3D/ACN as the hub.
            let (src_index, to_sn3d) = match from {
                AmbisonicsType::N3D => (acn, n3d_to_sn3d_scale(acn)),
                AmbisonicsType::SN3D => (acn, 1.0),
                AmbisonicsType::FuMa => (ACN_TO_FUMA_INDEX[acn], 1.0 / sn3d_to_fuma_scale(acn)),
            };

            let (dst_index, from_sn3d) = match to {
                AmbisonicsType::N3D => (acn, 1.0 / n3d_to_sn3d_scale(acn)),
                AmbisonicsType::SN3D => (acn, 1.0),
                AmbisonicsType::FuMa => (ACN_TO_FUMA_INDEX[acn], sn3d_to_fuma_scale(acn)),
            };

            let scale = to_sn3d * from_sn3d;
            let src = input.channel(src_index);
            let dst = output.channel_mut(dst_index);
            for (out, x) in dst.iter_mut().zip(src.iter()) {
                *out = x * scale;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_downmix_stereo_is_channel_mean() {
        let mut stereo = AudioBuffer::new(2, 4);
        stereo.channel_mut(0).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        stereo.channel_mut(1).copy_from_slice(&[3.0, 2.0, 1.0, 0.0]);

        let mut mono = AudioBuffer::new(1, 4);
        stereo.downmix(&mut mono);

        assert_eq!(mono.channel(0), &[2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_interleave_round_trip() {
        let interleaved = [1.0, 10.0, 2.0, 20.0, 3.0, 30.0];
        let mut buffer = AudioBuffer::new(2, 3);
        buffer.read_interleaved(&interleaved);

        assert_eq!(buffer.channel(0), &[1.0, 2.0, 3.0]);
        assert_eq!(buffer.channel(1), &[10.0, 20.0, 30.0]);

        let mut restored = [0.0; 6];
        buffer.write_interleaved(&mut restored);
        assert_eq!(restored, interleaved);
    }

    #[test]
    fn test_n3d_sn3d_round_trip() {
        let num_channels = 16;
        let mut input = AudioBuffer::new(num_channels, 8);
        for channel in 0..num_channels {
            for (i, x) in input.channel_mut(channel).iter_mut().enumerate() {
                *x = ((channel * 8 + i) as f32 * 0.13).sin();
            }
        }

        let mut sn3d = AudioBuffer::new(num_channels, 8);
        let mut restored = AudioBuffer::new(num_channels, 8);

        AudioBuffer::convert_ambisonics(AmbisonicsType::N3D, AmbisonicsType::SN3D, &input, &mut sn3d);
        AudioBuffer::convert_ambisonics(
            AmbisonicsType::SN3D,
            AmbisonicsType::N3D,
            &sn3d,
            &mut restored,
        );

        for channel in 0..num_channels {
            for (a, b) in input.channel(channel).iter().zip(restored.channel(channel)) {
                assert_relative_eq!(a, b, max_relative = 1e-5, epsilon = 1e-7);
            }
        }
    }

    #[test]
    fn test_fuma_round_trip_through_all_formats() {
        let num_channels = 16;
        let mut input = AudioBuffer::new(num_channels, 4);
        for channel in 0..num_channels {
            for (i, x) in input.channel_mut(channel).iter_mut().enumerate() {
                *x = ((channel + 1) as f32) * 0.25 + i as f32;
            }
        }

        let mut sn3d = AudioBuffer::new(num_channels, 4);
        let mut fuma = AudioBuffer::new(num_channels, 4);
        let mut sn3d_back = AudioBuffer::new(num_channels, 4);
        let mut restored = AudioBuffer::new(num_channels, 4);

        AudioBuffer::convert_ambisonics(AmbisonicsType::N3D, AmbisonicsType::SN3D, &input, &mut sn3d);
        AudioBuffer::convert_ambisonics(AmbisonicsType::SN3D, AmbisonicsType::FuMa, &sn3d, &mut fuma);
        AudioBuffer::convert_ambisonics(
            AmbisonicsType::FuMa,
            AmbisonicsType::SN3D,
            &fuma,
            &mut sn3d_back,
        );
        AudioBuffer::convert_ambisonics(
            AmbisonicsType::SN3D,
            AmbisonicsType::N3D,
            &sn3d_back,
            &mut restored,
        );

        for channel in 0..num_channels {
            for (a, b) in input.channel(channel).iter().zip(restored.channel(channel)) {
                assert_relative_eq!(a, b, max_relative = 1e-5, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_fuma_permutation_is_a_bijection() {
        let mut seen = [false; MAX_FUMA_CHANNELS];
        for &index in &ACN_TO_FUMA_INDEX {
            assert!(!seen[index]);
            seen[index] = true;
        }
    }
}
