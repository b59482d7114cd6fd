use super::AudioEffectState;
use crate::audio_buffer::AudioBuffer;
use crate::audio_settings::AudioSettings;
use crate::error::EchofieldError;
use crate::geometry::Vector3;
use crate::hrtf::{Hrtf, HrtfInterpolation};
use std::sync::Arc;

/// A mono FIR filter with history carried across frames.
#[derive(Debug, Clone)]
pub(crate) struct FirFilter {
    history: Vec<f32>,
}

impl FirFilter {
    pub fn new(num_taps: usize) -> Self {
        Self {
            history: vec![0.0; num_taps.saturating_sub(1)],
        }
    }

    pub fn reset(&mut self) {
        self.history.fill(0.0);
    }

    /// `output[n] += gain * sum_k taps[k] * input[n - k]`, using the history
    /// of previous frames for `n < k`.
    pub fn apply_accumulate(&mut self, taps: &[f32], input: &[f32], gain: f32, output: &mut [f32]) {
        let history_len = self.history.len();

        for (n, out) in output.iter_mut().enumerate() {
            let mut sum = 0.0;
            for (k, &tap) in taps.iter().enumerate() {
                let sample = if n >= k {
                    input[n - k]
                } else {
                    // Reach into the previous frame.
                    self.history[history_len - (k - n)]
                };
                sum += tap * sample;
            }
            *out += gain * sum;
        }

        // Save the trailing input samples for the next frame.
        if history_len > 0 {
            if input.len() >= history_len {
                self.history
                    .copy_from_slice(&input[input.len() - history_len..]);
            } else {
                self.history.rotate_left(input.len());
                let offset = history_len - input.len();
                self.history[offset..].copy_from_slice(input);
            }
        }
    }
}

/// Spatializes a mono point source using an HRTF, producing a 2-channel
/// binaural output.
///
/// The source can be panoramized by direction with nearest or bilinear HRTF
/// interpolation, and blended with a non-spatialized (center-panned) version
/// of the signal via `spatial_blend`.
#[derive(Debug)]
pub struct BinauralEffect {
    frame_size: usize,
    left_filter: FirFilter,
    right_filter: FirFilter,
    left_hrir: Vec<f32>,
    right_hrir: Vec<f32>,
}

/// Settings used to create a [`BinauralEffect`].
#[derive(Debug, Clone)]
pub struct BinauralEffectSettings {
    /// The HRTF that will be used for rendering. Determines internal filter
    /// lengths.
    pub hrtf: Arc<Hrtf>,
}

/// Parameters for applying a binaural effect.
#[derive(Debug, Clone)]
pub struct BinauralEffectParams {
    /// Unit direction from the listener to the source, in the listener's
    /// coordinate space.
    pub direction: Vector3,

    /// How to interpolate between the HRTF's measured directions.
    pub interpolation: HrtfInterpolation,

    /// Blend between a non-spatialized center pan (0.0) and full binaural
    /// rendering (1.0).
    pub spatial_blend: f32,

    /// The HRTF to render with.
    pub hrtf: Arc<Hrtf>,
}

impl BinauralEffect {
    pub fn try_new(
        audio_settings: &AudioSettings,
        settings: &BinauralEffectSettings,
    ) -> Result<Self, EchofieldError> {
        let num_taps = settings.hrtf.num_taps();
        if num_taps == 0 {
            return Err(EchofieldError::InvalidArgument);
        }

        Ok(Self {
            frame_size: audio_settings.frame_size,
            left_filter: FirFilter::new(num_taps),
            right_filter: FirFilter::new(num_taps),
            left_hrir: vec![0.0; num_taps],
            right_hrir: vec![0.0; num_taps],
        })
    }

    pub fn reset(&mut self) {
        self.left_filter.reset();
        self.right_filter.reset();
    }

    pub fn apply(
        &mut self,
        params: &BinauralEffectParams,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
    ) -> AudioEffectState {
        assert_eq!(input.num_channels(), 1);
        assert_eq!(output.num_channels(), 2);
        assert_eq!(input.num_samples(), self.frame_size);
        assert_eq!(output.num_samples(), self.frame_size);

        output.make_silent();

        let spatial_blend = params.spatial_blend.clamp(0.0, 1.0);
        let volume = params.hrtf.volume();

        params.hrtf.interpolated_hrir(
            params.direction,
            params.interpolation,
            &mut self.left_hrir,
            &mut self.right_hrir,
        );

        let (left, right) = output.two_channels_mut(0, 1);
        self.left_filter.apply_accumulate(
            &self.left_hrir,
            input.channel(0),
            volume * spatial_blend,
            left,
        );
        self.right_filter.apply_accumulate(
            &self.right_hrir,
            input.channel(0),
            volume * spatial_blend,
            right,
        );

        // Blend in the non-spatialized signal, center-panned at equal power.
        if spatial_blend < 1.0 {
            let pan_gain = volume * (1.0 - spatial_blend) * std::f32::consts::FRAC_1_SQRT_2;
            let (left, right) = output.two_channels_mut(0, 1);
            for ((l, r), x) in left
                .iter_mut()
                .zip(right.iter_mut())
                .zip(input.channel(0).iter())
            {
                *l += pan_gain * x;
                *r += pan_gain * x;
            }
        }

        AudioEffectState::TailComplete
    }

    pub fn tail(&mut self, output: &mut AudioBuffer) -> AudioEffectState {
        output.make_silent();
        AudioEffectState::TailComplete
    }

    pub fn tail_size(&self) -> usize {
        0
    }
}
