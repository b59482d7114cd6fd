use super::AudioEffectState;
use crate::NUM_BANDS;
use crate::audio_buffer::AudioBuffer;
use crate::audio_settings::AudioSettings;
use crate::iir::{Iir, IirFilterer};

/// A 3-band equalizer: a cascade of low-shelf, peaking, and high-shelf
/// biquads.
///
/// When the gains change, the effect runs both the old and the new filter
/// cascade for one frame and crossfades between them; the new filters start
/// from the old filters' state, so parameter changes are click-free.
#[derive(Debug)]
pub struct EqEffect {
    sampling_rate: u32,
    frame_size: usize,
    // Two filter cascades, [cascade][band]; `current` selects the active one.
    filters: [[IirFilterer; NUM_BANDS]; 2],
    current: usize,
    prev_gains: [f32; NUM_BANDS],
    first_frame: bool,
    temp: Vec<f32>,
}

/// Parameters for applying an EQ effect.
#[derive(Debug, Copy, Clone)]
pub struct EqEffectParams {
    /// Gain for each band, in [0, 1].
    pub gains: [f32; NUM_BANDS],
}

impl EqEffect {
    pub fn new(audio_settings: &AudioSettings) -> Self {
        let mut effect = Self {
            sampling_rate: audio_settings.sampling_rate,
            frame_size: audio_settings.frame_size,
            filters: [[IirFilterer::default(); NUM_BANDS]; 2],
            current: 0,
            prev_gains: [1.0; NUM_BANDS],
            first_frame: true,
            temp: vec![0.0; audio_settings.frame_size],
        };

        effect.reset();
        effect
    }

    pub fn reset(&mut self) {
        self.prev_gains = [1.0; NUM_BANDS];
        self.set_filter_gains(0, &[1.0; NUM_BANDS]);
        self.set_filter_gains(1, &[1.0; NUM_BANDS]);
        for cascade in &mut self.filters {
            for filter in cascade {
                filter.reset();
            }
        }
        self.current = 0;
        self.first_frame = true;
    }

    pub fn apply(
        &mut self,
        params: &EqEffectParams,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
    ) -> AudioEffectState {
        assert_eq!(input.num_samples(), self.frame_size);
        assert_eq!(output.num_samples(), self.frame_size);
        assert_eq!(input.num_channels(), 1);
        assert_eq!(output.num_channels(), 1);

        self.apply_to_slice(&params.gains, input.channel(0), output.channel_mut(0));
        AudioEffectState::TailComplete
    }

    pub(crate) fn apply_to_slice(
        &mut self,
        gains: &[f32; NUM_BANDS],
        input: &[f32],
        output: &mut [f32],
    ) {
        if self.first_frame {
            self.prev_gains = *gains;
            self.set_filter_gains(self.current, gains);
            self.first_frame = false;
        }

        if self.prev_gains != *gains {
            let previous = self.current;
            self.current = 1 - self.current;

            self.set_filter_gains(self.current, gains);
            for band in 0..NUM_BANDS {
                let state_source = self.filters[previous][band];
                self.filters[self.current][band].copy_state_from(&state_source);
            }

            // Old cascade into scratch, new cascade into the output, then
            // crossfade across the frame.
            let mut temp = std::mem::take(&mut self.temp);
            self.apply_filter_cascade(previous, input, &mut temp);
            self.apply_filter_cascade(self.current, input, output);

            let frame_size = input.len() as f32;
            for (i, (y, dry)) in output.iter_mut().zip(temp.iter()).enumerate() {
                let weight = i as f32 / frame_size;
                *y = weight * *y + (1.0 - weight) * dry;
            }

            self.temp = temp;
            self.prev_gains = *gains;
        } else {
            self.apply_filter_cascade(self.current, input, output);
        }
    }

    pub fn tail_apply(&mut self, input: &AudioBuffer, output: &mut AudioBuffer) -> AudioEffectState {
        let params = EqEffectParams {
            gains: self.prev_gains,
        };
        self.apply(&params, input, output)
    }

    pub fn tail(&mut self, output: &mut AudioBuffer) -> AudioEffectState {
        output.make_silent();
        AudioEffectState::TailComplete
    }

    pub fn tail_size(&self) -> usize {
        0
    }

    fn set_filter_gains(&mut self, cascade: usize, gains: &[f32; NUM_BANDS]) {
        for (band, &gain) in gains.iter().enumerate() {
            self.filters[cascade][band].set_filter(Iir::band_filter(band, gain, self.sampling_rate));
        }
    }

    fn apply_filter_cascade(&mut self, cascade: usize, input: &[f32], output: &mut [f32]) {
        self.filters[cascade][0].apply(input, output);
        self.filters[cascade][1].apply_in_place(output);
        self.filters[cascade][2].apply_in_place(output);
    }

    /// Normalizes EQ gains so their maximum is 1, folding the overall level
    /// into `overall_gain`. Gains are floored to preserve filter stability.
    pub fn normalize_gains(gains: &mut [f32; NUM_BANDS], overall_gain: &mut f32) {
        const MIN_EQ_GAIN: f32 = 0.0625;

        let max_gain = gains.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        if max_gain < f32::MIN_POSITIVE {
            *overall_gain = 0.0;
            gains.fill(1.0);
        } else {
            for gain in gains.iter_mut() {
                *gain = (*gain / max_gain).max(MIN_EQ_GAIN);
            }
            *overall_gain *= max_gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AudioSettings {
        AudioSettings {
            sampling_rate: 48_000,
            frame_size: 256,
        }
    }

    #[test]
    fn test_unity_gains_pass_signal_through() {
        let mut effect = EqEffect::new(&settings());

        let input_data: Vec<f32> = (0..256).map(|i| (i as f32 * 0.05).sin()).collect();
        let input = AudioBuffer::from_mono(&input_data);
        let mut output = AudioBuffer::new(1, 256);

        effect.apply(&EqEffectParams { gains: [1.0; 3] }, &input, &mut output);

        // Unity shelving/peaking filters are transparent to within float
        // precision.
        for (x, y) in input.channel(0).iter().zip(output.channel(0).iter()) {
            assert!((x - y).abs() < 1e-3);
        }
    }

    #[test]
    fn test_gain_change_is_bounded() {
        let mut effect = EqEffect::new(&settings());

        let input_data: Vec<f32> = (0..256).map(|i| (i as f32 * 0.3).sin()).collect();
        let input = AudioBuffer::from_mono(&input_data);
        let mut output = AudioBuffer::new(1, 256);

        effect.apply(&EqEffectParams { gains: [1.0; 3] }, &input, &mut output);
        effect.apply(&EqEffectParams { gains: [0.1; 3] }, &input, &mut output);

        assert!(output.channel(0).iter().all(|x| x.abs() <= 1.5));
    }

    #[test]
    fn test_normalize_gains() {
        let mut gains = [0.5, 0.25, 0.125];
        let mut overall = 1.0;
        EqEffect::normalize_gains(&mut gains, &mut overall);

        assert_eq!(gains[0], 1.0);
        assert_eq!(overall, 0.5);

        let mut zero_gains = [0.0; 3];
        let mut overall = 1.0;
        EqEffect::normalize_gains(&mut zero_gains, &mut overall);
        assert_eq!(overall, 0.0);
        assert_eq!(zero_gains, [1.0; 3]);
    }
}
