use super::AudioEffectState;
use crate::audio_buffer::AudioBuffer;
use crate::audio_settings::AudioSettings;

/// Number of frames over which a gain change converges to its target.
const NUM_INTERPOLATION_FRAMES: f32 = 4.0;

/// Applies a smoothly varying gain to a mono signal.
///
/// Gain changes converge over several frames: each frame moves the gain a
/// fraction of the way towards the target, and within the frame the gain is
/// linearly interpolated sample-by-sample to avoid zipper noise.
#[derive(Debug)]
pub struct GainEffect {
    frame_size: usize,
    prev_gain: f32,
    first_frame: bool,
}

/// Parameters for applying a gain effect.
#[derive(Debug, Default, Copy, Clone)]
pub struct GainEffectParams {
    /// The gain to apply.
    pub gain: f32,
}

impl GainEffect {
    pub fn new(audio_settings: &AudioSettings) -> Self {
        Self {
            frame_size: audio_settings.frame_size,
            prev_gain: 0.0,
            first_frame: true,
        }
    }

    pub fn reset(&mut self) {
        self.prev_gain = 0.0;
        self.first_frame = true;
    }

    /// Applies the gain. Can be applied in-place by passing the same buffer
    /// data through [`Self::apply_to_slice`].
    pub fn apply(
        &mut self,
        params: &GainEffectParams,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
    ) -> AudioEffectState {
        assert_eq!(input.num_samples(), self.frame_size);
        assert_eq!(output.num_samples(), self.frame_size);
        assert_eq!(input.num_channels(), 1);
        assert_eq!(output.num_channels(), 1);

        self.apply_to_slice(params.gain, input.channel(0), output.channel_mut(0));

        AudioEffectState::TailComplete
    }

    pub(crate) fn apply_to_slice(&mut self, gain: f32, input: &[f32], output: &mut [f32]) {
        if self.first_frame {
            crate::array_math::scale(input, gain, output);
            self.prev_gain = gain;
            self.first_frame = false;
            return;
        }

        let target_gain = self.prev_gain + (gain - self.prev_gain) / NUM_INTERPOLATION_FRAMES;

        let mut current = self.prev_gain;
        let step = (target_gain - self.prev_gain) / input.len() as f32;

        for (y, x) in output.iter_mut().zip(input.iter()) {
            *y = current * x;
            current += step;
        }

        self.prev_gain = target_gain;
    }

    /// Applies the previous frame's gain, for draining downstream tails.
    pub fn tail_apply(&mut self, input: &AudioBuffer, output: &mut AudioBuffer) -> AudioEffectState {
        let params = GainEffectParams {
            gain: self.prev_gain,
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
}
