use super::AudioEffectState;
use crate::audio_buffer::AudioBuffer;
use crate::audio_settings::AudioSettings;
use crate::error::EchofieldError;
use crate::geometry::Vector3;
use crate::speaker_layout::SpeakerLayout;

/// Pans a mono point source to a multi-channel speaker layout based on its
/// direction relative to the listener.
///
/// Per-speaker gains ramp linearly across the frame when the direction
/// changes, to avoid zipper noise.
#[derive(Debug)]
pub struct PanningEffect {
    speaker_layout: SpeakerLayout,
    prev_gains: Vec<f32>,
    gains: Vec<f32>,
    first_frame: bool,
}

/// Settings used to create a [`PanningEffect`].
#[derive(Debug, Clone)]
pub struct PanningEffectSettings {
    /// The speaker layout to pan to.
    pub speaker_layout: SpeakerLayout,
}

/// Parameters for applying a panning effect.
#[derive(Debug, Copy, Clone)]
pub struct PanningEffectParams {
    /// Unit direction from the listener to the source, in the listener's
    /// coordinate space.
    pub direction: Vector3,
}

impl PanningEffect {
    pub fn try_new(
        _audio_settings: &AudioSettings,
        settings: &PanningEffectSettings,
    ) -> Result<Self, EchofieldError> {
        if settings.speaker_layout.num_speakers() == 0 {
            return Err(EchofieldError::InvalidArgument);
        }

        let num_speakers = settings.speaker_layout.num_speakers();
        Ok(Self {
            speaker_layout: settings.speaker_layout.clone(),
            prev_gains: vec![0.0; num_speakers],
            gains: vec![0.0; num_speakers],
            first_frame: true,
        })
    }

    pub fn reset(&mut self) {
        self.prev_gains.fill(0.0);
        self.first_frame = true;
    }

    pub fn apply(
        &mut self,
        params: &PanningEffectParams,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
    ) -> AudioEffectState {
        assert_eq!(input.num_channels(), 1);
        assert_eq!(output.num_channels(), self.speaker_layout.num_speakers());
        assert_eq!(input.num_samples(), output.num_samples());

        self.speaker_layout
            .panning_gains(params.direction, &mut self.gains);

        if self.first_frame {
            self.prev_gains.copy_from_slice(&self.gains);
            self.first_frame = false;
        }

        let num_samples = input.num_samples();
        for speaker in 0..self.speaker_layout.num_speakers() {
            let start_gain = self.prev_gains[speaker];
            let step = (self.gains[speaker] - start_gain) / num_samples as f32;

            let mut gain = start_gain;
            for (y, x) in output
                .channel_mut(speaker)
                .iter_mut()
                .zip(input.channel(0).iter())
            {
                *y = gain * x;
                gain += step;
            }
        }

        self.prev_gains.copy_from_slice(&self.gains);

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_source_is_balanced() {
        let audio_settings = AudioSettings::default();
        let mut effect = PanningEffect::try_new(
            &audio_settings,
            &PanningEffectSettings {
                speaker_layout: SpeakerLayout::stereo(),
            },
        )
        .unwrap();

        let input = AudioBuffer::from_mono(&vec![1.0; 1024]);
        let mut output = AudioBuffer::new(2, 1024);

        effect.apply(
            &PanningEffectParams {
                direction: Vector3::new(0.0, 0.0, -1.0),
            },
            &input,
            &mut output,
        );

        let left: f32 = output.channel(0).iter().sum();
        let right: f32 = output.channel(1).iter().sum();
        approx::assert_relative_eq!(left, right, epsilon = 1e-4);
        assert!(left > 0.0);
    }
}
