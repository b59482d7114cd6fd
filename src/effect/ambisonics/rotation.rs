use crate::audio_buffer::AudioBuffer;
use crate::audio_settings::AudioSettings;
use crate::effect::AudioEffectState;
use crate::error::EchofieldError;
use crate::geometry::CoordinateSpace3;
use crate::sh::{self, ShRotation};

/// Rotates an Ambisonic sound field to the listener's orientation.
///
/// Two rotations are maintained (current and previous); on each frame, both
/// are applied and the outputs crossfaded from previous to current across
/// the frame, so orientation changes do not click.
#[derive(Debug)]
pub struct AmbisonicsRotationEffect {
    max_order: usize,
    current: ShRotation,
    previous: ShRotation,
    orientation: CoordinateSpace3,
    first_frame: bool,
    prev_sample: Vec<f32>,
    current_sample: Vec<f32>,
    rotated_prev: Vec<f32>,
    rotated_current: Vec<f32>,
}

/// Settings used to create an [`AmbisonicsRotationEffect`].
#[derive(Debug, Copy, Clone)]
pub struct AmbisonicsRotationEffectSettings {
    /// The largest Ambisonic order that will be rotated.
    pub max_order: usize,
}

/// Parameters for applying an Ambisonics rotation effect.
#[derive(Debug, Copy, Clone)]
pub struct AmbisonicsRotationEffectParams {
    /// The listener orientation to rotate the sound field into.
    pub orientation: CoordinateSpace3,

    /// Ambisonic order of the input.
    pub order: usize,
}

impl AmbisonicsRotationEffect {
    pub fn try_new(
        _audio_settings: &AudioSettings,
        settings: &AmbisonicsRotationEffectSettings,
    ) -> Result<Self, EchofieldError> {
        let num_coeffs = sh::num_coeffs_for_order(settings.max_order);
        let identity = CoordinateSpace3::default();

        Ok(Self {
            max_order: settings.max_order,
            current: ShRotation::new(settings.max_order, &identity),
            previous: ShRotation::new(settings.max_order, &identity),
            orientation: identity,
            first_frame: true,
            prev_sample: vec![0.0; num_coeffs],
            current_sample: vec![0.0; num_coeffs],
            rotated_prev: vec![0.0; num_coeffs],
            rotated_current: vec![0.0; num_coeffs],
        })
    }

    pub fn reset(&mut self) {
        self.first_frame = true;
    }

    pub fn apply(
        &mut self,
        params: &AmbisonicsRotationEffectParams,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
    ) -> AudioEffectState {
        assert!(params.order <= self.max_order);

        let num_coeffs = sh::num_coeffs_for_order(params.order);
        assert!(input.num_channels() >= num_coeffs);
        assert!(output.num_channels() >= num_coeffs);
        assert_eq!(input.num_samples(), output.num_samples());

        if self.first_frame || params.orientation != self.orientation {
            std::mem::swap(&mut self.previous, &mut self.current);
            self.current = ShRotation::new(self.max_order, &params.orientation);
            if self.first_frame {
                self.previous = self.current.clone();
                self.first_frame = false;
            }
            self.orientation = params.orientation;
        }

        let num_samples = input.num_samples();
        for sample in 0..num_samples {
            for channel in 0..num_coeffs {
                self.current_sample[channel] = input.channel(channel)[sample];
            }

            self.previous
                .apply(&self.current_sample[..], &mut self.rotated_prev);
            self.current
                .apply(&self.current_sample[..], &mut self.rotated_current);

            let weight = sample as f32 / num_samples as f32;
            for channel in 0..num_coeffs {
                output.channel_mut(channel)[sample] = (1.0 - weight)
                    * self.rotated_prev[channel]
                    + weight * self.rotated_current[channel];
            }
        }

        // Once the crossfade completes, the previous rotation catches up.
        self.previous = self.current.clone();

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
    use crate::geometry::Vector3;

    #[test]
    fn test_identity_orientation_passes_field_through() {
        let mut effect = AmbisonicsRotationEffect::try_new(
            &AudioSettings::default(),
            &AmbisonicsRotationEffectSettings { max_order: 1 },
        )
        .unwrap();

        let mut input = AudioBuffer::new(4, 128);
        for channel in 0..4 {
            for (i, value) in input.channel_mut(channel).iter_mut().enumerate() {
                *value = ((i + channel) as f32 * 0.1).sin();
            }
        }

        let mut output = AudioBuffer::new(4, 128);
        effect.apply(
            &AmbisonicsRotationEffectParams {
                orientation: CoordinateSpace3::default(),
                order: 1,
            },
            &input,
            &mut output,
        );

        for channel in 0..4 {
            for (x, y) in input.channel(channel).iter().zip(output.channel(channel)) {
                approx::assert_relative_eq!(x, y, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_rotation_preserves_omni_channel() {
        let mut effect = AmbisonicsRotationEffect::try_new(
            &AudioSettings::default(),
            &AmbisonicsRotationEffectSettings { max_order: 2 },
        )
        .unwrap();

        let mut input = AudioBuffer::new(9, 64);
        for channel in 0..9 {
            for value in input.channel_mut(channel).iter_mut() {
                *value = 0.5;
            }
        }

        let orientation = CoordinateSpace3::from_ahead_and_up(
            Vector3::new(1.0, 0.0, -1.0),
            Vector3::UNIT_Y,
            Vector3::ZERO,
        );

        let mut output = AudioBuffer::new(9, 64);
        effect.apply(
            &AmbisonicsRotationEffectParams {
                orientation,
                order: 2,
            },
            &input,
            &mut output,
        );

        // The omni channel is rotation invariant.
        for value in output.channel(0) {
            approx::assert_relative_eq!(*value, 0.5, epsilon = 1e-5);
        }
    }
}
