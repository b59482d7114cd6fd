use crate::audio_buffer::AudioBuffer;
use crate::audio_settings::AudioSettings;
use crate::effect::AudioEffectState;
use crate::error::EchofieldError;
use crate::geometry::Vector3;
use crate::sh;

/// Encodes a mono point source into an Ambisonic sound field.
///
/// Each output channel carries the input scaled by the corresponding
/// spherical harmonic evaluated in the source direction. Coefficients ramp
/// linearly across the frame when the direction changes.
#[derive(Debug)]
pub struct AmbisonicsEncodeEffect {
    max_order: usize,
    prev_coeffs: Vec<f32>,
    coeffs: Vec<f32>,
    first_frame: bool,
}

/// Settings used to create an [`AmbisonicsEncodeEffect`].
#[derive(Debug, Copy, Clone)]
pub struct AmbisonicsEncodeEffectSettings {
    /// The largest Ambisonic order that will be encoded.
    pub max_order: usize,
}

/// Parameters for applying an Ambisonics encode effect.
#[derive(Debug, Copy, Clone)]
pub struct AmbisonicsEncodeEffectParams {
    /// Unit direction from the listener to the source.
    pub direction: Vector3,

    /// Ambisonic order to encode at.
    pub order: usize,
}

impl AmbisonicsEncodeEffect {
    pub fn try_new(
        _audio_settings: &AudioSettings,
        settings: &AmbisonicsEncodeEffectSettings,
    ) -> Result<Self, EchofieldError> {
        let num_coeffs = sh::num_coeffs_for_order(settings.max_order);

        Ok(Self {
            max_order: settings.max_order,
            prev_coeffs: vec![0.0; num_coeffs],
            coeffs: vec![0.0; num_coeffs],
            first_frame: true,
        })
    }

    pub fn reset(&mut self) {
        self.prev_coeffs.fill(0.0);
        self.first_frame = true;
    }

    pub fn apply(
        &mut self,
        params: &AmbisonicsEncodeEffectParams,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
    ) -> AudioEffectState {
        assert!(params.order <= self.max_order);
        assert_eq!(input.num_channels(), 1);

        let num_coeffs = sh::num_coeffs_for_order(params.order);
        assert!(output.num_channels() >= num_coeffs);
        assert_eq!(input.num_samples(), output.num_samples());

        self.coeffs[..num_coeffs].fill(0.0);
        sh::project_single_point_and_update(
            params.direction,
            params.order,
            1.0,
            &mut self.coeffs[..num_coeffs],
        );

        if self.first_frame {
            self.prev_coeffs.copy_from_slice(&self.coeffs);
            self.first_frame = false;
        }

        let num_samples = input.num_samples();
        for channel in 0..num_coeffs {
            let start = self.prev_coeffs[channel];
            let step = (self.coeffs[channel] - start) / num_samples as f32;

            let mut coeff = start;
            for (y, x) in output
                .channel_mut(channel)
                .iter_mut()
                .zip(input.channel(0).iter())
            {
                *y = coeff * x;
                coeff += step;
            }
        }

        for channel in num_coeffs..output.num_channels() {
            output.channel_mut(channel).fill(0.0);
        }

        self.prev_coeffs.copy_from_slice(&self.coeffs);

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
    fn test_omni_channel_carries_signal() {
        let mut effect = AmbisonicsEncodeEffect::try_new(
            &AudioSettings::default(),
            &AmbisonicsEncodeEffectSettings { max_order: 1 },
        )
        .unwrap();

        let input = AudioBuffer::from_mono(&vec![1.0; 1024]);
        let mut output = AudioBuffer::new(4, 1024);

        effect.apply(
            &AmbisonicsEncodeEffectParams {
                direction: Vector3::new(0.0, 0.0, -1.0),
                order: 1,
            },
            &input,
            &mut output,
        );

        let expected = sh::evaluate(0, 0, Vector3::new(0.0, 0.0, -1.0));
        approx::assert_relative_eq!(output.channel(0)[512], expected, epsilon = 1e-5);
    }
}
