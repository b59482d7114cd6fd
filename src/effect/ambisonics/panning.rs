use crate::audio_buffer::AudioBuffer;
use crate::audio_settings::AudioSettings;
use crate::effect::AudioEffectState;
use crate::error::EchofieldError;
use crate::sh;
use crate::speaker_layout::SpeakerLayout;

/// Decodes an Ambisonic sound field to a speaker layout by sampling the
/// field in each speaker's direction.
///
/// The decode matrix is `D[s][c] = (4π / S) · Y_c(d_s)`, which reproduces an
/// omnidirectional field at its original level.
#[derive(Debug)]
pub struct AmbisonicsPanningEffect {
    speaker_layout: SpeakerLayout,
    max_order: usize,
    // decode_matrix[speaker][channel]
    decode_matrix: Vec<Vec<f32>>,
}

/// Settings used to create an [`AmbisonicsPanningEffect`].
#[derive(Debug, Clone)]
pub struct AmbisonicsPanningEffectSettings {
    /// The speaker layout to decode to.
    pub speaker_layout: SpeakerLayout,

    /// The largest Ambisonic order that will be decoded.
    pub max_order: usize,
}

/// Parameters for applying an Ambisonics panning effect.
#[derive(Debug, Copy, Clone)]
pub struct AmbisonicsPanningEffectParams {
    /// Ambisonic order of the input.
    pub order: usize,
}

impl AmbisonicsPanningEffect {
    pub fn try_new(
        _audio_settings: &AudioSettings,
        settings: &AmbisonicsPanningEffectSettings,
    ) -> Result<Self, EchofieldError> {
        let num_speakers = settings.speaker_layout.num_speakers();
        if num_speakers == 0 {
            return Err(EchofieldError::InvalidArgument);
        }

        let num_coeffs = sh::num_coeffs_for_order(settings.max_order);
        let weight = 4.0 * std::f32::consts::PI / num_speakers as f32;

        let mut decode_matrix = Vec::with_capacity(num_speakers);
        for speaker in 0..num_speakers {
            let direction = settings.speaker_layout.speaker(speaker);
            let mut row = vec![0.0; num_coeffs];
            for l in 0..=settings.max_order as i32 {
                for m in -l..=l {
                    row[sh::index_for_degree_and_order(l, m)] =
                        weight * sh::evaluate(l, m, direction);
                }
            }
            decode_matrix.push(row);
        }

        Ok(Self {
            speaker_layout: settings.speaker_layout.clone(),
            max_order: settings.max_order,
            decode_matrix,
        })
    }

    pub fn reset(&mut self) {}

    pub fn apply(
        &mut self,
        params: &AmbisonicsPanningEffectParams,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
    ) -> AudioEffectState {
        assert!(params.order <= self.max_order);

        let num_coeffs = sh::num_coeffs_for_order(params.order).min(input.num_channels());
        assert_eq!(output.num_channels(), self.speaker_layout.num_speakers());
        assert_eq!(input.num_samples(), output.num_samples());

        for speaker in 0..self.speaker_layout.num_speakers() {
            let row = &self.decode_matrix[speaker];
            let out = output.channel_mut(speaker);
            out.fill(0.0);

            for (channel, &gain) in row.iter().enumerate().take(num_coeffs) {
                crate::array_math::scale_accumulate(input.channel(channel), gain, out);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vector3;

    #[test]
    fn test_omni_field_decodes_evenly() {
        let mut effect = AmbisonicsPanningEffect::try_new(
            &AudioSettings::default(),
            &AmbisonicsPanningEffectSettings {
                speaker_layout: SpeakerLayout::quadraphonic(),
                max_order: 1,
            },
        )
        .unwrap();

        // An omni field of unit amplitude: a_0 = Y_00, others zero.
        let mut input = AudioBuffer::new(4, 64);
        let omni = sh::evaluate(0, 0, Vector3::new(0.0, 0.0, -1.0));
        for value in input.channel_mut(0).iter_mut() {
            *value = omni;
        }

        let mut output = AudioBuffer::new(4, 64);
        effect.apply(&AmbisonicsPanningEffectParams { order: 1 }, &input, &mut output);

        // Every speaker receives the field at 1/S of the original level.
        for speaker in 0..4 {
            approx::assert_relative_eq!(output.channel(speaker)[0], 0.25, epsilon = 1e-4);
        }
    }
}
