use super::{
    AudioEffectState, BinauralEffect, BinauralEffectParams, BinauralEffectSettings, EqEffect,
    EqEffectParams,
};
use crate::NUM_BANDS;
use crate::audio_buffer::AudioBuffer;
use crate::audio_settings::AudioSettings;
use crate::error::EchofieldError;
use crate::geometry::Vector3;
use crate::hrtf::{Hrtf, HrtfInterpolation};
use crate::sh;
use crate::speaker_layout::SpeakerLayout;
use std::sync::Arc;

/// Renders the output of the path simulator: an Ambisonic sound field
/// describing one or more propagation paths, plus an EQ describing the
/// low-pass filtering due to diffraction.
///
/// The SH coefficients are projected through a loudspeaker decoder; the
/// input is EQ'd, then either panned to the speaker layout with the decoded
/// gains, or (in binaural mode) the decoded sum is spatialized with an HRTF
/// in the paths' average direction.
#[derive(Debug)]
pub struct PathEffect {
    max_order: usize,
    speaker_layout: SpeakerLayout,
    eq_effect: EqEffect,
    eq_temp: AudioBuffer,
    binaural_effect: Option<BinauralEffect>,
    prev_gains: Vec<f32>,
    gains: Vec<f32>,
    first_frame: bool,
}

/// Settings used to create a [`PathEffect`].
#[derive(Debug, Clone)]
pub struct PathEffectSettings {
    /// The largest Ambisonic order of the simulated sound fields.
    pub max_order: usize,

    /// The speaker layout to render to.
    pub speaker_layout: SpeakerLayout,

    /// When set, enables binaural rendering through this HRTF.
    pub hrtf: Option<Arc<Hrtf>>,
}

/// Parameters for applying a path effect.
#[derive(Debug, Clone)]
pub struct PathEffectParams<'a> {
    /// SH coefficients describing the directional distribution of pathed
    /// sound, as produced by the path simulator.
    pub sh_coefficients: &'a [f32],

    /// Per-band EQ describing diffraction filtering, normalized to peak 1.
    pub eq_gains: [f32; NUM_BANDS],

    /// Ambisonic order of `sh_coefficients`.
    pub order: usize,

    /// Weighted average direction of the paths, used for binaural
    /// rendering.
    pub avg_direction: Vector3,

    /// Render binaurally instead of panning to the speaker layout.
    pub binaural: bool,

    /// The HRTF to use for binaural rendering.
    pub hrtf: Option<Arc<Hrtf>>,
}

impl PathEffect {
    pub fn try_new(
        audio_settings: &AudioSettings,
        settings: &PathEffectSettings,
    ) -> Result<Self, EchofieldError> {
        let num_speakers = settings.speaker_layout.num_speakers();
        if num_speakers == 0 {
            return Err(EchofieldError::InvalidArgument);
        }

        let binaural_effect = match &settings.hrtf {
            Some(hrtf) => Some(BinauralEffect::try_new(
                audio_settings,
                &BinauralEffectSettings { hrtf: hrtf.clone() },
            )?),
            None => None,
        };

        Ok(Self {
            max_order: settings.max_order,
            speaker_layout: settings.speaker_layout.clone(),
            eq_effect: EqEffect::new(audio_settings),
            eq_temp: AudioBuffer::new(1, audio_settings.frame_size),
            binaural_effect,
            prev_gains: vec![0.0; num_speakers],
            gains: vec![0.0; num_speakers],
            first_frame: true,
        })
    }

    pub fn reset(&mut self) {
        self.eq_effect.reset();
        if let Some(effect) = &mut self.binaural_effect {
            effect.reset();
        }
        self.first_frame = true;
    }

    pub fn apply(
        &mut self,
        params: &PathEffectParams,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
    ) -> AudioEffectState {
        assert!(params.order <= self.max_order);
        assert_eq!(input.num_channels(), 1);
        assert_eq!(input.num_samples(), output.num_samples());

        let num_coeffs = sh::num_coeffs_for_order(params.order);
        assert!(params.sh_coefficients.len() >= num_coeffs);

        self.eq_effect.apply(
            &EqEffectParams {
                gains: params.eq_gains,
            },
            input,
            &mut self.eq_temp,
        );

        // Project the sound field onto the speaker layout.
        let weight = 4.0 * std::f32::consts::PI / self.speaker_layout.num_speakers() as f32;
        for speaker in 0..self.speaker_layout.num_speakers() {
            self.gains[speaker] = weight
                * sh::evaluate_sum(
                    params.order,
                    &params.sh_coefficients[..num_coeffs],
                    self.speaker_layout.speaker(speaker),
                );
        }

        if self.first_frame {
            self.prev_gains.copy_from_slice(&self.gains);
            self.first_frame = false;
        }

        if params.binaural {
            let hrtf = params
                .hrtf
                .clone()
                .expect("binaural path rendering requires an HRTF");
            assert_eq!(output.num_channels(), 2);

            // Panoramize the decoded sum in the average path direction.
            let total_gain: f32 = self.gains.iter().sum();
            self.eq_temp.scale(total_gain);

            let binaural_effect = self
                .binaural_effect
                .as_mut()
                .expect("effect was created without binaural support");
            binaural_effect.apply(
                &BinauralEffectParams {
                    direction: params.avg_direction,
                    interpolation: HrtfInterpolation::Bilinear,
                    spatial_blend: 1.0,
                    hrtf,
                },
                &self.eq_temp,
                output,
            );
        } else {
            assert_eq!(output.num_channels(), self.speaker_layout.num_speakers());

            let num_samples = input.num_samples();
            for speaker in 0..self.speaker_layout.num_speakers() {
                let start = self.prev_gains[speaker];
                let step = (self.gains[speaker] - start) / num_samples as f32;

                let mut gain = start;
                for (y, x) in output
                    .channel_mut(speaker)
                    .iter_mut()
                    .zip(self.eq_temp.channel(0).iter())
                {
                    *y = gain * x;
                    gain += step;
                }
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
    fn test_pathed_source_is_directional() {
        let audio_settings = AudioSettings::default();
        let mut effect = PathEffect::try_new(
            &audio_settings,
            &PathEffectSettings {
                max_order: 1,
                speaker_layout: SpeakerLayout::stereo(),
                hrtf: None,
            },
        )
        .unwrap();

        // A path arriving from the right.
        let mut coeffs = vec![0.0f32; 4];
        sh::project_single_point_and_update(Vector3::new(1.0, 0.0, 0.0), 1, 1.0, &mut coeffs);

        let input = AudioBuffer::from_mono(&vec![0.5; 1024]);
        let mut output = AudioBuffer::new(2, 1024);

        effect.apply(
            &PathEffectParams {
                sh_coefficients: &coeffs,
                eq_gains: [1.0; NUM_BANDS],
                order: 1,
                avg_direction: Vector3::new(1.0, 0.0, 0.0),
                binaural: false,
                hrtf: None,
            },
            &input,
            &mut output,
        );

        let left: f32 = output.channel(0).iter().map(|x| x.abs()).sum();
        let right: f32 = output.channel(1).iter().map(|x| x.abs()).sum();
        assert!(right > left);
    }
}
