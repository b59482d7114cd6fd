use super::{AmbisonicsPanningEffect, AmbisonicsPanningEffectParams, AmbisonicsPanningEffectSettings};
use crate::audio_buffer::AudioBuffer;
use crate::audio_settings::AudioSettings;
use crate::effect::AudioEffectState;
use crate::effect::binaural::FirFilter;
use crate::error::EchofieldError;
use crate::geometry::Vector3;
use crate::hrtf::{Hrtf, HrtfInterpolation};
use crate::sh;
use std::sync::Arc;

/// Renders an Ambisonic sound field binaurally: the field is decoded to a
/// set of virtual loudspeakers, and each virtual speaker is convolved with
/// the HRIR for its direction.
#[derive(Debug)]
pub struct AmbisonicsBinauralEffect {
    panning_effect: AmbisonicsPanningEffect,
    virtual_speakers: Vec<Vector3>,
    speaker_buffer: AudioBuffer,
    // Per-speaker FIR state, [speaker][ear].
    filters: Vec<[FirFilter; 2]>,
    left_hrir: Vec<f32>,
    right_hrir: Vec<f32>,
}

/// Settings used to create an [`AmbisonicsBinauralEffect`].
#[derive(Debug, Clone)]
pub struct AmbisonicsBinauralEffectSettings {
    /// The HRTF that will be used for rendering.
    pub hrtf: Arc<Hrtf>,

    /// The largest Ambisonic order that will be rendered.
    pub max_order: usize,
}

/// Parameters for applying an Ambisonics binaural effect.
#[derive(Debug, Clone)]
pub struct AmbisonicsBinauralEffectParams {
    /// The HRTF to render with.
    pub hrtf: Arc<Hrtf>,

    /// Ambisonic order of the input.
    pub order: usize,
}

/// The virtual loudspeakers form a cube around the listener.
fn virtual_speaker_layout() -> Vec<Vector3> {
    let d = 1.0 / 3.0f32.sqrt();
    vec![
        Vector3::new(-d, -d, -d),
        Vector3::new(d, -d, -d),
        Vector3::new(-d, d, -d),
        Vector3::new(d, d, -d),
        Vector3::new(-d, -d, d),
        Vector3::new(d, -d, d),
        Vector3::new(-d, d, d),
        Vector3::new(d, d, d),
    ]
}

impl AmbisonicsBinauralEffect {
    pub fn try_new(
        audio_settings: &AudioSettings,
        settings: &AmbisonicsBinauralEffectSettings,
    ) -> Result<Self, EchofieldError> {
        let virtual_speakers = virtual_speaker_layout();
        let num_taps = settings.hrtf.num_taps();
        if num_taps == 0 {
            return Err(EchofieldError::InvalidArgument);
        }

        let panning_effect = AmbisonicsPanningEffect::try_new(
            audio_settings,
            &AmbisonicsPanningEffectSettings {
                speaker_layout: crate::speaker_layout::SpeakerLayout::custom(
                    virtual_speakers.clone(),
                ),
                max_order: settings.max_order,
            },
        )?;

        Ok(Self {
            panning_effect,
            speaker_buffer: AudioBuffer::new(8, audio_settings.frame_size),
            filters: (0..8)
                .map(|_| [FirFilter::new(num_taps), FirFilter::new(num_taps)])
                .collect(),
            left_hrir: vec![0.0; num_taps],
            right_hrir: vec![0.0; num_taps],
            virtual_speakers,
        })
    }

    pub fn reset(&mut self) {
        self.panning_effect.reset();
        for pair in &mut self.filters {
            pair[0].reset();
            pair[1].reset();
        }
    }

    pub fn apply(
        &mut self,
        params: &AmbisonicsBinauralEffectParams,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
    ) -> AudioEffectState {
        assert!(input.num_channels() >= sh::num_coeffs_for_order(params.order));
        assert_eq!(output.num_channels(), 2);
        assert_eq!(input.num_samples(), output.num_samples());

        self.panning_effect.apply(
            &AmbisonicsPanningEffectParams {
                order: params.order,
            },
            input,
            &mut self.speaker_buffer,
        );

        output.make_silent();
        let volume = params.hrtf.volume();

        for (speaker, direction) in self.virtual_speakers.iter().enumerate() {
            params.hrtf.interpolated_hrir(
                *direction,
                HrtfInterpolation::Nearest,
                &mut self.left_hrir,
                &mut self.right_hrir,
            );

            let (left, right) = output.two_channels_mut(0, 1);
            self.filters[speaker][0].apply_accumulate(
                &self.left_hrir,
                self.speaker_buffer.channel(speaker),
                volume,
                left,
            );
            self.filters[speaker][1].apply_accumulate(
                &self.right_hrir,
                self.speaker_buffer.channel(speaker),
                volume,
                right,
            );
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
    use crate::hrtf::HrtfSettings;

    #[test]
    fn test_renders_finite_stereo() {
        let audio_settings = AudioSettings::default();
        let hrtf =
            Arc::new(Hrtf::try_new(&audio_settings, &HrtfSettings::default()).unwrap());

        let mut effect = AmbisonicsBinauralEffect::try_new(
            &audio_settings,
            &AmbisonicsBinauralEffectSettings {
                hrtf: hrtf.clone(),
                max_order: 2,
            },
        )
        .unwrap();

        let mut input = AudioBuffer::new(9, 1024);
        sh_field_into(&mut input);

        let mut output = AudioBuffer::new(2, 1024);
        effect.apply(
            &AmbisonicsBinauralEffectParams { hrtf, order: 2 },
            &input,
            &mut output,
        );

        assert!(output.channel(0).iter().all(|x| x.is_finite()));
        assert!(output.channel(1).iter().all(|x| x.is_finite()));
        assert!(output.channel(0).iter().any(|&x| x != 0.0));
    }

    fn sh_field_into(input: &mut AudioBuffer) {
        let direction = Vector3::new(0.4, 0.1, -0.9).normalized();
        let mut coeffs = vec![0.0f32; 9];
        sh::project_single_point_and_update(direction, 2, 1.0, &mut coeffs);

        for (channel, &coeff) in coeffs.iter().enumerate() {
            for (i, value) in input.channel_mut(channel).iter_mut().enumerate() {
                *value = coeff * ((i as f32) * 0.21).sin();
            }
        }
    }
}
