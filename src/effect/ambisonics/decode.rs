use super::{
    AmbisonicsBinauralEffect, AmbisonicsBinauralEffectParams, AmbisonicsBinauralEffectSettings,
    AmbisonicsPanningEffect, AmbisonicsPanningEffectParams, AmbisonicsPanningEffectSettings,
    AmbisonicsRotationEffect, AmbisonicsRotationEffectParams, AmbisonicsRotationEffectSettings,
};
use crate::audio_buffer::AudioBuffer;
use crate::audio_settings::AudioSettings;
use crate::effect::AudioEffectState;
use crate::error::EchofieldError;
use crate::geometry::CoordinateSpace3;
use crate::hrtf::Hrtf;
use crate::sh;
use crate::speaker_layout::SpeakerLayout;
use std::sync::Arc;

/// Applies a rotation to an Ambisonic sound field, then decodes it to a
/// speaker layout or binaurally.
///
/// The decode mode is chosen at creation time: virtual loudspeakers decoded
/// via spherical harmonics ([`AmbisonicsPanningEffect`]), or per-speaker
/// HRTF convolution ([`AmbisonicsBinauralEffect`]).
#[derive(Debug)]
pub struct AmbisonicsDecodeEffect {
    rotation_effect: AmbisonicsRotationEffect,
    rotated: AudioBuffer,
    kind: DecodeKind,
}

#[derive(Debug)]
enum DecodeKind {
    Panning(AmbisonicsPanningEffect),
    Binaural(AmbisonicsBinauralEffect),
}

/// Settings used to create an [`AmbisonicsDecodeEffect`].
#[derive(Debug, Clone)]
pub struct AmbisonicsDecodeEffectSettings {
    /// The speaker layout to decode to (panning mode).
    pub speaker_layout: SpeakerLayout,

    /// The largest Ambisonic order that will be decoded.
    pub max_order: usize,

    /// When set, decode binaurally through this HRTF instead of panning to
    /// the speaker layout.
    pub hrtf: Option<Arc<Hrtf>>,
}

/// Parameters for applying an Ambisonics decode effect.
#[derive(Debug, Clone)]
pub struct AmbisonicsDecodeEffectParams {
    /// Ambisonic order of the input.
    pub order: usize,

    /// The listener's orientation; the field is rotated into the listener's
    /// frame before decoding.
    pub orientation: CoordinateSpace3,

    /// The HRTF to use when the effect was created in binaural mode.
    pub binaural: Option<Arc<Hrtf>>,
}

impl AmbisonicsDecodeEffect {
    pub fn try_new(
        audio_settings: &AudioSettings,
        settings: &AmbisonicsDecodeEffectSettings,
    ) -> Result<Self, EchofieldError> {
        let kind = match &settings.hrtf {
            Some(hrtf) => DecodeKind::Binaural(AmbisonicsBinauralEffect::try_new(
                audio_settings,
                &AmbisonicsBinauralEffectSettings {
                    hrtf: hrtf.clone(),
                    max_order: settings.max_order,
                },
            )?),
            None => DecodeKind::Panning(AmbisonicsPanningEffect::try_new(
                audio_settings,
                &AmbisonicsPanningEffectSettings {
                    speaker_layout: settings.speaker_layout.clone(),
                    max_order: settings.max_order,
                },
            )?),
        };

        Ok(Self {
            rotation_effect: AmbisonicsRotationEffect::try_new(
                audio_settings,
                &AmbisonicsRotationEffectSettings {
                    max_order: settings.max_order,
                },
            )?,
            rotated: AudioBuffer::new(
                sh::num_coeffs_for_order(settings.max_order),
                audio_settings.frame_size,
            ),
            kind,
        })
    }

    pub fn reset(&mut self) {
        self.rotation_effect.reset();
        match &mut self.kind {
            DecodeKind::Panning(effect) => effect.reset(),
            DecodeKind::Binaural(effect) => effect.reset(),
        }
    }

    pub fn apply(
        &mut self,
        params: &AmbisonicsDecodeEffectParams,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
    ) -> AudioEffectState {
        self.rotation_effect.apply(
            &AmbisonicsRotationEffectParams {
                orientation: params.orientation,
                order: params.order,
            },
            input,
            &mut self.rotated,
        );

        match &mut self.kind {
            DecodeKind::Panning(effect) => effect.apply(
                &AmbisonicsPanningEffectParams {
                    order: params.order,
                },
                &self.rotated,
                output,
            ),
            DecodeKind::Binaural(effect) => {
                let hrtf = params
                    .binaural
                    .clone()
                    .expect("binaural decode requires an HRTF in the params");
                effect.apply(
                    &AmbisonicsBinauralEffectParams {
                        hrtf,
                        order: params.order,
                    },
                    &self.rotated,
                    output,
                )
            }
        }
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
    fn test_panned_decode_produces_output() {
        let audio_settings = AudioSettings::default();
        let mut effect = AmbisonicsDecodeEffect::try_new(
            &audio_settings,
            &AmbisonicsDecodeEffectSettings {
                speaker_layout: SpeakerLayout::stereo(),
                max_order: 1,
                hrtf: None,
            },
        )
        .unwrap();

        let mut input = AudioBuffer::new(4, 1024);
        let mut coeffs = vec![0.0f32; 4];
        sh::project_single_point_and_update(
            Vector3::new(1.0, 0.0, 0.0),
            1,
            1.0,
            &mut coeffs,
        );
        for (channel, &coeff) in coeffs.iter().enumerate() {
            for value in input.channel_mut(channel).iter_mut() {
                *value = coeff;
            }
        }

        let mut output = AudioBuffer::new(2, 1024);
        effect.apply(
            &AmbisonicsDecodeEffectParams {
                order: 1,
                orientation: CoordinateSpace3::default(),
                binaural: None,
            },
            &input,
            &mut output,
        );

        // A source to the right lands mostly in the right channel.
        let left: f32 = output.channel(0).iter().map(|x| x.abs()).sum();
        let right: f32 = output.channel(1).iter().map(|x| x.abs()).sum();
        assert!(right > left);
    }
}
