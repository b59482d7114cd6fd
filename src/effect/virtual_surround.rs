use super::AudioEffectState;
use super::binaural::FirFilter;
use crate::audio_buffer::AudioBuffer;
use crate::audio_settings::AudioSettings;
use crate::error::EchofieldError;
use crate::hrtf::{Hrtf, HrtfInterpolation};
use crate::speaker_layout::SpeakerLayout;
use std::sync::Arc;

/// Renders a surround (speaker-layout) mix binaurally over headphones, by
/// convolving each input channel with the HRIR for its speaker's direction.
#[derive(Debug)]
pub struct VirtualSurroundEffect {
    speaker_layout: SpeakerLayout,
    filters: Vec<[FirFilter; 2]>,
    left_hrir: Vec<f32>,
    right_hrir: Vec<f32>,
}

/// Settings used to create a [`VirtualSurroundEffect`].
#[derive(Debug, Clone)]
pub struct VirtualSurroundEffectSettings {
    /// The layout of the input mix.
    pub speaker_layout: SpeakerLayout,

    /// The HRTF that will be used for rendering.
    pub hrtf: Arc<Hrtf>,
}

/// Parameters for applying a virtual surround effect.
#[derive(Debug, Clone)]
pub struct VirtualSurroundEffectParams {
    /// The HRTF to render with.
    pub hrtf: Arc<Hrtf>,
}

impl VirtualSurroundEffect {
    pub fn try_new(
        _audio_settings: &AudioSettings,
        settings: &VirtualSurroundEffectSettings,
    ) -> Result<Self, EchofieldError> {
        let num_taps = settings.hrtf.num_taps();
        if num_taps == 0 || settings.speaker_layout.num_speakers() == 0 {
            return Err(EchofieldError::InvalidArgument);
        }

        Ok(Self {
            filters: (0..settings.speaker_layout.num_speakers())
                .map(|_| [FirFilter::new(num_taps), FirFilter::new(num_taps)])
                .collect(),
            left_hrir: vec![0.0; num_taps],
            right_hrir: vec![0.0; num_taps],
            speaker_layout: settings.speaker_layout.clone(),
        })
    }

    pub fn reset(&mut self) {
        for pair in &mut self.filters {
            pair[0].reset();
            pair[1].reset();
        }
    }

    pub fn apply(
        &mut self,
        params: &VirtualSurroundEffectParams,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
    ) -> AudioEffectState {
        assert_eq!(input.num_channels(), self.speaker_layout.num_speakers());
        assert_eq!(output.num_channels(), 2);
        assert_eq!(input.num_samples(), output.num_samples());

        output.make_silent();
        let volume = params.hrtf.volume();

        for speaker in 0..self.speaker_layout.num_speakers() {
            params.hrtf.interpolated_hrir(
                self.speaker_layout.speaker(speaker),
                HrtfInterpolation::Nearest,
                &mut self.left_hrir,
                &mut self.right_hrir,
            );

            let (left, right) = output.two_channels_mut(0, 1);
            self.filters[speaker][0].apply_accumulate(
                &self.left_hrir,
                input.channel(speaker),
                volume,
                left,
            );
            self.filters[speaker][1].apply_accumulate(
                &self.right_hrir,
                input.channel(speaker),
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
    fn test_surround_mix_renders_to_stereo() {
        let audio_settings = AudioSettings::default();
        let hrtf =
            Arc::new(Hrtf::try_new(&audio_settings, &HrtfSettings::default()).unwrap());

        let mut effect = VirtualSurroundEffect::try_new(
            &audio_settings,
            &VirtualSurroundEffectSettings {
                speaker_layout: SpeakerLayout::surround_5_1(),
                hrtf: hrtf.clone(),
            },
        )
        .unwrap();

        let mut input = AudioBuffer::new(6, 1024);
        for (i, value) in input.channel_mut(0).iter_mut().enumerate() {
            *value = ((i as f32) * 0.17).sin();
        }

        let mut output = AudioBuffer::new(2, 1024);
        effect.apply(&VirtualSurroundEffectParams { hrtf }, &input, &mut output);

        assert!(output.channel(0).iter().any(|&x| x != 0.0));
        assert!(output.channel(0).iter().all(|x| x.is_finite()));
    }
}
