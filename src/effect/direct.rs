use super::{
    AudioEffectState, DelayEffect, DelayEffectParams, DelayEffectSettings, EqEffect, Equalizer,
    GainEffect,
};
use crate::NUM_BANDS;
use crate::audio_buffer::AudioBuffer;
use crate::audio_settings::AudioSettings;
use crate::error::EchofieldError;

/// Delay applied to the transmitted copy of the signal, in seconds. Models
/// the slower propagation of sound through solid obstacles.
const TRANSMISSION_DELAY: f32 = 0.002;

/// Filters and attenuates an audio signal based on properties of the direct
/// path between a point source and the listener.
///
/// Each component (distance attenuation, air absorption, directivity,
/// occlusion, transmission) is applied only when the corresponding parameter
/// is present; with no parameters set, the input passes through untouched.
#[derive(Debug)]
pub struct DirectEffect {
    frame_size: usize,
    transmission_delay: usize,
    gain_effect: GainEffect,
    eq_effect: EqEffect,
    transmission_gain_effect: GainEffect,
    transmission_eq_effect: EqEffect,
    transmission_delay_effect: DelayEffect,
    scratch: AudioBuffer,
    transmission_scratch: AudioBuffer,
    tail_remaining: bool,
}

/// Settings used to create a direct effect.
#[derive(Debug, Copy, Clone)]
pub struct DirectEffectSettings {
    /// Number of channels of the input and output buffers.
    pub num_channels: usize,
}

/// How sound transmitted through an occluder is modeled.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Transmission {
    /// A single broadband transmission coefficient (the low band's value is
    /// used for all bands).
    FrequencyIndependent(Equalizer<NUM_BANDS>),

    /// Per-band transmission coefficients applied with a 3-band EQ.
    FrequencyDependent(Equalizer<NUM_BANDS>),
}

/// Parameters for applying a direct effect.
///
/// Each optional field enables the corresponding component.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DirectEffectParams {
    /// Distance attenuation, in [0, 1].
    pub distance_attenuation: Option<f32>,

    /// Air absorption gain per band.
    pub air_absorption: Option<Equalizer<NUM_BANDS>>,

    /// Directivity term, in [0, 1].
    pub directivity: Option<f32>,

    /// Occlusion factor, in [0, 1]: the fraction of the source that is
    /// unoccluded.
    pub occlusion: Option<f32>,

    /// Transmission through occluding geometry. Only audible when occlusion
    /// is also enabled.
    pub transmission: Option<Transmission>,
}

impl DirectEffect {
    pub fn try_new(
        audio_settings: &AudioSettings,
        settings: &DirectEffectSettings,
    ) -> Result<Self, EchofieldError> {
        if settings.num_channels == 0 {
            return Err(EchofieldError::InvalidArgument);
        }

        let transmission_delay =
            (TRANSMISSION_DELAY * audio_settings.sampling_rate as f32).ceil() as usize;

        Ok(Self {
            frame_size: audio_settings.frame_size,
            transmission_delay,
            gain_effect: GainEffect::new(audio_settings),
            eq_effect: EqEffect::new(audio_settings),
            transmission_gain_effect: GainEffect::new(audio_settings),
            transmission_eq_effect: EqEffect::new(audio_settings),
            transmission_delay_effect: DelayEffect::new(
                audio_settings,
                &DelayEffectSettings {
                    max_delay: transmission_delay,
                },
            ),
            scratch: AudioBuffer::new(1, audio_settings.frame_size),
            transmission_scratch: AudioBuffer::new(1, audio_settings.frame_size),
            tail_remaining: false,
        })
    }

    pub fn reset(&mut self) {
        self.gain_effect.reset();
        self.eq_effect.reset();
        self.transmission_gain_effect.reset();
        self.transmission_eq_effect.reset();
        self.transmission_delay_effect.reset();
        self.tail_remaining = false;
    }

    /// Applies the direct effect to a mono buffer. Can be applied in-place.
    pub fn apply(
        &mut self,
        params: &DirectEffectParams,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
    ) -> AudioEffectState {
        assert_eq!(input.num_samples(), output.num_samples());
        assert_eq!(input.num_channels(), 1);
        assert_eq!(output.num_channels(), 1);

        // With every component disabled the output is bit-exact with the
        // input.
        if params.distance_attenuation.is_none()
            && params.air_absorption.is_none()
            && params.directivity.is_none()
            && params.occlusion.is_none()
            && params.transmission.is_none()
        {
            output.channel_mut(0).copy_from_slice(input.channel(0));
            return AudioEffectState::TailComplete;
        }

        let occlusion = params.occlusion.unwrap_or(1.0);

        let mut gain = 1.0;
        if let Some(distance_attenuation) = params.distance_attenuation {
            gain *= distance_attenuation;
        }
        if let Some(directivity) = params.directivity {
            gain *= directivity;
        }

        let dry_gain = gain * occlusion;

        // Dry path: ramped gain, then air absorption EQ if present.
        if let Some(air_absorption) = &params.air_absorption {
            self.gain_effect
                .apply_to_slice(dry_gain, input.channel(0), self.scratch.channel_mut(0));
            self.eq_effect.apply_to_slice(
                &air_absorption.0,
                self.scratch.channel(0),
                output.channel_mut(0),
            );
        } else {
            self.gain_effect
                .apply_to_slice(dry_gain, input.channel(0), output.channel_mut(0));
        }

        // Transmission path: the occluded fraction of the signal leaks
        // through the geometry, delayed and filtered.
        self.tail_remaining = false;
        if let (Some(transmission), Some(_)) = (&params.transmission, params.occlusion) {
            let transmitted_fraction = gain * (1.0 - occlusion);

            let delay_state = self.transmission_delay_effect.apply(
                &DelayEffectParams {
                    delay_in_samples: self.transmission_delay,
                },
                input,
                &mut self.transmission_scratch,
            );
            self.tail_remaining = delay_state == AudioEffectState::TailRemaining;

            match transmission {
                Transmission::FrequencyIndependent(coefficients) => {
                    self.transmission_gain_effect.apply_to_slice(
                        transmitted_fraction * coefficients[0].clamp(0.0, 1.0),
                        self.transmission_scratch.channel(0),
                        self.scratch.channel_mut(0),
                    );
                    output.mix(&self.scratch);
                }
                Transmission::FrequencyDependent(coefficients) => {
                    let mut gains = coefficients.0;
                    for value in &mut gains {
                        *value = value.clamp(0.0, 1.0);
                    }
                    self.transmission_gain_effect.apply_to_slice(
                        transmitted_fraction,
                        self.transmission_scratch.channel(0),
                        self.scratch.channel_mut(0),
                    );
                    self.transmission_eq_effect.apply_to_slice(
                        &gains,
                        self.scratch.channel(0),
                        self.transmission_scratch.channel_mut(0),
                    );
                    output.mix(&self.transmission_scratch);
                }
            }
        }

        if self.tail_remaining {
            AudioEffectState::TailRemaining
        } else {
            AudioEffectState::TailComplete
        }
    }

    /// Retrieves a frame of tail samples (the transmission delay line's
    /// contents) after input has stopped.
    pub fn tail(&mut self, output: &mut AudioBuffer) -> AudioEffectState {
        output.make_silent();

        if !self.tail_remaining {
            return AudioEffectState::TailComplete;
        }

        let state = self.transmission_delay_effect.tail(&mut self.transmission_scratch);
        output.mix(&self.transmission_scratch);
        self.tail_remaining = state == AudioEffectState::TailRemaining;
        state
    }

    pub fn tail_size(&self) -> usize {
        self.transmission_delay_effect.tail_size()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AudioSettings {
        AudioSettings {
            sampling_rate: 48_000,
            frame_size: 64,
        }
    }

    #[test]
    fn test_no_flags_is_bit_exact_passthrough() {
        let mut effect = DirectEffect::try_new(&settings(), &DirectEffectSettings { num_channels: 1 })
            .unwrap();

        let input_data: Vec<f32> = (0..64).map(|i| (i as f32 * 0.37).sin() * 0.9).collect();
        let input = AudioBuffer::from_mono(&input_data);
        let mut output = AudioBuffer::new(1, 64);

        let state = effect.apply(&DirectEffectParams::default(), &input, &mut output);

        assert_eq!(state, AudioEffectState::TailComplete);
        assert_eq!(input.channel(0), output.channel(0));
    }

    #[test]
    fn test_distance_attenuation_scales_output() {
        let mut effect = DirectEffect::try_new(&settings(), &DirectEffectSettings { num_channels: 1 })
            .unwrap();

        let input = AudioBuffer::from_mono(&vec![1.0; 64]);
        let mut output = AudioBuffer::new(1, 64);

        let params = DirectEffectParams {
            distance_attenuation: Some(0.25),
            ..Default::default()
        };
        effect.apply(&params, &input, &mut output);

        // First frame applies the gain directly.
        assert!(output.channel(0).iter().all(|&x| (x - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_full_occlusion_without_transmission_is_silent() {
        let mut effect = DirectEffect::try_new(&settings(), &DirectEffectSettings { num_channels: 1 })
            .unwrap();

        let input = AudioBuffer::from_mono(&vec![1.0; 64]);
        let mut output = AudioBuffer::new(1, 64);

        let params = DirectEffectParams {
            occlusion: Some(0.0),
            ..Default::default()
        };
        effect.apply(&params, &input, &mut output);

        assert!(output.channel(0).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_transmission_leaks_through_occluder() {
        let mut effect = DirectEffect::try_new(&settings(), &DirectEffectSettings { num_channels: 1 })
            .unwrap();

        let input = AudioBuffer::from_mono(&vec![1.0; 64]);
        let mut output = AudioBuffer::new(1, 64);

        let params = DirectEffectParams {
            occlusion: Some(0.0),
            transmission: Some(Transmission::FrequencyIndependent(Equalizer([
                0.5, 0.5, 0.5,
            ]))),
            ..Default::default()
        };

        // Run a few frames so the transmission delay line fills.
        for _ in 0..4 {
            effect.apply(&params, &input, &mut output);
        }

        assert!(output.channel(0).iter().any(|&x| x > 0.0));
    }
}
