use super::{
    AudioEffectState, DelayEffect, DelayEffectParams, DelayEffectSettings, EqEffect, EqEffectParams,
    FftIr, GainEffect, GainEffectParams, OverlapSaveConvolutionEffect,
    OverlapSaveConvolutionEffectParams, OverlapSaveConvolutionEffectSettings, ReverbEffect,
    ReverbEffectParams,
};
use crate::NUM_BANDS;
use crate::audio_buffer::AudioBuffer;
use crate::audio_settings::AudioSettings;
use crate::error::EchofieldError;
use crate::reverb_estimator::Reverb;
use crate::sh;

/// Renders reflections with convolution for the early part of the impulse
/// response and the parametric reverb for the late tail, crossfaded over an
/// overlap region.
///
/// The parametric branch chains delay → EQ → gain → reverb, where the delay
/// aligns the tail with the end of the convolved segment and the EQ/gain
/// match levels at the transition (see
/// [`HybridReverbEstimator`](crate::HybridReverbEstimator)).
#[derive(Debug)]
pub struct HybridReverbEffect {
    frame_size: usize,
    convolution_effect: OverlapSaveConvolutionEffect,
    parametric_effect: ReverbEffect,
    eq_effect: EqEffect,
    gain_effect: GainEffect,
    delay_effect: DelayEffect,
    delay_temp: AudioBuffer,
    eq_temp: AudioBuffer,
    gain_temp: AudioBuffer,
    reverb_temp: AudioBuffer,
    convolution_state: AudioEffectState,
    parametric_state: AudioEffectState,
    eq_state: AudioEffectState,
    gain_state: AudioEffectState,
    delay_state: AudioEffectState,
}

/// Settings used to create a [`HybridReverbEffect`].
#[derive(Debug, Copy, Clone)]
pub struct HybridReverbEffectSettings {
    /// Number of channels of the convolved (Ambisonic) output.
    pub num_channels: usize,

    /// The largest IR length (in samples) the convolution stage supports.
    pub ir_size: usize,
}

/// Parameters for applying a hybrid reverb effect.
#[derive(Debug)]
pub struct HybridReverbEffectParams<'a> {
    /// The early-reflections IR, or `None` to render parametrically only.
    pub fft_ir: Option<&'a FftIr>,

    /// Decay times for the parametric tail.
    pub reverb: Reverb,

    /// EQ matching the tail's spectrum to the transition point.
    pub eq_coeffs: [f32; NUM_BANDS],

    /// Delay (in samples) aligning the tail with the transition.
    pub delay: usize,

    /// Number of IR channels to render.
    pub num_channels: usize,

    /// Number of IR samples to render.
    pub num_samples: usize,
}

impl HybridReverbEffect {
    pub fn try_new(
        audio_settings: &AudioSettings,
        settings: &HybridReverbEffectSettings,
    ) -> Result<Self, EchofieldError> {
        Ok(Self {
            frame_size: audio_settings.frame_size,
            convolution_effect: OverlapSaveConvolutionEffect::try_new(
                audio_settings,
                &OverlapSaveConvolutionEffectSettings {
                    num_channels: settings.num_channels,
                    ir_size: settings.ir_size,
                },
            )?,
            parametric_effect: ReverbEffect::new(audio_settings),
            eq_effect: EqEffect::new(audio_settings),
            gain_effect: GainEffect::new(audio_settings),
            delay_effect: DelayEffect::new(
                audio_settings,
                &DelayEffectSettings {
                    max_delay: 2 * settings.ir_size,
                },
            ),
            delay_temp: AudioBuffer::new(1, audio_settings.frame_size),
            eq_temp: AudioBuffer::new(1, audio_settings.frame_size),
            gain_temp: AudioBuffer::new(1, audio_settings.frame_size),
            reverb_temp: AudioBuffer::new(1, audio_settings.frame_size),
            convolution_state: AudioEffectState::TailComplete,
            parametric_state: AudioEffectState::TailComplete,
            eq_state: AudioEffectState::TailComplete,
            gain_state: AudioEffectState::TailComplete,
            delay_state: AudioEffectState::TailComplete,
        })
    }

    pub fn reset(&mut self) {
        self.convolution_effect.reset();
        self.parametric_effect.reset();
        self.eq_effect.reset();
        self.gain_effect.reset();
        self.delay_effect.reset();

        self.convolution_state = AudioEffectState::TailComplete;
        self.parametric_state = AudioEffectState::TailComplete;
        self.eq_state = AudioEffectState::TailComplete;
        self.gain_state = AudioEffectState::TailComplete;
        self.delay_state = AudioEffectState::TailComplete;
    }

    /// Applies the effect to a mono input, writing an Ambisonic output.
    pub fn apply(
        &mut self,
        params: &HybridReverbEffectParams,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
    ) -> AudioEffectState {
        assert_eq!(input.num_samples(), output.num_samples());
        assert_eq!(input.num_channels(), 1);

        // Early part: convolution with the truncated IR.
        if let Some(fft_ir) = params.fft_ir {
            self.convolution_state = self.convolution_effect.apply(
                &OverlapSaveConvolutionEffectParams {
                    fft_ir,
                    num_channels: params.num_channels,
                    num_samples: params.num_samples,
                },
                input,
                output,
            );
        } else {
            output.make_silent();
            self.convolution_state = AudioEffectState::TailComplete;
        }

        // Late tail: delay, EQ, gain, parametric reverb.
        let mut eq_gains = params.eq_coeffs;
        let mut gain = 16.0;
        EqEffect::normalize_gains(&mut eq_gains, &mut gain);

        self.delay_state = self.delay_effect.apply(
            &DelayEffectParams {
                delay_in_samples: params.delay,
            },
            input,
            &mut self.delay_temp,
        );

        self.eq_state = self.eq_effect.apply(
            &EqEffectParams { gains: eq_gains },
            &self.delay_temp,
            &mut self.eq_temp,
        );

        self.gain_state =
            self.gain_effect
                .apply(&GainEffectParams { gain }, &self.eq_temp, &mut self.gain_temp);

        self.parametric_state = self.parametric_effect.apply(
            &ReverbEffectParams {
                reverb: params.reverb,
            },
            &self.gain_temp,
            &mut self.reverb_temp,
        );

        // The parametric tail is omnidirectional; scale it into the omni
        // channel's normalization and add.
        let scalar = sh::evaluate(0, 0, crate::geometry::Vector3::ZERO);
        let omni = output.channel_mut(0);
        for (y, x) in omni.iter_mut().zip(self.reverb_temp.channel(0).iter()) {
            *y += scalar * x;
        }

        self.combined_state()
    }

    pub fn tail(&mut self, output: &mut AudioBuffer) -> AudioEffectState {
        output.make_silent();

        if self.convolution_state == AudioEffectState::TailRemaining {
            self.convolution_state = self.convolution_effect.tail(output);
        }

        if self.parametric_state == AudioEffectState::TailRemaining
            || self.eq_state == AudioEffectState::TailRemaining
            || self.gain_state == AudioEffectState::TailRemaining
            || self.delay_state == AudioEffectState::TailRemaining
        {
            if self.delay_state == AudioEffectState::TailRemaining {
                self.delay_state = self.delay_effect.tail(&mut self.delay_temp);
                self.eq_state = self.eq_effect.tail_apply(&self.delay_temp, &mut self.eq_temp);
                self.gain_state = self
                    .gain_effect
                    .tail_apply(&self.eq_temp, &mut self.gain_temp);
                self.parametric_state = self
                    .parametric_effect
                    .tail_apply(&self.gain_temp, &mut self.reverb_temp);
            } else {
                self.parametric_state = self.parametric_effect.tail(&mut self.reverb_temp);
            }

            let scalar = sh::evaluate(0, 0, crate::geometry::Vector3::ZERO);
            let omni = output.channel_mut(0);
            for (y, x) in omni.iter_mut().zip(self.reverb_temp.channel(0).iter()) {
                *y += scalar * x;
            }
        }

        self.combined_state()
    }

    pub fn tail_size(&self) -> usize {
        self.convolution_effect
            .tail_size()
            .max(self.parametric_effect.tail_size())
            .max(self.delay_effect.tail_size())
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn combined_state(&self) -> AudioEffectState {
        if self.convolution_state == AudioEffectState::TailRemaining
            || self.parametric_state == AudioEffectState::TailRemaining
            || self.eq_state == AudioEffectState::TailRemaining
            || self.gain_state == AudioEffectState::TailRemaining
            || self.delay_state == AudioEffectState::TailRemaining
        {
            AudioEffectState::TailRemaining
        } else {
            AudioEffectState::TailComplete
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impulse_response::{ImpulseResponse, ImpulseResponseSettings};

    #[test]
    fn test_parametric_only_renders_tail() {
        let audio_settings = AudioSettings {
            sampling_rate: 48_000,
            frame_size: 1024,
        };

        let mut effect = HybridReverbEffect::try_new(
            &audio_settings,
            &HybridReverbEffectSettings {
                num_channels: 4,
                ir_size: 4800,
            },
        )
        .unwrap();

        let mut impulse = vec![0.0; 1024];
        impulse[0] = 1.0;
        let input = AudioBuffer::from_mono(&impulse);
        let mut output = AudioBuffer::new(4, 1024);

        let params = HybridReverbEffectParams {
            fft_ir: None,
            reverb: Reverb {
                reverb_times: [0.5; NUM_BANDS],
            },
            eq_coeffs: [1.0; NUM_BANDS],
            delay: 100,
            num_channels: 4,
            num_samples: 4800,
        };

        let mut got_signal = false;
        let mut state = effect.apply(&params, &input, &mut output);
        got_signal |= output.channel(0).iter().any(|&x| x != 0.0);

        let mut frames = 0;
        while state == AudioEffectState::TailRemaining && frames < 200 {
            state = effect.tail(&mut output);
            got_signal |= output.channel(0).iter().any(|&x| x != 0.0);
            frames += 1;
        }

        assert!(got_signal);
        assert_eq!(state, AudioEffectState::TailComplete);
    }

    #[test]
    fn test_convolution_branch_renders_ir() {
        let audio_settings = AudioSettings {
            sampling_rate: 48_000,
            frame_size: 256,
        };

        let mut effect = HybridReverbEffect::try_new(
            &audio_settings,
            &HybridReverbEffectSettings {
                num_channels: 1,
                ir_size: 1024,
            },
        )
        .unwrap();

        let mut ir = ImpulseResponse::new(&ImpulseResponseSettings {
            duration: 1024.0 / 48_000.0,
            order: 0,
            sampling_rate: 48_000,
        });
        ir.channel_mut(0)[10] = 1.0;
        let fft_ir = FftIr::new(&ir, 256);

        let mut impulse = vec![0.0; 256];
        impulse[0] = 1.0;
        let input = AudioBuffer::from_mono(&impulse);
        let mut output = AudioBuffer::new(1, 256);

        let params = HybridReverbEffectParams {
            fft_ir: Some(&fft_ir),
            reverb: Reverb::default(),
            eq_coeffs: [0.0; NUM_BANDS],
            delay: 0,
            num_channels: 1,
            num_samples: 1024,
        };

        effect.apply(&params, &input, &mut output);

        // The convolved impulse appears at the IR's peak offset.
        assert!(output.channel(0)[10].abs() > 0.5);
    }
}
