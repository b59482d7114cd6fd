use super::{
    AudioEffectState, FftIr, HybridReverbEffect, HybridReverbEffectParams,
    HybridReverbEffectSettings, OverlapSaveConvolutionEffect, OverlapSaveConvolutionEffectParams,
    OverlapSaveConvolutionEffectSettings, ReverbEffect, ReverbEffectParams,
};
use crate::NUM_BANDS;
use crate::audio_buffer::AudioBuffer;
use crate::audio_settings::AudioSettings;
use crate::error::EchofieldError;
use crate::reverb_estimator::Reverb;
use crate::sh;

/// How a reflection effect renders the simulated reflections.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReflectionEffectType {
    /// Multi-channel convolution with the reconstructed impulse response.
    /// The highest quality, and the most expensive.
    Convolution,

    /// Parametric (artificial) reverb driven by the estimated per-band RT60.
    /// Only renders the omni channel.
    Parametric,

    /// Convolution for the early response, parametric reverb for the late
    /// tail.
    Hybrid,
}

/// Applies the result of a reflection simulation to a mono signal, producing
/// an Ambisonic output.
#[derive(Debug)]
pub struct ReflectionEffect {
    kind: ReflectionEffectKind,
}

#[derive(Debug)]
enum ReflectionEffectKind {
    Convolution(OverlapSaveConvolutionEffect),
    Parametric(ReverbEffect, AudioBuffer),
    Hybrid(HybridReverbEffect),
}

/// Settings used to create a [`ReflectionEffect`].
#[derive(Debug, Copy, Clone)]
pub struct ReflectionEffectSettings {
    /// The rendering algorithm.
    pub effect_type: ReflectionEffectType,

    /// The largest IR length (in samples) that will be rendered.
    pub ir_size: usize,

    /// Number of Ambisonic channels of the output.
    pub num_channels: usize,
}

/// Parameters for applying a reflection effect.
///
/// Produced per source by the simulator's reflection pass.
#[derive(Debug, Clone)]
pub struct ReflectionEffectParams {
    /// The frequency-domain IR, for the convolution and hybrid types.
    pub fft_ir: Option<std::sync::Arc<FftIr>>,

    /// Estimated decay times, for the parametric and hybrid types.
    pub reverb: Reverb,

    /// Transition EQ, for the hybrid type.
    pub eq_coeffs: [f32; NUM_BANDS],

    /// Tail alignment delay in samples, for the hybrid type.
    pub delay: usize,

    /// Number of IR channels to render.
    pub num_channels: usize,

    /// Number of IR samples to render.
    pub num_samples: usize,
}

impl ReflectionEffect {
    pub fn try_new(
        audio_settings: &AudioSettings,
        settings: &ReflectionEffectSettings,
    ) -> Result<Self, EchofieldError> {
        let kind = match settings.effect_type {
            ReflectionEffectType::Convolution => {
                ReflectionEffectKind::Convolution(OverlapSaveConvolutionEffect::try_new(
                    audio_settings,
                    &OverlapSaveConvolutionEffectSettings {
                        num_channels: settings.num_channels,
                        ir_size: settings.ir_size,
                    },
                )?)
            }
            ReflectionEffectType::Parametric => ReflectionEffectKind::Parametric(
                ReverbEffect::new(audio_settings),
                AudioBuffer::new(1, audio_settings.frame_size),
            ),
            ReflectionEffectType::Hybrid => {
                ReflectionEffectKind::Hybrid(HybridReverbEffect::try_new(
                    audio_settings,
                    &HybridReverbEffectSettings {
                        num_channels: settings.num_channels,
                        ir_size: settings.ir_size,
                    },
                )?)
            }
        };

        Ok(Self { kind })
    }

    pub fn reset(&mut self) {
        match &mut self.kind {
            ReflectionEffectKind::Convolution(effect) => effect.reset(),
            ReflectionEffectKind::Parametric(effect, _) => effect.reset(),
            ReflectionEffectKind::Hybrid(effect) => effect.reset(),
        }
    }

    /// Applies the effect to a mono input, producing an Ambisonic output.
    pub fn apply(
        &mut self,
        params: &ReflectionEffectParams,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
    ) -> AudioEffectState {
        match &mut self.kind {
            ReflectionEffectKind::Convolution(effect) => match &params.fft_ir {
                Some(fft_ir) => effect.apply(
                    &OverlapSaveConvolutionEffectParams {
                        fft_ir: fft_ir.as_ref(),
                        num_channels: params.num_channels,
                        num_samples: params.num_samples,
                    },
                    input,
                    output,
                ),
                None => {
                    output.make_silent();
                    AudioEffectState::TailComplete
                }
            },
            ReflectionEffectKind::Parametric(effect, temp) => {
                output.make_silent();
                let state = effect.apply(
                    &ReverbEffectParams {
                        reverb: params.reverb,
                    },
                    input,
                    temp,
                );

                // The parametric tail is omnidirectional.
                let scalar = sh::evaluate(0, 0, crate::geometry::Vector3::ZERO);
                for (y, x) in output.channel_mut(0).iter_mut().zip(temp.channel(0).iter()) {
                    *y = scalar * x;
                }

                state
            }
            ReflectionEffectKind::Hybrid(effect) => effect.apply(
                &HybridReverbEffectParams {
                    fft_ir: params.fft_ir.as_deref(),
                    reverb: params.reverb,
                    eq_coeffs: params.eq_coeffs,
                    delay: params.delay,
                    num_channels: params.num_channels,
                    num_samples: params.num_samples,
                },
                input,
                output,
            ),
        }
    }

    pub fn tail(&mut self, output: &mut AudioBuffer) -> AudioEffectState {
        match &mut self.kind {
            ReflectionEffectKind::Convolution(effect) => effect.tail(output),
            ReflectionEffectKind::Parametric(effect, temp) => {
                output.make_silent();
                let state = effect.tail(temp);

                let scalar = sh::evaluate(0, 0, crate::geometry::Vector3::ZERO);
                for (y, x) in output.channel_mut(0).iter_mut().zip(temp.channel(0).iter()) {
                    *y = scalar * x;
                }

                state
            }
            ReflectionEffectKind::Hybrid(effect) => effect.tail(output),
        }
    }

    pub fn tail_size(&self) -> usize {
        match &self.kind {
            ReflectionEffectKind::Convolution(effect) => effect.tail_size(),
            ReflectionEffectKind::Parametric(effect, _) => effect.tail_size(),
            ReflectionEffectKind::Hybrid(effect) => effect.tail_size(),
        }
    }
}

impl Default for ReflectionEffectParams {
    fn default() -> Self {
        Self {
            fft_ir: None,
            reverb: Reverb::default(),
            eq_coeffs: [1.0; NUM_BANDS],
            delay: 0,
            num_channels: 1,
            num_samples: 0,
        }
    }
}
