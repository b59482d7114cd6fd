//! Estimation of hybrid reverb parameters.
//!
//! A hybrid reverb renders the early part of an impulse response by
//! convolution and the late tail with the parametric reverb. This estimator
//! derives the EQ that matches the parametric tail's spectrum to the energy
//! field at the transition point, and adjusts the convolved IR so the
//! combined response is energy-continuous across the transition.

use crate::NUM_BANDS;
use crate::audio_buffer::AudioBuffer;
use crate::audio_settings::AudioSettings;
use crate::effect::{EqEffect, EqEffectParams, ReverbEffect, ReverbEffectParams};
use crate::energy_field::{BIN_DURATION, EnergyField};
use crate::impulse_response::ImpulseResponse;
use crate::reverb_estimator::Reverb;
use crate::sh;

#[derive(Debug)]
pub struct HybridReverbEstimator {
    sampling_rate: u32,
    frame_size: usize,
    eq_effect: EqEffect,
    reverb_effect: ReverbEffect,
    reverb_ir: Vec<f32>,
}

impl HybridReverbEstimator {
    pub fn new(max_duration: f32, audio_settings: &AudioSettings) -> Self {
        let max_samples = (max_duration * audio_settings.sampling_rate as f32).ceil() as usize;

        Self {
            sampling_rate: audio_settings.sampling_rate,
            frame_size: audio_settings.frame_size,
            eq_effect: EqEffect::new(audio_settings),
            reverb_effect: ReverbEffect::new(audio_settings),
            reverb_ir: vec![0.0; max_samples],
        }
    }

    /// Derives the hybrid reverb EQ and trims/crossfades the reconstructed
    /// impulse response around the transition.
    ///
    /// On return, `eq_coeffs` matches the parametric tail's level to the
    /// energy field at the transition bin, and `impulse_response` has been
    /// faded out over the overlap region (with the parametric tail's
    /// contribution subtracted from the omni channel) and truncated after the
    /// transition.
    pub fn estimate(
        &mut self,
        energy_field: &EnergyField,
        reverb: &Reverb,
        impulse_response: &mut ImpulseResponse,
        transition_time: f32,
        overlap_fraction: f32,
        order: usize,
        eq_coeffs: &mut [f32; NUM_BANDS],
    ) {
        let num_channels = sh::num_coeffs_for_order(order).min(impulse_response.num_channels());

        let cutoff_bin = (((1.0 - overlap_fraction) * transition_time) / BIN_DURATION).ceil()
            as usize;
        let cutoff_bin = cutoff_bin.min(energy_field.num_bins() - 1);

        for (band, coeff) in eq_coeffs.iter_mut().enumerate() {
            *coeff = (4.0 * std::f32::consts::PI * energy_field.band(0, band)[cutoff_bin]).sqrt();
        }

        let transition_samples = (transition_time * self.sampling_rate as f32).ceil() as usize;
        let transition_samples = transition_samples.min(impulse_response.num_samples());
        let ramp_start = ((1.0 - overlap_fraction) * transition_samples as f32) as usize;
        let ramp_end = transition_samples;
        let num_transition_samples = (ramp_end - ramp_start).min(self.reverb_ir.len());
        let ramp_start = ramp_end - num_transition_samples;

        if num_transition_samples == 0 {
            return;
        }

        self.calc_reverb_ir(num_transition_samples, eq_coeffs, &reverb.reverb_times);

        // Fade the reconstructed IR out across the overlap region.
        for channel in 0..num_channels {
            let samples = impulse_response.channel_mut(channel);
            for i in ramp_start..ramp_end {
                let alpha = (ramp_end - i) as f32 / (ramp_end - ramp_start) as f32;
                samples[i] *= alpha.sqrt();
            }
        }

        // Subtract the parametric tail's expected contribution from the omni
        // channel, so the crossfade sums to the original energy.
        let omni = impulse_response.channel_mut(0);
        for i in ramp_start..ramp_end {
            let alpha = (ramp_end - i) as f32 / (ramp_end - ramp_start) as f32;
            omni[i] -= (1.0 - (1.0 - alpha).sqrt()) * self.reverb_ir[i - ramp_start];
        }

        // Everything after the transition is rendered parametrically.
        for channel in 0..num_channels {
            for value in &mut impulse_response.channel_mut(channel)[ramp_end..] {
                *value = 0.0;
            }
        }
    }

    /// Renders the parametric reverb's impulse response through the EQ, for
    /// subtraction from the convolved IR.
    fn calc_reverb_ir(
        &mut self,
        num_samples: usize,
        eq_coeffs: &[f32; NUM_BANDS],
        reverb_times: &[f32; NUM_BANDS],
    ) {
        self.reverb_ir.fill(0.0);

        self.eq_effect.reset();
        self.reverb_effect.reset();

        let num_frames = num_samples.div_ceil(self.frame_size);

        let mut gains = *eq_coeffs;
        let mut overall_gain = 16.0 * sh::evaluate(0, 0, crate::geometry::Vector3::ZERO);
        EqEffect::normalize_gains(&mut gains, &mut overall_gain);

        let reverb = Reverb {
            reverb_times: *reverb_times,
        };

        let mut frame_in = AudioBuffer::new(1, self.frame_size);
        let mut frame_eq = AudioBuffer::new(1, self.frame_size);
        let mut frame_out = AudioBuffer::new(1, self.frame_size);

        let mut num_samples_left = num_samples;
        for frame in 0..num_frames {
            frame_in.make_silent();
            if frame == 0 {
                frame_in.channel_mut(0)[0] = 1.0;
            }

            self.eq_effect
                .apply(&EqEffectParams { gains }, &frame_in, &mut frame_eq);
            frame_eq.scale(overall_gain);

            self.reverb_effect
                .apply(&ReverbEffectParams { reverb }, &frame_eq, &mut frame_out);

            let num_samples_to_copy = self.frame_size.min(num_samples_left);
            num_samples_left -= num_samples_to_copy;

            let offset = frame * self.frame_size;
            self.reverb_ir[offset..offset + num_samples_to_copy]
                .copy_from_slice(&frame_out.channel(0)[..num_samples_to_copy]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy_field::EnergyFieldSettings;
    use crate::impulse_response::ImpulseResponseSettings;

    #[test]
    fn test_estimate_truncates_ir_and_sets_eq() {
        let audio_settings = AudioSettings {
            sampling_rate: 48_000,
            frame_size: 1024,
        };

        let mut estimator = HybridReverbEstimator::new(1.0, &audio_settings);

        let mut field = EnergyField::new(&EnergyFieldSettings {
            duration: 1.0,
            order: 0,
        });
        for band in 0..NUM_BANDS {
            for value in field.band_mut(0, band) {
                *value = 0.01;
            }
        }

        let mut ir = ImpulseResponse::new(&ImpulseResponseSettings {
            duration: 1.0,
            order: 0,
            sampling_rate: 48_000,
        });
        for value in ir.channel_mut(0) {
            *value = 0.1;
        }

        let reverb = Reverb {
            reverb_times: [0.8; NUM_BANDS],
        };
        let mut eq_coeffs = [0.0; NUM_BANDS];

        estimator.estimate(&field, &reverb, &mut ir, 0.5, 0.25, 0, &mut eq_coeffs);

        // EQ coefficients reflect the energy at the transition bin.
        for coeff in eq_coeffs {
            assert!(coeff > 0.0);
        }

        // The IR is silent after the transition.
        let transition_samples = (0.5 * 48_000.0) as usize;
        assert!(ir.channel(0)[transition_samples..].iter().all(|&x| x == 0.0));

        // Before the overlap region the IR is untouched.
        let ramp_start = (0.75 * transition_samples as f32) as usize;
        assert!(ir.channel(0)[..ramp_start].iter().all(|&x| x == 0.1));
    }
}
