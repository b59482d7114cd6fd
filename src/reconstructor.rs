//! Reconstruction of impulse responses from energy fields.

use crate::NUM_BANDS;
use crate::energy_field::{BIN_DURATION, EnergyField};
use crate::error::EchofieldError;
use crate::iir::{HIGH_CUTOFF_FREQUENCIES, Iir, IirFilterer, LOW_CUTOFF_FREQUENCIES};
use crate::impulse_response::ImpulseResponse;
use rand::Rng;

/// Converts energy fields to impulse responses.
///
/// For each Ambisonic channel, a reproducible white-noise sequence is split
/// into the three frequency bands, each band is modulated by the square root
/// of the channel's energy envelope (interpolated sample-by-sample between
/// bins), and the bands are summed. Energy fields are much smaller than
/// impulse responses, so they are what gets baked and stored; this conversion
/// happens at runtime, on a simulation thread.
#[derive(Debug)]
pub struct Reconstructor {
    max_duration: f32,
    max_order: usize,
    sampling_rate: u32,
}

/// Settings used to create a [`Reconstructor`].
#[derive(Debug, Copy, Clone)]
pub struct ReconstructorSettings {
    /// The largest possible duration (in seconds) of any impulse response
    /// that will be reconstructed using this reconstructor.
    pub max_duration: f32,

    /// The largest possible Ambisonic order of any impulse response that
    /// will be reconstructed using this reconstructor.
    pub max_order: usize,

    /// The sampling rate of reconstructed impulse responses.
    pub sampling_rate: u32,
}

/// Inputs common to all reconstruction operations in a single batch.
#[derive(Debug, Copy, Clone)]
pub struct ReconstructorSharedInputs {
    /// Duration of the impulse responses to reconstruct.
    pub duration: f32,

    /// Ambisonic order of the impulse responses to reconstruct.
    pub order: usize,
}

/// The inputs for a single reconstruction operation.
#[derive(Debug)]
pub struct ReconstructorInputs<'a> {
    /// The energy field to reconstruct an impulse response from.
    pub energy_field: &'a EnergyField,

    /// Optional per-bin correction curve multiplied into the energy
    /// envelopes, e.g. to re-apply distance attenuation to baked data.
    pub correction_curve: Option<&'a [f32]>,
}

/// The outputs for a single reconstruction operation.
#[derive(Debug)]
pub struct ReconstructorOutputs<'a> {
    pub impulse_response: &'a mut ImpulseResponse,
}

/// [`Reconstructor`] errors.
#[derive(Debug, PartialEq)]
pub enum ReconstructorError {
    /// Duration exceeds the maximum specified in the settings.
    DurationExceedsMax { duration: f32, max_duration: f32 },
    /// Order exceeds the maximum specified in the settings.
    OrderExceedsMax { order: usize, max_order: usize },
    /// Input and output arrays have mismatched lengths.
    InputOutputLengthMismatch {
        inputs_len: usize,
        outputs_len: usize,
    },
}

impl std::error::Error for ReconstructorError {}

impl std::fmt::Display for ReconstructorError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::DurationExceedsMax {
                duration,
                max_duration,
            } => write!(f, "duration {duration} exceeds max duration {max_duration}"),
            Self::OrderExceedsMax { order, max_order } => {
                write!(f, "order {order} exceeds max order {max_order}")
            }
            Self::InputOutputLengthMismatch {
                inputs_len,
                outputs_len,
            } => write!(
                f,
                "inputs and outputs length mismatch: inputs_len={inputs_len}, outputs_len={outputs_len}"
            ),
        }
    }
}

impl Reconstructor {
    pub fn try_new(settings: &ReconstructorSettings) -> Result<Self, EchofieldError> {
        if settings.max_duration <= 0.0 || settings.sampling_rate == 0 {
            return Err(EchofieldError::InvalidArgument);
        }

        Ok(Self {
            max_duration: settings.max_duration,
            max_order: settings.max_order,
            sampling_rate: settings.sampling_rate,
        })
    }

    /// Reconstructs one or more impulse responses as a single batch of work.
    pub fn reconstruct(
        &self,
        inputs: &[ReconstructorInputs],
        shared_inputs: &ReconstructorSharedInputs,
        outputs: &mut [ReconstructorOutputs],
    ) -> Result<(), ReconstructorError> {
        if shared_inputs.duration > self.max_duration {
            return Err(ReconstructorError::DurationExceedsMax {
                duration: shared_inputs.duration,
                max_duration: self.max_duration,
            });
        }

        if shared_inputs.order > self.max_order {
            return Err(ReconstructorError::OrderExceedsMax {
                order: shared_inputs.order,
                max_order: self.max_order,
            });
        }

        if inputs.len() != outputs.len() {
            return Err(ReconstructorError::InputOutputLengthMismatch {
                inputs_len: inputs.len(),
                outputs_len: outputs.len(),
            });
        }

        for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
            self.reconstruct_one(input, shared_inputs, output.impulse_response);
        }

        Ok(())
    }

    fn reconstruct_one(
        &self,
        input: &ReconstructorInputs,
        shared_inputs: &ReconstructorSharedInputs,
        impulse_response: &mut ImpulseResponse,
    ) {
        let num_samples = ((shared_inputs.duration * self.sampling_rate as f32).ceil() as usize)
            .min(impulse_response.num_samples());
        let num_channels =
            crate::sh::num_coeffs_for_order(shared_inputs.order).min(impulse_response.num_channels());

        let samples_per_bin = (BIN_DURATION * self.sampling_rate as f32).round() as usize;
        let num_bins = input.energy_field.num_bins();

        impulse_response.reset();

        let mut noise = vec![0.0f32; num_samples];
        let mut band_noise = vec![0.0f32; num_samples];

        for channel in 0..num_channels.min(input.energy_field.num_channels()) {
            // The noise stream is reproducible per channel, so repeated
            // reconstructions of the same field are identical.
            let mut rng = crate::sampling::seeded_rng(0xC0DA ^ (channel as u64) << 8);

            // Uniform noise scaled to unit variance.
            const UNIT_VARIANCE_SCALE: f32 = 1.732_050_8;
            for sample in noise.iter_mut() {
                *sample = rng.gen_range(-1.0f32..1.0) * UNIT_VARIANCE_SCALE;
            }

            for band in 0..NUM_BANDS {
                let mut filter = IirFilterer::new(Self::band_split_filter(band, self.sampling_rate));
                filter.apply(&noise, &mut band_noise);

                let histogram = input.energy_field.band(channel, band);
                let output = impulse_response.channel_mut(channel);

                for (sample_index, &noise_sample) in band_noise.iter().enumerate() {
                    let bin = sample_index / samples_per_bin;
                    if bin >= num_bins {
                        break;
                    }

                    let bin_fraction = (sample_index % samples_per_bin) as f32
                        / samples_per_bin as f32;
                    let this_bin = histogram[bin];
                    let next_bin = if bin + 1 < num_bins {
                        histogram[bin + 1]
                    } else {
                        0.0
                    };

                    let mut energy =
                        (this_bin + bin_fraction * (next_bin - this_bin)).max(0.0);

                    if let Some(curve) = input.correction_curve {
                        energy *= curve[bin.min(curve.len() - 1)].max(0.0);
                    }

                    let amplitude = (energy / samples_per_bin as f32).sqrt();
                    output[sample_index] += amplitude * noise_sample;
                }
            }
        }
    }

    fn band_split_filter(band: usize, sampling_rate: u32) -> Iir {
        match band {
            0 => Iir::low_pass(HIGH_CUTOFF_FREQUENCIES[0], sampling_rate),
            1 => Iir::band_pass(
                LOW_CUTOFF_FREQUENCIES[1],
                HIGH_CUTOFF_FREQUENCIES[1],
                sampling_rate,
            ),
            _ => Iir::high_pass(LOW_CUTOFF_FREQUENCIES[2], sampling_rate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy_field::EnergyFieldSettings;
    use crate::impulse_response::ImpulseResponseSettings;

    fn make_field(duration: f32, order: usize) -> EnergyField {
        let mut field = EnergyField::new(&EnergyFieldSettings { duration, order });
        for band in 0..NUM_BANDS {
            for value in field.band_mut(0, band) {
                *value = 0.5;
            }
        }
        field
    }

    #[test]
    fn test_reconstruction_is_reproducible() {
        let reconstructor = Reconstructor::try_new(&ReconstructorSettings {
            max_duration: 1.0,
            max_order: 1,
            sampling_rate: 48_000,
        })
        .unwrap();

        let field = make_field(0.5, 1);
        let shared = ReconstructorSharedInputs {
            duration: 0.5,
            order: 1,
        };

        let ir_settings = ImpulseResponseSettings {
            duration: 0.5,
            order: 1,
            sampling_rate: 48_000,
        };
        let mut ir_a = ImpulseResponse::new(&ir_settings);
        let mut ir_b = ImpulseResponse::new(&ir_settings);

        for ir in [&mut ir_a, &mut ir_b] {
            reconstructor
                .reconstruct(
                    &[ReconstructorInputs {
                        energy_field: &field,
                        correction_curve: None,
                    }],
                    &shared,
                    &mut [ReconstructorOutputs {
                        impulse_response: ir,
                    }],
                )
                .unwrap();
        }

        assert_eq!(ir_a.channel(0), ir_b.channel(0));
        assert!(ir_a.channel(0).iter().any(|&x| x != 0.0));
    }

    #[test]
    fn test_energy_roughly_preserved() {
        let reconstructor = Reconstructor::try_new(&ReconstructorSettings {
            max_duration: 1.0,
            max_order: 0,
            sampling_rate: 48_000,
        })
        .unwrap();

        let field = make_field(1.0, 0);
        let total_field_energy: f32 = (0..NUM_BANDS)
            .map(|band| field.band(0, band).iter().sum::<f32>())
            .sum();

        let mut ir = ImpulseResponse::new(&ImpulseResponseSettings {
            duration: 1.0,
            order: 0,
            sampling_rate: 48_000,
        });

        reconstructor
            .reconstruct(
                &[ReconstructorInputs {
                    energy_field: &field,
                    correction_curve: None,
                }],
                &ReconstructorSharedInputs {
                    duration: 1.0,
                    order: 0,
                },
                &mut [ReconstructorOutputs {
                    impulse_response: &mut ir,
                }],
            )
            .unwrap();

        let ir_energy: f32 = ir.channel(0).iter().map(|x| x * x).sum();

        // Band splitting overlaps imperfectly, so allow a generous band.
        assert!(ir_energy > 0.25 * total_field_energy);
        assert!(ir_energy < 4.0 * total_field_energy);
    }

    #[test]
    fn test_validation_errors() {
        let reconstructor = Reconstructor::try_new(&ReconstructorSettings {
            max_duration: 1.0,
            max_order: 1,
            sampling_rate: 48_000,
        })
        .unwrap();

        let field = make_field(0.5, 1);

        let result = reconstructor.reconstruct(
            &[ReconstructorInputs {
                energy_field: &field,
                correction_curve: None,
            }],
            &ReconstructorSharedInputs {
                duration: 2.0,
                order: 1,
            },
            &mut [],
        );

        assert_eq!(
            result,
            Err(ReconstructorError::DurationExceedsMax {
                duration: 2.0,
                max_duration: 1.0,
            })
        );
    }
}
