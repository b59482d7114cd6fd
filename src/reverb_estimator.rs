//! Estimation of reverberation parameters from energy fields.

use crate::NUM_BANDS;
use crate::array_math;
use crate::energy_field::{BIN_DURATION, EnergyField};
use crate::model::AirAbsorptionModel;

const EARLY_REFLECTIONS_DURATION: f32 = 0.08;
const MIN_ENERGY_FOR_LINE_FIT: f32 = -2.5;
const MAX_ENERGY_FOR_LINE_FIT: f32 = -0.5;
const DIFFUSION_ENERGY_THRESHOLD: f32 = 1e-7;

/// Reverberation decay times, one per frequency band.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Reverb {
    /// RT60 per band, in seconds. Always at least 0.1.
    pub reverb_times: [f32; NUM_BANDS],
}

impl Default for Reverb {
    fn default() -> Self {
        Self {
            reverb_times: [0.1; NUM_BANDS],
        }
    }
}

/// Standardized reverb parameters in the I3DL2 model, for hosts that drive
/// third-party reverb processors.
#[derive(Debug, Copy, Clone)]
pub struct I3dl2Reverb {
    /// Overall room effect level, in millibels.
    pub room: f32,
    /// Low-frequency room effect level, in millibels.
    pub room_low: f32,
    /// High-frequency room effect level, in millibels.
    pub room_high: f32,
    /// Rolloff factor for the room effect. Unused by the estimator.
    pub room_rolloff: f32,
    /// Mid-band decay time, in seconds.
    pub decay_time: f32,
    /// Ratio of high-frequency to mid-frequency decay time.
    pub decay_high_ratio: f32,
    /// Early reflections level relative to the room effect, in millibels.
    pub reflections: f32,
    /// Delay of the first reflection, in seconds.
    pub reflections_delay: f32,
    /// Late reverberation level relative to the room effect, in millibels.
    pub reverb: f32,
    /// Delay of the late reverberation relative to the first reflection, in
    /// seconds.
    pub reverb_delay: f32,
    /// Echo density in the late reverberation, as a percentage.
    pub diffusion: f32,
    /// Modal density in the late reverberation, as a percentage.
    pub density: f32,
    /// Reference low frequency, in Hz.
    pub lf_reference: f32,
    /// Reference high frequency, in Hz.
    pub hf_reference: f32,
}

/// Estimates per-band RT60 from an energy field's omni histograms.
pub fn estimate(energy_field: &EnergyField, air_absorption: &AirAbsorptionModel) -> Reverb {
    let mut reverb = Reverb::default();
    for band in 0..NUM_BANDS {
        reverb.reverb_times[band] = reverb_time(
            energy_field.band(0, band),
            air_absorption,
            band,
        )
        .max(0.1);
    }
    reverb
}

/// Estimates the full I3DL2 parameter set from an energy field's omni
/// histograms.
pub fn estimate_i3dl2(
    energy_field: &EnergyField,
    air_absorption: &AirAbsorptionModel,
) -> I3dl2Reverb {
    let mid = energy_field.band(0, 1);

    let room = total_energy_in_histogram(mid);
    let room_low = total_energy_in_histogram(energy_field.band(0, 0));
    let room_high = total_energy_in_histogram(energy_field.band(0, 2));

    let reflections_delay = first_arrival_after(0.0, mid);
    let reverb_delay =
        first_arrival_after(reflections_delay + EARLY_REFLECTIONS_DURATION, mid) - reflections_delay;

    let reflections = if room > 0.0 {
        total_energy_in_histogram_range(0.0, reflections_delay + EARLY_REFLECTIONS_DURATION, mid)
            / room
    } else {
        0.0
    };
    let reverb_fraction = 1.0 - reflections;

    let decay_time = reverb_time(mid, air_absorption, 1);
    let decay_high_ratio = if decay_time > 0.0 {
        reverb_time(energy_field.band(0, 2), air_absorption, 2) / decay_time
    } else {
        0.0
    };

    let diffusion = diffusion(mid, reflections_delay + reverb_delay);
    let density = modal_density(energy_field);

    let mut parameters = I3dl2Reverb {
        room: 1000.0 * room.max(f32::MIN_POSITIVE).log10(),
        room_low: 1000.0 * room_low.max(f32::MIN_POSITIVE).log10(),
        room_high: 1000.0 * room_high.max(f32::MIN_POSITIVE).log10(),
        room_rolloff: 0.0,
        decay_time,
        decay_high_ratio,
        reflections: 1000.0 * reflections.max(f32::MIN_POSITIVE).log10(),
        reflections_delay,
        reverb: 1000.0 * reverb_fraction.max(f32::MIN_POSITIVE).log10(),
        reverb_delay,
        diffusion,
        density,
        lf_reference: 250.0,
        hf_reference: 5000.0,
    };

    clamp_to_valid_ranges(&mut parameters);
    parameters
}

/// Rescales the post-peak portion of each band's histograms so the estimated
/// reverb time changes by the given per-band ratio, then renormalizes each
/// band's total energy to its pre-scaling value.
pub fn apply_reverb_scale(reverb_scale: &[f32; NUM_BANDS], energy_field: &mut EnergyField) {
    let num_bins = energy_field.num_bins();
    let num_channels = energy_field.num_channels();

    for band in 0..NUM_BANDS {
        let reverb_time_ratio = reverb_scale[band];
        if reverb_time_ratio <= 0.0 {
            continue;
        }

        let (peak_energy, peak_bin) = array_math::max_index(energy_field.band(0, band));
        if peak_energy <= 0.0 {
            continue;
        }

        let old_total_energy = array_math::sum(energy_field.band(0, band));

        for bin in peak_bin..num_bins {
            let old_energy = energy_field.band(0, band)[bin];
            if old_energy <= 0.0 {
                continue;
            }

            let new_energy = peak_energy * (old_energy / peak_energy).powf(1.0 / reverb_time_ratio);
            let scalar = new_energy / old_energy;

            for channel in 0..num_channels {
                energy_field.band_mut(channel, band)[bin] *= scalar;
            }
        }

        let new_total_energy = array_math::sum(energy_field.band(0, band));
        let energy_scalar = if new_total_energy > 0.0 {
            old_total_energy / new_total_energy
        } else {
            1.0
        };

        for channel in 0..num_channels {
            for value in energy_field.band_mut(channel, band) {
                *value *= energy_scalar;
            }
        }
    }
}

fn total_energy_in_histogram_range(start_time: f32, end_time: f32, histogram: &[f32]) -> f32 {
    let start_bin = (start_time / BIN_DURATION).floor() as usize;
    let end_bin = ((end_time / BIN_DURATION).floor() as usize).min(histogram.len() - 1);

    histogram[start_bin..=end_bin].iter().sum()
}

fn total_energy_in_histogram(histogram: &[f32]) -> f32 {
    histogram.iter().sum()
}

/// Time of the first bin with nonzero energy at or after `start_time`.
fn first_arrival_after(start_time: f32, histogram: &[f32]) -> f32 {
    let mut arrival_time = start_time;
    let start_bin = (start_time / BIN_DURATION).floor() as usize;

    for &energy in histogram.iter().skip(start_bin) {
        if energy > 0.0 {
            break;
        }
        arrival_time += BIN_DURATION;
    }

    arrival_time
}

/// RT60 from a least-squares line fit to the air-absorption-weighted Energy
/// Decay Curve, restricted to the [-2.5, -0.5] range in log10 energy.
fn reverb_time(histogram: &[f32], air_absorption: &AirAbsorptionModel, band: usize) -> f32 {
    let num_bins = histogram.len();

    let mut total_energy = 0.0;
    let mut x = 0.0;
    for &energy in histogram {
        total_energy += energy * air_absorption.evaluate(x * crate::SPEED_OF_SOUND, band);
        x += BIN_DURATION;
    }

    if total_energy < 1e-4 {
        return 0.0;
    }

    // The EDC is the reverse-cumulative energy: EDC[i] = EDC[i+1] + E[i].
    // Accumulate backwards, normalize, convert to log scale, and fit a line
    // by least squares over the usable energy range.
    let mut energy = 0.0;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xx = 0.0;
    let mut sum_xy = 0.0;
    let mut n = 0;

    for i in (0..num_bins).rev() {
        x -= BIN_DURATION;
        energy += histogram[i] * air_absorption.evaluate(x * crate::SPEED_OF_SOUND, band);
        let y = (energy / total_energy).log10();

        if (MIN_ENERGY_FOR_LINE_FIT..=MAX_ENERGY_FOR_LINE_FIT).contains(&y) {
            sum_x += x;
            sum_y += y;
            sum_xx += x * x;
            sum_xy += x * y;
            n += 1;
        }
    }

    let numerator = (n as f32 * sum_xy) - (sum_x * sum_y);
    let denominator = (n as f32 * sum_xx) - (sum_x * sum_x);

    if numerator.abs() > f32::MIN_POSITIVE {
        (-6.0 * (denominator / numerator)).max(0.0)
    } else {
        0.0
    }
}

/// Fraction (as a percentage) of bins between the start of the late reverb
/// and the last nonzero bin whose energy exceeds a threshold.
fn diffusion(histogram: &[f32], start_time: f32) -> f32 {
    let num_bins = histogram.len();
    let start_bin = ((start_time / BIN_DURATION).floor() as usize).min(num_bins - 1);

    let mut end_bin = num_bins - 1;
    for i in (start_bin..num_bins).rev() {
        if histogram[i] > 0.0 {
            end_bin = i;
            break;
        }
    }

    if start_bin == end_bin {
        return 100.0;
    }

    let num_above_threshold = histogram[start_bin..=end_bin]
        .iter()
        .filter(|&&energy| energy >= DIFFUSION_ENERGY_THRESHOLD)
        .count();

    100.0 * num_above_threshold as f32 / (end_bin - start_bin + 1) as f32
}

/// Compares total band energies: 100% when all bands carry equal energy,
/// approaching 0% as one band dominates.
fn modal_density(energy_field: &EnergyField) -> f32 {
    let energies: Vec<f32> = (0..NUM_BANDS)
        .map(|band| total_energy_in_histogram(energy_field.band(0, band)))
        .collect();

    let min_energy = energies.iter().copied().fold(f32::INFINITY, f32::min);
    let max_energy = energies.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    if max_energy < f32::MIN_POSITIVE {
        100.0
    } else {
        100.0 * (1.0 - ((max_energy - min_energy) / max_energy))
    }
}

fn clamp_to_valid_ranges(parameters: &mut I3dl2Reverb) {
    parameters.room = parameters.room.clamp(-10_000.0, 0.0);
    parameters.room_low = parameters.room_low.clamp(-10_000.0, 0.0);
    parameters.room_high = parameters.room_high.clamp(-10_000.0, 0.0);
    parameters.decay_time = parameters.decay_time.clamp(0.1, 20.0);
    parameters.decay_high_ratio = parameters.decay_high_ratio.clamp(0.1, 2.0);
    parameters.reflections = parameters.reflections.clamp(-10_000.0, 1000.0);
    parameters.reflections_delay = parameters.reflections_delay.clamp(0.0, 0.3);
    parameters.reverb = parameters.reverb.clamp(-10_000.0, 2000.0);
    parameters.reverb_delay = parameters.reverb_delay.clamp(0.0, 0.1);
    parameters.diffusion = parameters.diffusion.clamp(0.0, 100.0);
    parameters.density = parameters.density.clamp(0.0, 100.0);
}
