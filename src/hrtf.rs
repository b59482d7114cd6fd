//! Head-related transfer functions.
//!
//! The built-in HRTF is an analytic spherical-head model: per-direction
//! HRIR pairs are synthesized from an interaural time difference (Woodworth
//! model) and a head-shadowing low-pass filter, over a regular
//! azimuth/elevation grid. Loading measured HRTFs from SOFA files is an
//! external concern; hosts that parse SOFA can supply the raw HRIR grid via
//! [`HrtfSettings::Raw`].

use crate::audio_settings::AudioSettings;
use crate::error::EchofieldError;
use crate::geometry::Vector3;
use crate::iir::{Iir, IirFilterer};
use crate::SPEED_OF_SOUND;

const NUM_AZIMUTHS: usize = 12;
const NUM_ELEVATIONS: usize = 7;
const HRIR_LENGTH: usize = 64;
const HEAD_RADIUS: f32 = 0.09;

/// How to interpolate between measured HRIRs for directions that fall
/// between grid points.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum HrtfInterpolation {
    /// Use the HRIR of the nearest grid direction. Cheapest; can click when
    /// sources move quickly.
    #[default]
    Nearest,

    /// Blend the four surrounding grid HRIRs bilinearly in
    /// azimuth/elevation.
    Bilinear,
}

/// Volume normalization applied to an HRTF when it is loaded.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum HrtfNormalization {
    /// Use the HRIR data as-is.
    #[default]
    None,

    /// Normalize so the root-mean-square energy over the whole database is
    /// 1.
    Rms,
}

/// A head-related transfer function: per-direction HRIR pairs used for
/// binaural rendering.
#[derive(Debug)]
pub struct Hrtf {
    sampling_rate: u32,
    // hrirs[direction][ear][tap]
    hrirs: Vec<[Vec<f32>; 2]>,
    directions: Vec<Vector3>,
    volume: f32,
}

impl Hrtf {
    /// Creates an HRTF.
    ///
    /// # Errors
    ///
    /// Returns [`EchofieldError::InvalidArgument`] for raw HRIR grids with
    /// mismatched array lengths.
    pub fn try_new(
        audio_settings: &AudioSettings,
        settings: &HrtfSettings,
    ) -> Result<Self, EchofieldError> {
        let mut hrtf = match settings {
            HrtfSettings::Default { volume, normalization } => {
                let mut hrtf = Self::build_default(audio_settings.sampling_rate);
                hrtf.volume = *volume;
                if *normalization == HrtfNormalization::Rms {
                    hrtf.normalize_rms();
                }
                hrtf
            }
            HrtfSettings::Raw {
                directions,
                hrirs,
                volume,
                normalization,
            } => {
                if directions.is_empty() || directions.len() != hrirs.len() {
                    return Err(EchofieldError::InvalidArgument);
                }

                let mut hrtf = Self {
                    sampling_rate: audio_settings.sampling_rate,
                    hrirs: hrirs.clone(),
                    directions: directions.iter().map(|d| d.normalized()).collect(),
                    volume: *volume,
                };
                if *normalization == HrtfNormalization::Rms {
                    hrtf.normalize_rms();
                }
                hrtf
            }
        };

        if hrtf.volume <= 0.0 {
            hrtf.volume = 1.0;
        }

        Ok(hrtf)
    }

    fn build_default(sampling_rate: u32) -> Self {
        let mut hrirs = Vec::with_capacity(NUM_AZIMUTHS * NUM_ELEVATIONS);
        let mut directions = Vec::with_capacity(NUM_AZIMUTHS * NUM_ELEVATIONS);

        for elevation_index in 0..NUM_ELEVATIONS {
            let elevation = -std::f32::consts::FRAC_PI_2
                + std::f32::consts::PI * elevation_index as f32 / (NUM_ELEVATIONS - 1) as f32;

            for azimuth_index in 0..NUM_AZIMUTHS {
                let azimuth = 2.0 * std::f32::consts::PI * azimuth_index as f32 / NUM_AZIMUTHS as f32;

                // Azimuth 0 is straight ahead (-z); positive azimuth turns
                // towards +x (the right).
                let direction = Vector3::new(
                    elevation.cos() * azimuth.sin(),
                    elevation.sin(),
                    -elevation.cos() * azimuth.cos(),
                );

                directions.push(direction);
                hrirs.push([
                    Self::synthesize_hrir(direction, -1.0, sampling_rate),
                    Self::synthesize_hrir(direction, 1.0, sampling_rate),
                ]);
            }
        }

        Self {
            sampling_rate,
            hrirs,
            directions,
            volume: 1.0,
        }
    }

    /// Synthesizes one ear's HRIR for a direction. `ear_sign` is -1 for the
    /// left ear (at -x) and +1 for the right ear (at +x).
    fn synthesize_hrir(direction: Vector3, ear_sign: f32, sampling_rate: u32) -> Vec<f32> {
        let ear_axis = Vector3::new(ear_sign, 0.0, 0.0);
        let cos_incidence = Vector3::dot(direction, ear_axis).clamp(-1.0, 1.0);
        let incidence = cos_incidence.acos();

        // Woodworth interaural delay: zero for sound arriving from the ear's
        // side, growing to (r/c)(theta + sin theta) on the far side.
        let lateral = incidence - std::f32::consts::FRAC_PI_2;
        let delay_seconds = if lateral > 0.0 {
            (HEAD_RADIUS / SPEED_OF_SOUND) * (lateral + lateral.sin())
        } else {
            0.0
        };
        let delay_samples = delay_seconds * sampling_rate as f32;

        // Head shadowing: bright for ipsilateral incidence, increasingly
        // low-passed for contralateral incidence.
        let shadow = 0.5 * (1.0 + cos_incidence);
        let cutoff = 800.0 + shadow * 15_000.0;
        let gain = 0.4 + 0.6 * shadow;

        let mut hrir = vec![0.0; HRIR_LENGTH];

        // Fractionally delayed impulse.
        let whole = delay_samples.floor() as usize;
        let frac = delay_samples - delay_samples.floor();
        if whole + 1 < HRIR_LENGTH {
            hrir[whole] = gain * (1.0 - frac);
            hrir[whole + 1] = gain * frac;
        } else {
            hrir[HRIR_LENGTH - 1] = gain;
        }

        let mut filter = IirFilterer::new(Iir::low_pass(cutoff, sampling_rate));
        filter.apply_in_place(&mut hrir);

        hrir
    }

    fn normalize_rms(&mut self) {
        let mut energy = 0.0;
        let mut count = 0usize;
        for pair in &self.hrirs {
            for ear in pair {
                energy += ear.iter().map(|x| x * x).sum::<f32>();
                count += ear.len();
            }
        }

        if energy <= 0.0 || count == 0 {
            return;
        }

        let taps = self.hrirs[0][0].len().max(1);
        let rms = (energy / count as f32).sqrt();
        let scale = 1.0 / (rms * (taps as f32).sqrt());
        for pair in &mut self.hrirs {
            for ear in pair {
                for value in ear.iter_mut() {
                    *value *= scale;
                }
            }
        }
    }

    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    pub fn num_taps(&self) -> usize {
        self.hrirs.first().map_or(0, |pair| pair[0].len())
    }

    /// The overall volume scalar applied during rendering.
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Index of the grid direction nearest to `direction`.
    pub fn nearest(&self, direction: Vector3) -> usize {
        let direction = direction.normalized();

        let mut best = 0;
        let mut best_dot = f32::NEG_INFINITY;
        for (index, grid_direction) in self.directions.iter().enumerate() {
            let dot = Vector3::dot(direction, *grid_direction);
            if dot > best_dot {
                best_dot = dot;
                best = index;
            }
        }

        best
    }

    /// The HRIR pair for a grid direction index.
    pub fn hrir(&self, index: usize) -> (&[f32], &[f32]) {
        let pair = &self.hrirs[index];
        (&pair[0], &pair[1])
    }

    /// Writes the (possibly interpolated) HRIR pair for an arbitrary
    /// direction into `left` and `right`.
    pub fn interpolated_hrir(
        &self,
        direction: Vector3,
        interpolation: HrtfInterpolation,
        left: &mut [f32],
        right: &mut [f32],
    ) {
        let taps = self.num_taps().min(left.len()).min(right.len());

        match interpolation {
            HrtfInterpolation::Nearest => {
                let (l, r) = self.hrir(self.nearest(direction));
                left[..taps].copy_from_slice(&l[..taps]);
                right[..taps].copy_from_slice(&r[..taps]);
            }
            HrtfInterpolation::Bilinear => {
                left[..taps].fill(0.0);
                right[..taps].fill(0.0);

                for (index, weight) in self.bilinear_weights(direction) {
                    if weight == 0.0 {
                        continue;
                    }
                    let (l, r) = self.hrir(index);
                    for tap in 0..taps {
                        left[tap] += weight * l[tap];
                        right[tap] += weight * r[tap];
                    }
                }
            }
        }
    }

    /// The four surrounding grid directions and their bilinear weights.
    fn bilinear_weights(&self, direction: Vector3) -> [(usize, f32); 4] {
        let direction = direction.normalized();

        let elevation = direction.y.clamp(-1.0, 1.0).asin();
        let azimuth = direction.x.atan2(-direction.z).rem_euclid(2.0 * std::f32::consts::PI);

        let elevation_step = std::f32::consts::PI / (NUM_ELEVATIONS - 1) as f32;
        let azimuth_step = 2.0 * std::f32::consts::PI / NUM_AZIMUTHS as f32;

        let elevation_pos = (elevation + std::f32::consts::FRAC_PI_2) / elevation_step;
        let azimuth_pos = azimuth / azimuth_step;

        let el0 = (elevation_pos.floor() as usize).min(NUM_ELEVATIONS - 1);
        let el1 = (el0 + 1).min(NUM_ELEVATIONS - 1);
        let az0 = (azimuth_pos.floor() as usize) % NUM_AZIMUTHS;
        let az1 = (az0 + 1) % NUM_AZIMUTHS;

        let el_frac = (elevation_pos - elevation_pos.floor()).clamp(0.0, 1.0);
        let az_frac = (azimuth_pos - azimuth_pos.floor()).clamp(0.0, 1.0);

        [
            (el0 * NUM_AZIMUTHS + az0, (1.0 - el_frac) * (1.0 - az_frac)),
            (el0 * NUM_AZIMUTHS + az1, (1.0 - el_frac) * az_frac),
            (el1 * NUM_AZIMUTHS + az0, el_frac * (1.0 - az_frac)),
            (el1 * NUM_AZIMUTHS + az1, el_frac * az_frac),
        ]
    }
}

/// Settings used to create an [`Hrtf`].
#[derive(Debug, Clone)]
pub enum HrtfSettings {
    /// The built-in spherical-head model.
    Default {
        /// Volume scalar applied to all rendered output.
        volume: f32,

        /// Volume normalization applied at load time.
        normalization: HrtfNormalization,
    },

    /// An explicit HRIR grid, e.g. decoded from a SOFA file by the host.
    Raw {
        /// Measurement directions.
        directions: Vec<Vector3>,

        /// Per-direction (left, right) HRIR pairs, one per direction.
        hrirs: Vec<[Vec<f32>; 2]>,

        /// Volume scalar applied to all rendered output.
        volume: f32,

        /// Volume normalization applied at load time.
        normalization: HrtfNormalization,
    },
}

impl Default for HrtfSettings {
    fn default() -> Self {
        Self::Default {
            volume: 1.0,
            normalization: HrtfNormalization::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_hrtf() -> Hrtf {
        Hrtf::try_new(&AudioSettings::default(), &HrtfSettings::default()).unwrap()
    }

    #[test]
    fn test_hrirs_are_finite() {
        let hrtf = default_hrtf();

        for index in 0..NUM_AZIMUTHS * NUM_ELEVATIONS {
            let (left, right) = hrtf.hrir(index);
            assert!(left.iter().all(|x| x.is_finite()));
            assert!(right.iter().all(|x| x.is_finite()));
        }
    }

    #[test]
    fn test_lateral_source_favors_near_ear() {
        let hrtf = default_hrtf();

        // Source hard right: the right ear response carries more energy.
        let mut left = vec![0.0; hrtf.num_taps()];
        let mut right = vec![0.0; hrtf.num_taps()];
        hrtf.interpolated_hrir(
            Vector3::new(1.0, 0.0, 0.0),
            HrtfInterpolation::Nearest,
            &mut left,
            &mut right,
        );

        let left_energy: f32 = left.iter().map(|x| x * x).sum();
        let right_energy: f32 = right.iter().map(|x| x * x).sum();
        assert!(right_energy > left_energy);
    }

    #[test]
    fn test_bilinear_weights_sum_to_one() {
        let hrtf = default_hrtf();

        for direction in [
            Vector3::new(0.3, 0.5, -0.8),
            Vector3::new(-0.7, -0.2, 0.4),
            Vector3::new(0.0, 1.0, 0.0),
        ] {
            let total: f32 = hrtf
                .bilinear_weights(direction)
                .iter()
                .map(|(_, w)| w)
                .sum();
            approx::assert_relative_eq!(total, 1.0, epsilon = 1e-5);
        }
    }
}
