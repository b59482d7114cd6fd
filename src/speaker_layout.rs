//! Speaker layouts for panning and virtual-speaker decoding.

use crate::geometry::Vector3;

/// A multi-channel speaker layout, described by the unit direction of each
/// speaker relative to the listener.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerLayout {
    speakers: Vec<Vector3>,
}

impl SpeakerLayout {
    /// A single speaker straight ahead.
    pub fn mono() -> Self {
        Self {
            speakers: vec![Vector3::new(0.0, 0.0, -1.0)],
        }
    }

    /// Two speakers at ±30° azimuth.
    pub fn stereo() -> Self {
        Self {
            speakers: vec![
                Vector3::new(-0.5, 0.0, -0.866_025_4),
                Vector3::new(0.5, 0.0, -0.866_025_4),
            ],
        }
    }

    /// Four speakers at ±45° front and ±135° rear.
    pub fn quadraphonic() -> Self {
        const D: f32 = std::f32::consts::FRAC_1_SQRT_2;
        Self {
            speakers: vec![
                Vector3::new(-D, 0.0, -D),
                Vector3::new(D, 0.0, -D),
                Vector3::new(-D, 0.0, D),
                Vector3::new(D, 0.0, D),
            ],
        }
    }

    /// 5.1 surround: front left/right, center, LFE (straight ahead), and
    /// surround left/right.
    pub fn surround_5_1() -> Self {
        const D: f32 = std::f32::consts::FRAC_1_SQRT_2;
        Self {
            speakers: vec![
                Vector3::new(-0.5, 0.0, -0.866_025_4),
                Vector3::new(0.5, 0.0, -0.866_025_4),
                Vector3::new(0.0, 0.0, -1.0),
                Vector3::new(0.0, 0.0, -1.0),
                Vector3::new(-D, 0.0, D),
                Vector3::new(D, 0.0, D),
            ],
        }
    }

    /// 7.1 surround: 5.1 plus side left/right.
    pub fn surround_7_1() -> Self {
        const D: f32 = std::f32::consts::FRAC_1_SQRT_2;
        Self {
            speakers: vec![
                Vector3::new(-0.5, 0.0, -0.866_025_4),
                Vector3::new(0.5, 0.0, -0.866_025_4),
                Vector3::new(0.0, 0.0, -1.0),
                Vector3::new(0.0, 0.0, -1.0),
                Vector3::new(-D, 0.0, D),
                Vector3::new(D, 0.0, D),
                Vector3::new(-1.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
            ],
        }
    }

    /// A custom layout from explicit speaker directions.
    pub fn custom(speakers: Vec<Vector3>) -> Self {
        Self {
            speakers: speakers.into_iter().map(Vector3::normalized).collect(),
        }
    }

    pub fn num_speakers(&self) -> usize {
        self.speakers.len()
    }

    pub fn speaker(&self, index: usize) -> Vector3 {
        self.speakers[index]
    }

    pub fn speakers(&self) -> &[Vector3] {
        &self.speakers
    }

    /// Energy-preserving panning gains for a source in the given direction:
    /// each speaker's gain is proportional to the cosine of the angle between
    /// source and speaker (floored at zero), normalized so the gains' squares
    /// sum to one.
    pub fn panning_gains(&self, direction: Vector3, gains: &mut [f32]) {
        assert_eq!(gains.len(), self.speakers.len());

        let direction = direction.normalized();

        let mut energy = 0.0;
        for (gain, speaker) in gains.iter_mut().zip(self.speakers.iter()) {
            *gain = Vector3::dot(direction, *speaker).max(0.0);
            energy += *gain * *gain;
        }

        if energy > 0.0 {
            let scale = 1.0 / energy.sqrt();
            for gain in gains.iter_mut() {
                *gain *= scale;
            }
        } else {
            // Source direction opposite all speakers: distribute evenly.
            let value = 1.0 / (self.speakers.len() as f32).sqrt();
            gains.fill(value);
        }
    }
}

impl Default for SpeakerLayout {
    fn default() -> Self {
        Self::stereo()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_panning_gains_are_energy_preserving() {
        let layout = SpeakerLayout::quadraphonic();
        let mut gains = vec![0.0; layout.num_speakers()];

        layout.panning_gains(Vector3::new(0.3, 0.0, -0.9), &mut gains);
        let energy: f32 = gains.iter().map(|g| g * g).sum();
        assert_relative_eq!(energy, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_hard_left_panning() {
        let layout = SpeakerLayout::stereo();
        let mut gains = vec![0.0; 2];

        layout.panning_gains(Vector3::new(-1.0, 0.0, 0.0), &mut gains);
        assert!(gains[0] > 0.9);
        assert!(gains[1] < 0.1);
    }
}
