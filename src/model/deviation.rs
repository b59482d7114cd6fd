//! Frequency-dependent attenuation of sound as it bends along a propagation
//! path from the source to the listener.

use crate::NUM_BANDS;
use std::sync::Arc;

/// Angles (in radians) at which each band's default deviation response falls
/// to half. Low frequencies bend further around obstacles than high
/// frequencies.
const BAND_REFERENCE_ANGLES: [f32; NUM_BANDS] = [4.0, 2.0, 1.0];

/// A deviation model: frequency-dependent attenuation of sound as it bends
/// along the path from the source to the listener.
#[derive(Clone, Default)]
pub enum DeviationModel {
    /// The default model: per band, `1 / (1 + (deviation / reference)²)`,
    /// a monotonically non-increasing function of the deviation angle with
    /// no attenuation at zero deviation.
    #[default]
    Default,

    /// An arbitrary model defined by a callback taking the total deviation
    /// angle (in radians) and the band index.
    Callback(Arc<dyn Fn(f32, usize) -> f32 + Send + Sync>),
}

impl DeviationModel {
    /// The gain applied to the given band for a path with the given total
    /// deviation angle (in radians).
    pub fn evaluate(&self, deviation: f32, band: usize) -> f32 {
        match self {
            Self::Default => {
                let ratio = deviation / BAND_REFERENCE_ANGLES[band];
                1.0 / (1.0 + ratio * ratio)
            }
            Self::Callback(callback) => callback(deviation, band),
        }
    }
}

impl std::fmt::Debug for DeviationModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::Callback(_) => write!(f, "Callback(<closure>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_deviation_is_transparent() {
        let model = DeviationModel::default();
        for band in 0..NUM_BANDS {
            assert_eq!(model.evaluate(0.0, band), 1.0);
        }
    }

    #[test]
    fn test_monotonically_non_increasing() {
        let model = DeviationModel::default();
        for band in 0..NUM_BANDS {
            let mut previous = 1.0;
            for step in 1..50 {
                let value = model.evaluate(step as f32 * 0.1, band);
                assert!(value <= previous);
                previous = value;
            }
        }
    }

    #[test]
    fn test_high_bands_attenuate_faster() {
        let model = DeviationModel::default();
        let deviation = 1.5;
        assert!(model.evaluate(deviation, 2) < model.evaluate(deviation, 1));
        assert!(model.evaluate(deviation, 1) < model.evaluate(deviation, 0));
    }
}
