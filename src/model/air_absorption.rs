//! Frequency-dependent attenuation of sound over distance.

use crate::NUM_BANDS;
use std::sync::Arc;

/// Exponential decay rates of the default model, per band, derived from
/// physical properties of air.
const DEFAULT_COEFFICIENTS: [f32; NUM_BANDS] = [0.0002, 0.0017, 0.0182];

/// An air absorption model for frequency-dependent attenuation of sound over
/// distance.
#[derive(Clone, Default)]
pub enum AirAbsorptionModel {
    /// The default model: an exponential falloff with decay rates derived
    /// from physical properties of air.
    #[default]
    Default,

    /// An exponential falloff with configurable per-band decay rates.
    Exponential {
        /// The exponential falloff coefficients.
        coefficients: [f32; NUM_BANDS],
    },

    /// An arbitrary model defined by a callback taking the distance (in
    /// meters) and the band index.
    Callback(Arc<dyn Fn(f32, usize) -> f32 + Send + Sync>),
}

impl AirAbsorptionModel {
    /// The gain applied to the given band for sound traveling the given
    /// distance (in meters).
    pub fn evaluate(&self, distance: f32, band: usize) -> f32 {
        match self {
            Self::Default => (-DEFAULT_COEFFICIENTS[band] * distance).exp(),
            Self::Exponential { coefficients } => (-coefficients[band] * distance).exp(),
            Self::Callback(callback) => callback(distance, band),
        }
    }

    /// The per-band gains for the given distance.
    pub fn evaluate_bands(&self, distance: f32) -> [f32; NUM_BANDS] {
        let mut gains = [1.0; NUM_BANDS];
        for (band, gain) in gains.iter_mut().enumerate() {
            *gain = self.evaluate(distance, band);
        }
        gains
    }
}

impl std::fmt::Debug for AirAbsorptionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::Exponential { coefficients } => f
                .debug_struct("Exponential")
                .field("coefficients", coefficients)
                .finish(),
            Self::Callback(_) => write!(f, "Callback(<closure>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance_is_transparent() {
        let model = AirAbsorptionModel::default();
        assert_eq!(model.evaluate_bands(0.0), [1.0; NUM_BANDS]);
    }

    #[test]
    fn test_higher_bands_absorb_more() {
        let model = AirAbsorptionModel::default();
        let gains = model.evaluate_bands(100.0);

        assert!(gains[2] < gains[1]);
        assert!(gains[1] < gains[0]);
        assert!(gains.iter().all(|&g| g > 0.0 && g < 1.0));
    }

    #[test]
    fn test_exponential_model() {
        let model = AirAbsorptionModel::Exponential {
            coefficients: [0.01, 0.02, 0.03],
        };
        let gains = model.evaluate_bands(5.0);
        approx::assert_relative_eq!(gains[0], (-0.05f32).exp(), epsilon = 1e-6);
    }
}
