//! Attenuation of sound over distance.

use std::sync::Arc;

/// A distance attenuation model, usable with both direct and indirect sound
/// propagation.
#[derive(Clone, Default)]
pub enum DistanceAttenuationModel {
    /// The default model: an inverse-distance falloff, with all sounds
    /// within 1 meter of the listener rendered without distance attenuation.
    #[default]
    Default,

    /// An inverse-distance falloff with a configurable minimum distance,
    /// within which no attenuation is applied.
    InverseDistance {
        /// No distance attenuation is applied to any sound closer than this.
        min_distance: f32,
    },

    /// An arbitrary falloff curve defined by a callback, e.g. evaluating a
    /// curve authored in a GUI.
    Callback(Arc<dyn Fn(f32) -> f32 + Send + Sync>),
}

impl DistanceAttenuationModel {
    /// The attenuation applied to a sound at the given distance (in meters).
    pub fn evaluate(&self, distance: f32) -> f32 {
        match self {
            Self::Default => 1.0 / distance.max(1.0),
            Self::InverseDistance { min_distance } => 1.0 / distance.max(min_distance.max(1e-4)),
            Self::Callback(callback) => callback(distance),
        }
    }
}

impl std::fmt::Debug for DistanceAttenuationModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::InverseDistance { min_distance } => f
                .debug_struct("InverseDistance")
                .field("min_distance", min_distance)
                .finish(),
            Self::Callback(_) => write!(f, "Callback(<closure>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model() {
        let model = DistanceAttenuationModel::default();
        assert_eq!(model.evaluate(10.0), 0.1);
        assert_eq!(model.evaluate(0.0), 1.0);
        assert_eq!(model.evaluate(0.5), 1.0);
    }

    #[test]
    fn test_inverse_distance_model() {
        let model = DistanceAttenuationModel::InverseDistance { min_distance: 2.0 };
        assert_eq!(model.evaluate(5.0), 0.2);
        assert_eq!(model.evaluate(1.0), 0.5);
    }

    #[test]
    fn test_attenuation_decreases_with_distance() {
        let model = DistanceAttenuationModel::default();
        let mut previous = 1.1;
        for distance in [1.0, 5.0, 10.0, 50.0] {
            let attenuation = model.evaluate(distance);
            assert!(attenuation < previous);
            previous = attenuation;
        }
    }

    #[test]
    fn test_callback_model() {
        let model = DistanceAttenuationModel::Callback(Arc::new(|distance| {
            (1.0 - distance / 100.0).max(0.0)
        }));
        assert_eq!(model.evaluate(10.0), 0.9);
    }
}
