//! Directivity patterns modeling sound intensity as a function of the
//! source's orientation.

use crate::geometry::{CoordinateSpace3, Vector3};
use std::sync::Arc;

/// A directivity pattern modeling changes in sound intensity as a function
/// of the source's orientation. Usable with both direct and indirect sound
/// propagation.
#[derive(Clone)]
pub enum Directivity {
    /// A weighted dipole: a linear blend between an omnidirectional source
    /// and a dipole oriented along the source's facing direction.
    WeightedDipole {
        /// How much of the dipole to blend in. 0.0 = pure omnidirectional,
        /// 1.0 = pure dipole; 0.5 gives a cardioid pattern.
        weight: f32,

        /// How sharp the dipole is. Higher values focus sound within a
        /// narrower range of directions.
        power: f32,
    },

    /// An arbitrary pattern defined by a callback taking the normalized
    /// direction from the source, in the source's coordinate space.
    Callback(Arc<dyn Fn(Vector3) -> f32 + Send + Sync>),
}

impl Directivity {
    /// The attenuation of a source at `source`, heard from `listener`.
    pub fn evaluate(&self, source: &CoordinateSpace3, listener: Vector3) -> f32 {
        let to_listener = (listener - source.origin).normalized();
        if to_listener == Vector3::ZERO {
            return 1.0;
        }

        self.evaluate_direction(source, to_listener)
    }

    /// The attenuation along a world-space unit direction out of the source.
    pub fn evaluate_direction(&self, source: &CoordinateSpace3, direction: Vector3) -> f32 {
        match self {
            Self::WeightedDipole { weight, power } => {
                let cosine = Vector3::dot(direction, source.ahead);
                ((1.0 - weight) + weight * cosine).abs().powf(*power)
            }
            Self::Callback(callback) => callback(source.direction_to_local(direction)),
        }
    }
}

impl Default for Directivity {
    fn default() -> Self {
        Self::WeightedDipole {
            weight: 0.5,
            power: 0.5,
        }
    }
}

impl std::fmt::Debug for Directivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WeightedDipole { weight, power } => f
                .debug_struct("WeightedDipole")
                .field("weight", weight)
                .field("power", power)
                .finish(),
            Self::Callback(_) => write!(f, "Callback(<closure>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cardioid_pattern() {
        let source = CoordinateSpace3::default();
        let directivity = Directivity::WeightedDipole {
            weight: 0.5,
            power: 1.0,
        };

        // Full intensity ahead, none behind, half to the side.
        let ahead = directivity.evaluate(&source, source.ahead);
        let behind = directivity.evaluate(&source, -source.ahead);
        let side = directivity.evaluate(&source, source.right);

        assert_relative_eq!(ahead, 1.0, epsilon = 1e-5);
        assert_relative_eq!(behind, 0.0, epsilon = 1e-5);
        assert_relative_eq!(side, 0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_omnidirectional() {
        let source = CoordinateSpace3::default();
        let directivity = Directivity::WeightedDipole {
            weight: 0.0,
            power: 1.0,
        };

        for direction in [
            Vector3::UNIT_X,
            Vector3::UNIT_Y,
            Vector3::UNIT_Z,
            -Vector3::UNIT_X,
        ] {
            assert_relative_eq!(directivity.evaluate(&source, direction), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_callback() {
        let source = CoordinateSpace3::default();
        let directivity = Directivity::Callback(Arc::new(|_direction| 0.5));
        assert_eq!(directivity.evaluate(&source, Vector3::UNIT_X), 0.5);
    }
}
