//! Models for distance attenuation, air absorption, directivity, and
//! diffraction-induced deviation.

mod distance_attenuation;
pub use distance_attenuation::DistanceAttenuationModel;

mod air_absorption;
pub use air_absorption::AirAbsorptionModel;

mod directivity;
pub use directivity::Directivity;

mod deviation;
pub use deviation::DeviationModel;
