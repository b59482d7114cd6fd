//! A real-time geometric-acoustics engine.
//!
//! `echofield` converts a scene description (triangle meshes with per-face
//! acoustic materials) and moving source/listener positions into binaurally
//! rendered audio. Sound is simulated geometrically: a bounding-volume
//! hierarchy answers ray and occlusion queries, a stochastic ray tracer
//! accumulates directional energy histograms for reflections and reverb, and
//! a probe graph with baked shortest paths models propagation around
//! obstacles. Per-frame DSP effects consume the simulation results and mix
//! direct, reflected, and pathed contributions into the output.
//!
//! The crate is split into three broad layers:
//!
//! - **Scene**: [`geometry`], [`scene`], with [`Scene`] presenting closest-hit,
//!   any-hit, and occlusion queries over static and instanced meshes.
//! - **Simulation**: [`reflection_simulator`], [`reverb_estimator`],
//!   [`reconstructor`], [`probe`], [`path`], and the [`simulation`] façade
//!   that schedules them on a worker pool and publishes results to the audio
//!   thread.
//! - **Rendering**: [`effect`] (direct, reverb, convolution, Ambisonics,
//!   panning, binaural, path), driven one frame at a time on the audio
//!   thread.

pub mod array_math;

pub mod audio_buffer;
pub use audio_buffer::*;

pub mod audio_settings;
pub use audio_settings::*;

pub mod baked_data;
pub use baked_data::*;

pub mod baking;
pub use baking::*;

pub mod callback;
pub use callback::*;

pub mod context;
pub use context::*;

pub mod effect;
pub use effect::*;

pub mod energy_field;
pub use energy_field::*;

mod error;
pub use error::EchofieldError;

pub mod fft;
pub use fft::Fft;

pub mod geometry;
pub use geometry::*;

pub mod hrtf;
pub use hrtf::*;

pub mod hybrid_reverb_estimator;
pub use hybrid_reverb_estimator::*;

pub mod iir;
pub use iir::*;

pub mod impulse_response;
pub use impulse_response::*;

pub mod model;
pub use model::*;

pub mod path;
pub use path::*;

pub mod probe;
pub use probe::*;

pub mod reconstructor;
pub use reconstructor::*;

pub mod reflection_simulator;
pub use reflection_simulator::*;

pub mod reverb_estimator;
pub use reverb_estimator::*;

pub mod sampling;
pub use sampling::*;

pub mod scene;
pub use scene::*;

mod serialized_object;
pub use serialized_object::{SerializeError, SerializedObject};

pub mod sh;
pub use sh::ShRotation;

pub mod simd;
pub use simd::SimdLevel;

pub mod simulation;
pub use simulation::*;

pub mod speaker_layout;
pub use speaker_layout::*;

/// Number of frequency bands used throughout the engine.
///
/// All frequency-dependent quantities (absorption, transmission, air
/// absorption, EQ gains, reverb times) are specified per band.
pub const NUM_BANDS: usize = 3;

/// The speed of sound in air at 20 °C, in meters per second.
pub const SPEED_OF_SOUND: f32 = 343.0;
