//! Audio effects for spatial audio processing.
//!
//! # Effect categories
//!
//! ## Point-source spatialization
//! - [`BinauralEffect`] - spatialize a point source using an HRTF
//! - [`PanningEffect`] - pan a point source to a multi-channel speaker layout
//! - [`VirtualSurroundEffect`] - render surround mixes binaurally over headphones
//!
//! ## Environmental effects
//! - [`DirectEffect`] - distance attenuation, air absorption, occlusion, transmission
//! - [`ReflectionEffect`] - reflections and reverb (convolution, parametric, or hybrid)
//! - [`PathEffect`] - sound propagation paths around obstacles
//!
//! ## Ambisonics processing
//! - [`AmbisonicsEncodeEffect`] - encode point sources to Ambisonics
//! - [`AmbisonicsPanningEffect`] - decode Ambisonics by panning to speakers
//! - [`AmbisonicsBinauralEffect`] - decode Ambisonics using HRTF rendering
//! - [`AmbisonicsRotationEffect`] - rotate an Ambisonic sound field
//! - [`AmbisonicsDecodeEffect`] - rotation plus panned or binaural decode
//!
//! All effects process one frame at a time on the audio thread, never
//! allocate during [`apply`](DirectEffect::apply), and report whether tail
//! samples remain via [`AudioEffectState`].

mod equalizer;
pub use equalizer::Equalizer;

mod gain;
pub use gain::{GainEffect, GainEffectParams};

mod eq;
pub use eq::{EqEffect, EqEffectParams};

mod delay;
pub use delay::{Delay, DelayEffect, DelayEffectParams, DelayEffectSettings};

mod direct;
pub use direct::{DirectEffect, DirectEffectParams, DirectEffectSettings, Transmission};

mod reverb;
pub use reverb::{ReverbEffect, ReverbEffectParams};

mod convolution;
pub use convolution::{
    FftIr, OverlapSaveConvolutionEffect, OverlapSaveConvolutionEffectParams,
    OverlapSaveConvolutionEffectSettings,
};

mod hybrid_reverb;
pub use hybrid_reverb::{HybridReverbEffect, HybridReverbEffectParams, HybridReverbEffectSettings};

mod reflection;
pub use reflection::{
    ReflectionEffect, ReflectionEffectParams, ReflectionEffectSettings, ReflectionEffectType,
};

mod panning;
pub use panning::{PanningEffect, PanningEffectParams, PanningEffectSettings};

mod binaural;
pub use binaural::{BinauralEffect, BinauralEffectParams, BinauralEffectSettings};

mod virtual_surround;
pub use virtual_surround::{
    VirtualSurroundEffect, VirtualSurroundEffectParams, VirtualSurroundEffectSettings,
};

mod path;
pub use path::{PathEffect, PathEffectParams, PathEffectSettings};

pub mod ambisonics;
pub use ambisonics::*;

/// States that an audio effect can be in after processing a frame of audio.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AudioEffectState {
    /// One or more frames of audio remain in the effect's internal buffers.
    /// Keep calling `tail` until it returns [`AudioEffectState::TailComplete`].
    TailRemaining,

    /// No audio remains in the effect's internal buffers.
    TailComplete,
}
