//! Ambisonics processing effects.

mod encode;
pub use encode::{AmbisonicsEncodeEffect, AmbisonicsEncodeEffectParams, AmbisonicsEncodeEffectSettings};

mod panning;
pub use panning::{
    AmbisonicsPanningEffect, AmbisonicsPanningEffectParams, AmbisonicsPanningEffectSettings,
};

mod binaural;
pub use binaural::{
    AmbisonicsBinauralEffect, AmbisonicsBinauralEffectParams, AmbisonicsBinauralEffectSettings,
};

mod rotation;
pub use rotation::{
    AmbisonicsRotationEffect, AmbisonicsRotationEffectParams, AmbisonicsRotationEffectSettings,
};

mod decode;
pub use decode::{
    AmbisonicsDecodeEffect, AmbisonicsDecodeEffectParams, AmbisonicsDecodeEffectSettings,
};
