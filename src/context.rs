use crate::error::EchofieldError;
use crate::simd::{self, SimdLevel};

/// The library version against which serialized assets are validated.
pub const ECHOFIELD_VERSION: u32 = (0 << 16) | (1 << 8); // major.minor.patch packed as bytes

/// A context object, which controls low-level operations of the engine.
///
/// Typically, a context is created once during the execution of the client
/// program, before creating any other object, and shared between all of them.
#[derive(Debug, Clone)]
pub struct Context {
    simd_level: SimdLevel,
    version: u32,
}

impl Context {
    /// Creates a new context.
    ///
    /// # Errors
    ///
    /// Returns [`EchofieldError::Initialization`] if the requested SIMD level
    /// is not supported by the host.
    pub fn try_new(settings: &ContextSettings) -> Result<Self, EchofieldError> {
        let detected = simd::detect_simd_level();

        let simd_level = match settings.max_simd_level {
            Some(requested) if requested > detected => {
                return Err(EchofieldError::Initialization);
            }
            Some(requested) => requested,
            None => detected,
        };

        log::debug!("context created (simd level: {simd_level:?})");

        Ok(Self {
            simd_level,
            version: settings.version,
        })
    }

    /// The SIMD level used by vectorized code paths.
    pub fn simd_level(&self) -> SimdLevel {
        self.simd_level
    }

    /// The API version this context was created for.
    pub fn version(&self) -> u32 {
        self.version
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::try_new(&ContextSettings::default()).unwrap()
    }
}

/// Settings used to create a [`Context`].
#[derive(Debug)]
pub struct ContextSettings {
    /// The API version.
    ///
    /// Typically, this should be left at [`ECHOFIELD_VERSION`].
    pub version: u32,

    /// Caps the SIMD level used by vectorized code paths.
    ///
    /// `None` uses the best level supported by the host. Useful to force the
    /// 4-wide code paths when comparing against the 8-wide variants.
    pub max_simd_level: Option<SimdLevel>,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            version: ECHOFIELD_VERSION,
            max_simd_level: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_context() {
        let context = Context::default();
        assert_eq!(context.version(), ECHOFIELD_VERSION);
    }

    #[test]
    fn test_simd_level_cap() {
        let context = Context::try_new(&ContextSettings {
            max_simd_level: Some(SimdLevel::Sse2),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(context.simd_level(), SimdLevel::Sse2);
    }
}
