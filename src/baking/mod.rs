//! Baking of acoustic data at probe positions.

mod reflections;
pub use reflections::{
    BakedReflectionsData, ReflectionsBakeParams, ReflectionsBaker, lookup_baked_reverb,
};
