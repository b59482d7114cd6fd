//! Identifiers and storage for data baked into probe batches.

use crate::geometry::Sphere;

/// The kind of acoustic data baked into a layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum BakedDataType {
    /// Baked reflections: per-probe energy fields and reverb estimates.
    Reflections,

    /// Baked pathing: shortest paths between all pairs of probes.
    Pathing,
}

/// How a baked layer varies with the positions of the source and listener.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum BakedDataVariation {
    /// Reverb as a function of listener position only.
    Reverb,

    /// Data varies with listener position; the source is fixed at the
    /// endpoint.
    StaticSource,

    /// Data varies with source position; the listener is fixed at the
    /// endpoint.
    StaticListener,

    /// Data varies with both source and listener position.
    Dynamic,
}

/// Identifies a layer of baked data within a probe batch.
#[derive(Debug, Copy, Clone)]
pub struct BakedDataIdentifier {
    /// The kind of data in the layer.
    pub data_type: BakedDataType,

    /// How the data varies with source and listener position.
    pub variation: BakedDataVariation,

    /// For the static-endpoint variations, the influence sphere of the fixed
    /// endpoint.
    pub endpoint_influence: Sphere,
}

impl BakedDataIdentifier {
    /// The identifier under which baked pathing data is registered.
    pub fn pathing() -> Self {
        Self {
            data_type: BakedDataType::Pathing,
            variation: BakedDataVariation::Dynamic,
            endpoint_influence: Sphere::default(),
        }
    }

    /// The identifier under which baked listener-centric reverb is
    /// registered.
    pub fn reverb() -> Self {
        Self {
            data_type: BakedDataType::Reflections,
            variation: BakedDataVariation::Reverb,
            endpoint_influence: Sphere::default(),
        }
    }
}

/// A layer of baked data stored in a probe batch.
///
/// Dispatch is by tag: each variant wraps the concrete baked payload for one
/// [`BakedDataType`].
#[derive(Debug)]
pub enum BakedData {
    Reflections(crate::baking::BakedReflectionsData),
    Pathing(crate::path::BakedPathData),
}

impl BakedData {
    /// Marks the layer stale after a probe moved. Stale layers must be
    /// re-baked before lookups are meaningful.
    pub fn update_probe_position(&mut self, index: usize) {
        match self {
            Self::Reflections(data) => data.update_probe_position(index),
            Self::Pathing(data) => data.mark_needs_update(),
        }
    }

    /// Extends the layer after a probe was appended to the batch.
    pub fn add_probe(&mut self) {
        match self {
            Self::Reflections(data) => data.add_probe(),
            Self::Pathing(data) => data.mark_needs_update(),
        }
    }

    /// Shrinks the layer after a probe was removed from the batch.
    pub fn remove_probe(&mut self, index: usize) {
        match self {
            Self::Reflections(data) => data.remove_probe(index),
            Self::Pathing(data) => data.mark_needs_update(),
        }
    }
}

// Identifiers are totally ordered by (variation, type, endpoint center,
// endpoint radius) so they can key the probe batch's layer map.
impl Ord for BakedDataIdentifier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let center = self.endpoint_influence.center;
        let other_center = other.endpoint_influence.center;

        self.variation
            .cmp(&other.variation)
            .then(self.data_type.cmp(&other.data_type))
            .then(center.x.total_cmp(&other_center.x))
            .then(center.y.total_cmp(&other_center.y))
            .then(center.z.total_cmp(&other_center.z))
            .then(
                self.endpoint_influence
                    .radius
                    .total_cmp(&other.endpoint_influence.radius),
            )
    }
}

impl PartialOrd for BakedDataIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for BakedDataIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for BakedDataIdentifier {}
