//! Probes: spatial sample points carrying baked acoustic data.

mod tree;
pub use tree::ProbeTree;

mod generator;
pub use generator::ProbeGenerationParams;

use std::collections::BTreeMap;

use crate::baked_data::{BakedData, BakedDataIdentifier};
use crate::geometry::{Sphere, Vector3};
use crate::scene::Scene;
use crate::serialized_object::{SerializeError, SerializedObject};

/// A spatial sample point with a sphere of influence.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Probe {
    /// The region within which this probe influences queries.
    pub influence: Sphere,
}

/// A plain array of probes, as produced by probe generation. Typically
/// handed to a [`ProbeBatch`] for baking and runtime lookup.
#[derive(Debug, Default, Clone)]
pub struct ProbeArray {
    pub probes: Vec<Probe>,
}

impl ProbeArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_probes(&self) -> usize {
        self.probes.len()
    }

    /// Generates probes covering the scene, replacing any existing probes.
    pub fn generate_probes(&mut self, scene: &Scene, params: &ProbeGenerationParams) {
        self.probes = generator::generate(scene, params);

        log::info!("generated {} probes", self.probes.len());
    }
}

/// The maximum number of probes from one batch that can influence a query
/// point.
pub const MAX_PROBES_PER_BATCH: usize = 8;

/// The probes influencing a query point: batch and probe indices, weights,
/// and per-probe occlusion flags.
///
/// Fixed capacity: at most [`MAX_PROBES_PER_BATCH`] probes per batch, for
/// however many batches the neighborhood was sized for.
#[derive(Debug, Default, Clone)]
pub struct ProbeNeighborhood {
    /// For each slot, the index of the batch the probe belongs to, or
    /// `None` for empty slots.
    pub batch_indices: Vec<Option<usize>>,

    /// For each slot, the probe index within its batch, or -1 for empty
    /// slots.
    pub probe_indices: Vec<i32>,

    /// Interpolation weight of each valid probe. Weights of valid,
    /// unoccluded probes sum to 1.
    pub weights: Vec<f32>,

    /// Whether the straight line from the query point to each probe is
    /// occluded.
    pub occluded: Vec<bool>,
}

impl ProbeNeighborhood {
    /// Sizes the neighborhood for the given number of batches.
    pub fn resize(&mut self, num_batches: usize) {
        let capacity = num_batches * MAX_PROBES_PER_BATCH;
        self.batch_indices.resize(capacity, None);
        self.probe_indices.resize(capacity, -1);
        self.weights.resize(capacity, 0.0);
        self.occluded.resize(capacity, false);
        self.reset();
    }

    pub fn reset(&mut self) {
        self.batch_indices.fill(None);
        self.probe_indices.fill(-1);
        self.weights.fill(0.0);
        self.occluded.fill(false);
    }

    pub fn num_slots(&self) -> usize {
        self.probe_indices.len()
    }

    pub fn has_valid_probes(&self) -> bool {
        self.batch_indices
            .iter()
            .zip(self.probe_indices.iter())
            .any(|(batch, &probe)| batch.is_some() && probe >= 0)
    }

    /// Index of the valid slot whose probe is nearest to `point`.
    pub fn find_nearest(&self, batches: &[&ProbeBatch], point: Vector3) -> Option<usize> {
        let mut best = None;
        let mut best_distance = f32::INFINITY;

        for slot in 0..self.num_slots() {
            let (Some(batch_index), probe_index) =
                (self.batch_indices[slot], self.probe_indices[slot])
            else {
                continue;
            };
            if probe_index < 0 {
                continue;
            }

            let center = batches[batch_index].probe(probe_index as usize).influence.center;
            let distance = (center - point).length_squared();
            if distance < best_distance {
                best_distance = distance;
                best = Some(slot);
            }
        }

        best
    }

    /// Tests each probe's line of sight to the query point against the
    /// scene.
    pub fn check_occlusion(&mut self, scene: &Scene, batches: &[&ProbeBatch], point: Vector3) {
        for slot in 0..self.num_slots() {
            let (Some(batch_index), probe_index) =
                (self.batch_indices[slot], self.probe_indices[slot])
            else {
                continue;
            };
            if probe_index < 0 {
                continue;
            }

            let center = batches[batch_index].probe(probe_index as usize).influence.center;
            self.occluded[slot] = scene.is_occluded(point, center);
        }
    }

    /// Computes interpolation weights for all valid, unoccluded probes,
    /// inversely proportional to distance and normalized to sum to 1.
    pub fn calc_weights(&mut self, batches: &[&ProbeBatch], point: Vector3) {
        let mut total = 0.0;

        for slot in 0..self.num_slots() {
            self.weights[slot] = 0.0;

            let (Some(batch_index), probe_index) =
                (self.batch_indices[slot], self.probe_indices[slot])
            else {
                continue;
            };
            if probe_index < 0 || self.occluded[slot] {
                continue;
            }

            let center = batches[batch_index].probe(probe_index as usize).influence.center;
            let distance = (center - point).length();
            self.weights[slot] = 1.0 / distance.max(1e-4);
            total += self.weights[slot];
        }

        if total > 0.0 {
            for weight in &mut self.weights {
                *weight /= total;
            }
        }
    }
}

/// A set of probes, together with the acoustic data baked at them and a
/// spatial tree for containment queries.
///
/// After probes are added or removed, [`ProbeBatch::commit`] must be called
/// to rebuild the tree before lookups.
#[derive(Debug, Default)]
pub struct ProbeBatch {
    probes: Vec<Probe>,
    data: BTreeMap<BakedDataIdentifier, BakedData>,
    tree: Option<ProbeTree>,
}

impl ProbeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_probes(&self) -> usize {
        self.probes.len()
    }

    pub fn probe(&self, index: usize) -> &Probe {
        &self.probes[index]
    }

    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    /// Adds a probe. Takes effect in lookups after [`ProbeBatch::commit`].
    pub fn add_probe(&mut self, influence: Sphere) {
        self.probes.push(Probe { influence });

        for data in self.data.values_mut() {
            data.add_probe();
        }
    }

    /// Adds all probes of a probe array.
    pub fn add_probe_array(&mut self, probe_array: &ProbeArray) {
        for probe in &probe_array.probes {
            self.add_probe(probe.influence);
        }
    }

    pub fn remove_probe(&mut self, index: usize) {
        self.probes.remove(index);

        for data in self.data.values_mut() {
            data.remove_probe(index);
        }
    }

    pub fn update_probe_position(&mut self, index: usize, position: Vector3) {
        self.probes[index].influence.center = position;

        for data in self.data.values_mut() {
            data.update_probe_position(index);
        }
    }

    pub fn update_probe_radius(&mut self, index: usize, radius: f32) {
        self.probes[index].influence.radius = radius;
    }

    /// Rebuilds the probe tree over the current probes.
    pub fn commit(&mut self) {
        self.tree = Some(ProbeTree::new(&self.probes));
    }

    pub fn is_committed(&self) -> bool {
        self.tree.is_some()
    }

    pub fn has_data(&self, identifier: &BakedDataIdentifier) -> bool {
        self.data.contains_key(identifier)
    }

    pub fn data(&self, identifier: &BakedDataIdentifier) -> Option<&BakedData> {
        self.data.get(identifier)
    }

    pub fn add_data(&mut self, identifier: BakedDataIdentifier, data: BakedData) {
        self.data.insert(identifier, data);
    }

    pub fn remove_data(&mut self, identifier: &BakedDataIdentifier) {
        self.data.remove(identifier);
    }

    pub fn data_layers(&self) -> impl Iterator<Item = (&BakedDataIdentifier, &BakedData)> {
        self.data.iter()
    }

    /// Writes the probes influencing `point` into `neighborhood`, starting
    /// at slot `offset`. The batch index recorded in each filled slot is
    /// `batch_index`.
    ///
    /// The batch must be committed.
    pub fn get_influencing_probes(
        &self,
        point: Vector3,
        batch_index: usize,
        neighborhood: &mut ProbeNeighborhood,
        offset: usize,
    ) {
        let tree = self
            .tree
            .as_ref()
            .expect("probe batch must be committed before lookups");

        let slots = &mut neighborhood.probe_indices[offset..offset + MAX_PROBES_PER_BATCH];
        tree.get_influencing_probes(point, &self.probes, slots);

        for i in 0..MAX_PROBES_PER_BATCH {
            neighborhood.batch_indices[offset + i] = Some(batch_index);
        }
    }

    /// Saves this probe batch, including all baked data layers.
    pub fn save(&self, serialized_object: &mut SerializedObject) {
        serialized_object.write_u64(self.probes.len() as u64);
        for probe in &self.probes {
            serialized_object.write_f32(probe.influence.center.x);
            serialized_object.write_f32(probe.influence.center.y);
            serialized_object.write_f32(probe.influence.center.z);
            serialized_object.write_f32(probe.influence.radius);
        }

        serialized_object.write_u64(self.data.len() as u64);
        for (identifier, data) in &self.data {
            serialized_object.write_u8(match identifier.variation {
                crate::baked_data::BakedDataVariation::Reverb => 0,
                crate::baked_data::BakedDataVariation::StaticSource => 1,
                crate::baked_data::BakedDataVariation::StaticListener => 2,
                crate::baked_data::BakedDataVariation::Dynamic => 3,
            });
            serialized_object.write_u8(match identifier.data_type {
                crate::baked_data::BakedDataType::Reflections => 0,
                crate::baked_data::BakedDataType::Pathing => 1,
            });
            serialized_object.write_f32(identifier.endpoint_influence.center.x);
            serialized_object.write_f32(identifier.endpoint_influence.center.y);
            serialized_object.write_f32(identifier.endpoint_influence.center.z);
            serialized_object.write_f32(identifier.endpoint_influence.radius);

            match data {
                BakedData::Reflections(reflections) => reflections.save(serialized_object),
                BakedData::Pathing(pathing) => pathing.save(serialized_object),
            }
        }
    }

    /// Loads a probe batch from a serialized object. Layers with unknown
    /// types are rejected; absent layers are tolerated. The loaded batch is
    /// uncommitted.
    pub fn load(serialized_object: &mut SerializedObject) -> Result<Self, SerializeError> {
        serialized_object.check_header()?;

        let num_probes = serialized_object.read_nonzero_length()?;
        let mut probes = Vec::with_capacity(num_probes);
        for _ in 0..num_probes {
            let x = serialized_object.read_f32()?;
            let y = serialized_object.read_f32()?;
            let z = serialized_object.read_f32()?;
            let radius = serialized_object.read_f32()?;
            probes.push(Probe {
                influence: Sphere::new(Vector3::new(x, y, z), radius),
            });
        }

        let num_layers = serialized_object.read_length()?;
        let mut data = BTreeMap::new();
        for _ in 0..num_layers {
            let variation = match serialized_object.read_u8()? {
                0 => crate::baked_data::BakedDataVariation::Reverb,
                1 => crate::baked_data::BakedDataVariation::StaticSource,
                2 => crate::baked_data::BakedDataVariation::StaticListener,
                3 => crate::baked_data::BakedDataVariation::Dynamic,
                _ => {
                    return Err(SerializeError::InvalidValue { offset: 0 });
                }
            };
            let data_type = match serialized_object.read_u8()? {
                0 => crate::baked_data::BakedDataType::Reflections,
                1 => crate::baked_data::BakedDataType::Pathing,
                _ => {
                    return Err(SerializeError::InvalidValue { offset: 0 });
                }
            };

            let x = serialized_object.read_f32()?;
            let y = serialized_object.read_f32()?;
            let z = serialized_object.read_f32()?;
            let radius = serialized_object.read_f32()?;

            let identifier = BakedDataIdentifier {
                data_type,
                variation,
                endpoint_influence: Sphere::new(Vector3::new(x, y, z), radius),
            };

            let payload = match data_type {
                crate::baked_data::BakedDataType::Reflections => BakedData::Reflections(
                    crate::baking::BakedReflectionsData::load(serialized_object)?,
                ),
                crate::baked_data::BakedDataType::Pathing => {
                    BakedData::Pathing(crate::path::BakedPathData::load(serialized_object)?)
                }
            };

            data.insert(identifier, payload);
        }

        Ok(Self {
            probes,
            data,
            tree: None,
        })
    }
}

/// Aggregates probe batches, routing neighborhood queries across all of
/// them.
#[derive(Debug, Default)]
pub struct ProbeManager {
    batches: Vec<std::sync::Arc<ProbeBatch>>,
}

impl ProbeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_probe_batch(&mut self, batch: std::sync::Arc<ProbeBatch>) {
        self.batches.push(batch);
    }

    pub fn remove_probe_batch(&mut self, batch: &std::sync::Arc<ProbeBatch>) {
        self.batches
            .retain(|existing| !std::sync::Arc::ptr_eq(existing, batch));
    }

    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    pub fn batch(&self, index: usize) -> &ProbeBatch {
        &self.batches[index]
    }

    pub fn batches(&self) -> Vec<&ProbeBatch> {
        self.batches.iter().map(|batch| batch.as_ref()).collect()
    }

    /// Finds the probes influencing `point` across all batches, and computes
    /// their weights.
    pub fn get_influencing_probes(&self, point: Vector3, neighborhood: &mut ProbeNeighborhood) {
        neighborhood.resize(self.batches.len());

        for (batch_index, batch) in self.batches.iter().enumerate() {
            batch.get_influencing_probes(
                point,
                batch_index,
                neighborhood,
                batch_index * MAX_PROBES_PER_BATCH,
            );
        }

        let batches = self.batches();
        neighborhood.calc_weights(&batches, point);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_influencing_probes_weights_sum_to_one() {
        let mut batch = ProbeBatch::new();
        for i in 0..5 {
            batch.add_probe(Sphere::new(Vector3::new(i as f32 * 2.0, 0.0, 0.0), 1e9));
        }
        batch.commit();

        let mut manager = ProbeManager::new();
        manager.add_probe_batch(std::sync::Arc::new(batch));

        let mut neighborhood = ProbeNeighborhood::default();
        manager.get_influencing_probes(Vector3::ZERO, &mut neighborhood);

        let num_valid = neighborhood
            .probe_indices
            .iter()
            .filter(|&&i| i >= 0)
            .count();
        assert_eq!(num_valid, 5);

        let total: f32 = neighborhood.weights.iter().sum();
        approx::assert_relative_eq!(total, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_probe_batch_serialization_round_trip() {
        let mut batch = ProbeBatch::new();
        batch.add_probe(Sphere::new(Vector3::new(1.0, 2.0, 3.0), 4.0));
        batch.add_probe(Sphere::new(Vector3::new(-1.0, 0.0, 0.5), 2.0));

        let mut serialized = SerializedObject::new();
        batch.save(&mut serialized);

        let mut reader = SerializedObject::from_bytes(serialized.data().to_vec());
        let loaded = ProbeBatch::load(&mut reader).unwrap();

        assert_eq!(loaded.num_probes(), 2);
        assert_eq!(loaded.probe(0).influence.radius, 4.0);
        assert!(!loaded.is_committed());
    }

    #[test]
    fn test_nearest_probe() {
        let mut batch = ProbeBatch::new();
        batch.add_probe(Sphere::new(Vector3::new(5.0, 0.0, 0.0), 1e9));
        batch.add_probe(Sphere::new(Vector3::new(1.0, 0.0, 0.0), 1e9));
        batch.commit();

        let mut manager = ProbeManager::new();
        manager.add_probe_batch(std::sync::Arc::new(batch));

        let mut neighborhood = ProbeNeighborhood::default();
        manager.get_influencing_probes(Vector3::ZERO, &mut neighborhood);

        let batches = manager.batches();
        let nearest_slot = neighborhood.find_nearest(&batches, Vector3::ZERO).unwrap();
        assert_eq!(neighborhood.probe_indices[nearest_slot], 1);
    }
}
