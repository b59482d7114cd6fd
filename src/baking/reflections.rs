//! Baked reflections: per-probe energy fields and reverb estimates.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::NUM_BANDS;
use crate::baked_data::{BakedData, BakedDataIdentifier, BakedDataType, BakedDataVariation};
use crate::callback::ProgressCallback;
use crate::energy_field::{EnergyField, EnergyFieldSettings};
use crate::error::EchofieldError;
use crate::geometry::CoordinateSpace3;
use crate::model::Directivity;
use crate::probe::ProbeBatch;
use crate::reflection_simulator::{ReflectionSimulationInputs, ReflectionSimulator};
use crate::reverb_estimator::{self, Reverb};
use crate::scene::Scene;
use crate::serialized_object::{SerializeError, SerializedObject};
use rayon::prelude::*;

/// Per-probe baked reflections: an energy field (for convolution or hybrid
/// rendering) and/or a reverb estimate (for parametric rendering) at each
/// probe.
#[derive(Debug, Default)]
pub struct BakedReflectionsData {
    fields: Vec<Option<EnergyField>>,
    reverbs: Vec<Option<Reverb>>,
    needs_update: bool,
}

impl BakedReflectionsData {
    pub fn new(num_probes: usize) -> Self {
        Self {
            fields: (0..num_probes).map(|_| None).collect(),
            reverbs: vec![None; num_probes],
            needs_update: false,
        }
    }

    pub fn num_probes(&self) -> usize {
        self.reverbs.len()
    }

    pub fn energy_field(&self, probe_index: usize) -> Option<&EnergyField> {
        self.fields.get(probe_index).and_then(|field| field.as_ref())
    }

    pub fn reverb(&self, probe_index: usize) -> Option<Reverb> {
        self.reverbs.get(probe_index).and_then(|reverb| *reverb)
    }

    pub fn set_energy_field(&mut self, probe_index: usize, field: EnergyField) {
        self.fields[probe_index] = Some(field);
    }

    pub fn set_reverb(&mut self, probe_index: usize, reverb: Reverb) {
        self.reverbs[probe_index] = Some(reverb);
    }

    /// True if a probe has moved since baking; stale layers must be re-baked
    /// before lookups are meaningful.
    pub fn needs_update(&self) -> bool {
        self.needs_update
    }

    pub(crate) fn update_probe_position(&mut self, _index: usize) {
        self.needs_update = true;
    }

    pub(crate) fn add_probe(&mut self) {
        self.fields.push(None);
        self.reverbs.push(None);
        self.needs_update = true;
    }

    pub(crate) fn remove_probe(&mut self, index: usize) {
        self.fields.remove(index);
        self.reverbs.remove(index);
        self.needs_update = true;
    }

    pub fn save(&self, serialized_object: &mut SerializedObject) {
        serialized_object.write_u64(self.reverbs.len() as u64);

        for (field, reverb) in self.fields.iter().zip(self.reverbs.iter()) {
            match reverb {
                Some(reverb) => {
                    serialized_object.write_bool(true);
                    for &rt in &reverb.reverb_times {
                        serialized_object.write_f32(rt);
                    }
                }
                None => serialized_object.write_bool(false),
            }

            match field {
                Some(field) => {
                    serialized_object.write_bool(true);
                    serialized_object.write_u64(field.num_channels() as u64);
                    serialized_object.write_u64(field.num_bins() as u64);
                    for &value in field.data() {
                        serialized_object.write_f32(value);
                    }
                }
                None => serialized_object.write_bool(false),
            }
        }
    }

    pub fn load(serialized_object: &mut SerializedObject) -> Result<Self, SerializeError> {
        let num_probes = serialized_object.read_nonzero_length()?;

        let mut data = Self::new(num_probes);

        for probe_index in 0..num_probes {
            if serialized_object.read_bool()? {
                let mut reverb = Reverb::default();
                for rt in &mut reverb.reverb_times {
                    *rt = serialized_object.read_f32()?;
                }
                data.reverbs[probe_index] = Some(reverb);
            }

            if serialized_object.read_bool()? {
                let num_channels = serialized_object.read_nonzero_length()?;
                let num_bins = serialized_object.read_nonzero_length()?;

                let order = (num_channels as f32).sqrt() as usize - 1;
                let mut field = EnergyField::new(&EnergyFieldSettings {
                    duration: num_bins as f32 * crate::energy_field::BIN_DURATION,
                    order,
                });

                for channel in 0..num_channels {
                    for band in 0..NUM_BANDS {
                        for bin in 0..num_bins {
                            field.band_mut(channel, band)[bin] = serialized_object.read_f32()?;
                        }
                    }
                }

                data.fields[probe_index] = Some(field);
            }
        }

        Ok(data)
    }
}

/// Parameters controlling a reflections bake.
#[derive(Debug, Copy, Clone)]
pub struct ReflectionsBakeParams {
    /// The layer to bake. The variation selects what the probes represent;
    /// [`BakedDataVariation::Reverb`] bakes listener-centric reverb at each
    /// probe.
    pub identifier: BakedDataIdentifier,

    /// Number of rays traced per probe.
    pub num_rays: usize,

    /// Number of bounces per ray.
    pub num_bounces: usize,

    /// Duration (in seconds) of the baked energy fields.
    pub duration: f32,

    /// Ambisonic order of the baked energy fields.
    pub order: usize,

    /// Store energy fields, for convolution or hybrid rendering at runtime.
    pub bake_convolution: bool,

    /// Store reverb estimates, for parametric rendering at runtime.
    pub bake_parametric: bool,

    /// Number of worker threads.
    pub num_threads: usize,
}

/// Bakes reflections data into a probe batch.
#[derive(Debug, Default)]
pub struct ReflectionsBaker;

impl ReflectionsBaker {
    /// Runs the bake, replacing any existing layer with the same identifier.
    ///
    /// Returns [`EchofieldError::Cancelled`] and leaves the batch untouched
    /// if `cancel` is raised; the flag is checked once per probe.
    pub fn bake(
        scene: &Scene,
        params: &ReflectionsBakeParams,
        probes: &mut ProbeBatch,
        mut progress_callback: Option<ProgressCallback>,
        cancel: &AtomicBool,
    ) -> Result<(), EchofieldError> {
        assert_eq!(params.identifier.data_type, BakedDataType::Reflections);

        let num_probes = probes.num_probes();
        if num_probes == 0 {
            return Err(EchofieldError::InvalidArgument);
        }

        log::info!(
            "baking reflections: {} probes, {} rays each",
            num_probes,
            params.num_rays
        );

        let simulator = ReflectionSimulator::try_new(&crate::reflection_simulator::ReflectionSimulatorSettings {
            max_num_rays: params.num_rays,
            max_duration: params.duration,
            max_order: params.order,
            ray_batch_size: 512,
            irradiance_min_distance: 1.0,
            seed: 0,
        })?;

        let directivity = Directivity::WeightedDipole {
            weight: 0.0,
            power: 1.0,
        };

        let probes_done = AtomicUsize::new(0);
        let probes_ref: &ProbeBatch = probes;

        // One job per probe; each job runs the reflection simulation
        // single-threaded so the pool's parallelism is across probes.
        let results: Vec<Option<(Option<EnergyField>, Option<Reverb>)>> = (0..num_probes)
            .into_par_iter()
            .with_max_len(1)
            .map(|probe_index| {
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }

                let origin = probes_ref.probe(probe_index).influence.center;
                let endpoint = CoordinateSpace3 {
                    origin,
                    ..Default::default()
                };

                let inputs = [ReflectionSimulationInputs {
                    source: endpoint,
                    directivity: &directivity,
                    num_rays: params.num_rays,
                    num_bounces: params.num_bounces,
                    duration: params.duration,
                    order: params.order,
                }];

                let mut fields = vec![EnergyField::new(&EnergyFieldSettings {
                    duration: params.duration,
                    order: params.order,
                })];

                if simulator
                    .simulate(scene, &inputs, &endpoint, &mut fields, 1, cancel)
                    .is_err()
                {
                    return None;
                }

                let field = fields.into_iter().next().unwrap();

                let reverb = params
                    .bake_parametric
                    .then(|| reverb_estimator::estimate(&field, &Default::default()));
                let field = params.bake_convolution.then_some(field);

                probes_done.fetch_add(1, Ordering::Relaxed);

                Some((field, reverb))
            })
            .collect();

        if cancel.load(Ordering::Relaxed) {
            return Err(EchofieldError::Cancelled);
        }

        log::debug!(
            "reflections bake finished: {} of {} probes",
            probes_done.load(Ordering::Relaxed),
            num_probes
        );

        let mut data = BakedReflectionsData::new(num_probes);
        for (probe_index, result) in results.into_iter().enumerate() {
            let Some((field, reverb)) = result else {
                return Err(EchofieldError::Cancelled);
            };

            if let Some(field) = field {
                data.set_energy_field(probe_index, field);
            }
            if let Some(reverb) = reverb {
                data.set_reverb(probe_index, reverb);
            }
        }

        if probes.has_data(&params.identifier) {
            probes.remove_data(&params.identifier);
        }
        probes.add_data(params.identifier, BakedData::Reflections(data));

        if let Some(callback) = progress_callback.as_mut() {
            callback.report(1.0);
        }

        Ok(())
    }
}

/// Looks up baked reverb for a listener position, interpolating across the
/// influencing probes.
pub fn lookup_baked_reverb(
    batch: &ProbeBatch,
    neighborhood: &crate::probe::ProbeNeighborhood,
    batch_index: usize,
) -> Option<Reverb> {
    let identifier = BakedDataIdentifier {
        data_type: BakedDataType::Reflections,
        variation: BakedDataVariation::Reverb,
        endpoint_influence: Default::default(),
    };

    let BakedData::Reflections(data) = batch.data(&identifier)? else {
        return None;
    };

    let mut reverb_times = [0.0f32; NUM_BANDS];
    let mut total_weight = 0.0;

    for slot in 0..neighborhood.num_slots() {
        if neighborhood.batch_indices[slot] != Some(batch_index) {
            continue;
        }
        let probe_index = neighborhood.probe_indices[slot];
        if probe_index < 0 {
            continue;
        }

        if let Some(reverb) = data.reverb(probe_index as usize) {
            let weight = neighborhood.weights[slot];
            for (acc, rt) in reverb_times.iter_mut().zip(reverb.reverb_times.iter()) {
                *acc += weight * rt;
            }
            total_weight += weight;
        }
    }

    if total_weight <= 0.0 {
        return None;
    }

    for rt in &mut reverb_times {
        *rt = (*rt / total_weight).max(0.1);
    }

    Some(Reverb { reverb_times })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Material, Sphere, Triangle, Vector3};
    use crate::scene::{StaticMesh, StaticMeshSettings};
    use std::sync::Arc;

    fn simple_scene() -> Scene {
        let mesh = StaticMesh::try_new(&StaticMeshSettings {
            vertices: &[
                Vector3::new(-10.0, 0.0, -10.0),
                Vector3::new(10.0, 0.0, -10.0),
                Vector3::new(10.0, 0.0, 10.0),
                Vector3::new(-10.0, 0.0, 10.0),
            ],
            triangles: &[Triangle::new(0, 2, 1), Triangle::new(0, 3, 2)],
            material_indices: &[0, 0],
            materials: &[Material::GENERIC],
        })
        .unwrap();

        let mut scene = Scene::new();
        scene.add_static_mesh(Arc::new(mesh));
        scene.commit();
        scene
    }

    #[test]
    fn test_bake_stores_layer() {
        let scene = simple_scene();

        let mut batch = ProbeBatch::new();
        batch.add_probe(Sphere::new(Vector3::new(0.0, 2.0, 0.0), 5.0));
        batch.add_probe(Sphere::new(Vector3::new(3.0, 2.0, 0.0), 5.0));
        batch.commit();

        let identifier = BakedDataIdentifier::reverb();
        let params = ReflectionsBakeParams {
            identifier,
            num_rays: 256,
            num_bounces: 4,
            duration: 0.5,
            order: 0,
            bake_convolution: true,
            bake_parametric: true,
            num_threads: 1,
        };

        let cancel = AtomicBool::new(false);
        ReflectionsBaker::bake(&scene, &params, &mut batch, None, &cancel).unwrap();

        assert!(batch.has_data(&identifier));
        let BakedData::Reflections(data) = batch.data(&identifier).unwrap() else {
            panic!("expected reflections layer");
        };
        assert_eq!(data.num_probes(), 2);
        assert!(data.reverb(0).is_some());
        assert!(data.energy_field(0).is_some());
    }

    #[test]
    fn test_cancelled_bake_leaves_batch_untouched() {
        let scene = simple_scene();

        let mut batch = ProbeBatch::new();
        batch.add_probe(Sphere::new(Vector3::new(0.0, 2.0, 0.0), 5.0));
        batch.commit();

        let params = ReflectionsBakeParams {
            identifier: BakedDataIdentifier::reverb(),
            num_rays: 128,
            num_bounces: 2,
            duration: 0.5,
            order: 0,
            bake_convolution: false,
            bake_parametric: true,
            num_threads: 1,
        };

        let cancel = AtomicBool::new(true);
        let result = ReflectionsBaker::bake(&scene, &params, &mut batch, None, &cancel);

        assert_eq!(result, Err(EchofieldError::Cancelled));
        assert!(!batch.has_data(&params.identifier));
    }
}
