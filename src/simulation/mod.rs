//! The simulation façade: sources, shared inputs, and the worker-pool
//! orchestration of direct, reflection, and pathing simulations.
//!
//! # Threading model
//!
//! - The **control thread** configures the scene and probes, adds and
//!   removes sources, sets inputs, and issues commits.
//! - The **worker pool** runs [`Simulator::run_reflections`] and
//!   [`Simulator::run_pathing`]; [`Simulator::run_direct`] is cheap enough
//!   to run anywhere.
//! - The **audio thread** reads each source's most recently published
//!   [`SimulationOutputs`] via [`Source::get_outputs`], which never blocks:
//!   outputs are published by atomically swapping an [`arc_swap::ArcSwap`]
//!   slot, so the audio thread either sees the old outputs or the new ones,
//!   never a partial update.

mod job_graph;
pub use job_graph::{JobGraph, ThreadPool};

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use slotmap::SlotMap;

use crate::NUM_BANDS;
use crate::audio_settings::AudioSettings;
use crate::context::Context;
use crate::effect::{
    DirectEffectParams, Equalizer, FftIr, ReflectionEffectParams, ReflectionEffectType,
    Transmission,
};
use crate::energy_field::{EnergyField, EnergyFieldSettings};
use crate::error::EchofieldError;
use crate::geometry::{CoordinateSpace3, Ray, Vector3};
use crate::hybrid_reverb_estimator::HybridReverbEstimator;
use crate::impulse_response::{ImpulseResponse, ImpulseResponseSettings};
use crate::model::{AirAbsorptionModel, DeviationModel, Directivity, DistanceAttenuationModel};
use crate::path::{PathSimulator, PathSimulatorOutputs};
use crate::probe::{ProbeBatch, ProbeManager, ProbeNeighborhood};
use crate::reconstructor::{
    Reconstructor, ReconstructorInputs, ReconstructorOutputs, ReconstructorSettings,
    ReconstructorSharedInputs,
};
use crate::reflection_simulator::{
    ReflectionSimulationInputs, ReflectionSimulator, ReflectionSimulatorSettings,
};
use crate::reverb_estimator;
use crate::path::PathSimulationParams;
use crate::sampling;
use crate::scene::Scene;

bitflags::bitflags! {
    /// The simulation stages to run or read.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct SimulationFlags: u32 {
        /// Direct path: distance attenuation, air absorption, directivity,
        /// occlusion, transmission.
        const DIRECT = 1 << 0;

        /// Ray-traced reflections and reverb.
        const REFLECTIONS = 1 << 1;

        /// Baked propagation paths.
        const PATHING = 1 << 2;
    }
}

bitflags::bitflags! {
    /// The components of the direct simulation to compute.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct DirectSimulationFlags: u32 {
        const DISTANCE_ATTENUATION = 1 << 0;
        const AIR_ABSORPTION = 1 << 1;
        const DIRECTIVITY = 1 << 2;
        const OCCLUSION = 1 << 3;
        const TRANSMISSION = 1 << 4;
    }
}

/// How occlusion is computed for the direct path.
#[derive(Debug, Copy, Clone)]
pub enum Occlusion {
    /// A single ray from listener to source: occlusion is all-or-nothing.
    Raycast,

    /// The source is a sphere: occlusion is the fraction of sampled points
    /// in the sphere that are visible from the listener.
    Volumetric {
        /// The source's radius.
        radius: f32,

        /// Number of sampled points.
        num_samples: usize,
    },
}

/// Per-source parameters for the direct simulation.
#[derive(Debug, Clone)]
pub struct DirectSimulationParameters {
    pub flags: DirectSimulationFlags,
    pub distance_attenuation_model: DistanceAttenuationModel,
    pub air_absorption_model: AirAbsorptionModel,
    pub directivity: Directivity,
    pub occlusion: Occlusion,
}

impl Default for DirectSimulationParameters {
    fn default() -> Self {
        Self {
            flags: DirectSimulationFlags::all(),
            distance_attenuation_model: DistanceAttenuationModel::default(),
            air_absorption_model: AirAbsorptionModel::default(),
            directivity: Directivity::default(),
            occlusion: Occlusion::Raycast,
        }
    }
}

/// Per-source parameters for the reflection simulation.
#[derive(Debug, Clone)]
pub struct ReflectionsSimulationParameters {
    /// How the reflections will be rendered; controls which outputs are
    /// produced.
    pub effect_type: ReflectionEffectType,

    /// Per-band reverb-time scaling applied to the simulated energy field.
    pub reverb_scale: [f32; NUM_BANDS],

    /// For hybrid rendering, the time at which rendering transitions from
    /// convolution to parametric reverb.
    pub transition_time: f32,

    /// For hybrid rendering, the fraction of the transition time over which
    /// the two stages crossfade.
    pub overlap_fraction: f32,
}

impl Default for ReflectionsSimulationParameters {
    fn default() -> Self {
        Self {
            effect_type: ReflectionEffectType::Convolution,
            reverb_scale: [1.0; NUM_BANDS],
            transition_time: 1.0,
            overlap_fraction: 0.25,
        }
    }
}

/// Per-source parameters for the pathing simulation.
#[derive(Debug, Clone, Default)]
pub struct PathingSimulationParameters {
    pub params: PathSimulationParams,
    pub distance_attenuation_model: DistanceAttenuationModel,
    pub deviation_model: DeviationModel,
}

/// Per-source simulation inputs.
#[derive(Debug, Clone, Default)]
pub struct SimulationInputs {
    /// The source's position and orientation.
    pub source: CoordinateSpace3,

    pub direct: Option<DirectSimulationParameters>,
    pub reflections: Option<ReflectionsSimulationParameters>,
    pub pathing: Option<PathingSimulationParameters>,
}

impl SimulationInputs {
    pub fn new(source: CoordinateSpace3) -> Self {
        Self {
            source,
            ..Default::default()
        }
    }

    pub fn with_direct(mut self, params: DirectSimulationParameters) -> Self {
        self.direct = Some(params);
        self
    }

    pub fn with_reflections(mut self, params: ReflectionsSimulationParameters) -> Self {
        self.reflections = Some(params);
        self
    }

    pub fn with_pathing(mut self, params: PathingSimulationParameters) -> Self {
        self.pathing = Some(params);
        self
    }
}

/// Inputs shared by all sources in a simulation pass.
#[derive(Debug, Clone)]
pub struct SimulationSharedInputs {
    /// The listener's position and orientation.
    pub listener: CoordinateSpace3,

    /// Number of rays traced per source for reflections.
    pub num_rays: usize,

    /// Number of bounces per reflection ray.
    pub num_bounces: usize,

    /// Duration (in seconds) of simulated energy fields and IRs.
    pub duration: f32,

    /// Ambisonic order of simulated sound fields.
    pub order: usize,

    /// Distances below this are clamped when converting energy to loudness.
    pub irradiance_min_distance: f32,
}

impl Default for SimulationSharedInputs {
    fn default() -> Self {
        Self {
            listener: CoordinateSpace3::default(),
            num_rays: 4096,
            num_bounces: 16,
            duration: 1.0,
            order: 1,
            irradiance_min_distance: 1.0,
        }
    }
}

/// Per-source pathing outputs, ready for the
/// [`PathEffect`](crate::effect::PathEffect).
pub type PathingOutputs = PathSimulatorOutputs;

/// The outputs of the most recent simulation passes for one source.
#[derive(Debug, Clone, Default)]
pub struct SimulationOutputs {
    /// Parameters for the [`DirectEffect`](crate::effect::DirectEffect).
    pub direct: DirectEffectParams,

    /// Parameters for the
    /// [`ReflectionEffect`](crate::effect::ReflectionEffect).
    pub reflections: ReflectionEffectParams,

    /// Outputs of the pathing simulation.
    pub pathing: PathingOutputs,
}

slotmap::new_key_type! {
    /// Handle to a source added to a simulator.
    pub struct SourceHandle;
}

/// A sound source being simulated.
///
/// Inputs are written by the control thread under a mutex; outputs are
/// published to the audio thread through an atomic slot swap.
#[derive(Debug)]
pub struct Source {
    inputs: Mutex<SimulationInputs>,
    outputs: ArcSwap<SimulationOutputs>,
}

impl Source {
    fn new() -> Self {
        Self {
            inputs: Mutex::new(SimulationInputs::default()),
            outputs: ArcSwap::from_pointee(SimulationOutputs::default()),
        }
    }

    /// Specifies simulation inputs for this source. The flags select which
    /// stages the new inputs affect; stages not selected keep their previous
    /// parameters.
    pub fn set_inputs(&self, flags: SimulationFlags, inputs: SimulationInputs) {
        let mut current = self.inputs.lock().unwrap();

        current.source = inputs.source;
        if flags.contains(SimulationFlags::DIRECT) {
            current.direct = inputs.direct;
        }
        if flags.contains(SimulationFlags::REFLECTIONS) {
            current.reflections = inputs.reflections;
        }
        if flags.contains(SimulationFlags::PATHING) {
            current.pathing = inputs.pathing;
        }
    }

    /// Retrieves the most recently published simulation results. Never
    /// blocks; safe to call from the audio thread.
    pub fn get_outputs(&self, _flags: SimulationFlags) -> Arc<SimulationOutputs> {
        self.outputs.load_full()
    }

    fn publish(&self, outputs: SimulationOutputs) {
        self.outputs.store(Arc::new(outputs));
    }

    fn snapshot_inputs(&self) -> SimulationInputs {
        self.inputs.lock().unwrap().clone()
    }

    fn current_outputs(&self) -> SimulationOutputs {
        SimulationOutputs::clone(&self.outputs.load_full())
    }
}

/// Settings used to create a [`Simulator`].
#[derive(Debug, Clone)]
pub struct SimulationSettings {
    /// The simulation stages this simulator supports.
    pub flags: SimulationFlags,

    /// The largest number of rays any reflection pass will trace.
    pub max_num_rays: usize,

    /// The largest duration any simulated energy field will cover.
    pub max_duration: f32,

    /// The largest Ambisonic order of any simulated sound field.
    pub max_order: usize,

    /// Audio processing parameters, used when reconstructing IRs.
    pub audio_settings: AudioSettings,

    /// Number of worker threads for simulation jobs.
    pub num_threads: usize,

    /// Rays per batch in the reflection simulator.
    pub ray_batch_size: usize,

    /// Visibility samples per probe pair in the pathing simulator.
    pub num_vis_samples: usize,

    /// Seed for all stochastic simulation.
    pub seed: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            flags: SimulationFlags::all(),
            max_num_rays: 16_384,
            max_duration: 2.0,
            max_order: 2,
            audio_settings: AudioSettings::default(),
            num_threads: 2,
            ray_batch_size: 512,
            num_vis_samples: 4,
            seed: 0,
        }
    }
}

/// Manages direct, reflection, and pathing simulations for a set of sources
/// against a scene and a set of probe batches.
pub struct Simulator {
    settings: SimulationSettings,

    scene: Mutex<Option<Arc<Scene>>>,
    committed_scene: ArcSwap<Option<Arc<Scene>>>,

    probe_manager: Mutex<ProbeManager>,

    // Source addition/removal is serialized by this mutex; per-source
    // lookups go through the separate slot map read path so audio-thread
    // reads do not contend with adds.
    sources: Mutex<SlotMap<SourceHandle, Arc<Source>>>,

    shared_inputs: Mutex<SimulationSharedInputs>,

    reflection_simulator: ReflectionSimulator,
    reconstructor: Reconstructor,
    hybrid_estimator: Mutex<HybridReverbEstimator>,

    thread_pool: ThreadPool,
}

impl Simulator {
    pub fn try_new(_context: &Context, settings: &SimulationSettings) -> Result<Self, EchofieldError> {
        let reflection_simulator = ReflectionSimulator::try_new(&ReflectionSimulatorSettings {
            max_num_rays: settings.max_num_rays,
            max_duration: settings.max_duration,
            max_order: settings.max_order,
            ray_batch_size: settings.ray_batch_size,
            irradiance_min_distance: 1.0,
            seed: settings.seed,
        })?;

        let reconstructor = Reconstructor::try_new(&ReconstructorSettings {
            max_duration: settings.max_duration,
            max_order: settings.max_order,
            sampling_rate: settings.audio_settings.sampling_rate,
        })?;

        Ok(Self {
            settings: settings.clone(),
            scene: Mutex::new(None),
            committed_scene: ArcSwap::from_pointee(None),
            probe_manager: Mutex::new(ProbeManager::new()),
            sources: Mutex::new(SlotMap::with_key()),
            shared_inputs: Mutex::new(SimulationSharedInputs::default()),
            reflection_simulator,
            reconstructor,
            hybrid_estimator: Mutex::new(HybridReverbEstimator::new(
                settings.max_duration,
                &settings.audio_settings,
            )),
            thread_pool: ThreadPool::new(settings.num_threads),
        })
    }

    /// Specifies the scene within which all subsequent simulation runs. Takes
    /// effect at the next [`Simulator::commit`].
    pub fn set_scene(&self, scene: Arc<Scene>) {
        *self.scene.lock().unwrap() = Some(scene);
    }

    /// Adds a probe batch for baked-data lookups. Takes effect at the next
    /// [`Simulator::commit`].
    pub fn add_probe_batch(&self, batch: Arc<ProbeBatch>) {
        self.probe_manager.lock().unwrap().add_probe_batch(batch);
    }

    /// Removes a probe batch. Takes effect at the next
    /// [`Simulator::commit`].
    pub fn remove_probe_batch(&self, batch: &Arc<ProbeBatch>) {
        self.probe_manager.lock().unwrap().remove_probe_batch(batch);
    }

    /// Commits all changes to the scene and probe batches made since the
    /// previous commit.
    pub fn commit(&self) {
        let scene = self.scene.lock().unwrap().clone();
        self.committed_scene.store(Arc::new(scene));
    }

    /// Adds a source to the simulator. Returns a handle for later calls.
    pub fn add_source(&self) -> SourceHandle {
        self.sources.lock().unwrap().insert(Arc::new(Source::new()))
    }

    /// Removes a source. The handle and any retained [`Source`] references
    /// become inert.
    pub fn remove_source(&self, handle: SourceHandle) {
        self.sources.lock().unwrap().remove(handle);
    }

    /// Retrieves a source by handle.
    pub fn source(&self, handle: SourceHandle) -> Option<Arc<Source>> {
        self.sources.lock().unwrap().get(handle).cloned()
    }

    /// Specifies the listener and global parameters for subsequent runs.
    pub fn set_shared_inputs(&self, _flags: SimulationFlags, inputs: &SimulationSharedInputs) {
        *self.shared_inputs.lock().unwrap() = inputs.clone();
    }

    /// Raises the cancellation flag for in-flight simulation jobs. Running
    /// jobs drain cooperatively; their outputs are discarded, so the
    /// previously published outputs remain active.
    pub fn cancel(&self) {
        self.thread_pool.cancel();
    }

    fn snapshot_sources(&self) -> Vec<Arc<Source>> {
        self.sources.lock().unwrap().values().cloned().collect()
    }

    fn committed_scene(&self) -> Option<Arc<Scene>> {
        self.committed_scene.load().as_ref().clone()
    }

    /// Runs the direct simulation for all sources, synchronously.
    ///
    /// This models the direct path from each source to the listener, and is
    /// typically run every game frame.
    pub fn run_direct(&self) {
        let Some(scene) = self.committed_scene() else {
            return;
        };
        let shared = self.shared_inputs.lock().unwrap().clone();

        for source in self.snapshot_sources() {
            let inputs = source.snapshot_inputs();
            let Some(direct_params) = &inputs.direct else {
                continue;
            };

            let mut outputs = source.current_outputs();
            outputs.direct = simulate_direct(
                &scene,
                &inputs.source,
                &shared.listener,
                direct_params,
                self.settings.seed,
            );
            source.publish(outputs);
        }
    }

    /// Runs the reflection simulation for all sources on the worker pool,
    /// blocking until complete (or cancelled).
    pub fn run_reflections(&self) {
        let Some(scene) = self.committed_scene() else {
            return;
        };
        let shared = self.shared_inputs.lock().unwrap().clone();

        let mut graph = JobGraph::new();

        for source in self.snapshot_sources() {
            let inputs = source.snapshot_inputs();
            let Some(reflections_params) = inputs.reflections.clone() else {
                continue;
            };

            let scene = scene.clone();
            let shared = shared.clone();
            let source_space = inputs.source;
            let simulator = &self.reflection_simulator;
            let reconstructor = &self.reconstructor;
            let hybrid_estimator = &self.hybrid_estimator;
            let frame_size = self.settings.audio_settings.frame_size;
            let sampling_rate = self.settings.audio_settings.sampling_rate;

            graph.add_job(move |_, cancel| {
                let result = simulate_reflections(
                    &scene,
                    &source_space,
                    &shared,
                    &reflections_params,
                    simulator,
                    reconstructor,
                    hybrid_estimator,
                    frame_size,
                    sampling_rate,
                    cancel,
                );

                // On cancellation, leave the previous outputs in place.
                if let Some(reflections) = result {
                    let mut outputs = source.current_outputs();
                    outputs.reflections = reflections;
                    source.publish(outputs);
                }
            });
        }

        self.thread_pool.process(graph);
    }

    /// Runs the pathing simulation for all sources on the worker pool,
    /// blocking until complete.
    pub fn run_pathing(&self) {
        let Some(scene) = self.committed_scene() else {
            return;
        };
        let shared = self.shared_inputs.lock().unwrap().clone();
        let probe_manager = self.probe_manager.lock().unwrap();

        let num_batches = probe_manager.num_batches();
        if num_batches == 0 {
            return;
        }

        for source in self.snapshot_sources() {
            let inputs = source.snapshot_inputs();
            let Some(pathing_params) = &inputs.pathing else {
                continue;
            };

            let mut source_probes = ProbeNeighborhood::default();
            let mut listener_probes = ProbeNeighborhood::default();
            probe_manager.get_influencing_probes(inputs.source.origin, &mut source_probes);
            probe_manager.get_influencing_probes(shared.listener.origin, &mut listener_probes);

            let mut outputs_found = false;
            let mut pathing_outputs = PathSimulatorOutputs::default();

            for batch_index in 0..num_batches {
                let batch = probe_manager.batch(batch_index);
                if !batch.has_data(&crate::baked_data::BakedDataIdentifier::pathing()) {
                    continue;
                }

                let mut path_simulator = PathSimulator::new(
                    batch.num_probes(),
                    self.settings.num_vis_samples,
                    false,
                    -Vector3::UNIT_Y,
                );

                if path_simulator.find_paths(
                    inputs.source.origin,
                    shared.listener.origin,
                    &scene,
                    batch,
                    batch_index,
                    &source_probes,
                    &listener_probes,
                    &pathing_params.params,
                    &pathing_params.distance_attenuation_model,
                    &pathing_params.deviation_model,
                    &mut pathing_outputs,
                ) {
                    outputs_found = true;
                    break;
                }
            }

            if outputs_found {
                let mut outputs = source.current_outputs();
                outputs.pathing = pathing_outputs;
                source.publish(outputs);
            }
        }
    }
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("settings", &self.settings)
            .finish()
    }
}

/// Computes the direct-path parameters for one source.
fn simulate_direct(
    scene: &Scene,
    source: &CoordinateSpace3,
    listener: &CoordinateSpace3,
    params: &DirectSimulationParameters,
    seed: u64,
) -> DirectEffectParams {
    let distance = (source.origin - listener.origin).length();

    let mut outputs = DirectEffectParams::default();

    if params.flags.contains(DirectSimulationFlags::DISTANCE_ATTENUATION) {
        outputs.distance_attenuation = Some(params.distance_attenuation_model.evaluate(distance));
    }

    if params.flags.contains(DirectSimulationFlags::AIR_ABSORPTION) {
        outputs.air_absorption = Some(Equalizer(
            params.air_absorption_model.evaluate_bands(distance),
        ));
    }

    if params.flags.contains(DirectSimulationFlags::DIRECTIVITY) {
        outputs.directivity = Some(params.directivity.evaluate(source, listener.origin));
    }

    if params.flags.contains(DirectSimulationFlags::OCCLUSION) {
        let occlusion = match params.occlusion {
            Occlusion::Raycast => {
                if scene.is_occluded(listener.origin, source.origin) {
                    0.0
                } else {
                    1.0
                }
            }
            Occlusion::Volumetric {
                radius,
                num_samples,
            } => {
                let mut rng = sampling::seeded_rng(seed ^ 0x0CC1);
                let num_samples = num_samples.max(1);

                let mut num_visible = 0;
                for _ in 0..num_samples {
                    let point = sampling::uniform_sphere_volume(source.origin, radius, &mut rng);
                    if !scene.is_occluded(listener.origin, point) {
                        num_visible += 1;
                    }
                }

                num_visible as f32 / num_samples as f32
            }
        };

        outputs.occlusion = Some(occlusion);

        if params.flags.contains(DirectSimulationFlags::TRANSMISSION) {
            outputs.transmission = Some(Transmission::FrequencyDependent(Equalizer(
                accumulate_transmission(scene, listener.origin, source.origin),
            )));
        }
    }

    outputs
}

/// Walks the segment from listener to source, multiplying the transmission
/// coefficients of every surface crossed.
fn accumulate_transmission(scene: &Scene, listener: Vector3, source: Vector3) -> [f32; NUM_BANDS] {
    const MAX_TRANSMISSION_SURFACES: usize = 8;

    let mut transmission = [1.0f32; NUM_BANDS];

    let direction = (source - listener).normalized();
    if direction == Vector3::ZERO {
        return transmission;
    }

    let total_distance = (source - listener).length();
    let ray = Ray::new(listener, direction);
    let mut min_distance = 1e-4;

    for _ in 0..MAX_TRANSMISSION_SURFACES {
        let hit = scene.closest_hit(&ray, min_distance, total_distance);
        if !hit.is_valid() {
            break;
        }

        if let Some(material) = hit.material {
            for (value, &coefficient) in transmission.iter_mut().zip(material.transmission.iter())
            {
                *value *= coefficient.clamp(0.0, 1.0);
            }
        }

        min_distance = hit.distance + 1e-4;
    }

    transmission
}

/// Runs one source's reflection pass: trace, scale, estimate, reconstruct.
/// Returns `None` when cancelled.
#[allow(clippy::too_many_arguments)]
fn simulate_reflections(
    scene: &Scene,
    source: &CoordinateSpace3,
    shared: &SimulationSharedInputs,
    params: &ReflectionsSimulationParameters,
    simulator: &ReflectionSimulator,
    reconstructor: &Reconstructor,
    hybrid_estimator: &Mutex<HybridReverbEstimator>,
    frame_size: usize,
    sampling_rate: u32,
    cancel: &std::sync::atomic::AtomicBool,
) -> Option<ReflectionEffectParams> {
    let directivity = Directivity::WeightedDipole {
        weight: 0.0,
        power: 1.0,
    };

    let inputs = [ReflectionSimulationInputs {
        source: *source,
        directivity: &directivity,
        num_rays: shared.num_rays,
        num_bounces: shared.num_bounces,
        duration: shared.duration,
        order: shared.order,
    }];

    let mut fields = vec![EnergyField::new(&EnergyFieldSettings {
        duration: shared.duration,
        order: shared.order,
    })];

    if simulator
        .simulate(scene, &inputs, &shared.listener, &mut fields, 1, cancel)
        .is_err()
    {
        return None;
    }

    let mut field = fields.into_iter().next().unwrap();

    if params.reverb_scale != [1.0; NUM_BANDS] {
        reverb_estimator::apply_reverb_scale(&params.reverb_scale, &mut field);
    }

    let reverb = reverb_estimator::estimate(&field, &AirAbsorptionModel::default());

    let mut outputs = ReflectionEffectParams {
        reverb,
        num_channels: crate::sh::num_coeffs_for_order(shared.order),
        num_samples: (shared.duration * sampling_rate as f32).ceil() as usize,
        ..Default::default()
    };

    match params.effect_type {
        ReflectionEffectType::Parametric => {}
        ReflectionEffectType::Convolution => {
            let mut ir = ImpulseResponse::new(&ImpulseResponseSettings {
                duration: shared.duration,
                order: shared.order,
                sampling_rate,
            });

            if reconstructor
                .reconstruct(
                    &[ReconstructorInputs {
                        energy_field: &field,
                        correction_curve: None,
                    }],
                    &ReconstructorSharedInputs {
                        duration: shared.duration,
                        order: shared.order,
                    },
                    &mut [ReconstructorOutputs {
                        impulse_response: &mut ir,
                    }],
                )
                .is_err()
            {
                return None;
            }

            if cancel.load(Ordering::Relaxed) {
                return None;
            }

            outputs.fft_ir = Some(Arc::new(FftIr::new(&ir, frame_size)));
        }
        ReflectionEffectType::Hybrid => {
            let mut ir = ImpulseResponse::new(&ImpulseResponseSettings {
                duration: shared.duration,
                order: shared.order,
                sampling_rate,
            });

            if reconstructor
                .reconstruct(
                    &[ReconstructorInputs {
                        energy_field: &field,
                        correction_curve: None,
                    }],
                    &ReconstructorSharedInputs {
                        duration: shared.duration,
                        order: shared.order,
                    },
                    &mut [ReconstructorOutputs {
                        impulse_response: &mut ir,
                    }],
                )
                .is_err()
            {
                return None;
            }

            let mut eq_coeffs = [1.0f32; NUM_BANDS];
            hybrid_estimator.lock().unwrap().estimate(
                &field,
                &reverb,
                &mut ir,
                params.transition_time.min(shared.duration),
                params.overlap_fraction,
                shared.order,
                &mut eq_coeffs,
            );

            if cancel.load(Ordering::Relaxed) {
                return None;
            }

            outputs.eq_coeffs = eq_coeffs;
            outputs.delay = (((1.0 - params.overlap_fraction)
                * params.transition_time.min(shared.duration))
                * sampling_rate as f32) as usize;
            outputs.fft_ir = Some(Arc::new(FftIr::new(&ir, frame_size)));
        }
    }

    Some(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Material, Triangle};
    use crate::scene::{StaticMesh, StaticMeshSettings};

    fn committed_scene() -> Arc<Scene> {
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
        Arc::new(scene)
    }

    fn simulator() -> Simulator {
        Simulator::try_new(
            &Context::default(),
            &SimulationSettings {
                max_num_rays: 1024,
                max_duration: 1.0,
                max_order: 1,
                num_threads: 1,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_direct_simulation_publishes_outputs() {
        let simulator = simulator();
        simulator.set_scene(committed_scene());
        simulator.commit();

        let handle = simulator.add_source();
        let source = simulator.source(handle).unwrap();

        source.set_inputs(
            SimulationFlags::DIRECT,
            SimulationInputs::new(CoordinateSpace3 {
                origin: Vector3::new(0.0, 2.0, -5.0),
                ..Default::default()
            })
            .with_direct(DirectSimulationParameters {
                flags: DirectSimulationFlags::DISTANCE_ATTENUATION
                    | DirectSimulationFlags::OCCLUSION,
                ..Default::default()
            }),
        );

        simulator.set_shared_inputs(
            SimulationFlags::DIRECT,
            &SimulationSharedInputs {
                listener: CoordinateSpace3 {
                    origin: Vector3::new(0.0, 2.0, 0.0),
                    ..Default::default()
                },
                ..Default::default()
            },
        );

        simulator.run_direct();

        let outputs = source.get_outputs(SimulationFlags::DIRECT);
        approx::assert_relative_eq!(outputs.direct.distance_attenuation.unwrap(), 0.2);
        assert_eq!(outputs.direct.occlusion, Some(1.0));
        assert_eq!(outputs.direct.directivity, None);
    }

    #[test]
    fn test_reflections_simulation_produces_ir() {
        let simulator = simulator();
        simulator.set_scene(committed_scene());
        simulator.commit();

        let handle = simulator.add_source();
        let source = simulator.source(handle).unwrap();

        source.set_inputs(
            SimulationFlags::REFLECTIONS,
            SimulationInputs::new(CoordinateSpace3 {
                origin: Vector3::new(0.0, 2.0, 0.0),
                ..Default::default()
            })
            .with_reflections(ReflectionsSimulationParameters::default()),
        );

        simulator.set_shared_inputs(
            SimulationFlags::REFLECTIONS,
            &SimulationSharedInputs {
                listener: CoordinateSpace3 {
                    origin: Vector3::new(2.0, 2.0, 0.0),
                    ..Default::default()
                },
                num_rays: 512,
                num_bounces: 4,
                duration: 0.5,
                order: 1,
                ..Default::default()
            },
        );

        simulator.run_reflections();

        let outputs = source.get_outputs(SimulationFlags::REFLECTIONS);
        assert!(outputs.reflections.fft_ir.is_some());
        assert!(outputs.reflections.reverb.reverb_times[1] >= 0.1);
    }

    #[test]
    fn test_removed_source_is_not_simulated() {
        let simulator = simulator();
        simulator.set_scene(committed_scene());
        simulator.commit();

        let handle = simulator.add_source();
        simulator.remove_source(handle);
        assert!(simulator.source(handle).is_none());

        simulator.run_direct();
    }

    #[test]
    fn test_outputs_swap_atomically() {
        let simulator = simulator();
        simulator.set_scene(committed_scene());
        simulator.commit();

        let handle = simulator.add_source();
        let source = simulator.source(handle).unwrap();

        let before = source.get_outputs(SimulationFlags::DIRECT);

        source.set_inputs(
            SimulationFlags::DIRECT,
            SimulationInputs::new(CoordinateSpace3::default())
                .with_direct(DirectSimulationParameters::default()),
        );
        simulator.run_direct();

        let after = source.get_outputs(SimulationFlags::DIRECT);

        // The old snapshot is untouched; the new one is a different object.
        assert!(before.direct.distance_attenuation.is_none());
        assert!(after.direct.distance_attenuation.is_some());
    }
}
