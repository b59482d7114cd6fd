//! Runtime simulation of sound propagation paths.

use super::baked::{BakedPathData, SoundPath};
use super::finder::PathFinder;
use super::visibility_graph::ProbeVisibilityTester;
use crate::NUM_BANDS;
use crate::baked_data::{BakedData, BakedDataIdentifier};
use crate::effect::EqEffect;
use crate::geometry::Vector3;
use crate::model::{DeviationModel, DistanceAttenuationModel};
use crate::probe::{ProbeBatch, ProbeNeighborhood};
use crate::scene::Scene;
use crate::sh;

const MAX_PATHS: usize = 64;

/// The outputs of a single path-finding pass, ready for the
/// [`PathEffect`](crate::effect::PathEffect).
#[derive(Debug, Clone)]
pub struct PathSimulatorOutputs {
    /// SH coefficients describing the directional distribution of pathed
    /// sound around the listener.
    pub sh_coefficients: Vec<f32>,

    /// Per-band EQ gains from cumulative diffraction, normalized to peak 1.
    pub eq_gains: [f32; NUM_BANDS],

    /// Weighted average direction of arrival.
    pub avg_direction: Vector3,

    /// Average ratio of direct distance to path distance, 1.0 when
    /// unoccluded.
    pub distance_ratio: f32,
}

impl Default for PathSimulatorOutputs {
    fn default() -> Self {
        Self {
            sh_coefficients: vec![0.0],
            eq_gains: [1.0; NUM_BANDS],
            avg_direction: Vector3::ZERO,
            distance_ratio: 1.0,
        }
    }
}

/// Per-frame path-finding configuration.
#[derive(Debug, Clone)]
pub struct PathSimulationParams {
    /// Sampling radius for visibility tests.
    pub radius: f32,

    /// Fraction of visibility rays that must pass.
    pub threshold: f32,

    /// Maximum range for runtime visibility tests.
    pub vis_range: f32,

    /// Ambisonic order of the output sound field.
    pub order: usize,

    /// Validate each baked path against the current scene before using it.
    pub enable_validation: bool,

    /// Re-plan with A* when a baked path is found to be occluded (typically
    /// by a dynamic occluder).
    pub find_alternate_paths: bool,

    /// Simplify re-planned paths by eliding nodes whose neighbors see each
    /// other.
    pub simplify_paths: bool,

    /// Re-test edges against the live scene while re-planning.
    pub real_time_vis: bool,

    /// Treat the direct line as occluded even when it isn't. Used to audition
    /// pathed sound on its own.
    pub force_direct_occlusion: bool,

    /// Enumerate paths from every source-influencing probe instead of only
    /// the nearest one.
    pub paths_from_all_source_probes: bool,
}

impl Default for PathSimulationParams {
    fn default() -> Self {
        Self {
            radius: 0.1,
            threshold: 0.5,
            vis_range: 25.0,
            order: 1,
            enable_validation: false,
            find_alternate_paths: false,
            simplify_paths: false,
            real_time_vis: false,
            force_direct_occlusion: false,
            paths_from_all_source_probes: false,
        }
    }
}

/// Finds paths from a source to the listener using the baked data of a probe
/// batch, and sums them into a set of SH and EQ coefficients.
#[derive(Debug)]
pub struct PathSimulator {
    vis_tester: ProbeVisibilityTester,
    path_finder: PathFinder,
}

struct FoundPaths {
    count: usize,
    paths: [SoundPath; MAX_PATHS],
    weights: [f32; MAX_PATHS],
    starts: [i32; MAX_PATHS],
    ends: [i32; MAX_PATHS],
}

impl FoundPaths {
    fn new() -> Self {
        Self {
            count: 0,
            paths: [SoundPath::default(); MAX_PATHS],
            weights: [0.0; MAX_PATHS],
            starts: [-1; MAX_PATHS],
            ends: [-1; MAX_PATHS],
        }
    }

    fn push(&mut self, path: SoundPath, weight: f32, start: i32, end: i32) {
        if self.count >= MAX_PATHS {
            return;
        }

        self.paths[self.count] = path;
        self.weights[self.count] = weight;
        self.starts[self.count] = start;
        self.ends[self.count] = end;
        self.count += 1;
    }
}

impl PathSimulator {
    pub fn new(num_probes: usize, num_vis_samples: usize, asymmetric_vis_range: bool, down: Vector3) -> Self {
        Self {
            vis_tester: ProbeVisibilityTester::new(num_vis_samples, asymmetric_vis_range, down),
            path_finder: PathFinder::new(num_probes),
        }
    }

    /// Finds paths from the source to the listener and fills `outputs`.
    ///
    /// If the direct line is unobstructed (and not force-occluded), a single
    /// direct path with weight 1 is emitted. Otherwise, the baked data is
    /// queried for a path from each source-influencing probe to each
    /// listener-influencing probe; occluded baked paths are optionally
    /// re-planned against the live scene. Returns false when the source or
    /// listener is outside all probes and no path could be found.
    #[allow(clippy::too_many_arguments)]
    pub fn find_paths(
        &mut self,
        source: Vector3,
        listener: Vector3,
        scene: &Scene,
        probes: &ProbeBatch,
        batch_index: usize,
        source_probes: &ProbeNeighborhood,
        listener_probes: &ProbeNeighborhood,
        params: &PathSimulationParams,
        distance_attenuation_model: &DistanceAttenuationModel,
        deviation_model: &DeviationModel,
        outputs: &mut PathSimulatorOutputs,
    ) -> bool {
        let mut found = FoundPaths::new();

        if scene.is_occluded(listener, source) || params.force_direct_occlusion {
            if !source_probes.has_valid_probes() || !listener_probes.has_valid_probes() {
                return false;
            }

            let identifier = BakedDataIdentifier::pathing();
            if let Some(BakedData::Pathing(baked_path_data)) = probes.data(&identifier) {
                if params.paths_from_all_source_probes {
                    for slot in 0..source_probes.num_slots() {
                        self.find_paths_from_source_probe(
                            scene,
                            probes,
                            batch_index,
                            source_probes,
                            listener_probes,
                            baked_path_data,
                            slot,
                            source_probes.weights[slot],
                            params,
                            &mut found,
                        );
                    }
                } else {
                    let mut nearest_slot = None;
                    let mut best_distance = f32::INFINITY;
                    for slot in 0..source_probes.num_slots() {
                        if source_probes.batch_indices[slot] != Some(batch_index)
                            || source_probes.probe_indices[slot] < 0
                        {
                            continue;
                        }
                        let center = probes
                            .probe(source_probes.probe_indices[slot] as usize)
                            .influence
                            .center;
                        let distance = (center - source).length_squared();
                        if distance < best_distance {
                            best_distance = distance;
                            nearest_slot = Some(slot);
                        }
                    }

                    if let Some(nearest) = nearest_slot {
                        self.find_paths_from_source_probe(
                            scene,
                            probes,
                            batch_index,
                            source_probes,
                            listener_probes,
                            baked_path_data,
                            nearest,
                            1.0,
                            params,
                            &mut found,
                        );
                    }
                }
            }
        } else {
            found.push(
                SoundPath {
                    direct: true,
                    ..Default::default()
                },
                1.0,
                -1,
                -1,
            );
        }

        calc_ambisonics_coeffs_for_paths(
            source,
            listener,
            probes,
            &found,
            params.order,
            distance_attenuation_model,
            &mut outputs.sh_coefficients,
        );
        calc_eq_for_paths(probes, &found, deviation_model, &mut outputs.eq_gains);
        calc_average_direction_for_paths(source, listener, probes, &found, &mut outputs.avg_direction);
        calc_distance_ratio_for_paths(source, probes, &found, &mut outputs.distance_ratio);

        true
    }

    #[allow(clippy::too_many_arguments)]
    fn find_paths_from_source_probe(
        &mut self,
        scene: &Scene,
        probes: &ProbeBatch,
        batch_index: usize,
        source_probes: &ProbeNeighborhood,
        listener_probes: &ProbeNeighborhood,
        baked_path_data: &BakedPathData,
        source_slot: usize,
        source_weight: f32,
        params: &PathSimulationParams,
        found: &mut FoundPaths,
    ) {
        if source_probes.batch_indices[source_slot] != Some(batch_index)
            || source_probes.probe_indices[source_slot] < 0
        {
            return;
        }

        let source_probe_index = source_probes.probe_indices[source_slot] as usize;

        for listener_slot in 0..listener_probes.num_slots() {
            self.find_paths_from_source_probe_to_listener_probe(
                scene,
                probes,
                batch_index,
                listener_probes,
                baked_path_data,
                source_probe_index,
                source_weight,
                listener_slot,
                params,
                found,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn find_paths_from_source_probe_to_listener_probe(
        &mut self,
        scene: &Scene,
        probes: &ProbeBatch,
        batch_index: usize,
        listener_probes: &ProbeNeighborhood,
        baked_path_data: &BakedPathData,
        source_probe_index: usize,
        source_weight: f32,
        listener_slot: usize,
        params: &PathSimulationParams,
        found: &mut FoundPaths,
    ) {
        if listener_probes.batch_indices[listener_slot] != Some(batch_index)
            || listener_probes.probe_indices[listener_slot] < 0
        {
            return;
        }

        let listener_probe_index = listener_probes.probe_indices[listener_slot] as usize;

        let mut sound_path =
            baked_path_data.lookup_shortest_path(source_probe_index, listener_probe_index);
        let mut try_real_time = false;

        if sound_path.is_valid()
            && self.is_path_occluded(
                &sound_path,
                scene,
                probes,
                baked_path_data,
                source_probe_index,
                listener_probe_index,
                params,
            )
            && params.find_alternate_paths
        {
            try_real_time = true;
        }

        if try_real_time {
            let probe_path = self.path_finder.find_shortest_path(
                scene,
                probes,
                baked_path_data.vis_graph(),
                &self.vis_tester,
                source_probe_index,
                listener_probe_index,
                params.radius,
                params.threshold,
                params.simplify_paths,
                params.real_time_vis,
            );

            sound_path = SoundPath::from_probe_path(&probe_path, probes);
        }

        if sound_path.is_valid() {
            found.push(
                sound_path,
                source_weight * listener_probes.weights[listener_slot],
                source_probe_index as i32,
                listener_probe_index as i32,
            );
        }
    }

    /// Validates a baked path against the current scene by testing
    /// visibility between every consecutive pair of probes along it.
    #[allow(clippy::too_many_arguments)]
    fn is_path_occluded(
        &self,
        path: &SoundPath,
        scene: &Scene,
        probes: &ProbeBatch,
        baked_path_data: &BakedPathData,
        start: usize,
        end: usize,
        params: &PathSimulationParams,
    ) -> bool {
        if !params.enable_validation {
            return false;
        }

        let mut current = end;
        let mut prev = if path.direct {
            start
        } else {
            path.last_probe as usize
        };

        while current != start {
            if !self.vis_tester.are_probes_visible(
                scene,
                probes,
                current,
                prev,
                params.radius,
                params.threshold,
            ) {
                return true;
            }

            if prev == start {
                break;
            }

            let next_path = baked_path_data.lookup_shortest_path(start, prev);
            if !next_path.is_valid() {
                return true;
            }

            current = prev;
            prev = if next_path.direct {
                start
            } else {
                next_path.last_probe as usize
            };
        }

        false
    }
}

/// Each path becomes a virtual source at the total path length along the
/// last-hop direction, SH-projected and scaled by distance attenuation; all
/// paths are weighted and summed.
fn calc_ambisonics_coeffs_for_paths(
    source: Vector3,
    listener: Vector3,
    probes: &ProbeBatch,
    found: &FoundPaths,
    order: usize,
    distance_attenuation_model: &DistanceAttenuationModel,
    coeffs: &mut Vec<f32>,
) {
    let num_coeffs = sh::num_coeffs_for_order(order);
    coeffs.resize(num_coeffs, 0.0);
    coeffs.fill(0.0);

    for i in 0..found.count {
        let path = &found.paths[i];
        if !path.is_valid() {
            continue;
        }

        let (virtual_source, distance) = if found.starts[i] >= 0 && found.ends[i] >= 0 {
            let end = found.ends[i] as usize;
            let virtual_source =
                path.to_virtual_source(probes, found.starts[i] as usize, end);
            let distance = (virtual_source - probes.probe(end).influence.center).length();
            (virtual_source, distance)
        } else {
            (source, (source - listener).length())
        };

        let distance_attenuation = distance_attenuation_model.evaluate(distance);
        let gain = found.weights[i] * distance_attenuation;

        let direction = (virtual_source - listener).normalized();
        sh::project_single_point_and_update(direction, order, gain, coeffs);
    }
}

/// Per-band gains from the cumulative deviation angle along each path,
/// normalized so the loudest band has gain 1.
fn calc_eq_for_paths(
    probes: &ProbeBatch,
    found: &FoundPaths,
    deviation_model: &DeviationModel,
    eq_gains: &mut [f32; NUM_BANDS],
) {
    eq_gains.fill(0.0);
    let mut num_valid_paths = 0;

    for i in 0..found.count {
        let path = &found.paths[i];
        if !path.is_valid() {
            continue;
        }

        if found.starts[i] >= 0 && found.ends[i] >= 0 {
            let deviation = path
                .deviation(probes, found.starts[i] as usize, found.ends[i] as usize)
                .max(1e-8);

            let mut deviation_term = [0.0f32; NUM_BANDS];
            for (band, term) in deviation_term.iter_mut().enumerate() {
                // Normalize against the zero-deviation response, so a
                // straight path is unfiltered regardless of the model.
                *term = deviation_model.evaluate(deviation, band)
                    / deviation_model.evaluate(1e-8, band);
            }

            let mut overall_gain = 1.0;
            EqEffect::normalize_gains(&mut deviation_term, &mut overall_gain);

            for (gain, term) in eq_gains.iter_mut().zip(deviation_term.iter()) {
                *gain += found.weights[i] * overall_gain * term;
            }
        } else {
            for gain in eq_gains.iter_mut() {
                *gain += found.weights[i];
            }
        }

        num_valid_paths += 1;
    }

    if num_valid_paths == 0 {
        eq_gains.fill(1.0);
    }
}

fn calc_average_direction_for_paths(
    source: Vector3,
    listener: Vector3,
    probes: &ProbeBatch,
    found: &FoundPaths,
    avg_direction: &mut Vector3,
) {
    let mut direction = Vector3::ZERO;

    for i in 0..found.count {
        let path = &found.paths[i];
        if !path.is_valid() {
            continue;
        }

        let (virtual_source, distance) = if found.starts[i] >= 0 && found.ends[i] >= 0 {
            let end = found.ends[i] as usize;
            let virtual_source =
                path.to_virtual_source(probes, found.starts[i] as usize, end);
            let distance = (virtual_source - probes.probe(end).influence.center).length();
            (virtual_source, distance)
        } else {
            (source, (source - listener).length())
        };

        let gain = found.weights[i] / distance.max(1.0);
        direction += (virtual_source - listener).normalized() * gain;
    }

    *avg_direction = direction.normalized();
}

fn calc_distance_ratio_for_paths(
    source: Vector3,
    probes: &ProbeBatch,
    found: &FoundPaths,
    avg_distance_ratio: &mut f32,
) {
    let mut ratio = 0.0;

    for i in 0..found.count {
        let path = &found.paths[i];
        if !path.is_valid() {
            continue;
        }

        let mut path_ratio = 1.0;

        if found.starts[i] >= 0 && found.ends[i] >= 0 {
            let end = found.ends[i] as usize;
            let virtual_source = path.to_virtual_source_from(probes, source, end);
            let end_center = probes.probe(end).influence.center;

            let path_distance = (virtual_source - end_center).length();
            let direct_distance = (source - end_center).length();
            if path_distance > 1.0 && direct_distance > 1.0 {
                path_ratio = direct_distance / path_distance;
            }
        }

        ratio += found.weights[i] * path_ratio;
    }

    // A ratio of 1.0 when no valid path contributes.
    *avg_distance_ratio = if found.count == 0 { 1.0 } else { ratio };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Material, Sphere, Triangle};
    use crate::path::baked::{PathBakeParams, PathBaker};
    use crate::probe::MAX_PROBES_PER_BATCH;
    use crate::scene::{StaticMesh, StaticMeshSettings};
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    /// A wall in the x = 0 plane with probes forming a detour around its
    /// top edge.
    fn occluded_setup() -> (Scene, ProbeBatch) {
        let mesh = StaticMesh::try_new(&StaticMeshSettings {
            vertices: &[
                Vector3::new(0.0, -20.0, -20.0),
                Vector3::new(0.0, 4.0, -20.0),
                Vector3::new(0.0, 4.0, 20.0),
                Vector3::new(0.0, -20.0, 20.0),
            ],
            triangles: &[Triangle::new(0, 1, 2), Triangle::new(0, 2, 3)],
            material_indices: &[0, 0],
            materials: &[Material::GENERIC],
        })
        .unwrap();

        let mut scene = Scene::new();
        scene.add_static_mesh(Arc::new(mesh));
        scene.commit();

        let mut probes = ProbeBatch::new();
        probes.add_probe(Sphere::new(Vector3::new(-4.0, 0.0, 0.0), 8.0));
        probes.add_probe(Sphere::new(Vector3::new(-3.0, 6.0, 0.0), 8.0));
        probes.add_probe(Sphere::new(Vector3::new(3.0, 6.0, 0.0), 8.0));
        probes.add_probe(Sphere::new(Vector3::new(4.0, 0.0, 0.0), 8.0));
        probes.commit();

        let params = PathBakeParams {
            num_samples: 4,
            radius: 0.1,
            threshold: 0.5,
            vis_range: 12.0,
            vis_range_realtime: 12.0,
            path_range: 100.0,
            ..Default::default()
        };
        PathBaker::bake(&scene, &params, &mut probes, None, &AtomicBool::new(false)).unwrap();

        (scene, probes)
    }

    fn neighborhood_around(probes: &ProbeBatch, point: Vector3) -> ProbeNeighborhood {
        let mut neighborhood = ProbeNeighborhood::default();
        neighborhood.resize(1);
        probes.get_influencing_probes(point, 0, &mut neighborhood, 0);
        let batches = [probes];
        neighborhood.calc_weights(&batches, point);
        neighborhood
    }

    #[test]
    fn test_direct_path_when_unoccluded() {
        let (scene, probes) = occluded_setup();

        // Both points on the same side of the wall.
        let source = Vector3::new(-5.0, 0.0, 1.0);
        let listener = Vector3::new(-5.0, 0.0, -1.0);

        let source_probes = neighborhood_around(&probes, source);
        let listener_probes = neighborhood_around(&probes, listener);

        let mut simulator =
            PathSimulator::new(probes.num_probes(), 4, false, -Vector3::UNIT_Y);
        let mut outputs = PathSimulatorOutputs::default();

        let ok = simulator.find_paths(
            source,
            listener,
            &scene,
            &probes,
            0,
            &source_probes,
            &listener_probes,
            &PathSimulationParams::default(),
            &DistanceAttenuationModel::default(),
            &DeviationModel::default(),
            &mut outputs,
        );

        assert!(ok);
        assert_eq!(outputs.eq_gains, [1.0; NUM_BANDS]);
        assert!(outputs.sh_coefficients[0] > 0.0);
    }

    #[test]
    fn test_pathed_sound_bends_around_wall() {
        let (scene, probes) = occluded_setup();

        let source = Vector3::new(-4.0, 0.0, 0.0);
        let listener = Vector3::new(4.0, 0.0, 0.0);

        let source_probes = neighborhood_around(&probes, source);
        let listener_probes = neighborhood_around(&probes, listener);
        assert!(source_probes.has_valid_probes());
        assert!(listener_probes.has_valid_probes());

        let mut simulator =
            PathSimulator::new(probes.num_probes(), 4, false, -Vector3::UNIT_Y);
        let mut outputs = PathSimulatorOutputs::default();

        let params = PathSimulationParams {
            order: 1,
            ..Default::default()
        };

        let ok = simulator.find_paths(
            source,
            listener,
            &scene,
            &probes,
            0,
            &source_probes,
            &listener_probes,
            &params,
            &DistanceAttenuationModel::default(),
            &DeviationModel::default(),
            &mut outputs,
        );

        assert!(ok);

        // Pathed energy arrives, and the average direction points up over
        // the wall rather than straight through it.
        assert!(outputs.sh_coefficients[0] > 0.0);
        assert!(outputs.avg_direction.y > 0.1);

        // Diffraction attenuates high frequencies more than low.
        assert!(outputs.eq_gains[2] <= outputs.eq_gains[0]);
    }

    #[test]
    fn test_neighborhood_capacity() {
        let (_, probes) = occluded_setup();
        let neighborhood = neighborhood_around(&probes, Vector3::new(-4.0, 0.0, 0.0));
        assert_eq!(neighborhood.num_slots(), MAX_PROBES_PER_BATCH);
    }
}
