//! Baked shortest paths between all pairs of probes.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::finder::{PathFinder, ProbePath};
use super::visibility_graph::{ProbeVisibilityGraph, ProbeVisibilityTester};
use crate::baked_data::{BakedData, BakedDataIdentifier, BakedDataType, BakedDataVariation};
use crate::callback::ProgressCallback;
use crate::error::EchofieldError;
use crate::geometry::Vector3;
use crate::probe::ProbeBatch;
use crate::scene::Scene;
use crate::serialized_object::{SerializeError, SerializedObject};
use rayon::prelude::*;

/// The minimal metadata required to fully describe a sound path, and to
/// convert it to a virtual source.
///
/// A direct path sets `direct`; the probe fields then carry the straight
/// line's endpoints implicitly.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SoundPath {
    /// The second probe in the sequence of probes from start to end.
    pub first_probe: i16,

    /// The second-to-last probe in the sequence of probes from start to end.
    pub last_probe: i16,

    /// Valid if the path has at least two intermediate probes.
    pub probe_after_first: i16,

    /// Valid if the path has at least two intermediate probes.
    pub probe_before_last: i16,

    /// Is this a direct (line of sight) path?
    pub direct: bool,

    /// Total distance along the path from `first_probe` to `last_probe`.
    pub distance_internal: f32,

    /// Total deviation angle along the path from `first_probe` to
    /// `last_probe`, in radians.
    pub deviation_internal: f32,
}

impl Default for SoundPath {
    fn default() -> Self {
        Self {
            first_probe: -1,
            last_probe: -1,
            probe_after_first: -1,
            probe_before_last: -1,
            direct: false,
            distance_internal: 0.0,
            deviation_internal: 0.0,
        }
    }
}

impl SoundPath {
    /// Reduces a probe path to its compact form.
    pub fn from_probe_path(probe_path: &ProbePath, probes: &ProbeBatch) -> Self {
        let mut path = Self::default();

        if !probe_path.valid {
            return path;
        }

        if probe_path.nodes.is_empty() {
            path.direct = true;
            return path;
        }

        path.first_probe = probe_path.nodes[0] as i16;
        path.last_probe = *probe_path.nodes.last().unwrap() as i16;

        if probe_path.nodes.len() >= 2 {
            path.probe_after_first = probe_path.nodes[1] as i16;
            path.probe_before_last = probe_path.nodes[probe_path.nodes.len() - 2] as i16;
        }

        for window in probe_path.nodes.windows(2) {
            let prev = probes.probe(window[0] as usize).influence.center;
            let current = probes.probe(window[1] as usize).influence.center;
            path.distance_internal += (current - prev).length();
        }

        for window in probe_path.nodes.windows(3) {
            let prev = probes.probe(window[0] as usize).influence.center;
            let current = probes.probe(window[1] as usize).influence.center;
            let next = probes.probe(window[2] as usize).influence.center;

            let prev_direction = (current - prev).normalized();
            let next_direction = (next - current).normalized();
            path.deviation_internal += Vector3::angle_between(prev_direction, next_direction);
        }

        path
    }

    pub fn is_valid(&self) -> bool {
        self.direct || (self.first_probe >= 0 && self.last_probe >= 0)
    }

    /// Total distance along the path from the start probe to the end probe.
    pub fn distance(&self, probes: &ProbeBatch, start: usize, end: usize) -> f32 {
        assert!(self.is_valid());

        let start_center = probes.probe(start).influence.center;
        let end_center = probes.probe(end).influence.center;

        if self.direct {
            (end_center - start_center).length()
        } else {
            let first = probes.probe(self.first_probe as usize).influence.center;
            let last = probes.probe(self.last_probe as usize).influence.center;
            self.distance_internal + (first - start_center).length() + (end_center - last).length()
        }
    }

    /// Total distance along the path from an arbitrary source position to
    /// the end probe.
    pub fn distance_from_source(
        &self,
        probes: &ProbeBatch,
        source: Vector3,
        end: usize,
    ) -> f32 {
        assert!(self.is_valid());

        let mut result = self.distance_internal;

        if !self.direct {
            let first = probes.probe(self.first_probe as usize).influence.center;
            let last = probes.probe(self.last_probe as usize).influence.center;
            let end_center = probes.probe(end).influence.center;

            result += (first - source).length();
            result += (end_center - last).length();
        }

        result
    }

    /// Total deviation angle along the path from the start probe to the end
    /// probe, in radians.
    pub fn deviation(&self, probes: &ProbeBatch, start: usize, end: usize) -> f32 {
        assert!(self.is_valid());

        let mut result = self.deviation_internal;

        if self.direct {
            return result;
        }

        if self.probe_after_first < 0 && self.probe_before_last < 0 {
            let prev = probes.probe(start).influence.center;
            let current = probes.probe(self.first_probe as usize).influence.center;
            let next = probes.probe(end).influence.center;

            result += Vector3::angle_between(
                (current - prev).normalized(),
                (next - current).normalized(),
            );
        } else {
            if self.probe_after_first >= 0 {
                let prev = probes.probe(start).influence.center;
                let current = probes.probe(self.first_probe as usize).influence.center;
                let next = probes.probe(self.probe_after_first as usize).influence.center;

                result += Vector3::angle_between(
                    (current - prev).normalized(),
                    (next - current).normalized(),
                );
            }

            if self.probe_before_last >= 0 {
                let prev = probes.probe(self.probe_before_last as usize).influence.center;
                let current = probes.probe(self.last_probe as usize).influence.center;
                let next = probes.probe(end).influence.center;

                result += Vector3::angle_between(
                    (current - prev).normalized(),
                    (next - current).normalized(),
                );
            }
        }

        result
    }

    /// Converts this path to a virtual source position: the distance from
    /// the virtual source to the end probe is the total path length, along
    /// the direction of the last hop into the end probe.
    pub fn to_virtual_source(&self, probes: &ProbeBatch, start: usize, end: usize) -> Vector3 {
        if self.direct {
            return probes.probe(start).influence.center;
        }

        let end_center = probes.probe(end).influence.center;
        let last = probes.probe(self.last_probe as usize).influence.center;

        let total_distance = self.distance(probes, start, end);
        let direction = (last - end_center).normalized();
        end_center + direction * total_distance
    }

    /// Like [`Self::to_virtual_source`], measuring from an arbitrary source
    /// position.
    pub fn to_virtual_source_from(
        &self,
        probes: &ProbeBatch,
        source: Vector3,
        end: usize,
    ) -> Vector3 {
        if self.direct {
            return source;
        }

        let end_center = probes.probe(end).influence.center;
        let last = probes.probe(self.last_probe as usize).influence.center;

        let total_distance = self.distance_from_source(probes, source, end);
        let direction = (last - end_center).normalized();
        end_center + direction * total_distance
    }
}

/// Baked data for looking up paths at runtime: for every ordered pair of
/// probes, the shortest path between them, stored compactly.
///
/// Only `end <= start` entries are stored; by the symmetry of shortest
/// paths, a lookup with `end > start` swaps the endpoints and reverses the
/// result.
#[derive(Debug)]
pub struct BakedPathData {
    vis_graph: ProbeVisibilityGraph,
    unique_paths: Vec<SoundPath>,
    // refs[start * num_probes + end]: index into unique_paths. 0 refers to an
    // invalid path.
    refs: Vec<i32>,
    num_probes: usize,
    needs_update: bool,
}

impl BakedPathData {
    /// Bakes path data for a probe batch: builds the visibility graph, runs
    /// Dijkstra from every probe, deduplicates the resulting paths, and
    /// stores an N×N table of references.
    pub fn new(
        scene: &Scene,
        probes: &ProbeBatch,
        params: &PathBakeParams,
        cancel: &AtomicBool,
        mut progress_callback: Option<ProgressCallback>,
    ) -> Result<Self, EchofieldError> {
        let num_probes = probes.num_probes();
        if num_probes == 0 {
            return Err(EchofieldError::InvalidArgument);
        }

        let tester = ProbeVisibilityTester::new(
            params.num_samples,
            params.asymmetric_vis_range,
            params.down,
        );

        let mut vis_graph = ProbeVisibilityGraph::new(
            scene,
            probes,
            &tester,
            params.radius,
            params.threshold,
            params.vis_range,
            cancel,
        );

        if cancel.load(Ordering::Relaxed) {
            return Err(EchofieldError::Cancelled);
        }

        // Shortest paths from every source probe, in parallel. Entries with
        // end > start are discarded; symmetry reconstructs them at lookup.
        let progress = Mutex::new((0usize, progress_callback.take()));

        let mut all_paths: Vec<ProbePath> = (0..num_probes)
            .into_par_iter()
            .flat_map_iter(|start| {
                if cancel.load(Ordering::Relaxed) {
                    return Vec::new().into_iter();
                }

                let mut finder = PathFinder::new(num_probes);
                let mut paths = vec![ProbePath::default(); num_probes];
                finder.find_all_shortest_paths(
                    probes,
                    &vis_graph,
                    start,
                    params.path_range,
                    &mut paths,
                );

                for (end, path) in paths.iter_mut().enumerate() {
                    if end > start {
                        *path = ProbePath::invalid();
                    }
                }

                {
                    let mut progress = progress.lock().unwrap();
                    progress.0 += 1;
                    let fraction = progress.0 as f32 / num_probes as f32;
                    if let Some(callback) = progress.1.as_mut() {
                        callback.report(0.99 * fraction);
                    }
                }

                paths.into_iter()
            })
            .collect();

        if cancel.load(Ordering::Relaxed) {
            return Err(EchofieldError::Cancelled);
        }

        // Sort and deduplicate into the unique-path table. Invalid paths
        // sort first, so index 0 is always the invalid path.
        all_paths.sort();

        let mut unique_paths: Vec<SoundPath> = Vec::new();
        let mut refs = vec![0i32; num_probes * num_probes];

        for (index, probe_path) in all_paths.iter().enumerate() {
            if index == 0 || probe_path.nodes != all_paths[index - 1].nodes
                || probe_path.valid != all_paths[index - 1].valid
            {
                unique_paths.push(SoundPath::from_probe_path(probe_path, probes));
            }

            if unique_paths.last().unwrap().is_valid() {
                let start = probe_path.start as usize;
                let end = probe_path.end as usize;
                refs[start * num_probes + end] = unique_paths.len() as i32 - 1;
            }
        }

        // Every source's path to itself is invalid, and invalid paths sort
        // first, so slot 0 always holds the invalid path that unwritten refs
        // point to.
        debug_assert!(!unique_paths[0].is_valid());

        if params.prune_vis_graph {
            vis_graph.prune(params.vis_range_realtime);
        }

        let mut progress = progress.into_inner().unwrap();
        if let Some(callback) = progress.1.as_mut() {
            callback.report(1.0);
        }

        log::info!(
            "baked paths: {} probes, {} unique paths",
            num_probes,
            unique_paths.len()
        );

        Ok(Self {
            vis_graph,
            unique_paths,
            refs,
            num_probes,
            needs_update: false,
        })
    }

    pub fn vis_graph(&self) -> &ProbeVisibilityGraph {
        &self.vis_graph
    }

    pub fn num_probes(&self) -> usize {
        self.num_probes
    }

    pub fn needs_update(&self) -> bool {
        self.needs_update
    }

    pub(crate) fn mark_needs_update(&mut self) {
        self.needs_update = true;
    }

    /// The shortest baked path between two probes. Lookups with
    /// `end > start` swap endpoints and reverse the stored path.
    pub fn lookup_shortest_path(&self, start: usize, end: usize) -> SoundPath {
        let mut path = if start < end {
            let mut path = self.unique_paths[self.refs[end * self.num_probes + start] as usize];
            std::mem::swap(&mut path.first_probe, &mut path.last_probe);
            std::mem::swap(&mut path.probe_after_first, &mut path.probe_before_last);
            path
        } else {
            self.unique_paths[self.refs[start * self.num_probes + end] as usize]
        };

        if !path.is_valid() {
            path = SoundPath::default();
        }

        path
    }

    /// Reconstructs the full probe sequence of a baked path by walking the
    /// table backwards from the end probe.
    pub fn reconstruct_probe_path(&self, start: usize, end: usize) -> ProbePath {
        let sound_path = self.lookup_shortest_path(start, end);

        let mut probe_path = ProbePath {
            valid: sound_path.is_valid(),
            start: start as i32,
            end: end as i32,
            nodes: Vec::new(),
        };

        if !probe_path.valid {
            return probe_path;
        }

        let mut current = end as i32;
        let mut prev = if sound_path.direct {
            start as i32
        } else {
            sound_path.last_probe as i32
        };

        while current != start as i32 {
            if current != start as i32 && current != end as i32 {
                probe_path.nodes.push(current);
            }

            if prev == start as i32 {
                break;
            }

            let next_path = self.lookup_shortest_path(start, prev as usize);
            if !next_path.is_valid() {
                probe_path.reset();
                return probe_path;
            }

            current = prev;
            prev = if next_path.direct {
                start as i32
            } else {
                next_path.last_probe as i32
            };
        }

        probe_path.nodes.reverse();
        probe_path
    }

    pub fn save(&self, serialized_object: &mut SerializedObject) {
        self.vis_graph.save(serialized_object);

        serialized_object.write_u64(self.unique_paths.len() as u64);
        for path in &self.unique_paths {
            serialized_object.write_i32(path.first_probe as i32);
            serialized_object.write_i32(path.last_probe as i32);
            serialized_object.write_i32(path.probe_after_first as i32);
            serialized_object.write_i32(path.probe_before_last as i32);
            serialized_object.write_bool(path.direct);
            serialized_object.write_f32(path.distance_internal);
            serialized_object.write_f32(path.deviation_internal);
        }

        // Sparse (index, ref) pairs for valid paths only.
        let valid: Vec<(usize, i32)> = self
            .refs
            .iter()
            .enumerate()
            .filter(|&(_, &reference)| self.unique_paths[reference as usize].is_valid())
            .map(|(index, &reference)| (index, reference))
            .collect();

        serialized_object.write_u64(valid.len() as u64);
        for (index, reference) in valid {
            serialized_object.write_i32(index as i32);
            serialized_object.write_i32(reference);
        }
    }

    pub fn load(serialized_object: &mut SerializedObject) -> Result<Self, SerializeError> {
        let vis_graph = ProbeVisibilityGraph::load(serialized_object)?;
        let num_probes = vis_graph.num_nodes();

        let num_unique = serialized_object.read_nonzero_length()?;
        let mut unique_paths = Vec::with_capacity(num_unique);
        for _ in 0..num_unique {
            let mut path = SoundPath {
                first_probe: serialized_object.read_i32()? as i16,
                last_probe: serialized_object.read_i32()? as i16,
                probe_after_first: serialized_object.read_i32()? as i16,
                probe_before_last: serialized_object.read_i32()? as i16,
                direct: false,
                distance_internal: 0.0,
                deviation_internal: 0.0,
            };
            path.direct = serialized_object.read_bool()?;
            path.distance_internal = serialized_object.read_f32()?;
            path.deviation_internal = serialized_object.read_f32()?;
            unique_paths.push(path);
        }

        let mut refs = vec![0i32; num_probes * num_probes];
        let num_valid = serialized_object.read_length()?;
        for _ in 0..num_valid {
            let index = serialized_object.read_i32()? as usize;
            let reference = serialized_object.read_i32()?;
            if index >= refs.len() || reference as usize >= unique_paths.len() {
                return Err(SerializeError::InvalidValue { offset: 0 });
            }
            refs[index] = reference;
        }

        Ok(Self {
            vis_graph,
            unique_paths,
            refs,
            num_probes,
            needs_update: false,
        })
    }
}

/// Parameters controlling a path bake.
#[derive(Debug, Copy, Clone)]
pub struct PathBakeParams {
    /// Number of visibility rays per probe pair.
    pub num_samples: usize,

    /// Sampling radius around each probe center for visibility rays.
    pub radius: f32,

    /// Fraction of unobstructed rays required for two probes to be
    /// considered mutually visible.
    pub threshold: f32,

    /// Maximum distance between mutually visible probes at bake time.
    pub vis_range: f32,

    /// Tighter range used to prune the graph for runtime re-planning.
    pub vis_range_realtime: f32,

    /// Maximum total length of a baked path.
    pub path_range: f32,

    /// Bias visibility samples downward, favoring "below the listener"
    /// visibility.
    pub asymmetric_vis_range: bool,

    /// The world's down direction, for asymmetric visibility.
    pub down: Vector3,

    /// Shrink the visibility graph to `vis_range_realtime` after baking.
    pub prune_vis_graph: bool,
}

impl Default for PathBakeParams {
    fn default() -> Self {
        Self {
            num_samples: 4,
            radius: 0.1,
            threshold: 0.5,
            vis_range: 50.0,
            vis_range_realtime: 25.0,
            path_range: 100.0,
            asymmetric_vis_range: false,
            down: -Vector3::UNIT_Y,
            prune_vis_graph: false,
        }
    }
}

/// Bakes path data into a probe batch under the `{Pathing, Dynamic}`
/// identifier.
#[derive(Debug, Default)]
pub struct PathBaker;

impl PathBaker {
    pub fn bake(
        scene: &Scene,
        params: &PathBakeParams,
        probes: &mut ProbeBatch,
        progress_callback: Option<ProgressCallback>,
        cancel: &AtomicBool,
    ) -> Result<(), EchofieldError> {
        let identifier = BakedDataIdentifier::pathing();
        assert_eq!(identifier.data_type, BakedDataType::Pathing);
        assert_eq!(identifier.variation, BakedDataVariation::Dynamic);

        let data = BakedPathData::new(scene, probes, params, cancel, progress_callback)?;

        if probes.has_data(&identifier) {
            probes.remove_data(&identifier);
        }
        probes.add_data(identifier, BakedData::Pathing(data));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Sphere;

    /// Bakes a 4-probe chain in an empty scene with a visibility range that
    /// only connects adjacent probes.
    fn baked_chain() -> (ProbeBatch, BakedDataIdentifier) {
        let mut scene = Scene::new();
        scene.commit();

        let mut probes = ProbeBatch::new();
        for i in 0..4 {
            probes.add_probe(Sphere::new(Vector3::new(i as f32 * 4.0, 0.0, 0.0), 1.0));
        }
        probes.commit();

        let params = PathBakeParams {
            vis_range: 5.0,
            ..Default::default()
        };

        let cancel = AtomicBool::new(false);
        PathBaker::bake(&scene, &params, &mut probes, None, &cancel).unwrap();

        (probes, BakedDataIdentifier::pathing())
    }

    fn baked_data<'a>(probes: &'a ProbeBatch, identifier: &BakedDataIdentifier) -> &'a BakedPathData {
        match probes.data(identifier).unwrap() {
            BakedData::Pathing(data) => data,
            _ => panic!("expected pathing layer"),
        }
    }

    #[test]
    fn test_chain_paths_go_through_middle_probes() {
        let (probes, identifier) = baked_chain();
        let data = baked_data(&probes, &identifier);

        let forward = data.reconstruct_probe_path(0, 3);
        assert!(forward.valid);
        assert_eq!(forward.nodes, vec![1, 2]);

        let backward = data.reconstruct_probe_path(3, 0);
        assert!(backward.valid);
        assert_eq!(backward.nodes, vec![2, 1]);
    }

    #[test]
    fn test_lookup_is_symmetric_up_to_reversal() {
        let (probes, identifier) = baked_chain();
        let data = baked_data(&probes, &identifier);

        for start in 0..4usize {
            for end in 0..4usize {
                if start == end {
                    continue;
                }

                let forward = data.lookup_shortest_path(start, end);
                let backward = data.lookup_shortest_path(end, start);

                assert_eq!(forward.is_valid(), backward.is_valid());
                if forward.is_valid() && !forward.direct {
                    assert_eq!(forward.first_probe, backward.last_probe);
                    assert_eq!(forward.last_probe, backward.first_probe);
                    assert_eq!(forward.distance_internal, backward.distance_internal);
                }
            }
        }
    }

    #[test]
    fn test_adjacent_probes_are_direct() {
        let (probes, identifier) = baked_chain();
        let data = baked_data(&probes, &identifier);

        let path = data.lookup_shortest_path(0, 1);
        assert!(path.is_valid());
        assert!(path.direct);
    }

    #[test]
    fn test_serialization_round_trip() {
        let (probes, identifier) = baked_chain();
        let data = baked_data(&probes, &identifier);

        let mut serialized = SerializedObject::new();
        data.save(&mut serialized);

        let mut reader = SerializedObject::from_bytes(serialized.data().to_vec());
        let loaded = BakedPathData::load(&mut reader).unwrap();

        assert_eq!(loaded.num_probes(), 4);
        let path = loaded.reconstruct_probe_path(0, 3);
        assert_eq!(path.nodes, vec![1, 2]);
    }
}
