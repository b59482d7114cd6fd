//! Probe-to-probe visibility testing and the visibility graph.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::geometry::Vector3;
use crate::probe::ProbeBatch;
use crate::sampling;
use crate::scene::Scene;
use crate::serialized_object::{SerializeError, SerializedObject};
use rayon::prelude::*;

/// Tests mutual visibility between pairs of probes by casting stratified
/// rays between their influence spheres.
#[derive(Debug, Clone)]
pub struct ProbeVisibilityTester {
    num_samples: usize,
    asymmetric_vis_range: bool,
    down: Vector3,
}

impl ProbeVisibilityTester {
    /// `num_samples` rays are cast per pair. In asymmetric mode, additional
    /// source samples are biased towards `down`, to favor visibility from
    /// points below the listener.
    pub fn new(num_samples: usize, asymmetric_vis_range: bool, down: Vector3) -> Self {
        Self {
            num_samples: num_samples.max(1),
            asymmetric_vis_range,
            down: down.normalized(),
        }
    }

    /// Checks whether at least `threshold` of the sampled rays between the
    /// two probes' spheres are unobstructed. `radius` overrides the sampling
    /// radius around each probe center.
    pub fn are_probes_visible(
        &self,
        scene: &Scene,
        probes: &ProbeBatch,
        from: usize,
        to: usize,
        radius: f32,
        threshold: f32,
    ) -> bool {
        let from_center = probes.probe(from).influence.center;
        let to_center = probes.probe(to).influence.center;

        // The ray set is a deterministic function of the endpoints, so the
        // graph is reproducible and symmetric.
        let seed = (from.min(to) as u64) << 32 | from.max(to) as u64;
        let mut rng = sampling::seeded_rng(seed);

        let mut from_points = vec![Vector3::ZERO; self.num_samples];
        let mut to_points = vec![Vector3::ZERO; self.num_samples];
        sampling::stratified_sphere_points(from_center, radius, &mut from_points, &mut rng);
        sampling::stratified_sphere_points(to_center, radius, &mut to_points, &mut rng);

        if self.asymmetric_vis_range {
            // Pull source samples towards the down direction, so "below the
            // probe" visibility dominates.
            for point in from_points.iter_mut() {
                *point = *point + self.down * (0.5 * radius);
            }
        }

        let mut num_unoccluded = 0;
        for (from_point, to_point) in from_points.iter().zip(to_points.iter()) {
            if !scene.is_occluded(*from_point, *to_point) {
                num_unoccluded += 1;
            }
        }

        num_unoccluded as f32 >= threshold * self.num_samples as f32
    }
}

/// An edge in the probe visibility graph.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct VisibilityEdge {
    /// Index of the neighboring probe.
    pub index: i32,

    /// Traversal cost: the distance between probe centers.
    pub cost: f32,
}

/// For each probe, the set of probes visible from it, with traversal costs.
///
/// Symmetric in the unpruned form: edge `(i, j)` implies edge `(j, i)` with
/// equal cost.
#[derive(Debug, Default)]
pub struct ProbeVisibilityGraph {
    adjacent: Vec<Vec<VisibilityEdge>>,
}

impl ProbeVisibilityGraph {
    /// Builds the visibility graph for all probe pairs within `vis_range`.
    ///
    /// Returns an empty graph if `cancel` is raised mid-build.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scene: &Scene,
        probes: &ProbeBatch,
        tester: &ProbeVisibilityTester,
        radius: f32,
        threshold: f32,
        vis_range: f32,
        cancel: &AtomicBool,
    ) -> Self {
        let num_probes = probes.num_probes();

        log::debug!("building visibility graph over {num_probes} probes");

        // Test each unordered pair once; mirror edges afterwards to keep the
        // graph exactly symmetric.
        let edge_lists: Vec<Vec<VisibilityEdge>> = (0..num_probes)
            .into_par_iter()
            .map(|i| {
                if cancel.load(Ordering::Relaxed) {
                    return Vec::new();
                }

                let mut edges = Vec::new();
                for j in (i + 1)..num_probes {
                    let distance = (probes.probe(i).influence.center
                        - probes.probe(j).influence.center)
                        .length();
                    if distance > vis_range {
                        continue;
                    }

                    if tester.are_probes_visible(scene, probes, i, j, radius, threshold) {
                        edges.push(VisibilityEdge {
                            index: j as i32,
                            cost: distance,
                        });
                    }
                }
                edges
            })
            .collect();

        if cancel.load(Ordering::Relaxed) {
            return Self::default();
        }

        let mut adjacent = vec![Vec::new(); num_probes];
        for (i, edges) in edge_lists.into_iter().enumerate() {
            for edge in edges {
                adjacent[i].push(edge);
                adjacent[edge.index as usize].push(VisibilityEdge {
                    index: i as i32,
                    cost: edge.cost,
                });
            }
        }

        Self { adjacent }
    }

    pub fn num_nodes(&self) -> usize {
        self.adjacent.len()
    }

    pub fn edges(&self, node: usize) -> &[VisibilityEdge] {
        &self.adjacent[node]
    }

    pub fn has_edge(&self, from: usize, to: usize) -> bool {
        self.adjacent[from]
            .iter()
            .any(|edge| edge.index == to as i32)
    }

    /// Removes edges whose endpoints are farther apart than the tighter
    /// runtime range. Used after baking to shrink the graph used for
    /// runtime re-planning.
    pub fn prune(&mut self, vis_range_realtime: f32) {
        for edges in &mut self.adjacent {
            edges.retain(|edge| edge.cost <= vis_range_realtime);
        }
    }

    #[cfg(test)]
    pub(crate) fn push_node_for_test(&mut self, edges: Vec<VisibilityEdge>) {
        self.adjacent.push(edges);
    }

    pub fn save(&self, serialized_object: &mut SerializedObject) {
        serialized_object.write_u64(self.adjacent.len() as u64);
        for edges in &self.adjacent {
            serialized_object.write_u64(edges.len() as u64);
            for edge in edges {
                serialized_object.write_i32(edge.index);
                serialized_object.write_f32(edge.cost);
            }
        }
    }

    pub fn load(serialized_object: &mut SerializedObject) -> Result<Self, SerializeError> {
        let num_nodes = serialized_object.read_nonzero_length()?;

        let mut adjacent = Vec::with_capacity(num_nodes);
        for _ in 0..num_nodes {
            let num_edges = serialized_object.read_length()?;
            let mut edges = Vec::with_capacity(num_edges);
            for _ in 0..num_edges {
                let index = serialized_object.read_i32()?;
                let cost = serialized_object.read_f32()?;
                edges.push(VisibilityEdge { index, cost });
            }
            adjacent.push(edges);
        }

        Ok(Self { adjacent })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Material, Sphere, Triangle};
    use crate::scene::{StaticMesh, StaticMeshSettings};
    use std::sync::Arc;

    fn open_scene() -> Scene {
        // A single distant triangle, far from the probes.
        let mesh = StaticMesh::try_new(&StaticMeshSettings {
            vertices: &[
                Vector3::new(100.0, 0.0, 0.0),
                Vector3::new(101.0, 0.0, 0.0),
                Vector3::new(100.0, 1.0, 0.0),
            ],
            triangles: &[Triangle::new(0, 1, 2)],
            material_indices: &[0],
            materials: &[Material::GENERIC],
        })
        .unwrap();

        let mut scene = Scene::new();
        scene.add_static_mesh(Arc::new(mesh));
        scene.commit();
        scene
    }

    fn wall_scene() -> Scene {
        // A large wall in the x = 0 plane.
        let mesh = StaticMesh::try_new(&StaticMeshSettings {
            vertices: &[
                Vector3::new(0.0, -50.0, -50.0),
                Vector3::new(0.0, 50.0, -50.0),
                Vector3::new(0.0, 50.0, 50.0),
                Vector3::new(0.0, -50.0, 50.0),
            ],
            triangles: &[Triangle::new(0, 1, 2), Triangle::new(0, 2, 3)],
            material_indices: &[0, 0],
            materials: &[Material::GENERIC],
        })
        .unwrap();

        let mut scene = Scene::new();
        scene.add_static_mesh(Arc::new(mesh));
        scene.commit();
        scene
    }

    fn line_of_probes() -> ProbeBatch {
        let mut batch = ProbeBatch::new();
        for i in 0..4 {
            batch.add_probe(Sphere::new(
                Vector3::new(i as f32 * 5.0 - 7.5, 0.0, 0.0),
                1.0,
            ));
        }
        batch.commit();
        batch
    }

    #[test]
    fn test_graph_is_symmetric() {
        let scene = open_scene();
        let probes = line_of_probes();

        let tester = ProbeVisibilityTester::new(4, false, -Vector3::UNIT_Y);
        let graph = ProbeVisibilityGraph::new(
            &scene,
            &probes,
            &tester,
            0.1,
            0.5,
            100.0,
            &AtomicBool::new(false),
        );

        for i in 0..graph.num_nodes() {
            for edge in graph.edges(i) {
                let back = graph.edges(edge.index as usize);
                let reverse = back
                    .iter()
                    .find(|reverse| reverse.index == i as i32)
                    .expect("graph must be symmetric");
                assert_eq!(reverse.cost, edge.cost);
            }
        }
    }

    #[test]
    fn test_wall_blocks_visibility() {
        let scene = wall_scene();

        let mut probes = ProbeBatch::new();
        probes.add_probe(Sphere::new(Vector3::new(-5.0, 0.0, 0.0), 1.0));
        probes.add_probe(Sphere::new(Vector3::new(5.0, 0.0, 0.0), 1.0));
        probes.commit();

        let tester = ProbeVisibilityTester::new(8, false, -Vector3::UNIT_Y);
        let graph = ProbeVisibilityGraph::new(
            &scene,
            &probes,
            &tester,
            0.5,
            0.5,
            100.0,
            &AtomicBool::new(false),
        );

        assert!(!graph.has_edge(0, 1));
    }

    #[test]
    fn test_prune_removes_long_edges() {
        let scene = open_scene();
        let probes = line_of_probes();

        let tester = ProbeVisibilityTester::new(4, false, -Vector3::UNIT_Y);
        let mut graph = ProbeVisibilityGraph::new(
            &scene,
            &probes,
            &tester,
            0.1,
            0.5,
            100.0,
            &AtomicBool::new(false),
        );

        // In the open scene everything within range is connected.
        assert!(graph.has_edge(0, 3));

        graph.prune(6.0);
        assert!(!graph.has_edge(0, 3));
        assert!(graph.has_edge(0, 1));
    }
}
