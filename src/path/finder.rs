//! Shortest-path search over the probe visibility graph.

use super::visibility_graph::{ProbeVisibilityGraph, ProbeVisibilityTester};
use crate::probe::ProbeBatch;
use crate::scene::Scene;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A path through the probe graph, as a sequence of intermediate probe
/// indices between `start` and `end`.
///
/// Paths compare lexicographically by node sequence, with invalid paths
/// sorting before valid ones; the path baker relies on this to deduplicate
/// storage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProbePath {
    pub valid: bool,
    pub start: i32,
    pub end: i32,
    pub nodes: Vec<i32>,
}

impl ProbePath {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            start: -1,
            end: -1,
            nodes: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.valid = false;
        self.start = -1;
        self.end = -1;
        self.nodes.clear();
    }
}

impl Ord for ProbePath {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.valid, other.valid) {
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            _ => self.nodes.cmp(&other.nodes),
        }
    }
}

impl PartialOrd for ProbePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Copy, Clone)]
struct QueueEntry {
    node_index: i32,
    cost: f32,
}

// BinaryHeap is a max-heap; order by descending cost to pop the cheapest.
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.cost.total_cmp(&self.cost)
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}

impl Eq for QueueEntry {}

/// Searches the probe visibility graph for shortest paths.
///
/// Holds per-instance scratch arrays; bakers create one finder per worker
/// thread.
#[derive(Debug)]
pub struct PathFinder {
    parents: Vec<i32>,
    costs: Vec<f32>,
    queue: BinaryHeap<QueueEntry>,
}

impl PathFinder {
    pub fn new(num_probes: usize) -> Self {
        Self {
            parents: vec![-1; num_probes],
            costs: vec![f32::INFINITY; num_probes],
            queue: BinaryHeap::with_capacity(2 * num_probes),
        }
    }

    /// Dijkstra's algorithm from `start`, bounded by `path_range`: fills
    /// `paths[i]` with the shortest path from `start` to probe `i` for every
    /// probe.
    pub fn find_all_shortest_paths(
        &mut self,
        probes: &ProbeBatch,
        vis_graph: &ProbeVisibilityGraph,
        start: usize,
        path_range: f32,
        paths: &mut [ProbePath],
    ) {
        let num_probes = probes.num_probes();
        assert_eq!(paths.len(), num_probes);

        self.parents.fill(-1);
        self.costs.fill(f32::INFINITY);
        self.costs[start] = 0.0;

        self.queue.clear();
        self.queue.push(QueueEntry {
            node_index: start as i32,
            cost: 0.0,
        });

        while let Some(entry) = self.queue.pop() {
            let u = entry.node_index as usize;

            for edge in vis_graph.edges(u) {
                let v = edge.index as usize;
                let new_cost = self.costs[u] + edge.cost;

                if new_cost > path_range {
                    continue;
                }

                if new_cost < self.costs[v] {
                    self.costs[v] = new_cost;
                    self.parents[v] = u as i32;

                    self.queue.push(QueueEntry {
                        node_index: edge.index,
                        cost: new_cost,
                    });
                }
            }
        }

        for (i, path) in paths.iter_mut().enumerate() {
            path.nodes.clear();
            path.start = start as i32;
            path.end = i as i32;

            if self.parents[i] >= 0 {
                path.valid = true;

                let mut parent = self.parents[i];
                while parent >= 0 && parent != start as i32 {
                    path.nodes.push(parent);
                    parent = self.parents[parent as usize];
                }

                path.nodes.reverse();
            } else {
                path.valid = false;
            }
        }
    }

    /// A* with a Euclidean heuristic from `start` to `end`.
    ///
    /// With `real_time_vis`, each candidate edge is re-tested against the
    /// live scene, to route around dynamic occluders. With `simplify_path`,
    /// a greedy pass elides middle nodes whose neighbors see each other.
    #[allow(clippy::too_many_arguments)]
    pub fn find_shortest_path(
        &mut self,
        scene: &Scene,
        probes: &ProbeBatch,
        vis_graph: &ProbeVisibilityGraph,
        vis_tester: &ProbeVisibilityTester,
        start: usize,
        end: usize,
        radius: f32,
        threshold: f32,
        simplify_path: bool,
        real_time_vis: bool,
    ) -> ProbePath {
        let mut result = ProbePath {
            valid: false,
            start: start as i32,
            end: end as i32,
            nodes: Vec::new(),
        };

        let probe_distance = |from: usize, to: usize| -> f32 {
            (probes.probe(from).influence.center - probes.probe(to).influence.center).length()
        };

        self.parents.fill(-1);
        self.costs.fill(f32::INFINITY);
        self.costs[start] = 0.0;

        self.queue.clear();
        self.queue.push(QueueEntry {
            node_index: start as i32,
            cost: 0.0,
        });

        while let Some(entry) = self.queue.pop() {
            let u = entry.node_index as usize;

            if u == end {
                break;
            }

            for edge in vis_graph.edges(u) {
                let v = edge.index as usize;
                let new_cost = self.costs[u] + edge.cost;

                if new_cost < self.costs[v] {
                    if real_time_vis
                        && !vis_tester.are_probes_visible(scene, probes, u, v, radius, threshold)
                    {
                        continue;
                    }

                    self.costs[v] = new_cost;
                    self.parents[v] = u as i32;

                    self.queue.push(QueueEntry {
                        node_index: edge.index,
                        cost: new_cost + probe_distance(v, end),
                    });
                }
            }
        }

        if self.parents[end] < 0 {
            return result;
        }

        if simplify_path {
            self.simplify_path(
                scene,
                probes,
                vis_graph,
                vis_tester,
                start,
                end,
                radius,
                threshold,
                real_time_vis,
            );
        }

        let mut parent = self.parents[end];
        while parent >= 0 {
            result.nodes.insert(0, parent);
            parent = self.parents[parent as usize];
        }

        // The start node itself is not an intermediate node.
        if result.nodes.first() == Some(&(start as i32)) {
            result.nodes.remove(0);
        }

        result.valid = true;
        result
    }

    /// Greedily elides a middle node whenever its predecessor and successor
    /// can see each other.
    #[allow(clippy::too_many_arguments)]
    fn simplify_path(
        &mut self,
        scene: &Scene,
        probes: &ProbeBatch,
        vis_graph: &ProbeVisibilityGraph,
        vis_tester: &ProbeVisibilityTester,
        start: usize,
        end: usize,
        radius: f32,
        threshold: f32,
        real_time_vis: bool,
    ) {
        let mut current = end as i32;
        while current != start as i32 && current >= 0 {
            loop {
                let parent = self.parents[current as usize];
                if parent < 0 {
                    break;
                }

                let grandparent = self.parents[parent as usize];
                if grandparent < 0 {
                    break;
                }

                let visible = if real_time_vis {
                    vis_tester.are_probes_visible(
                        scene,
                        probes,
                        current as usize,
                        grandparent as usize,
                        radius,
                        threshold,
                    )
                } else {
                    vis_graph.has_edge(current as usize, grandparent as usize)
                };

                if !visible {
                    break;
                }

                self.parents[current as usize] = grandparent;
            }

            current = self.parents[current as usize];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Sphere, Vector3};
    use crate::path::visibility_graph::VisibilityEdge;

    fn chain_probes(count: usize) -> ProbeBatch {
        let mut batch = ProbeBatch::new();
        for i in 0..count {
            batch.add_probe(Sphere::new(Vector3::new(i as f32, 0.0, 0.0), 1.0));
        }
        batch.commit();
        batch
    }

    /// A visibility graph that is an open chain 0 - 1 - 2 - ... - (n-1).
    fn chain_graph(count: usize) -> ProbeVisibilityGraph {
        let mut graph = ProbeVisibilityGraph::default();
        for i in 0..count {
            let mut edges = Vec::new();
            if i > 0 {
                edges.push(VisibilityEdge {
                    index: i as i32 - 1,
                    cost: 1.0,
                });
            }
            if i + 1 < count {
                edges.push(VisibilityEdge {
                    index: i as i32 + 1,
                    cost: 1.0,
                });
            }
            graph.push_node_for_test(edges);
        }
        graph
    }

    #[test]
    fn test_dijkstra_on_chain() {
        let probes = chain_probes(4);
        let graph = chain_graph(4);
        let mut finder = PathFinder::new(4);

        let mut paths = vec![ProbePath::default(); 4];
        finder.find_all_shortest_paths(&probes, &graph, 0, f32::MAX, &mut paths);

        assert!(paths[3].valid);
        assert_eq!(paths[3].nodes, vec![1, 2]);
        assert!(paths[1].valid);
        assert!(paths[1].nodes.is_empty());
        assert!(!paths[0].valid);
    }

    #[test]
    fn test_path_range_bounds_search() {
        let probes = chain_probes(4);
        let graph = chain_graph(4);
        let mut finder = PathFinder::new(4);

        let mut paths = vec![ProbePath::default(); 4];
        finder.find_all_shortest_paths(&probes, &graph, 0, 1.5, &mut paths);

        assert!(paths[1].valid);
        assert!(!paths[3].valid);
    }

    #[test]
    fn test_astar_matches_dijkstra_on_chain() {
        let probes = chain_probes(5);
        let graph = chain_graph(5);
        let mut finder = PathFinder::new(5);

        let scene = Scene::new();
        let tester = ProbeVisibilityTester::new(1, false, -Vector3::UNIT_Y);

        let path =
            finder.find_shortest_path(&scene, &probes, &graph, &tester, 0, 4, 0.1, 0.5, false, false);

        assert!(path.valid);
        assert_eq!(path.nodes, vec![1, 2, 3]);
    }

    #[test]
    fn test_invalid_paths_sort_first() {
        let invalid = ProbePath::invalid();
        let mut valid = ProbePath::invalid();
        valid.valid = true;
        valid.nodes = vec![0];

        assert!(invalid < valid);
    }
}
