//! A bounding-volume tree over probe influence spheres, for O(log n)
//! containment queries.

use super::Probe;
use crate::geometry::{Aabb, Vector3};
use crate::scene::bvh::FixedStack;

const LOOKUP_STACK_SIZE: usize = 128;

/// A node in a probe tree. Leaves hold a probe index; internal nodes hold
/// the offset to their left child, the split axis, and the split coordinate
/// used to order traversal.
#[derive(Debug, Default, Copy, Clone)]
struct ProbeTreeNode {
    aabb: Aabb,
    data: i32,
    split_coordinate: f32,
}

impl ProbeTreeNode {
    fn is_leaf(&self) -> bool {
        self.data & 3 == 3
    }

    fn split_axis(&self) -> usize {
        (self.data & 3) as usize
    }

    fn index_data(&self) -> i32 {
        self.data >> 2
    }

    fn set_probe_index(&mut self, probe_index: i32) {
        self.data = (probe_index << 2) | 3;
    }

    fn set_internal_node_data(&mut self, child_offset: i32, split_axis: i32) {
        self.data = (child_offset << 2) | split_axis;
    }
}

/// A median-split bounding-volume tree over probe influence spheres.
#[derive(Debug, Default)]
pub struct ProbeTree {
    nodes: Vec<ProbeTreeNode>,
}

#[derive(Debug, Default, Copy, Clone)]
struct ConstructionTask {
    node_index: i32,
    start_index: i32,
    end_index: i32,
    left_child_index: i32,
}

impl ProbeTree {
    pub fn new(probes: &[Probe]) -> Self {
        if probes.is_empty() {
            return Self::default();
        }

        let num_probes = probes.len();
        let mut nodes = vec![ProbeTreeNode::default(); 2 * num_probes - 1];

        let mut leaf_indices: Vec<i32> = (0..num_probes as i32).collect();
        let mut leaf_bounds = Vec::with_capacity(num_probes);
        for probe in probes {
            let delta = Vector3::new(1.0, 1.0, 1.0) * probe.influence.radius;
            leaf_bounds.push(Aabb::new(
                probe.influence.center - delta,
                probe.influence.center + delta,
            ));
        }

        let mut centroids: Vec<(f32, i32)> = vec![(0.0, 0); num_probes];

        let mut stack = FixedStack::<ConstructionTask, LOOKUP_STACK_SIZE>::new();
        let mut task = ConstructionTask {
            node_index: 0,
            start_index: 0,
            end_index: num_probes as i32 - 1,
            left_child_index: 1,
        };

        loop {
            if task.start_index == task.end_index {
                let leaf = leaf_indices[task.start_index as usize];
                nodes[task.node_index as usize].aabb = leaf_bounds[leaf as usize];
                nodes[task.node_index as usize].set_probe_index(leaf);

                if stack.is_empty() {
                    break;
                }

                task = stack.pop();
            } else {
                let mut bounds = Aabb::EMPTY;
                for i in task.start_index..=task.end_index {
                    bounds.grow_to_contain(&leaf_bounds[leaf_indices[i as usize] as usize]);
                }
                nodes[task.node_index as usize].aabb = bounds;

                let split_axis = bounds.extents().index_of_max_component();
                let split_index = (task.end_index - task.start_index + 1) / 2;

                for i in task.start_index..=task.end_index {
                    let leaf = leaf_indices[i as usize];
                    centroids[i as usize] = (
                        probes[leaf as usize].influence.center.element(split_axis),
                        leaf,
                    );
                }

                centroids[task.start_index as usize..=task.end_index as usize]
                    .sort_by(|a, b| a.0.total_cmp(&b.0));

                for i in task.start_index..=task.end_index {
                    leaf_indices[i as usize] = centroids[i as usize].1;
                }

                let split_coordinate = centroids[(task.start_index + split_index) as usize].0;

                nodes[task.node_index as usize]
                    .set_internal_node_data(task.left_child_index - task.node_index, split_axis as i32);
                nodes[task.node_index as usize].split_coordinate = split_coordinate;

                stack.push(ConstructionTask {
                    node_index: task.left_child_index + 1,
                    start_index: task.start_index + split_index,
                    end_index: task.end_index,
                    left_child_index: task.left_child_index + 2 * split_index,
                });
                task = ConstructionTask {
                    node_index: task.left_child_index,
                    start_index: task.start_index,
                    end_index: task.start_index + split_index - 1,
                    left_child_index: task.left_child_index + 2,
                };
            }
        }

        Self { nodes }
    }

    /// Writes the indices of up to `probe_indices.len()` probes whose
    /// influence spheres contain `point`; remaining slots are set to -1.
    pub fn get_influencing_probes(
        &self,
        point: Vector3,
        probes: &[Probe],
        probe_indices: &mut [i32],
    ) {
        probe_indices.fill(-1);

        if self.nodes.is_empty() {
            return;
        }

        let max_influencing = probe_indices.len();
        let mut num_influencing = 0;

        let mut stack = FixedStack::<i32, LOOKUP_STACK_SIZE>::new();
        let mut node_index = 0i32;

        loop {
            let node = &self.nodes[node_index as usize];

            if node.aabb.contains(point) {
                if node.is_leaf() {
                    let probe_index = node.index_data();
                    if probes[probe_index as usize].influence.contains(point) {
                        probe_indices[num_influencing] = probe_index;
                        num_influencing += 1;
                        if num_influencing >= max_influencing {
                            break;
                        }
                    }
                } else {
                    let mut near_offset = node.index_data();
                    let mut far_offset = near_offset + 1;
                    if point.element(node.split_axis()) > node.split_coordinate {
                        std::mem::swap(&mut near_offset, &mut far_offset);
                    }

                    stack.push(node_index + far_offset);
                    node_index += near_offset;
                    continue;
                }
            }

            if stack.is_empty() {
                break;
            }

            node_index = stack.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Sphere;

    fn probe_at(x: f32, y: f32, z: f32, radius: f32) -> Probe {
        Probe {
            influence: Sphere::new(Vector3::new(x, y, z), radius),
        }
    }

    #[test]
    fn test_containment_query() {
        let probes = vec![
            probe_at(0.0, 0.0, 0.0, 2.0),
            probe_at(10.0, 0.0, 0.0, 2.0),
            probe_at(0.0, 10.0, 0.0, 2.0),
            probe_at(-10.0, 0.0, 0.0, 2.0),
        ];
        let tree = ProbeTree::new(&probes);

        let mut indices = [-1i32; 8];
        tree.get_influencing_probes(Vector3::new(0.5, 0.0, 0.0), &probes, &mut indices);

        assert_eq!(indices.iter().filter(|&&i| i >= 0).count(), 1);
        assert_eq!(indices[0], 0);
    }

    #[test]
    fn test_all_probes_found_with_large_radii() {
        let probes: Vec<Probe> = (0..5)
            .map(|i| probe_at(i as f32 * 3.0, 0.0, 0.0, 1e9))
            .collect();
        let tree = ProbeTree::new(&probes);

        let mut indices = [-1i32; 8];
        tree.get_influencing_probes(Vector3::ZERO, &probes, &mut indices);

        let mut found: Vec<i32> = indices.iter().copied().filter(|&i| i >= 0).collect();
        found.sort();
        assert_eq!(found, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_point_outside_all_probes() {
        let probes = vec![probe_at(0.0, 0.0, 0.0, 1.0)];
        let tree = ProbeTree::new(&probes);

        let mut indices = [-1i32; 8];
        tree.get_influencing_probes(Vector3::new(5.0, 0.0, 0.0), &probes, &mut indices);

        assert!(indices.iter().all(|&i| i == -1));
    }
}
