//! A bounding volume hierarchy over mesh triangles.

use crate::geometry::{Aabb, Hit, Mesh, Ray, Vector3};

/// Maximum recursion depth during BVH construction and traversal. Deeper
/// trees indicate degenerate geometry and are a fatal error.
const STACK_DEPTH: usize = 128;

/// A fixed-capacity stack used for iterative tree construction and traversal.
pub(crate) struct FixedStack<T: Copy + Default, const N: usize> {
    entries: [T; N],
    top: usize,
}

impl<T: Copy + Default, const N: usize> FixedStack<T, N> {
    pub fn new() -> Self {
        Self {
            entries: [T::default(); N],
            top: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.top == 0
    }

    pub fn push(&mut self, value: T) {
        assert!(self.top < N, "BVH stack overflow");
        self.entries[self.top] = value;
        self.top += 1;
    }

    pub fn pop(&mut self) -> T {
        self.top -= 1;
        self.entries[self.top]
    }
}

/// A node in a BVH.
///
/// All the information required to represent a node is compactly stored in 32
/// bytes: the bounding box, plus a data word whose low two bits distinguish
/// the node kind (3 = leaf, otherwise the split axis) and whose high 30 bits
/// hold either a triangle index (leaf) or the offset from this node to its
/// left child (internal). The right child is always stored immediately after
/// the left child.
#[derive(Debug, Default, Copy, Clone)]
#[repr(C)]
pub struct BvhNode {
    min_coordinates: [f32; 3],
    data: i32,
    max_coordinates: [f32; 3],
    split_coordinate: f32,
}

impl BvhNode {
    pub fn is_leaf(&self) -> bool {
        self.split_axis() == 3
    }

    pub fn split_axis(&self) -> i32 {
        self.data & 3
    }

    /// For leaf nodes, the triangle index; for internal nodes, the offset to
    /// the left child.
    pub fn index_data(&self) -> i32 {
        self.data >> 2
    }

    fn set_triangle_index(&mut self, triangle_index: i32) {
        self.data = (triangle_index << 2) | 3;
    }

    fn set_internal_node_data(&mut self, child_offset: i32, split_axis: i32) {
        self.data = (child_offset << 2) | split_axis;
    }

    pub fn bounding_box(&self) -> Aabb {
        Aabb::new(
            Vector3::from(self.min_coordinates),
            Vector3::from(self.max_coordinates),
        )
    }

    fn set_bounding_box(&mut self, aabb: &Aabb) {
        self.min_coordinates = [
            aabb.min_coordinates.x,
            aabb.min_coordinates.y,
            aabb.min_coordinates.z,
        ];
        self.max_coordinates = [
            aabb.max_coordinates.x,
            aabb.max_coordinates.y,
            aabb.max_coordinates.z,
        ];
    }

    pub(crate) fn split_coordinate(&self) -> f32 {
        self.split_coordinate
    }

    pub(crate) fn set_split_coordinate(&mut self, coordinate: f32) {
        self.split_coordinate = coordinate;
    }
}

/// A single coordinate of a leaf centroid, tagged with the leaf it belongs
/// to. Used when sorting leaves along an axis.
#[derive(Debug, Default, Copy, Clone)]
struct CentroidCoordinate {
    coordinate: f32,
    leaf_index: i32,
}

/// A split of a contiguous range of leaves into two subranges.
#[derive(Debug, Copy, Clone)]
struct Split {
    index: i32,
    axis: i32,
}

#[derive(Debug, Default, Copy, Clone)]
struct ConstructionTask {
    output_node_index: i32,
    start_index: i32,
    end_index: i32,
    left_child_index: i32,
}

#[derive(Debug, Default, Copy, Clone)]
struct TraversalTask {
    node_index: i32,
    t_min: f32,
    t_max: f32,
}

/// A bounding volume hierarchy consisting of axis-aligned bounding boxes.
#[derive(Debug)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
}

impl Bvh {
    /// Builds a BVH over the triangles of a mesh.
    pub fn new(mesh: &Mesh) -> Self {
        assert!(mesh.num_triangles() > 0);

        let num_triangles = mesh.num_triangles();
        let mut bvh = Self {
            nodes: vec![BvhNode::default(); 2 * num_triangles - 1],
        };

        bvh.build(mesh);

        log::debug!(
            "built bvh: {} triangles, {} nodes",
            num_triangles,
            bvh.nodes.len()
        );

        bvh
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, index: usize) -> &BvhNode {
        &self.nodes[index]
    }

    fn build(&mut self, mesh: &Mesh) {
        let num_triangles = mesh.num_triangles();

        // leaf_indices stores triangle indices in left-to-right order as they
        // appear in the final tree. Subranges are permuted as nodes split.
        let mut leaf_indices: Vec<i32> = (0..num_triangles as i32).collect();

        let mut leaf_bounds = vec![Aabb::EMPTY; num_triangles];
        for (i, bounds) in leaf_bounds.iter_mut().enumerate() {
            for vertex in 0..3 {
                bounds.grow_to_contain_point(mesh.triangle_vertex(i, vertex));
            }
        }

        let leaf_centers: Vec<Vector3> = leaf_bounds.iter().map(|b| b.center()).collect();

        // One centroid array per axis, each sorted independently during SAH
        // evaluation.
        let mut centroids = [
            vec![CentroidCoordinate::default(); num_triangles],
            vec![CentroidCoordinate::default(); num_triangles],
            vec![CentroidCoordinate::default(); num_triangles],
        ];
        let mut surface_areas = vec![0.0f32; num_triangles];

        let mut stack = FixedStack::<ConstructionTask, STACK_DEPTH>::new();
        let mut task = ConstructionTask {
            output_node_index: 0,
            start_index: 0,
            end_index: num_triangles as i32 - 1,
            left_child_index: 1,
        };

        loop {
            if task.start_index == task.end_index {
                let leaf = leaf_indices[task.start_index as usize];
                let node = &mut self.nodes[task.output_node_index as usize];
                node.set_bounding_box(&leaf_bounds[leaf as usize]);
                node.set_triangle_index(leaf);

                if stack.is_empty() {
                    break;
                }

                task = stack.pop();
            } else {
                let mut bounding_box = Aabb::EMPTY;
                for i in task.start_index..=task.end_index {
                    bounding_box.grow_to_contain(&leaf_bounds[leaf_indices[i as usize] as usize]);
                }

                self.nodes[task.output_node_index as usize].set_bounding_box(&bounding_box);

                for i in task.start_index..=task.end_index {
                    let leaf = leaf_indices[i as usize];
                    let center = leaf_centers[leaf as usize];
                    for (axis, centroids_for_axis) in centroids.iter_mut().enumerate() {
                        centroids_for_axis[i as usize] = CentroidCoordinate {
                            coordinate: center.element(axis),
                            leaf_index: leaf,
                        };
                    }
                }

                let split = Self::best_split(
                    &leaf_bounds,
                    &mut leaf_indices,
                    &mut centroids,
                    &mut surface_areas,
                    &bounding_box,
                    task.start_index,
                    task.end_index,
                );

                self.nodes[task.output_node_index as usize].set_internal_node_data(
                    task.left_child_index - task.output_node_index,
                    split.axis,
                );

                // Push the right child; continue with the left child.
                stack.push(ConstructionTask {
                    output_node_index: task.left_child_index + 1,
                    start_index: task.start_index + split.index,
                    end_index: task.end_index,
                    left_child_index: task.left_child_index + 2 * split.index,
                });
                task = ConstructionTask {
                    output_node_index: task.left_child_index,
                    start_index: task.start_index,
                    end_index: task.start_index + split.index - 1,
                    left_child_index: task.left_child_index + 2,
                };
            }
        }
    }

    /// Finds the best split for an internal node: SAH first, with an object
    /// median split along the longest extent as the fallback for degenerate
    /// nodes.
    fn best_split(
        leaf_bounds: &[Aabb],
        leaf_indices: &mut [i32],
        centroids: &mut [Vec<CentroidCoordinate>; 3],
        surface_areas: &mut [f32],
        bounding_box: &Aabb,
        start_index: i32,
        end_index: i32,
    ) -> Split {
        let split = Self::sah_split(
            leaf_bounds,
            leaf_indices,
            centroids,
            surface_areas,
            bounding_box,
            start_index,
            end_index,
        );

        if split.axis == -1 {
            return Self::median_split(leaf_indices, centroids, bounding_box, start_index, end_index);
        }

        split
    }

    fn median_split(
        leaf_indices: &mut [i32],
        centroids: &[Vec<CentroidCoordinate>; 3],
        bounding_box: &Aabb,
        start_index: i32,
        end_index: i32,
    ) -> Split {
        let split_axis = bounding_box.extents().index_of_max_component();
        let split_index = (end_index - start_index + 1) / 2;

        for i in start_index..=end_index {
            leaf_indices[i as usize] = centroids[split_axis][i as usize].leaf_index;
        }

        Split {
            index: split_index,
            axis: split_axis as i32,
        }
    }

    fn sah_split(
        leaf_bounds: &[Aabb],
        leaf_indices: &mut [i32],
        centroids: &mut [Vec<CentroidCoordinate>; 3],
        surface_areas: &mut [f32],
        bounding_box: &Aabb,
        start_index: i32,
        end_index: i32,
    ) -> Split {
        let start = start_index as usize;
        let end = end_index as usize;

        let parent_surface_area = bounding_box.surface_area();
        let mut best_cost = f32::MAX;
        let mut split = Split {
            index: -1,
            axis: -1,
        };

        for (axis, centroids_for_axis) in centroids.iter_mut().enumerate() {
            let mut best_balance_cost = i32::MAX;

            // Sort the leaves in this range by centroid coordinate.
            centroids_for_axis[start..=end].sort_by(|a, b| {
                a.coordinate
                    .partial_cmp(&b.coordinate)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            // Prefix sweep: surface area of the left child for each split.
            let mut left_box = Aabb::EMPTY;
            for index in start..end {
                left_box
                    .grow_to_contain(&leaf_bounds[centroids_for_axis[index].leaf_index as usize]);
                surface_areas[index] = left_box.surface_area();
            }

            // Suffix sweep: surface area of the right child, and the SAH cost
            // of each candidate split.
            let mut right_box = Aabb::EMPTY;
            let mut num_left = (end - start) as i32;
            let mut num_right = 1;
            for index in (start + 1..=end).rev() {
                right_box
                    .grow_to_contain(&leaf_bounds[centroids_for_axis[index].leaf_index as usize]);
                let cost = Self::sah_cost(
                    surface_areas[index - 1],
                    num_left,
                    right_box.surface_area(),
                    num_right,
                    parent_surface_area,
                );

                if cost < best_cost {
                    best_cost = cost;
                    split = Split {
                        index: num_left,
                        axis: axis as i32,
                    };
                } else if cost == best_cost {
                    // Break ties by preferring the more balanced split.
                    let balance_cost = (num_left - (end - start + 1) as i32 / 2).abs();
                    if balance_cost < best_balance_cost {
                        best_balance_cost = balance_cost;
                        split = Split {
                            index: num_left,
                            axis: axis as i32,
                        };
                    }
                }

                num_left -= 1;
                num_right += 1;
            }
        }

        // Permute the leaf indices into the sorted order of the chosen axis.
        if split.axis >= 0 {
            for i in start..=end {
                leaf_indices[i] = centroids[split.axis as usize][i].leaf_index;
            }
        }

        split
    }

    fn sah_cost(
        left_surface_area: f32,
        num_left: i32,
        right_surface_area: f32,
        num_right: i32,
        parent_surface_area: f32,
    ) -> f32 {
        (left_surface_area * num_left as f32 + right_surface_area * num_right as f32)
            / parent_surface_area
    }

    /// Calculates the first intersection between a ray and any triangle in
    /// the BVH.
    pub fn closest_hit(&self, ray: &Ray, mesh: &Mesh, min_distance: f32, max_distance: f32) -> Hit {
        let mut hit = Hit::default();

        let reciprocal_direction = ray.reciprocal_direction();
        let direction_signs = ray.direction_signs();

        let mut stack = FixedStack::<TraversalTask, STACK_DEPTH>::new();
        let mut task = TraversalTask {
            node_index: 0,
            t_min: min_distance,
            t_max: max_distance,
        };

        loop {
            let node = &self.nodes[task.node_index as usize];

            if let Some((t_min, t_max)) = ray.intersect_aabb(
                &node.bounding_box(),
                reciprocal_direction,
                &direction_signs,
                task.t_min,
                task.t_max,
            ) {
                if node.is_leaf() {
                    let t = ray.intersect_triangle(mesh, node.index_data() as usize);
                    if min_distance <= t && t < hit.distance {
                        hit.distance = t;
                        hit.triangle_index = node.index_data();
                    }
                } else {
                    // Descend into the near child first; push the far child
                    // with the clipped interval.
                    let left_child_offset = node.index_data();
                    let split_axis = node.split_axis() as usize;
                    stack.push(TraversalTask {
                        node_index: task.node_index
                            + left_child_offset
                            + direction_signs[split_axis] as i32,
                        t_min,
                        t_max,
                    });
                    task.node_index += left_child_offset + (direction_signs[split_axis] ^ 1) as i32;
                    task.t_min = t_min;
                    task.t_max = t_max;
                    continue;
                }
            }

            if stack.is_empty() {
                break;
            }

            task = stack.pop();
            task.t_max = task.t_max.min(hit.distance);
        }

        hit
    }

    /// Checks whether a ray hits any triangle within the given t interval.
    pub fn any_hit(&self, ray: &Ray, mesh: &Mesh, min_distance: f32, max_distance: f32) -> bool {
        let reciprocal_direction = ray.reciprocal_direction();
        let direction_signs = ray.direction_signs();

        let mut stack = FixedStack::<i32, STACK_DEPTH>::new();
        let mut node_index = 0i32;

        loop {
            let node = &self.nodes[node_index as usize];

            if ray
                .intersect_aabb(
                    &node.bounding_box(),
                    reciprocal_direction,
                    &direction_signs,
                    min_distance,
                    max_distance,
                )
                .is_some()
            {
                if node.is_leaf() {
                    let t = ray.intersect_triangle(mesh, node.index_data() as usize);
                    if min_distance <= t && t < max_distance {
                        return true;
                    }
                } else {
                    let left_child_offset = node.index_data();
                    let split_axis = node.split_axis() as usize;
                    stack.push(node_index + left_child_offset + direction_signs[split_axis] as i32);
                    node_index += left_child_offset + (direction_signs[split_axis] ^ 1) as i32;
                    continue;
                }
            }

            if stack.is_empty() {
                break;
            }

            node_index = stack.pop();
        }

        false
    }

    /// Checks whether the segment between two points is occluded.
    ///
    /// No tolerances are applied at either end point, so a start or end close
    /// to a surface (as happens for reflected or shadow rays) may intersect
    /// the reflecting surface; callers must offset such points.
    pub fn is_occluded(&self, start: Vector3, end: Vector3, mesh: &Mesh) -> bool {
        let distance = (end - start).length();
        if distance == 0.0 {
            return false;
        }

        let ray = Ray::new(start, (end - start) / distance);
        self.any_hit(&ray, mesh, 0.0, distance)
    }

    /// Returns true if the given box contains any geometry.
    pub fn box_intersects_mesh(&self, aabb: &Aabb, mesh: &Mesh) -> bool {
        let mut stack = FixedStack::<i32, STACK_DEPTH>::new();
        let mut node_index = 0i32;

        loop {
            let node = &self.nodes[node_index as usize];

            if Aabb::overlaps(aabb, &node.bounding_box()) {
                if node.is_leaf() {
                    if Self::box_intersects_triangle(aabb, mesh, node.index_data() as usize) {
                        return true;
                    }
                } else {
                    let split_axis = node.split_axis() as usize;

                    let mut near_child_offset = node.index_data();
                    let mut far_child_offset = near_child_offset + 1;
                    if aabb.min_coordinates.element(split_axis)
                        > node.bounding_box().min_coordinates.element(split_axis)
                    {
                        std::mem::swap(&mut near_child_offset, &mut far_child_offset);
                    }

                    stack.push(node_index + far_child_offset);
                    node_index += near_child_offset;
                    continue;
                }
            }

            if stack.is_empty() {
                break;
            }

            node_index = stack.pop();
        }

        false
    }

    /// Separating-axis test between a box and a mesh triangle: the triangle
    /// plane, plus edge-normal projections in the xy, yz, and zx planes.
    fn box_intersects_triangle(aabb: &Aabb, mesh: &Mesh, triangle_index: usize) -> bool {
        let v0 = mesh.triangle_vertex(triangle_index, 0);
        let v1 = mesh.triangle_vertex(triangle_index, 1);
        let v2 = mesh.triangle_vertex(triangle_index, 2);
        let normal = mesh.normal(triangle_index);
        let extents = aabb.extents();

        let mut critical_point_offset = Vector3::ZERO;
        if normal.x > 0.0 {
            critical_point_offset.x = extents.x;
        }
        if normal.y > 0.0 {
            critical_point_offset.y = extents.y;
        }
        if normal.z > 0.0 {
            critical_point_offset.z = extents.z;
        }

        let np = Vector3::dot(normal, aabb.min_coordinates);
        let d1 = Vector3::dot(normal, critical_point_offset - v0);
        let d2 = Vector3::dot(normal, (extents - critical_point_offset) - v0);

        if (np + d1) * (np + d2) > 0.0 {
            return false;
        }

        let e0 = v1 - v0;
        let e1 = v2 - v1;
        let e2 = v0 - v2;

        // For each of the three coordinate planes, test the three edge
        // normals of the projected triangle against the projected box.
        let plane_test = |axis_u: usize, axis_v: usize, flip: f32| -> bool {
            let edges = [e0, e1, e2];
            let verts = [v0, v1, v2];

            for (edge, vert) in edges.iter().zip(verts.iter()) {
                let nu = -edge.element(axis_v) * flip;
                let nv = edge.element(axis_u) * flip;

                let d = -(nu * vert.element(axis_u) + nv * vert.element(axis_v))
                    + (extents.element(axis_u) * nu).max(0.0)
                    + (extents.element(axis_v) * nv).max(0.0);

                let p = nu * aabb.min_coordinates.element(axis_u)
                    + nv * aabb.min_coordinates.element(axis_v);

                if p + d < 0.0 {
                    return false;
                }
            }

            true
        };

        let flip_xy = if normal.z < 0.0 { -1.0 } else { 1.0 };
        let flip_yz = if normal.x < 0.0 { -1.0 } else { 1.0 };
        let flip_zx = if normal.y < 0.0 { -1.0 } else { 1.0 };

        plane_test(0, 1, flip_xy) && plane_test(1, 2, flip_yz) && plane_test(2, 0, flip_zx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Triangle;
    use approx::assert_relative_eq;

    fn quad_mesh() -> Mesh {
        // Two triangles forming a unit quad in the z = 0 plane.
        Mesh::new(
            &[
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(1.0, 1.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
            &[Triangle::new(0, 1, 2), Triangle::new(0, 2, 3)],
        )
    }

    fn random_triangle_soup(num_triangles: usize) -> Mesh {
        use rand::{Rng, SeedableRng, rngs::SmallRng};

        let mut rng = SmallRng::seed_from_u64(1729);
        let mut vertices = Vec::new();
        let mut triangles = Vec::new();

        for i in 0..num_triangles {
            let base = Vector3::new(
                rng.gen_range(-10.0..10.0),
                rng.gen_range(-10.0..10.0),
                rng.gen_range(-10.0..10.0),
            );
            vertices.push(base);
            vertices.push(base + Vector3::new(rng.gen_range(0.1..1.0), 0.0, 0.0));
            vertices.push(base + Vector3::new(0.0, rng.gen_range(0.1..1.0), 0.0));
            triangles.push(Triangle::new(
                (3 * i) as u32,
                (3 * i + 1) as u32,
                (3 * i + 2) as u32,
            ));
        }

        Mesh::new(&vertices, &triangles)
    }

    #[test]
    fn test_node_count() {
        let mesh = quad_mesh();
        let bvh = Bvh::new(&mesh);
        assert_eq!(bvh.num_nodes(), 2 * mesh.num_triangles() - 1);
    }

    #[test]
    fn test_children_contained_in_parent() {
        let mesh = random_triangle_soup(64);
        let bvh = Bvh::new(&mesh);

        for i in 0..bvh.num_nodes() {
            let node = bvh.node(i);
            if node.is_leaf() {
                continue;
            }

            let parent = node.bounding_box();
            let left = bvh.node(i + node.index_data() as usize).bounding_box();
            let right = bvh.node(i + node.index_data() as usize + 1).bounding_box();

            for child in [left, right] {
                assert!(parent.contains(child.min_coordinates));
                assert!(parent.contains(child.max_coordinates));
            }
        }
    }

    #[test]
    fn test_closest_hit_matches_geometry() {
        let mesh = quad_mesh();
        let bvh = Bvh::new(&mesh);

        let ray = Ray::new(Vector3::new(0.5, 0.5, 2.0), Vector3::new(0.0, 0.0, -1.0));
        let hit = bvh.closest_hit(&ray, &mesh, 0.0, f32::MAX);

        assert!(hit.is_valid());
        assert_relative_eq!(hit.distance, 2.0, epsilon = 1e-4);

        // The hit point reconstructed from the distance lies on the geometry.
        let point = ray.point_at_distance(hit.distance);
        assert!(point.z.abs() < 1e-4);
    }

    #[test]
    fn test_hit_point_reprojection_error() {
        let mesh = random_triangle_soup(128);
        let bvh = Bvh::new(&mesh);

        use rand::{Rng, SeedableRng, rngs::SmallRng};
        let mut rng = SmallRng::seed_from_u64(42);

        // Bounding diameter of the soup is ~25; the reprojected hit point
        // must land on the triangle plane to within 1e-4 of that scale.
        for _ in 0..256 {
            let origin = Vector3::new(
                rng.gen_range(-15.0..15.0),
                rng.gen_range(-15.0..15.0),
                rng.gen_range(-15.0..15.0),
            );
            let direction = Vector3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            )
            .normalized();
            if direction == Vector3::ZERO {
                continue;
            }

            let ray = Ray::new(origin, direction);
            let hit = bvh.closest_hit(&ray, &mesh, 0.0, f32::MAX);
            if !hit.is_valid() {
                continue;
            }

            let point = ray.point_at_distance(hit.distance);
            let normal = mesh.normal(hit.triangle_index as usize);
            let v0 = mesh.triangle_vertex(hit.triangle_index as usize, 0);
            let plane_distance = Vector3::dot(point - v0, normal).abs();

            assert!(plane_distance < 1e-4 * 25.0);
        }
    }

    #[test]
    fn test_occlusion() {
        let mesh = quad_mesh();
        let bvh = Bvh::new(&mesh);

        assert!(bvh.is_occluded(
            Vector3::new(0.5, 0.5, 1.0),
            Vector3::new(0.5, 0.5, -1.0),
            &mesh
        ));
        assert!(!bvh.is_occluded(
            Vector3::new(0.5, 0.5, 1.0),
            Vector3::new(0.5, 0.5, 0.5),
            &mesh
        ));
        assert!(!bvh.is_occluded(
            Vector3::new(2.0, 2.0, 1.0),
            Vector3::new(2.0, 2.0, -1.0),
            &mesh
        ));
    }

    #[test]
    fn test_box_query() {
        let mesh = quad_mesh();
        let bvh = Bvh::new(&mesh);

        let overlapping = Aabb::new(Vector3::new(0.2, 0.2, -0.1), Vector3::new(0.8, 0.8, 0.1));
        let distant = Aabb::new(Vector3::new(5.0, 5.0, 5.0), Vector3::new(6.0, 6.0, 6.0));

        assert!(bvh.box_intersects_mesh(&overlapping, &mesh));
        assert!(!bvh.box_intersects_mesh(&distant, &mesh));
    }
}
