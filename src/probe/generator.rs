//! Probe generation.

use super::Probe;
use crate::geometry::{Aabb, Matrix4x4, Ray, Sphere, Vector3};
use crate::scene::Scene;

/// Strategies for generating probes over a scene.
#[derive(Debug, Clone)]
pub enum ProbeGenerationParams {
    /// Generates probes on a horizontal grid above walkable surfaces.
    ///
    /// Rays are cast downward through the scene on a grid with the given
    /// spacing; a probe is placed `height` above each surface a ray passes
    /// through, with a radius of influence equal to the spacing.
    UniformFloor {
        /// Grid spacing, in meters.
        spacing: f32,

        /// Height above each surface at which probes are placed, in meters.
        height: f32,

        /// Transform describing the volume to fill with probes. The unit
        /// cube in the transform's local space is mapped to the target
        /// volume; use [`Matrix4x4::IDENTITY`] to cover the whole scene.
        transform: Matrix4x4,
    },

    /// Generates probes at the centers of empty cells of an octree
    /// subdivision of the scene.
    Octree {
        /// The maximum subdivision depth.
        max_depth: u32,
    },
}

pub(super) fn generate(scene: &Scene, params: &ProbeGenerationParams) -> Vec<Probe> {
    match params {
        ProbeGenerationParams::UniformFloor {
            spacing,
            height,
            transform,
        } => generate_uniform_floor(scene, *spacing, *height, transform),
        ProbeGenerationParams::Octree { max_depth } => generate_octree(scene, *max_depth),
    }
}

fn generate_uniform_floor(
    scene: &Scene,
    spacing: f32,
    height: f32,
    transform: &Matrix4x4,
) -> Vec<Probe> {
    let spacing = spacing.max(1e-3);

    // The generation volume is the scene's bounds, optionally intersected
    // with the transformed unit cube.
    let mut bounds = scene.bounds();
    let mut volume = None;
    if *transform != Matrix4x4::IDENTITY {
        let mut transformed = Aabb::EMPTY;
        for corner in 0..8 {
            let local = Vector3::new(
                if corner & 1 != 0 { 0.5 } else { -0.5 },
                if corner & 2 != 0 { 0.5 } else { -0.5 },
                if corner & 4 != 0 { 0.5 } else { -0.5 },
            );
            transformed.grow_to_contain_point(transform.transform_point(local));
        }

        bounds = Aabb::new(
            Vector3::max(bounds.min_coordinates, transformed.min_coordinates),
            Vector3::min(bounds.max_coordinates, transformed.max_coordinates),
        );
        volume = Some(transformed);
    }

    let extents = bounds.extents();
    if extents.x <= 0.0 || extents.z <= 0.0 {
        return Vec::new();
    }

    let num_x = (extents.x / spacing).ceil() as usize + 1;
    let num_z = (extents.z / spacing).ceil() as usize + 1;

    let mut probes = Vec::new();

    for ix in 0..num_x {
        for iz in 0..num_z {
            let x = bounds.min_coordinates.x + ix as f32 * spacing;
            let z = bounds.min_coordinates.z + iz as f32 * spacing;

            // Walk downward through all floors below this grid cell.
            let mut origin = Vector3::new(x, bounds.max_coordinates.y + height, z);
            loop {
                let ray = Ray::new(origin, Vector3::new(0.0, -1.0, 0.0));
                let hit = scene.closest_hit(&ray, 1e-3, f32::MAX);
                if !hit.is_valid() {
                    break;
                }

                let floor_point = ray.point_at_distance(hit.distance);
                let center = floor_point + Vector3::new(0.0, height, 0.0);

                if volume.is_none_or(|volume| volume.contains(center)) {
                    probes.push(Probe {
                        influence: Sphere::new(center, spacing),
                    });
                }

                origin = floor_point - Vector3::new(0.0, 1e-2, 0.0);
                if origin.y < bounds.min_coordinates.y {
                    break;
                }
            }
        }
    }

    probes
}

fn generate_octree(scene: &Scene, max_depth: u32) -> Vec<Probe> {
    let bounds = scene.bounds();
    if bounds.extents().x <= 0.0 {
        return Vec::new();
    }

    // Pad the bounds so the air around the geometry is part of the
    // subdivision; flat scenes would otherwise have no empty cells at all.
    let padding = 0.1 * bounds.extents().length() + 1.0;
    let pad = Vector3::new(padding, padding, padding);
    let bounds = Aabb::new(bounds.min_coordinates - pad, bounds.max_coordinates + pad);

    let mut probes = Vec::new();
    subdivide(scene, &bounds, max_depth, &mut probes);
    probes
}

fn subdivide(scene: &Scene, cell: &Aabb, depth_remaining: u32, probes: &mut Vec<Probe>) {
    if !scene.box_intersects_geometry(cell) {
        // Empty cell: place a probe covering it.
        let radius = cell.extents().length() * 0.5;
        probes.push(Probe {
            influence: Sphere::new(cell.center(), radius),
        });
        return;
    }

    if depth_remaining == 0 {
        return;
    }

    let center = cell.center();
    for octant in 0..8 {
        let min = Vector3::new(
            if octant & 1 != 0 {
                center.x
            } else {
                cell.min_coordinates.x
            },
            if octant & 2 != 0 {
                center.y
            } else {
                cell.min_coordinates.y
            },
            if octant & 4 != 0 {
                center.z
            } else {
                cell.min_coordinates.z
            },
        );
        let max = Vector3::new(
            if octant & 1 != 0 {
                cell.max_coordinates.x
            } else {
                center.x
            },
            if octant & 2 != 0 {
                cell.max_coordinates.y
            } else {
                center.y
            },
            if octant & 4 != 0 {
                cell.max_coordinates.z
            } else {
                center.z
            },
        );

        subdivide(scene, &Aabb::new(min, max), depth_remaining - 1, probes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Material, Triangle};
    use crate::probe::ProbeArray;
    use crate::scene::{StaticMesh, StaticMeshSettings};
    use std::sync::Arc;

    fn floor_scene() -> Scene {
        let mesh = StaticMesh::try_new(&StaticMeshSettings {
            vertices: &[
                Vector3::new(-8.0, 0.0, -8.0),
                Vector3::new(8.0, 0.0, -8.0),
                Vector3::new(8.0, 0.0, 8.0),
                Vector3::new(-8.0, 0.0, 8.0),
            ],
            triangles: &[Triangle::new(0, 1, 2), Triangle::new(0, 2, 3)],
            material_indices: &[0, 0],
            materials: &[Material::CONCRETE],
        })
        .unwrap();

        let mut scene = Scene::new();
        scene.add_static_mesh(Arc::new(mesh));
        scene.commit();
        scene
    }

    #[test]
    fn test_uniform_floor_generation() {
        let scene = floor_scene();

        let mut array = ProbeArray::new();
        array.generate_probes(
            &scene,
            &ProbeGenerationParams::UniformFloor {
                spacing: 4.0,
                height: 1.5,
                transform: Matrix4x4::IDENTITY,
            },
        );

        assert!(array.num_probes() > 0);

        for probe in &array.probes {
            approx::assert_relative_eq!(probe.influence.center.y, 1.5, epsilon = 1e-3);
            assert_eq!(probe.influence.radius, 4.0);
        }
    }

    #[test]
    fn test_octree_generation_covers_empty_space() {
        let scene = floor_scene();

        let mut array = ProbeArray::new();
        array.generate_probes(&scene, &ProbeGenerationParams::Octree { max_depth: 3 });

        assert!(array.num_probes() > 0);
    }
}
