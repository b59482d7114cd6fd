//! Random sampling utilities for the stochastic simulators.
//!
//! All random streams are seeded `SmallRng` instances, so simulations re-run
//! with the same seed and thread count reproduce their output bit-for-bit.

use crate::geometry::Vector3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Creates a seeded random stream. Worker threads derive their stream from
/// the simulation seed and their thread index.
pub fn seeded_rng(seed: u64) -> SmallRng {
    SmallRng::seed_from_u64(seed)
}

/// A uniformly distributed direction on the unit sphere.
pub fn uniform_sphere(rng: &mut SmallRng) -> Vector3 {
    let u: f32 = rng.r#gen();
    let v: f32 = rng.r#gen();
    direction_from_unit_square(u, v)
}

fn direction_from_unit_square(u: f32, v: f32) -> Vector3 {
    let cos_theta = 1.0 - 2.0 * u;
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let phi = 2.0 * std::f32::consts::PI * v;

    Vector3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta)
}

/// Fills `directions` with stratified samples of the unit sphere: the unit
/// square is divided into a near-square grid of cells, one jittered sample
/// per cell, mapped area-preservingly onto the sphere.
pub fn stratified_sphere_samples(directions: &mut [Vector3], rng: &mut SmallRng) {
    let count = directions.len();
    if count == 0 {
        return;
    }

    let nx = (count as f32).sqrt().floor().max(1.0) as usize;
    let ny = count.div_ceil(nx);

    for (index, direction) in directions.iter_mut().enumerate() {
        let cell_x = index % nx;
        let cell_y = index / nx;

        let jitter_x: f32 = rng.r#gen();
        let jitter_y: f32 = rng.r#gen();

        let u = (cell_x as f32 + jitter_x) / nx as f32;
        let v = (cell_y as f32 + jitter_y) / ny as f32;

        *direction = direction_from_unit_square(u, v);
    }
}

/// A cosine-weighted direction in the hemisphere around `normal`.
pub fn cosine_hemisphere(normal: Vector3, rng: &mut SmallRng) -> Vector3 {
    let u: f32 = rng.r#gen();
    let v: f32 = rng.r#gen();

    let radius = u.sqrt();
    let phi = 2.0 * std::f32::consts::PI * v;

    let x = radius * phi.cos();
    let y = radius * phi.sin();
    let z = (1.0 - u).max(0.0).sqrt();

    // Build a tangent basis around the normal.
    let tangent = if normal.x.abs() < 0.9 {
        Vector3::cross(normal, Vector3::UNIT_X).normalized()
    } else {
        Vector3::cross(normal, Vector3::UNIT_Y).normalized()
    };
    let bitangent = Vector3::cross(normal, tangent);

    (tangent * x + bitangent * y + normal * z).normalized()
}

/// Fills `points` with stratified samples of a sphere's surface.
pub fn stratified_sphere_points(
    center: Vector3,
    radius: f32,
    points: &mut [Vector3],
    rng: &mut SmallRng,
) {
    stratified_sphere_samples(points, rng);
    for point in points.iter_mut() {
        *point = center + *point * radius;
    }
}

/// A uniformly distributed point inside a sphere.
pub fn uniform_sphere_volume(center: Vector3, radius: f32, rng: &mut SmallRng) -> Vector3 {
    let direction = uniform_sphere(rng);
    let r: f32 = rng.r#gen::<f32>().cbrt() * radius;
    center + direction * r
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_stratified_samples_are_unit_length() {
        let mut rng = seeded_rng(3);
        let mut directions = vec![Vector3::ZERO; 1000];
        stratified_sphere_samples(&mut directions, &mut rng);

        for direction in &directions {
            assert_relative_eq!(direction.length(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_stratified_samples_cover_both_hemispheres() {
        let mut rng = seeded_rng(5);
        let mut directions = vec![Vector3::ZERO; 1000];
        stratified_sphere_samples(&mut directions, &mut rng);

        let above = directions.iter().filter(|d| d.z > 0.0).count();
        assert!(above > 350 && above < 650);
    }

    #[test]
    fn test_cosine_hemisphere_stays_above_surface() {
        let mut rng = seeded_rng(11);
        let normal = Vector3::new(0.3, 0.8, -0.2).normalized();

        for _ in 0..500 {
            let direction = cosine_hemisphere(normal, &mut rng);
            assert!(Vector3::dot(direction, normal) >= -1e-6);
        }
    }

    #[test]
    fn test_seeded_streams_are_reproducible() {
        let mut a = seeded_rng(42);
        let mut b = seeded_rng(42);

        for _ in 0..100 {
            assert_eq!(uniform_sphere(&mut a), uniform_sphere(&mut b));
        }
    }
}
