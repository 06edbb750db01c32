/// Ray casting against triangles for cell picking
use nalgebra::{Point3, Vector3};
use serde::Serialize;

use crate::bounds::Aabb;
use crate::scene::NodeId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Point3<f32>,
    /// Unit length.
    pub direction: Vector3<f32>,
}

impl Ray {
    pub fn new(origin: Point3<f32>, direction: Vector3<f32>) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    pub fn at(&self, t: f32) -> Point3<f32> {
        self.origin + self.direction * t
    }

    /// Slab test: does the ray pass through `aabb` in front of its origin?
    pub fn hits_aabb(&self, aabb: &Aabb) -> bool {
        let mut t_min = 0.0f32;
        let mut t_max = f32::INFINITY;
        for axis in 0..3 {
            let origin = self.origin[axis];
            let dir = self.direction[axis];
            if dir.abs() < 1e-12 {
                if origin < aabb.min[axis] || origin > aabb.max[axis] {
                    return false;
                }
                continue;
            }
            let inv = 1.0 / dir;
            let (t0, t1) = {
                let a = (aabb.min[axis] - origin) * inv;
                let b = (aabb.max[axis] - origin) * inv;
                if a < b { (a, b) } else { (b, a) }
            };
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return false;
            }
        }
        true
    }
}

/// The nearest triangle under a pick ray.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PickHit {
    pub node: NodeId,
    pub triangle: usize,
    /// Distance along the ray in world units.
    pub distance: f32,
}

/// Möller–Trumbore intersection; returns the ray parameter of the hit.
///
/// Both faces count, so picking works regardless of winding.
pub fn intersect_triangle(ray: &Ray, corners: &[Point3<f32>; 3]) -> Option<f32> {
    const EPSILON: f32 = 1e-7;

    let edge1 = corners[1] - corners[0];
    let edge2 = corners[2] - corners[0];
    let h = ray.direction.cross(&edge2);
    let a = edge1.dot(&h);
    if a.abs() < EPSILON {
        return None;
    }

    let f = 1.0 / a;
    let s = ray.origin - corners[0];
    let u = f * s.dot(&h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(&edge1);
    let v = f * ray.direction.dot(&q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(&q);
    (t > EPSILON).then_some(t)
}
