/// Indexed triangle meshes shared by the loaders, the scene graph and the rasterizer
use nalgebra::{Point3, Vector3};

use crate::bounds::Aabb;
use crate::error::LoadError;

/// A triangulated surface: positions, index triples and optional per-vertex normals.
///
/// Decoders do not deduplicate vertices, so an STL with N facets yields
/// 3N vertices. Anything handed to the scene graph has passed [`Mesh::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Point3<f32>>,
    pub triangles: Vec<[u32; 3]>,
    pub normals: Option<Vec<Vector3<f32>>>,
}

impl Mesh {
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            triangles: Vec::new(),
            normals: None,
        }
    }

    /// Empty mesh sized for `triangle_count` unshared facets, with normals.
    pub fn with_capacity(triangle_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(triangle_count * 3),
            triangles: Vec::with_capacity(triangle_count),
            normals: Some(Vec::with_capacity(triangle_count * 3)),
        }
    }

    /// Append one facet with its own three vertices.
    ///
    /// A zero or non-finite `normal` is replaced by the computed face normal.
    pub fn push_facet(&mut self, corners: [Point3<f32>; 3], normal: Vector3<f32>) {
        let base = self.vertices.len() as u32;
        let normal = if normal.iter().all(|c| c.is_finite()) && normal.norm_squared() > 1e-12 {
            normal.normalize()
        } else {
            face_normal(&corners)
        };

        self.vertices.extend_from_slice(&corners);
        self.triangles.push([base, base + 1, base + 2]);
        if let Some(normals) = self.normals.as_mut() {
            normals.extend_from_slice(&[normal; 3]);
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Corner positions of triangle `index`.
    pub fn triangle(&self, index: usize) -> Option<[Point3<f32>; 3]> {
        let [a, b, c] = *self.triangles.get(index)?;
        Some([
            *self.vertices.get(a as usize)?,
            *self.vertices.get(b as usize)?,
            *self.vertices.get(c as usize)?,
        ])
    }

    /// Unit normal of triangle `index` from its winding; zero when degenerate.
    pub fn face_normal(&self, index: usize) -> Vector3<f32> {
        self.triangle(index)
            .map(|corners| face_normal(&corners))
            .unwrap_or_else(Vector3::zeros)
    }

    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(&self.vertices)
    }

    /// Check the structural invariants a loaded mesh must satisfy.
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.triangles.is_empty() {
            return Err(LoadError::EmptyGeometry);
        }

        let vertex_count = self.vertices.len();
        if let Some((i, tri)) = self
            .triangles
            .iter()
            .enumerate()
            .find(|(_, tri)| tri.iter().any(|&v| v as usize >= vertex_count))
        {
            return Err(LoadError::Format(format!(
                "triangle {} references vertex {:?} but the mesh has {} vertices",
                i, tri, vertex_count
            )));
        }

        if let Some(i) = self
            .vertices
            .iter()
            .position(|p| !p.iter().all(|c| c.is_finite()))
        {
            return Err(LoadError::Format(format!("vertex {} has a non-finite coordinate", i)));
        }

        if let Some(normals) = &self.normals {
            if normals.len() != vertex_count {
                return Err(LoadError::Format(format!(
                    "{} normals supplied for {} vertices",
                    normals.len(),
                    vertex_count
                )));
            }
        }

        Ok(())
    }

    /// Axis-aligned cube centered on the origin, 12 triangles.
    pub fn cube(size: f32) -> Self {
        let h = size / 2.0;
        let p = |x: f32, y: f32, z: f32| Point3::new(x * h, y * h, z * h);

        // Normal, then the four corners counter-clockwise seen from outside.
        let faces = [
            (Vector3::z(), [p(-1.0, -1.0, 1.0), p(1.0, -1.0, 1.0), p(1.0, 1.0, 1.0), p(-1.0, 1.0, 1.0)]),
            (-Vector3::z(), [p(-1.0, -1.0, -1.0), p(-1.0, 1.0, -1.0), p(1.0, 1.0, -1.0), p(1.0, -1.0, -1.0)]),
            (Vector3::y(), [p(-1.0, 1.0, -1.0), p(-1.0, 1.0, 1.0), p(1.0, 1.0, 1.0), p(1.0, 1.0, -1.0)]),
            (-Vector3::y(), [p(-1.0, -1.0, -1.0), p(1.0, -1.0, -1.0), p(1.0, -1.0, 1.0), p(-1.0, -1.0, 1.0)]),
            (Vector3::x(), [p(1.0, -1.0, -1.0), p(1.0, 1.0, -1.0), p(1.0, 1.0, 1.0), p(1.0, -1.0, 1.0)]),
            (-Vector3::x(), [p(-1.0, -1.0, -1.0), p(-1.0, -1.0, 1.0), p(-1.0, 1.0, 1.0), p(-1.0, 1.0, -1.0)]),
        ];

        let mut mesh = Self::with_capacity(12);
        for (normal, [a, b, c, d]) in faces {
            mesh.push_facet([a, b, c], normal);
            mesh.push_facet([a, c, d], normal);
        }
        mesh
    }
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

/// Calculate the face normal from three corners
pub fn face_normal(corners: &[Point3<f32>; 3]) -> Vector3<f32> {
    let edge1 = corners[1] - corners[0];
    let edge2 = corners[2] - corners[0];
    edge1
        .cross(&edge2)
        .try_normalize(1e-12)
        .unwrap_or_else(Vector3::zeros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_shape() {
        let cube = Mesh::cube(2.0);
        assert_eq!(cube.triangle_count(), 12);
        assert_eq!(cube.vertex_count(), 36);
        assert!(cube.validate().is_ok());

        let bounds = cube.bounds().unwrap();
        assert_eq!(bounds.min, Point3::new(-1.0, -1.0, -1.0));
        assert_eq!(bounds.max, Point3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn test_cube_winding_matches_normals() {
        let cube = Mesh::cube(1.0);
        let normals = cube.normals.as_ref().unwrap();
        for (i, tri) in cube.triangles.iter().enumerate() {
            let computed = cube.face_normal(i);
            let stored = normals[tri[0] as usize];
            assert!((computed - stored).norm() < 1e-6, "triangle {}", i);
        }
    }

    #[test]
    fn test_push_facet_replaces_zero_normal() {
        let mut mesh = Mesh::with_capacity(1);
        mesh.push_facet(
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            Vector3::zeros(),
        );
        let normals = mesh.normals.as_ref().unwrap();
        assert!((normals[0] - Vector3::z()).norm() < 1e-6);
    }

    #[test]
    fn test_validate_rejects_bad_meshes() {
        assert_eq!(Mesh::new().validate(), Err(LoadError::EmptyGeometry));

        let mut dangling = Mesh::cube(1.0);
        dangling.triangles.push([0, 1, 99]);
        assert!(matches!(dangling.validate(), Err(LoadError::Format(_))));

        let mut nan = Mesh::cube(1.0);
        nan.vertices[3].x = f32::NAN;
        assert!(matches!(nan.validate(), Err(LoadError::Format(_))));

        let mut short_normals = Mesh::cube(1.0);
        short_normals.normals.as_mut().unwrap().pop();
        assert!(matches!(short_normals.validate(), Err(LoadError::Format(_))));
    }
}
