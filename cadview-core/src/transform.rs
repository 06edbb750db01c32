/// 3D affine transforms for scene nodes
use nalgebra::{Matrix4, Point3, Vector3};

use crate::error::SceneError;

/// Smallest |determinant| of the linear part still treated as invertible.
const MIN_DETERMINANT: f32 = 1e-12;

/// A 4x4 matrix known to be an invertible affine transform.
///
/// The only ways to obtain one are the constructors below, all of which
/// either build a valid matrix or check it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    matrix: Matrix4<f32>,
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// Accept `matrix` if its bottom row is `[0, 0, 0, 1]`, every entry is
    /// finite and the linear part is invertible.
    pub fn try_from_matrix(matrix: Matrix4<f32>) -> Result<Self, SceneError> {
        if !matrix.iter().all(|v| v.is_finite()) {
            return Err(SceneError::InvalidTransform("non-finite entry".to_string()));
        }

        let bottom = matrix.row(3);
        if bottom[0] != 0.0 || bottom[1] != 0.0 || bottom[2] != 0.0 || bottom[3] != 1.0 {
            return Err(SceneError::InvalidTransform(format!(
                "bottom row is [{}, {}, {}, {}], expected [0, 0, 0, 1]",
                bottom[0], bottom[1], bottom[2], bottom[3]
            )));
        }

        let det = matrix.fixed_view::<3, 3>(0, 0).determinant();
        if det.abs() < MIN_DETERMINANT {
            return Err(SceneError::InvalidTransform(format!(
                "linear part is singular (determinant {})",
                det
            )));
        }

        Ok(Self { matrix })
    }

    /// Create a translation
    pub fn translation(x: f32, y: f32, z: f32) -> Self {
        Self {
            matrix: Matrix4::new_translation(&Vector3::new(x, y, z)),
        }
    }

    /// Rotation from Euler angles in radians, applied in order Z, Y, X
    pub fn rotation(x: f32, y: f32, z: f32) -> Self {
        let rx = Matrix4::new_rotation(Vector3::new(x, 0.0, 0.0));
        let ry = Matrix4::new_rotation(Vector3::new(0.0, y, 0.0));
        let rz = Matrix4::new_rotation(Vector3::new(0.0, 0.0, z));
        Self {
            matrix: rz * ry * rx,
        }
    }

    /// Non-uniform scale; zero factors are rejected.
    pub fn scale(sx: f32, sy: f32, sz: f32) -> Result<Self, SceneError> {
        Self::try_from_matrix(Matrix4::new_nonuniform_scaling(&Vector3::new(sx, sy, sz)))
    }

    /// `outer` applied after `self`.
    pub fn then(&self, outer: &Transform) -> Transform {
        Transform {
            matrix: outer.matrix * self.matrix,
        }
    }

    pub fn matrix(&self) -> &Matrix4<f32> {
        &self.matrix
    }

    pub fn inverse(&self) -> Transform {
        // Checked at construction, so the inverse exists.
        let matrix = self
            .matrix
            .try_inverse()
            .unwrap_or_else(Matrix4::identity);
        Transform { matrix }
    }

    pub fn transform_point(&self, p: &Point3<f32>) -> Point3<f32> {
        self.matrix.transform_point(p)
    }

    pub fn is_identity(&self) -> bool {
        self.matrix == Matrix4::identity()
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl TryFrom<Matrix4<f32>> for Transform {
    type Error = SceneError;

    fn try_from(matrix: Matrix4<f32>) -> Result<Self, Self::Error> {
        Self::try_from_matrix(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_rotation() {
        let t = Transform::rotation(0.0, 0.0, 0.0);
        assert!((t.matrix() - Matrix4::identity()).norm() < 1e-6);
    }

    #[test]
    fn test_rejects_invalid_matrices() {
        let mut projective = Matrix4::identity();
        projective[(3, 2)] = 1.0;
        assert!(Transform::try_from_matrix(projective).is_err());

        assert!(Transform::scale(1.0, 0.0, 1.0).is_err());

        let mut nan = Matrix4::identity();
        nan[(0, 3)] = f32::NAN;
        assert!(Transform::try_from_matrix(nan).is_err());
    }

    #[test]
    fn test_compose_and_invert() {
        let t = Transform::translation(1.0, 2.0, 3.0)
            .then(&Transform::rotation(0.0, std::f32::consts::FRAC_PI_2, 0.0));
        let p = Point3::new(0.5, -1.0, 2.0);
        let back = t.inverse().transform_point(&t.transform_point(&p));
        assert!((back - p).norm() < 1e-5);
    }

    #[test]
    fn test_then_order() {
        // Translate first, then scale: the translation is scaled too.
        let t = Transform::translation(1.0, 0.0, 0.0).then(&Transform::scale(2.0, 2.0, 2.0).unwrap());
        let p = t.transform_point(&Point3::origin());
        assert!((p - Point3::new(2.0, 0.0, 0.0)).norm() < 1e-6);
    }
}
