/// Error types for geometry loading and scene mutation
use thiserror::Error;

use crate::scene::NodeId;

/// Reasons a payload could not be turned into a mesh.
///
/// Decoding is all-or-nothing: any of these means no mesh was produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("unsupported or corrupt file: {0}")]
    Format(String),

    #[error("file contains no usable triangles")]
    EmptyGeometry,

    #[error("tessellation did not converge after {attempts} attempt(s), last tolerance {tolerance}")]
    Tolerance { tolerance: f64, attempts: u32 },

    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("load cancelled")]
    Cancelled,
}

/// Failures of scene graph operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("no scene node with id {0}")]
    UnknownNode(NodeId),

    #[error("transform is not an invertible affine matrix: {0}")]
    InvalidTransform(String),

    #[error("scene is locked by another writer (waited {waited_ms} ms)")]
    MutationConflict { waited_ms: u64 },
}
