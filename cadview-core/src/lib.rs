/// CADview Core Library - Geometry ingestion and scene state
///
/// This library provides the renderer-independent half of the viewer:
/// STL/STEP decoding, the scene graph and its shared lock, transforms,
/// bounds, the camera and ray picking.

pub mod bounds;
pub mod cancel;
pub mod color;
pub mod error;
pub mod geometry;
pub mod loader;
pub mod picking;
pub mod projection;
pub mod scene;
pub mod shared;
pub mod step;
pub mod stl;
pub mod transform;

// Re-export commonly used types
pub use bounds::Aabb;
pub use cancel::CancelToken;
pub use color::Color;
pub use error::{LoadError, SceneError};
pub use geometry::Mesh;
pub use loader::{FileFormat, GeometryPayload, Loader, LoaderOptions};
pub use picking::{PickHit, Ray};
pub use projection::{Camera, CameraSnapshot, ProjectionMode};
pub use scene::{NodeId, Representation, SceneGraph, SceneNode};
pub use shared::SharedScene;
pub use step::{TessellationError, Tessellator};
pub use transform::Transform;
