/// CADview Session Library - Per-client viewing sessions
///
/// Wires the core pipeline to a client: the session controller drives
/// upload, scene mutation, rendering and frame delivery, and publishes
/// typed events along the way.

pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod raster;
pub mod render;
pub mod sync;

// Re-export commonly used types
pub use config::{RenderSettings, SceneSettings, ViewerConfig};
pub use controller::{NodeSummary, SessionBuilder, SessionController, SessionState};
pub use error::{ConfigError, ErrorKind, SessionError, TransportError};
pub use event::{EventBus, SessionEvent};
pub use raster::{Actor, AsciiRasterizer, Cell, FrameImage, Rasterizer, RenderTarget};
pub use render::{CameraDelta, Frame, FrameHandle, RenderSession};
pub use sync::{
    ChannelTransport, ClientConnection, ClientInput, FrameMessage, FrameTransport, InputBatch,
    PushOutcome, ServerMessage, ViewSynchronizer,
};
