/// Geometry loader: turns an uploaded payload into a validated mesh
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::LoadError;
use crate::geometry::Mesh;
use crate::step::{self, TessellationError, Tessellator, UnavailableTessellator};
use crate::stl;

/// Declared format of an upload, derived from its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileFormat {
    Stl,
    Step,
}

impl FileFormat {
    /// Map `.stl`, `.stp` and `.step` (any case) to a format.
    pub fn from_filename(filename: &str) -> Result<Self, LoadError> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("stl") => Ok(FileFormat::Stl),
            Some("stp") | Some("step") => Ok(FileFormat::Step),
            Some(other) => Err(LoadError::Format(format!(
                "unsupported format .{}, use .stl, .stp or .step files",
                other
            ))),
            None => Err(LoadError::Format(format!(
                "{:?} has no file extension, use .stl, .stp or .step files",
                filename
            ))),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FileFormat::Stl => "STL",
            FileFormat::Step => "STEP",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Uploaded bytes plus the declared name and format. Immutable once built.
#[derive(Debug, Clone)]
pub struct GeometryPayload {
    filename: String,
    format: FileFormat,
    bytes: Vec<u8>,
}

impl GeometryPayload {
    /// Build a payload, deriving the format from the filename extension.
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Result<Self, LoadError> {
        let filename = filename.into();
        let format = FileFormat::from_filename(&filename)?;
        Ok(Self::with_format(filename, format, bytes))
    }

    pub fn with_format(filename: impl Into<String>, format: FileFormat, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            format,
            bytes,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Tunables for decoding, read from the `[loader]` config table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderOptions {
    /// Chordal deflection handed to the tessellator on the first attempt.
    pub tolerance: f64,
    /// How many times a non-converging tessellation is retried with the
    /// tolerance doubled.
    pub max_tolerance_relaxations: u32,
    pub max_payload_bytes: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            tolerance: 0.01,
            max_tolerance_relaxations: 2,
            max_payload_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Decodes payloads into meshes. All-or-nothing: errors never carry geometry.
#[derive(Clone)]
pub struct Loader {
    options: LoaderOptions,
    tessellator: Arc<dyn Tessellator>,
}

impl Loader {
    pub fn new(options: LoaderOptions, tessellator: Arc<dyn Tessellator>) -> Self {
        Self {
            options,
            tessellator,
        }
    }

    /// A loader without a CAD kernel; STEP uploads validate and then fail.
    pub fn stl_only(options: LoaderOptions) -> Self {
        Self::new(options, Arc::new(UnavailableTessellator))
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Decode `payload`, consuming it.
    pub fn load(&self, payload: GeometryPayload, cancel: &CancelToken) -> Result<Mesh, LoadError> {
        if payload.len() > self.options.max_payload_bytes {
            return Err(LoadError::TooLarge {
                size: payload.len(),
                limit: self.options.max_payload_bytes,
            });
        }
        cancel.check()?;

        log::debug!(
            "decoding {} ({}, {} bytes)",
            payload.filename(),
            payload.format(),
            payload.len()
        );
        let mesh = match payload.format() {
            FileFormat::Stl => stl::parse_stl(payload.bytes(), cancel)?,
            FileFormat::Step => self.load_step(payload.bytes(), cancel)?,
        };
        cancel.check()?;
        Ok(mesh)
    }

    fn load_step(&self, bytes: &[u8], cancel: &CancelToken) -> Result<Mesh, LoadError> {
        let header = step::parse_header(bytes)?;
        log::debug!(
            "STEP header ok: name={:?} schemas={:?}",
            header.file_name,
            header.schemas
        );

        let attempts = self.options.max_tolerance_relaxations + 1;
        let mut tolerance = self.options.tolerance;
        let mut attempt = 1;
        loop {
            cancel.check()?;
            match self.tessellator.tessellate(bytes, tolerance, cancel) {
                Ok(mesh) => return normalize(mesh),
                Err(TessellationError::NonConvergent(at)) if attempt < attempts => {
                    log::warn!(
                        "tessellation did not converge at tolerance {}, retrying at {}",
                        at,
                        tolerance * 2.0
                    );
                    tolerance *= 2.0;
                    attempt += 1;
                }
                Err(TessellationError::NonConvergent(_)) => {
                    return Err(LoadError::Tolerance {
                        tolerance,
                        attempts: attempt,
                    })
                }
                Err(other) => return Err(other.into()),
            }
        }
    }
}

impl From<TessellationError> for LoadError {
    fn from(err: TessellationError) -> Self {
        match err {
            TessellationError::NonConvergent(tolerance) => LoadError::Tolerance {
                tolerance,
                attempts: 1,
            },
            TessellationError::Cancelled => LoadError::Cancelled,
            other => LoadError::Format(other.to_string()),
        }
    }
}

/// Bring a tessellator's output into the common mesh shape.
fn normalize(mut mesh: Mesh) -> Result<Mesh, LoadError> {
    let mismatched = mesh
        .normals
        .as_ref()
        .map_or(false, |n| n.len() != mesh.vertices.len());
    if mismatched {
        log::warn!("dropping tessellator normals that do not match the vertex count");
        mesh.normals = None;
    }
    mesh.validate()?;
    Ok(mesh)
}
