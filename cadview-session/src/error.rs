/// Session-level errors and their wire-facing kinds
use cadview_core::{LoadError, SceneError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error category sent to clients next to the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Format,
    EmptyGeometry,
    Tolerance,
    TooLarge,
    Cancelled,
    Busy,
    SceneMutationConflict,
    UnknownNode,
    InvalidTransform,
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("session is busy with another upload")]
    Busy,

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Scene(#[from] SceneError),

    #[error("session is closed")]
    Closed,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Busy => ErrorKind::Busy,
            SessionError::Closed => ErrorKind::Closed,
            SessionError::Load(err) => match err {
                LoadError::Format(_) => ErrorKind::Format,
                LoadError::EmptyGeometry => ErrorKind::EmptyGeometry,
                LoadError::Tolerance { .. } => ErrorKind::Tolerance,
                LoadError::TooLarge { .. } => ErrorKind::TooLarge,
                LoadError::Cancelled => ErrorKind::Cancelled,
            },
            SessionError::Scene(err) => match err {
                SceneError::UnknownNode(_) => ErrorKind::UnknownNode,
                SceneError::InvalidTransform(_) => ErrorKind::InvalidTransform,
                SceneError::MutationConflict { .. } => ErrorKind::SceneMutationConflict,
            },
        }
    }
}

/// Problems reading a `ViewerConfig`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Failures delivering a frame to a client.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("client disconnected")]
    Disconnected,

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadview_core::NodeId;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(SessionError::Busy.kind(), ErrorKind::Busy);
        assert_eq!(
            SessionError::from(LoadError::Format("bad".into())).kind(),
            ErrorKind::Format
        );
        assert_eq!(
            SessionError::from(SceneError::MutationConflict { waited_ms: 250 }).kind(),
            ErrorKind::SceneMutationConflict
        );
        assert_eq!(
            SessionError::from(SceneError::UnknownNode(NodeId(3))).kind(),
            ErrorKind::UnknownNode
        );
    }

    #[test]
    fn test_messages_are_readable() {
        let err = SessionError::from(LoadError::EmptyGeometry);
        assert_eq!(err.to_string(), "file contains no usable triangles");
        assert_eq!(
            serde_json::to_string(&ErrorKind::SceneMutationConflict).unwrap(),
            "\"scene_mutation_conflict\""
        );
    }
}
