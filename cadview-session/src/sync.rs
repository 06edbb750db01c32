/// View synchronizer: frame delivery to one client and input coalescing
use std::sync::mpsc::{self, Receiver, Sender};

use cadview_core::{CameraSnapshot, PickHit};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::event::SessionEvent;
use crate::render::{CameraDelta, Frame, FrameHandle};

/// Push channel to a client. Delivery completes when the client acknowledges
/// the frame's sequence number.
pub trait FrameTransport: Send {
    fn send(&mut self, frame: &FrameHandle) -> Result<(), TransportError>;
}

/// In-process transport backed by an mpsc channel.
pub struct ChannelTransport {
    tx: Sender<FrameHandle>,
}

impl ChannelTransport {
    pub fn new() -> (Self, Receiver<FrameHandle>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl FrameTransport for ChannelTransport {
    fn send(&mut self, frame: &FrameHandle) -> Result<(), TransportError> {
        self.tx
            .send(frame.clone())
            .map_err(|_| TransportError::Disconnected)
    }
}

/// Delivery state of the connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientConnection {
    last_sent: u64,
    last_acked: u64,
}

impl ClientConnection {
    pub fn last_sent(&self) -> u64 {
        self.last_sent
    }

    pub fn last_acked(&self) -> u64 {
        self.last_acked
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Handed to the transport.
    Sent,
    /// Waiting behind an unacknowledged frame.
    Queued,
    /// Waiting, and the frame that was waiting before it was dropped.
    Replaced { superseded: u64 },
    /// Not newer than what the client already has or will get.
    Stale,
    /// The transport refused it; the frame is dropped.
    Failed,
}

/// Input events from a client, as JSON objects tagged by `"type"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientInput {
    /// Radians about the up vector and the right axis.
    Orbit { yaw: f32, pitch: f32 },
    /// Fractions of the eye distance.
    Pan { dx: f32, dy: f32 },
    Zoom { factor: f32 },
    /// Cell coordinates in the last frame.
    Pick { x: f32, y: f32 },
    ClearSelection,
    ResetView,
    Resize { width: u32, height: u32 },
    Ack { sequence: u64 },
}

impl ClientInput {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionInput {
    Pick { x: f32, y: f32 },
    Clear,
}

/// Everything that arrived since the last render, reduced to its net effect.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputBatch {
    /// Applied before `delta`.
    pub reset_view: bool,
    pub delta: CameraDelta,
    pub resize: Option<(u32, u32)>,
    /// The latest pick or clear; applied after the camera moved.
    pub selection: Option<SelectionInput>,
    /// Number of events folded into this batch.
    pub events: usize,
}

impl InputBatch {
    pub fn is_empty(&self) -> bool {
        self.events == 0
    }

    fn push(&mut self, input: &ClientInput) {
        match *input {
            ClientInput::Orbit { yaw, pitch } => self.delta.merge(&CameraDelta::orbit(yaw, pitch)),
            ClientInput::Pan { dx, dy } => self.delta.merge(&CameraDelta::pan(dx, dy)),
            ClientInput::Zoom { factor } => self.delta.merge(&CameraDelta::zoom(factor)),
            ClientInput::Pick { x, y } => self.selection = Some(SelectionInput::Pick { x, y }),
            ClientInput::ClearSelection => self.selection = Some(SelectionInput::Clear),
            ClientInput::ResetView => {
                // Earlier camera motion is overridden by the reset.
                self.reset_view = true;
                self.delta = CameraDelta::default();
            }
            ClientInput::Resize { width, height } => self.resize = Some((width, height)),
            ClientInput::Ack { .. } => return,
        }
        self.events += 1;
    }
}

/// Best-effort, coalescing frame delivery with at most one frame in flight
/// and at most one waiting.
pub struct ViewSynchronizer {
    transport: Box<dyn FrameTransport>,
    connection: ClientConnection,
    in_flight: Option<u64>,
    pending: Option<FrameHandle>,
    batch: InputBatch,
    dropped: u64,
}

impl ViewSynchronizer {
    pub fn new(transport: Box<dyn FrameTransport>) -> Self {
        Self {
            transport,
            connection: ClientConnection::default(),
            in_flight: None,
            pending: None,
            batch: InputBatch::default(),
            dropped: 0,
        }
    }

    pub fn connection(&self) -> ClientConnection {
        self.connection
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    pub fn pending(&self) -> Option<u64> {
        self.pending.as_ref().map(|f| f.sequence)
    }

    /// Frames superseded before they could be sent.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn push_frame(&mut self, frame: FrameHandle) -> PushOutcome {
        let newest = self.pending().unwrap_or(self.connection.last_sent);
        if frame.sequence <= newest {
            return PushOutcome::Stale;
        }

        if self.in_flight.is_none() {
            return self.send(frame);
        }

        match self.pending.replace(frame) {
            Some(old) => {
                self.dropped += 1;
                log::debug!("frame {} superseded before delivery", old.sequence);
                PushOutcome::Replaced {
                    superseded: old.sequence,
                }
            }
            None => PushOutcome::Queued,
        }
    }

    /// Record the client's acknowledgement and release the waiting frame.
    ///
    /// Out-of-order or unknown sequence numbers are ignored and return `false`.
    pub fn acknowledge(&mut self, sequence: u64) -> bool {
        if sequence <= self.connection.last_acked || sequence > self.connection.last_sent {
            log::debug!(
                "ignoring ack {} (acked {}, sent {})",
                sequence,
                self.connection.last_acked,
                self.connection.last_sent
            );
            return false;
        }
        self.connection.last_acked = sequence;
        if self.in_flight.map_or(false, |s| s <= sequence) {
            self.in_flight = None;
            if let Some(next) = self.pending.take() {
                self.send(next);
            }
        }
        true
    }

    /// Fold one client event into the current batch; acks are applied at once.
    pub fn on_client_input(&mut self, input: ClientInput) {
        match input {
            ClientInput::Ack { sequence } => {
                self.acknowledge(sequence);
            }
            other => self.batch.push(&other),
        }
    }

    /// Take the accumulated batch, or `None` if nothing arrived.
    pub fn take_batch(&mut self) -> Option<InputBatch> {
        if self.batch.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.batch))
        }
    }

    fn send(&mut self, frame: FrameHandle) -> PushOutcome {
        match self.transport.send(&frame) {
            Ok(()) => {
                self.in_flight = Some(frame.sequence);
                self.connection.last_sent = frame.sequence;
                PushOutcome::Sent
            }
            Err(err) => {
                log::warn!("failed to deliver frame {}: {}", frame.sequence, err);
                PushOutcome::Failed
            }
        }
    }
}

/// A frame flattened for the wire: one string per row plus RGB per cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameMessage {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub rows: Vec<String>,
    pub colors: Vec<[u8; 3]>,
    pub camera: CameraSnapshot,
    pub selection: Option<PickHit>,
}

impl From<&Frame> for FrameMessage {
    fn from(frame: &Frame) -> Self {
        let image = &frame.image;
        Self {
            sequence: frame.sequence,
            width: image.width,
            height: image.height,
            rows: image
                .rows()
                .map(|row| row.iter().map(|c| c.glyph).collect())
                .collect(),
            colors: image.cells.iter().map(|c| c.color.to_rgb8()).collect(),
            camera: frame.camera,
            selection: frame.selection,
        }
    }
}

/// Messages from server to client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Frame(FrameMessage),
    Event { event: SessionEvent },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{FrameImage, RenderTarget};
    use cadview_core::{Camera, Color};
    use std::sync::Arc;

    fn frame(sequence: u64) -> FrameHandle {
        let target = RenderTarget {
            width: 4,
            height: 2,
            background: Color::BACKGROUND,
        };
        Arc::new(Frame {
            sequence,
            scene_revision: 0,
            camera: Camera::default().snapshot(),
            visible_nodes: Vec::new(),
            selection: None,
            image: FrameImage::blank(&target),
        })
    }

    fn synchronizer() -> (ViewSynchronizer, Receiver<FrameHandle>) {
        let (transport, rx) = ChannelTransport::new();
        (ViewSynchronizer::new(Box::new(transport)), rx)
    }

    fn received(rx: &Receiver<FrameHandle>) -> Vec<u64> {
        rx.try_iter().map(|f| f.sequence).collect()
    }

    #[test]
    fn test_coalesces_to_latest() {
        let (mut sync, rx) = synchronizer();
        assert_eq!(sync.push_frame(frame(1)), PushOutcome::Sent);
        assert_eq!(sync.push_frame(frame(2)), PushOutcome::Queued);
        assert_eq!(sync.push_frame(frame(3)), PushOutcome::Replaced { superseded: 2 });
        assert_eq!(sync.push_frame(frame(4)), PushOutcome::Replaced { superseded: 3 });
        assert_eq!(received(&rx), vec![1]);
        assert_eq!(sync.pending(), Some(4));

        assert!(sync.acknowledge(1));
        assert_eq!(received(&rx), vec![4]);
        assert_eq!(sync.in_flight(), Some(4));
        assert_eq!(sync.pending(), None);
        assert_eq!(sync.dropped(), 2);
    }

    #[test]
    fn test_acks_are_monotonic() {
        let (mut sync, _rx) = synchronizer();
        sync.push_frame(frame(1));
        assert!(!sync.acknowledge(2), "acked a frame that was never sent");
        assert!(sync.acknowledge(1));
        assert!(!sync.acknowledge(1));

        sync.push_frame(frame(5));
        assert!(sync.acknowledge(5));
        assert!(!sync.acknowledge(3));
        assert_eq!(sync.connection().last_acked(), 5);
    }

    #[test]
    fn test_stale_frames_rejected() {
        let (mut sync, rx) = synchronizer();
        sync.push_frame(frame(3));
        assert_eq!(sync.push_frame(frame(3)), PushOutcome::Stale);
        assert_eq!(sync.push_frame(frame(2)), PushOutcome::Stale);
        sync.push_frame(frame(5));
        assert_eq!(sync.push_frame(frame(4)), PushOutcome::Stale);
        assert_eq!(received(&rx), vec![3]);
    }

    #[test]
    fn test_disconnected_transport() {
        let (mut sync, rx) = synchronizer();
        drop(rx);
        assert_eq!(sync.push_frame(frame(1)), PushOutcome::Failed);
        assert_eq!(sync.in_flight(), None);
    }

    #[test]
    fn test_input_batch() {
        let (mut sync, _rx) = synchronizer();
        assert!(sync.take_batch().is_none());

        sync.on_client_input(ClientInput::Orbit { yaw: 0.1, pitch: 0.0 });
        sync.on_client_input(ClientInput::Orbit { yaw: 0.1, pitch: 0.2 });
        sync.on_client_input(ClientInput::Zoom { factor: 2.0 });
        sync.on_client_input(ClientInput::Pick { x: 3.0, y: 4.0 });
        sync.on_client_input(ClientInput::Ack { sequence: 99 });

        let batch = sync.take_batch().unwrap();
        assert_eq!(batch.events, 4);
        assert!((batch.delta.yaw - 0.2).abs() < 1e-6);
        assert!((batch.delta.zoom - 2.0).abs() < 1e-6);
        assert_eq!(batch.selection, Some(SelectionInput::Pick { x: 3.0, y: 4.0 }));
        assert!(sync.take_batch().is_none());
    }

    #[test]
    fn test_reset_discards_earlier_motion() {
        let (mut sync, _rx) = synchronizer();
        sync.on_client_input(ClientInput::Pan { dx: 1.0, dy: 0.0 });
        sync.on_client_input(ClientInput::ResetView);
        sync.on_client_input(ClientInput::Zoom { factor: 1.5 });
        let batch = sync.take_batch().unwrap();
        assert!(batch.reset_view);
        assert_eq!(batch.delta.pan_x, 0.0);
        assert!((batch.delta.zoom - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_wire_format() {
        let input = ClientInput::from_json(r#"{"type":"orbit","yaw":0.5,"pitch":-0.25}"#).unwrap();
        assert_eq!(input, ClientInput::Orbit { yaw: 0.5, pitch: -0.25 });
        assert_eq!(
            ClientInput::from_json(r#"{"type":"clear_selection"}"#).unwrap(),
            ClientInput::ClearSelection
        );
        assert!(ClientInput::from_json(r#"{"type":"explode"}"#).is_err());

        let message = ServerMessage::Frame(FrameMessage::from(frame(7).as_ref()));
        let json: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "frame");
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["rows"].as_array().unwrap().len(), 2);

        let event = ServerMessage::Event {
            event: SessionEvent::FrameReady { sequence: 7 },
        };
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["event"]["event"], "frame_ready");
    }
}
