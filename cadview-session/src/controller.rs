/// Session controller: the per-client upload, render and notify lifecycle
use std::collections::BTreeSet;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cadview_core::step::{Tessellator, UnavailableTessellator};
use cadview_core::{
    CancelToken, Color, FileFormat, GeometryPayload, LoadError, Loader, NodeId, Representation,
    SharedScene, Transform,
};
use nalgebra::Matrix4;
use serde::Serialize;

use crate::config::ViewerConfig;
use crate::error::SessionError;
use crate::event::{EventBus, SessionEvent};
use crate::raster::{AsciiRasterizer, Rasterizer};
use crate::render::{FrameHandle, RenderSession};
use crate::sync::{ClientInput, FrameTransport, InputBatch, SelectionInput, ViewSynchronizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Loading,
    Rendering,
    Error,
    Closed,
}

/// One row of the loaded-files listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub label: String,
    pub format: Option<FileFormat>,
    pub triangles: usize,
    pub vertices: usize,
    pub visible: bool,
}

struct View {
    render: RenderSession,
    sync: ViewSynchronizer,
    /// Sequence of the last frame announced with `FrameReady`.
    last_published: u64,
}

/// Explicit wiring for a [`SessionController`].
pub struct SessionBuilder {
    config: ViewerConfig,
    scene: Option<SharedScene>,
    tessellator: Arc<dyn Tessellator>,
    rasterizer: Option<Box<dyn Rasterizer>>,
}

impl SessionBuilder {
    pub fn new(config: ViewerConfig) -> Self {
        Self {
            config,
            scene: None,
            tessellator: Arc::new(UnavailableTessellator),
            rasterizer: None,
        }
    }

    /// View an existing scene instead of creating a private one.
    pub fn scene(mut self, scene: SharedScene) -> Self {
        self.scene = Some(scene);
        self
    }

    pub fn tessellator(mut self, tessellator: Arc<dyn Tessellator>) -> Self {
        self.tessellator = tessellator;
        self
    }

    pub fn rasterizer(mut self, rasterizer: Box<dyn Rasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn build(self, transport: Box<dyn FrameTransport>) -> SessionController {
        let scene = self.scene.unwrap_or_default();
        let rasterizer = self
            .rasterizer
            .unwrap_or_else(|| Box::new(AsciiRasterizer::new()));
        let mut render = RenderSession::new(scene.clone(), rasterizer, self.config.render.clone());
        // Joining a populated scene starts framed on it.
        if !scene.read().is_empty() {
            render.reset_camera();
        }

        SessionController {
            state: Mutex::new(SessionState::Idle),
            loader: Loader::new(self.config.loader.clone(), self.tessellator),
            scene,
            view: Mutex::new(Some(View {
                render,
                sync: ViewSynchronizer::new(transport),
                last_published: 0,
            })),
            events: EventBus::new(),
            cancel: CancelToken::new(),
            owned: Mutex::new(BTreeSet::new()),
            last_error: Mutex::new(None),
            mutation_timeout: self.config.scene.mutation_timeout(),
        }
    }
}

/// Orchestrates loader, scene, render session and synchronizer for one client.
///
/// Uploads run `Idle -> Loading -> Rendering -> Idle`, or through `Error`
/// back to `Idle` on failure. A second upload while one is in progress is
/// rejected with [`SessionError::Busy`].
pub struct SessionController {
    state: Mutex<SessionState>,
    loader: Loader,
    scene: SharedScene,
    /// `None` once the session is closed.
    view: Mutex<Option<View>>,
    events: EventBus,
    cancel: CancelToken,
    /// Nodes this session added; removed again on close.
    owned: Mutex<BTreeSet<NodeId>>,
    last_error: Mutex<Option<SessionError>>,
    mutation_timeout: Duration,
}

/// Returns an upload's session to `Idle` however it ends.
struct UploadGuard<'a> {
    controller: &'a SessionController,
}

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        self.controller.transition(SessionState::Idle);
    }
}

impl SessionController {
    pub fn builder(config: ViewerConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn scene(&self) -> &SharedScene {
        &self.scene
    }

    pub fn last_error(&self) -> Option<SessionError> {
        lock(&self.last_error).clone()
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Decode `bytes` as `filename` and add the result to the scene.
    ///
    /// Decoding runs without any lock held. On failure the scene is left
    /// untouched and the error is reported as `LoadFailed`.
    pub fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<NodeId, SessionError> {
        self.begin_upload()?;
        let _guard = UploadGuard { controller: self };

        log::info!("loading {} ({} bytes)", filename, bytes.len());
        self.events.publish(SessionEvent::LoadStarted {
            filename: filename.to_string(),
        });

        match self.load_and_insert(filename, bytes) {
            Ok((id, was_empty)) => {
                self.transition(SessionState::Rendering);
                if let Some(view) = lock(&self.view).as_mut() {
                    if was_empty {
                        view.render.reset_camera();
                    }
                    self.render_and_push(view);
                }
                Ok(id)
            }
            Err(err) => {
                self.transition(SessionState::Error);
                log::warn!("failed to load {}: {}", filename, err);
                self.events.publish(SessionEvent::load_failed(filename, &err));
                *lock(&self.last_error) = Some(err.clone());
                Err(err)
            }
        }
    }

    fn begin_upload(&self) -> Result<(), SessionError> {
        let mut state = lock(&self.state);
        match *state {
            SessionState::Idle | SessionState::Error => {
                *state = SessionState::Loading;
                Ok(())
            }
            SessionState::Loading | SessionState::Rendering => {
                log::warn!("rejecting upload: session is {:?}", *state);
                Err(SessionError::Busy)
            }
            SessionState::Closed => Err(SessionError::Closed),
        }
    }

    fn load_and_insert(&self, filename: &str, bytes: Vec<u8>) -> Result<(NodeId, bool), SessionError> {
        let payload = GeometryPayload::new(filename, bytes)?;
        let format = payload.format();
        let mesh = self.loader.load(payload, &self.cancel)?;
        let (triangles, vertices) = (mesh.triangle_count(), mesh.vertex_count());

        let (id, was_empty) = self.scene.mutate(self.mutation_timeout, |graph| {
            // Checked under the write lock so `close` never misses a node.
            if self.cancel.is_cancelled() {
                return Err(LoadError::Cancelled);
            }
            let was_empty = graph.is_empty();
            let id = graph.add_labeled(mesh, Transform::identity(), filename, Some(format));
            lock(&self.owned).insert(id);
            Ok((id, was_empty))
        })??;

        log::info!("loaded {} as node {} ({} triangles)", filename, id, triangles);
        self.events.publish(SessionEvent::LoadSucceeded {
            node: id,
            filename: filename.to_string(),
            triangles,
            vertices,
        });
        Ok((id, was_empty))
    }

    /// Remove a node and refit the view. Returns `false` for unknown ids.
    pub fn remove_node(&self, id: NodeId) -> Result<bool, SessionError> {
        self.ensure_open()?;
        let removed = self.report(self.scene.mutate(self.mutation_timeout, |g| g.remove_node(id)))?;
        if removed {
            lock(&self.owned).remove(&id);
            self.events.publish(SessionEvent::NodeRemoved { node: id });
            self.with_view(|view| view.render.reset_camera())?;
        }
        Ok(removed)
    }

    /// Remove every node from the scene.
    pub fn clear_all(&self) -> Result<usize, SessionError> {
        self.ensure_open()?;
        let removed = self.report(self.scene.mutate(self.mutation_timeout, |g| g.clear()))?;
        lock(&self.owned).clear();
        self.events.publish(SessionEvent::SceneCleared {
            removed: removed.len(),
        });
        self.with_view(|view| view.render.reset_camera_to_fit(None))?;
        Ok(removed.len())
    }

    pub fn set_visible(&self, id: NodeId, visible: bool) -> Result<(), SessionError> {
        self.edit(|g| g.set_visible(id, visible))
    }

    pub fn set_transform(&self, id: NodeId, matrix: Matrix4<f32>) -> Result<(), SessionError> {
        self.edit(|g| g.set_transform(id, matrix))
    }

    pub fn set_color(&self, id: NodeId, color: Color) -> Result<(), SessionError> {
        self.edit(|g| g.set_color(id, color))
    }

    pub fn toggle_wireframe(&self, id: NodeId) -> Result<Representation, SessionError> {
        self.edit(|g| g.toggle_wireframe(id))
    }

    /// Outline a node's edges in the edge color; `None` clears the outline.
    pub fn select_node(&self, node: Option<NodeId>) -> Result<(), SessionError> {
        self.ensure_open()?;
        if let Some(id) = node {
            if !self.scene.read().contains(id) {
                return self.report(Err(cadview_core::SceneError::UnknownNode(id)));
            }
        }
        self.with_view(|view| view.render.select_node(node))
    }

    /// Fit the camera to the current scene and push a frame.
    pub fn reset_view(&self) -> Result<(), SessionError> {
        self.with_view(|view| view.render.reset_camera())
    }

    /// Queue client input; it takes effect on the next [`pump`](Self::pump).
    pub fn handle_input(&self, input: ClientInput) -> Result<(), SessionError> {
        let mut view = lock(&self.view);
        let view = view.as_mut().ok_or(SessionError::Closed)?;
        view.sync.on_client_input(input);
        Ok(())
    }

    pub fn acknowledge(&self, sequence: u64) -> bool {
        lock(&self.view)
            .as_mut()
            .map_or(false, |view| view.sync.acknowledge(sequence))
    }

    /// Apply queued input as one batch and render at most once.
    ///
    /// Also renders when another session changed the shared scene. Returns
    /// the sequence of a newly published frame.
    pub fn pump(&self) -> Result<Option<u64>, SessionError> {
        let mut guard = lock(&self.view);
        let view = guard.as_mut().ok_or(SessionError::Closed)?;

        if let Some(batch) = view.sync.take_batch() {
            log::debug!("applying input batch of {} events", batch.events);
            self.apply_batch(view, &batch);
        }
        if !view.render.needs_render() {
            return Ok(None);
        }
        Ok(self.render_and_push(view))
    }

    pub fn latest_frame(&self) -> Option<FrameHandle> {
        lock(&self.view)
            .as_ref()
            .and_then(|view| view.render.last_frame().cloned())
    }

    /// Nodes in the scene, in id order.
    pub fn loaded_files(&self) -> Vec<NodeSummary> {
        self.scene
            .read()
            .iter()
            .map(|node| NodeSummary {
                id: node.id(),
                label: node.label().to_string(),
                format: node.format(),
                triangles: node.mesh().triangle_count(),
                vertices: node.mesh().vertex_count(),
                visible: node.visible(),
            })
            .collect()
    }

    /// End the session: abort in-flight work, drop this session's nodes and
    /// release its render session. Idempotent.
    pub fn close(&self) {
        {
            let mut state = lock(&self.state);
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }
        self.cancel.cancel();

        let result = self.scene.mutate(self.mutation_timeout, |graph| {
            let owned = std::mem::take(&mut *lock(&self.owned));
            owned.into_iter().filter(|id| graph.remove_node(*id)).count()
        });
        match result {
            Ok(removed) => log::info!(
                "session closed, removed {} node(s), {} other holder(s) of the scene",
                removed,
                self.scene.handle_count().saturating_sub(2)
            ),
            Err(err) => log::warn!("session closed but its nodes could not be removed: {}", err),
        }

        lock(&self.view).take();
    }

    fn apply_batch(&self, view: &mut View, batch: &InputBatch) {
        if let Some((width, height)) = batch.resize {
            view.render.resize(width, height);
        }
        if batch.reset_view {
            view.render.reset_camera();
        }
        view.render.apply_camera_delta(&batch.delta);

        match batch.selection {
            Some(SelectionInput::Pick { x, y }) => {
                if let Some(hit) = view.render.pick(x, y) {
                    self.events
                        .publish(SessionEvent::SelectionChanged { hit: Some(hit) });
                }
            }
            Some(SelectionInput::Clear) => {
                if view.render.clear_selection() {
                    self.events.publish(SessionEvent::SelectionChanged { hit: None });
                }
            }
            None => {}
        }
    }

    /// Render and hand the frame to the synchronizer, announcing it once.
    fn render_and_push(&self, view: &mut View) -> Option<u64> {
        let frame = view.render.render_with(&self.cancel)?;
        if frame.sequence <= view.last_published {
            return None;
        }
        view.last_published = frame.sequence;
        let outcome = view.sync.push_frame(frame.clone());
        log::debug!("frame {} pushed: {:?}", frame.sequence, outcome);
        self.events.publish(SessionEvent::FrameReady {
            sequence: frame.sequence,
        });
        Some(frame.sequence)
    }

    /// Run a scene edit, then refresh the view.
    fn edit<R>(
        &self,
        op: impl FnOnce(&mut cadview_core::SceneGraph) -> Result<R, cadview_core::SceneError>,
    ) -> Result<R, SessionError> {
        self.ensure_open()?;
        let result = self
            .scene
            .mutate(self.mutation_timeout, op)
            .map_err(SessionError::from)
            .and_then(|r| r.map_err(SessionError::from));
        let value = self.report(result)?;
        self.with_view(|_| ())?;
        Ok(value)
    }

    /// Apply `op` to the view, then render and push.
    fn with_view(&self, op: impl FnOnce(&mut View)) -> Result<(), SessionError> {
        let mut guard = lock(&self.view);
        let view = guard.as_mut().ok_or(SessionError::Closed)?;
        op(view);
        self.render_and_push(view);
        Ok(())
    }

    /// Surface a failed operation on the event channel before returning it.
    fn report<T, E: Into<SessionError>>(&self, result: Result<T, E>) -> Result<T, SessionError> {
        result.map_err(|err| {
            let err = err.into();
            log::warn!("operation failed: {}", err);
            self.events.publish(SessionEvent::error(&err));
            *lock(&self.last_error) = Some(err.clone());
            err
        })
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.state() == SessionState::Closed {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    /// Move to `next` unless the session was closed meanwhile.
    fn transition(&self, next: SessionState) {
        let mut state = lock(&self.state);
        if *state != SessionState::Closed && *state != next {
            log::debug!("session {:?} -> {:?}", *state, next);
            *state = next;
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sync::ChannelTransport;
    use cadview_core::step::TessellationError;
    use cadview_core::{stl, Aabb, Mesh};
    use nalgebra::Point3;
    use std::sync::mpsc::{self, Sender};
    use std::thread;

    const VALID_STEP: &str = "ISO-10303-21;\n\
        HEADER;\n\
        FILE_DESCRIPTION(('part'),'2;1');\n\
        FILE_NAME('part.step','',(''),(''),'','','');\n\
        FILE_SCHEMA(('AP214'));\n\
        ENDSEC;\n\
        DATA;\n\
        #1=CARTESIAN_POINT('',(0.,0.,0.));\n\
        ENDSEC;\n\
        END-ISO-10303-21;\n";

    /// Signals when tessellation starts, then waits for a release or for
    /// the load to be cancelled.
    struct GatedTessellator {
        started: Mutex<Sender<()>>,
        release: Mutex<Receiver<()>>,
    }

    impl Tessellator for GatedTessellator {
        fn tessellate(
            &self,
            _: &[u8],
            _: f64,
            cancel: &CancelToken,
        ) -> Result<Mesh, TessellationError> {
            let _ = lock(&self.started).send(());
            loop {
                if cancel.is_cancelled() {
                    return Err(TessellationError::Cancelled);
                }
                match lock(&self.release).recv_timeout(Duration::from_millis(5)) {
                    Ok(()) => return Ok(Mesh::cube(1.0)),
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        return Err(TessellationError::InvalidModel("gate dropped".into()))
                    }
                }
            }
        }
    }

    fn gated() -> (Arc<GatedTessellator>, Receiver<()>, Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let tessellator = Arc::new(GatedTessellator {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        });
        (tessellator, started_rx, release_tx)
    }

    fn controller() -> (SessionController, Receiver<FrameHandle>) {
        let (transport, frames) = ChannelTransport::new();
        let controller = SessionController::builder(ViewerConfig::default()).build(Box::new(transport));
        (controller, frames)
    }

    fn cube_stl() -> Vec<u8> {
        stl::to_binary(&Mesh::cube(2.0), "cube")
    }

    fn frame_ready_count(events: &Receiver<SessionEvent>) -> usize {
        events
            .try_iter()
            .filter(|e| matches!(e, SessionEvent::FrameReady { .. }))
            .count()
    }

    #[test]
    fn test_upload_cube_end_to_end() {
        let (session, frames) = controller();
        let events = session.subscribe();

        let id = session.upload("cube.stl", cube_stl()).unwrap();
        assert_eq!(session.state(), SessionState::Idle);

        let received: Vec<SessionEvent> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                SessionEvent::LoadStarted {
                    filename: "cube.stl".into()
                },
                SessionEvent::LoadSucceeded {
                    node: id,
                    filename: "cube.stl".into(),
                    triangles: 12,
                    vertices: 36,
                },
                SessionEvent::FrameReady { sequence: 1 },
            ]
        );

        let bounds = session.scene().read().compute_bounds().unwrap();
        let expected = Aabb::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
        assert!((bounds.min - expected.min).norm() < 1e-6);
        assert!((bounds.max - expected.max).norm() < 1e-6);

        let frame = frames.try_recv().unwrap();
        assert_eq!(frame.visible_nodes, vec![id]);
        assert!(!frame.image.is_blank());
        let focal = Point3::from(frame.camera.focal_point);
        assert!((focal - Point3::origin()).norm() < 1e-5);
    }

    #[test]
    fn test_unsupported_extension() {
        let (session, frames) = controller();
        let events = session.subscribe();

        let err = session.upload("model.txt", b"solid x\nendsolid x\n".to_vec()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.scene().revision(), 0);
        assert_eq!(frame_ready_count(&events), 0);
        assert!(frames.try_recv().is_err());
        assert_eq!(session.last_error().map(|e| e.kind()), Some(ErrorKind::Format));
    }

    #[test]
    fn test_truncated_step_keeps_scene() {
        let (session, _frames) = controller();
        let id = session.upload("cube.stl", cube_stl()).unwrap();
        let revision = session.scene().revision();
        let events = session.subscribe();

        let truncated = VALID_STEP[..50].as_bytes().to_vec();
        let err = session.upload("part.step", truncated).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.scene().revision(), revision);
        assert_eq!(session.scene().read().ids().collect::<Vec<_>>(), vec![id]);

        let failed = events
            .try_iter()
            .find(|e| matches!(e, SessionEvent::LoadFailed { .. }));
        assert!(matches!(
            failed,
            Some(SessionEvent::LoadFailed { kind: ErrorKind::Format, .. })
        ));
    }

    #[test]
    fn test_concurrent_upload_is_busy() {
        let (tessellator, started, release) = gated();
        let (transport, _frames) = ChannelTransport::new();
        let session = Arc::new(
            SessionController::builder(ViewerConfig::default())
                .tessellator(tessellator)
                .build(Box::new(transport)),
        );

        let background = {
            let session = session.clone();
            thread::spawn(move || session.upload("part.step", VALID_STEP.as_bytes().to_vec()))
        };
        started.recv().unwrap();
        assert_eq!(session.state(), SessionState::Loading);

        let second = session.upload("cube.stl", cube_stl());
        assert_eq!(second, Err(SessionError::Busy));

        release.send(()).unwrap();
        let first = background.join().unwrap();
        assert!(first.is_ok());
        assert_eq!(session.scene().read().len(), 1);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_empty_scene_renders_background() {
        let (session, frames) = controller();
        let events = session.subscribe();
        assert_eq!(session.pump().unwrap(), Some(1));
        let frame = frames.try_recv().unwrap();
        assert!(frame.image.is_blank());
        assert_eq!(frame_ready_count(&events), 1);
    }

    #[test]
    fn test_pump_renders_once_per_batch() {
        let (session, frames) = controller();
        session.upload("cube.stl", cube_stl()).unwrap();
        let first = frames.try_recv().unwrap();
        session.acknowledge(first.sequence);
        let events = session.subscribe();

        for _ in 0..5 {
            session
                .handle_input(ClientInput::Orbit { yaw: 0.05, pitch: 0.0 })
                .unwrap();
        }
        session.handle_input(ClientInput::Zoom { factor: 1.2 }).unwrap();
        assert_eq!(session.pump().unwrap(), Some(2));
        assert_eq!(session.pump().unwrap(), None);
        assert_eq!(frame_ready_count(&events), 1);
        assert_eq!(frames.try_recv().unwrap().sequence, 2);
    }

    #[test]
    fn test_pick_selects_and_clears() {
        let (session, _frames) = controller();
        let id = session.upload("cube.stl", cube_stl()).unwrap();
        let events = session.subscribe();

        session.handle_input(ClientInput::Pick { x: 41.0, y: 12.0 }).unwrap();
        session.pump().unwrap();
        let hit = session.latest_frame().unwrap().selection.unwrap();
        assert_eq!(hit.node, id);

        session.handle_input(ClientInput::ClearSelection).unwrap();
        session.pump().unwrap();
        assert!(session.latest_frame().unwrap().selection.is_none());

        let selections: Vec<SessionEvent> = events
            .try_iter()
            .filter(|e| matches!(e, SessionEvent::SelectionChanged { .. }))
            .collect();
        assert_eq!(
            selections,
            vec![
                SessionEvent::SelectionChanged { hit: Some(hit) },
                SessionEvent::SelectionChanged { hit: None },
            ]
        );
    }

    #[test]
    fn test_scene_operations() {
        let (session, _frames) = controller();
        let a = session.upload("a.stl", cube_stl()).unwrap();
        let b = session.upload("b.STL", stl::to_ascii(&Mesh::cube(1.0), "b").into_bytes()).unwrap();

        let files = session.loaded_files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].label, "a.stl");
        assert_eq!(files[1].id, b);
        assert_eq!(files[1].format, Some(FileFormat::Stl));

        session.set_visible(a, false).unwrap();
        assert!(!session.loaded_files()[0].visible);
        assert_eq!(session.toggle_wireframe(b).unwrap(), Representation::Wireframe);
        session
            .set_transform(b, Matrix4::new_translation(&nalgebra::Vector3::new(3.0, 0.0, 0.0)))
            .unwrap();
        assert!(session.select_node(Some(b)).is_ok());

        let singular = Matrix4::zeros();
        assert_eq!(
            session.set_transform(b, singular).unwrap_err().kind(),
            ErrorKind::InvalidTransform
        );
        assert_eq!(
            session.select_node(Some(NodeId(99))).unwrap_err().kind(),
            ErrorKind::UnknownNode
        );

        assert_eq!(session.remove_node(a), Ok(true));
        assert_eq!(session.remove_node(a), Ok(false));
        assert_eq!(session.clear_all(), Ok(1));
        assert!(session.loaded_files().is_empty());
        assert!(session.latest_frame().unwrap().image.is_blank());
    }

    #[test]
    fn test_zoom_out_keeps_model_visible() {
        let (session, _frames) = controller();
        session.upload("cube.stl", cube_stl()).unwrap();
        let fitted = session.latest_frame().unwrap().image.covered();
        assert!(fitted > 0);

        // Eight wheel ticks out, then a 4x dolly out from the fitted view.
        for factor in [0.9f32.powi(8), 0.25] {
            session.handle_input(ClientInput::ResetView).unwrap();
            session.handle_input(ClientInput::Zoom { factor }).unwrap();
            assert!(session.pump().unwrap().is_some());
            let covered = session.latest_frame().unwrap().image.covered();
            assert!(covered > 0, "blank frame after zooming by {}", factor);
            assert!(covered < fitted);
        }
    }

    #[test]
    fn test_mutation_conflict_is_reported_not_retried() {
        let mut config = ViewerConfig::default();
        config.scene.mutation_timeout_ms = 20;
        let (transport, _frames) = ChannelTransport::new();
        let session = SessionController::builder(config).build(Box::new(transport));
        let id = session.upload("cube.stl", cube_stl()).unwrap();
        let events = session.subscribe();
        let revision = session.scene().revision();

        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let scene = session.scene().clone();
        let reader = thread::spawn(move || {
            let _graph = scene.read();
            held_tx.send(()).unwrap();
            let _ = release_rx.recv();
        });
        held_rx.recv().unwrap();

        let err = session.set_visible(id, false).unwrap_err();
        release_tx.send(()).unwrap();
        reader.join().unwrap();

        assert_eq!(err.kind(), ErrorKind::SceneMutationConflict);
        assert_eq!(session.last_error(), Some(err));
        let errors: Vec<ErrorKind> = events
            .try_iter()
            .filter_map(|e| match e {
                SessionEvent::Error { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(errors, vec![ErrorKind::SceneMutationConflict]);
        assert_eq!(session.scene().revision(), revision);
        assert!(session.loaded_files()[0].visible);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_close_cancels_inflight_load() {
        let (tessellator, started, _release) = gated();
        let (transport, _frames) = ChannelTransport::new();
        let session = Arc::new(
            SessionController::builder(ViewerConfig::default())
                .tessellator(tessellator)
                .build(Box::new(transport)),
        );

        let background = {
            let session = session.clone();
            thread::spawn(move || session.upload("part.step", VALID_STEP.as_bytes().to_vec()))
        };
        started.recv().unwrap();
        session.close();

        let result = background.join().unwrap();
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
        assert!(session.scene().read().is_empty());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.upload("cube.stl", cube_stl()), Err(SessionError::Closed));
        assert_eq!(session.pump(), Err(SessionError::Closed));
    }

    #[test]
    fn test_shared_scene_between_sessions() {
        let scene = SharedScene::default();
        let (first_transport, _first_frames) = ChannelTransport::new();
        let (second_transport, second_frames) = ChannelTransport::new();
        let first = SessionController::builder(ViewerConfig::default())
            .scene(scene.clone())
            .build(Box::new(first_transport));
        let second = SessionController::builder(ViewerConfig::default())
            .scene(scene.clone())
            .build(Box::new(second_transport));

        let empty = second.pump().unwrap().unwrap();
        second.acknowledge(empty);
        let id = first.upload("cube.stl", cube_stl()).unwrap();

        assert!(second.pump().unwrap().is_some());
        let _ = second_frames.try_recv();
        let frame = second_frames.try_recv().unwrap();
        assert_eq!(frame.visible_nodes, vec![id]);

        // Closing the first session removes its node but keeps the graph alive.
        drop(first);
        assert!(scene.read().is_empty());
        // Ours, plus the second controller and its render session.
        assert_eq!(scene.handle_count(), 3);
        second.acknowledge(frame.sequence);
        assert!(second.pump().unwrap().is_some());
        assert!(second.latest_frame().unwrap().image.is_blank());
    }
}
