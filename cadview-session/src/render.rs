/// Render session: one camera and rasterizer viewing a shared scene
use std::collections::HashMap;
use std::sync::Arc;

use cadview_core::{
    Aabb, Camera, CameraSnapshot, CancelToken, Color, NodeId, PickHit, SceneGraph, SharedScene,
};
use serde::{Deserialize, Serialize};

use crate::config::RenderSettings;
use crate::raster::{Actor, FrameImage, Rasterizer, RenderTarget};

/// Rendered frames are shared between the session, the synchronizer and
/// whoever is presenting them.
pub type FrameHandle = Arc<Frame>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    /// Monotonic per render session.
    pub sequence: u64,
    pub scene_revision: u64,
    pub camera: CameraSnapshot,
    pub visible_nodes: Vec<NodeId>,
    pub selection: Option<PickHit>,
    pub image: FrameImage,
}

impl Frame {
    /// Same camera, same visible geometry, same pixels; sequence aside.
    pub fn same_view(&self, other: &Frame) -> bool {
        self.camera == other.camera
            && self.visible_nodes == other.visible_nodes
            && self.image == other.image
    }
}

/// Accumulated camera manipulation. Rotations and pans add, zoom multiplies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraDelta {
    /// Radians about the up vector.
    pub yaw: f32,
    /// Radians about the camera's right axis.
    pub pitch: f32,
    /// Fractions of the eye distance.
    pub pan_x: f32,
    pub pan_y: f32,
    /// Greater than 1 moves closer.
    pub zoom: f32,
}

impl Default for CameraDelta {
    fn default() -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            pan_x: 0.0,
            pan_y: 0.0,
            zoom: 1.0,
        }
    }
}

impl CameraDelta {
    pub fn orbit(yaw: f32, pitch: f32) -> Self {
        Self {
            yaw,
            pitch,
            ..Self::default()
        }
    }

    pub fn pan(dx: f32, dy: f32) -> Self {
        Self {
            pan_x: dx,
            pan_y: dy,
            ..Self::default()
        }
    }

    pub fn zoom(factor: f32) -> Self {
        Self {
            zoom: factor,
            ..Self::default()
        }
    }

    pub fn merge(&mut self, other: &CameraDelta) {
        self.yaw += other.yaw;
        self.pitch += other.pitch;
        self.pan_x += other.pan_x;
        self.pan_y += other.pan_y;
        self.zoom *= other.zoom;
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

/// Owns the camera and rasterizer for one client; borrows the scene.
pub struct RenderSession {
    scene: SharedScene,
    camera: Camera,
    rasterizer: Box<dyn Rasterizer>,
    settings: RenderSettings,
    /// What was last handed to the rasterizer, per node.
    actors: HashMap<NodeId, Actor>,
    selection: Option<PickHit>,
    edge_node: Option<NodeId>,
    next_sequence: u64,
    last_frame: Option<FrameHandle>,
    /// Camera, selection or size changed since `last_frame`.
    dirty: bool,
}

impl RenderSession {
    pub fn new(scene: SharedScene, rasterizer: Box<dyn Rasterizer>, settings: RenderSettings) -> Self {
        let camera = initial_camera(&settings);
        Self {
            scene,
            camera,
            rasterizer,
            settings,
            actors: HashMap::new(),
            selection: None,
            edge_node: None,
            next_sequence: 1,
            last_frame: None,
            dirty: true,
        }
    }

    pub fn scene(&self) -> &SharedScene {
        &self.scene
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn selection(&self) -> Option<PickHit> {
        self.selection
    }

    pub fn edge_node(&self) -> Option<NodeId> {
        self.edge_node
    }

    pub fn last_frame(&self) -> Option<&FrameHandle> {
        self.last_frame.as_ref()
    }

    /// Frames are rendered only when something changed; otherwise the
    /// previous handle is returned.
    pub fn needs_render(&self) -> bool {
        match &self.last_frame {
            None => true,
            Some(frame) => self.dirty || frame.scene_revision != self.scene.revision(),
        }
    }

    /// Render the current state. Never fails: an empty scene gives a
    /// background-only frame.
    pub fn render(&mut self) -> FrameHandle {
        match self.render_with(&CancelToken::new()) {
            Some(frame) => frame,
            // Only a cancelled rasterizer returns nothing; keep showing what we had.
            None => self
                .last_frame
                .clone()
                .unwrap_or_else(|| self.blank_frame()),
        }
    }

    /// Render, giving up (and leaving the last frame in place) if `cancel` fires.
    pub fn render_with(&mut self, cancel: &CancelToken) -> Option<FrameHandle> {
        if !self.needs_render() {
            return self.last_frame.clone();
        }

        let (revision, visible_nodes) = {
            let scene = self.scene.clone();
            let graph = scene.read();
            (graph.revision(), self.sync_actors(&graph))
        };

        let target = self.target();
        let image = self.rasterizer.render(&self.camera, &target, cancel)?;

        let frame = Arc::new(Frame {
            sequence: self.next_sequence,
            scene_revision: revision,
            camera: self.camera.snapshot(),
            visible_nodes,
            selection: self.selection,
            image,
        });
        self.next_sequence += 1;
        self.dirty = false;
        self.last_frame = Some(frame.clone());
        log::debug!(
            "rendered frame {} (scene revision {}, {} nodes)",
            frame.sequence,
            frame.scene_revision,
            frame.visible_nodes.len()
        );
        Some(frame)
    }

    /// Frame the given bounds; `None` (an empty scene) restores the home view.
    pub fn reset_camera_to_fit(&mut self, bounds: Option<Aabb>) {
        match bounds {
            Some(bounds) => {
                self.camera.fit_to_bounds(&bounds, self.settings.fit_margin);
                log::debug!(
                    "camera fitted to bounds {:?}..{:?}",
                    bounds.min,
                    bounds.max
                );
            }
            None => self.camera = initial_camera(&self.settings),
        }
        self.dirty = true;
    }

    /// Fit the camera to whatever the scene holds now.
    pub fn reset_camera(&mut self) {
        let bounds = self.scene.read().compute_bounds();
        self.reset_camera_to_fit(bounds);
    }

    pub fn apply_camera_delta(&mut self, delta: &CameraDelta) {
        if delta.is_identity() {
            return;
        }
        let orbit = self.settings.orbit_sensitivity;
        let pan = self.settings.pan_sensitivity;
        self.camera.orbit(delta.yaw * orbit, delta.pitch * orbit);
        self.camera.pan(delta.pan_x * pan, delta.pan_y * pan);
        self.camera.zoom(delta.zoom);
        self.dirty = true;
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        if (width, height) == (self.settings.width, self.settings.height) {
            return;
        }
        self.settings.width = width;
        self.settings.height = height;
        self.camera.aspect = aspect_ratio(&self.settings);
        self.dirty = true;
    }

    /// Select the nearest visible triangle under cell `(x, y)`. A miss keeps
    /// the current selection.
    pub fn pick(&mut self, x: f32, y: f32) -> Option<PickHit> {
        let ray = self.camera.ray_through(
            x + 0.5,
            y + 0.5,
            self.settings.width,
            self.settings.height,
        )?;
        let hit = self.scene.read().pick(&ray)?;
        log::debug!(
            "picked triangle {} of node {} at distance {}",
            hit.triangle,
            hit.node,
            hit.distance
        );
        self.selection = Some(hit);
        self.dirty = true;
        Some(hit)
    }

    pub fn clear_selection(&mut self) -> bool {
        let had = self.selection.take().is_some();
        self.dirty |= had;
        had
    }

    /// Outline one node's edges, or none.
    pub fn select_node(&mut self, node: Option<NodeId>) {
        if self.edge_node != node {
            self.edge_node = node;
            self.dirty = true;
        }
    }

    fn target(&self) -> RenderTarget {
        RenderTarget {
            width: self.settings.width,
            height: self.settings.height,
            background: self.settings.background,
        }
    }

    fn blank_frame(&self) -> FrameHandle {
        Arc::new(Frame {
            sequence: 0,
            scene_revision: 0,
            camera: self.camera.snapshot(),
            visible_nodes: Vec::new(),
            selection: None,
            image: FrameImage::blank(&self.target()),
        })
    }

    /// Mirror the visible nodes of `graph` into the rasterizer and return
    /// their ids in ascending order.
    fn sync_actors(&mut self, graph: &SceneGraph) -> Vec<NodeId> {
        // Selection state pointing at removed nodes is dropped first.
        if self.selection.map_or(false, |hit| !graph.contains(hit.node)) {
            self.selection = None;
        }
        if self.edge_node.map_or(false, |id| !graph.contains(id)) {
            self.edge_node = None;
        }

        // Phase 1: remove actors whose node is gone or hidden.
        let stale: Vec<NodeId> = self
            .actors
            .keys()
            .copied()
            .filter(|id| !graph.get(*id).map_or(false, |n| n.visible()))
            .collect();
        for id in stale {
            self.actors.remove(&id);
            self.rasterizer.remove_actor(id);
        }

        // Phase 2 and 3: add new actors, replace changed ones.
        let mut visible = Vec::new();
        for node in graph.iter().filter(|n| n.visible()) {
            let id = node.id();
            visible.push(id);

            let actor = Actor {
                mesh: node.mesh().clone(),
                model: *node.transform().matrix(),
                color: node.color(),
                representation: node.representation(),
                edges: (self.edge_node == Some(id)).then_some(Color::EDGE),
                highlight: self
                    .selection
                    .filter(|hit| hit.node == id)
                    .map(|hit| (hit.triangle, Color::HIGHLIGHT)),
            };

            let unchanged = self
                .actors
                .get(&id)
                .map_or(false, |current| same_actor(current, &actor));
            if !unchanged {
                self.rasterizer.add_actor(id, actor.clone());
                self.actors.insert(id, actor);
            }
        }
        visible
    }
}

fn same_actor(a: &Actor, b: &Actor) -> bool {
    Arc::ptr_eq(&a.mesh, &b.mesh)
        && a.model == b.model
        && a.color == b.color
        && a.representation == b.representation
        && a.edges == b.edges
        && a.highlight == b.highlight
}

/// Width over height in world terms, correcting for non-square cells.
fn aspect_ratio(settings: &RenderSettings) -> f32 {
    settings.width.max(1) as f32 / (settings.height.max(1) as f32 * settings.pixel_aspect)
}

fn initial_camera(settings: &RenderSettings) -> Camera {
    let mut camera = Camera::new(settings.width, settings.height);
    camera.fov = settings.fov_degrees.to_radians();
    camera.aspect = aspect_ratio(settings);
    camera
}
