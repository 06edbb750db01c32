/// Scene graph: the renderable nodes of a viewing session
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

use crate::bounds::Aabb;
use crate::color::Color;
use crate::error::SceneError;
use crate::geometry::Mesh;
use crate::loader::FileFormat;
use crate::picking::{intersect_triangle, PickHit, Ray};
use crate::transform::Transform;

/// Stable node handle. Ids are handed out in increasing order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a node's triangles are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Representation {
    #[default]
    Surface,
    Wireframe,
}

impl Representation {
    pub fn toggled(self) -> Self {
        match self {
            Representation::Surface => Representation::Wireframe,
            Representation::Wireframe => Representation::Surface,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    id: NodeId,
    label: String,
    format: Option<FileFormat>,
    mesh: Arc<Mesh>,
    /// Mesh bounds in model space, computed once at insertion.
    local_bounds: Option<Aabb>,
    transform: Transform,
    visible: bool,
    color: Color,
    representation: Representation,
}

impl SceneNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn format(&self) -> Option<FileFormat> {
        self.format
    }

    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn representation(&self) -> Representation {
        self.representation
    }

    /// Bounds after applying the node transform.
    pub fn world_bounds(&self) -> Option<Aabb> {
        self.local_bounds
            .map(|b| b.transformed(self.transform.matrix()))
    }
}

/// Map from node id to node, iterated in ascending id order.
///
/// Every mutating call bumps [`SceneGraph::revision`] and drops the cached
/// bounds, so render sessions can tell whether they are looking at stale state.
#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: BTreeMap<NodeId, SceneNode>,
    next_id: u64,
    revision: u64,
    bounds: OnceLock<Option<Aabb>>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `mesh` under a fresh id, labelled after the id.
    pub fn add_node(&mut self, mesh: Mesh, transform: Transform) -> NodeId {
        let label = format!("node-{}", self.next_id + 1);
        self.add_labeled(mesh, transform, label, None)
    }

    /// Insert `mesh` with display metadata (usually the uploaded filename).
    pub fn add_labeled(
        &mut self,
        mesh: Mesh,
        transform: Transform,
        label: impl Into<String>,
        format: Option<FileFormat>,
    ) -> NodeId {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        let local_bounds = mesh.bounds();
        self.nodes.insert(
            id,
            SceneNode {
                id,
                label: label.into(),
                format,
                mesh: Arc::new(mesh),
                local_bounds,
                transform,
                visible: true,
                color: Color::SURFACE,
                representation: Representation::Surface,
            },
        );
        self.invalidate();
        log::debug!("scene: added node {} (revision {})", id, self.revision);
        id
    }

    /// Remove a node. Unknown or already-removed ids return `false`.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        if self.nodes.remove(&id).is_none() {
            return false;
        }
        self.invalidate();
        log::debug!("scene: removed node {} (revision {})", id, self.revision);
        true
    }

    /// Replace a node's transform. The matrix must be an invertible affine map.
    pub fn set_transform(&mut self, id: NodeId, matrix: Matrix4<f32>) -> Result<(), SceneError> {
        let transform = Transform::try_from_matrix(matrix)?;
        self.node_mut(id)?.transform = transform;
        self.invalidate();
        Ok(())
    }

    pub fn set_visible(&mut self, id: NodeId, visible: bool) -> Result<(), SceneError> {
        self.node_mut(id)?.visible = visible;
        self.invalidate();
        Ok(())
    }

    pub fn set_color(&mut self, id: NodeId, color: Color) -> Result<(), SceneError> {
        self.node_mut(id)?.color = color;
        self.invalidate();
        Ok(())
    }

    pub fn set_representation(
        &mut self,
        id: NodeId,
        representation: Representation,
    ) -> Result<(), SceneError> {
        self.node_mut(id)?.representation = representation;
        self.invalidate();
        Ok(())
    }

    /// Flip surface/wireframe and return the new representation.
    pub fn toggle_wireframe(&mut self, id: NodeId) -> Result<Representation, SceneError> {
        let node = self.node_mut(id)?;
        node.representation = node.representation.toggled();
        let representation = node.representation;
        self.invalidate();
        Ok(representation)
    }

    /// Remove every node and return the removed ids.
    pub fn clear(&mut self) -> Vec<NodeId> {
        let removed: Vec<NodeId> = self.nodes.keys().copied().collect();
        self.nodes.clear();
        self.invalidate();
        removed
    }

    /// Union of all node bounds in world space; `None` for an empty graph.
    ///
    /// Hidden nodes are included, so toggling visibility does not move the
    /// fitted camera.
    pub fn compute_bounds(&self) -> Option<Aabb> {
        *self.bounds.get_or_init(|| {
            self.nodes
                .values()
                .filter_map(SceneNode::world_bounds)
                .reduce(|acc, b| acc.union(&b))
        })
    }

    /// Nearest visible triangle hit by `ray`.
    pub fn pick(&self, ray: &Ray) -> Option<PickHit> {
        let mut best: Option<PickHit> = None;
        for node in self.nodes.values().filter(|n| n.visible) {
            match node.world_bounds() {
                Some(bounds) if ray.hits_aabb(&bounds) => {}
                _ => continue,
            }

            let matrix = node.transform.matrix();
            for index in 0..node.mesh.triangle_count() {
                let Some(corners) = node.mesh.triangle(index) else {
                    continue;
                };
                let world = corners.map(|p| matrix.transform_point(&p));
                if let Some(t) = intersect_triangle(ray, &world) {
                    if best.map_or(true, |b| t < b.distance) {
                        best = Some(PickHit {
                            node: node.id,
                            triangle: index,
                            distance: t,
                        });
                    }
                }
            }
        }
        best
    }

    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Nodes in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &SceneNode> {
        self.nodes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut SceneNode, SceneError> {
        self.nodes.get_mut(&id).ok_or(SceneError::UnknownNode(id))
    }

    fn invalidate(&mut self) {
        self.revision += 1;
        self.bounds = OnceLock::new();
    }
}
