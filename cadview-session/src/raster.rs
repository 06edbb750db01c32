/// Off-screen rasterization seam and the built-in ASCII rasterizer
use std::collections::BTreeMap;
use std::sync::Arc;

use cadview_core::cancel::CANCEL_CHECK_INTERVAL;
use cadview_core::geometry::face_normal;
use cadview_core::projection::project_unclipped;
use cadview_core::{Camera, CancelToken, Color, Mesh, NodeId, Representation};
use nalgebra::{Matrix4, Point3};
use serde::Serialize;

/// Character luminosity ramp for depth/shading (darkest to lightest)
const LUMINOSITY_RAMP: &[char] = &[' ', '.', ':', '-', '=', '+', '*', '#', '%', '@'];

/// Glyph used for the picked triangle.
const HIGHLIGHT_GLYPH: char = '@';

/// Lines win depth ties against the surfaces they lie on.
const EDGE_DEPTH_BIAS: f32 = 1e-3;

/// Lowest brightness a lit surface is drawn with, so grazing faces stay visible.
const AMBIENT: f32 = 0.15;

/// One renderable mesh as the rasterizer sees it.
#[derive(Debug, Clone)]
pub struct Actor {
    pub mesh: Arc<Mesh>,
    pub model: Matrix4<f32>,
    pub color: Color,
    pub representation: Representation,
    /// Draw every triangle edge in this color on top of the surface.
    pub edges: Option<Color>,
    /// Fill one triangle (by index) in this color.
    pub highlight: Option<(usize, Color)>,
}

impl Actor {
    pub fn new(mesh: Arc<Mesh>, model: Matrix4<f32>) -> Self {
        Self {
            mesh,
            model,
            color: Color::SURFACE,
            representation: Representation::Surface,
            edges: None,
            highlight: None,
        }
    }
}

/// Size and clear color of a render target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTarget {
    pub width: u32,
    pub height: u32,
    pub background: Color,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Cell {
    pub glyph: char,
    pub color: Color,
}

/// A rendered image: one glyph and color per cell, row-major.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameImage {
    pub width: u32,
    pub height: u32,
    pub background: Color,
    pub cells: Vec<Cell>,
}

impl FrameImage {
    pub fn blank(target: &RenderTarget) -> Self {
        let cell = Cell {
            glyph: ' ',
            color: target.background,
        };
        Self {
            width: target.width,
            height: target.height,
            background: target.background,
            cells: vec![cell; target.width as usize * target.height as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Option<&Cell> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.cells.get((y * self.width + x) as usize)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Cell]> {
        self.cells.chunks(self.width.max(1) as usize)
    }

    /// Cells that show geometry rather than background.
    pub fn covered(&self) -> usize {
        self.cells.iter().filter(|c| c.glyph != ' ').count()
    }

    pub fn is_blank(&self) -> bool {
        self.covered() == 0
    }

    pub fn to_text(&self) -> String {
        self.rows()
            .map(|row| row.iter().map(|c| c.glyph).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// An off-screen-capable renderer holding a set of actors.
pub trait Rasterizer: Send {
    /// Insert or replace the actor for `id`.
    fn add_actor(&mut self, id: NodeId, actor: Actor);

    fn remove_actor(&mut self, id: NodeId) -> bool;

    fn actor_ids(&self) -> Vec<NodeId>;

    /// Draw every actor. Returns `None` when cancelled part-way.
    fn render(&mut self, camera: &Camera, target: &RenderTarget, cancel: &CancelToken)
        -> Option<FrameImage>;
}

/// ASCII renderer that converts 3D meshes to terminal characters
#[derive(Debug, Default)]
pub struct AsciiRasterizer {
    actors: BTreeMap<NodeId, Actor>,
    depth_buffer: Vec<f32>,
}

impl AsciiRasterizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Rasterizer for AsciiRasterizer {
    fn add_actor(&mut self, id: NodeId, actor: Actor) {
        self.actors.insert(id, actor);
    }

    fn remove_actor(&mut self, id: NodeId) -> bool {
        self.actors.remove(&id).is_some()
    }

    fn actor_ids(&self) -> Vec<NodeId> {
        self.actors.keys().copied().collect()
    }

    fn render(
        &mut self,
        camera: &Camera,
        target: &RenderTarget,
        cancel: &CancelToken,
    ) -> Option<FrameImage> {
        let size = target.width as usize * target.height as usize;
        self.depth_buffer.clear();
        self.depth_buffer.resize(size, f32::INFINITY);

        let mut canvas = Canvas {
            width: target.width as i32,
            height: target.height as i32,
            depth: &mut self.depth_buffer,
            image: FrameImage::blank(target),
        };

        let view_projection = camera.projection_matrix() * camera.view_matrix();
        let eye = camera.position();
        let mut drawn = 0usize;

        for actor in self.actors.values() {
            let mvp = view_projection * actor.model;
            for index in 0..actor.mesh.triangle_count() {
                drawn += 1;
                if drawn % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                    return None;
                }
                let Some(corners) = actor.mesh.triangle(index) else {
                    continue;
                };
                let Some(screen) = project_triangle(&mvp, &corners, target) else {
                    continue; // Triangle is clipped
                };

                let highlighted = actor
                    .highlight
                    .filter(|(picked, _)| *picked == index)
                    .map(|(_, color)| color);

                match (highlighted, actor.representation) {
                    (Some(color), _) => canvas.fill_triangle(&screen, HIGHLIGHT_GLYPH, color),
                    (None, Representation::Surface) => {
                        let world = corners.map(|p| actor.model.transform_point(&p));
                        let (glyph, color) = shade(&world, &eye, actor.color);
                        canvas.fill_triangle(&screen, glyph, color);
                    }
                    (None, Representation::Wireframe) => {
                        canvas.outline_triangle(&screen, actor.color)
                    }
                }

                if let Some(edge_color) = actor.edges {
                    canvas.outline_triangle(&screen, edge_color);
                }
            }
        }

        if cancel.is_cancelled() {
            return None;
        }
        Some(canvas.image)
    }
}

/// Screen coordinates of a triangle, or `None` when a corner is behind the
/// eye or all three lie beyond the same side of the view volume. Partly
/// visible triangles are kept; the canvas clips them per cell.
fn project_triangle(
    mvp: &Matrix4<f32>,
    corners: &[Point3<f32>; 3],
    target: &RenderTarget,
) -> Option<[(f32, f32, f32); 3]> {
    let a = project_unclipped(mvp, &corners[0], target.width, target.height)?;
    let b = project_unclipped(mvp, &corners[1], target.width, target.height)?;
    let c = project_unclipped(mvp, &corners[2], target.width, target.height)?;
    let screen = [a, b, c];

    let (w, h) = (target.width as f32, target.height as f32);
    let outside = |test: fn(&(f32, f32, f32), f32, f32) -> bool| {
        screen.iter().all(|v| test(v, w, h))
    };
    if outside(|v, _, _| v.0 < 0.0)
        || outside(|v, w, _| v.0 > w)
        || outside(|v, _, _| v.1 < 0.0)
        || outside(|v, _, h| v.1 > h)
        || outside(|v, _, _| v.2 < -1.0)
        || outside(|v, _, _| v.2 > 1.0)
    {
        return None;
    }
    Some(screen)
}

/// Headlight shading: faces pointing at the eye are brightest. Two-sided,
/// since tessellated CAD surfaces do not guarantee consistent winding.
fn shade(world: &[Point3<f32>; 3], eye: &Point3<f32>, base: Color) -> (char, Color) {
    let normal = face_normal(world);
    let centroid = nalgebra::center(&nalgebra::center(&world[0], &world[1]), &world[2]);
    let brightness = (eye - centroid)
        .try_normalize(1e-9)
        .map_or(0.0, |to_eye| normal.dot(&to_eye).abs());
    let brightness = AMBIENT + (1.0 - AMBIENT) * brightness.clamp(0.0, 1.0);

    // Skip the blank entry so every surface cell is visible.
    let steps = (LUMINOSITY_RAMP.len() - 2) as f32;
    let char_index = 1 + (brightness * steps).round() as usize;
    let char_index = char_index.min(LUMINOSITY_RAMP.len() - 1);
    (LUMINOSITY_RAMP[char_index], base.scaled(brightness))
}

/// Line glyph matching an edge's on-screen direction (y grows downward).
fn edge_glyph(dx: f32, dy: f32) -> char {
    if dx.abs() >= dy.abs() * 2.0 {
        '-'
    } else if dy.abs() >= dx.abs() * 2.0 {
        '|'
    } else if dx * dy > 0.0 {
        '\\'
    } else {
        '/'
    }
}

struct Canvas<'a> {
    width: i32,
    height: i32,
    depth: &'a mut [f32],
    image: FrameImage,
}

impl Canvas<'_> {
    fn plot(&mut self, x: i32, y: i32, depth: f32, glyph: char, color: Color) {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return;
        }
        if !(-1.0..=1.0).contains(&depth) {
            return;
        }
        let idx = y as usize * self.width as usize + x as usize;
        if depth < self.depth[idx] {
            self.depth[idx] = depth;
            self.image.cells[idx] = Cell { glyph, color };
        }
    }

    fn fill_triangle(&mut self, coords: &[(f32, f32, f32); 3], glyph: char, color: Color) {
        let (v0, v1, v2) = (coords[0], coords[1], coords[2]);

        // Bounding box
        let min_x = v0.0.min(v1.0).min(v2.0).floor() as i32;
        let max_x = v0.0.max(v1.0).max(v2.0).ceil() as i32;
        let min_y = v0.1.min(v1.1).min(v2.1).floor() as i32;
        let max_y = v0.1.max(v1.1).max(v2.1).ceil() as i32;

        // Clip to screen bounds
        let min_x = min_x.max(0);
        let max_x = max_x.min(self.width - 1);
        let min_y = min_y.max(0);
        let max_y = max_y.min(self.height - 1);

        // Scanline rasterization
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let px = x as f32 + 0.5;
                let py = y as f32 + 0.5;

                if let Some((w0, w1, w2)) =
                    barycentric((v0.0, v0.1), (v1.0, v1.1), (v2.0, v2.1), (px, py))
                {
                    if w0 >= 0.0 && w1 >= 0.0 && w2 >= 0.0 {
                        let depth = w0 * v0.2 + w1 * v1.2 + w2 * v2.2;
                        self.plot(x, y, depth, glyph, color);
                    }
                }
            }
        }
    }

    fn outline_triangle(&mut self, coords: &[(f32, f32, f32); 3], color: Color) {
        for i in 0..3 {
            self.draw_line(coords[i], coords[(i + 1) % 3], color);
        }
    }

    /// Bresenham line with linearly interpolated depth.
    fn draw_line(&mut self, a: (f32, f32, f32), b: (f32, f32, f32), color: Color) {
        let glyph = edge_glyph(b.0 - a.0, b.1 - a.1);
        let Some((a, b)) = clip_segment(a, b, self.width as f32, self.height as f32) else {
            return;
        };
        let (x0, y0) = (a.0.floor() as i32, a.1.floor() as i32);
        let (x1, y1) = (b.0.floor() as i32, b.1.floor() as i32);

        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let steps = dx.max(-dy).max(1) as f32;

        let (mut x, mut y) = (x0, y0);
        let mut err = dx + dy;
        let mut step = 0.0f32;
        loop {
            let depth = a.2 + (b.2 - a.2) * (step / steps) - EDGE_DEPTH_BIAS;
            self.plot(x, y, depth, glyph, color);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
            step += 1.0;
        }
    }
}

/// Liang-Barsky clip of a screen segment to `[0, width] x [0, height]`,
/// interpolating depth along with it.
fn clip_segment(
    a: (f32, f32, f32),
    b: (f32, f32, f32),
    width: f32,
    height: f32,
) -> Option<((f32, f32, f32), (f32, f32, f32))> {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let mut t0 = 0.0f32;
    let mut t1 = 1.0f32;
    for (p, q) in [
        (-dx, a.0),
        (dx, width - a.0),
        (-dy, a.1),
        (dy, height - a.1),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return None;
        }
    }
    let at = |t: f32| (a.0 + dx * t, a.1 + dy * t, a.2 + (b.2 - a.2) * t);
    Some((at(t0), at(t1)))
}

/// Calculate barycentric coordinates for a point in a triangle
fn barycentric(
    v0: (f32, f32),
    v1: (f32, f32),
    v2: (f32, f32),
    p: (f32, f32),
) -> Option<(f32, f32, f32)> {
    let denom = (v1.1 - v2.1) * (v0.0 - v2.0) + (v2.0 - v1.0) * (v0.1 - v2.1);

    if denom.abs() < 1e-6 {
        return None;
    }

    let w0 = ((v1.1 - v2.1) * (p.0 - v2.0) + (v2.0 - v1.0) * (p.1 - v2.1)) / denom;
    let w1 = ((v2.1 - v0.1) * (p.0 - v2.0) + (v0.0 - v2.0) * (p.1 - v2.1)) / denom;
    let w2 = 1.0 - w0 - w1;

    Some((w0, w1, w2))
}
