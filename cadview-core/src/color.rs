/// Linear RGB colors used for surfaces, highlights and backgrounds
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    /// Light gray-blue given to freshly loaded geometry.
    pub const SURFACE: Color = Color::new(0.7, 0.75, 0.8);
    /// Bright green for the picked triangle.
    pub const HIGHLIGHT: Color = Color::new(0.2, 0.9, 0.4);
    /// Edge overlay of the selected node.
    pub const EDGE: Color = Color::new(0.3, 0.6, 1.0);
    pub const BACKGROUND: Color = Color::new(0.12, 0.12, 0.15);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Multiply every channel by `factor`, clamped to `[0, 1]`.
    pub fn scaled(&self, factor: f32) -> Self {
        let f = factor.clamp(0.0, 1.0);
        Self::new(self.r * f, self.g * f, self.b * f)
    }

    pub fn to_rgb8(&self) -> [u8; 3] {
        let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        [channel(self.r), channel(self.g), channel(self.b)]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::SURFACE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb8_conversion() {
        assert_eq!(Color::new(1.0, 0.0, 0.5).to_rgb8(), [255, 0, 128]);
        assert_eq!(Color::new(2.0, -1.0, 0.0).to_rgb8(), [255, 0, 0]);
    }

    #[test]
    fn test_scaled_clamps_factor() {
        let c = Color::new(0.5, 0.5, 0.5);
        assert_eq!(c.scaled(2.0), c);
        assert_eq!(c.scaled(0.0), Color::new(0.0, 0.0, 0.0));
    }
}
