/// Viewer configuration loaded from TOML
use std::path::Path;
use std::time::Duration;

use cadview_core::{Color, LoaderOptions};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Root configuration. Every table and key is optional.
///
/// ```toml
/// [loader]
/// tolerance = 0.01
///
/// [render]
/// width = 120
/// height = 40
///
/// [scene]
/// mutation_timeout_ms = 250
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub loader: LoaderOptions,
    pub render: RenderSettings,
    pub scene: SceneSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Frame size in cells.
    pub width: u32,
    pub height: u32,
    /// Height of one cell divided by its width (terminal glyphs are tall).
    pub pixel_aspect: f32,
    pub fov_degrees: f32,
    /// Distance factor applied when fitting the camera; 1.0 is a tight fit.
    pub fit_margin: f32,
    /// Radians of orbit per unit of client drag.
    pub orbit_sensitivity: f32,
    /// View-plane pan per unit of client drag, as a fraction of eye distance.
    pub pan_sensitivity: f32,
    pub background: Color,
    pub surface: Color,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 80,
            height: 24,
            pixel_aspect: 2.0,
            fov_degrees: 45.0,
            fit_margin: 1.1,
            orbit_sensitivity: 1.0,
            pan_sensitivity: 1.0,
            background: Color::BACKGROUND,
            surface: Color::SURFACE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneSettings {
    /// How long a structural mutation waits for the shared scene lock.
    pub mutation_timeout_ms: u64,
}

impl SceneSettings {
    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_millis(self.mutation_timeout_ms)
    }
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            mutation_timeout_ms: 250,
        }
    }
}

impl ViewerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ViewerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        log::info!("loaded viewer config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let loader = &self.loader;
        if !(loader.tolerance.is_finite() && loader.tolerance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "loader.tolerance must be positive, got {}",
                loader.tolerance
            )));
        }
        if loader.max_payload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "loader.max_payload_bytes must be positive".to_string(),
            ));
        }

        let render = &self.render;
        if render.width == 0 || render.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "render size must be non-zero, got {}x{}",
                render.width, render.height
            )));
        }
        let positive = [
            ("render.pixel_aspect", render.pixel_aspect),
            ("render.fit_margin", render.fit_margin),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if !(render.fov_degrees > 1.0 && render.fov_degrees < 179.0) {
            return Err(ConfigError::Invalid(format!(
                "render.fov_degrees must be between 1 and 179, got {}",
                render.fov_degrees
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = ViewerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ViewerConfig::default());
        assert_eq!(config.scene.mutation_timeout(), Duration::from_millis(250));
        assert_eq!(config.loader.tolerance, 0.01);
    }

    #[test]
    fn test_partial_tables() {
        let config = ViewerConfig::from_toml_str(
            r#"
            [loader]
            tolerance = 0.05

            [render]
            width = 120
            background = { r = 0.0, g = 0.0, b = 0.0 }
            "#,
        )
        .unwrap();
        assert_eq!(config.loader.tolerance, 0.05);
        assert_eq!(config.loader.max_tolerance_relaxations, 2);
        assert_eq!(config.render.width, 120);
        assert_eq!(config.render.height, 24);
        assert_eq!(config.render.background, Color::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            ViewerConfig::from_toml_str("[render]\nwidth = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ViewerConfig::from_toml_str("[loader]\ntolerance = -1.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ViewerConfig::from_toml_str("[render]\nfit_margin = 0.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ViewerConfig::from_toml_str("[render\nwidth = 3"),
            Err(ConfigError::Parse(_))
        ));
    }
}
