//! Engine configuration.
//!
//! Every field has a default, so a partial `perception.json` only needs the
//! values it changes. The library never reads configuration on its own; the
//! binary loads it and hands it to [`crate::Engine::new`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::color::PaletteOptions;
use crate::cta::DetectorOptions;
use crate::error::PerceptionError;
use crate::ocr::OcrOptions;
use crate::spacing::SpacingOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub palette: PaletteOptions,
    pub ocr: OcrOptions,
    pub spacing: SpacingOptions,
    pub cta: DetectorOptions,
    /// Runs the CTA safety net when a contour backend is compiled in.
    pub cta_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            palette: PaletteOptions::default(),
            ocr: OcrOptions::default(),
            spacing: SpacingOptions::default(),
            cta: DetectorOptions::default(),
            cta_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON document.
    pub fn from_json(contents: &str) -> Result<Self, PerceptionError> {
        let config: EngineConfig =
            serde_json::from_str(contents).map_err(|e| PerceptionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from `path`, falling back to defaults when the file
    /// is missing, unreadable or invalid.
    pub fn load(path: &Path) -> Self {
        crate::log(&format!("Looking for config at: {}", path.display()));

        if !path.exists() {
            crate::log("Config file not found. Using default config.");
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    crate::log(&format!("Config loaded from {}", path.display()));
                    config
                }
                Err(e) => {
                    crate::log(&format!("Failed to parse {}: {}. Using defaults.", path.display(), e));
                    Self::default()
                }
            },
            Err(e) => {
                crate::log(&format!("Failed to read {}: {}. Using defaults.", path.display(), e));
                Self::default()
            }
        }
    }

    /// Rejects values no stage can work with.
    pub fn validate(&self) -> Result<(), PerceptionError> {
        let cta = &self.cta;
        if cta.aspect_min > cta.aspect_max {
            return Err(PerceptionError::Config(format!(
                "cta.aspectMin ({}) exceeds cta.aspectMax ({})",
                cta.aspect_min, cta.aspect_max
            )));
        }
        if !(0.0..=1.0).contains(&cta.nms_iou) {
            return Err(PerceptionError::Config(format!(
                "cta.nmsIou must be within [0, 1], got {}",
                cta.nms_iou
            )));
        }
        if cta.gamma <= 0.0 {
            return Err(PerceptionError::Config("cta.gamma must be positive".to_string()));
        }
        if self.ocr.band_height <= 0.0 {
            return Err(PerceptionError::Config("ocr.bandHeight must be positive".to_string()));
        }
        if self.palette.palette_size == 0 {
            return Err(PerceptionError::Config("palette.paletteSize must be at least 1".to_string()));
        }
        Ok(())
    }
}
