//! End-to-end extraction.
//!
//! Decode once, then colors, OCR and spacing read the same buffer in
//! parallel. Contrast waits for OCR boxes and the palette; the CTA detector
//! waits for OCR.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::color::{extract_colors, ColorSection};
use crate::config::EngineConfig;
use crate::contrast::{analyze_contrast, analyze_text_contrast, ContrastSection};
use crate::cta::backend::{self, ContourBackend};
use crate::cta::{ButtonDetection, CtaDetector, OcrBox};
use crate::error::PerceptionError;
use crate::geometry::normalize_wire;
use crate::ocr::{self, TextRecognizer, TextSection};
use crate::sampler::PixelBuffer;
use crate::spacing::{analyze_spacing, text_metrics, SpacingSection, TextMetrics};

/// One image to analyze.
#[derive(Debug, Clone, Default)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    /// Pre-computed text regions. When present they replace recognizer boxes
    /// as the button detector's labels.
    pub ocr_regions: Option<Vec<OcrRegionWire>>,
    /// Defaults to the image height.
    pub viewport_height: Option<u32>,
}

impl ImageInput {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            ..Default::default()
        }
    }
}

/// Text region as supplied by a caller, box in either wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrRegionWire {
    pub text: String,
    pub bbox: [f64; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Loading,
    Colors,
    Text,
    Contrast,
    Spacing,
    Complete,
}

impl Stage {
    pub fn percent(&self) -> u8 {
        match self {
            Stage::Loading => 0,
            Stage::Colors => 25,
            Stage::Text => 50,
            Stage::Contrast => 75,
            Stage::Spacing => 90,
            Stage::Complete => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Loading => "loading",
            Stage::Colors => "colors",
            Stage::Text => "text",
            Stage::Contrast => "contrast",
            Stage::Spacing => "spacing",
            Stage::Complete => "complete",
        }
    }
}

/// Progress observer. Called on the caller's thread; has no effect on results.
pub type ProgressFn<'a> = &'a dyn Fn(Stage, u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub dimensions: Dimensions,
    pub byte_size: usize,
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedData {
    pub colors: ColorSection,
    pub contrast: ContrastSection,
    pub text: TextSection,
    pub spacing: SpacingSection,
    pub metadata: Metadata,
}

/// Everything the facts transcript is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerceptionResult {
    pub extracted: ExtractedData,
    pub buttons: Vec<ButtonDetection>,
    pub metrics: Option<TextMetrics>,
}

pub struct Engine {
    config: EngineConfig,
    recognizer: Box<dyn TextRecognizer>,
    detector: CtaDetector,
}

impl Engine {
    /// The contour backend is resolved here, once, from `config.cta_enabled`.
    pub fn new(config: EngineConfig, recognizer: Box<dyn TextRecognizer>) -> Self {
        let backend = backend::resolve(config.cta_enabled);
        Self::with_backend(config, recognizer, backend)
    }

    pub fn with_backend(
        config: EngineConfig,
        recognizer: Box<dyn TextRecognizer>,
        backend: Box<dyn ContourBackend>,
    ) -> Self {
        crate::log(&format!(
            "Engine ready (ocr: {}, contours: {})",
            recognizer.name(),
            backend.name()
        ));
        Self {
            config,
            recognizer,
            detector: CtaDetector::new(backend),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Colors, contrast, text, spacing and metadata for one image.
    ///
    /// Only undecodable input is an error; failing stages degrade.
    pub fn extract_all(
        &self,
        input: &ImageInput,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<ExtractedData, PerceptionError> {
        self.extract_all_with_cancel(input, progress, &CancelToken::new())
    }

    pub fn extract_all_with_cancel(
        &self,
        input: &ImageInput,
        progress: Option<ProgressFn<'_>>,
        cancel: &CancelToken,
    ) -> Result<ExtractedData, PerceptionError> {
        let (_, extracted) = self.extract_stages(input, progress, cancel)?;
        report(progress, Stage::Complete);
        Ok(extracted)
    }

    /// [`Engine::extract_all`] plus button detection and text metrics.
    pub fn perceive(
        &self,
        input: &ImageInput,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<PerceptionResult, PerceptionError> {
        self.perceive_with_cancel(input, progress, &CancelToken::new())
    }

    pub fn perceive_with_cancel(
        &self,
        input: &ImageInput,
        progress: Option<ProgressFn<'_>>,
        cancel: &CancelToken,
    ) -> Result<PerceptionResult, PerceptionError> {
        let (pixels, extracted) = self.extract_stages(input, progress, cancel)?;
        check_cancel(cancel)?;

        let labels = self.label_boxes(input, &extracted.text, pixels.dimensions());
        let viewport_height = input.viewport_height.unwrap_or(pixels.height());
        let buttons = self
            .detector
            .detect_buttons(pixels.rgba(), &labels, viewport_height, &self.config.cta);
        let metrics = text_metrics(&extracted.text.blocks);

        report(progress, Stage::Complete);
        Ok(PerceptionResult {
            extracted,
            buttons,
            metrics,
        })
    }

    fn extract_stages(
        &self,
        input: &ImageInput,
        progress: Option<ProgressFn<'_>>,
        cancel: &CancelToken,
    ) -> Result<(PixelBuffer, ExtractedData), PerceptionError> {
        report(progress, Stage::Loading);
        check_cancel(cancel)?;

        let pixels = PixelBuffer::decode(&input.bytes)?;
        let (width, height) = pixels.dimensions();
        crate::log(&format!(
            "Decoded {}x{} image ({} bytes)",
            width,
            height,
            pixels.byte_size()
        ));
        check_cancel(cancel)?;

        let (colors, (text, spacing)) = rayon::join(
            || extract_colors(&pixels, &self.config.palette),
            || {
                rayon::join(
                    || ocr::extract_text(self.recognizer.as_ref(), pixels.rgba(), &self.config.ocr, cancel),
                    || analyze_spacing(&pixels, &self.config.spacing),
                )
            },
        );
        let text = text?;
        check_cancel(cancel)?;
        report(progress, Stage::Colors);
        report(progress, Stage::Text);

        let contrast = match analyze_text_contrast(pixels.rgba(), &text.blocks) {
            section if !section.is_empty() => section,
            _ => analyze_contrast(&colors.palette),
        };
        report(progress, Stage::Contrast);
        report(progress, Stage::Spacing);

        let metadata = Metadata {
            dimensions: Dimensions { width, height },
            byte_size: pixels.byte_size(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            hash: pixels.content_hash().to_string(),
        };

        Ok((
            pixels,
            ExtractedData {
                colors,
                contrast,
                text,
                spacing,
                metadata,
            },
        ))
    }

    /// Caller-supplied regions when present, otherwise recognized lines
    /// (paragraph blocks are too long to pass as button labels).
    fn label_boxes(&self, input: &ImageInput, text: &TextSection, bounds: (u32, u32)) -> Vec<OcrBox> {
        match &input.ocr_regions {
            Some(regions) => regions
                .iter()
                .filter_map(|region| match normalize_wire(region.bbox, Some(bounds)) {
                    Ok(bbox) => Some(OcrBox {
                        text: region.text.clone(),
                        bbox,
                    }),
                    Err(e) => {
                        crate::log(&format!("Dropping OCR region {:?}: {}", region.text, e));
                        None
                    }
                })
                .collect(),
            None => (if text.lines.is_empty() { &text.blocks } else { &text.lines })
                .iter()
                .filter_map(|block| {
                    block.bbox.map(|bbox| OcrBox {
                        text: block.text.clone(),
                        bbox,
                    })
                })
                .collect(),
        }
    }
}

fn report(progress: Option<ProgressFn<'_>>, stage: Stage) {
    if let Some(callback) = progress {
        callback(stage, stage.percent());
    }
}

fn check_cancel(cancel: &CancelToken) -> Result<(), PerceptionError> {
    if cancel.is_cancelled() {
        Err(PerceptionError::Cancelled)
    } else {
        Ok(())
    }
}
