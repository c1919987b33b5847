//! Button / call-to-action safety net.
//!
//! Finds rectangular, high-contrast, labelled regions that OCR-only analysis
//! tends to miss. Three enhancement passes run in parallel and their
//! candidates are pooled into a single non-maximum suppression.

pub mod backend;
pub mod enhance;

use image::{GrayImage, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::geometry::{non_max_suppression, BBox, Scored};
use crate::stats::Accumulator;
use backend::ContourBackend;
use enhance::EnhancementPass;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DetectorOptions {
    pub min_area: f64,
    pub aspect_min: f64,
    pub aspect_max: f64,
    pub min_contrast: f64,
    /// Fraction of the viewport height a button must end above.
    pub above_fold_factor: f64,
    pub nms_iou: f64,
    pub gamma: f64,
    pub clip_limit: f64,
    pub tiles: u32,
    /// Width of the background ring sampled around a candidate.
    pub ring_pad: u32,
    pub max_detections: usize,
    pub label_min_chars: usize,
    pub label_max_chars: usize,
    /// Distance added when the text center falls outside the candidate.
    pub outside_penalty: f64,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            min_area: 2000.0,
            aspect_min: 2.0,
            aspect_max: 8.0,
            min_contrast: 2.5,
            above_fold_factor: 0.9,
            nms_iou: 0.4,
            gamma: 1.6,
            clip_limit: 2.0,
            tiles: 8,
            ring_pad: 6,
            max_detections: 8,
            label_min_chars: 3,
            label_max_chars: 12,
            outside_penalty: 80.0,
        }
    }
}

/// Recognized text with its box, as the detector consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrBox {
    pub text: String,
    pub bbox: BBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonVariant {
    Solid,
    Outline,
    Unknown,
}

impl ButtonVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ButtonVariant::Solid => "solid",
            ButtonVariant::Outline => "outline",
            ButtonVariant::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonDetection {
    pub id: String,
    pub bbox: BBox,
    pub confidence: f64,
    pub reason: String,
    pub variant: ButtonVariant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Enhancement pass that produced the detection.
    pub pass: String,
}

impl Scored for ButtonDetection {
    fn bbox(&self) -> &BBox {
        &self.bbox
    }

    fn score(&self) -> f64 {
        self.confidence
    }

    fn tie_key(&self) -> &str {
        &self.id
    }
}

/// Mean/spread of the candidate interior against a ring around it.
#[derive(Debug, Clone, Copy)]
struct RingStats {
    ratio: f64,
    fill_std: f64,
    ring_std: f64,
    ring_pixels: usize,
}

pub struct CtaDetector {
    backend: Box<dyn ContourBackend>,
}

impl CtaDetector {
    pub fn new(backend: Box<dyn ContourBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Runs all enhancement passes and merges their candidates.
    ///
    /// Returns at most `options.max_detections` buttons, highest confidence
    /// first. Without a contour backend the result is always empty.
    pub fn detect_buttons(
        &self,
        image: &RgbaImage,
        ocr: &[OcrBox],
        viewport_height: u32,
        options: &DetectorOptions,
    ) -> Vec<ButtonDetection> {
        if !self.backend.is_available() {
            crate::log("cta: no contour backend, skipping button detection");
            return Vec::new();
        }

        let pooled: Vec<ButtonDetection> = EnhancementPass::ALL
            .par_iter()
            .map(|pass| self.run_pass(*pass, image, ocr, viewport_height as f64, options))
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect();
        let candidates = pooled.len();

        let mut merged = non_max_suppression(pooled, options.nms_iou);
        merged.truncate(options.max_detections);

        crate::log(&format!(
            "cta: {} candidates across {} passes, {} after suppression",
            candidates,
            EnhancementPass::ALL.len(),
            merged.len()
        ));
        merged
    }

    fn run_pass(
        &self,
        pass: EnhancementPass,
        image: &RgbaImage,
        ocr: &[OcrBox],
        viewport_height: f64,
        options: &DetectorOptions,
    ) -> Vec<ButtonDetection> {
        let enhanced = pass.apply(image, options);
        let gray = image::imageops::grayscale(enhanced.as_ref());

        self.backend
            .candidate_boxes(&gray)
            .into_iter()
            .filter_map(|bbox| evaluate_candidate(pass, bbox, &gray, ocr, viewport_height, options))
            .collect()
    }
}

fn evaluate_candidate(
    pass: EnhancementPass,
    bbox: BBox,
    gray: &GrayImage,
    ocr: &[OcrBox],
    viewport_height: f64,
    options: &DetectorOptions,
) -> Option<ButtonDetection> {
    if bbox.area() < options.min_area {
        return None;
    }
    let aspect = bbox.aspect();
    if aspect < options.aspect_min || aspect > options.aspect_max {
        return None;
    }

    let ring = contrast_ring(gray, &bbox, options.ring_pad);
    if ring.ratio < options.min_contrast {
        return None;
    }
    let variant = if ring.ring_pixels == 0 {
        ButtonVariant::Unknown
    } else if ring.fill_std < ring.ring_std * 0.7 {
        ButtonVariant::Solid
    } else {
        ButtonVariant::Outline
    };

    let label = nearest_label(ocr, &bbox, options.outside_penalty)?.text.trim().to_string();
    let chars = label.chars().count();
    if chars < options.label_min_chars || chars > options.label_max_chars {
        return None;
    }

    let above_fold = bbox.bottom() <= options.above_fold_factor * viewport_height;
    let confidence = confidence_score(ring.ratio, aspect, variant == ButtonVariant::Solid, above_fold);
    let [x, y, w, h] = bbox.rounded();

    Some(ButtonDetection {
        id: format!("cta_{}_{}_{}_{}x{}", pass.name(), x, y, w, h),
        bbox,
        confidence,
        reason: format!(
            "cta-safety-pass ({}); contrast={:.2}, aspect={:.2}, fillStd={:.1}",
            pass.name(),
            ring.ratio,
            aspect,
            ring.fill_std
        ),
        variant,
        label: Some(label),
        pass: pass.name().to_string(),
    })
}

/// `0.3` base plus saturating bonuses for contrast and aspect, and flat
/// bonuses for a solid fill and an above-the-fold position.
fn confidence_score(ratio: f64, aspect: f64, solid: bool, above_fold: bool) -> f64 {
    let mut score = 0.3 + 0.15 * ((ratio - 2.0) / 2.0).tanh() + 0.1 * ((aspect - 2.0) / 4.0).tanh();
    if solid {
        score += 0.1;
    }
    if above_fold {
        score += 0.1;
    }
    score.clamp(0.0, 1.0)
}

/// Compares the candidate interior with a `pad`-pixel ring outside it.
///
/// Ratio is `(max + 5) / (min + 5)` of the two gray means, so it is
/// symmetric and at least 1.
fn contrast_ring(gray: &GrayImage, bbox: &BBox, pad: u32) -> RingStats {
    let (cols, rows) = gray.dimensions();
    let x0 = bbox.x.max(0.0).round() as u32;
    let y0 = bbox.y.max(0.0).round() as u32;
    let x1 = (bbox.right().round().max(0.0) as u32).min(cols);
    let y1 = (bbox.bottom().round().max(0.0) as u32).min(rows);

    let flat = RingStats {
        ratio: 1.0,
        fill_std: 0.0,
        ring_std: 0.0,
        ring_pixels: 0,
    };
    if x1 <= x0 + 2 || y1 <= y0 + 2 {
        return flat;
    }

    let mut fill = Accumulator::default();
    for y in y0..y1 {
        for x in x0..x1 {
            fill.push(gray.get_pixel(x, y)[0] as f64);
        }
    }

    let mut ring = Accumulator::default();
    let ox0 = x0.saturating_sub(pad);
    let oy0 = y0.saturating_sub(pad);
    let ox1 = (x1 + pad).min(cols);
    let oy1 = (y1 + pad).min(rows);
    for y in oy0..oy1 {
        for x in ox0..ox1 {
            let inside = x >= x0 && x < x1 && y >= y0 && y < y1;
            if !inside {
                ring.push(gray.get_pixel(x, y)[0] as f64);
            }
        }
    }

    if ring.count() == 0 {
        return RingStats {
            fill_std: fill.std_dev(),
            ..flat
        };
    }

    let (a, b) = (fill.mean(), ring.mean());
    RingStats {
        ratio: (a.max(b) + 5.0) / (a.min(b) + 5.0),
        fill_std: fill.std_dev(),
        ring_std: ring.std_dev(),
        ring_pixels: ring.count(),
    }
}

/// OCR box whose center is closest to the candidate's center. Text centered
/// outside the candidate is penalized so a label inside always wins over a
/// nearby one outside.
fn nearest_label<'a>(ocr: &'a [OcrBox], bbox: &BBox, outside_penalty: f64) -> Option<&'a OcrBox> {
    let (cx, cy) = bbox.center();
    let mut best: Option<(&OcrBox, f64)> = None;
    for candidate in ocr {
        let (tx, ty) = candidate.bbox.center();
        let mut distance = (tx - cx).hypot(ty - cy);
        if !bbox.contains_point(tx, ty) {
            distance += outside_penalty;
        }
        if best.is_none_or(|(_, d)| distance < d) {
            best = Some((candidate, distance));
        }
    }
    best.map(|(b, _)| b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cta::backend::NullBackend;
    use image::Luma;

    fn ocr(text: &str, x: f64, y: f64, w: f64, h: f64) -> OcrBox {
        OcrBox {
            text: text.to_string(),
            bbox: BBox::new(x, y, w, h).unwrap(),
        }
    }

    /// Backend that returns fixed boxes regardless of the image.
    struct FixedBoxes(Vec<BBox>);

    impl ContourBackend for FixedBoxes {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn candidate_boxes(&self, _gray: &GrayImage) -> Vec<BBox> {
            self.0.clone()
        }
    }

    fn button_image() -> RgbaImage {
        RgbaImage::from_fn(400, 300, |x, y| {
            if (110..290).contains(&x) && (100..160).contains(&y) {
                image::Rgba([204, 204, 204, 255])
            } else {
                image::Rgba([32, 32, 32, 255])
            }
        })
    }

    #[test]
    fn test_confidence_formula() {
        let base = confidence_score(2.0, 2.0, false, false);
        assert!((base - 0.3).abs() < 1e-9);
        let full = confidence_score(2.0, 2.0, true, true);
        assert!((full - 0.5).abs() < 1e-9);
        assert!(confidence_score(100.0, 100.0, true, true) <= 1.0);
    }

    #[test]
    fn test_contrast_ring_solid_button() {
        let gray = image::imageops::grayscale(&button_image());
        let bbox = BBox::new(110.0, 100.0, 180.0, 60.0).unwrap();
        let stats = contrast_ring(&gray, &bbox, 6);

        assert!((stats.ratio - (209.0 / 37.0)).abs() < 0.3, "ratio {}", stats.ratio);
        assert!(stats.fill_std < 1e-6);
        assert!(stats.ring_pixels > 0);
    }

    #[test]
    fn test_contrast_ring_tiny_box_is_flat() {
        let gray = GrayImage::from_pixel(50, 50, Luma([10]));
        let bbox = BBox::new(5.0, 5.0, 2.0, 2.0).unwrap();
        assert_eq!(contrast_ring(&gray, &bbox, 6).ratio, 1.0);
    }

    #[test]
    fn test_nearest_label_prefers_inside() {
        let bbox = BBox::new(100.0, 100.0, 200.0, 60.0).unwrap();
        let labels = vec![
            // Outside but geometrically closer to the center line
            ocr("Outside", 160.0, 165.0, 80.0, 20.0),
            ocr("Inside", 110.0, 105.0, 60.0, 20.0),
        ];
        let found = nearest_label(&labels, &bbox, 80.0).unwrap();
        assert_eq!(found.text, "Inside");
        assert!(nearest_label(&[], &bbox, 80.0).is_none());
    }

    #[test]
    fn test_detects_labelled_button() {
        let detector = CtaDetector::new(Box::new(FixedBoxes(vec![BBox::new(110.0, 100.0, 180.0, 60.0).unwrap()])));
        let labels = vec![ocr("Submit", 170.0, 120.0, 60.0, 20.0)];
        let buttons = detector.detect_buttons(&button_image(), &labels, 300, &DetectorOptions::default());

        // Same box from every pass collapses to one
        assert_eq!(buttons.len(), 1);
        let button = &buttons[0];
        assert_eq!(button.label.as_deref(), Some("Submit"));
        assert!(button.confidence > 0.3);
        assert!(button.id.starts_with("cta_"));
        assert!(button.id.ends_with("_110_100_180x60"));
        assert!(button.reason.starts_with(&format!("cta-safety-pass ({});", button.pass)));
    }

    #[test]
    fn test_rejects_unlabelled_and_bad_shapes() {
        let boxes = vec![
            BBox::new(110.0, 100.0, 180.0, 60.0).unwrap(), // no label in range
            BBox::new(10.0, 10.0, 20.0, 20.0).unwrap(),    // too small
            BBox::new(0.0, 200.0, 400.0, 10.0).unwrap(),   // too wide
        ];
        let detector = CtaDetector::new(Box::new(FixedBoxes(boxes)));
        let labels = vec![ocr("OK", 170.0, 120.0, 30.0, 20.0)];
        let buttons = detector.detect_buttons(&button_image(), &labels, 300, &DetectorOptions::default());
        assert!(buttons.is_empty());
    }

    #[test]
    fn test_null_backend_detects_nothing() {
        let detector = CtaDetector::new(Box::new(NullBackend));
        let labels = vec![ocr("Submit", 170.0, 120.0, 60.0, 20.0)];
        let buttons = detector.detect_buttons(&button_image(), &labels, 300, &DetectorOptions::default());
        assert!(buttons.is_empty());
    }

    #[test]
    fn test_results_capped() {
        // Ten separated buttons in a tall image, each labelled
        let img = RgbaImage::from_fn(300, 1200, |x, y| {
            let in_button = (50..250).contains(&x) && (y % 120) >= 20 && (y % 120) < 70;
            if in_button { image::Rgba([230, 230, 230, 255]) } else { image::Rgba([20, 20, 20, 255]) }
        });
        let boxes: Vec<BBox> = (0..10).map(|i| BBox::new(50.0, i as f64 * 120.0 + 20.0, 200.0, 50.0).unwrap()).collect();
        let labels: Vec<OcrBox> = (0..10).map(|i| ocr("Continue", 110.0, i as f64 * 120.0 + 35.0, 80.0, 20.0)).collect();
        let detector = CtaDetector::new(Box::new(FixedBoxes(boxes)));
        let buttons = detector.detect_buttons(&img, &labels, 1200, &DetectorOptions::default());

        assert_eq!(buttons.len(), 8);
        for pair in buttons.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }
}
