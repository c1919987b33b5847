//! WCAG contrast analysis.
//!
//! Text blocks with boxes are measured against their own surroundings; the
//! palette pairing is the fallback when no block can be measured.

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::color::{contrast_ratio, relative_luminance, rgb_to_hex, ColorSample};
use crate::ocr::TextBlock;

const DARK_MAX: f64 = 0.3;
const LIGHT_MIN: f64 = 0.7;
const MAX_ISSUES: usize = 10;
const MAX_PASSES: usize = 5;

// Per-block measurement
const MIN_BLOCK_SIDE: f64 = 4.0;
const MIN_BLOCK_CONFIDENCE: f64 = 40.0;
const INNER_MARGIN: i64 = 2;
const SAMPLE_STEP: usize = 2;
const MIN_ALPHA: u8 = 10;
/// Roughly 18pt.
const LARGE_TEXT_HEIGHT: f64 = 24.0;
/// Ring luminance std above which a FAIL is not trusted.
const RING_STD_MAX: f64 = 0.12;
const MIN_MEASURE_CONFIDENCE: f64 = 0.6;
const FALLBACK_BACKGROUND: [u8; 3] = [240, 240, 240];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WcagLevel {
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "AA")]
    Aa,
    #[serde(rename = "AAA")]
    Aaa,
}

impl WcagLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            WcagLevel::Fail => "FAIL",
            WcagLevel::Aa => "AA",
            WcagLevel::Aaa => "AAA",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    // Declaration order is the sort order: HIGH first.
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContrastIssue {
    pub foreground_color: String,
    pub background_color: String,
    #[serde(serialize_with = "serialize_ratio")]
    pub ratio: f64,
    pub location: String,
    pub wcag_level: WcagLevel,
    pub severity: Severity,
    /// Transcript id of the measured text block, e.g. `texts.t3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_id: Option<String>,
}

fn serialize_ratio<S: serde::Serializer>(ratio: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64((ratio * 100.0).round() / 100.0)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContrastSection {
    pub issues: Vec<ContrastIssue>,
    pub passes: Vec<ContrastIssue>,
}

impl ContrastSection {
    /// Issues followed by passes, the order the facts transcript uses.
    pub fn entries(&self) -> impl Iterator<Item = &ContrastIssue> {
        self.issues.iter().chain(self.passes.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty() && self.passes.is_empty()
    }
}

/// AAA at 7.0 and above, AA at 4.5 and above, otherwise FAIL.
pub fn wcag_level(ratio: f64) -> WcagLevel {
    if ratio >= 7.0 {
        WcagLevel::Aaa
    } else if ratio >= 4.5 {
        WcagLevel::Aa
    } else {
        WcagLevel::Fail
    }
}

/// Large text passes AA at 3.0 and AAA at 4.5.
pub fn wcag_level_for_size(ratio: f64, large: bool) -> WcagLevel {
    if !large {
        return wcag_level(ratio);
    }
    if ratio >= 4.5 {
        WcagLevel::Aaa
    } else if ratio >= 3.0 {
        WcagLevel::Aa
    } else {
        WcagLevel::Fail
    }
}

pub fn severity_for(level: WcagLevel) -> Severity {
    match level {
        WcagLevel::Fail => Severity::High,
        WcagLevel::Aa => Severity::Medium,
        WcagLevel::Aaa => Severity::Low,
    }
}

/// Labels where a color pair probably appears, from the palette ranks of the
/// two colors and their luminance.
pub fn infer_location(fg: &ColorSample, bg: &ColorSample, palette: &[ColorSample]) -> &'static str {
    let rank = |c: &ColorSample| palette.iter().position(|p| p.hex == c.hex);

    if rank(bg) == Some(0) {
        return "Main background";
    }
    match rank(fg) {
        Some(r) if r <= 2 => return "Primary text",
        Some(r) if r <= 5 => return "Secondary text",
        _ => {}
    }
    if bg.luminance > 0.9 {
        "Content area"
    } else if fg.luminance < 0.2 {
        "Body text"
    } else {
        "UI element"
    }
}

/// Evaluates every dark/light pairing in both directions.
///
/// Mid-luminance colors are never paired. Issues are stable-sorted by
/// severity and both lists are capped.
pub fn analyze_contrast(palette: &[ColorSample]) -> ContrastSection {
    let dark: Vec<&ColorSample> = palette.iter().filter(|c| c.luminance < DARK_MAX).collect();
    let light: Vec<&ColorSample> = palette.iter().filter(|c| c.luminance > LIGHT_MIN).collect();

    let mut issues = Vec::new();
    let mut passes = Vec::new();

    for d in &dark {
        for l in &light {
            let ratio = contrast_ratio(l.luminance, d.luminance);
            for (fg, bg) in [(*d, *l), (*l, *d)] {
                let level = wcag_level(ratio);
                let entry = ContrastIssue {
                    foreground_color: fg.hex.clone(),
                    background_color: bg.hex.clone(),
                    ratio,
                    location: infer_location(fg, bg, palette).to_string(),
                    wcag_level: level,
                    severity: severity_for(level),
                    text_id: None,
                };
                if level == WcagLevel::Fail {
                    issues.push(entry);
                } else {
                    passes.push(entry);
                }
            }
        }
    }

    issues.sort_by_key(|i| i.severity);
    issues.truncate(MAX_ISSUES);
    passes.truncate(MAX_PASSES);

    crate::log(&format!(
        "contrast: {} dark x {} light colors, {} issues, {} passes",
        dark.len(),
        light.len(),
        issues.len(),
        passes.len()
    ));

    ContrastSection { issues, passes }
}

/// Foreground/background estimate for one text box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextContrast {
    pub foreground: [u8; 3],
    pub background: [u8; 3],
    pub ratio: f64,
    /// Luminance std of the surrounding ring.
    pub ring_std: f64,
    /// 0..1, from sample counts and ring uniformity.
    pub confidence: f64,
}

/// Measures contrast inside `(x, y, w, h)` against a ring around it.
///
/// Foreground is the per-channel median of the darkest tenth of the inner
/// samples, background the same over the brightest tenth of the ring.
/// Returns `None` when the region has no opaque pixels.
pub fn measure_region(image: &RgbaImage, x: u32, y: u32, w: u32, h: u32) -> Option<TextContrast> {
    let (img_w, img_h) = image.dimensions();
    let x_end = x.saturating_add(w).min(img_w);
    let y_end = y.saturating_add(h).min(img_h);

    let mut inner: Vec<(f64, [u8; 3])> = Vec::new();
    for yy in (y..y_end).step_by(SAMPLE_STEP) {
        for xx in (x..x_end).step_by(SAMPLE_STEP) {
            if let Some(sample) = opaque_sample(image, xx, yy) {
                inner.push(sample);
            }
        }
    }
    if inner.is_empty() {
        return None;
    }
    inner.sort_by(|a, b| a.0.total_cmp(&b.0));
    let n = (inner.len() / 10).max(1);
    let foreground = channel_median(&inner[..n]);

    let ring_margin = ((w.min(h) as f64 * 0.18).round() as u32).max(4);
    let rx = x.saturating_sub(ring_margin);
    let ry = y.saturating_sub(ring_margin);
    let rx_end = x_end.saturating_add(ring_margin).min(img_w);
    let ry_end = y_end.saturating_add(ring_margin).min(img_h);

    let mut ring: Vec<(f64, [u8; 3])> = Vec::new();
    for yy in (ry..ry_end).step_by(SAMPLE_STEP) {
        for xx in (rx..rx_end).step_by(SAMPLE_STEP) {
            let inside = xx >= x && xx < x_end && yy >= y && yy < y_end;
            if inside {
                continue;
            }
            if let Some(sample) = opaque_sample(image, xx, yy) {
                ring.push(sample);
            }
        }
    }

    let (background, ring_std) = if ring.is_empty() {
        (FALLBACK_BACKGROUND, 1.0)
    } else {
        let luminances: Vec<f64> = ring.iter().map(|s| s.0).collect();
        let ring_std = crate::stats::std_dev(&luminances);
        ring.sort_by(|a, b| a.0.total_cmp(&b.0));
        let nb = (ring.len() / 10).max(1);
        (channel_median(&ring[ring.len() - nb..]), ring_std)
    };

    let ratio = contrast_ratio(relative_luminance(foreground), relative_luminance(background));
    let inner_conf = (inner.len() as f64 / 200.0).clamp(0.0, 1.0);
    let ring_conf = (ring.len() as f64 / 400.0).clamp(0.0, 1.0);
    let uniform_conf = (1.0 - (ring_std / 0.25).min(1.0)).max(0.0);

    Some(TextContrast {
        foreground,
        background,
        ratio,
        ring_std,
        confidence: 0.2 + 0.4 * inner_conf + 0.3 * ring_conf + 0.1 * uniform_conf,
    })
}

fn opaque_sample(image: &RgbaImage, x: u32, y: u32) -> Option<(f64, [u8; 3])> {
    let [r, g, b, a] = image.get_pixel(x, y).0;
    if a < MIN_ALPHA {
        return None;
    }
    let rgb = [r, g, b];
    Some((relative_luminance(rgb), rgb))
}

/// Upper median of each channel independently.
fn channel_median(samples: &[(f64, [u8; 3])]) -> [u8; 3] {
    let mut out = [0u8; 3];
    for (c, slot) in out.iter_mut().enumerate() {
        let mut values: Vec<u8> = samples.iter().map(|s| s.1[c]).collect();
        values.sort_unstable();
        *slot = values[values.len() / 2];
    }
    out
}

/// Contrast of each recognized text block against its local background.
///
/// Blocks without a box, smaller than 4px on a side or with OCR confidence
/// under 40 are skipped. A FAIL is only reported as an issue when the ring is
/// uniform and the measurement confident; otherwise it is kept as an
/// inconclusive AA pass. Issues are ordered worst first, passes best first.
pub fn analyze_text_contrast(image: &RgbaImage, blocks: &[TextBlock]) -> ContrastSection {
    let (img_w, img_h) = image.dimensions();
    let mut issues = Vec::new();
    let mut passes = Vec::new();

    for (i, block) in blocks.iter().enumerate() {
        let Some(bbox) = &block.bbox else {
            continue;
        };
        if bbox.w <= MIN_BLOCK_SIDE || bbox.h <= MIN_BLOCK_SIDE || block.confidence < MIN_BLOCK_CONFIDENCE {
            continue;
        }

        let x = (bbox.x.floor() as i64 + INNER_MARGIN).max(0);
        let y = (bbox.y.floor() as i64 + INNER_MARGIN).max(0);
        if x >= img_w as i64 || y >= img_h as i64 {
            continue;
        }
        let w = (bbox.w.floor() as i64 - INNER_MARGIN * 2).min(img_w as i64 - x).max(1);
        let h = (bbox.h.floor() as i64 - INNER_MARGIN * 2).min(img_h as i64 - y).max(1);

        let Some(measured) = measure_region(image, x as u32, y as u32, w as u32, h as u32) else {
            continue;
        };

        let level = wcag_level_for_size(measured.ratio, bbox.h >= LARGE_TEXT_HEIGHT);
        let mut entry = ContrastIssue {
            foreground_color: rgb_to_hex(measured.foreground),
            background_color: rgb_to_hex(measured.background),
            ratio: measured.ratio,
            location: format!("text @({},{}) {}x{}", x, y, w, h),
            wcag_level: level,
            severity: severity_for(level),
            text_id: Some(format!("texts.t{}", i)),
        };

        if level != WcagLevel::Fail {
            passes.push(entry);
        } else if measured.ring_std <= RING_STD_MAX && measured.confidence >= MIN_MEASURE_CONFIDENCE {
            issues.push(entry);
        } else {
            entry.wcag_level = WcagLevel::Aa;
            entry.severity = Severity::Low;
            passes.push(entry);
        }
    }

    issues.sort_by(|a, b| a.ratio.total_cmp(&b.ratio));
    passes.sort_by(|a, b| b.ratio.total_cmp(&a.ratio));
    issues.truncate(MAX_ISSUES);
    passes.truncate(MAX_PASSES);

    crate::log(&format!(
        "contrast: {} text blocks, {} issues, {} passes",
        blocks.len(),
        issues.len(),
        passes.len()
    ));

    ContrastSection { issues, passes }
}
