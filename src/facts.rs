//! Facts transcript: every detected item rendered as one line anchored by an
//! id, plus the allow-list of those ids.
//!
//! A consumer may only cite ids from [`PerceptionFacts::allowed_ids`]; the
//! transcript and the allow-list are built together so they cannot drift.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::geometry::BBox;
use crate::pipeline::PerceptionResult;
use crate::stats;

/// Glyph height as a fraction of the text box height.
const GLYPH_HEIGHT_FACTOR: f64 = 0.7;
const DARK_MODE_LUMINANCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactLine {
    pub id: String,
    pub line: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerceptionFacts {
    lines: Vec<FactLine>,
    allowed_ids: BTreeSet<String>,
}

impl PerceptionFacts {
    fn push(&mut self, id: String, body: impl AsRef<str>) {
        let body = body.as_ref();
        let separator = if body.starts_with('=') { "" } else { " " };
        let line = format!("[{}]{}{}", id, separator, body);
        self.allowed_ids.insert(id.clone());
        self.lines.push(FactLine { id, line });
    }

    pub fn lines(&self) -> &[FactLine] {
        &self.lines
    }

    pub fn allowed_ids(&self) -> &BTreeSet<String> {
        &self.allowed_ids
    }

    /// The transcript, one fact per line.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.line.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_citable(&self, id: &str) -> bool {
        self.allowed_ids.contains(id)
    }

    /// Keeps only the cited ids that appear in the allow-list, in input order.
    pub fn retain_citable<I, S>(&self, ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ids.into_iter()
            .filter(|id| self.is_citable(id.as_ref()))
            .map(|id| id.as_ref().to_string())
            .collect()
    }
}

/// Renders a perception result as an id-anchored transcript.
pub fn build_facts(result: &PerceptionResult) -> PerceptionFacts {
    let mut facts = PerceptionFacts::default();
    let extracted = &result.extracted;

    for (i, block) in extracted.text.blocks.iter().enumerate() {
        let mut body = format!("{} conf={:.0}", quote(&block.text), block.confidence);
        if let Some(bbox) = &block.bbox {
            body.push_str(&format!(
                " size≈{}px bbox={}",
                (bbox.h * GLYPH_HEIGHT_FACTOR).round() as i64,
                format_bbox(bbox)
            ));
        }
        facts.push(format!("texts.t{}", i), body);
    }

    for (i, entry) in extracted.contrast.entries().enumerate() {
        let mut body = format!(
            "{} on {} ratio={:.2} wcag={} severity={} location={}",
            entry.foreground_color,
            entry.background_color,
            entry.ratio,
            entry.wcag_level.as_str(),
            entry.severity.as_str(),
            quote(&entry.location)
        );
        if let Some(text_id) = &entry.text_id {
            body.push_str(&format!(" text={}", text_id));
        }
        facts.push(format!("contrast.c{}", i), body);
    }

    for button in &result.buttons {
        facts.push(
            button.id.clone(),
            format!(
                "button {} variant={} conf={:.2} bbox={}",
                quote(button.label.as_deref().unwrap_or("")),
                button.variant.as_str(),
                button.confidence,
                format_bbox(&button.bbox)
            ),
        );
    }

    facts.push("layout.buttonCount".to_string(), format!("={}", result.buttons.len()));

    if let Some(metrics) = &result.metrics {
        facts.push(
            "metrics.medianVSpace".to_string(),
            format!("={}", metrics.median_vertical_space.round() as i64),
        );
    }

    let palette = &extracted.colors.palette;
    if !palette.is_empty() {
        let luminances: Vec<f64> = palette.iter().map(|c| c.luminance).collect();
        let mode = if stats::median(&luminances) < DARK_MODE_LUMINANCE { "dark" } else { "light" };
        let hexes: Vec<&str> = palette.iter().map(|c| c.hex.as_str()).collect();
        facts.push("palette".to_string(), format!("={} (mode={})", hexes.join(","), mode));
    }

    crate::log(&format!("facts: {} lines", facts.lines.len()));
    facts
}

/// JSON string quoting, so embedded quotes and newlines stay on one line.
fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{}\"", text))
}

fn format_bbox(bbox: &BBox) -> String {
    let [x, y, w, h] = bbox.rounded();
    format!("[{},{},{},{}]", x, y, w, h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{ColorSample, ColorSection};
    use crate::contrast::{analyze_contrast, ContrastIssue, ContrastSection, Severity, WcagLevel};
    use crate::cta::{ButtonDetection, ButtonVariant};
    use crate::ocr::{TextBlock, TextSection};
    use crate::pipeline::{Dimensions, ExtractedData, Metadata};
    use crate::spacing::{SpacingSection, TextMetrics};
    use regex::Regex;

    fn sample_result() -> PerceptionResult {
        let palette = vec![
            ColorSample::new([0, 0, 0], 90),
            ColorSample::new([255, 255, 255], 10),
            ColorSample::new([20, 20, 20], 5),
        ];
        let contrast = analyze_contrast(&palette);
        PerceptionResult {
            extracted: ExtractedData {
                colors: ColorSection {
                    primary: "#FFFFFF".into(),
                    secondary: "#FFFFFF".into(),
                    background: "#000000".into(),
                    text_colors: vec!["#FFFFFF".into()],
                    palette,
                },
                contrast,
                text: TextSection {
                    extracted_full_text: "Welcome \"back\"\nSubmit".into(),
                    blocks: vec![
                        TextBlock {
                            text: "Welcome \"back\"".into(),
                            confidence: 91.4,
                            bbox: Some(BBox::new(20.0, 10.0, 200.0, 30.0).unwrap()),
                        },
                        TextBlock { text: "Submit".into(), confidence: 88.0, bbox: None },
                    ],
                    confidence: 90.0,
                    tier: Some(crate::ocr::OcrTier::Blocks),
                    lines: Vec::new(),
                },
                spacing: SpacingSection::default(),
                metadata: Metadata {
                    dimensions: Dimensions { width: 400, height: 300 },
                    byte_size: 1234,
                    timestamp: "2026-01-01T00:00:00.000Z".into(),
                    hash: "sha256-00".into(),
                },
            },
            buttons: vec![ButtonDetection {
                id: "cta_orig_110_100_180x60".into(),
                bbox: BBox::new(110.0, 100.0, 180.0, 60.0).unwrap(),
                confidence: 0.567,
                reason: "cta-safety-pass (orig); contrast=5.65, aspect=3.00, fillStd=0.0".into(),
                variant: ButtonVariant::Outline,
                label: Some("Submit".into()),
                pass: "orig".into(),
            }],
            metrics: Some(TextMetrics { median_vertical_space: 12.4, left_edge_variance: 0.0 }),
        }
    }

    #[test]
    fn test_line_formats() {
        let facts = build_facts(&sample_result());
        let text = facts.text();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], r#"[texts.t0] "Welcome \"back\"" conf=91 size≈21px bbox=[20,10,200,30]"#);
        assert_eq!(lines[1], r#"[texts.t1] "Submit" conf=88"#);
        assert_eq!(
            lines[2],
            r#"[contrast.c0] #000000 on #FFFFFF ratio=21.00 wcag=AAA severity=LOW location="Primary text""#
        );
        assert!(text.contains(r#"[cta_orig_110_100_180x60] button "Submit" variant=outline conf=0.57 bbox=[110,100,180,60]"#));
        assert!(text.contains("[layout.buttonCount]=1"));
        assert!(text.contains("[metrics.medianVSpace]=12"));
        assert!(text.contains("[palette]=#000000,#FFFFFF,#141414 (mode=dark)"));
    }

    #[test]
    fn test_allow_list_closure() {
        let facts = build_facts(&sample_result());
        let anchor = Regex::new(r"^\[([^\]]+)\]").unwrap();

        let anchored: BTreeSet<String> = facts
            .text()
            .lines()
            .map(|line| anchor.captures(line).expect("every line is anchored")[1].to_string())
            .collect();
        assert_eq!(&anchored, facts.allowed_ids());
    }

    #[test]
    fn test_retain_citable_drops_unknown_ids() {
        let facts = build_facts(&sample_result());
        let cited = facts.retain_citable(["texts.t0", "cta_orig_1_1_1x1", "layout.buttonCount", "texts.t99"]);
        assert_eq!(cited, vec!["texts.t0".to_string(), "layout.buttonCount".to_string()]);
        assert!(facts.is_citable("palette"));
        assert!(!facts.is_citable("texts.t99"));
    }

    #[test]
    fn test_text_contrast_cites_its_block() {
        let mut result = sample_result();
        result.extracted.contrast = ContrastSection {
            issues: vec![ContrastIssue {
                foreground_color: "#999999".into(),
                background_color: "#FFFFFF".into(),
                ratio: 2.849,
                location: "text @(22,12) 196x26".into(),
                wcag_level: WcagLevel::Fail,
                severity: Severity::High,
                text_id: Some("texts.t0".into()),
            }],
            passes: Vec::new(),
        };

        let facts = build_facts(&result);
        assert!(facts.text().contains(
            r#"[contrast.c0] #999999 on #FFFFFF ratio=2.85 wcag=FAIL severity=HIGH location="text @(22,12) 196x26" text=texts.t0"#
        ));
        assert!(facts.is_citable("contrast.c0"));
        assert!(facts.is_citable("texts.t0"));
    }

    #[test]
    fn test_empty_result_still_counts_buttons() {
        let mut result = sample_result();
        result.extracted.text = TextSection::empty();
        result.extracted.contrast = Default::default();
        result.extracted.colors = ColorSection::default();
        result.buttons.clear();
        result.metrics = None;

        let facts = build_facts(&result);
        assert_eq!(facts.text(), "[layout.buttonCount]=0");
        assert_eq!(facts.allowed_ids().len(), 1);
    }
}
