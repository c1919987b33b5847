//! OCR normalization.
//!
//! A [`TextRecognizer`] produces a raw page with block, line and word tiers.
//! [`normalize_page`] picks the first non-empty tier and turns it into
//! [`TextBlock`]s; [`extract_text`] wraps the whole thing and degrades to an
//! empty section when recognition fails.

pub mod preprocess;
pub mod setup;
pub mod tesseract;

pub use tesseract::TesseractRecognizer;

use anyhow::{anyhow, Result};
use image::RgbaImage;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::cancel::CancelToken;
use crate::error::PerceptionError;
use crate::geometry::BBox;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OcrOptions {
    /// Explicit path to the tesseract executable.
    pub tesseract_path: Option<PathBuf>,
    pub tessdata_dir: Option<PathBuf>,
    pub language: String,
    pub timeout_ms: u64,
    /// Longest image side handed to the recognizer; larger images are downscaled.
    pub max_side: u32,
    /// Vertical band used when clustering loose words into lines.
    pub band_height: f64,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            tesseract_path: None,
            tessdata_dir: None,
            language: "eng".to_string(),
            timeout_ms: 30_000,
            max_side: 1600,
            band_height: 24.0,
        }
    }
}

/// One recognized item at any granularity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOcrItem {
    pub text: String,
    pub confidence: f64,
    pub bbox: Option<BBox>,
}

/// Recognizer output before normalization. Any tier may be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOcrPage {
    pub text: String,
    pub confidence: f64,
    pub blocks: Vec<RawOcrItem>,
    pub lines: Vec<RawOcrItem>,
    pub words: Vec<RawOcrItem>,
}

/// Anything that can read text out of an image.
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &str;

    /// Implementations should check `cancel` at their blocking points.
    fn recognize(&self, image: &RgbaImage, cancel: &CancelToken) -> Result<RawOcrPage>;
}

/// Stand-in used when no OCR engine is installed; every call fails, which
/// the normalizer turns into an empty text section.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecognizer;

impl TextRecognizer for NullRecognizer {
    fn name(&self) -> &str {
        "none"
    }

    fn recognize(&self, _image: &RgbaImage, _cancel: &CancelToken) -> Result<RawOcrPage> {
        Err(anyhow!("no OCR engine available"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlock {
    pub text: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OcrTier {
    Blocks,
    Lines,
    WordClusters,
}

impl OcrTier {
    /// Preference order. The first tier that yields anything wins.
    pub const ORDER: [OcrTier; 3] = [OcrTier::Blocks, OcrTier::Lines, OcrTier::WordClusters];

    pub fn as_str(&self) -> &'static str {
        match self {
            OcrTier::Blocks => "blocks",
            OcrTier::Lines => "lines",
            OcrTier::WordClusters => "wordClusters",
        }
    }

    fn apply(self, page: &RawOcrPage, band_height: f64) -> Vec<TextBlock> {
        match self {
            OcrTier::Blocks => direct_items(&page.blocks),
            OcrTier::Lines => direct_items(&page.lines),
            OcrTier::WordClusters => cluster_words(&page.words, band_height),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSection {
    pub extracted_full_text: String,
    pub blocks: Vec<TextBlock>,
    pub confidence: f64,
    pub tier: Option<OcrTier>,
    /// Line-level items, kept for short-label consumers such as the button
    /// detector. Not part of the serialized section.
    #[serde(skip)]
    pub lines: Vec<TextBlock>,
}

impl TextSection {
    /// Result used whenever recognition is unavailable or fails.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Runs the recognizer and normalizes its output.
///
/// Recognition failures degrade to [`TextSection::empty`]. The only error
/// returned is [`PerceptionError::Cancelled`].
pub fn extract_text(
    recognizer: &dyn TextRecognizer,
    image: &RgbaImage,
    options: &OcrOptions,
    cancel: &CancelToken,
) -> Result<TextSection, PerceptionError> {
    let page = match recognizer.recognize(image, cancel) {
        Ok(page) => page,
        Err(e) => {
            if cancel.is_cancelled() {
                return Err(PerceptionError::Cancelled);
            }
            crate::log(&format!("text: OCR via {} failed, continuing without text: {:#}", recognizer.name(), e));
            return Ok(TextSection::empty());
        }
    };

    let (tier, blocks) = normalize_page(&page, options.band_height);
    let full_text = page.text.trim().to_string();
    if tier.is_none() && full_text.is_empty() {
        crate::log(&format!("text: {} returned no text", recognizer.name()));
        return Ok(TextSection::empty());
    }

    crate::log(&format!(
        "text: {} blocks from {} tier, confidence {:.0}",
        blocks.len(),
        tier.map(|t| t.as_str()).unwrap_or("no"),
        page.confidence
    ));

    Ok(TextSection {
        extracted_full_text: full_text,
        blocks,
        confidence: sanitize_confidence(page.confidence),
        tier,
        lines: line_items(&page, options.band_height),
    })
}

/// Picks the first non-empty tier. Tiers never mix.
pub fn normalize_page(page: &RawOcrPage, band_height: f64) -> (Option<OcrTier>, Vec<TextBlock>) {
    for tier in OcrTier::ORDER {
        let blocks = tier.apply(page, band_height);
        if !blocks.is_empty() {
            return (Some(tier), blocks);
        }
    }
    (None, Vec::new())
}

/// Recognized lines, or word clusters when the recognizer reported no lines.
pub fn line_items(page: &RawOcrPage, band_height: f64) -> Vec<TextBlock> {
    let lines = direct_items(&page.lines);
    if lines.is_empty() {
        cluster_words(&page.words, band_height)
    } else {
        lines
    }
}

fn direct_items(items: &[RawOcrItem]) -> Vec<TextBlock> {
    items
        .iter()
        .filter_map(|item| {
            let text = clean_text(&item.text);
            if text.is_empty() {
                return None;
            }
            Some(TextBlock {
                text,
                confidence: sanitize_confidence(item.confidence),
                bbox: item.bbox,
            })
        })
        .collect()
}

struct WordCluster {
    key: i64,
    words: Vec<String>,
    confidences: Vec<f64>,
    bbox: Option<BBox>,
}

/// Groups words by the vertical band their center falls in. Clusters keep
/// the order in which their first word was seen.
fn cluster_words(words: &[RawOcrItem], band_height: f64) -> Vec<TextBlock> {
    let band = if band_height > 0.0 { band_height } else { 24.0 };
    let mut clusters: Vec<WordCluster> = Vec::new();

    for word in words {
        let text = clean_text(&word.text);
        if text.is_empty() {
            continue;
        }
        let center_y = word.bbox.map(|b| b.center().1.round()).unwrap_or(0.0);
        let key = ((center_y / band).round() * band) as i64;

        let cluster = match clusters.iter_mut().position(|c| c.key == key) {
            Some(idx) => &mut clusters[idx],
            None => {
                clusters.push(WordCluster {
                    key,
                    words: Vec::new(),
                    confidences: Vec::new(),
                    bbox: None,
                });
                let last = clusters.len() - 1;
                &mut clusters[last]
            }
        };
        cluster.words.push(text);
        cluster.confidences.push(sanitize_confidence(word.confidence));
        cluster.bbox = match (cluster.bbox, word.bbox) {
            (Some(a), Some(b)) => Some(a.union(&b)),
            (a, b) => a.or(b),
        };
    }

    clusters
        .into_iter()
        .map(|c| TextBlock {
            text: c.words.join(" "),
            confidence: crate::stats::mean(&c.confidences).round(),
            bbox: c.bbox,
        })
        .collect()
}

fn whitespace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[ \t\u{a0}]+").expect("whitespace pattern is valid"))
}

/// Trims and collapses horizontal whitespace runs. Line breaks are kept.
fn clean_text(text: &str) -> String {
    text.lines()
        .map(|line| whitespace_pattern().replace_all(line.trim(), " ").into_owned())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn sanitize_confidence(confidence: f64) -> f64 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, conf: f64, x: f64, y: f64, w: f64, h: f64) -> RawOcrItem {
        RawOcrItem {
            text: text.to_string(),
            confidence: conf,
            bbox: Some(BBox::new(x, y, w, h).unwrap()),
        }
    }

    struct WordsOnly(Vec<RawOcrItem>);

    impl TextRecognizer for WordsOnly {
        fn name(&self) -> &str {
            "words-only"
        }

        fn recognize(&self, _image: &RgbaImage, _cancel: &CancelToken) -> Result<RawOcrPage> {
            Ok(RawOcrPage {
                text: "Sign in to continue".to_string(),
                confidence: 88.0,
                words: self.0.clone(),
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_blocks_tier_wins() {
        let page = RawOcrPage {
            blocks: vec![RawOcrItem { text: "  Hello   world ".into(), confidence: 90.0, bbox: None }],
            lines: vec![RawOcrItem { text: "ignored".into(), confidence: 90.0, bbox: None }],
            ..Default::default()
        };
        let (tier, blocks) = normalize_page(&page, 24.0);
        assert_eq!(tier, Some(OcrTier::Blocks));
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "Hello world");
    }

    #[test]
    fn test_empty_blocks_fall_back_to_lines() {
        let page = RawOcrPage {
            blocks: vec![RawOcrItem { text: "   ".into(), confidence: 10.0, bbox: None }],
            lines: vec![
                RawOcrItem { text: "First".into(), confidence: 80.0, bbox: None },
                RawOcrItem { text: "Second".into(), confidence: 70.0, bbox: None },
            ],
            ..Default::default()
        };
        let (tier, blocks) = normalize_page(&page, 24.0);
        assert_eq!(tier, Some(OcrTier::Lines));
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn test_word_only_recognizer_clusters_by_band() {
        let words = vec![
            word("Sign", 90.0, 10.0, 10.0, 40.0, 14.0),
            word("in", 80.0, 55.0, 11.0, 15.0, 14.0),
            word("to", 70.0, 10.0, 60.0, 15.0, 14.0),
            word("continue", 60.0, 30.0, 61.0, 60.0, 14.0),
        ];
        let recognizer = WordsOnly(words);
        let image = RgbaImage::new(200, 100);
        let section = extract_text(&recognizer, &image, &OcrOptions::default(), &CancelToken::new()).unwrap();

        assert_eq!(section.tier, Some(OcrTier::WordClusters));
        assert_eq!(section.blocks.len(), 2);
        assert_eq!(section.blocks[0].text, "Sign in");
        assert_eq!(section.blocks[1].text, "to continue");
        assert_eq!(section.blocks[0].confidence, 85.0);
        assert_eq!(section.blocks[1].confidence, 65.0);

        let first = section.blocks[0].bbox.unwrap();
        assert_eq!(first.x, 10.0);
        assert_eq!(first.right(), 70.0);

        // Union of cluster text is exactly the input words grouped by band
        let joined: Vec<&str> = section.blocks.iter().flat_map(|b| b.text.split(' ')).collect();
        assert_eq!(joined, vec!["Sign", "in", "to", "continue"]);
        assert_eq!(section.extracted_full_text, "Sign in to continue");
        assert_eq!(section.lines, section.blocks);
    }

    #[test]
    fn test_line_items_prefer_lines_over_words() {
        let page = RawOcrPage {
            blocks: vec![RawOcrItem { text: "Welcome back\nSubmit".into(), confidence: 90.0, bbox: None }],
            lines: vec![
                RawOcrItem { text: "Welcome back".into(), confidence: 90.0, bbox: None },
                RawOcrItem { text: "Submit".into(), confidence: 92.0, bbox: None },
            ],
            words: vec![word("Welcome", 90.0, 0.0, 0.0, 50.0, 14.0)],
            ..Default::default()
        };
        let texts: Vec<String> = line_items(&page, 24.0).into_iter().map(|l| l.text).collect();
        assert_eq!(texts, vec!["Welcome back", "Submit"]);

        let words_only = RawOcrPage { lines: Vec::new(), ..page };
        let texts: Vec<String> = line_items(&words_only, 24.0).into_iter().map(|l| l.text).collect();
        assert_eq!(texts, vec!["Welcome"]);
    }

    #[test]
    fn test_null_recognizer_degrades() {
        let image = RgbaImage::new(10, 10);
        let section = extract_text(&NullRecognizer, &image, &OcrOptions::default(), &CancelToken::new()).unwrap();
        assert_eq!(section, TextSection::empty());
        assert_eq!(section.confidence, 0.0);
        assert!(section.blocks.is_empty());
    }

    #[test]
    fn test_failure_after_cancel_is_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let image = RgbaImage::new(10, 10);
        let result = extract_text(&NullRecognizer, &image, &OcrOptions::default(), &token);
        assert!(matches!(result, Err(PerceptionError::Cancelled)));
    }

    #[test]
    fn test_clean_text_keeps_line_breaks() {
        assert_eq!(clean_text("  a\t\tb \n\n  c  "), "a b\nc");
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(sanitize_confidence(-1.0), 0.0);
        assert_eq!(sanitize_confidence(140.0), 100.0);
        assert_eq!(sanitize_confidence(f64::NAN), 0.0);
    }
}
