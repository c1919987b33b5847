//! Spacing and grid signals.
//!
//! Both estimators are coarse. [`analyze_spacing`] looks at pixels,
//! [`text_metrics`] at the geometry of recognized text.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::ocr::TextBlock;
use crate::sampler::PixelBuffer;
use crate::stats;

const DEFAULT_PADDING: f64 = 16.0;
const DEFAULT_CONSISTENCY: f64 = 75.0;
const GRID_ALIGNED_SHARE: f64 = 0.6;
/// Gray levels per bucket when finding the background level.
const GRAY_BUCKET: u8 = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpacingOptions {
    /// Distance between grid samples in pixels.
    pub sample_step: u32,
    /// Minimum gray difference from the background for a sample to be content.
    pub content_threshold: u8,
}

impl Default for SpacingOptions {
    fn default() -> Self {
        Self {
            sample_step: 10,
            content_threshold: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpacingSection {
    pub avg_padding: f64,
    pub consistency: f64,
    pub grid_alignment: bool,
}

impl Default for SpacingSection {
    fn default() -> Self {
        Self {
            avg_padding: DEFAULT_PADDING,
            consistency: DEFAULT_CONSISTENCY,
            grid_alignment: true,
        }
    }
}

/// Geometry of recognized text in reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMetrics {
    pub median_vertical_space: f64,
    pub left_edge_variance: f64,
}

/// Estimates outer padding, margin consistency and left-edge alignment from a
/// sparse grid of grayscale samples.
///
/// Images with no content (or none sampled) get the default section.
pub fn analyze_spacing(pixels: &PixelBuffer, options: &SpacingOptions) -> SpacingSection {
    let gray = pixels.gray();
    let step = options.sample_step.max(1);

    let Some(grid) = ContentGrid::sample(&gray, step, options.content_threshold) else {
        crate::log("spacing: no content found, using defaults");
        return SpacingSection::default();
    };

    let (width, height) = gray.dimensions();
    let margins = [
        grid.min_x as f64,
        (width - 1 - grid.max_x) as f64,
        grid.min_y as f64,
        (height - 1 - grid.max_y) as f64,
    ];
    let avg_padding = stats::mean(&margins);
    let consistency = if avg_padding > 0.0 {
        (100.0 * (1.0 - stats::std_dev(&margins) / avg_padding)).clamp(0.0, 100.0)
    } else {
        100.0
    };

    let section = SpacingSection {
        avg_padding: avg_padding.round(),
        consistency: consistency.round(),
        grid_alignment: grid.left_edges_aligned(step),
    };
    crate::log(&format!(
        "spacing: padding {}px, consistency {}, grid aligned: {}",
        section.avg_padding, section.consistency, section.grid_alignment
    ));
    section
}

/// Content extent and per-row left edges on the sample grid.
struct ContentGrid {
    min_x: u32,
    max_x: u32,
    min_y: u32,
    max_y: u32,
    row_starts: Vec<u32>,
}

impl ContentGrid {
    fn sample(gray: &GrayImage, step: u32, threshold: u8) -> Option<Self> {
        let (width, height) = gray.dimensions();
        let background = background_level(gray, step);
        let is_content = |x: u32, y: u32| gray.get_pixel(x, y)[0].abs_diff(background) > threshold;

        let mut grid: Option<ContentGrid> = None;
        for y in (0..height).step_by(step as usize) {
            let mut row = (0..width).step_by(step as usize).filter(|&x| is_content(x, y));
            let Some(first) = row.next() else {
                continue;
            };
            let last = row.last().unwrap_or(first);

            match grid.as_mut() {
                Some(g) => {
                    g.min_x = g.min_x.min(first);
                    g.max_x = g.max_x.max(last);
                    g.max_y = y;
                    g.row_starts.push(first);
                }
                None => {
                    grid = Some(ContentGrid {
                        min_x: first,
                        max_x: last,
                        min_y: y,
                        max_y: y,
                        row_starts: vec![first],
                    })
                }
            }
        }
        grid
    }

    /// True when enough content rows start within one step of the most
    /// common left edge.
    fn left_edges_aligned(&self, step: u32) -> bool {
        let Some(modal) = mode(&self.row_starts) else {
            return true;
        };
        let aligned = self
            .row_starts
            .iter()
            .filter(|&&x| x.abs_diff(modal) <= step)
            .count();
        aligned as f64 / self.row_starts.len() as f64 >= GRID_ALIGNED_SHARE
    }
}

/// Most common sampled gray level, bucketed. Returns the bucket center.
fn background_level(gray: &GrayImage, step: u32) -> u8 {
    let mut hist = [0usize; 256 / GRAY_BUCKET as usize];
    let (width, height) = gray.dimensions();
    for y in (0..height).step_by(step as usize) {
        for x in (0..width).step_by(step as usize) {
            hist[(gray.get_pixel(x, y)[0] / GRAY_BUCKET) as usize] += 1;
        }
    }
    let bucket = mode_index(&hist);
    bucket as u8 * GRAY_BUCKET + GRAY_BUCKET / 2
}

fn mode_index(hist: &[usize]) -> usize {
    let mut best = 0;
    for (i, &count) in hist.iter().enumerate() {
        if count > hist[best] {
            best = i;
        }
    }
    best
}

/// Most frequent value; the smallest one wins ties.
fn mode(values: &[u32]) -> Option<u32> {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mut best: Option<(u32, usize)> = None;
    for chunk in sorted.chunk_by(|a, b| a == b) {
        if best.is_none_or(|(_, n)| chunk.len() > n) {
            best = Some((chunk[0], chunk.len()));
        }
    }
    best.map(|(v, _)| v)
}

/// Vertical rhythm and left-edge spread of text blocks that carry a box.
///
/// Blocks are read top to bottom, then left to right. Overlapping neighbours
/// count as a zero gap. Returns `None` when no block has a box.
pub fn text_metrics(blocks: &[TextBlock]) -> Option<TextMetrics> {
    let mut boxes: Vec<_> = blocks.iter().filter_map(|b| b.bbox).collect();
    if boxes.is_empty() {
        return None;
    }
    boxes.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));

    let gaps: Vec<f64> = boxes
        .windows(2)
        .map(|pair| (pair[1].y - pair[0].bottom()).max(0.0))
        .collect();
    let lefts: Vec<f64> = boxes.iter().map(|b| b.x).collect();

    Some(TextMetrics {
        median_vertical_space: stats::median(&gaps),
        left_edge_variance: stats::variance(&lefts),
    })
}
