//! Color palette extraction and the luminance / WCAG math shared with the
//! contrast analyzer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::sampler::PixelBuffer;

/// sRGB linearization breakpoint used by WCAG 2.x.
const LINEAR_THRESHOLD: f64 = 0.03928;

/// Minimum contrast against the background for a palette entry to count as a
/// text color.
const TEXT_CONTRAST_MIN: f64 = 4.5;
const MAX_TEXT_COLORS: usize = 3;
const PRIMARY_SATURATION_MIN: f64 = 0.3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PaletteOptions {
    /// Upper bound on how many pixels are visited.
    pub max_samples: usize,
    /// Never sample more densely than every Nth pixel.
    pub min_stride: usize,
    /// Pixels with alpha below this are ignored.
    pub alpha_threshold: u8,
    /// Channel quantization step.
    pub bucket: u8,
    pub palette_size: usize,
}

impl Default for PaletteOptions {
    fn default() -> Self {
        Self {
            max_samples: 250_000,
            min_stride: 10,
            alpha_threshold: 128,
            bucket: 10,
            palette_size: 20,
        }
    }
}

/// One quantized palette entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorSample {
    pub rgb: [u8; 3],
    pub hex: String,
    pub luminance: f64,
    pub frequency: usize,
}

impl ColorSample {
    pub fn new(rgb: [u8; 3], frequency: usize) -> Self {
        Self {
            rgb,
            hex: rgb_to_hex(rgb),
            luminance: relative_luminance(rgb),
            frequency,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorSection {
    pub primary: String,
    pub secondary: String,
    pub background: String,
    pub text_colors: Vec<String>,
    pub palette: Vec<ColorSample>,
}

/// Samples the buffer on a stride, builds a frequency-ranked palette and
/// assigns the color roles.
///
/// A fully transparent image yields an empty section rather than an error.
pub fn extract_colors(pixels: &PixelBuffer, options: &PaletteOptions) -> ColorSection {
    let palette = build_palette(pixels, options);
    if palette.is_empty() {
        crate::log("colors: no opaque pixels sampled, returning empty palette");
        return ColorSection::default();
    }

    let section = assign_roles(palette);
    crate::log(&format!(
        "colors: {} palette entries, background {}, {} text colors",
        section.palette.len(),
        section.background,
        section.text_colors.len()
    ));
    section
}

/// Frequency-ranked palette, ties broken by first-seen order.
pub fn build_palette(pixels: &PixelBuffer, options: &PaletteOptions) -> Vec<ColorSample> {
    let (width, height) = pixels.dimensions();
    let total = width as usize * height as usize;
    let stride = sample_stride(total, options);

    // quantized rgb -> (count, first seen)
    let mut counts: HashMap<[u8; 3], (usize, usize)> = HashMap::new();
    for (order, px) in pixels
        .rgba()
        .as_raw()
        .chunks_exact(4)
        .step_by(stride)
        .enumerate()
    {
        if px[3] < options.alpha_threshold {
            continue;
        }
        let key = [
            quantize(px[0], options.bucket),
            quantize(px[1], options.bucket),
            quantize(px[2], options.bucket),
        ];
        counts.entry(key).or_insert((0, order)).0 += 1;
    }

    let mut ranked: Vec<([u8; 3], usize, usize)> = counts
        .into_iter()
        .map(|(rgb, (count, first))| (rgb, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.truncate(options.palette_size);

    ranked
        .into_iter()
        .map(|(rgb, count, _)| ColorSample::new(rgb, count))
        .collect()
}

fn sample_stride(total: usize, options: &PaletteOptions) -> usize {
    let max_samples = options.max_samples.max(1);
    let ceiling = total.div_ceil(max_samples);
    ceiling.max(options.min_stride).max(1)
}

fn assign_roles(palette: Vec<ColorSample>) -> ColorSection {
    let background = palette
        .iter()
        .find(|c| c.luminance > 0.9 || c.luminance < 0.1)
        .unwrap_or(&palette[0])
        .clone();

    let text_colors: Vec<String> = palette
        .iter()
        .filter(|c| c.hex != background.hex)
        .filter(|c| contrast_ratio(c.luminance, background.luminance) > TEXT_CONTRAST_MIN)
        .take(MAX_TEXT_COLORS)
        .map(|c| c.hex.clone())
        .collect();

    let is_taken = |hex: &str, extra: Option<&str>| {
        hex == background.hex
            || text_colors.iter().any(|t| t == hex)
            || extra.is_some_and(|e| e == hex)
    };

    let primary = palette
        .iter()
        .find(|c| !is_taken(&c.hex, None) && saturation(c.rgb) > PRIMARY_SATURATION_MIN)
        .or_else(|| palette.get(1))
        .unwrap_or(&palette[0])
        .hex
        .clone();

    let secondary = palette
        .iter()
        .find(|c| !is_taken(&c.hex, Some(primary.as_str())))
        .or_else(|| palette.get(2))
        .or_else(|| palette.get(1))
        .unwrap_or(&palette[0])
        .hex
        .clone();

    ColorSection {
        primary,
        secondary,
        background: background.hex,
        text_colors,
        palette,
    }
}

/// `round(c / bucket) * bucket`, clamped to the channel range.
pub fn quantize(channel: u8, bucket: u8) -> u8 {
    if bucket <= 1 {
        return channel;
    }
    let step = bucket as f64;
    ((channel as f64 / step).round() * step).min(255.0) as u8
}

/// WCAG relative luminance of an sRGB color.
pub fn relative_luminance(rgb: [u8; 3]) -> f64 {
    let [r, g, b] = rgb.map(linearize);
    0.2126 * r + 0.7152 * g + 0.0722 * b
}

fn linearize(channel: u8) -> f64 {
    let c = channel as f64 / 255.0;
    if c <= LINEAR_THRESHOLD {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// `(lighter + 0.05) / (darker + 0.05)`; symmetric in its arguments.
pub fn contrast_ratio(l1: f64, l2: f64) -> f64 {
    let (light, dark) = if l1 >= l2 { (l1, l2) } else { (l2, l1) };
    (light + 0.05) / (dark + 0.05)
}

/// HSV-style saturation `(max - min) / max`.
pub fn saturation(rgb: [u8; 3]) -> f64 {
    let max = rgb.iter().copied().max().unwrap_or(0) as f64;
    let min = rgb.iter().copied().min().unwrap_or(0) as f64;
    if max == 0.0 { 0.0 } else { (max - min) / max }
}

pub fn rgb_to_hex(rgb: [u8; 3]) -> String {
    format!("#{:02X}{:02X}{:02X}", rgb[0], rgb[1], rgb[2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn buffer_from_fn(w: u32, h: u32, f: impl Fn(u32, u32) -> [u8; 4]) -> PixelBuffer {
        PixelBuffer::from_rgba(RgbaImage::from_fn(w, h, |x, y| Rgba(f(x, y))))
    }

    #[test]
    fn test_luminance_extremes() {
        assert!((relative_luminance([0, 0, 0]) - 0.0).abs() < 1e-9);
        assert!((relative_luminance([255, 255, 255]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_contrast_black_white_is_21() {
        let ratio = contrast_ratio(1.0, 0.0);
        assert!((ratio - 21.0).abs() < 1e-9);
    }

    #[test]
    fn test_contrast_symmetric() {
        let a = relative_luminance([30, 90, 200]);
        let b = relative_luminance([240, 230, 10]);
        assert_eq!(contrast_ratio(a, b), contrast_ratio(b, a));
        assert!(contrast_ratio(a, a) >= 1.0);
    }

    #[test]
    fn test_quantize() {
        assert_eq!(quantize(0, 10), 0);
        assert_eq!(quantize(14, 10), 10);
        assert_eq!(quantize(15, 10), 20);
        assert_eq!(quantize(204, 10), 200);
        // 255 rounds up to 260 and is clamped
        assert_eq!(quantize(255, 10), 255);
    }

    #[test]
    fn test_saturation_and_hex() {
        assert_eq!(saturation([0, 0, 0]), 0.0);
        assert_eq!(saturation([128, 128, 128]), 0.0);
        assert!((saturation([255, 0, 0]) - 1.0).abs() < 1e-9);
        assert_eq!(rgb_to_hex([255, 16, 0]), "#FF1000");
    }

    #[test]
    fn test_extract_black_background_white_text() {
        // Left 30% white, rest black: black dominates
        let pixels = buffer_from_fn(100, 100, |x, _| {
            if x < 30 { [255, 255, 255, 255] } else { [0, 0, 0, 255] }
        });
        let colors = extract_colors(&pixels, &PaletteOptions::default());

        assert_eq!(colors.palette.len(), 2);
        assert_eq!(colors.palette[0].hex, "#000000");
        assert_eq!(colors.background, "#000000");
        assert_eq!(colors.text_colors, vec!["#FFFFFF".to_string()]);
        // No saturated color: primary falls back to the second entry
        assert_eq!(colors.primary, "#FFFFFF");
    }

    #[test]
    fn test_saturated_color_becomes_primary() {
        let pixels = buffer_from_fn(100, 100, |x, _| match x {
            0..=49 => [255, 255, 255, 255],
            50..=79 => [200, 30, 30, 255],
            _ => [120, 120, 120, 255],
        });
        let colors = extract_colors(&pixels, &PaletteOptions::default());

        assert_eq!(colors.background, "#FFFFFF");
        assert_eq!(colors.primary, "#C81E1E");
        assert!(!colors.text_colors.contains(&colors.background));
    }

    #[test]
    fn test_transparent_image_is_empty() {
        let pixels = buffer_from_fn(20, 20, |_, _| [255, 0, 0, 0]);
        let colors = extract_colors(&pixels, &PaletteOptions::default());
        assert!(colors.palette.is_empty());
        assert_eq!(colors.background, "");
        assert!(colors.text_colors.is_empty());
    }

    #[test]
    fn test_palette_capped_and_sorted() {
        // Many distinct colors; palette must be capped and frequency-descending
        let pixels = buffer_from_fn(200, 200, |x, y| [(x % 50 * 5) as u8, (y % 7 * 30) as u8, 0, 255]);
        let options = PaletteOptions::default();
        let palette = build_palette(&pixels, &options);

        assert!(palette.len() <= options.palette_size);
        for pair in palette.windows(2) {
            assert!(pair[0].frequency >= pair[1].frequency);
        }
    }

    #[test]
    fn test_stride_ceiling() {
        let options = PaletteOptions { max_samples: 1000, ..Default::default() };
        assert_eq!(sample_stride(100, &options), 10);
        assert_eq!(sample_stride(1_000_000, &options), 1000);
    }
}
