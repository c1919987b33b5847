//! Image enhancement passes for the CTA detector.
//!
//! Each pass is a pure function of the input image. Low-contrast buttons that
//! produce no edges in the original often show up after gamma lifting or
//! local histogram equalization.

use image::{GrayImage, Luma, Rgba, RgbaImage};
use std::borrow::Cow;

use super::DetectorOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhancementPass {
    Original,
    Gamma,
    Clahe,
}

impl EnhancementPass {
    pub const ALL: [EnhancementPass; 3] = [
        EnhancementPass::Original,
        EnhancementPass::Gamma,
        EnhancementPass::Clahe,
    ];

    /// Short name used in detection ids and reasons.
    pub fn name(&self) -> &'static str {
        match self {
            EnhancementPass::Original => "orig",
            EnhancementPass::Gamma => "gamma",
            EnhancementPass::Clahe => "clahe",
        }
    }

    pub fn apply<'a>(&self, image: &'a RgbaImage, options: &DetectorOptions) -> Cow<'a, RgbaImage> {
        match self {
            EnhancementPass::Original => Cow::Borrowed(image),
            EnhancementPass::Gamma => Cow::Owned(adjust_gamma(image, options.gamma)),
            EnhancementPass::Clahe => Cow::Owned(clahe_on_value(image, options.clip_limit, options.tiles)),
        }
    }
}

/// Per-channel gamma lift: `255 * (i / 255) ^ (1 / gamma)`. Alpha is kept.
pub fn adjust_gamma(image: &RgbaImage, gamma: f64) -> RgbaImage {
    let inv = 1.0 / gamma.max(0.01);
    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        *v = ((i as f64 / 255.0).powf(inv) * 255.0).round().clamp(0.0, 255.0) as u8;
    }

    let mut out = image.clone();
    for px in out.pixels_mut() {
        px[0] = lut[px[0] as usize];
        px[1] = lut[px[1] as usize];
        px[2] = lut[px[2] as usize];
    }
    out
}

/// CLAHE on the HSV value channel. Hue and saturation are preserved by
/// scaling each channel with the new/old value ratio.
pub fn clahe_on_value(image: &RgbaImage, clip_limit: f64, tiles: u32) -> RgbaImage {
    let value = GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let px = image.get_pixel(x, y);
        Luma([px[0].max(px[1]).max(px[2])])
    });
    let equalized = clahe(&value, clip_limit, tiles);

    RgbaImage::from_fn(image.width(), image.height(), |x, y| {
        let px = image.get_pixel(x, y);
        let old_v = value.get_pixel(x, y)[0];
        let new_v = equalized.get_pixel(x, y)[0];
        if old_v == 0 {
            return Rgba([new_v, new_v, new_v, px[3]]);
        }
        let scale = new_v as f64 / old_v as f64;
        let channel = |c: u8| (c as f64 * scale).round().clamp(0.0, 255.0) as u8;
        Rgba([channel(px[0]), channel(px[1]), channel(px[2]), px[3]])
    })
}

/// Contrast-limited adaptive histogram equalization on a `grid x grid` tiling.
///
/// Each tile histogram is clipped at `clip_limit * pixels / 256` with the
/// excess spread evenly, and pixel values are bilinearly interpolated between
/// the four nearest tile mappings.
pub fn clahe(gray: &GrayImage, clip_limit: f64, grid: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }
    let tiles_x = grid.clamp(1, width);
    let tiles_y = grid.clamp(1, height);
    let tile_w = width as f64 / tiles_x as f64;
    let tile_h = height as f64 / tiles_y as f64;

    let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        let y0 = (ty as f64 * tile_h).floor() as u32;
        let y1 = (((ty + 1) as f64 * tile_h).floor() as u32).min(height);
        for tx in 0..tiles_x {
            let x0 = (tx as f64 * tile_w).floor() as u32;
            let x1 = (((tx + 1) as f64 * tile_w).floor() as u32).min(width);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            luts.push(tile_lut(&hist, (x1 - x0) * (y1 - y0), clip_limit));
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        let v = gray.get_pixel(x, y)[0] as usize;
        let (tx0, tx1, fx) = tile_neighbours((x as f64 + 0.5) / tile_w - 0.5, tiles_x);
        let (ty0, ty1, fy) = tile_neighbours((y as f64 + 0.5) / tile_h - 0.5, tiles_y);
        let lut = |tx: usize, ty: usize| luts[ty * tiles_x as usize + tx][v] as f64;

        let top = lut(tx0, ty0) * (1.0 - fx) + lut(tx1, ty0) * fx;
        let bottom = lut(tx0, ty1) * (1.0 - fx) + lut(tx1, ty1) * fx;
        Luma([(top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8])
    })
}

/// Tile indices on either side of a position in tile-center units, plus the
/// interpolation weight of the second one.
fn tile_neighbours(pos: f64, tiles: u32) -> (usize, usize, f64) {
    let last = (tiles - 1) as f64;
    let clamped = pos.clamp(0.0, last);
    let t0 = clamped.floor() as usize;
    let t1 = (t0 + 1).min(tiles as usize - 1);
    (t0, t1, clamped - t0 as f64)
}

fn tile_lut(hist: &[u32; 256], pixels: u32, clip_limit: f64) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if pixels == 0 {
        for (i, v) in lut.iter_mut().enumerate() {
            *v = i as u8;
        }
        return lut;
    }

    let n = pixels as f64;
    let limit = (clip_limit * n / 256.0).max(1.0);
    let mut clipped = [0f64; 256];
    let mut excess = 0.0;
    for (c, &h) in clipped.iter_mut().zip(hist.iter()) {
        let h = h as f64;
        if h > limit {
            excess += h - limit;
            *c = limit;
        } else {
            *c = h;
        }
    }
    let bonus = excess / 256.0;

    let mut cdf = 0.0;
    for (v, c) in lut.iter_mut().zip(clipped.iter()) {
        cdf += c + bonus;
        *v = (cdf / n * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    lut
}
