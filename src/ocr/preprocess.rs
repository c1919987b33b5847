use image::imageops::FilterType;
use image::RgbaImage;
use std::borrow::Cow;

use crate::geometry::BBox;

/// Downscales so the longest side is at most `max_side`.
///
/// Returns the image to recognize and the factor that maps its coordinates
/// back to the source (`1.0` when no resize happened).
pub fn downscale_for_ocr(img: &RgbaImage, max_side: u32) -> (Cow<'_, RgbaImage>, f64) {
    let (width, height) = img.dimensions();
    let longest = width.max(height);
    if max_side == 0 || longest <= max_side {
        return (Cow::Borrowed(img), 1.0);
    }

    let scale = max_side as f64 / longest as f64;
    let new_w = ((width as f64 * scale).round() as u32).max(1);
    let new_h = ((height as f64 * scale).round() as u32).max(1);
    let resized = image::imageops::resize(img, new_w, new_h, FilterType::Lanczos3);

    (Cow::Owned(resized), longest as f64 / max_side as f64)
}

/// Maps a box found on the downscaled image back to source coordinates.
pub fn restore_bbox(bbox: BBox, factor: f64) -> BBox {
    if factor == 1.0 {
        bbox
    } else {
        bbox.scaled(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_small_image_is_borrowed() {
        let img: RgbaImage = RgbaImage::new(100, 200);
        let (out, factor) = downscale_for_ocr(&img, 1600);
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(factor, 1.0);
    }

    #[test]
    fn test_large_image_is_downscaled() {
        let img: RgbaImage = RgbaImage::from_pixel(3200, 1000, Rgba([255, 255, 255, 255]));
        let (out, factor) = downscale_for_ocr(&img, 1600);

        assert_eq!(out.dimensions(), (1600, 500));
        assert!((factor - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_restore_bbox() {
        let bbox = BBox::new(10.0, 20.0, 30.0, 5.0).unwrap();
        let restored = restore_bbox(bbox, 2.0);
        assert_eq!(restored.to_array(), [20.0, 40.0, 60.0, 10.0]);
    }
}
