//! Contour extraction capability.
//!
//! The detector only needs "grayscale image in, candidate rectangles out".
//! [`resolve`] picks the implementation once; when computer vision is
//! compiled out or disabled the [`NullBackend`] makes the detector a no-op.

use image::GrayImage;

use crate::geometry::BBox;

pub trait ContourBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// False for the null backend; the detector skips all work in that case.
    fn is_available(&self) -> bool {
        true
    }

    /// Bounding boxes of the outermost edge contours of `gray`.
    fn candidate_boxes(&self, gray: &GrayImage) -> Vec<BBox>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl ContourBackend for NullBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn candidate_boxes(&self, _gray: &GrayImage) -> Vec<BBox> {
        Vec::new()
    }
}

/// Edge detection and contour tracing through `imageproc`.
#[cfg(feature = "cv")]
#[derive(Debug, Clone, Copy)]
pub struct ImageprocBackend {
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
}

#[cfg(feature = "cv")]
impl Default for ImageprocBackend {
    fn default() -> Self {
        Self {
            blur_sigma: 1.0,
            canny_low: 40.0,
            canny_high: 120.0,
        }
    }
}

#[cfg(feature = "cv")]
impl ContourBackend for ImageprocBackend {
    fn name(&self) -> &'static str {
        "imageproc"
    }

    fn candidate_boxes(&self, gray: &GrayImage) -> Vec<BBox> {
        use imageproc::contours::{find_contours, BorderType};
        use imageproc::distance_transform::Norm;
        use imageproc::{edges, filter, morphology};

        let blurred = filter::gaussian_blur_f32(gray, self.blur_sigma);
        let edge_map = edges::canny(&blurred, self.canny_low, self.canny_high);
        // 3x3 dilation joins corner gaps Canny leaves in rectangle outlines
        let closed = morphology::dilate(&edge_map, Norm::LInf, 1);

        find_contours::<u32>(&closed)
            .into_iter()
            .filter(|c| c.parent.is_none() && matches!(c.border_type, BorderType::Outer))
            .filter_map(|c| {
                let xs = c.points.iter().map(|p| p.x);
                let ys = c.points.iter().map(|p| p.y);
                let (x0, x1) = (xs.clone().min()?, xs.max()?);
                let (y0, y1) = (ys.clone().min()?, ys.max()?);
                Some(BBox {
                    x: x0 as f64,
                    y: y0 as f64,
                    w: (x1 - x0 + 1) as f64,
                    h: (y1 - y0 + 1) as f64,
                })
            })
            .collect()
    }
}

/// Picks the contour backend for this process.
pub fn resolve(enabled: bool) -> Box<dyn ContourBackend> {
    if !enabled {
        crate::log("CTA detector disabled by configuration");
        return Box::new(NullBackend);
    }
    #[cfg(feature = "cv")]
    {
        Box::new(ImageprocBackend::default())
    }
    #[cfg(not(feature = "cv"))]
    {
        crate::log("CTA detector unavailable: built without the cv feature");
        Box::new(NullBackend)
    }
}
