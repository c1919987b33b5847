//! Axis-aligned boxes, wire-format normalization and overlap suppression.
//!
//! Every box that enters the engine from the outside arrives as four numbers,
//! either `[x, y, w, h]` or `[x1, y1, x2, y2]`. Both shapes are converted to
//! the canonical [`BBox`] before any geometric comparison happens.

use serde::{Deserialize, Serialize};

use crate::error::PerceptionError;

/// Corner-form extent (px) below which an ambiguous box is read as `[x, y, w, h]`.
pub const TINY_EXTENT: f64 = 8.0;

/// Rectangle in source-image pixel coordinates. `w` and `h` are never negative.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BBox {
    /// Builds a box, rejecting negative or non-finite extents.
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Result<Self, PerceptionError> {
        let values = [x, y, w, h];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(PerceptionError::InvalidGeometry(format!(
                "non-finite coordinates {:?}",
                values
            )));
        }
        if w < 0.0 || h < 0.0 {
            return Err(PerceptionError::InvalidGeometry(format!(
                "negative extent w={} h={}",
                w, h
            )));
        }
        Ok(Self { x, y, w, h })
    }

    /// Smallest box containing both corners. Corner order does not matter.
    pub fn from_corners(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x: x0.min(x1),
            y: y0.min(y1),
            w: (x1 - x0).abs(),
            h: (y1 - y0).abs(),
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }

    pub fn area(&self) -> f64 {
        self.w * self.h
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Width over height, with the height floored at one pixel.
    pub fn aspect(&self) -> f64 {
        self.w / self.h.max(1.0)
    }

    /// Inclusive point containment.
    pub fn contains_point(&self, px: f64, py: f64) -> bool {
        px >= self.x && px <= self.right() && py >= self.y && py <= self.bottom()
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox::from_corners(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    pub fn scaled(&self, factor: f64) -> BBox {
        BBox {
            x: self.x * factor,
            y: self.y * factor,
            w: self.w * factor,
            h: self.h * factor,
        }
    }

    /// Integer `[x, y, w, h]` used in transcripts and ids.
    pub fn rounded(&self) -> [i64; 4] {
        [
            self.x.round() as i64,
            self.y.round() as i64,
            self.w.round() as i64,
            self.h.round() as i64,
        ]
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.x, self.y, self.w, self.h]
    }
}

/// A box exactly as it arrived on the wire, with its shape resolved.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WireBox {
    /// `[x, y, w, h]`
    Xywh([f64; 4]),
    /// `[x1, y1, x2, y2]`
    Xyxy([f64; 4]),
}

impl WireBox {
    /// Resolves which of the two shapes `raw` uses.
    ///
    /// The corner reading is chosen when the 3rd/4th numbers are larger than
    /// the 1st/2nd and fit inside the image. Tiny boxes, whose corner reading
    /// would span less than [`TINY_EXTENT`] on both axes, stay `[x, y, w, h]`,
    /// as does every box seen without image bounds.
    pub fn detect(raw: [f64; 4], bounds: Option<(u32, u32)>) -> WireBox {
        let [a, b, c, d] = raw;
        let Some((width, height)) = bounds else {
            return WireBox::Xywh(raw);
        };

        let grows = c > a && d > b;
        let corners_inside = c <= width as f64 && d <= height as f64;
        let tiny = c - a < TINY_EXTENT && d - b < TINY_EXTENT;

        if grows && corners_inside && !tiny {
            WireBox::Xyxy(raw)
        } else {
            WireBox::Xywh(raw)
        }
    }

    /// Converts to the canonical form. Idempotent: feeding the result back in as
    /// `Xywh` yields the same box.
    pub fn normalize(self) -> Result<BBox, PerceptionError> {
        match self {
            WireBox::Xywh([x, y, w, h]) => BBox::new(x, y, w, h),
            WireBox::Xyxy([x1, y1, x2, y2]) => BBox::new(x1, y1, x2 - x1, y2 - y1),
        }
    }
}

impl From<BBox> for WireBox {
    fn from(bbox: BBox) -> Self {
        WireBox::Xywh(bbox.to_array())
    }
}

/// Detects the wire shape and normalizes in one step.
pub fn normalize_wire(raw: [f64; 4], bounds: Option<(u32, u32)>) -> Result<BBox, PerceptionError> {
    WireBox::detect(raw, bounds).normalize()
}

/// Intersection-over-Union of two boxes, 0.0 when the union is empty.
pub fn iou(a: &BBox, b: &BBox) -> f64 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = a.right().min(b.right());
    let y2 = a.bottom().min(b.bottom());

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Anything that can take part in non-maximum suppression.
pub trait Scored {
    fn bbox(&self) -> &BBox;
    fn score(&self) -> f64;
    /// Tie-breaker for equal scores so the output order is reproducible.
    fn tie_key(&self) -> &str;
}

/// Greedy non-maximum suppression.
///
/// Sorts by score (descending), keeps the best remaining item and drops every
/// other item whose IoU with it exceeds `iou_threshold`, until the pool is empty.
pub fn non_max_suppression<T: Scored>(items: Vec<T>, iou_threshold: f64) -> Vec<T> {
    let mut pool = items;
    pool.sort_by(|a, b| {
        b.score()
            .total_cmp(&a.score())
            .then_with(|| a.tie_key().cmp(b.tie_key()))
    });

    let mut kept: Vec<T> = Vec::new();
    for candidate in pool {
        let overlaps = kept
            .iter()
            .any(|k| iou(k.bbox(), candidate.bbox()) > iou_threshold);
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Item {
        id: String,
        bbox: BBox,
        score: f64,
    }

    impl Scored for Item {
        fn bbox(&self) -> &BBox {
            &self.bbox
        }
        fn score(&self) -> f64 {
            self.score
        }
        fn tie_key(&self) -> &str {
            &self.id
        }
    }

    fn item(id: &str, x: f64, y: f64, w: f64, h: f64, score: f64) -> Item {
        Item {
            id: id.to_string(),
            bbox: BBox::new(x, y, w, h).unwrap(),
            score,
        }
    }

    #[test]
    fn test_normalize_xywh_is_unchanged() {
        let bbox = WireBox::Xywh([10.0, 20.0, 30.0, 40.0]).normalize().unwrap();
        assert_eq!(bbox, BBox { x: 10.0, y: 20.0, w: 30.0, h: 40.0 });
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = WireBox::Xyxy([10.0, 20.0, 110.0, 60.0]).normalize().unwrap();
        let twice = WireBox::from(once).normalize().unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_normalize_xyxy() {
        let bbox = WireBox::Xyxy([10.0, 20.0, 110.0, 60.0]).normalize().unwrap();
        assert_eq!(bbox.w, 100.0);
        assert_eq!(bbox.h, 40.0);
        assert_eq!(bbox.x, 10.0);
        assert_eq!(bbox.y, 20.0);
    }

    #[test]
    fn test_detect_corner_shape() {
        // Read as xywh this would end at x=900 inside an 800px image.
        let shape = WireBox::detect([400.0, 100.0, 500.0, 140.0], Some((800, 600)));
        assert!(matches!(shape, WireBox::Xyxy(_)));
    }

    #[test]
    fn test_corner_box_inside_large_image() {
        // Fits either reading in a 1920x1080 frame; corners win.
        let bbox = normalize_wire([100.0, 50.0, 180.0, 70.0], Some((1920, 1080))).unwrap();
        assert_eq!(bbox.to_array(), [100.0, 50.0, 80.0, 20.0]);

        let bbox = normalize_wire([640.0, 400.0, 900.0, 460.0], Some((1920, 1080))).unwrap();
        assert_eq!((bbox.w, bbox.h), (260.0, 60.0));
    }

    #[test]
    fn test_corner_past_image_edge_is_xywh() {
        let bbox = normalize_wire([100.0, 50.0, 180.0, 70.0], Some((160, 1080))).unwrap();
        assert_eq!(bbox.to_array(), [100.0, 50.0, 180.0, 70.0]);
    }

    #[test]
    fn test_detect_ambiguous_tiny_box_defaults_to_xywh() {
        let shape = WireBox::detect([2.0, 2.0, 5.0, 5.0], Some((800, 600)));
        assert!(matches!(shape, WireBox::Xywh(_)));
    }

    #[test]
    fn test_detect_without_bounds_defaults_to_xywh() {
        let shape = WireBox::detect([400.0, 100.0, 500.0, 140.0], None);
        assert!(matches!(shape, WireBox::Xywh(_)));
    }

    #[test]
    fn test_inverted_corners_are_invalid() {
        let result = WireBox::Xyxy([100.0, 100.0, 50.0, 50.0]).normalize();
        assert!(matches!(result, Err(PerceptionError::InvalidGeometry(_))));
    }

    #[test]
    fn test_non_finite_is_invalid() {
        assert!(BBox::new(f64::NAN, 0.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn test_iou() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0).unwrap();
        let b = BBox::new(5.0, 0.0, 10.0, 10.0).unwrap();
        // intersection 50, union 150
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(iou(&a, &a), 1.0);

        let far = BBox::new(100.0, 100.0, 10.0, 10.0).unwrap();
        assert_eq!(iou(&a, &far), 0.0);
    }

    #[test]
    fn test_iou_empty_boxes() {
        let a = BBox::new(0.0, 0.0, 0.0, 0.0).unwrap();
        assert_eq!(iou(&a, &a), 0.0);
    }

    #[test]
    fn test_nms_keeps_best_of_cluster() {
        let items = vec![
            item("a", 0.0, 0.0, 100.0, 40.0, 0.5),
            item("b", 2.0, 2.0, 100.0, 40.0, 0.9),
            item("c", 4.0, 0.0, 100.0, 40.0, 0.7),
            item("d", 300.0, 300.0, 100.0, 40.0, 0.4),
        ];
        let kept = non_max_suppression(items, 0.4);
        let ids: Vec<&str> = kept.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d"]);
    }

    #[test]
    fn test_nms_survivors_do_not_overlap() {
        let mut items = Vec::new();
        for i in 0..20 {
            let offset = (i * 7) as f64;
            items.push(item(&format!("i{}", i), offset, offset / 2.0, 80.0, 30.0, (i % 5) as f64 / 5.0));
        }
        let kept = non_max_suppression(items, 0.4);
        for (i, a) in kept.iter().enumerate() {
            for b in kept.iter().skip(i + 1) {
                assert!(iou(&a.bbox, &b.bbox) <= 0.4);
            }
        }
    }

    #[test]
    fn test_nms_ties_are_deterministic() {
        let items = vec![
            item("z", 0.0, 0.0, 50.0, 20.0, 0.5),
            item("a", 1.0, 0.0, 50.0, 20.0, 0.5),
        ];
        let kept = non_max_suppression(items, 0.4);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "a");
    }
}
