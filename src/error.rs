//! Error taxonomy for the perception engine.
//!
//! Only [`PerceptionError::Decode`] and [`PerceptionError::Cancelled`] abort a
//! call. Stage failures (OCR, CV safety net, spacing) are absorbed by the stage
//! itself, which returns its documented empty value instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PerceptionError {
    /// The input bytes are not a supported raster image.
    #[error("image decode failed: {0}")]
    Decode(String),

    /// A bounding box could not be normalized. The offending box is dropped.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The caller cancelled the analysis.
    #[error("analysis cancelled")]
    Cancelled,

    #[error("configuration: {0}")]
    Config(String),
}

impl From<image::ImageError> for PerceptionError {
    fn from(err: image::ImageError) -> Self {
        PerceptionError::Decode(err.to_string())
    }
}
