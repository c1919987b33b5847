//! UI Perception Engine
//!
//! Turns a UI screenshot into verifiable facts: dominant colors, recognized
//! text, WCAG contrast, spacing signals and candidate buttons. The facts
//! transcript anchors every item with an id so downstream consumers can only
//! cite what was actually detected.

pub mod cancel;
pub mod color;
pub mod config;
pub mod contrast;
pub mod cta;
pub mod error;
pub mod facts;
pub mod geometry;
pub mod logging;
pub mod ocr;
pub mod paths;
pub mod pipeline;
pub mod sampler;
pub mod spacing;
mod stats;

pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use error::PerceptionError;
pub use facts::{build_facts, PerceptionFacts};
pub use logging::log;
pub use pipeline::{Engine, ExtractedData, ImageInput, OcrRegionWire, PerceptionResult, Stage};
