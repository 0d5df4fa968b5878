//! Pluggable image similarity metrics.
//!
//! An engine is a pure function of two bitmaps. Engines are looked up by name
//! in an [`EngineRegistry`] once, before a batch starts; the batch driver only
//! ever holds the resolved `Arc<dyn SimilarityEngine>`.

pub mod exact;
pub mod phash;
pub mod ssim;
pub mod stub;

pub use exact::ExactEngine;
pub use phash::PerceptualHashEngine;
pub use ssim::SsimEngine;
pub use stub::ConstantEngine;

use crate::pipeline::document::Bitmap;
use image::imageops::FilterType;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Relevance cutoff applied by the thresholded engines unless configured.
pub const DEFAULT_THRESHOLD: f64 = 0.9;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Image of {width}x{height} is smaller than the {min}x{min} comparison window")]
    ImageTooSmall { width: u32, height: u32, min: u32 },

    #[error("Unknown similarity engine: {name}")]
    UnknownEngine { name: String },

    #[error("Comparison failed: {message}")]
    ComputationFailed { message: String },
}

/// Decision plus confidence for one pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub relevant: bool,
    pub score: f64,
}

impl ScoreResult {
    /// `relevant` iff `score >= threshold`.
    pub fn thresholded(score: f64, threshold: f64) -> Self {
        Self {
            relevant: score >= threshold,
            score,
        }
    }
}

pub trait SimilarityEngine: Send + Sync {
    /// Registry name; also the `model` recorded with each candidate.
    fn name(&self) -> &str;

    fn compare(&self, a: &Bitmap, b: &Bitmap) -> Result<ScoreResult, EngineError>;
}

/// Both images as single-channel intensity with equal dimensions. The second
/// image is resampled to the first one's size when they differ, nearest
/// neighbour so that scan edges stay sharp.
pub fn matching_grayscale(a: &Bitmap, b: &Bitmap) -> (GrayImage, GrayImage) {
    let gray_a = a.to_luma8();
    let gray_b = if a.width() == b.width() && a.height() == b.height() {
        b.to_luma8()
    } else {
        b.resize_exact(a.width(), a.height(), FilterType::Nearest)
            .to_luma8()
    };
    (gray_a, gray_b)
}

/// Name to engine mapping.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: BTreeMap<String, Arc<dyn SimilarityEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in engine, with `threshold` applied to the thresholded ones.
    pub fn with_defaults(threshold: f64) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SsimEngine::new(threshold)));
        registry.register(Arc::new(PerceptualHashEngine::new(threshold)));
        registry.register(Arc::new(ExactEngine));
        registry.register(Arc::new(ConstantEngine::never()));
        registry.register(Arc::new(ConstantEngine::always()));
        registry
    }

    /// Registers `engine` under its own name, replacing any previous entry.
    pub fn register(&mut self, engine: Arc<dyn SimilarityEngine>) {
        self.engines.insert(engine.name().to_string(), engine);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn SimilarityEngine>, EngineError> {
        self.engines
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownEngine {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.engines.keys().map(String::as_str).collect()
    }
}
