use super::{EngineError, ScoreResult, SimilarityEngine};
use crate::pipeline::document::Bitmap;

/// Returns the same result for every pair. Useful for exercising the
/// pipeline without paying for a real metric.
pub struct ConstantEngine {
    name: &'static str,
    result: ScoreResult,
}

impl ConstantEngine {
    pub fn new(name: &'static str, result: ScoreResult) -> Self {
        Self { name, result }
    }

    /// Nothing is ever relevant.
    pub fn never() -> Self {
        Self::new(
            "stub-never",
            ScoreResult {
                relevant: false,
                score: 0.0,
            },
        )
    }

    /// Everything is relevant with a perfect score.
    pub fn always() -> Self {
        Self::new(
            "stub-always",
            ScoreResult {
                relevant: true,
                score: 1.0,
            },
        )
    }
}

impl SimilarityEngine for ConstantEngine {
    fn name(&self) -> &str {
        self.name
    }

    fn compare(&self, _a: &Bitmap, _b: &Bitmap) -> Result<ScoreResult, EngineError> {
        Ok(self.result)
    }
}
