use super::{EngineError, ScoreResult, SimilarityEngine, DEFAULT_THRESHOLD};
use crate::pipeline::document::Bitmap;
use image_hasher::{HashAlg, HasherConfig};

/// Gradient perceptual hash compared by Hamming distance.
///
/// `score = 1 - distance / bits`. Hashing normalises size, so pages of
/// different dimensions need no resampling here.
pub struct PerceptualHashEngine {
    threshold: f64,
    hash_size: u32,
}

impl PerceptualHashEngine {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            hash_size: 16,
        }
    }

    pub fn with_hash_size(mut self, hash_size: u32) -> Self {
        self.hash_size = hash_size;
        self
    }
}

impl Default for PerceptualHashEngine {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl SimilarityEngine for PerceptualHashEngine {
    fn name(&self) -> &str {
        "phash"
    }

    fn compare(&self, a: &Bitmap, b: &Bitmap) -> Result<ScoreResult, EngineError> {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Gradient)
            .hash_size(self.hash_size, self.hash_size)
            .to_hasher();

        let hash_a = hasher.hash_image(a);
        let hash_b = hasher.hash_image(b);

        let bits = hash_a.as_bytes().len() * 8;
        if bits == 0 {
            return Err(EngineError::ComputationFailed {
                message: "perceptual hash is empty".to_string(),
            });
        }

        let distance = hash_a.dist(&hash_b) as f64;
        let score = 1.0 - distance / bits as f64;
        Ok(ScoreResult::thresholded(score, self.threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_images::*;
    use super::*;

    #[test]
    fn test_identical_images_match() {
        let img = gradient(120, 80);

        let result = PerceptualHashEngine::default().compare(&img, &img).unwrap();

        assert_eq!(result.score, 1.0);
        assert!(result.relevant);
    }

    #[test]
    fn test_rescaled_copy_still_matches() {
        let original = checkerboard(128, 128, 16);
        let rescaled = checkerboard(256, 256, 32);

        let result = PerceptualHashEngine::default()
            .compare(&original, &rescaled)
            .unwrap();

        assert!(result.score > 0.8, "score was {}", result.score);
    }

    #[test]
    fn test_score_within_unit_interval() {
        let a = checkerboard(64, 64, 4);
        let b = gradient(64, 64);

        let score = PerceptualHashEngine::default()
            .with_hash_size(8)
            .compare(&a, &b)
            .unwrap()
            .score;

        assert!((0.0..=1.0).contains(&score));
    }
}
