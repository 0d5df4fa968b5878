use super::{matching_grayscale, EngineError, ScoreResult, SimilarityEngine};
use crate::pipeline::document::Bitmap;
use sha2::{Digest, Sha256};

/// Pixel-identical pages only: SHA-256 over the grayscale rasters.
pub struct ExactEngine;

impl ExactEngine {
    fn digest(pixels: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(pixels);
        hasher.finalize().into()
    }
}

impl SimilarityEngine for ExactEngine {
    fn name(&self) -> &str {
        "exact"
    }

    fn compare(&self, a: &Bitmap, b: &Bitmap) -> Result<ScoreResult, EngineError> {
        let (gray_a, gray_b) = matching_grayscale(a, b);
        let identical = Self::digest(gray_a.as_raw()) == Self::digest(gray_b.as_raw());

        Ok(ScoreResult {
            relevant: identical,
            score: if identical { 1.0 } else { 0.0 },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_images::*;
    use super::*;

    #[test]
    fn test_identical_pages() {
        let img = gradient(30, 30);

        let result = ExactEngine.compare(&img, &img).unwrap();

        assert_eq!(result, ScoreResult { relevant: true, score: 1.0 });
    }

    #[test]
    fn test_one_pixel_difference() {
        let a = gradient(30, 30);
        let mut b = a.to_rgb8();
        b.put_pixel(3, 3, image::Rgb([255, 0, 0]));

        let result = ExactEngine
            .compare(&a, &image::DynamicImage::ImageRgb8(b))
            .unwrap();

        assert_eq!(result, ScoreResult { relevant: false, score: 0.0 });
    }
}
