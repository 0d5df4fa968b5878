use super::{matching_grayscale, EngineError, ScoreResult, SimilarityEngine, DEFAULT_THRESHOLD};
use crate::pipeline::document::Bitmap;
use image::GrayImage;
use rayon::prelude::*;

/// Side of the square averaging window.
const WINDOW: usize = 7;
const WINDOW_PIXELS: f64 = (WINDOW * WINDOW) as f64;
const DATA_RANGE: f64 = 255.0;
const C1: f64 = (0.01 * DATA_RANGE) * (0.01 * DATA_RANGE);
const C2: f64 = (0.03 * DATA_RANGE) * (0.03 * DATA_RANGE);

/// Structural similarity index over the whole page.
///
/// Mean SSIM of every 7x7 window that fits inside the image, with uniform
/// weights and sample covariance. Identical pages score exactly 1.0.
pub struct SsimEngine {
    threshold: f64,
}

impl SsimEngine {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Default for SsimEngine {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl SimilarityEngine for SsimEngine {
    fn name(&self) -> &str {
        "ssim"
    }

    fn compare(&self, a: &Bitmap, b: &Bitmap) -> Result<ScoreResult, EngineError> {
        let (gray_a, gray_b) = matching_grayscale(a, b);
        let score = mean_ssim(&gray_a, &gray_b)?;
        Ok(ScoreResult::thresholded(score, self.threshold))
    }
}

/// Both images must already have equal dimensions.
pub fn mean_ssim(a: &GrayImage, b: &GrayImage) -> Result<f64, EngineError> {
    let (width, height) = a.dimensions();
    if a.dimensions() != b.dimensions() {
        return Err(EngineError::ComputationFailed {
            message: format!(
                "dimension mismatch: {:?} vs {:?}",
                a.dimensions(),
                b.dimensions()
            ),
        });
    }
    if (width as usize) < WINDOW || (height as usize) < WINDOW {
        return Err(EngineError::ImageTooSmall {
            width,
            height,
            min: WINDOW as u32,
        });
    }

    let rows = height as usize - WINDOW + 1;
    let cols = width as usize - WINDOW + 1;

    // Row sums are collected in order so the total does not depend on how
    // rayon splits the work.
    let row_sums: Vec<f64> = (0..rows)
        .into_par_iter()
        .map(|top| window_row_sum(a.as_raw(), b.as_raw(), width as usize, top))
        .collect();
    let total: f64 = row_sums.iter().sum();

    Ok(total / (rows * cols) as f64)
}

/// Sum of SSIM over every window whose top edge is `top`.
fn window_row_sum(a: &[u8], b: &[u8], width: usize, top: usize) -> f64 {
    // Per column: sum x, sum y, sum x^2, sum y^2, sum xy over the window rows.
    let mut columns = vec![[0u64; 5]; width];
    for y in top..top + WINDOW {
        let row = y * width;
        for (x, column) in columns.iter_mut().enumerate() {
            let p = a[row + x] as u64;
            let q = b[row + x] as u64;
            column[0] += p;
            column[1] += q;
            column[2] += p * p;
            column[3] += q * q;
            column[4] += p * q;
        }
    }

    let mut window = [0u64; 5];
    for column in &columns[..WINDOW] {
        for k in 0..5 {
            window[k] += column[k];
        }
    }

    let mut total = window_ssim(&window);
    for x in WINDOW..width {
        for k in 0..5 {
            window[k] += columns[x][k];
            window[k] -= columns[x - WINDOW][k];
        }
        total += window_ssim(&window);
    }
    total
}

fn window_ssim(sums: &[u64; 5]) -> f64 {
    let cov_norm = WINDOW_PIXELS / (WINDOW_PIXELS - 1.0);

    let ux = sums[0] as f64 / WINDOW_PIXELS;
    let uy = sums[1] as f64 / WINDOW_PIXELS;
    let uxx = sums[2] as f64 / WINDOW_PIXELS;
    let uyy = sums[3] as f64 / WINDOW_PIXELS;
    let uxy = sums[4] as f64 / WINDOW_PIXELS;

    let vx = cov_norm * (uxx - ux * ux);
    let vy = cov_norm * (uyy - uy * uy);
    let vxy = cov_norm * (uxy - ux * uy);

    let numerator = (2.0 * ux * uy + C1) * (2.0 * vxy + C2);
    let denominator = (ux * ux + uy * uy + C1) * (vx + vy + C2);
    numerator / denominator
}
