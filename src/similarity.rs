//! Structural similarity (SSIM) between two crops.
//!
//! Mean SSIM over every 7x7 window (uniform weights, sample covariance),
//! averaged over the RGB channels. Window statistics come from summed-area
//! tables so the cost is linear in the pixel count.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array2;

const WINDOW: usize = 7;
const DATA_RANGE: f64 = 255.0;
const K1: f64 = 0.01;
const K2: f64 = 0.03;

/// Mean SSIM of `candidate` against `reference`, in [-1, 1].
///
/// A candidate of a different size is resampled to the reference size.
/// Empty images have no structure to compare and score 0.
pub fn structural_similarity(reference: &RgbImage, candidate: &RgbImage) -> f64 {
    let (w, h) = reference.dimensions();
    if w == 0 || h == 0 || candidate.width() == 0 || candidate.height() == 0 {
        return 0.0;
    }

    let resized;
    let candidate = if candidate.dimensions() != (w, h) {
        resized = imageops::resize(candidate, w, h, FilterType::Triangle);
        &resized
    } else {
        candidate
    };

    let total: f64 = (0..3)
        .map(|c| ssim_plane(&channel_plane(reference, c), &channel_plane(candidate, c)))
        .sum();
    total / 3.0
}

fn channel_plane(image: &RgbImage, channel: usize) -> Array2<f64> {
    let (w, h) = image.dimensions();
    Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
        image.get_pixel(x as u32, y as u32)[channel] as f64
    })
}

/// Summed-area table with a leading zero row and column.
fn integral(plane: &Array2<f64>) -> Array2<f64> {
    let (h, w) = plane.dim();
    let mut table = Array2::zeros((h + 1, w + 1));
    for y in 0..h {
        let mut row_sum = 0.0;
        for x in 0..w {
            row_sum += plane[[y, x]];
            table[[y + 1, x + 1]] = table[[y, x + 1]] + row_sum;
        }
    }
    table
}

#[inline]
fn window_sum(table: &Array2<f64>, y: usize, x: usize, win: usize) -> f64 {
    table[[y + win, x + win]] - table[[y, x + win]] - table[[y + win, x]] + table[[y, x]]
}

fn ssim_plane(x: &Array2<f64>, y: &Array2<f64>) -> f64 {
    let (h, w) = x.dim();
    let win = WINDOW.min(h).min(w);
    let n = (win * win) as f64;
    let cov_norm = if n > 1.0 { n / (n - 1.0) } else { 1.0 };
    let c1 = (K1 * DATA_RANGE).powi(2);
    let c2 = (K2 * DATA_RANGE).powi(2);

    let sx = integral(x);
    let sy = integral(y);
    let sxx = integral(&(x * x));
    let syy = integral(&(y * y));
    let sxy = integral(&(x * y));

    let rows = h - win + 1;
    let cols = w - win + 1;
    let mut scores = Array2::<f64>::zeros((rows, cols));
    for i in 0..rows {
        for j in 0..cols {
            let mx = window_sum(&sx, i, j, win) / n;
            let my = window_sum(&sy, i, j, win) / n;
            let vx = (window_sum(&sxx, i, j, win) / n - mx * mx) * cov_norm;
            let vy = (window_sum(&syy, i, j, win) / n - my * my) * cov_norm;
            let cxy = (window_sum(&sxy, i, j, win) / n - mx * my) * cov_norm;

            let numerator = (2.0 * mx * my + c1) * (2.0 * cxy + c2);
            let denominator = (mx * mx + my * my + c1) * (vx + vy + c2);
            scores[[i, j]] = numerator / denominator;
        }
    }
    scores.mean().unwrap_or(0.0)
}

/// Drops near-identical frames before they reach the classifier.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityGate {
    threshold: f64,
}

impl SimilarityGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn score(&self, previous: &RgbImage, candidate: &RgbImage) -> f64 {
        structural_similarity(previous, candidate)
    }

    /// `true` when `candidate` adds nothing over `previous`.
    pub fn is_duplicate(&self, previous: &RgbImage, candidate: &RgbImage) -> bool {
        self.score(previous, candidate) >= self.threshold
    }
}
