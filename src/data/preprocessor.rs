// ============================================================
// Layer 4 — Image Preprocessor
// ============================================================
// Pixel-level steps shared by the bitmap and scan loaders,
// applied in this order:
//
//   1. HWC RGB bytes  → CHW bytes            (to_chw)
//   2. CHW bytes      → CHW floats in [0,1]  (to_unit_range)
//      or raw scan    → [0,1] via min-max     (min_max_normalize)
//   3. per-channel (x - mean) / std           (ImageNormalizer::normalize)
//
// Resizing and device placement happen on the tensor side, in
// the loader, once the array is model-ready.

use image::RgbImage;
use ndarray::{Array3, Axis};

use crate::domain::error::{ensure_invariant, PipelineError};

/// ImageNet channel means (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

// ─── Layout conversions ───────────────────────────────────────────────────────

/// Interleaved RGB image → channel-first byte array [3, H, W].
pub fn to_chw(img: &RgbImage) -> Array3<u8> {
    let (w, h) = img.dimensions();
    Array3::from_shape_fn((3, h as usize, w as usize), |(c, y, x)| {
        img.get_pixel(x as u32, y as u32).0[c]
    })
}

/// Bytes → floats in [0, 1].
pub fn to_unit_range(bytes: &Array3<u8>) -> Array3<f32> {
    bytes.mapv(|b| b as f32 / 255.0)
}

/// Rescale values in place so min → 0 and max → 1.
/// A constant image has no range and maps to all zeros.
pub fn min_max_normalize(values: &mut [f32]) {
    let (min, max) = values.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    });
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        values.iter_mut().for_each(|v| *v = 0.0);
        return;
    }
    values.iter_mut().for_each(|v| *v = (*v - min) / range);
}

/// [0,1] floats → bytes, the inverse of `to_unit_range` up to rounding.
pub fn to_bytes(unit: &Array3<f32>) -> Array3<u8> {
    unit.mapv(|v| (v * 255.0) as u8)
}

/// Replicate a single-channel plane three times: [H, W] data → [3, H, W].
pub fn replicate_gray(plane: &[f32], height: usize, width: usize) -> Result<Array3<f32>, PipelineError> {
    ensure_invariant(plane.len() == height * width, || {
        format!("plane holds {} values, expected {}×{}", plane.len(), height, width)
    })?;
    let mut out = Array3::zeros((3, height, width));
    for mut channel in out.axis_iter_mut(Axis(0)) {
        for (dst, &src) in channel.iter_mut().zip(plane) {
            *dst = src;
        }
    }
    Ok(out)
}

// ─── ImageNormalizer ──────────────────────────────────────────────────────────
/// Per-channel mean/std normalisation of a CHW array in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct ImageNormalizer {
    mean: [f32; 3],
    std:  [f32; 3],
}

impl ImageNormalizer {
    pub fn new(mean: [f32; 3], std: [f32; 3]) -> Self {
        Self { mean, std }
    }

    pub fn imagenet() -> Self {
        Self::new(IMAGENET_MEAN, IMAGENET_STD)
    }

    /// Fails with `InvariantViolation` unless the array has exactly
    /// three channels and every value lies in [0, 1].
    pub fn normalize(&self, mut array: Array3<f32>) -> Result<Array3<f32>, PipelineError> {
        let shape = array.shape().to_vec();
        ensure_invariant(shape[0] == 3, || format!("expected 3 channels, got shape {shape:?}"))?;
        ensure_invariant(array.iter().all(|v| (0.0..=1.0).contains(v)), || {
            "array values must lie in [0, 1] before normalisation".to_string()
        })?;

        for (c, mut channel) in array.axis_iter_mut(Axis(0)).enumerate() {
            let (m, s) = (self.mean[c], self.std[c]);
            channel.mapv_inplace(|v| (v - m) / s);
        }
        Ok(array)
    }

    /// The range a normalised value can take for each channel.
    pub fn output_bounds(&self) -> [(f32, f32); 3] {
        let mut out = [(0.0, 0.0); 3];
        for c in 0..3 {
            out[c] = ((0.0 - self.mean[c]) / self.std[c], (1.0 - self.mean[c]) / self.std[c]);
        }
        out
    }
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::imagenet()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_to_chw_layout() {
        let mut img = RgbImage::new(3, 2);
        img.put_pixel(2, 1, Rgb([10, 20, 30]));
        let chw = to_chw(&img);
        assert_eq!(chw.shape(), &[3, 2, 3]);
        assert_eq!(chw[[0, 1, 2]], 10);
        assert_eq!(chw[[2, 1, 2]], 30);
    }

    #[test]
    fn test_min_max() {
        let mut v = vec![2.0, 4.0, 6.0];
        min_max_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.5, 1.0]);

        let mut flat = vec![7.0; 4];
        min_max_normalize(&mut flat);
        assert!(flat.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_normalize_rejects_wrong_channels() {
        let n = ImageNormalizer::imagenet();
        let err = n.normalize(Array3::zeros((1, 2, 2))).unwrap_err();
        assert!(matches!(err, PipelineError::InvariantViolation(_)));
    }

    #[test]
    fn test_normalize_rejects_out_of_range() {
        let n = ImageNormalizer::imagenet();
        let err = n.normalize(Array3::from_elem((3, 2, 2), 1.5)).unwrap_err();
        assert!(matches!(err, PipelineError::InvariantViolation(_)));
    }

    #[test]
    fn test_normalize_values() {
        let n = ImageNormalizer::imagenet();
        let out = n.normalize(Array3::from_elem((3, 1, 1), 0.485)).unwrap();
        assert!(out[[0, 0, 0]].abs() < 1e-6);
        let bounds = n.output_bounds();
        assert!((bounds[0].0 - (-0.485 / 0.229)).abs() < 1e-6);
    }

    #[test]
    fn test_replicate_gray() {
        let out = replicate_gray(&[0.1, 0.2, 0.3, 0.4], 2, 2).unwrap();
        assert_eq!(out[[2, 1, 1]], 0.4);
        assert_eq!(out[[0, 0, 1]], 0.2);
        assert!(replicate_gray(&[0.1], 2, 2).is_err());
    }
}
