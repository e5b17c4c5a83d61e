// ============================================================
// Layer 3 — Prediction Mask
// ============================================================
// A stack of N binary layers over a fixed H×W grid, one layer
// per anatomical category: shape [N, H, W].
//
// The rank is checked once, at construction, so every exporter
// downstream can rely on a three-dimensional mask.

use ndarray::{Array2, Array3, ArrayD, ArrayView2, Axis, Ix3};

use crate::domain::error::{ensure_invariant, PipelineError};

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionMask {
    layers: Array3<bool>,
}

impl PredictionMask {
    pub fn new(layers: Array3<bool>) -> Self {
        Self { layers }
    }

    /// Accept a mask of unknown rank; anything but [N, H, W] is rejected.
    pub fn from_dyn(mask: ArrayD<bool>) -> Result<Self, PipelineError> {
        let ndim = mask.ndim();
        let layers = mask.into_dimensionality::<Ix3>().map_err(|_| {
            PipelineError::invariant(format!(
                "prediction mask must be 3-dimensional (category × H × W), got {ndim} dimensions"
            ))
        })?;
        Ok(Self { layers })
    }

    /// Threshold a flat [N, H, W] probability buffer.
    pub fn from_probabilities(
        shape:     [usize; 3],
        probs:     &[f32],
        threshold: f32,
    ) -> Result<Self, PipelineError> {
        let expected = shape.iter().product::<usize>();
        ensure_invariant(probs.len() == expected, || {
            format!("probability buffer holds {} values, shape {:?} needs {}", probs.len(), shape, expected)
        })?;
        let bits: Vec<bool> = probs.iter().map(|&p| p > threshold).collect();
        let layers = Array3::from_shape_vec(shape, bits)
            .map_err(|e| PipelineError::invariant(e.to_string()))?;
        Ok(Self { layers })
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len_of(Axis(0))
    }

    /// (height, width) of every layer
    pub fn spatial_size(&self) -> (usize, usize) {
        let (_, h, w) = self.layers.dim();
        (h, w)
    }

    pub fn layer(&self, index: usize) -> ArrayView2<'_, bool> {
        self.layers.index_axis(Axis(0), index)
    }

    pub fn true_count(&self, index: usize) -> usize {
        self.layer(index).iter().filter(|&&on| on).count()
    }

    /// Logical OR over the listed layers.
    pub fn union(&self, indices: &[usize]) -> Result<Array2<bool>, PipelineError> {
        let (h, w) = self.spatial_size();
        let mut out = Array2::from_elem((h, w), false);
        for &i in indices {
            ensure_invariant(i < self.layer_count(), || {
                format!("layer index {i} out of range for a {}-layer mask", self.layer_count())
            })?;
            out.zip_mut_with(&self.layer(i), |acc, &on| *acc |= on);
        }
        Ok(out)
    }

    pub fn as_array(&self) -> &Array3<bool> {
        &self.layers
    }

    pub fn into_array(self) -> Array3<bool> {
        self.layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_rank_is_checked() {
        let flat = ArrayD::from_elem(IxDyn(&[4, 4]), false);
        let err = PredictionMask::from_dyn(flat).unwrap_err();
        assert!(matches!(err, PipelineError::InvariantViolation(_)));

        let ok = ArrayD::from_elem(IxDyn(&[2, 4, 4]), true);
        assert_eq!(PredictionMask::from_dyn(ok).unwrap().layer_count(), 2);
    }

    #[test]
    fn test_threshold_and_counts() {
        let probs = [0.9, 0.1, 0.6, 0.4, 0.0, 0.0, 1.0, 0.7];
        let m = PredictionMask::from_probabilities([2, 2, 2], &probs, 0.5).unwrap();
        assert_eq!(m.true_count(0), 2);
        assert_eq!(m.true_count(1), 2);
        assert_eq!(m.spatial_size(), (2, 2));
    }

    #[test]
    fn test_union() {
        let mut a = Array3::from_elem((3, 2, 2), false);
        a[[0, 0, 0]] = true;
        a[[2, 1, 1]] = true;
        a[[1, 0, 1]] = true;
        let m = PredictionMask::new(a);
        let u = m.union(&[0, 2]).unwrap();
        assert!(u[[0, 0]] && u[[1, 1]]);
        assert!(!u[[0, 1]]);
        assert!(m.union(&[5]).is_err());
    }
}
