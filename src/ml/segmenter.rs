// ============================================================
// Layer 5 — Anatomy Segmentation Network
// ============================================================
// A compact U-Net producing one probability plane per
// anatomical category at the input resolution:
//
//   [B, 3, 512, 512]
//     │ ConvBlock(3→c)        ───────────────┐ skip
//     │ MaxPool ÷2                           │
//     │ ConvBlock(c→2c)       ───────┐ skip  │
//     │ MaxPool ÷2                   │       │
//     │ ConvBlock(2c→4c)  bottleneck │       │
//     │ upsample ×2, concat ◄────────┘       │
//     │ ConvBlock(6c→2c)                     │
//     │ upsample ×2, concat ◄────────────────┘
//     │ ConvBlock(3c→c)
//     │ Conv 1×1 (c→N), sigmoid
//     ▼
//   [B, N, 512, 512] probabilities
//
// The caller thresholds at 0.5 to obtain a PredictionMask.
//
// Reference: Ronneberger et al. (2015) U-Net

use anyhow::Result;
use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
    tensor::{
        activation::{relu, sigmoid},
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

use crate::domain::error::PipelineError;
use crate::domain::mask::PredictionMask;
use crate::infra::checkpoint::CheckpointDir;

pub const MASK_THRESHOLD: f32 = 0.5;

// ─── Segmenter ────────────────────────────────────────────────────────────────
/// Image batch → per-category probabilities, same spatial size.
pub trait Segmenter<B: Backend> {
    /// data: [batch, 3, H, W] → [batch, N, H, W] in (0, 1)
    fn segment(&self, data: Tensor<B, 4>) -> Tensor<B, 4>;

    fn num_categories(&self) -> usize;
}

/// Split a probability batch into one thresholded mask per image.
pub fn threshold_masks<B: Backend>(probs: Tensor<B, 4>, threshold: f32) -> Result<Vec<PredictionMask>> {
    let [batch, n, h, w] = probs.dims();
    let values = probs
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| PipelineError::invariant(format!("segmentation output is not f32: {e:?}")))?;
    let plane = n * h * w;
    values
        .chunks(plane.max(1))
        .take(batch)
        .map(|chunk| PredictionMask::from_probabilities([n, h, w], chunk, threshold).map_err(anyhow::Error::from))
        .collect()
}

// ─── AnatomyUnet ──────────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct AnatomyUnetConfig {
    #[config(default = 3)]
    pub in_channels:    usize,
    #[config(default = 16)]
    pub base_channels:  usize,
    #[config(default = 159)]
    pub num_categories: usize,
}

impl AnatomyUnetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> AnatomyUnet<B> {
        let c = self.base_channels;
        AnatomyUnet {
            down1:      ConvBlock::new(self.in_channels, c, device),
            down2:      ConvBlock::new(c, 2 * c, device),
            bottleneck: ConvBlock::new(2 * c, 4 * c, device),
            up2:        ConvBlock::new(6 * c, 2 * c, device),
            up1:        ConvBlock::new(3 * c, c, device),
            head:       Conv2dConfig::new([c, self.num_categories], [1, 1]).init(device),
            pool:       MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            num_categories: self.num_categories,
        }
    }
}

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv1: Conv2d<B>,
    pub conv2: Conv2d<B>,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = |i, o| {
            Conv2dConfig::new([i, o], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };
        Self { conv1: conv(in_channels, out_channels), conv2: conv(out_channels, out_channels) }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        relu(self.conv2.forward(relu(self.conv1.forward(x))))
    }
}

#[derive(Module, Debug)]
pub struct AnatomyUnet<B: Backend> {
    pub down1:      ConvBlock<B>,
    pub down2:      ConvBlock<B>,
    pub bottleneck: ConvBlock<B>,
    pub up2:        ConvBlock<B>,
    pub up1:        ConvBlock<B>,
    pub head:       Conv2d<B>,
    pub pool:       MaxPool2d,
    pub num_categories: usize,
}

impl<B: Backend> AnatomyUnet<B> {
    /// Rebuild from `config.json` and restore `model.mpk`.
    pub fn load(ckpt: &CheckpointDir, device: &B::Device) -> Result<Self> {
        let config: AnatomyUnetConfig = ckpt.load_config()?;
        let model = ckpt.load_weights::<B, _>(config.init(device), device)?;
        tracing::info!(
            "Segmentation model loaded from '{}' ({} categories)",
            ckpt.path().display(),
            config.num_categories
        );
        Ok(model)
    }

    /// Raw per-category logits.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let s1 = self.down1.forward(x);
        let s2 = self.down2.forward(self.pool.forward(s1.clone()));
        let b  = self.bottleneck.forward(self.pool.forward(s2.clone()));

        let u2 = self.up2.forward(Tensor::cat(vec![upsample_to(b, &s2), s2], 1));
        let u1 = self.up1.forward(Tensor::cat(vec![upsample_to(u2, &s1), s1], 1));
        self.head.forward(u1)
    }
}

impl<B: Backend> Segmenter<B> for AnatomyUnet<B> {
    fn segment(&self, data: Tensor<B, 4>) -> Tensor<B, 4> {
        sigmoid(self.forward(data))
    }

    fn num_categories(&self) -> usize {
        self.num_categories
    }
}

/// Nearest upsampling of `x` to the spatial size of `like`.
fn upsample_to<B: Backend>(x: Tensor<B, 4>, like: &Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, h, w] = like.dims();
    interpolate(x, [h, w], InterpolateOptions::new(InterpolateMode::Nearest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn tiny() -> AnatomyUnet<TestBackend> {
        AnatomyUnetConfig::new()
            .with_base_channels(2)
            .with_num_categories(5)
            .init(&Default::default())
    }

    #[test]
    fn test_output_matches_input_resolution() {
        let x = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 16], &Default::default());
        let probs = tiny().segment(x);
        assert_eq!(probs.dims(), [2, 5, 16, 16]);
    }

    #[test]
    fn test_threshold_masks_splits_batch() {
        let device = Default::default();
        // image 0 all 0.9, image 1 all 0.1
        let probs = Tensor::<TestBackend, 4>::cat(
            vec![
                Tensor::full([1, 2, 3, 3], 0.9, &device),
                Tensor::full([1, 2, 3, 3], 0.1, &device),
            ],
            0,
        );
        let masks = threshold_masks(probs, MASK_THRESHOLD).unwrap();
        assert_eq!(masks.len(), 2);
        assert_eq!(masks[0].true_count(1), 9);
        assert_eq!(masks[1].true_count(0), 0);
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointDir::create(dir.path()).unwrap();
        let config = AnatomyUnetConfig::new().with_base_channels(2).with_num_categories(3);
        ckpt.save_config(&config).unwrap();
        ckpt.save_weights::<TestBackend, _>(&config.init::<TestBackend>(&Default::default())).unwrap();

        let model = AnatomyUnet::<TestBackend>::load(&ckpt, &Default::default()).unwrap();
        assert_eq!(model.num_categories(), 3);
    }
}
