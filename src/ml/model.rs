// ============================================================
// Layer 5 — Transformer Building Blocks
// ============================================================
// The post-norm transformer block shared by the sentence
// encoder (bidirectional, padding mask) and the language model
// of TinyVlm (causal mask):
//
//   x ─┬─ MultiHeadAttention ─ dropout ─(+)─ LayerNorm ─┬─ Linear ─ GELU ─ Linear ─ dropout ─(+)─ LayerNorm
//      └──────────────────────────────────┘              └─────────────────────────────────────┘
//
// Reference: Vaswani et al. (2017) Attention Is All You Need
//            Burn Book §3 (Building Blocks)

use burn::{
    nn::{
        attention::{generate_autoregressive_mask, MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
};

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct TransformerConfig {
    pub d_model:    usize,
    pub num_heads:  usize,
    pub num_layers: usize,
    pub d_ff:       usize,
    #[config(default = 0.0)]
    pub dropout:    f64,
}

impl TransformerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TransformerStack<B> {
        let blocks = (0..self.num_layers)
            .map(|_| self.build_block(device))
            .collect();
        TransformerStack { blocks }
    }

    fn build_block<B: Backend>(&self, device: &B::Device) -> TransformerBlock<B> {
        let self_attn   = MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_ff).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff, self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        TransformerBlock { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

/// Which positions each query may attend to.
#[derive(Debug, Clone)]
pub enum AttentionMask<B: Backend> {
    /// Every position sees every other
    Full,
    /// [batch, seq], true = padding key to ignore
    Padding(Tensor<B, 2, Bool>),
    /// Each position sees itself and earlier positions only
    Causal,
}

#[derive(Module, Debug)]
pub struct TransformerBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> TransformerBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>, mask: &AttentionMask<B>) -> Tensor<B, 3> {
        let input = MhaInput::self_attn(x.clone());
        let input = match mask {
            AttentionMask::Full => input,
            AttentionMask::Padding(pad) => input.mask_pad(pad.clone()),
            AttentionMask::Causal => {
                let [batch, seq, _] = x.dims();
                input.mask_attn(generate_autoregressive_mask::<B>(batch, seq, &x.device()))
            }
        };
        let attn_output = self.self_attn.forward(input).context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self.ffn_linear2.forward(
            burn::tensor::activation::gelu(self.ffn_linear1.forward(x.clone()))
        );
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }
}

#[derive(Module, Debug)]
pub struct TransformerStack<B: Backend> {
    pub blocks: Vec<TransformerBlock<B>>,
}

impl<B: Backend> TransformerStack<B> {
    /// x: [batch, seq, d_model] → [batch, seq, d_model]
    pub fn forward(&self, mut x: Tensor<B, 3>, mask: &AttentionMask<B>) -> Tensor<B, 3> {
        for block in &self.blocks {
            x = block.forward(x, mask);
        }
        x
    }
}

/// Learned absolute positions 0..seq, broadcast over the batch.
pub fn position_ids<B: Backend>(batch: usize, seq: usize, device: &B::Device) -> Tensor<B, 2, Int> {
    Tensor::<B, 1, Int>::arange(0..seq as i64, device)
        .unsqueeze::<2>()
        .expand([batch, seq])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn stack() -> TransformerStack<TestBackend> {
        TransformerConfig::new(8, 2, 2, 16).init(&Default::default())
    }

    #[test]
    fn test_stack_preserves_shape() {
        let x = Tensor::<TestBackend, 3>::random([2, 5, 8], burn::tensor::Distribution::Default, &Default::default());
        for mask in [AttentionMask::Full, AttentionMask::Causal] {
            assert_eq!(stack().forward(x.clone(), &mask).dims(), [2, 5, 8]);
        }
    }

    #[test]
    fn test_causal_prefix_ignores_later_tokens() {
        let device = Default::default();
        let model = stack();
        let a = Tensor::<TestBackend, 3>::random([1, 4, 8], burn::tensor::Distribution::Default, &device);
        // same first three positions, different fourth
        let b = Tensor::cat(
            vec![a.clone().slice([0..1, 0..3, 0..8]), Tensor::ones([1, 1, 8], &device)],
            1,
        );

        let out_a = model.forward(a, &AttentionMask::Causal).slice([0..1, 0..3, 0..8]);
        let out_b = model.forward(b, &AttentionMask::Causal).slice([0..1, 0..3, 0..8]);
        out_a.into_data().assert_approx_eq(&out_b.into_data(), 4);
    }
}
