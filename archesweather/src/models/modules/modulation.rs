//! # Conditional Modulation (adaLN)
//!
//! Maps a conditioning vector to the per-channel shift, scale and gate vectors
//! consumed by the attention and feed-forward stages of every block of a layer.
//! The projection starts at zero, so a freshly built conditioned layer leaves
//! its input untouched.

use burn::{
    nn::{Initializer, Linear, LinearConfig},
    prelude::*,
    tensor::activation::silu,
};

/// Configuration for [`ConditionalModulation`].
#[derive(Config, Debug)]
pub struct ConditionalModulationConfig {
    /// Size of the conditioning vector.
    pub cond_dim: usize,
    /// Channel dimension of the modulated tokens.
    pub dim: usize,
}

impl ConditionalModulationConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConditionalModulation<B> {
        let linear = LinearConfig::new(self.cond_dim, 6 * self.dim)
            .with_bias(true)
            .with_initializer(Initializer::Zeros)
            .init(device);

        ConditionalModulation {
            linear,
            dim: self.dim,
        }
    }
}

/// `SiLU` followed by `Linear(cond_dim → 6·dim)`.
#[derive(Module, Debug)]
pub struct ConditionalModulation<B: Backend> {
    linear: Linear<B>,
    dim: usize,
}

impl<B: Backend> ConditionalModulation<B> {
    /// # Shapes
    /// - cond: `[batch, cond_dim]`
    /// - output: six `[batch, dim]` vectors
    pub fn forward(&self, cond: Tensor<B, 2>) -> Modulation<B> {
        let out = self.linear.forward(silu(cond));
        let part = |i: usize| out.clone().narrow(1, i * self.dim, self.dim);

        Modulation {
            shift_attn: part(0),
            scale_attn: part(1),
            gate_attn: part(2),
            shift_ffn: part(3),
            scale_ffn: part(4),
            gate_ffn: part(5),
        }
    }
}

/// Per-sample modulation vectors, each `[batch, dim]`.
#[derive(Debug, Clone)]
pub struct Modulation<B: Backend> {
    pub shift_attn: Tensor<B, 2>,
    pub scale_attn: Tensor<B, 2>,
    pub gate_attn: Tensor<B, 2>,
    pub shift_ffn: Tensor<B, 2>,
    pub scale_ffn: Tensor<B, 2>,
    pub gate_ffn: Tensor<B, 2>,
}

impl<B: Backend> Modulation<B> {
    /// `x · (1 + scale) + shift` over the token axis of `x: [batch, tokens, dim]`.
    pub fn modulate(x: Tensor<B, 3>, shift: &Tensor<B, 2>, scale: &Tensor<B, 2>) -> Tensor<B, 3> {
        x.clone() * scale.clone().unsqueeze_dim(1) + x + shift.clone().unsqueeze_dim(1)
    }

    /// `gate · x` over the token axis of `x: [batch, tokens, dim]`.
    pub fn gate(x: Tensor<B, 3>, gate: &Tensor<B, 2>) -> Tensor<B, 3> {
        x * gate.clone().unsqueeze_dim(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn zero_initialized_modulation_is_all_zero() {
        let device = Default::default();
        let modulation = ConditionalModulationConfig::new(32, 16).init::<TestBackend>(&device);
        let cond = Tensor::random([3, 32], Distribution::Normal(0.0, 1.0), &device);

        let out = modulation.forward(cond);

        for part in [
            out.shift_attn,
            out.scale_attn,
            out.gate_attn,
            out.shift_ffn,
            out.scale_ffn,
            out.gate_ffn,
        ] {
            assert_eq!(part.dims(), [3, 16]);
            part.to_data()
                .assert_eq(&Tensor::<TestBackend, 2>::zeros([3, 16], &device).to_data(), true);
        }
    }

    #[test]
    fn modulate_broadcasts_over_tokens() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::ones([1, 2, 2], &device);
        let shift = Tensor::from_floats([[1.0, -1.0]], &device);
        let scale = Tensor::from_floats([[1.0, 0.5]], &device);

        Modulation::modulate(x.clone(), &shift, &scale)
            .to_data()
            .assert_eq(&TensorData::from([[[3.0f32, 0.5], [3.0, 0.5]]]), false);
        Modulation::gate(x, &scale)
            .to_data()
            .assert_eq(&TensorData::from([[[1.0f32, 0.5], [1.0, 0.5]]]), false);
    }
}
