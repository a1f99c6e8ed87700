//! # Axial Attention Across Levels
//!
//! Every `(lat, lon)` column of a volume attends along its vertical axis.
//! Tokens are regrouped to `[batch · lat · lon, level, C]`, a learned per-level
//! embedding is added and plain multi-head self-attention runs over the levels.

use burn::{
    module::Param,
    nn::{Initializer, Linear, LinearConfig},
    prelude::*,
    tensor::activation::softmax,
};

use super::window::EmbeddingShape;
use crate::error::{ArchesWeatherError, ArchesWeatherResult};

/// Configuration for [`AxialAttention`].
#[derive(Config, Debug)]
pub struct AxialAttentionConfig {
    /// Number of vertical levels.
    pub levels: usize,
    pub dim: usize,
    #[config(default = "8")]
    pub heads: usize,
}

impl AxialAttentionConfig {
    /// # Errors
    /// [`ArchesWeatherError::InvalidConfiguration`] if `dim` is not divisible by `heads`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ArchesWeatherResult<AxialAttention<B>> {
        if self.heads == 0 || self.dim % self.heads != 0 {
            return Err(ArchesWeatherError::InvalidConfiguration {
                reason: format!(
                    "axial attention dim {} is not divisible by {} heads",
                    self.dim, self.heads
                ),
            });
        }

        let position_embedding = Initializer::Normal {
            mean: 0.0,
            std: 1.0,
        }
        .init([1, self.levels, self.dim], device);

        Ok(AxialAttention {
            position_embedding,
            to_q: LinearConfig::new(self.dim, self.dim)
                .with_bias(false)
                .init(device),
            to_kv: LinearConfig::new(self.dim, 2 * self.dim)
                .with_bias(false)
                .init(device),
            to_out: LinearConfig::new(self.dim, self.dim).init(device),
            heads: self.heads,
        })
    }
}

/// Self-attention along the vertical axis with learned level embeddings.
#[derive(Module, Debug)]
pub struct AxialAttention<B: Backend> {
    /// `[1, levels, dim]`.
    position_embedding: Param<Tensor<B, 3>>,
    to_q: Linear<B>,
    to_kv: Linear<B>,
    to_out: Linear<B>,
    heads: usize,
}

impl<B: Backend> AxialAttention<B> {
    /// # Shapes
    /// - x: `[batch, level·lat·lon, C]` laid out as `shape`
    /// - output: same as `x`
    pub fn forward(&self, x: Tensor<B, 3>, shape: EmbeddingShape) -> Tensor<B, 3> {
        let EmbeddingShape {
            batch,
            levels,
            lat,
            lon,
            channels,
        } = shape;

        let columns = x
            .reshape([batch, levels, lat * lon, channels])
            .swap_dims(1, 2)
            .reshape([batch * lat * lon, levels, channels]);
        let columns = columns + self.position_embedding.val();

        self.attend(columns)
            .reshape([batch, lat * lon, levels, channels])
            .swap_dims(1, 2)
            .reshape([batch, levels * lat * lon, channels])
    }

    /// Multi-head self-attention over the sequence axis of `[n, t, C]`.
    fn attend(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [n, t, c] = x.dims();
        let heads = self.heads;
        let head_dim = c / heads;
        let split = |x: Tensor<B, 3>| x.reshape([n, t, heads, head_dim]).swap_dims(1, 2);

        let q = split(self.to_q.forward(x.clone()));
        let kv = self.to_kv.forward(x);
        let k = split(kv.clone().narrow(2, 0, c));
        let v = split(kv.narrow(2, c, c));

        let dots = q.matmul(k.swap_dims(2, 3)) * (head_dim as f64).powf(-0.5);
        let out = softmax(dots, 3).matmul(v).swap_dims(1, 2).reshape([n, t, c]);

        self.to_out.forward(out)
    }
}
