//! # Earth-Specific Block
//!
//! One transformer block of ArchesWeather: 3D window attention with
//! Earth-specific bias (optionally over cyclic-shifted windows), optional axial
//! attention across levels, and a feed-forward stage, each wrapped in a
//! residual connection. With conditioning, both stages are modulated and gated
//! adaLN-style.

use burn::{
    nn::{LayerNorm, LayerNormConfig},
    prelude::*,
};
use burn_extra_ops::{DropPath, DropPathConfig};

use super::{
    attention::{EarthAttention3d, EarthAttention3dConfig},
    axial::{AxialAttention, AxialAttentionConfig},
    mask::shifted_window_mask,
    mlp::{Mlp, MlpConfig},
    modulation::Modulation,
    window::{window_partition, window_reverse, EmbeddingShape, Padding3d, WindowGeometry},
};
use crate::error::ArchesWeatherResult;

/// Configuration for [`EarthSpecificBlock`].
#[derive(Config, Debug)]
pub struct EarthSpecificBlockConfig {
    /// `(level, lat, lon)` size of the token volume.
    pub data_size: [usize; 3],
    /// Token channels.
    pub dim: usize,
    pub heads: usize,
    #[config(default = "0.0")]
    pub drop_path: f64,
    #[config(default = "[2, 6, 12]")]
    pub window_size: [usize; 3],
    #[config(default = "0.0")]
    pub dropout: f64,
    #[config(default = "false")]
    pub axial_attn: bool,
    #[config(default = "8")]
    pub axial_attn_heads: usize,
    /// Treat longitude as non-periodic when masking shifted windows.
    #[config(default = "false")]
    pub limited_area: bool,
}

impl EarthSpecificBlockConfig {
    /// # Errors
    /// - [`InvalidWindowSize`](crate::ArchesWeatherError::InvalidWindowSize) for a
    ///   window component that is neither 1 nor even
    /// - [`InvalidConfiguration`](crate::ArchesWeatherError::InvalidConfiguration) if a
    ///   head count does not divide `dim`
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ArchesWeatherResult<EarthSpecificBlock<B>> {
        let window = WindowGeometry::new(self.window_size)?;
        let padding = Padding3d::for_volume(self.data_size, self.window_size);

        let attention = EarthAttention3dConfig::new(
            padding.padded_size(self.data_size),
            self.dim,
            self.heads,
            self.window_size,
        )
        .with_dropout(self.dropout)
        .init(device)?;

        let axial = if self.axial_attn {
            Some(
                AxialAttentionConfig::new(self.data_size[0], self.dim)
                    .with_heads(self.axial_attn_heads)
                    .init(device)?,
            )
        } else {
            None
        };

        Ok(EarthSpecificBlock {
            norm1: LayerNormConfig::new(self.dim).init(device),
            attention,
            axial,
            norm2: LayerNormConfig::new(self.dim).init(device),
            mlp: MlpConfig::new(self.dim)
                .with_dropout(self.dropout)
                .init(device),
            drop_path: DropPathConfig::new().with_drop_prob(self.drop_path).init(),
            padding,
            window,
            limited_area: self.limited_area,
        })
    }
}

/// 3D transformer block with Earth-specific window attention.
#[derive(Module, Debug)]
pub struct EarthSpecificBlock<B: Backend> {
    norm1: LayerNorm<B>,
    attention: EarthAttention3d<B>,
    axial: Option<AxialAttention<B>>,
    norm2: LayerNorm<B>,
    mlp: Mlp<B>,
    drop_path: DropPath,
    padding: Padding3d,
    window: WindowGeometry,
    limited_area: bool,
}

impl<B: Backend> EarthSpecificBlock<B> {
    /// Applies the block.
    ///
    /// # Arguments
    /// - `x`: tokens `[batch, level·lat·lon, C]`
    /// - `shape`: layout of `x`
    /// - `modulation`: adaLN vectors, shared by every block of a layer
    /// - `roll`: attend over windows shifted by half a window
    ///
    /// # Returns
    /// Tokens with the same shape as `x`.
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        shape: EmbeddingShape,
        modulation: Option<&Modulation<B>>,
        roll: bool,
    ) -> Tensor<B, 3> {
        let shortcut = x.clone();
        let x = self.norm1.forward(x);
        let x = match modulation {
            Some(m) => Modulation::modulate(x, &m.shift_attn, &m.scale_attn),
            None => x,
        };

        let attn = self.window_attention(x, shape, roll);
        let attn = match &self.axial {
            Some(axial) => attn.clone() + axial.forward(attn, shape),
            None => attn,
        };

        match modulation {
            None => {
                let x = shortcut + self.drop_path.forward(attn);
                let ffn = self.mlp.forward(self.norm2.forward(x.clone()));
                x + self.drop_path.forward(ffn)
            }
            Some(m) => {
                let x = shortcut + Modulation::gate(self.drop_path.forward(attn), &m.gate_attn);
                let ffn_in = Modulation::modulate(
                    self.norm2.forward(x.clone()),
                    &m.shift_ffn,
                    &m.scale_ffn,
                );
                let ffn = Modulation::gate(self.mlp.forward(ffn_in), &m.gate_ffn);
                x + self.drop_path.forward(ffn)
            }
        }
    }

    /// Pad, optionally shift, attend per window, then undo shift and padding.
    fn window_attention(
        &self,
        x: Tensor<B, 3>,
        shape: EmbeddingShape,
        roll: bool,
    ) -> Tensor<B, 3> {
        let x = self.padding.pad(x.reshape(shape.dims()));
        let [batch, z, h, w, _] = x.dims();
        let padded = [z, h, w];
        let shift = self.window.shift().map(|s| s as i64);

        let (x, mask) = if roll {
            let mask = shifted_window_mask(
                padded,
                &self.window,
                self.window.shift(),
                self.limited_area,
                &x.device(),
            );
            (x.roll(&shift.map(|s| -s), &[1, 2, 3]), Some(mask))
        } else {
            (x, None)
        };

        let windows = window_partition(x, &self.window);
        let windows = self.attention.forward(windows, mask, batch);
        let x = window_reverse(windows, &self.window, padded);

        let x = if roll { x.roll(&shift, &[1, 2, 3]) } else { x };

        self.padding
            .crop(x)
            .reshape([shape.batch, shape.num_tokens(), shape.channels])
    }
}
