//! Patch embedding of pressure-level and surface fields, and the vertical
//! interaction layer applied right after it.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig, Conv3d, Conv3dConfig},
        Linear, LinearConfig,
    },
    prelude::*,
};

use super::window::{EmbeddingShape, Padding3d};

/// Configuration for [`PatchEmbedding`].
#[derive(Config, Debug)]
pub struct PatchEmbeddingConfig {
    /// Token channels.
    pub dim: usize,
    /// Patch size along `(level, lat, lon)`.
    pub patch_size: [usize; 3],
    /// `(variables, levels, lat, lon)` of the pressure-level input.
    pub plevel_size: [usize; 4],
    /// `(variables, lat, lon)` of the surface input, static fields included.
    pub surface_size: [usize; 3],
}

impl PatchEmbeddingConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PatchEmbedding<B> {
        let [plevel_vars, levels, lat, lon] = self.plevel_size;
        let [_, ph, pw] = self.patch_size;
        let padding = Padding3d::for_volume([levels, lat, lon], self.patch_size);

        PatchEmbedding {
            conv: Conv3dConfig::new([plevel_vars, self.dim], self.patch_size)
                .with_stride(self.patch_size)
                .init(device),
            conv_surface: Conv2dConfig::new([self.surface_size[0], self.dim], [ph, pw])
                .with_stride([ph, pw])
                .init(device),
            padding,
            embedding_size: self.embedding_size(),
        }
    }

    /// `(levels + 1, lat, lon)` of the token volume, the extra level holding
    /// the surface.
    pub fn embedding_size(&self) -> [usize; 3] {
        let [_, levels, lat, lon] = self.plevel_size;
        let padded = Padding3d::for_volume([levels, lat, lon], self.patch_size)
            .padded_size([levels, lat, lon]);
        let [pz, ph, pw] = self.patch_size;

        [padded[0] / pz + 1, padded[1] / ph, padded[2] / pw]
    }
}

/// Non-overlapping patch projection of level and surface fields to tokens.
#[derive(Module, Debug)]
pub struct PatchEmbedding<B: Backend> {
    conv: Conv3d<B>,
    conv_surface: Conv2d<B>,
    padding: Padding3d,
    embedding_size: [usize; 3],
}

impl<B: Backend> PatchEmbedding<B> {
    /// # Shapes
    /// - level: `[batch, plevel_vars, levels, lat, lon]`
    /// - surface: `[batch, surface_vars, lat, lon]`
    /// - output: tokens `[batch, Z·H·W, dim]` with the surface as the last level
    pub fn forward(
        &self,
        level: Tensor<B, 5>,
        surface: Tensor<B, 4>,
    ) -> (Tensor<B, 3>, EmbeddingShape) {
        let level = self.conv.forward(self.padding.pad_channels_first(level));
        let surface = self.conv_surface.forward(self.padding.pad_planar(surface));

        let x = Tensor::cat(vec![level, surface.unsqueeze_dim(2)], 2);
        let [batch, channels, levels, lat, lon] = x.dims();
        let shape = EmbeddingShape::new(batch, levels, lat, lon, channels);

        (x.flatten::<3>(2, 4).swap_dims(1, 2), shape)
    }

    pub const fn embedding_size(&self) -> [usize; 3] {
        self.embedding_size
    }

    /// Padding applied to the inputs, in input resolution.
    pub const fn padding(&self) -> Padding3d {
        self.padding
    }
}

/// Configuration for [`LinVert`].
#[derive(Config, Debug)]
pub struct LinVertConfig {
    pub dim: usize,
    /// Number of token levels, surface included.
    pub levels: usize,
}

impl LinVertConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LinVert<B> {
        let width = self.levels * self.dim;

        LinVert {
            fc: LinearConfig::new(width, width).init(device),
            levels: self.levels,
        }
    }
}

/// Residual linear map mixing all levels of each `(lat, lon)` column.
#[derive(Module, Debug)]
pub struct LinVert<B: Backend> {
    fc: Linear<B>,
    levels: usize,
}

impl<B: Backend> LinVert<B> {
    /// # Shapes
    /// - x: `[batch, levels·lat·lon, dim]`
    /// - output: same as `x`
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, tokens, dim] = x.dims();
        let columns = tokens / self.levels;

        let mixed = x
            .clone()
            .reshape([batch, self.levels, columns, dim])
            .swap_dims(1, 2)
            .reshape([batch, columns, self.levels * dim]);
        let mixed = self
            .fc
            .forward(mixed)
            .reshape([batch, columns, self.levels, dim])
            .swap_dims(1, 2)
            .reshape([batch, tokens, dim]);

        x + mixed
    }
}
