//! # ArchesWeather
//!
//! A Pangu-style encoder/decoder of Earth-specific transformer layers over a
//! `(level, lat, lon)` token volume, with adaLN conditioning and optional
//! axial attention across levels.
//!
//! ```text
//! level, surface [+ static] [+ positional embeddings]
//!   -> PatchEmbedding [-> LinVert]
//!   -> layer1 ──────────────────────────────┐ (skip)
//!   -> DownSample -> layer2 -> layer3 -> UpSample [⊕ skip]
//!   -> layer4 -> recovery head -> level, surface
//! ```
//!
//! Reference: "ArchesWeather: An efficient AI weather forecasting model at
//! 1.5° resolution", <http://arxiv.org/abs/2405.14527>.

use burn::{module::Param, prelude::*};
use burn_extra_ops::TruncNormal;

use super::modules::{
    CondBasicLayer, CondBasicLayerConfig, DownSample, DownSampleConfig, EarthSpecificLayerConfig,
    LinVert, LinVertConfig, PatchEmbedding, PatchEmbeddingConfig, PatchRecoveryConfig,
    PatchRecoveryConvConfig, RecoveryHead, UpSample, UpSampleConfig,
};
use crate::{config::ArchesWeatherConfig, error::ArchesWeatherResult};

impl ArchesWeatherConfig {
    /// Builds the model.
    ///
    /// # Errors
    /// Any error of [`ArchesWeatherConfig::validate`], plus the construction
    /// errors of the layers and of the recovery head.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ArchesWeatherResult<ArchesWeather<B>> {
        self.validate()?;
        let (lat, lon) = self.lat_lon()?;
        let dm = self.depth_multiplier;
        let dim = self.token_size;

        let drop_path = self.drop_path_schedule();
        let (outer_drop_path, inner_drop_path) = drop_path.split_at(2 * dm);

        let positional_embeddings = (self.position_embs_dim > 0).then(|| {
            Param::from_tensor(
                TruncNormal::with_std(0.02)
                    .sample::<B, 3, _>([self.position_embs_dim, lat, lon], device),
            )
        });

        let patch_embed_config = PatchEmbeddingConfig::new(
            dim,
            self.plevel_patch_size,
            [self.plevel_variables, self.plevels, lat, lon],
            [self.surface_channels(), lat, lon],
        );
        let embedding_size = patch_embed_config.embedding_size();
        let patch_embed = patch_embed_config.init(device);

        let interaction = self
            .first_interaction_layer
            .then(|| LinVertConfig::new(dim, embedding_size[0]).init::<B>(device));

        let downsample_config = DownSampleConfig::new(embedding_size, dim);
        let downsampled_size = downsample_config.downsampled_size();

        let layer = |depth: usize,
                     data_size: [usize; 3],
                     dim: usize,
                     heads: usize,
                     drop_path: &[f64]| {
            CondBasicLayerConfig::new(
                EarthSpecificLayerConfig::new(depth, data_size, dim, heads)
                    .with_drop_path(drop_path.to_vec())
                    .with_window_size(self.window_size)
                    .with_dropout(self.dropout_rate)
                    .with_axial_attn(self.axial_attn)
                    .with_axial_attn_heads(self.axial_attn_heads)
                    .with_limited_area(self.lam),
            )
            .with_cond_dim(self.conditioning())
            .init::<B>(device)
        };

        let out_dim = if self.use_skip { 2 * dim } else { dim };
        let [heads1, heads2, heads3, heads4] = self.num_heads;

        let layer1 = layer(2 * dm, embedding_size, dim, heads1, outer_drop_path)?;
        let layer2 = layer(6 * dm, downsampled_size, 2 * dim, heads2, inner_drop_path)?;
        let layer3 = layer(6 * dm, downsampled_size, 2 * dim, heads3, inner_drop_path)?;
        let layer4 = layer(2 * dm, embedding_size, out_dim, heads4, outer_drop_path)?;

        let recovery = if self.conv_head {
            RecoveryHead::Conv(
                PatchRecoveryConvConfig::new(embedding_size[0] * out_dim)
                    .with_downfactor(self.plevel_patch_size[2])
                    .with_plevel_variables(self.plevel_variables)
                    .with_surface_variables(self.surface_variables)
                    .with_plevels(self.plevels)
                    .init(device)?,
            )
        } else {
            RecoveryHead::Transposed(
                PatchRecoveryConfig::new(
                    out_dim,
                    self.plevel_patch_size,
                    self.plevel_variables,
                    self.surface_variables,
                )
                .init(device),
            )
        };

        tracing::debug!(
            ?embedding_size,
            ?downsampled_size,
            depths = ?[2 * dm, 6 * dm, 6 * dm, 2 * dm],
            conv_head = self.conv_head,
            use_skip = self.use_skip,
            checkpoint_activation = self.checkpoint_activation,
            "Built ArchesWeather"
        );

        Ok(ArchesWeather {
            positional_embeddings,
            patch_embed,
            interaction,
            layer1,
            downsample: downsample_config.init(device),
            layer2,
            layer3,
            upsample: UpSampleConfig::new(2 * dim, dim).init(device),
            layer4,
            recovery,
            use_skip: self.use_skip,
        })
    }
}

/// The ArchesWeather forecasting model.
#[derive(Module, Debug)]
pub struct ArchesWeather<B: Backend> {
    /// `[position_embs_dim, lat, lon]`.
    positional_embeddings: Option<Param<Tensor<B, 3>>>,
    patch_embed: PatchEmbedding<B>,
    interaction: Option<LinVert<B>>,
    layer1: CondBasicLayer<B>,
    downsample: DownSample<B>,
    layer2: CondBasicLayer<B>,
    layer3: CondBasicLayer<B>,
    upsample: UpSample<B>,
    layer4: CondBasicLayer<B>,
    recovery: RecoveryHead<B>,
    use_skip: bool,
}

impl<B: Backend> ArchesWeather<B> {
    /// Predicts the next state.
    ///
    /// # Arguments
    /// - `level`: pressure-level fields `[batch, plevel_vars, plevels, lat, lon]`
    /// - `surface`: surface fields `[batch, surface_vars, lat, lon]`
    /// - `static_data`: static fields `[batch, static_length, lat, lon]`
    /// - `cond`: conditioning vectors `[batch, cond_dim]`
    ///
    /// # Returns
    /// `(level, surface)` with shapes `[batch, plevel_vars, plevels, lat, lon]`
    /// and `[batch, surface_vars, 1, lat, lon]`.
    pub fn forward(
        &self,
        level: Tensor<B, 5>,
        surface: Tensor<B, 4>,
        static_data: Option<Tensor<B, 4>>,
        cond: Option<Tensor<B, 2>>,
    ) -> (Tensor<B, 5>, Tensor<B, 5>) {
        let [batch, ..] = surface.dims();
        let mut surface_parts = vec![surface];
        surface_parts.extend(static_data);
        if let Some(embeddings) = &self.positional_embeddings {
            surface_parts.push(embeddings.val().unsqueeze_dim(0).repeat_dim(0, batch));
        }
        let surface = Tensor::cat(surface_parts, 1);

        let (x, shape) = self.patch_embed.forward(level, surface);
        let x = match &self.interaction {
            Some(interaction) => interaction.forward(x),
            None => x,
        };

        let x = self.layer1.forward(x, shape, cond.clone());
        let skip = x.clone();

        let (x, downsampled_shape) = self.downsample.forward(x, shape);
        let x = self.layer2.forward(x, downsampled_shape, cond.clone());
        let x = self.layer3.forward(x, downsampled_shape, cond.clone());
        let x = self.upsample.forward(x, shape);

        let (x, shape) = if self.use_skip {
            (
                Tensor::cat(vec![x, skip], 2),
                shape.with_channels(2 * shape.channels),
            )
        } else {
            (x, shape)
        };
        let x = self.layer4.forward(x, shape, cond);

        let x = x.swap_dims(1, 2).reshape([
            shape.batch,
            shape.channels,
            shape.levels,
            shape.lat,
            shape.lon,
        ]);

        self.recovery.forward(x, self.patch_embed.padding())
    }

    /// `(levels + 1, lat, lon)` of the full-resolution token volume.
    pub const fn embedding_size(&self) -> [usize; 3] {
        self.patch_embed.embedding_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArchesWeatherError;
    use burn::{
        backend::{Autodiff, NdArray},
        tensor::Distribution,
    };

    type TestBackend = NdArray<f32>;

    fn small_config() -> ArchesWeatherConfig {
        ArchesWeatherConfig::new(vec![12, 20])
            .with_token_size(16)
            .with_num_heads([2, 4, 4, 2])
            .with_cond_dim(8)
            .with_plevels(3)
            .with_plevel_variables(2)
            .with_surface_variables(3)
            .with_static_length(0)
    }

    fn inputs<B: Backend>(
        config: &ArchesWeatherConfig,
        batch: usize,
        device: &B::Device,
    ) -> (Tensor<B, 5>, Tensor<B, 4>) {
        let (lat, lon) = config.lat_lon().unwrap();
        let level = Tensor::random(
            [batch, config.plevel_variables, config.plevels, lat, lon],
            Distribution::Normal(0.0, 1.0),
            device,
        );
        let surface = Tensor::random(
            [batch, config.surface_variables, lat, lon],
            Distribution::Normal(0.0, 1.0),
            device,
        );
        (level, surface)
    }

    #[test]
    fn forward_restores_input_resolution() {
        let device = Default::default();
        let config = small_config();
        let model = config.init::<TestBackend>(&device).unwrap();
        let (level, surface) = inputs::<TestBackend>(&config, 2, &device);
        let cond = Tensor::random([2, 8], Distribution::Normal(0.0, 1.0), &device);

        let (out_level, out_surface) = model.forward(level, surface, None, Some(cond));

        assert_eq!(model.embedding_size(), [3, 6, 10]);
        assert_eq!(out_level.dims(), [2, 2, 3, 12, 20]);
        assert_eq!(out_surface.dims(), [2, 3, 1, 12, 20]);
    }

    #[test]
    fn forward_is_deterministic() {
        let device = Default::default();
        let config = small_config();
        let model = config.init::<TestBackend>(&device).unwrap();
        let (level, surface) = inputs::<TestBackend>(&config, 1, &device);

        let (first, _) = model.forward(level.clone(), surface.clone(), None, None);
        let (second, _) = model.forward(level, surface, None, None);

        first.to_data().assert_eq(&second.to_data(), true);
    }

    #[test]
    fn conv_head_with_every_option() {
        let device = Default::default();
        let config = small_config()
            .with_conv_head(true)
            .with_use_skip(true)
            .with_first_interaction_layer(true)
            .with_axial_attn(true)
            .with_axial_attn_heads(2)
            .with_position_embs_dim(2)
            .with_static_length(1)
            .with_lam(true);
        let model = config.init::<TestBackend>(&device).unwrap();
        let (level, surface) = inputs::<TestBackend>(&config, 1, &device);
        let static_data = Tensor::random([1, 1, 12, 20], Distribution::Normal(0.0, 1.0), &device);

        let (out_level, out_surface) = model.forward(level, surface, Some(static_data), None);

        assert_eq!(out_level.dims(), [1, 2, 3, 12, 20]);
        assert_eq!(out_surface.dims(), [1, 3, 1, 12, 20]);
    }

    #[test]
    fn padded_grid_is_cropped() {
        let device = Default::default();
        let config = ArchesWeatherConfig::new(vec![11, 19])
            .with_token_size(16)
            .with_num_heads([2, 4, 4, 2])
            .with_window_size([2, 6, 10])
            .with_plevels(4)
            .with_plevel_variables(2)
            .with_surface_variables(1)
            .with_static_length(0)
            .with_cond_dim(0);
        let model = config.init::<TestBackend>(&device).unwrap();
        let (level, surface) = inputs::<TestBackend>(&config, 1, &device);

        let (out_level, out_surface) = model.forward(level, surface, None, None);

        assert_eq!(out_level.dims(), [1, 2, 4, 11, 19]);
        assert_eq!(out_surface.dims(), [1, 1, 1, 11, 19]);
    }

    #[test]
    fn backward_reaches_the_inputs() {
        let device = Default::default();
        let config = small_config();
        let model = config.init::<Autodiff<TestBackend>>(&device).unwrap();
        let (level, surface) = inputs::<Autodiff<TestBackend>>(&config, 1, &device);
        let level = level.require_grad();

        let (out_level, out_surface) = model.forward(level.clone(), surface, None, None);
        let grads = (out_level.sum() + out_surface.sum()).backward();

        assert_eq!(
            level.grad(&grads).map(|g| g.dims()),
            Some([1, 2, 3, 12, 20])
        );
    }

    #[test]
    fn conv_head_requires_power_of_two_patch() {
        let device = Default::default();
        let config = ArchesWeatherConfig::new(vec![12, 21])
            .with_token_size(16)
            .with_num_heads([2, 4, 4, 2])
            .with_plevel_patch_size([2, 3, 3])
            .with_window_size([1, 2, 2])
            .with_plevels(3)
            .with_plevel_variables(2)
            .with_surface_variables(3)
            .with_static_length(0)
            .with_conv_head(true);

        assert_eq!(
            config.init::<TestBackend>(&device).err(),
            Some(ArchesWeatherError::InvalidDownfactor { downfactor: 3 })
        );
    }

    #[test]
    fn invalid_window_fails_construction() {
        let device = Default::default();
        let config = small_config().with_window_size([3, 6, 12]);

        assert_eq!(
            config.init::<TestBackend>(&device).err(),
            Some(ArchesWeatherError::InvalidWindowSize { window: [3, 6, 12] })
        );
    }
}
