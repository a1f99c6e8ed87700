//! # Patch Recovery Heads
//!
//! Turn the final token volume `[batch, C, Z, H, W]` (surface on the last
//! level) back into pressure-level and surface fields at input resolution.
//! [`PatchRecovery`] projects every token to its patch with transposed
//! convolutions; [`PatchRecoveryConv`] upsamples by interpolation followed by
//! 3D convolutions, avoiding checkerboard artefacts.

use burn::{
    nn::{
        conv::{
            Conv2d, Conv2dConfig, Conv3d, Conv3dConfig, ConvTranspose2d, ConvTranspose2dConfig,
            ConvTranspose3d, ConvTranspose3dConfig,
        },
        Gelu, GroupNorm, GroupNormConfig, PaddingConfig3d,
    },
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

use super::window::Padding3d;
use crate::error::{ArchesWeatherError, ArchesWeatherResult};

/// Configuration for [`PatchRecovery`].
#[derive(Config, Debug)]
pub struct PatchRecoveryConfig {
    pub dim: usize,
    pub patch_size: [usize; 3],
    pub plevel_variables: usize,
    pub surface_variables: usize,
}

impl PatchRecoveryConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PatchRecovery<B> {
        let [_, ph, pw] = self.patch_size;

        PatchRecovery {
            conv: ConvTranspose3dConfig::new([self.dim, self.plevel_variables], self.patch_size)
                .with_stride(self.patch_size)
                .init(device),
            conv_surface: ConvTranspose2dConfig::new([self.dim, self.surface_variables], [ph, pw])
                .with_stride([ph, pw])
                .init(device),
        }
    }
}

/// Transposed-convolution recovery of every patch.
#[derive(Module, Debug)]
pub struct PatchRecovery<B: Backend> {
    conv: ConvTranspose3d<B>,
    conv_surface: ConvTranspose2d<B>,
}

impl<B: Backend> PatchRecovery<B> {
    /// # Shapes
    /// - x: `[batch, C, Z, H, W]`
    /// - output: level `[batch, plevel_vars, (Z−1)·pz, H·ph, W·pw]` and
    ///   surface `[batch, surface_vars, H·ph, W·pw]`, padding included
    pub fn forward(&self, x: Tensor<B, 5>) -> (Tensor<B, 5>, Tensor<B, 4>) {
        let [batch, channels, levels, lat, lon] = x.dims();

        let level = self.conv.forward(x.clone().narrow(2, 0, levels - 1));
        let surface = self
            .conv_surface
            .forward(x.narrow(2, levels - 1, 1).reshape([batch, channels, lat, lon]));

        (level, surface)
    }
}

/// Configuration for [`PatchRecoveryConv`].
#[derive(Config, Debug)]
pub struct PatchRecoveryConvConfig {
    /// Channels of the flattened `(C, Z)` input.
    pub input_dim: usize,
    /// Horizontal upsampling factor, a power of two.
    #[config(default = "4")]
    pub downfactor: usize,
    #[config(default = "96")]
    pub hidden_dim: usize,
    #[config(default = "5")]
    pub plevel_variables: usize,
    #[config(default = "4")]
    pub surface_variables: usize,
    #[config(default = "13")]
    pub plevels: usize,
}

/// Groups of the normalization opening every further upsampling stage.
const NORM_GROUPS: usize = 32;

impl PatchRecoveryConvConfig {
    /// # Errors
    /// - [`ArchesWeatherError::InvalidDownfactor`] unless `downfactor` is a power
    ///   of two of at least 2
    /// - [`ArchesWeatherError::InvalidConfiguration`] if the hidden width is not
    ///   divisible by the normalization groups
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ArchesWeatherResult<PatchRecoveryConv<B>> {
        if self.downfactor < 2 || !self.downfactor.is_power_of_two() {
            return Err(ArchesWeatherError::InvalidDownfactor {
                downfactor: self.downfactor,
            });
        }
        let stages = self.downfactor.trailing_zeros() as usize - 1;
        if stages > 0 && self.hidden_dim % NORM_GROUPS != 0 {
            return Err(ArchesWeatherError::InvalidConfiguration {
                reason: format!(
                    "hidden dim {} is not divisible by {NORM_GROUPS} groups",
                    self.hidden_dim
                ),
            });
        }

        let total_levels = self.plevels + 1;
        let hidden = self.hidden_dim;

        Ok(PatchRecoveryConv {
            input_conv: Conv2dConfig::new([self.input_dim, total_levels * hidden], [1, 1])
                .init(device),
            head: UpsamplingStage::new(hidden, false, device),
            upsampling: (0..stages)
                .map(|_| UpsamplingStage::new(hidden, true, device))
                .collect(),
            proj_surface: Conv2dConfig::new([hidden, self.surface_variables], [1, 1]).init(device),
            proj_level: Conv3dConfig::new([hidden, self.plevel_variables], [1, 1, 1]).init(device),
            total_levels,
        })
    }
}

/// Convolutional recovery head upsampling by `downfactor`.
#[derive(Module, Debug)]
pub struct PatchRecoveryConv<B: Backend> {
    input_conv: Conv2d<B>,
    head: UpsamplingStage<B>,
    upsampling: Vec<UpsamplingStage<B>>,
    proj_surface: Conv2d<B>,
    proj_level: Conv3d<B>,
    total_levels: usize,
}

impl<B: Backend> PatchRecoveryConv<B> {
    /// # Shapes
    /// - x: `[batch, C, Z, H, W]`
    /// - output: level `[batch, plevel_vars, plevels, H·f, W·f]` and
    ///   surface `[batch, surface_vars, H·f, W·f]`, padding included
    pub fn forward(&self, x: Tensor<B, 5>) -> (Tensor<B, 5>, Tensor<B, 4>) {
        let x = self.input_conv.forward(x.flatten::<4>(1, 2));
        let [batch, channels, lat, lon] = x.dims();
        let x = x
            .reshape([batch, self.total_levels, channels / self.total_levels, lat, lon])
            .swap_dims(1, 2);

        let x = self.head.forward(self.upsample(x));
        let x = self
            .upsampling
            .iter()
            .fold(x, |x, stage| stage.forward(self.upsample(x)));

        let [batch, hidden, levels, lat, lon] = x.dims();
        let surface = self
            .proj_surface
            .forward(x.clone().narrow(2, levels - 1, 1).reshape([batch, hidden, lat, lon]));
        let level = self.proj_level.forward(x.narrow(2, 0, levels - 1));

        (level, surface)
    }

    /// Bilinear ×2 upsampling of every level of `[batch, hidden, levels, H, W]`.
    fn upsample(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let [batch, hidden, levels, lat, lon] = x.dims();
        let planes = x
            .swap_dims(1, 2)
            .reshape([batch * levels, hidden, lat, lon]);

        interpolate(
            planes,
            [2 * lat, 2 * lon],
            InterpolateOptions::new(InterpolateMode::Bilinear),
        )
        .reshape([batch, levels, hidden, 2 * lat, 2 * lon])
        .swap_dims(1, 2)
    }
}

/// `[GroupNorm →] Conv3d → GELU → Conv3d → GELU` at constant width.
#[derive(Module, Debug)]
pub struct UpsamplingStage<B: Backend> {
    norm: Option<GroupNorm<B>>,
    conv1: Conv3d<B>,
    conv2: Conv3d<B>,
    act: Gelu,
}

impl<B: Backend> UpsamplingStage<B> {
    fn new(hidden: usize, normalize: bool, device: &B::Device) -> Self {
        let conv = || {
            Conv3dConfig::new([hidden, hidden], [3, 3, 3])
                .with_padding(PaddingConfig3d::Explicit(1, 1, 1))
                .init(device)
        };

        Self {
            norm: normalize.then(|| {
                GroupNormConfig::new(NORM_GROUPS, hidden)
                    .with_epsilon(1e-6)
                    .init(device)
            }),
            conv1: conv(),
            conv2: conv(),
            act: Gelu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        let x = self.act.forward(self.conv1.forward(x));

        self.act.forward(self.conv2.forward(x))
    }
}

/// The recovery head selected by the model configuration.
#[derive(Module, Debug)]
pub enum RecoveryHead<B: Backend> {
    Transposed(PatchRecovery<B>),
    Conv(PatchRecoveryConv<B>),
}

impl<B: Backend> RecoveryHead<B> {
    /// Recovers the fields and removes the input padding.
    ///
    /// # Shapes
    /// - x: `[batch, C, Z, H, W]`
    /// - output: level `[batch, plevel_vars, levels, lat, lon]` and
    ///   surface `[batch, surface_vars, 1, lat, lon]`
    pub fn forward(&self, x: Tensor<B, 5>, padding: Padding3d) -> (Tensor<B, 5>, Tensor<B, 5>) {
        let (level, surface, level_padding) = match self {
            Self::Transposed(head) => {
                let (level, surface) = head.forward(x);
                (level, surface, padding)
            }
            // The convolutional head predicts the unpadded levels directly.
            Self::Conv(head) => {
                let (level, surface) = head.forward(x);
                (level, surface, padding.horizontal())
            }
        };

        (
            level_padding.crop_channels_first(level),
            padding
                .horizontal()
                .crop_channels_first(surface.unsqueeze_dim(2)),
        )
    }
}
