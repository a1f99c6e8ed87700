//! Configuration of the ArchesWeather model.
//!
//! Defaults reproduce the published ArchesWeather setting on a 13-level
//! grid. The configuration is a plain Burn [`Config`], so it can be saved to
//! and loaded from JSON, and it is checked by [`ArchesWeatherConfig::validate`]
//! before a model is built.

use burn::prelude::*;

use crate::error::{ArchesWeatherError, ArchesWeatherResult};

/// Main configuration for the ArchesWeather model.
#[derive(Config, Debug)]
pub struct ArchesWeatherConfig {
    /// Spatial input shape `(lat, lon)`.
    pub input_shape: Vec<usize>,
    /// Channels of the full-resolution tokens.
    #[config(default = "192")]
    pub token_size: usize,
    /// Patch size along `(level, lat, lon)`.
    #[config(default = "[2, 2, 2]")]
    pub plevel_patch_size: [usize; 3],
    /// Attention heads of layers 1 to 4.
    #[config(default = "[6, 12, 12, 6]")]
    pub num_heads: [usize; 4],
    /// Window size along `(level, lat, lon)`; each entry 1 or even.
    #[config(default = "[1, 6, 10]")]
    pub window_size: [usize; 3],
    /// Size of the conditioning vector. Zero disables conditioning.
    #[config(default = "32")]
    pub cond_dim: usize,
    /// Largest drop-path ratio of the schedule.
    #[config(default = "0.2")]
    pub droppath_coeff: f64,
    #[config(default = "1")]
    pub depth_multiplier: usize,
    /// Channels of the learned positional embeddings appended to the surface input.
    #[config(default = "0")]
    pub position_embs_dim: usize,
    /// Accepted for compatibility, the forward pass does not read it.
    #[config(default = "false")]
    pub use_prev: bool,
    /// Concatenate the layer-1 output to the layer-4 input.
    #[config(default = "false")]
    pub use_skip: bool,
    /// Use the convolutional recovery head instead of transposed convolutions.
    #[config(default = "false")]
    pub conv_head: bool,
    /// Mix all levels of each column once after the patch embedding.
    #[config(default = "false")]
    pub first_interaction_layer: bool,
    #[config(default = "false")]
    pub axial_attn: bool,
    #[config(default = "8")]
    pub axial_attn_heads: usize,
    #[config(default = "0.0")]
    pub dropout_rate: f64,
    /// Selects the checkpointing autodiff backend
    /// [`CheckpointedAutodiff`](crate::backend::CheckpointedAutodiff) for backward
    /// passes. The model itself does not read it: Burn applies the strategy to the
    /// whole graph, not to one layer.
    #[config(default = "false")]
    pub checkpoint_activation: bool,
    /// Limited-area model: longitude is not periodic.
    #[config(default = "false")]
    pub lam: bool,
    #[config(default = "2")]
    pub spatial_dims: usize,
    #[config(default = "4")]
    pub surface_variables: usize,
    #[config(default = "5")]
    pub plevel_variables: usize,
    #[config(default = "13")]
    pub plevels: usize,
    /// Static fields (e.g. topography, land-sea mask, soil type) appended to the surface input.
    #[config(default = "3")]
    pub static_length: usize,
}

impl ArchesWeatherConfig {
    /// Checks the settings that do not depend on a backend.
    ///
    /// # Errors
    /// - [`ArchesWeatherError::UnsupportedSpatialDims`] unless `spatial_dims` is 2
    /// - [`ArchesWeatherError::InvalidWindowSize`] for a window entry neither 1 nor even
    /// - [`ArchesWeatherError::InvalidConfiguration`] for an input shape that is not
    ///   `(lat, lon)`, a zero depth multiplier or an empty dimension
    pub fn validate(&self) -> ArchesWeatherResult<()> {
        if self.spatial_dims != 2 {
            return Err(ArchesWeatherError::UnsupportedSpatialDims {
                spatial_dims: self.spatial_dims,
            });
        }
        if self.input_shape.len() != 2 {
            return Err(ArchesWeatherError::InvalidConfiguration {
                reason: format!(
                    "input shape must be (lat, lon), got {:?}",
                    self.input_shape
                ),
            });
        }
        if self
            .window_size
            .iter()
            .any(|&w| w == 0 || (w != 1 && w % 2 != 0))
        {
            return Err(ArchesWeatherError::InvalidWindowSize {
                window: self.window_size,
            });
        }
        if self.depth_multiplier == 0 {
            return Err(ArchesWeatherError::InvalidConfiguration {
                reason: "Depth multiplier must be at least 1".to_string(),
            });
        }
        if self.token_size == 0
            || self.plevels == 0
            || self.input_shape.contains(&0)
            || self.plevel_patch_size.contains(&0)
        {
            return Err(ArchesWeatherError::InvalidConfiguration {
                reason: "Token size, levels, input shape and patch size must be non-zero"
                    .to_string(),
            });
        }

        Ok(())
    }

    /// `(lat, lon)` of the input grid.
    pub fn lat_lon(&self) -> ArchesWeatherResult<(usize, usize)> {
        match self.input_shape.as_slice() {
            &[lat, lon] => Ok((lat, lon)),
            _ => Err(ArchesWeatherError::InvalidConfiguration {
                reason: format!(
                    "input shape must be (lat, lon), got {:?}",
                    self.input_shape
                ),
            }),
        }
    }

    /// Drop-path ratios: `8·m` values evenly spaced over
    /// `[0, droppath_coeff / m]` with `m` the depth multiplier.
    pub fn drop_path_schedule(&self) -> Vec<f64> {
        let steps = 8 * self.depth_multiplier;
        let end = self.droppath_coeff / self.depth_multiplier as f64;

        (0..steps)
            .map(|i| {
                if steps == 1 {
                    0.0
                } else {
                    end * i as f64 / (steps - 1) as f64
                }
            })
            .collect()
    }

    /// Channels of the surface input once static fields and positional
    /// embeddings are appended.
    pub const fn surface_channels(&self) -> usize {
        self.surface_variables + self.static_length + self.position_embs_dim
    }

    /// Conditioning vector size, if conditioning is enabled.
    pub const fn conditioning(&self) -> Option<usize> {
        if self.cond_dim == 0 {
            None
        } else {
            Some(self.cond_dim)
        }
    }
}
