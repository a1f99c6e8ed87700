//! # Earth-Specific Window Attention
//!
//! Multi-head self-attention inside 3D windows. Instead of the relative
//! position bias of 2D shifted-window transformers, every window *type* (a
//! coarse level and coarse latitude position) owns its own bias table indexed
//! by the absolute level and latitude of both tokens and their relative
//! longitude offset. Windows that only differ in longitude share a type, the
//! grid being invariant along longitude.

use burn::{
    module::Param,
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::softmax,
};
use burn_extra_ops::TruncNormal;

use super::window::WindowGeometry;
use crate::error::{ArchesWeatherError, ArchesWeatherResult};

/// Configuration for [`EarthAttention3d`].
#[derive(Config, Debug)]
pub struct EarthAttention3dConfig {
    /// Padded `(level, lat, lon)` size of the attended volume.
    pub padded_size: [usize; 3],
    pub dim: usize,
    pub heads: usize,
    pub window_size: [usize; 3],
    #[config(default = "0.0")]
    pub dropout: f64,
}

impl EarthAttention3dConfig {
    /// # Errors
    /// - [`ArchesWeatherError::InvalidWindowSize`] for a window component neither 1 nor even
    /// - [`ArchesWeatherError::InvalidConfiguration`] if `dim` is not divisible by `heads`
    ///   or the padded size is not a multiple of the window
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ArchesWeatherResult<EarthAttention3d<B>> {
        let window = WindowGeometry::new(self.window_size)?;
        if self.heads == 0 || self.dim % self.heads != 0 {
            return Err(ArchesWeatherError::InvalidConfiguration {
                reason: format!(
                    "dim {} is not divisible by the number of heads {}",
                    self.dim, self.heads
                ),
            });
        }
        if self
            .padded_size
            .iter()
            .zip(self.window_size)
            .any(|(&n, w)| n % w != 0)
        {
            return Err(ArchesWeatherError::InvalidConfiguration {
                reason: format!(
                    "padded size {:?} is not a multiple of the window {:?}",
                    self.padded_size, self.window_size
                ),
            });
        }

        let [wz, wh, ww] = self.window_size;
        let [nz, nh, _] = window.counts(self.padded_size);
        let n = window.volume();
        let position_index = Tensor::<B, 1, Int>::from_data(
            TensorData::new(earth_position_index(&window), [n * n]),
            device,
        );
        let bias_rows = (2 * ww - 1) * wh * wh * wz * wz;
        let earth_specific_bias = TruncNormal::with_std(0.02).sample::<B, 3, _>(
            [bias_rows, nz * nh, self.heads],
            device,
        );

        Ok(EarthAttention3d {
            qkv: LinearConfig::new(self.dim, 3 * self.dim).init(device),
            proj: LinearConfig::new(self.dim, self.dim).init(device),
            attn_drop: DropoutConfig::new(self.dropout).init(),
            proj_drop: DropoutConfig::new(self.dropout).init(),
            earth_specific_bias: Param::from_tensor(earth_specific_bias),
            position_index,
            window,
            padded_size: self.padded_size,
            heads: self.heads,
            scale: ((self.dim / self.heads) as f64).powf(-0.5),
        })
    }
}

/// 3D window attention with Earth-specific bias.
#[derive(Module, Debug)]
pub struct EarthAttention3d<B: Backend> {
    qkv: Linear<B>,
    proj: Linear<B>,
    attn_drop: Dropout,
    proj_drop: Dropout,
    /// `[(2·ww−1)·wh²·wz², window types, heads]`.
    earth_specific_bias: Param<Tensor<B, 3>>,
    /// Bias row of every token pair, see [`earth_position_index`].
    position_index: Tensor<B, 1, Int>,
    window: WindowGeometry,
    padded_size: [usize; 3],
    heads: usize,
    scale: f64,
}

impl<B: Backend> EarthAttention3d<B> {
    /// # Arguments
    /// - `x`: windows `[batch · num_windows, N, C]` as produced by
    ///   [`window_partition`](super::window::window_partition)
    /// - `mask`: optional shifted-window mask `[Z/wz, (H/wh)·(W/ww), N, N]`
    /// - `batch`: batch size the windows were partitioned from
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        mask: Option<Tensor<B, 4>>,
        batch: usize,
    ) -> Tensor<B, 3> {
        let [bw, n, c] = x.dims();
        let heads = self.heads;
        let [nz, nh, nw] = self.window.counts(self.padded_size);
        let types = nz * nh;

        let qkv = self
            .qkv
            .forward(x)
            .reshape([bw, n, 3, heads, c / heads])
            .permute([2, 0, 3, 1, 4]);
        let part = |i: usize| -> Tensor<B, 4> {
            qkv.clone().narrow(0, i, 1).reshape([bw, heads, n, c / heads])
        };
        let (q, k, v) = (part(0) * self.scale, part(1), part(2));

        let attn = q.matmul(k.swap_dims(2, 3));

        let bias = self
            .earth_specific_bias
            .val()
            .select(0, self.position_index.clone())
            .reshape([n, n, types, heads])
            .permute([2, 3, 0, 1])
            .reshape([1, types, 1, heads, n, n]);

        let attn: Tensor<B, 6> = attn.reshape([batch, types, nw, heads, n, n]) + bias;
        let attn = match mask {
            Some(mask) => attn + mask.reshape([1, types, nw, 1, n, n]),
            None => attn,
        };

        let attn = softmax(attn, 5).reshape([bw, heads, n, n]);
        let attn = self.attn_drop.forward(attn);

        let x = attn.matmul(v).swap_dims(1, 2).reshape([bw, n, c]);
        let x = self.proj.forward(x);

        self.proj_drop.forward(x)
    }
}

/// Row of the Earth-specific bias table for every token pair of a window.
///
/// Tokens are ordered `(level, lat, lon)` inside the window. Level and
/// latitude enter by their absolute positions in the window, longitude by the
/// offset `lon_i − lon_j`. Row-major over `(i, j)`.
pub fn earth_position_index(window: &WindowGeometry) -> Vec<i64> {
    let [wz, wh, ww] = window.size().map(|w| w as i64);
    let coords: Vec<[i64; 3]> = (0..wz)
        .flat_map(|z| (0..wh).flat_map(move |h| (0..ww).map(move |w| [z, h, w])))
        .collect();

    coords
        .iter()
        .flat_map(|&[zi, hi, wi]| {
            coords.iter().map(move |&[zj, hj, wj]| {
                (zi + zj * wz) * (2 * ww - 1) * wh * wh
                    + (hi + hj * wh) * (2 * ww - 1)
                    + (wi - wj + ww - 1)
            })
        })
        .collect()
}
