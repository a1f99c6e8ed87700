//! # 3D Window Geometry
//!
//! Shape bookkeeping for 3D window attention: the window/shift geometry,
//! the zero-padding that makes a `(level, lat, lon)` volume divisible by the
//! window, and the partition of a padded volume into windows and back.
//!
//! Volumes are channels-last `[batch, level, lat, lon, channels]` unless a
//! function says otherwise. Windows are ordered level-major, then latitude,
//! then longitude, and tokens inside a window follow the same order.

use core::array;

use burn::prelude::*;

use crate::error::{ArchesWeatherError, ArchesWeatherResult};

/// Window size along `(level, lat, lon)`.
///
/// Every component is 1 or even; this is checked once in [`WindowGeometry::new`].
#[derive(Module, Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowGeometry {
    size: [usize; 3],
}

impl WindowGeometry {
    /// Validates a window size.
    ///
    /// # Errors
    /// [`ArchesWeatherError::InvalidWindowSize`] if a component is neither 1 nor even.
    pub fn new(size: [usize; 3]) -> ArchesWeatherResult<Self> {
        if size.iter().all(|&w| w == 1 || (w > 0 && w % 2 == 0)) {
            Ok(Self { size })
        } else {
            Err(ArchesWeatherError::InvalidWindowSize { window: size })
        }
    }

    pub const fn size(&self) -> [usize; 3] {
        self.size
    }

    /// Number of tokens in one window.
    pub const fn volume(&self) -> usize {
        self.size[0] * self.size[1] * self.size[2]
    }

    /// Cyclic shift applied on shifted blocks: `ceil(window / 2)` per axis.
    pub fn shift(&self) -> [usize; 3] {
        self.size.map(|w| w / 2 + w % 2)
    }

    /// Number of windows along each axis of a padded volume.
    pub fn counts(&self, padded: [usize; 3]) -> [usize; 3] {
        array::from_fn(|i| padded[i] / self.size[i])
    }
}

/// Zero-padding of a `(level, lat, lon)` volume.
///
/// `left`/`right` pad longitude, `top`/`bottom` latitude and `front`/`back`
/// the vertical level axis.
#[derive(Module, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Padding3d {
    pub left: usize,
    pub right: usize,
    pub top: usize,
    pub bottom: usize,
    pub front: usize,
    pub back: usize,
}

impl Padding3d {
    /// The minimal padding making every axis of `size` a multiple of `multiple`.
    ///
    /// The total per axis is split with the smaller half before the data.
    pub fn for_volume(size: [usize; 3], multiple: [usize; 3]) -> Self {
        let [(front, back), (top, bottom), (left, right)] = array::from_fn(|i| {
            let total = (multiple[i] - size[i] % multiple[i]) % multiple[i];
            (total / 2, total - total / 2)
        });
        Self {
            left,
            right,
            top,
            bottom,
            front,
            back,
        }
    }

    /// The same padding without the vertical component.
    pub const fn horizontal(&self) -> Self {
        Self {
            front: 0,
            back: 0,
            ..*self
        }
    }

    /// Per-axis `(before, after)` amounts in `(level, lat, lon)` order.
    pub const fn per_axis(&self) -> [(usize, usize); 3] {
        [
            (self.front, self.back),
            (self.top, self.bottom),
            (self.left, self.right),
        ]
    }

    /// Size of `size` once padded.
    pub fn padded_size(&self, size: [usize; 3]) -> [usize; 3] {
        let pads = self.per_axis();
        array::from_fn(|i| size[i] + pads[i].0 + pads[i].1)
    }

    /// Pads a channels-last volume `[batch, level, lat, lon, channels]`.
    pub fn pad<B: Backend>(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let [z, h, w] = self.per_axis();
        zero_pad(x, [(0, 0), z, h, w, (0, 0)])
    }

    /// Removes the padding from a channels-last volume.
    pub fn crop<B: Backend>(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let [z, h, w] = self.per_axis();
        crop(x, [(0, 0), z, h, w, (0, 0)])
    }

    /// Pads a channels-first volume `[batch, channels, level, lat, lon]`.
    pub fn pad_channels_first<B: Backend>(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let [z, h, w] = self.per_axis();
        zero_pad(x, [(0, 0), (0, 0), z, h, w])
    }

    /// Removes the padding from a channels-first volume.
    pub fn crop_channels_first<B: Backend>(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let [z, h, w] = self.per_axis();
        crop(x, [(0, 0), (0, 0), z, h, w])
    }

    /// Pads the latitude/longitude axes of a field `[batch, channels, lat, lon]`.
    pub fn pad_planar<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, h, w] = self.per_axis();
        zero_pad(x, [(0, 0), (0, 0), h, w])
    }
}

fn zero_pad<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    pads: [(usize, usize); D],
) -> Tensor<B, D> {
    if pads.iter().all(|&(before, after)| before == 0 && after == 0) {
        return x;
    }
    let dims = x.dims();
    let padded: [usize; D] = array::from_fn(|i| dims[i] + pads[i].0 + pads[i].1);
    let ranges = array::from_fn::<_, D, _>(|i| pads[i].0..pads[i].0 + dims[i]);

    Tensor::zeros(padded, &x.device()).slice_assign(ranges, x)
}

fn crop<B: Backend, const D: usize>(x: Tensor<B, D>, pads: [(usize, usize); D]) -> Tensor<B, D> {
    if pads.iter().all(|&(before, after)| before == 0 && after == 0) {
        return x;
    }
    let dims = x.dims();
    let ranges = array::from_fn::<_, D, _>(|i| pads[i].0..dims[i] - pads[i].1);

    x.slice(ranges)
}

/// Unflattened shape of a token sequence `[batch, level·lat·lon, channels]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddingShape {
    pub batch: usize,
    pub levels: usize,
    pub lat: usize,
    pub lon: usize,
    pub channels: usize,
}

impl EmbeddingShape {
    pub const fn new(batch: usize, levels: usize, lat: usize, lon: usize, channels: usize) -> Self {
        Self {
            batch,
            levels,
            lat,
            lon,
            channels,
        }
    }

    /// `[batch, level, lat, lon, channels]`.
    pub const fn dims(&self) -> [usize; 5] {
        [self.batch, self.levels, self.lat, self.lon, self.channels]
    }

    /// `(level, lat, lon)`.
    pub const fn volume(&self) -> [usize; 3] {
        [self.levels, self.lat, self.lon]
    }

    pub const fn num_tokens(&self) -> usize {
        self.levels * self.lat * self.lon
    }

    pub const fn with_channels(self, channels: usize) -> Self {
        Self { channels, ..self }
    }
}

/// Partitions a padded volume into non-overlapping windows.
///
/// # Shapes
/// - x: `[batch, Z, H, W, channels]`, each spatial axis divisible by the window
/// - output: `[batch · Z/wz · H/wh · W/ww, wz·wh·ww, channels]`
pub fn window_partition<B: Backend>(x: Tensor<B, 5>, window: &WindowGeometry) -> Tensor<B, 3> {
    let [b, z, h, w, c] = x.dims();
    let [wz, wh, ww] = window.size();
    let [nz, nh, nw] = window.counts([z, h, w]);

    x.reshape([b * nz, wz, nh, wh, nw, ww * c])
        .permute([0, 2, 4, 1, 3, 5])
        .reshape([b * nz * nh * nw, window.volume(), c])
}

/// Inverse of [`window_partition`].
///
/// # Shapes
/// - windows: `[batch · num_windows, wz·wh·ww, channels]`
/// - output: `[batch, Z, H, W, channels]` with `(Z, H, W) = padded`
pub fn window_reverse<B: Backend>(
    windows: Tensor<B, 3>,
    window: &WindowGeometry,
    padded: [usize; 3],
) -> Tensor<B, 5> {
    let [total, _, c] = windows.dims();
    let [wz, wh, ww] = window.size();
    let [nz, nh, nw] = window.counts(padded);
    let b = total / (nz * nh * nw);
    let [z, h, w] = padded;

    windows
        .reshape([b * nz, nh, nw, wz, wh, ww * c])
        .permute([0, 3, 1, 4, 2, 5])
        .reshape([b, z, h, w, c])
}
