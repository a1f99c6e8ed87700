//! Horizontal 2×2 token merging and splitting between the two resolutions of
//! the network.

use burn::{
    nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig},
    prelude::*,
};

use super::window::{EmbeddingShape, Padding3d};

/// Neighbourhood merged into one token: the level axis is left alone.
const MERGE: [usize; 3] = [1, 2, 2];

/// Configuration for [`DownSample`].
#[derive(Config, Debug)]
pub struct DownSampleConfig {
    /// `(level, lat, lon)` size of the input token volume.
    pub data_size: [usize; 3],
    /// Input channels; the output has twice as many.
    pub dim: usize,
}

impl DownSampleConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DownSample<B> {
        DownSample {
            norm: LayerNormConfig::new(4 * self.dim).init(device),
            linear: LinearConfig::new(4 * self.dim, 2 * self.dim)
                .with_bias(false)
                .init(device),
            padding: Padding3d::for_volume(self.data_size, MERGE),
        }
    }

    /// `(level, lat, lon)` size of the output token volume.
    pub fn downsampled_size(&self) -> [usize; 3] {
        let [z, h, w] = Padding3d::for_volume(self.data_size, MERGE).padded_size(self.data_size);
        [z, h / 2, w / 2]
    }
}

/// Merges 2×2 horizontal neighbours: `C → 2C` channels, half the resolution.
#[derive(Module, Debug)]
pub struct DownSample<B: Backend> {
    norm: LayerNorm<B>,
    linear: Linear<B>,
    padding: Padding3d,
}

impl<B: Backend> DownSample<B> {
    /// # Shapes
    /// - x: `[batch, level·lat·lon, C]` laid out as `shape`
    /// - output: `[batch, level·⌈lat/2⌉·⌈lon/2⌉, 2C]` and its layout
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        shape: EmbeddingShape,
    ) -> (Tensor<B, 3>, EmbeddingShape) {
        let x = self.padding.pad(x.reshape(shape.dims()));
        let [batch, levels, lat, lon, channels] = x.dims();

        let x = merge_neighbours(x);
        let x = self.linear.forward(self.norm.forward(x));

        (
            x,
            EmbeddingShape::new(batch, levels, lat / 2, lon / 2, 2 * channels),
        )
    }
}

/// Configuration for [`UpSample`].
#[derive(Config, Debug)]
pub struct UpSampleConfig {
    pub input_dim: usize,
    pub output_dim: usize,
}

impl UpSampleConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> UpSample<B> {
        UpSample {
            linear1: LinearConfig::new(self.input_dim, 4 * self.output_dim)
                .with_bias(false)
                .init(device),
            norm: LayerNormConfig::new(self.output_dim).init(device),
            linear2: LinearConfig::new(self.output_dim, self.output_dim)
                .with_bias(false)
                .init(device),
            output_dim: self.output_dim,
        }
    }
}

/// Splits every token into 2×2 horizontal neighbours, inverse of [`DownSample`].
#[derive(Module, Debug)]
pub struct UpSample<B: Backend> {
    linear1: Linear<B>,
    norm: LayerNorm<B>,
    linear2: Linear<B>,
    output_dim: usize,
}

impl<B: Backend> UpSample<B> {
    /// # Arguments
    /// - `x`: tokens `[batch, level·⌈lat/2⌉·⌈lon/2⌉, input_dim]`
    /// - `target`: layout of the full-resolution volume to recover
    ///
    /// # Returns
    /// `[batch, level·lat·lon, output_dim]`
    pub fn forward(&self, x: Tensor<B, 3>, target: EmbeddingShape) -> Tensor<B, 3> {
        let padding = Padding3d::for_volume(target.volume(), MERGE);
        let [levels, lat, lon] = padding.padded_size(target.volume());
        let batch = target.batch;
        let channels = self.output_dim;

        let x = split_neighbours(
            self.linear1.forward(x),
            EmbeddingShape::new(batch, levels, lat, lon, channels),
        );
        let x = padding
            .crop(x)
            .reshape([batch, target.num_tokens(), channels]);

        self.linear2.forward(self.norm.forward(x))
    }
}

/// `[batch, level, lat, lon, C]` → `[batch, level·lat/2·lon/2, 4C]`, the
/// merged channels ordered `(lat offset, lon offset, C)`.
fn merge_neighbours<B: Backend>(x: Tensor<B, 5>) -> Tensor<B, 3> {
    let [batch, levels, lat, lon, channels] = x.dims();
    let (lat, lon) = (lat / 2, lon / 2);

    x.reshape([batch * levels, lat, 2, lon, 2 * channels])
        .permute([0, 1, 3, 2, 4])
        .reshape([batch, levels * lat * lon, 4 * channels])
}

/// Inverse of [`merge_neighbours`] for the full-resolution layout `shape`.
fn split_neighbours<B: Backend>(x: Tensor<B, 3>, shape: EmbeddingShape) -> Tensor<B, 5> {
    let EmbeddingShape {
        batch,
        levels,
        lat,
        lon,
        channels,
    } = shape;

    x.reshape([batch * levels, lat / 2, lon / 2, 2, 2 * channels])
        .permute([0, 1, 3, 2, 4])
        .reshape([batch, levels, lat, lon, channels])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn downsample_halves_odd_resolution() {
        let device = Default::default();
        let config = DownSampleConfig::new([8, 7, 11], 16);
        let down = config.init::<TestBackend>(&device);
        let shape = EmbeddingShape::new(2, 8, 7, 11, 16);
        let x = Tensor::random([2, 8 * 7 * 11, 16], Distribution::Normal(0.0, 1.0), &device);

        let (out, out_shape) = down.forward(x, shape);

        assert_eq!(config.downsampled_size(), [8, 4, 6]);
        assert_eq!(out_shape, EmbeddingShape::new(2, 8, 4, 6, 32));
        assert_eq!(out.dims(), [2, 8 * 4 * 6, 32]);
    }

    #[test]
    fn upsample_recovers_full_resolution() {
        let device = Default::default();
        let up = UpSampleConfig::new(32, 16).init::<TestBackend>(&device);
        let target = EmbeddingShape::new(2, 8, 7, 11, 16);
        let x = Tensor::random([2, 8 * 4 * 6, 32], Distribution::Normal(0.0, 1.0), &device);

        assert_eq!(up.forward(x, target).dims(), [2, 8 * 7 * 11, 16]);
    }

    #[test]
    fn merge_stacks_each_2x2_neighbourhood() {
        let device = Default::default();
        // Two levels of a 2x4 plane, one channel, labelled in row-major order.
        let x = Tensor::<TestBackend, 1, Int>::arange(0..16, &device)
            .float()
            .reshape([1, 2, 2, 4, 1]);

        let merged = merge_neighbours(x.clone());
        merged.to_data().assert_eq(
            &TensorData::from([[
                [0.0f32, 1.0, 4.0, 5.0],
                [2.0, 3.0, 6.0, 7.0],
                [8.0, 9.0, 12.0, 13.0],
                [10.0, 11.0, 14.0, 15.0],
            ]]),
            false,
        );

        split_neighbours(merged, EmbeddingShape::new(1, 2, 2, 4, 1))
            .to_data()
            .assert_eq(&x.to_data(), true);
    }

    #[test]
    fn split_inverts_merge_with_channels() {
        let device = Default::default();
        let shape = EmbeddingShape::new(2, 3, 6, 8, 5);
        let x = Tensor::<TestBackend, 5>::random(shape.dims(), Distribution::Default, &device);

        let merged = merge_neighbours(x.clone());
        assert_eq!(merged.dims(), [2, 3 * 3 * 4, 20]);

        split_neighbours(merged, shape)
            .to_data()
            .assert_eq(&x.to_data(), true);
    }
}
