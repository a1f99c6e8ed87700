//! Stacks of Earth-specific blocks alternating plain and shifted windows.

use burn::prelude::*;

use super::{
    block::{EarthSpecificBlock, EarthSpecificBlockConfig},
    modulation::{ConditionalModulation, ConditionalModulationConfig, Modulation},
    window::EmbeddingShape,
};
use crate::error::{ArchesWeatherError, ArchesWeatherResult};

/// Configuration for [`EarthSpecificLayer`].
#[derive(Config, Debug)]
pub struct EarthSpecificLayerConfig {
    /// Number of blocks.
    pub depth: usize,
    /// `(level, lat, lon)` size of the token volume.
    pub data_size: [usize; 3],
    pub dim: usize,
    pub heads: usize,
    /// Drop-path ratio of each block. Empty means no drop path.
    #[config(default = "Vec::new()")]
    pub drop_path: Vec<f64>,
    #[config(default = "[2, 6, 12]")]
    pub window_size: [usize; 3],
    #[config(default = "0.0")]
    pub dropout: f64,
    #[config(default = "false")]
    pub axial_attn: bool,
    #[config(default = "8")]
    pub axial_attn_heads: usize,
    #[config(default = "false")]
    pub limited_area: bool,
}

impl EarthSpecificLayerConfig {
    /// # Errors
    /// - [`ArchesWeatherError::InvalidConfiguration`] if `drop_path` is neither
    ///   empty nor one ratio per block
    /// - any error of [`EarthSpecificBlockConfig::init`]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ArchesWeatherResult<EarthSpecificLayer<B>> {
        let drop_path = match self.drop_path.len() {
            0 => vec![0.0; self.depth],
            n if n == self.depth => self.drop_path.clone(),
            n => {
                return Err(ArchesWeatherError::InvalidConfiguration {
                    reason: format!("{n} drop-path ratios given for {} blocks", self.depth),
                })
            }
        };

        let blocks = drop_path
            .into_iter()
            .map(|ratio| {
                EarthSpecificBlockConfig::new(self.data_size, self.dim, self.heads)
                    .with_drop_path(ratio)
                    .with_window_size(self.window_size)
                    .with_dropout(self.dropout)
                    .with_axial_attn(self.axial_attn)
                    .with_axial_attn_heads(self.axial_attn_heads)
                    .with_limited_area(self.limited_area)
                    .init(device)
            })
            .collect::<ArchesWeatherResult<Vec<_>>>()?;
        tracing::debug!(
            depth = self.depth,
            data_size = ?self.data_size,
            dim = self.dim,
            heads = self.heads,
            "Built Earth-specific layer"
        );

        Ok(EarthSpecificLayer { blocks })
    }
}

/// Ordered Earth-specific blocks sharing one window geometry.
#[derive(Module, Debug)]
pub struct EarthSpecificLayer<B: Backend> {
    blocks: Vec<EarthSpecificBlock<B>>,
}

impl<B: Backend> EarthSpecificLayer<B> {
    /// Block `index` attends over shifted windows.
    pub const fn is_shifted(index: usize) -> bool {
        index % 2 == 1
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    /// # Shapes
    /// - x: `[batch, level·lat·lon, dim]` laid out as `shape`
    /// - output: same as `x`
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        shape: EmbeddingShape,
        modulation: Option<&Modulation<B>>,
    ) -> Tensor<B, 3> {
        self.blocks
            .iter()
            .enumerate()
            .fold(x, |x, (i, block)| {
                block.forward(x, shape, modulation, Self::is_shifted(i))
            })
    }
}

/// Configuration for [`CondBasicLayer`].
#[derive(Config, Debug)]
pub struct CondBasicLayerConfig {
    pub layer: EarthSpecificLayerConfig,
    /// Size of the conditioning vector; `None` builds a plain layer.
    #[config(default = "None")]
    pub cond_dim: Option<usize>,
}

impl CondBasicLayerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ArchesWeatherResult<CondBasicLayer<B>> {
        let modulation = self.cond_dim.map(|cond_dim| {
            ConditionalModulationConfig::new(cond_dim, self.layer.dim).init(device)
        });

        Ok(CondBasicLayer {
            layer: self.layer.init(device)?,
            modulation,
        })
    }
}

/// An [`EarthSpecificLayer`] whose blocks share one adaLN modulation.
#[derive(Module, Debug)]
pub struct CondBasicLayer<B: Backend> {
    layer: EarthSpecificLayer<B>,
    modulation: Option<ConditionalModulation<B>>,
}

impl<B: Backend> CondBasicLayer<B> {
    /// Runs the layer, modulated by `cond` when both a conditioning vector
    /// and a modulation component are present.
    ///
    /// # Shapes
    /// - x: `[batch, level·lat·lon, dim]`
    /// - cond: `[batch, cond_dim]`
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        shape: EmbeddingShape,
        cond: Option<Tensor<B, 2>>,
    ) -> Tensor<B, 3> {
        let modulation = cond.zip(self.modulation.as_ref()).map(|(cond, m)| m.forward(cond));

        self.layer.forward(x, shape, modulation.as_ref())
    }

    pub const fn layer(&self) -> &EarthSpecificLayer<B> {
        &self.layer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{autodiff::checkpoint::strategy::BalancedCheckpointing, Autodiff, NdArray},
        record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
        tensor::Distribution,
    };

    type TestBackend = NdArray<f32>;

    #[test]
    fn odd_blocks_are_shifted() {
        let shifted: Vec<bool> = (0..6)
            .map(EarthSpecificLayer::<TestBackend>::is_shifted)
            .collect();

        assert_eq!(shifted, [false, true, false, true, false, true]);
    }

    #[test]
    fn layer_keeps_shape_and_is_deterministic() {
        let device = Default::default();
        let layer = EarthSpecificLayerConfig::new(2, [8, 36, 72], 96, 6)
            .with_window_size([2, 6, 12])
            .init::<TestBackend>(&device)
            .unwrap();
        let shape = EmbeddingShape::new(1, 8, 36, 72, 96);
        let x = Tensor::random([1, 8 * 36 * 72, 96], Distribution::Normal(0.0, 1.0), &device);

        let first = layer.forward(x.clone(), shape, None);
        let second = layer.forward(x, shape, None);

        assert_eq!(layer.depth(), 2);
        assert_eq!(first.dims(), [1, 8 * 36 * 72, 96]);
        first.to_data().assert_eq(&second.to_data(), true);
    }

    #[test]
    fn drop_path_length_must_match_depth() {
        let device = Default::default();
        let result = EarthSpecificLayerConfig::new(2, [2, 6, 12], 16, 2)
            .with_drop_path(vec![0.0, 0.1, 0.2])
            .init::<TestBackend>(&device);

        assert!(matches!(
            result,
            Err(ArchesWeatherError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn fresh_conditioned_layer_is_identity() {
        let device = Default::default();
        let layer = CondBasicLayerConfig::new(
            EarthSpecificLayerConfig::new(2, [2, 6, 12], 16, 2).with_drop_path(vec![0.0, 0.1]),
        )
        .with_cond_dim(Some(8))
        .init::<TestBackend>(&device)
        .unwrap();
        let shape = EmbeddingShape::new(2, 2, 6, 12, 16);
        let x = Tensor::random([2, 144, 16], Distribution::Normal(0.0, 1.0), &device);
        let cond = Tensor::random([2, 8], Distribution::Normal(0.0, 1.0), &device);

        let out = layer.forward(x.clone(), shape, Some(cond));

        out.to_data().assert_eq(&x.to_data(), true);
    }

    #[test]
    fn conditioning_is_ignored_without_modulation() {
        let device = Default::default();
        let layer = CondBasicLayerConfig::new(EarthSpecificLayerConfig::new(2, [2, 6, 12], 16, 2))
            .init::<TestBackend>(&device)
            .unwrap();
        let shape = EmbeddingShape::new(1, 2, 6, 12, 16);
        let x = Tensor::random([1, 144, 16], Distribution::Normal(0.0, 1.0), &device);
        let cond = Tensor::random([1, 8], Distribution::Normal(0.0, 1.0), &device);

        let conditioned = layer.forward(x.clone(), shape, Some(cond));
        let plain = layer.layer().forward(x, shape, None);

        conditioned.to_data().assert_eq(&plain.to_data(), true);
    }

    #[test]
    fn checkpointing_does_not_change_results() {
        type Plain = Autodiff<TestBackend>;
        type Checkpointed = Autodiff<TestBackend, BalancedCheckpointing>;

        let device = Default::default();
        let config = EarthSpecificLayerConfig::new(2, [2, 6, 12], 16, 2);
        let plain = config.init::<Plain>(&device).unwrap();

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let bytes = Recorder::<Plain>::record(&recorder, plain.clone().into_record(), ()).unwrap();
        let record = Recorder::<Checkpointed>::load(&recorder, bytes, &device).unwrap();
        let checkpointed = config
            .init::<Checkpointed>(&device)
            .unwrap()
            .load_record(record);

        let shape = EmbeddingShape::new(1, 2, 6, 12, 16);
        let data = Tensor::<TestBackend, 3>::random(
            [1, 144, 16],
            Distribution::Normal(0.0, 1.0),
            &device,
        )
        .into_data();

        let x_plain = Tensor::<Plain, 3>::from_data(data.clone(), &device).require_grad();
        let out_plain = plain.forward(x_plain.clone(), shape, None);
        let grad_plain = x_plain.grad(&out_plain.clone().sum().backward()).unwrap();

        let x_ckpt = Tensor::<Checkpointed, 3>::from_data(data, &device).require_grad();
        let out_ckpt = checkpointed.forward(x_ckpt.clone(), shape, None);
        let grad_ckpt = x_ckpt.grad(&out_ckpt.clone().sum().backward()).unwrap();

        out_plain.into_data().assert_eq(&out_ckpt.into_data(), true);
        grad_plain.into_data().assert_eq(&grad_ckpt.into_data(), true);
    }
}
