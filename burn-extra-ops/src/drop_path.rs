//! # DropPath Regularization
//!
//! Stochastic depth: while training, a whole residual branch is zeroed per
//! sample with probability `drop_prob` and the surviving samples are rescaled.
//! Like `burn::nn::Dropout`, the module is only active on an autodiff backend.

use burn::{prelude::*, tensor::Distribution};

/// Configuration for the `DropPath` module.
#[derive(Config, Debug)]
pub struct DropPathConfig {
    /// The probability of dropping a path.
    #[config(default = "0.0")]
    pub drop_prob: f64,
    /// Whether to scale the kept samples by `1 / (1 - drop_prob)`.
    #[config(default = "true")]
    pub scale_by_keep: bool,
}

impl DropPathConfig {
    /// Initializes a new `DropPath` module.
    pub const fn init(&self) -> DropPath {
        DropPath {
            drop_prob: self.drop_prob,
            scale_by_keep: self.scale_by_keep,
        }
    }
}

/// DropPath module.
#[derive(Module, Clone, Debug, Default)]
pub struct DropPath {
    drop_prob: f64,
    scale_by_keep: bool,
}

impl DropPath {
    /// Applies DropPath to the input tensor.
    ///
    /// The Bernoulli mask has shape `[batch_size, 1, ..., 1]` and is broadcast
    /// over every other dimension.
    ///
    /// # Shapes
    /// - input: `[batch_size, ...]`
    /// - output: `[batch_size, ...]`
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        if !B::ad_enabled() || self.drop_prob == 0.0 {
            return x;
        }
        let keep_prob = 1.0 - self.drop_prob;

        let mut mask_shape = [1; D];
        mask_shape[0] = x.dims()[0];
        let mask =
            Tensor::<B, D>::random(mask_shape, Distribution::Bernoulli(keep_prob), &x.device());

        if self.scale_by_keep && keep_prob > 0.0 {
            x * mask / keep_prob
        } else {
            x * mask
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type InferenceBackend = NdArray<f32>;
    type TrainingBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn droppath_is_identity_without_autodiff() {
        let device = Default::default();
        let drop_path = DropPathConfig::new().with_drop_prob(0.9).init();

        let x = Tensor::<InferenceBackend, 3>::ones([4, 8, 16], &device);
        let output = drop_path.forward(x.clone());

        output.to_data().assert_eq(&x.to_data(), true);
    }

    #[test]
    fn droppath_zero_prob_is_identity_while_training() {
        let device = Default::default();
        let drop_path = DropPathConfig::new().init();

        let x = Tensor::<TrainingBackend, 2>::ones([3, 5], &device);
        let output = drop_path.forward(x.clone());

        output.to_data().assert_eq(&x.to_data(), true);
    }

    #[test]
    fn droppath_drops_or_rescales_whole_samples() {
        let device = Default::default();
        let drop_path = DropPathConfig::new().with_drop_prob(0.5).init();

        let x = Tensor::<TrainingBackend, 3>::ones([16, 4, 8], &device);
        let output = drop_path.forward(x);

        // Each sample is either all zeros or all 1 / keep_prob.
        let per_sample = output.sum_dim(2).sum_dim(1).to_data().to_vec::<f32>().unwrap();
        for sum in per_sample {
            assert!(
                sum.abs() < 1e-6 || (sum - 64.0).abs() < 1e-4,
                "unexpected per-sample sum {sum}"
            );
        }
    }

    #[test]
    fn droppath_rate_is_close_to_probability() {
        let device = Default::default();
        let drop_path = DropPathConfig::new().with_drop_prob(0.3).init();
        let batch_size = 1000;

        let x = Tensor::<TrainingBackend, 2>::ones([batch_size, 2], &device);
        let kept = drop_path
            .forward(x)
            .sum_dim(1)
            .greater_elem(0.0)
            .int()
            .sum()
            .into_scalar();

        let drop_rate = 1.0 - kept as f64 / batch_size as f64;
        assert!(
            (drop_rate - 0.3).abs() < 0.08,
            "drop rate {drop_rate} deviates from 0.3"
        );
    }
}
