//! # Truncated Normal Initialization
//!
//! Draws tensors from a normal distribution restricted to `[a, b]` by inverse
//! transform sampling: uniform samples between the CDF values of the bounds
//! are pushed through `erfinv`.

use burn::{prelude::*, tensor::Distribution};

use crate::erfinv::Erfinv;

/// Parameters of a truncated normal distribution.
///
/// The bounds are absolute values, not multiples of `std`, matching
/// PyTorch's `trunc_normal_`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TruncNormal {
    pub mean: f64,
    pub std: f64,
    pub a: f64,
    pub b: f64,
}

impl TruncNormal {
    /// A zero-mean distribution with the given standard deviation, truncated to `[-2, 2]`.
    pub const fn with_std(std: f64) -> Self {
        Self {
            mean: 0.0,
            std,
            a: -2.0,
            b: 2.0,
        }
    }

    /// Samples a tensor of the given shape.
    pub fn sample<B: Backend, const D: usize, S: Into<Shape>>(
        &self,
        shape: S,
        device: &B::Device,
    ) -> Tensor<B, D> {
        let lower = normal_cdf((self.a - self.mean) / self.std);
        let upper = normal_cdf((self.b - self.mean) / self.std);

        Tensor::<B, D>::random(
            shape,
            Distribution::Uniform(2.0f64.mul_add(lower, -1.0), 2.0f64.mul_add(upper, -1.0)),
            device,
        )
        .erfinv()
        .mul_scalar(self.std * core::f64::consts::SQRT_2)
        .add_scalar(self.mean)
        .clamp(self.a, self.b)
    }
}

fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + libm::erf(x / core::f64::consts::SQRT_2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn samples_stay_within_bounds() {
        let device = Default::default();
        let dist = TruncNormal {
            mean: 0.0,
            std: 1.0,
            a: -0.5,
            b: 0.75,
        };
        let x: Tensor<TestBackend, 2> = dist.sample([64, 64], &device);

        assert_eq!(x.dims(), [64, 64]);
        assert!(x.clone().min().into_scalar() >= -0.5);
        assert!(x.max().into_scalar() <= 0.75);
    }

    #[test]
    fn small_std_samples_have_matching_spread() {
        let device = Default::default();
        let x: Tensor<TestBackend, 1> = TruncNormal::with_std(0.02).sample([20_000], &device);

        let mean = x.clone().mean().into_scalar();
        let std = x.var(0).sqrt().into_scalar();
        assert!(mean.abs() < 2e-3, "mean {mean}");
        assert!((std - 0.02).abs() < 2e-3, "std {std}");
    }
}
