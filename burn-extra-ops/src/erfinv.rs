//! # Inverse Error Function (erfinv)
//!
//! Element-wise inverse error function, used to turn uniform samples into
//! normal ones when drawing truncated-normal initial weights.
//!
//! The approximation is the single-precision polynomial of M. Giles,
//! "Approximating the erfinv function" (GPU Computing Gems, 2011): a
//! polynomial in `w = -ln(1 - x^2)` with one branch for the central region
//! (`w < 5`) and one for the tails, accurate to a few ulps in `f32`.

use burn::prelude::*;

const TAIL_THRESHOLD: f64 = 5.0;

const CENTRAL: [f64; 9] = [
    2.810_226_36e-08,
    3.432_739_39e-07,
    -3.523_387_7e-06,
    -4.391_506_54e-06,
    0.000_218_580_87,
    -0.001_253_725_03,
    -0.004_177_681_64,
    0.246_640_727,
    1.501_409_41,
];

const TAIL: [f64; 9] = [
    -0.000_200_214_257,
    0.000_100_950_558,
    0.001_349_343_22,
    -0.003_673_428_44,
    0.005_739_507_73,
    -0.007_622_461_3,
    0.009_438_870_47,
    1.001_674_06,
    2.832_976_82,
];

/// A trait for calculating the inverse error function on a tensor.
pub trait Erfinv {
    /// Calculates the inverse error function element-wise.
    ///
    /// Inputs are expected in the open interval `(-1, 1)`; `±1` maps to `±inf`.
    fn erfinv(self) -> Self;
}

impl<B: Backend, const D: usize> Erfinv for Tensor<B, D> {
    fn erfinv(self) -> Self {
        erfinv(self)
    }
}

/// Inverse error function behind [`Erfinv`].
fn erfinv<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    // w = -ln((1 - x)(1 + x))
    let w = (x.clone().neg().add_scalar(1.0) * x.clone().add_scalar(1.0))
        .log()
        .neg();

    let central = horner(w.clone().sub_scalar(2.5), &CENTRAL);
    let tail = horner(w.clone().sqrt().sub_scalar(3.0), &TAIL);
    let p = central.mask_where(w.greater_equal_elem(TAIL_THRESHOLD), tail);

    p * x
}

/// Evaluates the polynomial with `coefficients` (highest degree first) at `w`.
fn horner<B: Backend, const D: usize>(w: Tensor<B, D>, coefficients: &[f64]) -> Tensor<B, D> {
    coefficients
        .iter()
        .fold(w.zeros_like(), |p, &c| (p * w.clone()).add_scalar(c))
}
