//! Tensor helpers used by the ArchesWeather model on top of Burn's own ops.
//!
//! - [`DropPath`]: stochastic depth on residual branches.
//! - [`TruncNormal`]: truncated normal initialization, built on the inverse
//!   error function ([`Erfinv`]).

mod drop_path;
mod erfinv;
mod trunc_normal;

pub use drop_path::{DropPath, DropPathConfig};
pub use erfinv::Erfinv;
pub use trunc_normal::TruncNormal;
