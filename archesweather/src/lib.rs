//! # ArchesWeather
//!
//! A Burn implementation of ArchesWeather, a 3D Earth-specific window
//! transformer for medium-range weather forecasting on pressure-level and
//! surface fields.
//!
//! ```no_run
//! use archesweather::{backend, ArchesWeatherConfig};
//! use burn::tensor::{Distribution, Tensor};
//!
//! let device = backend::create_device();
//! let config = ArchesWeatherConfig::new(vec![120, 240]).with_static_length(0);
//! let model = config.init::<backend::SelectedBackend>(&device)?;
//!
//! let level = Tensor::random([1, 5, 13, 120, 240], Distribution::Default, &device);
//! let surface = Tensor::random([1, 4, 120, 240], Distribution::Default, &device);
//! let cond = Tensor::random([1, 32], Distribution::Default, &device);
//! let (next_level, next_surface) = model.forward(level, surface, None, Some(cond));
//! # Ok::<(), archesweather::ArchesWeatherError>(())
//! ```

pub mod backend;
mod config;
mod error;
pub mod models;

pub use config::ArchesWeatherConfig;
pub use error::{ArchesWeatherError, ArchesWeatherResult};
pub use models::{ArchesWeather, ArchesWeatherRecord};
