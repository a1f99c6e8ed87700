//! # Model Architectures
//!
//! - `archesweather`: the full encoder/decoder forecasting model.
//! - `modules`: its building blocks, from window bookkeeping and the
//!   shifted-window mask up to Earth-specific layers and recovery heads.

pub mod archesweather;
pub mod modules;

pub use archesweather::{ArchesWeather, ArchesWeatherRecord};
