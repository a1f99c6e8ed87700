use thiserror::Error;

/// The error type for ArchesWeather model construction.
///
/// Every variant describes an invalid configuration and is raised eagerly by
/// the `init` functions, never during a forward pass. Tensor shape mismatches
/// at forward time are reported by Burn's tensor operations themselves.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchesWeatherError {
    /// A window dimension that is neither 1 nor even.
    #[error("Window size must be 1 or divisible by 2, got {window:?}")]
    InvalidWindowSize {
        /// The rejected window geometry.
        window: [usize; 3],
    },

    /// A shift geometry that does not have exactly three components.
    #[error("Shift size must be 3D, got {shift:?}")]
    InvalidShiftSize {
        /// The rejected shift geometry.
        shift: Vec<usize>,
    },

    /// Only two spatial dimensions (latitude, longitude) are supported.
    #[error("Unsupported spatial dimension: {spatial_dims}")]
    UnsupportedSpatialDims {
        /// The requested number of spatial dimensions.
        spatial_dims: usize,
    },

    /// The convolutional recovery head upsamples by powers of two only.
    #[error("downfactor should be a power of 2, value is {downfactor}")]
    InvalidDownfactor {
        /// The rejected downsampling factor.
        downfactor: usize,
    },

    /// Parameters that are logically inconsistent with each other.
    #[error("Invalid model configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },
}

/// A specialized `Result` type for ArchesWeather operations.
pub type ArchesWeatherResult<T> = Result<T, ArchesWeatherError>;
