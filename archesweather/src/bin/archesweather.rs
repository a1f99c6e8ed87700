use std::{path::PathBuf, time::Instant};

use anyhow::{anyhow, Context, Result};
use archesweather::{
    backend::{create_device, get_backend_name, CheckpointedAutodiff, SelectedBackend},
    ArchesWeather, ArchesWeatherConfig,
};
use burn::{
    backend::Autodiff,
    config::Config,
    prelude::*,
    tensor::{backend::AutodiffBackend, Distribution, ElementConversion},
};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "archesweather")]
#[command(about = "ArchesWeather: a 3D Earth-specific window transformer for weather forecasting")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a model and run it once on random fields
    Forward {
        /// JSON model configuration; defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Batch size
        #[arg(short, long, default_value_t = 1)]
        batch: usize,

        /// Latitude points, overriding the configuration
        #[arg(long)]
        lat: Option<usize>,

        /// Longitude points, overriding the configuration
        #[arg(long)]
        lon: Option<usize>,

        /// Pass a random conditioning vector
        #[arg(long)]
        cond: bool,

        /// Also run a backward pass on the autodiff backend
        #[arg(long)]
        backward: bool,
    },

    /// Show backend information
    Info,
}

/// Random model inputs: level, surface, static fields and conditioning.
struct Inputs<B: Backend> {
    level: Tensor<B, 5>,
    surface: Tensor<B, 4>,
    static_data: Option<Tensor<B, 4>>,
    cond: Option<Tensor<B, 2>>,
}

impl<B: Backend> Inputs<B> {
    fn random(
        config: &ArchesWeatherConfig,
        batch: usize,
        cond: bool,
        device: &B::Device,
    ) -> Result<Self> {
        let (lat, lon) = config.lat_lon()?;
        let normal = Distribution::Normal(0.0, 1.0);

        Ok(Self {
            level: Tensor::random(
                [batch, config.plevel_variables, config.plevels, lat, lon],
                normal,
                device,
            ),
            surface: Tensor::random([batch, config.surface_variables, lat, lon], normal, device),
            static_data: (config.static_length > 0).then(|| {
                Tensor::random([batch, config.static_length, lat, lon], normal, device)
            }),
            cond: config
                .conditioning()
                .filter(|_| cond)
                .map(|cond_dim| Tensor::random([batch, cond_dim], normal, device)),
        })
    }

    fn run(self, model: &ArchesWeather<B>) -> (Tensor<B, 5>, Tensor<B, 5>) {
        model.forward(self.level, self.surface, self.static_data, self.cond)
    }
}

fn forward<B: Backend>(
    config: &ArchesWeatherConfig,
    batch: usize,
    cond: bool,
    device: &B::Device,
) -> Result<()> {
    let model: ArchesWeather<B> = config.init(device)?;
    info!(
        parameters = model.num_params(),
        embedding_size = ?model.embedding_size(),
        "Model ready"
    );

    let inputs = Inputs::<B>::random(config, batch, cond, device)?;
    let start = Instant::now();
    let (level, surface) = inputs.run(&model);
    info!(
        level = ?level.dims(),
        surface = ?surface.dims(),
        elapsed = ?start.elapsed(),
        "Forward pass done"
    );

    Ok(())
}

fn backward<B: AutodiffBackend>(
    config: &ArchesWeatherConfig,
    batch: usize,
    cond: bool,
    device: &B::Device,
) -> Result<()> {
    let model: ArchesWeather<B> = config.init(device)?;
    let mut inputs = Inputs::<B>::random(config, batch, cond, device)?;
    inputs.level = inputs.level.require_grad();
    let level_input = inputs.level.clone();

    let start = Instant::now();
    let (level, surface) = inputs.run(&model);
    let grads = (level.mean() + surface.mean()).backward();
    let grad = level_input
        .grad(&grads)
        .ok_or_else(|| anyhow!("no gradient reached the level input"))?;

    info!(
        grad = ?grad.dims(),
        grad_norm = grad.powf_scalar(2.0).sum().sqrt().into_scalar().elem::<f64>(),
        elapsed = ?start.elapsed(),
        "Backward pass done"
    );

    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("archesweather=info")),
        )
        .init();

    let cli = Cli::parse();
    let device = create_device();
    info!("Using backend: {}", get_backend_name());

    match cli.command {
        Commands::Forward {
            config,
            batch,
            lat,
            lon,
            cond,
            backward: with_backward,
        } => {
            let mut config = match config {
                Some(path) => ArchesWeatherConfig::load(&path)
                    .map_err(|e| anyhow!("{e}"))
                    .with_context(|| format!("failed to load {}", path.display()))?,
                None => ArchesWeatherConfig::new(vec![121, 240]),
            };
            if let (Some(lat), Some(lon)) = (lat, lon) {
                config.input_shape = vec![lat, lon];
            } else if lat.is_some() || lon.is_some() {
                let (config_lat, config_lon) = config.lat_lon()?;
                config.input_shape = vec![lat.unwrap_or(config_lat), lon.unwrap_or(config_lon)];
            }
            config.validate()?;

            forward::<SelectedBackend>(&config, batch, cond, &device)?;
            if with_backward {
                if config.checkpoint_activation {
                    backward::<CheckpointedAutodiff<SelectedBackend>>(
                        &config, batch, cond, &device,
                    )?;
                } else {
                    backward::<Autodiff<SelectedBackend>>(&config, batch, cond, &device)?;
                }
            }
            Ok(())
        }

        Commands::Info => {
            println!("ArchesWeather Information:");
            println!("  Backend: {}", get_backend_name());
            println!("  Device: {device:?}");
            Ok(())
        }
    }
}
