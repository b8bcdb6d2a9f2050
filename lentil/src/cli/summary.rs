use crate::candle_architecture::*;
use crate::candle_discriminator::*;
use crate::candle_loss_functions::{OutputActivation, ReconstructionLoss};
use crate::candle_vae_model::GaussianVae;

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::{Args, ValueEnum};
use log::{info, warn};
use rand::SeedableRng;
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

#[derive(Args, Debug)]
pub struct SummaryArgs {
    #[arg(long, short, help = "Architecture configuration (JSON)")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Encoder architecture")]
    encoder: Option<EncoderKind>,

    #[arg(long, value_enum, help = "Decoder architecture")]
    decoder: Option<DecoderKind>,

    #[arg(long, short = 'k', help = "Number of latent variables")]
    num_latent: Option<usize>,

    #[arg(long, help = "Image height")]
    height: Option<usize>,

    #[arg(long, help = "Image width")]
    width: Option<usize>,

    #[arg(long, help = "Image channels")]
    channels: Option<usize>,

    #[arg(
        long,
        help = "Weight of the independence loss between layerwise branches (alpha)"
    )]
    independence_weight: Option<f64>,

    #[arg(long, help = "Weight of the KL term")]
    beta: Option<f64>,

    #[arg(long, value_enum, help = "Reconstruction loss")]
    reconstruction_loss: Option<ReconstructionLoss>,

    #[arg(long, value_enum, help = "Activation of the decoder output")]
    output_activation: Option<OutputActivation>,

    #[arg(long, short = 'b', default_value_t = 16, help = "Minibatch size")]
    batch_size: usize,

    #[arg(long, help = "Seed for shuffling latent codes")]
    seed: Option<u64>,

    #[arg(long, value_enum, default_value = "cpu", help = "Candle device")]
    device: ComputeDevice,

    #[arg(long, default_value_t = 0, help = "Device ordinal")]
    device_no: usize,

    #[arg(long, help = "Save initialized parameters (.safetensors)")]
    save_weights: Option<PathBuf>,

    #[arg(long, help = "Write the effective configuration (JSON)")]
    dump_config: Option<PathBuf>,
}

impl SummaryArgs {
    /// file (or default) configuration overridden by command line flags
    pub fn architecture_config(&self) -> Result<ArchitectureConfig> {
        let mut config = match &self.config {
            Some(path) => ArchitectureConfig::from_json_file(path)?,
            None => ArchitectureConfig::default(),
        };

        if let Some(encoder) = self.encoder {
            config.encoder = encoder;
        }
        if let Some(decoder) = self.decoder {
            config.decoder = decoder;
        }
        if let Some(k) = self.num_latent {
            config.num_latent = k;
        }
        if let Some(h) = self.height {
            config.image.height = h;
        }
        if let Some(w) = self.width {
            config.image.width = w;
        }
        if let Some(c) = self.channels {
            config.image.channels = c;
        }
        if let Some(alpha) = self.independence_weight {
            config.layerwise.independence_weight = alpha;
        }
        if let Some(beta) = self.beta {
            config.beta = beta;
        }
        if let Some(loss) = self.reconstruction_loss {
            config.reconstruction_loss = loss;
        }
        if let Some(act) = self.output_activation {
            config.output_activation = act;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Scalars reported by one forward pass
#[derive(Debug, Clone)]
pub struct SummaryReport {
    pub num_parameters: usize,
    pub latent_dims: Vec<usize>,
    pub reconstruction_dims: Vec<usize>,
    pub reconstruction_loss: f32,
    pub kl: f32,
    pub independence_loss: Option<f32>,
    pub total_loss: f32,
    pub total_correlation: f32,
    pub discriminator_loss: f32,
}

pub fn run(args: &SummaryArgs) -> Result<()> {
    let config = args.architecture_config()?;

    if let Some(path) = &args.dump_config {
        config.to_json_file(path)?;
        info!("Wrote configuration to {}", path.display());
    }

    let dev = match args.device {
        ComputeDevice::Metal => Device::new_metal(args.device_no)?,
        ComputeDevice::Cuda => Device::new_cuda(args.device_no)?,
        _ => Device::Cpu,
    };

    let parameters = VarMap::new();
    let report = summarize(&config, &parameters, args.batch_size, args.seed, &dev)?;

    info!("parameters: {}", report.num_parameters);
    info!("latent: {:?}", report.latent_dims);
    info!("reconstruction: {:?}", report.reconstruction_dims);
    info!("reconstruction loss: {}", report.reconstruction_loss);
    info!("KL: {}", report.kl);
    match report.independence_loss {
        Some(loss) => info!("independence loss: {}", loss),
        None => info!("independence loss: n/a ({:?} encoder)", config.encoder),
    }
    info!("total loss: {}", report.total_loss);
    info!("total correlation (discriminator): {}", report.total_correlation);
    info!("discriminator loss: {}", report.discriminator_loss);

    if !report.total_loss.is_finite() {
        warn!("total loss is not finite");
    }

    if let Some(path) = &args.save_weights {
        parameters.save(path)?;
        info!("Saved parameters to {}", path.display());
    }

    Ok(())
}

/// Build the architecture in `parameters` and evaluate it once on
/// uniform random images
pub fn summarize(
    config: &ArchitectureConfig,
    parameters: &VarMap,
    batch_size: usize,
    seed: Option<u64>,
    dev: &Device,
) -> Result<SummaryReport> {
    if batch_size == 0 {
        anyhow::bail!("batch size must be positive");
    }

    let param_builder = VarBuilder::from_varmap(parameters, DType::F32, dev);

    let encoder = make_gaussian_encoder(config, param_builder.clone())?;
    let decoder = make_decoder(config, param_builder.clone())?;
    let discriminator = make_discriminator(config, param_builder)?;

    let num_parameters = parameters
        .all_vars()
        .iter()
        .map(|v| v.as_tensor().elem_count())
        .sum::<usize>();

    let vae = GaussianVae::build(&encoder, &decoder)?
        .with_beta(config.beta)
        .with_reconstruction_loss(config.reconstruction_loss, config.output_activation);

    let (c, h, w) = config.image.chw();
    let x_nchw = Tensor::rand(0f32, 1f32, (batch_size, c, h, w), dev)?;

    let out = vae.forward_t(&x_nchw, true)?;

    let mut rng = match seed {
        Some(s) => rand::rngs::StdRng::seed_from_u64(s),
        None => rand::rngs::StdRng::from_os_rng(),
    };

    let z_shuffled = shuffle_latent_codes(&out.z, &mut rng)?;
    let (logits_real, probs_real) = discriminate(&discriminator, &out.z, false)?;
    let (_, probs_shuffled) = discriminate(&discriminator, &z_shuffled, false)?;

    let independence_loss = match &out.latent.regularizer {
        Some(reg) => Some(reg.to_scalar::<f32>()?),
        None => None,
    };

    Ok(SummaryReport {
        num_parameters,
        latent_dims: out.latent.mean.dims().to_vec(),
        reconstruction_dims: out.reconstruction.dims().to_vec(),
        reconstruction_loss: out.reconstruction_loss.mean_all()?.to_scalar::<f32>()?,
        kl: out.kl.mean_all()?.to_scalar::<f32>()?,
        independence_loss,
        total_loss: out.loss.to_scalar::<f32>()?,
        total_correlation: total_correlation(&logits_real)?.to_scalar::<f32>()?,
        discriminator_loss: discriminator_loss(&probs_real, &probs_shuffled)?.to_scalar::<f32>()?,
    })
}
