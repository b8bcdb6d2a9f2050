use crate::candle_decoders::*;
use crate::candle_discriminator::*;
use crate::candle_encoder_conv::ConvEncoder;
use crate::candle_encoder_fc::FcEncoder;
use crate::candle_encoder_layerwise::{LayerwiseConfig, LayerwiseConvEncoder};
use crate::candle_encoder_linear::LinearEncoder;
use crate::candle_loss_functions::{check_likelihood_cap, OutputActivation, ReconstructionLoss};
use crate::candle_model_traits::*;

use anyhow::Context;
use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;
use clap::ValueEnum;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[clap(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum EncoderKind {
    Fc,
    Conv,
    LayerwiseConv,
    #[value(alias = "test")]
    #[serde(alias = "test")]
    Linear,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[clap(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DecoderKind {
    Fc,
    Deconv,
    #[value(alias = "test")]
    #[serde(alias = "test")]
    Linear,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[clap(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DiscriminatorKind {
    Fc,
}

/// Everything needed to build encoder, decoder and discriminator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchitectureConfig {
    pub encoder: EncoderKind,
    pub decoder: DecoderKind,
    pub discriminator: DiscriminatorKind,
    pub num_latent: usize,
    pub image: ImageShape,
    pub layerwise: LayerwiseConfig,
    pub beta: f64,
    pub reconstruction_loss: ReconstructionLoss,
    pub output_activation: OutputActivation,
}

impl Default for ArchitectureConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderKind::LayerwiseConv,
            decoder: DecoderKind::Deconv,
            discriminator: DiscriminatorKind::Fc,
            num_latent: 10,
            image: ImageShape::default(),
            layerwise: LayerwiseConfig::default(),
            beta: 1.0,
            reconstruction_loss: ReconstructionLoss::Bernoulli,
            output_activation: OutputActivation::Logits,
        }
    }
}

impl ArchitectureConfig {
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        info!("Loaded architecture config from {}", path.display());
        Ok(config)
    }

    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write config {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.num_latent == 0 {
            anyhow::bail!("num_latent must be positive");
        }
        if self.image.numel() == 0 {
            anyhow::bail!("image dimensions must be positive: {:?}", self.image);
        }
        if self.layerwise.stride == 0 {
            anyhow::bail!("layerwise stride must be positive");
        }
        if self.encoder == EncoderKind::LayerwiseConv {
            if self.layerwise.kernel_sizes.is_empty() {
                anyhow::bail!("layerwise encoder needs at least one kernel size");
            }
            check_likelihood_cap(self.layerwise.kernel_sizes.len(), self.layerwise.max_likelihood)?;
        }
        Ok(())
    }
}

/// Any of the Gaussian encoders
pub enum GaussianEncoder {
    Fc(FcEncoder),
    Conv(ConvEncoder),
    LayerwiseConv(LayerwiseConvEncoder),
    Linear(LinearEncoder),
}

impl GaussianEncoderT for GaussianEncoder {
    fn forward_t(&self, x_nchw: &Tensor, train: bool) -> Result<GaussianLatent> {
        match self {
            GaussianEncoder::Fc(enc) => enc.forward_t(x_nchw, train),
            GaussianEncoder::Conv(enc) => enc.forward_t(x_nchw, train),
            GaussianEncoder::LayerwiseConv(enc) => enc.forward_t(x_nchw, train),
            GaussianEncoder::Linear(enc) => enc.forward_t(x_nchw, train),
        }
    }

    fn dim_latent(&self) -> usize {
        match self {
            GaussianEncoder::Fc(enc) => enc.dim_latent(),
            GaussianEncoder::Conv(enc) => enc.dim_latent(),
            GaussianEncoder::LayerwiseConv(enc) => enc.dim_latent(),
            GaussianEncoder::Linear(enc) => enc.dim_latent(),
        }
    }
}

/// Any of the decoders
pub enum Decoder {
    Fc(FcDecoder),
    Deconv(DeconvDecoder),
    Linear(LinearDecoder),
}

impl DecoderModuleT for Decoder {
    fn forward_t(&self, z_nk: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            Decoder::Fc(dec) => dec.forward_t(z_nk, train),
            Decoder::Deconv(dec) => dec.forward_t(z_nk, train),
            Decoder::Linear(dec) => dec.forward_t(z_nk, train),
        }
    }

    fn output_dims(&self) -> (usize, usize, usize) {
        match self {
            Decoder::Fc(dec) => dec.output_dims(),
            Decoder::Deconv(dec) => dec.output_dims(),
            Decoder::Linear(dec) => dec.output_dims(),
        }
    }

    fn dim_latent(&self) -> usize {
        match self {
            Decoder::Fc(dec) => dec.dim_latent(),
            Decoder::Deconv(dec) => dec.dim_latent(),
            Decoder::Linear(dec) => dec.dim_latent(),
        }
    }
}

/// Build the configured encoder under the `encoder` scope
pub fn make_gaussian_encoder(config: &ArchitectureConfig, vs: VarBuilder) -> Result<GaussianEncoder> {
    let vs = vs.pp("encoder");
    let (image, k) = (config.image, config.num_latent);
    Ok(match config.encoder {
        EncoderKind::Fc => GaussianEncoder::Fc(FcEncoder::new(image, k, vs)?),
        EncoderKind::Conv => GaussianEncoder::Conv(ConvEncoder::new(image, k, vs)?),
        EncoderKind::LayerwiseConv => GaussianEncoder::LayerwiseConv(LayerwiseConvEncoder::new(
            image,
            k,
            config.layerwise.clone(),
            vs,
        )?),
        EncoderKind::Linear => GaussianEncoder::Linear(LinearEncoder::new(image, k, vs)?),
    })
}

/// Build the configured decoder under the `decoder` scope
pub fn make_decoder(config: &ArchitectureConfig, vs: VarBuilder) -> Result<Decoder> {
    let vs = vs.pp("decoder");
    let (image, k) = (config.image, config.num_latent);
    Ok(match config.decoder {
        DecoderKind::Fc => Decoder::Fc(FcDecoder::new(k, image, vs)?),
        DecoderKind::Deconv => Decoder::Deconv(DeconvDecoder::new(k, image, vs)?),
        DecoderKind::Linear => Decoder::Linear(LinearDecoder::new(k, image, vs)?),
    })
}

/// Build the configured discriminator under the `discriminator` scope.
/// Apply it with [`discriminate`] to get clipped probabilities.
pub fn make_discriminator(config: &ArchitectureConfig, vs: VarBuilder) -> Result<FcDiscriminator> {
    let vs = vs.pp("discriminator");
    match config.discriminator {
        DiscriminatorKind::Fc => FcDiscriminator::new(config.num_latent, vs),
    }
}
