use crate::candle_latent_sampling::reparameterize;
use crate::candle_loss_functions::*;
use crate::candle_model_traits::*;

use candle_core::{Result, Tensor};

/// Everything a single VAE pass produces
pub struct VaeOutput {
    /// decoder logits (n x c x h x w)
    pub reconstruction: Tensor,
    /// latent states fed to the decoder (n x k)
    pub z: Tensor,
    pub latent: GaussianLatent,
    /// KL(q(z|x) || N(0, I)) (n,)
    pub kl: Tensor,
    /// reconstruction loss (n,)
    pub reconstruction_loss: Tensor,
    /// recon + beta * kl + regularizer (scalar)
    pub loss: Tensor,
}

pub struct GaussianVae<'a, Enc, Dec>
where
    Enc: GaussianEncoderT,
    Dec: DecoderModuleT,
{
    pub encoder: &'a Enc,
    pub decoder: &'a Dec,
    pub beta: f64,
    pub reconstruction_loss: ReconstructionLoss,
    pub output_activation: OutputActivation,
}

impl<'a, Enc, Dec> GaussianVae<'a, Enc, Dec>
where
    Enc: GaussianEncoderT,
    Dec: DecoderModuleT,
{
    /// Build a VAE model
    /// * `encoder` - encoder module
    /// * `decoder` - decoder module
    pub fn build(encoder: &'a Enc, decoder: &'a Dec) -> Result<Self> {
        if encoder.dim_latent() != decoder.dim_latent() {
            candle_core::bail!(
                "encoder latent dim {} != decoder latent dim {}",
                encoder.dim_latent(),
                decoder.dim_latent()
            );
        }

        Ok(Self {
            encoder,
            decoder,
            beta: 1.0,
            reconstruction_loss: ReconstructionLoss::Bernoulli,
            output_activation: OutputActivation::Logits,
        })
    }

    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    pub fn with_reconstruction_loss(
        mut self,
        loss: ReconstructionLoss,
        activation: OutputActivation,
    ) -> Self {
        self.reconstruction_loss = loss;
        self.output_activation = activation;
        self
    }

    /// One pass: encode, sample (posterior mean unless `train`),
    /// decode, and add up the losses
    ///
    /// * `x_nchw` - images in [0, 1]
    pub fn forward_t(&self, x_nchw: &Tensor, train: bool) -> Result<VaeOutput> {
        let latent = self.encoder.forward_t(x_nchw, train)?;
        let z = reparameterize(&latent.mean, &latent.log_var, train)?;
        let reconstruction = self.decoder.forward_t(&z, train)?;

        let kl = gaussian_kl_loss(&latent.mean, &latent.log_var)?;
        let reconstruction_loss =
            self.reconstruction_loss.evaluate(x_nchw, &reconstruction, self.output_activation)?;

        let loss = (reconstruction_loss.mean_all()? + (kl.mean_all()? * self.beta)?)?;
        let loss = match &latent.regularizer {
            Some(reg) => (loss + reg)?,
            None => loss,
        };

        Ok(VaeOutput {
            reconstruction,
            z,
            latent,
            kl,
            reconstruction_loss,
            loss,
        })
    }
}
