use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/// Simple encoder for testing: two linear heads on the flattened input
pub struct LinearEncoder {
    n_latent: usize,
    z_mean: Linear,
    z_lnvar: Linear,
}

impl GaussianEncoderT for LinearEncoder {
    fn forward_t(&self, x_nchw: &Tensor, _train: bool) -> Result<GaussianLatent> {
        let x_np = x_nchw.flatten_from(1)?;
        Ok(GaussianLatent::new(
            self.z_mean.forward(&x_np)?,
            self.z_lnvar.forward(&x_np)?,
        ))
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl LinearEncoder {
    pub fn new(image: ImageShape, n_latent: usize, vs: VarBuilder) -> Result<Self> {
        let z_mean = candle_nn::linear(image.numel(), n_latent, vs.pp("e1"))?;
        let z_lnvar = candle_nn::linear(image.numel(), n_latent, vs.pp("e2"))?;
        Ok(Self {
            n_latent,
            z_mean,
            z_lnvar,
        })
    }
}
