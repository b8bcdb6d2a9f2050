use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, ModuleT, VarBuilder};

/// Fully connected Gaussian encoder (beta-VAE, dSprites)
///
/// x -> flatten -> 1200 relu -> 1200 relu -> (mean, log_var)
pub struct FcEncoder {
    n_pixels: usize,
    n_latent: usize,
    fc: StackLayers<Linear>,
    z_mean: Linear,
    z_lnvar: Linear,
}

pub const FC_ENCODER_LAYERS: [usize; 2] = [1200, 1200];

impl GaussianEncoderT for FcEncoder {
    fn forward_t(&self, x_nchw: &Tensor, train: bool) -> Result<GaussianLatent> {
        let x_np = x_nchw.flatten_from(1)?;
        debug_assert_eq!(x_np.dim(1)?, self.n_pixels);

        let h_nl = self.fc.forward_t(&x_np, train)?;
        Ok(GaussianLatent::new(
            self.z_mean.forward(&h_nl)?,
            self.z_lnvar.forward(&h_nl)?,
        ))
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl FcEncoder {
    /// Will create variables:
    ///
    /// * `e1.weight`, `e2.weight` for the hidden layers
    /// * `means.weight`
    /// * `log_var.weight`
    pub fn new(image: ImageShape, n_latent: usize, vs: VarBuilder) -> Result<Self> {
        let n_pixels = image.numel();

        let mut fc = StackLayers::<Linear>::new();
        let mut prev_dim = n_pixels;
        for (j, &next_dim) in FC_ENCODER_LAYERS.iter().enumerate() {
            let _name = format!("e{}", j + 1);
            fc.push_with_act(
                candle_nn::linear(prev_dim, next_dim, vs.pp(_name))?,
                Nonlinearity::Relu,
            );
            prev_dim = next_dim;
        }

        let z_mean = candle_nn::linear(prev_dim, n_latent, vs.pp("means"))?;
        let z_lnvar = candle_nn::linear(prev_dim, n_latent, vs.pp("log_var"))?;

        Ok(Self {
            n_pixels,
            n_latent,
            fc,
            z_mean,
            z_lnvar,
        })
    }
}
