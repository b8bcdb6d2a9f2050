use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, ModuleT, VarBuilder};

/// `(filters, kernel_size)` of the convolution stack, each with stride 2
pub const CONV_ENCODER_LAYERS: [(usize, usize); 4] = [(32, 4), (32, 4), (64, 2), (64, 2)];
pub const CONV_ENCODER_STRIDE: usize = 2;
pub const CONV_ENCODER_HIDDEN: usize = 256;

/// Convolutional Gaussian encoder (beta-VAE, 3D chairs)
pub struct ConvEncoder {
    n_latent: usize,
    conv: StackLayers<SameConv2d>,
    fc: Linear,
    z_mean: Linear,
    z_lnvar: Linear,
}

impl GaussianEncoderT for ConvEncoder {
    fn forward_t(&self, x_nchw: &Tensor, train: bool) -> Result<GaussianLatent> {
        let h_nchw = self.conv.forward_t(x_nchw, train)?;
        let h_nl = self.fc.forward(&h_nchw.flatten_from(1)?)?.relu()?;
        Ok(GaussianLatent::new(
            self.z_mean.forward(&h_nl)?,
            self.z_lnvar.forward(&h_nl)?,
        ))
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl ConvEncoder {
    /// Will create variables:
    ///
    /// * `e1` ... `e4` convolution kernels
    /// * `e5.weight` hidden dense layer
    /// * `means.weight`, `log_var.weight`
    ///
    /// # Arguments
    /// * `image` - shape of each observation
    /// * `n_latent` - the number of latent variables
    /// * `vs` - variable builder
    pub fn new(image: ImageShape, n_latent: usize, vs: VarBuilder) -> Result<Self> {
        let mut conv = StackLayers::<SameConv2d>::new();
        let mut prev_channels = image.channels;
        let (mut height, mut width) = (image.height, image.width);

        for (j, &(filters, kernel)) in CONV_ENCODER_LAYERS.iter().enumerate() {
            let _name = format!("e{}", j + 1);
            conv.push_with_act(
                same_conv2d(prev_channels, filters, kernel, CONV_ENCODER_STRIDE, vs.pp(_name))?,
                Nonlinearity::Relu,
            );
            prev_channels = filters;
            height = same_conv2d_output_size(height, CONV_ENCODER_STRIDE);
            width = same_conv2d_output_size(width, CONV_ENCODER_STRIDE);
        }

        let flat_dim = prev_channels * height * width;
        let fc = candle_nn::linear(flat_dim, CONV_ENCODER_HIDDEN, vs.pp("e5"))?;

        let z_mean = candle_nn::linear(CONV_ENCODER_HIDDEN, n_latent, vs.pp("means"))?;
        let z_lnvar = candle_nn::linear(CONV_ENCODER_HIDDEN, n_latent, vs.pp("log_var"))?;

        Ok(Self {
            n_latent,
            conv,
            fc,
            z_mean,
            z_lnvar,
        })
    }
}
