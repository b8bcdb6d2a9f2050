use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{ConvTranspose2d, Linear, Module, ModuleT, VarBuilder};

/////////////////////////////
// Fully connected decoder //
/////////////////////////////

pub const FC_DECODER_LAYERS: [usize; 3] = [1200, 1200, 1200];

/// z -> 1200 tanh -> 1200 tanh -> 1200 tanh -> c*h*w logits
pub struct FcDecoder {
    n_latent: usize,
    image: ImageShape,
    fc: StackLayers<Linear>,
}

impl DecoderModuleT for FcDecoder {
    fn forward_t(&self, z_nk: &Tensor, train: bool) -> Result<Tensor> {
        let (c, h, w) = self.image.chw();
        let n = z_nk.dim(0)?;
        self.fc.forward_t(z_nk, train)?.reshape((n, c, h, w))
    }

    fn output_dims(&self) -> (usize, usize, usize) {
        self.image.chw()
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl FcDecoder {
    pub fn new(n_latent: usize, image: ImageShape, vs: VarBuilder) -> Result<Self> {
        let mut fc = StackLayers::<Linear>::new();
        let mut prev_dim = n_latent;
        for (j, &next_dim) in FC_DECODER_LAYERS.iter().enumerate() {
            let _name = format!("d{}", j + 1);
            fc.push_with_act(
                candle_nn::linear(prev_dim, next_dim, vs.pp(_name))?,
                Nonlinearity::Tanh,
            );
            prev_dim = next_dim;
        }
        let _name = format!("d{}", FC_DECODER_LAYERS.len() + 1);
        fc.push(candle_nn::linear(prev_dim, image.numel(), vs.pp(_name))?);

        Ok(Self {
            n_latent,
            image,
            fc,
        })
    }
}

/////////////////////////////
// Deconvolutional decoder //
/////////////////////////////

pub const DECONV_DECODER_SIDE: usize = 64;
const DECONV_SEED_CHANNELS: usize = 64;
const DECONV_SEED_SIDE: usize = 4;
const DECONV_KERNEL: usize = 4;
const DECONV_STRIDE: usize = 2;

/// z -> 256 relu -> 1024 relu -> (64 x 4 x 4) -> deconv x 4 -> (c x 64 x 64) logits
///
/// Each transposed convolution doubles the spatial size, so the
/// output is always 64 x 64.
pub struct DeconvDecoder {
    n_latent: usize,
    image: ImageShape,
    fc: StackLayers<Linear>,
    deconv: StackLayers<ConvTranspose2d>,
}

impl DecoderModuleT for DeconvDecoder {
    fn forward_t(&self, z_nk: &Tensor, train: bool) -> Result<Tensor> {
        let n = z_nk.dim(0)?;
        let h_nl = self.fc.forward_t(z_nk, train)?;
        let h_nchw = h_nl.reshape((n, DECONV_SEED_CHANNELS, DECONV_SEED_SIDE, DECONV_SEED_SIDE))?;
        self.deconv.forward_t(&h_nchw, train)
    }

    fn output_dims(&self) -> (usize, usize, usize) {
        self.image.chw()
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl DeconvDecoder {
    /// Will create variables:
    ///
    /// * `d1.weight` (256), `d2.weight` (1024)
    /// * `d3` ... `d6` transposed convolution kernels
    ///
    /// Fails unless `image` is 64 x 64.
    pub fn new(n_latent: usize, image: ImageShape, vs: VarBuilder) -> Result<Self> {
        if image.height != DECONV_DECODER_SIDE || image.width != DECONV_DECODER_SIDE {
            candle_core::bail!(
                "deconv decoder generates {}x{} images, but {}x{} requested",
                DECONV_DECODER_SIDE,
                DECONV_DECODER_SIDE,
                image.height,
                image.width
            );
        }

        let mut fc = StackLayers::<Linear>::new();
        fc.push_with_act(candle_nn::linear(n_latent, 256, vs.pp("d1"))?, Nonlinearity::Relu);
        fc.push_with_act(
            candle_nn::linear(
                256,
                DECONV_SEED_CHANNELS * DECONV_SEED_SIDE * DECONV_SEED_SIDE,
                vs.pp("d2"),
            )?,
            Nonlinearity::Relu,
        );

        let mut deconv = StackLayers::<ConvTranspose2d>::new();
        let mut prev_channels = DECONV_SEED_CHANNELS;
        for (j, &filters) in [64, 32, 32].iter().enumerate() {
            let _name = format!("d{}", j + 3);
            deconv.push_with_act(
                same_conv_transpose2d(
                    prev_channels,
                    filters,
                    DECONV_KERNEL,
                    DECONV_STRIDE,
                    vs.pp(_name),
                )?,
                Nonlinearity::Relu,
            );
            prev_channels = filters;
        }
        deconv.push(same_conv_transpose2d(
            prev_channels,
            image.channels,
            DECONV_KERNEL,
            DECONV_STRIDE,
            vs.pp("d6"),
        )?);

        Ok(Self {
            n_latent,
            image,
            fc,
            deconv,
        })
    }
}

////////////////////
// Linear decoder //
////////////////////

/// Simple decoder for testing: one linear layer
pub struct LinearDecoder {
    n_latent: usize,
    image: ImageShape,
    fc: Linear,
}

impl DecoderModuleT for LinearDecoder {
    fn forward_t(&self, z_nk: &Tensor, _train: bool) -> Result<Tensor> {
        let (c, h, w) = self.image.chw();
        let n = z_nk.dim(0)?;
        self.fc.forward(z_nk)?.reshape((n, c, h, w))
    }

    fn output_dims(&self) -> (usize, usize, usize) {
        self.image.chw()
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl LinearDecoder {
    pub fn new(n_latent: usize, image: ImageShape, vs: VarBuilder) -> Result<Self> {
        let fc = candle_nn::linear(n_latent, image.numel(), vs.pp("d1"))?;
        Ok(Self {
            n_latent,
            image,
            fc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_fc_and_linear_decoder_shapes() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

        let image = ImageShape::new(6, 5, 3);
        let z = Tensor::randn(0f32, 1f32, (4, 2), &dev)?;

        let fc = FcDecoder::new(2, image, vb.pp("fc"))?;
        assert_eq!(fc.forward_t(&z, true)?.dims(), &[4, 3, 6, 5]);

        let lin = LinearDecoder::new(2, image, vb.pp("lin"))?;
        assert_eq!(lin.forward_t(&z, false)?.dims(), &[4, 3, 6, 5]);
        assert_eq!(lin.output_dims(), (3, 6, 5));
        Ok(())
    }

    #[test]
    fn test_deconv_decoder_shape() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

        let dec = DeconvDecoder::new(3, ImageShape::new(64, 64, 2), vb)?;
        let z = Tensor::randn(0f32, 1f32, (2, 3), &dev)?;
        assert_eq!(dec.forward_t(&z, false)?.dims(), &[2, 2, 64, 64]);
        Ok(())
    }

    #[test]
    fn test_deconv_decoder_rejects_other_sizes() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(DeconvDecoder::new(3, ImageShape::new(32, 32, 1), vb).is_err());
    }
}
