use candle_core::{Result, Tensor};
use serde::{Deserialize, Serialize};

/// Shape of one image observation; tensors are laid out `n x c x h x w`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageShape {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// number of pixel intensities `c * h * w`
    pub fn numel(&self) -> usize {
        self.height * self.width * self.channels
    }

    /// `(c, h, w)`
    pub fn chw(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }
}

impl Default for ImageShape {
    fn default() -> Self {
        Self::new(64, 64, 1)
    }
}

/// Diagonal Gaussian posterior `q(z|x)` spit out by an encoder
pub struct GaussianLatent {
    /// mean (n x k)
    pub mean: Tensor,
    /// log variance (n x k)
    pub log_var: Tensor,
    /// extra loss contributed by the encoder itself (scalar)
    pub regularizer: Option<Tensor>,
}

impl GaussianLatent {
    pub fn new(mean: Tensor, log_var: Tensor) -> Self {
        Self {
            mean,
            log_var,
            regularizer: None,
        }
    }

    pub fn with_regularizer(mut self, regularizer: Tensor) -> Self {
        self.regularizer = Some(regularizer);
        self
    }
}

pub trait GaussianEncoderT {
    /// An encoder that spits out Gaussian latent parameters
    ///
    /// # Arguments
    /// * `x_nchw` - input images (n x c x h x w)
    /// * `train` - whether the graph is evaluated for training
    ///
    /// # Returns `GaussianLatent` with `(n x k)` mean and log variance
    fn forward_t(&self, x_nchw: &Tensor, train: bool) -> Result<GaussianLatent>;

    fn dim_latent(&self) -> usize;
}

pub trait DecoderModuleT {
    /// A decoder that spits out reconstruction logits (n x c x h x w)
    fn forward_t(&self, z_nk: &Tensor, train: bool) -> Result<Tensor>;

    /// `(channels, height, width)` of each reconstruction
    fn output_dims(&self) -> (usize, usize, usize);

    fn dim_latent(&self) -> usize;
}

pub trait DiscriminatorModuleT {
    /// A discriminator that spits out `(logits_n2, probs_n2)`
    fn forward_t(&self, z_nk: &Tensor, train: bool) -> Result<(Tensor, Tensor)>;

    fn dim_latent(&self) -> usize;
}
