use crate::candle_aux_layers::*;
use crate::candle_latent_sampling::sample_from_latent_distribution;
use crate::candle_loss_functions::{check_likelihood_cap, independence_loss, LatentBranch};
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use log::debug;
use serde::{Deserialize, Serialize};

/// Configuration of the layerwise encoder
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerwiseConfig {
    /// one branch per kernel size
    pub kernel_sizes: Vec<usize>,
    pub filters: usize,
    pub stride: usize,
    pub hidden: usize,
    /// multiplier `alpha` of the independence loss
    pub independence_weight: f64,
    /// cap on each branch likelihood
    pub max_likelihood: f64,
}

impl Default for LayerwiseConfig {
    fn default() -> Self {
        Self {
            kernel_sizes: vec![6, 8, 4],
            filters: 32,
            stride: 2,
            hidden: 256,
            independence_weight: 1.0,
            max_likelihood: 10.0,
        }
    }
}

struct LayerwiseBranch {
    conv: SameConv2d,
    fc: Linear,
    z_mean: Linear,
    z_lnvar: Linear,
}

impl LayerwiseBranch {
    /// x -> conv (relu) -> flatten -> dense -> (mean, log_var)
    fn latent_gaussian_params(&self, x_nchw: &Tensor) -> Result<(Tensor, Tensor)> {
        let min_lv = -8.; // stabilize
        let max_lv = 8.; // log variance

        let h_nchw = self.conv.forward(x_nchw)?.relu()?;
        let h_nl = self.fc.forward(&h_nchw.flatten_from(1)?)?;
        let z_mean_nk = self.z_mean.forward(&h_nl)?;
        let z_lnvar_nk = self.z_lnvar.forward(&h_nl)?.clamp(min_lv, max_lv)?;
        Ok((z_mean_nk, z_lnvar_nk))
    }
}

/// Layerwise (multi-branch) Gaussian encoder
///
/// Each branch looks at the same image through a convolution with
/// its own receptive field and spits out a diagonal Gaussian. The
/// branches are tied together by an independence loss that compares
/// the sum of branch likelihoods (joint) against their product
/// (factorized). The reported posterior adds up branch means and log
/// variances.
pub struct LayerwiseConvEncoder {
    n_latent: usize,
    config: LayerwiseConfig,
    branches: Vec<LayerwiseBranch>,
}

impl GaussianEncoderT for LayerwiseConvEncoder {
    fn forward_t(&self, x_nchw: &Tensor, _train: bool) -> Result<GaussianLatent> {
        let params = self.branch_gaussian_params(x_nchw)?;

        // drawn in both training and inference mode
        let samples = params
            .iter()
            .map(|(mean, lnvar)| sample_from_latent_distribution(mean, lnvar))
            .collect::<Result<Vec<_>>>()?;

        let latent_branches = params
            .iter()
            .zip(samples.iter())
            .map(|((mean, log_var), z)| LatentBranch { z, mean, log_var })
            .collect::<Vec<_>>();

        let loss = independence_loss(
            &latent_branches,
            self.config.independence_weight,
            self.config.max_likelihood,
        )?;

        if log::log_enabled!(log::Level::Debug) {
            debug!(
                "independence loss: {}",
                loss.to_dtype(candle_core::DType::F32)?.to_scalar::<f32>()?
            );
        }

        let mut iter = params.into_iter();
        let (mut mean_nk, mut lnvar_nk) = match iter.next() {
            Some(first) => first,
            None => candle_core::bail!("layerwise encoder without branches"),
        };
        for (mean, lnvar) in iter {
            mean_nk = (mean_nk + mean)?;
            lnvar_nk = (lnvar_nk + lnvar)?;
        }

        Ok(GaussianLatent::new(mean_nk, lnvar_nk).with_regularizer(loss))
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl LayerwiseConvEncoder {
    /// Will create for each branch `b = 1, 2, ...`:
    ///
    /// * `e{b}` convolution
    /// * `fc{b}.weight` dense layer after flattening
    /// * `means{b}.weight`
    /// * `var{b}.weight` (log variance head)
    ///
    /// # Arguments
    /// * `image` - shape of each observation
    /// * `n_latent` - the number of latent variables
    /// * `config` - branch layout and independence loss settings
    /// * `vs` - variable builder
    pub fn new(
        image: ImageShape,
        n_latent: usize,
        config: LayerwiseConfig,
        vs: VarBuilder,
    ) -> Result<Self> {
        if config.kernel_sizes.is_empty() {
            candle_core::bail!("layerwise encoder needs at least one branch");
        }
        if config.stride == 0 {
            candle_core::bail!("layerwise encoder stride must be positive");
        }
        check_likelihood_cap(config.kernel_sizes.len(), config.max_likelihood)?;

        let mut branches = Vec::with_capacity(config.kernel_sizes.len());

        for (j, &kernel) in config.kernel_sizes.iter().enumerate() {
            let b = j + 1;
            let conv = same_conv2d(
                image.channels,
                config.filters,
                kernel,
                config.stride,
                vs.pp(format!("e{}", b)),
            )?;

            let height = same_conv2d_output_size(image.height, config.stride);
            let width = same_conv2d_output_size(image.width, config.stride);
            let flat_dim = config.filters * height * width;

            let fc = candle_nn::linear(flat_dim, config.hidden, vs.pp(format!("fc{}", b)))?;
            let z_mean = candle_nn::linear(config.hidden, n_latent, vs.pp(format!("means{}", b)))?;
            let z_lnvar = candle_nn::linear(config.hidden, n_latent, vs.pp(format!("var{}", b)))?;

            branches.push(LayerwiseBranch {
                conv,
                fc,
                z_mean,
                z_lnvar,
            });
        }

        Ok(Self {
            n_latent,
            config,
            branches,
        })
    }

    pub fn num_branches(&self) -> usize {
        self.branches.len()
    }

    /// Branch-wise `(mean, log_var)` before they are added up
    pub fn branch_gaussian_params(&self, x_nchw: &Tensor) -> Result<Vec<(Tensor, Tensor)>> {
        self.branches
            .iter()
            .map(|b| b.latent_gaussian_params(x_nchw))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn small_config() -> LayerwiseConfig {
        LayerwiseConfig {
            hidden: 16,
            filters: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_layerwise_shapes_and_loss() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

        let image = ImageShape::new(16, 16, 1);
        let enc = LayerwiseConvEncoder::new(image, 5, small_config(), vb)?;
        assert_eq!(enc.num_branches(), 3);

        let x = Tensor::rand(0f32, 1f32, (7, 1, 16, 16), &dev)?;
        let latent = enc.forward_t(&x, true)?;

        assert_eq!(latent.mean.dims(), &[7, 5]);
        assert_eq!(latent.log_var.dims(), &[7, 5]);

        let loss = latent.regularizer.expect("independence loss");
        assert!(loss.dims().is_empty());
        let loss = loss.to_scalar::<f32>()?;
        assert!(loss.is_finite() && loss >= 0.0, "loss {}", loss);
        Ok(())
    }

    #[test]
    fn test_layerwise_mean_is_branch_sum() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

        let image = ImageShape::new(8, 8, 2);
        let enc = LayerwiseConvEncoder::new(image, 3, small_config(), vb)?;
        let x = Tensor::rand(0f32, 1f32, (4, 2, 8, 8), &dev)?;

        let latent = enc.forward_t(&x, false)?;
        let params = enc.branch_gaussian_params(&x)?;
        let mut mean = params[0].0.clone();
        for (m, _) in params.iter().skip(1) {
            mean = (mean + m)?;
        }

        let diff = latent.mean.sub(&mean)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert!(diff < 1e-5, "diff {}", diff);
        Ok(())
    }

    #[test]
    fn test_layerwise_zero_weight() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

        let config = LayerwiseConfig {
            independence_weight: 0.0,
            ..small_config()
        };
        let enc = LayerwiseConvEncoder::new(ImageShape::new(8, 8, 1), 2, config, vb)?;
        let x = Tensor::rand(0f32, 1f32, (3, 1, 8, 8), &dev)?;
        let loss = enc
            .forward_t(&x, true)?
            .regularizer
            .expect("loss")
            .to_scalar::<f32>()?;
        assert_eq!(loss, 0.0);
        Ok(())
    }

    #[test]
    fn test_layerwise_without_branches_fails() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = LayerwiseConfig {
            kernel_sizes: vec![],
            ..Default::default()
        };
        assert!(LayerwiseConvEncoder::new(ImageShape::default(), 4, config, vb).is_err());
    }

    #[test]
    fn test_layerwise_rejects_overflowing_cap() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let image = ImageShape::new(8, 8, 1);

        let five = LayerwiseConfig {
            kernel_sizes: vec![2, 4, 6, 8, 4],
            ..small_config()
        };
        assert!(LayerwiseConvEncoder::new(image, 2, five.clone(), vb.pp("a")).is_err());

        let lower_cap = LayerwiseConfig {
            max_likelihood: 5.0,
            ..five
        };
        let enc = LayerwiseConvEncoder::new(image, 2, lower_cap, vb.pp("b"))?;
        assert_eq!(enc.num_branches(), 5);
        Ok(())
    }
}
