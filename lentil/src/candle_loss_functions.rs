use candle_core::{Result, Tensor};
use serde::{Deserialize, Serialize};

/// clip probabilities away from 0 and 1
pub const PROB_EPSILON: f64 = 1e-6;

/// largest `x` with a finite `exp(x)` in f32, rounded down
pub const F32_MAX_EXP: f64 = 88.0;

/// Elementwise log density of a diagonal Gaussian
///
/// log N(x; μ, σ²) = -0.5 * [ (x - μ)² / σ² + log σ² + log 2π ]
///
/// * `samples` - points to evaluate
/// * `mean` - mean of Gaussian distribution
/// * `log_var` - log variance of Gaussian distribution
///
pub fn gaussian_log_density(samples: &Tensor, mean: &Tensor, log_var: &Tensor) -> Result<Tensor> {
    let ln_2pi = (2.0 * std::f64::consts::PI).ln();
    let inv_sigma = log_var.neg()?.exp()?;
    let tmp = samples.sub(mean)?;
    ((tmp.sqr()?.mul(&inv_sigma)? + log_var)? + ln_2pi)? * (-0.5)
}

/// KL divergence loss between two Gaussian distributions
///
/// -0.5 * (1 + log(sigma^2) - mu^2 - sigma^2)
///
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
///
pub fn gaussian_kl_loss(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let z_var = z_lnvar.exp()?;
    (z_var - 1. + z_mean.powf(2.)? - z_lnvar)?.sum(z_mean.rank() - 1)? * 0.5
}

/// How the decoder output maps onto pixel intensities
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutputActivation {
    /// sigmoid(x)
    Logits,
    /// (tanh(x) + 1) / 2
    Tanh,
}

/// Reconstruction loss in observation space
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReconstructionLoss {
    Bernoulli,
    L2,
}

impl ReconstructionLoss {
    /// per-observation loss (n,)
    pub fn evaluate(
        &self,
        x_nchw: &Tensor,
        recon_logits: &Tensor,
        activation: OutputActivation,
    ) -> Result<Tensor> {
        match self {
            ReconstructionLoss::Bernoulli => bernoulli_loss(x_nchw, recon_logits, activation),
            ReconstructionLoss::L2 => l2_loss(x_nchw, recon_logits, activation),
        }
    }
}

/// Bernoulli reconstruction loss summed over all pixels
///
/// loss(i) = - sum_p x(i,p) log q(i,p) + (1 - x(i,p)) log (1 - q(i,p))
///
/// * `x` - observed images in [0, 1]
/// * `recon_logits` - decoder output
/// * `activation` - how to turn `recon_logits` into `q`
///
pub fn bernoulli_loss(
    x: &Tensor,
    recon_logits: &Tensor,
    activation: OutputActivation,
) -> Result<Tensor> {
    let x_np = x.flatten_from(1)?;
    let logits_np = recon_logits.flatten_from(1)?;

    let loss_np = match activation {
        OutputActivation::Logits => {
            // max(l, 0) - l * x + log(1 + exp(-|l|))
            let softplus = (logits_np.abs()?.neg()?.exp()? + 1.)?.log()?;
            ((logits_np.relu()? - logits_np.mul(&x_np)?)? + softplus)?
        }
        OutputActivation::Tanh => {
            let q_np = ((logits_np.tanh()? + 1.)? * 0.5)?.clamp(PROB_EPSILON, 1. - PROB_EPSILON)?;
            let log_q = q_np.log()?;
            let log_1mq = q_np.affine(-1., 1.)?.log()?;
            (x_np.mul(&log_q)? + x_np.affine(-1., 1.)?.mul(&log_1mq)?)?.neg()?
        }
    };
    loss_np.sum(1)
}

/// Squared error reconstruction loss summed over all pixels
///
/// loss(i) = sum_p [ x(i,p) - q(i,p) ]^2
///
pub fn l2_loss(x: &Tensor, recon_logits: &Tensor, activation: OutputActivation) -> Result<Tensor> {
    let x_np = x.flatten_from(1)?;
    let logits_np = recon_logits.flatten_from(1)?;
    let q_np = match activation {
        OutputActivation::Logits => candle_nn::ops::sigmoid(&logits_np)?,
        OutputActivation::Tanh => ((logits_np.tanh()? + 1.)? * 0.5)?,
    };
    x_np.sub(&q_np)?.sqr()?.sum(1)
}

/// One latent branch: a sample and the distribution it was drawn from
pub struct LatentBranch<'a> {
    pub z: &'a Tensor,
    pub mean: &'a Tensor,
    pub log_var: &'a Tensor,
}

/// The squared factorized term of [`independence_loss`] reaches
/// `exp(2 * num_branches * max_likelihood)`; refuse caps that would
/// overflow f32
pub fn check_likelihood_cap(num_branches: usize, max_likelihood: f64) -> Result<()> {
    if !(max_likelihood > 0.) {
        candle_core::bail!("max_likelihood must be positive, got {}", max_likelihood);
    }
    let exponent = 2. * num_branches as f64 * max_likelihood;
    if exponent > F32_MAX_EXP {
        candle_core::bail!(
            "{} branches with max_likelihood {} overflow the independence loss; \
             need 2 * branches * max_likelihood <= {}",
            num_branches,
            max_likelihood,
            F32_MAX_EXP
        );
    }
    Ok(())
}

/// Independence loss between latent branches
///
/// p(b,i) = min(cap, exp( sum_k log N(z(b,i,k); μ(b,i,k), σ²(b,i,k)) ))
/// joint(i) = sum_b exp(p(b,i))
/// factorized(i) = prod_b exp(p(b,i))
/// loss = weight * mean_i [ joint(i) - factorized(i) ]^2
///
/// * `branches` - samples with their branch distributions (n x k each)
/// * `weight` - multiplier of the loss
/// * `max_likelihood` - cap on each branch likelihood to keep `exp` finite
///
pub fn independence_loss(
    branches: &[LatentBranch],
    weight: f64,
    max_likelihood: f64,
) -> Result<Tensor> {
    if branches.is_empty() {
        candle_core::bail!("independence loss needs at least one latent branch");
    }

    let mut joint_n: Option<Tensor> = None;
    let mut log_factorized_n: Option<Tensor> = None;

    for b in branches {
        let llik_n = gaussian_log_density(b.z, b.mean, b.log_var)?.sum(b.z.rank() - 1)?;
        let lik_n = llik_n.exp()?.clamp(0., max_likelihood)?;

        joint_n = Some(match joint_n {
            None => lik_n.exp()?,
            Some(acc) => (acc + lik_n.exp()?)?,
        });

        // product of exp(.) is exp of the sum
        log_factorized_n = Some(match log_factorized_n {
            None => lik_n,
            Some(acc) => (acc + lik_n)?,
        });
    }

    let (joint_n, factorized_n) = match (joint_n, log_factorized_n) {
        (Some(j), Some(lf)) => (j, lf.exp()?),
        _ => candle_core::bail!("empty latent branches"),
    };

    joint_n.sub(&factorized_n)?.sqr()?.mean_all()? * weight
}
