use crate::candle_aux_layers::*;
use crate::candle_loss_functions::PROB_EPSILON;
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, ModuleT, VarBuilder};
use rand::seq::SliceRandom;
use rand::Rng;

pub const FC_DISCRIMINATOR_UNITS: usize = 1000;
pub const FC_DISCRIMINATOR_DEPTH: usize = 6;
pub const LEAKY_RELU_SLOPE: f64 = 0.2;

/// Fully connected discriminator (FactorVAE)
///
/// Tells latent codes `z ~ q(z)` (class 0) apart from codes with
/// independently shuffled dimensions (class 1).
pub struct FcDiscriminator {
    n_latent: usize,
    fc: StackLayers<Linear>,
    logits: Linear,
}

impl DiscriminatorModuleT for FcDiscriminator {
    fn forward_t(&self, z_nk: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let h_nl = self.fc.forward_t(&z_nk.flatten_from(1)?, train)?;
        let logits_n2 = self.logits.forward(&h_nl)?;
        let probs_n2 = candle_nn::ops::softmax(&logits_n2, 1)?;
        Ok((logits_n2, probs_n2))
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl FcDiscriminator {
    /// Will create variables `d1` ... `d6` and `logits`
    pub fn new(n_latent: usize, vs: VarBuilder) -> Result<Self> {
        let mut fc = StackLayers::<Linear>::new();
        let mut prev_dim = n_latent;
        for j in 0..FC_DISCRIMINATOR_DEPTH {
            let _name = format!("d{}", j + 1);
            fc.push_with_act(
                candle_nn::linear(prev_dim, FC_DISCRIMINATOR_UNITS, vs.pp(_name))?,
                Nonlinearity::LeakyRelu(LEAKY_RELU_SLOPE),
            );
            prev_dim = FC_DISCRIMINATOR_UNITS;
        }
        let logits = candle_nn::linear(prev_dim, 2, vs.pp("logits"))?;

        Ok(Self {
            n_latent,
            fc,
            logits,
        })
    }
}

/// Apply a discriminator and clip its probabilities into `[ε, 1 - ε]`
///
/// # Returns `(logits_n2, clipped_probs_n2)`
pub fn discriminate<D>(disc: &D, z_nk: &Tensor, train: bool) -> Result<(Tensor, Tensor)>
where
    D: DiscriminatorModuleT,
{
    let (logits, probs) = disc.forward_t(z_nk, train)?;
    let clipped = probs.clamp(PROB_EPSILON, 1. - PROB_EPSILON)?;
    Ok((logits, clipped))
}

/// Permute each latent dimension independently across the batch,
/// turning samples of `q(z)` into samples of `prod_k q(z_k)`
pub fn shuffle_latent_codes<R>(z_nk: &Tensor, rng: &mut R) -> Result<Tensor>
where
    R: Rng + ?Sized,
{
    let (n, kk) = z_nk.dims2()?;
    let device = z_nk.device();

    let columns = (0..kk)
        .map(|k| {
            let mut perm = (0..n as u32).collect::<Vec<u32>>();
            perm.shuffle(&mut *rng);
            let index = Tensor::from_vec(perm, n, device)?;
            z_nk.narrow(1, k, 1)?.contiguous()?.index_select(&index, 0)
        })
        .collect::<Result<Vec<_>>>()?;

    Tensor::cat(&columns, 1)
}

/// Density-ratio estimate of total correlation
///
/// TC ≈ mean_i [ logit(i,0) - logit(i,1) ]
pub fn total_correlation(logits_n2: &Tensor) -> Result<Tensor> {
    logits_n2
        .narrow(1, 0, 1)?
        .sub(&logits_n2.narrow(1, 1, 1)?)?
        .mean_all()
}

/// Cross entropy of the discriminator
///
/// -0.5 * mean log p(real = 0) - 0.5 * mean log p(shuffled = 1)
pub fn discriminator_loss(probs_real_n2: &Tensor, probs_shuffled_n2: &Tensor) -> Result<Tensor> {
    let real = probs_real_n2.narrow(1, 0, 1)?.log()?.mean_all()?;
    let shuffled = probs_shuffled_n2.narrow(1, 1, 1)?.log()?.mean_all()?;
    (real + shuffled)? * (-0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use rand::SeedableRng;

    #[test]
    fn test_discriminator_probabilities() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

        let disc = FcDiscriminator::new(4, vb)?;
        let z = (Tensor::randn(0f32, 1f32, (9, 4), &dev)? * 50.)?;
        let (logits, probs) = discriminate(&disc, &z, false)?;

        assert_eq!(logits.dims(), &[9, 2]);
        assert_eq!(probs.dims(), &[9, 2]);

        let lo = probs.min_all()?.to_scalar::<f32>()?;
        let hi = probs.max_all()?.to_scalar::<f32>()?;
        assert!(lo >= PROB_EPSILON as f32 && hi <= 1. - PROB_EPSILON as f32);

        for s in probs.sum(1)?.to_vec1::<f32>()? {
            assert_abs_diff_eq!(s, 1.0, epsilon = 1e-4);
        }
        Ok(())
    }

    #[test]
    fn test_shuffle_keeps_marginals() -> Result<()> {
        let dev = Device::Cpu;
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);

        let z = Tensor::arange(0f32, 30f32, &dev)?.reshape((10, 3))?;
        let shuffled = shuffle_latent_codes(&z, &mut rng)?;
        assert_eq!(shuffled.dims(), &[10, 3]);

        for k in 0..3 {
            let mut before = z.narrow(1, k, 1)?.flatten_all()?.to_vec1::<f32>()?;
            let mut after = shuffled.narrow(1, k, 1)?.flatten_all()?.to_vec1::<f32>()?;
            before.sort_by(|a, b| a.total_cmp(b));
            after.sort_by(|a, b| a.total_cmp(b));
            assert_eq!(before, after);
        }
        Ok(())
    }

    #[test]
    fn test_total_correlation_and_loss() -> Result<()> {
        let dev = Device::Cpu;
        let logits = Tensor::new(&[[2.0f64, 1.0], [0.0, 1.0]], &dev)?;
        let tc = total_correlation(&logits)?.to_scalar::<f64>()?;
        assert_abs_diff_eq!(tc, 0.0, epsilon = 1e-12);

        let half = Tensor::full(0.5f64, (3, 2), &dev)?;
        let loss = discriminator_loss(&half, &half)?.to_scalar::<f64>()?;
        assert_abs_diff_eq!(loss, 2f64.ln(), epsilon = 1e-12);
        Ok(())
    }
}
