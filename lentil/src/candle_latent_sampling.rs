use candle_core::{Result, Tensor};

///
/// z = mu + sigma * eps
/// where eps ~ N(0, 1)
///
/// # Arguments
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
pub fn sample_from_latent_distribution(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let eps = Tensor::randn_like(z_mean, 0., 1.)?;
    z_mean + (z_lnvar * 0.5)?.exp()? * eps
}

/// Sample while training; otherwise take the posterior mean
pub fn reparameterize(z_mean: &Tensor, z_lnvar: &Tensor, train: bool) -> Result<Tensor> {
    if train {
        sample_from_latent_distribution(z_mean, z_lnvar)
    } else {
        Ok(z_mean.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_sample_moments() -> Result<()> {
        let dev = Device::Cpu;
        let n = 20_000;
        let mean = (Tensor::ones((n, 2), DType::F32, &dev)? * 3.)?;
        let lnvar = Tensor::full(4f32.ln(), (n, 2), &dev)?;

        let z = sample_from_latent_distribution(&mean, &lnvar)?;
        assert_eq!(z.dims(), &[n, 2]);

        let avg = z.mean_all()?.to_scalar::<f32>()?;
        let var = z.affine(1., -3.)?.sqr()?.mean_all()?.to_scalar::<f32>()?;
        assert!((avg - 3.).abs() < 0.1, "mean {}", avg);
        assert!((var - 4.).abs() < 0.2, "variance {}", var);
        Ok(())
    }

    #[test]
    fn test_reparameterize_eval_is_mean() -> Result<()> {
        let dev = Device::Cpu;
        let mean = Tensor::randn(0f32, 1f32, (5, 3), &dev)?;
        let lnvar = Tensor::zeros((5, 3), DType::F32, &dev)?;
        let z = reparameterize(&mean, &lnvar, false)?;
        let diff = z.sub(&mean)?.abs()?.sum_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }
}
