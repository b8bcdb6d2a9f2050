use candle_core::{Result, Tensor};
use candle_nn::{Activation, Conv2d, ConvTranspose2d, Module, VarBuilder};

/// Nonlinearity applied after a stacked layer
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Nonlinearity {
    Relu,
    Tanh,
    LeakyRelu(f64),
}

impl Module for Nonlinearity {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Nonlinearity::Relu => Activation::Relu.forward(xs),
            Nonlinearity::Tanh => xs.tanh(),
            Nonlinearity::LeakyRelu(slope) => candle_nn::ops::leaky_relu(xs, *slope),
        }
    }
}

/// build a stack of alternating `M` and `A` layers
pub struct StackLayers<M>
where
    M: Module,
{
    module_layers: Vec<M>,
    activation_layers: Vec<Option<Nonlinearity>>,
}

impl<M> Module for StackLayers<M>
where
    M: Module,
{
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for (module, activation) in self.module_layers.iter().zip(self.activation_layers.iter()) {
            x = module.forward(&x)?;
            if let Some(activation) = activation {
                x = activation.forward(&x)?;
            }
        }
        Ok(x)
    }
}

impl<M> StackLayers<M>
where
    M: Module,
{
    pub fn new() -> Self {
        Self {
            module_layers: Vec::new(),
            activation_layers: Vec::new(),
        }
    }

    /// Appends a layer after all the current layers.
    pub fn push_with_act(&mut self, layer: M, activation: Nonlinearity) {
        self.module_layers.push(layer);
        self.activation_layers.push(Some(activation));
    }

    pub fn push(&mut self, layer: M) {
        self.module_layers.push(layer);
        self.activation_layers.push(None);
    }

    pub fn len(&self) -> usize {
        self.module_layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.module_layers.is_empty()
    }
}

impl<M> Default for StackLayers<M>
where
    M: Module,
{
    fn default() -> Self {
        Self::new()
    }
}

/// 2D convolution with "same" padding
///
/// The output has `ceil(in / stride)` rows and columns. Zeros are
/// added before the convolution, and when the total padding is odd
/// the extra row (column) goes to the bottom (right).
pub struct SameConv2d {
    conv: Conv2d,
    kernel_size: usize,
    stride: usize,
}

impl SameConv2d {
    /// `(before, after)` zero padding along a spatial axis of size `input_size`
    pub fn padding(&self, input_size: usize) -> (usize, usize) {
        same_padding(input_size, self.kernel_size, self.stride)
    }
}

impl Module for SameConv2d {
    fn forward(&self, x_nchw: &Tensor) -> Result<Tensor> {
        let (_, _, h, w) = x_nchw.dims4()?;
        let (top, bottom) = self.padding(h);
        let (left, right) = self.padding(w);
        let x_nchw = x_nchw
            .pad_with_zeros(2, top, bottom)?
            .pad_with_zeros(3, left, right)?;
        self.conv.forward(&x_nchw)
    }
}

/// `(before, after)` padding so that a convolution keeps `ceil(in / stride)` outputs
pub fn same_padding(input_size: usize, kernel_size: usize, stride: usize) -> (usize, usize) {
    let output_size = input_size.div_ceil(stride);
    let total = (output_size.saturating_sub(1) * stride + kernel_size).saturating_sub(input_size);
    (total / 2, total - total / 2)
}

pub fn same_conv2d(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride: usize,
    vb: VarBuilder,
) -> Result<SameConv2d> {
    if stride == 0 {
        candle_core::bail!("convolution stride must be positive");
    }
    let config = candle_nn::Conv2dConfig {
        stride,
        ..Default::default()
    };
    Ok(SameConv2d {
        conv: candle_nn::conv2d(in_channels, out_channels, kernel_size, config, vb)?,
        kernel_size,
        stride,
    })
}

/// 2D transposed convolution with "same" padding, i.e., the spatial
/// size is multiplied by `stride`
pub fn same_conv_transpose2d(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride: usize,
    vb: VarBuilder,
) -> Result<ConvTranspose2d> {
    // out = (in - 1) * s - 2p + k + op == in * s
    let excess = kernel_size as i64 - stride as i64;
    if excess < 0 {
        candle_core::bail!(
            "transposed conv kernel {} smaller than stride {}",
            kernel_size,
            stride
        );
    }
    let config = candle_nn::ConvTranspose2dConfig {
        padding: (excess as usize).div_ceil(2),
        output_padding: (excess as usize) % 2,
        stride,
        dilation: 1,
    };
    candle_nn::conv_transpose2d(in_channels, out_channels, kernel_size, config, vb)
}

/// spatial size after `same_conv2d`
pub fn same_conv2d_output_size(input_size: usize, stride: usize) -> usize {
    input_size.div_ceil(stride)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_same_conv_halves_spatial_dims() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

        let x = Tensor::rand(0f32, 1f32, (2, 3, 64, 64), &dev)?;
        for (j, &k) in [2, 4, 6, 8].iter().enumerate() {
            let conv = same_conv2d(3, 5, k, 2, vb.pp(format!("c{}", j)))?;
            let y = conv.forward(&x)?;
            assert_eq!(y.dims(), &[2, 5, 32, 32], "kernel {}", k);
            assert_eq!(same_conv2d_output_size(64, 2), 32);
        }
        Ok(())
    }

    #[test]
    fn test_same_conv_odd_input_pads_bottom_right() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

        // ceil(21 / 2) = 11 outputs need (11 - 1) * 2 + 4 - 21 = 3 padded zeros
        let x = Tensor::rand(0f32, 1f32, (1, 3, 21, 17), &dev)?;
        let conv = same_conv2d(3, 2, 4, 2, vb.pp("odd"))?;
        assert_eq!(conv.padding(21), (1, 2));
        assert_eq!(conv.forward(&x)?.dims(), &[1, 2, 11, 9]);
        assert_eq!(same_conv2d_output_size(21, 2), 11);

        // kernel smaller than stride needs no padding
        assert_eq!(same_padding(21, 1, 3), (0, 0));
        let conv = same_conv2d(3, 2, 1, 3, vb.pp("k1"))?;
        assert_eq!(conv.forward(&x)?.dims(), &[1, 2, 7, 6]);

        assert!(same_conv2d(3, 2, 4, 0, vb.pp("s0")).is_err());
        Ok(())
    }

    #[test]
    fn test_same_deconv_doubles_spatial_dims() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

        let x = Tensor::rand(0f32, 1f32, (2, 4, 8, 8), &dev)?;
        let deconv = same_conv_transpose2d(4, 3, 4, 2, vb.pp("d"))?;
        assert_eq!(deconv.forward(&x)?.dims(), &[2, 3, 16, 16]);

        let deconv = same_conv_transpose2d(4, 3, 3, 2, vb.pp("d3"))?;
        assert_eq!(deconv.forward(&x)?.dims(), &[2, 3, 16, 16]);
        Ok(())
    }

    #[test]
    fn test_stack_applies_activations() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

        let mut fc = StackLayers::<candle_nn::Linear>::new();
        fc.push_with_act(candle_nn::linear(4, 8, vb.pp("fc.0"))?, Nonlinearity::Relu);
        fc.push(candle_nn::linear(8, 2, vb.pp("fc.1"))?);
        assert_eq!(fc.len(), 2);

        let x = Tensor::randn(0f32, 1f32, (3, 4), &dev)?;
        assert_eq!(fc.forward(&x)?.dims(), &[3, 2]);

        let t = Nonlinearity::Tanh.forward(&(x * 100.)?)?;
        assert!(t.abs()?.max_all()?.to_scalar::<f32>()? <= 1.0);
        Ok(())
    }

    #[test]
    fn test_leaky_relu_slope() -> Result<()> {
        let x = Tensor::new(&[-5.0f32, -0.5, 0.0, 2.0], &Device::Cpu)?;
        let y = Nonlinearity::LeakyRelu(0.2).forward(&x)?.to_vec1::<f32>()?;
        let expected = [-1.0f32, -0.1, 0.0, 2.0];
        for (a, b) in y.iter().zip(expected.iter()) {
            approx::assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
        Ok(())
    }
}
