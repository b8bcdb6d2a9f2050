pub mod candle_architecture;
pub mod candle_aux_layers;
pub mod candle_decoders;
pub mod candle_discriminator;
pub mod candle_encoder_conv;
pub mod candle_encoder_fc;
pub mod candle_encoder_layerwise;
pub mod candle_encoder_linear;
pub mod candle_latent_sampling;
pub mod candle_loss_functions;
pub mod candle_model_traits;
pub mod candle_vae_model;
pub mod cli;

pub use candle_core;
pub use candle_nn;
