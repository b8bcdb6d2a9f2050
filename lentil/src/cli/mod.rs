pub mod summary;

use clap::{Parser, Subcommand};

pub use summary::{ComputeDevice, SummaryArgs};

#[derive(Parser)]
#[command(name = "lentil")]
#[command(
    version,
    about = "Layerwise variational encoder/decoder architectures",
    long_about = "Build Gaussian encoders, decoders and discriminators for disentanglement\n\
		  and evaluate them on a minibatch of images."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(
        about = "Build an architecture and run one forward pass",
        long_about = "Build encoder, decoder and discriminator from a configuration,\n\
		      (1) encode a minibatch of random images,\n\
		      (2) sample latent states and decode them,\n\
		      (3) report reconstruction, KL, independence and total correlation losses.\n"
    )]
    Summary(SummaryArgs),
}
