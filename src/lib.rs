//! Anvil EBGAN - energy-based GAN losses on a small CPU tensor core
//!
//! Features:
//! - Generator, discriminator and pulling-away losses from the EBGAN paper
//! - One-call training steps (`train_ops`) with explicit backpropagation
//! - Scoped control of autoencoding discriminators' embedding output
//! - Serializable loss configuration and reference dense models

pub mod autograd;
pub mod config;
pub mod error;
pub mod nn;
pub mod tensor;

pub use config::LossConfig;
pub use error::{AnvilError, AnvilResult};
pub use nn::losses::{
    DiscriminatorLoss, EnergyBasedDiscriminatorLoss, EnergyBasedGeneratorLoss,
    EnergyBasedPullingAwayTerm, GeneratorLoss, LossFactory, Reduction,
};
pub use nn::models::{
    AutoEncodingDiscriminator, Discriminator, DiscriminatorOutput, Generator, LabelType,
};
pub use tensor::{Device, Shape, Tensor};

/// Install a `tracing` subscriber for the process. Calling it again is a
/// no-op.
pub fn init() -> AnvilResult<()> {
    if tracing_subscriber::fmt::try_init().is_ok() {
        tracing::info!("Anvil EBGAN initialized");
    }
    Ok(())
}

/// Seed the random source used for noise and label sampling on this thread
pub fn set_seed(seed: u64) {
    tensor::manual_seed(seed);
}

/// Get the current framework version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
