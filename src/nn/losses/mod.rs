//! Adversarial losses for energy-based GANs
//!
//! A loss object owns its hyperparameters and knows how to run one complete
//! optimization step for its term (`train_ops`). The generic steps in
//! [`base`] cover losses that only need discriminator scores; losses that
//! need more than that implement the step themselves.

pub mod base;
pub mod energy_based;
pub mod functional;

pub use base::{discriminator_train_ops, generator_train_ops};
pub use energy_based::*;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    config::LossConfig,
    error::{AnvilError, AnvilResult},
    nn::{
        models::{Discriminator, Generator},
        optimizers::Optimizer,
    },
    tensor::{Device, Tensor},
};

/// Reduction types for loss functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    /// No reduction - return loss for each sample
    None,
    /// Mean reduction - average over all samples
    #[default]
    Mean,
    /// Sum reduction - sum over all samples
    Sum,
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reduction::None => "none",
            Reduction::Mean => "mean",
            Reduction::Sum => "sum",
        };
        f.write_str(name)
    }
}

impl FromStr for Reduction {
    type Err = AnvilError;

    fn from_str(s: &str) -> AnvilResult<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Reduction::None),
            "mean" => Ok(Reduction::Mean),
            "sum" => Ok(Reduction::Sum),
            _ => Err(AnvilError::InvalidInput(format!("Unknown reduction: {}", s))),
        }
    }
}

/// Replacement for a generator loss's default `train_ops`
pub type GeneratorTrainOps = Box<
    dyn Fn(
            &mut dyn Generator,
            &mut dyn Discriminator,
            &mut dyn Optimizer,
            Device,
            usize,
            Option<&[usize]>,
        ) -> AnvilResult<f32>
        + Send
        + Sync,
>;

/// Replacement for a discriminator loss's default `train_ops`
pub type DiscriminatorTrainOps = Box<
    dyn Fn(
            &mut dyn Generator,
            &mut dyn Discriminator,
            &mut dyn Optimizer,
            &Tensor,
            Device,
            usize,
            Option<&[usize]>,
        ) -> AnvilResult<f32>
        + Send
        + Sync,
>;

/// A loss that updates the generator
pub trait GeneratorLoss: Send + Sync {
    fn name(&self) -> &'static str;

    fn reduction(&self) -> Reduction;

    /// Run one optimization step on `generator` and return the loss value
    fn train_ops(
        &self,
        generator: &mut dyn Generator,
        discriminator: &mut dyn Discriminator,
        optimizer_generator: &mut dyn Optimizer,
        device: Device,
        batch_size: usize,
        labels: Option<&[usize]>,
    ) -> AnvilResult<f32>;
}

/// A loss that updates the discriminator
pub trait DiscriminatorLoss: Send + Sync {
    fn name(&self) -> &'static str;

    fn reduction(&self) -> Reduction;

    /// Run one optimization step on `discriminator` and return the loss value
    #[allow(clippy::too_many_arguments)]
    fn train_ops(
        &self,
        generator: &mut dyn Generator,
        discriminator: &mut dyn Discriminator,
        optimizer_discriminator: &mut dyn Optimizer,
        real_inputs: &Tensor,
        device: Device,
        batch_size: usize,
        labels: Option<&[usize]>,
    ) -> AnvilResult<f32>;
}

/// Loss function factory for creating loss functions by name
pub struct LossFactory;

impl LossFactory {
    /// Create a generator-side loss by name
    pub fn create_generator_loss(name: &str, config: &LossConfig) -> AnvilResult<Box<dyn GeneratorLoss>> {
        config.validate()?;
        match name.to_lowercase().as_str() {
            "ebgan" | "energy_based" => {
                Ok(Box::new(EnergyBasedGeneratorLoss::new(config.reduction)))
            },
            "ebgan_pt" | "pulling_away" => {
                Ok(Box::new(EnergyBasedPullingAwayTerm::new(config.pt_ratio)))
            },
            _ => Err(AnvilError::InvalidInput(format!("Unknown generator loss: {}", name))),
        }
    }

    /// Create a discriminator-side loss by name
    pub fn create_discriminator_loss(name: &str, config: &LossConfig) -> AnvilResult<Box<dyn DiscriminatorLoss>> {
        config.validate()?;
        match name.to_lowercase().as_str() {
            "ebgan" | "energy_based" => {
                Ok(Box::new(EnergyBasedDiscriminatorLoss::new(config.reduction, config.margin)))
            },
            _ => Err(AnvilError::InvalidInput(format!("Unknown discriminator loss: {}", name))),
        }
    }

    /// List all available loss functions
    pub fn available_losses() -> Vec<&'static str> {
        vec![
            "ebgan",
            "energy_based",
            "ebgan_pt",
            "pulling_away",
        ]
    }
}
