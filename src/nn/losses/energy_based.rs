//! Energy-based GAN losses from "Energy-based Generative Adversarial Network"
//! (Zhao, Mathieu and LeCun, <https://arxiv.org/abs/1609.03126>).
//!
//! The discriminator is read as an energy function: low energy for real
//! samples, high energy for generated ones.
//!
//! | Dataset              | Margin |
//! |----------------------|--------|
//! | MNIST                | 10.0   |
//! | LSUN                 | 80.0   |
//! | CelebA               | 20.0   |
//! | ImageNet (128 x 128) | 40.0   |
//! | ImageNet (256 x 256) | 80.0   |
//!
//! Convergence is sensitive to the margin; the values above are the ones the
//! paper used.

use std::fmt;

use crate::{
    config::LossConfig,
    error::{AnvilError, AnvilResult},
    nn::{
        embeddings::EmbeddingsGuard,
        models::{Discriminator, DiscriminatorGrad, DiscriminatorOutput, Generator, LabelType},
        optimizers::Optimizer,
    },
    tensor::{randn, Device, Shape, Tensor},
};
use super::{
    base::{discriminator_train_ops, generator_train_ops},
    functional::{
        energy_based_discriminator_loss, energy_based_discriminator_loss_grad,
        energy_based_generator_loss, energy_based_generator_loss_grad,
        energy_based_pulling_away_term, energy_based_pulling_away_term_grad,
    },
    DiscriminatorLoss, DiscriminatorTrainOps, GeneratorLoss, GeneratorTrainOps, Reduction,
};

/// EBGAN generator loss `L(G) = D(G(z))`
pub struct EnergyBasedGeneratorLoss {
    reduction: Reduction,
    override_train_ops: Option<GeneratorTrainOps>,
}

impl EnergyBasedGeneratorLoss {
    pub fn new(reduction: Reduction) -> Self {
        Self {
            reduction,
            override_train_ops: None,
        }
    }

    pub fn from_config(config: &LossConfig) -> Self {
        Self::new(config.reduction)
    }

    /// Replace the default `train_ops` entirely
    pub fn with_override_train_ops<F>(mut self, train_ops: F) -> Self
    where
        F: Fn(&mut dyn Generator, &mut dyn Discriminator, &mut dyn Optimizer, Device, usize, Option<&[usize]>) -> AnvilResult<f32>
            + Send
            + Sync
            + 'static,
    {
        self.override_train_ops = Some(Box::new(train_ops));
        self
    }

    /// Generator loss for the discriminator's energies `dgz` on generated
    /// data, shape `(N, *)`. A scalar unless the reduction is `None`.
    pub fn forward(&self, dgz: &Tensor) -> Tensor {
        energy_based_generator_loss(dgz, self.reduction)
    }

    /// Gradient of [`Self::forward`] with respect to `dgz`
    pub fn backward(&self, dgz: &Tensor) -> Tensor {
        energy_based_generator_loss_grad(dgz, self.reduction)
    }
}

impl Default for EnergyBasedGeneratorLoss {
    fn default() -> Self {
        Self::new(Reduction::Mean)
    }
}

impl fmt::Debug for EnergyBasedGeneratorLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnergyBasedGeneratorLoss")
            .field("reduction", &self.reduction)
            .field("override_train_ops", &self.override_train_ops.is_some())
            .finish()
    }
}

impl GeneratorLoss for EnergyBasedGeneratorLoss {
    fn name(&self) -> &'static str {
        "EnergyBasedGeneratorLoss"
    }

    fn reduction(&self) -> Reduction {
        self.reduction
    }

    /// Runs the generic generator step with the discriminator's embeddings
    /// output switched off, then restores the flag.
    fn train_ops(
        &self,
        generator: &mut dyn Generator,
        discriminator: &mut dyn Discriminator,
        optimizer_generator: &mut dyn Optimizer,
        device: Device,
        batch_size: usize,
        labels: Option<&[usize]>,
    ) -> AnvilResult<f32> {
        if let Some(train_ops) = &self.override_train_ops {
            return train_ops(generator, discriminator, optimizer_generator, device, batch_size, labels);
        }

        let mut discriminator = EmbeddingsGuard::new(discriminator, false);
        generator_train_ops(
            generator,
            &mut *discriminator,
            optimizer_generator,
            device,
            batch_size,
            labels,
            |dgz| Ok((self.forward(dgz), self.backward(dgz))),
        )
    }
}

/// EBGAN pulling-away term
///
/// `f_PT(S) = 1/(N(N-1)) * sum_i sum_{j != i} (S_i . S_j / (|S_i| |S_j|))^2`
///
/// where `S` are the discriminator's embeddings of a generated batch of size
/// `N`. The term is always averaged over the batch.
pub struct EnergyBasedPullingAwayTerm {
    pt_ratio: f32,
    override_train_ops: Option<GeneratorTrainOps>,
}

impl EnergyBasedPullingAwayTerm {
    pub fn new(pt_ratio: f32) -> Self {
        Self {
            pt_ratio,
            override_train_ops: None,
        }
    }

    pub fn from_config(config: &LossConfig) -> Self {
        Self::new(config.pt_ratio)
    }

    /// Replace the default `train_ops` entirely
    pub fn with_override_train_ops<F>(mut self, train_ops: F) -> Self
    where
        F: Fn(&mut dyn Generator, &mut dyn Discriminator, &mut dyn Optimizer, Device, usize, Option<&[usize]>) -> AnvilResult<f32>
            + Send
            + Sync
            + 'static,
    {
        self.override_train_ops = Some(Box::new(train_ops));
        self
    }

    pub fn pt_ratio(&self) -> f32 {
        self.pt_ratio
    }

    /// `pt_ratio * f_PT(d_hid)`. `dgz` is accepted for signature parity with
    /// the other generator losses and does not enter the value.
    pub fn forward(&self, _dgz: &Tensor, d_hid: &Tensor) -> AnvilResult<Tensor> {
        Ok(energy_based_pulling_away_term(d_hid)?.scale(self.pt_ratio))
    }

    /// Gradient of [`Self::forward`] with respect to `d_hid`
    pub fn backward(&self, d_hid: &Tensor) -> AnvilResult<Tensor> {
        Ok(energy_based_pulling_away_term_grad(d_hid)?.scale(self.pt_ratio))
    }

    fn check_models(generator: &dyn Generator, discriminator: &dyn Discriminator) -> AnvilResult<()> {
        let embeddings = match discriminator.as_autoencoding() {
            Some(d) => d.embeddings(),
            None => {
                tracing::warn!("pulling-away term called with a score-only discriminator");
                return Err(AnvilError::ConfigurationError(
                    "EBGAN PT requires the Discriminator to be a AutoEncoder".to_string(),
                ));
            }
        };
        if generator.label_type() != LabelType::None {
            tracing::warn!(label_type = ?generator.label_type(), "pulling-away term called with a conditional generator");
            return Err(AnvilError::ConfigurationError(
                "EBGAN PT supports models which do not require labels".to_string(),
            ));
        }
        if !embeddings {
            tracing::warn!("pulling-away term called with discriminator embeddings disabled");
            return Err(AnvilError::ConfigurationError(
                "EBGAN PT requires the embeddings for loss computation".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EnergyBasedPullingAwayTerm {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl fmt::Debug for EnergyBasedPullingAwayTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnergyBasedPullingAwayTerm")
            .field("pt_ratio", &self.pt_ratio)
            .field("override_train_ops", &self.override_train_ops.is_some())
            .finish()
    }
}

impl GeneratorLoss for EnergyBasedPullingAwayTerm {
    fn name(&self) -> &'static str {
        "EnergyBasedPullingAwayTerm"
    }

    fn reduction(&self) -> Reduction {
        Reduction::Mean
    }

    /// Needs the hidden embedding as well as the score, so it runs its own
    /// step instead of the generic one. The discriminator must be an
    /// autoencoder with embeddings enabled and the generator unconditional;
    /// anything else is a `ConfigurationError` raised before any gradient is
    /// touched.
    fn train_ops(
        &self,
        generator: &mut dyn Generator,
        discriminator: &mut dyn Discriminator,
        optimizer_generator: &mut dyn Optimizer,
        device: Device,
        batch_size: usize,
        labels: Option<&[usize]>,
    ) -> AnvilResult<f32> {
        if let Some(train_ops) = &self.override_train_ops {
            return train_ops(generator, discriminator, optimizer_generator, device, batch_size, labels);
        }

        Self::check_models(generator, discriminator)?;

        let noise = randn(Shape::new([batch_size, generator.encoding_dims()]), device)?;
        optimizer_generator.zero_grad(&mut generator.parameters_mut());
        let fake = generator.forward(&noise, None)?;

        let (d_hid, dgz) = match discriminator.forward(&fake, None)? {
            DiscriminatorOutput::Embedded { hidden, score } => (hidden, score),
            DiscriminatorOutput::Score(_) => {
                return Err(AnvilError::InvalidState(
                    "discriminator reported embeddings enabled but returned only a score".to_string(),
                ));
            }
        };

        let value = self.forward(&dgz, &d_hid)?.item()?;
        let grad = DiscriminatorGrad {
            hidden: Some(self.backward(&d_hid)?),
            score: Tensor::zeros_like(&dgz),
        };
        let grad_fake = discriminator.backward(&fake, None, &grad)?;
        generator.backward(&noise, None, &grad_fake)?;
        optimizer_generator.step(&mut generator.parameters_mut())?;

        tracing::debug!(loss = value, batch_size, "pulling-away step");
        Ok(value)
    }
}

/// EBGAN discriminator loss `L(D) = D(x) + max(0, m - D(G(z)))`
pub struct EnergyBasedDiscriminatorLoss {
    reduction: Reduction,
    margin: f32,
    override_train_ops: Option<DiscriminatorTrainOps>,
}

impl EnergyBasedDiscriminatorLoss {
    pub fn new(reduction: Reduction, margin: f32) -> Self {
        Self {
            reduction,
            margin,
            override_train_ops: None,
        }
    }

    pub fn from_config(config: &LossConfig) -> Self {
        Self::new(config.reduction, config.margin)
    }

    /// Replace the default `train_ops` entirely
    pub fn with_override_train_ops<F>(mut self, train_ops: F) -> Self
    where
        F: Fn(&mut dyn Generator, &mut dyn Discriminator, &mut dyn Optimizer, &Tensor, Device, usize, Option<&[usize]>) -> AnvilResult<f32>
            + Send
            + Sync
            + 'static,
    {
        self.override_train_ops = Some(Box::new(train_ops));
        self
    }

    pub fn margin(&self) -> f32 {
        self.margin
    }

    /// Loss for real energies `dx` and generated energies `dgz`, both
    /// `(N, *)`. A scalar unless the reduction is `None`.
    pub fn forward(&self, dx: &Tensor, dgz: &Tensor) -> AnvilResult<Tensor> {
        energy_based_discriminator_loss(dx, dgz, self.margin, self.reduction)
    }

    /// Gradients of [`Self::forward`] with respect to `(dx, dgz)`
    pub fn backward(&self, dx: &Tensor, dgz: &Tensor) -> AnvilResult<(Tensor, Tensor)> {
        energy_based_discriminator_loss_grad(dx, dgz, self.margin, self.reduction)
    }
}

impl Default for EnergyBasedDiscriminatorLoss {
    fn default() -> Self {
        Self::new(Reduction::Mean, 80.0)
    }
}

impl fmt::Debug for EnergyBasedDiscriminatorLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnergyBasedDiscriminatorLoss")
            .field("reduction", &self.reduction)
            .field("margin", &self.margin)
            .field("override_train_ops", &self.override_train_ops.is_some())
            .finish()
    }
}

impl DiscriminatorLoss for EnergyBasedDiscriminatorLoss {
    fn name(&self) -> &'static str {
        "EnergyBasedDiscriminatorLoss"
    }

    fn reduction(&self) -> Reduction {
        self.reduction
    }

    /// Runs the generic discriminator step with the embeddings output
    /// switched off, then restores the flag.
    fn train_ops(
        &self,
        generator: &mut dyn Generator,
        discriminator: &mut dyn Discriminator,
        optimizer_discriminator: &mut dyn Optimizer,
        real_inputs: &Tensor,
        device: Device,
        batch_size: usize,
        labels: Option<&[usize]>,
    ) -> AnvilResult<f32> {
        if let Some(train_ops) = &self.override_train_ops {
            return train_ops(
                generator,
                discriminator,
                optimizer_discriminator,
                real_inputs,
                device,
                batch_size,
                labels,
            );
        }

        let mut discriminator = EmbeddingsGuard::new(discriminator, false);
        discriminator_train_ops(
            generator,
            &mut *discriminator,
            optimizer_discriminator,
            real_inputs,
            device,
            batch_size,
            labels,
            |dx, dgz| {
                let loss = self.forward(dx, dgz)?;
                let (grad_dx, grad_dgz) = self.backward(dx, dgz)?;
                Ok((loss, grad_dx, grad_dgz))
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::autograd::Parameter;
    use crate::nn::models::{
        AutoEncodingDenseDiscriminator, AutoEncodingDiscriminator, DenseDiscriminator, DenseGenerator,
    };
    use crate::nn::optimizers::SGD;
    use crate::tensor::manual_seed;

    /// Optimizer that only records how it was driven
    #[derive(Default)]
    struct CountingOptimizer {
        zeroed: usize,
        steps: usize,
    }

    impl Optimizer for CountingOptimizer {
        fn zero_grad(&mut self, _params: &mut [&mut Parameter]) {
            self.zeroed += 1;
        }

        fn step(&mut self, _params: &mut [&mut Parameter]) -> AnvilResult<()> {
            self.steps += 1;
            Ok(())
        }

        fn learning_rate(&self) -> f32 {
            0.0
        }

        fn set_learning_rate(&mut self, _lr: f32) {}
    }

    /// Generator whose forward pass always fails or panics
    struct BrokenGenerator {
        panics: bool,
    }

    impl Generator for BrokenGenerator {
        fn encoding_dims(&self) -> usize {
            2
        }

        fn forward(&self, _noise: &Tensor, _labels: Option<&[usize]>) -> AnvilResult<Tensor> {
            if self.panics {
                panic!("generator blew up");
            }
            Err(AnvilError::operation_error("forward", "generator blew up"))
        }

        fn backward(&mut self, _noise: &Tensor, _labels: Option<&[usize]>, _grad: &Tensor) -> AnvilResult<()> {
            Ok(())
        }

        fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
            Vec::new()
        }
    }

    fn autoencoder(embeddings: bool) -> AutoEncodingDenseDiscriminator {
        AutoEncodingDenseDiscriminator::new(4, 3).unwrap().with_embeddings(embeddings)
    }

    fn embeddings_of(d: &AutoEncodingDenseDiscriminator) -> bool {
        AutoEncodingDiscriminator::embeddings(d)
    }

    #[test]
    fn test_forward_values() {
        let g = EnergyBasedGeneratorLoss::default();
        let dgz = Tensor::from_slice(&[1.0, 3.0, 5.0]);
        assert!((g.forward(&dgz).item().unwrap() - 3.0).abs() < 1e-6);

        let d = EnergyBasedDiscriminatorLoss::new(Reduction::Mean, 10.0);
        let zeros = Tensor::from_slice(&[0.0, 0.0]);
        assert!((d.forward(&zeros, &zeros).unwrap().item().unwrap() - 10.0).abs() < 1e-6);

        let d = EnergyBasedDiscriminatorLoss::new(Reduction::Mean, 5.0);
        let loss = d
            .forward(&Tensor::from_slice(&[2.0, 4.0]), &Tensor::from_slice(&[10.0, 10.0]))
            .unwrap();
        assert!((loss.item().unwrap() - 3.0).abs() < 1e-6);

        let none = EnergyBasedGeneratorLoss::new(Reduction::None);
        assert_eq!(none.forward(&dgz), dgz);
    }

    #[test]
    fn test_pulling_away_forward_scales_by_ratio() {
        let pt = EnergyBasedPullingAwayTerm::new(0.25);
        let same = Tensor::from_rows(&[vec![3.0, 4.0], vec![3.0, 4.0]]).unwrap();
        let dgz = Tensor::from_slice(&[0.0, 0.0]);
        assert!((pt.forward(&dgz, &same).unwrap().item().unwrap() - 0.25).abs() < 1e-6);

        let orthogonal = Tensor::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert!(pt.forward(&dgz, &orthogonal).unwrap().item().unwrap().abs() < 1e-6);
        assert_eq!(pt.reduction(), Reduction::Mean);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(EnergyBasedDiscriminatorLoss::default().margin(), 80.0);
        assert_eq!(EnergyBasedPullingAwayTerm::default().pt_ratio(), 0.1);
        assert_eq!(EnergyBasedGeneratorLoss::default().reduction(), Reduction::Mean);
        let debug = format!("{:?}", EnergyBasedDiscriminatorLoss::default());
        assert!(debug.contains("margin: 80.0"));
    }

    #[test]
    fn test_generator_train_ops_restores_embeddings() {
        manual_seed(21);
        let loss = EnergyBasedGeneratorLoss::default();
        let mut g = DenseGenerator::new(2, 4).unwrap();
        let mut opt = SGD::new(0.01, 0.0, 0.0);

        for initial in [true, false] {
            let mut d = autoencoder(initial);
            let value = loss.train_ops(&mut g, &mut d, &mut opt, Device::Cpu, 8, None).unwrap();
            assert!(value.is_finite());
            assert_eq!(embeddings_of(&d), initial);
        }
    }

    #[test]
    fn test_generator_train_ops_restores_embeddings_on_error() {
        let loss = EnergyBasedGeneratorLoss::default();
        let mut g = DenseGenerator::new(2, 4).unwrap();
        let mut d = autoencoder(true);
        let mut opt = CountingOptimizer::default();

        let err = loss.train_ops(&mut g, &mut d, &mut opt, Device::Cuda(0), 8, None).unwrap_err();
        assert!(matches!(err, AnvilError::DeviceError(_)));
        assert!(embeddings_of(&d));

        let mut broken = BrokenGenerator { panics: false };
        assert!(loss.train_ops(&mut broken, &mut d, &mut opt, Device::Cpu, 8, None).is_err());
        assert!(embeddings_of(&d));
        assert_eq!(opt.steps, 0);
    }

    #[test]
    fn test_generator_train_ops_restores_embeddings_on_panic() {
        let loss = EnergyBasedGeneratorLoss::default();
        let mut broken = BrokenGenerator { panics: true };
        let mut d = autoencoder(true);
        let mut opt = CountingOptimizer::default();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            loss.train_ops(&mut broken, &mut d, &mut opt, Device::Cpu, 8, None)
        }));
        assert!(result.is_err());
        assert!(embeddings_of(&d));
    }

    #[test]
    fn test_generator_train_ops_with_score_only_discriminator() {
        manual_seed(22);
        let loss = EnergyBasedGeneratorLoss::new(Reduction::Sum);
        let mut g = DenseGenerator::new(2, 4).unwrap();
        let mut d = DenseDiscriminator::new(4).unwrap();
        let mut opt = CountingOptimizer::default();
        loss.train_ops(&mut g, &mut d, &mut opt, Device::Cpu, 4, None).unwrap();
        assert_eq!((opt.zeroed, opt.steps), (1, 1));
    }

    #[test]
    fn test_discriminator_train_ops_restores_embeddings() {
        manual_seed(23);
        let loss = EnergyBasedDiscriminatorLoss::new(Reduction::Mean, 1.0);
        let mut g = DenseGenerator::new(2, 4).unwrap();
        let mut opt = SGD::new(0.01, 0.0, 0.0);
        let real = randn(Shape::new([6, 4]), Device::Cpu).unwrap();

        for initial in [true, false] {
            let mut d = autoencoder(initial);
            let value = loss.train_ops(&mut g, &mut d, &mut opt, &real, Device::Cpu, 6, None).unwrap();
            assert!(value >= 0.0);
            assert_eq!(embeddings_of(&d), initial);
        }
    }

    #[test]
    fn test_discriminator_train_ops_restores_embeddings_on_error() {
        let loss = EnergyBasedDiscriminatorLoss::default();
        let mut broken = BrokenGenerator { panics: false };
        let mut d = autoencoder(true);
        let mut opt = CountingOptimizer::default();
        let real = Tensor::zeros(Shape::new([3, 4]));

        let err = loss.train_ops(&mut broken, &mut d, &mut opt, &real, Device::Cpu, 3, None).unwrap_err();
        assert!(matches!(err, AnvilError::OperationError { .. }));
        assert!(embeddings_of(&d));
        assert_eq!(opt.steps, 0);
    }

    #[test]
    fn test_discriminator_train_ops_restores_embeddings_on_panic() {
        let loss = EnergyBasedDiscriminatorLoss::default();
        let mut broken = BrokenGenerator { panics: true };
        let mut d = autoencoder(true);
        let mut opt = CountingOptimizer::default();
        let real = Tensor::zeros(Shape::new([3, 4]));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            loss.train_ops(&mut broken, &mut d, &mut opt, &real, Device::Cpu, 3, None)
        }));
        assert!(result.is_err());
        assert!(embeddings_of(&d));
        assert_eq!(opt.steps, 0);
    }

    #[test]
    fn test_pulling_away_rejects_score_only_discriminator() {
        let pt = EnergyBasedPullingAwayTerm::default();
        let mut g = DenseGenerator::new(2, 4).unwrap();
        let mut d = DenseDiscriminator::new(4).unwrap();
        let mut opt = CountingOptimizer::default();

        let err = pt.train_ops(&mut g, &mut d, &mut opt, Device::Cpu, 4, None).unwrap_err();
        assert!(matches!(err, AnvilError::ConfigurationError(ref m) if m.contains("AutoEncoder")));
        assert_eq!((opt.zeroed, opt.steps), (0, 0));
    }

    #[test]
    fn test_pulling_away_rejects_conditional_generator() {
        let pt = EnergyBasedPullingAwayTerm::default();
        let mut g = DenseGenerator::conditional(2, 4, 3, LabelType::Generated).unwrap();
        let mut d = autoencoder(true);
        let mut opt = CountingOptimizer::default();

        let err = pt.train_ops(&mut g, &mut d, &mut opt, Device::Cpu, 4, None).unwrap_err();
        assert!(matches!(err, AnvilError::ConfigurationError(ref m) if m.contains("labels")));
        assert_eq!(opt.steps, 0);
    }

    #[test]
    fn test_pulling_away_rejects_disabled_embeddings() {
        let pt = EnergyBasedPullingAwayTerm::default();
        let mut g = DenseGenerator::new(2, 4).unwrap();
        let mut d = autoencoder(false);
        let mut opt = CountingOptimizer::default();

        let err = pt.train_ops(&mut g, &mut d, &mut opt, Device::Cpu, 4, None).unwrap_err();
        assert!(matches!(err, AnvilError::ConfigurationError(ref m) if m.contains("embeddings")));
        assert_eq!(opt.steps, 0);
        assert!(!embeddings_of(&d));
    }

    #[test]
    fn test_pulling_away_train_ops_value_and_update() {
        let pt = EnergyBasedPullingAwayTerm::new(0.5);
        manual_seed(31);
        let mut g = DenseGenerator::new(3, 4).unwrap();
        let mut d = autoencoder(true);
        let reference_g = g.clone();
        let mut opt = SGD::new(0.1, 0.0, 0.0);

        manual_seed(99);
        let value = pt.train_ops(&mut g, &mut d, &mut opt, Device::Cpu, 5, None).unwrap();

        manual_seed(99);
        let noise = randn(Shape::new([5, 3]), Device::Cpu).unwrap();
        let fake = reference_g.forward(&noise, None).unwrap();
        let out = d.forward(&fake, None).unwrap();
        let expected = pt
            .forward(out.score(), out.hidden().unwrap())
            .unwrap()
            .item()
            .unwrap();

        assert!((value - expected).abs() < 1e-5);
        assert!(embeddings_of(&d));
        assert_ne!(
            g.parameters_mut()[0].value(),
            reference_g.clone().parameters_mut()[0].value()
        );
    }

    #[test]
    fn test_override_receives_arguments_and_passes_result_through() {
        let seen: Arc<Mutex<Vec<(usize, Device, usize, Option<Vec<usize>>, bool)>>> = Arc::default();
        let record = Arc::clone(&seen);
        let loss = EnergyBasedPullingAwayTerm::default().with_override_train_ops(
            move |g, d, _opt, device, batch_size, labels| {
                record.lock().unwrap().push((
                    g.encoding_dims(),
                    device,
                    batch_size,
                    labels.map(|l| l.to_vec()),
                    d.as_autoencoding().is_some(),
                ));
                Ok(42.5)
            },
        );

        // would fail every precondition without the override
        let mut g = DenseGenerator::conditional(7, 4, 2, LabelType::Required).unwrap();
        let mut d = DenseDiscriminator::new(4).unwrap();
        let mut opt = CountingOptimizer::default();
        let value = loss
            .train_ops(&mut g, &mut d, &mut opt, Device::Metal(1), 13, Some(&[1, 0]))
            .unwrap();

        assert_eq!(value, 42.5);
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[(7, Device::Metal(1), 13, Some(vec![1, 0]), false)]
        );
        assert_eq!((opt.zeroed, opt.steps), (0, 0));
    }

    #[test]
    fn test_generator_override_skips_embeddings_toggle() {
        let loss = EnergyBasedGeneratorLoss::default().with_override_train_ops(|_g, d, _opt, _device, _batch, _labels| {
            Ok(if d.as_autoencoding().map(|a| a.embeddings()).unwrap_or(false) { 1.0 } else { 0.0 })
        });
        let mut g = DenseGenerator::new(2, 4).unwrap();
        let mut d = autoencoder(true);
        let mut opt = CountingOptimizer::default();
        assert_eq!(loss.train_ops(&mut g, &mut d, &mut opt, Device::Cpu, 2, None).unwrap(), 1.0);
    }

    #[test]
    fn test_discriminator_override_receives_real_inputs() {
        let loss = EnergyBasedDiscriminatorLoss::default().with_override_train_ops(
            |_g, _d, _opt, real, device, batch_size, labels| {
                assert_eq!(device, Device::Cpu);
                assert_eq!(batch_size, 3);
                assert!(labels.is_none());
                Ok(real.sum().item()?)
            },
        );
        let mut g = DenseGenerator::new(2, 4).unwrap();
        let mut d = autoencoder(false);
        let mut opt = CountingOptimizer::default();
        let real = Tensor::ones(Shape::new([3, 4]));
        let value = loss.train_ops(&mut g, &mut d, &mut opt, &real, Device::Cpu, 3, None).unwrap();
        assert_eq!(value, 12.0);
        assert_eq!(opt.steps, 0);
    }

    #[test]
    fn test_ebgan_iteration_with_all_terms() {
        manual_seed(41);
        let d_loss = EnergyBasedDiscriminatorLoss::new(Reduction::Mean, 1.0);
        let g_loss = EnergyBasedGeneratorLoss::default();
        let pt = EnergyBasedPullingAwayTerm::default();
        let mut g = DenseGenerator::new(3, 4).unwrap();
        let mut d = autoencoder(true);
        let mut opt_g = SGD::new(0.05, 0.0, 0.0);
        let mut opt_d = SGD::new(0.05, 0.0, 0.0);

        for _ in 0..3 {
            let real = randn(Shape::new([8, 4]), Device::Cpu).unwrap();
            let d_value = d_loss.train_ops(&mut g, &mut d, &mut opt_d, &real, Device::Cpu, 8, None).unwrap();
            let g_value = g_loss.train_ops(&mut g, &mut d, &mut opt_g, Device::Cpu, 8, None).unwrap();
            // relies on the flag having been restored by the two calls above
            let pt_value = pt.train_ops(&mut g, &mut d, &mut opt_g, Device::Cpu, 8, None).unwrap();
            assert!(d_value.is_finite() && g_value.is_finite());
            assert!((0.0..=0.1 + 1e-6).contains(&pt_value));
        }
    }
}
