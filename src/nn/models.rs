//! Generator and discriminator interfaces plus small dense reference models

use serde::{Deserialize, Serialize};

use crate::{
    autograd::Parameter,
    error::{AnvilError, AnvilResult},
    nn::layers::{Activation, DenseLayer},
    tensor::{one_hot, Shape, Tensor},
};

/// How a model consumes class labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LabelType {
    /// Unconditional model
    #[default]
    None,
    /// Labels must be supplied by the data pipeline
    Required,
    /// Labels are sampled by the training step
    Generated,
}

/// Maps a batch of noise vectors to a batch of samples
pub trait Generator {
    /// Length of one noise vector
    fn encoding_dims(&self) -> usize;

    fn label_type(&self) -> LabelType {
        LabelType::None
    }

    fn num_classes(&self) -> usize {
        0
    }

    fn forward(&self, noise: &Tensor, labels: Option<&[usize]>) -> AnvilResult<Tensor>;

    /// Accumulate parameter gradients given `dL/d output`
    fn backward(&mut self, noise: &Tensor, labels: Option<&[usize]>, grad_output: &Tensor) -> AnvilResult<()>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;
}

/// What a discriminator returns for one batch
#[derive(Debug, Clone, PartialEq)]
pub enum DiscriminatorOutput {
    /// Score (energy) per sample
    Score(Tensor),
    /// Hidden embedding and score per sample
    Embedded { hidden: Tensor, score: Tensor },
}

impl DiscriminatorOutput {
    pub fn score(&self) -> &Tensor {
        match self {
            DiscriminatorOutput::Score(score) => score,
            DiscriminatorOutput::Embedded { score, .. } => score,
        }
    }

    pub fn hidden(&self) -> Option<&Tensor> {
        match self {
            DiscriminatorOutput::Score(_) => None,
            DiscriminatorOutput::Embedded { hidden, .. } => Some(hidden),
        }
    }
}

/// Upstream gradient for a [`DiscriminatorOutput`]
#[derive(Debug, Clone)]
pub struct DiscriminatorGrad {
    pub hidden: Option<Tensor>,
    pub score: Tensor,
}

impl DiscriminatorGrad {
    pub fn score(score: Tensor) -> Self {
        Self { hidden: None, score }
    }
}

/// Scores samples; lower energy means "more real"
pub trait Discriminator {
    fn label_type(&self) -> LabelType {
        LabelType::None
    }

    fn forward(&self, input: &Tensor, labels: Option<&[usize]>) -> AnvilResult<DiscriminatorOutput>;

    /// Accumulate parameter gradients and return `dL/d input`
    fn backward(&mut self, input: &Tensor, labels: Option<&[usize]>, grad: &DiscriminatorGrad) -> AnvilResult<Tensor>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    /// Embedding capability, if this discriminator has one
    fn as_autoencoding(&self) -> Option<&dyn AutoEncodingDiscriminator> {
        None
    }

    fn as_autoencoding_mut(&mut self) -> Option<&mut dyn AutoEncodingDiscriminator> {
        None
    }
}

/// Capability of discriminators that can also return their hidden embedding.
///
/// While `embeddings()` is true the discriminator answers with
/// [`DiscriminatorOutput::Embedded`], otherwise with a plain score.
pub trait AutoEncodingDiscriminator {
    fn embeddings(&self) -> bool;

    fn set_embeddings(&mut self, enabled: bool);
}

/// Append one-hot labels to the features when the model is conditional
fn conditioned_input(
    input: &Tensor,
    labels: Option<&[usize]>,
    label_type: LabelType,
    num_classes: usize,
) -> AnvilResult<Tensor> {
    let features = input.flatten_rows()?;
    if label_type == LabelType::None {
        return Ok(features);
    }
    let labels = labels.ok_or_else(|| {
        AnvilError::InvalidInput("conditional model called without labels".to_string())
    })?;
    if labels.len() != features.batch_size() {
        return Err(AnvilError::shape_error(
            &format!("{} labels", features.batch_size()),
            &format!("{} labels", labels.len()),
            None,
        ));
    }
    features.concat_cols(&one_hot(labels, num_classes)?)
}

/// Single dense layer generator with a tanh output
#[derive(Debug, Clone)]
pub struct DenseGenerator {
    encoding_dims: usize,
    num_classes: usize,
    label_type: LabelType,
    layer: DenseLayer,
}

impl DenseGenerator {
    pub fn new(encoding_dims: usize, output_dims: usize) -> AnvilResult<Self> {
        Ok(Self {
            encoding_dims,
            num_classes: 0,
            label_type: LabelType::None,
            layer: DenseLayer::new(encoding_dims, output_dims, Activation::Tanh)?,
        })
    }

    /// Conditional generator, labels are one-hot appended to the noise
    pub fn conditional(
        encoding_dims: usize,
        output_dims: usize,
        num_classes: usize,
        label_type: LabelType,
    ) -> AnvilResult<Self> {
        if label_type == LabelType::None || num_classes == 0 {
            return Err(AnvilError::InvalidInput(
                "conditional generator needs a label type and at least one class".to_string(),
            ));
        }
        Ok(Self {
            encoding_dims,
            num_classes,
            label_type,
            layer: DenseLayer::new(encoding_dims + num_classes, output_dims, Activation::Tanh)?,
        })
    }
}

impl Generator for DenseGenerator {
    fn encoding_dims(&self) -> usize {
        self.encoding_dims
    }

    fn label_type(&self) -> LabelType {
        self.label_type
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward(&self, noise: &Tensor, labels: Option<&[usize]>) -> AnvilResult<Tensor> {
        let input = conditioned_input(noise, labels, self.label_type, self.num_classes)?;
        self.layer.forward(&input)
    }

    fn backward(&mut self, noise: &Tensor, labels: Option<&[usize]>, grad_output: &Tensor) -> AnvilResult<()> {
        let input = conditioned_input(noise, labels, self.label_type, self.num_classes)?;
        self.layer.backward(&input, grad_output)?;
        Ok(())
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.layer.parameters_mut()
    }
}

/// Linear critic producing one score per sample
#[derive(Debug, Clone)]
pub struct DenseDiscriminator {
    input_dims: usize,
    num_classes: usize,
    label_type: LabelType,
    layer: DenseLayer,
}

impl DenseDiscriminator {
    pub fn new(input_dims: usize) -> AnvilResult<Self> {
        Ok(Self {
            input_dims,
            num_classes: 0,
            label_type: LabelType::None,
            layer: DenseLayer::new(input_dims, 1, Activation::Identity)?,
        })
    }

    pub fn conditional(input_dims: usize, num_classes: usize, label_type: LabelType) -> AnvilResult<Self> {
        if label_type == LabelType::None || num_classes == 0 {
            return Err(AnvilError::InvalidInput(
                "conditional discriminator needs a label type and at least one class".to_string(),
            ));
        }
        Ok(Self {
            input_dims,
            num_classes,
            label_type,
            layer: DenseLayer::new(input_dims + num_classes, 1, Activation::Identity)?,
        })
    }
}

impl Discriminator for DenseDiscriminator {
    fn label_type(&self) -> LabelType {
        self.label_type
    }

    fn forward(&self, input: &Tensor, labels: Option<&[usize]>) -> AnvilResult<DiscriminatorOutput> {
        let features = conditioned_input(input, labels, self.label_type, self.num_classes)?;
        let score = self.layer.forward(&features)?;
        let batch = score.batch_size();
        Ok(DiscriminatorOutput::Score(score.reshape(Shape::new([batch]))?))
    }

    fn backward(&mut self, input: &Tensor, labels: Option<&[usize]>, grad: &DiscriminatorGrad) -> AnvilResult<Tensor> {
        let features = conditioned_input(input, labels, self.label_type, self.num_classes)?;
        let grad_score = grad.score.reshape(Shape::new([features.batch_size(), 1]))?;
        let grad_features = self.layer.backward(&features, &grad_score)?;
        grad_features.narrow_cols(self.input_dims)?.reshape(input.shape().clone())
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.layer.parameters_mut()
    }
}

/// Autoencoder whose energy is the per-sample reconstruction error
/// `mean_k (dec(enc(x))_k - x_k)^2`. The encoder output is the embedding.
#[derive(Debug, Clone)]
pub struct AutoEncodingDenseDiscriminator {
    encoder: DenseLayer,
    decoder: DenseLayer,
    embeddings: bool,
}

impl AutoEncodingDenseDiscriminator {
    pub fn new(input_dims: usize, hidden_dims: usize) -> AnvilResult<Self> {
        Ok(Self {
            encoder: DenseLayer::new(input_dims, hidden_dims, Activation::LeakyReLU(0.2))?,
            decoder: DenseLayer::new(hidden_dims, input_dims, Activation::Identity)?,
            embeddings: false,
        })
    }

    pub fn with_embeddings(mut self, enabled: bool) -> Self {
        self.embeddings = enabled;
        self
    }

    fn reconstruct(&self, features: &Tensor) -> AnvilResult<(Tensor, Tensor)> {
        let hidden = self.encoder.forward(features)?;
        let reconstruction = self.decoder.forward(&hidden)?;
        Ok((hidden, reconstruction))
    }
}

impl Discriminator for AutoEncodingDenseDiscriminator {
    fn forward(&self, input: &Tensor, _labels: Option<&[usize]>) -> AnvilResult<DiscriminatorOutput> {
        let features = input.flatten_rows()?;
        let (hidden, reconstruction) = self.reconstruct(&features)?;
        let diff = reconstruction.sub(&features)?;
        let energy: Vec<f32> = diff
            .rows()
            .map(|row| row.iter().map(|d| d * d).sum::<f32>() / row.len() as f32)
            .collect();
        let score = Tensor::from_slice(&energy);

        if self.embeddings {
            Ok(DiscriminatorOutput::Embedded { hidden, score })
        } else {
            Ok(DiscriminatorOutput::Score(score))
        }
    }

    fn backward(&mut self, input: &Tensor, _labels: Option<&[usize]>, grad: &DiscriminatorGrad) -> AnvilResult<Tensor> {
        let features = input.flatten_rows()?;
        let (hidden, reconstruction) = self.reconstruct(&features)?;
        let diff = reconstruction.sub(&features)?;
        let dims = features.shape().row_len().max(1);
        if grad.score.numel() != features.batch_size() {
            return Err(AnvilError::shape_error(
                &format!("{} score gradients", features.batch_size()),
                &grad.score.shape().to_string(),
                None,
            ));
        }

        let mut grad_reconstruction = diff.clone();
        for (row, &g) in grad_reconstruction
            .as_slice_mut()
            .chunks_mut(dims)
            .zip(grad.score.as_slice())
        {
            for d in row.iter_mut() {
                *d *= 2.0 * g / dims as f32;
            }
        }

        let mut grad_hidden = self.decoder.backward(&hidden, &grad_reconstruction)?;
        if let Some(extra) = &grad.hidden {
            grad_hidden.add_assign(extra)?;
        }
        let grad_features = self
            .encoder
            .backward(&features, &grad_hidden)?
            .sub(&grad_reconstruction)?;
        grad_features.reshape(input.shape().clone())
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = self.encoder.parameters_mut();
        params.extend(self.decoder.parameters_mut());
        params
    }

    fn as_autoencoding(&self) -> Option<&dyn AutoEncodingDiscriminator> {
        Some(self)
    }

    fn as_autoencoding_mut(&mut self) -> Option<&mut dyn AutoEncodingDiscriminator> {
        Some(self)
    }
}

impl AutoEncodingDiscriminator for AutoEncodingDenseDiscriminator {
    fn embeddings(&self) -> bool {
        self.embeddings
    }

    fn set_embeddings(&mut self, enabled: bool) {
        self.embeddings = enabled;
    }
}
