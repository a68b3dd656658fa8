//! Generic single-score training steps shared by generator and discriminator losses

use crate::{
    error::{AnvilError, AnvilResult, ErrorContext, WithContext},
    nn::{
        models::{Discriminator, DiscriminatorGrad, DiscriminatorOutput, Generator, LabelType},
        optimizers::Optimizer,
    },
    tensor::{randint, randn, Device, Shape, Tensor},
};

/// Score of a discriminator answering in score-only mode
fn score_only(output: DiscriminatorOutput, operation: &str) -> AnvilResult<Tensor> {
    match output {
        DiscriminatorOutput::Score(score) => Ok(score),
        DiscriminatorOutput::Embedded { .. } => Err(AnvilError::InvalidState(format!(
            "{}: discriminator returned (hidden, score) but the loss expects a score; \
             disable its embeddings output",
            operation
        ))),
    }
}

/// Backpropagation needs a single loss value.
fn scalar_loss(loss: &Tensor, operation: &str) -> AnvilResult<f32> {
    loss.item().map_err(|_| {
        AnvilError::InvalidState(format!(
            "{}: loss of shape {} is not a scalar; use a mean or sum reduction for training",
            operation,
            loss.shape()
        ))
    })
}

/// Labels a model consumes given its label type
fn labels_for<'a>(
    label_type: LabelType,
    labels: Option<&'a [usize]>,
    generated: Option<&'a [usize]>,
) -> Option<&'a [usize]> {
    match label_type {
        LabelType::None => None,
        LabelType::Required => labels,
        LabelType::Generated => generated,
    }
}

/// Labels the discriminator sees for a generated batch: the sampled ones when
/// the generator invented them, the supplied ones otherwise
fn fake_discriminator_labels<'a>(
    discriminator_type: LabelType,
    generator_type: LabelType,
    labels: Option<&'a [usize]>,
    generated: Option<&'a [usize]>,
) -> Option<&'a [usize]> {
    match (discriminator_type, generator_type) {
        (LabelType::None, _) => None,
        (_, LabelType::Generated) => generated,
        _ => labels,
    }
}

/// One generator update driven by a score-only criterion.
///
/// `criterion` maps the discriminator's scores on the generated batch to the
/// loss and its gradient with respect to those scores. The steps are: zero
/// the generator gradients, sample noise (and labels if the generator
/// generates its own), generate, score, backpropagate through discriminator
/// and generator, step `optimizer_generator`.
pub fn generator_train_ops<F>(
    generator: &mut dyn Generator,
    discriminator: &mut dyn Discriminator,
    optimizer_generator: &mut dyn Optimizer,
    device: Device,
    batch_size: usize,
    labels: Option<&[usize]>,
    criterion: F,
) -> AnvilResult<f32>
where
    F: Fn(&Tensor) -> AnvilResult<(Tensor, Tensor)>,
{
    let label_type = generator.label_type();
    if labels.is_none() && label_type == LabelType::Required {
        return Err(AnvilError::ConfigurationError(
            "GAN model requires labels for training".to_string(),
        ));
    }
    let batch_size = labels.map(|l| l.len()).unwrap_or(batch_size);

    let noise = randn(Shape::new([batch_size, generator.encoding_dims()]), device)?;
    optimizer_generator.zero_grad(&mut generator.parameters_mut());

    let generated = match label_type {
        LabelType::Generated => Some(randint(generator.num_classes(), batch_size)?),
        _ => None,
    };
    let g_labels = labels_for(label_type, labels, generated.as_deref());
    let d_labels = fake_discriminator_labels(
        discriminator.label_type(),
        label_type,
        labels,
        generated.as_deref(),
    );

    let fake = generator.forward(&noise, g_labels)?;
    let dgz = score_only(discriminator.forward(&fake, d_labels)?, "generator_train_ops")?;
    let (loss, grad_dgz) = criterion(&dgz).with_context(|| {
        ErrorContext::new("generator_train_ops")
            .with_shape(&dgz.shape().to_string())
            .with_device(&device.to_string())
    })?;
    let value = scalar_loss(&loss, "generator_train_ops")?;

    let grad_fake = discriminator.backward(&fake, d_labels, &DiscriminatorGrad::score(grad_dgz))?;
    generator.backward(&noise, g_labels, &grad_fake)?;
    optimizer_generator.step(&mut generator.parameters_mut())?;

    tracing::debug!(loss = value, batch_size, "generator step");
    Ok(value)
}

/// One discriminator update driven by a criterion over real and fake scores.
///
/// `criterion` maps `(dx, dgz)` to the loss and its gradients with respect
/// to both. The batch size is taken from `real_inputs`; the generated batch
/// is treated as a constant, so the generator's gradients are untouched.
#[allow(clippy::too_many_arguments)]
pub fn discriminator_train_ops<F>(
    generator: &mut dyn Generator,
    discriminator: &mut dyn Discriminator,
    optimizer_discriminator: &mut dyn Optimizer,
    real_inputs: &Tensor,
    device: Device,
    batch_size: usize,
    labels: Option<&[usize]>,
    criterion: F,
) -> AnvilResult<f32>
where
    F: Fn(&Tensor, &Tensor) -> AnvilResult<(Tensor, Tensor, Tensor)>,
{
    let g_type = generator.label_type();
    let d_type = discriminator.label_type();
    if labels.is_none() && (g_type == LabelType::Required || d_type == LabelType::Required) {
        return Err(AnvilError::ConfigurationError(
            "GAN model requires labels for training".to_string(),
        ));
    }
    let needs_generated = g_type == LabelType::Generated || d_type == LabelType::Generated;
    if needs_generated && generator.num_classes() == 0 {
        tracing::warn!(?g_type, ?d_type, "no class count to sample generated labels from");
        return Err(AnvilError::ConfigurationError(
            "generated labels need a generator with at least one class".to_string(),
        ));
    }

    let real_batch = real_inputs.batch_size();
    if real_batch != batch_size {
        tracing::trace!(real_batch, batch_size, "batch size taken from real inputs");
    }

    let noise = randn(Shape::new([real_batch, generator.encoding_dims()]), device)?;
    let generated = if needs_generated {
        Some(randint(generator.num_classes(), real_batch)?)
    } else {
        None
    };
    optimizer_discriminator.zero_grad(&mut discriminator.parameters_mut());

    let real_labels = labels_for(d_type, labels, generated.as_deref());
    let g_labels = labels_for(g_type, labels, generated.as_deref());
    let fake_labels = fake_discriminator_labels(d_type, g_type, labels, generated.as_deref());

    let dx = score_only(discriminator.forward(real_inputs, real_labels)?, "discriminator_train_ops")?;
    let fake = generator.forward(&noise, g_labels)?;
    let dgz = score_only(discriminator.forward(&fake, fake_labels)?, "discriminator_train_ops")?;

    let (loss, grad_dx, grad_dgz) = criterion(&dx, &dgz).with_context(|| {
        ErrorContext::new("discriminator_train_ops")
            .with_shape(&dx.shape().to_string())
            .with_shape(&dgz.shape().to_string())
            .with_device(&device.to_string())
    })?;
    let value = scalar_loss(&loss, "discriminator_train_ops")?;

    discriminator.backward(real_inputs, real_labels, &DiscriminatorGrad::score(grad_dx))?;
    discriminator.backward(&fake, fake_labels, &DiscriminatorGrad::score(grad_dgz))?;
    optimizer_discriminator.step(&mut discriminator.parameters_mut())?;

    tracing::debug!(loss = value, batch_size = real_batch, "discriminator step");
    Ok(value)
}
