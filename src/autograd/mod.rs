//! Gradient bookkeeping
//!
//! Models in this crate differentiate themselves explicitly: every layer has
//! a `backward` that accumulates into its [`Parameter`]s and returns the
//! gradient with respect to its input. This module holds the parameter type
//! and a finite-difference checker used to validate those backward passes.

pub mod variable;

pub use variable::Parameter;

use crate::{
    error::AnvilResult,
    tensor::Tensor,
};

/// Central finite-difference gradient of a scalar function at `x`
pub fn numerical_gradient<F>(f: F, x: &Tensor, epsilon: f32) -> AnvilResult<Tensor>
where
    F: Fn(&Tensor) -> AnvilResult<f32>,
{
    let mut grad = Tensor::zeros_like(x);
    let mut probe = x.clone();

    for i in 0..x.numel() {
        let original = probe.as_slice()[i];

        probe.as_slice_mut()[i] = original + epsilon;
        let plus = f(&probe)?;
        probe.as_slice_mut()[i] = original - epsilon;
        let minus = f(&probe)?;
        probe.as_slice_mut()[i] = original;

        grad.as_slice_mut()[i] = (plus - minus) / (2.0 * epsilon);
    }

    Ok(grad)
}

/// Largest absolute difference between an analytical and a numerical gradient
pub fn max_gradient_error(analytical: &Tensor, numerical: &Tensor) -> AnvilResult<f32> {
    analytical.check_same_shape(numerical)?;
    let worst = analytical
        .as_slice()
        .iter()
        .zip(numerical.as_slice())
        .map(|(a, n)| (a - n).abs())
        .fold(0.0, f32::max);
    if worst > 1e-2 {
        tracing::warn!("Gradient mismatch: max abs error {}", worst);
    }
    Ok(worst)
}
