//! Trainable parameters

use crate::{
    error::{AnvilError, AnvilResult},
    tensor::Tensor,
};

/// A trainable tensor together with its accumulated gradient
#[derive(Debug, Clone)]
pub struct Parameter {
    name: String,
    value: Tensor,
    grad: Tensor,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Tensor) -> Self {
        let grad = Tensor::zeros_like(&value);
        Self {
            name: name.into(),
            value,
            grad,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Tensor {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut Tensor {
        &mut self.value
    }

    pub fn grad(&self) -> &Tensor {
        &self.grad
    }

    pub fn numel(&self) -> usize {
        self.value.numel()
    }

    /// Add `grad` to the accumulated gradient
    pub fn accumulate_grad(&mut self, grad: &Tensor) -> AnvilResult<()> {
        if grad.shape() != self.value.shape() {
            return Err(AnvilError::shape_error(
                &self.value.shape().to_string(),
                &grad.shape().to_string(),
                Some(&format!("gradient for parameter '{}' has the wrong shape", self.name)),
            ));
        }
        self.grad.add_assign(grad)
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    /// Sum of squared gradient entries
    pub fn grad_norm_sq(&self) -> f32 {
        self.grad.as_slice().iter().map(|g| g * g).sum()
    }
}
