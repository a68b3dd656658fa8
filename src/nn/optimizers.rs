//! Optimizers

use serde::{Deserialize, Serialize};

use crate::{
    autograd::Parameter,
    error::{AnvilError, AnvilResult},
    tensor::Tensor,
};

/// Parameter update rule.
///
/// Optimizers do not own the parameters they update. Every call receives the
/// model's parameters in the same order, and per-parameter state is keyed by
/// position.
pub trait Optimizer: Send {
    /// Reset the accumulated gradient of every parameter
    fn zero_grad(&mut self, params: &mut [&mut Parameter]) {
        for param in params.iter_mut() {
            param.zero_grad();
        }
    }

    /// Apply one update from the accumulated gradients
    fn step(&mut self, params: &mut [&mut Parameter]) -> AnvilResult<()>;

    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, lr: f32);
}

/// Lazily sized per-parameter state buffers
fn ensure_state(state: &mut Vec<Tensor>, params: &[&mut Parameter], optimizer: &str) -> AnvilResult<()> {
    if state.is_empty() {
        *state = params.iter().map(|p| Tensor::zeros_like(p.value())).collect();
        return Ok(());
    }
    let matches = state.len() == params.len()
        && state.iter().zip(params.iter()).all(|(s, p)| s.shape() == p.value().shape());
    if !matches {
        return Err(AnvilError::InvalidState(format!(
            "{} was initialised for a different parameter set",
            optimizer
        )));
    }
    Ok(())
}

/// SGD optimizer with momentum and L2 weight decay
#[derive(Debug, Clone)]
pub struct SGD {
    lr: f32,
    momentum: f32,
    weight_decay: f32,
    velocity: Vec<Tensor>,
}

impl SGD {
    pub fn new(lr: f32, momentum: f32, weight_decay: f32) -> Self {
        Self {
            lr,
            momentum,
            weight_decay,
            velocity: Vec::new(),
        }
    }
}

impl Optimizer for SGD {
    fn step(&mut self, params: &mut [&mut Parameter]) -> AnvilResult<()> {
        ensure_state(&mut self.velocity, params, "SGD")?;

        for (param, velocity) in params.iter_mut().zip(self.velocity.iter_mut()) {
            let grad = param.grad().clone();
            let value = param.value_mut();
            for ((p, &g), v) in value
                .as_slice_mut()
                .iter_mut()
                .zip(grad.as_slice())
                .zip(velocity.as_slice_mut())
            {
                let g = g + self.weight_decay * *p;
                *v = self.momentum * *v + g;
                *p -= self.lr * *v;
            }
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }
}

/// Adam optimizer
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    weight_decay: f32,
    step_count: u32,
    first_moment: Vec<Tensor>,
    second_moment: Vec<Tensor>,
}

impl Adam {
    pub fn new(lr: f32, beta1: f32, beta2: f32, eps: f32, weight_decay: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
            step_count: 0,
            first_moment: Vec::new(),
            second_moment: Vec::new(),
        }
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [&mut Parameter]) -> AnvilResult<()> {
        ensure_state(&mut self.first_moment, params, "Adam")?;
        ensure_state(&mut self.second_moment, params, "Adam")?;

        self.step_count += 1;
        let bias1 = 1.0 - self.beta1.powi(self.step_count as i32);
        let bias2 = 1.0 - self.beta2.powi(self.step_count as i32);

        for ((param, m), v) in params
            .iter_mut()
            .zip(self.first_moment.iter_mut())
            .zip(self.second_moment.iter_mut())
        {
            let grad = param.grad().clone();
            let value = param.value_mut();
            for (((p, &g), m), v) in value
                .as_slice_mut()
                .iter_mut()
                .zip(grad.as_slice())
                .zip(m.as_slice_mut())
                .zip(v.as_slice_mut())
            {
                let g = g + self.weight_decay * *p;
                *m = self.beta1 * *m + (1.0 - self.beta1) * g;
                *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *p -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
            }
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }
}

/// Optimizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OptimizerConfig {
    Sgd { lr: f32, momentum: f32, weight_decay: f32 },
    Adam { lr: f32, beta1: f32, beta2: f32, eps: f32, weight_decay: f32 },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        // EBGAN paper settings
        OptimizerConfig::Adam {
            lr: 2e-4,
            beta1: 0.5,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }
}

impl OptimizerConfig {
    pub fn create_optimizer(&self) -> Box<dyn Optimizer> {
        match *self {
            OptimizerConfig::Sgd { lr, momentum, weight_decay } => {
                Box::new(SGD::new(lr, momentum, weight_decay))
            }
            OptimizerConfig::Adam { lr, beta1, beta2, eps, weight_decay } => {
                Box::new(Adam::new(lr, beta1, beta2, eps, weight_decay))
            }
        }
    }
}
