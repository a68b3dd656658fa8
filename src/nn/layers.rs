//! Neural network layers

use serde::{Deserialize, Serialize};

use crate::{
    autograd::Parameter,
    error::{AnvilError, AnvilResult},
    tensor::{uniform, Shape, Tensor},
};

/// Pointwise activation applied after the affine map
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum Activation {
    #[default]
    Identity,
    Tanh,
    LeakyReLU(f32),
}

impl Activation {
    fn apply(&self, x: f32) -> f32 {
        match *self {
            Activation::Identity => x,
            Activation::Tanh => x.tanh(),
            Activation::LeakyReLU(slope) => if x > 0.0 { x } else { slope * x },
        }
    }

    /// Derivative at pre-activation `x`
    fn derivative(&self, x: f32) -> f32 {
        match *self {
            Activation::Identity => 1.0,
            Activation::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            Activation::LeakyReLU(slope) => if x > 0.0 { 1.0 } else { slope },
        }
    }
}

/// Fully connected layer `y = act(x W + b)`.
///
/// The layer keeps no activations between calls: `backward` recomputes the
/// pre-activation from the input it is given, so the same layer can be
/// differentiated for several inputs after a single forward pass each.
#[derive(Debug, Clone)]
pub struct DenseLayer {
    weight: Parameter,
    bias: Parameter,
    activation: Activation,
}

impl DenseLayer {
    /// Xavier-uniform initialised layer
    pub fn new(input_size: usize, output_size: usize, activation: Activation) -> AnvilResult<Self> {
        if input_size == 0 || output_size == 0 {
            return Err(AnvilError::InvalidInput(format!(
                "Dense layer dimensions must be positive, got {} -> {}",
                input_size, output_size
            )));
        }
        let bound = (6.0 / (input_size + output_size) as f32).sqrt();
        let weight = uniform(Shape::new([input_size, output_size]), -bound, bound)?;
        let bias = Tensor::zeros(Shape::new([output_size]));
        Self::from_weights(weight, bias, activation)
    }

    /// Layer with explicit weights `(in, out)` and bias `(out)`
    pub fn from_weights(weight: Tensor, bias: Tensor, activation: Activation) -> AnvilResult<Self> {
        if weight.shape().ndim() != 2 || bias.shape() != &Shape::new([weight.shape().dims[1]]) {
            return Err(AnvilError::shape_error(
                "weight [in, out] and bias [out]",
                &format!("weight {} and bias {}", weight.shape(), bias.shape()),
                None,
            ));
        }
        Ok(Self {
            weight: Parameter::new("weight", weight),
            bias: Parameter::new("bias", bias),
            activation,
        })
    }

    pub fn input_size(&self) -> usize {
        self.weight.value().shape().dims[0]
    }

    pub fn output_size(&self) -> usize {
        self.weight.value().shape().dims[1]
    }

    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    pub fn bias(&self) -> &Parameter {
        &self.bias
    }

    fn pre_activation(&self, input: &Tensor) -> AnvilResult<Tensor> {
        let mut z = input.matmul(self.weight.value())?;
        let out = self.output_size();
        let bias = self.bias.value().as_slice();
        for row in z.as_slice_mut().chunks_mut(out) {
            for (v, &b) in row.iter_mut().zip(bias) {
                *v += b;
            }
        }
        Ok(z)
    }

    pub fn forward(&self, input: &Tensor) -> AnvilResult<Tensor> {
        let z = self.pre_activation(input)?;
        Ok(z.map(|x| self.activation.apply(x)))
    }

    /// Accumulate parameter gradients for `input` and return `dL/d input`
    pub fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> AnvilResult<Tensor> {
        let z = self.pre_activation(input)?;
        let activation = self.activation;
        let grad_z = z.zip_map(grad_output, |x, g| g * activation.derivative(x))?;

        self.weight.accumulate_grad(&input.transpose()?.matmul(&grad_z)?)?;
        self.bias.accumulate_grad(&grad_z.sum_rows()?)?;

        grad_z.matmul(&self.weight.value().transpose()?)
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weight, &mut self.bias]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{max_gradient_error, numerical_gradient};
    use crate::tensor::manual_seed;

    fn layer(activation: Activation) -> DenseLayer {
        let weight = Tensor::from_rows(&[vec![0.5, -1.0], vec![0.25, 0.75], vec![-0.5, 0.1]]).unwrap();
        let bias = Tensor::from_slice(&[0.1, -0.2]);
        DenseLayer::from_weights(weight, bias, activation).unwrap()
    }

    #[test]
    fn test_forward_affine() {
        let l = layer(Activation::Identity);
        let x = Tensor::from_rows(&[vec![1.0, 0.0, 0.0], vec![0.0, 2.0, 0.0]]).unwrap();
        let y = l.forward(&x).unwrap();
        assert_eq!(y.shape(), &Shape::new([2, 2]));
        for (got, want) in y.as_slice().iter().zip([0.6, -1.2, 0.6, 1.3]) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        for activation in [Activation::Identity, Activation::Tanh, Activation::LeakyReLU(0.2)] {
            let mut l = layer(activation);
            let x = Tensor::from_rows(&[vec![0.3, -0.7, 1.1], vec![-0.4, 0.2, 0.9]]).unwrap();
            let upstream = Tensor::ones(Shape::new([2, 2]));

            let grad_x = l.backward(&x, &upstream).unwrap();
            let probe = l.clone();
            let numeric = numerical_gradient(
                |t| Ok(probe.forward(t)?.sum().item()?),
                &x,
                1e-3,
            )
            .unwrap();
            assert!(max_gradient_error(&grad_x, &numeric).unwrap() < 1e-2);

            // bias gradient of a summed output is the activation slope summed over the batch
            assert_eq!(l.bias().grad().shape(), &Shape::new([2]));
        }
    }

    #[test]
    fn test_new_initialises_within_bounds() {
        manual_seed(3);
        let l = DenseLayer::new(4, 2, Activation::Tanh).unwrap();
        let bound = (6.0f32 / 6.0).sqrt();
        assert!(l.weight().value().as_slice().iter().all(|w| w.abs() <= bound));
        assert_eq!(l.input_size(), 4);
        assert_eq!(l.output_size(), 2);
        assert!(DenseLayer::new(0, 2, Activation::Identity).is_err());
    }
}
