//! Random tensor construction

use std::cell::RefCell;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::error::{AnvilError, AnvilResult};
use super::core::{Shape, Tensor};
use super::devices::Device;

thread_local! {
    static RNG: RefCell<StdRng> = RefCell::new(StdRng::from_entropy());
}

/// Reseed the random generator of the current thread
pub fn manual_seed(seed: u64) {
    RNG.with(|rng| *rng.borrow_mut() = StdRng::seed_from_u64(seed));
}

/// Run `f` with the random generator of the current thread
pub fn with_rng<T>(f: impl FnOnce(&mut StdRng) -> T) -> T {
    RNG.with(|rng| f(&mut rng.borrow_mut()))
}

/// Tensor of standard normal samples, allocated on `device`
pub fn randn(shape: Shape, device: Device) -> AnvilResult<Tensor> {
    device.ensure_supported()?;
    let data = with_rng(|rng| {
        (0..shape.total_elements())
            .map(|_| rng.sample::<f32, _>(StandardNormal))
            .collect()
    });
    Tensor::from_vec(data, shape)
}

/// Tensor of samples drawn uniformly from `[low, high)`
pub fn uniform(shape: Shape, low: f32, high: f32) -> AnvilResult<Tensor> {
    if !(low < high) {
        return Err(AnvilError::InvalidInput(format!("Empty uniform range [{}, {})", low, high)));
    }
    let data = with_rng(|rng| {
        (0..shape.total_elements()).map(|_| rng.gen_range(low..high)).collect()
    });
    Tensor::from_vec(data, shape)
}

/// `count` class indices drawn uniformly from `[0, num_classes)`
pub fn randint(num_classes: usize, count: usize) -> AnvilResult<Vec<usize>> {
    if num_classes == 0 {
        return Err(AnvilError::InvalidInput("Cannot sample labels from zero classes".to_string()));
    }
    Ok(with_rng(|rng| (0..count).map(|_| rng.gen_range(0..num_classes)).collect()))
}

/// One-hot encoding `(n) -> (n, num_classes)`
pub fn one_hot(labels: &[usize], num_classes: usize) -> AnvilResult<Tensor> {
    let mut data = vec![0.0; labels.len() * num_classes];
    for (i, &label) in labels.iter().enumerate() {
        if label >= num_classes {
            return Err(AnvilError::InvalidInput(format!(
                "Label {} out of range for {} classes",
                label, num_classes
            )));
        }
        data[i * num_classes + label] = 1.0;
    }
    Tensor::from_vec(data, Shape::new([labels.len(), num_classes]))
}
