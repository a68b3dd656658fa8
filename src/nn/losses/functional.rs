//! Energy-based loss kernels and their analytic gradients
//!
//! Every `*_grad` function returns the gradient of the corresponding loss with
//! respect to its inputs for an upstream gradient of one. With
//! [`Reduction::None`] that is the gradient of the elementwise sum.

use crate::{
    error::{AnvilError, AnvilResult, ErrorContext, WithContext},
    tensor::{Shape, Tensor},
};
use super::Reduction;

/// Lower clamp on embedding norms, matching L2 normalisation in common
/// frameworks.
const NORM_EPS: f32 = 1e-12;

pub fn reduce(x: &Tensor, reduction: Reduction) -> Tensor {
    match reduction {
        Reduction::None => x.clone(),
        Reduction::Mean => x.mean(),
        Reduction::Sum => x.sum(),
    }
}

/// Gradient of [`reduce`] with respect to `x`
pub fn reduce_grad(x: &Tensor, reduction: Reduction) -> Tensor {
    match reduction {
        Reduction::None | Reduction::Sum => Tensor::ones(x.shape().clone()),
        Reduction::Mean => Tensor::full(x.shape().clone(), 1.0 / x.numel().max(1) as f32),
    }
}

/// `L(G) = D(G(z))`
pub fn energy_based_generator_loss(dgz: &Tensor, reduction: Reduction) -> Tensor {
    reduce(dgz, reduction)
}

pub fn energy_based_generator_loss_grad(dgz: &Tensor, reduction: Reduction) -> Tensor {
    reduce_grad(dgz, reduction)
}

/// `L(D) = D(x) + max(0, m - D(G(z)))`
pub fn energy_based_discriminator_loss(
    dx: &Tensor,
    dgz: &Tensor,
    margin: f32,
    reduction: Reduction,
) -> AnvilResult<Tensor> {
    let energy = dx
        .zip_map(dgz, |real, fake| real + (margin - fake).max(0.0))
        .with_context(|| {
            ErrorContext::new("energy_based_discriminator_loss")
                .with_shape(&dx.shape().to_string())
                .with_shape(&dgz.shape().to_string())
                .with_suggestion("score real and generated batches of the same size")
        })?;
    Ok(reduce(&energy, reduction))
}

/// Gradients with respect to `(dx, dgz)`
pub fn energy_based_discriminator_loss_grad(
    dx: &Tensor,
    dgz: &Tensor,
    margin: f32,
    reduction: Reduction,
) -> AnvilResult<(Tensor, Tensor)> {
    dx.check_same_shape(dgz)?;
    let grad_dx = reduce_grad(dx, reduction);
    // hinge is flat once the fake energy clears the margin
    let grad_dgz = grad_dx.zip_map(dgz, |g, fake| if margin - fake > 0.0 { -g } else { 0.0 })?;
    Ok((grad_dx, grad_dgz))
}

fn unit_rows(s: &Tensor) -> AnvilResult<(Vec<Vec<f32>>, Vec<f32>)> {
    let flat = s.flatten_rows()?;
    if flat.batch_size() < 2 {
        return Err(AnvilError::InvalidInput(format!(
            "pulling-away term needs at least two embeddings, got shape {}",
            s.shape()
        )));
    }
    if flat.shape().row_len() == 0 {
        return Err(AnvilError::InvalidInput(format!(
            "pulling-away term needs non-empty embeddings, got shape {}",
            s.shape()
        )));
    }
    let mut units = Vec::with_capacity(flat.batch_size());
    let mut norms = Vec::with_capacity(flat.batch_size());
    for row in flat.rows() {
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        let denom = norm.max(NORM_EPS);
        units.push(row.iter().map(|v| v / denom).collect());
        norms.push(norm);
    }
    Ok((units, norms))
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Mean squared cosine similarity over all ordered pairs `i != j`:
///
/// `f_PT(S) = 1/(N(N-1)) * sum_i sum_{j != i} (S_i . S_j / (|S_i| |S_j|))^2`
///
/// Embeddings of shape `(N, *)` are flattened per sample. Returns a scalar.
pub fn energy_based_pulling_away_term(s: &Tensor) -> AnvilResult<Tensor> {
    let (units, _) = unit_rows(s)?;
    let n = units.len();

    let mut total = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            let c = dot(&units[i], &units[j]);
            total += 2.0 * c * c;
        }
    }
    Ok(Tensor::scalar(total / (n * (n - 1)) as f32))
}

/// Gradient of [`energy_based_pulling_away_term`] with respect to `s`
pub fn energy_based_pulling_away_term_grad(s: &Tensor) -> AnvilResult<Tensor> {
    let (units, norms) = unit_rows(s)?;
    let n = units.len();
    let dims = units[0].len();
    let scale = 4.0 / (n * (n - 1)) as f32;

    let mut grad = Vec::with_capacity(n * dims);
    for i in 0..n {
        let mut grad_unit = vec![0.0; dims];
        for j in (0..n).filter(|&j| j != i) {
            let c = dot(&units[i], &units[j]);
            for (g, &u) in grad_unit.iter_mut().zip(&units[j]) {
                *g += scale * c * u;
            }
        }

        if norms[i] > NORM_EPS {
            // project out the radial component: d(s/|s|)/ds = (I - u u^T) / |s|
            let radial = dot(&grad_unit, &units[i]);
            grad.extend(
                grad_unit
                    .iter()
                    .zip(&units[i])
                    .map(|(g, u)| (g - radial * u) / norms[i]),
            );
        } else {
            grad.extend(grad_unit.iter().map(|g| g / NORM_EPS));
        }
    }

    Tensor::from_vec(grad, Shape::new(s.shape().dims.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{max_gradient_error, numerical_gradient};

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_reduction_modes_agree() {
        let dgz = Tensor::from_rows(&[vec![1.0, 2.0], vec![3.0, 6.0]]).unwrap();
        let none = energy_based_generator_loss(&dgz, Reduction::None);
        assert_eq!(none, dgz);
        let mean = energy_based_generator_loss(&dgz, Reduction::Mean).item().unwrap();
        let sum = energy_based_generator_loss(&dgz, Reduction::Sum).item().unwrap();
        assert!(close(mean, none.mean().item().unwrap()));
        assert!(close(sum, none.sum().item().unwrap()));
    }

    #[test]
    fn test_generator_loss_mean() {
        let dgz = Tensor::from_slice(&[1.0, 3.0, 5.0]);
        assert!(close(energy_based_generator_loss(&dgz, Reduction::Mean).item().unwrap(), 3.0));
        assert_eq!(
            energy_based_generator_loss_grad(&dgz, Reduction::Sum).as_slice(),
            &[1.0, 1.0, 1.0]
        );
    }

    #[test]
    fn test_discriminator_loss_below_margin() {
        let zeros = Tensor::from_slice(&[0.0, 0.0]);
        let loss = energy_based_discriminator_loss(&zeros, &zeros, 10.0, Reduction::Mean).unwrap();
        assert!(close(loss.item().unwrap(), 10.0));
    }

    #[test]
    fn test_discriminator_loss_above_margin() {
        let dx = Tensor::from_slice(&[2.0, 4.0]);
        let dgz = Tensor::from_slice(&[10.0, 10.0]);
        let loss = energy_based_discriminator_loss(&dx, &dgz, 5.0, Reduction::Mean).unwrap();
        assert!(close(loss.item().unwrap(), 3.0));

        let per_sample = energy_based_discriminator_loss(&dx, &dgz, 5.0, Reduction::None).unwrap();
        assert_eq!(per_sample.as_slice(), &[2.0, 4.0]);
    }

    #[test]
    fn test_discriminator_loss_shape_mismatch() {
        let err = energy_based_discriminator_loss(
            &Tensor::from_slice(&[1.0, 2.0]),
            &Tensor::from_slice(&[1.0]),
            1.0,
            Reduction::Mean,
        )
        .unwrap_err();
        assert!(err.to_string().contains("energy_based_discriminator_loss"));
    }

    #[test]
    fn test_discriminator_loss_gradients() {
        let dx = Tensor::from_slice(&[1.0, 2.0, 3.0, 4.0]);
        let dgz = Tensor::from_slice(&[0.0, 6.0, 2.0, 9.0]);
        let (gdx, gdgz) = energy_based_discriminator_loss_grad(&dx, &dgz, 5.0, Reduction::Mean).unwrap();
        assert_eq!(gdx.as_slice(), &[0.25; 4]);
        assert_eq!(gdgz.as_slice(), &[-0.25, 0.0, -0.25, 0.0]);
    }

    #[test]
    fn test_pulling_away_identical_vectors() {
        let s = Tensor::from_rows(&[vec![3.0, 4.0], vec![3.0, 4.0]]).unwrap();
        let pt = energy_based_pulling_away_term(&s).unwrap();
        assert_eq!(pt.shape(), &Shape::scalar());
        assert!(close(pt.item().unwrap(), 1.0));
    }

    #[test]
    fn test_pulling_away_orthogonal_vectors() {
        let s = Tensor::from_rows(&[
            vec![1.0, 0.0, 0.0],
            vec![0.0, 2.0, 0.0],
            vec![0.0, 0.0, 5.0],
        ])
        .unwrap();
        assert!(close(energy_based_pulling_away_term(&s).unwrap().item().unwrap(), 0.0));
    }

    #[test]
    fn test_pulling_away_is_scale_invariant() {
        let s = Tensor::from_rows(&[vec![1.0, 2.0], vec![-1.0, 0.5], vec![0.3, 0.3]]).unwrap();
        let a = energy_based_pulling_away_term(&s).unwrap().item().unwrap();
        let b = energy_based_pulling_away_term(&s.scale(7.0)).unwrap().item().unwrap();
        assert!(close(a, b));
    }

    #[test]
    fn test_pulling_away_needs_two_samples() {
        let s = Tensor::from_rows(&[vec![1.0, 2.0]]).unwrap();
        assert!(matches!(
            energy_based_pulling_away_term(&s),
            Err(AnvilError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_pulling_away_rejects_empty_embeddings() {
        let s = Tensor::from_vec(vec![], Shape::new([3, 0])).unwrap();
        assert!(matches!(
            energy_based_pulling_away_term(&s),
            Err(AnvilError::InvalidInput(_))
        ));
        assert!(matches!(
            energy_based_pulling_away_term_grad(&s),
            Err(AnvilError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_pulling_away_gradient_matches_finite_differences() {
        let s = Tensor::from_vec(
            vec![0.5, -1.0, 0.25, 1.5, 0.75, 0.1, -0.6, 0.9, 0.4, 1.2, -0.3, 0.8],
            Shape::new([3, 2, 2]),
        )
        .unwrap();
        let analytical = energy_based_pulling_away_term_grad(&s).unwrap();
        assert_eq!(analytical.shape(), s.shape());
        let numeric = numerical_gradient(
            |t| energy_based_pulling_away_term(t)?.item(),
            &s,
            1e-3,
        )
        .unwrap();
        assert!(max_gradient_error(&analytical, &numeric).unwrap() < 1e-2);
    }
}
