//! Core tensor types and fundamental operations

use std::fmt::{self, Display};

use crate::error::{AnvilError, AnvilResult};
use super::devices::Device;

/// Row-major shape. The first dimension is always the batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    pub dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self { dims: dims.into() }
    }

    /// Zero-dimensional shape of a scalar
    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    pub fn total_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.dims
    }

    /// Size of the leading dimension, 1 for scalars
    pub fn batch(&self) -> usize {
        self.dims.first().copied().unwrap_or(1)
    }

    /// Number of elements per batch entry
    pub fn row_len(&self) -> usize {
        self.dims.iter().skip(1).product()
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.dims.iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", "))
    }
}

/// Dense f32 tensor
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Shape,
    device: Device,
}

impl Tensor {
    pub fn zeros(shape: Shape) -> Self {
        Self::full(shape, 0.0)
    }

    pub fn ones(shape: Shape) -> Self {
        Self::full(shape, 1.0)
    }

    pub fn full(shape: Shape, value: f32) -> Self {
        Self {
            data: vec![value; shape.total_elements()],
            shape,
            device: Device::Cpu,
        }
    }

    pub fn zeros_like(other: &Tensor) -> Self {
        Self::zeros(other.shape.clone())
    }

    pub fn scalar(value: f32) -> Self {
        Self {
            data: vec![value],
            shape: Shape::scalar(),
            device: Device::Cpu,
        }
    }

    pub fn from_vec(data: Vec<f32>, shape: Shape) -> AnvilResult<Self> {
        if data.len() != shape.total_elements() {
            return Err(AnvilError::shape_error(
                &format!("{} elements for shape {}", shape.total_elements(), shape),
                &format!("{} elements", data.len()),
                None,
            ));
        }
        Ok(Self {
            data,
            shape,
            device: Device::Cpu,
        })
    }

    /// 1-D tensor of shape `[len]`
    pub fn from_slice(data: &[f32]) -> Self {
        Self {
            data: data.to_vec(),
            shape: Shape::new([data.len()]),
            device: Device::Cpu,
        }
    }

    /// 2-D tensor built from equally long rows
    pub fn from_rows(rows: &[Vec<f32>]) -> AnvilResult<Self> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != cols) {
            return Err(AnvilError::InvalidInput("All rows must have the same length".to_string()));
        }
        let data = rows.iter().flatten().copied().collect();
        Self::from_vec(data, Shape::new([rows.len(), cols]))
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn batch_size(&self) -> usize {
        self.shape.batch()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_slice_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Value of a single-element tensor
    pub fn item(&self) -> AnvilResult<f32> {
        if self.data.len() != 1 {
            return Err(AnvilError::InvalidState(format!(
                "only one element tensors can be converted to a scalar, got shape {}",
                self.shape
            )));
        }
        Ok(self.data[0])
    }

    pub fn reshape(&self, shape: Shape) -> AnvilResult<Self> {
        if shape.total_elements() != self.numel() {
            return Err(AnvilError::shape_error(
                &format!("{} elements", self.numel()),
                &format!("shape {}", shape),
                Some("reshape must preserve the element count"),
            ));
        }
        Ok(Self {
            data: self.data.clone(),
            shape,
            device: self.device,
        })
    }

    /// View every batch entry as a flat row: `(N, *) -> (N, prod(*))`
    pub fn flatten_rows(&self) -> AnvilResult<Self> {
        let batch = self.batch_size();
        let row_len = if self.shape.ndim() <= 1 { 1 } else { self.shape.row_len() };
        self.reshape(Shape::new([batch, row_len]))
    }

    /// One slice per batch entry, empty when the entries have no elements
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        let row_len = self.shape.row_len();
        (0..self.batch_size()).map(move |i| &self.data[i * row_len..(i + 1) * row_len])
    }

    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(f32) -> f32,
    {
        Self {
            data: self.data.iter().map(|&x| f(x)).collect(),
            shape: self.shape.clone(),
            device: self.device,
        }
    }

    /// Elementwise combination of two tensors of identical shape
    pub fn zip_map<F>(&self, other: &Tensor, f: F) -> AnvilResult<Self>
    where
        F: Fn(f32, f32) -> f32,
    {
        self.check_same_shape(other)?;
        Ok(Self {
            data: self.data.iter().zip(other.data.iter()).map(|(&a, &b)| f(a, b)).collect(),
            shape: self.shape.clone(),
            device: self.device,
        })
    }

    pub fn add(&self, other: &Tensor) -> AnvilResult<Self> {
        self.zip_map(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &Tensor) -> AnvilResult<Self> {
        self.zip_map(other, |a, b| a - b)
    }

    pub fn scale(&self, factor: f32) -> Self {
        self.map(|x| x * factor)
    }

    pub fn add_assign(&mut self, other: &Tensor) -> AnvilResult<()> {
        self.check_same_shape(other)?;
        for (a, &b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
        Ok(())
    }

    pub fn fill(&mut self, value: f32) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    pub fn sum(&self) -> Tensor {
        Tensor::scalar(self.data.iter().sum())
    }

    pub fn mean(&self) -> Tensor {
        if self.data.is_empty() {
            return Tensor::scalar(f32::NAN);
        }
        Tensor::scalar(self.data.iter().sum::<f32>() / self.data.len() as f32)
    }

    pub fn check_same_shape(&self, other: &Tensor) -> AnvilResult<()> {
        if self.shape != other.shape {
            return Err(AnvilError::shape_error(
                &self.shape.to_string(),
                &other.shape.to_string(),
                Some("elementwise operations need tensors of identical shape"),
            ));
        }
        Ok(())
    }

    fn check_matrix(&self, operation: &str) -> AnvilResult<(usize, usize)> {
        if self.shape.ndim() != 2 {
            return Err(AnvilError::operation_error(
                operation,
                &format!("expected a 2-D tensor, got shape {}", self.shape),
            ));
        }
        Ok((self.shape.dims[0], self.shape.dims[1]))
    }

    /// `(n, k) x (k, m) -> (n, m)`
    pub fn matmul(&self, other: &Tensor) -> AnvilResult<Self> {
        let (n, k) = self.check_matrix("matmul")?;
        let (k2, m) = other.check_matrix("matmul")?;
        if k != k2 {
            return Err(AnvilError::shape_error(
                &format!("[{}, *]", k),
                &other.shape.to_string(),
                Some("inner dimensions of matmul must agree"),
            ));
        }

        let mut out = vec![0.0; n * m];
        for i in 0..n {
            for p in 0..k {
                let a = self.data[i * k + p];
                if a == 0.0 {
                    continue;
                }
                let row = &other.data[p * m..(p + 1) * m];
                for (o, &b) in out[i * m..(i + 1) * m].iter_mut().zip(row) {
                    *o += a * b;
                }
            }
        }
        Self::from_vec(out, Shape::new([n, m]))
    }

    pub fn transpose(&self) -> AnvilResult<Self> {
        let (n, m) = self.check_matrix("transpose")?;
        let mut out = vec![0.0; n * m];
        for i in 0..n {
            for j in 0..m {
                out[j * n + i] = self.data[i * m + j];
            }
        }
        Self::from_vec(out, Shape::new([m, n]))
    }

    /// Sum over the batch dimension of a 2-D tensor: `(n, m) -> (m)`
    pub fn sum_rows(&self) -> AnvilResult<Self> {
        let (_, m) = self.check_matrix("sum_rows")?;
        let mut out = vec![0.0; m];
        for row in self.data.chunks(m) {
            for (o, &v) in out.iter_mut().zip(row) {
                *o += v;
            }
        }
        Ok(Self::from_slice(&out))
    }

    /// Concatenate two 2-D tensors along the feature dimension
    pub fn concat_cols(&self, other: &Tensor) -> AnvilResult<Self> {
        let (n, a) = self.check_matrix("concat_cols")?;
        let (n2, b) = other.check_matrix("concat_cols")?;
        if n != n2 {
            return Err(AnvilError::shape_error(
                &format!("[{}, *]", n),
                &other.shape.to_string(),
                Some("concatenated tensors need the same batch size"),
            ));
        }
        let mut out = Vec::with_capacity(n * (a + b));
        for i in 0..n {
            out.extend_from_slice(&self.data[i * a..(i + 1) * a]);
            out.extend_from_slice(&other.data[i * b..(i + 1) * b]);
        }
        Self::from_vec(out, Shape::new([n, a + b]))
    }

    /// Keep the first `cols` features of every row of a 2-D tensor
    pub fn narrow_cols(&self, cols: usize) -> AnvilResult<Self> {
        let (n, m) = self.check_matrix("narrow_cols")?;
        if cols > m {
            return Err(AnvilError::shape_error(
                &format!("at most {} columns", m),
                &format!("{} columns", cols),
                None,
            ));
        }
        let data = self.data.chunks(m).flat_map(|row| row[..cols].iter().copied()).collect();
        Self::from_vec(data, Shape::new([n, cols]))
    }
}
