use std::sync::Arc;

use serde::{Serialize, Deserialize};

use crate::{
  internal::*,
  broadcast,
  shape::Shape,
  scalar::{ Inner, Numeric, Real },
  error::{ FusionError, Result },
};


/// Immutable multidimensional array.
///
/// Storage is shared between a tensor and all views derived from it
/// ([transpose](Tensor::transpose), [broadcast_to](Tensor::broadcast_to)).
/// Every handle gets its own [id](Tensor::id), which gradient tapes use
/// to tell tensors apart. Clones keep the id of their source.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tensor<T: Inner> {
  shape: Shape,
  data: Arc<Vec<T>>,
  #[serde(skip, default = "make_id")]
  id: usize,
}

impl<T: Inner> PartialEq for Tensor<T> {
  fn eq(&self, rhs: &Self) -> bool {
    self.shape.dims == rhs.shape.dims &&
      self.param_iter().zip(rhs.param_iter()).all(|(a, b)| a == b )
  }
}

impl<T: Inner> Tensor<T> {
  pub fn from_shape(shape: Shape, data: Vec<T>) -> Result<Self> {
    if !shape.contiguous() || shape.offset != 0 || shape.size() != data.len() {
      return Err(FusionError::Data { dims: shape.dims, len: data.len() })
    }
    Ok(Self { shape, data: Arc::new(data), id: make_id() })
  }

  pub fn new(dims: &[usize], data: Vec<T>) -> Result<Self> {
    Self::from_shape(Shape::new(dims), data)
  }

  pub(crate) fn from_raw(dims: &[usize], data: Vec<T>) -> Self {
    debug_assert_eq!(dims.iter().product::<usize>(), data.len());
    Self { shape: Shape::new(dims), data: Arc::new(data), id: make_id() }
  }

  pub fn vec(vec: &[T]) -> Self {
    Self::from_raw(&[vec.len()], vec.to_vec())
  }

  pub fn scalar(item: T) -> Self {
    Self::from_raw(&[], vec![item])
  }

  pub fn fill(dims: &[usize], filler: T) -> Self {
    Self::from_raw(dims, vec![filler; dims.iter().product()])
  }

  fn view(&self, shape: Shape) -> Self {
    Self { shape, data: self.data.clone(), id: make_id() }
  }

  pub fn id(&self) -> usize {
    self.id
  }

  pub fn shape(&self) -> &Shape {
    &self.shape
  }

  pub fn dims(&self) -> &[usize] {
    &self.shape.dims
  }

  pub fn rank(&self) -> usize {
    self.shape.rank()
  }

  pub fn size(&self) -> usize {
    self.shape.size()
  }

  /// The complete underlying storage, regardless of this tensor's layout.

  pub fn raw(&self) -> &[T] {
    &self.data
  }

  pub fn param_iter(&self) -> impl Iterator<Item=T> + '_ {
    self.shape.iter().map(move |i| self.data[i] )
  }

  pub fn to_vec(&self) -> Vec<T> {
    self.param_iter().collect()
  }

  pub fn item(&self) -> Option<T> {
    (self.size() == 1).then(|| self.data[self.shape.offset] )
  }

  pub fn contiguous(&self) -> Self {
    if self.shape.contiguous() {
      self.clone()
    } else {
      self.detach()
    }
  }

  /// Copy into fresh, contiguous storage.

  pub fn detach(&self) -> Self {
    self.vectorize(|a| a )
  }

  pub fn transpose(&self, dim1: isize, dim2: isize) -> Self {
    self.view(self.shape.transpose(dim1, dim2))
  }

  /// Swap the last two dimensions.

  pub fn t(&self) -> Self {
    self.transpose(-1, -2)
  }

  pub fn broadcast_to(&self, dims: &[usize]) -> Result<Self> {
    Ok(self.view(self.shape.broadcast_to(dims)?))
  }

  pub fn reshape(&self, dims: &[usize]) -> Result<Self> {
    if dims.iter().product::<usize>() != self.size() {
      return Err(FusionError::shape("reshape", self.dims(), dims))
    }
    let this = self.contiguous();
    let mut shape = Shape::new(dims);
    shape.offset = this.shape.offset;
    Ok(this.view(shape))
  }

  pub fn zip<O, F>(&self, rhs: &Self, cb: F) -> Result<Tensor<O>>
  where
    O: Inner,
    F: Fn((T, T)) -> O,
  {
    let plan = broadcast::resolve(self.dims(), rhs.dims())?;
    let lhs = self.broadcast_to(&plan.dims)?;
    let rhs = rhs.broadcast_to(&plan.dims)?;
    let data = lhs.param_iter()
      .zip(rhs.param_iter())
      .map(cb)
      .collect();
    Ok(Tensor::from_raw(&plan.dims, data))
  }

  pub fn vectorize<O, F>(&self, cb: F) -> Tensor<O>
  where
    O: Inner,
    F: FnMut(T) -> O,
  {
    let data = self.param_iter().map(cb).collect();
    Tensor::from_raw(&self.shape.dims, data)
  }
}

impl<T: Numeric> Tensor<T> {
  pub fn zeros(dims: &[usize]) -> Self {
    Self::fill(dims, T::zero())
  }

  pub fn ones(dims: &[usize]) -> Self {
    Self::fill(dims, T::one())
  }

  pub fn arrange(dims: &[usize], start: T, step: T) -> Self {
    let data = (0..dims.iter().product())
      .map(|i| T::from(i).unwrap() * step + start )
      .collect();
    Self::from_raw(dims, data)
  }

  pub fn hot_encode(idx: usize, size: usize) -> Self {
    let mut a = vec![T::zero(); size];
    a[idx] = T::one();
    Self::from_raw(&[size], a)
  }

  pub fn add(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |(a, b)| a + b )
  }

  pub fn sub(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |(a, b)| a - b )
  }

  pub fn mul(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |(a, b)| a * b )
  }

  pub fn scale(&self, factor: T) -> Self {
    self.vectorize(|a| a * factor )
  }

  /// Sum over the given axes, keeping them with size 1.

  pub fn sum_over(&self, axes: &[usize]) -> Result<Self> {
    let mut dims = self.shape.dims.clone();
    for &axis in axes {
      if axis >= dims.len() {
        return Err(FusionError::shape("sum", self.dims(), axes))
      }
      dims[axis] = 1;
    }
    let out = Shape::new(&dims);
    let mut data = vec![T::zero(); out.size()];
    for (flat, value) in self.param_iter().enumerate() {
      let mut indices = unravel(flat, &self.shape.dims);
      for &axis in axes { indices[axis] = 0 }
      data[out.index(&indices)] += value;
    }
    Ok(Self::from_raw(&dims, data))
  }

  /// Sum of all elements.

  pub fn total(&self) -> T {
    self.param_iter().sum()
  }
}

impl<T: Real> Tensor<T> {
  pub fn randn(dims: &[usize]) -> Self {
    let len = dims.iter().product();
    let mut data = vec![T::zero(); len];
    for i in 0..(len as f64 / 2.0).ceil() as usize {
      let j = i * 2;
      let (r1, r2): (T, T) = randn();
      data[j] = r1;
      data[(j + 1) % len] = r2;
    }
    Self::from_raw(dims, data)
  }

  /// Elementwise comparison, relative to the magnitude of `rhs` but
  /// never tighter than `tolerance` in absolute terms.

  pub fn all_close(&self, rhs: &Self, tolerance: T) -> bool {
    self.shape.dims == rhs.shape.dims &&
      self.param_iter().zip(rhs.param_iter()).all(|(a, b)| {
        (a - b).abs() <= tolerance * T::one().max(b.abs())
      })
  }
}

impl<T: Inner> std::fmt::Display for Tensor<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "Tensor{:?} ", self.shape.dims)?;
    print_chunks(0, &self.shape, &self.to_vec(), f)
  }
}

fn print_chunks<T: std::fmt::Debug>(idx: usize, shape: &Shape, vec: &[T], f: &mut std::fmt::Formatter) -> std::fmt::Result {
  let indent = " ".repeat(idx * 2);
  if shape.rank() == 0 {
    write!(f, "{indent}{:?}", vec[0])?;
  } else if idx == shape.rank() - 1 || vec.is_empty() {
    writeln!(f, "{indent}{:?}", vec)?;
  } else {
    writeln!(f, "{indent}[")?;
    for chunk in vec.chunks(vec.len() / shape.dims[idx]) {
      print_chunks(idx + 1, shape, chunk, f)?;
    }
    writeln!(f, "{indent}]")?;
  }
  Ok(())
}
