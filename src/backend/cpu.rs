use log::trace;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::{
  internal::*,
  broadcast::MatMulPlan,
  backend::{ Backend, Unary },
  tensor::Tensor,
  scalar::Real,
  error::Result,
};


/// Reference backend running on the host CPU.
///
/// Matrix products use [Gemm](crate::scalar::Gemm), which is accelerated
/// by `matrixmultiply` when the `unsafe` feature is enabled. With the
/// `rayon` feature, batch matrices are multiplied in parallel.

#[derive(Debug, Clone, Copy, Default)]
pub struct Cpu;

impl<T: Real> Backend<T> for Cpu {
  fn matmul(&self, lhs: &Tensor<T>, rhs: &Tensor<T>, transpose_lhs: bool, transpose_rhs: bool) -> Result<Tensor<T>> {
    let plan = MatMulPlan::resolve(lhs.dims(), rhs.dims(), transpose_lhs, transpose_rhs)?;
    let (rows, inner, cols) = (plan.rows, plan.inner, plan.cols);
    let batch = &plan.batch.dims;

    // Transposition and batch broadcasting are both zero-copy views
    let lhs = if transpose_lhs { lhs.t() } else { lhs.clone() };
    let rhs = if transpose_rhs { rhs.t() } else { rhs.clone() };
    let batched = |tail: [usize; 2]| [batch.clone(), tail.to_vec()].concat();
    let lhs = lhs.broadcast_to(&batched([rows, inner]))?;
    let rhs = rhs.broadcast_to(&batched([inner, cols]))?;

    let multiply = |b: usize| {
      let indices = unravel(b, batch);
      let (sl, sr) = (lhs.shape().strides(), rhs.shape().strides());
      let n = sl.len();
      let mut out = vec![T::zero(); rows * cols];
      T::gemm(
        rows, inner, cols,
        lhs.raw(), lhs.shape().index(&indices), sl[n - 2], sl[n - 1],
        rhs.raw(), rhs.shape().index(&indices), sr[n - 2], sr[n - 1],
        &mut out,
      );
      out
    };

    #[cfg(feature = "rayon")]
    let data = (0..plan.batch.size())
      .into_par_iter()
      .map(multiply)
      .collect::<Vec<_>>()
      .concat();

    #[cfg(not(feature = "rayon"))]
    let data = (0..plan.batch.size())
      .flat_map(multiply)
      .collect();

    let dims = plan.dims();
    trace!("cpu matmul {:?} x {:?} -> {:?}", lhs.dims(), rhs.dims(), dims);
    Ok(Tensor::from_raw(&dims, data))
  }

  fn add(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Result<Tensor<T>> {
    lhs.add(rhs)
  }

  fn mul(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Result<Tensor<T>> {
    lhs.mul(rhs)
  }

  fn sum(&self, x: &Tensor<T>, axes: &[usize]) -> Result<Tensor<T>> {
    x.sum_over(axes)
  }

  fn unary(&self, x: &Tensor<T>, op: Unary) -> Result<Tensor<T>> {
    Ok(x.vectorize(|a| op.apply(a) ))
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  fn tensor(dims: &[usize], data: &[f32]) -> Tensor<f32> {
    Tensor::new(dims, data.to_vec()).unwrap()
  }

  #[test]
  fn matmul() {
    let x = tensor(&[2,3], &[1., 2., 3., 4., 5., 6.]);
    let y = tensor(&[3,2], &[1., 2., 3., 4., 5., 6.]);
    assert_eq!(Cpu.matmul(&x, &y, false, false).unwrap(), tensor(&[2,2], &[22., 28., 49., 64.]));
  }

  #[test]
  fn matmul_transposed() {
    let a = tensor(&[2,3], &[1., 2., 3., 4., 5., 6.]);
    let b = tensor(&[2,3], &[0., 1., -3., 2., 2., 1.]);
    assert_eq!(Cpu.matmul(&a, &b, false, true).unwrap(), tensor(&[2,2], &[-7., 9., -13., 24.]));

    // Same product, read from transposed storage
    let at = a.t().contiguous();
    let bt = b.t().contiguous();
    let expected = Cpu.matmul(&a, &b, false, true).unwrap();
    assert_eq!(Cpu.matmul(&at, &bt, true, false).unwrap(), expected);
  }

  #[test]
  fn matmul_batched() {
    let a = Tensor::arrange(&[2,2,3], 0.0f32, 1.0);
    let b = tensor(&[2,3,2], &[0., 1., -3., 2., 2., 1., 0., 1., -3., 2., 2., 1.]);
    let c = Cpu.matmul(&a, &b, false, false).unwrap();
    assert_eq!(c, tensor(&[2,2,2], &[1., 4., -2., 16., -5., 28., -8., 40.]));
  }

  #[test]
  fn matmul_broadcast_batch() {
    let a = Tensor::arrange(&[2,2,3], 0.0f32, 1.0);
    let b = tensor(&[3,2], &[0., 1., -3., 2., 2., 1.]);
    let c = Cpu.matmul(&a, &b, false, false).unwrap();
    assert_eq!(c.dims(), &[2,2,2]);
    assert_eq!(c.to_vec(), vec![1., 4., -2., 16., -5., 28., -8., 40.]);
  }

  #[test]
  fn matmul_rejects() {
    let a = tensor(&[2,3], &[1., 2., 3., 4., 5., 6.]);
    let b = tensor(&[2,2], &[1., 2., 3., 4.]);
    assert!(Cpu.matmul(&a, &b, false, false).unwrap_err().is_shape_error());
  }

  #[test]
  fn unary() {
    let x = tensor(&[2,2], &[-1., 0., 2., -3.]);
    assert_eq!(Cpu.unary(&x, Unary::Relu).unwrap().to_vec(), vec![0., 0., 2., 0.]);
    assert_eq!(Cpu.unary(&x, Unary::Step).unwrap().to_vec(), vec![0., 0., 1., 0.]);
  }
}
