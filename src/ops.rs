//! Unfused primitive operations.
//!
//! Each op runs a single backend kernel and, while the recorder is active,
//! registers its own backward rule. Chaining [matmul], [add] and [activate]
//! yields the composition that [fused](crate::fused) operations replace.

use crate::{
  broadcast::{ self, MatMulPlan, Side },
  backend::Backend,
  activation::Activation,
  tape::Recorder,
  tensor::Tensor,
  scalar::Real,
  error::Result,
};


/// Undo a broadcast by summing `grad` over `axes` and reshaping the
/// result to the operand's `dims`.

pub fn unbroadcast<T, B>(backend: &B, grad: &Tensor<T>, axes: &[usize], dims: &[usize]) -> Result<Tensor<T>>
where
  T: Real,
  B: Backend<T> + ?Sized,
{
  if axes.is_empty() && grad.dims() == dims {
    return Ok(grad.clone())
  }
  let summed = if axes.is_empty() { grad.clone() } else { backend.sum(grad, axes)? };
  summed.reshape(dims)
}


/// Gradients of both operands of a matrix product, given the gradient
/// of the product.
///
/// Transpose flags select the matching identity, so no operand ever gets
/// physically transposed. Batch dims that got broadcast in the forward
/// pass are summed back to each operand's own dims.

pub fn matmul_gradients<T, B>(
  backend: &B,
  lhs: &Tensor<T>,
  rhs: &Tensor<T>,
  transpose_lhs: bool,
  transpose_rhs: bool,
  plan: &MatMulPlan,
  grad: &Tensor<T>,
) -> Result<(Tensor<T>, Tensor<T>)>
where
  T: Real,
  B: Backend<T> + ?Sized,
{
  let (grad_lhs, grad_rhs) = match (transpose_lhs, transpose_rhs) {
    (false, false) => (
      backend.matmul(grad, rhs, false, true)?,
      backend.matmul(lhs, grad, true, false)?,
    ),
    (false, true) => (
      backend.matmul(grad, rhs, false, false)?,
      backend.matmul(grad, lhs, true, false)?,
    ),
    (true, false) => (
      backend.matmul(rhs, grad, false, true)?,
      backend.matmul(lhs, grad, false, false)?,
    ),
    (true, true) => (
      backend.matmul(rhs, grad, true, true)?,
      backend.matmul(grad, lhs, true, true)?,
    ),
  };
  Ok((
    unbroadcast(backend, &grad_lhs, plan.batch.reduced(Side::Lhs), lhs.dims())?,
    unbroadcast(backend, &grad_rhs, plan.batch.reduced(Side::Rhs), rhs.dims())?,
  ))
}


/// Chain `grad` through `activation`, given its input `pre` and output `post`.

pub fn activation_gradient<T, B>(
  backend: &B,
  activation: Activation,
  pre: &Tensor<T>,
  post: &Tensor<T>,
  grad: &Tensor<T>,
) -> Result<Tensor<T>>
where
  T: Real,
  B: Backend<T> + ?Sized,
{
  match activation.local_gradient(backend, pre, post)? {
    Some(local) => backend.mul(grad, &local),
    None => Ok(grad.clone()),
  }
}


/// Recorded matrix product.

pub fn matmul<T, B, R>(
  backend: &B,
  recorder: &R,
  lhs: &Tensor<T>,
  rhs: &Tensor<T>,
  transpose_lhs: bool,
  transpose_rhs: bool,
) -> Result<Tensor<T>>
where
  T: Real,
  B: Backend<T> + Clone + 'static,
  R: Recorder<T> + ?Sized,
{
  let plan = MatMulPlan::resolve(lhs.dims(), rhs.dims(), transpose_lhs, transpose_rhs)?;
  let out = backend.matmul(lhs, rhs, transpose_lhs, transpose_rhs)?;
  if recorder.is_recording() {
    let backend = backend.clone();
    let (l, r) = (lhs.clone(), rhs.clone());
    recorder.record_op("matmul", &[lhs, rhs], &out, Box::new(move |grad| {
      let (grad_l, grad_r) = matmul_gradients(&backend, &l, &r, transpose_lhs, transpose_rhs, &plan, grad)?;
      Ok(vec![Some(grad_l), Some(grad_r)])
    }));
  }
  Ok(out)
}


/// Recorded broadcasting sum.

pub fn add<T, B, R>(backend: &B, recorder: &R, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Result<Tensor<T>>
where
  T: Real,
  B: Backend<T> + Clone + 'static,
  R: Recorder<T> + ?Sized,
{
  let plan = broadcast::resolve(lhs.dims(), rhs.dims())?;
  let out = backend.add(lhs, rhs)?;
  if recorder.is_recording() {
    let backend = backend.clone();
    let (dims_l, dims_r) = (lhs.dims().to_vec(), rhs.dims().to_vec());
    recorder.record_op("add", &[lhs, rhs], &out, Box::new(move |grad| {
      Ok(vec![
        Some(unbroadcast(&backend, grad, plan.reduced(Side::Lhs), &dims_l)?),
        Some(unbroadcast(&backend, grad, plan.reduced(Side::Rhs), &dims_r)?),
      ])
    }));
  }
  Ok(out)
}


/// Recorded activation.
///
/// [Linear](Activation::Linear) returns its input as is and records nothing.

pub fn activate<T, B, R>(backend: &B, recorder: &R, x: &Tensor<T>, activation: Activation) -> Result<Tensor<T>>
where
  T: Real,
  B: Backend<T> + Clone + 'static,
  R: Recorder<T> + ?Sized,
{
  if activation == Activation::Linear {
    return Ok(x.clone())
  }
  let out = activation.apply(backend, x)?;
  if recorder.is_recording() {
    let backend = backend.clone();
    let (pre, post) = (x.clone(), out.clone());
    recorder.record_op(activation.name(), &[x], &out, Box::new(move |grad| {
      Ok(vec![Some(activation_gradient(&backend, activation, &pre, &post, grad)?)])
    }));
  }
  Ok(out)
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::{ backend::Cpu, tape::{ Tape, NoGrad } };

  fn tensor(dims: &[usize], data: &[f64]) -> Tensor<f64> {
    Tensor::new(dims, data.to_vec()).unwrap()
  }

  #[test]
  fn unbroadcast_drops_padded_axes() {
    let grad = Tensor::<f64>::ones(&[3,2,2]);
    let plan = broadcast::resolve(&[3,2,2], &[2]).unwrap();
    let reduced = unbroadcast(&Cpu, &grad, plan.reduced(Side::Rhs), &[2]).unwrap();
    assert_eq!(reduced, tensor(&[2], &[6.0, 6.0]));
    let same = unbroadcast(&Cpu, &grad, plan.reduced(Side::Lhs), &[3,2,2]).unwrap();
    assert_eq!(same, grad);
  }

  #[test]
  fn matmul_gradients_plain() {
    let a = tensor(&[2,3], &[1., 2., 3., 10., 20., -30.]);
    let b = tensor(&[3,2], &[2., 3., 4., -1., 2., 3.]);
    let dy = tensor(&[2,2], &[1., 10., 20., 30.]);
    let plan = MatMulPlan::resolve(a.dims(), b.dims(), false, false).unwrap();
    let (da, db) = matmul_gradients(&Cpu, &a, &b, false, false, &plan, &dy).unwrap();
    assert_eq!(da, tensor(&[2,3], &[32., -6., 32., 130., 50., 130.]));
    assert_eq!(db, tensor(&[3,2], &[201., 310., 402., 620., -597., -870.]));
  }

  #[test]
  fn matmul_gradients_honor_transposition() {
    let a = Tensor::<f64>::randn(&[2,3]);
    let b = Tensor::<f64>::randn(&[3,4]);
    let dy = Tensor::<f64>::randn(&[2,4]);
    let plan = MatMulPlan::resolve(a.dims(), b.dims(), false, false).unwrap();
    let (da, db) = matmul_gradients(&Cpu, &a, &b, false, false, &plan, &dy).unwrap();

    for (tl, tr) in [(false, true), (true, false), (true, true)] {
      let l = if tl { a.t().contiguous() } else { a.clone() };
      let r = if tr { b.t().contiguous() } else { b.clone() };
      let plan = MatMulPlan::resolve(l.dims(), r.dims(), tl, tr).unwrap();
      let (dl, dr) = matmul_gradients(&Cpu, &l, &r, tl, tr, &plan, &dy).unwrap();
      let dl = if tl { dl.t() } else { dl };
      let dr = if tr { dr.t() } else { dr };
      assert!(dl.all_close(&da, 1e-12));
      assert!(dr.all_close(&db, 1e-12));
    }
  }

  #[test]
  fn matmul_gradients_reduce_batch() {
    let a = Tensor::<f64>::randn(&[2,2,3]);
    let b = Tensor::<f64>::randn(&[3,2]);
    let plan = MatMulPlan::resolve(a.dims(), b.dims(), false, false).unwrap();
    let dy = Tensor::ones(&plan.dims());
    let (da, db) = matmul_gradients(&Cpu, &a, &b, false, false, &plan, &dy).unwrap();
    assert_eq!(da.dims(), a.dims());
    assert_eq!(db.dims(), b.dims());
    // Every column of b meets the row sums of a across both batches
    let rows = a.sum_over(&[0, 1]).unwrap().reshape(&[3,1]).unwrap();
    assert!(db.all_close(&rows.add(&Tensor::zeros(&[3,2])).unwrap(), 1e-12));
  }

  #[test]
  fn recorded_chain() {
    let tape = Tape::new();
    let x = tensor(&[1,2], &[1., -2.]);
    let w = tensor(&[2,2], &[1., 2., 3., 4.]);
    let b = tensor(&[2], &[0.5, 0.5]);
    let p = matmul(&Cpu, &tape, &x, &w, false, false).unwrap();
    let s = add(&Cpu, &tape, &p, &b).unwrap();
    let y = activate(&Cpu, &tape, &s, Activation::Relu).unwrap();
    assert_eq!(y, tensor(&[1,2], &[0., 0.]));
    assert_eq!(tape.names(), vec!["matmul", "add", "relu"]);

    let grads = tape.gradients(&y, &Tensor::ones(&[1,2]), &[&x, &w, &b]).unwrap();
    assert_eq!(grads[0], Some(Tensor::zeros(&[1,2])));
    assert_eq!(grads[2], Some(Tensor::zeros(&[2])));
  }

  #[test]
  fn linear_is_not_recorded() {
    let tape = Tape::new();
    let x = tensor(&[1,2], &[1., -2.]);
    let y = activate(&Cpu, &tape, &x, Activation::Linear).unwrap();
    assert!(tape.is_empty());
    assert_eq!(y.id(), x.id());
  }

  #[test]
  fn not_recording() {
    let x = tensor(&[1,2], &[1., -2.]);
    let w = tensor(&[2,1], &[1., 2.]);
    assert_eq!(matmul(&Cpu, &NoGrad, &x, &w, false, false).unwrap(), tensor(&[1,1], &[-3.]));
  }

  #[test]
  fn numeric_gradients() {
    let w = Tensor::<f64>::randn(&[3,2]);
    let b = Tensor::<f64>::randn(&[2]);
    let diff = Tape::<f64>::check_gradients(&[4,3], |recorder, x| {
      let p = matmul(&Cpu, recorder, x, &w, false, false)?;
      let s = add(&Cpu, recorder, &p, &b)?;
      activate(&Cpu, recorder, &s, Activation::Sigmoid)
    }).unwrap();
    assert!(diff < 1e-6);
  }
}
