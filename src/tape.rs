use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use log::trace;

use crate::{
  tensor::Tensor,
  scalar::Real,
  error::{ FusionError, Result },
};


/// Maps the gradient of an op's output to one optional gradient per input.

pub type BackwardFn<T> = Box<dyn Fn(&Tensor<T>) -> Result<Vec<Option<Tensor<T>>>>>;


/// Hook that differentiable operations report themselves to.
///
/// Operations call [record_op](Recorder::record_op) once per successful
/// forward evaluation, but only while [is_recording](Recorder::is_recording)
/// returns true.

pub trait Recorder<T: Real> {
  fn is_recording(&self) -> bool;
  fn record_op(&self, name: &'static str, inputs: &[&Tensor<T>], output: &Tensor<T>, backward: BackwardFn<T>);
}


/// Recorder that is never active.

#[derive(Debug, Clone, Copy, Default)]
pub struct NoGrad;

impl<T: Real> Recorder<T> for NoGrad {
  fn is_recording(&self) -> bool { false }
  fn record_op(&self, _name: &'static str, _inputs: &[&Tensor<T>], _output: &Tensor<T>, _backward: BackwardFn<T>) {}
}


struct Entry<T: Real> {
  name: &'static str,
  inputs: Vec<(usize, Vec<usize>)>,
  output: usize,
  backward: BackwardFn<T>,
}


/// Linear record of operations, identified by their tensors' ids.
///
/// Gradients get computed by walking the record backwards and
/// accumulating every op's input gradients.

pub struct Tape<T: Real> {
  entries: RefCell<Vec<Entry<T>>>,
  paused: Cell<bool>,
}

impl<T: Real> Default for Tape<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Real> Recorder<T> for Tape<T> {
  fn is_recording(&self) -> bool {
    !self.paused.get()
  }

  fn record_op(&self, name: &'static str, inputs: &[&Tensor<T>], output: &Tensor<T>, backward: BackwardFn<T>) {
    if self.paused.get() { return }
    trace!("record {name} #{} <- {:?}", output.id(), inputs.iter().map(|x| x.id() ).collect::<Vec<_>>());
    self.entries.borrow_mut().push(Entry {
      name,
      inputs: inputs.iter().map(|x| (x.id(), x.dims().to_vec()) ).collect(),
      output: output.id(),
      backward,
    });
  }
}

impl<T: Real> Tape<T> {
  pub fn new() -> Self {
    Self {
      entries: RefCell::new(vec![]),
      paused: Cell::new(false),
    }
  }

  pub fn len(&self) -> usize {
    self.entries.borrow().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn names(&self) -> Vec<&'static str> {
    self.entries.borrow().iter().map(|entry| entry.name ).collect()
  }

  /// Run `cb` without recording any operations.

  pub fn paused<R>(&self, cb: impl FnOnce() -> R) -> R {
    let previous = self.paused.replace(true);
    let out = cb();
    self.paused.set(previous);
    out
  }

  /// Back-propagate `upstream` from `output` and return the gradients
  /// of `inputs`. Inputs that `output` doesn't depend on get `None`.

  pub fn gradients(&self, output: &Tensor<T>, upstream: &Tensor<T>, inputs: &[&Tensor<T>]) -> Result<Vec<Option<Tensor<T>>>> {
    if output.dims() != upstream.dims() {
      return Err(FusionError::shape("gradients", output.dims(), upstream.dims()))
    }
    let mut grads: HashMap<usize, Tensor<T>> = HashMap::new();
    grads.insert(output.id(), upstream.clone());

    for entry in self.entries.borrow().iter().rev() {
      let Some(grad) = grads.get(&entry.output).cloned() else { continue };
      let changes = (entry.backward)(&grad)?;
      if changes.len() != entry.inputs.len() {
        return Err(FusionError::Kernel(format!(
          "{} returned {} gradients for {} inputs", entry.name, changes.len(), entry.inputs.len()
        )))
      }
      for (change, (id, dims)) in changes.into_iter().zip(&entry.inputs) {
        let Some(change) = change else { continue };
        if change.dims() != dims.as_slice() {
          return Err(FusionError::shape(entry.name, change.dims(), dims))
        }
        let total = match grads.get(id) {
          Some(existing) => existing.add(&change)?,
          None => change,
        };
        grads.insert(*id, total);
      }
    }

    Ok(inputs.iter().map(|input| grads.get(&input.id()).cloned() ).collect())
  }

  /// Compare the gradient of `generator` with respect to a random input
  /// against central finite differences.
  ///
  /// Returns the mean absolute difference between both gradients.

  pub fn check_gradients<F>(dims: &[usize], generator: F) -> Result<T>
  where
    F: Fn(&dyn Recorder<T>, &Tensor<T>) -> Result<Tensor<T>>
  {
    let eps = T::from(1e-6).unwrap();
    let two = T::from(2.0).unwrap();
    // Generate random input
    let input = Tensor::randn(dims);
    // Compute gradient using the tape
    let tape = Tape::new();
    let output = generator(&tape, &input)?;
    let ones = Tensor::ones(output.dims());
    let grad = tape.gradients(&output, &ones, &[&input])?
      .remove(0)
      .unwrap_or_else(|| Tensor::zeros(dims) );
    // Compute gradient numerically for every element of input
    let len = input.size();
    let mut numeric = vec![T::zero(); len];
    for (i, slot) in numeric.iter_mut().enumerate() {
      let epst = Tensor::hot_encode(i, len).reshape(dims)?.scale(eps);
      let prev = generator(&NoGrad, &input.sub(&epst)?)?.total();
      let next = generator(&NoGrad, &input.add(&epst)?)?.total();
      *slot = (next - prev) / (two * eps);
    }
    let numeric = Tensor::new(dims, numeric)?;
    let diff = grad.sub(&numeric)?.vectorize(|a| a.abs() );
    Ok(diff.total() / T::from(len.max(1)).unwrap())
  }
}

impl<T: Real> std::fmt::Debug for Tape<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    f.debug_struct("Tape")
      .field("ops", &self.names())
      .field("paused", &self.paused.get())
      .finish()
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  fn square(recorder: &dyn Recorder<f64>, x: &Tensor<f64>) -> Result<Tensor<f64>> {
    let out = x.mul(x)?;
    if recorder.is_recording() {
      let x = x.clone();
      recorder.record_op("square", &[&x.clone()], &out, Box::new(move |grad| {
        Ok(vec![Some(grad.mul(&x)?.scale(2.0))])
      }));
    }
    Ok(out)
  }

  #[test]
  fn x_squared() {
    let tape = Tape::new();
    let x = Tensor::vec(&[3.0, 5.0]);
    let y = square(&tape, &x).unwrap();
    let grads = tape.gradients(&y, &Tensor::ones(&[2]), &[&x]).unwrap();
    assert_eq!(grads[0], Some(Tensor::vec(&[6.0, 10.0])));
    assert_eq!(tape.names(), vec!["square"]);
  }

  #[test]
  fn accumulates_reused_inputs() {
    let tape = Tape::new();
    let x = Tensor::vec(&[3.0]);
    let y = square(&tape, &x).unwrap();
    let z = square(&tape, &y).unwrap();
    // d(x^4)/dx = 4x^3
    let grads = tape.gradients(&z, &Tensor::ones(&[1]), &[&x, &y]).unwrap();
    assert_eq!(grads[0], Some(Tensor::vec(&[108.0])));
    assert_eq!(grads[1], Some(Tensor::vec(&[18.0])));
  }

  #[test]
  fn unrelated_inputs() {
    let tape = Tape::new();
    let x = Tensor::vec(&[3.0]);
    let w = Tensor::vec(&[1.0]);
    let y = square(&tape, &x).unwrap();
    let grads = tape.gradients(&y, &Tensor::ones(&[1]), &[&w]).unwrap();
    assert_eq!(grads[0], None);
  }

  #[test]
  fn paused() {
    let tape = Tape::new();
    let x = Tensor::vec(&[3.0]);
    tape.paused(|| square(&tape, &x) ).unwrap();
    assert!(tape.is_empty());
    assert!(tape.is_recording());
  }

  #[test]
  fn upstream_shape() {
    let tape = Tape::new();
    let x = Tensor::vec(&[3.0, 4.0]);
    let y = square(&tape, &x).unwrap();
    assert!(tape.gradients(&y, &Tensor::ones(&[3]), &[&x]).unwrap_err().is_shape_error());
  }

  #[test]
  fn numeric_check() {
    let diff = Tape::<f64>::check_gradients(&[2,3], |recorder, x| square(recorder, x) ).unwrap();
    assert!(diff < 1e-6);
  }
}
