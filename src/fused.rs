//! Fused matrix product with optional transposition, bias and activation.
//!
//! [forward] validates all shapes up front, then runs matmul, bias add and
//! activation through the same backend kernels the unfused
//! [ops](crate::ops) use, in that order. [backward] reuses the gradient
//! helpers of those ops, which makes fused and unfused gradients identical.

use log::debug;

use crate::{
  broadcast::{ self, BroadcastPlan, MatMulPlan, Side },
  backend::Backend,
  activation::Activation,
  tape::Recorder,
  tensor::Tensor,
  scalar::Real,
  ops,
  error::{ FusionError, Result },
};


/// Description of a single fused matrix product.
///
/// ```
/// use microfuse::{ Tensor, MatMulSpec, Activation, Cpu };
///
/// let x = Tensor::new(&[2,3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
/// let w = Tensor::new(&[3,2], vec![0.0, 1.0, -3.0, 2.0, 2.0, 1.0]).unwrap();
/// let y = MatMulSpec::new(&x, &w)
///   .activation(Activation::Relu)
///   .run(&Cpu)
///   .unwrap();
/// assert_eq!(y.to_vec(), vec![0.0, 8.0, 0.0, 20.0]);
/// ```

#[derive(Debug, Clone)]
pub struct MatMulSpec<T: Real> {
  pub left: Tensor<T>,
  pub right: Tensor<T>,
  pub transpose_left: bool,
  pub transpose_right: bool,
  pub bias: Option<Tensor<T>>,
  pub activation: Activation,
}

impl<T: Real> MatMulSpec<T> {
  pub fn new(left: &Tensor<T>, right: &Tensor<T>) -> Self {
    Self {
      left: left.clone(),
      right: right.clone(),
      transpose_left: false,
      transpose_right: false,
      bias: None,
      activation: Activation::Linear,
    }
  }

  pub fn transpose_left(mut self, transpose: bool) -> Self {
    self.transpose_left = transpose;
    self
  }

  pub fn transpose_right(mut self, transpose: bool) -> Self {
    self.transpose_right = transpose;
    self
  }

  pub fn bias(mut self, bias: &Tensor<T>) -> Self {
    self.bias = Some(bias.clone());
    self
  }

  pub fn activation(mut self, activation: Activation) -> Self {
    self.activation = activation;
    self
  }

  /// Evaluate without recording.

  pub fn run<B: Backend<T> + ?Sized>(&self, backend: &B) -> Result<Tensor<T>> {
    forward(backend, self).map(|(output, _)| output )
  }

  /// Evaluate and register the gradient rule with `recorder`, if active.
  ///
  /// Inputs are recorded as `[left, right]`, followed by the bias if
  /// there is one.

  pub fn run_recorded<B, R>(&self, backend: &B, recorder: &R) -> Result<Tensor<T>>
  where
    B: Backend<T> + Clone + 'static,
    R: Recorder<T> + ?Sized,
  {
    let (output, context) = forward(backend, self)?;
    if recorder.is_recording() {
      let mut inputs = vec![&self.left, &self.right];
      inputs.extend(self.bias.as_ref());
      let backend = backend.clone();
      recorder.record_op("fused_matmul", &inputs, &output, Box::new(move |grad| {
        let grads = backward(&backend, &context, grad)?;
        let mut out = vec![Some(grads.left), Some(grads.right)];
        if context.has_bias() { out.push(grads.bias) }
        Ok(out)
      }));
    }
    Ok(output)
  }
}


/// Everything [backward] needs to replay the gradient of one fused call.

#[derive(Debug, Clone)]
pub struct SavedFusionContext<T: Real> {
  left: Tensor<T>,
  right: Tensor<T>,
  transpose_left: bool,
  transpose_right: bool,
  bias: Option<(Vec<usize>, BroadcastPlan)>,
  plan: MatMulPlan,
  pre_activation: Option<Tensor<T>>,
  output: Tensor<T>,
  activation: Activation,
}

impl<T: Real> SavedFusionContext<T> {
  pub fn activation(&self) -> Activation {
    self.activation
  }

  pub fn plan(&self) -> &MatMulPlan {
    &self.plan
  }

  pub fn has_bias(&self) -> bool {
    self.bias.is_some()
  }

  pub fn bias_plan(&self) -> Option<&BroadcastPlan> {
    self.bias.as_ref().map(|(_, plan)| plan )
  }

  /// Sum before activation, kept for non-linear activations only.

  pub fn pre_activation(&self) -> Option<&Tensor<T>> {
    self.pre_activation.as_ref()
  }

  pub fn output(&self) -> &Tensor<T> {
    &self.output
  }
}


/// Gradients of a fused call's inputs.

#[derive(Debug, Clone, PartialEq)]
pub struct FusedGradients<T: Real> {
  pub left: Tensor<T>,
  pub right: Tensor<T>,
  pub bias: Option<Tensor<T>>,
}


/// Run a fused matrix product.
///
/// All shapes get validated before the first kernel is invoked, so a
/// failing call never does partial work.

pub fn forward<T, B>(backend: &B, spec: &MatMulSpec<T>) -> Result<(Tensor<T>, SavedFusionContext<T>)>
where
  T: Real,
  B: Backend<T> + ?Sized,
{
  let (tl, tr) = (spec.transpose_left, spec.transpose_right);
  let plan = MatMulPlan::resolve(spec.left.dims(), spec.right.dims(), tl, tr)?;
  let product_dims = plan.dims();
  let bias_plan = spec.bias.as_ref()
    .map(|bias| {
      broadcast::resolve(&product_dims, bias.dims())
        .map(|plan| (bias.dims().to_vec(), plan) )
        .map_err(|_| FusionError::shape("bias", &product_dims, bias.dims()) )
    })
    .transpose()?;

  debug!(
    "fused matmul {:?}{} x {:?}{} bias {:?} activation {}",
    spec.left.dims(), if tl { "ᵀ" } else { "" },
    spec.right.dims(), if tr { "ᵀ" } else { "" },
    spec.bias.as_ref().map(|b| b.dims() ), spec.activation,
  );

  let product = backend.matmul(&spec.left, &spec.right, tl, tr)?;
  let sum = match &spec.bias {
    Some(bias) => backend.add(&product, bias)?,
    None => product,
  };
  let output = spec.activation.apply(backend, &sum)?;

  let context = SavedFusionContext {
    left: spec.left.clone(),
    right: spec.right.clone(),
    transpose_left: tl,
    transpose_right: tr,
    bias: bias_plan,
    plan,
    pre_activation: spec.activation.needs_pre_activation().then_some(sum),
    output: output.clone(),
    activation: spec.activation,
  };
  Ok((output, context))
}


/// Gradients of a fused call's inputs, given the gradient of its output.

pub fn backward<T, B>(backend: &B, context: &SavedFusionContext<T>, upstream: &Tensor<T>) -> Result<FusedGradients<T>>
where
  T: Real,
  B: Backend<T> + ?Sized,
{
  let output = &context.output;
  if upstream.dims() != output.dims() {
    return Err(FusionError::shape("fused backward", output.dims(), upstream.dims()))
  }
  debug!("fused backward {:?} activation {}", upstream.dims(), context.activation);

  let pre = context.pre_activation.as_ref().unwrap_or(output);
  let grad_pre = ops::activation_gradient(backend, context.activation, pre, output, upstream)?;

  let product_dims = context.plan.dims();
  let (grad_product, grad_bias) = match &context.bias {
    Some((dims, plan)) => (
      ops::unbroadcast(backend, &grad_pre, plan.reduced(Side::Lhs), &product_dims)?,
      Some(ops::unbroadcast(backend, &grad_pre, plan.reduced(Side::Rhs), dims)?),
    ),
    None => (grad_pre, None),
  };

  let (left, right) = ops::matmul_gradients(
    backend,
    &context.left,
    &context.right,
    context.transpose_left,
    context.transpose_right,
    &context.plan,
    &grad_product,
  )?;
  Ok(FusedGradients { left, right, bias: grad_bias })
}


/// Fused matrix product with the activation given by name.
///
/// The name gets parsed before anything else happens, so an unknown
/// activation never reaches a kernel.

#[allow(clippy::too_many_arguments)]
pub fn mat_mul<T, B, R>(
  backend: &B,
  recorder: &R,
  left: &Tensor<T>,
  right: &Tensor<T>,
  transpose_left: bool,
  transpose_right: bool,
  bias: Option<&Tensor<T>>,
  activation: &str,
) -> Result<Tensor<T>>
where
  T: Real,
  B: Backend<T> + Clone + 'static,
  R: Recorder<T> + ?Sized,
{
  let activation = activation.parse()?;
  let mut spec = MatMulSpec::new(left, right)
    .transpose_left(transpose_left)
    .transpose_right(transpose_right)
    .activation(activation);
  spec.bias = bias.cloned();
  spec.run_recorded(backend, recorder)
}
