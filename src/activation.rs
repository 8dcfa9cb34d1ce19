use std::str::FromStr;

use serde::{Serialize, Deserialize};

use crate::{
  backend::{ Backend, Unary },
  tensor::Tensor,
  scalar::Real,
  error::{ FusionError, Result },
};


/// Nonlinearity applied at the end of a fused matrix product.
///
/// Forward application and local derivative are both matched over this
/// enum, so a new variant can't be added without its derivative.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
  #[default]
  Linear,
  Relu,
  Sigmoid,
}

impl Activation {
  pub const ALL: [Self; 3] = [Self::Linear, Self::Relu, Self::Sigmoid];

  pub fn name(self) -> &'static str {
    match self {
      Self::Linear => "linear",
      Self::Relu => "relu",
      Self::Sigmoid => "sigmoid",
    }
  }

  /// Whether the backward pass needs the sum before activation.

  pub fn needs_pre_activation(self) -> bool {
    self != Self::Linear
  }

  pub fn apply<T: Real, B: Backend<T> + ?Sized>(self, backend: &B, x: &Tensor<T>) -> Result<Tensor<T>> {
    match self {
      Self::Linear => Ok(x.clone()),
      Self::Relu => backend.unary(x, Unary::Relu),
      Self::Sigmoid => backend.unary(x, Unary::Sigmoid),
    }
  }

  /// Derivative of the activation at `pre`, with `post` being its output.
  /// Returns `None` where the upstream gradient passes through unchanged.
  ///
  /// ReLU's derivative at exactly zero is zero.

  pub fn local_gradient<T: Real, B: Backend<T> + ?Sized>(
    self,
    backend: &B,
    pre: &Tensor<T>,
    post: &Tensor<T>,
  ) -> Result<Option<Tensor<T>>> {
    match self {
      Self::Linear => Ok(None),
      Self::Relu => backend.unary(pre, Unary::Step).map(Some),
      Self::Sigmoid => backend.unary(post, Unary::SigmoidSlope).map(Some),
    }
  }
}

impl FromStr for Activation {
  type Err = FusionError;

  fn from_str(name: &str) -> Result<Self> {
    Self::ALL.into_iter()
      .find(|activation| activation.name() == name )
      .ok_or_else(|| FusionError::UnknownActivation(name.to_string()) )
  }
}

impl std::fmt::Display for Activation {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    f.write_str(self.name())
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::Cpu;

  #[test]
  fn parse() {
    assert_eq!("linear".parse::<Activation>(), Ok(Activation::Linear));
    assert_eq!("relu".parse::<Activation>(), Ok(Activation::Relu));
    assert_eq!("sigmoid".parse::<Activation>(), Ok(Activation::Sigmoid));
    assert_eq!(Activation::default(), Activation::Linear);
  }

  #[test]
  fn parse_unknown() {
    assert_eq!("elu".parse::<Activation>(), Err(FusionError::UnknownActivation("elu".into())));
    assert!("Relu".parse::<Activation>().is_err());
    assert!("".parse::<Activation>().is_err());
  }

  #[test]
  fn relu_kink() {
    let pre = Tensor::vec(&[-1.0, 0.0, 0.5]);
    let post = Activation::Relu.apply(&Cpu, &pre).unwrap();
    assert_eq!(post, Tensor::vec(&[0.0, 0.0, 0.5]));
    let grad = Activation::Relu.local_gradient(&Cpu, &pre, &post).unwrap();
    assert_eq!(grad, Some(Tensor::vec(&[0.0, 0.0, 1.0])));
  }

  #[test]
  fn linear_passes_through() {
    let x = Tensor::vec(&[-1.0, 2.0]);
    assert_eq!(Activation::Linear.apply(&Cpu, &x).unwrap(), x);
    assert_eq!(Activation::Linear.local_gradient(&Cpu, &x, &x).unwrap(), None);
  }

  #[test]
  fn sigmoid_slope_uses_output() {
    let pre = Tensor::vec(&[0.0, 2.0]);
    let post = Activation::Sigmoid.apply(&Cpu, &pre).unwrap();
    let grad = Activation::Sigmoid.local_gradient(&Cpu, &pre, &post).unwrap().unwrap();
    let s = 1.0 / (1.0 + (-2.0f64).exp());
    assert!(grad.all_close(&Tensor::vec(&[0.25, s * (1.0 - s)]), 1e-12));
  }
}
