use serde::{Serialize, Deserialize};

use crate::{
  tensor::Tensor,
  scalar::Real,
  error::Result,
};

mod cpu;

pub use cpu::Cpu;


/// Elementwise kernels needed by the activation registry.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unary {
  /// `max(x, 0)`
  Relu,
  /// 1 where `x > 0`, otherwise 0.
  Step,
  /// `1 / (1 + e^-x)`
  Sigmoid,
  /// `y * (1 - y)`, the sigmoid's slope expressed through its output `y`.
  SigmoidSlope,
}

impl Unary {
  #[inline]
  pub fn apply<T: Real>(self, x: T) -> T {
    match self {
      Self::Relu => x.max(T::zero()),
      Self::Step => if x > T::zero() { T::one() } else { T::zero() },
      Self::Sigmoid => T::one() / (T::one() + (-x).exp()),
      Self::SigmoidSlope => x * (T::one() - x),
    }
  }
}


/// Kernel provider that fused and primitive operations delegate to.
///
/// Implementations report incompatible shapes as
/// [Shape](crate::FusionError::Shape) errors and runtime failures as
/// [Kernel](crate::FusionError::Kernel) errors. They must never pad or
/// truncate operands to make shapes fit.

pub trait Backend<T: Real> {
  /// Batched matrix product with leading dims broadcast between operands.
  /// Transposition swaps an operand's last two dims.
  fn matmul(&self, lhs: &Tensor<T>, rhs: &Tensor<T>, transpose_lhs: bool, transpose_rhs: bool) -> Result<Tensor<T>>;

  /// Broadcasting elementwise sum.
  fn add(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Result<Tensor<T>>;

  /// Broadcasting elementwise product.
  fn mul(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Result<Tensor<T>>;

  /// Sum over `axes`, keeping them with size 1.
  fn sum(&self, x: &Tensor<T>, axes: &[usize]) -> Result<Tensor<T>>;

  fn unary(&self, x: &Tensor<T>, op: Unary) -> Result<Tensor<T>>;
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unary_kernels() {
    assert_eq!(Unary::Relu.apply(-2.0), 0.0);
    assert_eq!(Unary::Relu.apply(3.0), 3.0);
    assert_eq!(Unary::Step.apply(0.0), 0.0);
    assert_eq!(Unary::Step.apply(1e-9), 1.0);
    assert_eq!(Unary::Sigmoid.apply(0.0), 0.5);
    assert_eq!(Unary::SigmoidSlope.apply(0.5), 0.25);
  }
}
