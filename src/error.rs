use thiserror::Error;


/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, FusionError>;


/// Errors raised by fused and primitive operations.
///
/// Every variant carries enough context (operation, shapes, tag) to
/// diagnose the failing call without inspecting internals.

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
  /// Shapes that cannot be combined by the named operation.
  #[error("{op}: incompatible shapes {lhs:?} and {rhs:?}")]
  Shape {
    op: &'static str,
    lhs: Vec<usize>,
    rhs: Vec<usize>,
  },

  /// An operand with fewer dimensions than the operation requires.
  #[error("{op}: expected rank >= {min}, got shape {dims:?}")]
  Rank {
    op: &'static str,
    dims: Vec<usize>,
    min: usize,
  },

  /// Activation tag that has no entry in the registry.
  #[error("unknown activation '{0}'")]
  UnknownActivation(String),

  /// Opaque failure reported by a backend kernel.
  #[error("kernel failed: {0}")]
  Kernel(String),

  /// Data length that doesn't fit the requested dims.
  #[error("data of length {len} doesn't fit dims {dims:?}")]
  Data {
    dims: Vec<usize>,
    len: usize,
  },
}

impl FusionError {
  pub(crate) fn shape(op: &'static str, lhs: &[usize], rhs: &[usize]) -> Self {
    Self::Shape { op, lhs: lhs.to_vec(), rhs: rhs.to_vec() }
  }

  /// Whether this is one of the shape related errors.

  pub fn is_shape_error(&self) -> bool {
    matches!(self, Self::Shape { .. } | Self::Rank { .. })
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn messages_name_offending_shapes() {
    let err = FusionError::shape("matmul", &[2,3], &[2,2]);
    assert_eq!(err.to_string(), "matmul: incompatible shapes [2, 3] and [2, 2]");
    assert!(err.is_shape_error());

    let err = FusionError::UnknownActivation("elu".into());
    assert_eq!(err.to_string(), "unknown activation 'elu'");
    assert!(!err.is_shape_error());
  }
}
