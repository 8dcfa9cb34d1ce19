use itertools::{Itertools, EitherOrBoth};
use serde::{Serialize, Deserialize};

use crate::error::{FusionError, Result};


/// Operand position in a binary operation.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
  Lhs,
  Rhs,
}


/// Outcome of broadcasting two shapes against each other.
///
/// Reduced axes are given in output coordinates and list every axis where
/// the operand had size 1 (or didn't exist) while the output is larger.
/// Summing a gradient over exactly these axes undoes the broadcast.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastPlan {
  pub dims: Vec<usize>,
  pub reduced_lhs: Vec<usize>,
  pub reduced_rhs: Vec<usize>,
}

impl BroadcastPlan {
  pub fn reduced(&self, side: Side) -> &[usize] {
    match side {
      Side::Lhs => &self.reduced_lhs,
      Side::Rhs => &self.reduced_rhs,
    }
  }

  pub fn rank(&self) -> usize {
    self.dims.len()
  }

  pub fn size(&self) -> usize {
    self.dims.iter().product()
  }
}


/// Resolve the broadcast of two shapes.
///
/// Shapes get right-aligned and the shorter one is padded with leading ones.
/// Aligned dimensions must either match or one of them must be 1.

pub fn resolve(lhs: &[usize], rhs: &[usize]) -> Result<BroadcastPlan> {
  let rank = lhs.len().max(rhs.len());
  let mut dims = vec![0; rank];
  let mut reduced_lhs = vec![];
  let mut reduced_rhs = vec![];
  for (i, pair) in lhs.iter().rev().zip_longest(rhs.iter().rev()).enumerate() {
    let axis = rank - 1 - i;
    let (dl, dr) = match pair {
      EitherOrBoth::Both(&dl, &dr) => (dl, dr),
      EitherOrBoth::Left(&dl) => (dl, 1),
      EitherOrBoth::Right(&dr) => (1, dr),
    };
    dims[axis] = if dl == dr {
      dl
    } else if dl == 1 {
      reduced_lhs.push(axis);
      dr
    } else if dr == 1 {
      reduced_rhs.push(axis);
      dl
    } else {
      return Err(FusionError::shape("broadcast", lhs, rhs))
    };
  }
  reduced_lhs.reverse();
  reduced_rhs.reverse();
  Ok(BroadcastPlan { dims, reduced_lhs, reduced_rhs })
}


/// Geometry of a (batched) matrix product after applying transpose flags.
///
/// `batch` broadcasts all but the last two dims of both operands.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatMulPlan {
  pub rows: usize,
  pub inner: usize,
  pub cols: usize,
  pub batch: BroadcastPlan,
}

impl MatMulPlan {
  pub fn resolve(lhs: &[usize], rhs: &[usize], transpose_lhs: bool, transpose_rhs: bool) -> Result<Self> {
    for dims in [lhs, rhs] {
      if dims.len() < 2 {
        return Err(FusionError::Rank { op: "matmul", dims: dims.to_vec(), min: 2 })
      }
    }
    let (batch_l, mat_l) = lhs.split_at(lhs.len() - 2);
    let (batch_r, mat_r) = rhs.split_at(rhs.len() - 2);

    let (rows, inner_l) = if transpose_lhs { (mat_l[1], mat_l[0]) } else { (mat_l[0], mat_l[1]) };
    let (inner_r, cols) = if transpose_rhs { (mat_r[1], mat_r[0]) } else { (mat_r[0], mat_r[1]) };
    if inner_l != inner_r {
      return Err(FusionError::shape("matmul", lhs, rhs))
    }

    let batch = resolve(batch_l, batch_r)
      .map_err(|_| FusionError::shape("matmul", lhs, rhs) )?;

    Ok(Self { rows, inner: inner_l, cols, batch })
  }

  /// Dims of the product.

  pub fn dims(&self) -> Vec<usize> {
    let mut dims = self.batch.dims.clone();
    dims.extend([self.rows, self.cols]);
    dims
  }
}
