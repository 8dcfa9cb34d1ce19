use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::scalar::Real;


pub fn make_id() -> usize {
  static LAST_ID: AtomicUsize = AtomicUsize::new(0);
  LAST_ID.fetch_add(1, Ordering::Relaxed)
}


#[inline]
pub fn negative_index(i: isize, n: usize) -> usize {
  if i < 0 {
    (n as isize + i) as usize
  } else {
    i as usize
  }
}


/// Split a flat, row-major position into per-dimension indices.

pub fn unravel(mut flat: usize, dims: &[usize]) -> Vec<usize> {
  let mut indices = vec![0; dims.len()];
  for d in (0..dims.len()).rev() {
    indices[d] = flat % dims[d];
    flat /= dims[d];
  }
  indices
}


// Polar Box-Muller transformation

pub fn randn<T: Real>() -> (T, T) {
  let mut rng = rand::thread_rng();
  let u = rng.gen_range(-T::one(), T::one());
  let v = rng.gen_range(-T::one(), T::one());
  let r = u * u + v * v;
  // Try again if outside interval
  if r == T::zero() || r >= T::one() { return randn() }
  let c = (T::from(-2.0).unwrap() * r.ln() / r).sqrt();
  (u * c, v * c)
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unravel_row_major() {
    assert_eq!(unravel(0, &[2,3]), vec![0, 0]);
    assert_eq!(unravel(4, &[2,3]), vec![1, 1]);
    assert_eq!(unravel(5, &[2,1,3]), vec![1, 0, 2]);
    assert_eq!(unravel(0, &[]), Vec::<usize>::new());
  }
}
