use rand::distributions::uniform::SampleUniform;
use num_traits::{NumAssignOps, Num, NumCast};


/// All types that may be stored in a [Tensor](crate::Tensor).
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Inner: PartialEq + Clone + Copy + Send + Sync + std::fmt::Debug {}
impl<T: PartialEq + Clone + Copy + Send + Sync + std::fmt::Debug> Inner for T {}


/// All numeric types.
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Numeric: Inner + PartialOrd + Num + NumCast + NumAssignOps + std::iter::Sum {}
impl<T: Inner + PartialOrd + Num + NumCast + NumAssignOps + std::iter::Sum> Numeric for T {}


/// Continuous numeric types that gradients can be computed for.
///
/// Implemented automatically for every type that also
/// has a [Gemm] kernel, which in practice means `f32` and `f64`.

pub trait Real: Numeric + num_traits::real::Real + SampleUniform + Gemm + 'static {}
impl<T: Numeric + num_traits::real::Real + SampleUniform + Gemm + 'static> Real for T {}


/// General matrix multiply of a single `m x k` by `k x n` matrix pair.
///
/// Operands are read through arbitrary element strides, so transposed
/// views can be multiplied without copying. The result gets written
/// row-major into `c`, which must hold `m * n` elements.

pub trait Gemm: Sized {
  #[allow(clippy::too_many_arguments)]
  fn gemm(
    m: usize, k: usize, n: usize,
    a: &[Self], a_offset: usize, rsa: isize, csa: isize,
    b: &[Self], b_offset: usize, rsb: isize, csb: isize,
    c: &mut [Self],
  );
}

#[allow(clippy::too_many_arguments)]
#[cfg_attr(feature = "unsafe", allow(dead_code))]
fn naive_gemm<T: Numeric>(
  m: usize, k: usize, n: usize,
  a: &[T], a_offset: usize, rsa: isize, csa: isize,
  b: &[T], b_offset: usize, rsb: isize, csb: isize,
  c: &mut [T],
) {
  let at = |base: usize, i: usize, j: usize, rs: isize, cs: isize| {
    (base as isize + i as isize * rs + j as isize * cs) as usize
  };
  for i in 0..m {
    for j in 0..n {
      let mut acc = T::zero();
      for l in 0..k {
        acc += a[at(a_offset, i, l, rsa, csa)] * b[at(b_offset, l, j, rsb, csb)];
      }
      c[i * n + j] = acc;
    }
  }
}

macro_rules! impl_gemm {
  ($type:ty, $kernel:ident) => {
    impl Gemm for $type {
      #[cfg(feature = "unsafe")]
      fn gemm(
        m: usize, k: usize, n: usize,
        a: &[Self], a_offset: usize, rsa: isize, csa: isize,
        b: &[Self], b_offset: usize, rsb: isize, csb: isize,
        c: &mut [Self],
      ) {
        debug_assert!(c.len() >= m * n);
        if m == 0 || n == 0 { return }
        // Offsets and strides come from shapes that were validated against
        // the storage length of both operands.
        unsafe {
          matrixmultiply::$kernel(
            m, k, n,
            1.0,
            a.as_ptr().add(a_offset), rsa, csa,
            b.as_ptr().add(b_offset), rsb, csb,
            0.0,
            c.as_mut_ptr(), n as isize, 1,
          );
        }
      }

      #[cfg(not(feature = "unsafe"))]
      fn gemm(
        m: usize, k: usize, n: usize,
        a: &[Self], a_offset: usize, rsa: isize, csa: isize,
        b: &[Self], b_offset: usize, rsb: isize, csb: isize,
        c: &mut [Self],
      ) {
        naive_gemm(m, k, n, a, a_offset, rsa, csa, b, b_offset, rsb, csb, c)
      }
    }
  };
}

impl_gemm!(f32, sgemm);
impl_gemm!(f64, dgemm);


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn gemm_strided() {
    // [[1,2,3],[4,5,6]] x [[0,1],[-3,2],[2,1]]
    let a: [f32; 6] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let b: [f32; 6] = [0.0, 1.0, -3.0, 2.0, 2.0, 1.0];
    let mut c = [0.0f32; 4];
    f32::gemm(2, 3, 2, &a, 0, 3, 1, &b, 0, 2, 1, &mut c);
    assert_eq!(c, [0.0, 8.0, -3.0, 20.0]);

    // Same right operand, read through transposed strides of its [2,3] storage
    let a: [f64; 6] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let bt: [f64; 6] = [0.0, -3.0, 2.0, 1.0, 2.0, 1.0];
    let mut c = [0.0f64; 4];
    f64::gemm(2, 3, 2, &a, 0, 3, 1, &bt, 0, 1, 3, &mut c);
    assert_eq!(c, [0.0, 8.0, -3.0, 20.0]);
  }

  #[test]
  fn naive_matches() {
    let a = [1, 2, 3, 4, 5, 6];
    let b = [1, 2, 3, 4, 5, 6];
    let mut c = [0; 4];
    naive_gemm(2, 3, 2, &a, 0, 3, 1, &b, 0, 2, 1, &mut c);
    assert_eq!(c, [22, 28, 49, 64]);
  }
}
