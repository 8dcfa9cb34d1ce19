//! Fused, differentiable matrix multiplication.
//! Small. Few dependencies. CPU reference backend included.
//!
//! # Features
//!
//! - **Fused operator**: Matrix product, optional transposition of either
//! operand, bias addition and activation run as one logical operation.
//!
//! - **Exact gradients**: The fused gradient rule reuses the building blocks
//! of the unfused primitives, so both produce identical gradients.
//!
//! - **Broadcasting**: Bias and batch dimensions broadcast following the usual
//! trailing alignment rule. Gradients get summed back to each operand's shape.
//!
//! - **Fail early**: All shapes and activation names get validated before the
//! first kernel runs. Errors name the failing operation and its shapes.
//!
//! - **Pluggable**: Kernels come from a [Backend], gradients get registered
//! with a [Recorder]. Reference implementations of both are included.
//!
//! # Examples
//!
//! Computing a dense layer and its gradients:
//! ```
//! use microfuse::{ Tensor, MatMulSpec, Activation, Cpu, Tape };
//!
//! let x = Tensor::<f32>::randn(&[4, 2]);
//! let w = Tensor::randn(&[2, 8]);
//! let b = Tensor::zeros(&[8]);
//!
//! // Record a fused matmul
//! let tape = Tape::new();
//! let y = MatMulSpec::new(&x, &w)
//!   .bias(&b)
//!   .activation(Activation::Relu)
//!   .run_recorded(&Cpu, &tape)
//!   .unwrap();
//!
//! // Back-propagate
//! let grads = tape.gradients(&y, &Tensor::ones(y.dims()), &[&w, &b]).unwrap();
//! assert_eq!(grads[0].as_ref().unwrap().dims(), &[2, 8]);
//! assert_eq!(grads[1].as_ref().unwrap().dims(), &[8]);
//! ```
//!
//! String tagged activations, as found in model descriptions:
//! ```
//! use microfuse::{ Tensor, Cpu, FusionError, fused::mat_mul, tape::NoGrad };
//!
//! let x = Tensor::<f64>::randn(&[2, 3]);
//! let w = Tensor::randn(&[2, 3]);
//! let y = mat_mul(&Cpu, &NoGrad, &x, &w, false, true, None, "sigmoid").unwrap();
//! assert_eq!(y.dims(), &[2, 2]);
//!
//! let err = mat_mul(&Cpu, &NoGrad, &x, &w, false, true, None, "swish").unwrap_err();
//! assert_eq!(err, FusionError::UnknownActivation("swish".into()));
//! ```
//!
//! ## More examples
//! Check the `/demos` folder for more example code.
//!
//!
//! # Optional features
//!
//! Some features can be toggled in your `Cargo.toml`.
//!
//! - `unsafe` *(default)*: Accelerated matrix math using the `matrixmultiply` crate.
//! - `rayon`: Multi-threaded matrix products over batch dimensions.

mod internal;
mod shape;
mod tensor;

pub mod scalar;
pub mod error;
pub mod broadcast;
pub mod backend;
pub mod activation;
pub mod tape;
pub mod ops;
pub mod fused;

pub use shape::Shape;
pub use tensor::Tensor;
pub use error::{ FusionError, Result };
pub use activation::Activation;
pub use backend::{ Backend, Cpu, Unary };
pub use broadcast::{ BroadcastPlan, MatMulPlan, Side };
pub use tape::{ Tape, Recorder, NoGrad };
pub use fused::{ MatMulSpec, SavedFusionContext, FusedGradients };
