// This example trains a tiny two layer perceptron on XOR.

// Every layer is a single fused matmul with bias and activation. The tape
// records one entry per layer and gets rebuilt for every training step.

use microfuse::{ Tensor, MatMulSpec, Activation, Cpu, Tape, Result };

struct DenseLayer {
  weights: Tensor<f32>,
  bias: Tensor<f32>,
  activation: Activation,
}

impl DenseLayer {
  pub fn new(input_size: usize, size: usize, activation: Activation) -> Self {
    Self {
      weights: Tensor::randn(&[input_size, size]).scale(1.0 / size as f32),
      bias: Tensor::zeros(&[size]),
      activation,
    }
  }

  pub fn run(&self, input: &Tensor<f32>, tape: &Tape<f32>) -> Result<Tensor<f32>> {
    MatMulSpec::new(input, &self.weights)
      .bias(&self.bias)
      .activation(self.activation)
      .run_recorded(&Cpu, tape)
  }

  pub fn parameters(&self) -> [&Tensor<f32>; 2] {
    [&self.weights, &self.bias]
  }
}

fn main() -> Result<()> {
  let mut layers = vec![
    DenseLayer::new(2, 16, Activation::Relu),
    DenseLayer::new(16, 1, Activation::Sigmoid),
  ];

  let x = Tensor::new(&[4, 2], vec![0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0])?;
  let target = Tensor::new(&[4, 1], vec![0.0, 1.0, 1.0, 0.0])?;
  let learning_rate = 0.5;

  for step in 0..2000 {
    let tape = Tape::new();

    // Forward pass
    let mut y = x.clone();
    for layer in &layers {
      y = layer.run(&y, &tape)?;
    }

    // Mean squared error and its gradient
    let error = y.sub(&target)?;
    let loss = error.mul(&error)?.total() / 4.0;
    let upstream = error.scale(2.0 / 4.0);

    // Back-propagate and apply gradient descent
    let params: Vec<_> = layers.iter().flat_map(|layer| layer.parameters() ).collect();
    let grads = tape.gradients(&y, &upstream, &params)?;
    for (layer, grads) in layers.iter_mut().zip(grads.chunks(2)) {
      if let [Some(dw), Some(db)] = grads {
        layer.weights = layer.weights.sub(&dw.scale(learning_rate))?;
        layer.bias = layer.bias.sub(&db.scale(learning_rate))?;
      }
    }

    if step % 200 == 0 {
      println!("Step {step}: loss {loss}");
    }
  }

  let tape = Tape::new();
  let mut y = x.clone();
  tape.paused(|| -> Result<()> {
    for layer in &layers {
      y = layer.run(&y, &tape)?;
    }
    Ok(())
  })?;
  println!("Prediction: {}", y);

  Ok(())
}
