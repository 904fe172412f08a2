// External imports
use burn::module::Module;
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::tensor::{activation, backend::Backend, Distribution, Tensor};

// Internal imports
use crate::constants::GATE_BIAS_INIT;
use crate::error::ModelError;

/// # GRU Sequence Encoder
///
/// A single-layer Gated Recurrent Unit that runs over a whole batch of
/// sequences, starting from a caller-supplied hidden state.
///
/// ## Mathematical Representation
///
/// For input x_t at time t and previous hidden state h_(t-1):
///
/// 1. Gates: [r_t, u_t] = σ(W_g · [x_t, h_(t-1)] + b_g)
/// 2. Candidate state: c_t = tanh(W_c · [x_t, r_t ∘ h_(t-1)] + b_c)
/// 3. New hidden state: h_t = u_t ∘ h_(t-1) + (1 - u_t) ∘ c_t
///
/// Where:
/// - σ is the sigmoid function
/// - ∘ denotes element-wise multiplication
/// - b_g starts at 1.0 so the cell initially leans towards keeping its state
///
/// Dropout is applied to the input connection x_t only.
#[derive(Module, Debug)]
pub struct GruEncoder<B: Backend> {
    input_size: usize,
    hidden_size: usize,

    // Reset and update gates, [input_size + hidden_size] -> [2 * hidden_size]
    gates: Linear<B>,
    // Candidate state, [input_size + hidden_size] -> [hidden_size]
    candidate: Linear<B>,
}

/// Result of running the encoder over one batch
#[derive(Debug, Clone)]
pub struct EncoderOutput<B: Backend> {
    /// Hidden state after every time step, [batch_size, seq_len, hidden_size]
    pub outputs: Tensor<B, 3>,
    /// Hidden state after the last time step, [batch_size, hidden_size]
    pub state: Tensor<B, 2>,
}

impl<B: Backend> GruEncoder<B> {
    /// Create a new GRU encoder with Xavier-initialized kernels
    ///
    /// # Arguments
    ///
    /// * `input_size` - Width of each feature vector (D)
    /// * `hidden_size` - Width of the hidden state (H)
    /// * `device` - The device to allocate tensors on
    pub fn new(input_size: usize, hidden_size: usize, device: &B::Device) -> Self {
        let concat_size = input_size + hidden_size;
        let kernel_init = Initializer::XavierUniform { gain: 1.0 };

        let gates = LinearConfig::new(concat_size, 2 * hidden_size)
            .with_initializer(kernel_init.clone())
            .init(device);
        let gates = Linear {
            bias: Some(Initializer::Constant { value: GATE_BIAS_INIT }.init([2 * hidden_size], device)),
            ..gates
        };

        let candidate = LinearConfig::new(concat_size, hidden_size)
            .with_initializer(kernel_init)
            .init(device);
        let candidate = Linear {
            bias: Some(Initializer::Zeros.init([hidden_size], device)),
            ..candidate
        };

        Self {
            input_size,
            hidden_size,
            gates,
            candidate,
        }
    }

    /// Builds an encoder from explicit gate and candidate layers.
    ///
    /// `gates` maps `input_size + hidden_size` to `2 * hidden_size` (reset first, then update);
    /// `candidate` maps `input_size + hidden_size` to `hidden_size`.
    pub fn from_layers(
        input_size: usize,
        hidden_size: usize,
        gates: Linear<B>,
        candidate: Linear<B>,
    ) -> Result<Self, ModelError> {
        let concat_size = input_size + hidden_size;
        let gate_dims = gates.weight.dims();
        if gate_dims != [concat_size, 2 * hidden_size] {
            return Err(ModelError::ShapeMismatch {
                context: "gate kernel",
                expected: vec![concat_size, 2 * hidden_size],
                actual: gate_dims.to_vec(),
            });
        }
        let candidate_dims = candidate.weight.dims();
        if candidate_dims != [concat_size, hidden_size] {
            return Err(ModelError::ShapeMismatch {
                context: "candidate kernel",
                expected: vec![concat_size, hidden_size],
                actual: candidate_dims.to_vec(),
            });
        }

        Ok(Self {
            input_size,
            hidden_size,
            gates,
            candidate,
        })
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Zero state for a batch of `batch_size` sequences
    pub fn zero_state(&self, batch_size: usize, device: &B::Device) -> Tensor<B, 2> {
        Tensor::zeros([batch_size, self.hidden_size], device)
    }

    /// Runs the cell over every time step of `x`
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape [batch_size, seq_len, input_size]
    /// * `state` - Initial hidden state of shape [batch_size, hidden_size]
    /// * `keep_prob` - Probability of keeping each input unit; 1.0 disables dropout
    ///
    /// # Returns
    ///
    /// Per-step outputs and the final state, or `ShapeMismatch` when `x` and `state`
    /// disagree with each other or with the encoder dimensions.
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        state: Tensor<B, 2>,
        keep_prob: f64,
    ) -> Result<EncoderOutput<B>, ModelError> {
        let [batch_size, seq_len, input_size] = x.dims();
        let state_dims = state.dims();

        if input_size != self.input_size {
            return Err(ModelError::ShapeMismatch {
                context: "encoder input",
                expected: vec![batch_size, seq_len, self.input_size],
                actual: vec![batch_size, seq_len, input_size],
            });
        }
        if state_dims != [batch_size, self.hidden_size] {
            return Err(ModelError::ShapeMismatch {
                context: "carried state",
                expected: vec![batch_size, self.hidden_size],
                actual: state_dims.to_vec(),
            });
        }
        if !(keep_prob > 0.0 && keep_prob <= 1.0) {
            return Err(ModelError::InvalidKeepProb(keep_prob));
        }

        let x = apply_input_dropout(x, keep_prob);

        let mut h = state;
        let mut steps = Vec::with_capacity(seq_len);

        for t in 0..seq_len {
            let x_t = x
                .clone()
                .narrow(1, t, 1)
                .reshape([batch_size, self.input_size]);

            let gate_values = activation::sigmoid(
                self.gates
                    .forward(Tensor::cat(vec![x_t.clone(), h.clone()], 1)),
            );
            let r = gate_values.clone().narrow(1, 0, self.hidden_size); // reset gate
            let u = gate_values.narrow(1, self.hidden_size, self.hidden_size); // update gate

            let c = activation::tanh(
                self.candidate
                    .forward(Tensor::cat(vec![x_t, r * h.clone()], 1)),
            );

            h = u.clone() * h + (u.ones_like() - u) * c;

            steps.push(h.clone().reshape([batch_size, 1, self.hidden_size]));
        }

        Ok(EncoderOutput {
            outputs: Tensor::cat(steps, 1),
            state: h,
        })
    }
}

/// Inverted dropout: zero each unit with probability `1 - keep_prob` and scale the
/// survivors by `1 / keep_prob`.
fn apply_input_dropout<B: Backend>(x: Tensor<B, 3>, keep_prob: f64) -> Tensor<B, 3> {
    if keep_prob >= 1.0 {
        return x;
    }

    let mask = x.random_like(Distribution::Bernoulli(keep_prob));
    x * mask / keep_prob
}
