// External imports
use burn::module::{Ignored, Module};
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::prelude::Backend;
use burn::tensor::{activation, Tensor};
use serde::{Deserialize, Serialize};

// Internal imports
use super::step_1_tensor_preparation::LabelEncoding;
use super::step_2_gru_cell::GruEncoder;
use crate::constants::{HEAD_BIAS_INIT, SOFTMAX_WEIGHT_STDDEV};
use crate::error::ModelError;

/// Output layer flavour on top of the GRU encoder
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum HeadKind {
    /// L2-SVM: squared hinge loss plus 0.5 * ||W||^2, decision by sign
    Svm { c: f64 },
    /// Softmax cross-entropy, decision by argmax of the class probabilities
    Softmax,
}

impl HeadKind {
    /// Label layout this head is trained against
    pub fn label_encoding(&self) -> LabelEncoding {
        match self {
            HeadKind::Svm { .. } => LabelEncoding::Signed,
            HeadKind::Softmax => LabelEncoding::OneHot,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HeadKind::Svm { .. } => "gru_svm",
            HeadKind::Softmax => "gru_softmax",
        }
    }
}

/// Dimensions needed to rebuild a classifier before loading its record
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub input_size: usize,
    pub cell_size: usize,
    pub num_classes: usize,
    pub head: HeadKind,
}

impl ModelConfig {
    pub fn new(input_size: usize, cell_size: usize, num_classes: usize, head: HeadKind) -> Self {
        Self {
            input_size,
            cell_size,
            num_classes,
            head,
        }
    }

    /// Initialize a fresh classifier from this configuration
    pub fn init<B: Backend>(&self, device: &B::Device) -> GruClassifier<B> {
        GruClassifier::new(self, device)
    }
}

/// Scores and carried state produced by one forward pass
#[derive(Debug, Clone)]
pub struct ClassifierOutput<B: Backend> {
    /// Class scores (pre-activations), [batch_size, num_classes]
    pub scores: Tensor<B, 2>,
    /// Final hidden state, [batch_size, cell_size]
    pub state: Tensor<B, 2>,
}

/// # GRU Classifier
///
/// A single-layer GRU followed by a linear head `scores = h_L · W + b`, where
/// `h_L` is the hidden state at the last time step.
///
/// The head is either an L2-SVM or a softmax layer, selected by [`HeadKind`].
#[derive(Module, Debug)]
pub struct GruClassifier<B: Backend> {
    encoder: GruEncoder<B>,
    output: Linear<B>,
    num_classes: usize,
    head: Ignored<HeadKind>,
}

impl<B: Backend> GruClassifier<B> {
    /// Creates a classifier with the head initialization of the chosen variant
    ///
    /// SVM weights are Xavier-uniform, softmax weights are N(0, 0.01); both biases start at 0.1.
    pub fn new(config: &ModelConfig, device: &B::Device) -> Self {
        let encoder = GruEncoder::new(config.input_size, config.cell_size, device);

        let weight_init = match config.head {
            HeadKind::Svm { .. } => Initializer::XavierUniform { gain: 1.0 },
            HeadKind::Softmax => Initializer::Normal {
                mean: 0.0,
                std: SOFTMAX_WEIGHT_STDDEV,
            },
        };
        let output = LinearConfig::new(config.cell_size, config.num_classes)
            .with_initializer(weight_init)
            .init(device);
        let output = Linear {
            bias: Some(Initializer::Constant { value: HEAD_BIAS_INIT }.init([config.num_classes], device)),
            ..output
        };

        Self {
            encoder,
            output,
            num_classes: config.num_classes,
            head: Ignored(config.head),
        }
    }

    /// Assembles a classifier from prebuilt parts, checking that they fit together
    pub fn from_parts(encoder: GruEncoder<B>, output: Linear<B>, head: HeadKind) -> Result<Self, ModelError> {
        let [cell_size, num_classes] = output.weight.dims();
        if cell_size != encoder.hidden_size() {
            return Err(ModelError::ShapeMismatch {
                context: "head weight",
                expected: vec![encoder.hidden_size(), num_classes],
                actual: vec![cell_size, num_classes],
            });
        }

        Ok(Self {
            encoder,
            output,
            num_classes,
            head: Ignored(head),
        })
    }

    pub fn config(&self) -> ModelConfig {
        ModelConfig::new(
            self.encoder.input_size(),
            self.encoder.hidden_size(),
            self.num_classes,
            *self.head,
        )
    }

    pub fn head(&self) -> HeadKind {
        *self.head
    }

    pub fn cell_size(&self) -> usize {
        self.encoder.hidden_size()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Zero recurrent state for `batch_size` sequences
    pub fn zero_state(&self, batch_size: usize, device: &B::Device) -> Tensor<B, 2> {
        self.encoder.zero_state(batch_size, device)
    }

    /// Head weight matrix, [cell_size, num_classes]
    pub fn head_weight(&self) -> Tensor<B, 2> {
        self.output.weight.val()
    }

    /// Head bias, [num_classes]
    pub fn head_bias(&self) -> Option<Tensor<B, 1>> {
        self.output.bias.as_ref().map(|bias| bias.val())
    }

    /// Forward pass over one batch
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape [batch_size, seq_len, input_size]
    /// * `state` - Carried hidden state of shape [batch_size, cell_size]
    /// * `keep_prob` - Dropout keep probability on the GRU input; 1.0 for evaluation
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        state: Tensor<B, 2>,
        keep_prob: f64,
    ) -> Result<ClassifierOutput<B>, ModelError> {
        let encoded = self.encoder.forward(x, state, keep_prob)?;
        let [batch_size, seq_len, cell_size] = encoded.outputs.dims();

        // [seq_len, batch_size, cell_size], then take the last time step
        let last = encoded
            .outputs
            .swap_dims(0, 1)
            .narrow(0, seq_len - 1, 1)
            .reshape([batch_size, cell_size]);

        Ok(ClassifierOutput {
            scores: self.output.forward(last),
            state: encoded.state,
        })
    }

    /// Training objective of the configured head
    pub fn loss(&self, scores: Tensor<B, 2>, labels: Tensor<B, 2>) -> Tensor<B, 1> {
        match *self.head {
            HeadKind::Svm { c } => svm_loss(self.head_weight(), scores, labels, c),
            HeadKind::Softmax => softmax_cross_entropy(scores, labels),
        }
    }

    /// Decision values: sign of the scores (SVM) or class probabilities (softmax)
    pub fn predictions(&self, scores: Tensor<B, 2>) -> Tensor<B, 2> {
        decision_values(*self.head, scores)
    }

    /// Fraction of rows whose predicted top class matches the label's top class
    pub fn accuracy(&self, scores: Tensor<B, 2>, labels: Tensor<B, 2>) -> Tensor<B, 1> {
        argmax_accuracy(self.predictions(scores), labels)
    }
}

/// Sign of the scores (SVM) or softmax probabilities (softmax)
pub fn decision_values<B: Backend>(head: HeadKind, scores: Tensor<B, 2>) -> Tensor<B, 2> {
    match head {
        HeadKind::Svm { .. } => scores.sign(),
        HeadKind::Softmax => activation::softmax(scores, 1),
    }
}

/// L2-SVM objective: `0.5 * ||W||^2 + c * sum(max(0, 1 - y * scores)^2)`
///
/// `labels` are +1 at the true class and -1 elsewhere. The hinge term is summed
/// over both the batch and the classes.
pub fn svm_loss<B: Backend>(
    weight: Tensor<B, 2>,
    scores: Tensor<B, 2>,
    labels: Tensor<B, 2>,
    c: f64,
) -> Tensor<B, 1> {
    let regularization_loss = weight.powf_scalar(2.0).sum() * 0.5;

    let margins = (labels * scores).neg().add_scalar(1.0);
    let hinge_loss = margins.clamp_min(0.0).powf_scalar(2.0).sum();

    regularization_loss + hinge_loss * c
}

/// Mean softmax cross-entropy of `scores` against one-hot `labels`
pub fn softmax_cross_entropy<B: Backend>(scores: Tensor<B, 2>, labels: Tensor<B, 2>) -> Tensor<B, 1> {
    let log_probs = activation::log_softmax(scores, 1);
    (labels * log_probs).sum_dim(1).neg().mean()
}

/// Mean of `argmax(predictions) == argmax(labels)` over the batch
pub fn argmax_accuracy<B: Backend>(predictions: Tensor<B, 2>, labels: Tensor<B, 2>) -> Tensor<B, 1> {
    predictions
        .argmax(1)
        .equal(labels.argmax(1))
        .float()
        .mean()
}
