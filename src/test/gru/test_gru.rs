// External imports
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use burn::module::Param;
use burn::nn::Linear;
use burn::optim::AdamConfig;
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor, TensorData};

// Internal imports
use crate::error::ModelError;
use crate::gru::step_2_gru_cell::GruEncoder;
use crate::gru::step_3_gru_model_arch::{
    argmax_accuracy, softmax_cross_entropy, svm_loss, GruClassifier, HeadKind, ModelConfig,
};
use crate::gru::step_4_train_model::{evaluate_batch, train_step, BatchTensors};

type TestBackend = NdArray<f32>;
type TrainBackend = Autodiff<NdArray<f32>>;

const BATCH: usize = 2;
const STEPS: usize = 3;
const INPUT: usize = 2;
const HIDDEN: usize = 2;
const CLASSES: usize = 2;

/// Deterministic weight values in [-0.5, 0.5]
fn known_values(len: usize, seed: usize) -> Vec<f32> {
    (0..len)
        .map(|i| ((i * 7 + seed * 3) % 11) as f32 / 10.0 - 0.5)
        .collect()
}

fn linear<B: Backend>(weight: &[f32], bias: &[f32], d_input: usize, d_output: usize, device: &B::Device) -> Linear<B> {
    Linear {
        weight: Param::from_tensor(Tensor::from_data(
            TensorData::new(weight.to_vec(), [d_input, d_output]),
            device,
        )),
        bias: Some(Param::from_tensor(Tensor::from_data(
            TensorData::new(bias.to_vec(), [d_output]),
            device,
        ))),
    }
}

/// Parameters of the hand-checked classifier, row-major `[d_input, d_output]` kernels
struct KnownWeights {
    gates: Vec<f32>,
    gates_bias: Vec<f32>,
    candidate: Vec<f32>,
    candidate_bias: Vec<f32>,
    output: Vec<f32>,
    output_bias: Vec<f32>,
}

impl KnownWeights {
    fn new() -> Self {
        let concat = INPUT + HIDDEN;
        Self {
            gates: known_values(concat * 2 * HIDDEN, 1),
            gates_bias: vec![1.0; 2 * HIDDEN],
            candidate: known_values(concat * HIDDEN, 2),
            candidate_bias: vec![0.0; HIDDEN],
            output: known_values(HIDDEN * CLASSES, 3),
            output_bias: vec![0.1; CLASSES],
        }
    }

    fn classifier<B: Backend>(&self, head: HeadKind, device: &B::Device) -> GruClassifier<B> {
        let concat = INPUT + HIDDEN;
        let encoder = GruEncoder::from_layers(
            INPUT,
            HIDDEN,
            linear(&self.gates, &self.gates_bias, concat, 2 * HIDDEN, device),
            linear(&self.candidate, &self.candidate_bias, concat, HIDDEN, device),
        )
        .unwrap();
        let output = linear(&self.output, &self.output_bias, HIDDEN, CLASSES, device);
        GruClassifier::from_parts(encoder, output, head).unwrap()
    }
}

/// `x · W + b` with `W` stored row-major as `[x.len(), d_output]`
fn affine(x: &[f64], weight: &[f32], bias: &[f32], d_output: usize) -> Vec<f64> {
    (0..d_output)
        .map(|j| {
            bias[j] as f64
                + x.iter()
                    .enumerate()
                    .map(|(i, xi)| xi * weight[i * d_output + j] as f64)
                    .sum::<f64>()
        })
        .collect()
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

/// Scores of one sequence computed by hand in f64, starting from a zero state
fn reference_scores(weights: &KnownWeights, sequence: &[Vec<f64>]) -> Vec<f64> {
    let mut h = vec![0.0; HIDDEN];

    for x_t in sequence {
        let xh: Vec<f64> = x_t.iter().chain(h.iter()).copied().collect();
        let gates: Vec<f64> = affine(&xh, &weights.gates, &weights.gates_bias, 2 * HIDDEN)
            .into_iter()
            .map(sigmoid)
            .collect();
        let (r, u) = gates.split_at(HIDDEN);

        let rh: Vec<f64> = r.iter().zip(&h).map(|(r, h)| r * h).collect();
        let xrh: Vec<f64> = x_t.iter().chain(rh.iter()).copied().collect();
        let c: Vec<f64> = affine(&xrh, &weights.candidate, &weights.candidate_bias, HIDDEN)
            .into_iter()
            .map(f64::tanh)
            .collect();

        h = (0..HIDDEN).map(|k| u[k] * h[k] + (1.0 - u[k]) * c[k]).collect();
    }

    affine(&h, &weights.output, &weights.output_bias, CLASSES)
}

/// Input of the hand-checked case as nested rows and as a flat `[B, L, D]` buffer
fn known_input() -> (Vec<Vec<Vec<f64>>>, Vec<f32>) {
    let flat: Vec<f32> = (0..BATCH * STEPS * INPUT)
        .map(|i| i as f32 / 6.0 - 0.5)
        .collect();
    let nested = (0..BATCH)
        .map(|b| {
            (0..STEPS)
                .map(|t| {
                    let start = (b * STEPS + t) * INPUT;
                    flat[start..start + INPUT].iter().map(|&v| v as f64).collect()
                })
                .collect()
        })
        .collect();
    (nested, flat)
}

const LABELS: [usize; BATCH] = [1, 0];

fn reference_svm_loss(weights: &KnownWeights, inputs: &[Vec<Vec<f64>>]) -> f64 {
    let regularization: f64 = weights.output.iter().map(|&w| (w as f64).powi(2)).sum::<f64>() * 0.5;
    let hinge: f64 = inputs
        .iter()
        .zip(LABELS)
        .map(|(sequence, label)| {
            reference_scores(weights, sequence)
                .iter()
                .enumerate()
                .map(|(class, score)| {
                    let y = if class == label { 1.0 } else { -1.0 };
                    (1.0 - y * score).max(0.0).powi(2)
                })
                .sum::<f64>()
        })
        .sum();
    regularization + hinge
}

fn reference_cross_entropy(weights: &KnownWeights, inputs: &[Vec<Vec<f64>>]) -> f64 {
    let total: f64 = inputs
        .iter()
        .zip(LABELS)
        .map(|(sequence, label)| {
            let scores = reference_scores(weights, sequence);
            let log_norm = scores.iter().map(|s| s.exp()).sum::<f64>().ln();
            log_norm - scores[label]
        })
        .sum();
    total / BATCH as f64
}

fn known_batch<B: Backend>(head: HeadKind, device: &B::Device) -> BatchTensors<B> {
    let (_, flat) = known_input();
    let off = match head {
        HeadKind::Svm { .. } => -1.0f32,
        HeadKind::Softmax => 0.0f32,
    };
    let mut labels = vec![off; BATCH * CLASSES];
    for (row, &label) in LABELS.iter().enumerate() {
        labels[row * CLASSES + label] = 1.0;
    }

    BatchTensors {
        features: Tensor::from_data(TensorData::new(flat, [BATCH, STEPS, INPUT]), device),
        labels: Tensor::from_data(TensorData::new(labels, [BATCH, CLASSES]), device),
    }
}

#[test]
fn test_encoder_final_state_shape() {
    let device = Default::default();

    for (seq_len, input_size) in [(1, 1), (3, 10), (21, 10), (5, 41)] {
        let encoder = GruEncoder::<TestBackend>::new(input_size, 8, &device);
        let x = Tensor::<TestBackend, 3>::ones([4, seq_len, input_size], &device);

        let output = encoder.forward(x, encoder.zero_state(4, &device), 0.55).unwrap();

        assert_eq!(output.state.dims(), [4, 8], "Final state should be [B, H]");
        assert_eq!(output.outputs.dims(), [4, seq_len, 8], "Outputs should be [B, L, H]");
    }
}

#[test]
fn test_encoder_rejects_mismatched_shapes() {
    let device = Default::default();
    let encoder = GruEncoder::<TestBackend>::new(3, 4, &device);

    // Wrong feature width
    let x = Tensor::<TestBackend, 3>::ones([2, 5, 6], &device);
    let result = encoder.forward(x, encoder.zero_state(2, &device), 1.0);
    assert!(matches!(result, Err(ModelError::ShapeMismatch { .. })));

    // State carried over from a different batch size
    let x = Tensor::<TestBackend, 3>::ones([2, 5, 3], &device);
    let result = encoder.forward(x, encoder.zero_state(3, &device), 1.0);
    assert!(matches!(result, Err(ModelError::ShapeMismatch { .. })));

    let x = Tensor::<TestBackend, 3>::ones([2, 5, 3], &device);
    let result = encoder.forward(x, encoder.zero_state(2, &device), 0.0);
    assert!(matches!(result, Err(ModelError::InvalidKeepProb(_))));
}

#[test]
fn test_losses_are_non_negative() {
    let device = Default::default();
    let x = Tensor::<TestBackend, 3>::random([8, 4, 3], burn::tensor::Distribution::Default, &device);

    for head in [HeadKind::Svm { c: 1.0 }, HeadKind::Softmax] {
        let model = ModelConfig::new(3, 6, 2, head).init::<TestBackend>(&device);
        let batch = known_batch::<TestBackend>(head, &device);
        let output = model.forward(x.clone(), model.zero_state(8, &device), 1.0).unwrap();

        let labels = batch.labels.repeat_dim(0, 4);
        let loss = model.loss(output.scores, labels).into_scalar().elem::<f64>();
        assert!(loss >= 0.0, "{} loss should be non-negative, got {}", head.name(), loss);
    }
}

#[test]
fn test_cross_entropy_vanishes_for_confident_predictions() {
    let device = Default::default();
    let labels = Tensor::<TestBackend, 2>::from_data([[1.0, 0.0], [0.0, 1.0]], &device);

    let confident = Tensor::<TestBackend, 2>::from_data([[20.0, -20.0], [-20.0, 20.0]], &device);
    let wrong = Tensor::<TestBackend, 2>::from_data([[-20.0, 20.0], [20.0, -20.0]], &device);

    let low = softmax_cross_entropy(confident, labels.clone()).into_scalar().elem::<f64>();
    let high = softmax_cross_entropy(wrong, labels).into_scalar().elem::<f64>();
    assert!(low >= 0.0 && low < 1e-6, "Confident correct loss should be ~0, got {}", low);
    assert!(high > 1.0);
}

#[test]
fn test_svm_loss_is_regularization_only_outside_margin() {
    let device = Default::default();
    let weight = Tensor::<TestBackend, 2>::from_data([[0.5, -0.5], [1.0, 0.0]], &device);
    let labels = Tensor::<TestBackend, 2>::from_data([[1.0, -1.0]], &device);
    let scores = Tensor::<TestBackend, 2>::from_data([[2.0, -3.0]], &device);

    let loss = svm_loss(weight, scores, labels, 1.0).into_scalar().elem::<f64>();
    assert!((loss - 0.75).abs() < 1e-6, "Expected 0.5 * 1.5, got {}", loss);
}

#[test]
fn test_argmax_accuracy_extremes() {
    let device = Default::default();
    let labels = Tensor::<TestBackend, 2>::from_data([[1.0, -1.0], [-1.0, 1.0], [1.0, -1.0]], &device);

    let matching = Tensor::<TestBackend, 2>::from_data([[1.0, -1.0], [-1.0, 1.0], [1.0, -1.0]], &device);
    let accuracy = argmax_accuracy(matching, labels.clone()).into_scalar().elem::<f64>();
    assert_eq!(accuracy, 1.0);

    let opposite = Tensor::<TestBackend, 2>::from_data([[-1.0, 1.0], [1.0, -1.0], [-1.0, 1.0]], &device);
    let accuracy = argmax_accuracy(opposite, labels).into_scalar().elem::<f64>();
    assert_eq!(accuracy, 0.0);
}

#[test]
fn test_forward_matches_hand_computed_gru() {
    let device = Default::default();
    let weights = KnownWeights::new();
    let (inputs, _) = known_input();

    let model = weights.classifier::<TestBackend>(HeadKind::Svm { c: 1.0 }, &device);
    let batch = known_batch::<TestBackend>(HeadKind::Svm { c: 1.0 }, &device);
    let output = model
        .forward(batch.features, model.zero_state(BATCH, &device), 1.0)
        .unwrap();

    let scores: Vec<f32> = output.scores.into_data().iter::<f32>().collect();
    for (row, sequence) in inputs.iter().enumerate() {
        let expected = reference_scores(&weights, sequence);
        for class in 0..CLASSES {
            let actual = scores[row * CLASSES + class] as f64;
            assert!(
                (actual - expected[class]).abs() < 1e-5,
                "Score [{}, {}]: expected {}, got {}",
                row,
                class,
                expected[class],
                actual
            );
        }
    }
}

#[test]
fn test_svm_train_step_reports_hand_computed_loss() {
    let device = Default::default();
    let weights = KnownWeights::new();
    let (inputs, _) = known_input();
    let head = HeadKind::Svm { c: 1.0 };

    let model = weights.classifier::<TrainBackend>(head, &device);
    let state = model.zero_state(BATCH, &device);
    let mut optimizer = AdamConfig::new().init::<TrainBackend, GruClassifier<TrainBackend>>();

    let (model, output) = train_step(
        model,
        &mut optimizer,
        known_batch::<TrainBackend>(head, &device),
        state,
        0.01,
        1.0,
    )
    .unwrap();

    let expected = reference_svm_loss(&weights, &inputs);
    assert!(
        (output.loss - expected).abs() < 1e-5,
        "Expected loss {}, got {}",
        expected,
        output.loss
    );
    assert_eq!(output.state.dims(), [BATCH, HIDDEN]);

    // The update moved the parameters, so the same batch scores a different loss
    let (after, _, _) = evaluate_batch(
        &model,
        known_batch::<TrainBackend>(head, &device),
        model.zero_state(BATCH, &device),
        1.0,
    )
    .unwrap();
    assert!((after.loss - output.loss).abs() > 1e-9);
}

#[test]
fn test_softmax_loss_matches_hand_computed_cross_entropy() {
    let device = Default::default();
    let weights = KnownWeights::new();
    let (inputs, _) = known_input();

    let model = weights.classifier::<TestBackend>(HeadKind::Softmax, &device);
    let (metrics, _, predictions) = evaluate_batch(
        &model,
        known_batch::<TestBackend>(HeadKind::Softmax, &device),
        model.zero_state(BATCH, &device),
        1.0,
    )
    .unwrap();

    let expected = reference_cross_entropy(&weights, &inputs);
    assert!(
        (metrics.loss - expected).abs() < 1e-5,
        "Expected loss {}, got {}",
        expected,
        metrics.loss
    );

    // Softmax decisions are probability rows
    let probabilities: Vec<f32> = predictions.into_data().iter::<f32>().collect();
    for row in probabilities.chunks(CLASSES) {
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }
}
