// External imports
use anyhow::{Context, Result};
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// Internal imports
use super::step_1_tensor_preparation::{encode_features, encode_labels, FeatureEncoding, SequenceBatch};
use super::step_3_gru_model_arch::{decision_values, GruClassifier, HeadKind, ModelConfig};
use crate::constants::*;
use crate::error::ModelError;

/// Learning rate policy of a run
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum LearningRate {
    /// Fixed value for the whole run
    Constant(f64),
    /// Staircase decay: `initial * decay_rate ^ floor(step / decay_steps)`
    ExponentialDecay {
        initial: f64,
        decay_rate: f64,
        decay_steps: usize,
    },
}

impl LearningRate {
    /// Learning rate to apply at `step`, recomputed from the step counter every call
    pub fn at(&self, step: usize) -> f64 {
        match *self {
            LearningRate::Constant(lr) => lr,
            LearningRate::ExponentialDecay {
                initial,
                decay_rate,
                decay_steps,
            } => {
                let exponent = (step / decay_steps.max(1)) as f64;
                initial * decay_rate.powf(exponent)
            }
        }
    }
}

/// Struct for configuring a training run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub cell_size: usize,
    /// Keep probability of the GRU input dropout while training
    pub keep_prob: f64,
    pub epochs: usize,
    pub num_classes: usize,
    pub sequence_length: usize,
    pub encoding: FeatureEncoding,
    pub head: HeadKind,
    pub learning_rate: LearningRate,
    pub log_every: usize,
    pub max_to_keep: usize,
    pub queue_capacity: usize,
    pub num_producers: usize,
    pub model_name: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::svm()
    }
}

impl TrainingConfig {
    /// GRU+SVM defaults: decayed learning rate, streaming input
    pub fn svm() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            cell_size: CELL_SIZE,
            keep_prob: DROPOUT_P_KEEP,
            epochs: HM_EPOCHS,
            num_classes: N_CLASSES,
            sequence_length: SEQUENCE_LENGTH,
            encoding: FeatureEncoding::OneHot { depth: INPUT_SIZE },
            head: HeadKind::Svm { c: SVM_C },
            learning_rate: LearningRate::ExponentialDecay {
                initial: INITIAL_LEARNING_RATE,
                decay_rate: LEARNING_RATE_DECAY_FACTOR,
                decay_steps: NUM_STEPS_PER_DECAY,
            },
            log_every: LOG_EVERY_N_STEPS,
            max_to_keep: MAX_CHECKPOINTS_TO_KEEP,
            queue_capacity: BATCH_QUEUE_CAPACITY,
            num_producers: 1,
            model_name: HeadKind::Svm { c: SVM_C }.name().to_string(),
        }
    }

    /// GRU+Softmax defaults: constant learning rate, bounded epochs
    pub fn softmax() -> Self {
        Self {
            head: HeadKind::Softmax,
            learning_rate: LearningRate::Constant(SOFTMAX_LEARNING_RATE),
            model_name: HeadKind::Softmax.name().to_string(),
            ..Self::svm()
        }
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::new(
            self.encoding.input_size(),
            self.cell_size,
            self.num_classes,
            self.head,
        )
    }

    /// Reads a config from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Invalid config in '{}'", path.display()))
    }

    /// Writes the config as pretty JSON to `dir/train_config.json`
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).context("Failed to create checkpoint directory")?;
        let path = dir.join(TRAIN_CONFIG_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        Ok(())
    }

    /// Checks the values a run cannot start without
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.batch_size > 0, "batch_size must be positive");
        anyhow::ensure!(self.cell_size > 0, "cell_size must be positive");
        anyhow::ensure!(self.num_classes > 1, "num_classes must be at least 2");
        anyhow::ensure!(self.sequence_length > 0, "sequence_length must be positive");
        anyhow::ensure!(
            self.keep_prob > 0.0 && self.keep_prob <= 1.0,
            "keep_prob must be in (0, 1], got {}",
            self.keep_prob
        );
        anyhow::ensure!(self.log_every > 0, "log_every must be positive");
        anyhow::ensure!(self.max_to_keep > 0, "max_to_keep must be positive");
        anyhow::ensure!(self.queue_capacity > 0, "queue_capacity must be positive");
        anyhow::ensure!(self.num_producers > 0, "num_producers must be positive");
        Ok(())
    }
}

/// Loss and accuracy of one batch
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchMetrics {
    pub loss: f64,
    pub accuracy: f64,
}

/// Everything one optimizer step hands back to the loop
#[derive(Debug, Clone)]
pub struct TrainStepOutput<B: AutodiffBackend> {
    /// Loss before the update
    pub loss: f64,
    /// Final state of this batch, detached from the graph
    pub state: Tensor<B, 2>,
    /// Decision values before the update
    pub predictions: Tensor<B::InnerBackend, 2>,
    /// Encoded labels of the batch
    pub labels: Tensor<B::InnerBackend, 2>,
    /// Pre-activation scores before the update
    pub scores: Tensor<B::InnerBackend, 2>,
}

/// Device-side tensors of one batch
#[derive(Debug, Clone)]
pub struct BatchTensors<B: Backend> {
    pub features: Tensor<B, 3>,
    pub labels: Tensor<B, 2>,
}

/// Moves a host batch onto the device with the encoding of the configured head
pub fn batch_to_tensors<B: Backend>(
    batch: &SequenceBatch,
    config: &TrainingConfig,
    device: &B::Device,
) -> BatchTensors<B> {
    BatchTensors {
        features: encode_features(batch, config.sequence_length, config.encoding, device),
        labels: encode_labels(
            &batch.labels,
            config.num_classes,
            config.head.label_encoding(),
            device,
        ),
    }
}

/// Returns `state` when it matches the batch, otherwise a zero state of the batch size.
///
/// A short final slice (or the first full batch after one) cannot reuse the state of a
/// differently sized batch, so the carried state restarts from zeros.
pub fn reconcile_state<B: Backend>(
    model: &GruClassifier<B>,
    state: Tensor<B, 2>,
    batch_size: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let rows = state.dims()[0];
    if rows == batch_size {
        state
    } else {
        debug!(
            "Resetting carried state: batch has {} rows, state has {}",
            batch_size, rows
        );
        model.zero_state(batch_size, device)
    }
}

/// Perform a single forward/backward pass and optimizer update
pub fn train_step<B, O>(
    model: GruClassifier<B>,
    optimizer: &mut O,
    batch: BatchTensors<B>,
    state: Tensor<B, 2>,
    learning_rate: f64,
    keep_prob: f64,
) -> Result<(GruClassifier<B>, TrainStepOutput<B>), ModelError>
where
    B: AutodiffBackend,
    O: Optimizer<GruClassifier<B>, B>,
{
    // Forward pass
    let output = model.forward(batch.features, state, keep_prob)?;

    // Compute loss
    let loss = model.loss(output.scores.clone(), batch.labels.clone());
    let loss_value = loss.clone().into_scalar().elem::<f64>();

    let scores = output.scores.inner();
    let predictions = decision_values(model.head(), scores.clone());

    // Backward pass and optimizer step
    let grads = loss.backward();
    let grads = GradientsParams::from_grads(grads, &model);
    let model = optimizer.step(learning_rate, model, grads);

    Ok((
        model,
        TrainStepOutput {
            loss: loss_value,
            state: output.state.detach(),
            predictions,
            labels: batch.labels.inner(),
            scores,
        },
    ))
}

/// Loss and accuracy of a batch without any parameter update
pub fn evaluate_batch<B: Backend>(
    model: &GruClassifier<B>,
    batch: BatchTensors<B>,
    state: Tensor<B, 2>,
    keep_prob: f64,
) -> Result<(BatchMetrics, Tensor<B, 2>, Tensor<B, 2>), ModelError> {
    let output = model.forward(batch.features, state, keep_prob)?;

    let loss = model.loss(output.scores.clone(), batch.labels.clone());
    let accuracy = model.accuracy(output.scores.clone(), batch.labels);

    let metrics = BatchMetrics {
        loss: loss.into_scalar().elem::<f64>(),
        accuracy: accuracy.into_scalar().elem::<f64>(),
    };
    let predictions = model.predictions(output.scores.clone());

    Ok((metrics, output.scores, predictions))
}
