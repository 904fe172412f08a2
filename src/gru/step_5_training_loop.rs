// External imports
use burn::module::AutodiffModule;
use burn::optim::AdamConfig;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use log::{debug, info};
use std::path::PathBuf;

// Internal imports
use super::step_1_tensor_preparation::{bounded_steps, wraparound_offset, SequenceDataset};
use super::step_3_gru_model_arch::{argmax_accuracy, GruClassifier};
use super::step_4_train_model::{
    batch_to_tensors, evaluate_batch, reconcile_state, train_step, BatchMetrics, BatchTensors,
    TrainStepOutput, TrainingConfig,
};
use super::step_6_model_serialization::CheckpointManager;
use crate::error::TrainResult;
use crate::util::batch_queue::BatchSource;
use crate::util::interrupt::InterruptFlag;
use crate::util::model_logger::{tensor_to_array2, tensor_values, MetricSink, Phase, ResultSink, Summary};

/// Lifecycle of a training run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Running,
    Stopping(StopReason),
    Done,
}

/// Why a run left the RUNNING state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The training (or validation) stream closed
    EndOfData,
    /// The interrupt flag was raised
    Interrupted,
    /// Every planned step ran
    Completed,
}

/// Outcome of a finished run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Step key of the final checkpoint
    pub final_step: usize,
    pub stop_reason: StopReason,
    /// Metrics of the most recent logged training step
    pub last_train: Option<BatchMetrics>,
    /// Metrics of the most recent validation batch
    pub last_validation: Option<BatchMetrics>,
    /// Base path of the final checkpoint
    pub checkpoint: PathBuf,
}

/// Restores the newest checkpoint, or returns a freshly initialized model
fn restore_or_init<B: Backend>(
    config: &TrainingConfig,
    checkpoints: &CheckpointManager,
    device: &B::Device,
) -> TrainResult<(GruClassifier<B>, Option<usize>)> {
    let fresh = config.model_config().init::<B>(device);
    match checkpoints.load_latest(fresh.clone(), device)? {
        Some((model, step)) => {
            info!("Loaded trained model from step {}", step);
            Ok((model, Some(step)))
        }
        None => {
            info!("No checkpoint in {}, starting from scratch", checkpoints.dir().display());
            Ok((fresh, None))
        }
    }
}

/// Loss, accuracy and head summaries of a training step
fn training_summary<B: Backend>(
    model: &GruClassifier<B>,
    metrics: &BatchMetrics,
    learning_rate: Option<f64>,
    scores: Tensor<B, 2>,
) -> Summary {
    let mut summary = Summary::new();
    if let Some(lr) = learning_rate {
        summary.scalar("learning_rate", lr);
    }
    summary
        .scalar("loss", metrics.loss)
        .scalar("accuracy", metrics.accuracy)
        .variable_summaries("final_training_ops/weights", &tensor_values(model.head_weight()));
    if let Some(bias) = model.head_bias() {
        summary.variable_summaries("final_training_ops/biases", &tensor_values(bias));
    }
    summary.histogram("final_training_ops/Wx_plus_b/pre-activations", &tensor_values(scores));
    summary
}

/// Loss and accuracy of a training step as seen before its update
fn pre_update_metrics<B: Backend>(loss: f64, predictions: Tensor<B, 2>, labels: Tensor<B, 2>) -> BatchMetrics {
    BatchMetrics {
        loss,
        accuracy: argmax_accuracy(predictions, labels).into_scalar().elem::<f64>(),
    }
}

/// Re-runs the forward pass of a finished step on the same inputs, without a gradient step
fn recompute_metrics<B: AutodiffBackend>(
    model: &GruClassifier<B::InnerBackend>,
    batch: BatchTensors<B>,
    state: Tensor<B, 2>,
    keep_prob: f64,
) -> TrainResult<BatchMetrics> {
    let batch = BatchTensors {
        features: batch.features.inner(),
        labels: batch.labels.inner(),
    };
    let (metrics, _, _) = evaluate_batch(model, batch, state.inner(), keep_prob)?;
    Ok(metrics)
}

fn log_stop(reason: StopReason, step: usize) {
    match reason {
        StopReason::EndOfData => info!("EOF -- training done at step {}", step),
        StopReason::Interrupted => info!("Training interrupted at {}", step),
        StopReason::Completed => info!("Training completed at step {}", step),
    }
}

/// # Streaming training loop (GRU+SVM)
///
/// Consumes `train` until it closes or `interrupt` is raised. Every `log_every`
/// steps (and at step 0) the step is summarized with its pre-update loss and scores,
/// the loss and accuracy of its batch are recomputed without a gradient step for the
/// log line, and the model is checkpointed; from the first multiple of `log_every`
/// on, one validation batch is also evaluated with dropout off and a zero state.
///
/// Every checkpoint, including the final one written on exit, is keyed by the
/// number of completed steps, which is also the step a restored run starts at.
pub fn train_streaming<B, S, V, M>(
    config: &TrainingConfig,
    train: &mut S,
    validation: &mut V,
    checkpoints: &CheckpointManager,
    metrics: &mut M,
    interrupt: &InterruptFlag,
    device: &B::Device,
) -> TrainResult<RunSummary>
where
    B: AutodiffBackend,
    S: BatchSource,
    V: BatchSource,
    M: MetricSink,
{
    let mut run_state = RunState::Init;
    debug!("Run state: {:?}", run_state);

    let (mut model, restored) = restore_or_init::<B>(config, checkpoints, device)?;
    let mut step = restored.unwrap_or(0);
    let mut optimizer = AdamConfig::new().init::<B, GruClassifier<B>>();
    let mut state = model.zero_state(config.batch_size, device);

    let mut last_train = None;
    let mut last_validation = None;

    run_state = RunState::Running;
    debug!("Run state: {:?}", run_state);

    while run_state == RunState::Running {
        if interrupt.is_set() {
            run_state = RunState::Stopping(StopReason::Interrupted);
            break;
        }

        let batch = match train.next_batch() {
            Some(batch) => batch,
            None => {
                run_state = RunState::Stopping(StopReason::EndOfData);
                break;
            }
        };

        let tensors = batch_to_tensors::<B>(&batch, config, device);
        let carried = reconcile_state(&model, state, batch.rows, device);
        let learning_rate = config.learning_rate.at(step);

        let (updated, output) = train_step(
            model,
            &mut optimizer,
            tensors.clone(),
            carried.clone(),
            learning_rate,
            config.keep_prob,
        )?;
        model = updated;
        let TrainStepOutput {
            loss,
            state: next_state,
            predictions,
            labels,
            scores,
        } = output;
        state = next_state;

        if step % config.log_every == 0 {
            let inner = model.valid();
            let summary_metrics = pre_update_metrics(loss, predictions, labels);
            let summary = training_summary(&inner, &summary_metrics, Some(learning_rate), scores);
            metrics.write(&summary, step)?;

            let train_metrics = recompute_metrics::<B>(&inner, tensors, carried, config.keep_prob)?;
            info!(
                "step [{}] train -- loss : {}, accuracy : {}",
                step, train_metrics.loss, train_metrics.accuracy
            );
            // Keyed by completed steps, so a restore resumes at the next step
            checkpoints.save(&model, step + 1)?;
            last_train = Some(train_metrics);
        }

        if step > 0 && step % config.log_every == 0 {
            match validation.next_batch() {
                Some(validation_batch) => {
                    let inner = model.valid();
                    let tensors = batch_to_tensors::<B::InnerBackend>(&validation_batch, config, device);
                    let zero = inner.zero_state(validation_batch.rows, device);
                    let (validation_metrics, _, _) = evaluate_batch(&inner, tensors, zero, 1.0)?;

                    let mut summary = Summary::new();
                    summary
                        .scalar("evaluation_accuracy", validation_metrics.accuracy)
                        .scalar("evaluation_loss", validation_metrics.loss);
                    metrics.write(&summary, step)?;
                    info!(
                        "step [{}] validation -- loss : {}, accuracy : {}",
                        step, validation_metrics.loss, validation_metrics.accuracy
                    );
                    last_validation = Some(validation_metrics);
                }
                None => {
                    step += 1;
                    run_state = RunState::Stopping(StopReason::EndOfData);
                    break;
                }
            }
        }

        step += 1;
    }

    let stop_reason = match run_state {
        RunState::Stopping(reason) => reason,
        _ => StopReason::Completed,
    };
    log_stop(stop_reason, step);

    metrics.flush()?;
    let checkpoint = checkpoints.save(&model, step)?;

    run_state = RunState::Done;
    debug!("Run state: {:?}", run_state);

    Ok(RunSummary {
        final_step: step,
        stop_reason,
        last_train,
        last_validation,
        checkpoint,
    })
}

/// # Bounded training loop (GRU+Softmax)
///
/// Runs `epochs * train.len() / batch_size` steps. Step `s` trains on the slice
/// starting at `(s * batch_size) % train.len()`, which is short when it starts
/// near the end of the data. The validation pass then walks the validation set
/// the same way with dropout off and a zero state per batch.
///
/// Every step of both phases hands its predictions and labels to `results`.
/// Checkpoints are keyed by training step index; a restored run continues at the
/// step after the restored one.
#[allow(clippy::too_many_arguments)]
pub fn train_bounded<B, M, W, R>(
    config: &TrainingConfig,
    train: &SequenceDataset,
    validation: &SequenceDataset,
    checkpoints: &CheckpointManager,
    train_metrics: &mut M,
    validation_metrics: &mut W,
    results: &mut R,
    interrupt: &InterruptFlag,
    device: &B::Device,
) -> TrainResult<RunSummary>
where
    B: AutodiffBackend,
    M: MetricSink,
    W: MetricSink,
    R: ResultSink,
{
    let mut run_state = RunState::Init;
    debug!("Run state: {:?}", run_state);

    let (mut model, restored) = restore_or_init::<B>(config, checkpoints, device)?;
    let start = restored.map_or(0, |step| step + 1);
    let total_steps = bounded_steps(config.epochs, train.len(), config.batch_size);
    let mut optimizer = AdamConfig::new().init::<B, GruClassifier<B>>();
    let mut state = model.zero_state(config.batch_size, device);

    let mut last_completed = restored;
    let mut last_train = None;
    let mut last_validation = None;

    run_state = RunState::Running;
    info!("Training for {} steps, starting at step {}", total_steps, start);

    for step in start..total_steps {
        if interrupt.is_set() {
            run_state = RunState::Stopping(StopReason::Interrupted);
            break;
        }

        let offset = wraparound_offset(step, config.batch_size, train.len());
        let batch = train.slice(offset, config.batch_size);
        let tensors = batch_to_tensors::<B>(&batch, config, device);
        let carried = reconcile_state(&model, state, batch.rows, device);
        let learning_rate = config.learning_rate.at(step);

        let (updated, output) = train_step(
            model,
            &mut optimizer,
            tensors.clone(),
            carried.clone(),
            learning_rate,
            config.keep_prob,
        )?;
        model = updated;
        let TrainStepOutput {
            loss,
            state: next_state,
            predictions,
            labels,
            scores,
        } = output;
        state = next_state;

        results.save(
            &tensor_to_array2(predictions.clone())?,
            &tensor_to_array2(labels.clone())?,
            Phase::Training,
            step,
        )?;

        if step % config.log_every == 0 {
            let inner = model.valid();
            let summary_metrics = pre_update_metrics(loss, predictions, labels);
            let summary = training_summary(&inner, &summary_metrics, None, scores);
            train_metrics.write(&summary, step)?;

            let step_metrics = recompute_metrics::<B>(&inner, tensors, carried, config.keep_prob)?;
            info!(
                "step [{}] train -- loss : {}, accuracy : {}",
                step, step_metrics.loss, step_metrics.accuracy
            );
            checkpoints.save(&model, step)?;
            last_train = Some(step_metrics);
        }

        last_completed = Some(step);
    }

    if run_state == RunState::Running {
        info!("Training finished, validating");

        let inner = model.valid();
        let validation_steps = bounded_steps(config.epochs, validation.len(), config.batch_size);

        for step in 0..validation_steps {
            if interrupt.is_set() {
                run_state = RunState::Stopping(StopReason::Interrupted);
                break;
            }

            let offset = wraparound_offset(step, config.batch_size, validation.len());
            let batch = validation.slice(offset, config.batch_size);
            let tensors = batch_to_tensors::<B::InnerBackend>(&batch, config, device);
            let labels = tensors.labels.clone();
            let zero = inner.zero_state(batch.rows, device);

            let (step_metrics, scores, predictions) = evaluate_batch(&inner, tensors, zero, 1.0)?;

            results.save(
                &tensor_to_array2(predictions)?,
                &tensor_to_array2(labels)?,
                Phase::Validation,
                step,
            )?;

            if step > 0 && step % config.log_every == 0 {
                let summary = training_summary(&inner, &step_metrics, None, scores);
                validation_metrics.write(&summary, step)?;
                info!(
                    "step [{}] validation -- loss : {}, accuracy : {}",
                    step, step_metrics.loss, step_metrics.accuracy
                );
            }
            last_validation = Some(step_metrics);
        }
    }

    let stop_reason = match run_state {
        RunState::Stopping(reason) => reason,
        _ => StopReason::Completed,
    };
    let final_step = last_completed.unwrap_or(start);
    log_stop(stop_reason, final_step);

    train_metrics.flush()?;
    validation_metrics.flush()?;
    let checkpoint = checkpoints.save(&model, final_step)?;

    run_state = RunState::Done;
    debug!("Run state: {:?}", run_state);

    Ok(RunSummary {
        final_step,
        stop_reason,
        last_train,
        last_validation,
        checkpoint,
    })
}
