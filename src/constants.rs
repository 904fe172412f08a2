// Default hyper-parameters for both classifier variants
pub const BATCH_SIZE: usize = 256;
pub const CELL_SIZE: usize = 256;
pub const DROPOUT_P_KEEP: f64 = 0.55;
pub const HM_EPOCHS: usize = 1;
pub const N_CLASSES: usize = 2;
pub const SEQUENCE_LENGTH: usize = 21;
pub const INPUT_SIZE: usize = 10; // One-hot depth of each categorical feature
pub const SVM_C: f64 = 1.0;

// Learning rate decay (SVM variant)
pub const INITIAL_LEARNING_RATE: f64 = 0.01;
pub const LEARNING_RATE_DECAY_FACTOR: f64 = 0.995;
pub const NUM_STEPS_PER_DECAY: usize = 1;

// Softmax variant uses a constant learning rate
pub const SOFTMAX_LEARNING_RATE: f64 = 0.01;

// Cadence of summaries, checkpoints and validation
pub const LOG_EVERY_N_STEPS: usize = 100;
pub const MAX_CHECKPOINTS_TO_KEEP: usize = 1000;

// Initial value of the classifier head bias
pub const HEAD_BIAS_INIT: f64 = 0.1;
// Standard deviation of the softmax head weight initializer
pub const SOFTMAX_WEIGHT_STDDEV: f64 = 0.01;
// Initial value of the GRU reset/update gate bias
pub const GATE_BIAS_INIT: f64 = 1.0;

// Bounded queue between batch producers and the training loop
pub const BATCH_QUEUE_CAPACITY: usize = 32;

// Histogram resolution for weight summaries
pub const HISTOGRAM_BUCKETS: usize = 30;

// File names inside the checkpoint directory
pub const CHECKPOINT_INDEX_FILE: &str = "checkpoint.json";
pub const TRAIN_CONFIG_FILE: &str = "train_config.json";
