/// Tests for the GRU classifier
///
/// * `test_gru` - Encoder shapes, losses, accuracy and a hand-computed forward/training step
/// * `test_training_loop` - Streaming and bounded training loops against temporary directories
pub mod test_gru;
