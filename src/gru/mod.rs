pub mod step_1_tensor_preparation;
pub mod step_2_gru_cell;
pub mod step_3_gru_model_arch;
pub mod step_4_train_model;
pub mod step_5_training_loop;
pub mod step_6_model_serialization;
