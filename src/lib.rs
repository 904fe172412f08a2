pub mod constants;
pub mod error;
pub mod gru;
pub mod util {
    pub mod batch_queue;
    pub mod file_utils;
    pub mod interrupt;
    pub mod model_logger;
}

/// Build information generated by `build.rs`
pub mod build_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
