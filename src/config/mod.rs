pub mod constants;
pub mod engine_config;
pub mod errors;

pub use engine_config::EngineConfig;
