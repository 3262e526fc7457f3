pub mod asset;
pub mod engine;
pub mod renderer;
pub mod scratch;
pub mod settings;

pub use engine::{Engine, EngineError};
pub use renderer::internal::{GpuContext, OffscreenTarget};
pub use settings::EngineSettings;

/// Installs `env_logger` at `Info` unless `RUST_LOG` says otherwise. Safe to
/// call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}
