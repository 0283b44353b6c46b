/// Installs the console + rotating JSON file `tracing` subscriber.
pub mod loggertracing;

pub use loggertracing::setup_logging;
