/// Engine builder.
pub mod builder;
/// Assembled runtime handing out services and routers.
pub mod engine;
/// Background execution of job bodies.
pub mod executor;
/// Per-job progress handle.
pub mod reporter;

pub use builder::EngineBuilder;
pub use engine::Engine;
pub use executor::BackgroundExecutor;
pub use reporter::JobReporter;

pub(crate) use executor::panic_message;
