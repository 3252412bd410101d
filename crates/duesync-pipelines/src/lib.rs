//! Orchestration layer: turns the core primitives (HTTP client, store,
//! normalizer) into the six runnable operations.

mod cancel;
mod discovery;
mod error;
mod fullfetch;
mod orchestrator;
mod refresh;

pub use cancel::{cancellation_pair, CancellationObserver, CancellationToken};
pub use discovery::DiscoveryPipeline;
pub use error::PipelineError;
pub use orchestrator::{BondedActsKind, Orchestrator};
pub use refresh::RefreshPipeline;
