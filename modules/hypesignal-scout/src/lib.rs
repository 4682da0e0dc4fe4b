pub mod budget;
pub mod enrichment;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod recency;
pub mod render;
pub mod retry;
pub mod session;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use error::{Result, ScoutError};
pub use orchestrator::{Orchestrator, RunSummary, ScoutConfig};
