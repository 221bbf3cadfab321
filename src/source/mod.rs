//! Sample sources for the fall guard pipeline.
//!
//! Real hardware is an external collaborator; this module provides the sample
//! types plus a deterministic simulator and a JSON Lines replayer.

pub mod replay;
pub mod simulated;
pub mod types;

// Re-export commonly used types
pub use replay::{load_samples, save_samples, SourceError};
pub use simulated::{Scenario, ScenarioBuilder, Segment, SimulatedSource, SimulationError, SourceConfig};
pub use types::{SensorSample, SubjectId, STANDARD_GRAVITY};
