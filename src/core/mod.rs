//! Core detection functionality for the fall guard agent.
//!
//! This module contains:
//! - Window management for buffering recent samples
//! - Feature computation from sample windows
//! - The fall decision engine and risk scoring
//! - The alert controller
//! - Snapshot building for dashboards

pub mod alerts;
pub mod engine;
pub mod features;
pub mod risk;
pub mod snapshot;
pub mod windowing;

// Re-export commonly used types
pub use alerts::{
    AcknowledgeError, Alert, AlertController, AlertState, CancelError, SuppressionReason,
    SuppressionStats,
};
pub use engine::{
    next_step, DecisionEngine, DetectionEvent, DetectionKind, DetectionState, EngineConfig,
    EngineOutput, EngineState, MotionClass, Transition,
};
pub use features::{
    compute_features, ExtractError, ExtractorConfig, FeatureExtractor, FeatureVector, Posture,
    FEATURE_COUNT, FEATURE_NAMES,
};
pub use risk::{
    RiskAssessment, RiskContribution, RiskInputs, RiskLevel, RiskModel, RiskScorer,
};
pub use snapshot::{SnapshotBuilder, SubjectSnapshot, PRODUCER_NAME, SNAPSHOT_VERSION};
pub use windowing::{PushOutcome, SampleWindow};
