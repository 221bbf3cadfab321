//! Fall Guard Agent - fall detection and alert vetting for body-worn sensors.
//!
//! This library turns a stream of accelerometer and gyroscope samples into
//! fall-risk assessments and vetted caregiver alerts.
//!
//! # Guarantees
//!
//! - **Bounded memory**: only the most recent window of samples is kept per subject
//! - **Deterministic**: the same samples and configuration give the same events
//! - **Cancellable**: every alert waits out a cancellation window before delivery
//! - **Exactly once**: a confirmed alert is handed to the sink once
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Fall Guard Agent                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │   Source    │──▶│  Features   │──▶│  Decision   │        │
//! │  │ (IMU/sim)   │   │ (windowed)  │   │   Engine    │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! │         │                                    │              │
//! │         ▼                                    ▼              │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │    Audit    │   │  Delivery   │◀──│    Alert    │        │
//! │  │     Log     │   │   (sinks)   │   │ Controller  │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use fall_guard_agent::{Config, Monitor, Scenario, SubjectId, TracingSink};
//! use std::sync::Arc;
//!
//! let mut monitor = Monitor::new(Config::default(), Arc::new(TracingSink))
//!     .expect("default configuration is valid");
//! let subject = SubjectId::from("resident-12");
//! monitor.register(subject.clone()).expect("first registration");
//!
//! for sample in Scenario::Fall.builder().build(50.0, chrono::Utc::now()) {
//!     let outcome = monitor.feed(&subject, sample).expect("samples are ordered");
//!     if let Some(alert) = outcome.alert {
//!         println!("alert {} pending until {}", alert.id, alert.expires_at);
//!     }
//! }
//! ```

pub mod audit;
pub mod config;
pub mod core;
pub mod delivery;
pub mod monitor;
pub mod pipeline;
pub mod runtime;
pub mod source;

// Re-export key types at crate root for convenience
pub use audit::{AuditLog, AuditStats, SharedAuditLog};
pub use config::{Config, ConfigError, SubjectConfig, Thresholds};
pub use core::{
    Alert, AlertState, CancelError, DetectionEvent, DetectionKind, EngineState, FeatureVector,
    RiskAssessment, RiskLevel, RiskScorer, SubjectSnapshot,
};
pub use delivery::{AlertSink, JsonlSink, MemorySink, RiskSink, TracingSink};
pub use monitor::{Monitor, MonitorError};
pub use pipeline::{FeedOutcome, SubjectPipeline};
pub use runtime::{Runtime, RuntimeError};
pub use source::{Scenario, SensorSample, SimulatedSource, SubjectId};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
