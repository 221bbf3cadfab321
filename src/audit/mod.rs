//! Audit module for the fall guard agent.
//!
//! Tracks what the agent processed and decided, so operators can check that
//! samples are flowing and alerts are reaching caregivers.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, AuditLog, AuditStats, SharedAuditLog,
};
