//! # Observability
//!
//! In-process log capture plus the correlator that turns captured records
//! into a module-level health snapshot.

pub mod capture;
pub mod correlator;

pub use capture::{LogBuffer, LogCaptureLayer, LogPage, LogRecord, RUNTIME_LOG_TYPE};
pub use correlator::{
    build_observability_snapshot, ModuleStatus, ObservabilityCall, ObservabilityEdge,
    ObservabilityNode, ObservabilitySnapshot, SnapshotOptions,
};
