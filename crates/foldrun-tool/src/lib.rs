//! foldrun tool driver
//!
//! Everything that touches the external instance generator:
//! - Installation layout and startup checks
//! - Staging documents into the upload area
//! - Launching the tool with timeout, cancellation and fatal-line detection
//! - Harvesting instance files under an explicit overwrite policy
//! - The sequential per-fold pipeline

pub mod harvest;
pub mod invoke;
pub mod layout;
pub mod pipeline;
pub mod staging;

// Re-export key types
pub use harvest::{
    HarvestedSet, Harvester, LinePrompt, OverwriteDecision, OverwritePolicy, OverwritePrompt,
};
pub use invoke::{
    classify_line, FailureMarkers, LineVerdict, ProcessInvoker, ToolCommand, ToolExit,
    ToolInvoker,
};
pub use layout::ToolLayout;
pub use pipeline::{plan_folds, FoldOutcome, FoldPhase, Pipeline, RunReport};
pub use staging::{clear_upload_area, stage, StagedSet};
