//! foldrun core library
//!
//! Provides the pieces of a cross-validation run that do not touch the
//! external tool's process:
//! - Fold discovery and leave-one-fold-out partitioning
//! - Run-log parsing and train/test run correlation
//! - Parameter file rewriting
//! - Tracing setup and the shared error taxonomy

pub mod error;
pub mod folds;
pub mod fsutil;
pub mod params;
pub mod runlog;
pub mod telemetry;

pub use error::{ErrorKind, FoldrunError, Result};
pub use folds::{
    build_partitions, discover_folds, partition, remove_os_artifacts, set_name, Fold, FoldPlan,
    Partition,
};
pub use fsutil::copy_tree;
pub use params::{install_params, rewrite_params, ParamOverrides};
pub use runlog::{clear_run_log, RunLog, RunRecord, RunType, WorkflowHandles};
pub use telemetry::{init_tracing, FileLog};
