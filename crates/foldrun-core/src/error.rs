//! Error taxonomy for foldrun.

use std::path::PathBuf;

/// Coarse classification of a [`FoldrunError`], used for exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The on-disk inputs or the tool installation are unusable.
    Configuration,
    /// The tool's run log does not contain what was expected.
    Format,
    /// The external tool failed, hung, or produced no output.
    ToolFailure,
    /// The user declined to overwrite existing instances.
    UserAbort,
    /// Plain filesystem failure.
    Io,
}

impl ErrorKind {
    /// Process exit code for this kind.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Io => 1,
            ErrorKind::Configuration => 2,
            ErrorKind::Format => 3,
            ErrorKind::ToolFailure => 4,
            ErrorKind::UserAbort => 5,
        }
    }
}

/// foldrun errors. Every variant is fatal for the whole multi-fold run.
#[derive(Debug, thiserror::Error)]
pub enum FoldrunError {
    #[error("no fold-<N> directories found in {0}")]
    NoFolds(PathBuf),

    #[error(
        "{fold} does not have the same classes as the first fold: expected {expected:?}, found {observed:?}"
    )]
    LabelMismatch {
        fold: PathBuf,
        expected: Vec<String>,
        observed: Vec<String>,
    },

    #[error("tool jar not found at {0}")]
    MissingToolJar(PathBuf),

    #[error("parameters file {0} not found")]
    MissingParamsFile(PathBuf),

    #[error("parameter file {file} has no <{field}> element")]
    MissingParamField { file: PathBuf, field: String },

    #[error("run log {0} does not exist")]
    MissingRunLog(PathBuf),

    #[error("run log {0} contains no runs")]
    EmptyRunLog(PathBuf),

    #[error("malformed run record #{index} in {file}: {reason}")]
    MalformedRecord {
        file: PathBuf,
        index: usize,
        reason: String,
    },

    #[error("no {run_type} run for set {set_name} in run log; found {observed:?}")]
    MissingRun {
        run_type: String,
        set_name: String,
        observed: Vec<(String, String)>,
    },

    #[error("xml error in {file}: {reason}")]
    Xml { file: PathBuf, reason: String },

    #[error("tool exited with an error: {0}")]
    ToolFailure(String),

    #[error("tool did not finish within {secs} seconds")]
    ToolTimeout { secs: u64 },

    #[error("failed to launch tool {program}: {source}")]
    ToolSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tool output directory {0} does not exist")]
    MissingOutput(PathBuf),

    #[error("tool invocation cancelled")]
    Cancelled,

    #[error("declined to overwrite {0}; process terminated")]
    UserAbort(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FoldrunError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FoldrunError::NoFolds(_)
            | FoldrunError::LabelMismatch { .. }
            | FoldrunError::MissingToolJar(_)
            | FoldrunError::MissingParamsFile(_)
            | FoldrunError::MissingParamField { .. } => ErrorKind::Configuration,
            FoldrunError::MissingRunLog(_)
            | FoldrunError::EmptyRunLog(_)
            | FoldrunError::MalformedRecord { .. }
            | FoldrunError::MissingRun { .. }
            | FoldrunError::Xml { .. } => ErrorKind::Format,
            FoldrunError::ToolFailure(_)
            | FoldrunError::ToolTimeout { .. }
            | FoldrunError::ToolSpawn { .. }
            | FoldrunError::MissingOutput(_)
            | FoldrunError::Cancelled => ErrorKind::ToolFailure,
            FoldrunError::UserAbort(_) => ErrorKind::UserAbort,
            FoldrunError::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn xml(file: &std::path::Path, reason: impl std::fmt::Display) -> Self {
        FoldrunError::Xml {
            file: file.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for foldrun operations.
pub type Result<T> = std::result::Result<T, FoldrunError>;
