//! Paths inside a Stylene installation.

use std::path::{Path, PathBuf};

use foldrun_core::{FoldrunError, Result};
use serde::Serialize;

pub const TOOL_JAR: &str = "stylene.jar";
pub const RUN_DIR: &str = "stylenerun";
pub const RUN_LOG: &str = "styleneruns.xml";
pub const PARAMS_FILE: &str = "startparameters.xml";
pub const UPLOAD_DIR: &str = "data/uploadfiles";

/// Locations the tool reads from and writes to, derived from its root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolLayout {
    pub root: PathBuf,
    pub jar: PathBuf,
    pub run_dir: PathBuf,
    /// Log of runs, cleared before every fold.
    pub run_log: PathBuf,
    /// Where the rewritten parameter file is installed.
    pub params: PathBuf,
    /// Staging area for the documents of one invocation.
    pub upload_dir: PathBuf,
}

impl ToolLayout {
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let run_dir = root.join(RUN_DIR);
        Self {
            jar: root.join(TOOL_JAR),
            run_log: run_dir.join(RUN_LOG),
            params: run_dir.join(PARAMS_FILE),
            upload_dir: run_dir.join(UPLOAD_DIR),
            run_dir,
            root,
        }
    }

    /// Fail fast if the installation has no jar.
    pub fn validate(&self) -> Result<()> {
        if !self.jar.is_file() {
            return Err(FoldrunError::MissingToolJar(self.jar.clone()));
        }
        Ok(())
    }

    /// Resolve an output-directory handle from the run log. Relative handles
    /// are relative to the installation root, which is the tool's working
    /// directory.
    pub fn resolve_handle(&self, handle: &str) -> PathBuf {
        let path = Path::new(handle);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}
