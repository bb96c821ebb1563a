//! Reading and clearing the tool's run log.
//!
//! The tool appends one `<run>` element per invocation:
//!
//! ```xml
//! <run>
//!   <type>TRAINING</type>
//!   <run-number>1</run-number>
//!   <set-name>fold-01</set-name>
//!   <date>6/22/11 11:26 AM</date>
//!   <workflow-map>stylenerun/data//Workflow_5e1c..._TRAINING_1_fold-01</workflow-map>
//!   <url />
//! </run>
//! ```
//!
//! Records are matched to a fold by their `type` and `set-name` fields, not
//! by position, so stale records from earlier invocations cannot be paired
//! with the current one.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;
use xmltree::Element;

use crate::error::{FoldrunError, Result};

/// Date format written by the tool, e.g. `6/22/11 11:26 AM`.
pub const RUN_DATE_FORMAT: &str = "%m/%d/%y %I:%M %p";

/// Kind of tool run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    Train,
    Test,
}

impl RunType {
    /// Value written into the parameter file.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Train => "train",
            RunType::Test => "test",
        }
    }

    /// Parse a run-log `type` value. Accepts `train`/`training` and
    /// `test`/`testing` in any case.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "train" | "training" => Some(RunType::Train),
            "test" | "testing" => Some(RunType::Test),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `<run>` element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    pub run_type: RunType,
    pub run_number: Option<u32>,
    pub set_name: String,
    pub date: Option<String>,
    /// Output-directory handle, relative to the tool installation.
    pub workflow_map: String,
    pub url: Option<String>,
}

impl RunRecord {
    /// Parsed `date` field, if present and well-formed.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.date
            .as_deref()
            .and_then(|d| NaiveDateTime::parse_from_str(d.trim(), RUN_DATE_FORMAT).ok())
    }

    fn from_element(file: &Path, index: usize, el: &Element) -> Result<Self> {
        let malformed = |reason: String| FoldrunError::MalformedRecord {
            file: file.to_path_buf(),
            index,
            reason,
        };

        let raw_type = child_text(el, "type").ok_or_else(|| malformed("missing <type>".into()))?;
        let run_type = RunType::parse(&raw_type)
            .ok_or_else(|| malformed(format!("unknown run type {raw_type:?}")))?;
        let set_name =
            child_text(el, "set-name").ok_or_else(|| malformed("missing <set-name>".into()))?;
        let workflow_map = child_text(el, "workflow-map")
            .ok_or_else(|| malformed("missing <workflow-map>".into()))?;
        let run_number = match child_text(el, "run-number") {
            Some(n) => Some(
                n.parse::<u32>()
                    .map_err(|_| malformed(format!("bad <run-number> {n:?}")))?,
            ),
            None => None,
        };

        Ok(RunRecord {
            run_type,
            run_number,
            set_name,
            date: child_text(el, "date"),
            workflow_map,
            url: child_text(el, "url"),
        })
    }
}

/// Trimmed, non-empty text of a direct child element.
fn child_text(el: &Element, name: &str) -> Option<String> {
    el.get_child(name)
        .and_then(|c| c.get_text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Output-directory handles for one fold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowHandles {
    pub train: String,
    pub test: Option<String>,
}

/// Parsed run log.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
    records: Vec<RunRecord>,
}

impl RunLog {
    /// Parse every `<run>` element of the log, in document order.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FoldrunError::MissingRunLog(path.to_path_buf()));
        }
        let root = parse_xml(path)?;

        let records = root
            .children
            .iter()
            .filter_map(|node| node.as_element())
            .filter(|el| el.name == "run")
            .enumerate()
            .map(|(i, el)| RunRecord::from_element(path, i, el))
            .collect::<Result<Vec<_>>>()?;

        debug!(path = %path.display(), records = records.len(), "Loaded run log");
        Ok(RunLog {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn records(&self) -> &[RunRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Latest record of `run_type` for `set_name`.
    pub fn latest(&self, run_type: RunType, set_name: &str) -> Option<&RunRecord> {
        self.records
            .iter()
            .rev()
            .find(|r| r.run_type == run_type && r.set_name == set_name)
    }

    /// Find the output handles of the train run (and, unless `no_test`, the
    /// test run) recorded for `set_name`.
    pub fn correlate(&self, set_name: &str, no_test: bool) -> Result<WorkflowHandles> {
        if self.records.is_empty() {
            return Err(FoldrunError::EmptyRunLog(self.path.clone()));
        }

        let train = self.require(RunType::Train, set_name)?;
        let test = if no_test {
            None
        } else {
            Some(self.require(RunType::Test, set_name)?)
        };

        debug!(
            set_name,
            train = %train.workflow_map,
            train_date = ?train.timestamp(),
            test = ?test.map(|t| &t.workflow_map),
            "Correlated runs"
        );

        Ok(WorkflowHandles {
            train: train.workflow_map.clone(),
            test: test.map(|t| t.workflow_map.clone()),
        })
    }

    fn require(&self, run_type: RunType, set_name: &str) -> Result<&RunRecord> {
        self.latest(run_type, set_name)
            .ok_or_else(|| FoldrunError::MissingRun {
                run_type: run_type.to_string(),
                set_name: set_name.to_string(),
                observed: self
                    .records
                    .iter()
                    .map(|r| (r.run_type.to_string(), r.set_name.clone()))
                    .collect(),
            })
    }
}

/// Empty the run log's root element. A log that does not exist yet is
/// already clear.
pub fn clear_run_log(path: &Path) -> Result<()> {
    if !path.exists() {
        debug!(path = %path.display(), "No run log to clear");
        return Ok(());
    }

    let mut root = parse_xml(path)?;
    root.children.clear();
    write_xml(&root, path)?;

    debug!(path = %path.display(), "Cleared run log");
    Ok(())
}

pub(crate) fn parse_xml(path: &Path) -> Result<Element> {
    let file = fs::File::open(path)?;
    Element::parse(file).map_err(|e| FoldrunError::xml(path, e))
}

pub(crate) fn write_xml(root: &Element, path: &Path) -> Result<()> {
    let file = fs::File::create(path)?;
    root.write(file).map_err(|e| FoldrunError::xml(path, e))
}
