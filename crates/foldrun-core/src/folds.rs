//! Fold discovery and leave-one-fold-out partitioning.
//!
//! The data root is expected to look like
//! `root/fold-<N>/<label>/<document>`. Every fold must expose the same set
//! of class labels.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{FoldrunError, Result};

/// File names left behind by desktop file managers.
pub const OS_ARTIFACTS: &[&str] = &[".DS_Store", "Thumbs.db"];

fn fold_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^fold-(\d+)$").expect("fold pattern is valid"))
}

/// Set name used for the partition at 1-based `index`.
pub fn set_name(index: usize) -> String {
    format!("fold-{index:02}")
}

/// One `fold-<N>` directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fold {
    pub path: PathBuf,
    /// Numeric part of the directory name.
    pub number: u64,
    /// Names of the immediate subdirectories, sorted.
    pub labels: BTreeSet<String>,
}

impl Fold {
    /// Directory name, e.g. `fold-03`.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// One path per class label, in label order.
    pub fn class_folders(&self) -> Vec<PathBuf> {
        self.labels.iter().map(|l| self.path.join(l)).collect()
    }
}

/// A concrete train/test assignment for one tool run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    /// 1-based position in the plan.
    pub index: usize,
    /// `fold-<NN>` name handed to the tool.
    pub set_name: String,
    /// Fold used as the test side, if any.
    pub held_out: Option<PathBuf>,
    pub train: Vec<PathBuf>,
    pub test: Option<Vec<PathBuf>>,
}

impl Partition {
    pub fn run_number(&self) -> u32 {
        self.index as u32
    }

    pub fn is_train_only(&self) -> bool {
        self.test.is_none()
    }
}

/// Result of partitioning a data root.
#[derive(Debug, Clone, Serialize)]
pub struct FoldPlan {
    pub root: PathBuf,
    pub folds: Vec<Fold>,
    pub partitions: Vec<Partition>,
    /// Union of labels across folds.
    pub labels: BTreeSet<String>,
}

impl FoldPlan {
    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }
}

/// Delete OS artifact files anywhere under `root`. Returns how many were removed.
pub fn remove_os_artifacts(root: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if OS_ARTIFACTS.contains(&name.as_ref()) {
            debug!(path = %entry.path().display(), "Removing OS artifact");
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// List the fold directories of `root`, ordered by fold number.
pub fn discover_folds(root: &Path) -> Result<Vec<Fold>> {
    let mut folds = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(caps) = fold_pattern().captures(&name) else {
            continue;
        };
        let Ok(number) = caps[1].parse::<u64>() else {
            warn!(fold = %name, "Fold number out of range, skipping");
            continue;
        };

        let path = entry.path();
        let labels = list_labels(&path)?;
        folds.push(Fold {
            path,
            number,
            labels,
        });
    }

    folds.sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.path.cmp(&b.path)));
    Ok(folds)
}

fn list_labels(fold: &Path) -> Result<BTreeSet<String>> {
    let mut labels = BTreeSet::new();
    for entry in fs::read_dir(fold)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            labels.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(labels)
}

/// Every fold must carry exactly the label set of the first one.
fn validate_labels(folds: &[Fold]) -> Result<BTreeSet<String>> {
    let Some(first) = folds.first() else {
        return Ok(BTreeSet::new());
    };

    for fold in &folds[1..] {
        if fold.labels != first.labels {
            return Err(FoldrunError::LabelMismatch {
                fold: fold.path.clone(),
                expected: first.labels.iter().cloned().collect(),
                observed: fold.labels.iter().cloned().collect(),
            });
        }
    }

    Ok(first.labels.clone())
}

/// Build partitions from already-discovered folds.
pub fn build_partitions(folds: &[Fold]) -> Vec<Partition> {
    if let [only] = folds {
        return vec![Partition {
            index: 1,
            set_name: set_name(1),
            held_out: None,
            train: only.class_folders(),
            test: None,
        }];
    }

    folds
        .iter()
        .enumerate()
        .map(|(i, test_fold)| {
            let train = folds
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .flat_map(|(_, f)| f.class_folders())
                .collect();
            Partition {
                index: i + 1,
                set_name: set_name(i + 1),
                held_out: Some(test_fold.path.clone()),
                train,
                test: Some(test_fold.class_folders()),
            }
        })
        .collect()
}

/// Discover, validate and partition the folds under `root`.
pub fn partition(root: &Path) -> Result<FoldPlan> {
    let folds = discover_folds(root)?;
    if folds.is_empty() {
        return Err(FoldrunError::NoFolds(root.to_path_buf()));
    }

    let labels = validate_labels(&folds)?;
    let partitions = build_partitions(&folds);

    info!(
        root = %root.display(),
        folds = folds.len(),
        classes = labels.len(),
        partitions = partitions.len(),
        "Partitioned data folder"
    );

    Ok(FoldPlan {
        root: root.to_path_buf(),
        folds,
        partitions,
        labels,
    })
}
