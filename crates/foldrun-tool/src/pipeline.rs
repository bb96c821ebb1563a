//! Sequential per-fold orchestration.
//!
//! Each fold goes through
//! `Idle -> Staging -> Invoking -> AwaitingExit -> Correlating -> Copying -> Idle`
//! (staging through awaiting exit once for train and once for test). The run
//! ends in `Done`, or in `Failed` on the first error.

use std::path::{Path, PathBuf};
use std::time::Instant;

use foldrun_core::{
    clear_run_log, install_params, partition, remove_os_artifacts, FoldPlan, FoldrunError,
    ParamOverrides, Partition, Result, RunLog, RunType, WorkflowHandles,
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, info_span, Instrument};

use crate::harvest::{HarvestedSet, Harvester};
use crate::invoke::{ToolExit, ToolInvoker};
use crate::layout::ToolLayout;
use crate::staging::stage;

/// Where the pipeline is in processing a fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldPhase {
    Idle,
    Staging,
    Invoking,
    AwaitingExit,
    Correlating,
    Copying,
    Done,
    Failed,
}

/// Outcome of one fold.
#[derive(Debug, Clone, Serialize)]
pub struct FoldOutcome {
    pub set_name: String,
    pub held_out: Option<PathBuf>,
    pub handles: WorkflowHandles,
    pub harvested: HarvestedSet,
    pub train_exit_code: i32,
    pub test_exit_code: Option<i32>,
}

/// Result of a complete run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub folds: Vec<FoldOutcome>,
    pub num_classes: usize,
    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

/// Remove OS artifacts from `root`, then partition it.
pub fn plan_folds(root: &Path) -> Result<FoldPlan> {
    let removed = remove_os_artifacts(root)?;
    if removed > 0 {
        debug!(removed, "Removed OS artifact files");
    }
    partition(root)
}

/// Drives the tool over every partition of a plan.
pub struct Pipeline<'a> {
    layout: ToolLayout,
    params_template: PathBuf,
    invoker: &'a dyn ToolInvoker,
    harvester: Harvester<'a>,
    phase: FoldPhase,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        layout: ToolLayout,
        params_template: impl Into<PathBuf>,
        invoker: &'a dyn ToolInvoker,
        harvester: Harvester<'a>,
    ) -> Self {
        Self {
            layout,
            params_template: params_template.into(),
            invoker,
            harvester,
            phase: FoldPhase::Idle,
            cancel: None,
        }
    }

    /// Stop at the next phase change once `true` is sent on the channel.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn phase(&self) -> FoldPhase {
        self.phase
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(rx) if *rx.borrow() => Err(FoldrunError::Cancelled),
            _ => Ok(()),
        }
    }

    fn transition(&mut self, to: FoldPhase) -> Result<()> {
        self.check_cancelled()?;
        debug!(event = "fold.phase", from = ?self.phase, to = ?to);
        self.phase = to;
        Ok(())
    }

    fn fail(&mut self) {
        debug!(event = "fold.phase", from = ?self.phase, to = ?FoldPhase::Failed);
        self.phase = FoldPhase::Failed;
    }

    /// Process every partition in order. The first error stops the run.
    pub async fn run(&mut self, plan: &FoldPlan) -> Result<RunReport> {
        let start = Instant::now();
        let total = plan.partitions.len();
        let mut folds = Vec::with_capacity(total);

        for part in &plan.partitions {
            let span = info_span!("fold", set_name = %part.set_name);
            let result = self
                .run_fold(part, plan.num_classes(), total)
                .instrument(span)
                .await;
            match result {
                Ok(outcome) => folds.push(outcome),
                Err(e) => {
                    self.fail();
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.transition(FoldPhase::Done) {
            self.fail();
            return Err(e);
        }
        Ok(RunReport {
            folds,
            num_classes: plan.num_classes(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn run_fold(
        &mut self,
        part: &Partition,
        num_classes: usize,
        total: usize,
    ) -> Result<FoldOutcome> {
        self.check_cancelled()?;
        info!("Processing fold {}/{}", part.index, total);

        clear_run_log(&self.layout.run_log)?;

        let train_exit = self
            .invoke_once(RunType::Train, &part.train, part, num_classes)
            .await?;
        let test_exit = match &part.test {
            Some(test) => Some(
                self.invoke_once(RunType::Test, test, part, num_classes)
                    .await?,
            ),
            None => {
                info!("Only one fold detected, not generating a test fold");
                None
            }
        };

        self.transition(FoldPhase::Correlating)?;
        let handles =
            RunLog::load(&self.layout.run_log)?.correlate(&part.set_name, part.is_train_only())?;

        self.transition(FoldPhase::Copying)?;
        info!("Retrieving instance files");
        let harvested = self.harvester.harvest(&handles, &part.set_name)?;

        self.transition(FoldPhase::Idle)?;
        Ok(FoldOutcome {
            set_name: part.set_name.clone(),
            held_out: part.held_out.clone(),
            handles,
            harvested,
            train_exit_code: train_exit.exit_code,
            test_exit_code: test_exit.map(|e| e.exit_code),
        })
    }

    async fn invoke_once(
        &mut self,
        run_type: RunType,
        folders: &[PathBuf],
        part: &Partition,
        num_classes: usize,
    ) -> Result<ToolExit> {
        info!(run_type = %run_type, folders = folders.len(), "Staging documents");

        self.transition(FoldPhase::Staging)?;
        let staged = stage(folders, &self.layout.upload_dir)?;
        debug!(labels = staged.labels.len(), files = staged.files, "Staged");

        self.transition(FoldPhase::Invoking)?;
        let overrides = ParamOverrides {
            run_type,
            run_number: part.run_number(),
            set_name: part.set_name.clone(),
            num_classes,
        };
        install_params(&self.params_template, &overrides, &self.layout.params)?;

        self.transition(FoldPhase::AwaitingExit)?;
        self.invoker.invoke(&overrides).await
    }
}
