//! Copying generated instance files into the output layout.
//!
//! Output lands in `<output>/<set-name>/train` and `<output>/<set-name>/test`.
//! Existing destinations are only replaced as the [`OverwritePolicy`] allows.

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use foldrun_core::{copy_tree, FoldrunError, Result, WorkflowHandles};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::layout::ToolLayout;

/// Subdirectory of a workflow directory holding the instance files.
pub const INSTANCES_DIR: &str = "instances";

/// What to do when a destination folder already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    /// Ask on every conflict.
    #[default]
    Ask,
    Always,
    /// Abort on the first conflict.
    Never,
}

impl FromStr for OverwritePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ask" => Ok(OverwritePolicy::Ask),
            "always" => Ok(OverwritePolicy::Always),
            "never" => Ok(OverwritePolicy::Never),
            other => Err(format!(
                "invalid overwrite policy {other:?} (expected ask, always or never)"
            )),
        }
    }
}

/// Answer to an overwrite question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteDecision {
    Yes,
    No,
    /// Yes, and stop asking.
    Always,
}

impl OverwriteDecision {
    pub fn parse(answer: &str) -> Option<Self> {
        match answer.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => Some(OverwriteDecision::Yes),
            "n" | "no" => Some(OverwriteDecision::No),
            "a" | "always" => Some(OverwriteDecision::Always),
            _ => None,
        }
    }
}

/// Source of overwrite decisions.
pub trait OverwritePrompt {
    fn ask(&mut self, destination: &Path) -> Result<OverwriteDecision>;
}

/// Line-oriented prompt, normally over the terminal.
pub struct LinePrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LinePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl LinePrompt<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn terminal() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> OverwritePrompt for LinePrompt<R, W> {
    fn ask(&mut self, destination: &Path) -> Result<OverwriteDecision> {
        writeln!(
            self.output,
            "\n{} already exists. Are you sure you want to overwrite?\n\
             ([y]es/[n]o/[a]lways. Selecting \"no\" will terminate the run.)\n",
            destination.display()
        )?;

        loop {
            self.output.flush()?;
            let mut answer = String::new();
            if self.input.read_line(&mut answer)? == 0 {
                // Input closed; nobody can confirm.
                return Ok(OverwriteDecision::No);
            }
            if let Some(decision) = OverwriteDecision::parse(&answer) {
                return Ok(decision);
            }
            writeln!(
                self.output,
                "\nPlease select one of the following options: [y]es/[n]o/[a]lways\n"
            )?;
        }
    }
}

/// Destinations written for one fold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestedSet {
    pub train: PathBuf,
    pub test: Option<PathBuf>,
}

/// Copies instance directories out of the tool, applying the overwrite policy.
pub struct Harvester<'a> {
    layout: ToolLayout,
    output_root: PathBuf,
    policy: OverwritePolicy,
    prompt: Box<dyn OverwritePrompt + 'a>,
}

impl<'a> Harvester<'a> {
    pub fn new(
        layout: ToolLayout,
        output_root: impl Into<PathBuf>,
        policy: OverwritePolicy,
        prompt: Box<dyn OverwritePrompt + 'a>,
    ) -> Self {
        Self {
            layout,
            output_root: output_root.into(),
            policy,
            prompt,
        }
    }

    pub fn policy(&self) -> OverwritePolicy {
        self.policy
    }

    /// Decide whether `destination` may be replaced; `Ok(())` means yes.
    fn permit(&mut self, destination: &Path) -> Result<()> {
        match self.policy {
            OverwritePolicy::Always => Ok(()),
            OverwritePolicy::Never => Err(FoldrunError::UserAbort(destination.to_path_buf())),
            OverwritePolicy::Ask => match self.prompt.ask(destination)? {
                OverwriteDecision::Yes => Ok(()),
                OverwriteDecision::Always => {
                    info!("Overwriting existing instances for the rest of the run");
                    self.policy = OverwritePolicy::Always;
                    Ok(())
                }
                OverwriteDecision::No => Err(FoldrunError::UserAbort(destination.to_path_buf())),
            },
        }
    }

    fn copy_instances(&mut self, handle: &str, destination: PathBuf) -> Result<PathBuf> {
        let source = self.layout.resolve_handle(handle).join(INSTANCES_DIR);
        if !source.is_dir() {
            return Err(FoldrunError::MissingOutput(source));
        }

        if destination.exists() {
            self.permit(&destination)?;
            fs::remove_dir_all(&destination)?;
        }

        let copied = copy_tree(&source, &destination)?;
        debug!(
            from = %source.display(),
            to = %destination.display(),
            files = copied,
            "Copied instance files"
        );
        Ok(destination)
    }

    /// Copy the instances of `handles` into `<output>/<set_name>/{train,test}`.
    pub fn harvest(&mut self, handles: &WorkflowHandles, set_name: &str) -> Result<HarvestedSet> {
        let base = self.output_root.join(set_name);

        let train = self.copy_instances(&handles.train, base.join("train"))?;
        let test = match &handles.test {
            Some(handle) => Some(self.copy_instances(handle, base.join("test"))?),
            None => None,
        };

        Ok(HarvestedSet { train, test })
    }
}
