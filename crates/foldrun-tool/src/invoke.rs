//! Launching the external tool and watching its output.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use foldrun_core::{FoldrunError, ParamOverrides, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::layout::ToolLayout;

/// Substrings that mark a fatal line in the tool's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureMarkers {
    pub error: String,
    pub exiting: String,
}

impl Default for FailureMarkers {
    fn default() -> Self {
        Self {
            error: "ERROR".to_string(),
            exiting: "Exiting...".to_string(),
        }
    }
}

/// How a single output line is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineVerdict {
    Info,
    /// Logged at error level; the run continues.
    Error,
    /// Aborts the whole run.
    Fatal,
}

/// Classify one line of tool output.
pub fn classify_line(line: &str, markers: &FailureMarkers) -> LineVerdict {
    if !line.contains(&markers.error) {
        LineVerdict::Info
    } else if line.contains(&markers.exiting) {
        LineVerdict::Fatal
    } else {
        LineVerdict::Error
    }
}

/// Command line and limits for one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCommand {
    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Working directory; the tool looks for its configuration relative to it.
    pub working_dir: PathBuf,

    /// Timeout in seconds (0 = wait indefinitely).
    pub timeout_secs: u64,

    pub markers: FailureMarkers,
}

impl ToolCommand {
    /// `<java> -jar <jar>` from the installation root.
    pub fn java(java: &str, layout: &ToolLayout, timeout_secs: u64) -> Self {
        Self {
            command: vec![
                java.to_string(),
                "-jar".to_string(),
                layout.jar.to_string_lossy().into_owned(),
            ],
            working_dir: layout.root.clone(),
            timeout_secs,
            markers: FailureMarkers::default(),
        }
    }

    /// Create a custom command.
    pub fn custom(command: Vec<String>, working_dir: PathBuf, timeout_secs: u64) -> Self {
        Self {
            command,
            working_dir,
            timeout_secs,
            markers: FailureMarkers::default(),
        }
    }
}

/// Outcome of a tool run that was not aborted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolExit {
    /// Exit code (-1 if killed by a signal).
    pub exit_code: i32,

    /// Lines read from stdout and stderr.
    pub lines: usize,

    /// Lines carrying the error marker.
    pub error_lines: usize,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ToolExit {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Something that runs the tool once for the parameters already installed.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, overrides: &ParamOverrides) -> Result<ToolExit>;
}

/// Runs the tool as a child process.
pub struct ProcessInvoker {
    command: ToolCommand,
    cancel: Option<watch::Receiver<bool>>,
}

impl ProcessInvoker {
    pub fn new(command: ToolCommand) -> Self {
        Self {
            command,
            cancel: None,
        }
    }

    /// Abort any running invocation once `true` is sent on the channel.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn command(&self) -> &ToolCommand {
        &self.command
    }

    /// Execute the command, streaming its output until it exits.
    pub async fn run(&self) -> Result<ToolExit> {
        let start = Instant::now();
        let config = &self.command;

        if config.command.is_empty() {
            return Err(FoldrunError::ToolSpawn {
                program: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            });
        }
        let program = &config.command[0];

        let mut child = Command::new(program)
            .args(&config.command[1..])
            .current_dir(&config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FoldrunError::ToolSpawn {
                program: program.clone(),
                source,
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "tool output was not captured",
            )
            .into());
        };

        let markers = &config.markers;
        let running = async {
            let mut out = BufReader::new(stdout).split(b'\n');
            let mut err = BufReader::new(stderr).split(b'\n');
            let (mut out_done, mut err_done) = (false, false);
            let mut exit = ToolExit::default();

            while !(out_done && err_done) {
                let segment = tokio::select! {
                    seg = out.next_segment(), if !out_done => match seg? {
                        Some(s) => s,
                        None => { out_done = true; continue; }
                    },
                    seg = err.next_segment(), if !err_done => match seg? {
                        Some(s) => s,
                        None => { err_done = true; continue; }
                    },
                };

                let line = String::from_utf8_lossy(&segment);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                exit.lines += 1;

                match classify_line(line, markers) {
                    LineVerdict::Info => debug!(tool_output = %line),
                    LineVerdict::Error => {
                        exit.error_lines += 1;
                        error!(tool_output = %line);
                    }
                    LineVerdict::Fatal => {
                        error!(tool_output = %line);
                        return Err(FoldrunError::ToolFailure(line.to_string()));
                    }
                }
            }

            // Output closed; the process may still be alive.
            let status = child.wait().await?;
            exit.exit_code = status.code().unwrap_or(-1);
            Ok::<_, FoldrunError>(exit)
        };

        let deadline = async {
            if config.timeout_secs > 0 {
                tokio::time::sleep(Duration::from_secs(config.timeout_secs)).await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        let mut cancel = self.cancel.clone();
        let cancelled = async {
            match cancel.as_mut() {
                Some(rx) => {
                    while !*rx.borrow_and_update() {
                        if rx.changed().await.is_err() {
                            std::future::pending::<()>().await;
                        }
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            result = running => result,
            _ = deadline => Err(FoldrunError::ToolTimeout { secs: config.timeout_secs }),
            _ = cancelled => Err(FoldrunError::Cancelled),
        };

        let mut exit = match outcome {
            Ok(exit) => exit,
            Err(e) => {
                if let Err(kill_err) = child.kill().await {
                    warn!(error = %kill_err, "Failed to kill tool process");
                }
                return Err(e);
            }
        };

        exit.duration_ms = start.elapsed().as_millis() as u64;

        if !exit.success() {
            warn!(exit_code = exit.exit_code, "Tool exited with non-zero status");
        }
        Ok(exit)
    }
}

#[async_trait]
impl ToolInvoker for ProcessInvoker {
    async fn invoke(&self, overrides: &ParamOverrides) -> Result<ToolExit> {
        info!(
            run_type = %overrides.run_type,
            set_name = %overrides.set_name,
            command = ?self.command.command,
            "Creating instances"
        );
        let exit = self.run().await?;
        debug!(
            lines = exit.lines,
            error_lines = exit.error_lines,
            duration_ms = exit.duration_ms,
            "Tool finished"
        );
        Ok(exit)
    }
}
