//! External EDA command-line tool
//!
//! Runs the tool as a blocking subprocess: a current-thread tokio runtime
//! drives the child under a timeout and the child is killed if it overruns.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ExternalConfig;

#[derive(Debug, Error)]
pub enum ExternalToolError {
    #[error("{program} not found")]
    NotFound { program: String },
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} did not finish within {}s", .timeout.as_secs_f64())]
    Timeout { program: String, timeout: Duration },
    #[error("{program} exited with {}: {}", exit_label(.code), .stderr.trim())]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("runtime error: {0}")]
    Runtime(#[source] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    code.map(|c| format!("status {}", c))
        .unwrap_or_else(|| "a signal".to_string())
}

/// Captured output of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct ExternalTool {
    program: String,
    timeout: Duration,
}

impl ExternalTool {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ExternalConfig) -> Self {
        Self::new(config.kicad_cli.clone(), Duration::from_secs(config.timeout_secs))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run the tool with `args`, blocking until it exits or times out.
    pub fn run<I, S>(&self, args: I, cwd: Option<&Path>) -> Result<ToolOutput, ExternalToolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ExternalToolError::Runtime)?;

        debug!(program = %self.program, ?args, "running external tool");
        runtime.block_on(async {
            let mut command = Command::new(&self.program);
            command
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            if let Some(dir) = cwd {
                command.current_dir(dir);
            }

            let child = command.spawn().map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    ExternalToolError::NotFound {
                        program: self.program.clone(),
                    }
                } else {
                    ExternalToolError::Spawn {
                        program: self.program.clone(),
                        source,
                    }
                }
            })?;

            // Dropping the wait future on timeout drops the child, which kills it.
            let output = tokio::time::timeout(self.timeout, child.wait_with_output())
                .await
                .map_err(|_| ExternalToolError::Timeout {
                    program: self.program.clone(),
                    timeout: self.timeout,
                })?
                .map_err(|source| ExternalToolError::Spawn {
                    program: self.program.clone(),
                    source,
                })?;

            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if !output.status.success() {
                return Err(ExternalToolError::NonZeroExit {
                    program: self.program.clone(),
                    code: output.status.code(),
                    stdout,
                    stderr,
                });
            }
            Ok(ToolOutput { stdout, stderr })
        })
    }

    /// `sch erc` on a schematic, writing a JSON report.
    pub fn erc(&self, schematic: &Path, report: &Path) -> Result<ToolOutput, ExternalToolError> {
        info!(schematic = %schematic.display(), "running ERC");
        self.run(
            [
                OsString::from("sch"),
                OsString::from("erc"),
                OsString::from("--format"),
                OsString::from("json"),
                OsString::from("--severity-error"),
                OsString::from("--exit-code-violations"),
                OsString::from("--output"),
                report.as_os_str().to_owned(),
                schematic.as_os_str().to_owned(),
            ],
            None,
        )
    }

    /// `sch export pdf` on a schematic.
    pub fn export_pdf(&self, schematic: &Path, pdf: &Path) -> Result<ToolOutput, ExternalToolError> {
        info!(schematic = %schematic.display(), pdf = %pdf.display(), "exporting PDF");
        self.run(
            [
                OsString::from("sch"),
                OsString::from("export"),
                OsString::from("pdf"),
                OsString::from("--output"),
                pdf.as_os_str().to_owned(),
                schematic.as_os_str().to_owned(),
            ],
            None,
        )
    }
}

/// Report path written next to a schematic by [`ExternalTool::erc`].
pub fn erc_report_path(schematic: &Path) -> PathBuf {
    schematic.with_extension("erc.json")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_captures_stdout() {
        let tool = ExternalTool::new("sh", Duration::from_secs(10));
        let out = tool.run(["-c", "echo hello"], None).unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_non_zero_exit() {
        let tool = ExternalTool::new("sh", Duration::from_secs(10));
        let err = tool.run(["-c", "echo oops >&2; exit 3"], None).unwrap_err();
        match err {
            ExternalToolError::NonZeroExit { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_program() {
        let tool = ExternalTool::new("netforge-no-such-tool", Duration::from_secs(1));
        let err = tool.run(Vec::<String>::new(), None).unwrap_err();
        assert!(matches!(err, ExternalToolError::NotFound { .. }));
    }

    #[test]
    fn test_timeout() {
        let tool = ExternalTool::new("sleep", Duration::from_millis(200));
        let err = tool.run(["5"], None).unwrap_err();
        assert!(matches!(err, ExternalToolError::Timeout { .. }));
    }

    #[test]
    fn test_report_path() {
        assert_eq!(
            erc_report_path(Path::new("out/board.kicad_sch")),
            PathBuf::from("out/board.erc.json")
        );
    }
}
