/*!
 * External filter processes.
 *
 * A filter is an opaque text-to-text program. Each invocation spawns a fresh
 * process, writes the whole input to its stdin, and collects stdout.
 */

use log::{debug, error};
use std::io;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::step::{Batch, StepContext};
use crate::errors::{ConfigError, PipelineError};

/// A resolved filter command line
#[derive(Debug, Clone)]
pub struct ExternalFilter {
    step: String,
    program: String,
    args: Vec<String>,
    command_line: String,
}

impl ExternalFilter {
    /// Resolve a command template for the given step
    pub fn new(step: &str, template: &str, context: &StepContext) -> Result<Self, ConfigError> {
        let command_line = context.expand(template);
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| ConfigError::InvalidParameter {
            parameter: "command".to_string(),
            message: format!("empty command for step '{}'", step),
        })?;

        // Bare names are looked up on PATH, relative paths live in the model.
        let program = if program.contains('/') {
            context.resolve_path(&program).to_string_lossy().into_owned()
        } else {
            program
        };

        Ok(Self {
            step: step.to_string(),
            program,
            args: parts.collect(),
            command_line,
        })
    }

    /// Expanded command line as configured
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Pipe a batch through the filter and re-split the output into lines
    pub async fn run(&self, batch: &[String]) -> Result<Batch, PipelineError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut input = batch.join("\n");
        input.push('\n');

        let output = self.pipe(input).await?;
        Ok(split_output(&output))
    }

    /// Run the filter on raw text
    pub async fn pipe(&self, input: String) -> Result<String, PipelineError> {
        debug!("Applying command: {}", self.command_line);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                error!("Could not create process: {}", self.command_line);
                PipelineError::Spawn {
                    command: self.command_line.clone(),
                    source,
                }
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| self.io_error(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "filter stdin unavailable",
        )))?;

        // Feed stdin concurrently so a filter that streams output cannot block on a full pipe.
        let writer = tokio::spawn(async move {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await
        });

        let output = child.wait_with_output().await.map_err(|e| self.io_error(e))?;

        match writer.await {
            Ok(Ok(())) => {}
            // The filter may exit before consuming all of its input.
            Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => return Err(self.io_error(e)),
            Err(e) => return Err(self.io_error(io::Error::other(e))),
        }

        if !output.status.success() {
            error!("Processing failed: {}", self.command_line);
            return Err(PipelineError::ExitStatus {
                command: self.command_line.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!("Success: {}", self.command_line);
        String::from_utf8(output.stdout).map_err(|_| PipelineError::InvalidUtf8(self.step.clone()))
    }

    fn io_error(&self, source: io::Error) -> PipelineError {
        PipelineError::Io {
            step: self.step.clone(),
            source,
        }
    }
}

/// Split filter output into trimmed lines, dropping trailing blank lines
pub fn split_output(output: &str) -> Batch {
    let mut lines: Batch = output.split('\n').map(|l| l.trim().to_string()).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}
