//! Confirmed execution of model-requested shell commands.
//!
//! The [`Confirm`] trait decouples the confirmation gate from the terminal so
//! tests can script operator answers. Execution never returns an error: every
//! failure mode is folded into an [`ExecutionResult`] the model can read.

use std::process::{Command, ExitStatus};

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::action::{ActionRequest, CommandLine, ExecutionResult};
use crate::io::process::run_captured;

/// Operator confirmation for a literal command line.
pub trait Confirm {
    /// Returns `true` when the operator allows the command to run.
    fn confirm(&mut self, command_line: &str) -> Result<bool>;
}

/// Runs [`ActionRequest`]s as child processes.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    require_confirmation: bool,
}

impl CommandExecutor {
    pub fn new(require_confirmation: bool) -> Self {
        Self {
            require_confirmation,
        }
    }

    #[instrument(skip_all, fields(command = %request.command.display()))]
    pub fn execute<C: Confirm + ?Sized>(
        &self,
        request: &ActionRequest,
        confirm: &mut C,
    ) -> ExecutionResult {
        let shown = request.command.display();
        if self.require_confirmation {
            match confirm.confirm(&shown) {
                Ok(true) => debug!("operator confirmed command"),
                Ok(false) => {
                    info!("operator refused command");
                    return ExecutionResult::refused();
                }
                Err(err) => {
                    warn!(err = %err, "confirmation failed, treating as refusal");
                    return ExecutionResult::refused();
                }
            }
        }

        let argv = match tokenize(&request.command) {
            Ok(argv) => argv,
            Err(detail) => return ExecutionResult::failure("", detail),
        };

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]).envs(&request.env);
        if let Some(dir) = &request.working_directory {
            cmd.current_dir(dir);
        }

        match run_captured(cmd, request.timeout) {
            Ok(output) if output.timed_out => {
                let limit = request.timeout.unwrap_or_default();
                ExecutionResult::failure(
                    output.combined(),
                    format!("timed out after {}ms", limit.as_millis()),
                )
            }
            Ok(output) if !output.status.success() => {
                ExecutionResult::failure(output.combined(), describe_status(output.status))
            }
            Ok(output) => ExecutionResult::completed(output.combined()),
            Err(err) => {
                ExecutionResult::failure("", format!("failed to launch `{}`: {err:#}", argv[0]))
            }
        }
    }
}

/// Split a command into argv using POSIX shell-word rules, without expansion.
pub fn tokenize(command: &CommandLine) -> std::result::Result<Vec<String>, String> {
    let argv = match command {
        CommandLine::Argv(argv) => argv.clone(),
        CommandLine::Text(text) => shlex::split(text)
            .ok_or_else(|| format!("could not parse command (unbalanced quotes?): {text}"))?,
    };
    if argv.is_empty() || argv[0].is_empty() {
        return Err("empty command".to_string());
    }
    Ok(argv)
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exited with status {code}"),
        None => "terminated by signal".to_string(),
    }
}
