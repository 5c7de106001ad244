//! Operator-facing terminal I/O.
//!
//! The [`Operator`] trait is everything the conversation loop needs from a
//! human: input lines, confirmations, and a place to show progress. The
//! terminal implementation colors its output; tests use a scripted operator.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use crossterm::style::Stylize;

use crate::core::action::ExecutionResult;
use crate::io::executor::Confirm;
use crate::io::session_log::SessionLogPaths;

/// Progress and results surfaced to the operator.
#[derive(Debug, Clone, Copy)]
pub enum Notice<'a> {
    Ready,
    Thinking,
    ActionRequested(&'a str),
    ActionFinished(&'a ExecutionResult),
    Answer(&'a str),
    TurnFailed(&'a str),
    LogsWritten(&'a SessionLogPaths),
    LogsFailed(&'a str),
}

pub trait Operator: Confirm {
    /// Next input line without its line ending, or `None` at end of input.
    fn read_input(&mut self) -> Result<Option<String>>;

    fn notify(&mut self, notice: Notice<'_>);
}

/// Empty input or `y` (any case) approves a command.
pub fn is_affirmative(answer: &str) -> bool {
    let answer = answer.trim();
    answer.is_empty() || answer.eq_ignore_ascii_case("y")
}

/// Interactive operator on stdin/stdout.
pub struct TerminalOperator<R> {
    input: R,
}

impl TerminalOperator<io::StdinLock<'static>> {
    pub fn stdin() -> Self {
        Self {
            input: io::stdin().lock(),
        }
    }
}

impl<R: BufRead> TerminalOperator<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }

    fn prompt_line(&mut self, prompt: &str) -> Result<Option<String>> {
        let mut stdout = io::stdout();
        write!(stdout, "{prompt}").context("write prompt")?;
        stdout.flush().context("flush prompt")?;

        // Lines that are not valid UTF-8 are decoded lossily.
        let mut line = Vec::new();
        let read = self.input.read_until(b'\n', &mut line).context("read input")?;
        if read == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&line);
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

impl<R: BufRead> Confirm for TerminalOperator<R> {
    fn confirm(&mut self, command_line: &str) -> Result<bool> {
        let prompt = format!("Execute `{command_line}`? [Y/n]");
        let answer = self.prompt_line(&format!("{} ", prompt.bold()))?;
        Ok(answer.as_deref().is_some_and(is_affirmative))
    }
}

impl<R: BufRead> Operator for TerminalOperator<R> {
    fn read_input(&mut self) -> Result<Option<String>> {
        self.prompt_line(&format!("{}", "You: ".bold()))
    }

    fn notify(&mut self, notice: Notice<'_>) {
        match notice {
            Notice::Ready => {
                println!("{}\n", "System ready. Type 'quit' to exit.".green());
            }
            Notice::Thinking => {
                print!("{}\r", "Thinking...".yellow());
                let _ = io::stdout().flush();
            }
            Notice::ActionRequested(action) => {
                println!("{} {action}", "Model wants to run:".yellow());
            }
            Notice::ActionFinished(result) => {
                if result.refused {
                    println!("{}", "Command skipped.".yellow());
                } else if let Some(detail) = &result.error_detail {
                    println!("{} {detail}", "Command failed:".red());
                }
            }
            Notice::Answer(text) => {
                println!("\n{} {text}\n", "Model:".green());
            }
            Notice::TurnFailed(message) => {
                eprintln!("{} {message}", "Error:".red());
            }
            Notice::LogsWritten(paths) => {
                println!(
                    "{} {} and {}",
                    "Session saved to".green(),
                    paths.markdown.display(),
                    paths.json.display()
                );
            }
            Notice::LogsFailed(message) => {
                eprintln!("{} {message}", "Could not save session logs:".red());
            }
        }
    }
}
