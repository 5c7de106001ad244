//! The conversation loop for `shellchat`.
//!
//! A turn appends the operator's input, calls the model with the full
//! transcript, and keeps executing requested actions and calling the model
//! again until a response arrives with no action. There is no iteration cap;
//! the operator interrupts the process to break a runaway tool cycle.

use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::action::{Action, ExecutionResult};
use crate::core::normalizer::{NormalizedResponse, normalize};
use crate::core::transcript::{ContentPart, Message, Role, Transcript};
use crate::io::config::{ActionPolicy, AppConfig};
use crate::io::executor::CommandExecutor;
use crate::io::model::{ModelClient, ModelError};
use crate::io::session_log::{SessionLogPaths, write_session_logs};
use crate::io::terminal::{Notice, Operator};
use crate::io::tools::Toolbox;

/// Instruction message seeded into every new transcript.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful IT and software development assistant. \
When you run a shell command, briefly explain what you did and what the output means. \
Do not perform Git operations unless specifically asked. \
Always reply with text after a tool call completes.";

/// Shown when actions ran but the model added no text afterwards.
pub const ACTIONS_DONE_TEXT: &str = "(Command finished successfully)";

/// Stored and shown when the model returned neither text nor actions.
pub const EMPTY_RESPONSE_TEXT: &str = "(empty response)";

/// `quit`, `exit` or `q`, in any case.
pub fn is_quit(input: &str) -> bool {
    let input = input.trim();
    ["quit", "exit", "q"]
        .iter()
        .any(|word| input.eq_ignore_ascii_case(word))
}

/// One operator session: the transcript and when it started.
#[derive(Debug, Clone)]
pub struct Session {
    transcript: Transcript,
    started_at: DateTime<Local>,
}

impl Session {
    pub fn new(instructions: &str) -> Self {
        Self {
            transcript: Transcript::seeded(instructions),
            started_at: Local::now(),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn started_at(&self) -> &DateTime<Local> {
        &self.started_at
    }
}

/// Loop behavior knobs derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub action_policy: ActionPolicy,
    pub model_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            action_policy: ActionPolicy::First,
            model_retries: 0,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl From<&AppConfig> for LoopConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            action_policy: cfg.action_policy,
            model_retries: cfg.model_retries,
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
        }
    }
}

/// Dispatches actions to the shell executor or the inspection toolbox.
#[derive(Debug, Clone)]
pub struct ActionRunner {
    executor: CommandExecutor,
    toolbox: Toolbox,
}

impl ActionRunner {
    pub fn new(executor: CommandExecutor, toolbox: Toolbox) -> Self {
        Self { executor, toolbox }
    }

    pub fn run<O: Operator + ?Sized>(&self, action: &Action, operator: &mut O) -> ExecutionResult {
        operator.notify(Notice::ActionRequested(&action.describe()));
        let result = match action {
            Action::Shell(request) => self.executor.execute(request, operator),
            Action::Tool(call) => self.toolbox.run(call),
        };
        operator.notify(Notice::ActionFinished(&result));
        result
    }
}

/// Summary of one completed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub model_calls: u32,
    pub actions_executed: u32,
    pub final_text: String,
}

/// Run one turn for `input`.
///
/// A [`ModelError`] aborts the turn and is returned inside the `anyhow`
/// error; everything appended before the failure stays in the transcript.
#[instrument(skip_all, fields(messages = session.transcript.len()))]
pub fn run_turn<M: ModelClient, O: Operator>(
    session: &mut Session,
    input: &str,
    model: &M,
    runner: &ActionRunner,
    operator: &mut O,
    config: &LoopConfig,
) -> Result<TurnOutcome> {
    session.transcript.append(Message::user_text(input))?;

    let mut model_calls = 0u32;
    let mut actions_executed = 0u32;
    loop {
        operator.notify(Notice::Thinking);
        let items = call_model(model, &session.transcript, config)?;
        model_calls += 1;

        let normalized = normalize(&items);
        let narrative = normalized.narrative_text();
        let NormalizedResponse { parts, actions } = normalized;

        if actions.is_empty() {
            let final_text = if !narrative.is_empty() {
                narrative
            } else if actions_executed > 0 {
                ACTIONS_DONE_TEXT.to_string()
            } else {
                EMPTY_RESPONSE_TEXT.to_string()
            };
            let parts = if parts.is_empty() {
                vec![ContentPart::text(final_text.clone())]
            } else {
                parts
            };
            session
                .transcript
                .append(Message::new(Role::Assistant, parts))?;
            operator.notify(Notice::Answer(&final_text));
            debug!(model_calls, actions_executed, "turn complete");
            return Ok(TurnOutcome {
                model_calls,
                actions_executed,
                final_text,
            });
        }

        session
            .transcript
            .append(Message::new(Role::Assistant, parts))?;

        let selected = match config.action_policy {
            ActionPolicy::First => {
                if actions.len() > 1 {
                    info!(
                        skipped = actions.len() - 1,
                        "response requested several actions; executing the first only"
                    );
                }
                &actions[..1]
            }
            ActionPolicy::All => &actions[..],
        };

        for action in selected {
            let result = runner.run(action, operator);
            actions_executed += 1;
            session
                .transcript
                .append(Message::command_output(&result.transcript_text()))?;
        }
    }
}

fn call_model<M: ModelClient>(
    model: &M,
    transcript: &Transcript,
    config: &LoopConfig,
) -> std::result::Result<Vec<Value>, ModelError> {
    let mut attempt = 0u32;
    loop {
        match model.respond(transcript) {
            Ok(items) => return Ok(items),
            Err(err) if err.is_transient() && attempt < config.model_retries => {
                let delay = config
                    .retry_backoff
                    .saturating_mul(2u32.saturating_pow(attempt));
                warn!(err = %err, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "model call failed, retrying");
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnd {
    pub turns: u32,
    /// `None` when the logs could not be written.
    pub logs: Option<SessionLogPaths>,
}

/// Read operator input until `quit` or end of input, running a turn for each
/// line, then write the session logs.
///
/// Model failures end only the current turn. An input read failure ends the
/// session like `quit`. Log write failures are reported and swallowed.
pub fn run_session<M: ModelClient, O: Operator>(
    session: &mut Session,
    model: &M,
    runner: &ActionRunner,
    operator: &mut O,
    config: &LoopConfig,
    log_dir: &Path,
) -> Result<SessionEnd> {
    operator.notify(Notice::Ready);

    let mut turns = 0u32;
    loop {
        let line = match operator.read_input() {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("end of input, closing session");
                break;
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(err = %message, "input unreadable, closing session");
                operator.notify(Notice::TurnFailed(&message));
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        if is_quit(&line) {
            break;
        }

        match run_turn(session, &line, model, runner, operator, config) {
            Ok(outcome) => {
                turns += 1;
                debug!(
                    model_calls = outcome.model_calls,
                    actions = outcome.actions_executed,
                    "turn finished"
                );
            }
            Err(err) => match err.downcast_ref::<ModelError>() {
                Some(model_err) => {
                    warn!(err = %model_err, "turn failed");
                    operator.notify(Notice::TurnFailed(&model_err.to_string()));
                }
                None => return Err(err),
            },
        }
    }

    let logs = match write_session_logs(log_dir, session.transcript(), session.started_at()) {
        Ok(paths) => {
            operator.notify(Notice::LogsWritten(&paths));
            Some(paths)
        }
        Err(err) => {
            let message = format!("{err:#}");
            warn!(err = %message, "failed to write session logs");
            operator.notify(Notice::LogsFailed(&message));
            None
        }
    };

    Ok(SessionEnd { turns, logs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transcript::COMMAND_OUTPUT_PREFIX;
    use crate::test_support::{ScriptedModel, ScriptedOperator, shell_call, text_item};
    use serde_json::json;

    fn runner() -> ActionRunner {
        ActionRunner::new(CommandExecutor::new(true), Toolbox::default())
    }

    #[test]
    fn quit_words_are_case_insensitive() {
        for word in ["quit", "EXIT", "Q", " q "] {
            assert!(is_quit(word), "{word}");
        }
        assert!(!is_quit("quit now"));
        assert!(!is_quit(""));
    }

    #[test]
    fn text_only_response_takes_one_call_and_one_message() {
        let mut session = Session::new("instructions");
        let model = ScriptedModel::new(vec![Ok(vec![text_item("Hi there.")])]);
        let mut operator = ScriptedOperator::default();

        let outcome = run_turn(
            &mut session,
            "hello",
            &model,
            &runner(),
            &mut operator,
            &LoopConfig::default(),
        )
        .expect("turn");

        assert_eq!(outcome.model_calls, 1);
        assert_eq!(outcome.actions_executed, 0);
        assert_eq!(outcome.final_text, "Hi there.");
        assert_eq!(session.transcript().len(), 3);
        assert_eq!(
            session.transcript().last(),
            Some(&Message::assistant_text("Hi there."))
        );
        assert_eq!(operator.answers(), vec!["Hi there."]);
    }

    #[test]
    fn only_first_action_runs_by_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = temp.path().join("first");
        let second = temp.path().join("second");
        let model = ScriptedModel::new(vec![
            Ok(vec![
                shell_call(json!(["touch", first.display().to_string()])),
                shell_call(json!(["touch", second.display().to_string()])),
            ]),
            Ok(vec![text_item("Created one file.")]),
        ]);
        let mut session = Session::new("instructions");
        let mut operator = ScriptedOperator::with_confirmations(&["y"]);

        let outcome = run_turn(
            &mut session,
            "make files",
            &model,
            &runner(),
            &mut operator,
            &LoopConfig::default(),
        )
        .expect("turn");

        assert_eq!(outcome.actions_executed, 1);
        assert!(first.exists());
        assert!(!second.exists());

        let messages = session.transcript().messages();
        let action_record = &messages[2];
        assert_eq!(action_record.role, Role::Assistant);
        assert_eq!(action_record.content.len(), 2);
        let injected = &messages[3];
        assert_eq!(injected.role, Role::User);
        assert!(injected.text().starts_with(COMMAND_OUTPUT_PREFIX));
        assert_eq!(messages.len(), 5);
    }

    #[test]
    fn all_policy_runs_every_action_in_order() {
        let model = ScriptedModel::new(vec![
            Ok(vec![
                shell_call(json!(["echo", "one"])),
                shell_call(json!(["echo", "two"])),
            ]),
            Ok(vec![text_item("Both ran.")]),
        ]);
        let mut session = Session::new("instructions");
        let mut operator = ScriptedOperator::with_confirmations(&["", "Y"]);
        let config = LoopConfig {
            action_policy: ActionPolicy::All,
            ..LoopConfig::default()
        };

        let outcome = run_turn(
            &mut session,
            "echo twice",
            &model,
            &runner(),
            &mut operator,
            &config,
        )
        .expect("turn");

        assert_eq!(outcome.actions_executed, 2);
        let messages = session.transcript().messages();
        assert_eq!(messages[3].text(), "Command Output:\none\n");
        assert_eq!(messages[4].text(), "Command Output:\ntwo\n");
        assert_eq!(operator.confirm_requests(), vec!["echo one", "echo two"]);
    }

    #[test]
    fn refusal_is_fed_back_to_the_model() {
        let model = ScriptedModel::new(vec![
            Ok(vec![shell_call(json!("rm -rf /tmp/never"))]),
            Ok(vec![text_item("Understood, I will not delete it.")]),
        ]);
        let mut session = Session::new("instructions");
        let mut operator = ScriptedOperator::with_confirmations(&["n"]);

        run_turn(
            &mut session,
            "clean up",
            &model,
            &runner(),
            &mut operator,
            &LoopConfig::default(),
        )
        .expect("turn");

        assert_eq!(
            session.transcript().messages()[3].text(),
            "Command Output:\nexecution refused by operator"
        );
        let second_call = model.transcripts_seen().pop().expect("second call");
        assert_eq!(second_call.len(), 4);
    }

    #[test]
    fn chained_actions_fall_back_to_done_text() {
        let model = ScriptedModel::new(vec![
            Ok(vec![shell_call(json!(["true"]))]),
            Ok(Vec::new()),
        ]);
        let mut session = Session::new("instructions");
        let mut operator = ScriptedOperator::with_confirmations(&[""]);

        let outcome = run_turn(
            &mut session,
            "run true",
            &model,
            &runner(),
            &mut operator,
            &LoopConfig::default(),
        )
        .expect("turn");

        assert_eq!(outcome.model_calls, 2);
        assert_eq!(outcome.final_text, ACTIONS_DONE_TEXT);
        assert_eq!(
            session.transcript().last(),
            Some(&Message::assistant_text(ACTIONS_DONE_TEXT))
        );
    }

    #[test]
    fn model_error_fails_turn_but_keeps_transcript() {
        let model = ScriptedModel::new(vec![Err(ModelError::Api {
            status: 401,
            message: "bad key".to_string(),
        })]);
        let mut session = Session::new("instructions");
        let mut operator = ScriptedOperator::default();

        let err = run_turn(
            &mut session,
            "hello",
            &model,
            &runner(),
            &mut operator,
            &LoopConfig::default(),
        )
        .unwrap_err();

        assert!(err.downcast_ref::<ModelError>().is_some());
        assert_eq!(session.transcript().len(), 2);
        assert_eq!(
            session.transcript().last(),
            Some(&Message::user_text("hello"))
        );
    }

    #[test]
    fn transient_errors_are_retried_within_budget() {
        let transport = || ModelError::Transport {
            url: "http://localhost".to_string(),
            message: "connection reset".to_string(),
        };
        let model = ScriptedModel::new(vec![Err(transport()), Ok(vec![text_item("ok")])]);
        let mut session = Session::new("instructions");
        let config = LoopConfig {
            model_retries: 1,
            retry_backoff: Duration::from_millis(1),
            ..LoopConfig::default()
        };

        let outcome = run_turn(
            &mut session,
            "hello",
            &model,
            &runner(),
            &mut ScriptedOperator::default(),
            &config,
        )
        .expect("turn");

        assert_eq!(outcome.final_text, "ok");
        assert_eq!(model.calls(), 2);
    }

    #[test]
    fn session_reports_turn_errors_and_continues() {
        let temp = tempfile::tempdir().expect("tempdir");
        let model = ScriptedModel::new(vec![
            Err(ModelError::Decode("truncated".to_string())),
            Ok(vec![text_item("second try worked")]),
        ]);
        let mut session = Session::new("instructions");
        let mut operator = ScriptedOperator::with_inputs(&["first", "", "second", "exit"]);

        let end = run_session(
            &mut session,
            &model,
            &runner(),
            &mut operator,
            &LoopConfig::default(),
            &temp.path().join("logs"),
        )
        .expect("session");

        assert_eq!(end.turns, 1);
        assert_eq!(operator.errors().len(), 1);
        assert!(operator.errors()[0].contains("truncated"));
        assert_eq!(operator.answers(), vec!["second try worked"]);
        assert!(end.logs.is_some());
    }

    #[test]
    fn log_failure_does_not_fail_session() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("logs");
        std::fs::write(&blocker, "file in the way").expect("write blocker");
        let mut session = Session::new("instructions");
        let mut operator = ScriptedOperator::with_inputs(&["q"]);

        let end = run_session(
            &mut session,
            &ScriptedModel::new(Vec::new()),
            &runner(),
            &mut operator,
            &LoopConfig::default(),
            &blocker,
        )
        .expect("session");

        assert_eq!(end.logs, None);
        assert_eq!(operator.log_failures().len(), 1);
    }

    struct BrokenInput;

    impl std::io::Read for BrokenInput {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("terminal went away"))
        }
    }

    #[test]
    fn unreadable_input_still_writes_logs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut operator =
            crate::io::terminal::TerminalOperator::new(std::io::BufReader::new(BrokenInput));
        let mut session = Session::new("instructions");

        let end = run_session(
            &mut session,
            &ScriptedModel::new(Vec::new()),
            &runner(),
            &mut operator,
            &LoopConfig::default(),
            &temp.path().join("logs"),
        )
        .expect("session");

        assert_eq!(end.turns, 0);
        assert!(end.logs.expect("logs written").json.is_file());
    }
}
