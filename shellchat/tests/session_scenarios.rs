//! End-to-end session scenarios with a scripted model and operator and a
//! real command executor.

use std::fs;

use serde_json::json;

use shellchat::conversation::{ActionRunner, LoopConfig, Session, run_session};
use shellchat::core::transcript::{ContentPart, Message, Role, Transcript};
use shellchat::io::executor::CommandExecutor;
use shellchat::io::terminal::TerminalOperator;
use shellchat::io::tools::Toolbox;
use shellchat::test_support::{RecordedNotice, ScriptedModel, ScriptedOperator, text_item};

fn runner() -> ActionRunner {
    ActionRunner::new(CommandExecutor::new(true), Toolbox::default())
}

#[test]
fn listing_files_runs_confirmed_command_and_logs_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    let work = temp.path().join("work");
    fs::create_dir(&work).expect("work dir");
    fs::write(work.join("notes.txt"), "hi").expect("seed file");
    let log_dir = temp.path().join("logs");

    let model = ScriptedModel::new(vec![
        Ok(vec![json!({
            "type": "local_shell_call",
            "call_id": "call_ls",
            "action": {
                "type": "exec",
                "command": ["ls", "-la"],
                "working_directory": work.display().to_string()
            }
        })]),
        Ok(vec![text_item("There is one file, notes.txt.")]),
    ]);
    let mut operator =
        ScriptedOperator::with_inputs(&["show me the files", "quit"]).and_confirmations(&["y"]);
    let mut session = Session::new("instructions");

    let end = run_session(
        &mut session,
        &model,
        &runner(),
        &mut operator,
        &LoopConfig::default(),
        &log_dir,
    )
    .expect("session");

    assert_eq!(end.turns, 1);
    assert_eq!(model.calls(), 2);
    assert_eq!(operator.confirm_requests(), vec!["ls -la"]);

    let messages = session.transcript().messages();
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[1], Message::user_text("show me the files"));
    assert_eq!(
        messages[2],
        Message::new(Role::Assistant, vec![ContentPart::action_summary("ls -la")])
    );
    assert_eq!(messages[3].role, Role::User);
    assert!(messages[3].text().starts_with("Command Output:\n"));
    assert!(messages[3].text().contains("notes.txt"));
    assert_eq!(
        messages[4],
        Message::assistant_text("There is one file, notes.txt.")
    );

    // The second model call saw the command output.
    assert_eq!(model.transcripts_seen()[1].len(), 4);

    let logs = end.logs.expect("logs written");
    let markdown = fs::read_to_string(&logs.markdown).expect("read markdown");
    assert!(markdown.contains("[System Action: Executed ls -la]"));
    assert!(markdown.contains("notes.txt"));
    let reloaded =
        Transcript::from_json(&fs::read_to_string(&logs.json).expect("read json")).expect("parse");
    assert_eq!(&reloaded, session.transcript());
}

#[test]
fn refused_command_never_runs() {
    let temp = tempfile::tempdir().expect("tempdir");
    let marker = temp.path().join("marker");

    let model = ScriptedModel::new(vec![
        Ok(vec![json!({
            "type": "local_shell_call",
            "call_id": "call_touch",
            "action": {"type": "exec", "command": ["touch", marker.display().to_string()]}
        })]),
        Ok(vec![text_item("Okay, I left it alone.")]),
    ]);
    let mut operator =
        ScriptedOperator::with_inputs(&["create the marker", "exit"]).and_confirmations(&["n"]);
    let mut session = Session::new("instructions");

    run_session(
        &mut session,
        &model,
        &runner(),
        &mut operator,
        &LoopConfig::default(),
        &temp.path().join("logs"),
    )
    .expect("session");

    assert!(!marker.exists());
    assert_eq!(
        session.transcript().messages()[3],
        Message::user_text("Command Output:\nexecution refused by operator")
    );
    assert!(operator.notices().iter().any(|n| matches!(
        n,
        RecordedNotice::ActionFinished(result) if result.refused
    )));
}

#[test]
fn quitting_immediately_logs_only_the_instructions() {
    let temp = tempfile::tempdir().expect("tempdir");
    let log_dir = temp.path().join("logs");
    let model = ScriptedModel::new(Vec::new());
    let mut operator = ScriptedOperator::with_inputs(&["QUIT"]);
    let mut session = Session::new("seeded instructions");

    let end = run_session(
        &mut session,
        &model,
        &runner(),
        &mut operator,
        &LoopConfig::default(),
        &log_dir,
    )
    .expect("session");

    assert_eq!(model.calls(), 0);
    assert_eq!(end.turns, 0);
    let logs = end.logs.expect("logs written");
    let reloaded =
        Transcript::from_json(&fs::read_to_string(&logs.json).expect("read json")).expect("parse");
    assert_eq!(reloaded, Transcript::seeded("seeded instructions"));
    assert!(logs.markdown.is_file());
}

#[test]
fn end_of_input_closes_session_like_quit() {
    let temp = tempfile::tempdir().expect("tempdir");
    let model = ScriptedModel::new(vec![Ok(vec![text_item("Hello!")])]);
    let mut operator = ScriptedOperator::with_inputs(&["hi"]);
    let mut session = Session::new("instructions");

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
    assert!(end.logs.is_some());
    assert_eq!(operator.answers(), vec!["Hello!"]);
}

#[test]
fn undecodable_input_line_still_ends_with_logs() {
    let temp = tempfile::tempdir().expect("tempdir");
    let model = ScriptedModel::new(vec![Ok(vec![text_item("That looked garbled.")])]);
    let mut operator = TerminalOperator::new(&b"\xff\xfe bad\nquit\n"[..]);
    let mut session = Session::new("instructions");

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
    assert_eq!(
        session.transcript().messages()[1],
        Message::user_text("\u{FFFD}\u{FFFD} bad")
    );
    let logs = end.logs.expect("logs written");
    assert!(logs.markdown.is_file());
    assert!(logs.json.is_file());
}
