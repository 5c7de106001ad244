//! Session transcript export to `logs/session_<timestamp>.{md,json}`.
//!
//! These files are product artifacts written once on normal exit. Writing is
//! best-effort: callers log a failure and carry on with shutdown.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::core::transcript::{COMMAND_OUTPUT_PREFIX, Role, SYSTEM_ACTION_MARKER, Transcript};

const SESSION_TEMPLATE: &str = include_str!("templates/session.md");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLogPaths {
    pub markdown: PathBuf,
    pub json: PathBuf,
}

impl SessionLogPaths {
    pub fn new(dir: &Path, stem: &str) -> Self {
        Self {
            markdown: dir.join(format!("{stem}.md")),
            json: dir.join(format!("{stem}.json")),
        }
    }

    /// First `session_<stamp>[_N]` pair where neither file exists yet.
    fn available(dir: &Path, stamp: &str) -> Self {
        let base = format!("session_{stamp}");
        let mut paths = Self::new(dir, &base);
        let mut n = 1;
        while paths.markdown.exists() || paths.json.exists() {
            paths = Self::new(dir, &format!("{base}_{n}"));
            n += 1;
        }
        paths
    }
}

/// `YYYYMMDD_HHMMSS` stamp used in log file names.
pub fn file_stamp(started_at: &DateTime<Local>) -> String {
    started_at.format("%Y%m%d_%H%M%S").to_string()
}

/// Write both exports for `transcript`, creating `dir` if needed.
#[instrument(skip_all, fields(dir = %dir.display(), messages = transcript.len()))]
pub fn write_session_logs(
    dir: &Path,
    transcript: &Transcript,
    started_at: &DateTime<Local>,
) -> Result<SessionLogPaths> {
    fs::create_dir_all(dir).with_context(|| format!("create log dir {}", dir.display()))?;
    let paths = SessionLogPaths::available(dir, &file_stamp(started_at));

    let markdown = render_markdown(
        transcript,
        &started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    )?;
    fs::write(&paths.markdown, markdown)
        .with_context(|| format!("write {}", paths.markdown.display()))?;
    fs::write(&paths.json, transcript.to_json()?)
        .with_context(|| format!("write {}", paths.json.display()))?;

    debug!(markdown = %paths.markdown.display(), json = %paths.json.display(), "session logs written");
    Ok(paths)
}

#[derive(Debug, Serialize)]
struct MessageView {
    heading: &'static str,
    blocks: Vec<BlockView>,
}

#[derive(Debug, Serialize)]
struct BlockView {
    text: String,
    /// Present when the block is rendered as a code block.
    fence: Option<String>,
}

/// Render the transcript as Markdown: one `##` section per message, with
/// command output and action records in fenced blocks.
pub fn render_markdown(transcript: &Transcript, started_at: &str) -> Result<String> {
    let messages: Vec<MessageView> = transcript
        .messages()
        .iter()
        .map(|message| MessageView {
            heading: match message.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            },
            blocks: message
                .content
                .iter()
                .map(|part| {
                    let text = part.render();
                    let fence = needs_fence(&text).then(|| fence_for(&text));
                    BlockView {
                        text: text.trim_end_matches('\n').to_string(),
                        fence,
                    }
                })
                .collect(),
        })
        .collect();

    let mut env = Environment::new();
    env.add_template("session", SESSION_TEMPLATE)
        .context("load session template")?;
    let rendered = env
        .get_template("session")?
        .render(context! { started_at => started_at, messages => messages })
        .context("render session markdown")?;
    Ok(rendered)
}

fn needs_fence(text: &str) -> bool {
    text.contains(COMMAND_OUTPUT_PREFIX.trim_end()) || text.contains(SYSTEM_ACTION_MARKER)
}

/// A backtick fence longer than any backtick run inside `text`.
fn fence_for(text: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for ch in text.chars() {
        if ch == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat((longest + 1).max(3))
}
