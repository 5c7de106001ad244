//! Built-in inspection tools the model may call without confirmation.
//!
//! Tool failures are reported as result text rather than errors so the model
//! can explain them to the operator.

use std::process::Command;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tracing::{debug, instrument};
use ureq::Agent;

use crate::core::action::{ExecutionResult, ToolCall};
use crate::core::normalizer::SHELL_FUNCTION;
use crate::io::process::run_captured;

pub const CHECK_WEBSITE: &str = "check_website_status";
pub const LIST_CONTAINERS: &str = "list_docker_containers";
pub const CONTAINER_LOGS: &str = "get_container_logs";

/// Hard ceiling for the reachability check; there is no retry.
pub const WEBSITE_TIMEOUT: Duration = Duration::from_secs(3);
const DOCKER_TIMEOUT: Duration = Duration::from_secs(15);
const LOG_TAIL_LINES: u32 = 20;
const PS_FORMAT: &str = "{{.ID}}\t{{.Names}}\t{{.Image}}\t{{.Status}}\t{{.Ports}}";

/// Declaration of a callable function for function-calling models.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

impl ToolSpec {
    /// Responses API shape.
    pub fn openai_json(&self) -> Value {
        json!({
            "type": "function",
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }

    /// Ollama chat API shape.
    pub fn ollama_json(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

pub fn shell_spec() -> ToolSpec {
    ToolSpec {
        name: SHELL_FUNCTION,
        description: "Run a command on the operator's machine after they confirm it. \
                      Arguments are split like a POSIX shell but pipes and globs are not interpreted.",
        parameters: json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Program and arguments, e.g. [\"ls\", \"-la\"]"
                },
                "working_directory": {"type": "string"},
                "timeout_ms": {"type": "integer"}
            },
            "required": ["command"]
        }),
    }
}

pub fn inspection_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: CHECK_WEBSITE,
            description: "Check whether a website is reachable (3 second timeout).",
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "URL or host, e.g. 'example.com'"}
                },
                "required": ["url"]
            }),
        },
        ToolSpec {
            name: LIST_CONTAINERS,
            description: "List the running Docker containers on this machine.",
            parameters: json!({"type": "object", "properties": {}}),
        },
        ToolSpec {
            name: CONTAINER_LOGS,
            description: "Fetch the last 20 log lines of a Docker container.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "container_name_or_id": {"type": "string"}
                },
                "required": ["container_name_or_id"]
            }),
        },
    ]
}

/// Executes [`ToolCall`]s.
#[derive(Debug, Clone)]
pub struct Toolbox {
    http: Agent,
}

impl Default for Toolbox {
    fn default() -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(WEBSITE_TIMEOUT))
            .http_status_as_error(false)
            .build();
        Self {
            http: Agent::new_with_config(config),
        }
    }
}

impl Toolbox {
    #[instrument(skip_all, fields(tool = %call.name))]
    pub fn run(&self, call: &ToolCall) -> ExecutionResult {
        match call.name.as_str() {
            CHECK_WEBSITE => match string_arg(&call.arguments, "url") {
                Some(url) => ExecutionResult::completed(self.check_website(url)),
                None => ExecutionResult::failure("", "missing required argument `url`"),
            },
            LIST_CONTAINERS => list_containers(),
            CONTAINER_LOGS => match string_arg(&call.arguments, "container_name_or_id") {
                Some(name) => container_logs(name),
                None => ExecutionResult::failure(
                    "",
                    "missing required argument `container_name_or_id`",
                ),
            },
            other => ExecutionResult::failure("", format!("unknown tool `{other}`")),
        }
    }

    fn check_website(&self, url: &str) -> String {
        let target = normalize_url(url);
        let start = Instant::now();
        match self.http.get(&target).call() {
            Ok(response) => {
                let status = response.status();
                let elapsed = start.elapsed().as_secs_f64();
                debug!(status = status.as_u16(), elapsed, "website responded");
                let status_line = match status.canonical_reason() {
                    Some(reason) => format!("{} {reason}", status.as_u16()),
                    None => status.as_u16().to_string(),
                };
                format!("Site: {target}\n   Status: {status_line}\n   Time: {elapsed:.2}s")
            }
            Err(ureq::Error::Timeout(_)) => format!(
                "Site: {target} - TIMEOUT (exceeded {}s)",
                WEBSITE_TIMEOUT.as_secs()
            ),
            Err(err) => format!("Site: {target} - ERROR: {err}"),
        }
    }
}

fn string_arg<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Bare hosts are checked over HTTPS.
pub fn normalize_url(url: &str) -> String {
    let target = url.trim();
    if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("https://{target}")
    }
}

fn list_containers() -> ExecutionResult {
    let mut cmd = Command::new("docker");
    cmd.args(["ps", "--format", PS_FORMAT]);
    match run_captured(cmd, Some(DOCKER_TIMEOUT)) {
        Ok(output) if output.status.success() && !output.timed_out => {
            ExecutionResult::completed(format_container_report(&String::from_utf8_lossy(
                &output.stdout,
            )))
        }
        Ok(output) => ExecutionResult::failure(
            "",
            format!(
                "error connecting to Docker: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ),
        Err(err) => ExecutionResult::failure("", format!("error connecting to Docker: {err:#}")),
    }
}

fn container_logs(name: &str) -> ExecutionResult {
    let mut cmd = Command::new("docker");
    cmd.args(container_logs_args(name));
    match run_captured(cmd, Some(DOCKER_TIMEOUT)) {
        Ok(output) if output.status.success() && !output.timed_out => {
            ExecutionResult::completed(format!("Logs for {name}:\n{}", output.combined()))
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such container") {
                ExecutionResult::failure("", format!("container '{name}' not found"))
            } else {
                ExecutionResult::failure("", format!("error reading logs: {}", stderr.trim()))
            }
        }
        Err(err) => ExecutionResult::failure("", format!("error reading logs: {err:#}")),
    }
}

/// `docker logs` arguments; `--` keeps a name starting with `-` from being
/// read as a flag.
fn container_logs_args(name: &str) -> Vec<String> {
    vec![
        "logs".to_string(),
        "--tail".to_string(),
        LOG_TAIL_LINES.to_string(),
        "--".to_string(),
        name.to_string(),
    ]
}

/// Render `docker ps` rows (tab-separated, see `PS_FORMAT`) as a report.
pub fn format_container_report(ps_output: &str) -> String {
    let rows: Vec<Vec<&str>> = ps_output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.split('\t').collect())
        .collect();
    if rows.is_empty() {
        return "No containers are currently running.".to_string();
    }

    let mut report = String::from("Running Containers:\n");
    for row in rows {
        let field = |i: usize| row.get(i).copied().filter(|s| !s.is_empty());
        report.push_str(&format!(
            "- [{}] {} (Image: {})\n  Status: {} | Ports: {}\n",
            field(0).unwrap_or("?"),
            field(1).unwrap_or("?"),
            field(2).unwrap_or("none"),
            field(3).unwrap_or("unknown"),
            field(4).unwrap_or("none"),
        ));
    }
    report
}
