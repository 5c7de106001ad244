//! `shellchat`: chat with an LLM that can run confirmed shell commands.
//!
//! Reads optional `shellchat.toml`, loads `.env`, resolves the provider
//! credentials, then runs the interactive session on stdin/stdout.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::style::Stylize;
use tracing::info;

use shellchat::conversation::{
    ActionRunner, DEFAULT_INSTRUCTIONS, LoopConfig, Session, run_session,
};
use shellchat::exit_codes;
use shellchat::io::config::{
    AppConfig, ConfigError, DEFAULT_CONFIG_PATH, Endpoint, Provider, env_lookup, load_config,
    resolve_endpoint,
};
use shellchat::io::executor::CommandExecutor;
use shellchat::io::model::ModelClient;
use shellchat::io::ollama::{self, OllamaClient};
use shellchat::io::openai::{self, OpenAiClient};
use shellchat::io::terminal::TerminalOperator;
use shellchat::io::tools::Toolbox;
use shellchat::logging;

#[derive(Debug, Parser)]
#[command(
    name = "shellchat",
    version,
    about = "Chat with an LLM that can run shell commands after you confirm them"
)]
struct Cli {
    /// Config file (TOML). Defaults apply when it does not exist.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Model provider; overrides the config file.
    #[arg(long, value_enum)]
    provider: Option<Provider>,

    /// Model name; overrides the config file.
    #[arg(long)]
    model: Option<String>,
}

fn main() {
    logging::init();
    // A missing .env file is normal.
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let (cfg, endpoint) = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{} {err}", "Configuration error:".red());
            process::exit(exit_codes::CONFIG_ERROR);
        }
    };

    if let Err(err) = run(&cfg, endpoint) {
        eprintln!("{:#}", err);
        process::exit(exit_codes::FAILURE);
    }
    process::exit(exit_codes::OK);
}

fn load_settings(cli: &Cli) -> Result<(AppConfig, Endpoint), ConfigError> {
    let mut cfg = load_config(&cli.config)?;
    if let Some(provider) = cli.provider {
        cfg.provider = provider;
    }
    if let Some(model) = &cli.model {
        cfg.model = Some(model.clone());
    }
    cfg.validate()?;
    let endpoint = resolve_endpoint(cfg.provider, env_lookup)?;
    Ok((cfg, endpoint))
}

fn run(cfg: &AppConfig, endpoint: Endpoint) -> Result<()> {
    let timeout = Duration::from_secs(cfg.model_timeout_secs);
    info!(provider = ?cfg.provider, model = cfg.model_name(), "starting session");

    match endpoint {
        Endpoint::OpenAi {
            base_url,
            api_key,
            vector_store_id,
        } => {
            let tools =
                openai::build_tools(true, cfg.inspection_tools, vector_store_id.as_deref());
            let client = OpenAiClient::new(&base_url, api_key, cfg.model_name(), tools, timeout);
            chat(cfg, &client)
        }
        Endpoint::Ollama { host } => {
            let tools = ollama::build_tools(true, cfg.inspection_tools);
            let client = OllamaClient::new(&host, cfg.model_name(), tools, timeout);
            chat(cfg, &client)
        }
    }
}

fn chat<M: ModelClient>(cfg: &AppConfig, model: &M) -> Result<()> {
    let mut session = Session::new(cfg.instructions.as_deref().unwrap_or(DEFAULT_INSTRUCTIONS));
    let runner = ActionRunner::new(
        CommandExecutor::new(cfg.confirm_actions),
        Toolbox::default(),
    );
    let mut operator = TerminalOperator::stdin();

    let end = run_session(
        &mut session,
        model,
        &runner,
        &mut operator,
        &LoopConfig::from(cfg),
        &cfg.log_dir,
    )?;
    info!(turns = end.turns, "session closed");
    Ok(())
}
