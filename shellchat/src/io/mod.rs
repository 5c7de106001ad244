//! Side-effecting pieces: config, model HTTP clients, command execution,
//! inspection tools, terminal interaction and session log export.

pub mod config;
pub mod executor;
pub mod model;
pub mod ollama;
pub mod openai;
pub mod process;
pub mod session_log;
pub mod terminal;
pub mod tools;
