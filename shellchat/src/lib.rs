//! Interactive terminal chat with an LLM that can run shell commands.
//!
//! The operator types natural-language requests; the model answers with text
//! or asks to run commands. Every command is shown and must be confirmed
//! before it runs, and its output is fed back to the model until it produces
//! a final answer. The session is saved as Markdown and JSON on exit.
//!
//! - **[`core`]**: Pure logic (transcript, action model, response normalizer).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (HTTP, processes, terminal, files).
//!   Hidden behind traits so the loop can be driven by scripted fakes.
//!
//! [`conversation`] ties the two together.

pub mod conversation;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
