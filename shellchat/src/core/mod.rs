//! Deterministic, pure logic for the chat loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod action;
pub mod normalizer;
pub mod transcript;
