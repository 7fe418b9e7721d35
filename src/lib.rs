//! chatrelay relays chat turns to an LLM backend and streams the reply back
//! as a progressively edited, markdown-safe message.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns conversation memory, prompt templates, the backend stream
//!   adapters, markdown-safe rendering, the edit scheduler, and the per-turn
//!   pipeline tying them together.
//! - [`api`] defines the wire payloads of the supported backend protocols.
//! - [`cli`] is the terminal front end: argument parsing, the interactive chat
//!   loop, and a terminal implementation of [`core::transport::ChatTransport`].
//! - [`utils`] holds URL, authentication, and transcript helpers.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
