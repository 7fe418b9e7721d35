pub mod backend;
pub mod config;
pub mod error;
pub mod memory;
pub mod message;
pub mod pipeline;
#[cfg(test)]
mod pipeline_tests;
pub mod render;
pub mod scheduler;
pub mod templates;
pub mod transport;
