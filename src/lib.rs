pub mod batch;
pub mod catalog;
pub mod client;
pub mod config;
pub mod dedup;
mod error;
pub mod fallback;
pub mod models;
pub mod paths;
pub mod pipeline;
pub mod retry;
pub mod run_log;

pub use error::{EngineError, Result};
