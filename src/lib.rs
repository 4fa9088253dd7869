//! keyword-forge: resumable multi-phase keyword research.
//!
//! This library runs a fixed seven-phase research pipeline over a domain and
//! its seed keywords, checkpointing every phase result so reruns only redo
//! missing work, and streaming progress events to the caller.

// Core modules
pub mod cli;
pub mod context;
pub mod error;
pub mod executor;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use error::{ErrorKind, ExecutorError, LlmError, PipelineError, StoreError};
pub use pipeline::{PipelineConfig, PipelineCoordinator, RunOutcome, RunRequest};
pub use progress::{DisconnectPolicy, ProgressEmitter, ProgressEvent};
