//! # keypipe
//!
//! A three-stage keystroke pipeline: characters are captured from an input
//! device, substituted with ROT13 and appended to a durable log in batches.
//!
//! ## Crate Structure
//!
//! - **`config`**: `PipelineConfig`, loaded from TOML and `KEYPIPE_*`
//!   environment variables with `figment`.
//! - **`data`**: the memory-mapped `RingChannel` between the transform and
//!   sink stages, and the `LogStorage` collaborator the sink commits to.
//! - **`error`**: the crate-wide `PipelineError`.
//! - **`hardware`**: the `KeySource` capability with stdin and mock devices,
//!   plus a mock storage card.
//! - **`ipc`**: blocking calls and coalescing notifications between stages.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`pipeline`**: the capture, transform and sink stages and the code
//!   that wires them together.

pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod ipc;
pub mod logging;
pub mod pipeline;
