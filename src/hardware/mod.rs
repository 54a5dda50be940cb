//! Input devices and simulated hardware.
//!
//! Device bring-up is outside the pipeline: a stage is handed something that
//! implements [`capabilities::KeySource`] and claims it at startup.

pub mod capabilities;
pub mod mock;
pub mod stdin;

pub use capabilities::KeySource;
pub use mock::{MockCard, MockKeyboard};
pub use stdin::StdinKeyboard;
