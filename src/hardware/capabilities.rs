//! Input device capability
//!
//! The capture stage needs exactly one thing from its device: a way to ask how
//! many characters are waiting and to take the next one, without blocking.
//! Devices implement [`KeySource`]; the stage never sees anything else.
//!
//! # Design
//!
//! - Async (uses `#[async_trait]`) so simulated devices can sleep
//! - Exclusively owned by one stage, hence `&mut self`
//! - Uses `anyhow::Result`; the stage decides which failures are fatal

use anyhow::Result;
use async_trait::async_trait;

/// Capability: Keystroke Input
///
/// # Contract
/// - `claim` must succeed before any other call. A failed claim is permanent
///   for this process.
/// - `pending` never blocks and reports how many characters `next_char` can
///   return right now.
/// - `next_char` returns `None` when nothing is waiting.
#[async_trait]
pub trait KeySource: Send {
    /// Take ownership of the device and bring it up.
    async fn claim(&mut self) -> Result<()>;

    /// Number of characters available without blocking.
    async fn pending(&mut self) -> Result<usize>;

    /// Next character, if any.
    async fn next_char(&mut self) -> Result<Option<u8>>;
}

#[async_trait]
impl<T: KeySource + ?Sized> KeySource for Box<T> {
    async fn claim(&mut self) -> Result<()> {
        (**self).claim().await
    }

    async fn pending(&mut self) -> Result<usize> {
        (**self).pending().await
    }

    async fn next_char(&mut self) -> Result<Option<u8>> {
        (**self).next_char().await
    }
}
