//! Mock Hardware Implementations
//!
//! Simulated devices for running the pipeline without a keyboard or card.
//! All mock devices use async-safe operations (tokio::time::sleep, not
//! std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockKeyboard` - replays a fixed script of keystrokes
//! - `MockCard` - in-memory append-at-offset storage with injectable failures

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

use crate::data::storage::LogStorage;
use crate::error::{AppResult, PipelineError};
use crate::hardware::capabilities::KeySource;

// =============================================================================
// MockKeyboard - Scripted Keystrokes
// =============================================================================

/// Mock keyboard that types a fixed script once
///
/// # Example
///
/// ```rust,ignore
/// let mut kbd = MockKeyboard::new("Hello");
/// kbd.claim().await?;
/// assert_eq!(kbd.pending().await?, 5);
/// ```
#[derive(Debug, Clone)]
pub struct MockKeyboard {
    script: VecDeque<u8>,
    claimed: bool,
    claim_error: Option<String>,
}

impl MockKeyboard {
    /// Keyboard that will type `script`
    pub fn new(script: impl AsRef<[u8]>) -> Self {
        Self {
            script: script.as_ref().iter().copied().collect(),
            claimed: false,
            claim_error: None,
        }
    }

    /// Make `claim` fail with `reason`, as when no keyboard is attached
    pub fn with_claim_failure(mut self, reason: impl Into<String>) -> Self {
        self.claim_error = Some(reason.into());
        self
    }

    fn ensure_claimed(&self) -> Result<()> {
        if self.claimed {
            Ok(())
        } else {
            Err(anyhow!("MockKeyboard used before claim"))
        }
    }
}

#[async_trait]
impl KeySource for MockKeyboard {
    async fn claim(&mut self) -> Result<()> {
        if let Some(reason) = &self.claim_error {
            return Err(anyhow!("{reason}"));
        }
        self.claimed = true;
        tracing::debug!(chars = self.script.len(), "MockKeyboard claimed");
        Ok(())
    }

    async fn pending(&mut self) -> Result<usize> {
        self.ensure_claimed()?;
        Ok(self.script.len())
    }

    async fn next_char(&mut self) -> Result<Option<u8>> {
        self.ensure_claimed()?;
        Ok(self.script.pop_front())
    }
}

// =============================================================================
// MockCard - Simulated Storage Card
// =============================================================================

#[derive(Debug, Default)]
struct CardState {
    data: Vec<u8>,
    commits: Vec<(u64, usize)>,
    erase_count: usize,
    failures_remaining: usize,
    partial_on_failure: bool,
}

/// Mock storage card holding the log in memory
///
/// Clones share the same card, so a test can keep one handle for inspection
/// while the sink owns the other.
///
/// Failure injection:
/// - `fail_next_commits(n)` makes the next `n` commits report failure
/// - `set_partial_on_failure(true)` lets the first half of a failing commit
///   land before the failure is reported
#[derive(Debug, Clone, Default)]
pub struct MockCard {
    state: Arc<Mutex<CardState>>,
    latency: Duration,
}

impl MockCard {
    /// Empty, healthy card with no latency
    pub fn new() -> Self {
        Self::default()
    }

    /// Card that sleeps `latency` on every commit
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Fail the next `n` commits
    pub async fn fail_next_commits(&self, n: usize) {
        self.state.lock().await.failures_remaining = n;
    }

    /// Whether failing commits write a prefix first
    pub async fn set_partial_on_failure(&self, partial: bool) {
        self.state.lock().await.partial_on_failure = partial;
    }

    /// Current log contents
    pub async fn contents(&self) -> Vec<u8> {
        self.state.lock().await.data.clone()
    }

    /// Successful commits as `(offset, length)`
    pub async fn commits(&self) -> Vec<(u64, usize)> {
        self.state.lock().await.commits.clone()
    }

    /// How many times the log was erased
    pub async fn erase_count(&self) -> usize {
        self.state.lock().await.erase_count
    }
}

fn write_at(data: &mut Vec<u8>, bytes: &[u8], offset: usize) {
    let end = offset + bytes.len();
    if data.len() < end {
        data.resize(end, 0);
    }
    data[offset..end].copy_from_slice(bytes);
}

#[async_trait]
impl LogStorage for MockCard {
    async fn erase(&mut self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.data.clear();
        state.commits.clear();
        state.erase_count += 1;
        Ok(())
    }

    async fn commit(&mut self, bytes: &[u8], offset: u64) -> AppResult<()> {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        let mut state = self.state.lock().await;
        let offset = offset as usize;

        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            if state.partial_on_failure {
                let prefix = &bytes[..bytes.len() / 2];
                write_at(&mut state.data, prefix, offset);
            }
            return Err(PipelineError::Storage(format!(
                "MockCard: simulated write failure at offset {offset}"
            )));
        }

        write_at(&mut state.data, bytes, offset);
        state.commits.push((offset as u64, bytes.len()));
        Ok(())
    }

    async fn read(&mut self, len: usize, offset: u64) -> AppResult<Vec<u8>> {
        let state = self.state.lock().await;
        let start = (offset as usize).min(state.data.len());
        let end = start.saturating_add(len).min(state.data.len());
        Ok(state.data[start..end].to_vec())
    }
}
