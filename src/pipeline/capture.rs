//! Capture stage: poll the input device and call the transform stage.
//!
//! Each captured character is forwarded with a blocking call, so the stage
//! processes one character fully before it looks at the device again and
//! its throughput is bounded by the transform stage's per-byte latency.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::config::CaptureConfig;
use crate::error::{AppResult, PipelineError};
use crate::hardware::KeySource;
use crate::ipc::{CallClient, MessageInfo};

/// Counters kept by the capture stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Characters forwarded to the transform stage
    pub forwarded: u64,
    /// Polling passes over the device
    pub polls: u64,
}

/// State owned by the capture domain.
#[derive(Debug)]
pub struct CaptureStage<K> {
    device: K,
    transform: CallClient,
    poll_interval: Duration,
    char_delay: Duration,
    stats: CaptureStats,
}

impl<K: KeySource> CaptureStage<K> {
    /// Claim `device` and prepare to forward its characters over `transform`.
    ///
    /// A device that cannot be claimed is fatal: no stage is returned.
    pub async fn start(
        mut device: K,
        transform: CallClient,
        config: &CaptureConfig,
    ) -> AppResult<Self> {
        if let Err(e) = device.claim().await {
            tracing::error!(error = %e, "Failed to claim input device");
            return Err(PipelineError::Device(e.to_string()));
        }
        tracing::info!(
            call_channel = transform.channel(),
            poll_interval = ?config.poll_interval,
            "Capture stage reading input"
        );
        Ok(Self {
            device,
            transform,
            poll_interval: config.poll_interval,
            char_delay: config.char_delay,
            stats: CaptureStats::default(),
        })
    }

    /// Counters so far.
    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// Forward the characters the device reports as waiting.
    ///
    /// The count is sampled once, so a device that never runs dry still ends
    /// the pass; later arrivals wait for the next poll. Returns how many were
    /// forwarded. Device errors end the pass early and are retried on the
    /// next poll; a closed call channel is returned.
    pub async fn poll_once(&mut self) -> AppResult<usize> {
        self.forward_pending(None).await
    }

    /// One polling pass. When `stop` is given it is checked before each
    /// character is taken, never between taking and forwarding it.
    async fn forward_pending(&mut self, stop: Option<&watch::Receiver<bool>>) -> AppResult<usize> {
        self.stats.polls += 1;
        let mut forwarded = 0;

        let available = match self.device.pending().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Input device poll failed");
                return Ok(0);
            }
        };

        for _ in 0..available {
            if stop.is_some_and(|rx| *rx.borrow()) {
                break;
            }
            let byte = match self.device.next_char().await {
                Ok(Some(byte)) => byte,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Input device read failed");
                    break;
                }
            };

            tracing::trace!(char = %char::from(byte).escape_default(), "Received character");
            self.transform.call(MessageInfo::with_byte(byte)).await?;
            self.stats.forwarded += 1;
            forwarded += 1;

            if !self.char_delay.is_zero() {
                sleep(self.char_delay).await;
            }
        }

        Ok(forwarded)
    }

    /// Poll until `shutdown` flips to `true`, then return the counters.
    ///
    /// Shutdown is observed between passes and between characters; a
    /// character already taken from the device is always forwarded first.
    #[tracing::instrument(name = "capture", skip_all)]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> AppResult<CaptureStats> {
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.forward_pending(Some(&shutdown)).await?;

            tokio::select! {
                _ = sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!(forwarded = self.stats.forwarded, "Capture stage stopped");
        Ok(self.stats)
    }
}
