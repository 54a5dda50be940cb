//! Payload-less wake-ups between domains.
//!
//! A [`NotificationSet`] belongs to the receiving domain and holds one
//! pending bit per channel id. [`Notifier`]s set their bit and wake the
//! receiver; nothing else is transferred. Repeated notifications before the
//! receiver looks coalesce into one.

use super::{ChannelId, MAX_CHANNELS};
use crate::error::{AppResult, PipelineError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Shared {
    pending: AtomicU64,
    wake: Notify,
}

/// Receiving side: the pending notifications of one domain.
#[derive(Debug, Default)]
pub struct NotificationSet {
    shared: Arc<Shared>,
}

impl NotificationSet {
    /// Empty set with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the sending end for `channel`.
    pub fn notifier(&self, channel: ChannelId) -> AppResult<Notifier> {
        if usize::from(channel) >= MAX_CHANNELS {
            return Err(PipelineError::Configuration(format!(
                "notification channel {channel} is out of range (0..{MAX_CHANNELS})"
            )));
        }
        Ok(Notifier {
            channel,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Take and clear everything pending.
    pub fn take_pending(&self) -> PendingNotifications {
        PendingNotifications(self.shared.pending.swap(0, Ordering::AcqRel))
    }

    /// Wait until at least one notification has been raised since the last
    /// wait returned. Does not clear the pending set.
    pub async fn wait(&self) {
        self.shared.wake.notified().await;
    }
}

/// Sending side of one notification channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    channel: ChannelId,
    shared: Arc<Shared>,
}

impl Notifier {
    /// Channel this notifier signals on.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Raise the notification. Never blocks, never fails.
    pub fn notify(&self) {
        self.shared
            .pending
            .fetch_or(1u64 << self.channel, Ordering::AcqRel);
        self.shared.wake.notify_one();
    }
}

/// Channel ids that were pending, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingNotifications(u64);

impl PendingNotifications {
    /// True when nothing was pending.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl Iterator for PendingNotifications {
    type Item = ChannelId;

    fn next(&mut self) -> Option<ChannelId> {
        if self.0 == 0 {
            return None;
        }
        let channel = self.0.trailing_zeros();
        self.0 &= self.0 - 1;
        Some(channel as ChannelId)
    }
}
