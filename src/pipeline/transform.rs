//! Transform stage: substitute each byte and hand it to the sink.
//!
//! The stage has no loop of its own. It is a [`ProtectedHandler`] run by the
//! call endpoint: one call, one byte, one ring push, one notification, then
//! the empty reply that releases the caller.

use crate::data::ring_buffer::{PushOutcome, RingProducer};
use crate::ipc::{ChannelId, MessageInfo, Notifier, ProtectedHandler};

const ALPHABET_LEN: u8 = 26;
const ROTATION: u8 = 13;

/// Rotate ASCII letters by 13 within their own case; every other byte is
/// returned unchanged.
///
/// Applying it twice yields the original byte.
pub const fn rot13(byte: u8) -> u8 {
    match byte {
        b'a'..=b'z' => b'a' + (byte - b'a' + ROTATION) % ALPHABET_LEN,
        b'A'..=b'Z' => b'A' + (byte - b'A' + ROTATION) % ALPHABET_LEN,
        _ => byte,
    }
}

/// Apply [`rot13`] to every byte of `bytes`.
pub fn rot13_all(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().copied().map(rot13).collect()
}

/// Counters kept by the transform stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformStats {
    /// Bytes pushed into the ring
    pub accepted: u64,
    /// Bytes lost because the ring was full
    pub dropped: u64,
    /// Calls on unexpected channels or with malformed payloads
    pub rejected_calls: u64,
}

/// State owned by the transform domain.
#[derive(Debug)]
pub struct TransformStage {
    call_channel: ChannelId,
    producer: RingProducer,
    notifier: Notifier,
    stats: TransformStats,
}

impl TransformStage {
    /// Stage accepting calls on `call_channel` and feeding `producer`.
    pub fn new(call_channel: ChannelId, producer: RingProducer, notifier: Notifier) -> Self {
        tracing::info!(
            call_channel,
            notify_channel = notifier.channel(),
            ring_capacity = producer.capacity(),
            "Transform stage ready"
        );
        Self {
            call_channel,
            producer,
            notifier,
            stats: TransformStats::default(),
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> TransformStats {
        self.stats
    }

    /// Substitute one captured byte, push it and wake the sink.
    ///
    /// The sink is notified whether or not the push was accepted.
    pub fn handle_character(&mut self, byte: u8) -> PushOutcome {
        let encoded = rot13(byte);
        let outcome = self.producer.push(encoded);
        match outcome {
            PushOutcome::Accepted => self.stats.accepted += 1,
            PushOutcome::Dropped => {
                self.stats.dropped += 1;
                tracing::debug!(
                    dropped_total = self.stats.dropped,
                    "Ring full; dropped transformed byte"
                );
            }
        }
        self.notifier.notify();
        outcome
    }

    /// Notifications are not part of this domain's protocol.
    pub fn notified(&mut self, channel: ChannelId) {
        tracing::warn!(channel, "Transform received unexpected notification");
    }
}

impl ProtectedHandler for TransformStage {
    fn protected(&mut self, channel: ChannelId, msg: MessageInfo) -> MessageInfo {
        if channel != self.call_channel {
            self.stats.rejected_calls += 1;
            tracing::warn!(channel, "Transform received call on unexpected channel");
            return MessageInfo::empty();
        }

        match msg.byte() {
            Some(byte) => {
                self.handle_character(byte);
            }
            None => {
                self.stats.rejected_calls += 1;
                tracing::warn!(
                    channel,
                    label = msg.label(),
                    "Transform received call without a one-byte payload"
                );
            }
        }
        MessageInfo::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ring_buffer::RingChannel;
    use crate::ipc::NotificationSet;
    use tracing_test::traced_test;

    fn stage(capacity: usize) -> (TransformStage, crate::data::ring_buffer::RingConsumer, NotificationSet) {
        let (producer, consumer) = RingChannel::anonymous(capacity).unwrap().split();
        let set = NotificationSet::new();
        let notifier = set.notifier(6).unwrap();
        (TransformStage::new(5, producer, notifier), consumer, set)
    }

    #[test]
    fn test_rot13_is_self_inverse() {
        for b in 0..=u8::MAX {
            assert_eq!(rot13(rot13(b)), b, "byte {b:#04x}");
        }
    }

    #[test]
    fn test_rot13_leaves_non_letters_alone() {
        for b in 0..=u8::MAX {
            if !b.is_ascii_alphabetic() {
                assert_eq!(rot13(b), b, "byte {b:#04x}");
            }
        }
    }

    #[test]
    fn test_rot13_rotates_letters() {
        assert_eq!(rot13_all(b"Hello"), b"Uryyb");
        assert_eq!(rot13_all(b"azAZmnMN"), b"nmNMzaZA");
        for b in (b'a'..=b'z').chain(b'A'..=b'Z') {
            assert_ne!(rot13(b), b);
            assert_eq!(rot13(b).is_ascii_uppercase(), b.is_ascii_uppercase());
        }
    }

    #[test]
    fn test_call_pushes_and_notifies() {
        let (mut stage, mut consumer, set) = stage(8);

        let reply = stage.protected(5, MessageInfo::with_byte(b'H'));
        assert_eq!(reply, MessageInfo::empty());
        assert_eq!(consumer.pop(), Some(b'U'));
        assert_eq!(set.take_pending().collect::<Vec<_>>(), vec![6]);
        assert_eq!(stage.stats().accepted, 1);
    }

    #[test]
    fn test_full_ring_drops_but_still_notifies() {
        let (mut stage, mut consumer, set) = stage(2);

        for &b in b"abc" {
            stage.protected(5, MessageInfo::with_byte(b));
        }
        assert_eq!(stage.stats().accepted, 2);
        assert_eq!(stage.stats().dropped, 1);
        assert!(!set.take_pending().is_empty());
        assert_eq!(consumer.drain().collect::<Vec<_>>(), b"no");
    }

    #[traced_test]
    #[test]
    fn test_unexpected_channel_is_logged_and_ignored() {
        let (mut stage, consumer, set) = stage(4);

        let reply = stage.protected(9, MessageInfo::with_byte(b'x'));
        assert_eq!(reply, MessageInfo::empty());
        assert!(consumer.is_empty());
        assert!(set.take_pending().is_empty());
        assert_eq!(stage.stats().rejected_calls, 1);
        assert!(logs_contain("unexpected channel"));
    }

    #[traced_test]
    #[test]
    fn test_malformed_payload_is_rejected() {
        let (mut stage, consumer, _set) = stage(4);

        let reply = stage.protected(5, MessageInfo::new(0x1234, 1));
        assert_eq!(reply, MessageInfo::empty());
        assert!(consumer.is_empty());
        assert_eq!(stage.stats().rejected_calls, 1);
        assert!(logs_contain("without a one-byte payload"));
    }

    #[traced_test]
    #[test]
    fn test_notification_is_logged_and_changes_nothing() {
        let (mut stage, consumer, set) = stage(4);

        stage.notified(6);
        assert!(consumer.is_empty());
        assert!(set.take_pending().is_empty());
        assert_eq!(stage.stats(), TransformStats::default());
        assert!(logs_contain("unexpected notification"));
    }
}
