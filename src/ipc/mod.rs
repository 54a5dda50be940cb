//! Cross-domain signalling.
//!
//! Two primitives connect the stages besides the shared ring:
//!
//! - [`call`]: a synchronous request/reply. The caller blocks until the
//!   handling domain has run its handler to completion and replied.
//! - [`notify`]: an asynchronous, payload-less wake-up identified only by
//!   its channel id. Notifications coalesce; a receiver sees at most one
//!   pending notification per channel.
//!
//! Channel ids are local to the domain that receives on them and must be
//! below [`MAX_CHANNELS`].

pub mod call;
pub mod notify;

pub use call::{CallClient, CallServer, ProtectedHandler};
pub use notify::{NotificationSet, Notifier, PendingNotifications};

/// Identifier of a call or notification channel.
pub type ChannelId = u8;

/// Number of distinct channel ids a domain can receive on.
pub const MAX_CHANNELS: usize = 64;

/// Metadata word carried by a call and its reply.
///
/// Calls in this system carry their whole payload in `label`; `length`
/// counts the message words that would follow in a buffer and is informative
/// only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageInfo {
    label: u64,
    length: u8,
}

impl MessageInfo {
    /// Build a message from its raw fields.
    pub const fn new(label: u64, length: u8) -> Self {
        Self { label, length }
    }

    /// The empty acknowledgement used as every reply.
    pub const fn empty() -> Self {
        Self::new(0, 0)
    }

    /// A message carrying one byte in its label.
    pub const fn with_byte(byte: u8) -> Self {
        Self::new(byte as u64, 1)
    }

    /// Raw label.
    pub const fn label(&self) -> u64 {
        self.label
    }

    /// Declared length.
    pub const fn length(&self) -> u8 {
        self.length
    }

    /// The byte carried in the label, if the label fits in one.
    pub fn byte(&self) -> Option<u8> {
        u8::try_from(self.label).ok()
    }
}
