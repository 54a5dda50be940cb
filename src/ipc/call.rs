//! Blocking request/reply between two domains.
//!
//! # Message Flow
//!
//! ```text
//! Caller domain                      Handling domain
//! -------------                      ---------------
//! 1. Create oneshot for the reply
//! 2. Send request via mpsc    ------>
//!                                    3. Receive request
//!                                    4. Run handler to completion
//!                                    5. Send reply
//! 6. Await oneshot receiver   <------
//! ```
//!
//! The request queue has depth one, so a caller never has more than one
//! request in flight and there is no buffering between the two domains.
//! Handlers cannot fail: whatever happens inside, the caller gets a reply.

use super::{ChannelId, MessageInfo};
use crate::error::{AppResult, PipelineError};
use tokio::sync::{mpsc, oneshot};

/// Handler run by the domain that owns a [`CallServer`].
pub trait ProtectedHandler: Send {
    /// Handle one call on `channel` and produce the reply.
    fn protected(&mut self, channel: ChannelId, msg: MessageInfo) -> MessageInfo;
}

#[derive(Debug)]
struct CallRequest {
    channel: ChannelId,
    msg: MessageInfo,
    reply: oneshot::Sender<MessageInfo>,
}

/// Receiving endpoint of a domain's call channels.
#[derive(Debug)]
pub struct CallServer {
    tx: mpsc::Sender<CallRequest>,
    rx: mpsc::Receiver<CallRequest>,
}

impl Default for CallServer {
    fn default() -> Self {
        Self::new()
    }
}

impl CallServer {
    /// Create an endpoint with no connected callers.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self { tx, rx }
    }

    /// Hand out a caller bound to `channel`.
    pub fn connect(&self, channel: ChannelId) -> CallClient {
        CallClient {
            channel,
            tx: self.tx.clone(),
        }
    }

    /// Serve calls until every [`CallClient`] has been dropped, then return
    /// the handler.
    pub async fn serve<H: ProtectedHandler>(self, mut handler: H) -> H {
        let Self { tx, mut rx } = self;
        drop(tx);
        while let Some(request) = rx.recv().await {
            let reply = handler.protected(request.channel, request.msg);
            if request.reply.send(reply).is_err() {
                tracing::debug!(channel = request.channel, "Caller went away before the reply");
            }
        }
        handler
    }
}

/// Calling end of one channel.
#[derive(Debug)]
pub struct CallClient {
    channel: ChannelId,
    tx: mpsc::Sender<CallRequest>,
}

impl CallClient {
    /// Channel this client calls on.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Send `msg` and wait for the handler's reply.
    pub async fn call(&self, msg: MessageInfo) -> AppResult<MessageInfo> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CallRequest {
                channel: self.channel,
                msg,
                reply: reply_tx,
            })
            .await
            .map_err(|_| PipelineError::ChannelClosed(self.channel))?;
        reply_rx
            .await
            .map_err(|_| PipelineError::ChannelClosed(self.channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<(ChannelId, MessageInfo)>,
    }

    impl ProtectedHandler for Recorder {
        fn protected(&mut self, channel: ChannelId, msg: MessageInfo) -> MessageInfo {
            self.seen.push((channel, msg));
            MessageInfo::new(msg.label() + 1, 0)
        }
    }

    #[tokio::test]
    async fn test_call_waits_for_reply() {
        let server = CallServer::new();
        let client = server.connect(5);
        let serving = tokio::spawn(server.serve(Recorder::default()));

        let reply = client.call(MessageInfo::with_byte(b'a')).await.unwrap();
        assert_eq!(reply.label(), u64::from(b'a') + 1);

        drop(client);
        let handler = serving.await.unwrap();
        assert_eq!(handler.seen, vec![(5, MessageInfo::with_byte(b'a'))]);
    }

    #[tokio::test]
    async fn test_calls_keep_their_channel() {
        let server = CallServer::new();
        let five = server.connect(5);
        let nine = server.connect(9);
        let serving = tokio::spawn(server.serve(Recorder::default()));

        five.call(MessageInfo::with_byte(1)).await.unwrap();
        nine.call(MessageInfo::with_byte(2)).await.unwrap();
        drop((five, nine));

        let handler = serving.await.unwrap();
        let channels: Vec<ChannelId> = handler.seen.iter().map(|(ch, _)| *ch).collect();
        assert_eq!(channels, vec![5, 9]);
    }

    #[tokio::test]
    async fn test_call_after_server_dropped_fails() {
        let server = CallServer::new();
        let client = server.connect(5);
        drop(server);

        let err = client.call(MessageInfo::with_byte(0)).await.unwrap_err();
        assert!(matches!(err, PipelineError::ChannelClosed(5)));
    }

    #[tokio::test]
    async fn test_serve_ends_when_last_client_drops() {
        let server = CallServer::new();
        let first = server.connect(5);
        let second = server.connect(5);
        let serving = tokio::spawn(server.serve(Recorder::default()));

        drop(first);
        assert!(!serving.is_finished());
        drop(second);

        let handler = tokio::time::timeout(std::time::Duration::from_secs(1), serving)
            .await
            .unwrap()
            .unwrap();
        assert!(handler.seen.is_empty());
    }
}
