//! Process standard input as a keystroke source.
//!
//! A background task reads stdin in chunks and forwards every byte over an
//! unbounded channel. `pending` moves whatever has arrived into a local queue
//! so it can report an exact count without blocking.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::hardware::capabilities::KeySource;

/// Keyboard backed by the process's standard input.
#[derive(Debug, Default)]
pub struct StdinKeyboard {
    rx: Option<mpsc::UnboundedReceiver<u8>>,
    queued: VecDeque<u8>,
    reader: Option<JoinHandle<()>>,
}

impl StdinKeyboard {
    /// Unclaimed keyboard.
    pub fn new() -> Self {
        Self::default()
    }

    fn collect(&mut self) -> Result<()> {
        let Some(rx) = self.rx.as_mut() else {
            bail!("stdin keyboard used before claim");
        };
        while let Ok(byte) = rx.try_recv() {
            self.queued.push_back(byte);
        }
        Ok(())
    }
}

#[async_trait]
impl KeySource for StdinKeyboard {
    async fn claim(&mut self) -> Result<()> {
        if self.rx.is_some() {
            bail!("stdin keyboard already claimed");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.reader = Some(tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            let mut buf = [0u8; 256];
            loop {
                match stdin.read(&mut buf).await {
                    Ok(0) => {
                        tracing::info!("stdin closed; no further keystrokes");
                        break;
                    }
                    Ok(n) => {
                        if buf[..n].iter().any(|&b| tx.send(b).is_err()) {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
        }));
        self.rx = Some(rx);
        tracing::info!("Reading keystrokes from stdin");
        Ok(())
    }

    async fn pending(&mut self) -> Result<usize> {
        self.collect()?;
        Ok(self.queued.len())
    }

    async fn next_char(&mut self) -> Result<Option<u8>> {
        if self.queued.is_empty() {
            self.collect()?;
        }
        Ok(self.queued.pop_front())
    }
}

impl Drop for StdinKeyboard {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unclaimed_keyboard_errors() {
        let mut kbd = StdinKeyboard::new();
        assert!(kbd.pending().await.is_err());
        assert!(kbd.next_char().await.is_err());
    }

    #[tokio::test]
    async fn test_queued_bytes_are_counted() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut kbd = StdinKeyboard {
            rx: Some(rx),
            queued: VecDeque::new(),
            reader: None,
        };
        for &b in b"ok" {
            tx.send(b).unwrap();
        }

        assert_eq!(kbd.pending().await.unwrap(), 2);
        assert_eq!(kbd.next_char().await.unwrap(), Some(b'o'));
        assert_eq!(kbd.next_char().await.unwrap(), Some(b'k'));
        assert_eq!(kbd.next_char().await.unwrap(), None);
    }
}
