//! Outbound side of a streaming connection.
//!
//! The HTTP handler owns the receiving half and turns it into the response
//! body; everything else writes encoded frames through [`FrameSender`].
//! Writes never wait: a full buffer drops the frame for this connection
//! only, a closed one means the client is gone.

use scenecast_core::SseFrame;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,
    #[error("Outbound buffer full")]
    Full,
}

/// Cloneable write handle for one connection.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<String>,
}

impl FrameSender {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    pub fn is_writable(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn send_raw(&self, payload: String) -> Result<(), TransportError> {
        self.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Full,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    pub fn send_frame(&self, frame: &SseFrame) -> Result<(), TransportError> {
        self.send_raw(frame.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_receive_in_order() {
        let (sender, mut rx) = FrameSender::channel(4);
        sender.send_frame(&SseFrame::ping()).unwrap();
        sender.send_frame(&SseFrame::event("a", "1")).unwrap();

        assert_eq!(rx.recv().await.unwrap(), ": ping\n\n");
        assert_eq!(rx.recv().await.unwrap(), "event: a\ndata: 1\n\n");
    }

    #[test]
    fn test_full_and_closed_are_distinct() {
        let (sender, rx) = FrameSender::channel(1);
        sender.send_raw("first".into()).unwrap();
        assert_eq!(sender.send_raw("second".into()), Err(TransportError::Full));
        assert!(sender.is_writable());

        drop(rx);
        assert!(!sender.is_writable());
        assert_eq!(sender.send_raw("third".into()), Err(TransportError::Closed));
    }
}
