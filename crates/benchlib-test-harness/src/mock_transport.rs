//! In-memory scripted transport.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use benchlib_core::error::{Error, Result};
use benchlib_core::transport::Transport;

/// A scripted [`Transport`] that records what was sent and plays back
/// queued replies, one reply per send.
///
/// A reply can be queued as multiple segments; each `receive` call yields
/// the next segment, so reassembly logic can be exercised without a real
/// socket. When no scripted data is pending, `receive` reports
/// [`Error::Timeout`], matching what a silent instrument looks like.
pub struct MockTransport {
    /// One entry per expected send; each entry is the reply's segments.
    replies: VecDeque<VecDeque<Vec<u8>>>,
    /// Segments queued for delivery by subsequent `receive` calls.
    pending: VecDeque<Vec<u8>>,
    sent: Arc<Mutex<Vec<String>>>,
    connected: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport {
            replies: VecDeque::new(),
            pending: VecDeque::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
            connected: true,
        }
    }

    /// Queue a reply delivered whole by the next unmatched send.
    pub fn push_reply(&mut self, reply: &str) {
        self.replies
            .push_back(VecDeque::from(vec![reply.as_bytes().to_vec()]));
    }

    /// Queue a reply delivered in multiple segments, one per `receive`
    /// call.
    pub fn push_segments(&mut self, segments: &[&str]) {
        self.replies.push_back(
            segments
                .iter()
                .map(|s| s.as_bytes().to_vec())
                .collect::<VecDeque<_>>(),
        );
    }

    /// A shared handle to the log of sent lines, usable after the
    /// transport has been handed to a client.
    pub fn sent_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.sent)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        let line = String::from_utf8_lossy(data).into_owned();
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(line);
        }
        if let Some(segments) = self.replies.pop_front() {
            self.pending.extend(segments);
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        match self.pending.pop_front() {
            Some(segment) => {
                let n = segment.len().min(buf.len());
                buf[..n].copy_from_slice(&segment[..n]);
                // Anything the buffer could not hold goes back to the
                // front of the queue.
                if n < segment.len() {
                    self.pending.push_front(segment[n..].to_vec());
                }
                Ok(n)
            }
            None => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_play_back_in_order() {
        let mut mock = MockTransport::new();
        mock.push_reply("A,001,O\n");
        mock.push_reply("B,002,O\n");

        let mut buf = [0u8; 64];
        mock.send(b"A,001\n").await.unwrap();
        let n = mock.receive(&mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..n], b"A,001,O\n");

        mock.send(b"B,002\n").await.unwrap();
        let n = mock.receive(&mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..n], b"B,002,O\n");
    }

    #[tokio::test]
    async fn segments_arrive_one_per_receive() {
        let mut mock = MockTransport::new();
        mock.push_segments(&["A,001,12", "34\n"]);

        let mut buf = [0u8; 64];
        mock.send(b"A,001\n").await.unwrap();
        let n = mock.receive(&mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..n], b"A,001,12");
        let n = mock.receive(&mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..n], b"34\n");
    }

    #[tokio::test]
    async fn exhausted_script_times_out() {
        let mut mock = MockTransport::new();
        let mut buf = [0u8; 64];
        mock.send(b"A,001\n").await.unwrap();
        assert!(matches!(
            mock.receive(&mut buf, Duration::from_secs(1)).await,
            Err(Error::Timeout)
        ));
    }

    #[tokio::test]
    async fn sent_log_is_shared() {
        let mut mock = MockTransport::new();
        let log = mock.sent_log();
        mock.send(b"A,001\n").await.unwrap();
        assert_eq!(log.lock().unwrap().as_slice(), ["A,001\n"]);
    }

    #[tokio::test]
    async fn closed_transport_rejects_io() {
        let mut mock = MockTransport::new();
        mock.close().await.unwrap();
        assert!(!mock.is_connected());
        assert!(matches!(mock.send(b"x").await, Err(Error::NotConnected)));
    }
}
