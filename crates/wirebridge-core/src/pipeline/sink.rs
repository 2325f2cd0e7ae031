//! Response sinks
//!
//! The pipeline hands each finished batch to a sink. Sinks expose an
//! "is still open" check and an optional deadline, both consulted between
//! batches.

use anyhow::anyhow;
use bytes::Bytes;
use std::time::Instant;
use tokio::sync::mpsc;

/// Destination of encoded batches
pub trait ResponseSink {
    fn is_open(&self) -> bool;

    /// Point in time after which no further batch may be written
    fn deadline(&self) -> Option<Instant> {
        None
    }

    fn write(&mut self, batch: Bytes) -> anyhow::Result<()>;
}

/// Collects batches in memory
#[derive(Debug, Default)]
pub struct VecSink {
    batches: Vec<Bytes>,
    closed: bool,
    deadline: Option<Instant>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::default()
        }
    }

    /// Mark the sink closed, as if the client went away
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn batches(&self) -> &[Bytes] {
        &self.batches
    }

    /// All batches joined together
    pub fn concat(&self) -> Vec<u8> {
        self.batches.iter().flat_map(|b| b.iter().copied()).collect()
    }
}

impl ResponseSink for VecSink {
    fn is_open(&self) -> bool {
        !self.closed
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn write(&mut self, batch: Bytes) -> anyhow::Result<()> {
        if self.closed {
            return Err(anyhow!("sink is closed"));
        }
        self.batches.push(batch);
        Ok(())
    }
}

/// Feeds batches into a bounded tokio channel.
///
/// `write` blocks while the channel is full, so the pipeline must run on a
/// blocking thread (`tokio::task::spawn_blocking`). The sink reports closed
/// as soon as the receiver is dropped.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
    deadline: Option<Instant>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx, deadline: None }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Sink plus the receiving end of a channel holding `capacity` batches
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl ResponseSink for ChannelSink {
    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn write(&mut self, batch: Bytes) -> anyhow::Result<()> {
        self.tx
            .blocking_send(batch)
            .map_err(|_| anyhow!("response receiver dropped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink() {
        let mut sink = VecSink::new();
        sink.write(Bytes::from_static(b"ab")).unwrap();
        sink.write(Bytes::from_static(b"c")).unwrap();
        assert_eq!(sink.batches().len(), 2);
        assert_eq!(sink.concat(), b"abc");

        sink.close();
        assert!(!sink.is_open());
        assert!(sink.write(Bytes::from_static(b"d")).is_err());
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_batches() {
        let (mut sink, mut rx) = ChannelSink::channel(4);
        let writer = tokio::task::spawn_blocking(move || {
            sink.write(Bytes::from_static(b"one")).unwrap();
            sink.write(Bytes::from_static(b"two")).unwrap();
        });
        writer.await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_channel_sink_closed_when_receiver_dropped() {
        let (mut sink, rx) = ChannelSink::channel(1);
        assert!(sink.is_open());
        drop(rx);
        assert!(!sink.is_open());
        let result = tokio::task::spawn_blocking(move || sink.write(Bytes::from_static(b"x")))
            .await
            .unwrap();
        assert!(result.is_err());
    }
}
