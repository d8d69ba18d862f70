//! Bridge from a blocking producer thread to an async byte stream.
//!
//! The producer runs on the blocking pool and pushes chunks into a channel.
//! The consumer sees every chunk in order, then at most one error, then
//! exactly one end marker.

use bytes::Bytes;
use futures_core::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::TtsError;

#[derive(Debug)]
pub enum StreamItem {
    Data(Bytes),
    Error(TtsError),
    End,
}

/// The receiving side has gone away; the producer should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stream consumer disconnected")]
pub struct Disconnected;

enum Sender {
    Bounded(mpsc::Sender<StreamItem>),
    Unbounded(mpsc::UnboundedSender<StreamItem>),
}

impl Sender {
    fn send(&self, item: StreamItem) -> Result<(), Disconnected> {
        match self {
            Sender::Bounded(tx) => tx.blocking_send(item).map_err(|_| Disconnected),
            Sender::Unbounded(tx) => tx.send(item).map_err(|_| Disconnected),
        }
    }
}

enum Receiver {
    Bounded(mpsc::Receiver<StreamItem>),
    Unbounded(mpsc::UnboundedReceiver<StreamItem>),
}

impl Receiver {
    async fn recv(&mut self) -> Option<StreamItem> {
        match self {
            Receiver::Bounded(rx) => rx.recv().await,
            Receiver::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// Producer handle. With a bounded channel, `push` blocks while the consumer
/// is behind.
pub struct ChunkSink {
    tx: Sender,
}

impl ChunkSink {
    pub fn push(&mut self, chunk: impl Into<Bytes>) -> Result<(), Disconnected> {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx.send(StreamItem::Data(chunk))
    }
}

pub struct StreamSession {
    rx: Receiver,
    worker: Option<JoinHandle<()>>,
    end_pending: bool,
    finished: bool,
}

impl StreamSession {
    /// Run `producer` on the blocking pool. A `capacity` of zero means an
    /// unbounded channel.
    pub fn spawn<F>(capacity: usize, producer: F) -> Self
    where
        F: FnOnce(&mut ChunkSink) -> anyhow::Result<()> + Send + 'static,
    {
        let (tx, rx) = if capacity == 0 {
            let (tx, rx) = mpsc::unbounded_channel();
            (Sender::Unbounded(tx), Receiver::Unbounded(rx))
        } else {
            let (tx, rx) = mpsc::channel(capacity);
            (Sender::Bounded(tx), Receiver::Bounded(rx))
        };

        let worker = tokio::task::spawn_blocking(move || {
            let mut sink = ChunkSink { tx };
            if let Err(e) = producer(&mut sink) {
                error!("Streaming generation failed: {e:#}");
                if sink.tx.send(StreamItem::Error(TtsError::Generation(e))).is_err() {
                    return;
                }
            }
            if sink.tx.send(StreamItem::End).is_err() {
                debug!("Stream consumer gone before end of stream");
            }
        });

        Self {
            rx,
            worker: Some(worker),
            end_pending: false,
            finished: false,
        }
    }

    /// Next item from the producer. `End` is yielded once, then `None`.
    pub async fn next_item(&mut self) -> Option<StreamItem> {
        if self.finished {
            return None;
        }
        if self.end_pending {
            self.finished = true;
            return Some(StreamItem::End);
        }

        let item = match self.rx.recv().await {
            Some(item) => item,
            // Channel closed without an end marker: the worker died.
            None => {
                self.end_pending = true;
                self.join_worker().await;
                return Some(StreamItem::Error(TtsError::Generation(anyhow::anyhow!(
                    "generation worker exited without finishing the stream"
                ))));
            }
        };

        if matches!(item, StreamItem::End) {
            self.finished = true;
            self.join_worker().await;
        }
        Some(item)
    }

    async fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!("Generation worker did not finish cleanly: {e}");
            }
        }
    }

    /// Adapt the session into a body stream. A producer error ends the stream
    /// with `Err`, which aborts the HTTP response mid-body.
    pub fn into_body_stream(mut self) -> impl Stream<Item = Result<Bytes, TtsError>> + Send {
        async_stream::stream! {
            while let Some(item) = self.next_item().await {
                match item {
                    StreamItem::Data(bytes) => yield Ok(bytes),
                    StreamItem::Error(e) => {
                        yield Err(e);
                        break;
                    }
                    StreamItem::End => break,
                }
            }
        }
    }

    /// Drain the whole stream into memory.
    pub async fn collect(self) -> Result<Vec<u8>, TtsError> {
        use futures_util::StreamExt;

        let stream = self.into_body_stream();
        futures_util::pin_mut!(stream);
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(mut session: StreamSession) -> Vec<StreamItem> {
        let mut items = Vec::new();
        while let Some(item) = session.next_item().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn test_chunks_arrive_in_order_then_end_once() {
        let session = StreamSession::spawn(2, |sink| {
            for i in 0u8..10 {
                sink.push(vec![i])?;
            }
            Ok(())
        });

        let items = drain(session).await;
        assert_eq!(items.len(), 11);
        for (i, item) in items[..10].iter().enumerate() {
            match item {
                StreamItem::Data(bytes) => assert_eq!(&bytes[..], &[i as u8]),
                other => panic!("unexpected item {other:?}"),
            }
        }
        assert!(matches!(items[10], StreamItem::End));
    }

    #[tokio::test]
    async fn test_error_is_followed_by_end() {
        let session = StreamSession::spawn(0, |sink| {
            sink.push(Bytes::from_static(b"RIFF"))?;
            anyhow::bail!("model exploded")
        });

        let items = drain(session).await;
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], StreamItem::Data(_)));
        match &items[1] {
            StreamItem::Error(e) => assert!(e.to_string().contains("model exploded")),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(matches!(items[2], StreamItem::End));
    }

    #[tokio::test]
    async fn test_worker_panic_yields_error_then_end() {
        let mut session = StreamSession::spawn(0, |sink| {
            sink.push(Bytes::from_static(b"RIFF"))?;
            panic!("decoder crashed");
        });

        assert!(matches!(session.next_item().await, Some(StreamItem::Data(_))));
        match session.next_item().await {
            Some(StreamItem::Error(e)) => assert!(e.to_string().contains("exited")),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(matches!(session.next_item().await, Some(StreamItem::End)));
        assert!(session.next_item().await.is_none());
    }

    #[tokio::test]
    async fn test_body_stream_fails_on_producer_error() {
        let session = StreamSession::spawn(4, |sink| {
            sink.push(Bytes::from_static(b"abc"))?;
            anyhow::bail!("boom")
        });
        assert!(session.collect().await.is_err());
    }

    #[tokio::test]
    async fn test_collect_concatenates_chunks() {
        let session = StreamSession::spawn(1, |sink| {
            sink.push(Bytes::from_static(b"ab"))?;
            sink.push(Bytes::new())?;
            sink.push(Bytes::from_static(b"cd"))?;
            Ok(())
        });
        assert_eq!(session.collect().await.unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn test_push_fails_after_consumer_drops() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let session = StreamSession::spawn(1, move |sink| {
            let mut result = Ok(());
            for _ in 0..100 {
                result = sink.push(Bytes::from_static(b"x"));
                if result.is_err() {
                    break;
                }
            }
            let _ = done_tx.send(result);
            Ok(())
        });
        drop(session);

        assert_eq!(done_rx.await.unwrap(), Err(Disconnected));
    }
}
