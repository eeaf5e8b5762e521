//! Chunked-response sink
//!
//! Responders run on blocking tasks and push body chunks through a
//! bounded channel; the HTTP side drains it into a streaming body. Once
//! the client disconnects the receiver is dropped and the next write
//! returns `false`, which is the responder's only cancellation signal.

use axum::body::Body;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Chunks in flight before a write blocks; keeps slow clients from
/// buffering unboundedly while the newest-wins capture slot absorbs the
/// backpressure.
const SINK_DEPTH: usize = 4;

/// Write side handed to a responder loop
pub struct StreamSink {
    tx: mpsc::Sender<Bytes>,
}

impl StreamSink {
    /// Write one chunk; `false` means the client is gone.
    pub fn write(&self, data: impl Into<Bytes>) -> bool {
        self.tx.blocking_send(data.into()).is_ok()
    }
}

/// Create a sink and the streaming response body it feeds
pub fn sink_body() -> (StreamSink, Body) {
    let (tx, mut rx) = mpsc::channel::<Bytes>(SINK_DEPTH);
    let body = Body::from_stream(async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<Bytes, std::io::Error>(chunk);
        }
    });
    (StreamSink { tx }, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_write_fails_after_receiver_drops() {
        let (sink, body) = sink_body();
        drop(body);
        let ok = tokio::task::spawn_blocking(move || sink.write(Bytes::from_static(b"x")))
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_chunks_flow_through_body() {
        let (sink, body) = sink_body();
        let writer = tokio::task::spawn_blocking(move || {
            assert!(sink.write(Bytes::from_static(b"one")));
            assert!(sink.write(Bytes::from_static(b"two")));
        });

        let mut stream = body.into_data_stream();
        assert_eq!(stream.next().await.unwrap().unwrap().as_ref(), b"one");
        assert_eq!(stream.next().await.unwrap().unwrap().as_ref(), b"two");
        writer.await.unwrap();
        assert!(stream.next().await.is_none());
    }
}
