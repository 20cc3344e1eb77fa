//! Asynchronous sample stream adapter
//!
//! [`CaptureSource::start_streaming`] is deliberately blocking. This
//! module bridges it onto a [`futures::Stream`]: the blocking call runs on
//! a dedicated capture thread and converted blocks cross into async land
//! over a bounded tokio channel.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::{CaptureSource, SampleSink};

/// Default channel depth, in blocks.
const DEFAULT_CAPACITY: usize = 32;

/// Sink half living on the capture thread. `blocking_send` applies
/// backpressure to the vendor delivery; a closed channel means the
/// consumer is gone, and the stream is wound down by [`SampleStream`]'s
/// drop.
struct ChannelSink {
    tx: mpsc::Sender<Result<Vec<f32>>>,
}

impl SampleSink for ChannelSink {
    fn samples(&mut self, block: &[f32]) {
        let _ = self.tx.blocking_send(Ok(block.to_vec()));
    }

    fn stream_fault(&mut self, observed_len: usize) {
        let _ = self.tx.blocking_send(Err(Error::device(format!(
            "stream fault: vendor delivered {} bytes",
            observed_len
        ))));
    }
}

/**
 * Asynchronous capture stream
 */
///
/// Yields converted sample blocks until the capture ends. A stream fault
/// or a failure of the underlying streaming call surfaces as a final
/// `Err` item; after that (or after [`SampleStream::stop`]) the stream
/// finishes. Dropping the stream stops the capture.
pub struct SampleStream {
    rx: mpsc::Receiver<Result<Vec<f32>>>,
    source: Arc<dyn CaptureSource>,
    _handle: std::thread::JoinHandle<()>,
}

impl SampleStream {
    /// Starts streaming `source` on a dedicated capture thread.
    pub fn new(source: Arc<dyn CaptureSource>) -> Self {
        SampleStream::with_capacity(source, DEFAULT_CAPACITY)
    }

    /// As [`SampleStream::new`] with an explicit channel depth.
    pub fn with_capacity(source: Arc<dyn CaptureSource>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Result<Vec<f32>>>(capacity);
        let capture_source = Arc::clone(&source);
        let error_tx = tx.clone();

        let handle = std::thread::spawn(move || {
            let sink = ChannelSink { tx };
            if let Err(err) = capture_source.start_streaming(Box::new(sink)) {
                let _ = error_tx.blocking_send(Err(err));
            }
        });

        SampleStream {
            rx,
            source,
            _handle: handle,
        }
    }

    /// Asks the capture to wind down; the stream finishes shortly after.
    pub fn stop(&self) {
        let _ = self.source.stop();
    }
}

impl Stream for SampleStream {
    type Item = Result<Vec<f32>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(item)) => Poll::Ready(Some(item)),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for SampleStream {
    fn drop(&mut self) {
        let _ = self.source.stop();
    }
}
