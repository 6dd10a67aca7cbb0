//! Pull-based payload streams with early cancellation.
//!
//! A [`PayloadStream`] wraps the async sequence an engine returns for
//! incremental delivery or subscriptions. Items are pulled one at a time;
//! [`PayloadStream::unsubscribe`] stops the sequence, wakes any pending
//! pull, and drops the source so its teardown runs.

use futures::future::{AbortHandle, Abortable};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

use crate::error::BoxError;

/// Boxed source of a payload stream.
pub type SourceStream<T> = BoxStream<'static, Result<T, BoxError>>;

/// Cloneable handle that cancels a [`PayloadStream`] from anywhere.
#[derive(Clone)]
pub struct Unsubscribe {
    handle: AbortHandle,
}

impl Unsubscribe {
    /// Stops the stream. Safe to call any number of times, and after completion.
    pub fn unsubscribe(&self) {
        if !self.handle.is_aborted() {
            debug!("unsubscribing from payload stream");
            self.handle.abort();
        }
    }

    /// Returns true once the stream has been cancelled.
    pub fn is_unsubscribed(&self) -> bool {
        self.handle.is_aborted()
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("unsubscribed", &self.is_unsubscribed())
            .finish()
    }
}

/// A stream of payloads pulled one at a time.
pub struct PayloadStream<T> {
    source: Option<Abortable<SourceStream<T>>>,
    unsubscribe: Unsubscribe,
}

impl<T: Send + 'static> PayloadStream<T> {
    /// Wraps a source stream.
    pub fn new(source: SourceStream<T>) -> Self {
        let (handle, registration) = AbortHandle::new_pair();
        Self {
            source: Some(Abortable::new(source, registration)),
            unsubscribe: Unsubscribe { handle },
        }
    }

    /// Wraps any stream of results.
    pub fn from_stream<S>(source: S) -> Self
    where
        S: Stream<Item = Result<T, BoxError>> + Send + 'static,
    {
        Self::new(source.boxed())
    }

    /// A stream yielding a single payload.
    pub fn once(item: T) -> Self {
        Self::new(stream::once(async move { Ok(item) }).boxed())
    }
}

impl<T> PayloadStream<T> {
    /// Pulls the next payload.
    ///
    /// Returns `None` once the source is exhausted or the stream was
    /// unsubscribed. The source is dropped at that point.
    pub async fn next(&mut self) -> Option<Result<T, BoxError>> {
        futures::future::poll_fn(|cx| self.poll_item(cx)).await
    }

    /// Drains the stream, calling `on_result` for every payload in order.
    ///
    /// Resolves when the source completes or the stream is unsubscribed.
    /// An error raised by the source ends the stream and is returned.
    pub async fn subscribe<F>(&mut self, mut on_result: F) -> Result<(), BoxError>
    where
        F: FnMut(T),
    {
        while let Some(item) = self.next().await {
            on_result(item?);
        }
        Ok(())
    }

    /// Stops the underlying source. Idempotent.
    pub fn unsubscribe(&self) {
        self.unsubscribe.unsubscribe();
    }

    /// Returns a handle that can unsubscribe from another task.
    pub fn unsubscribe_handle(&self) -> Unsubscribe {
        self.unsubscribe.clone()
    }

    /// Returns true once the source has been exhausted or dropped.
    pub fn is_terminated(&self) -> bool {
        self.source.is_none()
    }

    fn poll_item(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<T, BoxError>>> {
        let Some(source) = self.source.as_mut() else {
            return Poll::Ready(None);
        };
        match source.poll_next_unpin(cx) {
            Poll::Ready(None) => {
                self.source = None;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(err))) => {
                self.source = None;
                Poll::Ready(Some(Err(err)))
            }
            other => other,
        }
    }
}

impl<T> Stream for PayloadStream<T> {
    type Item = Result<T, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_item(cx)
    }
}

impl<T> fmt::Debug for PayloadStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadStream")
            .field("terminated", &self.is_terminated())
            .field("unsubscribe", &self.unsubscribe)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counted_source(drops: &Arc<AtomicUsize>) -> SourceStream<u32> {
        let guard = DropCounter(drops.clone());
        stream::iter(1..=3)
            .map(move |n| {
                let _ = &guard;
                Ok(n)
            })
            .chain(stream::pending())
            .boxed()
    }

    #[tokio::test]
    async fn test_pulls_in_order() {
        let mut stream = PayloadStream::from_stream(stream::iter((1..=3).map(Ok::<u32, BoxError>)));
        let mut seen = Vec::new();
        stream.subscribe(|n| seen.push(n)).await.unwrap();

        assert_eq!(seen, vec![1, 2, 3]);
        assert!(stream.is_terminated());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_once() {
        let mut stream = PayloadStream::once("only");
        assert_eq!(stream.next().await.unwrap().unwrap(), "only");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_drops_source() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut stream = PayloadStream::new(counted_source(&drops));

        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        stream.unsubscribe();
        stream.unsubscribe();

        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        stream.unsubscribe();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_after_completion_is_noop() {
        let mut stream = PayloadStream::once(1u8);
        while stream.next().await.is_some() {}
        stream.unsubscribe();
        stream.unsubscribe();
        assert!(stream.is_terminated());
    }

    #[tokio::test]
    async fn test_unsubscribe_settles_pending_subscribe() {
        let mut stream = PayloadStream::<u32>::from_stream(stream::pending());
        let handle = stream.unsubscribe_handle();

        let task = tokio::spawn(async move {
            let mut count = 0;
            let result = stream.subscribe(|_| count += 1).await;
            result.map(|()| count)
        });

        tokio::task::yield_now().await;
        handle.unsubscribe();

        let count = task.await.unwrap().unwrap();
        assert_eq!(count, 0);
        assert!(handle.is_unsubscribed());
    }

    #[tokio::test]
    async fn test_source_error_ends_stream() {
        let source = stream::iter(vec![Ok(1u32), Err::<u32, BoxError>("broken".into()), Ok(3)]);
        let mut stream = PayloadStream::from_stream(source);

        let mut seen = Vec::new();
        let err = stream.subscribe(|n| seen.push(n)).await.unwrap_err();

        assert_eq!(seen, vec![1]);
        assert_eq!(err.to_string(), "broken");
        assert!(stream.next().await.is_none());
    }
}
