use crate::Context;
use futures_core::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::Context as TaskContext;
use std::task::Poll;

pin_project! {
    /// A future or stream with an associated execution context.
    ///
    /// The context is attached for the duration of every poll, so the work
    /// inside the inner future always observes the context that was captured
    /// when the future was registered, regardless of which context is active
    /// in the frame that eventually polls it.
    #[derive(Clone, Debug)]
    pub struct WithContext<T> {
        #[pin]
        inner: T,
        cx: Context,
    }
}

impl<T: std::future::Future> std::future::Future for WithContext<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _guard = this.cx.clone().attach();
        this.inner.poll(task_cx)
    }
}

impl<T: Stream> Stream for WithContext<T> {
    type Item = T::Item;

    fn poll_next(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let _guard = this.cx.clone().attach();
        T::poll_next(this.inner, task_cx)
    }
}

impl<F: std::future::Future> FutureContextExt for F {}

/// Extension trait attaching an execution context to a future.
pub trait FutureContextExt: Sized {
    /// Attaches the provided [`Context`] to this future.
    ///
    /// The context will be current whenever the future is polled.
    fn with_context(self, cx: Context) -> WithContext<Self> {
        WithContext { inner: self, cx }
    }

    /// Attaches the current [`Context`] to this future.
    ///
    /// This is the capture half of the suspension-point contract: call it
    /// where the asynchronous operation is registered, and the registering
    /// task's context travels with the future to wherever it is polled.
    fn with_current_context(self) -> WithContext<Self> {
        self.with_context(Context::current())
    }
}

impl<S: Stream> StreamContextExt for S {}

/// Extension trait attaching an execution context to a stream.
///
/// Kept separate from [`FutureContextExt`] to avoid overlapping blanket
/// implementations.
pub trait StreamContextExt: Sized {
    /// Attaches the provided [`Context`] to this stream.
    ///
    /// The context will be current whenever the stream is polled.
    fn with_context(self, cx: Context) -> WithContext<Self> {
        WithContext { inner: self, cx }
    }

    /// Attaches the current [`Context`] to this stream.
    fn with_current_context(self) -> WithContext<Self> {
        self.with_context(Context::current())
    }
}
